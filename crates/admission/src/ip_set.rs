//! IP address sets and the membership-provider contract.
//!
//! Rules reference sets by name. The ACL resolves names to
//! [`IpSetProvider`]s when a policy is compiled: declared sets become static
//! [`IpSet`]s, and callers may register their own providers backed by an
//! external service.

use std::{fmt, net::IpAddr, str::FromStr, sync::Arc};

use serde::{Deserialize, Serialize};

use crate::error::{AdmissionError, EvaluationError};

/// Address family of an IP set.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum IpAddressVersion {
    /// IPv4 addresses.
    #[serde(rename = "IPV4")]
    Ipv4,
    /// IPv6 addresses.
    #[serde(rename = "IPV6")]
    Ipv6,
}

impl IpAddressVersion {
    fn as_str(self) -> &'static str {
        match self {
            Self::Ipv4 => "IPV4",
            Self::Ipv6 => "IPV6",
        }
    }

    fn matches(self, addr: IpAddr) -> bool {
        matches!((self, addr), (Self::Ipv4, IpAddr::V4(_)) | (Self::Ipv6, IpAddr::V6(_)))
    }
}

impl fmt::Display for IpAddressVersion {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// A network in CIDR notation.
///
/// A bare address parses as a single-host network (`/32` or `/128`). Host
/// bits below the prefix are ignored.
///
/// ```
/// use pointgate_admission::Cidr;
///
/// let net: Cidr = "146.198.93.0/24".parse().unwrap();
/// assert!(net.contains("146.198.93.180".parse().unwrap()));
/// assert!(!net.contains("146.198.94.1".parse().unwrap()));
/// ```
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct Cidr {
    network: IpAddr,
    prefix_len: u8,
}

impl Cidr {
    /// Network address with host bits cleared.
    #[must_use]
    pub fn network(&self) -> IpAddr {
        self.network
    }

    /// Prefix length in bits.
    #[must_use]
    pub fn prefix_len(&self) -> u8 {
        self.prefix_len
    }

    /// Returns `true` if `addr` falls inside this network. Addresses of the
    /// other family never match.
    #[must_use]
    pub fn contains(&self, addr: IpAddr) -> bool {
        match (self.network, addr.to_canonical()) {
            (IpAddr::V4(net), IpAddr::V4(ip)) => {
                let mask = mask_u32(self.prefix_len);
                u32::from(net) & mask == u32::from(ip) & mask
            },
            (IpAddr::V6(net), IpAddr::V6(ip)) => {
                let mask = mask_u128(self.prefix_len);
                u128::from(net) & mask == u128::from(ip) & mask
            },
            _ => false,
        }
    }
}

fn mask_u32(prefix_len: u8) -> u32 {
    u32::MAX.checked_shl(32 - u32::from(prefix_len)).unwrap_or(0)
}

fn mask_u128(prefix_len: u8) -> u128 {
    u128::MAX.checked_shl(128 - u32::from(prefix_len)).unwrap_or(0)
}

impl FromStr for Cidr {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let (addr, prefix) = match s.split_once('/') {
            Some((addr, prefix)) => (addr, Some(prefix)),
            None => (s, None),
        };
        let addr: IpAddr = addr.trim().parse().map_err(|e| format!("{e}"))?;
        let max = if addr.is_ipv4() { 32 } else { 128 };
        let prefix_len = match prefix {
            Some(p) => p.trim().parse::<u8>().map_err(|_| format!("invalid prefix length {p:?}"))?,
            None => max,
        };
        if prefix_len > max {
            return Err(format!("prefix length {prefix_len} exceeds {max}"));
        }
        let network = match addr {
            IpAddr::V4(v4) => IpAddr::V4((u32::from(v4) & mask_u32(prefix_len)).into()),
            IpAddr::V6(v6) => IpAddr::V6((u128::from(v6) & mask_u128(prefix_len)).into()),
        };
        Ok(Self { network, prefix_len })
    }
}

impl fmt::Display for Cidr {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}/{}", self.network, self.prefix_len)
    }
}

/// Answers "is this address in the set?" for one named set.
///
/// Implementations backed by a remote service report failures as
/// [`EvaluationError::IpSetUnavailable`]; the ACL then blocks the request.
pub trait IpSetProvider: Send + Sync + fmt::Debug {
    /// Name rules use to reference this set.
    fn name(&self) -> &str;

    /// Membership test.
    ///
    /// # Errors
    ///
    /// Returns an [`EvaluationError`] when membership cannot be determined.
    fn contains(&self, addr: IpAddr) -> Result<bool, EvaluationError>;
}

/// Shared handle to a provider.
pub type SharedIpSet = Arc<dyn IpSetProvider>;

/// Declaration of an IP set inside a policy document.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", deny_unknown_fields)]
pub struct IpSetConfig {
    /// Set name.
    pub name: String,
    /// Address family every entry must belong to.
    pub ip_address_version: IpAddressVersion,
    /// Addresses or CIDR ranges.
    #[serde(default)]
    pub addresses: Vec<String>,
}

/// A fixed set of CIDR ranges.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct IpSet {
    name: String,
    version: IpAddressVersion,
    ranges: Vec<Cidr>,
}

impl IpSet {
    /// Parses and validates a declared set.
    ///
    /// # Errors
    ///
    /// Returns [`AdmissionError::InvalidCidr`] for unparsable entries and
    /// [`AdmissionError::AddressVersionMismatch`] for entries of the wrong
    /// family.
    pub fn from_config(config: &IpSetConfig) -> Result<Self, AdmissionError> {
        let mut ranges = Vec::with_capacity(config.addresses.len());
        for value in &config.addresses {
            let cidr: Cidr = value.parse().map_err(|reason| AdmissionError::InvalidCidr {
                set: config.name.clone(),
                value: value.clone(),
                reason,
            })?;
            if !config.ip_address_version.matches(cidr.network) {
                return Err(AdmissionError::AddressVersionMismatch {
                    set: config.name.clone(),
                    version: config.ip_address_version.as_str(),
                    value: value.clone(),
                });
            }
            ranges.push(cidr);
        }
        Ok(Self { name: config.name.clone(), version: config.ip_address_version, ranges })
    }

    /// Address family.
    #[must_use]
    pub fn version(&self) -> IpAddressVersion {
        self.version
    }

    /// The parsed ranges.
    #[must_use]
    pub fn ranges(&self) -> &[Cidr] {
        &self.ranges
    }
}

impl IpSetProvider for IpSet {
    fn name(&self) -> &str {
        &self.name
    }

    fn contains(&self, addr: IpAddr) -> Result<bool, EvaluationError> {
        Ok(self.ranges.iter().any(|range| range.contains(addr)))
    }
}
