//! Text transformations applied before byte matching.

use std::borrow::Cow;

use serde::{Deserialize, Serialize};

/// A single normalization step.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum TransformType {
    /// Leave the text unchanged.
    None,
    /// ASCII lowercase.
    Lowercase,
    /// ASCII uppercase.
    Uppercase,
    /// Collapse each run of whitespace into a single space.
    CompressWhiteSpace,
    /// Percent-decode; invalid UTF-8 is replaced lossily.
    UrlDecode,
}

impl TransformType {
    /// Applies this step to `input`.
    #[must_use]
    pub fn apply<'a>(self, input: Cow<'a, str>) -> Cow<'a, str> {
        match self {
            Self::None => input,
            Self::Lowercase if input.bytes().any(|b| b.is_ascii_uppercase()) => {
                Cow::Owned(input.to_ascii_lowercase())
            },
            Self::Uppercase if input.bytes().any(|b| b.is_ascii_lowercase()) => {
                Cow::Owned(input.to_ascii_uppercase())
            },
            Self::Lowercase | Self::Uppercase => input,
            Self::CompressWhiteSpace => Cow::Owned(compress_white_space(&input)),
            Self::UrlDecode if input.contains('%') => {
                let decoded = urlencoding::decode_binary(input.as_bytes());
                Cow::Owned(String::from_utf8_lossy(&decoded).into_owned())
            },
            Self::UrlDecode => input,
        }
    }
}

fn compress_white_space(input: &str) -> String {
    let mut out = String::with_capacity(input.len());
    let mut in_run = false;
    for c in input.chars() {
        if c.is_whitespace() {
            if !in_run {
                out.push(' ');
            }
            in_run = true;
        } else {
            out.push(c);
            in_run = false;
        }
    }
    out
}

/// One entry of a rule's transformation list.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", deny_unknown_fields)]
pub struct TextTransformation {
    /// Lower priorities run first.
    pub priority: u32,
    /// The step to run.
    #[serde(rename = "type")]
    pub kind: TransformType,
}

/// An ordered sequence of transformations.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct TransformChain {
    steps: Vec<TransformType>,
}

impl TransformChain {
    /// Orders `transformations` by priority.
    ///
    /// Returns the first duplicated priority on failure.
    pub fn new(transformations: &[TextTransformation]) -> Result<Self, u32> {
        let mut sorted = transformations.to_vec();
        sorted.sort_by_key(|t| t.priority);
        if let Some(pair) = sorted.windows(2).find(|w| w[0].priority == w[1].priority) {
            return Err(pair[0].priority);
        }
        Ok(Self { steps: sorted.into_iter().map(|t| t.kind).collect() })
    }

    /// Runs every step in order.
    #[must_use]
    pub fn apply<'a>(&self, input: &'a str) -> Cow<'a, str> {
        self.steps.iter().fold(Cow::Borrowed(input), |acc, step| step.apply(acc))
    }
}
