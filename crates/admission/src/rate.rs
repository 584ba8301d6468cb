//! Rolling per-key request counters for rate-based statements.
//!
//! Each rate-based statement owns one [`RateCounter`]. A counter maps an
//! aggregate key (a source address) to the requests seen for it inside the
//! evaluation window.
//!
//! # Window modes
//!
//! - **Sliding** (default): the window trails each request. Timestamps are
//!   kept per key, capped at `limit + 1` since only "more than `limit`"
//!   matters.
//! - **Fixed**: the window is a bucket aligned to the counter's creation
//!   time. The count resets when a new bucket starts.
//!
//! # Memory bound
//!
//! The table holds at most `max_tracked_keys` keys. Every `sweep_interval`
//! records, entries whose window has fully elapsed are evicted. When a new
//! key arrives at a full table a sweep is forced; if the table is still
//! full the record fails with [`EvaluationError::CounterCapacity`].

use std::{
    collections::{HashMap, VecDeque, hash_map::Entry},
    hash::{BuildHasher, RandomState},
    sync::atomic::{AtomicU64, AtomicUsize, Ordering},
    time::{Duration, Instant},
};

use parking_lot::Mutex;
use serde::{Deserialize, Serialize};

use crate::error::EvaluationError;

/// How the evaluation window moves.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum WindowMode {
    /// Window trails each request.
    #[default]
    Sliding,
    /// Window is a fixed bucket.
    Fixed,
}

/// Sizing of the counter tables shared by every rate-based statement.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", deny_unknown_fields, default)]
pub struct RateTableConfig {
    /// Maximum distinct aggregate keys tracked per statement.
    pub max_tracked_keys: usize,
    /// Number of independently locked shards.
    pub shards: usize,
    /// Run an eviction sweep every this many records.
    pub sweep_interval: u64,
}

impl Default for RateTableConfig {
    fn default() -> Self {
        Self { max_tracked_keys: 100_000, shards: 16, sweep_interval: 1024 }
    }
}

#[derive(Debug)]
enum Window {
    Sliding(VecDeque<Instant>),
    Fixed { bucket: u64, count: u64 },
}

/// Sharded, bounded request counter for one rate-based statement.
#[derive(Debug)]
pub struct RateCounter {
    limit: u64,
    window: Duration,
    mode: WindowMode,
    epoch: Instant,
    max_tracked_keys: usize,
    sweep_interval: u64,
    hasher: RandomState,
    shards: Vec<Mutex<HashMap<String, Window>>>,
    tracked: AtomicUsize,
    records: AtomicU64,
}

impl RateCounter {
    /// Creates a counter that reports counts up to `limit + 1`.
    ///
    /// `table.shards` and `table.max_tracked_keys` are clamped to at least 1.
    #[must_use]
    pub fn new(limit: u64, window: Duration, mode: WindowMode, table: RateTableConfig) -> Self {
        Self::with_epoch(limit, window, mode, table, Instant::now())
    }

    /// Like [`new`](Self::new) with an explicit fixed-window origin.
    #[must_use]
    pub fn with_epoch(
        limit: u64,
        window: Duration,
        mode: WindowMode,
        table: RateTableConfig,
        epoch: Instant,
    ) -> Self {
        let shards = (0..table.shards.max(1)).map(|_| Mutex::new(HashMap::new())).collect();
        Self {
            limit,
            window,
            mode,
            epoch,
            max_tracked_keys: table.max_tracked_keys.max(1),
            sweep_interval: table.sweep_interval.max(1),
            hasher: RandomState::new(),
            shards,
            tracked: AtomicUsize::new(0),
            records: AtomicU64::new(0),
        }
    }

    /// Configured limit.
    #[must_use]
    pub fn limit(&self) -> u64 {
        self.limit
    }

    /// Number of keys currently tracked.
    #[must_use]
    pub fn tracked_keys(&self) -> usize {
        self.tracked.load(Ordering::Relaxed)
    }

    /// Maximum number of keys the table may hold.
    #[must_use]
    pub fn capacity(&self) -> usize {
        self.max_tracked_keys
    }

    /// Records one request for `key` at `now` and returns the number of
    /// requests in the current window, this one included. Counts saturate at
    /// `limit + 1`.
    ///
    /// # Errors
    ///
    /// Returns [`EvaluationError::CounterCapacity`] if `key` is new and the
    /// table is full even after a sweep.
    pub fn record_at(&self, key: &str, now: Instant) -> Result<u64, EvaluationError> {
        let seen = self.records.fetch_add(1, Ordering::Relaxed);
        if seen > 0 && seen % self.sweep_interval == 0 {
            tracing::debug!(records = seen, "running periodic rate counter sweep");
            self.sweep(now);
        }

        let shard = self.shard_for(key);
        if let Some(window) = shard.lock().get_mut(key) {
            return Ok(self.bump(window, now));
        }

        self.reserve_slot(now)?;
        let mut map = shard.lock();
        match map.entry(key.to_owned()) {
            Entry::Occupied(slot) => {
                // Raced with another insert of the same key.
                self.tracked.fetch_sub(1, Ordering::Relaxed);
                Ok(self.bump(slot.into_mut(), now))
            },
            Entry::Vacant(slot) => {
                let window = slot.insert(self.empty_window(now));
                Ok(self.bump(window, now))
            },
        }
    }

    /// Evicts every key whose window has fully elapsed at `now`.
    /// Returns the number of evicted keys.
    pub fn sweep(&self, now: Instant) -> usize {
        let mut evicted = 0;
        for shard in &self.shards {
            let mut map = shard.lock();
            let before = map.len();
            map.retain(|_, window| !self.is_expired(window, now));
            evicted += before - map.len();
        }
        if evicted > 0 {
            self.tracked.fetch_sub(evicted, Ordering::Relaxed);
            tracing::debug!(evicted, remaining = self.tracked_keys(), "rate counter sweep");
        }
        evicted
    }

    fn reserve_slot(&self, now: Instant) -> Result<(), EvaluationError> {
        if self.try_reserve() {
            return Ok(());
        }
        tracing::debug!(max = self.max_tracked_keys, "rate counter table full, forcing sweep");
        self.sweep(now);
        if self.try_reserve() {
            return Ok(());
        }
        tracing::warn!(max = self.max_tracked_keys, "rate counter table full after sweep");
        Err(EvaluationError::CounterCapacity { max: self.max_tracked_keys })
    }

    fn try_reserve(&self) -> bool {
        self.tracked
            .fetch_update(Ordering::AcqRel, Ordering::Acquire, |n| {
                (n < self.max_tracked_keys).then_some(n + 1)
            })
            .is_ok()
    }

    fn shard_for(&self, key: &str) -> &Mutex<HashMap<String, Window>> {
        let idx = (self.hasher.hash_one(key) % self.shards.len() as u64) as usize;
        &self.shards[idx]
    }

    fn bucket(&self, now: Instant) -> u64 {
        let elapsed = now.saturating_duration_since(self.epoch).as_nanos();
        (elapsed / self.window.as_nanos().max(1)) as u64
    }

    fn empty_window(&self, now: Instant) -> Window {
        match self.mode {
            WindowMode::Sliding => Window::Sliding(VecDeque::new()),
            WindowMode::Fixed => Window::Fixed { bucket: self.bucket(now), count: 0 },
        }
    }

    fn bump(&self, window: &mut Window, now: Instant) -> u64 {
        let cap = self.limit.saturating_add(1);
        match window {
            Window::Sliding(stamps) => {
                if let Some(cutoff) = now.checked_sub(self.window) {
                    while stamps.front().is_some_and(|front| *front <= cutoff) {
                        stamps.pop_front();
                    }
                }
                stamps.push_back(now);
                while stamps.len() as u64 > cap {
                    stamps.pop_front();
                }
                stamps.len() as u64
            },
            Window::Fixed { bucket, count } => {
                let current = self.bucket(now);
                if current != *bucket {
                    *bucket = current;
                    *count = 0;
                }
                *count = (*count + 1).min(cap);
                *count
            },
        }
    }

    fn is_expired(&self, window: &Window, now: Instant) -> bool {
        match window {
            Window::Sliding(stamps) => match (stamps.back(), now.checked_sub(self.window)) {
                (Some(last), Some(cutoff)) => *last <= cutoff,
                (None, _) => true,
                (Some(_), None) => false,
            },
            Window::Fixed { bucket, .. } => *bucket < self.bucket(now),
        }
    }
}
