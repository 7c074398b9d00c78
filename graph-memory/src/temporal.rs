//! Bi-temporal validity and clocks
//!
//! Two time axes are tracked for every relationship:
//! - **Valid time**: when the fact was true in the real world (`valid_at`/`invalid_at`)
//! - **Transaction time**: when the fact was recorded (`created_at`)
//!
//! Valid-time intervals are half-open: `[valid_at, invalid_at)`.

use std::sync::Arc;

use chrono::{DateTime, Duration, Utc};
use parking_lot::Mutex;
use serde::{Deserialize, Serialize};

use crate::error::{MemoryError, Result};

/// Source of "now" for every write and current-time query
pub trait Clock: Send + Sync {
    fn now(&self) -> DateTime<Utc>;
}

/// Wall clock
#[derive(Debug, Clone, Copy, Default)]
pub struct SystemClock;

impl Clock for SystemClock {
    fn now(&self) -> DateTime<Utc> {
        Utc::now()
    }
}

/// Clock that only moves when told to
#[derive(Debug, Clone)]
pub struct ManualClock {
    now: Arc<Mutex<DateTime<Utc>>>,
}

impl ManualClock {
    pub fn new(start: DateTime<Utc>) -> Self {
        Self {
            now: Arc::new(Mutex::new(start)),
        }
    }

    /// Jump to an absolute time
    pub fn set(&self, at: DateTime<Utc>) {
        *self.now.lock() = at;
    }

    /// Move forward by `by`
    pub fn advance(&self, by: Duration) {
        let mut now = self.now.lock();
        *now += by;
    }
}

impl Clock for ManualClock {
    fn now(&self) -> DateTime<Utc> {
        *self.now.lock()
    }
}

/// Half-open validity interval `[valid_at, invalid_at)`
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct ValidityRange {
    /// When the fact became true
    pub valid_at: DateTime<Utc>,
    /// When the fact stopped being true (None if still valid)
    pub invalid_at: Option<DateTime<Utc>>,
}

impl ValidityRange {
    /// Open-ended range starting at `valid_at`
    pub fn open(valid_at: DateTime<Utc>) -> Self {
        Self {
            valid_at,
            invalid_at: None,
        }
    }

    /// Build a range, rejecting empty or inverted intervals
    pub fn new(valid_at: DateTime<Utc>, invalid_at: Option<DateTime<Utc>>) -> Result<Self> {
        let range = Self {
            valid_at,
            invalid_at,
        };
        range.validate()?;
        Ok(range)
    }

    /// `invalid_at`, when set, must be strictly after `valid_at`
    pub fn validate(&self) -> Result<()> {
        match self.invalid_at {
            Some(invalid_at) if invalid_at <= self.valid_at => {
                Err(MemoryError::invalid_range(self.valid_at, invalid_at))
            }
            _ => Ok(()),
        }
    }

    /// Check if the range is still open
    pub fn is_open(&self) -> bool {
        self.invalid_at.is_none()
    }

    /// Check if the fact was valid at a specific point in time
    pub fn contains(&self, time: DateTime<Utc>) -> bool {
        let valid_start = self.valid_at <= time;
        let valid_end = match self.invalid_at {
            None => true,
            Some(invalid_at) => invalid_at > time,
        };
        valid_start && valid_end
    }

    /// Check if two half-open ranges share any instant
    pub fn overlaps(&self, other: &ValidityRange) -> bool {
        let self_before_other_ends = other.invalid_at.map_or(true, |end| self.valid_at < end);
        let other_before_self_ends = self.invalid_at.map_or(true, |end| other.valid_at < end);
        self_before_other_ends && other_before_self_ends
    }

    /// Length of the range, measured up to `now` when still open
    pub fn duration(&self, now: DateTime<Utc>) -> Duration {
        let end = self.invalid_at.unwrap_or(now);
        end - self.valid_at
    }
}
