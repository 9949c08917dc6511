//! Caller-supplied time bounds.

use crate::error::{PlacementError, Result};
use std::time::{Duration, Instant};

/// An optional point in time after which work must stop.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct Deadline(Option<Instant>);

impl Deadline {
    /// No bound.
    pub const fn none() -> Self {
        Self(None)
    }

    /// `timeout` from now.
    pub fn after(timeout: Duration) -> Self {
        Self(Instant::now().checked_add(timeout))
    }

    /// Bounded when a timeout is given.
    pub fn from_timeout(timeout: Option<Duration>) -> Self {
        timeout.map(Self::after).unwrap_or_default()
    }

    pub fn is_expired(&self) -> bool {
        self.0.is_some_and(|at| Instant::now() >= at)
    }

    /// Time left, `None` when unbounded.
    pub fn remaining(&self) -> Option<Duration> {
        self.0.map(|at| at.saturating_duration_since(Instant::now()))
    }

    /// Fail with `err` once expired.
    pub fn check_or(&self, err: PlacementError) -> Result<()> {
        if self.is_expired() {
            Err(err)
        } else {
            Ok(())
        }
    }

    /// Fail with `PlacementTimeout` once expired.
    pub fn check(&self) -> Result<()> {
        self.check_or(PlacementError::PlacementTimeout)
    }
}
