//! Wall-clock budget helpers for the coverage loop.

use std::time::{Duration, Instant};

use anyhow::{Result, anyhow};

/// Deadline for a run started at `now`, if a timeout is configured.
pub fn deadline_after(now: Instant, timeout: Option<Duration>) -> Option<Instant> {
    timeout.map(|timeout| now + timeout)
}

/// Return the remaining time budget until the provided deadline.
pub fn remaining_budget(deadline: Instant, now: Instant) -> Result<Duration> {
    let remaining = deadline
        .checked_duration_since(now)
        .unwrap_or(Duration::from_secs(0));
    if remaining.is_zero() {
        return Err(anyhow!("run deadline exceeded"));
    }
    Ok(remaining)
}

pub fn is_expired(deadline: Option<Instant>, now: Instant) -> bool {
    deadline.is_some_and(|deadline| remaining_budget(deadline, now).is_err())
}

/// Shrink a per-call timeout so it never outlives the run deadline.
pub fn cap_timeout(timeout: Duration, deadline: Option<Instant>, now: Instant) -> Duration {
    match deadline.and_then(|deadline| remaining_budget(deadline, now).ok()) {
        Some(remaining) => timeout.min(remaining),
        None => timeout,
    }
}
