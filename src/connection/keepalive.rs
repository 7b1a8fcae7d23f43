//! Keepalive deadline tracking.
//!
//! A client declaring a keepalive of `k` seconds is disconnected after
//! `1.5 * k` seconds without a decoded frame. A keepalive of zero disables
//! the deadline.

use std::{future, time::Duration};

use tokio::time::{Instant, sleep_until};

/// Grace period granted per declared keepalive second, in milliseconds.
const MILLIS_PER_KEEPALIVE_SECOND: u64 = 1500;

/// Inactivity period allowed for a declared keepalive, or `None` when the
/// client disabled keepalive.
#[must_use]
pub fn keepalive_period(seconds: u16) -> Option<Duration> {
    (seconds > 0).then(|| Duration::from_millis(u64::from(seconds) * MILLIS_PER_KEEPALIVE_SECOND))
}

#[derive(Clone, Copy, Debug)]
pub(crate) struct Keepalive {
    period: Option<Duration>,
    deadline: Option<Instant>,
}

impl Keepalive {
    pub(crate) fn new(seconds: u16) -> Self {
        let period = keepalive_period(seconds);
        Self {
            period,
            deadline: period.map(|p| Instant::now() + p),
        }
    }

    /// Push the deadline a full period past now.
    pub(crate) fn reset(&mut self) {
        if let Some(period) = self.period {
            self.deadline = Some(Instant::now() + period);
        }
    }

    pub(crate) fn deadline(&self) -> Option<Instant> { self.deadline }
}

/// Resolve at `deadline`, or never when there is none.
pub(crate) async fn expired(deadline: Option<Instant>) {
    match deadline {
        Some(at) => sleep_until(at).await,
        None => future::pending::<()>().await,
    }
}
