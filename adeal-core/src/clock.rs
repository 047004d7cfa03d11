//! Time source injected into every worker.

use time::PrimitiveDateTime;

pub trait Clock: Send + Sync {
    /// Current UTC time without offset, matching the `TIMESTAMP` columns.
    fn now(&self) -> PrimitiveDateTime;
}

#[derive(Debug, Clone, Copy, Default)]
pub struct SystemClock;

impl Clock for SystemClock {
    fn now(&self) -> PrimitiveDateTime {
        let now = time::OffsetDateTime::now_utc();
        PrimitiveDateTime::new(now.date(), now.time())
    }
}

#[cfg(test)]
pub use manual::ManualClock;
