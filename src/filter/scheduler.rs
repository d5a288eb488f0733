//! Single-slot deferred call scheduler
//!
//! The engine owns no clock. It asks the filter to wake it after some number of
//! milliseconds, and may cancel that request early to learn how long it actually
//! waited. This module keeps that one outstanding request and measures time
//! against an injectable [`Clock`].

use std::time::{Duration, Instant};
use thiserror::Error;

/// Time source for deferred call accounting
pub trait Clock: Send {
    fn now(&self) -> Instant;
}

/// Wall clock backed by [`Instant::now`]
#[derive(Debug, Clone, Copy, Default)]
pub struct SystemClock;

impl Clock for SystemClock {
    fn now(&self) -> Instant {
        Instant::now()
    }
}

/// The outstanding deferred call
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct PendingTick {
    pub requested_ms: u32,
    pub armed_at: Instant,
}

impl PendingTick {
    pub fn deadline(&self) -> Instant {
        self.armed_at + Duration::from_millis(u64::from(self.requested_ms))
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Error)]
pub enum SchedulerError {
    #[error("deferred call already armed for {requested_ms} ms")]
    AlreadyArmed { requested_ms: u32 },
    #[error("no deferred call is armed")]
    NotArmed,
}

#[derive(Debug, Default)]
pub struct DeferredScheduler {
    pending: Option<PendingTick>,
}

impl DeferredScheduler {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn pending(&self) -> Option<&PendingTick> {
        self.pending.as_ref()
    }

    pub fn is_armed(&self) -> bool {
        self.pending.is_some()
    }

    pub fn deadline(&self) -> Option<Instant> {
        self.pending.map(|tick| tick.deadline())
    }

    /// Arm the single deferred call
    pub fn arm(&mut self, duration_ms: u32, now: Instant) -> Result<(), SchedulerError> {
        if let Some(existing) = self.pending {
            return Err(SchedulerError::AlreadyArmed {
                requested_ms: existing.requested_ms,
            });
        }

        self.pending = Some(PendingTick {
            requested_ms: duration_ms,
            armed_at: now,
        });
        Ok(())
    }

    /// Disarm and report the whole milliseconds elapsed since arming
    pub fn cancel(&mut self, now: Instant) -> Result<u32, SchedulerError> {
        let tick = self.pending.take().ok_or(SchedulerError::NotArmed)?;
        let elapsed = now.saturating_duration_since(tick.armed_at).as_millis();
        Ok(u32::try_from(elapsed).unwrap_or(u32::MAX))
    }

    /// Disarm if the deadline has passed, yielding the requested duration
    pub fn take_expired(&mut self, now: Instant) -> Option<u32> {
        let tick = self.pending?;
        if now < tick.deadline() {
            return None;
        }

        self.pending = None;
        Some(tick.requested_ms)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_arm_then_cancel_reports_elapsed() {
        let start = Instant::now();
        let mut scheduler = DeferredScheduler::new();

        scheduler.arm(1000, start).unwrap();
        let elapsed = scheduler.cancel(start + Duration::from_millis(350)).unwrap();

        assert_eq!(elapsed, 350);
        assert!(!scheduler.is_armed());
    }

    #[test]
    fn test_double_arm_rejected() {
        let start = Instant::now();
        let mut scheduler = DeferredScheduler::new();

        scheduler.arm(500, start).unwrap();
        let result = scheduler.arm(200, start);

        assert_eq!(result, Err(SchedulerError::AlreadyArmed { requested_ms: 500 }));
        // the original request is untouched
        assert_eq!(scheduler.pending().unwrap().requested_ms, 500);
    }

    #[test]
    fn test_cancel_without_arm_rejected() {
        let mut scheduler = DeferredScheduler::new();
        assert_eq!(
            scheduler.cancel(Instant::now()),
            Err(SchedulerError::NotArmed)
        );
    }

    #[test]
    fn test_expiry_yields_requested_duration() {
        let start = Instant::now();
        let mut scheduler = DeferredScheduler::new();
        scheduler.arm(100, start).unwrap();

        assert_eq!(scheduler.deadline(), Some(start + Duration::from_millis(100)));
        assert_eq!(scheduler.take_expired(start + Duration::from_millis(99)), None);
        assert!(scheduler.is_armed());

        assert_eq!(scheduler.take_expired(start + Duration::from_millis(130)), Some(100));
        assert!(!scheduler.is_armed());
        assert_eq!(scheduler.take_expired(start + Duration::from_millis(500)), None);
    }

    #[test]
    fn test_rearm_after_cancel() {
        let start = Instant::now();
        let mut scheduler = DeferredScheduler::new();

        scheduler.arm(100, start).unwrap();
        scheduler.cancel(start + Duration::from_millis(10)).unwrap();
        assert!(scheduler.arm(300, start + Duration::from_millis(10)).is_ok());
        assert_eq!(
            scheduler.deadline(),
            Some(start + Duration::from_millis(310))
        );
    }

    #[test]
    fn test_zero_duration_expires_immediately() {
        let start = Instant::now();
        let mut scheduler = DeferredScheduler::new();
        scheduler.arm(0, start).unwrap();
        assert_eq!(scheduler.take_expired(start), Some(0));
    }
}
