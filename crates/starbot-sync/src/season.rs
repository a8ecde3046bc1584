//! Seasonal on/off switch for the sync subsystem.

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;

use chrono::{DateTime, Datelike, Utc};

pub type Clock = Arc<dyn Fn() -> DateTime<Utc> + Send + Sync>;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SeasonTransition {
    /// Season started and the subsystem is not loaded yet.
    Enter,
    /// Season ended while the subsystem is still loaded.
    Leave,
    Unchanged,
}

/// Tracks whether the wall clock is inside the event month and whether the
/// sync subsystem is currently loaded.
pub struct SeasonGate {
    event_month: u32,
    clock: Clock,
    loaded: AtomicBool,
}

impl SeasonGate {
    pub fn new(event_month: u32) -> Self {
        Self::with_clock(event_month, Arc::new(Utc::now))
    }

    pub fn with_clock(event_month: u32, clock: Clock) -> Self {
        Self {
            event_month,
            clock,
            loaded: AtomicBool::new(false),
        }
    }

    pub fn now(&self) -> DateTime<Utc> {
        (self.clock)()
    }

    pub fn event_month(&self) -> u32 {
        self.event_month
    }

    pub fn is_active_at(&self, at: DateTime<Utc>) -> bool {
        at.month() == self.event_month
    }

    pub fn is_active(&self) -> bool {
        self.is_active_at(self.now())
    }

    pub fn is_loaded(&self) -> bool {
        self.loaded.load(Ordering::SeqCst)
    }

    pub fn mark_loaded(&self, loaded: bool) {
        self.loaded.store(loaded, Ordering::SeqCst);
    }

    /// What needs to happen to bring the subsystem in line with the date.
    pub fn transition(&self) -> SeasonTransition {
        match (self.is_active(), self.is_loaded()) {
            (true, false) => SeasonTransition::Enter,
            (false, true) => SeasonTransition::Leave,
            _ => SeasonTransition::Unchanged,
        }
    }
}

#[cfg(test)]
pub(crate) fn fixed_clock(at: DateTime<Utc>) -> Clock {
    Arc::new(move || at)
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::TimeZone;

    fn at(month: u32, day: u32) -> DateTime<Utc> {
        Utc.with_ymd_and_hms(2024, month, day, 0, 0, 0).single().unwrap()
    }

    #[test]
    fn active_only_in_event_month() {
        let gate = SeasonGate::with_clock(12, fixed_clock(at(12, 1)));
        assert!(gate.is_active());
        assert!(gate.is_active_at(at(12, 31)));
        assert!(!gate.is_active_at(at(11, 30)));
        assert!(!gate.is_active_at(at(1, 1)));
    }

    #[test]
    fn transitions_follow_loaded_state() {
        let december = SeasonGate::with_clock(12, fixed_clock(at(12, 1)));
        assert_eq!(december.transition(), SeasonTransition::Enter);
        december.mark_loaded(true);
        assert_eq!(december.transition(), SeasonTransition::Unchanged);

        let january = SeasonGate::with_clock(12, fixed_clock(at(1, 1)));
        assert_eq!(january.transition(), SeasonTransition::Unchanged);
        january.mark_loaded(true);
        assert_eq!(january.transition(), SeasonTransition::Leave);
    }
}
