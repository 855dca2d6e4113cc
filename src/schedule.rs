//! Schedules
//!
//! Activation window shared by promotions, coupons and combos.

use jiff::Timestamp;

/// When a construct may be used.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Schedule {
    /// Operator on/off switch.
    pub is_active: bool,

    /// Inclusive start of the window; `None` means "since forever".
    pub starts_at: Option<Timestamp>,

    /// Inclusive end of the window; `None` means "until switched off".
    pub ends_at: Option<Timestamp>,
}

impl Schedule {
    /// A schedule that is switched on with no date window.
    #[must_use]
    pub const fn always() -> Self {
        Self {
            is_active: true,
            starts_at: None,
            ends_at: None,
        }
    }

    /// A switched-on schedule bounded by both dates.
    #[must_use]
    pub const fn between(starts_at: Timestamp, ends_at: Timestamp) -> Self {
        Self {
            is_active: true,
            starts_at: Some(starts_at),
            ends_at: Some(ends_at),
        }
    }

    /// Return a copy of this schedule switched off.
    #[must_use]
    pub const fn deactivated(self) -> Self {
        Self {
            is_active: false,
            ..self
        }
    }

    /// Whether `now` falls inside the date window, ignoring the on/off switch.
    pub fn contains(&self, now: Timestamp) -> bool {
        self.starts_at.is_none_or(|start| start <= now) && self.ends_at.is_none_or(|end| now <= end)
    }

    /// Whether the construct is switched on and `now` is inside its window.
    pub fn is_live(&self, now: Timestamp) -> bool {
        self.is_active && self.contains(now)
    }
}

impl Default for Schedule {
    fn default() -> Self {
        Self::always()
    }
}
