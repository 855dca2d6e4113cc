//! Promotions

use jiff::Timestamp;
use rusty_money::iso::Currency;
use smallvec::SmallVec;

use crate::{
    ids::{ConstructId, PromotionUuid},
    limits::UsageLimits,
    promotions::{actions::Action, conditions::Condition},
    schedule::Schedule,
};

pub mod actions;
pub mod conditions;

/// Promotion metadata
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct PromotionMeta {
    /// Promotion name
    pub name: String,

    /// Operator-facing promotion type (e.g. `flash_sale`).
    pub kind: String,
}

/// An automatically applied discount rule.
#[derive(Debug, Clone, PartialEq)]
pub struct Promotion<'a> {
    uuid: PromotionUuid,
    meta: PromotionMeta,
    conditions: SmallVec<[Condition<'a>; 2]>,
    actions: SmallVec<[Action<'a>; 2]>,
    schedule: Schedule,
    stackable: bool,
    priority: i32,
    limits: UsageLimits,
}

impl<'a> Promotion<'a> {
    /// Create a live, non-stackable promotion with priority 0 and no limits.
    pub fn new(
        uuid: PromotionUuid,
        conditions: impl IntoIterator<Item = Condition<'a>>,
        actions: impl IntoIterator<Item = Action<'a>>,
    ) -> Self {
        Self {
            uuid,
            meta: PromotionMeta::default(),
            conditions: conditions.into_iter().collect(),
            actions: actions.into_iter().collect(),
            schedule: Schedule::always(),
            stackable: false,
            priority: 0,
            limits: UsageLimits::unlimited(),
        }
    }

    /// Set the promotion metadata.
    #[must_use]
    pub fn with_meta(mut self, meta: PromotionMeta) -> Self {
        self.meta = meta;
        self
    }

    /// Set the activation schedule.
    #[must_use]
    pub fn with_schedule(mut self, schedule: Schedule) -> Self {
        self.schedule = schedule;
        self
    }

    /// Set whether the promotion combines with others.
    #[must_use]
    pub fn with_stackable(mut self, stackable: bool) -> Self {
        self.stackable = stackable;
        self
    }

    /// Set the priority; higher applies first.
    #[must_use]
    pub fn with_priority(mut self, priority: i32) -> Self {
        self.priority = priority;
        self
    }

    /// Set the usage limits.
    #[must_use]
    pub fn with_limits(mut self, limits: UsageLimits) -> Self {
        self.limits = limits;
        self
    }

    /// Return the promotion uuid
    pub fn uuid(&self) -> PromotionUuid {
        self.uuid
    }

    /// Return the promotion metadata
    pub fn meta(&self) -> &PromotionMeta {
        &self.meta
    }

    /// Return the conditions
    pub fn conditions(&self) -> &[Condition<'a>] {
        &self.conditions
    }

    /// Return the actions
    pub fn actions(&self) -> &[Action<'a>] {
        &self.actions
    }

    /// Return the schedule
    pub fn schedule(&self) -> &Schedule {
        &self.schedule
    }

    /// Whether this promotion combines with others
    pub fn is_stackable(&self) -> bool {
        self.stackable
    }

    /// Return the priority
    pub fn priority(&self) -> i32 {
        self.priority
    }

    /// Return the usage limits
    pub fn limits(&self) -> &UsageLimits {
        &self.limits
    }

    /// Start of the schedule, used to break priority ties.
    pub fn starts_at(&self) -> Option<Timestamp> {
        self.schedule.starts_at
    }

    /// The construct id used for usage tracking.
    pub fn construct_id(&self) -> ConstructId {
        ConstructId::Promotion(self.uuid)
    }

    /// Every currency referenced by the promotion's conditions and actions.
    pub fn currencies(&self) -> impl Iterator<Item = &Currency> {
        self.conditions
            .iter()
            .filter_map(Condition::currency)
            .chain(self.actions.iter().filter_map(Action::currency))
    }
}

#[cfg(test)]
mod tests {
    use rusty_money::{Money, iso::GBP};

    use super::*;

    #[test]
    fn builders_set_fields() {
        let uuid = PromotionUuid::now_v7();
        let promotion = Promotion::new(
            uuid,
            [Condition::MinQuantity(2)],
            [Action::FixedOff(Money::from_minor(500, GBP))],
        )
        .with_stackable(true)
        .with_priority(7)
        .with_limits(UsageLimits::with_usage_limit(100, 3))
        .with_meta(PromotionMeta {
            name: "Spring".to_string(),
            kind: "seasonal".to_string(),
        });

        assert_eq!(promotion.uuid(), uuid);
        assert!(promotion.is_stackable());
        assert_eq!(promotion.priority(), 7);
        assert_eq!(promotion.limits().usage_count, 3);
        assert_eq!(promotion.conditions().len(), 1);
        assert_eq!(promotion.actions().len(), 1);
        assert_eq!(promotion.meta().name, "Spring");
        assert!(promotion.starts_at().is_none());
    }
}
