//! Stacking
//!
//! Chooses which matched promotions apply and folds their actions over the remaining
//! subtotal.

use std::cmp::Ordering;

use jiff::Timestamp;
use rustc_hash::FxHashSet;
use tracing::debug;

use crate::{
    customers::CustomerHistory,
    ids::ConstructId,
    orders::OrderSnapshot,
    pricing::DiscountError,
    promotions::{
        Promotion,
        actions::{ActionBase, ActionOutcome, UnitRun},
        conditions::{all_match, line_is_eligible},
    },
};

/// Amounts still payable while discounts are folded in.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Remainder {
    /// Merchandise still payable, in minor units.
    pub merchandise: i64,

    /// Shipping still payable, in minor units.
    pub shipping: i64,
}

impl Remainder {
    /// Take an outcome off the remainder.
    pub fn apply(&mut self, outcome: ActionOutcome) {
        match outcome {
            ActionOutcome::Merchandise(amount) => self.merchandise -= amount,
            ActionOutcome::Shipping(amount) => self.shipping -= amount,
        }
    }
}

/// One discount produced while stacking.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct StackedDiscount {
    /// The promotion that produced it.
    pub construct: ConstructId,

    /// The effect.
    pub outcome: ActionOutcome,
}

/// The promotions chosen for an order, in application order.
#[derive(Debug, Clone, Default)]
pub struct Selection<'p, 'a> {
    /// The single non-stackable promotion, if any matched.
    pub exclusive: Option<&'p Promotion<'a>>,

    /// Stackable promotions, highest priority first.
    pub stackable: Vec<&'p Promotion<'a>>,
}

impl<'p, 'a> Selection<'p, 'a> {
    /// Promotions in the order they are applied.
    pub fn ordered(&self) -> impl Iterator<Item = &'p Promotion<'a>> + '_ {
        self.exclusive.into_iter().chain(self.stackable.iter().copied())
    }

    /// Whether nothing was selected.
    pub fn is_empty(&self) -> bool {
        self.exclusive.is_none() && self.stackable.is_empty()
    }
}

/// Application order: priority descending, then earliest start, then uuid.
pub fn precedence(a: &Promotion<'_>, b: &Promotion<'_>) -> Ordering {
    b.priority()
        .cmp(&a.priority())
        .then_with(|| a.starts_at().cmp(&b.starts_at()))
        .then_with(|| a.uuid().cmp(&b.uuid()))
}

/// Whether a promotion may be considered at all for this customer at `now`.
pub fn is_eligible(promotion: &Promotion<'_>, now: Timestamp, history: &CustomerHistory) -> bool {
    let construct = ConstructId::Promotion(promotion.uuid());

    promotion.schedule().is_live(now)
        && !promotion.limits().is_exhausted()
        && !promotion
            .limits()
            .is_exhausted_for(history.redemptions(&construct))
}

/// Evaluate `promotions` against the post-combo snapshot and choose the applied set.
///
/// Among matching non-stackable promotions only the one with the highest precedence is
/// kept.
pub fn select<'p, 'a>(
    promotions: impl IntoIterator<Item = &'p Promotion<'a>>,
    snapshot: &OrderSnapshot<'_, '_>,
    now: Timestamp,
    history: &CustomerHistory,
    excluded: &FxHashSet<ConstructId>,
) -> Selection<'p, 'a>
where
    'a: 'p,
{
    let (stackable, non_stackable): (Vec<&'p Promotion<'a>>, Vec<&'p Promotion<'a>>) = promotions
        .into_iter()
        .filter(|promotion| !excluded.contains(&ConstructId::Promotion(promotion.uuid())))
        .filter(|promotion| is_eligible(promotion, now, history))
        .filter(|promotion| all_match(promotion.conditions(), snapshot))
        .partition(|promotion| promotion.is_stackable());

    let exclusive = non_stackable
        .iter()
        .copied()
        .min_by(|a, b| precedence(a, b));

    if non_stackable.len() > 1 {
        debug!(
            matched = non_stackable.len(),
            chosen = ?exclusive.map(Promotion::uuid),
            "discarding lower-precedence non-stackable promotions"
        );
    }

    let mut stackable = stackable;
    stackable.sort_by(|a, b| precedence(a, b));

    Selection {
        exclusive,
        stackable,
    }
}

/// Runs of units a promotion's unit-level actions may discount, one per eligible line.
///
/// Units already consumed by combos are left out.
pub fn eligible_units(
    promotion: &Promotion<'_>,
    snapshot: &OrderSnapshot<'_, '_>,
    consumed: &[u32],
) -> Vec<UnitRun> {
    snapshot
        .lines()
        .enumerate()
        .filter(|(_, line)| line_is_eligible(promotion.conditions(), line))
        .filter_map(|(idx, line)| {
            let free = line
                .quantity()
                .saturating_sub(consumed.get(idx).copied().unwrap_or(0));

            (free > 0).then(|| UnitRun::new(line.unit_minor(), u64::from(free)))
        })
        .collect()
}

/// Apply the selected promotions in order, each against what the previous ones left.
///
/// Every action of a promotion runs against the running remainder, so a cap is measured
/// against that action's own base. Zero-value outcomes are dropped.
///
/// # Errors
///
/// Returns a [`DiscountError`] if an action cannot be computed.
pub fn apply_selection(
    selection: &Selection<'_, '_>,
    snapshot: &OrderSnapshot<'_, '_>,
    consumed: &[u32],
    remainder: &mut Remainder,
) -> Result<Vec<StackedDiscount>, DiscountError> {
    let mut discounts = Vec::new();

    for promotion in selection.ordered() {
        let construct = ConstructId::Promotion(promotion.uuid());

        let units = if promotion.actions().iter().any(|action| action.uses_units()) {
            eligible_units(promotion, snapshot, consumed)
        } else {
            Vec::new()
        };

        for action in promotion.actions() {
            let outcome = action.apply(&ActionBase {
                remaining: remainder.merchandise,
                shipping: remainder.shipping,
                units: &units,
            })?;

            if outcome.amount() <= 0 {
                continue;
            }

            remainder.apply(outcome);

            discounts.push(StackedDiscount {
                construct: construct.clone(),
                outcome,
            });
        }
    }

    Ok(discounts)
}
