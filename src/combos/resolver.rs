//! Combo Resolver
//!
//! Greedy, exact matching of combos against order lines.

use jiff::Timestamp;
use smallvec::SmallVec;
use tracing::debug;

use crate::{
    combos::{Combo, ComboType},
    config::ComboRepetition,
    ids::ComboUuid,
    orders::Order,
    pricing::{DiscountError, distribute_proportionally, line_total_minor},
    promotions::actions::{BuyGet, UnitRun},
};

/// Units taken from one order line by a combo match.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ComboAllocation {
    /// Index of the order line.
    pub line: usize,

    /// Units consumed from the line.
    pub units: u32,

    /// Share of the match's saving attributed to this allocation, in minor units.
    pub savings: i64,
}

/// One application of a combo.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ComboMatch {
    /// The matched combo.
    pub combo: ComboUuid,

    /// How the combo is priced.
    pub kind: ComboType,

    /// Lines the match consumed units from.
    pub allocations: SmallVec<[ComboAllocation; 4]>,

    /// Standard price of the consumed units, in minor units.
    pub standard_minor: i64,

    /// Saving against the standard price, in minor units.
    pub savings_minor: i64,
}

/// Result of matching every combo against an order.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ComboResolution {
    /// Matches in the order they were found.
    pub matches: Vec<ComboMatch>,

    /// Units consumed per order line.
    pub consumed: Vec<u32>,

    /// Combo savings attributed to each order line.
    pub line_savings: Vec<i64>,

    /// Merchandise subtotal after combo pricing.
    pub subtotal_minor: i64,
}

impl ComboResolution {
    /// A resolution with no matches.
    pub fn empty(order: &Order<'_>) -> Self {
        Self {
            matches: Vec::new(),
            consumed: vec![0; order.items().len()],
            line_savings: vec![0; order.items().len()],
            subtotal_minor: order.subtotal_minor(),
        }
    }

    /// Total combo savings in minor units.
    pub fn savings_minor(&self) -> i64 {
        self.matches.iter().map(|m| m.savings_minor).sum()
    }

    /// Units on line `idx` not consumed by any combo.
    pub fn free_units(&self, order: &Order<'_>, idx: usize) -> u32 {
        let quantity = order.items().get(idx).map_or(0, |line| line.quantity());
        let consumed = self.consumed.get(idx).copied().unwrap_or(0);

        quantity.saturating_sub(consumed)
    }
}

/// Match `combos` against `order` in the order given.
///
/// Combos that are not live at `now` are ignored. Each match consumes line units so later
/// matches cannot reuse them, and a match that would not lower the price is skipped.
///
/// # Errors
///
/// Returns a [`DiscountError`] if monetary arithmetic overflows.
pub fn resolve(
    order: &Order<'_>,
    combos: &[&Combo<'_>],
    now: Timestamp,
    repetition: ComboRepetition,
) -> Result<ComboResolution, DiscountError> {
    let mut resolution = ComboResolution::empty(order);
    let mut available: Vec<u32> = order.items().iter().map(|line| line.quantity()).collect();

    for combo in combos.iter().filter(|combo| combo.is_live(now)) {
        while let Some(allocations) = allocate(order, combo, &available) {
            let Some(matched) = price_match(order, combo, allocations)? else {
                debug!(combo = %combo.uuid(), "combo match does not lower the price; skipping");
                break;
            };

            for allocation in &matched.allocations {
                if let Some(units) = available.get_mut(allocation.line) {
                    *units -= allocation.units;
                }

                if let Some(consumed) = resolution.consumed.get_mut(allocation.line) {
                    *consumed += allocation.units;
                }

                if let Some(savings) = resolution.line_savings.get_mut(allocation.line) {
                    *savings += allocation.savings;
                }
            }

            resolution.subtotal_minor -= matched.savings_minor;
            resolution.matches.push(matched);

            if repetition == ComboRepetition::Once {
                break;
            }
        }
    }

    Ok(resolution)
}

/// Find lines to satisfy every item of `combo` from `available`, or `None` if any item
/// falls short.
///
/// Items restricted to specific variants are filled first so broader items cannot take
/// the units they need.
fn allocate(
    order: &Order<'_>,
    combo: &Combo<'_>,
    available: &[u32],
) -> Option<SmallVec<[ComboAllocation; 4]>> {
    let mut remaining = available.to_vec();
    let mut allocations: SmallVec<[ComboAllocation; 4]> = SmallVec::new();

    let mut items: SmallVec<[_; 4]> = combo.items().iter().collect();
    items.sort_by_key(|item| !item.variants().is_specific());

    for item in items {
        let mut needed = item.quantity();

        for (idx, line) in order.items().iter().enumerate() {
            if needed == 0 {
                break;
            }

            if !item.accepts(line) {
                continue;
            }

            let Some(free) = remaining.get_mut(idx) else {
                continue;
            };

            let take = needed.min(*free);

            if take == 0 {
                continue;
            }

            *free -= take;
            needed -= take;

            match allocations.iter_mut().find(|a| a.line == idx) {
                Some(existing) => existing.units += take,
                None => allocations.push(ComboAllocation {
                    line: idx,
                    units: take,
                    savings: 0,
                }),
            }
        }

        if needed > 0 {
            return None;
        }
    }

    allocations.sort_by_key(|a| a.line);

    Some(allocations)
}

/// Price a candidate match and attribute its saving to the consumed lines.
///
/// Returns `None` when the combo would not save anything.
fn price_match(
    order: &Order<'_>,
    combo: &Combo<'_>,
    mut allocations: SmallVec<[ComboAllocation; 4]>,
) -> Result<Option<ComboMatch>, DiscountError> {
    let weights = allocations
        .iter()
        .map(|allocation| {
            let unit = order
                .items()
                .get(allocation.line)
                .map_or(0, |line| line.unit_minor());

            line_total_minor(unit, allocation.units)
        })
        .collect::<Result<Vec<_>, _>>()?;

    let standard_minor = weights
        .iter()
        .try_fold(0_i64, |acc, weight| acc.checked_add(*weight))
        .ok_or(DiscountError::Overflow)?;

    let savings_minor = match combo.kind() {
        ComboType::Bundle | ComboType::MultiBuy => {
            standard_minor - combo.combo_price().to_minor_units()
        }
        ComboType::Bogo => {
            let (buy, get) = combo.buy_get_units();
            let units = unit_runs(order, &allocations);

            BuyGet::free(buy, get).discount_minor(&units)?
        }
    };

    if savings_minor <= 0 {
        return Ok(None);
    }

    let shares = distribute_proportionally(savings_minor, &weights)?;

    for (allocation, share) in allocations.iter_mut().zip(shares) {
        allocation.savings = share;
    }

    Ok(Some(ComboMatch {
        combo: combo.uuid(),
        kind: combo.kind(),
        allocations,
        standard_minor,
        savings_minor,
    }))
}

fn unit_runs(order: &Order<'_>, allocations: &[ComboAllocation]) -> Vec<UnitRun> {
    allocations
        .iter()
        .map(|allocation| {
            let unit = order
                .items()
                .get(allocation.line)
                .map_or(0, |line| line.unit_minor());

            UnitRun::new(unit, u64::from(allocation.units))
        })
        .collect()
}
