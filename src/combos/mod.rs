//! Combos
//!
//! Fixed groups of products sold together for less than their separate prices.

use jiff::Timestamp;
use rusty_money::{Money, iso::Currency};
use smallvec::SmallVec;
use thiserror::Error;

use crate::{
    ids::{ComboUuid, ConstructId, ProductUuid},
    orders::LineItem,
    promotions::conditions::VariantSelector,
    schedule::Schedule,
};

pub mod resolver;

pub use resolver::{ComboAllocation, ComboMatch, ComboResolution, resolve};

/// Errors constructing a combo.
#[derive(Debug, Clone, Error, PartialEq, Eq)]
pub enum ComboError {
    /// A combo must contain at least one item.
    #[error("combo has no items")]
    NoItems,

    /// An item asks for zero units (item index).
    #[error("combo item {0} has a quantity of zero")]
    ZeroQuantity(usize),

    /// The combo price is above the original price (minor units).
    #[error("combo price {combo_price} exceeds original price {original_price}")]
    PriceExceedsOriginal {
        /// Combo price in minor units.
        combo_price: i64,

        /// Original price in minor units.
        original_price: i64,
    },

    /// A price is negative.
    #[error("combo prices must not be negative")]
    NegativePrice,

    /// Original and combo prices use different currencies.
    #[error("combo prices use different currencies: {0} and {1}")]
    CurrencyMismatch(&'static str, &'static str),

    /// A buy-get combo needs something to buy and something to get.
    #[error("buy-get combos need at least two items")]
    BogoNeedsTwoItems,
}

/// How a matched combo is priced.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ComboType {
    /// The group is sold at the combo price.
    Bundle,

    /// Buy the leading items, get the last item's units free.
    Bogo,

    /// Several units sold at the combo price.
    MultiBuy,
}

/// Lifecycle state set by operators.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub enum ComboStatus {
    /// Available for matching.
    #[default]
    Active,

    /// Temporarily switched off.
    Inactive,

    /// Retired.
    Archived,
}

/// One slot of a combo.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ComboItem {
    product: ProductUuid,
    variants: VariantSelector,
    quantity: u32,
}

impl ComboItem {
    /// Create an item accepting any variant of `product`.
    pub fn new(product: ProductUuid, quantity: u32) -> Self {
        Self {
            product,
            variants: VariantSelector::AllVariants,
            quantity,
        }
    }

    /// Restrict the item to some variants.
    #[must_use]
    pub fn with_variants(mut self, variants: VariantSelector) -> Self {
        self.variants = variants;
        self
    }

    /// Returns the product
    pub fn product(&self) -> ProductUuid {
        self.product
    }

    /// Returns the variant selector
    pub fn variants(&self) -> &VariantSelector {
        &self.variants
    }

    /// Returns the number of units required
    pub fn quantity(&self) -> u32 {
        self.quantity
    }

    /// Whether an order line can supply units for this item.
    pub fn accepts(&self, line: &LineItem<'_>) -> bool {
        line.product() == self.product && self.variants.matches(line.variant())
    }
}

/// A product combo.
#[derive(Debug, Clone, PartialEq)]
pub struct Combo<'a> {
    uuid: ComboUuid,
    name: String,
    kind: ComboType,
    items: SmallVec<[ComboItem; 4]>,
    original_price: Money<'a, Currency>,
    combo_price: Money<'a, Currency>,
    status: ComboStatus,
    schedule: Schedule,
}

impl<'a> Combo<'a> {
    /// Create an active combo with no date window.
    ///
    /// # Errors
    ///
    /// Returns a [`ComboError`] if the items or prices are inconsistent.
    pub fn new(
        uuid: ComboUuid,
        kind: ComboType,
        items: impl IntoIterator<Item = ComboItem>,
        original_price: Money<'a, Currency>,
        combo_price: Money<'a, Currency>,
    ) -> Result<Self, ComboError> {
        let items: SmallVec<[ComboItem; 4]> = items.into_iter().collect();

        if items.is_empty() {
            return Err(ComboError::NoItems);
        }

        if let Some(idx) = items.iter().position(|item| item.quantity == 0) {
            return Err(ComboError::ZeroQuantity(idx));
        }

        if kind == ComboType::Bogo && items.len() < 2 {
            return Err(ComboError::BogoNeedsTwoItems);
        }

        if original_price.currency() != combo_price.currency() {
            return Err(ComboError::CurrencyMismatch(
                original_price.currency().iso_alpha_code,
                combo_price.currency().iso_alpha_code,
            ));
        }

        let original = original_price.to_minor_units();
        let combo = combo_price.to_minor_units();

        if original < 0 || combo < 0 {
            return Err(ComboError::NegativePrice);
        }

        if combo > original {
            return Err(ComboError::PriceExceedsOriginal {
                combo_price: combo,
                original_price: original,
            });
        }

        Ok(Self {
            uuid,
            name: String::new(),
            kind,
            items,
            original_price,
            combo_price,
            status: ComboStatus::Active,
            schedule: Schedule::always(),
        })
    }

    /// Set the display name.
    #[must_use]
    pub fn with_name(mut self, name: impl Into<String>) -> Self {
        self.name = name.into();
        self
    }

    /// Set the lifecycle status.
    #[must_use]
    pub fn with_status(mut self, status: ComboStatus) -> Self {
        self.status = status;
        self
    }

    /// Set the date window.
    #[must_use]
    pub fn with_schedule(mut self, schedule: Schedule) -> Self {
        self.schedule = schedule;
        self
    }

    /// Returns the combo uuid
    pub fn uuid(&self) -> ComboUuid {
        self.uuid
    }

    /// Returns the display name
    pub fn name(&self) -> &str {
        &self.name
    }

    /// Returns the combo type
    pub fn kind(&self) -> ComboType {
        self.kind
    }

    /// Returns the items
    pub fn items(&self) -> &[ComboItem] {
        &self.items
    }

    /// Returns the original price
    pub fn original_price(&self) -> Money<'a, Currency> {
        self.original_price
    }

    /// Returns the combo price
    pub fn combo_price(&self) -> Money<'a, Currency> {
        self.combo_price
    }

    /// Advertised saving: original price less combo price.
    pub fn savings(&self) -> Money<'a, Currency> {
        Money::from_minor(
            self.original_price.to_minor_units() - self.combo_price.to_minor_units(),
            self.original_price.currency(),
        )
    }

    /// Returns the status
    pub fn status(&self) -> ComboStatus {
        self.status
    }

    /// Currency of the combo's prices.
    pub fn currency(&self) -> &'a Currency {
        self.combo_price.currency()
    }

    /// The construct id used in discount lines.
    pub fn construct_id(&self) -> ConstructId {
        ConstructId::Combo(self.uuid)
    }

    /// Whether the combo is active and `now` is inside its window.
    pub fn is_live(&self, now: Timestamp) -> bool {
        self.status == ComboStatus::Active && self.schedule.is_live(now)
    }

    /// Units bought and units free for a buy-get combo.
    ///
    /// The last item is the free one; every other item must be bought.
    pub fn buy_get_units(&self) -> (u32, u32) {
        let Some((last, rest)) = self.items.split_last() else {
            return (0, 0);
        };

        let buy = rest
            .iter()
            .fold(0_u32, |acc, item| acc.saturating_add(item.quantity));

        (buy, last.quantity)
    }
}
