//! Rules
//!
//! Loads rule store records into validated promotions, coupons and combos. Loading fails
//! open: an inconsistent record is logged and left out, the rest still load.

use std::{fs, path::Path};

use decimal_percentage::Percentage;
use rust_decimal::Decimal;
use rustc_hash::FxHashSet;
use rusty_money::{
    Money,
    iso::{self, Currency},
};
use serde::de::DeserializeOwned;
use thiserror::Error;
use tracing::{debug, warn};

use crate::{
    catalog::{Catalog, CatalogError},
    combos::{Combo, ComboError, ComboItem, ComboStatus, ComboType},
    coupons::{Coupon, CouponCode, CouponDiscount},
    ids::{ConstructId, OrderUuid, ProductUuid, VariantUuid},
    limits::UsageLimits,
    orders::{LineItem, Order, OrderError},
    pricing::minor_from_decimal,
    promotions::{
        Promotion, PromotionMeta,
        actions::{Action, BuyGet},
        conditions::{Condition, VariantSelector},
    },
    schedule::Schedule,
};

pub mod definitions;

pub use definitions::*;

/// A record that is internally inconsistent.
#[derive(Debug, Clone, Error, PartialEq, Eq)]
pub enum ConfigurationError {
    /// The record does not have the expected shape.
    #[error("malformed record: {0}")]
    Malformed(String),

    /// A product reference has no product id.
    #[error("product reference is missing its product id")]
    MissingProduct,

    /// `specific_variants` was chosen with no variants listed.
    #[error("specific variant selection lists no variants")]
    EmptyVariantSet,

    /// A quantity is zero or negative.
    #[error("quantity must be positive, got {0}")]
    NonPositiveQuantity(i64),

    /// A percentage is outside (0, 100].
    #[error("percentage must be in (0, 100], got {0}")]
    PercentageOutOfRange(Decimal),

    /// An amount is negative.
    #[error("amount must not be negative, got {0}")]
    NegativeAmount(Decimal),

    /// An amount cannot be expressed in minor units of the currency.
    #[error("amount {0} cannot be represented in the rule currency")]
    UnrepresentableAmount(Decimal),

    /// The stated saving disagrees with the prices.
    #[error("combo savings {stated} do not equal original price less combo price ({expected})")]
    SavingsMismatch {
        /// Saving in the record.
        stated: Decimal,

        /// Original price less combo price.
        expected: Decimal,
    },

    /// The combo is inconsistent.
    #[error(transparent)]
    Combo(#[from] ComboError),

    /// A promotion has nothing to do.
    #[error("promotion has no actions")]
    NoActions,

    /// The start date is after the end date.
    #[error("start date is after end date")]
    InvertedSchedule,

    /// A coupon code is blank.
    #[error("coupon code is empty")]
    EmptyCode,

    /// Two coupons share a code.
    #[error("duplicate coupon code {0}")]
    DuplicateCode(CouponCode),

    /// A record references something the catalog does not know.
    #[error(transparent)]
    UnknownCatalogReference(#[from] CatalogError),
}

/// A record left out of a [`RuleSet`].
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Rejection {
    /// Which record (`promotion:<id>`, `coupon:<code>`, `combo:<id>`).
    pub record: String,

    /// Why it was left out.
    pub error: ConfigurationError,
}

/// Errors loading a rules or order document.
#[derive(Debug, Error)]
pub enum RuleLoadError {
    /// IO error reading a file
    #[error("Failed to read {path}: {source}")]
    Io {
        /// File being read.
        path: String,

        /// Underlying error.
        source: std::io::Error,
    },

    /// JSON parsing error
    #[error("Failed to parse JSON: {0}")]
    Json(#[from] serde_json::Error),

    /// YAML parsing error
    #[error("Failed to parse YAML: {0}")]
    Yaml(#[from] serde_norway::Error),

    /// The file extension is not `.json`, `.yml` or `.yaml`
    #[error("Unsupported file format: {0}")]
    UnsupportedFormat(String),

    /// Unknown currency code
    #[error("Unknown currency code: {0}")]
    UnknownCurrency(String),

    /// An order amount cannot be represented
    #[error("Invalid order amount: {0}")]
    InvalidAmount(Decimal),

    /// The order is malformed
    #[error(transparent)]
    Order(#[from] OrderError),
}

/// Validated constructs for one currency.
#[derive(Debug, Clone, Default)]
pub struct RuleSet<'a> {
    promotions: Vec<Promotion<'a>>,
    coupons: Vec<Coupon<'a>>,
    combos: Vec<Combo<'a>>,
    rejections: Vec<Rejection>,
}

impl<'a> RuleSet<'a> {
    /// Convert definitions, leaving out and logging any that are inconsistent.
    pub fn from_definitions(definitions: RuleDefinitions, currency: &'a Currency) -> Self {
        let mut rules = Self::default();

        rules.absorb(definitions, currency);

        rules
    }

    /// Decode and convert each record of a document, leaving out and logging any that are
    /// malformed or inconsistent.
    pub fn from_document(document: RuleDocument, currency: &'a Currency) -> Self {
        let mut rules = Self::default();

        let definitions = RuleDefinitions {
            promotions: rules.decode(document.promotions, "promotion", "id"),
            coupons: rules.decode(document.coupons, "coupon", "code"),
            combos: rules.decode(document.combos, "combo", "id"),
        };

        rules.absorb(definitions, currency);

        rules
    }

    fn decode<T: DeserializeOwned>(
        &mut self,
        records: Vec<serde_json::Value>,
        kind: &str,
        key: &str,
    ) -> Vec<T> {
        let mut decoded = Vec::with_capacity(records.len());

        for (idx, record) in records.into_iter().enumerate() {
            let label = match record.get(key).and_then(serde_json::Value::as_str) {
                Some(id) => format!("{kind}:{}", id.trim()),
                None => format!("{kind}s[{idx}]"),
            };

            match serde_json::from_value(record) {
                Ok(definition) => decoded.push(definition),
                Err(err) => self.reject(label, ConfigurationError::Malformed(err.to_string())),
            }
        }

        decoded
    }

    fn absorb(&mut self, definitions: RuleDefinitions, currency: &'a Currency) {
        for definition in definitions.promotions {
            let record = format!("promotion:{}", definition.id);

            match promotion_from(definition, currency) {
                Ok(promotion) => self.promotions.push(promotion),
                Err(error) => self.reject(record, error),
            }
        }

        let mut codes = FxHashSet::default();

        for definition in definitions.coupons {
            let record = format!("coupon:{}", definition.code.trim());

            match coupon_from(definition, currency) {
                Ok(coupon) if !codes.insert(coupon.code().clone()) => {
                    self.reject(record, ConfigurationError::DuplicateCode(coupon.code().clone()));
                }
                Ok(coupon) => self.coupons.push(coupon),
                Err(error) => self.reject(record, error),
            }
        }

        for definition in definitions.combos {
            let record = format!("combo:{}", definition.id);

            match combo_from(definition, currency) {
                Ok(combo) => self.combos.push(combo),
                Err(error) => self.reject(record, error),
            }
        }

        debug!(
            promotions = self.promotions.len(),
            coupons = self.coupons.len(),
            combos = self.combos.len(),
            rejected = self.rejections.len(),
            "loaded rule set"
        );
    }

    /// Parse a JSON rules document.
    ///
    /// # Errors
    ///
    /// Returns a [`RuleLoadError`] if the document is not valid JSON or its top level does
    /// not hold record lists.
    pub fn from_json(contents: &str, currency: &'a Currency) -> Result<Self, RuleLoadError> {
        Ok(Self::from_document(
            serde_json::from_str(contents)?,
            currency,
        ))
    }

    /// Parse a YAML rules document.
    ///
    /// # Errors
    ///
    /// Returns a [`RuleLoadError`] if the document is not valid YAML or its top level does
    /// not hold record lists.
    pub fn from_yaml(contents: &str, currency: &'a Currency) -> Result<Self, RuleLoadError> {
        Ok(Self::from_document(
            serde_norway::from_str(contents)?,
            currency,
        ))
    }

    /// Load a rules file, choosing the parser by extension.
    ///
    /// # Errors
    ///
    /// Returns a [`RuleLoadError`] if the file cannot be read or parsed.
    pub fn load(path: &Path, currency: &'a Currency) -> Result<Self, RuleLoadError> {
        let contents = read(path)?;

        match Format::of(path)? {
            Format::Json => Self::from_json(&contents, currency),
            Format::Yaml => Self::from_yaml(&contents, currency),
        }
    }

    /// Leave out every construct that references something `catalog` does not know.
    pub fn validate_against(&mut self, catalog: &impl Catalog) {
        let mut rejected = Vec::new();

        self.promotions.retain(|promotion| {
            let check = promotion.conditions().iter().try_for_each(|condition| {
                match condition {
                    Condition::SpecificProduct { product, variants } => {
                        catalog.check_selector(*product, variants)
                    }
                    Condition::MinAmount(_) | Condition::MinQuantity(_) => Ok(()),
                }
            });

            keep(check, &promotion.construct_id(), &mut rejected)
        });

        self.combos.retain(|combo| {
            let check = combo
                .items()
                .iter()
                .try_for_each(|item| catalog.check_selector(item.product(), item.variants()));

            keep(check, &combo.construct_id(), &mut rejected)
        });

        for rejection in rejected {
            self.reject(rejection.record, rejection.error);
        }
    }

    /// Returns the promotions
    pub fn promotions(&self) -> &[Promotion<'a>] {
        &self.promotions
    }

    /// Returns the coupons
    pub fn coupons(&self) -> &[Coupon<'a>] {
        &self.coupons
    }

    /// Returns the combos
    pub fn combos(&self) -> &[Combo<'a>] {
        &self.combos
    }

    /// Records left out while loading.
    pub fn rejections(&self) -> &[Rejection] {
        &self.rejections
    }

    /// Find a coupon by customer-entered code.
    pub fn coupon(&self, raw: &str) -> Option<&Coupon<'a>> {
        let code = CouponCode::new(raw)?;

        self.coupons.iter().find(|coupon| *coupon.code() == code)
    }

    fn reject(&mut self, record: String, error: ConfigurationError) {
        warn!(%record, %error, "excluding misconfigured construct");

        self.rejections.push(Rejection { record, error });
    }
}

fn keep(
    check: Result<(), CatalogError>,
    construct: &ConstructId,
    rejected: &mut Vec<Rejection>,
) -> bool {
    match check {
        Ok(()) => true,
        Err(err) => {
            rejected.push(Rejection {
                record: construct.to_string(),
                error: err.into(),
            });

            false
        }
    }
}

enum Format {
    Json,
    Yaml,
}

impl Format {
    fn of(path: &Path) -> Result<Self, RuleLoadError> {
        match path.extension().and_then(|ext| ext.to_str()) {
            Some("json") => Ok(Self::Json),
            Some("yml" | "yaml") => Ok(Self::Yaml),
            _ => Err(RuleLoadError::UnsupportedFormat(path.display().to_string())),
        }
    }
}

fn read(path: &Path) -> Result<String, RuleLoadError> {
    fs::read_to_string(path).map_err(|source| RuleLoadError::Io {
        path: path.display().to_string(),
        source,
    })
}

/// Look up an ISO currency by code, case-insensitively.
///
/// # Errors
///
/// Returns [`RuleLoadError::UnknownCurrency`] for unknown codes.
pub fn currency_for(code: &str) -> Result<&'static Currency, RuleLoadError> {
    iso::find(&code.trim().to_uppercase())
        .ok_or_else(|| RuleLoadError::UnknownCurrency(code.to_string()))
}

/// Read an order document (JSON or YAML by extension).
///
/// # Errors
///
/// Returns a [`RuleLoadError`] if the file cannot be read or parsed.
pub fn load_order_definition(path: &Path) -> Result<OrderDefinition, RuleLoadError> {
    let contents = read(path)?;

    Ok(match Format::of(path)? {
        Format::Json => serde_json::from_str(&contents)?,
        Format::Yaml => serde_norway::from_str(&contents)?,
    })
}

impl OrderDefinition {
    /// Build an order in the definition's currency.
    ///
    /// # Errors
    ///
    /// Returns a [`RuleLoadError`] for unknown currencies, unrepresentable amounts, or a
    /// malformed order.
    pub fn into_order(self) -> Result<Order<'static>, RuleLoadError> {
        let currency = currency_for(&self.currency)?;

        let to_money = |amount: Decimal| {
            minor_from_decimal(amount, currency)
                .map(|minor| Money::from_minor(minor, currency))
                .ok_or(RuleLoadError::InvalidAmount(amount))
        };

        let items = self
            .items
            .into_iter()
            .map(|item| {
                let mut line =
                    LineItem::new(item.product_id, item.quantity, to_money(item.unit_price)?);

                if let Some(variant) = item.variant_id {
                    line = line.with_variant(variant);
                }

                if let Some(size) = item.size {
                    line = line.with_size(size);
                }

                Ok(line)
            })
            .collect::<Result<Vec<_>, RuleLoadError>>()?;

        Ok(Order::with_items(
            self.id.unwrap_or_else(OrderUuid::now_v7),
            self.customer_id,
            items,
            to_money(self.shipping_fee)?,
            currency,
        )?)
    }
}

fn schedule_from(
    is_active: bool,
    start_date: Option<jiff::Timestamp>,
    end_date: Option<jiff::Timestamp>,
) -> Result<Schedule, ConfigurationError> {
    if let (Some(start), Some(end)) = (start_date, end_date)
        && start > end
    {
        return Err(ConfigurationError::InvertedSchedule);
    }

    Ok(Schedule {
        is_active,
        starts_at: start_date,
        ends_at: end_date,
    })
}

fn amount_from(
    amount: Decimal,
    currency: &Currency,
) -> Result<Money<'_, Currency>, ConfigurationError> {
    if amount.is_sign_negative() && !amount.is_zero() {
        return Err(ConfigurationError::NegativeAmount(amount));
    }

    minor_from_decimal(amount, currency)
        .map(|minor| Money::from_minor(minor, currency))
        .ok_or(ConfigurationError::UnrepresentableAmount(amount))
}

fn percentage_from(points: Decimal) -> Result<Percentage, ConfigurationError> {
    if points <= Decimal::ZERO || points > Decimal::ONE_HUNDRED {
        return Err(ConfigurationError::PercentageOutOfRange(points));
    }

    Ok(Percentage::from(points / Decimal::ONE_HUNDRED))
}

fn quantity_from(quantity: i64) -> Result<u32, ConfigurationError> {
    u32::try_from(quantity)
        .ok()
        .filter(|quantity| *quantity > 0)
        .ok_or(ConfigurationError::NonPositiveQuantity(quantity))
}

fn selector_from(
    mode: VariantModeDefinition,
    variant_ids: Option<Vec<VariantUuid>>,
) -> Result<VariantSelector, ConfigurationError> {
    match mode {
        VariantModeDefinition::AllVariants => Ok(VariantSelector::AllVariants),
        VariantModeDefinition::SpecificVariants => {
            VariantSelector::specific(variant_ids.unwrap_or_default())
                .ok_or(ConfigurationError::EmptyVariantSet)
        }
    }
}

fn product_from(product_id: Option<ProductUuid>) -> Result<ProductUuid, ConfigurationError> {
    product_id.ok_or(ConfigurationError::MissingProduct)
}

fn condition_from(
    definition: ConditionDefinition,
    currency: &Currency,
) -> Result<Condition<'_>, ConfigurationError> {
    Ok(match definition {
        ConditionDefinition::MinAmount { value } => {
            Condition::MinAmount(amount_from(value, currency)?)
        }
        ConditionDefinition::MinQuantity { value } => Condition::MinQuantity(quantity_from(value)?),
        ConditionDefinition::SpecificProduct {
            product_id,
            variant_mode,
            variant_ids,
        } => Condition::SpecificProduct {
            product: product_from(product_id)?,
            variants: selector_from(variant_mode, variant_ids)?,
        },
    })
}

fn action_from(
    definition: ActionDefinition,
    currency: &Currency,
) -> Result<Action<'_>, ConfigurationError> {
    Ok(match definition {
        ActionDefinition::PercentageOff {
            value,
            max_discount,
        } => Action::PercentageOff {
            percent: percentage_from(value)?,
            cap: max_discount
                .map(|cap| amount_from(cap, currency))
                .transpose()?,
        },
        ActionDefinition::FixedOff { value } => Action::FixedOff(amount_from(value, currency)?),
        ActionDefinition::FreeShipping => Action::FreeShipping,
        ActionDefinition::Bogo {
            buy_quantity,
            get_quantity,
            get_discount,
        } => Action::Bogo(BuyGet::new(
            quantity_from(buy_quantity)?,
            quantity_from(get_quantity)?,
            percentage_from(get_discount)?,
        )),
    })
}

fn promotion_from(
    definition: PromotionDefinition,
    currency: &Currency,
) -> Result<Promotion<'_>, ConfigurationError> {
    if definition.actions.is_empty() {
        return Err(ConfigurationError::NoActions);
    }

    let conditions = definition
        .conditions
        .into_iter()
        .map(|condition| condition_from(condition, currency))
        .collect::<Result<Vec<_>, _>>()?;

    let actions = definition
        .actions
        .into_iter()
        .map(|action| action_from(action, currency))
        .collect::<Result<Vec<_>, _>>()?;

    Ok(Promotion::new(definition.id, conditions, actions)
        .with_meta(PromotionMeta {
            name: definition.name,
            kind: definition.kind,
        })
        .with_schedule(schedule_from(
            definition.is_active,
            definition.start_date,
            definition.end_date,
        )?)
        .with_stackable(definition.stackable)
        .with_priority(definition.priority)
        .with_limits(UsageLimits {
            usage_limit: definition.usage_limit,
            per_user_limit: definition.per_user_limit,
            usage_count: definition.usage_count,
        }))
}

fn coupon_from(
    definition: CouponDefinition,
    currency: &Currency,
) -> Result<Coupon<'_>, ConfigurationError> {
    let code = CouponCode::new(&definition.code).ok_or(ConfigurationError::EmptyCode)?;

    let discount = match definition.discount_type {
        CouponDiscountType::Percentage => CouponDiscount::Percentage {
            percent: percentage_from(definition.discount_value)?,
            cap: definition
                .max_discount
                .map(|cap| amount_from(cap, currency))
                .transpose()?,
        },
        CouponDiscountType::Fixed => {
            CouponDiscount::Fixed(amount_from(definition.discount_value, currency)?)
        }
        CouponDiscountType::FreeShipping => CouponDiscount::FreeShipping,
    };

    let mut coupon = Coupon::new(code, discount)
        .with_limits(UsageLimits {
            usage_limit: definition.usage_limit,
            per_user_limit: definition.per_user_limit,
            usage_count: definition.usage_count,
        })
        .with_first_order_only(definition.first_order_only)
        .with_exclusive(definition.exclusive)
        .with_schedule(schedule_from(
            definition.is_active,
            definition.start_date,
            definition.end_date,
        )?);

    if !definition.min_order_amount.is_zero() {
        coupon = coupon.with_min_order(amount_from(definition.min_order_amount, currency)?);
    }

    Ok(coupon)
}

fn combo_from(
    definition: ComboDefinition,
    currency: &Currency,
) -> Result<Combo<'_>, ConfigurationError> {
    let original_price = amount_from(definition.original_price, currency)?;
    let combo_price = amount_from(definition.combo_price, currency)?;

    if let Some(stated) = definition.savings {
        let expected = definition.original_price - definition.combo_price;

        if stated != expected {
            return Err(ConfigurationError::SavingsMismatch { stated, expected });
        }
    }

    let items = definition
        .items
        .into_iter()
        .map(|item| {
            let selector = match (item.variant_mode, item.variant_id) {
                (VariantModeDefinition::AllVariants, Some(variant)) => {
                    VariantSelector::specific([variant]).ok_or(ConfigurationError::EmptyVariantSet)?
                }
                (mode, _) => selector_from(mode, item.variant_ids)?,
            };

            Ok(ComboItem::new(product_from(item.product_id)?, quantity_from(item.quantity)?)
                .with_variants(selector))
        })
        .collect::<Result<Vec<_>, ConfigurationError>>()?;

    let kind = match definition.kind {
        ComboTypeDefinition::Bundle => ComboType::Bundle,
        ComboTypeDefinition::Bogo => ComboType::Bogo,
        ComboTypeDefinition::MultiBuy => ComboType::MultiBuy,
    };

    let status = match definition.status {
        ComboStatusDefinition::Active => ComboStatus::Active,
        ComboStatusDefinition::Inactive => ComboStatus::Inactive,
        ComboStatusDefinition::Archived => ComboStatus::Archived,
    };

    Ok(
        Combo::new(definition.id, kind, items, original_price, combo_price)?
            .with_name(definition.name)
            .with_status(status)
            .with_schedule(schedule_from(true, definition.start_date, definition.end_date)?),
    )
}
