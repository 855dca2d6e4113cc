//! Typed Uuids

use std::{
    cmp::Ordering,
    fmt::{Debug, Display, Formatter, Result as FmtResult},
    hash::{Hash, Hasher},
    marker::PhantomData,
    str::FromStr,
};

use serde::{Deserialize, Deserializer, Serialize, Serializer};
use uuid::Uuid;

use crate::coupons::CouponCode;

/// A [`Uuid`] tagged with the kind of record it identifies.
pub struct TypedUuid<T>(Uuid, PhantomData<T>);

impl<T> TypedUuid<T> {
    /// Wrap an untyped uuid.
    pub const fn from_uuid(uuid: Uuid) -> Self {
        Self(uuid, PhantomData)
    }

    /// Generate a new time-ordered uuid.
    #[must_use]
    pub fn now_v7() -> Self {
        Self::from_uuid(Uuid::now_v7())
    }

    /// Return the untyped uuid.
    #[must_use]
    pub const fn into_uuid(self) -> Uuid {
        self.0
    }
}

impl<T> Clone for TypedUuid<T> {
    fn clone(&self) -> Self {
        *self
    }
}

impl<T> Copy for TypedUuid<T> {}

impl<T> Debug for TypedUuid<T> {
    fn fmt(&self, f: &mut Formatter<'_>) -> FmtResult {
        Debug::fmt(&self.0, f)
    }
}

impl<T> Display for TypedUuid<T> {
    fn fmt(&self, f: &mut Formatter<'_>) -> FmtResult {
        Display::fmt(&self.0, f)
    }
}

impl<T> PartialEq for TypedUuid<T> {
    fn eq(&self, other: &Self) -> bool {
        self.0 == other.0
    }
}

impl<T> Eq for TypedUuid<T> {}

impl<T> Hash for TypedUuid<T> {
    fn hash<H: Hasher>(&self, state: &mut H) {
        self.0.hash(state);
    }
}

impl<T> PartialOrd for TypedUuid<T> {
    fn partial_cmp(&self, other: &Self) -> Option<Ordering> {
        Some(self.cmp(other))
    }
}

impl<T> Ord for TypedUuid<T> {
    fn cmp(&self, other: &Self) -> Ordering {
        self.0.cmp(&other.0)
    }
}

impl<T> From<Uuid> for TypedUuid<T> {
    fn from(value: Uuid) -> Self {
        Self::from_uuid(value)
    }
}

impl<T> From<TypedUuid<T>> for Uuid {
    fn from(value: TypedUuid<T>) -> Self {
        value.into_uuid()
    }
}

impl<T> FromStr for TypedUuid<T> {
    type Err = uuid::Error;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Uuid::parse_str(s).map(Self::from_uuid)
    }
}

impl<T> Serialize for TypedUuid<T> {
    fn serialize<S: Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        self.0.serialize(serializer)
    }
}

impl<'de, T> Deserialize<'de> for TypedUuid<T> {
    fn deserialize<D: Deserializer<'de>>(deserializer: D) -> Result<Self, D::Error> {
        Uuid::deserialize(deserializer).map(Self::from_uuid)
    }
}

/// Marker for product uuids.
#[derive(Debug)]
pub enum Product {}

/// Marker for product variant uuids.
#[derive(Debug)]
pub enum Variant {}

/// Marker for promotion uuids.
#[derive(Debug)]
pub enum Promotion {}

/// Marker for combo uuids.
#[derive(Debug)]
pub enum Combo {}

/// Marker for customer uuids.
#[derive(Debug)]
pub enum Customer {}

/// Marker for order uuids.
#[derive(Debug)]
pub enum Order {}

/// Product Uuid
pub type ProductUuid = TypedUuid<Product>;

/// Variant Uuid
pub type VariantUuid = TypedUuid<Variant>;

/// Promotion Uuid
pub type PromotionUuid = TypedUuid<Promotion>;

/// Combo Uuid
pub type ComboUuid = TypedUuid<Combo>;

/// Customer Uuid
pub type CustomerUuid = TypedUuid<Customer>;

/// Order Uuid
pub type OrderUuid = TypedUuid<Order>;

/// Identifies any promotional construct that can appear on a priced order.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub enum ConstructId {
    /// An automatic promotion.
    Promotion(PromotionUuid),

    /// A customer-entered coupon.
    Coupon(CouponCode),

    /// A product combo.
    Combo(ComboUuid),
}

impl Display for ConstructId {
    fn fmt(&self, f: &mut Formatter<'_>) -> FmtResult {
        match self {
            Self::Promotion(uuid) => write!(f, "promotion:{uuid}"),
            Self::Coupon(code) => write!(f, "coupon:{code}"),
            Self::Combo(uuid) => write!(f, "combo:{uuid}"),
        }
    }
}
