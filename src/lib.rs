//! Tally
//!
//! Tally prices customer orders: it resolves product combos, stacks eligible promotions,
//! validates and applies a coupon, and records construct usage under per-construct limits.

pub mod catalog;
pub mod combos;
pub mod config;
pub mod coupons;
pub mod customers;
pub mod engine;
pub mod ids;
pub mod limits;
pub mod orders;
pub mod prelude;
pub mod pricing;
pub mod promotions;
pub mod receipt;
pub mod rules;
pub mod schedule;
pub mod stacking;
pub mod usage;
