//! Catalog
//!
//! Product, variant and size lookups used to validate orders and rule references.

use rustc_hash::{FxHashMap, FxHashSet};
use smallvec::SmallVec;
use thiserror::Error;

use crate::{
    ids::{ProductUuid, VariantUuid},
    orders::Order,
    promotions::conditions::VariantSelector,
};

/// Catalog lookup failures.
#[derive(Debug, Clone, Error, PartialEq, Eq)]
pub enum CatalogError {
    /// The product is not in the catalog.
    #[error("unknown product {0}")]
    UnknownProduct(ProductUuid),

    /// The variant does not belong to the product.
    #[error("product {product} has no variant {variant}")]
    UnknownVariant {
        /// Product looked up.
        product: ProductUuid,

        /// Variant that was not found.
        variant: VariantUuid,
    },

    /// The size is not offered for the product.
    #[error("product {product} has no size {size:?}")]
    UnknownSize {
        /// Product looked up.
        product: ProductUuid,

        /// Size that was not found.
        size: String,
    },
}

/// What the catalog knows about one product.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CatalogEntry {
    product: ProductUuid,
    variants: FxHashSet<VariantUuid>,
    sizes: SmallVec<[String; 6]>,
}

impl CatalogEntry {
    /// Create an entry with no variants or sizes.
    pub fn new(product: ProductUuid) -> Self {
        Self {
            product,
            variants: FxHashSet::default(),
            sizes: SmallVec::new(),
        }
    }

    /// Set the product's variants.
    #[must_use]
    pub fn with_variants(mut self, variants: impl IntoIterator<Item = VariantUuid>) -> Self {
        self.variants = variants.into_iter().collect();
        self
    }

    /// Set the product's sizes.
    #[must_use]
    pub fn with_sizes<S: Into<String>>(mut self, sizes: impl IntoIterator<Item = S>) -> Self {
        self.sizes = sizes.into_iter().map(Into::into).collect();
        self
    }

    /// Returns the product
    pub fn product(&self) -> ProductUuid {
        self.product
    }

    /// Whether the product has this variant.
    pub fn has_variant(&self, variant: VariantUuid) -> bool {
        self.variants.contains(&variant)
    }

    /// Whether the product is offered in this size. Products without sizes accept none.
    pub fn has_size(&self, size: &str) -> bool {
        self.sizes.iter().any(|candidate| candidate == size)
    }
}

/// Read-only product lookup.
pub trait Catalog {
    /// Find a product.
    fn entry(&self, product: ProductUuid) -> Option<&CatalogEntry>;

    /// Check that a product exists and, if given, that it has the variant and size.
    ///
    /// # Errors
    ///
    /// Returns a [`CatalogError`] naming the first reference that does not resolve.
    fn check(
        &self,
        product: ProductUuid,
        variant: Option<VariantUuid>,
        size: Option<&str>,
    ) -> Result<(), CatalogError> {
        let entry = self
            .entry(product)
            .ok_or(CatalogError::UnknownProduct(product))?;

        if let Some(variant) = variant
            && !entry.has_variant(variant)
        {
            return Err(CatalogError::UnknownVariant { product, variant });
        }

        if let Some(size) = size
            && !entry.has_size(size)
        {
            return Err(CatalogError::UnknownSize {
                product,
                size: size.to_string(),
            });
        }

        Ok(())
    }

    /// Check a rule's product reference and any variants it names.
    ///
    /// # Errors
    ///
    /// Returns a [`CatalogError`] naming the first reference that does not resolve.
    fn check_selector(
        &self,
        product: ProductUuid,
        selector: &VariantSelector,
    ) -> Result<(), CatalogError> {
        match selector {
            VariantSelector::AllVariants => self.check(product, None, None),
            VariantSelector::SpecificVariants(variants) => {
                let mut variants: Vec<_> = variants.iter().copied().collect();
                variants.sort();

                variants
                    .into_iter()
                    .try_for_each(|variant| self.check(product, Some(variant), None))
            }
        }
    }

    /// Check every line of an order.
    ///
    /// # Errors
    ///
    /// Returns a [`CatalogError`] for the first line that does not resolve.
    fn validate_order(&self, order: &Order<'_>) -> Result<(), CatalogError> {
        order
            .iter()
            .try_for_each(|line| self.check(line.product(), line.variant(), line.size()))
    }
}

/// An in-memory catalog.
#[derive(Debug, Clone, Default)]
pub struct CatalogSnapshot {
    entries: FxHashMap<ProductUuid, CatalogEntry>,
}

impl CatalogSnapshot {
    /// Build a snapshot from entries; later entries replace earlier ones for the same product.
    pub fn new(entries: impl IntoIterator<Item = CatalogEntry>) -> Self {
        Self {
            entries: entries
                .into_iter()
                .map(|entry| (entry.product, entry))
                .collect(),
        }
    }

    /// Number of products.
    pub fn len(&self) -> usize {
        self.entries.len()
    }

    /// Whether the catalog is empty.
    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }
}

impl Catalog for CatalogSnapshot {
    fn entry(&self, product: ProductUuid) -> Option<&CatalogEntry> {
        self.entries.get(&product)
    }
}
