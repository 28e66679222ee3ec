//! Product Aggregate
//!
//! Stock lives on the variant (one count per colour/size). Products without
//! variants fall back to the legacy flat `stock` field.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;
use crate::domain::value_objects::{Money, Quantity};

#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct Product {
    pub(crate) id: Uuid,
    pub(crate) name: String,
    pub(crate) price: Money,
    pub(crate) status: ProductStatus,
    pub(crate) category_id: Option<Uuid>,
    pub(crate) stock: Quantity,
    pub(crate) variants: Vec<Variant>,
    pub(crate) created_at: DateTime<Utc>,
    pub(crate) updated_at: DateTime<Utc>,
}

#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)] pub struct Variant { pub color: String, pub sizes: Vec<SizeStock> }
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)] pub struct SizeStock { pub size: String, pub stock: Quantity }

#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ProductStatus { #[default] Draft, Active, Inactive }

impl ProductStatus {
    pub fn as_str(&self) -> &'static str {
        match self { Self::Draft => "draft", Self::Active => "active", Self::Inactive => "inactive" }
    }
    pub fn parse(value: &str) -> Option<Self> {
        match value { "draft" => Some(Self::Draft), "active" => Some(Self::Active), "inactive" => Some(Self::Inactive), _ => None }
    }
}

/// Addresses one stock slot of a product. Both parts empty means the flat stock field.
#[derive(Clone, Debug, Default, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct VariantKey { pub color: Option<String>, pub size: Option<String> }

impl VariantKey {
    pub fn new(color: Option<String>, size: Option<String>) -> Self {
        let clean = |v: Option<String>| v.map(|s| s.trim().to_string()).filter(|s| !s.is_empty());
        Self { color: clean(color), size: clean(size) }
    }
    pub fn flat() -> Self { Self::default() }
    pub fn is_flat(&self) -> bool { self.color.is_none() && self.size.is_none() }
}

impl std::fmt::Display for VariantKey {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match (&self.color, &self.size) {
            (None, None) => write!(f, "default"),
            (c, s) => write!(f, "{}/{}", c.as_deref().unwrap_or("-"), s.as_deref().unwrap_or("-")),
        }
    }
}

/// Where restored stock ended up.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum RestockTarget { Variant, FlatStock }

impl Product {
    pub fn create(name: impl Into<String>, price: Money) -> Self {
        let now = Utc::now();
        Self {
            id: Uuid::now_v7(), name: name.into(), price, status: ProductStatus::Draft,
            category_id: None, stock: Quantity::default(), variants: vec![], created_at: now, updated_at: now,
        }
    }

    pub fn id(&self) -> Uuid { self.id }
    pub fn name(&self) -> &str { &self.name }
    pub fn price(&self) -> &Money { &self.price }
    pub fn status(&self) -> ProductStatus { self.status }
    pub fn category_id(&self) -> Option<Uuid> { self.category_id }
    pub fn variants(&self) -> &[Variant] { &self.variants }
    pub fn flat_stock(&self) -> Quantity { self.stock }
    pub fn is_active(&self) -> bool { self.status == ProductStatus::Active }
    pub fn has_variants(&self) -> bool { !self.variants.is_empty() }

    pub fn with_category(mut self, category_id: Uuid) -> Self { self.category_id = Some(category_id); self }

    pub fn with_flat_stock(mut self, qty: u32) -> Self { self.stock = Quantity::new(qty); self }

    pub fn with_variant(mut self, color: impl Into<String>, sizes: &[(&str, u32)]) -> Self {
        self.variants.push(Variant {
            color: color.into(),
            sizes: sizes.iter().map(|(size, stock)| SizeStock { size: size.to_string(), stock: Quantity::new(*stock) }).collect(),
        });
        self
    }

    pub fn publish(&mut self) -> Result<(), ProductError> {
        if self.name.trim().is_empty() { return Err(ProductError::MissingName); }
        self.status = ProductStatus::Active;
        self.touch();
        Ok(())
    }

    pub fn deactivate(&mut self) { self.status = ProductStatus::Inactive; self.touch(); }

    /// Checks the key is usable for this product: variant products need both colour and size.
    pub fn resolve(&self, key: &VariantKey) -> Result<(), ProductError> {
        match (self.has_variants(), key.is_flat()) {
            (false, true) => Ok(()),
            (false, false) => Err(ProductError::UnknownVariant(key.clone())),
            (true, _) if key.color.is_none() || key.size.is_none() => Err(ProductError::VariantRequired),
            (true, _) => self.slot(key).map(|_| ()).ok_or_else(|| ProductError::UnknownVariant(key.clone())),
        }
    }

    pub fn available(&self, key: &VariantKey) -> Result<u32, ProductError> {
        self.resolve(key)?;
        if key.is_flat() { return Ok(self.stock.value()); }
        self.slot(key).map(|s| s.stock.value()).ok_or_else(|| ProductError::UnknownVariant(key.clone()))
    }

    /// Decrements stock if at least `qty` is available; leaves it untouched otherwise.
    pub fn take_stock(&mut self, key: &VariantKey, qty: u32) -> Result<u32, ProductError> {
        self.resolve(key)?;
        let slot = if key.is_flat() { &mut self.stock } else {
            self.slot_mut(key).map(|s| &mut s.stock).ok_or_else(|| ProductError::UnknownVariant(key.clone()))?
        };
        let available = slot.value();
        *slot = slot.subtract(qty).ok_or(ProductError::InsufficientStock { available })?;
        let remaining = slot.value();
        self.touch();
        Ok(remaining)
    }

    /// Returns stock to the variant it came from, or to the flat field when that
    /// colour/size no longer exists.
    pub fn restore_stock(&mut self, key: &VariantKey, qty: u32) -> RestockTarget {
        let restored = match self.slot_mut(key) {
            Some(slot) => { slot.stock = slot.stock.add(qty); true }
            None => false,
        };
        let target = if restored { RestockTarget::Variant } else {
            self.stock = self.stock.add(qty);
            RestockTarget::FlatStock
        };
        self.touch();
        target
    }

    fn slot(&self, key: &VariantKey) -> Option<&SizeStock> {
        let (color, size) = (key.color.as_deref()?, key.size.as_deref()?);
        self.variants.iter().find(|v| v.color == color)?.sizes.iter().find(|s| s.size == size)
    }

    fn slot_mut(&mut self, key: &VariantKey) -> Option<&mut SizeStock> {
        let (color, size) = (key.color.as_deref()?, key.size.as_deref()?);
        self.variants.iter_mut().find(|v| v.color == color)?.sizes.iter_mut().find(|s| s.size == size)
    }

    fn touch(&mut self) { self.updated_at = Utc::now(); }
}

#[derive(Debug, Clone, PartialEq, Eq)] pub enum ProductError { MissingName, VariantRequired, UnknownVariant(VariantKey), InsufficientStock { available: u32 } }
impl std::error::Error for ProductError {}
impl std::fmt::Display for ProductError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::MissingName => write!(f, "Missing name"),
            Self::VariantRequired => write!(f, "Colour and size are required for this product"),
            Self::UnknownVariant(key) => write!(f, "Variant {key} does not exist"),
            Self::InsufficientStock { available } => write!(f, "Insufficient stock, only {available} available"),
        }
    }
}
