use std::collections::BTreeSet;
use std::fmt;
use std::str::FromStr;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use sha2::{Digest, Sha256};
use uuid::Uuid;

/// Availability of a product as shown on its page.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum StockStatus {
    InStock,
    OutOfStock,
    PreOrder,
    #[default]
    Unknown,
}

impl StockStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            StockStatus::InStock => "in_stock",
            StockStatus::OutOfStock => "out_of_stock",
            StockStatus::PreOrder => "pre_order",
            StockStatus::Unknown => "unknown",
        }
    }

    /// Interpret a free-form availability hint (schema.org URL, meta content,
    /// button label) as a stock status.
    pub fn from_hint(hint: &str) -> Self {
        let hint = hint.trim().to_lowercase();
        let hint = hint
            .trim_start_matches("https://schema.org/")
            .trim_start_matches("http://schema.org/");
        let compact: String = hint
            .chars()
            .filter(|c| !c.is_whitespace() && *c != '_' && *c != '-')
            .collect();

        if compact.contains("outofstock")
            || compact.contains("soldout")
            || compact.contains("discontinued")
            || compact.contains("품절")
        {
            StockStatus::OutOfStock
        } else if compact.contains("preorder") || compact.contains("backorder") {
            StockStatus::PreOrder
        } else if compact.contains("instock")
            || compact.contains("available")
            || compact.contains("limitedavailability")
            || compact.contains("addtocart")
            || compact.contains("구매하기")
        {
            StockStatus::InStock
        } else {
            StockStatus::Unknown
        }
    }

    pub fn is_known(&self) -> bool {
        *self != StockStatus::Unknown
    }
}

impl fmt::Display for StockStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.as_str())
    }
}

impl FromStr for StockStatus {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_lowercase().as_str() {
            "in_stock" => Ok(StockStatus::InStock),
            "out_of_stock" => Ok(StockStatus::OutOfStock),
            "pre_order" => Ok(StockStatus::PreOrder),
            "unknown" => Ok(StockStatus::Unknown),
            _ => Err(format!("Unknown stock status: {s}")),
        }
    }
}

/// A selectable product option, e.g. `Size: S, M, L`.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ProductOption {
    pub name: String,
    pub values: Vec<String>,
}

/// Fields an extraction capability reads off one product page.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct ProductFields {
    pub name: String,
    pub price: Option<f64>,
    #[serde(default)]
    pub images: Vec<String>,
    #[serde(default)]
    pub options: Vec<ProductOption>,
    pub description: Option<String>,
    #[serde(default)]
    pub stock: StockStatus,
    pub category: Option<String>,
}

impl ProductFields {
    /// Overlay `newer` on top of `self`: present values win, absent ones
    /// keep what was already known.
    pub fn overlay(&self, newer: &ProductFields) -> ProductFields {
        ProductFields {
            name: if newer.name.trim().is_empty() {
                self.name.clone()
            } else {
                newer.name.clone()
            },
            price: newer.price.or(self.price),
            images: if newer.images.is_empty() {
                self.images.clone()
            } else {
                newer.images.clone()
            },
            options: if newer.options.is_empty() {
                self.options.clone()
            } else {
                newer.options.clone()
            },
            description: newer.description.clone().or_else(|| self.description.clone()),
            stock: if newer.stock.is_known() {
                newer.stock
            } else {
                self.stock
            },
            category: newer.category.clone().or_else(|| self.category.clone()),
        }
    }

    /// SHA-256 over the serialized fields, used to tell unchanged
    /// re-collections from real updates.
    pub fn data_hash(&self) -> String {
        let encoded = serde_json::to_string(self).unwrap_or_default();
        compute_hash(&encoded)
    }
}

/// The outcome of one successful extraction, before it is stored.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ExtractionResult {
    pub locator: String,
    pub platform: String,
    #[serde(flatten)]
    pub fields: ProductFields,
    pub collected_at: DateTime<Utc>,
}

impl ExtractionResult {
    pub fn new(
        locator: impl Into<String>,
        platform: impl Into<String>,
        fields: ProductFields,
        collected_at: DateTime<Utc>,
    ) -> Self {
        Self {
            locator: locator.into(),
            platform: platform.into(),
            fields,
            collected_at,
        }
    }
}

/// A persisted product, keyed by its normalized locator.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ProductRecord {
    pub id: Uuid,
    pub locator_key: String,
    /// The most recently collected raw locator for this product.
    pub locator: String,
    pub platform: String,
    #[serde(flatten)]
    pub fields: ProductFields,
    pub data_hash: String,
    pub collected_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

impl ProductRecord {
    /// Build the record for a locator key seen for the first time.
    pub fn first_collection(
        result: &ExtractionResult,
        locator_key: impl Into<String>,
        now: DateTime<Utc>,
    ) -> Self {
        Self {
            id: Uuid::new_v4(),
            locator_key: locator_key.into(),
            locator: result.locator.clone(),
            platform: result.platform.clone(),
            data_hash: result.fields.data_hash(),
            fields: result.fields.clone(),
            collected_at: now,
            updated_at: now,
        }
    }

    /// Build the successor of `self` after re-collection.
    ///
    /// Returns a new record; `id`, `locator_key` and `collected_at` carry
    /// over unchanged.
    pub fn merged_with(&self, result: &ExtractionResult, now: DateTime<Utc>) -> Self {
        let fields = self.fields.overlay(&result.fields);
        Self {
            id: self.id,
            locator_key: self.locator_key.clone(),
            locator: result.locator.clone(),
            platform: result.platform.clone(),
            data_hash: fields.data_hash(),
            fields,
            collected_at: self.collected_at,
            updated_at: now,
        }
    }
}

/// The kind of delta recorded in the change history.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ChangeKind {
    PriceUp,
    PriceDown,
    StockChange,
}

impl ChangeKind {
    pub fn as_str(&self) -> &'static str {
        match self {
            ChangeKind::PriceUp => "price_up",
            ChangeKind::PriceDown => "price_down",
            ChangeKind::StockChange => "stock_change",
        }
    }
}

impl fmt::Display for ChangeKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.as_str())
    }
}

impl FromStr for ChangeKind {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "price_up" => Ok(ChangeKind::PriceUp),
            "price_down" => Ok(ChangeKind::PriceDown),
            "stock_change" => Ok(ChangeKind::StockChange),
            _ => Err(format!("Unknown change kind: {s}")),
        }
    }
}

/// Compute the set of changes between two price/stock observations.
///
/// A price move is only recorded when both prices are known. A price that
/// first appears (or disappears) is not a move; the record still takes the
/// new value and the upsert reports `changed`.
pub fn change_kinds(
    old_price: Option<f64>,
    new_price: Option<f64>,
    old_stock: StockStatus,
    new_stock: StockStatus,
) -> BTreeSet<ChangeKind> {
    let mut kinds = BTreeSet::new();
    if let (Some(old), Some(new)) = (old_price, new_price) {
        if new < old {
            kinds.insert(ChangeKind::PriceDown);
        } else if new > old {
            kinds.insert(ChangeKind::PriceUp);
        }
    }
    if old_stock != new_stock {
        kinds.insert(ChangeKind::StockChange);
    }
    kinds
}

/// An append-only entry describing a price/stock delta on re-collection.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ChangeHistoryEntry {
    pub id: Uuid,
    pub product_id: Uuid,
    pub old_price: Option<f64>,
    pub new_price: Option<f64>,
    pub old_stock: StockStatus,
    pub new_stock: StockStatus,
    pub change_kinds: BTreeSet<ChangeKind>,
    pub timestamp: DateTime<Utc>,
}

impl ChangeHistoryEntry {
    /// Returns an entry iff price or stock differ between the two versions.
    pub fn between(old: &ProductRecord, new: &ProductRecord, now: DateTime<Utc>) -> Option<Self> {
        let kinds = change_kinds(
            old.fields.price,
            new.fields.price,
            old.fields.stock,
            new.fields.stock,
        );
        if kinds.is_empty() {
            return None;
        }
        Some(Self {
            id: Uuid::new_v4(),
            product_id: new.id,
            old_price: old.fields.price,
            new_price: new.fields.price,
            old_stock: old.fields.stock,
            new_stock: new.fields.stock,
            change_kinds: kinds,
            timestamp: now,
        })
    }
}

/// Whether an upsert inserted or replaced a record.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum UpsertKind {
    Created,
    Updated,
}

/// Result of [`crate::traits::ProductStore::upsert`].
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct UpsertOutcome {
    pub id: Uuid,
    pub kind: UpsertKind,
    /// True when any stored field differs from the previous version.
    pub changed: bool,
    pub change: Option<ChangeHistoryEntry>,
}

impl UpsertOutcome {
    pub fn created(id: Uuid) -> Self {
        Self {
            id,
            kind: UpsertKind::Created,
            changed: true,
            change: None,
        }
    }

    pub fn updated(old: &ProductRecord, new: &ProductRecord, change: Option<ChangeHistoryEntry>) -> Self {
        Self {
            id: new.id,
            kind: UpsertKind::Updated,
            changed: old.data_hash != new.data_hash,
            change,
        }
    }
}

/// Compute a SHA-256 hash of a string, returned as 64-char hex.
pub fn compute_hash(content: &str) -> String {
    let mut hasher = Sha256::new();
    hasher.update(content.as_bytes());
    format!("{:x}", hasher.finalize())
}
