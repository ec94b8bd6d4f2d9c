//! Product query filters and sorting shared by every store backend.

use std::cmp::Ordering;
use std::fmt;
use std::str::FromStr;

use serde::{Deserialize, Serialize};

use crate::models::ProductRecord;

/// Field a query result can be sorted by.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum SortKey {
    Name,
    Price,
    CollectedAt,
    UpdatedAt,
    Platform,
}

impl SortKey {
    pub fn as_str(&self) -> &'static str {
        match self {
            SortKey::Name => "name",
            SortKey::Price => "price",
            SortKey::CollectedAt => "collected_at",
            SortKey::UpdatedAt => "updated_at",
            SortKey::Platform => "platform",
        }
    }
}

impl fmt::Display for SortKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.as_str())
    }
}

impl FromStr for SortKey {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_lowercase().replace('-', "_").as_str() {
            "name" => Ok(SortKey::Name),
            "price" => Ok(SortKey::Price),
            "collected_at" | "collected" => Ok(SortKey::CollectedAt),
            "updated_at" | "updated" => Ok(SortKey::UpdatedAt),
            "platform" => Ok(SortKey::Platform),
            _ => Err(format!("Unknown sort key: {s}")),
        }
    }
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum SortOrder {
    #[default]
    Asc,
    Desc,
}

impl SortOrder {
    pub fn as_str(&self) -> &'static str {
        match self {
            SortOrder::Asc => "asc",
            SortOrder::Desc => "desc",
        }
    }
}

impl FromStr for SortOrder {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_lowercase().as_str() {
            "asc" | "ascending" => Ok(SortOrder::Asc),
            "desc" | "descending" => Ok(SortOrder::Desc),
            _ => Err(format!("Unknown sort order: {s}")),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct SortSpec {
    pub key: SortKey,
    #[serde(default)]
    pub order: SortOrder,
}

/// Filters for [`crate::traits::ProductStore::query`].
///
/// Without a sort key results keep the store's natural (insertion) order.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct ProductQuery {
    pub platform: Option<String>,
    pub category: Option<String>,
    pub name_contains: Option<String>,
    pub description_contains: Option<String>,
    pub min_price: Option<f64>,
    pub max_price: Option<f64>,
    pub sort: Option<SortSpec>,
    pub limit: Option<usize>,
}

impl ProductQuery {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_platform(mut self, platform: impl Into<String>) -> Self {
        self.platform = Some(platform.into());
        self
    }

    pub fn with_category(mut self, category: impl Into<String>) -> Self {
        self.category = Some(category.into());
        self
    }

    pub fn with_name_contains(mut self, needle: impl Into<String>) -> Self {
        self.name_contains = Some(needle.into());
        self
    }

    pub fn with_description_contains(mut self, needle: impl Into<String>) -> Self {
        self.description_contains = Some(needle.into());
        self
    }

    pub fn with_price_range(mut self, min: Option<f64>, max: Option<f64>) -> Self {
        self.min_price = min;
        self.max_price = max;
        self
    }

    pub fn sorted_by(mut self, key: SortKey, order: SortOrder) -> Self {
        self.sort = Some(SortSpec { key, order });
        self
    }

    pub fn with_limit(mut self, limit: usize) -> Self {
        self.limit = Some(limit);
        self
    }

    /// Whether a record passes every filter. A price range excludes records
    /// without a known price.
    pub fn matches(&self, record: &ProductRecord) -> bool {
        if let Some(platform) = &self.platform
            && record.platform != *platform
        {
            return false;
        }
        if let Some(category) = &self.category
            && record.fields.category.as_deref() != Some(category.as_str())
        {
            return false;
        }
        if let Some(needle) = &self.name_contains
            && !contains_ci(&record.fields.name, needle)
        {
            return false;
        }
        if let Some(needle) = &self.description_contains
            && !record
                .fields
                .description
                .as_deref()
                .is_some_and(|d| contains_ci(d, needle))
        {
            return false;
        }
        if self.min_price.is_some() || self.max_price.is_some() {
            let Some(price) = record.fields.price else {
                return false;
            };
            if self.min_price.is_some_and(|min| price < min)
                || self.max_price.is_some_and(|max| price > max)
            {
                return false;
            }
        }
        true
    }

    /// Filter, sort and truncate records given in natural order.
    pub fn apply<'a, I>(&self, records: I) -> Vec<ProductRecord>
    where
        I: IntoIterator<Item = &'a ProductRecord>,
    {
        let mut out: Vec<ProductRecord> = records
            .into_iter()
            .filter(|r| self.matches(r))
            .cloned()
            .collect();

        if let Some(spec) = self.sort {
            // sort_by is stable, so ties keep natural order.
            out.sort_by(|a, b| compare(a, b, spec));
        }
        if let Some(limit) = self.limit {
            out.truncate(limit);
        }
        out
    }
}

fn contains_ci(haystack: &str, needle: &str) -> bool {
    haystack.to_lowercase().contains(&needle.to_lowercase())
}

/// Missing values sort last in both directions.
fn compare(a: &ProductRecord, b: &ProductRecord, spec: SortSpec) -> Ordering {
    let directed = |ord: Ordering| match spec.order {
        SortOrder::Asc => ord,
        SortOrder::Desc => ord.reverse(),
    };
    match spec.key {
        SortKey::Name => directed(a.fields.name.cmp(&b.fields.name)),
        SortKey::Platform => directed(a.platform.cmp(&b.platform)),
        SortKey::CollectedAt => directed(a.collected_at.cmp(&b.collected_at)),
        SortKey::UpdatedAt => directed(a.updated_at.cmp(&b.updated_at)),
        SortKey::Price => match (a.fields.price, b.fields.price) {
            (Some(x), Some(y)) => directed(x.total_cmp(&y)),
            (Some(_), None) => Ordering::Less,
            (None, Some(_)) => Ordering::Greater,
            (None, None) => Ordering::Equal,
        },
    }
}

#[cfg(test)]
mod tests {
    use chrono::Utc;

    use super::*;
    use crate::models::{ExtractionResult, ProductFields};

    fn record(name: &str, platform: &str, price: Option<f64>, category: Option<&str>) -> ProductRecord {
        let result = ExtractionResult::new(
            format!("https://shop.example.com/{name}"),
            platform,
            ProductFields {
                name: name.to_string(),
                price,
                category: category.map(String::from),
                description: Some(format!("All about the {name}")),
                ..Default::default()
            },
            Utc::now(),
        );
        ProductRecord::first_collection(&result, result.locator.clone(), Utc::now())
    }

    fn catalog() -> Vec<ProductRecord> {
        vec![
            record("Walnut Desk", "shopify", Some(420.0), Some("Furniture")),
            record("Desk Lamp", "coupang", Some(35.5), Some("Lighting")),
            record("Oak Chair", "shopify", None, Some("Furniture")),
            record("Floor Lamp", "coupang", Some(89.0), Some("Lighting")),
        ]
    }

    fn names(records: &[ProductRecord]) -> Vec<&str> {
        records.iter().map(|r| r.fields.name.as_str()).collect()
    }

    #[test]
    fn no_sort_keeps_natural_order() {
        let all = catalog();
        let out = ProductQuery::new().apply(&all);
        assert_eq!(
            names(&out),
            vec!["Walnut Desk", "Desk Lamp", "Oak Chair", "Floor Lamp"]
        );
    }

    #[test]
    fn equality_and_substring_filters() {
        let all = catalog();
        let out = ProductQuery::new().with_platform("coupang").apply(&all);
        assert_eq!(names(&out), vec!["Desk Lamp", "Floor Lamp"]);

        let out = ProductQuery::new()
            .with_category("Furniture")
            .with_name_contains("desk")
            .apply(&all);
        assert_eq!(names(&out), vec!["Walnut Desk"]);

        let out = ProductQuery::new()
            .with_description_contains("OAK")
            .apply(&all);
        assert_eq!(names(&out), vec!["Oak Chair"]);
    }

    #[test]
    fn price_range_excludes_unknown_prices() {
        let all = catalog();
        let out = ProductQuery::new()
            .with_price_range(Some(30.0), Some(100.0))
            .apply(&all);
        assert_eq!(names(&out), vec!["Desk Lamp", "Floor Lamp"]);

        let out = ProductQuery::new()
            .with_price_range(None, Some(1000.0))
            .apply(&all);
        assert_eq!(out.len(), 3);
    }

    #[test]
    fn price_sort_puts_missing_last_both_ways() {
        let all = catalog();
        let asc = ProductQuery::new()
            .sorted_by(SortKey::Price, SortOrder::Asc)
            .apply(&all);
        assert_eq!(
            names(&asc),
            vec!["Desk Lamp", "Floor Lamp", "Walnut Desk", "Oak Chair"]
        );

        let desc = ProductQuery::new()
            .sorted_by(SortKey::Price, SortOrder::Desc)
            .apply(&all);
        assert_eq!(
            names(&desc),
            vec!["Walnut Desk", "Floor Lamp", "Desk Lamp", "Oak Chair"]
        );
    }

    #[test]
    fn name_sort_with_limit() {
        let all = catalog();
        let out = ProductQuery::new()
            .sorted_by(SortKey::Name, SortOrder::Desc)
            .with_limit(2)
            .apply(&all);
        assert_eq!(names(&out), vec!["Walnut Desk", "Oak Chair"]);
    }

    #[test]
    fn parse_sort_tokens() {
        assert_eq!("collected-at".parse::<SortKey>(), Ok(SortKey::CollectedAt));
        assert_eq!("DESC".parse::<SortOrder>(), Ok(SortOrder::Desc));
        assert!("weight".parse::<SortKey>().is_err());
    }
}
