//! Selector-driven extraction for known storefront platforms.
//!
//! A [`PlatformProfile`] lists, per field, an ordered set of CSS selectors;
//! the first selector producing a non-empty value wins. A selector may end
//! in `@attr` to read an attribute instead of the element text
//! (`meta[property="og:image"]@content`). Fields the profile cannot fill
//! fall back to the heuristic reading of the same page.

use scraper::{ElementRef, Html, Selector};
use serde::{Deserialize, Serialize};
use shelfscan_core::dispatch::{LocatorPattern, PlatformRule};
use shelfscan_core::error::AppError;
use shelfscan_core::models::{ProductFields, ProductOption, StockStatus};
use shelfscan_core::traits::{ExtractionCapability, PageSnapshot};

use crate::heuristic::{HeuristicCapability, clean_text, element_text, option_from_select, resolve_images};
use crate::price::parse_price;

/// Ordered selector lists for each product field.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct FieldSelectors {
    pub name: Vec<String>,
    pub price: Vec<String>,
    pub images: Vec<String>,
    pub description: Vec<String>,
    /// Breadcrumb items; all matches are joined with `" > "`.
    pub category: Vec<String>,
    pub stock: Vec<String>,
    /// `<select>` elements holding option values.
    pub options: Vec<String>,
    /// Any match marks the product out of stock.
    pub sold_out: Vec<String>,
}

/// A storefront platform: its locator patterns and field selectors.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct PlatformProfile {
    pub id: String,
    pub patterns: Vec<LocatorPattern>,
    #[serde(default)]
    pub selectors: FieldSelectors,
}

impl PlatformProfile {
    pub fn new(id: impl Into<String>, patterns: &[&str]) -> Result<Self, AppError> {
        let rule = PlatformRule::new(id, patterns)?;
        Ok(Self {
            id: rule.platform,
            patterns: rule.patterns,
            selectors: FieldSelectors::default(),
        })
    }

    pub fn with_selectors(mut self, selectors: FieldSelectors) -> Self {
        self.selectors = selectors;
        self
    }

    /// Dispatch rule for this profile.
    pub fn rule(&self) -> PlatformRule {
        PlatformRule {
            platform: self.id.clone(),
            patterns: self.patterns.clone(),
        }
    }
}

/// One compiled `css[@attr]` entry.
#[derive(Debug)]
struct FieldSelector {
    selector: Selector,
    attr: Option<String>,
}

impl FieldSelector {
    fn parse(raw: &str) -> Result<Self, AppError> {
        let (css, attr) = match raw.rsplit_once('@') {
            Some((css, attr))
                if !attr.is_empty()
                    && attr.chars().all(|c| c.is_ascii_alphanumeric() || c == '-' || c == '_') =>
            {
                (css, Some(attr.to_string()))
            }
            _ => (raw, None),
        };
        let selector = Selector::parse(css.trim())
            .map_err(|e| AppError::ConfigError(format!("Invalid selector '{raw}': {e}")))?;
        Ok(Self { selector, attr })
    }

    fn read(&self, el: ElementRef<'_>) -> Option<String> {
        let value = match &self.attr {
            Some(attr) => clean_text(el.value().attr(attr)?),
            None => element_text(el),
        };
        (!value.is_empty()).then_some(value)
    }

    fn values(&self, doc: &Html) -> Vec<String> {
        doc.select(&self.selector).filter_map(|el| self.read(el)).collect()
    }
}

fn compile(raw: &[String]) -> Result<Vec<FieldSelector>, AppError> {
    raw.iter().map(|s| FieldSelector::parse(s)).collect()
}

/// First non-empty value across an ordered selector list.
fn first_value(selectors: &[FieldSelector], doc: &Html) -> Option<String> {
    selectors.iter().find_map(|s| s.values(doc).into_iter().next())
}

/// All values from the first selector that matches anything.
fn all_values(selectors: &[FieldSelector], doc: &Html) -> Vec<String> {
    selectors
        .iter()
        .map(|s| s.values(doc))
        .find(|values| !values.is_empty())
        .unwrap_or_default()
}

/// Extraction capability compiled from a [`PlatformProfile`].
pub struct SelectorCapability {
    id: String,
    heuristic: HeuristicCapability,
    name: Vec<FieldSelector>,
    price: Vec<FieldSelector>,
    images: Vec<FieldSelector>,
    description: Vec<FieldSelector>,
    category: Vec<FieldSelector>,
    stock: Vec<FieldSelector>,
    options: Vec<FieldSelector>,
    sold_out: Vec<FieldSelector>,
}

impl SelectorCapability {
    /// Compile every selector up front; a malformed one is a config error.
    pub fn new(profile: &PlatformProfile) -> Result<Self, AppError> {
        let s = &profile.selectors;
        Ok(Self {
            id: profile.id.clone(),
            heuristic: HeuristicCapability::new(),
            name: compile(&s.name)?,
            price: compile(&s.price)?,
            images: compile(&s.images)?,
            description: compile(&s.description)?,
            category: compile(&s.category)?,
            stock: compile(&s.stock)?,
            options: compile(&s.options)?,
            sold_out: compile(&s.sold_out)?,
        })
    }

    fn description(&self, doc: &Html) -> Option<String> {
        self.description.iter().find_map(|s| {
            doc.select(&s.selector).find_map(|el| match &s.attr {
                Some(_) => s.read(el),
                None => self
                    .heuristic
                    .cleaner()
                    .to_markdown(&el.inner_html())
                    .ok()
                    .flatten(),
            })
        })
    }

    fn stock(&self, doc: &Html) -> StockStatus {
        if self.sold_out.iter().any(|s| doc.select(&s.selector).next().is_some()) {
            return StockStatus::OutOfStock;
        }
        first_value(&self.stock, doc)
            .map(|hint| StockStatus::from_hint(&hint))
            .unwrap_or_default()
    }

    fn options(&self, doc: &Html) -> Vec<ProductOption> {
        self.options
            .iter()
            .map(|s| {
                doc.select(&s.selector)
                    .filter_map(option_from_select)
                    .collect::<Vec<_>>()
            })
            .find(|options| !options.is_empty())
            .unwrap_or_default()
    }

    fn own_fields(&self, doc: &Html, page: &PageSnapshot) -> ProductFields {
        let crumbs = all_values(&self.category, doc);
        ProductFields {
            name: first_value(&self.name, doc).unwrap_or_default(),
            price: self
                .price
                .iter()
                .flat_map(|s| s.values(doc))
                .find_map(|text| parse_price(&text)),
            images: resolve_images(&page.final_url, all_values(&self.images, doc)),
            options: self.options(doc),
            description: self.description(doc),
            stock: self.stock(doc),
            category: (!crumbs.is_empty()).then(|| crumbs.join(" > ")),
        }
    }
}

impl ExtractionCapability for SelectorCapability {
    fn name(&self) -> &str {
        &self.id
    }

    fn extract(&self, page: &PageSnapshot) -> Result<ProductFields, AppError> {
        let doc = Html::parse_document(&page.html);
        let fields = self
            .heuristic
            .fields(&doc, page)
            .overlay(&self.own_fields(&doc, page));
        if fields.name.is_empty() {
            return Err(AppError::Extraction(format!(
                "{} profile found no product name on {}",
                self.id, page.final_url
            )));
        }
        Ok(fields)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn strings(items: &[&str]) -> Vec<String> {
        items.iter().map(|s| s.to_string()).collect()
    }

    fn profile() -> PlatformProfile {
        PlatformProfile::new("teststore", &["teststore.example/item/*"])
            .unwrap()
            .with_selectors(FieldSelectors {
                name: strings(&[".missing-title", "h2.prod-name"]),
                price: strings(&[".sale-price", ".price"]),
                images: strings(&[".gallery img@data-src", ".gallery img@src"]),
                description: strings(&["#detail"]),
                category: strings(&[".crumbs li"]),
                stock: strings(&[".stock-label"]),
                options: strings(&["select.variant"]),
                sold_out: strings(&[".soldout-badge"]),
            })
    }

    fn page(html: &str) -> PageSnapshot {
        PageSnapshot {
            locator: "https://teststore.example/item/7".into(),
            final_url: "https://teststore.example/item/7".into(),
            html: html.into(),
        }
    }

    const PAGE: &str = r#"<html><head>
        <meta property="og:description" content="Short blurb">
        <meta property="og:image" content="https://cdn.example/og.jpg">
        </head><body>
        <ul class="crumbs"><li>Home</li><li>Kitchen</li><li>Mugs</li></ul>
        <h2 class="prod-name"> Speckled   Mug </h2>
        <span class="price">₩12,900</span>
        <div class="gallery"><img data-src="/i/1.jpg"><img data-src="/i/2.jpg"></div>
        <span class="stock-label">In stock</span>
        <select class="variant" name="color"><option value="">Pick</option><option value="w">White</option><option value="b">Black</option></select>
        <div id="detail"><p>Holds <em>350ml</em>.</p></div>
        </body></html>"#;

    #[test]
    fn extracts_with_ordered_fallbacks() {
        let cap = SelectorCapability::new(&profile()).unwrap();
        assert_eq!(cap.name(), "teststore");

        let fields = cap.extract(&page(PAGE)).unwrap();
        assert_eq!(fields.name, "Speckled Mug");
        assert_eq!(fields.price, Some(12900.0));
        assert_eq!(
            fields.images,
            vec!["https://teststore.example/i/1.jpg", "https://teststore.example/i/2.jpg"]
        );
        assert_eq!(fields.category.as_deref(), Some("Home > Kitchen > Mugs"));
        assert_eq!(fields.stock, StockStatus::InStock);
        assert_eq!(fields.options[0].values, vec!["White", "Black"]);
        assert!(fields.description.unwrap().contains("350ml"));
    }

    #[test]
    fn sold_out_marker_wins_over_label() {
        let cap = SelectorCapability::new(&profile()).unwrap();
        let html = PAGE.replace("<body>", "<body><div class=\"soldout-badge\">Sold out</div>");
        let fields = cap.extract(&page(&html)).unwrap();
        assert_eq!(fields.stock, StockStatus::OutOfStock);
    }

    #[test]
    fn heuristic_fills_fields_the_profile_misses() {
        let cap = SelectorCapability::new(&profile()).unwrap();
        let html = r#"<html><head>
            <meta property="og:title" content="Meta Name">
            <meta property="og:description" content="From meta">
            <meta property="og:image" content="https://cdn.example/og.jpg">
            </head><body><span class="price">5.00</span></body></html>"#;
        let fields = cap.extract(&page(html)).unwrap();
        assert_eq!(fields.name, "Meta Name");
        assert_eq!(fields.price, Some(5.0));
        assert_eq!(fields.description.as_deref(), Some("From meta"));
        assert_eq!(fields.images, vec!["https://cdn.example/og.jpg"]);
    }

    #[test]
    fn bad_selector_is_config_error() {
        let bad = PlatformProfile::new("bad", &["bad.example"])
            .unwrap()
            .with_selectors(FieldSelectors {
                name: strings(&["h1[["]),
                ..Default::default()
            });
        assert!(matches!(
            SelectorCapability::new(&bad),
            Err(AppError::ConfigError(_))
        ));
    }

    #[test]
    fn profile_deserializes_with_partial_selectors() {
        let json = r#"{"id":"mini","patterns":["mini.example/p/*"],"selectors":{"name":["h1"]}}"#;
        let profile: PlatformProfile = serde_json::from_str(json).unwrap();
        assert_eq!(profile.selectors.name, vec!["h1"]);
        assert!(profile.selectors.price.is_empty());
        assert_eq!(profile.rule().platform, "mini");
    }
}
