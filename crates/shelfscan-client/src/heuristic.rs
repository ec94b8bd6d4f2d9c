//! Best-effort extraction that works on any storefront.
//!
//! Sources are tried in order of reliability: schema.org JSON-LD, then
//! OpenGraph / `product:` meta tags, then microdata `itemprop`s, and
//! finally the page's `<h1>` and `<title>`.

use scraper::{ElementRef, Html, Selector};
use serde_json::Value;
use shelfscan_core::error::AppError;
use shelfscan_core::models::{ProductFields, ProductOption, StockStatus};
use shelfscan_core::traits::{ExtractionCapability, PageSnapshot};
use url::Url;

use crate::cleaner::MarkdownCleaner;
use crate::price::parse_price;

/// Fallback capability used when no platform profile matches.
#[derive(Clone, Default)]
pub struct HeuristicCapability {
    cleaner: MarkdownCleaner,
}

impl HeuristicCapability {
    pub fn new() -> Self {
        Self::default()
    }

    /// Read whatever product fields the page exposes. The name may be empty.
    pub(crate) fn fields(&self, doc: &Html, page: &PageSnapshot) -> ProductFields {
        let ld = json_ld_product(doc);
        let ld_offer = ld.as_ref().and_then(first_offer);

        let name = ld
            .as_ref()
            .and_then(|p| str_field(p, "name"))
            .or_else(|| meta(doc, "og:title"))
            .or_else(|| first_text(doc, "[itemprop=\"name\"]"))
            .or_else(|| first_text(doc, "h1"))
            .or_else(|| first_text(doc, "title").map(|t| strip_site_suffix(&t)))
            .unwrap_or_default();

        let price = ld_offer
            .as_ref()
            .and_then(offer_price)
            .or_else(|| meta(doc, "product:price:amount").and_then(|p| parse_price(&p)))
            .or_else(|| meta(doc, "og:price:amount").and_then(|p| parse_price(&p)))
            .or_else(|| {
                first_element(doc, "[itemprop=\"price\"]")
                    .and_then(|el| attr_or_text(el, "content"))
                    .and_then(|p| parse_price(&p))
            });

        let stock_hint = ld_offer
            .as_ref()
            .and_then(|o| str_field(o, "availability"))
            .or_else(|| meta(doc, "product:availability"))
            .or_else(|| meta(doc, "og:availability"))
            .or_else(|| {
                first_element(doc, "[itemprop=\"availability\"]").and_then(|el| {
                    el.value()
                        .attr("href")
                        .map(String::from)
                        .or_else(|| attr_or_text(el, "content"))
                })
            });
        let stock = stock_hint
            .map(|h| StockStatus::from_hint(&h))
            .unwrap_or_default();

        let mut image_sources: Vec<String> = ld.as_ref().map(ld_images).unwrap_or_default();
        image_sources.extend(meta_all(doc, "og:image"));
        image_sources.extend(select_all(doc, "[itemprop=\"image\"]").into_iter().filter_map(|el| {
            el.value()
                .attr("src")
                .or_else(|| el.value().attr("content"))
                .or_else(|| el.value().attr("href"))
                .map(String::from)
        }));
        let images = resolve_images(&page.final_url, image_sources);

        let description = ld
            .as_ref()
            .and_then(|p| str_field(p, "description"))
            .or_else(|| meta(doc, "og:description"))
            .or_else(|| {
                first_element(doc, "[itemprop=\"description\"]")
                    .and_then(|el| self.cleaner.to_markdown(&el.inner_html()).ok().flatten())
            });

        let category = ld
            .as_ref()
            .and_then(|p| str_field(p, "category"))
            .or_else(|| meta(doc, "product:category"));

        ProductFields {
            name,
            price,
            images,
            options: select_options(doc),
            description,
            stock,
            category,
        }
    }

    pub(crate) fn cleaner(&self) -> &MarkdownCleaner {
        &self.cleaner
    }
}

impl ExtractionCapability for HeuristicCapability {
    fn name(&self) -> &str {
        "heuristic"
    }

    fn extract(&self, page: &PageSnapshot) -> Result<ProductFields, AppError> {
        let doc = Html::parse_document(&page.html);
        let fields = self.fields(&doc, page);
        if fields.name.is_empty() {
            return Err(AppError::Extraction(format!(
                "no product name found on {}",
                page.final_url
            )));
        }
        Ok(fields)
    }
}

// ---------------------------------------------------------------------------
// DOM helpers shared with the selector capability
// ---------------------------------------------------------------------------

/// All elements matching `css`; an unparseable selector matches nothing.
pub(crate) fn select_all<'a>(doc: &'a Html, css: &str) -> Vec<ElementRef<'a>> {
    match Selector::parse(css) {
        Ok(selector) => doc.select(&selector).collect(),
        Err(_) => Vec::new(),
    }
}

fn first_element<'a>(doc: &'a Html, css: &str) -> Option<ElementRef<'a>> {
    select_all(doc, css).into_iter().next()
}

fn first_text(doc: &Html, css: &str) -> Option<String> {
    select_all(doc, css)
        .into_iter()
        .map(element_text)
        .find(|t| !t.is_empty())
}

/// Element text with whitespace collapsed.
pub(crate) fn element_text(el: ElementRef<'_>) -> String {
    clean_text(&el.text().collect::<String>())
}

pub(crate) fn clean_text(text: &str) -> String {
    text.split_whitespace().collect::<Vec<_>>().join(" ")
}

fn attr_or_text(el: ElementRef<'_>, attr: &str) -> Option<String> {
    let value = el
        .value()
        .attr(attr)
        .map(clean_text)
        .unwrap_or_else(|| element_text(el));
    (!value.is_empty()).then_some(value)
}

fn meta(doc: &Html, key: &str) -> Option<String> {
    meta_all(doc, key).into_iter().next()
}

fn meta_all(doc: &Html, key: &str) -> Vec<String> {
    let css = format!("meta[property=\"{key}\"], meta[name=\"{key}\"]");
    select_all(doc, &css)
        .into_iter()
        .filter_map(|el| el.value().attr("content"))
        .map(clean_text)
        .filter(|v| !v.is_empty())
        .collect()
}

fn strip_site_suffix(title: &str) -> String {
    title
        .split(" | ")
        .next()
        .unwrap_or(title)
        .trim()
        .to_string()
}

/// Resolve against the page URL, drop inline data and duplicates.
pub(crate) fn resolve_images(base: &str, sources: Vec<String>) -> Vec<String> {
    let base = Url::parse(base).ok();
    let mut out: Vec<String> = Vec::new();
    for src in sources {
        let src = src.trim();
        if src.is_empty() || src.starts_with("data:") {
            continue;
        }
        let resolved = match &base {
            Some(base) => base.join(src).map(String::from).unwrap_or_else(|_| src.to_string()),
            None => src.to_string(),
        };
        if !out.contains(&resolved) {
            out.push(resolved);
        }
    }
    out
}

/// Read a `<select>` as a product option; placeholder entries with an
/// empty value are skipped.
pub(crate) fn option_from_select(el: ElementRef<'_>) -> Option<ProductOption> {
    let attrs = el.value();
    let name = attrs
        .attr("aria-label")
        .or_else(|| attrs.attr("data-option-name"))
        .or_else(|| attrs.attr("name"))
        .map(clean_text)
        .filter(|n| !n.is_empty())
        .unwrap_or_else(|| "Option".to_string());

    let option_selector = Selector::parse("option").ok()?;
    let values: Vec<String> = el
        .select(&option_selector)
        .filter(|opt| opt.value().attr("value").is_none_or(|v| !v.trim().is_empty()))
        .map(element_text)
        .filter(|t| !t.is_empty())
        .collect();

    (!values.is_empty()).then_some(ProductOption { name, values })
}

fn select_options(doc: &Html) -> Vec<ProductOption> {
    select_all(doc, "select")
        .into_iter()
        .filter(|el| {
            let name = el.value().attr("name").unwrap_or_default().to_lowercase();
            !(name.contains("quantity") || name.contains("qty") || name.contains("sort"))
        })
        .filter_map(option_from_select)
        .collect()
}

// ---------------------------------------------------------------------------
// JSON-LD
// ---------------------------------------------------------------------------

fn json_ld_product(doc: &Html) -> Option<Value> {
    select_all(doc, "script[type=\"application/ld+json\"]")
        .into_iter()
        .filter_map(|el| serde_json::from_str::<Value>(el.text().collect::<String>().trim()).ok())
        .find_map(|value| find_product(&value).cloned())
}

fn find_product(value: &Value) -> Option<&Value> {
    match value {
        Value::Array(items) => items.iter().find_map(find_product),
        Value::Object(map) => {
            if is_product(value) {
                return Some(value);
            }
            map.get("@graph")
                .and_then(find_product)
                .or_else(|| map.get("mainEntity").and_then(find_product))
        }
        _ => None,
    }
}

fn is_product(value: &Value) -> bool {
    let matches = |t: &str| t.eq_ignore_ascii_case("Product") || t.eq_ignore_ascii_case("ProductGroup");
    match value.get("@type") {
        Some(Value::String(t)) => matches(t),
        Some(Value::Array(types)) => types.iter().filter_map(Value::as_str).any(matches),
        _ => false,
    }
}

fn str_field(value: &Value, key: &str) -> Option<String> {
    match value.get(key)? {
        Value::String(s) => Some(clean_text(s)).filter(|s| !s.is_empty()),
        Value::Object(obj) => obj
            .get("name")
            .and_then(Value::as_str)
            .map(clean_text)
            .filter(|s| !s.is_empty()),
        _ => None,
    }
}

fn first_offer(product: &Value) -> Option<Value> {
    match product.get("offers")? {
        Value::Array(offers) => offers.first().cloned(),
        offer @ Value::Object(_) => Some(offer.clone()),
        _ => None,
    }
}

fn offer_price(offer: &Value) -> Option<f64> {
    ["price", "lowPrice"].iter().find_map(|key| match offer.get(*key)? {
        Value::Number(n) => n.as_f64(),
        Value::String(s) => parse_price(s),
        _ => None,
    })
}

fn ld_images(product: &Value) -> Vec<String> {
    fn collect(value: &Value, out: &mut Vec<String>) {
        match value {
            Value::String(s) => out.push(s.clone()),
            Value::Array(items) => items.iter().for_each(|item| collect(item, out)),
            Value::Object(obj) => {
                if let Some(Value::String(url)) = obj.get("url").or_else(|| obj.get("contentUrl")) {
                    out.push(url.clone());
                }
            }
            _ => {}
        }
    }
    let mut out = Vec::new();
    if let Some(image) = product.get("image") {
        collect(image, &mut out);
    }
    out
}
