//! Built-in platform profiles and registry construction.
//!
//! Order matters: dispatch takes the first matching profile, so the
//! catch-all Shopify path pattern stays last.

use std::path::Path;
use std::sync::Arc;

use shelfscan_core::dispatch::CapabilityRegistry;
use shelfscan_core::error::AppError;
use shelfscan_core::traits::ExtractionCapability;

use crate::heuristic::HeuristicCapability;
use crate::selector::{FieldSelectors, PlatformProfile, SelectorCapability};

fn list(items: &[&str]) -> Vec<String> {
    items.iter().map(|s| s.to_string()).collect()
}

fn profile(id: &str, patterns: &[&str], selectors: FieldSelectors) -> Result<PlatformProfile, AppError> {
    Ok(PlatformProfile::new(id, patterns)?.with_selectors(selectors))
}

/// Profiles shipped with shelfscan, in dispatch order.
pub fn builtin_profiles() -> Result<Vec<PlatformProfile>, AppError> {
    Ok(vec![
        profile(
            "naver-smartstore",
            &["smartstore.naver.com/*/products/*", "brand.naver.com/*/products/*"],
            FieldSelectors {
                name: list(&["h3._22kNQuEXmb", "div._1eddO7u4UC h3", "meta[property=\"og:title\"]@content"]),
                price: list(&["strong.aICRqgP9zw span._1LY7DqCnwR", "span._1LY7DqCnwR"]),
                images: list(&["div._2tT_gkmAOr img@src", "meta[property=\"og:image\"]@content"]),
                category: list(&["ul._3GwEgXAx2h li a"]),
                options: list(&["div.bd_2dy3Y select"]),
                sold_out: list(&["div._2BQ-WF2QUb span.blind", "p.soldout"]),
                ..Default::default()
            },
        )?,
        profile(
            "coupang",
            &["coupang.com/vp/products/*"],
            FieldSelectors {
                name: list(&["h1.prod-buy-header__title", "h2.prod-buy-header__title"]),
                price: list(&["span.total-price strong", "div.prod-sale-price span.total-price"]),
                images: list(&["img.prod-image__detail@src", "div.prod-image__item img@data-src"]),
                description: list(&["div.prod-description"]),
                category: list(&["ul#breadcrumb li a"]),
                options: list(&["select.prod-option__selected"]),
                sold_out: list(&["div.oos-label", "div.prod-not-find-known__buy__button"]),
                ..Default::default()
            },
        )?,
        profile(
            "amazon",
            &["amazon.com/*/dp/*", "amazon.com/dp/*", "amazon.com/gp/product/*"],
            FieldSelectors {
                name: list(&["#productTitle"]),
                price: list(&[
                    "#corePrice_feature_div span.a-offscreen",
                    "#priceblock_ourprice",
                    "span.a-price span.a-offscreen",
                ]),
                images: list(&["#landingImage@data-old-hires", "#landingImage@src", "#imgTagWrapperId img@src"]),
                description: list(&["#feature-bullets", "#productDescription"]),
                category: list(&["#wayfinding-breadcrumbs_feature_div ul li a"]),
                stock: list(&["#availability span"]),
                options: list(&["select#native_dropdown_selected_size_name"]),
                ..Default::default()
            },
        )?,
        profile(
            "gmarket",
            &["item.gmarket.co.kr/Item"],
            FieldSelectors {
                name: list(&["h1.itemtit"]),
                price: list(&["div.price span.price_real strong", "strong.price_real"]),
                images: list(&["div.box__viewer-container img@src", "ul.viewer img@src"]),
                category: list(&["div.location-navi ul li a"]),
                sold_out: list(&["div.box__soldout", "span.text__soldout"]),
                ..Default::default()
            },
        )?,
        profile(
            "cafe24",
            &["*/product/detail.html", "*/product/*/*/category/*"],
            FieldSelectors {
                name: list(&["div.headingArea h2", "div.infoArea h2", "meta[property=\"og:title\"]@content"]),
                price: list(&["#span_product_price_sale", "#span_product_price_text", "strong#span_product_price_text"]),
                images: list(&["div.keyImg img@src", "img.BigImage@src"]),
                description: list(&["div#prdDetail div.cont", "div#prdDetail"]),
                category: list(&["div.xans-product-headcategory ol li a"]),
                options: list(&["select[id^=\"product_option_id\"]"]),
                sold_out: list(&["img.icon_img[alt=\"품절\"]", "span.displaynone.soldout"]),
                ..Default::default()
            },
        )?,
        profile(
            "shopify",
            &["*/products/*"],
            FieldSelectors {
                name: list(&["h1.product__title", "h1.product-single__title", "h1[itemprop=\"name\"]"]),
                price: list(&[
                    "span.price-item--sale",
                    "span.price-item--regular",
                    "span.product__price",
                    "meta[property=\"og:price:amount\"]@content",
                ]),
                images: list(&["div.product__media img@src", "img.product-featured-media@src"]),
                description: list(&["div.product__description", "div.product-single__description"]),
                options: list(&["variant-selects select", "select.single-option-selector"]),
                sold_out: list(&["button[name=\"add\"][disabled]"]),
                ..Default::default()
            },
        )?,
    ])
}

/// Build a registry from profiles. Each profile's selectors are compiled
/// once; the heuristic capability handles unmatched locators.
pub fn registry_from_profiles(profiles: &[PlatformProfile]) -> Result<CapabilityRegistry, AppError> {
    let fallback: Arc<dyn ExtractionCapability> = Arc::new(HeuristicCapability::new());
    let mut registry = CapabilityRegistry::new(fallback);

    for profile in profiles {
        let capability: Arc<dyn ExtractionCapability> = Arc::new(SelectorCapability::new(profile)?);
        registry = registry.with_rule(profile.rule()).register(
            profile.id.clone(),
            move |_: &str| -> Result<Arc<dyn ExtractionCapability>, AppError> {
                Ok(Arc::clone(&capability))
            },
        );
    }
    Ok(registry)
}

/// Registry over the built-in profiles.
pub fn default_registry() -> Result<CapabilityRegistry, AppError> {
    registry_from_profiles(&builtin_profiles()?)
}

/// Load extra profiles from a JSON array file.
pub fn load_profiles(path: impl AsRef<Path>) -> Result<Vec<PlatformProfile>, AppError> {
    let path = path.as_ref();
    let raw = std::fs::read_to_string(path).map_err(|e| {
        AppError::ConfigError(format!("Cannot read profiles {}: {e}", path.display()))
    })?;
    serde_json::from_str(&raw).map_err(|e| {
        AppError::ConfigError(format!("Invalid profiles {}: {e}", path.display()))
    })
}

/// Overrides replace built-ins with the same id in place; new ids go first
/// so they take precedence over the catch-all patterns.
pub fn merge_profiles(builtin: Vec<PlatformProfile>, overrides: Vec<PlatformProfile>) -> Vec<PlatformProfile> {
    let mut merged = builtin;
    let mut fresh = Vec::new();
    for profile in overrides {
        match merged.iter_mut().find(|p| p.id == profile.id) {
            Some(slot) => *slot = profile,
            None => fresh.push(profile),
        }
    }
    fresh.extend(merged);
    fresh
}
