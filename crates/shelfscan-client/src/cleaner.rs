use std::sync::Arc;

use htmd::HtmlToMarkdown;
use shelfscan_core::error::AppError;

/// Converts product description HTML into Markdown using htmd.
///
/// Non-content elements (script, style, forms, embeds) are dropped.
#[derive(Clone)]
pub struct MarkdownCleaner {
    converter: Arc<HtmlToMarkdown>,
}

impl MarkdownCleaner {
    pub fn new() -> Self {
        let converter = HtmlToMarkdown::builder()
            .skip_tags(vec![
                "script", "style", "noscript", "iframe", "svg", "button", "form", "input", "select",
            ])
            .build();

        Self {
            converter: Arc::new(converter),
        }
    }

    /// Convert `html` and trim it; empty output becomes `None`.
    pub fn to_markdown(&self, html: &str) -> Result<Option<String>, AppError> {
        let markdown = self
            .converter
            .convert(html)
            .map_err(|e| AppError::Extraction(format!("description conversion failed: {e}")))?;
        let trimmed = markdown.trim();
        Ok((!trimmed.is_empty()).then(|| trimmed.to_string()))
    }
}

impl Default for MarkdownCleaner {
    fn default() -> Self {
        Self::new()
    }
}
