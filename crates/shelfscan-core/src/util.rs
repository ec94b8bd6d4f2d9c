use std::path::Path;

/// Derive a run label from an input file path.
///
/// Extracts the file stem (name without extension).
/// Example: `"lists/summer_sale.txt"` → `"summer_sale"`
pub fn label_from_path(path: &Path) -> String {
    path.file_stem()
        .and_then(|s| s.to_str())
        .unwrap_or("batch")
        .to_string()
}

/// Split a plain-text locator list into entries.
///
/// One locator per line; blank lines and `#` comments are skipped.
pub fn parse_locator_lines(text: &str) -> Vec<String> {
    text.lines()
        .map(str::trim)
        .filter(|line| !line.is_empty() && !line.starts_with('#'))
        .map(String::from)
        .collect()
}
