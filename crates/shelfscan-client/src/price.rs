/// Parse a displayed price such as `₩12,900`, `$1,299.99`, `1.299,00 €`
/// or `CHF 1'250.50` into a number.
///
/// The first run of digits and separators is used. When both `.` and `,`
/// appear, the last one is the decimal mark. A single separator followed
/// by exactly three digits is read as a thousands separator.
pub fn parse_price(text: &str) -> Option<f64> {
    let start = text.find(|c: char| c.is_ascii_digit())?;
    let run: String = text[start..]
        .chars()
        .take_while(|c| c.is_ascii_digit() || is_separator(*c))
        .collect();
    let run = run.trim_end_matches(is_separator);

    let last_dot = run.rfind('.');
    let last_comma = run.rfind(',');
    let decimal = match (last_dot, last_comma) {
        (Some(d), Some(c)) => Some(d.max(c)),
        (Some(i), None) | (None, Some(i)) => {
            let mark = run.as_bytes()[i] as char;
            let repeated = run.matches(mark).count() > 1;
            let digits_after = run.len() - i - 1;
            if repeated || digits_after == 3 {
                None
            } else {
                Some(i)
            }
        }
        (None, None) => None,
    };

    let mut normalized = String::with_capacity(run.len());
    for (i, c) in run.char_indices() {
        if c.is_ascii_digit() {
            normalized.push(c);
        } else if Some(i) == decimal {
            normalized.push('.');
        }
    }
    normalized.parse().ok()
}

fn is_separator(c: char) -> bool {
    matches!(c, '.' | ',' | '\'' | '\u{a0}' | '\u{202f}')
}
