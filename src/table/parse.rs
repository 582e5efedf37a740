use chrono::NaiveDate;
use once_cell::sync::Lazy;
use regex::Regex;
use serde_json::Value;

/// Tokens sources use to say "no value here".
const MISSING_TOKENS: &[&str] = &["", ".", "NA", "N/A", "NAN", "NULL", "-"];

static LEADING_YEAR: Lazy<Regex> =
    Lazy::new(|| Regex::new(r"^\s*(\d{4})\b").expect("leading year regex should compile"));

/// Trim whitespace + strip outer quotes if present.
pub fn clean_str(raw: &str) -> &str {
    let trimmed = raw.trim();
    if trimmed.len() >= 2 && trimmed.starts_with('"') && trimmed.ends_with('"') {
        trimmed[1..trimmed.len() - 1].trim()
    } else {
        trimmed
    }
}

/// Parse a raw cell into a value. Sentinel tokens, non-numeric text and
/// non-finite numbers all come back as `None`; never as zero.
pub fn parse_value(raw: &str) -> Option<f64> {
    let s = clean_str(raw);
    if MISSING_TOKENS.iter().any(|t| t.eq_ignore_ascii_case(s)) {
        return None;
    }
    s.parse::<f64>().ok().filter(|v| v.is_finite())
}

/// Same as [`parse_value`] but for a JSON field, which may be a string or a number.
pub fn json_value(v: Option<&Value>) -> Option<f64> {
    match v? {
        Value::String(s) => parse_value(s),
        Value::Number(n) => n.as_f64().filter(|v| v.is_finite()),
        _ => None,
    }
}

/// JSON field rendered as text, for string and number cells.
pub fn json_text(v: Option<&Value>) -> Option<String> {
    match v? {
        Value::String(s) => Some(s.trim().to_string()),
        Value::Number(n) => Some(n.to_string()),
        _ => None,
    }
}

/// Parse `"YYYY-MM-DD"`. Anything after the date part (a time, a zone) is ignored.
pub fn parse_date(raw: &str) -> Option<NaiveDate> {
    let s = clean_str(raw);
    if s.len() < 10 || !s.is_char_boundary(10) {
        return None;
    }
    NaiveDate::parse_from_str(&s[..10], "%Y-%m-%d").ok()
}

/// Leading four-digit year of a label such as `"2013 (38)"`.
pub fn leading_year(raw: &str) -> Option<i32> {
    let caps = LEADING_YEAR.captures(clean_str(raw))?;
    caps[1].parse().ok()
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn missing_tokens_are_none_not_zero() {
        assert_eq!(parse_value("."), None);
        assert_eq!(parse_value(""), None);
        assert_eq!(parse_value("  NaN "), None);
        assert_eq!(parse_value("n/a"), None);
        assert_eq!(parse_value("abc"), None);
        assert_eq!(parse_value("inf"), None);
        assert_eq!(parse_value("0"), Some(0.0));
        assert_eq!(parse_value("\"3.5\""), Some(3.5));
        assert_eq!(parse_value("-1.25"), Some(-1.25));
    }

    #[test]
    fn json_cells_accept_strings_and_numbers() {
        let row = json!({"a": "4.2", "b": 7, "c": null, "d": "."});
        assert_eq!(json_value(row.get("a")), Some(4.2));
        assert_eq!(json_value(row.get("b")), Some(7.0));
        assert_eq!(json_value(row.get("c")), None);
        assert_eq!(json_value(row.get("d")), None);
        assert_eq!(json_value(row.get("missing")), None);
        assert_eq!(json_text(row.get("b")).as_deref(), Some("7"));
    }

    #[test]
    fn dates_parse_iso_only() {
        assert_eq!(
            parse_date("2020-06-01"),
            NaiveDate::from_ymd_opt(2020, 6, 1)
        );
        assert_eq!(
            parse_date("2020-06-01T00:00:00"),
            NaiveDate::from_ymd_opt(2020, 6, 1)
        );
        assert_eq!(parse_date("2020/06/01"), None);
        assert_eq!(parse_date("2020-13-01"), None);
        assert_eq!(parse_date("soon"), None);
    }

    #[test]
    fn footnoted_years() {
        assert_eq!(leading_year("2013 (38)"), Some(2013));
        assert_eq!(leading_year(" 1959"), Some(1959));
        assert_eq!(leading_year("All years"), None);
        assert_eq!(leading_year("20135"), None);
    }
}
