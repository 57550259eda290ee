// src/scrape/dates.rs
//! Date parsing for portal payloads and free text.
//!
//! All results are UTC instants. Anything unparseable yields `None`.

use chrono::{DateTime, NaiveDate, NaiveDateTime, NaiveTime, TimeZone, Utc};
use once_cell::sync::Lazy;
use regex::Regex;

static RE_NUMERIC: Lazy<Regex> =
    Lazy::new(|| Regex::new(r"^(\d{1,2})([/\-])(\d{1,2})[/\-](\d{4}|\d{2})$").unwrap());

const DATETIME_FORMATS: &[&str] = &[
    "%Y-%m-%dT%H:%M:%S%.f%z",
    "%Y-%m-%dT%H:%M:%S%.f",
    "%Y-%m-%dT%H:%M%z",
    "%Y-%m-%dT%H:%M",
    "%Y-%m-%d %H:%M:%S",
];

const MONTH_NAME_FORMATS: &[&str] = &["%B %d, %Y", "%B %d %Y", "%d %B %Y", "%d %B, %Y"];

/// Parse the date formats portals hand out:
/// RFC 3339 / ISO-8601 (with or without offset, fractional seconds, `Z`),
/// `YYYY-MM-DD HH:MM:SS`, `YYYY-MM-DD`, `MM/DD/YYYY` then `DD/MM/YYYY`.
/// Values without a zone are read as UTC.
pub fn parse_date(raw: &str) -> Option<DateTime<Utc>> {
    let s = raw.trim();
    if s.is_empty() {
        return None;
    }
    if let Ok(dt) = DateTime::parse_from_rfc3339(s) {
        return Some(dt.with_timezone(&Utc));
    }
    for fmt in DATETIME_FORMATS {
        if fmt.ends_with("%z") {
            if let Ok(dt) = DateTime::parse_from_str(s, fmt) {
                return Some(dt.with_timezone(&Utc));
            }
        } else if let Ok(ndt) = NaiveDateTime::parse_from_str(s, fmt) {
            return Some(Utc.from_utc_datetime(&ndt));
        }
    }
    if let Ok(d) = NaiveDate::parse_from_str(s, "%Y-%m-%d") {
        return Some(midnight(d));
    }
    parse_numeric(s, false)
}

/// `parse_date` plus the looser shapes found in prose: dash-separated
/// numeric dates, two-digit years and month names (`March 1, 2025`, `Mar 1 2025`).
pub fn parse_flexible_date(raw: &str) -> Option<DateTime<Utc>> {
    let s = raw.trim().trim_end_matches(['.', ',', ')', ';']);
    if let Some(dt) = parse_date(s) {
        return Some(dt);
    }
    if let Some(dt) = parse_numeric(s, true) {
        return Some(dt);
    }
    let cleaned = s.replace('.', "");
    MONTH_NAME_FORMATS
        .iter()
        .find_map(|fmt| NaiveDate::parse_from_str(&cleaned, fmt).ok())
        .map(midnight)
}

/// Epoch seconds as used by Moodle; zero and negatives mean "unset".
pub fn from_epoch(secs: i64) -> Option<DateTime<Utc>> {
    if secs <= 0 {
        return None;
    }
    Utc.timestamp_opt(secs, 0).single()
}

/// Month-first, then day-first. Strict mode only accepts `/` with a 4-digit year.
fn parse_numeric(s: &str, loose: bool) -> Option<DateTime<Utc>> {
    let caps = RE_NUMERIC.captures(s)?;
    let sep = &caps[2];
    let year_raw = &caps[4];
    if !loose && (sep != "/" || year_raw.len() != 4) {
        return None;
    }
    let a: u32 = caps[1].parse().ok()?;
    let b: u32 = caps[3].parse().ok()?;
    let mut year: i32 = year_raw.parse().ok()?;
    if year_raw.len() == 2 {
        year += if year < 70 { 2000 } else { 1900 };
    }
    NaiveDate::from_ymd_opt(year, a, b)
        .or_else(|| NaiveDate::from_ymd_opt(year, b, a))
        .map(midnight)
}

fn midnight(d: NaiveDate) -> DateTime<Utc> {
    Utc.from_utc_datetime(&d.and_time(NaiveTime::MIN))
}

const DATE_TOKEN: &str =
    r"(\d{4}-\d{2}-\d{2}|\d{1,2}[/\-]\d{1,2}[/\-]\d{2,4}|[a-z]{3,9}\.? \d{1,2},? \d{4})";

/// Ordered battery used when an item has no structured due date.
static TEXT_PATTERNS: Lazy<Vec<Regex>> = Lazy::new(|| {
    let keyword = |kw: &str| Regex::new(&format!(r"\b{kw}[\s:]+{DATE_TOKEN}")).unwrap();
    vec![
        keyword("due"),
        keyword("deadline"),
        keyword("target"),
        keyword("delivery"),
        keyword(r"finish[\s:]by"),
        keyword(r"complete[\s:]by"),
        Regex::new(r"(\d{4}-\d{2}-\d{2})[\s:]+deadline").unwrap(),
        Regex::new(r"\b(\d{1,2}[/\-]\d{1,2}[/\-]\d{4})\b").unwrap(),
        Regex::new(r"\b(\d{1,2}[/\-]\d{1,2}[/\-]\d{2})\b").unwrap(),
    ]
});

/// First date found in free text (titles, bodies, card descriptions).
/// Patterns are tried in order; the first one that yields a valid date wins.
pub fn extract_due_date(text: &str) -> Option<DateTime<Utc>> {
    if text.trim().is_empty() {
        return None;
    }
    let lower = text.to_lowercase();
    TEXT_PATTERNS.iter().find_map(|re| {
        re.captures_iter(&lower)
            .find_map(|c| c.get(1).and_then(|m| parse_flexible_date(m.as_str())))
    })
}
