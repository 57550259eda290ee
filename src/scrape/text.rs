// src/scrape/text.rs
use once_cell::sync::OnceCell;
use regex::Regex;

/// Clean HTML-ish portal text: strip tags, decode entities, normalize
/// typographic quotes, collapse whitespace.
pub fn clean_html(s: &str) -> String {
    // 1) Strip tags (block-level ones become spaces so words don't glue together).
    // Before decoding, so escaped `&lt;b&gt;` survives as literal text.
    static RE_TAGS: OnceCell<Regex> = OnceCell::new();
    let re_tags = RE_TAGS.get_or_init(|| Regex::new(r"(?is)</?[^>]+>").unwrap());
    let stripped = re_tags.replace_all(s, " ");

    // 2) HTML entity decode
    let mut out = html_escape::decode_html_entities(&stripped).to_string();

    // 3) Normalize “ ” ‘ ’ « » to ASCII quotes
    out = out
        .replace(['\u{201C}', '\u{201D}', '\u{00AB}', '\u{00BB}'], "\"")
        .replace(['\u{2018}', '\u{2019}'], "'");

    collapse_ws(&out)
}

/// Collapse runs of whitespace into single spaces and trim.
pub fn collapse_ws(s: &str) -> String {
    static RE_WS: OnceCell<Regex> = OnceCell::new();
    let re_ws = RE_WS.get_or_init(|| Regex::new(r"\s+").unwrap());
    re_ws.replace_all(s, " ").trim().to_string()
}

/// Cap at `max` chars, appending `...` when something was cut.
pub fn truncate(s: &str, max: usize) -> String {
    if s.chars().count() <= max {
        return s.to_string();
    }
    let mut out: String = s.chars().take(max).collect();
    out.push_str("...");
    out
}

/// Lowercase slug for tags: `"Sprint Board #2"` -> `"sprint-board-2"`.
pub fn slugify(s: &str) -> String {
    let mut out = String::with_capacity(s.len());
    let mut dash = false;
    for c in s.chars() {
        if c.is_alphanumeric() {
            out.extend(c.to_lowercase());
            dash = false;
        } else if !dash && !out.is_empty() {
            out.push('-');
            dash = true;
        }
    }
    while out.ends_with('-') {
        out.pop();
    }
    out
}

/// Effort estimate from prose: `4h`, `6 hrs`, `estimate: 6 hours`, `effort 3h`.
/// Only values in 1..=1000 count.
pub fn extract_hours(text: &str) -> Option<u32> {
    static RE_HOURS: OnceCell<Vec<Regex>> = OnceCell::new();
    let patterns = RE_HOURS.get_or_init(|| {
        [
            r"(?:estimate|effort|time)[:\s]+(\d+)\s*h(?:ours?|rs?)?\b",
            r"\b(\d+)\s*h(?:ours?|rs?)?\b",
        ]
        .iter()
        .map(|p| Regex::new(p).unwrap())
        .collect()
    });
    let lower = text.to_lowercase();
    patterns.iter().find_map(|re| {
        re.captures_iter(&lower)
            .filter_map(|c| c[1].parse::<u32>().ok())
            .find(|h| (1..=1000).contains(h))
    })
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn clean_html_strips_tags_and_entities() {
        let s = "<p>Read&nbsp;chapter&nbsp;3</p><p>Submit &ldquo;essay&rdquo;</p>";
        assert_eq!(clean_html(s), "Read chapter 3 Submit \"essay\"");
    }

    #[test]
    fn escaped_markup_stays_as_text() {
        assert_eq!(clean_html("Use &lt;b&gt; for bold"), "Use <b> for bold");
        assert_eq!(clean_html("<i>1 &lt; 2</i>"), "1 < 2");
    }

    #[test]
    fn truncate_marks_cut_text() {
        assert_eq!(truncate("short", 10), "short");
        assert_eq!(truncate("abcdefghij", 4), "abcd...");
        // multi-byte safe
        assert_eq!(truncate("čšřžýáíé", 3), "čšř...");
    }

    #[test]
    fn slugify_board_names() {
        assert_eq!(slugify("Sprint Board #2"), "sprint-board-2");
        assert_eq!(slugify("  --Team  "), "team");
    }

    #[test]
    fn hours_from_descriptions() {
        assert_eq!(extract_hours("Estimate: 6 hours of work"), Some(6));
        assert_eq!(extract_hours("roughly 4h"), Some(4));
        assert_eq!(extract_hours("takes 3 hrs"), Some(3));
        assert_eq!(extract_hours("0h then 5000h"), None);
        assert_eq!(extract_hours("no numbers"), None);
    }
}
