// src/scrape/priority.rs
use crate::model::Priority;
use chrono::{DateTime, Utc};

/// Map a remote priority label onto the canonical scale.
/// Case-insensitive and trimmed; anything unrecognized is `Medium`.
pub fn normalize_priority(raw: &str) -> Priority {
    match raw.trim().to_ascii_lowercase().as_str() {
        "low" | "1" | "minor" | "trivial" | "p3" | "p4" => Priority::Low,
        "medium" | "2" | "p2" => Priority::Medium,
        "high" | "3" | "major" | "p1" => Priority::High,
        "urgent" | "critical" | "4" | "5" | "blocker" | "p0" => Priority::Urgent,
        _ => Priority::Medium,
    }
}

/// Whole days until `due`, floored (an item due in 36h is 1 day away, one due 2h ago is -1).
pub fn days_until(due: DateTime<Utc>, now: DateTime<Utc>) -> i64 {
    (due - now).num_seconds().div_euclid(86_400)
}

/// LMS urgency: the closer the due date, the higher the priority.
pub fn priority_from_due(due: DateTime<Utc>, now: DateTime<Utc>) -> Priority {
    match days_until(due, now) {
        d if d <= 1 => Priority::Urgent,
        d if d <= 3 => Priority::High,
        d if d <= 7 => Priority::Medium,
        _ => Priority::Low,
    }
}

/// LMS items more than a day past due are not worth syncing.
pub fn is_long_past(due: DateTime<Utc>, now: DateTime<Utc>) -> bool {
    (now - due).num_seconds() > 86_400
}

/// Keyword-contains match against a list of labels. Used by the label
/// heuristics of the tracker adapters.
pub fn any_label_contains(labels: &[String], keywords: &[&str]) -> bool {
    labels.iter().any(|l| {
        let l = l.to_lowercase();
        keywords.iter().any(|k| l.contains(k))
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::Duration;

    #[test]
    fn full_table_normalizes() {
        let table = [
            ("low", Priority::Low),
            ("medium", Priority::Medium),
            ("high", Priority::High),
            ("urgent", Priority::Urgent),
            ("critical", Priority::Urgent),
            ("1", Priority::Low),
            ("2", Priority::Medium),
            ("3", Priority::High),
            ("4", Priority::Urgent),
            ("5", Priority::Urgent),
            ("minor", Priority::Low),
            ("trivial", Priority::Low),
            ("major", Priority::High),
            ("blocker", Priority::Urgent),
            ("p0", Priority::Urgent),
            ("p1", Priority::High),
            ("p2", Priority::Medium),
            ("p3", Priority::Low),
            ("p4", Priority::Low),
        ];
        for (raw, want) in table {
            assert_eq!(normalize_priority(raw), want, "{raw}");
        }
    }

    #[test]
    fn case_and_whitespace_are_ignored() {
        assert_eq!(normalize_priority("  CRITICAL "), Priority::Urgent);
        assert_eq!(normalize_priority("P1"), Priority::High);
    }

    #[test]
    fn unknown_is_medium() {
        for raw in ["", "whenever", "p9", "highest-ish"] {
            assert_eq!(normalize_priority(raw), Priority::Medium, "{raw:?}");
        }
    }

    #[test]
    fn proximity_bands() {
        let now = Utc::now();
        assert_eq!(priority_from_due(now + Duration::hours(30), now), Priority::Urgent);
        assert_eq!(priority_from_due(now - Duration::hours(2), now), Priority::Urgent);
        assert_eq!(priority_from_due(now + Duration::hours(60), now), Priority::High);
        assert_eq!(priority_from_due(now + Duration::days(5), now), Priority::Medium);
        assert_eq!(priority_from_due(now + Duration::days(10), now), Priority::Low);
    }

    #[test]
    fn long_past_threshold_is_one_day() {
        let now = Utc::now();
        assert!(!is_long_past(now - Duration::hours(20), now));
        assert!(is_long_past(now - Duration::hours(30), now));
    }

    #[test]
    fn label_keywords_match_substrings() {
        let labels = vec!["Priority: High".to_string(), "docs".to_string()];
        assert!(any_label_contains(&labels, &["high"]));
        assert!(!any_label_contains(&labels, &["blocker"]));
    }
}
