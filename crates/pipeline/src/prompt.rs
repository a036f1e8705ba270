//! Prompt template rendering
//!
//! Templates use double-brace placeholders (`{{query}}`, `{{contexts}}`,
//! `{{current_time}}`, `{{current_week}}`, `{{yesterday}}`,
//! `{{conversation}}`, `{{knowledge_bases}}`, `{{web_search_status}}`).
//! Rendering is plain substitution; unknown placeholders are left intact.

use chrono::{DateTime, Datelike, Duration, Utc};
use ragline_common::types::HistoryTurn;

/// Substitute each `{{name}}` placeholder with its value
pub fn render(template: &str, vars: &[(&str, String)]) -> String {
    let mut out = template.to_string();
    for (name, value) in vars {
        out = out.replace(&format!("{{{{{name}}}}}"), value);
    }
    out
}

/// Time placeholders for a given instant
pub fn time_vars(now: DateTime<Utc>) -> Vec<(&'static str, String)> {
    let weekday = match now.weekday() {
        chrono::Weekday::Mon => "Monday",
        chrono::Weekday::Tue => "Tuesday",
        chrono::Weekday::Wed => "Wednesday",
        chrono::Weekday::Thu => "Thursday",
        chrono::Weekday::Fri => "Friday",
        chrono::Weekday::Sat => "Saturday",
        chrono::Weekday::Sun => "Sunday",
    };
    vec![
        ("current_time", now.format("%Y-%m-%d %H:%M:%S").to_string()),
        ("current_week", weekday.to_string()),
        ("yesterday", (now - Duration::days(1)).format("%Y-%m-%d").to_string()),
    ]
}

/// History rendered as a plain transcript for `{{conversation}}`
pub fn conversation_text(history: &[HistoryTurn]) -> String {
    history
        .iter()
        .map(|turn| format!("User: {}\nAssistant: {}", turn.query, turn.answer))
        .collect::<Vec<_>>()
        .join("\n")
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::TimeZone;

    #[test]
    fn test_render_substitutes_all_occurrences() {
        let out = render(
            "Q: {{query}} again {{query}}, missing {{unknown}}",
            &[("query", "hi".to_string())],
        );
        assert_eq!(out, "Q: hi again hi, missing {{unknown}}");
    }

    #[test]
    fn test_time_vars() {
        // 2026-08-23 is a Sunday
        let now = Utc.with_ymd_and_hms(2026, 8, 23, 9, 30, 0).unwrap();
        let vars = time_vars(now);
        let lookup = |k: &str| vars.iter().find(|(n, _)| *n == k).map(|(_, v)| v.clone());
        assert_eq!(lookup("current_time").unwrap(), "2026-08-23 09:30:00");
        assert_eq!(lookup("current_week").unwrap(), "Sunday");
        assert_eq!(lookup("yesterday").unwrap(), "2026-08-22");
    }

    #[test]
    fn test_conversation_text() {
        let history = vec![HistoryTurn {
            query: "hello".to_string(),
            answer: "hi there".to_string(),
            created_at: Utc::now(),
            knowledge_references: Vec::new(),
        }];
        assert_eq!(conversation_text(&history), "User: hello\nAssistant: hi there");
    }
}
