//! `{{token}}` placeholder expansion for card text.

use chrono::{Datelike, Local, NaiveDateTime};

const WEEKDAYS: [&str; 7] = [
    "Sunday",
    "Monday",
    "Tuesday",
    "Wednesday",
    "Thursday",
    "Friday",
    "Saturday",
];

/// Runtime values substituted into card text.
#[derive(Debug, Clone)]
pub struct MacroContext {
    pub user_name: String,
    pub char_name: String,
    pub now: NaiveDateTime,
}

impl MacroContext {
    pub fn new(user_name: impl Into<String>, char_name: impl Into<String>) -> Self {
        Self {
            user_name: user_name.into(),
            char_name: char_name.into(),
            now: Local::now().naive_local(),
        }
    }

    pub fn at(mut self, now: NaiveDateTime) -> Self {
        self.now = now;
        self
    }

    fn rules(&self) -> [(&'static str, String); 5] {
        [
            ("{{user}}", self.user_name.clone()),
            ("{{char}}", self.char_name.clone()),
            ("{{time}}", self.now.format("%X").to_string()),
            ("{{date}}", self.now.format("%x").to_string()),
            (
                "{{day}}",
                WEEKDAYS[self.now.weekday().num_days_from_sunday() as usize].to_string(),
            ),
        ]
    }
}

/// Replace every known placeholder in `text`. Missing text expands to "".
pub fn expand(text: Option<&str>, ctx: &MacroContext) -> String {
    let Some(text) = text else {
        return String::new();
    };

    ctx.rules()
        .iter()
        .fold(text.to_string(), |acc, (macro_, value)| acc.replace(macro_, value))
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::NaiveDate;

    fn ctx() -> MacroContext {
        // 2024-03-17 was a Sunday
        let now = NaiveDate::from_ymd_opt(2024, 3, 17)
            .unwrap()
            .and_hms_opt(14, 5, 9)
            .unwrap();
        MacroContext::new("Alice", "Bot").at(now)
    }

    #[test]
    fn test_names_replaced_globally() {
        let out = expand(Some("{{user}} meets {{char}}. {{char}} waves at {{user}}."), &ctx());
        assert_eq!(out, "Alice meets Bot. Bot waves at Alice.");
    }

    #[test]
    fn test_none_is_empty() {
        assert_eq!(expand(None, &ctx()), "");
    }

    #[test]
    fn test_day_uses_sunday_first_table() {
        assert_eq!(expand(Some("Today is {{day}}"), &ctx()), "Today is Sunday");

        let monday = ctx().at(
            NaiveDate::from_ymd_opt(2024, 3, 18)
                .unwrap()
                .and_hms_opt(0, 0, 0)
                .unwrap(),
        );
        assert_eq!(expand(Some("{{day}}"), &monday), "Monday");
    }

    #[test]
    fn test_time_and_date_have_no_leftover_braces() {
        let out = expand(Some("{{time}} {{date}}"), &ctx());
        assert!(!out.contains("{{"));
        assert!(out.contains("14:05:09"));
    }

    #[test]
    fn test_unknown_tokens_untouched() {
        assert_eq!(expand(Some("{{mood}} {{user}}"), &ctx()), "{{mood}} Alice");
    }
}
