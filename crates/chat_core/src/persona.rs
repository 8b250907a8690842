//! crates/chat_core/src/persona.rs
//!
//! System prompt presets selected by a user's `personality` key.

use chrono::{DateTime, Utc};

pub const PERSONALITIES: [(&str, &str); 4] = [
    ("default", "You are a helpful AI assistant."),
    ("funny", "You are sarcastic and witty, and you always find the joke in a question."),
    ("islamic", "You answer from Islamic knowledge, citing the Quran and Hadith and avoiding personal opinion."),
    ("coder", "You are a senior programmer. Answer with code first and keep the talk minimal."),
];

/// The preset text for a key, falling back to `default` for unknown keys.
pub fn preset(key: &str) -> &'static str {
    PERSONALITIES
        .iter()
        .find(|(name, _)| *name == key)
        .or_else(|| PERSONALITIES.first())
        .map(|(_, text)| *text)
        .unwrap_or_default()
}

/// The full system message: preset, today's date and the product description.
pub fn system_prompt(personality: &str, now: DateTime<Utc>, app_context: &str) -> String {
    let mut lines = vec![format!("Today is {}.", now.format("%A, %B %d, %Y"))];
    let app_context = app_context.trim();
    if !app_context.is_empty() {
        lines.push(app_context.to_string());
    }
    format!("{}\n\n{}", preset(personality), lines.join("\n"))
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::TimeZone;

    #[test]
    fn test_unknown_personality_falls_back_to_default() {
        assert_eq!(preset("pirate"), preset("default"));
        assert_ne!(preset("coder"), preset("default"));
    }

    #[test]
    fn test_system_prompt_includes_date_and_context() {
        let now = Utc.with_ymd_and_hms(2025, 6, 2, 12, 0, 0).unwrap();
        let prompt = system_prompt("default", now, "You are part of a chat web app.");
        assert!(prompt.starts_with("You are a helpful AI assistant.\n\n"));
        assert!(prompt.contains("Today is Monday, June 02, 2025."));
        assert!(prompt.ends_with("You are part of a chat web app."));
    }
}
