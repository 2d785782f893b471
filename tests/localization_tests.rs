//! # Localization Tests
//!
//! This module contains unit tests for the localization functionality,
//! testing message retrieval and formatting with various edge cases.

use course_cost_bot::localization::{t_args_lang, t_lang, LocalizationManager};
use std::collections::HashMap;

#[cfg(test)]
mod tests {
    use super::*;

    fn setup_localization() -> LocalizationManager {
        // Create a new localization manager for each test
        LocalizationManager::new().expect("Failed to create localization manager")
    }

    #[test]
    fn test_get_message_existing_key() {
        let manager = setup_localization();

        let message = manager.get_message_in_language("ask-height", "en", None);
        assert!(!message.is_empty());
        assert!(!message.starts_with("Missing"));
    }

    #[test]
    fn test_get_message_nonexistent_key() {
        let manager = setup_localization();

        let message = manager.get_message_in_language("nonexistent-key", "en", None);
        assert!(message.starts_with("Missing translation:"));
    }

    #[test]
    fn test_get_message_unsupported_language() {
        let manager = setup_localization();

        let message = manager.get_message_in_language("ask-height", "unsupported", None);
        // Should fall back to Russian
        let russian_message = manager.get_message_in_language("ask-height", "ru", None);
        assert_eq!(message, russian_message);
    }

    #[test]
    fn test_get_message_with_args() {
        let manager = setup_localization();

        let mut args = HashMap::new();
        args.insert("price", "12345,60");

        let message = manager.get_message_in_language("price-estimate", "en", Some(&args));
        assert!(message.contains("12345,60"));
    }

    #[test]
    fn test_get_message_missing_args() {
        let manager = setup_localization();

        // Missing arguments must not panic
        let message = manager.get_message_in_language("welcome-greeting", "ru", None);
        assert!(!message.is_empty());
    }

    #[test]
    fn test_english_differs_from_russian() {
        let manager = setup_localization();

        let english = manager.get_message_in_language("final-message", "en", None);
        let russian = manager.get_message_in_language("final-message", "ru", None);
        assert_ne!(english, russian);
    }

    #[test]
    fn test_regional_language_codes() {
        assert_eq!(LocalizationManager::resolve_language(Some("en-US")), "en");
        assert_eq!(LocalizationManager::resolve_language(Some("EN")), "en");
        assert_eq!(LocalizationManager::resolve_language(Some("uk")), "ru");
        assert_eq!(LocalizationManager::resolve_language(None), "ru");
    }

    #[test]
    fn test_global_helpers() {
        let greeting = t_args_lang("welcome-greeting", &[("name", "Анна")], Some("en"));
        assert!(greeting.contains("Анна"));
        assert_eq!(t_lang("button-yes", None), t_lang("button-yes", Some("ru")));
    }
}
