//! Form dialogue module: per-chat conversation state and input validators.

use lazy_static::lazy_static;
use regex::Regex;
use serde::{Deserialize, Serialize};
use teloxide::dispatching::dialogue::{Dialogue, ErasedStorage};

use crate::pricing::body_surface_area;

/// Steps of the cost estimation form, in the order they are asked
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
pub enum FormStep {
    #[default]
    Initial,
    Height,
    Weight,
    Category,
    Nosology,
    Course,
    CustomCourse,
    DataConfirmation,
    ContactsInput,
    FirstName,
    LastName,
    Email,
    PhoneNumber,
    LeadConfirmation,
}

/// Everything collected so far; every field is filled by its own step
#[derive(Clone, Debug, Default, PartialEq, Serialize, Deserialize)]
pub struct FormData {
    pub height: Option<u32>,
    pub weight: Option<u32>,
    pub category_id: Option<String>,
    pub nosology_id: Option<String>,
    pub course_id: Option<String>,
    pub course_name: Option<String>,
    #[serde(default)]
    pub is_custom_course: bool,
    pub first_name: Option<String>,
    pub last_name: Option<String>,
    pub email: Option<String>,
    pub phone_number: Option<String>,
}

impl FormData {
    /// Body surface area, once both height and weight are known
    pub fn bsa(&self) -> Option<f64> {
        Some(body_surface_area(self.height?, self.weight?))
    }

    pub fn clear_course(&mut self) {
        self.course_id = None;
        self.course_name = None;
        self.is_custom_course = false;
    }

    pub fn clear_contacts(&mut self) {
        self.first_name = None;
        self.last_name = None;
        self.email = None;
        self.phone_number = None;
    }
}

/// Conversation state stored per chat
#[derive(Clone, Debug, Default, PartialEq, Serialize, Deserialize)]
pub struct FormState {
    pub step: FormStep,
    #[serde(default)]
    pub data: FormData,
}

impl FormState {
    pub fn at(step: FormStep, data: FormData) -> Self {
        Self { step, data }
    }
}

/// Type alias for the form dialogue over any storage backend
pub type FormDialogue = Dialogue<FormState, ErasedStorage<FormState>>;

lazy_static! {
    static ref EMAIL_REGEX: Regex =
        Regex::new(r"^[^@\s]+@[^@\s]+\.[^@\s]+$").expect("Email pattern should be valid");
}

const MAX_NAME_LEN: usize = 255;

/// Validates a height or weight input: plain positive integer
pub fn validate_body_measure(text: &str) -> Result<u32, &'static str> {
    let trimmed = text.trim();

    if trimmed.is_empty() || !trimmed.chars().all(|c| c.is_ascii_digit()) {
        return Err("not_a_number");
    }

    match trimmed.parse::<u32>() {
        Ok(0) => Err("zero"),
        Ok(value) => Ok(value),
        Err(_) => Err("too_large"),
    }
}

/// Validates an email address
pub fn validate_email(text: &str) -> Result<String, &'static str> {
    let trimmed = text.trim();
    if EMAIL_REGEX.is_match(trimmed) {
        Ok(trimmed.to_string())
    } else {
        Err("invalid_email")
    }
}

/// Validates a phone number: optional `+`, digits and common separators
pub fn validate_phone_number(text: &str) -> Result<String, &'static str> {
    let trimmed = text.trim();
    let body = trimmed.strip_prefix('+').unwrap_or(trimmed);

    if !body
        .chars()
        .all(|c| c.is_ascii_digit() || matches!(c, ' ' | '-' | '(' | ')'))
    {
        return Err("invalid_characters");
    }

    let digits = body.chars().filter(|c| c.is_ascii_digit()).count();
    if !(7..=15).contains(&digits) {
        return Err("invalid_length");
    }

    Ok(trimmed.to_string())
}

/// Validates a first or last name
pub fn validate_name(name: &str) -> Result<String, &'static str> {
    let trimmed = name.trim();

    if trimmed.is_empty() {
        return Err("empty");
    }

    if trimmed.chars().count() > MAX_NAME_LEN {
        return Err("too_long");
    }

    Ok(trimmed.to_string())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_body_measure_validation() {
        assert_eq!(validate_body_measure("180"), Ok(180));
        assert_eq!(validate_body_measure(" 75 "), Ok(75));

        assert!(validate_body_measure("").is_err());
        assert!(validate_body_measure("0").is_err());
        assert!(validate_body_measure("-5").is_err());
        assert!(validate_body_measure("1.80").is_err());
        assert!(validate_body_measure("сто").is_err());
        assert!(validate_body_measure("99999999999").is_err());
    }

    #[test]
    fn test_email_validation() {
        assert_eq!(validate_email(" ivan@example.com "), Ok("ivan@example.com".to_string()));
        assert!(validate_email("ivan@example").is_err());
        assert!(validate_email("ivan example@mail.ru").is_err());
        assert!(validate_email("@mail.ru").is_err());
    }

    #[test]
    fn test_phone_number_validation() {
        assert!(validate_phone_number("+7 (999) 123-45-67").is_ok());
        assert!(validate_phone_number("89991234567").is_ok());

        assert!(validate_phone_number("12345").is_err());
        assert!(validate_phone_number("+7 999 abc 45 67").is_err());
        assert!(validate_phone_number("1234567890123456").is_err());
    }

    #[test]
    fn test_name_validation() {
        assert_eq!(validate_name("  Анна  "), Ok("Анна".to_string()));
        assert!(validate_name("   ").is_err());
        assert!(validate_name(&"я".repeat(255)).is_ok());
        assert!(validate_name(&"я".repeat(256)).is_err());
    }

    #[test]
    fn test_bsa_needs_both_measures() {
        let mut data = FormData {
            height: Some(180),
            ..Default::default()
        };
        assert!(data.bsa().is_none());
        data.weight = Some(80);
        assert!((data.bsa().unwrap() - 2.0).abs() < 1e-9);
    }

    #[test]
    fn test_state_serialization_shape() {
        let state = FormState::at(
            FormStep::Weight,
            FormData {
                height: Some(170),
                ..Default::default()
            },
        );
        let json = serde_json::to_string(&state).unwrap();
        let back: FormState = serde_json::from_str(&json).unwrap();
        assert_eq!(back, state);

        // states written before a field existed still load
        let legacy: FormState = serde_json::from_str(r#"{"step":"Height"}"#).unwrap();
        assert_eq!(legacy.step, FormStep::Height);
        assert_eq!(legacy.data, FormData::default());
    }
}
