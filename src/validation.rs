// Field-level form validation, run before any backend call
use serde::Serialize;
use std::fmt;

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct FieldError {
    pub field: &'static str,
    pub message: &'static str,
}

/// All violations found in a form, in field order
#[derive(Debug, Clone, PartialEq, Eq, Default, Serialize)]
#[serde(transparent)]
pub struct ValidationErrors(pub Vec<FieldError>);

impl ValidationErrors {
    pub fn is_empty(&self) -> bool {
        self.0.is_empty()
    }

    pub fn for_field(&self, field: &str) -> Option<&'static str> {
        self.0.iter().find(|e| e.field == field).map(|e| e.message)
    }

    fn push(&mut self, field: &'static str, message: &'static str) {
        self.0.push(FieldError { field, message });
    }

    fn into_result(self) -> Result<(), ValidationErrors> {
        if self.is_empty() {
            Ok(())
        } else {
            Err(self)
        }
    }
}

impl fmt::Display for ValidationErrors {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let parts: Vec<String> = self
            .0
            .iter()
            .map(|e| format!("{}: {}", e.field, e.message))
            .collect();
        write!(f, "{}", parts.join("; "))
    }
}

impl std::error::Error for ValidationErrors {}

const MIN_2: &str = "Minimum 2 characters are allowed";
const MIN_8: &str = "Minimum 8 characters are allowed";
const BAD_EMAIL: &str = "Please enter a valid email";

fn char_len(s: &str) -> usize {
    s.chars().count()
}

pub fn is_valid_email(email: &str) -> bool {
    if email.chars().any(char::is_whitespace) {
        return false;
    }
    let Some((local, domain)) = email.split_once('@') else {
        return false;
    };
    if local.is_empty() || domain.contains('@') {
        return false;
    }
    let labels: Vec<&str> = domain.split('.').collect();
    labels.len() >= 2 && labels.iter().all(|label| !label.is_empty())
}

pub fn validate_sign_up(
    name: &str,
    username: &str,
    email: &str,
    password: &str,
) -> Result<(), ValidationErrors> {
    let mut errors = ValidationErrors::default();
    if char_len(name) < 2 {
        errors.push("name", MIN_2);
    }
    if char_len(username) < 2 {
        errors.push("username", MIN_2);
    }
    if !is_valid_email(email) {
        errors.push("email", BAD_EMAIL);
    }
    if char_len(password) < 8 {
        errors.push("password", MIN_8);
    }
    errors.into_result()
}

pub fn validate_sign_in(email: &str, password: &str) -> Result<(), ValidationErrors> {
    let mut errors = ValidationErrors::default();
    if !is_valid_email(email) {
        errors.push("email", BAD_EMAIL);
    }
    if char_len(password) < 8 {
        errors.push("password", MIN_8);
    }
    errors.into_result()
}

/// `has_file` is false when creating a post without choosing an image.
pub fn validate_post(
    caption: &str,
    location: &str,
    has_file: bool,
) -> Result<(), ValidationErrors> {
    let mut errors = ValidationErrors::default();
    match char_len(caption) {
        n if n < 5 => errors.push("caption", "Minimum 5 characters."),
        n if n > 2200 => errors.push("caption", "Maximum 2,200 characters"),
        _ => {}
    }
    if !has_file {
        errors.push("file", "This field is required");
    }
    match char_len(location) {
        0 => errors.push("location", "This field is required"),
        1 => errors.push("location", "Minimum 2 characters."),
        n if n > 100 => errors.push("location", "Maximum 100 characters."),
        _ => {}
    }
    errors.into_result()
}

pub fn validate_profile(name: &str, username: &str, email: &str) -> Result<(), ValidationErrors> {
    let mut errors = ValidationErrors::default();
    if char_len(name) < 2 {
        errors.push("name", MIN_2);
    }
    if char_len(username) < 2 {
        errors.push("username", MIN_2);
    }
    if !is_valid_email(email) {
        errors.push("email", BAD_EMAIL);
    }
    errors.into_result()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn sign_up_accepts_values_at_the_bounds() {
        assert!(validate_sign_up("Al", "al", "al@example.com", "12345678").is_ok());
    }

    #[test]
    fn sign_up_reports_each_violated_field() {
        let errors = validate_sign_up("A", "b", "not-an-email", "short").unwrap_err();
        assert_eq!(errors.0.len(), 4);
        assert_eq!(errors.for_field("name"), Some(MIN_2));
        assert_eq!(errors.for_field("username"), Some(MIN_2));
        assert_eq!(errors.for_field("email"), Some(BAD_EMAIL));
        assert_eq!(errors.for_field("password"), Some(MIN_8));
    }

    #[test]
    fn sign_up_rejects_only_the_bad_field() {
        let errors = validate_sign_up("Ada", "ada", "ada@example.com", "1234567").unwrap_err();
        assert_eq!(errors.0, vec![FieldError {
            field: "password",
            message: MIN_8
        }]);
    }

    #[test]
    fn lengths_count_characters_not_bytes() {
        assert!(validate_sign_up("Zoë", "éé", "z@example.com", "pässwörd").is_ok());
        assert!(validate_sign_up("é", "ab", "z@example.com", "password").is_err());
    }

    #[test]
    fn email_shapes() {
        assert!(is_valid_email("a@b.co"));
        assert!(is_valid_email("first.last+tag@mail.example.org"));
        assert!(!is_valid_email("a@b"));
        assert!(!is_valid_email("@b.co"));
        assert!(!is_valid_email("a@@b.co"));
        assert!(!is_valid_email("a @b.co"));
        assert!(!is_valid_email("a@b..co"));
    }

    #[test]
    fn post_requires_file_and_bounds() {
        let errors = validate_post("hey", "X", false).unwrap_err();
        assert_eq!(errors.for_field("caption"), Some("Minimum 5 characters."));
        assert_eq!(errors.for_field("file"), Some("This field is required"));
        assert_eq!(errors.for_field("location"), Some("Minimum 2 characters."));

        let long = "x".repeat(2201);
        let errors = validate_post(&long, "Porto", true).unwrap_err();
        assert_eq!(errors.for_field("caption"), Some("Maximum 2,200 characters"));

        assert!(validate_post("hello world", "Porto", true).is_ok());
    }

    #[test]
    fn profile_validation() {
        assert!(validate_profile("Ada", "ada", "ada@example.com").is_ok());
        let errors = validate_profile("Ada", "a", "ada").unwrap_err();
        assert_eq!(errors.0.len(), 2);
    }
}
