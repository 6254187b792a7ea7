//! Field rules for form steps.
//!
//! Shape checks are intentionally loose: they catch typos before a round trip,
//! the backend stays the authority.

use std::{
    collections::{BTreeMap, BTreeSet},
    sync::LazyLock,
};

use regex::Regex;
use uuid::Uuid;

pub const MIN_PASSWORD_LEN: usize = 8;

static EMAIL_REGEX: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r"^[^\s@]+@[^\s@]+\.[^\s@]+$").expect("EMAIL_REGEX is a valid regex pattern")
});

/// Optional `+CC` country prefix followed by 9 to 12 digits.
static PHONE_REGEX: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r"^(?:\+\d{1,3})?\d{9,12}$").expect("PHONE_REGEX is a valid regex pattern")
});

pub type Fields = BTreeMap<String, String>;
pub type Touched = BTreeSet<String>;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Rule {
    Required,
    Email,
    Phone,
    MinLength(usize),
    /// Must equal the named field once this field has been touched.
    Matches(&'static str),
    OneOf(&'static [&'static str]),
    Uuid,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct FieldSpec {
    pub name: &'static str,
    pub label: &'static str,
    pub rules: Vec<Rule>,
}

impl FieldSpec {
    pub fn new(name: &'static str, label: &'static str, rules: Vec<Rule>) -> Self {
        Self { name, label, rules }
    }

    pub fn is_required(&self) -> bool {
        self.rules.contains(&Rule::Required)
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct FieldError {
    pub field: String,
    pub message: String,
}

impl FieldError {
    pub fn new(field: impl Into<String>, message: impl Into<String>) -> Self {
        Self {
            field: field.into(),
            message: message.into(),
        }
    }
}

#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ValidationReport {
    errors: Vec<FieldError>,
}

impl ValidationReport {
    pub fn is_valid(&self) -> bool {
        self.errors.is_empty()
    }

    pub fn errors(&self) -> &[FieldError] {
        &self.errors
    }

    pub fn error_for(&self, field: &str) -> Option<&FieldError> {
        self.errors.iter().find(|err| err.field == field)
    }

    /// Errors worth showing inline: only fields the user has interacted with.
    pub fn visible(&self, touched: &Touched) -> Vec<FieldError> {
        self.errors
            .iter()
            .filter(|err| touched.contains(&err.field))
            .cloned()
            .collect()
    }

    pub fn into_errors(self) -> Vec<FieldError> {
        self.errors
    }
}

pub fn is_email(raw: &str) -> bool {
    EMAIL_REGEX.is_match(raw.trim())
}

pub fn is_phone(raw: &str) -> bool {
    let compact: String = raw
        .trim()
        .chars()
        .filter(|c| !matches!(c, ' ' | '-'))
        .collect();
    PHONE_REGEX.is_match(&compact)
}

/// Returns the first failing rule of `spec`, if any.
pub fn check_field(spec: &FieldSpec, fields: &Fields, touched: &Touched) -> Option<FieldError> {
    let value = fields.get(spec.name).map(String::as_str).unwrap_or_default();
    let trimmed = value.trim();

    for rule in &spec.rules {
        let message = match rule {
            Rule::Required if trimmed.is_empty() => format!("{} is required", spec.label),
            Rule::Required => continue,
            // Remaining rules only judge values that are present.
            _ if trimmed.is_empty() => continue,
            Rule::Email if !is_email(trimmed) => "Enter a valid email address".to_string(),
            Rule::Phone if !is_phone(trimmed) => {
                "Enter a valid phone number (optional +country code, 9-12 digits)".to_string()
            }
            Rule::MinLength(min) if value.chars().count() < *min => {
                format!("{} must be at least {min} characters", spec.label)
            }
            Rule::Matches(other) if touched.contains(spec.name) => {
                let other_value = fields.get(*other).map(String::as_str).unwrap_or_default();
                if value == other_value {
                    continue;
                }
                "Passwords do not match".to_string()
            }
            Rule::OneOf(allowed) if !allowed.iter().any(|a| a.eq_ignore_ascii_case(trimmed)) => {
                format!("{} must be one of: {}", spec.label, allowed.join(", "))
            }
            Rule::Uuid if Uuid::parse_str(trimmed).is_err() => {
                format!("{} is not a valid identifier", spec.label)
            }
            _ => continue,
        };
        return Some(FieldError::new(spec.name, message));
    }
    None
}

pub fn validate_fields(specs: &[FieldSpec], fields: &Fields, touched: &Touched) -> ValidationReport {
    ValidationReport {
        errors: specs
            .iter()
            .filter_map(|spec| check_field(spec, fields, touched))
            .collect(),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn fields(pairs: &[(&str, &str)]) -> Fields {
        pairs
            .iter()
            .map(|(k, v)| (k.to_string(), v.to_string()))
            .collect()
    }

    fn touched(names: &[&str]) -> Touched {
        names.iter().map(|name| name.to_string()).collect()
    }

    #[test]
    fn email_shape() {
        assert!(is_email("agent@simco.co.ke"));
        assert!(is_email(" user+tag@example.com "));
        assert!(!is_email("not-an-email"));
        assert!(!is_email("user@localhost"));
        assert!(!is_email("two words@example.com"));
    }

    #[test]
    fn phone_shape() {
        assert!(is_phone("0712345678"));
        assert!(is_phone("+254712345678"));
        assert!(is_phone("+254 712-345-678"));
        assert!(is_phone("712345678"));
        assert!(!is_phone("12345678"));
        assert!(!is_phone("+2547123456789012"));
        assert!(!is_phone("07123abc78"));
    }

    #[test]
    fn required_trims_whitespace() {
        let spec = FieldSpec::new("full_name", "Full name", vec![Rule::Required]);
        let err = check_field(&spec, &fields(&[("full_name", "   ")]), &Touched::new())
            .expect("blank is missing");
        assert_eq!(err.message, "Full name is required");
        assert!(check_field(&spec, &fields(&[("full_name", "Wanjiru")]), &Touched::new()).is_none());
    }

    #[test]
    fn optional_fields_skip_shape_rules_when_empty() {
        let spec = FieldSpec::new("team_id", "Team", vec![Rule::Uuid]);
        assert!(check_field(&spec, &Fields::new(), &Touched::new()).is_none());
        assert!(check_field(&spec, &fields(&[("team_id", "nope")]), &Touched::new()).is_some());
    }

    #[test]
    fn password_minimum_length() {
        let spec = FieldSpec::new(
            "password",
            "Password",
            vec![Rule::Required, Rule::MinLength(MIN_PASSWORD_LEN)],
        );
        let err = check_field(&spec, &fields(&[("password", "short")]), &Touched::new())
            .expect("too short");
        assert_eq!(err.message, "Password must be at least 8 characters");
        assert!(check_field(&spec, &fields(&[("password", "12345678")]), &Touched::new()).is_none());
    }

    #[test]
    fn confirmation_only_checked_once_touched() {
        let spec = FieldSpec::new(
            "confirm_password",
            "Confirm password",
            vec![Rule::Matches("password")],
        );
        let values = fields(&[("password", "longenough"), ("confirm_password", "different")]);

        assert!(check_field(&spec, &values, &Touched::new()).is_none());
        let err = check_field(&spec, &values, &touched(&["confirm_password"]))
            .expect("mismatch once touched");
        assert_eq!(err.message, "Passwords do not match");
    }

    #[test]
    fn visible_errors_follow_touched_fields() {
        let specs = vec![
            FieldSpec::new("full_name", "Full name", vec![Rule::Required]),
            FieldSpec::new("email", "Email", vec![Rule::Required, Rule::Email]),
        ];
        let values = fields(&[("email", "not-an-email")]);
        let report = validate_fields(&specs, &values, &touched(&["email"]));

        assert!(!report.is_valid());
        assert_eq!(report.errors().len(), 2);
        let visible = report.visible(&touched(&["email"]));
        assert_eq!(visible, vec![FieldError::new("email", "Enter a valid email address")]);
    }
}
