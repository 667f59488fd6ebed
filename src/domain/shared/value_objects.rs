//! Shared value objects used across multiple bounded contexts

use super::error::DomainError;
use serde::{Deserialize, Serialize};
use std::fmt;

/// Provider-assigned call identifier (Twilio `CallSid`)
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(transparent)]
pub struct CallSid(String);

impl CallSid {
    /// Parse a call identifier, rejecting blank values
    pub fn parse(value: &str) -> Result<Self, DomainError> {
        let trimmed = value.trim();
        if trimmed.is_empty() {
            return Err(DomainError::ValidationError(
                "call identifier cannot be empty".to_string(),
            ));
        }
        if trimmed.chars().any(|c| c.is_whitespace() || c.is_control()) {
            return Err(DomainError::ValidationError(format!(
                "call identifier contains invalid characters: {:?}",
                trimmed
            )));
        }
        Ok(Self(trimmed.to_string()))
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for CallSid {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

/// Provider-assigned media stream identifier (Twilio `streamSid`)
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct StreamSid(String);

impl StreamSid {
    pub fn new(value: impl Into<String>) -> Self {
        Self(value.into())
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for StreamSid {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

/// Telephone number in E.164 form
///
/// A leading `+`, a non-zero country code digit and at most fifteen digits
/// in total. Whitespace, dashes, dots and parentheses used as visual
/// separators are stripped before validation.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(try_from = "String", into = "String")]
pub struct PhoneNumber(String);

impl PhoneNumber {
    pub fn parse(input: &str) -> Result<Self, DomainError> {
        let trimmed = input.trim();
        if trimmed.is_empty() {
            return Err(DomainError::ValidationError(
                "phone number cannot be empty".to_string(),
            ));
        }

        let digits_part = trimmed.strip_prefix('+').ok_or_else(|| {
            DomainError::ValidationError(format!(
                "phone number {:?} must be in E.164 form (e.g. +15551234567)",
                trimmed
            ))
        })?;

        let mut digits = String::with_capacity(digits_part.len());
        for (i, ch) in digits_part.chars().enumerate() {
            match ch {
                '0'..='9' => digits.push(ch),
                ' ' | '-' | '.' | '(' | ')' => {}
                _ => {
                    return Err(DomainError::ValidationError(format!(
                        "invalid character {:?} at position {} in phone number {:?}",
                        ch,
                        i + 1,
                        trimmed
                    )))
                }
            }
        }

        if digits.len() < 2 || digits.len() > 15 {
            return Err(DomainError::ValidationError(format!(
                "phone number {:?} must have between 2 and 15 digits",
                trimmed
            )));
        }
        if digits.starts_with('0') {
            return Err(DomainError::ValidationError(format!(
                "phone number {:?} has an invalid country code",
                trimmed
            )));
        }

        Ok(Self(format!("+{}", digits)))
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl TryFrom<String> for PhoneNumber {
    type Error = DomainError;

    fn try_from(value: String) -> Result<Self, Self::Error> {
        Self::parse(&value)
    }
}

impl From<PhoneNumber> for String {
    fn from(number: PhoneNumber) -> Self {
        number.0
    }
}

impl fmt::Display for PhoneNumber {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}
