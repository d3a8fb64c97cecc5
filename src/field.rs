//! Field values and per-field UI state.
use serde::{Deserialize, Serialize};

#[derive(
    Debug, Clone, PartialEq, Eq, Default, Serialize, Deserialize, minicbor::Encode, minicbor::Decode,
)]
pub enum FieldValue {
    #[default]
    #[n(0)]
    Empty,
    #[n(1)]
    Text(#[n(0)] String),
    #[n(2)]
    Flag(#[n(0)] bool),
}

impl FieldValue {
    pub fn text(value: impl Into<String>) -> Self {
        let value = value.into();
        if value.is_empty() {
            FieldValue::Empty
        } else {
            FieldValue::Text(value)
        }
    }

    pub fn as_str(&self) -> &str {
        match self {
            FieldValue::Text(s) => s,
            _ => "",
        }
    }

    /// Non-empty after trimming, or a checked flag.
    pub fn is_filled(&self) -> bool {
        match self {
            FieldValue::Empty => false,
            FieldValue::Text(s) => !s.trim().is_empty(),
            FieldValue::Flag(b) => *b,
        }
    }

    pub fn is_checked(&self) -> bool {
        matches!(self, FieldValue::Flag(true))
    }
}

impl From<&str> for FieldValue {
    fn from(value: &str) -> Self {
        FieldValue::text(value)
    }
}

impl From<String> for FieldValue {
    fn from(value: String) -> Self {
        FieldValue::text(value)
    }
}

impl From<bool> for FieldValue {
    fn from(value: bool) -> Self {
        FieldValue::Flag(value)
    }
}

/// Mutable metadata the rules and validators maintain for each field.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct FieldState {
    pub required: bool,
    pub readonly: bool,
    pub visible: bool,
    pub invalid: bool,
}

impl FieldState {
    pub fn new(required: bool) -> Self {
        Self {
            required,
            readonly: false,
            visible: true,
            invalid: false,
        }
    }
}

/// Where a write comes from. Only user edits propagate to dependent fields.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum EditOrigin {
    User,
    Derived,
    Prefill,
}
