//! Mobile number verification gate.
use std::sync::LazyLock;

use async_trait::async_trait;
use regex::Regex;

use crate::error::OtpError;

static NEPALI_MOBILE: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"^(\+977)?9[6-9][0-9]{8}$").expect("static pattern"));

/// `98XXXXXXXX`, optionally prefixed with `+977`.
pub fn is_valid_nepali_mobile(mobile: &str) -> bool {
    NEPALI_MOBILE.is_match(mobile.trim())
}

/// Send and verify endpoints of the OTP provider.
#[async_trait]
pub trait OtpChannel: Send + Sync {
    async fn send(&self, mobile: &str) -> Result<(), OtpError>;
    /// `Ok(false)` means the code was wrong.
    async fn verify(&self, mobile: &str, code: &str) -> Result<bool, OtpError>;
}

#[derive(Debug, Clone, PartialEq, Eq, Default)]
pub enum OtpGate {
    #[default]
    Unverified,
    CodeSent {
        mobile: String,
    },
    Verified {
        mobile: String,
    },
}

impl OtpGate {
    pub fn is_verified(&self) -> bool {
        matches!(self, OtpGate::Verified { .. })
    }

    pub fn verified_mobile(&self) -> Option<&str> {
        match self {
            OtpGate::Verified { mobile } => Some(mobile),
            _ => None,
        }
    }

    /// Checks that a code may be sent to `mobile`.
    pub fn check_send(&self, mobile: &str) -> Result<(), OtpError> {
        if self.is_verified() {
            return Err(OtpError::AlreadyVerified);
        }
        if !is_valid_nepali_mobile(mobile) {
            return Err(OtpError::InvalidMobile);
        }
        Ok(())
    }

    pub fn code_sent(&mut self, mobile: &str) {
        *self = OtpGate::CodeSent {
            mobile: mobile.trim().to_string(),
        };
    }

    /// The number a code is pending for.
    pub fn pending_mobile(&self) -> Result<&str, OtpError> {
        match self {
            OtpGate::CodeSent { mobile } => Ok(mobile),
            OtpGate::Verified { .. } => Err(OtpError::AlreadyVerified),
            OtpGate::Unverified => Err(OtpError::NotRequested),
        }
    }

    pub fn confirm(&mut self) {
        if let OtpGate::CodeSent { mobile } = self {
            let mobile = std::mem::take(mobile);
            *self = OtpGate::Verified { mobile };
        }
    }

    /// A pending code is dropped once the number it was sent to changes.
    pub fn mobile_changed(&mut self, mobile: &str) {
        if let OtpGate::CodeSent { mobile: pending } = self {
            if pending.as_str() != mobile.trim() {
                *self = OtpGate::Unverified;
            }
        }
    }

    /// Restores verified state from saved progress.
    pub fn restore_verified(&mut self, mobile: &str) {
        *self = OtpGate::Verified {
            mobile: mobile.trim().to_string(),
        };
    }
}
