//! Error taxonomy for the onboarding engine.
//!
//! Conversion and validation problems stay local: the converter reports them as
//! empty strings and the step machine as [`StepReport`]s. Only persistence,
//! reference-data and timeout failures are meant to block the user.

use crate::readiness::ReadySignal;
use crate::steps::StepReport;

/// Internal converter failure. Never crosses the string API of [`crate::calendar`].
#[derive(thiserror::Error, Debug, Clone, PartialEq, Eq)]
pub enum ConversionError {
    #[error("could not parse date text {0:?}")]
    Malformed(String),
    #[error("month {month} is outside 1..=12")]
    MonthOutOfRange { month: u32 },
    #[error("day {day} does not exist in {year}-{month:02}")]
    DayOutOfRange { year: i32, month: u32, day: u32 },
    #[error("year {0} is outside the supported window")]
    YearOutOfRange(i32),
    #[error("BS year {0} is not covered by the month table")]
    TableMiss(i32),
}

/// An edit the session refused to apply.
#[derive(thiserror::Error, Debug, Clone, PartialEq, Eq)]
pub enum FieldError {
    #[error("unknown field {0:?}")]
    UnknownField(String),
    #[error("field {0:?} is read-only")]
    ReadOnly(&'static str),
    #[error("mobile number is verified and can no longer be changed")]
    MobileLocked,
    #[error("field {0:?} holds a file; use the document slots")]
    FileField(&'static str),
    #[error("the form has already been submitted")]
    AlreadySubmitted,
}

/// A file refused by the upload policy. The slot is left empty.
#[derive(thiserror::Error, Debug, Clone, PartialEq, Eq)]
pub enum UploadRejection {
    #[error("file is empty")]
    Empty,
    #[error("file is {size} bytes, the limit is {max}")]
    TooLarge { size: usize, max: usize },
    #[error("file type {content_type:?} is not allowed here")]
    UnsupportedType { content_type: String },
    #[error("at most {max} additional documents can be attached")]
    TooManyAdditional { max: usize },
    #[error("additional documents need a name")]
    MissingName,
    #[error("the form has already been submitted")]
    FormSubmitted,
}

/// Step gating failures. The session keeps its data and step pointer.
#[derive(thiserror::Error, Debug, Clone, PartialEq, Eq)]
pub enum NavigationError {
    #[error("step {} is incomplete: {}", .0.step, .0.missing.join(", "))]
    Incomplete(StepReport),
    #[error("please complete the current page first (step {target} not reached, furthest is {highest})")]
    NotReached { target: u8, highest: u8 },
    #[error("step {0} does not exist")]
    OutOfRange(u8),
    #[error("already on the last step")]
    AtLastStep,
}

/// Reasons the final submit gate stays closed.
#[derive(thiserror::Error, Debug, Clone, PartialEq, Eq)]
pub enum SubmitBlocked {
    #[error("submission is only possible from the last step (currently on {current})")]
    NotOnLastStep { current: u8 },
    #[error("please verify your mobile number before submitting")]
    MobileNotVerified,
    #[error("step {} is incomplete: {}", .0.step, .0.missing.join(", "))]
    Incomplete(StepReport),
    #[error("the form changed after the summary was shown; review it again")]
    StaleConfirmation,
}

#[derive(thiserror::Error, Debug, Clone, PartialEq, Eq)]
pub enum PersistenceError {
    #[error("policy number missing from form")]
    MissingPolicy,
    #[error("{}", .message.as_deref().unwrap_or(GENERIC_SAVE_FAILURE))]
    Rejected { message: Option<String> },
    #[error("storage failure: {0}")]
    Storage(String),
    #[error("request timed out after {0} ms")]
    Timeout(u64),
}

pub(crate) const GENERIC_SAVE_FAILURE: &str = "Could not save progress.";

impl From<sled::Error> for PersistenceError {
    fn from(value: sled::Error) -> Self {
        PersistenceError::Storage(value.to_string())
    }
}

#[derive(thiserror::Error, Debug, Clone, PartialEq, Eq)]
pub enum ReferenceError {
    #[error("{dataset} data could not be loaded: {reason}")]
    Unavailable { dataset: &'static str, reason: String },
    #[error("{dataset} data is malformed: {reason}")]
    Malformed { dataset: &'static str, reason: String },
}

#[derive(thiserror::Error, Debug, Clone, PartialEq, Eq)]
pub enum OtpError {
    #[error("invalid Nepali mobile number format, must start with 96-99")]
    InvalidMobile,
    #[error("no verification code has been sent")]
    NotRequested,
    #[error("invalid OTP, please try again")]
    InvalidCode,
    #[error("mobile number already verified")]
    AlreadyVerified,
    #[error("OTP service failure: {0}")]
    Channel(String),
}

#[derive(thiserror::Error, Debug, Clone, PartialEq, Eq)]
pub enum PrefillError {
    #[error("form data took too long to load, please reload the page (waiting for {pending:?})")]
    Timeout { pending: Vec<ReadySignal> },
    #[error("{0}, please reload the page")]
    Reference(#[from] ReferenceError),
}

/// Umbrella error returned by [`crate::service::KycService`].
#[derive(thiserror::Error, Debug, Clone, PartialEq, Eq)]
pub enum KycError {
    #[error(transparent)]
    Field(#[from] FieldError),
    #[error(transparent)]
    Upload(#[from] UploadRejection),
    #[error(transparent)]
    Navigation(#[from] NavigationError),
    #[error(transparent)]
    Submit(#[from] SubmitBlocked),
    #[error(transparent)]
    Persistence(#[from] PersistenceError),
    #[error(transparent)]
    Otp(#[from] OtpError),
    #[error(transparent)]
    Prefill(#[from] PrefillError),
}

impl KycError {
    /// Whether the error needs a modal dialog rather than inline highlighting.
    pub fn is_blocking(&self) -> bool {
        matches!(self, KycError::Persistence(_) | KycError::Prefill(_))
    }

    pub fn user_message(&self) -> String {
        match self {
            KycError::Persistence(PersistenceError::Rejected { message: None })
            | KycError::Persistence(PersistenceError::Storage(_)) => GENERIC_SAVE_FAILURE.to_string(),
            other => other.to_string(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn rejected_without_message_falls_back() {
        let err = KycError::from(PersistenceError::Rejected { message: None });
        assert_eq!(err.user_message(), "Could not save progress.");
        assert!(err.is_blocking());
    }

    #[test]
    fn server_message_is_surfaced() {
        let err = KycError::from(PersistenceError::Rejected {
            message: Some("Policy locked".into()),
        });
        assert_eq!(err.user_message(), "Policy locked");
    }

    #[test]
    fn reference_failures_block_and_suggest_reload() {
        let err = KycError::from(PrefillError::from(ReferenceError::Unavailable {
            dataset: "bank",
            reason: "connection reset".into(),
        }));
        assert!(err.is_blocking());
        assert!(err.user_message().ends_with("please reload the page"));
    }

    #[test]
    fn validation_errors_are_not_blocking() {
        let err = KycError::from(NavigationError::NotReached {
            target: 4,
            highest: 2,
        });
        assert!(!err.is_blocking());
    }
}
