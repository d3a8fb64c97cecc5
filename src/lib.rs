//! Multi-step KYC onboarding: Bikram Sambat <-> Gregorian conversion and the
//! form state machine with save, resume and prefill.

pub mod bs_table;
pub mod calendar;
pub mod config;
pub mod date_pair;
pub mod documents;
pub mod error;
pub mod field;
pub mod logging;
pub mod otp;
pub mod persistence;
pub mod prefill;
pub mod readiness;
pub mod reference;
pub mod retry;
pub mod rules;
pub mod schema;
pub mod service;
pub mod session;
pub mod steps;
pub mod store;
pub mod summary;
pub mod utils;

pub use calendar::{ad_to_bs, bs_to_ad, is_valid_ad_date, normalize_bs_text};
pub use config::FormConfig;
pub use error::KycError;
pub use prefill::{PrefillOrchestrator, PrefillReport};
pub use service::KycService;
pub use session::FormSession;
pub use store::SledProgressStore;
