//! Tunables for the onboarding engine.
//!
//! Every field has a default, so a partial JSON document is enough to
//! override a single value.
use std::path::Path;
use std::time::Duration;

use serde::{Deserialize, Serialize};

use crate::retry::RetryPolicy;

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct FormConfig {
    /// How many missing fields a step report lists before summarising the rest
    pub max_listed_missing: usize,
    /// Upper bound for a single save or submit call (ms)
    pub request_timeout_ms: u64,
    pub prefill: PrefillConfig,
    pub uploads: UploadConfig,
    pub occupations: OccupationConfig,
}

impl Default for FormConfig {
    fn default() -> Self {
        Self {
            max_listed_missing: 5,
            request_timeout_ms: 30_000,
            prefill: PrefillConfig::default(),
            uploads: UploadConfig::default(),
            occupations: OccupationConfig::default(),
        }
    }
}

impl FormConfig {
    pub fn from_json(json: &str) -> Result<Self, serde_json::Error> {
        serde_json::from_str(json)
    }

    pub fn to_json(&self) -> Result<String, serde_json::Error> {
        serde_json::to_string_pretty(self)
    }

    pub fn from_path(path: impl AsRef<Path>) -> anyhow::Result<Self> {
        let raw = std::fs::read_to_string(path.as_ref())?;
        Ok(Self::from_json(&raw)?)
    }

    pub fn request_timeout(&self) -> Duration {
        Duration::from_millis(self.request_timeout_ms)
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct PrefillConfig {
    /// Hard limit for the whole prefill run (ms)
    pub timeout_ms: u64,
    pub fallback_poll_interval_ms: u64,
    pub fallback_poll_attempts: u32,
    /// Waiting for select options after a parent selection
    pub select_retry: RetryPolicy,
    /// Delay before the calendar announces itself ready (ms)
    pub calendar_settle_ms: u64,
}

impl Default for PrefillConfig {
    fn default() -> Self {
        Self {
            timeout_ms: 60_000,
            fallback_poll_interval_ms: 500,
            fallback_poll_attempts: 20,
            select_retry: RetryPolicy::default(),
            calendar_settle_ms: 300,
        }
    }
}

impl PrefillConfig {
    pub fn timeout(&self) -> Duration {
        Duration::from_millis(self.timeout_ms)
    }

    pub fn fallback_poll(&self) -> RetryPolicy {
        RetryPolicy::fixed(
            Duration::from_millis(self.fallback_poll_interval_ms),
            self.fallback_poll_attempts,
        )
    }

    pub fn calendar_settle(&self) -> Duration {
        Duration::from_millis(self.calendar_settle_ms)
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct UploadConfig {
    pub max_file_bytes: usize,
    pub image_types: Vec<String>,
    pub document_types: Vec<String>,
    pub max_additional_documents: usize,
}

impl Default for UploadConfig {
    fn default() -> Self {
        Self {
            max_file_bytes: 500 * 1024,
            image_types: vec![
                "image/jpeg".to_string(),
                "image/jpg".to_string(),
                "image/png".to_string(),
            ],
            document_types: vec!["application/pdf".to_string()],
            max_additional_documents: 5,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct OccupationConfig {
    /// Categories with no income; the financial fields are cleared and locked
    pub no_income: Vec<String>,
    /// Category that asks for a free-text description
    pub other: String,
    /// Occupation codes for which PAN is never required
    pub pan_exempt_codes: Vec<String>,
}

impl Default for OccupationConfig {
    fn default() -> Self {
        Self {
            no_income: vec!["House Wife".to_string(), "Student".to_string()],
            other: "Other".to_string(),
            pan_exempt_codes: vec!["194".to_string()],
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn partial_json_keeps_defaults() {
        let cfg = FormConfig::from_json(r#"{ "prefill": { "timeout_ms": 5000 } }"#).unwrap();
        assert_eq!(cfg.prefill.timeout(), Duration::from_secs(5));
        assert_eq!(cfg.prefill.fallback_poll_attempts, 20);
        assert_eq!(cfg.uploads.max_file_bytes, 512_000);
        assert_eq!(cfg.occupations.pan_exempt_codes, vec!["194"]);
    }

    #[test]
    fn json_round_trip() {
        let cfg = FormConfig::default();
        let back = FormConfig::from_json(&cfg.to_json().unwrap()).unwrap();
        assert_eq!(cfg, back);
    }

    #[test]
    fn loads_from_file() -> anyhow::Result<()> {
        let dir = tempfile::tempdir()?;
        let path = dir.path().join("kyc.json");
        std::fs::write(&path, r#"{ "max_listed_missing": 3 }"#)?;
        let cfg = FormConfig::from_path(&path)?;
        assert_eq!(cfg.max_listed_missing, 3);
        Ok(())
    }
}
