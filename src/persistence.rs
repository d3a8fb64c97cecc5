//! The save/submit boundary: what a save carries and what comes back.
use std::collections::BTreeMap;

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use serde_json::{Map, Value};

use crate::documents::{DocumentSlot, StagedFile};
use crate::error::PersistenceError;

pub const CURRENT_STEP_KEY: &str = "_current_step";
pub const MOBILE_VERIFIED_KEY: &str = "_mobile_verified";
pub const ADDITIONAL_DOCUMENTS_KEY: &str = "additional_documents";
/// Older saves used other keys for the bank branch.
pub const BRANCH_NAME_KEYS: [&str; 3] = ["branch_name", "bank_branch", "bank_branch_name"];

/// Everything one save sends, the equivalent of a single multipart request.
#[derive(Debug, Clone, PartialEq)]
pub struct ProgressSnapshot {
    pub policy_no: String,
    pub csrf_token: String,
    /// Every field value plus the step pointer and stored document URLs.
    pub kyc_data: Map<String, Value>,
    /// Newly chosen files for the fixed slots.
    pub files: Vec<(DocumentSlot, StagedFile)>,
    /// Newly chosen extra documents as (name, file).
    pub additional_docs: Vec<(String, StagedFile)>,
}

impl ProgressSnapshot {
    pub fn current_step(&self) -> Option<u8> {
        self.kyc_data.get(CURRENT_STEP_KEY).and_then(step_from_json)
    }

    /// Stored reference for `slot` carried in `kyc_data`.
    pub fn existing_url(&self, slot: DocumentSlot) -> Option<&str> {
        self.kyc_data
            .get(slot.url_key())
            .and_then(Value::as_str)
            .filter(|s| !s.is_empty())
    }

    pub fn kyc_data_json(&self) -> Result<String, serde_json::Error> {
        serde_json::to_string(&self.kyc_data)
    }
}

fn step_from_json(value: &Value) -> Option<u8> {
    match value {
        Value::Number(n) => n.as_u64().and_then(|n| u8::try_from(n).ok()),
        Value::String(s) => s.trim().parse().ok(),
        _ => None,
    }
}

/// Saved progress as loaded back for prefill.
#[derive(Debug, Clone, PartialEq, Default)]
pub struct PrefillData {
    pub fields: Map<String, Value>,
}

impl PrefillData {
    pub fn new(fields: Map<String, Value>) -> Self {
        Self { fields }
    }

    pub fn from_json(json: &str) -> Result<Self, serde_json::Error> {
        Ok(Self::new(serde_json::from_str(json)?))
    }

    /// The value of `key` as text. Numbers and booleans are stringified,
    /// null and empty strings count as absent.
    pub fn text(&self, key: &str) -> Option<String> {
        match self.fields.get(key)? {
            Value::String(s) if !s.trim().is_empty() => Some(s.clone()),
            Value::Number(n) => Some(n.to_string()),
            Value::Bool(b) => Some(b.to_string()),
            _ => None,
        }
    }

    pub fn flag(&self, key: &str) -> bool {
        match self.fields.get(key) {
            Some(Value::Bool(b)) => *b,
            Some(Value::Number(n)) => n.as_u64() == Some(1),
            Some(Value::String(s)) => matches!(s.trim(), "1" | "true" | "on" | "yes"),
            _ => false,
        }
    }

    pub fn current_step(&self) -> Option<u8> {
        self.fields.get(CURRENT_STEP_KEY).and_then(step_from_json)
    }

    pub fn mobile_verified(&self) -> bool {
        self.flag(MOBILE_VERIFIED_KEY)
    }

    pub fn branch_name(&self) -> Option<String> {
        BRANCH_NAME_KEYS.iter().find_map(|key| self.text(key))
    }

    pub fn document_url(&self, slot: DocumentSlot) -> Option<String> {
        self.text(slot.url_key())
    }

    /// Stored extra documents as (name, url).
    pub fn additional_documents(&self) -> Vec<(String, String)> {
        let Some(Value::Array(items)) = self.fields.get(ADDITIONAL_DOCUMENTS_KEY) else {
            return Vec::new();
        };
        items
            .iter()
            .filter_map(|item| {
                let name = item.get("name")?.as_str()?;
                let url = item.get("url")?.as_str()?;
                Some((name.to_string(), url.to_string()))
            })
            .collect()
    }
}

/// What a successful save reports back.
#[derive(Debug, Clone, PartialEq, Eq, Default)]
pub struct SaveReceipt {
    /// Document URL key to stored URL, for every stored slot.
    pub document_urls: BTreeMap<String, String>,
    /// URLs of the extra documents uploaded by this save, in order.
    pub additional_urls: Vec<String>,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SubmissionReceipt {
    pub reference: String,
    pub submitted_at: DateTime<Utc>,
}

/// Save-progress endpoint.
#[async_trait]
pub trait ProgressStore: Send + Sync {
    async fn save_progress(&self, snapshot: &ProgressSnapshot)
    -> Result<SaveReceipt, PersistenceError>;

    async fn load_progress(&self, policy_no: &str) -> Result<Option<PrefillData>, PersistenceError>;
}

/// Final submission endpoint.
#[async_trait]
pub trait SubmissionEndpoint: Send + Sync {
    async fn submit(&self, snapshot: &ProgressSnapshot) -> Result<SubmissionReceipt, PersistenceError>;
}
