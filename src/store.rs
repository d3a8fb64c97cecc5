//! Sled-backed progress store and submission endpoint.
//!
//! Keys:
//! - `progress/<policy>`: the latest [`ProgressRecord`]
//! - `doc/<sha256>`: a [`StoredDocument`], addressed by the hash of its policy,
//!   slot and file bytes. Saving the same file twice reuses the key.
//! - `submission/<policy>`: the [`SubmissionRecord`] once the form is submitted
use std::sync::Arc;

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use serde_json::{Map, Value, json};
use sled::{Batch, Db};
use tracing::{debug, info, warn};

use crate::documents::{DocumentSlot, StagedFile};
use crate::error::PersistenceError;
use crate::persistence::{
    ADDITIONAL_DOCUMENTS_KEY, PrefillData, ProgressSnapshot, ProgressStore, SaveReceipt,
    SubmissionEndpoint, SubmissionReceipt,
};
use crate::utils::new_reference_id;

const DOC_URL_SCHEME: &str = "kyc-doc://";

#[derive(Debug, PartialEq, Eq, PartialOrd, Ord, Clone, Copy)]
pub struct TimeStamp(DateTime<Utc>);

impl TimeStamp {
    pub fn now() -> Self {
        Self(Utc::now())
    }

    pub fn to_datetime_utc(&self) -> DateTime<Utc> {
        self.0
    }
}

impl<C> minicbor::Encode<C> for TimeStamp {
    fn encode<W: minicbor::encode::Write>(
        &self,
        e: &mut minicbor::Encoder<W>,
        _: &mut C,
    ) -> Result<(), minicbor::encode::Error<W::Error>> {
        e.i64(self.0.timestamp_millis())?.ok()
    }
}

impl<'b, C> minicbor::Decode<'b, C> for TimeStamp {
    fn decode(d: &mut minicbor::Decoder<'b>, _: &mut C) -> Result<Self, minicbor::decode::Error> {
        let millis = d.i64()?;
        DateTime::from_timestamp_millis(millis)
            .map(TimeStamp)
            .ok_or_else(|| minicbor::decode::Error::message("timestamp out of range"))
    }
}

#[derive(Debug, Clone, PartialEq, Eq, minicbor::Encode, minicbor::Decode)]
pub struct ProgressRecord {
    #[n(0)]
    pub policy_no: String,
    #[n(1)]
    pub kyc_data_json: String,
    #[n(2)]
    pub saved_at: TimeStamp,
}

#[derive(Debug, Clone, PartialEq, Eq, minicbor::Encode, minicbor::Decode)]
pub struct StoredDocument {
    #[n(0)]
    pub policy_no: String,
    #[n(1)]
    pub file_name: String,
    #[n(2)]
    pub content_type: String,
    #[cbor(n(3), with = "minicbor::bytes")]
    pub bytes: Vec<u8>,
    /// `None` for extra documents.
    #[n(4)]
    pub slot: Option<DocumentSlot>,
    #[n(5)]
    pub stored_at: TimeStamp,
}

impl StoredDocument {
    fn new(policy_no: &str, file: &StagedFile, slot: Option<DocumentSlot>) -> Self {
        Self {
            policy_no: policy_no.to_string(),
            file_name: file.file_name.clone(),
            content_type: file.content_type.clone(),
            bytes: file.bytes.clone(),
            slot,
            stored_at: TimeStamp::now(),
        }
    }

    /// Hashes the content and serialises the document, returning `(hash, cbor)`.
    fn finalise(&self) -> Result<(String, Vec<u8>), PersistenceError> {
        let part = self.slot.map_or("additional", DocumentSlot::part_name);
        let mut content = Vec::with_capacity(self.policy_no.len() + part.len() + self.bytes.len() + 2);
        content.extend_from_slice(self.policy_no.as_bytes());
        content.push(0);
        content.extend_from_slice(part.as_bytes());
        content.push(0);
        content.extend_from_slice(&self.bytes);
        let hash = sha256::digest(&content);
        let cbor = minicbor::to_vec(self).map_err(storage)?;
        Ok((hash, cbor))
    }
}

#[derive(Debug, Clone, PartialEq, Eq, minicbor::Encode, minicbor::Decode)]
pub struct SubmissionRecord {
    #[n(0)]
    pub reference: String,
    #[n(1)]
    pub policy_no: String,
    #[n(2)]
    pub kyc_data_json: String,
    #[n(3)]
    pub submitted_at: TimeStamp,
}

fn storage(err: impl std::fmt::Display) -> PersistenceError {
    PersistenceError::Storage(err.to_string())
}

fn progress_key(policy_no: &str) -> String {
    format!("progress/{policy_no}")
}

fn submission_key(policy_no: &str) -> String {
    format!("submission/{policy_no}")
}

fn doc_key(hash: &str) -> String {
    format!("doc/{hash}")
}

fn doc_url(hash: &str, file_name: &str) -> String {
    format!("{DOC_URL_SCHEME}{hash}/{file_name}")
}

fn hash_of_url(url: &str) -> Option<&str> {
    url.strip_prefix(DOC_URL_SCHEME)?
        .split('/')
        .next()
        .filter(|h| !h.is_empty())
}

pub struct SledProgressStore {
    instance: Arc<Db>,
}

impl SledProgressStore {
    pub fn new(instance: Arc<Db>) -> Self {
        Self { instance }
    }

    fn load_submission(&self, policy_no: &str) -> Result<Option<SubmissionRecord>, PersistenceError> {
        let Some(raw) = self.instance.get(submission_key(policy_no))? else {
            return Ok(None);
        };
        let record = minicbor::decode(&raw).map_err(storage)?;
        Ok(Some(record))
    }

    fn ensure_open(&self, policy_no: &str) -> Result<(), PersistenceError> {
        if policy_no.trim().is_empty() {
            return Err(PersistenceError::MissingPolicy);
        }
        if self.load_submission(policy_no)?.is_some() {
            warn!(policy_no, "write attempted after submission");
            return Err(PersistenceError::Rejected {
                message: Some("Policy already submitted".to_string()),
            });
        }
        Ok(())
    }

    fn load_record(&self, policy_no: &str) -> Result<Option<ProgressRecord>, PersistenceError> {
        let Some(raw) = self.instance.get(progress_key(policy_no))? else {
            return Ok(None);
        };
        let record = minicbor::decode(&raw).map_err(storage)?;
        Ok(Some(record))
    }

    /// Looks up a stored document by the URL a save assigned to it.
    pub fn document(&self, url: &str) -> Result<Option<StoredDocument>, PersistenceError> {
        let Some(hash) = hash_of_url(url) else {
            return Ok(None);
        };
        let Some(raw) = self.instance.get(doc_key(hash))? else {
            return Ok(None);
        };
        let doc = minicbor::decode(&raw).map_err(storage)?;
        Ok(Some(doc))
    }

    pub fn submission(&self, policy_no: &str) -> Result<Option<SubmissionReceipt>, PersistenceError> {
        Ok(self.load_submission(policy_no)?.map(|r| SubmissionReceipt {
            reference: r.reference,
            submitted_at: r.submitted_at.to_datetime_utc(),
        }))
    }
}

#[async_trait]
impl ProgressStore for SledProgressStore {
    async fn save_progress(
        &self,
        snapshot: &ProgressSnapshot,
    ) -> Result<SaveReceipt, PersistenceError> {
        let policy_no = snapshot.policy_no.as_str();
        self.ensure_open(policy_no)?;

        let mut batch = Batch::default();
        let mut receipt = SaveReceipt::default();
        let mut kyc_data: Map<String, Value> = snapshot.kyc_data.clone();
        let previous: Map<String, Value> = match self.load_record(policy_no)? {
            Some(record) => serde_json::from_str(&record.kyc_data_json).map_err(storage)?,
            None => Map::new(),
        };

        // Stored references carried over from earlier saves
        for slot in DocumentSlot::ALL {
            if let Some(url) = snapshot.existing_url(slot) {
                receipt
                    .document_urls
                    .insert(slot.url_key().to_string(), url.to_string());
            }
        }

        // New files replace whatever the slot pointed at
        for (slot, file) in &snapshot.files {
            let doc = StoredDocument::new(policy_no, file, Some(*slot));
            let (hash, cbor) = doc.finalise()?;
            let replaced = previous
                .get(slot.url_key())
                .and_then(Value::as_str)
                .and_then(hash_of_url)
                .filter(|old| *old != hash);
            if let Some(old) = replaced {
                debug!(policy_no, slot = slot.part_name(), "replacing stored document");
                batch.remove(doc_key(old).as_bytes());
            }
            batch.insert(doc_key(&hash).as_bytes(), cbor);
            let url = doc_url(&hash, &file.file_name);
            kyc_data.insert(slot.url_key().to_string(), Value::String(url.clone()));
            receipt.document_urls.insert(slot.url_key().to_string(), url);
        }

        // Extra documents: the carried list plus this save's uploads
        let mut additional = match kyc_data.remove(ADDITIONAL_DOCUMENTS_KEY) {
            Some(Value::Array(items)) => items,
            _ => Vec::new(),
        };
        for (name, file) in &snapshot.additional_docs {
            let doc = StoredDocument::new(policy_no, file, None);
            let (hash, cbor) = doc.finalise()?;
            batch.insert(doc_key(&hash).as_bytes(), cbor);
            let url = doc_url(&hash, &file.file_name);
            additional.push(json!({ "name": name, "url": url }));
            receipt.additional_urls.push(url);
        }
        kyc_data.insert(ADDITIONAL_DOCUMENTS_KEY.to_string(), Value::Array(additional));

        let record = ProgressRecord {
            policy_no: policy_no.to_string(),
            kyc_data_json: serde_json::to_string(&kyc_data).map_err(storage)?,
            saved_at: TimeStamp::now(),
        };
        batch.insert(
            progress_key(policy_no).as_bytes(),
            minicbor::to_vec(&record).map_err(storage)?,
        );
        self.instance.apply_batch(batch)?;

        info!(
            policy_no,
            step = ?snapshot.current_step(),
            files = snapshot.files.len(),
            additional = snapshot.additional_docs.len(),
            "progress saved"
        );
        Ok(receipt)
    }

    async fn load_progress(&self, policy_no: &str) -> Result<Option<PrefillData>, PersistenceError> {
        let Some(record) = self.load_record(policy_no)? else {
            return Ok(None);
        };
        let data = PrefillData::from_json(&record.kyc_data_json).map_err(storage)?;
        Ok(Some(data))
    }
}

#[async_trait]
impl SubmissionEndpoint for SledProgressStore {
    async fn submit(&self, snapshot: &ProgressSnapshot) -> Result<SubmissionReceipt, PersistenceError> {
        let policy_no = snapshot.policy_no.as_str();
        self.ensure_open(policy_no)?;

        let reference = new_reference_id("kyc").map_err(storage)?;
        let record = SubmissionRecord {
            reference: reference.clone(),
            policy_no: policy_no.to_string(),
            kyc_data_json: snapshot.kyc_data_json().map_err(storage)?,
            submitted_at: TimeStamp::now(),
        };
        self.instance.insert(
            submission_key(policy_no).as_bytes(),
            minicbor::to_vec(&record).map_err(storage)?,
        )?;

        info!(policy_no, %reference, "application submitted");
        Ok(SubmissionReceipt {
            reference,
            submitted_at: record.submitted_at.to_datetime_utc(),
        })
    }
}
