//! Document slots, the upload policy and the per-session document set.
use std::collections::BTreeMap;

use serde::{Deserialize, Serialize};
use tracing::{debug, warn};

use crate::config::UploadConfig;
use crate::error::UploadRejection;
use crate::schema::names;

#[derive(
    Debug,
    Clone,
    Copy,
    PartialEq,
    Eq,
    Hash,
    PartialOrd,
    Ord,
    Serialize,
    Deserialize,
    minicbor::Encode,
    minicbor::Decode,
)]
pub enum DocumentSlot {
    #[n(0)]
    Photo,
    #[n(1)]
    CitizenshipFront,
    #[n(2)]
    CitizenshipBack,
    #[n(3)]
    Signature,
    #[n(4)]
    Nid,
    #[n(5)]
    Passport,
}

impl DocumentSlot {
    pub const ALL: [DocumentSlot; 6] = [
        DocumentSlot::Photo,
        DocumentSlot::CitizenshipFront,
        DocumentSlot::CitizenshipBack,
        DocumentSlot::Signature,
        DocumentSlot::Nid,
        DocumentSlot::Passport,
    ];

    /// Multipart part name used when the file is uploaded.
    pub fn part_name(self) -> &'static str {
        match self {
            DocumentSlot::Photo => "photo",
            DocumentSlot::CitizenshipFront => "citizenship-front",
            DocumentSlot::CitizenshipBack => "citizenship-back",
            DocumentSlot::Signature => "signature",
            DocumentSlot::Nid => "nid",
            DocumentSlot::Passport => "passport_doc",
        }
    }

    /// Key of the stored URL in saved progress.
    pub fn url_key(self) -> &'static str {
        match self {
            DocumentSlot::Photo => "photo_url",
            DocumentSlot::CitizenshipFront => "citizenship_front_url",
            DocumentSlot::CitizenshipBack => "citizenship_back_url",
            DocumentSlot::Signature => "signature_url",
            DocumentSlot::Nid => "nid_url",
            DocumentSlot::Passport => "passport_doc_url",
        }
    }

    pub fn field_name(self) -> &'static str {
        match self {
            DocumentSlot::Photo => names::PHOTO,
            DocumentSlot::CitizenshipFront => names::CITIZENSHIP_FRONT,
            DocumentSlot::CitizenshipBack => names::CITIZENSHIP_BACK,
            DocumentSlot::Signature => names::SIGNATURE,
            DocumentSlot::Nid => names::NID,
            DocumentSlot::Passport => names::PASSPORT_DOC,
        }
    }

    /// Photo and signature must be images; the rest may also be PDF scans.
    pub fn accepts_pdf(self) -> bool {
        !matches!(self, DocumentSlot::Photo | DocumentSlot::Signature)
    }
}

/// A file chosen by the user but not yet persisted.
#[derive(Clone, PartialEq, Eq)]
pub struct StagedFile {
    pub file_name: String,
    pub content_type: String,
    pub bytes: Vec<u8>,
}

impl StagedFile {
    pub fn new(
        file_name: impl Into<String>,
        content_type: impl Into<String>,
        bytes: impl Into<Vec<u8>>,
    ) -> Self {
        Self {
            file_name: file_name.into(),
            content_type: content_type.into(),
            bytes: bytes.into(),
        }
    }

    pub fn len(&self) -> usize {
        self.bytes.len()
    }

    pub fn is_empty(&self) -> bool {
        self.bytes.is_empty()
    }
}

impl std::fmt::Debug for StagedFile {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("StagedFile")
            .field("file_name", &self.file_name)
            .field("content_type", &self.content_type)
            .field("len", &self.bytes.len())
            .finish()
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct UploadPolicy {
    max_bytes: usize,
    image_types: Vec<String>,
    document_types: Vec<String>,
}

impl Default for UploadPolicy {
    fn default() -> Self {
        Self::from(&UploadConfig::default())
    }
}

impl From<&UploadConfig> for UploadPolicy {
    fn from(cfg: &UploadConfig) -> Self {
        let lower = |v: &[String]| v.iter().map(|t| t.to_ascii_lowercase()).collect();
        Self {
            max_bytes: cfg.max_file_bytes,
            image_types: lower(&cfg.image_types),
            document_types: lower(&cfg.document_types),
        }
    }
}

impl UploadPolicy {
    pub fn max_bytes(&self) -> usize {
        self.max_bytes
    }

    pub fn check(&self, file: &StagedFile, allow_documents: bool) -> Result<(), UploadRejection> {
        if file.is_empty() {
            return Err(UploadRejection::Empty);
        }
        if file.len() > self.max_bytes {
            return Err(UploadRejection::TooLarge {
                size: file.len(),
                max: self.max_bytes,
            });
        }
        let content_type = file.content_type.trim().to_ascii_lowercase();
        let allowed = self.image_types.contains(&content_type)
            || (allow_documents && self.document_types.contains(&content_type));
        if !allowed {
            return Err(UploadRejection::UnsupportedType {
                content_type: file.content_type.clone(),
            });
        }
        Ok(())
    }
}

/// A named extra document. Either freshly staged or already stored.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct AdditionalDocument {
    pub name: String,
    pub file: Option<StagedFile>,
    pub url: Option<String>,
}

/// Staged files and stored references for every slot of one session.
#[derive(Debug, Clone)]
pub struct DocumentSet {
    policy: UploadPolicy,
    max_additional: usize,
    staged: BTreeMap<DocumentSlot, StagedFile>,
    existing: BTreeMap<DocumentSlot, String>,
    additional: Vec<AdditionalDocument>,
}

impl Default for DocumentSet {
    fn default() -> Self {
        Self::new(&UploadConfig::default())
    }
}

impl DocumentSet {
    pub fn new(cfg: &UploadConfig) -> Self {
        Self {
            policy: UploadPolicy::from(cfg),
            max_additional: cfg.max_additional_documents,
            staged: BTreeMap::new(),
            existing: BTreeMap::new(),
            additional: Vec::new(),
        }
    }

    /// Stages `file` for `slot`. A rejected file also clears whatever was staged before.
    pub fn stage(&mut self, slot: DocumentSlot, file: StagedFile) -> Result<(), UploadRejection> {
        if let Err(rejection) = self.policy.check(&file, slot.accepts_pdf()) {
            warn!(slot = slot.part_name(), %rejection, "file rejected");
            self.staged.remove(&slot);
            return Err(rejection);
        }
        debug!(slot = slot.part_name(), file = %file.file_name, "file staged");
        self.staged.insert(slot, file);
        Ok(())
    }

    pub fn unstage(&mut self, slot: DocumentSlot) -> Option<StagedFile> {
        self.staged.remove(&slot)
    }

    pub fn staged(&self, slot: DocumentSlot) -> Option<&StagedFile> {
        self.staged.get(&slot)
    }

    pub fn staged_slots(&self) -> impl Iterator<Item = (DocumentSlot, &StagedFile)> {
        self.staged.iter().map(|(slot, file)| (*slot, file))
    }

    pub fn set_existing(&mut self, slot: DocumentSlot, url: impl Into<String>) {
        let url = url.into();
        if url.trim().is_empty() {
            self.existing.remove(&slot);
        } else {
            self.existing.insert(slot, url);
        }
    }

    pub fn existing_url(&self, slot: DocumentSlot) -> Option<&str> {
        self.existing.get(&slot).map(String::as_str)
    }

    pub fn existing_urls(&self) -> &BTreeMap<DocumentSlot, String> {
        &self.existing
    }

    /// A newly chosen file or a stored reference.
    pub fn is_satisfied(&self, slot: DocumentSlot) -> bool {
        self.staged.contains_key(&slot) || self.existing.contains_key(&slot)
    }

    pub fn add_additional(
        &mut self,
        name: impl Into<String>,
        file: StagedFile,
    ) -> Result<usize, UploadRejection> {
        let name = name.into();
        if name.trim().is_empty() {
            return Err(UploadRejection::MissingName);
        }
        if self.additional.len() >= self.max_additional {
            return Err(UploadRejection::TooManyAdditional {
                max: self.max_additional,
            });
        }
        self.policy.check(&file, true)?;
        self.additional.push(AdditionalDocument {
            name,
            file: Some(file),
            url: None,
        });
        Ok(self.additional.len() - 1)
    }

    /// Records an already stored extra document, as restored by prefill.
    pub fn push_existing_additional(&mut self, name: impl Into<String>, url: impl Into<String>) {
        if self.additional.len() < self.max_additional {
            self.additional.push(AdditionalDocument {
                name: name.into(),
                file: None,
                url: Some(url.into()),
            });
        }
    }

    pub fn remove_additional(&mut self, index: usize) -> Option<AdditionalDocument> {
        (index < self.additional.len()).then(|| self.additional.remove(index))
    }

    pub fn additional(&self) -> &[AdditionalDocument] {
        &self.additional
    }

    /// Replaces staged files with the URLs the store assigned to them.
    ///
    /// `additional_urls` lines up with the staged extra documents in order.
    pub fn promote(&mut self, urls: &BTreeMap<String, String>, additional_urls: &[String]) {
        for slot in DocumentSlot::ALL {
            if let Some(url) = urls.get(slot.url_key()) {
                self.staged.remove(&slot);
                self.existing.insert(slot, url.clone());
            }
        }
        let mut stored = additional_urls.iter();
        for doc in self.additional.iter_mut().filter(|d| d.file.is_some()) {
            match stored.next() {
                Some(url) => {
                    doc.file = None;
                    doc.url = Some(url.clone());
                }
                None => break,
            }
        }
    }
}
