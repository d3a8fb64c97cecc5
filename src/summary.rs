//! Read-only summary shown before the final submission is confirmed.
use crate::documents::DocumentSlot;
use crate::field::FieldValue;
use crate::schema::FieldKind;
use crate::session::FormSession;

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SummaryEntry {
    pub label: &'static str,
    pub value: String,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SummarySection {
    pub step: u8,
    pub title: &'static str,
    pub entries: Vec<SummaryEntry>,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DocumentLink {
    pub label: String,
    /// `None` while the file has not been stored yet.
    pub url: Option<String>,
}

/// Snapshot of the collected data, bound to the session revision it was built from.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ConfirmationSummary {
    pub revision: u64,
    pub sections: Vec<SummarySection>,
    pub documents: Vec<DocumentLink>,
}

impl ConfirmationSummary {
    pub fn from_session(session: &FormSession) -> Self {
        let schema = session.schema();
        let sections = (1..=schema.total_steps())
            .map(|step| SummarySection {
                step,
                title: schema.step_title(step).unwrap_or_default(),
                entries: schema
                    .step_fields(step)
                    .filter(|f| !matches!(f.kind, FieldKind::File(_)))
                    .filter(|f| session.state(f.name).visible)
                    .filter_map(|f| {
                        let value = match session.value(f.name) {
                            FieldValue::Empty => return None,
                            FieldValue::Text(s) if s.trim().is_empty() => return None,
                            FieldValue::Text(s) => s.clone(),
                            FieldValue::Flag(true) => "Yes".to_string(),
                            FieldValue::Flag(false) => "No".to_string(),
                        };
                        Some(SummaryEntry {
                            label: f.label,
                            value,
                        })
                    })
                    .collect(),
            })
            .collect();

        let docs = session.documents();
        let mut documents: Vec<DocumentLink> = DocumentSlot::ALL
            .into_iter()
            .filter(|slot| docs.is_satisfied(*slot))
            .map(|slot| DocumentLink {
                label: schema
                    .field(slot.field_name())
                    .map(|f| f.label.to_string())
                    .unwrap_or_else(|| slot.part_name().to_string()),
                url: docs.existing_url(slot).map(str::to_string),
            })
            .collect();
        documents.extend(docs.additional().iter().map(|doc| DocumentLink {
            label: doc.name.clone(),
            url: doc.url.clone(),
        }));

        Self {
            revision: session.revision(),
            sections,
            documents,
        }
    }

    pub fn entry(&self, label: &str) -> Option<&str> {
        self.sections
            .iter()
            .flat_map(|s| &s.entries)
            .find(|e| e.label == label)
            .map(|e| e.value.as_str())
    }
}
