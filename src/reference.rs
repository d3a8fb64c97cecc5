//! Reference datasets behind the select fields.
use std::collections::BTreeMap;
use std::path::PathBuf;

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use tokio::sync::RwLock;
use tracing::{debug, error};

use crate::error::ReferenceError;
use crate::readiness::{Readiness, ReadinessGate, ReadinessProbe, ReadySignal, calendar_detected};
use crate::schema::{CascadeLevel, FieldKind, FieldSpec, SelectSource};

/// province -> district -> municipalities
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(transparent)]
pub struct LocationTree(BTreeMap<String, BTreeMap<String, Vec<String>>>);

impl LocationTree {
    pub fn from_json(json: &str) -> Result<Self, ReferenceError> {
        serde_json::from_str(json).map_err(|e| ReferenceError::Malformed {
            dataset: "location",
            reason: e.to_string(),
        })
    }

    pub fn is_empty(&self) -> bool {
        self.0.is_empty()
    }

    pub fn provinces(&self) -> Vec<String> {
        self.0.keys().cloned().collect()
    }

    pub fn districts(&self, province: &str) -> Vec<String> {
        self.0
            .get(province)
            .map(|d| d.keys().cloned().collect())
            .unwrap_or_default()
    }

    pub fn municipalities(&self, province: &str, district: &str) -> Vec<String> {
        self.0
            .get(province)
            .and_then(|d| d.get(district))
            .cloned()
            .unwrap_or_default()
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Bank {
    pub name: String,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Occupation {
    pub name: String,
}

#[derive(Deserialize)]
struct OccupationFile {
    #[serde(default)]
    occupations: Vec<Occupation>,
}

/// Loads the three datasets. Implementations may complete in any order.
#[async_trait]
pub trait ReferenceSource: Send + Sync {
    async fn locations(&self) -> Result<LocationTree, ReferenceError>;
    async fn banks(&self) -> Result<Vec<Bank>, ReferenceError>;
    async fn occupations(&self) -> Result<Vec<Occupation>, ReferenceError>;
}

/// Reads `nepal_locations.json`, `nepal_banks.json` and `occupations.json` from a directory.
#[derive(Debug, Clone)]
pub struct JsonReferenceSource {
    dir: PathBuf,
}

impl JsonReferenceSource {
    pub fn new(dir: impl Into<PathBuf>) -> Self {
        Self { dir: dir.into() }
    }

    async fn read(&self, file: &str, dataset: &'static str) -> Result<String, ReferenceError> {
        tokio::fs::read_to_string(self.dir.join(file))
            .await
            .map_err(|e| ReferenceError::Unavailable {
                dataset,
                reason: e.to_string(),
            })
    }
}

#[async_trait]
impl ReferenceSource for JsonReferenceSource {
    async fn locations(&self) -> Result<LocationTree, ReferenceError> {
        LocationTree::from_json(&self.read("nepal_locations.json", "location").await?)
    }

    async fn banks(&self) -> Result<Vec<Bank>, ReferenceError> {
        let raw = self.read("nepal_banks.json", "bank").await?;
        serde_json::from_str(&raw).map_err(|e| ReferenceError::Malformed {
            dataset: "bank",
            reason: e.to_string(),
        })
    }

    async fn occupations(&self) -> Result<Vec<Occupation>, ReferenceError> {
        let raw = self.read("occupations.json", "occupation").await?;
        let file: OccupationFile =
            serde_json::from_str(&raw).map_err(|e| ReferenceError::Malformed {
                dataset: "occupation",
                reason: e.to_string(),
            })?;
        Ok(file.occupations)
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SelectOption {
    pub value: String,
    pub text: String,
}

impl SelectOption {
    pub fn plain(value: impl Into<String>) -> Self {
        let value = value.into();
        Self {
            text: value.clone(),
            value,
        }
    }

    /// Match on value or visible text, ignoring surrounding whitespace.
    pub fn matches(&self, expected: &str) -> bool {
        let expected = expected.trim();
        self.value.trim() == expected || self.text.trim() == expected
    }
}

/// Options a select currently offers.
#[async_trait]
pub trait OptionSource: Send + Sync {
    /// `parents` holds the selected values of the levels above a cascade field.
    /// An empty list means the options are not there (yet).
    async fn options(&self, field: &FieldSpec, parents: &[String]) -> Vec<SelectOption>;
}

#[derive(Debug, Default)]
struct Catalog {
    locations: Option<LocationTree>,
    banks: Option<Vec<String>>,
    occupations: Option<Vec<String>>,
}

/// Loaded reference data, filled in as each dataset arrives.
#[derive(Debug, Default)]
pub struct ReferenceOptions {
    catalog: RwLock<Catalog>,
}

impl ReferenceOptions {
    pub fn new() -> Self {
        Self::default()
    }

    pub async fn set_locations(&self, tree: LocationTree) {
        self.catalog.write().await.locations = Some(tree);
    }

    pub async fn set_banks(&self, banks: Vec<Bank>) {
        let mut names: Vec<String> = banks.into_iter().map(|b| b.name).collect();
        names.sort();
        self.catalog.write().await.banks = Some(names);
    }

    pub async fn set_occupations(&self, occupations: Vec<Occupation>) {
        let mut names: Vec<String> = occupations.into_iter().map(|o| o.name).collect();
        names.sort();
        self.catalog.write().await.occupations = Some(names);
    }

    /// Loads every dataset concurrently and signals each one as it lands.
    pub async fn load_from(
        &self,
        source: &dyn ReferenceSource,
        gate: &ReadinessGate,
    ) -> Result<(), ReferenceError> {
        let locations = async {
            let tree = source.locations().await?;
            self.set_locations(tree).await;
            gate.signal(ReadySignal::Locations);
            Ok::<_, ReferenceError>(())
        };
        let banks = async {
            let banks = source.banks().await?;
            self.set_banks(banks).await;
            gate.signal(ReadySignal::Banks);
            Ok::<_, ReferenceError>(())
        };
        let occupations = async {
            let occupations = source.occupations().await?;
            self.set_occupations(occupations).await;
            gate.signal(ReadySignal::Occupations);
            Ok::<_, ReferenceError>(())
        };
        futures::try_join!(locations, banks, occupations)
            .map(|_| ())
            .inspect_err(|err| error!(%err, "reference data failed to load"))
    }
}

#[async_trait]
impl OptionSource for ReferenceOptions {
    async fn options(&self, field: &FieldSpec, parents: &[String]) -> Vec<SelectOption> {
        let catalog = self.catalog.read().await;
        let names: Vec<String> = match field.kind {
            FieldKind::Select(SelectSource::Static(list)) => {
                list.iter().map(|s| s.to_string()).collect()
            }
            FieldKind::Select(SelectSource::Banks) => catalog.banks.clone().unwrap_or_default(),
            FieldKind::Select(SelectSource::Occupations) => {
                catalog.occupations.clone().unwrap_or_default()
            }
            FieldKind::Cascade(_, level) => {
                let Some(tree) = catalog.locations.as_ref() else {
                    return Vec::new();
                };
                match (level, parents) {
                    (CascadeLevel::Province, _) => tree.provinces(),
                    (CascadeLevel::District, [province, ..]) => tree.districts(province),
                    (CascadeLevel::Municipality, [province, district, ..]) => {
                        tree.municipalities(province, district)
                    }
                    _ => Vec::new(),
                }
            }
            _ => Vec::new(),
        };
        debug!(field = field.name, count = names.len(), "options queried");
        names.into_iter().map(SelectOption::plain).collect()
    }
}

#[async_trait]
impl ReadinessProbe for ReferenceOptions {
    async fn detect(&self) -> Readiness {
        let catalog = self.catalog.read().await;
        Readiness {
            locations: catalog.locations.as_ref().is_some_and(|t| !t.is_empty()),
            banks: catalog.banks.as_ref().is_some_and(|b| !b.is_empty()),
            occupations: catalog.occupations.as_ref().is_some_and(|o| !o.is_empty()),
            calendar: calendar_detected(),
        }
    }
}
