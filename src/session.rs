//! The form session: field values, their metadata, documents, the step
//! pointer and the mobile verification gate.
use std::collections::BTreeMap;
use std::sync::LazyLock;

use chrono::NaiveDate;
use regex::Regex;
use serde_json::{Map, Value, json};
use tracing::debug;

use crate::calendar::{bs_to_ad, is_valid_ad_date, parse_bs, Calendar};
use crate::config::FormConfig;
use crate::date_pair::{self, DateFieldPair, DateSide, SyncOutcome};
use crate::documents::{DocumentSet, DocumentSlot, StagedFile};
use crate::error::{FieldError, NavigationError, UploadRejection};
use crate::field::{EditOrigin, FieldState, FieldValue};
use crate::otp::{is_valid_nepali_mobile, OtpGate};
use crate::persistence::{
    ADDITIONAL_DOCUMENTS_KEY, CURRENT_STEP_KEY, MOBILE_VERIFIED_KEY, ProgressSnapshot, SaveReceipt,
};
use crate::rules::{Effect, RuleSet};
use crate::schema::{FieldFormat, FieldKind, FieldSpec, FormSchema, YES_NO, names};
use crate::steps::{StepMachine, StepReport, StepValidator, Transition};

static EMAIL: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r"^[a-zA-Z0-9._-]+@[a-zA-Z0-9.-]+\.[a-zA-Z]{2,}$").expect("static pattern")
});

static EMPTY: FieldValue = FieldValue::Empty;

fn is_devanagari(c: char) -> bool {
    ('\u{0900}'..='\u{097F}').contains(&c)
}

fn format_ok(format: FieldFormat, text: &str) -> bool {
    let text = text.trim();
    match format {
        FieldFormat::Free => true,
        FieldFormat::Email => EMAIL.is_match(text),
        FieldFormat::ContactNumber => text.chars().filter(char::is_ascii_digit).count() >= 10,
        FieldFormat::Digits => text.chars().all(|c| c.is_ascii_digit()),
        FieldFormat::Devanagari => text.chars().all(|c| is_devanagari(c) || c.is_whitespace()),
    }
}

/// What an accepted edit did besides storing the value.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum EditOutcome {
    Applied,
    /// The other side of a date pair was filled in.
    Derived { field: &'static str, value: String },
    /// A future date was entered; both sides of the pair were cleared.
    FutureDate { label: &'static str },
    /// The date text could not be converted and nothing was derived.
    Unconvertible,
}

#[derive(Debug, Clone)]
pub struct FormSession {
    schema: FormSchema,
    rules: RuleSet,
    values: BTreeMap<&'static str, FieldValue>,
    states: BTreeMap<&'static str, FieldState>,
    documents: DocumentSet,
    machine: StepMachine,
    otp: OtpGate,
    today: NaiveDate,
    policy_no: String,
    csrf_token: String,
    revision: u64,
    submitted: bool,
}

impl FormSession {
    pub fn new(cfg: &FormConfig, today: NaiveDate) -> Self {
        let schema = FormSchema::kyc();
        let states = schema
            .fields()
            .iter()
            .map(|f| (f.name, FieldState::new(f.required)))
            .collect();
        let mut session = Self {
            schema,
            rules: RuleSet::new(schema, &cfg.occupations),
            values: BTreeMap::new(),
            states,
            documents: DocumentSet::new(&cfg.uploads),
            machine: StepMachine::new(schema.total_steps()),
            otp: OtpGate::default(),
            today,
            policy_no: String::new(),
            csrf_token: String::new(),
            revision: 0,
            submitted: false,
        };
        session.recompute_rules();
        session.revision = 0;
        session
    }

    pub fn with_policy(mut self, policy_no: impl Into<String>) -> Self {
        self.policy_no = policy_no.into();
        self
    }

    pub fn with_csrf_token(mut self, token: impl Into<String>) -> Self {
        self.csrf_token = token.into();
        self
    }

    pub fn schema(&self) -> &FormSchema {
        &self.schema
    }

    pub fn rules(&self) -> &RuleSet {
        &self.rules
    }

    pub fn policy_no(&self) -> &str {
        &self.policy_no
    }

    pub fn today(&self) -> NaiveDate {
        self.today
    }

    pub fn current_step(&self) -> u8 {
        self.machine.current()
    }

    pub fn highest_step(&self) -> u8 {
        self.machine.highest()
    }

    pub fn total_steps(&self) -> u8 {
        self.machine.total()
    }

    pub fn is_last_step(&self) -> bool {
        self.machine.is_last()
    }

    /// Bumped on every change to values or documents.
    pub fn revision(&self) -> u64 {
        self.revision
    }

    pub fn is_submitted(&self) -> bool {
        self.submitted
    }

    pub(crate) fn mark_submitted(&mut self) {
        self.submitted = true;
    }

    pub fn value(&self, name: &str) -> &FieldValue {
        self.values.get(name).unwrap_or(&EMPTY)
    }

    pub fn values(&self) -> &BTreeMap<&'static str, FieldValue> {
        &self.values
    }

    pub fn state(&self, name: &str) -> FieldState {
        self.states
            .get(name)
            .copied()
            .unwrap_or_else(|| FieldState::new(false))
    }

    pub fn documents(&self) -> &DocumentSet {
        &self.documents
    }

    pub fn otp(&self) -> &OtpGate {
        &self.otp
    }

    pub(crate) fn otp_mut(&mut self) -> &mut OtpGate {
        &mut self.otp
    }

    pub fn is_mobile_verified(&self) -> bool {
        self.otp.is_verified()
    }

    /// Applies an edit. Only user edits derive the other side of a date pair,
    /// so a derived write never feeds back into the field that caused it.
    pub fn set_field(
        &mut self,
        name: &str,
        value: impl Into<FieldValue>,
        origin: EditOrigin,
    ) -> Result<EditOutcome, FieldError> {
        if self.submitted {
            return Err(FieldError::AlreadySubmitted);
        }
        let spec = self
            .schema
            .field(name)
            .ok_or_else(|| FieldError::UnknownField(name.to_string()))?;
        let value = coerce(spec, value.into())?;

        if origin == EditOrigin::User && self.state(spec.name).readonly {
            return Err(FieldError::ReadOnly(spec.name));
        }
        if matches!(spec.kind, FieldKind::Mobile) {
            if let Some(verified) = self.otp.verified_mobile() {
                if verified != value.as_str().trim() {
                    return Err(FieldError::MobileLocked);
                }
            }
            self.otp.mobile_changed(value.as_str());
        }

        let changed = self.value(spec.name) != &value;
        self.write(spec.name, value);
        if changed {
            if let FieldKind::Cascade(kind, level) = spec.kind {
                // a new parent invalidates every level below it
                for child in kind.cascade().into_iter().skip(level as usize + 1) {
                    self.write(child, FieldValue::Empty);
                }
            }
        }

        let mut outcome = EditOutcome::Applied;
        if origin == EditOrigin::User {
            if let Some((pair, side)) = date_pair::pair_for(spec.name) {
                outcome = self.sync_dates(pair, side)?;
            }
        }
        if self.rules.controls(spec.name) {
            self.recompute_rules();
        }
        Ok(outcome)
    }

    fn write(&mut self, name: &'static str, value: FieldValue) {
        if value.is_filled() {
            if let Some(state) = self.states.get_mut(name) {
                state.invalid = false;
            }
        }
        if self.value(name) != &value {
            self.values.insert(name, value);
            self.revision += 1;
        }
    }

    fn sync_dates(&mut self, pair: &DateFieldPair, side: DateSide) -> Result<EditOutcome, FieldError> {
        let raw = self.value(pair.field(side)).as_str().to_string();
        match date_pair::sync_pair(pair, side, &raw, self.today) {
            SyncOutcome::Skipped => Ok(EditOutcome::Applied),
            SyncOutcome::Unconvertible => Ok(EditOutcome::Unconvertible),
            SyncOutcome::Derived { field, value } => {
                self.set_field(field, value.as_str(), EditOrigin::Derived)?;
                for name in [pair.bs_field, pair.ad_field] {
                    if let Some(state) = self.states.get_mut(name) {
                        state.invalid = false;
                    }
                }
                Ok(EditOutcome::Derived { field, value })
            }
            SyncOutcome::FutureDate => {
                for name in [pair.bs_field, pair.ad_field] {
                    self.write(name, FieldValue::Empty);
                    if let Some(state) = self.states.get_mut(name) {
                        state.invalid = true;
                    }
                }
                Ok(EditOutcome::FutureDate { label: pair.label })
            }
        }
    }

    /// Runs every conditional rule against the current values.
    pub fn recompute_rules(&mut self) {
        for effect in self.rules.evaluate(&self.values) {
            match effect {
                Effect::Meta {
                    field,
                    required,
                    readonly,
                    visible,
                } => {
                    if let Some(state) = self.states.get_mut(field) {
                        state.required = required;
                        state.readonly = readonly;
                        state.visible = visible;
                        if !required {
                            state.invalid = false;
                        }
                    }
                }
                Effect::Clear(field) => self.write(field, FieldValue::Empty),
                Effect::Mirror { from, to } => {
                    let value = self.value(from).clone();
                    self.write(to, value);
                }
            }
        }
    }

    fn field_problem(&self, spec: &FieldSpec) -> bool {
        let state = self.state(spec.name);
        if !state.visible {
            return false;
        }
        if spec.name == names::PAN_NUMBER
            && self.rules.is_pan_exempt(self.value(names::OCCUPATION).as_str())
        {
            return false;
        }
        let value = self.value(spec.name);
        let missing = state.required && !value.is_filled();
        match spec.kind {
            FieldKind::File(slot) => state.required && !self.documents.is_satisfied(slot),
            FieldKind::Radio(options) => {
                state.required && !options.iter().any(|o| *o == value.as_str())
            }
            FieldKind::Checkbox => state.required && !value.is_checked(),
            FieldKind::Mobile => {
                missing || (value.is_filled() && !is_valid_nepali_mobile(value.as_str()))
            }
            FieldKind::Text(format) => {
                missing || (value.is_filled() && !format_ok(format, value.as_str()))
            }
            FieldKind::Date(calendar) => {
                let text = value.as_str().trim();
                let well_formed = match calendar {
                    Calendar::Bs => parse_bs(text).is_ok(),
                    Calendar::Ad => is_valid_ad_date(text),
                };
                missing || (value.is_filled() && !(well_formed && self.pair_agrees(spec.name)))
            }
            FieldKind::Select(_) | FieldKind::Cascade(..) => missing,
        }
    }

    /// Both sides of a filled date pair must name the same day.
    fn pair_agrees(&self, name: &str) -> bool {
        let Some((pair, _)) = date_pair::pair_for(name) else {
            return true;
        };
        let bs = self.value(pair.bs_field).as_str();
        let ad = self.value(pair.ad_field).as_str().trim();
        if bs.trim().is_empty() || ad.is_empty() {
            return true;
        }
        bs_to_ad(bs) == ad
    }

    /// Blur-time check of a single field. Marks and returns its validity.
    pub fn touch(&mut self, name: &str) -> Result<bool, FieldError> {
        let spec = self
            .schema
            .field(name)
            .ok_or_else(|| FieldError::UnknownField(name.to_string()))?;
        let bad = self.field_problem(spec);
        if let Some(state) = self.states.get_mut(spec.name) {
            state.invalid = bad;
        }
        Ok(!bad)
    }

    pub fn next(&mut self) -> Result<Transition, NavigationError> {
        let mut machine = self.machine;
        let result = machine.next(self);
        self.machine = machine;
        result
    }

    pub fn previous(&mut self) -> Transition {
        self.machine.previous()
    }

    pub fn go_to(&mut self, target: u8) -> Result<Transition, NavigationError> {
        let mut machine = self.machine;
        let result = machine.go_to(target, self);
        self.machine = machine;
        result
    }

    /// Replays validation up to the saved step pointer; see [`StepMachine::restore`].
    pub fn restore_step(&mut self, saved: Option<u8>) -> u8 {
        let mut machine = self.machine;
        let landed = machine.restore(saved, self);
        self.machine = machine;
        landed
    }

    pub fn stage_document(&mut self, slot: DocumentSlot, file: StagedFile) -> Result<(), UploadRejection> {
        self.ensure_open_for_documents()?;
        let before = self.documents.staged(slot).cloned();
        let result = self.documents.stage(slot, file);
        if self.documents.staged(slot) != before.as_ref() {
            self.revision += 1;
        }
        result
    }

    pub fn remove_document(&mut self, slot: DocumentSlot) {
        if self.documents.unstage(slot).is_some() {
            self.revision += 1;
        }
    }

    pub fn add_additional_document(
        &mut self,
        name: impl Into<String>,
        file: StagedFile,
    ) -> Result<usize, UploadRejection> {
        self.ensure_open_for_documents()?;
        let index = self.documents.add_additional(name, file)?;
        self.revision += 1;
        Ok(index)
    }

    pub fn remove_additional_document(&mut self, index: usize) -> bool {
        let removed = self.documents.remove_additional(index).is_some();
        if removed {
            self.revision += 1;
        }
        removed
    }

    fn ensure_open_for_documents(&self) -> Result<(), UploadRejection> {
        if self.submitted {
            return Err(UploadRejection::FormSubmitted);
        }
        Ok(())
    }

    pub(crate) fn documents_mut(&mut self) -> &mut DocumentSet {
        &mut self.documents
    }

    /// Swaps staged files for the URLs a successful save assigned to them.
    pub fn apply_save_receipt(&mut self, receipt: &SaveReceipt) {
        self.documents
            .promote(&receipt.document_urls, &receipt.additional_urls);
        debug!(
            stored = receipt.document_urls.len(),
            "document references updated"
        );
    }

    /// Serialises the session for a save, recording `step_pointer` as the step to resume at.
    pub fn snapshot(&self, step_pointer: u8) -> ProgressSnapshot {
        let mut kyc_data = Map::new();
        for spec in self.schema.fields() {
            let value = self.value(spec.name);
            let json = match spec.kind {
                FieldKind::File(_) => continue,
                FieldKind::Radio(options) if options == YES_NO => match value.as_str() {
                    "yes" => Value::Bool(true),
                    "no" => Value::Bool(false),
                    _ => Value::Null,
                },
                FieldKind::Checkbox => Value::Bool(value.is_checked()),
                _ => match value {
                    FieldValue::Text(s) => Value::String(s.clone()),
                    FieldValue::Flag(b) => Value::Bool(*b),
                    FieldValue::Empty => Value::Null,
                },
            };
            kyc_data.insert(spec.name.to_string(), json);
        }
        for (slot, url) in self.documents.existing_urls() {
            kyc_data.insert(slot.url_key().to_string(), Value::String(url.clone()));
        }
        let carried: Vec<Value> = self
            .documents
            .additional()
            .iter()
            .filter_map(|doc| {
                let url = doc.url.as_ref()?;
                Some(json!({ "name": doc.name, "url": url }))
            })
            .collect();
        kyc_data.insert(ADDITIONAL_DOCUMENTS_KEY.to_string(), Value::Array(carried));
        kyc_data.insert(CURRENT_STEP_KEY.to_string(), json!(step_pointer));
        kyc_data.insert(
            MOBILE_VERIFIED_KEY.to_string(),
            Value::Bool(self.otp.is_verified()),
        );

        ProgressSnapshot {
            policy_no: self.policy_no.clone(),
            csrf_token: self.csrf_token.clone(),
            kyc_data,
            files: self
                .documents
                .staged_slots()
                .map(|(slot, file)| (slot, file.clone()))
                .collect(),
            additional_docs: self
                .documents
                .additional()
                .iter()
                .filter_map(|doc| Some((doc.name.clone(), doc.file.clone()?)))
                .collect(),
        }
    }
}

impl StepValidator for FormSession {
    fn validate_step(&mut self, step: u8) -> StepReport {
        let mut report = StepReport::new(step);
        for spec in self.schema.step_fields(step) {
            let bad = self.field_problem(spec);
            if let Some(state) = self.states.get_mut(spec.name) {
                state.invalid = bad;
            }
            if bad {
                report.push(spec.label);
            }
        }

        let mobile = self
            .schema
            .step_fields(step)
            .find(|f| matches!(f.kind, FieldKind::Mobile));
        if let Some(mobile) = mobile {
            if self.state(mobile.name).required && !self.otp.is_verified() {
                if let Some(state) = self.states.get_mut(mobile.name) {
                    state.invalid = true;
                }
                report.push(format!("{} (Not Verified)", mobile.label));
            }
        }
        report
    }
}

/// Normalises a value for the kind of field it is written to.
fn coerce(spec: &'static FieldSpec, value: FieldValue) -> Result<FieldValue, FieldError> {
    Ok(match spec.kind {
        FieldKind::File(_) => return Err(FieldError::FileField(spec.name)),
        FieldKind::Checkbox => FieldValue::Flag(match &value {
            FieldValue::Flag(b) => *b,
            FieldValue::Text(s) => matches!(s.trim().to_ascii_lowercase().as_str(), "on" | "true" | "1" | "yes"),
            FieldValue::Empty => false,
        }),
        FieldKind::Radio(options) => {
            let wanted = value.as_str().trim();
            options
                .iter()
                .find(|o| o.eq_ignore_ascii_case(wanted))
                .map(|o| FieldValue::text(*o))
                .unwrap_or_default()
        }
        FieldKind::Text(FieldFormat::Devanagari) => FieldValue::text(
            value
                .as_str()
                .chars()
                .filter(|c| is_devanagari(*c) || c.is_whitespace())
                .collect::<String>(),
        ),
        _ => match value {
            FieldValue::Flag(b) => FieldValue::text(b.to_string()),
            other => other,
        },
    })
}
