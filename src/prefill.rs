//! Rebuilding a session from saved progress.
//!
//! Order matters here: nothing is written before every dataset is ready,
//! cascade levels are written parent first, rules run after their
//! controlling values are in place and the step pointer is restored last.
use futures::future::join_all;
use tracing::{debug, info, warn};

use crate::calendar::{ad_to_bs, bs_to_ad, is_valid_ad_date};
use crate::config::PrefillConfig;
use crate::date_pair::KYC_DATE_PAIRS;
use crate::documents::DocumentSlot;
use crate::error::PrefillError;
use crate::field::{EditOrigin, FieldValue};
use crate::otp::is_valid_nepali_mobile;
use crate::persistence::PrefillData;
use crate::readiness::{ReadinessGate, ReadinessProbe};
use crate::reference::OptionSource;
use crate::schema::{AddressKind, FieldKind, FieldSpec, FormSchema, names};
use crate::session::FormSession;

const NO_PARENTS: &[String] = &[];

#[derive(Debug, Clone, PartialEq, Eq, Default)]
pub struct PrefillReport {
    pub filled: usize,
    /// Saved values no option matched within the retry budget.
    pub unmatched: Vec<&'static str>,
    pub resumed_step: u8,
}

pub struct PrefillOrchestrator<'a> {
    config: &'a PrefillConfig,
    gate: &'a ReadinessGate,
    probe: &'a dyn ReadinessProbe,
    options: &'a dyn OptionSource,
}

/// Saved radio values may be booleans or `1`/`0`.
fn radio_text(raw: &str) -> &str {
    match raw.trim() {
        "true" | "1" => "yes",
        "false" | "0" => "no",
        other => other,
    }
}

fn is_plain(spec: &FieldSpec) -> bool {
    match spec.kind {
        FieldKind::Text(_) | FieldKind::Mobile | FieldKind::Checkbox => {
            spec.name != names::SAME_ADDRESS
        }
        FieldKind::Date(crate::calendar::Calendar::Ad) => true,
        _ => false,
    }
}

impl<'a> PrefillOrchestrator<'a> {
    pub fn new(
        config: &'a PrefillConfig,
        gate: &'a ReadinessGate,
        probe: &'a dyn ReadinessProbe,
        options: &'a dyn OptionSource,
    ) -> Self {
        Self {
            config,
            gate,
            probe,
            options,
        }
    }

    /// Populates `session` from `data` within the configured time limit.
    ///
    /// Works on a copy; `session` is only replaced when the run completes.
    pub async fn run(
        &self,
        session: &mut FormSession,
        data: &PrefillData,
    ) -> Result<PrefillReport, PrefillError> {
        let mut draft = session.clone();
        let limit = self.config.timeout();
        match tokio::time::timeout(limit, self.populate(&mut draft, data)).await {
            Ok(report) => {
                *session = draft;
                info!(
                    filled = report.filled,
                    unmatched = report.unmatched.len(),
                    step = report.resumed_step,
                    "prefill complete"
                );
                Ok(report)
            }
            Err(_) => {
                let pending = self.gate.snapshot().pending();
                warn!(?pending, ?limit, "prefill timed out");
                Err(PrefillError::Timeout { pending })
            }
        }
    }

    async fn populate(&self, session: &mut FormSession, data: &PrefillData) -> PrefillReport {
        let mut report = PrefillReport::default();

        self.gate
            .wait_all(self.probe, self.config.fallback_poll())
            .await;
        debug!("reference data ready, populating fields");

        let schema = *session.schema();
        let fields = schema.fields();

        // plain values
        for spec in fields.iter().filter(|f| is_plain(f)) {
            let value = match spec.kind {
                FieldKind::Checkbox => FieldValue::Flag(data.flag(spec.name)),
                _ if spec.name == names::BRANCH_NAME => match data.branch_name() {
                    Some(v) => FieldValue::text(v),
                    None => continue,
                },
                _ => match data.text(spec.name) {
                    Some(v) => FieldValue::text(v),
                    None => continue,
                },
            };
            self.apply(session, spec.name, value, &mut report);
        }

        // BS sides follow the saved AD dates
        for pair in KYC_DATE_PAIRS {
            let ad = session.value(pair.ad_field).as_str().trim().to_string();
            let bs = if is_valid_ad_date(&ad) { ad_to_bs(&ad) } else { String::new() };
            if !bs.is_empty() {
                self.apply(session, pair.bs_field, FieldValue::text(bs), &mut report);
                continue;
            }
            // no usable AD date, fall back to the saved BS one
            if let Some(saved_bs) = data.text(pair.bs_field) {
                let ad = bs_to_ad(saved_bs.as_str());
                if !ad.is_empty() {
                    self.apply(session, pair.bs_field, FieldValue::text(saved_bs), &mut report);
                    self.apply(session, pair.ad_field, FieldValue::text(ad), &mut report);
                }
            }
        }

        // radio groups
        for spec in schema.radio_fields() {
            let Some(raw) = data.text(spec.name) else {
                continue;
            };
            self.apply(session, spec.name, FieldValue::text(radio_text(&raw)), &mut report);
            if !session.value(spec.name).is_filled() {
                report.unmatched.push(spec.name);
            }
        }

        // selects resolve concurrently; each cascade walks its levels in order
        let selects: Vec<_> = fields
            .iter()
            .filter(|f| matches!(f.kind, FieldKind::Select(_)))
            .filter_map(|f| Some((f, data.text(f.name)?)))
            .collect();
        let (resolved, permanent, temporary) = tokio::join!(
            join_all(
                selects
                    .iter()
                    .map(|(spec, expected)| self.resolve(spec, expected, NO_PARENTS))
            ),
            self.resolve_cascade(schema, AddressKind::Permanent, data),
            self.resolve_cascade(schema, AddressKind::Temporary, data),
        );
        for ((spec, _), value) in selects.iter().zip(resolved) {
            match value {
                Some(v) => self.apply(session, spec.name, FieldValue::text(v), &mut report),
                None => report.unmatched.push(spec.name),
            }
        }
        for (name, value) in permanent.into_iter().chain(temporary) {
            match value {
                Some(v) => self.apply(session, name, FieldValue::text(v), &mut report),
                None => report.unmatched.push(name),
            }
        }

        if data.flag(names::SAME_ADDRESS) {
            self.apply(session, names::SAME_ADDRESS, FieldValue::Flag(true), &mut report);
        }
        session.recompute_rules();

        // stored documents
        let documents = session.documents_mut();
        for slot in DocumentSlot::ALL {
            if let Some(url) = data.document_url(slot) {
                documents.set_existing(slot, url);
            }
        }
        for (name, url) in data.additional_documents() {
            documents.push_existing_additional(name, url);
        }

        let mobile = session.value(names::MOBILE).as_str().trim().to_string();
        if data.mobile_verified() && is_valid_nepali_mobile(&mobile) {
            session.otp_mut().restore_verified(&mobile);
        }

        report.resumed_step = session.restore_step(data.current_step());
        report
    }

    fn apply(
        &self,
        session: &mut FormSession,
        name: &'static str,
        value: FieldValue,
        report: &mut PrefillReport,
    ) {
        match session.set_field(name, value, EditOrigin::Prefill) {
            Ok(_) => report.filled += 1,
            Err(err) => warn!(field = name, %err, "saved value not applied"),
        }
    }

    /// Polls the options of `spec` until one matches `expected`.
    async fn resolve(&self, spec: &FieldSpec, expected: &str, parents: &[String]) -> Option<String> {
        let options = self.options;
        let found = self
            .config
            .select_retry
            .poll(move || async move {
                options
                    .options(spec, parents)
                    .await
                    .into_iter()
                    .find(|o| o.matches(expected))
                    .map(|o| o.value)
            })
            .await;
        if found.is_none() {
            warn!(field = spec.name, expected, "no matching option");
        }
        found
    }

    /// Resolves province, district and municipality in that order. Stops at
    /// the first level without a saved value or a matching option.
    async fn resolve_cascade(
        &self,
        schema: FormSchema,
        kind: AddressKind,
        data: &PrefillData,
    ) -> Vec<(&'static str, Option<String>)> {
        let mut resolved = Vec::new();
        let mut parents: Vec<String> = Vec::new();
        for name in kind.cascade() {
            let Some(spec) = schema.field(name) else {
                break;
            };
            let Some(expected) = data.text(name) else {
                break;
            };
            let value = self.resolve(spec, &expected, &parents).await;
            let matched = value.clone();
            resolved.push((name, value));
            let Some(v) = matched else {
                break;
            };
            parents.push(v);
        }
        resolved
    }
}
