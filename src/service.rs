//! Service layer API for onboarding workflow operations
use std::future::Future;
use std::sync::Arc;

use chrono::NaiveDate;
use tracing::{info, warn};

use crate::config::FormConfig;
use crate::error::{
    FieldError, KycError, NavigationError, OtpError, PersistenceError, PrefillError, SubmitBlocked,
};
use crate::otp::OtpChannel;
use crate::persistence::{ProgressStore, SaveReceipt, SubmissionEndpoint, SubmissionReceipt};
use crate::prefill::{PrefillOrchestrator, PrefillReport};
use crate::readiness::ReadinessGate;
use crate::reference::{ReferenceOptions, ReferenceSource};
use crate::schema::names;
use crate::session::FormSession;
use crate::steps::{StepValidator, Transition};
use crate::summary::ConfirmationSummary;

pub struct KycService<S> {
    store: Arc<S>,
    otp: Arc<dyn OtpChannel>,
    config: FormConfig,
}

impl<S> KycService<S>
where
    S: ProgressStore + SubmissionEndpoint,
{
    pub fn new(store: Arc<S>, otp: Arc<dyn OtpChannel>, config: FormConfig) -> Self {
        Self { store, otp, config }
    }

    pub fn config(&self) -> &FormConfig {
        &self.config
    }

    /// Start a blank session for `policy_no`
    pub fn new_session(&self, policy_no: &str, today: NaiveDate) -> FormSession {
        FormSession::new(&self.config, today).with_policy(policy_no)
    }

    /// Message for the user, with long missing-field lists shortened
    pub fn user_message(&self, err: &KycError) -> String {
        let cap = self.config.max_listed_missing;
        match err {
            KycError::Navigation(NavigationError::Incomplete(report))
            | KycError::Submit(SubmitBlocked::Incomplete(report)) => {
                format!("Please complete the required fields: {}", report.summary(cap))
            }
            other => other.user_message(),
        }
    }

    async fn bounded<T>(
        &self,
        request: impl Future<Output = Result<T, PersistenceError>>,
    ) -> Result<T, PersistenceError> {
        match tokio::time::timeout(self.config.request_timeout(), request).await {
            Ok(result) => result,
            Err(_) => {
                warn!(timeout_ms = self.config.request_timeout_ms, "request timed out");
                Err(PersistenceError::Timeout(self.config.request_timeout_ms))
            }
        }
    }

    /// Saves the session, recording `step_pointer` as the step to resume at.
    /// On failure the session is left as it was.
    async fn persist(
        &self,
        session: &mut FormSession,
        step_pointer: u8,
    ) -> Result<SaveReceipt, KycError> {
        if session.is_submitted() {
            return Err(FieldError::AlreadySubmitted.into());
        }
        if session.policy_no().trim().is_empty() {
            return Err(PersistenceError::MissingPolicy.into());
        }

        let snapshot = session.snapshot(step_pointer);
        let receipt = self
            .bounded(self.store.save_progress(&snapshot))
            .await
            .inspect_err(|err| warn!(policy_no = session.policy_no(), %err, "save failed"))?;

        // Stored files are references from now on
        session.apply_save_receipt(&receipt);
        Ok(receipt)
    }

    /// Explicit save without moving
    pub async fn save_progress(&self, session: &mut FormSession) -> Result<SaveReceipt, KycError> {
        let step = session.current_step();
        self.persist(session, step).await
    }

    /// Validate the current step, save, then advance
    pub async fn save_and_continue(
        &self,
        session: &mut FormSession,
    ) -> Result<Transition, KycError> {
        if session.is_last_step() {
            return Err(NavigationError::AtLastStep.into());
        }

        // Validate
        let current = session.current_step();
        let report = session.validate_step(current);
        if !report.is_valid() {
            return Err(NavigationError::Incomplete(report).into());
        }

        // Save with the pointer of the step being advanced to
        self.persist(session, current + 1).await?;

        // Advance
        Ok(session.next()?)
    }

    /// Loads the select datasets into `options` and announces the calendar
    /// once it has settled. A dataset that fails to load blocks the form.
    pub async fn load_reference(
        &self,
        options: &ReferenceOptions,
        source: &dyn ReferenceSource,
        gate: &ReadinessGate,
    ) -> Result<(), KycError> {
        let (loaded, _) = tokio::join!(
            options.load_from(source, gate),
            gate.announce_calendar_ready(self.config.prefill.calendar_settle()),
        );
        loaded.map_err(|err| {
            warn!(%err, "reference data unavailable");
            PrefillError::Reference(err).into()
        })
    }

    /// Load saved progress for the session's policy and prefill from it.
    /// Returns `None` when nothing was saved yet.
    pub async fn resume_session(
        &self,
        session: &mut FormSession,
        prefill: &PrefillOrchestrator<'_>,
    ) -> Result<Option<PrefillReport>, KycError> {
        let policy_no = session.policy_no().to_string();
        if policy_no.trim().is_empty() {
            return Err(PersistenceError::MissingPolicy.into());
        }

        let Some(data) = self.bounded(self.store.load_progress(&policy_no)).await? else {
            info!(policy_no, "no saved progress, starting fresh");
            return Ok(None);
        };

        let report = prefill.run(session, &data).await?;
        info!(policy_no, step = report.resumed_step, "session resumed");
        Ok(Some(report))
    }

    /// Send a verification code to the mobile number currently entered
    pub async fn send_otp(&self, session: &mut FormSession) -> Result<(), KycError> {
        let mobile = session.value(names::MOBILE).as_str().trim().to_string();
        session.otp().check_send(&mobile)?;

        self.otp.send(&mobile).await?;
        session.otp_mut().code_sent(&mobile);

        info!("verification code sent");
        Ok(())
    }

    /// Check `code` against the number it was sent to
    pub async fn verify_otp(&self, session: &mut FormSession, code: &str) -> Result<(), KycError> {
        let mobile = session.otp().pending_mobile()?.to_string();

        if !self.otp.verify(&mobile, code.trim()).await? {
            warn!("verification code rejected");
            return Err(OtpError::InvalidCode.into());
        }
        session.otp_mut().confirm();

        info!("mobile number verified");
        Ok(())
    }

    /// Final submit gate. Saves and returns the summary the user must confirm.
    pub async fn request_submit(
        &self,
        session: &mut FormSession,
    ) -> Result<ConfirmationSummary, KycError> {
        if session.is_submitted() {
            return Err(FieldError::AlreadySubmitted.into());
        }
        let current = session.current_step();
        if !session.is_last_step() {
            return Err(SubmitBlocked::NotOnLastStep { current }.into());
        }
        if !session.is_mobile_verified() {
            return Err(SubmitBlocked::MobileNotVerified.into());
        }

        // Validate the last step
        let report = session.validate_step(current);
        if !report.is_valid() {
            return Err(SubmitBlocked::Incomplete(report).into());
        }

        // Save before anything is shown
        self.persist(session, current).await?;

        Ok(ConfirmationSummary::from_session(session))
    }

    /// Submits after the user answered the confirmation. Declining returns
    /// `None` and leaves the session untouched.
    pub async fn confirm_submit(
        &self,
        session: &mut FormSession,
        summary: &ConfirmationSummary,
        confirmed: bool,
    ) -> Result<Option<SubmissionReceipt>, KycError> {
        if !confirmed {
            info!("submission declined");
            return Ok(None);
        }
        if session.is_submitted() {
            return Err(FieldError::AlreadySubmitted.into());
        }
        if summary.revision != session.revision() {
            return Err(SubmitBlocked::StaleConfirmation.into());
        }

        let snapshot = session.snapshot(session.current_step());
        let receipt = self.bounded(self.store.submit(&snapshot)).await?;
        session.mark_submitted();

        info!(policy_no = session.policy_no(), reference = %receipt.reference, "submission complete");
        Ok(Some(receipt))
    }
}
