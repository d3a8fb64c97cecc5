use std::sync::Arc;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::time::Duration;

use anyhow::Context;
use async_trait::async_trait;
use chrono::NaiveDate;
use sled::open;
use tempfile::tempdir; // Use for test db cleanup.

use kyc_onboarding::{
    config::FormConfig,
    documents::{DocumentSlot, StagedFile},
    error::{
        FieldError, KycError, NavigationError, OtpError, PersistenceError, PrefillError,
        ReferenceError, SubmitBlocked,
    },
    field::EditOrigin,
    otp::OtpChannel,
    persistence::{
        PrefillData, ProgressSnapshot, ProgressStore, SaveReceipt, SubmissionEndpoint,
        SubmissionReceipt,
    },
    prefill::PrefillOrchestrator,
    readiness::{ReadinessGate, ReadySignal},
    reference::{
        Bank, LocationTree, Occupation, OptionSource, ReferenceOptions, ReferenceSource,
        SelectOption,
    },
    schema::{CascadeLevel, FieldKind, FieldSpec, names},
    service::KycService,
    session::FormSession,
    store::SledProgressStore,
};

const LOCATIONS: &str = r#"{
    "Bagmati": { "Kathmandu": ["Kathmandu Metropolitan", "Kirtipur"], "Lalitpur": ["Lalitpur Metropolitan"] },
    "Koshi": { "Morang": ["Biratnagar"] }
}"#;

const CODE: &str = "123456";

fn today() -> NaiveDate {
    NaiveDate::from_ymd_opt(2025, 1, 15).unwrap()
}

/// Accepts a single fixed code.
struct FixedCodeOtp;

#[async_trait]
impl OtpChannel for FixedCodeOtp {
    async fn send(&self, _mobile: &str) -> Result<(), OtpError> {
        Ok(())
    }

    async fn verify(&self, _mobile: &str, code: &str) -> Result<bool, OtpError> {
        Ok(code == CODE)
    }
}

/// Every call fails the way a rejecting server would.
struct RejectingStore;

#[async_trait]
impl ProgressStore for RejectingStore {
    async fn save_progress(&self, _: &ProgressSnapshot) -> Result<SaveReceipt, PersistenceError> {
        Err(PersistenceError::Rejected {
            message: Some("Policy is locked for review".into()),
        })
    }

    async fn load_progress(&self, _: &str) -> Result<Option<PrefillData>, PersistenceError> {
        Err(PersistenceError::Rejected { message: None })
    }
}

#[async_trait]
impl SubmissionEndpoint for RejectingStore {
    async fn submit(&self, _: &ProgressSnapshot) -> Result<SubmissionReceipt, PersistenceError> {
        Err(PersistenceError::Rejected { message: None })
    }
}

/// Never answers within any reasonable time.
struct StalledStore;

#[async_trait]
impl ProgressStore for StalledStore {
    async fn save_progress(&self, _: &ProgressSnapshot) -> Result<SaveReceipt, PersistenceError> {
        tokio::time::sleep(Duration::from_secs(3600)).await;
        Ok(SaveReceipt::default())
    }

    async fn load_progress(&self, _: &str) -> Result<Option<PrefillData>, PersistenceError> {
        Ok(None)
    }
}

#[async_trait]
impl SubmissionEndpoint for StalledStore {
    async fn submit(&self, _: &ProgressSnapshot) -> Result<SubmissionReceipt, PersistenceError> {
        tokio::time::sleep(Duration::from_secs(3600)).await;
        Err(PersistenceError::Rejected { message: None })
    }
}

/// Serves fixed datasets, the occupations only after a delay.
struct StaticReference;

#[async_trait]
impl ReferenceSource for StaticReference {
    async fn locations(&self) -> Result<LocationTree, ReferenceError> {
        LocationTree::from_json(LOCATIONS)
    }

    async fn banks(&self) -> Result<Vec<Bank>, ReferenceError> {
        Ok(vec![
            Bank { name: "Nabil Bank".into() },
            Bank { name: "Everest Bank".into() },
        ])
    }

    async fn occupations(&self) -> Result<Vec<Occupation>, ReferenceError> {
        tokio::time::sleep(Duration::from_secs(2)).await;
        Ok(["Student", "Engineer", "Other", "House Wife"]
            .into_iter()
            .map(|name| Occupation { name: name.into() })
            .collect())
    }
}

/// The bank list never loads.
struct BrokenBanks;

#[async_trait]
impl ReferenceSource for BrokenBanks {
    async fn locations(&self) -> Result<LocationTree, ReferenceError> {
        LocationTree::from_json(LOCATIONS)
    }

    async fn banks(&self) -> Result<Vec<Bank>, ReferenceError> {
        Err(ReferenceError::Unavailable {
            dataset: "bank",
            reason: "503 Service Unavailable".into(),
        })
    }

    async fn occupations(&self) -> Result<Vec<Occupation>, ReferenceError> {
        Ok(vec![Occupation { name: "Student".into() }])
    }
}

/// District options only appear after a few polls, like a dropdown that is
/// still fetching children of the chosen province.
struct LateDistricts {
    inner: ReferenceOptions,
    empty_polls: usize,
    district_polls: AtomicUsize,
}

#[async_trait]
impl OptionSource for LateDistricts {
    async fn options(&self, field: &FieldSpec, parents: &[String]) -> Vec<SelectOption> {
        if matches!(field.kind, FieldKind::Cascade(_, CascadeLevel::District))
            && self.district_polls.fetch_add(1, Ordering::SeqCst) < self.empty_polls
        {
            return Vec::new();
        }
        self.inner.options(field, parents).await
    }
}

/// Refuses payloads whose anti-forgery token does not match.
struct TokenCheckingStore {
    inner: SledProgressStore,
    expected: String,
}

impl TokenCheckingStore {
    fn check(&self, snapshot: &ProgressSnapshot) -> Result<(), PersistenceError> {
        if snapshot.csrf_token == self.expected {
            Ok(())
        } else {
            Err(PersistenceError::Rejected {
                message: Some("CSRF verification failed".into()),
            })
        }
    }
}

#[async_trait]
impl ProgressStore for TokenCheckingStore {
    async fn save_progress(&self, snapshot: &ProgressSnapshot) -> Result<SaveReceipt, PersistenceError> {
        self.check(snapshot)?;
        self.inner.save_progress(snapshot).await
    }

    async fn load_progress(&self, policy_no: &str) -> Result<Option<PrefillData>, PersistenceError> {
        self.inner.load_progress(policy_no).await
    }
}

#[async_trait]
impl SubmissionEndpoint for TokenCheckingStore {
    async fn submit(&self, snapshot: &ProgressSnapshot) -> Result<SubmissionReceipt, PersistenceError> {
        self.check(snapshot)?;
        self.inner.submit(snapshot).await
    }
}

fn sled_service(
    dir: &tempfile::TempDir,
) -> anyhow::Result<(Arc<SledProgressStore>, KycService<SledProgressStore>)> {
    // Sled uses file-based locking, so every test opens its own database
    let db = Arc::new(open(dir.path().join("kyc.db"))?);
    let store = Arc::new(SledProgressStore::new(db));
    let service = KycService::new(
        store.clone(),
        Arc::new(FixedCodeOtp),
        FormConfig::default(),
    );
    Ok((store, service))
}

fn set_all(session: &mut FormSession, values: &[(&str, &str)]) -> anyhow::Result<()> {
    for (name, value) in values {
        session
            .set_field(name, *value, EditOrigin::User)
            .with_context(|| format!("setting {name}"))?;
    }
    Ok(())
}

fn fill_personal(session: &mut FormSession) -> anyhow::Result<()> {
    set_all(
        session,
        &[
            (names::SALUTATION, "Mr."),
            (names::FIRST_NAME, "Ram"),
            (names::LAST_NAME, "Thapa"),
            (names::GENDER, "Male"),
            (names::MARITAL_STATUS, "Single"),
            (names::NATIONALITY, "Nepali"),
            (names::DOB_AD, "1990-05-20"),
            (names::FATHER_NAME, "Hari Thapa"),
            (names::MOTHER_NAME, "Gita Thapa"),
            (names::GRAND_FATHER_NAME, "Shyam Thapa"),
            (names::CITIZENSHIP_NO, "27-01-75-01234"),
            (names::CITIZEN_AD, "2008-03-10"),
            (names::CITIZENSHIP_ISSUED_PLACE, "Kathmandu"),
        ],
    )
}

fn fill_occupation(session: &mut FormSession) -> anyhow::Result<()> {
    set_all(
        session,
        &[
            (names::OCCUPATION, "Student"),
            (names::QUALIFICATION, "Bachelor"),
            (names::BANK_NAME, "Nabil Bank"),
            (names::BRANCH_NAME, "Putalisadak"),
            (names::BANK_ACCOUNT_NUMBER, "0010100012345"),
            (names::ACCOUNT_TYPE, "Saving"),
        ],
    )
}

fn fill_address(session: &mut FormSession) -> anyhow::Result<()> {
    set_all(
        session,
        &[
            (names::PERM_PROVINCE, "Bagmati"),
            (names::PERM_DISTRICT, "Kathmandu"),
            (names::PERM_MUNICIPALITY, "Kirtipur"),
            (names::PERM_WARD, "5"),
            (names::PERM_ADDRESS, "Naya Bazar"),
        ],
    )?;
    session.set_field(names::SAME_ADDRESS, true, EditOrigin::User)?;
    Ok(())
}

fn fill_nominee(session: &mut FormSession) -> anyhow::Result<()> {
    set_all(
        session,
        &[
            (names::NOMINEE_NAME, "Hari Thapa"),
            (names::NOMINEE_RELATION, "Father"),
            (names::NOMINEE_DOB_AD, "1962-08-01"),
            (names::NOMINEE_CONTACT, "9851000000"),
        ],
    )
}

fn fill_contact(session: &mut FormSession) -> anyhow::Result<()> {
    set_all(
        session,
        &[
            (names::EMAIL, "ram.thapa@example.com"),
            (names::MOBILE, "9841234567"),
            (names::IS_PEP, "no"),
            (names::IS_AML, "no"),
        ],
    )?;
    session.set_field(names::DECLARATION, true, EditOrigin::User)?;
    for (slot, name, kind) in [
        (DocumentSlot::Photo, "photo.png", "image/png"),
        (DocumentSlot::CitizenshipFront, "front.pdf", "application/pdf"),
        (DocumentSlot::CitizenshipBack, "back.jpg", "image/jpeg"),
        (DocumentSlot::Signature, "sign.png", "image/png"),
    ] {
        session.stage_document(slot, StagedFile::new(name, kind, vec![42u8; 2048]))?;
    }
    Ok(())
}

/// Walks steps 1..=4 with save-and-continue, ending on the last step.
async fn walk_to_last_step(
    service: &KycService<SledProgressStore>,
    session: &mut FormSession,
) -> anyhow::Result<()> {
    fill_personal(session)?;
    service.save_and_continue(session).await?;
    fill_occupation(session)?;
    service.save_and_continue(session).await?;
    fill_address(session)?;
    service.save_and_continue(session).await?;
    fill_nominee(session)?;
    service.save_and_continue(session).await?;
    fill_contact(session)?;
    Ok(())
}

async fn loaded_reference(
    service: &KycService<SledProgressStore>,
    gate: &ReadinessGate,
) -> anyhow::Result<ReferenceOptions> {
    let options = ReferenceOptions::new();
    service.load_reference(&options, &StaticReference, gate).await?;
    anyhow::ensure!(gate.snapshot().all(), "reference data incomplete");
    Ok(options)
}

#[tokio::test]
async fn complete_application_and_submit() -> anyhow::Result<()> {
    kyc_onboarding::logging::init();
    let temp_dir = tempdir()?;
    let (store, service) = sled_service(&temp_dir)?;
    let mut session = service.new_session("POL-2025-001", today());

    walk_to_last_step(&service, &mut session).await?;
    assert_eq!(session.current_step(), 5);
    assert_eq!(session.highest_step(), 5);

    // Gate stays closed until the mobile number is verified
    let err = service.request_submit(&mut session).await.unwrap_err();
    assert_eq!(err, KycError::Submit(SubmitBlocked::MobileNotVerified));

    service.send_otp(&mut session).await?;
    assert_eq!(
        service.verify_otp(&mut session, "000000").await,
        Err(KycError::Otp(OtpError::InvalidCode))
    );
    service.verify_otp(&mut session, CODE).await?;
    assert!(session.is_mobile_verified());
    assert_eq!(
        session.set_field(names::MOBILE, "9801111111", EditOrigin::User),
        Err(FieldError::MobileLocked)
    );

    let summary = service.request_submit(&mut session).await?;
    assert_eq!(summary.entry("First Name"), Some("Ram"));
    assert_eq!(summary.entry("Date of Birth (BS)"), Some("2047-02-06"));
    assert_eq!(summary.entry("Temporary Municipality"), Some("Kirtipur"));
    assert!(summary.documents.iter().all(|d| d.url.is_some()));

    // Staged files were promoted to stored references by the save
    let photo_url = session
        .documents()
        .existing_url(DocumentSlot::Photo)
        .context("photo not stored")?
        .to_string();
    assert!(session.documents().staged(DocumentSlot::Photo).is_none());
    let stored = store.document(&photo_url)?.context("photo blob missing")?;
    assert_eq!(stored.file_name, "photo.png");

    let receipt = service
        .confirm_submit(&mut session, &summary, true)
        .await?
        .context("submission declined")?;
    assert!(receipt.reference.starts_with("kyc1"));
    assert!(session.is_submitted());
    assert_eq!(
        store.submission("POL-2025-001")?.map(|r| r.reference),
        Some(receipt.reference)
    );

    assert_eq!(
        session.set_field(names::EMAIL, "other@example.com", EditOrigin::User),
        Err(FieldError::AlreadySubmitted)
    );
    Ok(())
}

#[tokio::test]
async fn declined_and_stale_confirmations() -> anyhow::Result<()> {
    let temp_dir = tempdir()?;
    let (store, service) = sled_service(&temp_dir)?;
    let mut session = service.new_session("POL-2025-002", today());

    walk_to_last_step(&service, &mut session).await?;
    service.send_otp(&mut session).await?;
    service.verify_otp(&mut session, CODE).await?;

    let summary = service.request_submit(&mut session).await?;
    let revision = session.revision();
    assert_eq!(service.confirm_submit(&mut session, &summary, false).await?, None);
    assert_eq!(session.revision(), revision);
    assert!(!session.is_submitted());

    // An edit after the summary was built invalidates it
    session.set_field(names::EMAIL, "ram@example.org", EditOrigin::User)?;
    assert_eq!(
        service.confirm_submit(&mut session, &summary, true).await,
        Err(KycError::Submit(SubmitBlocked::StaleConfirmation))
    );
    assert!(store.submission("POL-2025-002")?.is_none());

    let fresh = service.request_submit(&mut session).await?;
    assert!(service.confirm_submit(&mut session, &fresh, true).await?.is_some());
    Ok(())
}

#[tokio::test]
async fn submit_only_from_last_step() -> anyhow::Result<()> {
    let temp_dir = tempdir()?;
    let (_store, service) = sled_service(&temp_dir)?;
    let mut session = service.new_session("POL-2025-003", today());

    assert_eq!(
        service.request_submit(&mut session).await,
        Err(KycError::Submit(SubmitBlocked::NotOnLastStep { current: 1 }))
    );

    let err = service.save_and_continue(&mut session).await.unwrap_err();
    assert!(matches!(err, KycError::Navigation(NavigationError::Incomplete(_))));
    assert!(service.user_message(&err).contains("and"));
    assert_eq!(session.current_step(), 1);
    Ok(())
}

#[tokio::test]
async fn failed_save_leaves_session_untouched() -> anyhow::Result<()> {
    let service = KycService::new(
        Arc::new(RejectingStore),
        Arc::new(FixedCodeOtp),
        FormConfig::default(),
    );
    let mut session = service.new_session("POL-2025-004", today());
    fill_personal(&mut session)?;
    session.stage_document(
        DocumentSlot::Photo,
        StagedFile::new("photo.png", "image/png", vec![1u8; 64]),
    )?;
    let revision = session.revision();

    let err = service.save_and_continue(&mut session).await.unwrap_err();
    assert!(err.is_blocking());
    assert_eq!(service.user_message(&err), "Policy is locked for review");
    assert_eq!(session.current_step(), 1);
    assert_eq!(session.revision(), revision);
    assert!(session.documents().staged(DocumentSlot::Photo).is_some());

    // Retrying is safe and fails the same way
    let again = service.save_progress(&mut session).await.unwrap_err();
    assert_eq!(again.user_message(), "Policy is locked for review");
    Ok(())
}

#[tokio::test]
async fn save_requires_a_policy_number() -> anyhow::Result<()> {
    let temp_dir = tempdir()?;
    let (_store, service) = sled_service(&temp_dir)?;
    let mut session = service.new_session("", today());
    assert_eq!(
        service.save_progress(&mut session).await,
        Err(KycError::Persistence(PersistenceError::MissingPolicy))
    );
    Ok(())
}

#[tokio::test(start_paused = true)]
async fn stalled_save_times_out() -> anyhow::Result<()> {
    let service = KycService::new(
        Arc::new(StalledStore),
        Arc::new(FixedCodeOtp),
        FormConfig::default(),
    );
    let mut session = service.new_session("POL-2025-005", today());
    assert_eq!(
        service.save_progress(&mut session).await,
        Err(KycError::Persistence(PersistenceError::Timeout(30_000)))
    );
    Ok(())
}

#[tokio::test(start_paused = true)]
async fn resume_restores_progress() -> anyhow::Result<()> {
    let temp_dir = tempdir()?;
    let (_store, service) = sled_service(&temp_dir)?;

    let mut first = service.new_session("POL-2025-006", today());
    walk_to_last_step(&service, &mut first).await?;
    service.send_otp(&mut first).await?;
    service.verify_otp(&mut first, CODE).await?;
    first.add_additional_document(
        "Electricity bill",
        StagedFile::new("bill.pdf", "application/pdf", vec![3u8; 512]),
    )?;
    service.save_progress(&mut first).await?;

    // A later visit: reference data arrives in its own time
    let gate = ReadinessGate::new();
    let options = loaded_reference(&service, &gate).await?;
    let config = FormConfig::default();
    let orchestrator = PrefillOrchestrator::new(&config.prefill, &gate, &options, &options);

    let mut resumed = service.new_session("POL-2025-006", today());
    let report = service
        .resume_session(&mut resumed, &orchestrator)
        .await?
        .context("nothing was saved")?;

    assert!(report.unmatched.is_empty(), "unmatched: {:?}", report.unmatched);
    assert_eq!(report.resumed_step, 5);
    assert_eq!(resumed.current_step(), 5);
    assert_eq!(resumed.value(names::DOB_BS).as_str(), "2047-02-06");
    assert_eq!(resumed.value(names::OCCUPATION).as_str(), "Student");
    assert_eq!(resumed.value(names::PERM_MUNICIPALITY).as_str(), "Kirtipur");
    assert_eq!(resumed.value(names::TEMP_DISTRICT).as_str(), "Kathmandu");
    assert!(resumed.state(names::TEMP_WARD).readonly);
    assert_eq!(resumed.value(names::IS_PEP).as_str(), "no");
    assert!(resumed.value(names::DECLARATION).is_checked());
    assert!(resumed.is_mobile_verified());
    assert!(resumed.documents().is_satisfied(DocumentSlot::Signature));
    assert_eq!(resumed.documents().additional().len(), 1);

    // Submit straight from the resumed session
    let summary = service.request_submit(&mut resumed).await?;
    assert_eq!(summary.documents.len(), 5);
    assert!(service.confirm_submit(&mut resumed, &summary, true).await?.is_some());
    Ok(())
}

#[tokio::test(start_paused = true)]
async fn resume_lands_on_first_incomplete_step() -> anyhow::Result<()> {
    let temp_dir = tempdir()?;
    let (store, service) = sled_service(&temp_dir)?;

    // Saved on step 3, but the occupation now needs a description nobody gave
    let mut draft = service.new_session("POL-2025-007", today());
    fill_personal(&mut draft)?;
    fill_occupation(&mut draft)?;
    set_all(
        &mut draft,
        &[
            (names::OCCUPATION, "Other"),
            (names::INCOME_MODE, "Monthly"),
            (names::ANNUAL_INCOME, "300000"),
            (names::INCOME_SOURCE, "Tuition"),
        ],
    )?;
    store.save_progress(&draft.snapshot(3)).await?;

    let gate = ReadinessGate::new();
    let options = loaded_reference(&service, &gate).await?;
    let config = FormConfig::default();
    let orchestrator = PrefillOrchestrator::new(&config.prefill, &gate, &options, &options);

    let mut resumed = service.new_session("POL-2025-007", today());
    let report = service
        .resume_session(&mut resumed, &orchestrator)
        .await?
        .context("nothing was saved")?;
    assert_eq!(report.resumed_step, 2);
    assert_eq!(resumed.current_step(), 2);
    assert_eq!(resumed.highest_step(), 2);
    assert!(resumed.state(names::OCCUPATION_DESCRIPTION).required);
    assert!(resumed.state(names::OCCUPATION_DESCRIPTION).invalid);
    Ok(())
}

#[tokio::test]
async fn resume_without_saved_progress_starts_fresh() -> anyhow::Result<()> {
    let temp_dir = tempdir()?;
    let (_store, service) = sled_service(&temp_dir)?;
    let gate = ReadinessGate::new();
    let options = ReferenceOptions::new();
    let config = FormConfig::default();
    let orchestrator = PrefillOrchestrator::new(&config.prefill, &gate, &options, &options);

    let mut session = service.new_session("POL-NEW", today());
    assert_eq!(service.resume_session(&mut session, &orchestrator).await?, None);
    assert_eq!(session.current_step(), 1);
    Ok(())
}

#[tokio::test(start_paused = true)]
async fn prefill_times_out_when_data_never_arrives() -> anyhow::Result<()> {
    let gate = ReadinessGate::new();
    gate.signal(ReadySignal::Banks);
    let options = ReferenceOptions::new();
    let config = FormConfig::default();
    let orchestrator = PrefillOrchestrator::new(&config.prefill, &gate, &options, &options);

    let mut session = FormSession::new(&config, today()).with_policy("POL-2025-008");
    let data = PrefillData::from_json(r#"{ "first_name": "Sita", "_current_step": 2 }"#)?;

    let err = orchestrator.run(&mut session, &data).await.unwrap_err();
    assert_eq!(
        err,
        PrefillError::Timeout {
            pending: vec![
                ReadySignal::Locations,
                ReadySignal::Occupations,
                ReadySignal::Calendar
            ]
        }
    );
    // Nothing was applied
    assert!(!session.value(names::FIRST_NAME).is_filled());
    assert_eq!(session.current_step(), 1);
    Ok(())
}

#[tokio::test(start_paused = true)]
async fn prefill_reports_unmatched_selects() -> anyhow::Result<()> {
    let temp_dir = tempdir()?;
    let (_store, service) = sled_service(&temp_dir)?;
    let gate = ReadinessGate::new();
    let options = loaded_reference(&service, &gate).await?;
    let config = FormConfig::default();
    let orchestrator = PrefillOrchestrator::new(&config.prefill, &gate, &options, &options);

    let mut session = FormSession::new(&config, today()).with_policy("POL-2025-009");
    let data = PrefillData::from_json(
        r#"{ "bank_name": "Unknown Bank", "bank_branch": "New Road",
             "perm_province": "Bagmati", "perm_district": "Atlantis",
             "perm_municipality": "Nowhere", "dob_ad": "1990-05-20",
             "gender": "female", "is_pep": true }"#,
    )?;
    let report = orchestrator.run(&mut session, &data).await?;

    assert!(report.unmatched.contains(&names::BANK_NAME));
    assert!(report.unmatched.contains(&names::PERM_DISTRICT));
    assert!(!report.unmatched.contains(&names::PERM_MUNICIPALITY));
    assert_eq!(session.value(names::PERM_PROVINCE).as_str(), "Bagmati");
    assert_eq!(session.value(names::BRANCH_NAME).as_str(), "New Road");
    assert_eq!(session.value(names::DOB_BS).as_str(), "2047-02-06");
    assert_eq!(session.value(names::GENDER).as_str(), "Female");
    assert_eq!(session.value(names::IS_PEP).as_str(), "yes");
    assert_eq!(report.resumed_step, 1);
    Ok(())
}

#[tokio::test(start_paused = true)]
async fn prefill_waits_for_late_cascade_options() -> anyhow::Result<()> {
    let temp_dir = tempdir()?;
    let (_store, service) = sled_service(&temp_dir)?;

    let mut first = service.new_session("POL-2025-010", today());
    fill_personal(&mut first)?;
    service.save_and_continue(&mut first).await?;
    fill_occupation(&mut first)?;
    service.save_and_continue(&mut first).await?;
    fill_address(&mut first)?;
    service.save_and_continue(&mut first).await?;

    let gate = ReadinessGate::new();
    let late = LateDistricts {
        inner: loaded_reference(&service, &gate).await?,
        empty_polls: 4,
        district_polls: AtomicUsize::new(0),
    };
    let config = FormConfig::default();
    let orchestrator = PrefillOrchestrator::new(&config.prefill, &gate, &late.inner, &late);

    let mut resumed = service.new_session("POL-2025-010", today());
    let report = service
        .resume_session(&mut resumed, &orchestrator)
        .await?
        .context("nothing was saved")?;

    assert!(report.unmatched.is_empty(), "unmatched: {:?}", report.unmatched);
    assert!(late.district_polls.load(Ordering::SeqCst) > 4);
    assert_eq!(resumed.value(names::PERM_DISTRICT).as_str(), "Kathmandu");
    assert_eq!(resumed.value(names::PERM_MUNICIPALITY).as_str(), "Kirtipur");
    assert_eq!(report.resumed_step, 4);
    Ok(())
}

#[tokio::test(start_paused = true)]
async fn reference_failure_blocks_the_form() -> anyhow::Result<()> {
    let temp_dir = tempdir()?;
    let (_store, service) = sled_service(&temp_dir)?;
    let gate = ReadinessGate::new();
    let options = ReferenceOptions::new();

    let err = service
        .load_reference(&options, &BrokenBanks, &gate)
        .await
        .unwrap_err();
    assert!(matches!(
        err,
        KycError::Prefill(PrefillError::Reference(ReferenceError::Unavailable {
            dataset: "bank",
            ..
        }))
    ));
    assert!(err.is_blocking());
    assert!(service.user_message(&err).contains("please reload the page"));
    assert!(!gate.snapshot().banks);
    Ok(())
}

#[tokio::test]
async fn saves_carry_the_anti_forgery_token() -> anyhow::Result<()> {
    let temp_dir = tempdir()?;
    let db = Arc::new(open(temp_dir.path().join("kyc.db"))?);
    let store = Arc::new(TokenCheckingStore {
        inner: SledProgressStore::new(db),
        expected: "csrf-7f3a".into(),
    });
    let service = KycService::new(store, Arc::new(FixedCodeOtp), FormConfig::default());

    let mut anonymous = service.new_session("POL-2025-011", today());
    assert_eq!(
        service.save_progress(&mut anonymous).await,
        Err(KycError::Persistence(PersistenceError::Rejected {
            message: Some("CSRF verification failed".into())
        }))
    );

    let mut session = service
        .new_session("POL-2025-011", today())
        .with_csrf_token("csrf-7f3a");
    service.save_progress(&mut session).await?;
    Ok(())
}
