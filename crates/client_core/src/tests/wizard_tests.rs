use super::*;
use anyhow::{anyhow, Result};
use async_trait::async_trait;
use chrono::Utc;
use shared::{
    domain::{UserId, UserStatus},
    error::{ApiException, ErrorCode},
    protocol::UiCommand,
};
use std::sync::Mutex;

type CallLog = Arc<Mutex<Vec<String>>>;

fn log(calls: &CallLog, entry: String) {
    calls.lock().expect("call log").push(entry);
}

fn calls(calls: &CallLog) -> Vec<String> {
    calls.lock().expect("call log").clone()
}

struct TestRecords {
    calls: CallLog,
    fail_with: Option<String>,
    created: Mutex<Vec<NewUser>>,
}

#[async_trait]
impl RecordStore<UserRecord> for TestRecords {
    async fn list(&self) -> Result<Vec<UserRecord>> {
        Ok(Vec::new())
    }

    async fn create(&self, draft: NewUser) -> Result<UserRecord> {
        log(&self.calls, "create".to_string());
        if let Some(message) = &self.fail_with {
            return Err(anyhow::Error::new(ApiException::new(
                ErrorCode::Conflict,
                message.clone(),
            )));
        }
        self.created.lock().expect("created").push(draft.clone());
        Ok(UserRecord {
            id: UserId::new(),
            full_name: draft.full_name,
            email: draft.email,
            phone: draft.phone,
            role: draft.role,
            team_id: draft.team_id,
            id_number: draft.id_number,
            id_front_url: draft.id_front_url,
            id_back_url: draft.id_back_url,
            status: UserStatus::Active,
            created_at: Utc::now(),
        })
    }

    async fn delete(&self, _id: UserId) -> Result<()> {
        Err(anyhow!("delete is not used by these tests"))
    }
}

struct TestArtifacts {
    calls: CallLog,
    /// 1-based upload attempt that should fail.
    fail_on_upload: Option<usize>,
    uploads: Mutex<usize>,
}

#[async_trait]
impl ArtifactStore for TestArtifacts {
    async fn upload(&self, key: &str, _file: &LocalFile) -> Result<String> {
        let attempt = {
            let mut uploads = self.uploads.lock().expect("uploads");
            *uploads += 1;
            *uploads
        };
        log(&self.calls, format!("upload:{key}"));
        if self.fail_on_upload == Some(attempt) {
            return Err(anyhow::Error::new(ApiException::new(
                ErrorCode::Internal,
                "storage quota exceeded",
            )));
        }
        Ok(format!("https://cdn.example.com/{key}"))
    }

    async fn remove(&self, key: &str) -> Result<()> {
        log(&self.calls, format!("remove:{key}"));
        Ok(())
    }
}

#[derive(Default)]
struct RecordingNotifier {
    notices: Mutex<Vec<(NoticeKind, String)>>,
}

impl Notifier for RecordingNotifier {
    fn notify(&self, kind: NoticeKind, message: &str) {
        self.notices
            .lock()
            .expect("notices")
            .push((kind, message.to_string()));
    }
}

struct Harness {
    wizard: UserCreationWizard,
    calls: CallLog,
    records: Arc<TestRecords>,
    notifier: Arc<RecordingNotifier>,
}

fn harness(fail_on_upload: Option<usize>, create_error: Option<&str>) -> Harness {
    let calls: CallLog = Arc::new(Mutex::new(Vec::new()));
    let records = Arc::new(TestRecords {
        calls: Arc::clone(&calls),
        fail_with: create_error.map(str::to_string),
        created: Mutex::new(Vec::new()),
    });
    let artifacts = Arc::new(TestArtifacts {
        calls: Arc::clone(&calls),
        fail_on_upload,
        uploads: Mutex::new(0),
    });
    let notifier = Arc::new(RecordingNotifier::default());
    let wizard = FormWizard::new(
        UserCreationForm::new(),
        Arc::clone(&records) as Arc<dyn RecordStore<UserRecord>>,
        artifacts,
        Arc::clone(&notifier) as Arc<dyn Notifier>,
        UserCreationForm::defaults(),
    );
    Harness {
        wizard,
        calls,
        records,
        notifier,
    }
}

fn image(name: &str) -> LocalFile {
    LocalFile::new(name, "image/jpeg", vec![0xFF, 0xD8, 0xFF, 0xE0])
}

fn fill_personal(wizard: &mut UserCreationWizard) {
    wizard.update_field(FULL_NAME, "Wanjiru Kamau");
    wizard.update_field(EMAIL, "Wanjiru@SimCo.co.ke");
    wizard.update_field(PHONE, "+254 712-345-678");
}

async fn reach_documents_step(wizard: &mut UserCreationWizard) {
    fill_personal(wizard);
    assert_eq!(
        wizard.go_next().await.expect("step 1"),
        StepOutcome::Advanced { step: 2 }
    );
    assert_eq!(
        wizard.go_next().await.expect("step 2"),
        StepOutcome::Advanced { step: 3 }
    );
    wizard.update_field(ID_NUMBER, "29384756");
}

#[tokio::test]
async fn invalid_email_blocks_first_step() {
    let mut h = harness(None, None);
    fill_personal(&mut h.wizard);
    h.wizard.update_field(EMAIL, "not-an-email");

    let report = h.wizard.validate_step(1);
    assert!(!report.is_valid());
    assert_eq!(
        report.error_for(EMAIL).map(|err| err.message.as_str()),
        Some("Enter a valid email address")
    );

    let outcome = h.wizard.go_next().await.expect("go next");
    assert!(matches!(outcome, StepOutcome::Blocked(ref errors) if errors.len() == 1));
    assert_eq!(h.wizard.current_step(), 1);
}

#[tokio::test]
async fn blocked_step_marks_its_fields_touched() {
    let mut h = harness(None, None);
    assert!(h.wizard.visible_errors().is_empty());

    h.wizard.go_next().await.expect("go next");

    assert!(h.wizard.is_touched(FULL_NAME));
    assert_eq!(h.wizard.visible_errors().len(), 3);
    assert_eq!(h.wizard.current_step(), 1);
}

#[tokio::test]
async fn navigation_preserves_field_values() {
    let mut h = harness(None, None);
    fill_personal(&mut h.wizard);
    h.wizard.go_next().await.expect("step 1");
    h.wizard.update_field(ROLE, "team_leader");
    let before = h.wizard.fields().clone();

    assert!(h.wizard.go_previous());
    assert!(!h.wizard.go_previous());
    assert_eq!(h.wizard.current_step(), 1);
    h.wizard.go_next().await.expect("step 1 again");
    h.wizard.go_next().await.expect("step 2");

    assert_eq!(h.wizard.current_step(), 3);
    assert_eq!(h.wizard.fields(), &before);
}

#[tokio::test]
async fn generated_credentials_satisfy_account_step() {
    let mut h = harness(None, None);
    let password = h.wizard.field(PASSWORD).expect("generated").to_string();
    assert_eq!(password.len(), 12);
    assert_eq!(h.wizard.field(CONFIRM_PASSWORD), Some(password.as_str()));
    assert!(h.wizard.validate_step(2).is_valid());

    h.wizard.update_field(PASSWORD, "short");
    let report = h.wizard.validate_step(2);
    assert!(report.error_for(PASSWORD).is_some());
    // Confirmation has not been touched yet, so only the length rule fires.
    assert!(report.error_for(CONFIRM_PASSWORD).is_none());

    h.wizard.update_field(PASSWORD, "long-enough-1");
    h.wizard.update_field(CONFIRM_PASSWORD, "long-enough-2");
    let report = h.wizard.validate_step(2);
    assert_eq!(
        report
            .error_for(CONFIRM_PASSWORD)
            .map(|err| err.message.as_str()),
        Some("Passwords do not match")
    );
}

#[tokio::test]
async fn submit_off_final_step_is_rejected() {
    let mut h = harness(None, None);
    let err = h.wizard.submit().await.expect_err("not terminal");
    assert_eq!(
        err,
        WizardError::NotTerminalStep {
            current: 1,
            total: 3
        }
    );
    assert!(calls(&h.calls).is_empty());
}

#[tokio::test]
async fn missing_attachment_blocks_submission() {
    let mut h = harness(None, None);
    reach_documents_step(&mut h.wizard).await;
    h.wizard.set_attachment(ID_FRONT, image("front.jpg")).expect("front");

    let outcome = h.wizard.go_next().await.expect("go next");
    assert_eq!(
        outcome,
        StepOutcome::Submitted(SubmitOutcome::Blocked(vec![FieldError::new(
            ID_BACK,
            "ID back image is required"
        )]))
    );
    assert!(calls(&h.calls).is_empty());
    assert_eq!(h.wizard.current_step(), 3);
}

#[tokio::test]
async fn successful_submit_uploads_before_create() {
    let mut h = harness(None, None);
    let (dispatcher, mut commands) = UiDispatcher::channel();
    h.wizard = h.wizard.with_dispatcher(dispatcher);
    reach_documents_step(&mut h.wizard).await;
    h.wizard.set_attachment(ID_FRONT, image("front.JPG")).expect("front");
    h.wizard.set_attachment(ID_BACK, image("back.jpg")).expect("back");

    let outcome = h.wizard.go_next().await.expect("submit");
    let record = match outcome {
        StepOutcome::Submitted(SubmitOutcome::Created(record)) => record,
        other => panic!("expected created record, got {other:?}"),
    };

    let log = calls(&h.calls);
    assert_eq!(log.len(), 3);
    assert!(log[0].starts_with("upload:users/") && log[0].ends_with("/id_front.jpg"));
    assert!(log[1].starts_with("upload:users/") && log[1].ends_with("/id_back.jpg"));
    assert_eq!(log[2], "create");

    let drafts = h.records.created.lock().expect("created").clone();
    assert_eq!(drafts.len(), 1);
    assert_eq!(drafts[0].email, "wanjiru@simco.co.ke");
    assert_eq!(drafts[0].phone, "+254712345678");
    assert_eq!(drafts[0].role, Role::Staff);
    assert!(drafts[0].id_front_url.starts_with("https://cdn.example.com/users/"));
    assert_eq!(record.full_name, "Wanjiru Kamau");

    assert_eq!(h.wizard.status(), WizardStatus::Succeeded);
    assert!(h.wizard.attachment(ID_FRONT).is_none());
    assert_eq!(
        h.notifier.notices.lock().expect("notices").clone(),
        vec![(NoticeKind::Success, "Wanjiru Kamau created".to_string())]
    );
    assert_eq!(
        commands.try_recv().expect("created command"),
        UiCommand::ItemCreated {
            table: "users".to_string(),
            id: record.id.to_string(),
        }
    );
    assert_eq!(
        commands.try_recv().expect("refresh command"),
        UiCommand::Refresh(RefreshTarget::Users)
    );
    assert_eq!(
        h.wizard.go_next().await,
        Err(WizardError::AlreadyCompleted)
    );
}

#[tokio::test]
async fn upload_failure_aborts_before_create_and_keeps_input() {
    let mut h = harness(Some(2), None);
    reach_documents_step(&mut h.wizard).await;
    h.wizard.set_attachment(ID_FRONT, image("front.jpg")).expect("front");
    h.wizard.set_attachment(ID_BACK, image("back.jpg")).expect("back");
    let fields_before = h.wizard.fields().clone();

    let outcome = h.wizard.go_next().await.expect("submit");
    assert_eq!(
        outcome,
        StepOutcome::Submitted(SubmitOutcome::UploadFailed {
            slot: ID_BACK.to_string(),
            message: "storage quota exceeded".to_string(),
        })
    );

    let log = calls(&h.calls);
    assert_eq!(log.len(), 3, "{log:?}");
    assert!(!log.iter().any(|entry| entry == "create"));
    let first_key = log[0].trim_start_matches("upload:");
    assert_eq!(log[2], format!("remove:{first_key}"));

    assert_eq!(h.wizard.current_step(), 3);
    assert_eq!(h.wizard.status(), WizardStatus::Editing);
    assert_eq!(h.wizard.fields(), &fields_before);
    assert!(h.wizard.attachment(ID_FRONT).is_some());
    assert!(h.wizard.attachment(ID_BACK).is_some());
    assert_eq!(
        h.wizard.form_error(),
        Some("Failed to upload ID back image: storage quota exceeded")
    );
}

#[tokio::test]
async fn create_failure_keeps_wizard_open_for_retry() {
    let mut h = harness(None, Some("duplicate key value violates unique constraint \"users_email_key\""));
    reach_documents_step(&mut h.wizard).await;
    h.wizard.set_attachment(ID_FRONT, image("front.jpg")).expect("front");
    h.wizard.set_attachment(ID_BACK, image("back.jpg")).expect("back");

    let outcome = h.wizard.submit().await.expect("submit");
    let message = match outcome {
        SubmitOutcome::CreateFailed { message } => message,
        other => panic!("expected create failure, got {other:?}"),
    };
    assert!(message.contains("users_email_key"));
    assert_eq!(h.wizard.form_error(), Some(message.as_str()));
    assert_eq!(h.wizard.current_step(), 3);
    assert_eq!(h.wizard.status(), WizardStatus::Editing);

    let log = calls(&h.calls);
    assert_eq!(log.iter().filter(|entry| entry.starts_with("remove:")).count(), 2);
    assert_eq!(
        h.notifier.notices.lock().expect("notices").last().cloned(),
        Some((NoticeKind::Error, message))
    );
}

#[tokio::test]
async fn attachments_replace_and_clear_previews() {
    let mut h = harness(None, None);
    h.wizard.set_attachment(ID_FRONT, image("first.jpg")).expect("first");
    h.wizard
        .set_attachment(ID_FRONT, LocalFile::new("second.png", "image/png", b"png".to_vec()))
        .expect("replace");

    let attachment = h.wizard.attachment(ID_FRONT).expect("filled");
    assert_eq!(attachment.file.filename, "second.png");
    assert_eq!(attachment.preview.uri, "data:image/png;base64,cG5n");

    assert!(h.wizard.clear_attachment(ID_FRONT).is_some());
    assert!(h.wizard.attachment(ID_FRONT).is_none());
    assert_eq!(
        h.wizard.set_attachment("selfie", image("me.jpg")),
        Err(WizardError::UnknownSlot("selfie".to_string()))
    );
}

#[tokio::test]
async fn invalid_team_id_blocks_account_step() {
    let mut h = harness(None, None);
    fill_personal(&mut h.wizard);
    h.wizard.go_next().await.expect("step 1");
    h.wizard.update_field(TEAM_ID, "east-team");

    let outcome = h.wizard.go_next().await.expect("step 2");
    assert_eq!(
        outcome,
        StepOutcome::Blocked(vec![FieldError::new(
            TEAM_ID,
            "Team is not a valid identifier"
        )])
    );
    assert_eq!(h.wizard.current_step(), 2);
}
