//! Multi-step form with per-step validation gates and an upload-then-create
//! submission.
//!
//! A [`FormDefinition`] declares the steps, their field rules and attachment
//! slots, and how the collected values become a record draft. [`FormWizard`]
//! owns the in-progress state and talks to the stores only from `submit`.

use std::{collections::BTreeMap, sync::Arc};

use base64::{engine::general_purpose::STANDARD, Engine as _};
use rand::{distr::Alphanumeric, Rng};
use shared::{
    domain::{NewUser, Record, Role, TeamId, UserRecord},
    protocol::{NoticeKind, RefreshTarget},
};
use tracing::{debug, error, info, warn};
use uuid::Uuid;

use crate::{
    error::WizardError,
    notifier::{Notifier, UiDispatcher},
    store::{remote_message, ArtifactStore, LocalFile, RecordStore},
    validation::{
        validate_fields, FieldError, FieldSpec, Fields, Rule, Touched, ValidationReport,
        MIN_PASSWORD_LEN,
    },
};

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SlotSpec {
    pub name: &'static str,
    pub label: &'static str,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct StepSpec {
    pub title: &'static str,
    pub fields: Vec<FieldSpec>,
    pub slots: Vec<SlotSpec>,
}

pub trait FormDefinition: Send + Sync {
    type Record: Record;

    fn steps(&self) -> &[StepSpec];

    /// Prefix for artifact keys of one submission attempt.
    fn artifact_prefix(&self, submission: Uuid) -> String;

    /// Assembles the draft from field values and uploaded artifact URLs
    /// (keyed by slot name).
    fn build_draft(
        &self,
        fields: &Fields,
        artifact_urls: &BTreeMap<String, String>,
    ) -> Result<<Self::Record as Record>::Draft, FieldError>;
}

/// Local preview of an attachment, owned by its slot.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct AttachmentPreview {
    pub uri: String,
}

impl AttachmentPreview {
    fn from_file(file: &LocalFile) -> Self {
        Self {
            uri: format!(
                "data:{};base64,{}",
                file.mime_type,
                STANDARD.encode(&file.bytes)
            ),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Attachment {
    pub file: LocalFile,
    pub preview: AttachmentPreview,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum WizardStatus {
    Editing,
    Succeeded,
}

#[derive(Debug, Clone, PartialEq)]
pub enum SubmitOutcome<R> {
    Created(R),
    Blocked(Vec<FieldError>),
    UploadFailed { slot: String, message: String },
    CreateFailed { message: String },
}

#[derive(Debug, Clone, PartialEq)]
pub enum StepOutcome<R> {
    Advanced { step: usize },
    Blocked(Vec<FieldError>),
    Submitted(SubmitOutcome<R>),
}

pub struct FormWizard<F: FormDefinition> {
    definition: F,
    records: Arc<dyn RecordStore<F::Record>>,
    artifacts: Arc<dyn ArtifactStore>,
    notifier: Arc<dyn Notifier>,
    dispatcher: Option<UiDispatcher>,
    current_step: usize,
    fields: Fields,
    touched: Touched,
    attachments: BTreeMap<String, Attachment>,
    status: WizardStatus,
    form_error: Option<String>,
}

impl<F: FormDefinition> FormWizard<F> {
    pub fn new(
        definition: F,
        records: Arc<dyn RecordStore<F::Record>>,
        artifacts: Arc<dyn ArtifactStore>,
        notifier: Arc<dyn Notifier>,
        defaults: Fields,
    ) -> Self {
        let mut wizard = Self {
            definition,
            records,
            artifacts,
            notifier,
            dispatcher: None,
            current_step: 1,
            fields: Fields::new(),
            touched: Touched::new(),
            attachments: BTreeMap::new(),
            status: WizardStatus::Editing,
            form_error: None,
        };
        wizard.initialize(defaults);
        wizard
    }

    pub fn with_dispatcher(mut self, dispatcher: UiDispatcher) -> Self {
        self.dispatcher = Some(dispatcher);
        self
    }

    pub fn initialize(&mut self, defaults: Fields) {
        self.current_step = 1;
        self.fields = defaults;
        self.touched.clear();
        self.attachments.clear();
        self.status = WizardStatus::Editing;
        self.form_error = None;
    }

    pub fn total_steps(&self) -> usize {
        self.definition.steps().len()
    }

    pub fn current_step(&self) -> usize {
        self.current_step
    }

    pub fn step(&self, step: usize) -> Option<&StepSpec> {
        step.checked_sub(1)
            .and_then(|index| self.definition.steps().get(index))
    }

    pub fn is_terminal_step(&self) -> bool {
        self.current_step == self.total_steps()
    }

    pub fn status(&self) -> WizardStatus {
        self.status
    }

    pub fn form_error(&self) -> Option<&str> {
        self.form_error.as_deref()
    }

    pub fn fields(&self) -> &Fields {
        &self.fields
    }

    pub fn field(&self, name: &str) -> Option<&str> {
        self.fields.get(name).map(String::as_str)
    }

    pub fn is_touched(&self, name: &str) -> bool {
        self.touched.contains(name)
    }

    pub fn attachment(&self, slot: &str) -> Option<&Attachment> {
        self.attachments.get(slot)
    }

    pub fn update_field(&mut self, name: &str, value: impl Into<String>) {
        self.fields.insert(name.to_string(), value.into());
        self.touched.insert(name.to_string());
    }

    /// Fills `slot`, replacing (and releasing) any earlier file and preview.
    pub fn set_attachment(&mut self, slot: &str, file: LocalFile) -> Result<(), WizardError> {
        if !self.slot_specs().any(|spec| spec.name == slot) {
            return Err(WizardError::UnknownSlot(slot.to_string()));
        }
        let preview = AttachmentPreview::from_file(&file);
        debug!(
            slot,
            filename = %file.filename,
            size_bytes = file.bytes.len(),
            "wizard: attachment selected"
        );
        self.attachments
            .insert(slot.to_string(), Attachment { file, preview });
        Ok(())
    }

    pub fn clear_attachment(&mut self, slot: &str) -> Option<Attachment> {
        self.attachments.remove(slot)
    }

    /// Pure check of one step's rules against the current values.
    pub fn validate_step(&self, step: usize) -> ValidationReport {
        match self.step(step) {
            Some(spec) => validate_fields(&spec.fields, &self.fields, &self.touched),
            None => ValidationReport::default(),
        }
    }

    /// Errors for the current step that should be shown next to their fields.
    pub fn visible_errors(&self) -> Vec<FieldError> {
        self.validate_step(self.current_step).visible(&self.touched)
    }

    pub async fn go_next(&mut self) -> Result<StepOutcome<F::Record>, WizardError> {
        if self.status == WizardStatus::Succeeded {
            return Err(WizardError::AlreadyCompleted);
        }

        let report = self.validate_step(self.current_step);
        if !report.is_valid() {
            self.touch_step_fields(self.current_step);
            debug!(
                step = self.current_step,
                errors = report.errors().len(),
                "wizard: step blocked by validation"
            );
            return Ok(StepOutcome::Blocked(report.into_errors()));
        }

        if self.is_terminal_step() {
            return Ok(StepOutcome::Submitted(self.submit().await?));
        }

        self.current_step += 1;
        debug!(step = self.current_step, "wizard: advanced");
        Ok(StepOutcome::Advanced {
            step: self.current_step,
        })
    }

    pub fn go_previous(&mut self) -> bool {
        if self.current_step <= 1 {
            return false;
        }
        self.current_step -= 1;
        true
    }

    /// Uploads every attachment, then creates the record. Any failure leaves
    /// the wizard on the final step with all input intact.
    pub async fn submit(&mut self) -> Result<SubmitOutcome<F::Record>, WizardError> {
        if self.status == WizardStatus::Succeeded {
            return Err(WizardError::AlreadyCompleted);
        }
        if !self.is_terminal_step() {
            return Err(WizardError::NotTerminalStep {
                current: self.current_step,
                total: self.total_steps(),
            });
        }

        let missing: Vec<FieldError> = self
            .slot_specs()
            .filter(|spec| !self.attachments.contains_key(spec.name))
            .map(|spec| FieldError::new(spec.name, format!("{} is required", spec.label)))
            .collect();
        if !missing.is_empty() {
            return Ok(SubmitOutcome::Blocked(missing));
        }

        let report = self.validate_step(self.current_step);
        if !report.is_valid() {
            self.touch_step_fields(self.current_step);
            return Ok(SubmitOutcome::Blocked(report.into_errors()));
        }

        let placeholder_urls: BTreeMap<String, String> = self
            .slot_specs()
            .map(|spec| (spec.name.to_string(), String::new()))
            .collect();
        if let Err(err) = self.definition.build_draft(&self.fields, &placeholder_urls) {
            return Ok(SubmitOutcome::Blocked(vec![err]));
        }

        self.form_error = None;
        let prefix = self.definition.artifact_prefix(Uuid::new_v4());
        let slots: Vec<SlotSpec> = self.slot_specs().cloned().collect();
        let mut uploaded_keys = Vec::with_capacity(slots.len());
        let mut artifact_urls = BTreeMap::new();

        for slot in &slots {
            let Some(attachment) = self.attachments.get(slot.name) else {
                continue;
            };
            let key = format!("{prefix}/{}.{}", slot.name, attachment.file.extension());
            match self.artifacts.upload(&key, &attachment.file).await {
                Ok(url) => {
                    debug!(slot = slot.name, %key, "wizard: artifact uploaded");
                    uploaded_keys.push(key);
                    artifact_urls.insert(slot.name.to_string(), url);
                }
                Err(err) => {
                    let message = remote_message(&err);
                    error!(slot = slot.name, %key, error = %message, "wizard: artifact upload failed");
                    self.retract(&uploaded_keys).await;
                    self.fail(format!("Failed to upload {}: {message}", slot.label));
                    return Ok(SubmitOutcome::UploadFailed {
                        slot: slot.name.to_string(),
                        message,
                    });
                }
            }
        }

        let draft = match self.definition.build_draft(&self.fields, &artifact_urls) {
            Ok(draft) => draft,
            Err(err) => {
                self.retract(&uploaded_keys).await;
                return Ok(SubmitOutcome::Blocked(vec![err]));
            }
        };

        match self.records.create(draft).await {
            Ok(record) => {
                info!(
                    table = <F::Record as Record>::TABLE,
                    id = %record.id(),
                    "wizard: record created"
                );
                self.status = WizardStatus::Succeeded;
                self.attachments.clear();
                self.notifier
                    .notify(NoticeKind::Success, &format!("{} created", record.label()));
                if let Some(dispatcher) = &self.dispatcher {
                    dispatcher.item_created(<F::Record as Record>::TABLE, record.id());
                    if let Some(target) = RefreshTarget::for_table(<F::Record as Record>::TABLE) {
                        dispatcher.refresh(target);
                    }
                }
                Ok(SubmitOutcome::Created(record))
            }
            Err(err) => {
                let message = remote_message(&err);
                error!(table = <F::Record as Record>::TABLE, error = %message, "wizard: record creation failed");
                self.retract(&uploaded_keys).await;
                self.fail(message.clone());
                Ok(SubmitOutcome::CreateFailed { message })
            }
        }
    }

    /// Discards the wizard and everything entered into it.
    pub fn cancel(self) {
        debug!(step = self.current_step, "wizard: cancelled");
    }

    fn slot_specs(&self) -> impl Iterator<Item = &SlotSpec> {
        self.definition
            .steps()
            .iter()
            .flat_map(|step| step.slots.iter())
    }

    fn touch_step_fields(&mut self, step: usize) {
        let names: Vec<&'static str> = match self.step(step) {
            Some(spec) => spec.fields.iter().map(|field| field.name).collect(),
            None => return,
        };
        self.touched
            .extend(names.into_iter().map(str::to_string));
    }

    fn fail(&mut self, message: String) {
        self.notifier.notify(NoticeKind::Error, &message);
        self.form_error = Some(message);
    }

    /// Best effort: artifacts of an aborted submission are removed so retries
    /// do not leave orphans behind.
    async fn retract(&self, keys: &[String]) {
        for key in keys {
            if let Err(err) = self.artifacts.remove(key).await {
                warn!(%key, error = %err, "wizard: failed to retract uploaded artifact");
            }
        }
    }
}

pub const FULL_NAME: &str = "full_name";
pub const EMAIL: &str = "email";
pub const PHONE: &str = "phone";
pub const ROLE: &str = "role";
pub const TEAM_ID: &str = "team_id";
pub const PASSWORD: &str = "password";
pub const CONFIRM_PASSWORD: &str = "confirm_password";
pub const ID_NUMBER: &str = "id_number";
pub const ID_FRONT: &str = "id_front";
pub const ID_BACK: &str = "id_back";

const ROLE_NAMES: &[&str] = &["admin", "team_leader", "staff"];
const GENERATED_PASSWORD_LEN: usize = 12;

pub fn generate_password(len: usize) -> String {
    rand::rng()
        .sample_iter(&Alphanumeric)
        .take(len)
        .map(char::from)
        .collect()
}

/// The three-step "add user" form of the admin dashboard.
pub struct UserCreationForm {
    steps: Vec<StepSpec>,
}

impl Default for UserCreationForm {
    fn default() -> Self {
        Self::new()
    }
}

impl UserCreationForm {
    pub fn new() -> Self {
        Self {
            steps: vec![
                StepSpec {
                    title: "Personal details",
                    fields: vec![
                        FieldSpec::new(FULL_NAME, "Full name", vec![Rule::Required]),
                        FieldSpec::new(EMAIL, "Email", vec![Rule::Required, Rule::Email]),
                        FieldSpec::new(PHONE, "Phone number", vec![Rule::Required, Rule::Phone]),
                    ],
                    slots: Vec::new(),
                },
                StepSpec {
                    title: "Account",
                    fields: vec![
                        FieldSpec::new(ROLE, "Role", vec![Rule::Required, Rule::OneOf(ROLE_NAMES)]),
                        FieldSpec::new(TEAM_ID, "Team", vec![Rule::Uuid]),
                        FieldSpec::new(
                            PASSWORD,
                            "Password",
                            vec![Rule::Required, Rule::MinLength(MIN_PASSWORD_LEN)],
                        ),
                        FieldSpec::new(
                            CONFIRM_PASSWORD,
                            "Confirm password",
                            vec![Rule::Required, Rule::Matches(PASSWORD)],
                        ),
                    ],
                    slots: Vec::new(),
                },
                StepSpec {
                    title: "Identity documents",
                    fields: vec![FieldSpec::new(ID_NUMBER, "ID number", vec![Rule::Required])],
                    slots: vec![
                        SlotSpec {
                            name: ID_FRONT,
                            label: "ID front image",
                        },
                        SlotSpec {
                            name: ID_BACK,
                            label: "ID back image",
                        },
                    ],
                },
            ],
        }
    }

    /// Starting values: staff role and a generated password in both
    /// credential fields.
    pub fn defaults() -> Fields {
        let password = generate_password(GENERATED_PASSWORD_LEN);
        let mut fields = Fields::new();
        fields.insert(ROLE.to_string(), Role::Staff.as_str().to_string());
        fields.insert(PASSWORD.to_string(), password.clone());
        fields.insert(CONFIRM_PASSWORD.to_string(), password);
        fields
    }
}

impl FormDefinition for UserCreationForm {
    type Record = UserRecord;

    fn steps(&self) -> &[StepSpec] {
        &self.steps
    }

    fn artifact_prefix(&self, submission: Uuid) -> String {
        format!("users/{submission}")
    }

    fn build_draft(
        &self,
        fields: &Fields,
        artifact_urls: &BTreeMap<String, String>,
    ) -> Result<NewUser, FieldError> {
        let value = |name: &str| {
            fields
                .get(name)
                .map(|v| v.trim().to_string())
                .unwrap_or_default()
        };
        let url = |slot: &str| {
            artifact_urls
                .get(slot)
                .cloned()
                .ok_or_else(|| FieldError::new(slot, "missing uploaded artifact"))
        };

        let role = Role::parse(&value(ROLE))
            .ok_or_else(|| FieldError::new(ROLE, "Select a valid role"))?;
        let team_raw = value(TEAM_ID);
        let team_id = if team_raw.is_empty() {
            None
        } else {
            Some(
                team_raw
                    .parse::<TeamId>()
                    .map_err(|_| FieldError::new(TEAM_ID, "Team is not a valid identifier"))?,
            )
        };

        Ok(NewUser {
            full_name: value(FULL_NAME),
            email: value(EMAIL).to_ascii_lowercase(),
            phone: value(PHONE).replace([' ', '-'], ""),
            role,
            team_id,
            id_number: value(ID_NUMBER),
            id_front_url: url(ID_FRONT)?,
            id_back_url: url(ID_BACK)?,
            password: fields.get(PASSWORD).cloned().unwrap_or_default(),
        })
    }
}

pub type UserCreationWizard = FormWizard<UserCreationForm>;

#[cfg(test)]
#[path = "tests/wizard_tests.rs"]
mod tests;
