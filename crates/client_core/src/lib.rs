//! Display-agnostic core of the SIM distribution admin console: reversible
//! deletion for record lists and the guarded multi-step creation wizard, over
//! pluggable record and artifact stores.

use std::sync::Arc;

use shared::domain::{SimCardRecord, TeamRecord, UserRecord};
use storage::Storage;
use tracing::info;

pub mod deletion;
pub mod error;
pub mod notifier;
pub mod store;
pub mod supabase;
pub mod validation;
pub mod wizard;

pub use deletion::{
    DeletionConfig, DeletionController, DeletionOutcome, ListEvent, PendingDeletion, TickOutcome,
};
pub use error::{DeletionError, StoreError, WizardError};
pub use notifier::{Notifier, TracingNotifier, UiDispatcher};
pub use store::{remote_message, ArtifactStore, LocalFile, RecordStore};
pub use supabase::{SupabaseClient, SupabaseConfig};
pub use wizard::{FormWizard, StepOutcome, SubmitOutcome, UserCreationForm, UserCreationWizard};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum BackendKind {
    Supabase,
    Local,
}

/// One set of stores for every record list the console manages.
#[derive(Clone)]
pub struct Backend {
    pub kind: BackendKind,
    pub users: Arc<dyn RecordStore<UserRecord>>,
    pub teams: Arc<dyn RecordStore<TeamRecord>>,
    pub sim_cards: Arc<dyn RecordStore<SimCardRecord>>,
    pub artifacts: Arc<dyn ArtifactStore>,
}

impl Backend {
    pub fn supabase(client: SupabaseClient) -> Self {
        info!(base_url = %client.base_url(), bucket = client.bucket(), "backend: using supabase");
        let client = Arc::new(client);
        Self {
            kind: BackendKind::Supabase,
            users: client.clone(),
            teams: client.clone(),
            sim_cards: client.clone(),
            artifacts: client,
        }
    }

    pub fn local(storage: Storage) -> Self {
        info!("backend: using local sqlite store");
        let storage = Arc::new(storage);
        Self {
            kind: BackendKind::Local,
            users: storage.clone(),
            teams: storage.clone(),
            sim_cards: storage.clone(),
            artifacts: storage,
        }
    }

    pub fn user_wizard(&self, notifier: Arc<dyn Notifier>) -> UserCreationWizard {
        FormWizard::new(
            UserCreationForm::new(),
            Arc::clone(&self.users),
            Arc::clone(&self.artifacts),
            notifier,
            UserCreationForm::defaults(),
        )
    }
}

#[cfg(test)]
#[path = "tests/lib_tests.rs"]
mod tests;
