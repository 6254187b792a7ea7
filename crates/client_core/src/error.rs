use thiserror::Error;

#[derive(Debug, Error, PartialEq, Eq)]
pub enum DeletionError {
    #[error("item {id} is not in the list")]
    NotInList { id: String },
    #[error("no deletion is pending")]
    NothingPending,
    #[error("deletion of {id} is already being committed")]
    CommitInFlight { id: String },
    #[error("cannot reload while a deletion is pending")]
    ReloadWhilePending,
    #[error("failed to load list: {0}")]
    Reload(String),
}

#[derive(Debug, Error, PartialEq, Eq)]
pub enum WizardError {
    #[error("submit requires the final step (currently on step {current} of {total})")]
    NotTerminalStep { current: usize, total: usize },
    #[error("the wizard has already completed")]
    AlreadyCompleted,
    #[error("unknown attachment slot '{0}'")]
    UnknownSlot(String),
}

#[derive(Debug, Error, PartialEq, Eq)]
pub enum StoreError {
    #[error("invalid backend url '{url}': {reason}")]
    InvalidBaseUrl { url: String, reason: String },
    #[error("{table}: server returned no representation for the written row")]
    EmptyRepresentation { table: &'static str },
    #[error("artifact bucket name must not be empty")]
    MissingBucket,
}
