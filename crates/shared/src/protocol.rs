use serde::{Deserialize, Serialize};

use crate::domain::{Record, SimCardRecord, TeamRecord, UserRecord};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum NoticeKind {
    Success,
    Error,
    Info,
    Warning,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Notice {
    pub kind: NoticeKind,
    pub message: String,
}

impl Notice {
    pub fn new(kind: NoticeKind, message: impl Into<String>) -> Self {
        Self {
            kind,
            message: message.into(),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum RefreshTarget {
    Users,
    Teams,
    SimCards,
}

impl RefreshTarget {
    pub fn for_table(table: &str) -> Option<Self> {
        [
            (UserRecord::TABLE, RefreshTarget::Users),
            (TeamRecord::TABLE, RefreshTarget::Teams),
            (SimCardRecord::TABLE, RefreshTarget::SimCards),
        ]
        .into_iter()
        .find_map(|(name, target)| (name == table).then_some(target))
    }
}

/// Transient UI action requested by a component without holding a reference
/// to whatever presents it.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "type", content = "payload", rename_all = "snake_case")]
pub enum UiCommand {
    Toast(Notice),
    Refresh(RefreshTarget),
    ItemRemoved { table: String, id: String },
    ItemCreated { table: String, id: String },
}
