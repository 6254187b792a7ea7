use std::fmt;

use chrono::{DateTime, Utc};
use serde::{de::DeserializeOwned, Deserialize, Serialize};
use uuid::Uuid;

macro_rules! id_newtype {
    ($name:ident) => {
        #[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
        #[serde(transparent)]
        pub struct $name(pub Uuid);

        impl $name {
            pub fn new() -> Self {
                Self(Uuid::new_v4())
            }
        }

        impl Default for $name {
            fn default() -> Self {
                Self::new()
            }
        }

        impl fmt::Display for $name {
            fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
                self.0.fmt(f)
            }
        }

        impl std::str::FromStr for $name {
            type Err = uuid::Error;

            fn from_str(s: &str) -> Result<Self, Self::Err> {
                Uuid::parse_str(s.trim()).map(Self)
            }
        }
    };
}

id_newtype!(UserId);
id_newtype!(TeamId);
id_newtype!(SimCardId);

/// A row of a remote table that can be listed, created and deleted.
pub trait Record: Clone + Send + Sync + Serialize + DeserializeOwned + 'static {
    type Id: Copy + Eq + fmt::Display + Send + Sync + Serialize + 'static;
    type Draft: Clone + Send + Sync + Serialize + 'static;

    const TABLE: &'static str;

    fn id(&self) -> Self::Id;

    /// Human readable label used in notifications.
    fn label(&self) -> String;
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Role {
    Admin,
    TeamLeader,
    Staff,
}

impl Role {
    pub const ALL: [Role; 3] = [Role::Admin, Role::TeamLeader, Role::Staff];

    pub fn as_str(self) -> &'static str {
        match self {
            Role::Admin => "admin",
            Role::TeamLeader => "team_leader",
            Role::Staff => "staff",
        }
    }

    pub fn parse(raw: &str) -> Option<Self> {
        let raw = raw.trim();
        Self::ALL
            .into_iter()
            .find(|role| role.as_str().eq_ignore_ascii_case(raw))
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, Default)]
#[serde(rename_all = "snake_case")]
pub enum UserStatus {
    #[default]
    Active,
    Suspended,
}

impl UserStatus {
    pub fn as_str(self) -> &'static str {
        match self {
            UserStatus::Active => "active",
            UserStatus::Suspended => "suspended",
        }
    }

    pub fn parse(raw: &str) -> Option<Self> {
        match raw {
            "active" => Some(UserStatus::Active),
            "suspended" => Some(UserStatus::Suspended),
            _ => None,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct UserRecord {
    pub id: UserId,
    pub full_name: String,
    pub email: String,
    pub phone: String,
    pub role: Role,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub team_id: Option<TeamId>,
    pub id_number: String,
    pub id_front_url: String,
    pub id_back_url: String,
    #[serde(default)]
    pub status: UserStatus,
    pub created_at: DateTime<Utc>,
}

/// Payload for the user-creation endpoint. The password is forwarded to the
/// backend once and never kept on a [`UserRecord`].
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct NewUser {
    pub full_name: String,
    pub email: String,
    pub phone: String,
    pub role: Role,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub team_id: Option<TeamId>,
    pub id_number: String,
    pub id_front_url: String,
    pub id_back_url: String,
    pub password: String,
}

impl Record for UserRecord {
    type Id = UserId;
    type Draft = NewUser;

    const TABLE: &'static str = "users";

    fn id(&self) -> UserId {
        self.id
    }

    fn label(&self) -> String {
        self.full_name.clone()
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TeamRecord {
    pub id: TeamId,
    pub name: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub leader_id: Option<UserId>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub region: Option<String>,
    pub created_at: DateTime<Utc>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct NewTeam {
    pub name: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub leader_id: Option<UserId>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub region: Option<String>,
}

impl Record for TeamRecord {
    type Id = TeamId;
    type Draft = NewTeam;

    const TABLE: &'static str = "teams";

    fn id(&self) -> TeamId {
        self.id
    }

    fn label(&self) -> String {
        self.name.clone()
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, Default)]
#[serde(rename_all = "snake_case")]
pub enum SimCardStatus {
    #[default]
    InStock,
    Sold,
    Activated,
}

impl SimCardStatus {
    pub fn as_str(self) -> &'static str {
        match self {
            SimCardStatus::InStock => "in_stock",
            SimCardStatus::Sold => "sold",
            SimCardStatus::Activated => "activated",
        }
    }

    pub fn parse(raw: &str) -> Option<Self> {
        match raw {
            "in_stock" => Some(SimCardStatus::InStock),
            "sold" => Some(SimCardStatus::Sold),
            "activated" => Some(SimCardStatus::Activated),
            _ => None,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SimCardRecord {
    pub id: SimCardId,
    pub serial_number: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub team_id: Option<TeamId>,
    #[serde(default)]
    pub status: SimCardStatus,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub sold_at: Option<DateTime<Utc>>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub activated_at: Option<DateTime<Utc>>,
    pub created_at: DateTime<Utc>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct NewSimCard {
    pub serial_number: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub team_id: Option<TeamId>,
    #[serde(default)]
    pub status: SimCardStatus,
}

impl Record for SimCardRecord {
    type Id = SimCardId;
    type Draft = NewSimCard;

    const TABLE: &'static str = "sim_cards";

    fn id(&self) -> SimCardId {
        self.id
    }

    fn label(&self) -> String {
        format!("SIM {}", self.serial_number)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn user_row_from_rest_payload() {
        let raw = r#"{
            "id": "5b0e7c1e-2f7b-4d51-9d6c-0d2f4f5c9a11",
            "full_name": "Wanjiru Kamau",
            "email": "wanjiru@simco.co.ke",
            "phone": "+254712345678",
            "role": "team_leader",
            "team_id": null,
            "id_number": "29384756",
            "id_front_url": "https://cdn/front.jpg",
            "id_back_url": "https://cdn/back.jpg",
            "created_at": "2024-03-01T08:30:00Z"
        }"#;
        let user: UserRecord = serde_json::from_str(raw).expect("user row");

        assert_eq!(user.role, Role::TeamLeader);
        assert_eq!(user.team_id, None);
        assert_eq!(user.status, UserStatus::Active);
        assert_eq!(user.label(), "Wanjiru Kamau");
        assert_eq!(
            user.id,
            "5b0e7c1e-2f7b-4d51-9d6c-0d2f4f5c9a11".parse::<UserId>().expect("id")
        );
    }

    #[test]
    fn role_parsing_is_case_insensitive() {
        assert_eq!(Role::parse(" Team_Leader "), Some(Role::TeamLeader));
        assert_eq!(Role::parse("owner"), None);
        assert_eq!(
            serde_json::to_value(Role::TeamLeader).expect("role"),
            serde_json::json!("team_leader")
        );
    }

    #[test]
    fn sim_card_label_and_default_status() {
        let sim: SimCardRecord = serde_json::from_value(serde_json::json!({
            "id": SimCardId::new(),
            "serial_number": "8925402000000000001",
            "created_at": "2024-03-01T08:30:00Z"
        }))
        .expect("sim row");
        assert_eq!(sim.status, SimCardStatus::InStock);
        assert_eq!(sim.label(), "SIM 8925402000000000001");
    }
}
