use anyhow::{anyhow, Context, Result};
use chrono::{DateTime, Utc};
use sqlx::{
    sqlite::{SqliteConnectOptions, SqlitePoolOptions, SqliteRow},
    Pool, Row, Sqlite,
};
use std::{
    fs,
    path::{Path, PathBuf},
    str::FromStr,
};
use tracing::{debug, info};
use uuid::Uuid;

use shared::domain::{
    NewSimCard, NewTeam, NewUser, Role, SimCardId, SimCardRecord, SimCardStatus, TeamId,
    TeamRecord, UserId, UserRecord, UserStatus,
};

/// Local backend mirroring the hosted tables plus an artifact blob table.
#[derive(Clone)]
pub struct Storage {
    pool: Pool<Sqlite>,
}

#[derive(Debug, Clone)]
pub struct StoredArtifact {
    pub key: String,
    pub mime_type: Option<String>,
    pub size_bytes: u64,
    pub content: Vec<u8>,
}

pub const LOCAL_ARTIFACT_URL_PREFIX: &str = "local://artifacts/";

impl Storage {
    pub async fn new(database_url: &str) -> Result<Self> {
        ensure_sqlite_parent_dir_exists(database_url)?;

        let connect_options = SqliteConnectOptions::from_str(database_url)?
            .create_if_missing(true)
            .foreign_keys(true);
        // Every connection to `sqlite::memory:` opens its own database.
        let in_memory = database_url.starts_with("sqlite::memory:");
        let pool = SqlitePoolOptions::new()
            .max_connections(if in_memory { 1 } else { 5 })
            .idle_timeout(None)
            .max_lifetime(None)
            .connect_with(connect_options)
            .await?;
        sqlx::migrate!("./migrations").run(&pool).await?;
        info!(%database_url, "storage: sqlite store ready");
        Ok(Self { pool })
    }

    pub async fn health_check(&self) -> Result<()> {
        let _: i64 = sqlx::query_scalar("SELECT 1")
            .fetch_one(&self.pool)
            .await
            .context("sqlite ping failed")?;
        Ok(())
    }

    /// Inserts a user. The initial password belongs to the auth provider and
    /// is not persisted by the local store.
    pub async fn create_user(&self, user: &NewUser) -> Result<UserRecord> {
        let record = UserRecord {
            id: UserId::new(),
            full_name: user.full_name.trim().to_string(),
            email: user.email.trim().to_ascii_lowercase(),
            phone: user.phone.trim().to_string(),
            role: user.role,
            team_id: user.team_id,
            id_number: user.id_number.trim().to_string(),
            id_front_url: user.id_front_url.clone(),
            id_back_url: user.id_back_url.clone(),
            status: UserStatus::Active,
            created_at: Utc::now(),
        };
        sqlx::query(
            "INSERT INTO users (id, full_name, email, phone, role, team_id, id_number, id_front_url, id_back_url, status, created_at)
             VALUES (?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?)",
        )
        .bind(record.id.to_string())
        .bind(&record.full_name)
        .bind(&record.email)
        .bind(&record.phone)
        .bind(record.role.as_str())
        .bind(record.team_id.map(|id| id.to_string()))
        .bind(&record.id_number)
        .bind(&record.id_front_url)
        .bind(&record.id_back_url)
        .bind(record.status.as_str())
        .bind(record.created_at)
        .execute(&self.pool)
        .await
        .with_context(|| format!("failed to insert user '{}'", record.email))?;
        debug!(user_id = %record.id, "storage: user inserted");
        Ok(record)
    }

    pub async fn list_users(&self) -> Result<Vec<UserRecord>> {
        let rows = sqlx::query(
            "SELECT id, full_name, email, phone, role, team_id, id_number, id_front_url, id_back_url, status, created_at
             FROM users ORDER BY created_at DESC",
        )
        .fetch_all(&self.pool)
        .await?;
        rows.iter().map(user_from_row).collect()
    }

    pub async fn get_user(&self, user_id: UserId) -> Result<Option<UserRecord>> {
        let row = sqlx::query(
            "SELECT id, full_name, email, phone, role, team_id, id_number, id_front_url, id_back_url, status, created_at
             FROM users WHERE id = ?",
        )
        .bind(user_id.to_string())
        .fetch_optional(&self.pool)
        .await?;
        row.as_ref().map(user_from_row).transpose()
    }

    /// Returns whether a row was removed.
    pub async fn delete_user(&self, user_id: UserId) -> Result<bool> {
        let result = sqlx::query("DELETE FROM users WHERE id = ?")
            .bind(user_id.to_string())
            .execute(&self.pool)
            .await?;
        Ok(result.rows_affected() > 0)
    }

    pub async fn create_team(&self, team: &NewTeam) -> Result<TeamRecord> {
        let record = TeamRecord {
            id: TeamId::new(),
            name: team.name.trim().to_string(),
            leader_id: team.leader_id,
            region: team.region.clone(),
            created_at: Utc::now(),
        };
        sqlx::query(
            "INSERT INTO teams (id, name, leader_id, region, created_at) VALUES (?, ?, ?, ?, ?)",
        )
        .bind(record.id.to_string())
        .bind(&record.name)
        .bind(record.leader_id.map(|id| id.to_string()))
        .bind(&record.region)
        .bind(record.created_at)
        .execute(&self.pool)
        .await
        .with_context(|| format!("failed to insert team '{}'", record.name))?;
        Ok(record)
    }

    pub async fn list_teams(&self) -> Result<Vec<TeamRecord>> {
        let rows = sqlx::query(
            "SELECT id, name, leader_id, region, created_at FROM teams ORDER BY created_at DESC",
        )
        .fetch_all(&self.pool)
        .await?;
        rows.iter()
            .map(|r| {
                Ok(TeamRecord {
                    id: TeamId(parse_uuid(r.get::<String, _>(0))?),
                    name: r.get::<String, _>(1),
                    leader_id: parse_optional_uuid(r.get::<Option<String>, _>(2))?.map(UserId),
                    region: r.get::<Option<String>, _>(3),
                    created_at: r.get::<DateTime<Utc>, _>(4),
                })
            })
            .collect()
    }

    pub async fn delete_team(&self, team_id: TeamId) -> Result<bool> {
        let result = sqlx::query("DELETE FROM teams WHERE id = ?")
            .bind(team_id.to_string())
            .execute(&self.pool)
            .await?;
        Ok(result.rows_affected() > 0)
    }

    pub async fn create_sim_card(&self, sim: &NewSimCard) -> Result<SimCardRecord> {
        let now = Utc::now();
        let record = SimCardRecord {
            id: SimCardId::new(),
            serial_number: sim.serial_number.trim().to_string(),
            team_id: sim.team_id,
            status: sim.status,
            sold_at: matches!(sim.status, SimCardStatus::Sold | SimCardStatus::Activated)
                .then_some(now),
            activated_at: (sim.status == SimCardStatus::Activated).then_some(now),
            created_at: now,
        };
        sqlx::query(
            "INSERT INTO sim_cards (id, serial_number, team_id, status, sold_at, activated_at, created_at)
             VALUES (?, ?, ?, ?, ?, ?, ?)",
        )
        .bind(record.id.to_string())
        .bind(&record.serial_number)
        .bind(record.team_id.map(|id| id.to_string()))
        .bind(record.status.as_str())
        .bind(record.sold_at)
        .bind(record.activated_at)
        .bind(record.created_at)
        .execute(&self.pool)
        .await
        .with_context(|| format!("failed to insert sim card '{}'", record.serial_number))?;
        Ok(record)
    }

    pub async fn list_sim_cards(&self) -> Result<Vec<SimCardRecord>> {
        let rows = sqlx::query(
            "SELECT id, serial_number, team_id, status, sold_at, activated_at, created_at
             FROM sim_cards ORDER BY created_at DESC",
        )
        .fetch_all(&self.pool)
        .await?;
        rows.iter().map(sim_card_from_row).collect()
    }

    /// Moves a SIM card forward through in_stock -> sold -> activated,
    /// stamping the matching timestamp. Returns `None` for an unknown id.
    pub async fn set_sim_card_status(
        &self,
        sim_card_id: SimCardId,
        status: SimCardStatus,
    ) -> Result<Option<SimCardRecord>> {
        let now = Utc::now();
        let result = sqlx::query(
            "UPDATE sim_cards SET status = ?1,
                 sold_at = CASE WHEN ?1 IN ('sold', 'activated') THEN COALESCE(sold_at, ?2) ELSE sold_at END,
                 activated_at = CASE WHEN ?1 = 'activated' THEN COALESCE(activated_at, ?2) ELSE activated_at END
             WHERE id = ?3",
        )
        .bind(status.as_str())
        .bind(now)
        .bind(sim_card_id.to_string())
        .execute(&self.pool)
        .await?;
        if result.rows_affected() == 0 {
            return Ok(None);
        }

        let row = sqlx::query(
            "SELECT id, serial_number, team_id, status, sold_at, activated_at, created_at
             FROM sim_cards WHERE id = ?",
        )
        .bind(sim_card_id.to_string())
        .fetch_optional(&self.pool)
        .await?;
        row.as_ref().map(sim_card_from_row).transpose()
    }

    pub async fn delete_sim_card(&self, sim_card_id: SimCardId) -> Result<bool> {
        let result = sqlx::query("DELETE FROM sim_cards WHERE id = ?")
            .bind(sim_card_id.to_string())
            .execute(&self.pool)
            .await?;
        Ok(result.rows_affected() > 0)
    }

    /// Stores (or replaces) an artifact and returns its local URL.
    pub async fn store_artifact(
        &self,
        key: &str,
        content: &[u8],
        mime_type: Option<&str>,
    ) -> Result<String> {
        let size_bytes = i64::try_from(content.len()).unwrap_or(i64::MAX);
        sqlx::query(
            "INSERT INTO artifacts (key, mime_type, size_bytes, content, created_at)
             VALUES (?, ?, ?, ?, ?)
             ON CONFLICT(key) DO UPDATE SET mime_type=excluded.mime_type, size_bytes=excluded.size_bytes, content=excluded.content",
        )
        .bind(key)
        .bind(mime_type)
        .bind(size_bytes)
        .bind(content)
        .bind(Utc::now())
        .execute(&self.pool)
        .await
        .with_context(|| format!("failed to store artifact '{key}'"))?;
        Ok(local_artifact_url(key))
    }

    pub async fn load_artifact(&self, key: &str) -> Result<Option<StoredArtifact>> {
        let row = sqlx::query("SELECT key, mime_type, size_bytes, content FROM artifacts WHERE key = ?")
            .bind(key)
            .fetch_optional(&self.pool)
            .await?;
        Ok(row.map(|r| StoredArtifact {
            key: r.get::<String, _>(0),
            mime_type: r.get::<Option<String>, _>(1),
            size_bytes: r.get::<i64, _>(2).max(0) as u64,
            content: r.get::<Vec<u8>, _>(3),
        }))
    }

    pub async fn remove_artifact(&self, key: &str) -> Result<bool> {
        let result = sqlx::query("DELETE FROM artifacts WHERE key = ?")
            .bind(key)
            .execute(&self.pool)
            .await?;
        Ok(result.rows_affected() > 0)
    }
}

pub fn local_artifact_url(key: &str) -> String {
    format!("{LOCAL_ARTIFACT_URL_PREFIX}{key}")
}

fn user_from_row(r: &SqliteRow) -> Result<UserRecord> {
    let role_raw = r.get::<String, _>(4);
    let status_raw = r.get::<String, _>(9);
    Ok(UserRecord {
        id: UserId(parse_uuid(r.get::<String, _>(0))?),
        full_name: r.get::<String, _>(1),
        email: r.get::<String, _>(2),
        phone: r.get::<String, _>(3),
        role: Role::parse(&role_raw).ok_or_else(|| anyhow!("unknown role '{role_raw}'"))?,
        team_id: parse_optional_uuid(r.get::<Option<String>, _>(5))?.map(TeamId),
        id_number: r.get::<String, _>(6),
        id_front_url: r.get::<String, _>(7),
        id_back_url: r.get::<String, _>(8),
        status: UserStatus::parse(&status_raw)
            .ok_or_else(|| anyhow!("unknown user status '{status_raw}'"))?,
        created_at: r.get::<DateTime<Utc>, _>(10),
    })
}

fn sim_card_from_row(r: &SqliteRow) -> Result<SimCardRecord> {
    let status_raw = r.get::<String, _>(3);
    Ok(SimCardRecord {
        id: SimCardId(parse_uuid(r.get::<String, _>(0))?),
        serial_number: r.get::<String, _>(1),
        team_id: parse_optional_uuid(r.get::<Option<String>, _>(2))?.map(TeamId),
        status: SimCardStatus::parse(&status_raw)
            .ok_or_else(|| anyhow!("unknown sim card status '{status_raw}'"))?,
        sold_at: r.get::<Option<DateTime<Utc>>, _>(4),
        activated_at: r.get::<Option<DateTime<Utc>>, _>(5),
        created_at: r.get::<DateTime<Utc>, _>(6),
    })
}

fn parse_uuid(raw: String) -> Result<Uuid> {
    Uuid::parse_str(&raw).with_context(|| format!("invalid uuid '{raw}' in storage"))
}

fn parse_optional_uuid(raw: Option<String>) -> Result<Option<Uuid>> {
    raw.map(parse_uuid).transpose()
}

fn ensure_sqlite_parent_dir_exists(database_url: &str) -> Result<()> {
    let Some(path) = sqlite_path(database_url) else {
        return Ok(());
    };

    let Some(parent) = path.parent() else {
        return Ok(());
    };

    fs::create_dir_all(parent).with_context(|| {
        format!(
            "failed to create parent directory '{}' for database url '{database_url}'",
            parent.display()
        )
    })?;

    Ok(())
}

fn sqlite_path(database_url: &str) -> Option<PathBuf> {
    if database_url.starts_with("sqlite::memory:") || !database_url.starts_with("sqlite:") {
        return None;
    }

    let path = database_url
        .trim_start_matches("sqlite://")
        .trim_start_matches("sqlite:")
        .split('?')
        .next()
        .unwrap_or_default();

    if path.is_empty() {
        return None;
    }

    Some(Path::new(path).to_path_buf())
}

#[cfg(test)]
#[path = "tests/lib_tests.rs"]
mod tests;
