use std::collections::{BTreeMap, BTreeSet};
use std::sync::{Mutex, MutexGuard};
use std::time::Duration;

use async_trait::async_trait;
use rusqlite::{params, Connection, OptionalExtension, Row, TransactionBehavior};

use super::{CampaignStore, GrantStore, ProfileLookup, StatusReplace};
use crate::error::{CoreError, CoreResult};
use crate::model::{Campaign, CampaignStatus, Grant, Membership, NewGrant, Profile};

const CAMPAIGN_COLUMNS: &str = "id, scope_id, channel_id, message_id, prize, winners_count, ends_at, \
     status, required_capability, min_level, bonus_entries, winners";

const GRANT_COLUMNS: &str = "id, owner_id, scope_id, kind, capability_id, name, expires";

pub struct SqliteStore {
    conn: Mutex<Connection>,
}

/// Raw campaign row; JSON columns are decoded outside the rusqlite closure.
struct CampaignRow {
    id: String,
    scope_id: String,
    channel_id: Option<String>,
    message_id: Option<String>,
    prize: String,
    winners_count: i64,
    ends_at: i64,
    status: String,
    required_capability: Option<String>,
    min_level: i64,
    bonus_entries: String,
    winners: String,
}

impl CampaignRow {
    fn from_row(row: &Row<'_>) -> rusqlite::Result<Self> {
        Ok(Self {
            id: row.get(0)?,
            scope_id: row.get(1)?,
            channel_id: row.get(2)?,
            message_id: row.get(3)?,
            prize: row.get(4)?,
            winners_count: row.get(5)?,
            ends_at: row.get(6)?,
            status: row.get(7)?,
            required_capability: row.get(8)?,
            min_level: row.get(9)?,
            bonus_entries: row.get(10)?,
            winners: row.get(11)?,
        })
    }

    fn into_campaign(self, entries: BTreeSet<String>) -> CoreResult<Campaign> {
        let status = CampaignStatus::parse(&self.status).ok_or_else(|| {
            CoreError::StoreUnavailable(format!("campaign {} has unknown status {:?}", self.id, self.status))
        })?;
        let winners_count = u32::try_from(self.winners_count).map_err(|_| {
            CoreError::StoreUnavailable(format!(
                "campaign {} has invalid winner count {}",
                self.id, self.winners_count
            ))
        })?;
        let bonus_entries: BTreeMap<String, u32> = serde_json::from_str(&self.bonus_entries)?;
        let winners: Vec<String> = serde_json::from_str(&self.winners)?;
        Ok(Campaign {
            id: self.id,
            scope_id: self.scope_id,
            channel_id: self.channel_id,
            message_id: self.message_id,
            prize: self.prize,
            winners_count,
            ends_at: self.ends_at,
            status,
            required_capability: self.required_capability,
            min_level: self.min_level,
            bonus_entries,
            entries,
            winners,
        })
    }
}

fn grant_from_row(row: &Row<'_>) -> rusqlite::Result<Grant> {
    Ok(Grant {
        id: row.get(0)?,
        owner_id: row.get(1)?,
        scope_id: row.get(2)?,
        kind: row.get(3)?,
        capability_id: row.get(4)?,
        name: row.get(5)?,
        expires: row.get(6)?,
    })
}

fn load_entries(conn: &Connection, campaign_id: &str) -> CoreResult<BTreeSet<String>> {
    let mut stmt = conn.prepare_cached(
        "SELECT participant_id FROM campaign_entries WHERE campaign_id = ?1",
    )?;
    let ids = stmt
        .query_map(params![campaign_id], |r| r.get::<_, String>(0))?
        .collect::<rusqlite::Result<BTreeSet<String>>>()?;
    Ok(ids)
}

fn load_campaigns(
    conn: &Connection,
    sql: &str,
    args: impl rusqlite::Params,
) -> CoreResult<Vec<Campaign>> {
    let rows = {
        let mut stmt = conn.prepare(sql)?;
        let rows = stmt
            .query_map(args, CampaignRow::from_row)?
            .collect::<rusqlite::Result<Vec<_>>>()?;
        rows
    };
    rows.into_iter()
        .map(|row| {
            let entries = load_entries(conn, &row.id)?;
            row.into_campaign(entries)
        })
        .collect()
}

impl SqliteStore {
    pub fn open(path: &str) -> CoreResult<Self> {
        let conn = Connection::open(path)?;
        conn.busy_timeout(Duration::from_secs(5))?;
        Ok(Self { conn: Mutex::new(conn) })
    }

    pub fn open_in_memory() -> CoreResult<Self> {
        Ok(Self { conn: Mutex::new(Connection::open_in_memory()?) })
    }

    fn lock(&self) -> CoreResult<MutexGuard<'_, Connection>> {
        self.conn
            .lock()
            .map_err(|_| CoreError::StoreUnavailable("connection mutex poisoned".to_string()))
    }

    pub fn init(&self) -> CoreResult<()> {
        self.lock()?.execute_batch(
            "BEGIN;
            CREATE TABLE IF NOT EXISTS campaigns (
                id TEXT PRIMARY KEY,
                scope_id TEXT NOT NULL,
                channel_id TEXT,
                message_id TEXT,
                prize TEXT NOT NULL,
                winners_count INTEGER NOT NULL,
                ends_at INTEGER NOT NULL,
                status TEXT NOT NULL CHECK (status IN ('ACTIVE', 'ENDED')),
                required_capability TEXT,
                min_level INTEGER NOT NULL DEFAULT 0,
                bonus_entries TEXT NOT NULL DEFAULT '{}',
                winners TEXT NOT NULL DEFAULT '[]'
            );
            CREATE INDEX IF NOT EXISTS campaigns_due ON campaigns (status, ends_at);
            CREATE INDEX IF NOT EXISTS campaigns_scope ON campaigns (scope_id, status);
            CREATE TABLE IF NOT EXISTS campaign_entries (
                campaign_id TEXT NOT NULL,
                participant_id TEXT NOT NULL,
                PRIMARY KEY (campaign_id, participant_id)
            );
            CREATE TABLE IF NOT EXISTS grants (
                id INTEGER PRIMARY KEY AUTOINCREMENT,
                owner_id TEXT NOT NULL,
                scope_id TEXT NOT NULL,
                kind TEXT NOT NULL,
                capability_id TEXT NOT NULL,
                name TEXT NOT NULL DEFAULT '',
                expires INTEGER
            );
            CREATE INDEX IF NOT EXISTS grants_expiry ON grants (expires) WHERE expires IS NOT NULL;
            CREATE INDEX IF NOT EXISTS grants_owner ON grants (owner_id, scope_id);
            CREATE TABLE IF NOT EXISTS profiles (
                scope_id TEXT NOT NULL,
                member_id TEXT NOT NULL,
                level INTEGER NOT NULL DEFAULT 0,
                capabilities TEXT NOT NULL DEFAULT '[]',
                PRIMARY KEY (scope_id, member_id)
            );
            COMMIT;",
        )?;
        Ok(())
    }

    /// Atomically add `delta` to a member's level, creating the profile if
    /// needed. Returns the new level.
    pub fn increment_level(&self, scope_id: &str, member_id: &str, delta: i64) -> CoreResult<i64> {
        let conn = self.lock()?;
        let level = conn.query_row(
            "INSERT INTO profiles (scope_id, member_id, level) VALUES (?1, ?2, ?3)
             ON CONFLICT (scope_id, member_id) DO UPDATE SET level = level + excluded.level
             RETURNING level",
            params![scope_id, member_id, delta],
            |r| r.get(0),
        )?;
        Ok(level)
    }

    /// Replace the capability set recorded for a member.
    pub fn set_capabilities(
        &self,
        scope_id: &str,
        member_id: &str,
        capabilities: &BTreeSet<String>,
    ) -> CoreResult<()> {
        let json = serde_json::to_string(capabilities)?;
        self.lock()?.execute(
            "INSERT INTO profiles (scope_id, member_id, capabilities) VALUES (?1, ?2, ?3)
             ON CONFLICT (scope_id, member_id) DO UPDATE SET capabilities = excluded.capabilities",
            params![scope_id, member_id, json],
        )?;
        Ok(())
    }

    fn read_profile(&self, scope_id: &str, member_id: &str) -> CoreResult<Option<Profile>> {
        let row: Option<(i64, String)> = self
            .lock()?
            .query_row(
                "SELECT level, capabilities FROM profiles WHERE scope_id = ?1 AND member_id = ?2",
                params![scope_id, member_id],
                |r| Ok((r.get(0)?, r.get(1)?)),
            )
            .optional()?;
        match row {
            Some((level, caps)) => Ok(Some(Profile {
                level,
                capabilities: serde_json::from_str(&caps)?,
            })),
            None => Ok(None),
        }
    }
}

impl CampaignStore for SqliteStore {
    fn insert_campaign(&self, campaign: &Campaign) -> CoreResult<()> {
        let bonus = serde_json::to_string(&campaign.bonus_entries)?;
        let winners = serde_json::to_string(&campaign.winners)?;
        let mut conn = self.lock()?;
        let tx = conn.transaction()?;
        tx.execute(
            &format!("INSERT INTO campaigns ({}) VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, ?9, ?10, ?11, ?12)", CAMPAIGN_COLUMNS),
            params![
                campaign.id,
                campaign.scope_id,
                campaign.channel_id,
                campaign.message_id,
                campaign.prize,
                i64::from(campaign.winners_count),
                campaign.ends_at,
                campaign.status.as_str(),
                campaign.required_capability,
                campaign.min_level,
                bonus,
                winners
            ],
        )?;
        for participant in &campaign.entries {
            tx.execute(
                "INSERT OR IGNORE INTO campaign_entries (campaign_id, participant_id) VALUES (?1, ?2)",
                params![campaign.id, participant],
            )?;
        }
        tx.commit()?;
        Ok(())
    }

    fn get_campaign(&self, id: &str) -> CoreResult<Option<Campaign>> {
        let conn = self.lock()?;
        let mut found = load_campaigns(
            &conn,
            &format!("SELECT {} FROM campaigns WHERE id = ?1", CAMPAIGN_COLUMNS),
            params![id],
        )?;
        Ok(found.pop())
    }

    fn find_due_campaigns(&self, now: i64) -> CoreResult<Vec<Campaign>> {
        let conn = self.lock()?;
        load_campaigns(
            &conn,
            &format!(
                "SELECT {} FROM campaigns WHERE status = 'ACTIVE' AND ends_at <= ?1 ORDER BY ends_at",
                CAMPAIGN_COLUMNS
            ),
            params![now],
        )
    }

    fn list_active(&self, scope_id: &str, limit: usize) -> CoreResult<Vec<Campaign>> {
        let conn = self.lock()?;
        load_campaigns(
            &conn,
            &format!(
                "SELECT {} FROM campaigns WHERE scope_id = ?1 AND status = 'ACTIVE' ORDER BY ends_at LIMIT ?2",
                CAMPAIGN_COLUMNS
            ),
            params![scope_id, limit as i64],
        )
    }

    fn add_entry(&self, campaign_id: &str, participant_id: &str) -> CoreResult<bool> {
        let changed = self.lock()?.execute(
            "INSERT OR IGNORE INTO campaign_entries (campaign_id, participant_id)
             SELECT ?1, ?2 WHERE EXISTS (SELECT 1 FROM campaigns WHERE id = ?1 AND status = 'ACTIVE')",
            params![campaign_id, participant_id],
        )?;
        Ok(changed == 1)
    }

    fn remove_entry(&self, campaign_id: &str, participant_id: &str) -> CoreResult<bool> {
        let changed = self.lock()?.execute(
            "DELETE FROM campaign_entries WHERE campaign_id = ?1 AND participant_id = ?2
             AND EXISTS (SELECT 1 FROM campaigns WHERE id = ?1 AND status = 'ACTIVE')",
            params![campaign_id, participant_id],
        )?;
        Ok(changed == 1)
    }

    fn toggle_entry(&self, campaign_id: &str, participant_id: &str) -> CoreResult<Membership> {
        let mut conn = self.lock()?;
        let tx = conn.transaction_with_behavior(TransactionBehavior::Immediate)?;
        let status: Option<String> = tx
            .query_row(
                "SELECT status FROM campaigns WHERE id = ?1",
                params![campaign_id],
                |r| r.get(0),
            )
            .optional()?;
        match status.as_deref() {
            None => return Err(CoreError::NotFound(format!("campaign {}", campaign_id))),
            Some("ACTIVE") => {}
            Some(_) => {
                return Err(CoreError::NotFound(format!("campaign {} has ended", campaign_id)))
            }
        }

        let removed = tx.execute(
            "DELETE FROM campaign_entries WHERE campaign_id = ?1 AND participant_id = ?2",
            params![campaign_id, participant_id],
        )?;
        let membership = if removed == 1 {
            Membership::Left
        } else {
            tx.execute(
                "INSERT INTO campaign_entries (campaign_id, participant_id) VALUES (?1, ?2)",
                params![campaign_id, participant_id],
            )?;
            Membership::Joined
        };
        tx.commit()?;
        Ok(membership)
    }

    fn replace_status(
        &self,
        campaign_id: &str,
        expected: CampaignStatus,
        new: CampaignStatus,
        winners: &[String],
    ) -> CoreResult<StatusReplace> {
        let encoded = serde_json::to_string(winners)?;
        let mut conn = self.lock()?;
        let tx = conn.transaction_with_behavior(TransactionBehavior::Immediate)?;
        let status: Option<String> = tx
            .query_row(
                "SELECT status FROM campaigns WHERE id = ?1",
                params![campaign_id],
                |r| r.get(0),
            )
            .optional()?;
        if status.as_deref() != Some(expected.as_str()) {
            return Ok(StatusReplace::StatusMismatch);
        }

        {
            let mut stmt = tx.prepare_cached(
                "SELECT EXISTS (SELECT 1 FROM campaign_entries WHERE campaign_id = ?1 AND participant_id = ?2)",
            )?;
            for winner in winners {
                let present: bool = stmt.query_row(params![campaign_id, winner], |r| r.get(0))?;
                if !present {
                    return Ok(StatusReplace::PoolChanged);
                }
            }
        }

        tx.execute(
            "UPDATE campaigns SET status = ?1, winners = ?2 WHERE id = ?3",
            params![new.as_str(), encoded, campaign_id],
        )?;
        tx.commit()?;
        Ok(StatusReplace::Replaced)
    }
}

impl GrantStore for SqliteStore {
    fn insert_grant(&self, grant: &NewGrant) -> CoreResult<Grant> {
        let conn = self.lock()?;
        let created = conn.query_row(
            &format!(
                "INSERT INTO grants (owner_id, scope_id, kind, capability_id, name, expires)
                 VALUES (?1, ?2, ?3, ?4, ?5, ?6) RETURNING {}",
                GRANT_COLUMNS
            ),
            params![
                grant.owner_id,
                grant.scope_id,
                grant.kind,
                grant.capability_id,
                grant.name,
                grant.expires
            ],
            grant_from_row,
        )?;
        Ok(created)
    }

    fn find_expired_grants(&self, now: i64) -> CoreResult<Vec<Grant>> {
        let conn = self.lock()?;
        let mut stmt = conn.prepare(&format!(
            "SELECT {} FROM grants WHERE expires IS NOT NULL AND expires <= ?1 ORDER BY expires",
            GRANT_COLUMNS
        ))?;
        let grants = stmt
            .query_map(params![now], grant_from_row)?
            .collect::<rusqlite::Result<Vec<_>>>()?;
        Ok(grants)
    }

    fn delete_grant(&self, id: i64) -> CoreResult<bool> {
        let changed = self
            .lock()?
            .execute("DELETE FROM grants WHERE id = ?1", params![id])?;
        Ok(changed == 1)
    }

    fn grants_for(&self, owner_id: &str, scope_id: &str) -> CoreResult<Vec<Grant>> {
        let conn = self.lock()?;
        let mut stmt = conn.prepare(&format!(
            "SELECT {} FROM grants WHERE owner_id = ?1 AND scope_id = ?2 ORDER BY id",
            GRANT_COLUMNS
        ))?;
        let grants = stmt
            .query_map(params![owner_id, scope_id], grant_from_row)?
            .collect::<rusqlite::Result<Vec<_>>>()?;
        Ok(grants)
    }
}

#[async_trait]
impl ProfileLookup for SqliteStore {
    async fn profile(&self, scope_id: &str, member_id: &str) -> CoreResult<Option<Profile>> {
        self.read_profile(scope_id, member_id)
    }
}
