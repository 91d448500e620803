//! SQLite-backed stores using sqlx
//!
//! One pool serves both the community settings and the ledger. Every ledger
//! read-modify-write runs inside `BEGIN IMMEDIATE`, which takes SQLite's write
//! lock up front: two star actions on the same message are serialized, so at
//! most one of them can observe itself crossing the threshold. The
//! transaction is a sqlx `Transaction`, rolled back if the update is dropped
//! midway.
//!
//! Snowflakes are stored bit-for-bit in SQLite's signed 64-bit INTEGER.

use super::traits::*;
use crate::ids::{CommunityId, MessageId, UserId};
use async_trait::async_trait;
use sqlx::sqlite::{
    SqliteConnectOptions, SqliteConnection, SqliteJournalMode, SqlitePool, SqlitePoolOptions,
    SqliteRow,
};
use sqlx::Row;
use std::collections::BTreeSet;
use std::path::Path;
use std::sync::Arc;
use std::time::Duration;
use tracing::{debug, info, warn};

/// Connection pool tuning
#[derive(Debug, Clone)]
pub struct DatabaseOptions {
    pub max_connections: u32,
    /// How long a writer waits for the SQLite lock before failing
    pub busy_timeout: Duration,
}

impl Default for DatabaseOptions {
    fn default() -> Self {
        Self {
            max_connections: 5,
            busy_timeout: Duration::from_secs(5),
        }
    }
}

/// Owns the pool and hands out the two stores built on it
pub struct Database {
    pool: SqlitePool,
    communities: Arc<SqliteCommunityStore>,
    ledger: Arc<SqliteLedger>,
}

impl Database {
    /// Open (creating if missing) the database file at `path`.
    pub async fn open(path: &Path, options: &DatabaseOptions) -> StoreResult<Self> {
        if let Some(parent) = path.parent() {
            if !parent.as_os_str().is_empty() {
                std::fs::create_dir_all(parent).map_err(|e| {
                    StoreError::Invalid(format!(
                        "cannot create database directory '{}': {}",
                        parent.display(),
                        e
                    ))
                })?;
            }
        }

        let connect = SqliteConnectOptions::new()
            .filename(path)
            .create_if_missing(true)
            .foreign_keys(true)
            .journal_mode(SqliteJournalMode::Wal)
            .busy_timeout(options.busy_timeout);

        let pool = SqlitePoolOptions::new()
            .max_connections(options.max_connections)
            .connect_with(connect)
            .await?;

        info!(path = %path.display(), "Opened starboard database");

        Ok(Self::from_pool(pool))
    }

    /// Wrap an existing pool.
    pub fn from_pool(pool: SqlitePool) -> Self {
        Self {
            communities: Arc::new(SqliteCommunityStore::new(pool.clone())),
            ledger: Arc::new(SqliteLedger::new(pool.clone())),
            pool,
        }
    }

    /// Apply pending schema migrations.
    pub async fn migrate(&self) -> StoreResult<()> {
        sqlx::migrate!("./migrations").run(&self.pool).await?;
        debug!("Database schema up to date");
        Ok(())
    }

    pub fn communities(&self) -> Arc<SqliteCommunityStore> {
        self.communities.clone()
    }

    pub fn ledger(&self) -> Arc<SqliteLedger> {
        self.ledger.clone()
    }

    pub fn pool(&self) -> &SqlitePool {
        &self.pool
    }

    /// Close every pooled connection.
    pub async fn close(&self) {
        self.pool.close().await;
    }
}

fn to_sql(raw: u64) -> i64 {
    raw as i64
}

fn from_sql(raw: i64) -> u64 {
    raw as u64
}

fn unique_violation(err: &sqlx::Error) -> bool {
    matches!(err, sqlx::Error::Database(db) if db.is_unique_violation())
}

// ============================================================================
// COMMUNITY SETTINGS
// ============================================================================

pub struct SqliteCommunityStore {
    pool: SqlitePool,
}

impl SqliteCommunityStore {
    pub fn new(pool: SqlitePool) -> Self {
        Self { pool }
    }
}

fn community_from_row(row: &SqliteRow) -> StoreResult<CommunityConfig> {
    let id: i64 = row.try_get("id")?;
    let required: i64 = row.try_get("required_stars")?;
    let star_threshold = u32::try_from(required)
        .ok()
        .filter(|t| *t >= MIN_STAR_THRESHOLD)
        .ok_or_else(|| {
            StoreError::Corrupt(format!("community {}: required_stars = {}", id, required))
        })?;

    Ok(CommunityConfig {
        community_id: CommunityId(from_sql(id)),
        relay_target: RelayTarget::new(
            row.try_get::<String, _>("relay_target_id")?,
            row.try_get::<String, _>("relay_target_secret")?,
        ),
        star_threshold,
        allow_self_star: row.try_get("allow_self_star")?,
        delete_origin_after_relay: row.try_get("delete_origin")?,
    })
}

#[async_trait]
impl CommunityStore for SqliteCommunityStore {
    async fn get(&self, community: CommunityId) -> StoreResult<CommunityConfig> {
        let row = sqlx::query(
            r#"
            SELECT id, relay_target_id, relay_target_secret, required_stars,
                   allow_self_star, delete_origin
            FROM communities
            WHERE id = ?
            "#,
        )
        .bind(to_sql(community.get()))
        .fetch_optional(&self.pool)
        .await?;

        match row {
            Some(row) => community_from_row(&row),
            None => Err(StoreError::NotFound(format!("community {}", community))),
        }
    }

    async fn authorize(
        &self,
        community: CommunityId,
        target: RelayTarget,
    ) -> StoreResult<AuthorizeOutcome> {
        let mut tx = self.pool.begin().await?;

        let inserted = sqlx::query(
            r#"
            INSERT INTO communities (id, relay_target_id, relay_target_secret, required_stars)
            VALUES (?, ?, ?, ?)
            ON CONFLICT (id) DO NOTHING
            "#,
        )
        .bind(to_sql(community.get()))
        .bind(&target.id)
        .bind(target.secret())
        .bind(i64::from(DEFAULT_STAR_THRESHOLD))
        .execute(&mut *tx)
        .await?
        .rows_affected();

        let outcome = if inserted == 1 {
            AuthorizeOutcome::Created
        } else {
            sqlx::query(
                "UPDATE communities SET relay_target_id = ?, relay_target_secret = ? WHERE id = ?",
            )
            .bind(&target.id)
            .bind(target.secret())
            .bind(to_sql(community.get()))
            .execute(&mut *tx)
            .await?;
            AuthorizeOutcome::Updated
        };

        tx.commit().await?;
        debug!(community_id = %community, ?outcome, "Community authorized");
        Ok(outcome)
    }

    async fn apply_settings(&self, change: &SettingsChange) -> StoreResult<CommunityConfig> {
        if let Some(threshold) = change.star_threshold {
            if threshold < MIN_STAR_THRESHOLD {
                return Err(StoreError::Invalid(format!(
                    "star threshold {} is below {}",
                    threshold, MIN_STAR_THRESHOLD
                )));
            }
        }

        // Single statement, so concurrent partial updates never interleave
        let row = sqlx::query(
            r#"
            UPDATE communities
            SET required_stars  = COALESCE(?, required_stars),
                allow_self_star = COALESCE(?, allow_self_star),
                delete_origin   = COALESCE(?, delete_origin)
            WHERE id = ?
            RETURNING id, relay_target_id, relay_target_secret, required_stars,
                      allow_self_star, delete_origin
            "#,
        )
        .bind(change.star_threshold.map(i64::from))
        .bind(change.allow_self_star)
        .bind(change.delete_origin_after_relay)
        .bind(to_sql(change.community_id.get()))
        .fetch_optional(&self.pool)
        .await?;

        match row {
            Some(row) => community_from_row(&row),
            None => Err(StoreError::NotFound(format!(
                "community {}",
                change.community_id
            ))),
        }
    }

    async fn count(&self) -> StoreResult<u64> {
        let count: i64 = sqlx::query_scalar("SELECT COUNT(*) FROM communities")
            .fetch_one(&self.pool)
            .await?;
        Ok(count as u64)
    }
}

// ============================================================================
// LEDGER
// ============================================================================

pub struct SqliteLedger {
    pool: SqlitePool,
}

impl SqliteLedger {
    pub fn new(pool: SqlitePool) -> Self {
        Self { pool }
    }
}

async fn load_entry(
    conn: &mut SqliteConnection,
    id: MessageId,
) -> StoreResult<Option<StarredMessage>> {
    let row = sqlx::query("SELECT sent, relay_claimed_at FROM messages WHERE id = ?")
        .bind(to_sql(id.get()))
        .fetch_optional(&mut *conn)
        .await?;

    let Some(row) = row else {
        return Ok(None);
    };

    let users: Vec<i64> =
        sqlx::query_scalar("SELECT user_id FROM message_stars WHERE message_id = ?")
            .bind(to_sql(id.get()))
            .fetch_all(&mut *conn)
            .await?;

    let claimed_at: Option<i64> = row.try_get("relay_claimed_at")?;

    Ok(Some(StarredMessage {
        id,
        star_users: users
            .into_iter()
            .map(|u| UserId(from_sql(u)))
            .collect::<BTreeSet<_>>(),
        sent: row.try_get("sent")?,
        relay_claimed_at: claimed_at.map(from_sql),
    }))
}

/// Write the difference between two versions of an entry.
async fn persist_changes(
    conn: &mut SqliteConnection,
    before: &StarredMessage,
    after: &StarredMessage,
) -> StoreResult<()> {
    if !before.star_users.is_subset(&after.star_users) {
        return Err(StoreError::Corrupt(format!(
            "message {}: star users removed",
            before.id
        )));
    }

    for user in after.star_users.difference(&before.star_users) {
        sqlx::query("INSERT INTO message_stars (message_id, user_id) VALUES (?, ?)")
            .bind(to_sql(before.id.get()))
            .bind(to_sql(user.get()))
            .execute(&mut *conn)
            .await?;
    }

    if after.sent != before.sent || after.relay_claimed_at != before.relay_claimed_at {
        sqlx::query("UPDATE messages SET sent = MAX(sent, ?), relay_claimed_at = ? WHERE id = ?")
            .bind(after.sent)
            .bind(after.relay_claimed_at.map(to_sql))
            .bind(to_sql(before.id.get()))
            .execute(&mut *conn)
            .await?;
    }

    Ok(())
}

async fn update_locked<T, E, F>(conn: &mut SqliteConnection, id: MessageId, apply: F) -> Result<T, E>
where
    E: From<StoreError>,
    F: FnOnce(&mut StarredMessage) -> Result<T, E>,
{
    let before = load_entry(conn, id)
        .await?
        .ok_or_else(|| StoreError::NotFound(format!("message {}", id)))?;

    let mut after = before.clone();
    let value = apply(&mut after)?;

    persist_changes(conn, &before, &after).await?;
    Ok(value)
}

#[async_trait]
impl Ledger for SqliteLedger {
    async fn insert(&self, entry: StarredMessage) -> StoreResult<()> {
        let mut tx = self.pool.begin().await?;

        let inserted = sqlx::query("INSERT INTO messages (id, sent, relay_claimed_at) VALUES (?, ?, ?)")
            .bind(to_sql(entry.id.get()))
            .bind(entry.sent)
            .bind(entry.relay_claimed_at.map(to_sql))
            .execute(&mut *tx)
            .await;

        match inserted {
            Ok(_) => {}
            Err(e) if unique_violation(&e) => {
                return Err(StoreError::Conflict(format!(
                    "message {} already tracked",
                    entry.id
                )));
            }
            Err(e) => return Err(e.into()),
        }

        for user in &entry.star_users {
            sqlx::query("INSERT INTO message_stars (message_id, user_id) VALUES (?, ?)")
                .bind(to_sql(entry.id.get()))
                .bind(to_sql(user.get()))
                .execute(&mut *tx)
                .await?;
        }

        tx.commit().await?;
        Ok(())
    }

    async fn get(&self, id: MessageId) -> StoreResult<Option<StarredMessage>> {
        let mut tx = self.pool.begin().await?;
        let entry = load_entry(&mut tx, id).await?;
        tx.commit().await?;
        Ok(entry)
    }

    async fn update<T, E, F>(&self, id: MessageId, apply: F) -> Result<T, E>
    where
        T: Send,
        E: From<StoreError> + Send,
        F: FnOnce(&mut StarredMessage) -> Result<T, E> + Send,
    {
        // Rolls back on drop, so a cancelled update never leaves the lock behind
        let mut tx = self
            .pool
            .begin_with("BEGIN IMMEDIATE")
            .await
            .map_err(StoreError::from)?;

        match update_locked(&mut *tx, id, apply).await {
            Ok(value) => {
                tx.commit().await.map_err(StoreError::from)?;
                Ok(value)
            }
            Err(err) => {
                if let Err(e) = tx.rollback().await {
                    warn!(message_id = %id, error = %e, "Ledger rollback failed");
                }
                Err(err)
            }
        }
    }

    async fn mark_sent(&self, id: MessageId) -> StoreResult<()> {
        let updated =
            sqlx::query("UPDATE messages SET sent = 1, relay_claimed_at = NULL WHERE id = ?")
                .bind(to_sql(id.get()))
                .execute(&self.pool)
                .await?
                .rows_affected();

        if updated == 0 {
            return Err(StoreError::NotFound(format!("message {}", id)));
        }
        Ok(())
    }

    async fn release_claim(&self, id: MessageId) -> StoreResult<()> {
        let updated = sqlx::query("UPDATE messages SET relay_claimed_at = NULL WHERE id = ?")
            .bind(to_sql(id.get()))
            .execute(&self.pool)
            .await?
            .rows_affected();

        if updated == 0 {
            return Err(StoreError::NotFound(format!("message {}", id)));
        }
        Ok(())
    }

    async fn ids(&self) -> StoreResult<Vec<MessageId>> {
        let ids: Vec<i64> = sqlx::query_scalar("SELECT id FROM messages")
            .fetch_all(&self.pool)
            .await?;

        let mut ids: Vec<MessageId> = ids.into_iter().map(|i| MessageId(from_sql(i))).collect();
        ids.sort();
        Ok(ids)
    }

    async fn delete(&self, id: MessageId) -> StoreResult<bool> {
        let deleted = sqlx::query("DELETE FROM messages WHERE id = ?")
            .bind(to_sql(id.get()))
            .execute(&self.pool)
            .await?
            .rows_affected();
        Ok(deleted > 0)
    }

    async fn stats(&self) -> StoreResult<LedgerStats> {
        let (tracked, sent): (i64, i64) =
            sqlx::query_as("SELECT COUNT(*), COALESCE(SUM(sent), 0) FROM messages")
                .fetch_one(&self.pool)
                .await?;
        let total_stars: i64 = sqlx::query_scalar("SELECT COUNT(*) FROM message_stars")
            .fetch_one(&self.pool)
            .await?;

        Ok(LedgerStats {
            tracked: tracked as u64,
            sent: sent as u64,
            total_stars: total_stars as u64,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::TempDir;

    async fn open_temp() -> (TempDir, Database) {
        let dir = TempDir::new().unwrap();
        let db = Database::open(&dir.path().join("starboard.db"), &DatabaseOptions::default())
            .await
            .unwrap();
        db.migrate().await.unwrap();
        (dir, db)
    }

    #[tokio::test]
    async fn test_snowflake_survives_storage() {
        let (_dir, db) = open_temp().await;
        let ledger = db.ledger();
        let id = MessageId(1_150_000_000_000_000_000);
        let user = UserId(830_928_381_100_556_338);

        ledger.insert(StarredMessage::new(id, user)).await.unwrap();

        let entry = ledger.get(id).await.unwrap().unwrap();
        assert_eq!(entry.id, id);
        assert!(entry.has_starred(user));
        assert_eq!(ledger.ids().await.unwrap(), vec![id]);
    }

    #[tokio::test]
    async fn test_insert_conflict() {
        let (_dir, db) = open_temp().await;
        let ledger = db.ledger();
        ledger
            .insert(StarredMessage::new(MessageId(1), UserId(1)))
            .await
            .unwrap();

        let err = ledger
            .insert(StarredMessage::new(MessageId(1), UserId(2)))
            .await
            .unwrap_err();
        assert!(matches!(err, StoreError::Conflict(_)));

        let entry = ledger.get(MessageId(1)).await.unwrap().unwrap();
        assert_eq!(entry.star_count(), 1);
    }

    #[tokio::test]
    async fn test_update_commits_new_stars_and_claim() {
        let (_dir, db) = open_temp().await;
        let ledger = db.ledger();
        ledger
            .insert(StarredMessage::new(MessageId(1), UserId(1)))
            .await
            .unwrap();

        let count: Result<u32, StoreError> = ledger
            .update(MessageId(1), |entry| {
                entry.star_users.insert(UserId(2));
                entry.relay_claimed_at = Some(1234);
                Ok(entry.star_count())
            })
            .await;
        assert_eq!(count.unwrap(), 2);

        let entry = ledger.get(MessageId(1)).await.unwrap().unwrap();
        assert_eq!(entry.star_count(), 2);
        assert_eq!(entry.relay_claimed_at, Some(1234));
    }

    #[tokio::test]
    async fn test_update_rejection_leaves_entry_untouched() {
        let (_dir, db) = open_temp().await;
        let ledger = db.ledger();
        ledger
            .insert(StarredMessage::new(MessageId(1), UserId(1)))
            .await
            .unwrap();

        let result: Result<(), StoreError> = ledger
            .update(MessageId(1), |entry| {
                entry.star_users.insert(UserId(2));
                Err(StoreError::Invalid("rejected".to_string()))
            })
            .await;
        assert!(result.is_err());

        let entry = ledger.get(MessageId(1)).await.unwrap().unwrap();
        assert_eq!(entry.star_count(), 1);
    }

    #[tokio::test]
    async fn test_cancelled_updates_leave_connection_usable() {
        let dir = TempDir::new().unwrap();
        let path = dir.path().join("starboard.db");
        let options = DatabaseOptions {
            max_connections: 1,
            busy_timeout: Duration::from_secs(5),
        };
        let db = Database::open(&path, &options).await.unwrap();
        db.migrate().await.unwrap();
        let ledger = db.ledger();
        ledger
            .insert(StarredMessage::new(MessageId(1), UserId(1)))
            .await
            .unwrap();

        // Deadlines short enough to drop some updates between BEGIN and COMMIT
        for (n, micros) in (1..=951u64).step_by(5).enumerate() {
            let user = UserId(1_000 + n as u64);
            let _ = tokio::time::timeout(
                Duration::from_micros(micros),
                ledger.update(MessageId(1), move |entry| {
                    entry.star_users.insert(user);
                    Ok::<_, StoreError>(())
                }),
            )
            .await;
        }

        ledger.mark_sent(MessageId(1)).await.unwrap();
        let later: Result<(), StoreError> = ledger
            .update(MessageId(1), |entry| {
                entry.star_users.insert(UserId(2));
                Ok(())
            })
            .await;
        later.unwrap();
        db.close().await;

        let reopened = Database::open(&path, &options).await.unwrap();
        let entry = reopened.ledger().get(MessageId(1)).await.unwrap().unwrap();
        assert!(entry.sent);
        assert!(entry.star_users.contains(&UserId(2)));
        reopened.close().await;
    }

    #[tokio::test]
    async fn test_mark_sent_and_delete_cascades() {
        let (_dir, db) = open_temp().await;
        let ledger = db.ledger();
        ledger
            .insert(StarredMessage::new(MessageId(1), UserId(1)))
            .await
            .unwrap();

        ledger.mark_sent(MessageId(1)).await.unwrap();
        let stats = ledger.stats().await.unwrap();
        assert_eq!(stats.tracked, 1);
        assert_eq!(stats.sent, 1);
        assert_eq!(stats.total_stars, 1);

        assert!(ledger.delete(MessageId(1)).await.unwrap());
        assert!(!ledger.delete(MessageId(1)).await.unwrap());
        assert_eq!(ledger.stats().await.unwrap(), LedgerStats::default());
    }

    #[tokio::test]
    async fn test_mark_sent_missing_entry() {
        let (_dir, db) = open_temp().await;
        let err = db.ledger().mark_sent(MessageId(99)).await.unwrap_err();
        assert!(matches!(err, StoreError::NotFound(_)));
    }

    #[tokio::test]
    async fn test_community_settings_roundtrip() {
        let (_dir, db) = open_temp().await;
        let store = db.communities();
        let community = CommunityId(42);

        assert!(matches!(
            store.get(community).await,
            Err(StoreError::NotFound(_))
        ));

        let outcome = store
            .authorize(community, RelayTarget::new("111", "token-a"))
            .await
            .unwrap();
        assert_eq!(outcome, AuthorizeOutcome::Created);

        let mut change = SettingsChange::new(community);
        change.star_threshold = Some(4);
        change.allow_self_star = Some(true);
        let config = store.apply_settings(&change).await.unwrap();
        assert_eq!(config.star_threshold, 4);
        assert!(config.allow_self_star);
        assert!(!config.delete_origin_after_relay);

        let outcome = store
            .authorize(community, RelayTarget::new("222", "token-b"))
            .await
            .unwrap();
        assert_eq!(outcome, AuthorizeOutcome::Updated);

        let config = store.get(community).await.unwrap();
        assert_eq!(config.relay_target, RelayTarget::new("222", "token-b"));
        assert_eq!(config.star_threshold, 4);
        assert_eq!(store.count().await.unwrap(), 1);
    }

    #[tokio::test]
    async fn test_settings_for_unknown_community() {
        let (_dir, db) = open_temp().await;
        let mut change = SettingsChange::new(CommunityId(1));
        change.allow_self_star = Some(true);

        let err = db.communities().apply_settings(&change).await.unwrap_err();
        assert!(matches!(err, StoreError::NotFound(_)));
    }
}
