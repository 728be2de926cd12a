use async_trait::async_trait;
use chrono::{DateTime, Utc};
use sqlx::postgres::{PgPoolOptions, PgRow};
use sqlx::{PgPool, Postgres, Row, Transaction};
use std::time::Duration;

use crate::models::{
    Event, EventStats, EventStatus, Match, MatchInsert, Message, MessageView, NewParticipant,
    NormalizedPair, Participant, ParticipantStats, Signal,
};
use crate::services::store::{Store, StoreError, StoreTx};

const EVENT_COLUMNS: &str = "id, code, status, message_write_open, message_opened_at, created_at";
const PARTICIPANT_COLUMNS: &str =
    "id, event_id, nickname, gender, pin_hash, received_count, created_at";

/// PostgreSQL-backed store
///
/// Relies on the uniqueness constraints from `migrations/` for every
/// insert-if-absent operation; application checks only decide which rejection
/// to report.
pub struct PostgresStore {
    pool: PgPool,
}

impl PostgresStore {
    /// Create a new store from a connection string and run migrations
    pub async fn new(
        database_url: &str,
        max_connections: u32,
        min_connections: u32,
        acquire_timeout: Duration,
        idle_timeout: Duration,
    ) -> Result<Self, StoreError> {
        let pool = PgPoolOptions::new()
            .max_connections(max_connections)
            .min_connections(min_connections)
            .acquire_timeout(acquire_timeout)
            .idle_timeout(idle_timeout)
            .test_before_acquire(true)
            .connect(database_url)
            .await?;

        // Run migrations on startup
        sqlx::migrate!("./migrations").run(&pool).await?;

        Ok(Self { pool })
    }

    /// Wrap an existing pool whose schema is already migrated
    pub fn from_pool(pool: PgPool) -> Self {
        Self { pool }
    }

    /// Create a new store from settings
    pub async fn from_settings(
        url: &str,
        max_connections: Option<u32>,
        min_connections: Option<u32>,
        acquire_timeout_secs: Option<u64>,
        idle_timeout_secs: Option<u64>,
    ) -> Result<Self, StoreError> {
        tracing::info!("Connecting to PostgreSQL");

        Self::new(
            url,
            max_connections.unwrap_or(10),
            min_connections.unwrap_or(1),
            Duration::from_secs(acquire_timeout_secs.unwrap_or(5)),
            Duration::from_secs(idle_timeout_secs.unwrap_or(600)),
        )
        .await
    }
}

fn event_from_row(row: &PgRow) -> Event {
    Event {
        id: row.get("id"),
        code: row.get("code"),
        status: row.get("status"),
        message_write_open: row.get("message_write_open"),
        message_opened_at: row.get("message_opened_at"),
        created_at: row.get("created_at"),
    }
}

fn participant_from_row(row: &PgRow) -> Participant {
    Participant {
        id: row.get("id"),
        event_id: row.get("event_id"),
        nickname: row.get("nickname"),
        gender: row.get("gender"),
        pin_hash: row.get("pin_hash"),
        received_count: row.get("received_count"),
        created_at: row.get("created_at"),
    }
}

fn message_from_row(row: &PgRow) -> Message {
    Message {
        id: row.get("id"),
        event_id: row.get("event_id"),
        sender_id: row.get("sender_id"),
        receiver_id: row.get("receiver_id"),
        text: row.get("text"),
        created_at: row.get("created_at"),
    }
}

#[async_trait]
impl Store for PostgresStore {
    async fn begin(&self) -> Result<Box<dyn StoreTx>, StoreError> {
        let tx = self.pool.begin().await?;
        Ok(Box::new(PgStoreTx { tx }))
    }

    async fn create_event(&self, code: &str) -> Result<Option<Event>, StoreError> {
        let query = format!(
            "INSERT INTO events (code) VALUES ($1) ON CONFLICT (code) DO NOTHING RETURNING {EVENT_COLUMNS}"
        );
        let row = sqlx::query(&query).bind(code).fetch_optional(&self.pool).await?;
        Ok(row.as_ref().map(event_from_row))
    }

    async fn find_event(&self, code: &str) -> Result<Option<Event>, StoreError> {
        let query = format!("SELECT {EVENT_COLUMNS} FROM events WHERE code = $1");
        let row = sqlx::query(&query).bind(code).fetch_optional(&self.pool).await?;
        Ok(row.as_ref().map(event_from_row))
    }

    async fn find_event_by_id(&self, event_id: i64) -> Result<Option<Event>, StoreError> {
        let query = format!("SELECT {EVENT_COLUMNS} FROM events WHERE id = $1");
        let row = sqlx::query(&query).bind(event_id).fetch_optional(&self.pool).await?;
        Ok(row.as_ref().map(event_from_row))
    }

    async fn set_event_status(
        &self,
        event_id: i64,
        status: EventStatus,
    ) -> Result<Option<Event>, StoreError> {
        let query = format!("UPDATE events SET status = $2 WHERE id = $1 RETURNING {EVENT_COLUMNS}");
        let row = sqlx::query(&query)
            .bind(event_id)
            .bind(status)
            .fetch_optional(&self.pool)
            .await?;
        Ok(row.as_ref().map(event_from_row))
    }

    async fn set_message_phase(
        &self,
        event_id: i64,
        write_open: bool,
        opened_at: Option<DateTime<Utc>>,
    ) -> Result<Option<Event>, StoreError> {
        // Closing keeps the previous opened_at for the record.
        let query = format!(
            r#"
            UPDATE events
            SET message_write_open = $2,
                message_opened_at = COALESCE($3, message_opened_at)
            WHERE id = $1
            RETURNING {EVENT_COLUMNS}
            "#
        );
        let row = sqlx::query(&query)
            .bind(event_id)
            .bind(write_open)
            .bind(opened_at)
            .fetch_optional(&self.pool)
            .await?;
        Ok(row.as_ref().map(event_from_row))
    }

    async fn find_participant(
        &self,
        event_id: i64,
        participant_id: i64,
    ) -> Result<Option<Participant>, StoreError> {
        let query =
            format!("SELECT {PARTICIPANT_COLUMNS} FROM participants WHERE event_id = $1 AND id = $2");
        let row = sqlx::query(&query)
            .bind(event_id)
            .bind(participant_id)
            .fetch_optional(&self.pool)
            .await?;
        Ok(row.as_ref().map(participant_from_row))
    }

    async fn find_participant_by_nickname(
        &self,
        event_id: i64,
        nickname: &str,
    ) -> Result<Option<Participant>, StoreError> {
        let query = format!(
            "SELECT {PARTICIPANT_COLUMNS} FROM participants WHERE event_id = $1 AND nickname = $2"
        );
        let row = sqlx::query(&query)
            .bind(event_id)
            .bind(nickname)
            .fetch_optional(&self.pool)
            .await?;
        Ok(row.as_ref().map(participant_from_row))
    }

    async fn insert_participant_if_absent(
        &self,
        participant: NewParticipant,
    ) -> Result<Option<Participant>, StoreError> {
        let query = format!(
            r#"
            INSERT INTO participants (event_id, nickname, gender, pin_hash)
            VALUES ($1, $2, $3, $4)
            ON CONFLICT (event_id, nickname) DO NOTHING
            RETURNING {PARTICIPANT_COLUMNS}
            "#
        );
        let row = sqlx::query(&query)
            .bind(participant.event_id)
            .bind(&participant.nickname)
            .bind(participant.gender)
            .bind(&participant.pin_hash)
            .fetch_optional(&self.pool)
            .await?;
        Ok(row.as_ref().map(participant_from_row))
    }

    async fn list_participants(&self, event_id: i64) -> Result<Vec<ParticipantStats>, StoreError> {
        let query = r#"
            SELECT p.id, p.event_id, p.nickname, p.gender, p.pin_hash, p.received_count, p.created_at,
                   COUNT(s.id) AS sent_count
            FROM participants p
            LEFT JOIN signals s ON s.event_id = p.event_id AND s.sender_id = p.id
            WHERE p.event_id = $1
            GROUP BY p.id
            ORDER BY p.nickname
        "#;

        let rows = sqlx::query(query).bind(event_id).fetch_all(&self.pool).await?;

        Ok(rows
            .iter()
            .map(|row| ParticipantStats {
                participant: participant_from_row(row),
                sent_count: row.get("sent_count"),
            })
            .collect())
    }

    async fn count_sent_signals(&self, event_id: i64, sender_id: i64) -> Result<i64, StoreError> {
        let row = sqlx::query("SELECT COUNT(*) AS n FROM signals WHERE event_id = $1 AND sender_id = $2")
            .bind(event_id)
            .bind(sender_id)
            .fetch_one(&self.pool)
            .await?;
        Ok(row.get("n"))
    }

    async fn signal_targets(&self, event_id: i64, sender_id: i64) -> Result<Vec<i64>, StoreError> {
        let rows = sqlx::query("SELECT receiver_id FROM signals WHERE event_id = $1 AND sender_id = $2")
            .bind(event_id)
            .bind(sender_id)
            .fetch_all(&self.pool)
            .await?;
        Ok(rows.iter().map(|row| row.get("receiver_id")).collect())
    }

    async fn matches_for(&self, event_id: i64, participant_id: i64) -> Result<Vec<Match>, StoreError> {
        let query = r#"
            SELECT id, event_id, p1_id, p2_id, created_at
            FROM matches
            WHERE event_id = $1 AND (p1_id = $2 OR p2_id = $2)
            ORDER BY created_at DESC, id DESC
        "#;

        let rows = sqlx::query(query)
            .bind(event_id)
            .bind(participant_id)
            .fetch_all(&self.pool)
            .await?;

        Ok(rows
            .iter()
            .map(|row| Match {
                id: row.get("id"),
                event_id: row.get("event_id"),
                p1_id: row.get("p1_id"),
                p2_id: row.get("p2_id"),
                created_at: row.get("created_at"),
            })
            .collect())
    }

    async fn event_stats(&self, event_id: i64) -> Result<EventStats, StoreError> {
        let query = r#"
            SELECT
                (SELECT COUNT(*) FROM participants WHERE event_id = $1) AS participants,
                (SELECT COUNT(*) FROM signals WHERE event_id = $1) AS signals,
                (SELECT COUNT(*) FROM matches WHERE event_id = $1) AS matches
        "#;

        let row = sqlx::query(query).bind(event_id).fetch_one(&self.pool).await?;

        Ok(EventStats {
            participants: row.get("participants"),
            signals: row.get("signals"),
            matches: row.get("matches"),
        })
    }

    async fn insert_message_if_absent(
        &self,
        event_id: i64,
        sender_id: i64,
        receiver_id: i64,
        text: &str,
    ) -> Result<Option<Message>, StoreError> {
        let query = r#"
            INSERT INTO messages (event_id, sender_id, receiver_id, text)
            VALUES ($1, $2, $3, $4)
            ON CONFLICT (event_id, sender_id) DO NOTHING
            RETURNING id, event_id, sender_id, receiver_id, text, created_at
        "#;

        let row = sqlx::query(query)
            .bind(event_id)
            .bind(sender_id)
            .bind(receiver_id)
            .bind(text)
            .fetch_optional(&self.pool)
            .await?;

        Ok(row.as_ref().map(message_from_row))
    }

    async fn message_sent_by(&self, event_id: i64, sender_id: i64) -> Result<bool, StoreError> {
        let row = sqlx::query(
            "SELECT EXISTS(SELECT 1 FROM messages WHERE event_id = $1 AND sender_id = $2) AS present",
        )
        .bind(event_id)
        .bind(sender_id)
        .fetch_one(&self.pool)
        .await?;
        Ok(row.get("present"))
    }

    async fn count_messages_to(&self, event_id: i64, receiver_id: i64) -> Result<i64, StoreError> {
        let row = sqlx::query("SELECT COUNT(*) AS n FROM messages WHERE event_id = $1 AND receiver_id = $2")
            .bind(event_id)
            .bind(receiver_id)
            .fetch_one(&self.pool)
            .await?;
        Ok(row.get("n"))
    }

    async fn list_messages(&self, event_id: i64) -> Result<Vec<MessageView>, StoreError> {
        let query = r#"
            SELECT m.id, s.nickname AS sender_nickname, r.nickname AS receiver_nickname,
                   m.text, m.created_at
            FROM messages m
            JOIN participants s ON s.id = m.sender_id
            JOIN participants r ON r.id = m.receiver_id
            WHERE m.event_id = $1
            ORDER BY m.created_at, m.id
        "#;

        let rows = sqlx::query(query).bind(event_id).fetch_all(&self.pool).await?;

        Ok(rows
            .iter()
            .map(|row| MessageView {
                id: row.get("id"),
                sender_nickname: row.get("sender_nickname"),
                receiver_nickname: row.get("receiver_nickname"),
                text: row.get("text"),
                created_at: row.get("created_at"),
            })
            .collect())
    }

    /// Health check for the database connection
    async fn health_check(&self) -> Result<bool, StoreError> {
        sqlx::query("SELECT 1")
            .fetch_one(&self.pool)
            .await
            .map(|_| true)
            .map_err(Into::into)
    }
}

/// One READ COMMITTED transaction. Row locks taken by
/// [`StoreTx::lock_participants`] make each later statement see whatever a
/// competing transaction on the same participants committed.
pub struct PgStoreTx {
    tx: Transaction<'static, Postgres>,
}

#[async_trait]
impl StoreTx for PgStoreTx {
    async fn lock_participants(&mut self, event_id: i64, ids: &[i64]) -> Result<(), StoreError> {
        let mut ordered = ids.to_vec();
        ordered.sort_unstable();
        ordered.dedup();

        // One statement per row: a single `ORDER BY ... FOR UPDATE` does not
        // guarantee lock acquisition order.
        for id in ordered {
            let locked = sqlx::query("SELECT id FROM participants WHERE event_id = $1 AND id = $2 FOR UPDATE")
                .bind(event_id)
                .bind(id)
                .fetch_optional(&mut *self.tx)
                .await?;
            if locked.is_none() {
                return Err(StoreError::Missing(format!("participant {id} in event {event_id}")));
            }
        }
        Ok(())
    }

    async fn lock_event(&mut self, event_id: i64) -> Result<(), StoreError> {
        // NO KEY UPDATE leaves the KEY SHARE locks taken by foreign key checks
        // on inserted signals and matches unblocked.
        let locked = sqlx::query("SELECT id FROM events WHERE id = $1 FOR NO KEY UPDATE")
            .bind(event_id)
            .fetch_optional(&mut *self.tx)
            .await?;
        if locked.is_none() {
            return Err(StoreError::Missing(format!("event {event_id}")));
        }
        Ok(())
    }

    async fn count_signals(&mut self, event_id: i64, sender_id: i64) -> Result<i64, StoreError> {
        let row = sqlx::query("SELECT COUNT(*) AS n FROM signals WHERE event_id = $1 AND sender_id = $2")
            .bind(event_id)
            .bind(sender_id)
            .fetch_one(&mut *self.tx)
            .await?;
        Ok(row.get("n"))
    }

    async fn signal_exists(
        &mut self,
        event_id: i64,
        sender_id: i64,
        receiver_id: i64,
    ) -> Result<bool, StoreError> {
        let row = sqlx::query(
            r#"
            SELECT EXISTS(
                SELECT 1 FROM signals
                WHERE event_id = $1 AND sender_id = $2 AND receiver_id = $3
            ) AS present
            "#,
        )
        .bind(event_id)
        .bind(sender_id)
        .bind(receiver_id)
        .fetch_one(&mut *self.tx)
        .await?;
        Ok(row.get("present"))
    }

    async fn create_signal(
        &mut self,
        event_id: i64,
        sender_id: i64,
        receiver_id: i64,
    ) -> Result<Signal, StoreError> {
        let row = sqlx::query(
            r#"
            INSERT INTO signals (event_id, sender_id, receiver_id)
            VALUES ($1, $2, $3)
            RETURNING id, event_id, sender_id, receiver_id, created_at
            "#,
        )
        .bind(event_id)
        .bind(sender_id)
        .bind(receiver_id)
        .fetch_one(&mut *self.tx)
        .await?;

        Ok(Signal {
            id: row.get("id"),
            event_id: row.get("event_id"),
            sender_id: row.get("sender_id"),
            receiver_id: row.get("receiver_id"),
            created_at: row.get("created_at"),
        })
    }

    async fn increment_received_count(&mut self, participant_id: i64) -> Result<i32, StoreError> {
        let row = sqlx::query(
            "UPDATE participants SET received_count = received_count + 1 WHERE id = $1 RETURNING received_count",
        )
        .bind(participant_id)
        .fetch_optional(&mut *self.tx)
        .await?
        .ok_or_else(|| StoreError::Missing(format!("participant {participant_id}")))?;
        Ok(row.get("received_count"))
    }

    async fn create_match_if_absent(
        &mut self,
        event_id: i64,
        pair: NormalizedPair,
    ) -> Result<MatchInsert, StoreError> {
        let row = sqlx::query(
            r#"
            INSERT INTO matches (event_id, p1_id, p2_id)
            VALUES ($1, $2, $3)
            ON CONFLICT (event_id, p1_id, p2_id) DO NOTHING
            RETURNING id
            "#,
        )
        .bind(event_id)
        .bind(pair.low)
        .bind(pair.high)
        .fetch_optional(&mut *self.tx)
        .await?;

        Ok(match row {
            Some(row) => MatchInsert::Created(row.get("id")),
            None => MatchInsert::AlreadyExisted,
        })
    }

    async fn count_matches(&mut self, event_id: i64) -> Result<i64, StoreError> {
        let row = sqlx::query("SELECT COUNT(*) AS n FROM matches WHERE event_id = $1")
            .bind(event_id)
            .fetch_one(&mut *self.tx)
            .await?;
        Ok(row.get("n"))
    }

    async fn commit(self: Box<Self>) -> Result<(), StoreError> {
        self.tx.commit().await?;
        Ok(())
    }
}
