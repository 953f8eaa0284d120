//! `PostgreSQL` ticket store for the helpdesk pipeline.
//!
//! [`PostgresTicketStore`] implements [`TicketStore`] and [`UserDirectory`]
//! from `helpdesk-core` on three tables (`users`, `tickets`, `interactions`,
//! see `migrations/`). It uses sqlx with runtime-bound queries and supports:
//!
//! - Compare-and-set state transitions with their audit row in one transaction
//! - A pre-commit step awaited inside that transaction (the enqueue)
//! - Connection pooling
//! - Embedded migrations
//!
//! # Example
//!
//! ```ignore
//! use helpdesk_postgres::PostgresTicketStore;
//!
//! async fn example() -> Result<(), Box<dyn std::error::Error>> {
//!     let store = PostgresTicketStore::new("postgres://localhost/helpdesk").await?;
//!     store.migrate().await?;
//!     Ok(())
//! }
//! ```

#![forbid(unsafe_code)]
#![warn(missing_docs)]

use chrono::{DateTime, Utc};
use sqlx::postgres::{PgPool, PgPoolOptions, PgRow};
use sqlx::Row;

use helpdesk_core::directory::UserDirectory;
use helpdesk_core::state::Transition;
use helpdesk_core::store::{PreCommit, StoreFuture, TicketFilter, TicketStore, TransitionOutcome};
use helpdesk_core::{
    AuditEntry, Interaction, InteractionId, Priority, Role, StoreError, Ticket, TicketDraft,
    TicketId, TicketState, User, UserId,
};

const TICKET_COLUMNS: &str =
    "id, owner_id, subject, description, priority, state, created_at, updated_at";

/// `PostgreSQL`-backed ticket store and user directory.
#[derive(Clone, Debug)]
pub struct PostgresTicketStore {
    pool: PgPool,
}

impl PostgresTicketStore {
    /// Connect with a pool of up to 10 connections.
    ///
    /// # Errors
    ///
    /// Returns [`StoreError::DatabaseError`] if the connection fails.
    pub async fn new(database_url: &str) -> Result<Self, StoreError> {
        let pool = PgPoolOptions::new()
            .max_connections(10)
            .connect(database_url)
            .await
            .map_err(|e| StoreError::DatabaseError(format!("Failed to connect: {e}")))?;
        Ok(Self::from_pool(pool))
    }

    /// Wrap an existing pool.
    #[must_use]
    pub const fn from_pool(pool: PgPool) -> Self {
        Self { pool }
    }

    /// Get the underlying connection pool.
    #[must_use]
    pub const fn pool(&self) -> &PgPool {
        &self.pool
    }

    /// Create the tables and indexes if they don't exist.
    ///
    /// # Errors
    ///
    /// Returns [`StoreError::DatabaseError`] if a migration fails.
    pub async fn migrate(&self) -> Result<(), StoreError> {
        sqlx::migrate!("./migrations")
            .run(&self.pool)
            .await
            .map_err(|e| StoreError::DatabaseError(format!("Migration failed: {e}")))?;
        Ok(())
    }

    fn row_to_ticket(row: &PgRow) -> Result<Ticket, StoreError> {
        let priority: String = row.try_get("priority").map_err(corrupt)?;
        let state: String = row.try_get("state").map_err(corrupt)?;

        Ok(Ticket {
            id: TicketId::new(row.try_get("id").map_err(corrupt)?),
            owner_id: UserId::new(row.try_get("owner_id").map_err(corrupt)?),
            subject: row.try_get("subject").map_err(corrupt)?,
            description: row.try_get("description").map_err(corrupt)?,
            priority: Priority::parse(&priority).map_err(corrupt)?,
            state: TicketState::parse(&state).map_err(corrupt)?,
            created_at: row.try_get("created_at").map_err(corrupt)?,
            updated_at: row.try_get("updated_at").map_err(corrupt)?,
        })
    }

    fn row_to_interaction(row: &PgRow) -> Result<Interaction, StoreError> {
        let author: String = row.try_get("author").map_err(corrupt)?;

        Ok(Interaction {
            id: InteractionId::new(row.try_get("id").map_err(corrupt)?),
            ticket_id: TicketId::new(row.try_get("ticket_id").map_err(corrupt)?),
            author: Role::parse(&author).map_err(corrupt)?,
            message: row.try_get("message").map_err(corrupt)?,
            created_at: row.try_get("created_at").map_err(corrupt)?,
        })
    }

    fn row_to_user(row: &PgRow) -> Result<User, StoreError> {
        let role: String = row.try_get("role").map_err(corrupt)?;

        Ok(User {
            id: UserId::new(row.try_get("id").map_err(corrupt)?),
            name: row.try_get("name").map_err(corrupt)?,
            email: row.try_get("email").map_err(corrupt)?,
            role: Role::parse(&role).map_err(corrupt)?,
            created_at: row.try_get("created_at").map_err(corrupt)?,
        })
    }

    async fn insert_interaction(
        conn: &mut sqlx::PgConnection,
        ticket_id: TicketId,
        entry: &AuditEntry,
    ) -> Result<Interaction, StoreError> {
        let row = sqlx::query(
            r"
            INSERT INTO interactions (ticket_id, author, message)
            VALUES ($1, $2, $3)
            RETURNING id, ticket_id, author, message, created_at
            ",
        )
        .bind(ticket_id.get())
        .bind(entry.author.as_str())
        .bind(&entry.message)
        .fetch_one(conn)
        .await
        .map_err(database)?;

        Self::row_to_interaction(&row)
    }

    async fn apply_transition(
        &self,
        id: TicketId,
        transition: Transition,
        entry: AuditEntry,
        pre_commit: Option<PreCommit<'_>>,
    ) -> Result<TransitionOutcome, StoreError> {
        let mut tx = self.pool.begin().await.map_err(database)?;

        let updated = sqlx::query(&format!(
            r"
            UPDATE tickets
            SET state = $1, updated_at = now()
            WHERE id = $2 AND state = $3
            RETURNING {TICKET_COLUMNS}
            "
        ))
        .bind(transition.to().as_str())
        .bind(id.get())
        .bind(transition.from().as_str())
        .fetch_optional(&mut *tx)
        .await
        .map_err(database)?;

        let Some(row) = updated else {
            let current: Option<String> =
                sqlx::query_scalar("SELECT state FROM tickets WHERE id = $1")
                    .bind(id.get())
                    .fetch_optional(&mut *tx)
                    .await
                    .map_err(database)?;
            tx.rollback().await.map_err(database)?;

            return match current {
                None => Err(StoreError::TicketNotFound(id)),
                Some(state) => Ok(TransitionOutcome::Skipped {
                    current: TicketState::parse(&state).map_err(corrupt)?,
                }),
            };
        };

        let ticket = Self::row_to_ticket(&row)?;
        let interaction = Self::insert_interaction(&mut tx, id, &entry).await?;

        if let Some(step) = pre_commit {
            if let Err(e) = step.await {
                if let Err(rollback) = tx.rollback().await {
                    tracing::warn!(ticket_id = %id, error = %rollback, "Rollback after failed pre-commit step failed");
                }
                return Err(StoreError::PreCommit(e));
            }
        }

        tx.commit().await.map_err(database)?;

        metrics::counter!("store_transitions_total", "to" => transition.to().as_str()).increment(1);
        tracing::debug!(ticket_id = %id, from = %transition.from(), to = %transition.to(), "Transition committed");

        Ok(TransitionOutcome::Applied {
            ticket,
            interaction,
        })
    }
}

fn database(e: sqlx::Error) -> StoreError {
    StoreError::DatabaseError(e.to_string())
}

fn corrupt(e: impl std::fmt::Display) -> StoreError {
    StoreError::CorruptRow(e.to_string())
}

impl TicketStore for PostgresTicketStore {
    fn create_ticket(&self, draft: TicketDraft, entry: AuditEntry) -> StoreFuture<'_, Ticket> {
        Box::pin(async move {
            let mut tx = self.pool.begin().await.map_err(database)?;

            let row = sqlx::query(&format!(
                r"
                INSERT INTO tickets (owner_id, subject, description, priority)
                VALUES ($1, $2, $3, $4)
                RETURNING {TICKET_COLUMNS}
                "
            ))
            .bind(draft.owner_id.get())
            .bind(&draft.subject)
            .bind(&draft.description)
            .bind(draft.priority.as_str())
            .fetch_one(&mut *tx)
            .await
            .map_err(|e| {
                if let sqlx::Error::Database(db_err) = &e {
                    if db_err.is_foreign_key_violation() {
                        return StoreError::UserNotFound(draft.owner_id);
                    }
                }
                database(e)
            })?;

            let ticket = Self::row_to_ticket(&row)?;
            Self::insert_interaction(&mut tx, ticket.id, &entry).await?;
            tx.commit().await.map_err(database)?;

            Ok(ticket)
        })
    }

    fn find_ticket(&self, id: TicketId) -> StoreFuture<'_, Option<Ticket>> {
        Box::pin(async move {
            let row = sqlx::query(&format!("SELECT {TICKET_COLUMNS} FROM tickets WHERE id = $1"))
                .bind(id.get())
                .fetch_optional(&self.pool)
                .await
                .map_err(database)?;

            row.as_ref().map(Self::row_to_ticket).transpose()
        })
    }

    fn find_ticket_settled(&self, id: TicketId) -> StoreFuture<'_, Option<Ticket>> {
        Box::pin(async move {
            // FOR SHARE blocks on the row lock held by an open transition,
            // then reads the committed version. The lock ends with the statement.
            let row = sqlx::query(&format!(
                "SELECT {TICKET_COLUMNS} FROM tickets WHERE id = $1 FOR SHARE"
            ))
            .bind(id.get())
            .fetch_optional(&self.pool)
            .await
            .map_err(database)?;

            row.as_ref().map(Self::row_to_ticket).transpose()
        })
    }

    fn transition<'a>(
        &'a self,
        id: TicketId,
        transition: Transition,
        entry: AuditEntry,
        pre_commit: Option<PreCommit<'a>>,
    ) -> StoreFuture<'a, TransitionOutcome> {
        Box::pin(self.apply_transition(id, transition, entry, pre_commit))
    }

    fn list_history(&self, id: TicketId) -> StoreFuture<'_, Vec<Interaction>> {
        Box::pin(async move {
            let rows = sqlx::query(
                r"
                SELECT id, ticket_id, author, message, created_at
                FROM interactions
                WHERE ticket_id = $1
                ORDER BY created_at ASC, id ASC
                ",
            )
            .bind(id.get())
            .fetch_all(&self.pool)
            .await
            .map_err(database)?;

            rows.iter().map(Self::row_to_interaction).collect()
        })
    }

    fn list_tickets(&self, filter: TicketFilter) -> StoreFuture<'_, Vec<Ticket>> {
        Box::pin(async move {
            let owner = match filter {
                TicketFilter::All => None,
                TicketFilter::OwnedBy(owner) => Some(owner.get()),
            };

            let rows = sqlx::query(&format!(
                r"
                SELECT {TICKET_COLUMNS}
                FROM tickets
                WHERE $1::BIGINT IS NULL OR owner_id = $1
                ORDER BY created_at DESC, id DESC
                "
            ))
            .bind(owner)
            .fetch_all(&self.pool)
            .await
            .map_err(database)?;

            rows.iter().map(Self::row_to_ticket).collect()
        })
    }

    fn find_stalled(&self, older_than: DateTime<Utc>) -> StoreFuture<'_, Vec<Ticket>> {
        Box::pin(async move {
            let rows = sqlx::query(&format!(
                r"
                SELECT {TICKET_COLUMNS}
                FROM tickets
                WHERE state = $1 AND updated_at < $2
                ORDER BY updated_at ASC, id ASC
                "
            ))
            .bind(TicketState::InProgress.as_str())
            .bind(older_than)
            .fetch_all(&self.pool)
            .await
            .map_err(database)?;

            rows.iter().map(Self::row_to_ticket).collect()
        })
    }
}

impl UserDirectory for PostgresTicketStore {
    fn find_user(&self, id: UserId) -> StoreFuture<'_, Option<User>> {
        Box::pin(async move {
            let row = sqlx::query("SELECT id, name, email, role, created_at FROM users WHERE id = $1")
                .bind(id.get())
                .fetch_optional(&self.pool)
                .await
                .map_err(database)?;

            row.as_ref().map(Self::row_to_user).transpose()
        })
    }

    fn list_users(&self) -> StoreFuture<'_, Vec<User>> {
        Box::pin(async move {
            let rows = sqlx::query("SELECT id, name, email, role, created_at FROM users ORDER BY id")
                .fetch_all(&self.pool)
                .await
                .map_err(database)?;

            rows.iter().map(Self::row_to_user).collect()
        })
    }
}
