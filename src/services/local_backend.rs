//! Local backend for Linkshelf.
//!
//! Implements [`DataServiceClient`] and [`MutationGateway`] on top of SQLite
//! via `rusqlite`. Constraint violations are reported with the same wording as
//! the hosted service, and successful mutations are published on an in-process
//! change bus that backs realtime subscriptions.

use std::sync::{Mutex, MutexGuard};
use std::time::{SystemTime, UNIX_EPOCH};

use async_trait::async_trait;
use rusqlite::{params, ErrorCode, OptionalExtension};
use tokio::sync::{broadcast, mpsc};
use tracing::{debug, warn};
use uuid::Uuid;

use crate::database::Database;
use crate::services::data_service::{
    ChangeEvent, ChangeFilter, ChangeKind, DataServiceClient, MutationGateway, Subscription,
};
use crate::types::bookmark::{Bookmark, MAX_TITLE_CHARS};
use crate::types::errors::{DataServiceError, MutationError};
use crate::types::page::{RangedQuery, RangedRows};
use crate::types::session::{SessionContext, UserIdentity};

const CHANGE_BUS_CAPACITY: usize = 256;
const SUBSCRIPTION_CAPACITY: usize = 32;

/// Postgres error codes reported by the hosted service.
const UNIQUE_VIOLATION: &str = "23505";
const CHECK_VIOLATION: &str = "23514";
const FOREIGN_KEY_VIOLATION: &str = "23503";

/// A change together with the owner of the affected row.
#[derive(Debug, Clone)]
struct OwnedChange {
    owner_id: String,
    event: ChangeEvent,
}

/// SQLite-backed data service and mutation gateway.
pub struct LocalBackend {
    db: Mutex<Database>,
    changes: broadcast::Sender<OwnedChange>,
    last_timestamp_micros: Mutex<i64>,
}

impl LocalBackend {
    /// Creates a backend over an already-migrated database.
    pub fn new(db: Database) -> Self {
        let (changes, _) = broadcast::channel(CHANGE_BUS_CAPACITY);
        Self {
            db: Mutex::new(db),
            changes,
            last_timestamp_micros: Mutex::new(0),
        }
    }

    /// Opens an in-memory backend.
    pub fn open_in_memory() -> Result<Self, DataServiceError> {
        Ok(Self::new(Database::open_in_memory()?))
    }

    fn db(&self) -> Result<MutexGuard<'_, Database>, DataServiceError> {
        self.db
            .lock()
            .map_err(|e| DataServiceError::Database(format!("database lock poisoned: {}", e)))
    }

    /// Returns a session for `email`, creating the user on first sign-in.
    pub fn sign_in(&self, email: &str) -> Result<SessionContext, DataServiceError> {
        let email = email.trim();
        if email.is_empty() {
            return Err(DataServiceError::Unauthenticated("email is required".to_string()));
        }
        let db = self.db()?;
        let conn = db.connection();
        let existing: Option<String> = conn
            .query_row("SELECT id FROM users WHERE email = ?1", params![email], |row| row.get(0))
            .optional()?;
        let id = match existing {
            Some(id) => id,
            None => {
                let id = Uuid::new_v4().to_string();
                let now = SystemTime::now()
                    .duration_since(UNIX_EPOCH)
                    .unwrap_or_default()
                    .as_secs() as i64;
                conn.execute(
                    "INSERT INTO users (id, email, created_at) VALUES (?1, ?2, ?3)",
                    params![id, email, now],
                )?;
                debug!(user_id = %id, "created local user");
                id
            }
        };
        Ok(SessionContext::for_user(UserIdentity {
            id,
            email: Some(email.to_string()),
        }))
    }

    /// Next creation timestamp. Strictly increasing across this backend so
    /// recency ordering never ties.
    fn next_timestamp(&self) -> Result<String, DataServiceError> {
        let now = SystemTime::now()
            .duration_since(UNIX_EPOCH)
            .unwrap_or_default()
            .as_micros() as i64;
        let mut last = self
            .last_timestamp_micros
            .lock()
            .map_err(|e| DataServiceError::Database(format!("clock lock poisoned: {}", e)))?;
        let micros = now.max(*last + 1);
        *last = micros;
        Ok(format_rfc3339_micros(micros))
    }

    fn publish(&self, owner_id: &str, kind: ChangeKind, record_id: &str) {
        let change = OwnedChange {
            owner_id: owner_id.to_string(),
            event: ChangeEvent {
                table: "bookmarks".to_string(),
                kind,
                record_id: Some(record_id.to_string()),
            },
        };
        // No receivers just means nobody is subscribed.
        let _ = self.changes.send(change);
    }

    fn row_to_bookmark(row: &rusqlite::Row) -> rusqlite::Result<Bookmark> {
        Ok(Bookmark {
            id: row.get(0)?,
            user_id: row.get(1)?,
            title: row.get(2)?,
            url: row.get(3)?,
            created_at: row.get(4)?,
        })
    }
}

/// Columns a ranged read may order by.
fn order_column(order_by: &str) -> Result<&'static str, DataServiceError> {
    match order_by {
        "created_at" => Ok("created_at"),
        "title" => Ok("title"),
        other => Err(DataServiceError::Status {
            status: 400,
            message: format!("column bookmarks.{} does not exist", other),
        }),
    }
}

/// Whether `url` would pass the hosted `url_format_check` constraint.
pub fn is_well_formed_url(url: &str) -> bool {
    match url::Url::parse(url) {
        Ok(parsed) => {
            matches!(parsed.scheme(), "http" | "https")
                && parsed.host_str().is_some_and(|h| !h.is_empty())
        }
        Err(_) => false,
    }
}

fn check_violation(constraint: &str) -> MutationError {
    MutationError::with_code(
        CHECK_VIOLATION,
        format!(
            "new row for relation \"bookmarks\" violates check constraint \"{}\"",
            constraint
        ),
    )
}

/// Translates SQLite constraint failures into the hosted service's wording.
fn map_insert_error(e: rusqlite::Error) -> MutationError {
    if let rusqlite::Error::SqliteFailure(failure, msg) = &e {
        if failure.code == ErrorCode::ConstraintViolation {
            let detail = msg.clone().unwrap_or_default();
            return match failure.extended_code {
                rusqlite::ffi::SQLITE_CONSTRAINT_UNIQUE | rusqlite::ffi::SQLITE_CONSTRAINT_PRIMARYKEY => {
                    MutationError::with_code(
                        UNIQUE_VIOLATION,
                        "duplicate key value violates unique constraint \"unique_title_per_user\"",
                    )
                }
                rusqlite::ffi::SQLITE_CONSTRAINT_CHECK => {
                    let constraint = detail
                        .rsplit(':')
                        .next()
                        .map(str::trim)
                        .filter(|c| !c.is_empty())
                        .unwrap_or("bookmarks_check");
                    check_violation(constraint)
                }
                rusqlite::ffi::SQLITE_CONSTRAINT_FOREIGNKEY => MutationError::with_code(
                    FOREIGN_KEY_VIOLATION,
                    "insert or update on table \"bookmarks\" violates foreign key constraint \"bookmarks_user_id_fkey\"",
                ),
                _ => MutationError::new(detail),
            };
        }
    }
    MutationError::new(e.to_string())
}

#[async_trait]
impl DataServiceClient for LocalBackend {
    async fn ranged_select(
        &self,
        session: &SessionContext,
        query: &RangedQuery,
    ) -> Result<RangedRows, DataServiceError> {
        if query.table != "bookmarks" {
            return Err(DataServiceError::Status {
                status: 404,
                message: format!("relation \"{}\" does not exist", query.table),
            });
        }
        let column = order_column(&query.order_by)?;
        let direction = query.direction.as_sql();

        let db = self.db()?;
        let conn = db.connection();

        let total: i64 = conn.query_row(
            "SELECT COUNT(*) FROM bookmarks WHERE user_id = ?1",
            params![session.user_id()],
            |row| row.get(0),
        )?;

        let sql = format!(
            "SELECT id, user_id, title, url, created_at FROM bookmarks \
             WHERE user_id = ?1 ORDER BY {} {}, id {} LIMIT ?2 OFFSET ?3",
            column, direction, direction
        );
        let mut stmt = conn.prepare(&sql)?;
        let rows = stmt.query_map(
            params![
                session.user_id(),
                query.range.len() as i64,
                query.range.from as i64
            ],
            Self::row_to_bookmark,
        )?;

        let mut results = Vec::new();
        for row in rows {
            results.push(row?);
        }
        debug!(
            from = query.range.from,
            to = query.range.to,
            returned = results.len(),
            total,
            "local ranged select"
        );
        Ok(RangedRows {
            rows: results,
            exact_total: total.max(0) as usize,
        })
    }

    async fn current_user(
        &self,
        session: &SessionContext,
    ) -> Result<Option<UserIdentity>, DataServiceError> {
        let db = self.db()?;
        let user = db
            .connection()
            .query_row(
                "SELECT id, email FROM users WHERE id = ?1",
                params![session.user_id()],
                |row| {
                    Ok(UserIdentity {
                        id: row.get(0)?,
                        email: row.get(1)?,
                    })
                },
            )
            .optional()?;
        Ok(user)
    }

    async fn subscribe_to_changes(
        &self,
        _session: &SessionContext,
        filter: &ChangeFilter,
    ) -> Result<Subscription, DataServiceError> {
        if filter.table != "bookmarks" {
            return Err(DataServiceError::Subscription(format!(
                "no change feed for table {}",
                filter.table
            )));
        }
        let mut bus = self.changes.subscribe();
        let (tx, rx) = mpsc::channel(SUBSCRIPTION_CAPACITY);
        let owner_id = filter.owner_id.clone();
        let table = filter.table.clone();

        let producer = tokio::spawn(async move {
            loop {
                let event = match bus.recv().await {
                    Ok(change) if change.owner_id == owner_id => change.event,
                    Ok(_) => continue,
                    Err(broadcast::error::RecvError::Lagged(skipped)) => {
                        // Missed events collapse into one refresh signal.
                        warn!(skipped, "change subscription lagged");
                        ChangeEvent {
                            table: table.clone(),
                            kind: ChangeKind::Unknown,
                            record_id: None,
                        }
                    }
                    Err(broadcast::error::RecvError::Closed) => break,
                };
                if tx.send(event).await.is_err() {
                    break;
                }
            }
        });

        Ok(Subscription::from_receiver(rx, Some(producer)))
    }
}

#[async_trait]
impl MutationGateway for LocalBackend {
    async fn insert_bookmark(
        &self,
        session: &SessionContext,
        title: &str,
        url: &str,
    ) -> Result<Bookmark, MutationError> {
        if !is_well_formed_url(url) {
            return Err(check_violation("url_format_check"));
        }
        if title.is_empty() || title.chars().count() > MAX_TITLE_CHARS {
            return Err(check_violation("title_length_check"));
        }

        let bookmark = Bookmark {
            id: Uuid::new_v4().to_string(),
            user_id: session.user_id().to_string(),
            title: title.to_string(),
            url: url.to_string(),
            created_at: self.next_timestamp()?,
        };

        {
            let db = self.db()?;
            db.connection()
                .execute(
                    "INSERT INTO bookmarks (id, user_id, title, url, created_at) VALUES (?1, ?2, ?3, ?4, ?5)",
                    params![
                        bookmark.id,
                        bookmark.user_id,
                        bookmark.title,
                        bookmark.url,
                        bookmark.created_at
                    ],
                )
                .map_err(map_insert_error)?;
        }

        self.publish(&bookmark.user_id, ChangeKind::Insert, &bookmark.id);
        Ok(bookmark)
    }

    async fn delete_bookmark(&self, session: &SessionContext, id: &str) -> Result<(), MutationError> {
        let affected = {
            let db = self.db()?;
            db.connection()
                .execute(
                    "DELETE FROM bookmarks WHERE id = ?1 AND user_id = ?2",
                    params![id, session.user_id()],
                )
                .map_err(|e| MutationError::new(e.to_string()))?
        };

        // Deleting a row that is already gone is not an error, same as the hosted service.
        if affected > 0 {
            self.publish(session.user_id(), ChangeKind::Delete, id);
        }
        Ok(())
    }
}

/// Formats microseconds since the UNIX epoch as `YYYY-MM-DDTHH:MM:SS.ffffff+00:00`.
///
/// Fixed width, so lexical order equals chronological order.
fn format_rfc3339_micros(micros: i64) -> String {
    let secs = micros.div_euclid(1_000_000);
    let frac = micros.rem_euclid(1_000_000);
    let days = secs.div_euclid(86_400);
    let secs_of_day = secs.rem_euclid(86_400);

    // Civil-from-days, proleptic Gregorian calendar.
    let z = days + 719_468;
    let era = z.div_euclid(146_097);
    let doe = z.rem_euclid(146_097);
    let yoe = (doe - doe / 1460 + doe / 36_524 - doe / 146_096) / 365;
    let doy = doe - (365 * yoe + yoe / 4 - yoe / 100);
    let mp = (5 * doy + 2) / 153;
    let day = doy - (153 * mp + 2) / 5 + 1;
    let month = if mp < 10 { mp + 3 } else { mp - 9 };
    let year = yoe + era * 400 + if month <= 2 { 1 } else { 0 };

    format!(
        "{:04}-{:02}-{:02}T{:02}:{:02}:{:02}.{:06}+00:00",
        year,
        month,
        day,
        secs_of_day / 3600,
        (secs_of_day % 3600) / 60,
        secs_of_day % 60,
        frac
    )
}
