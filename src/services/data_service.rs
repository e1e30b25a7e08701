//! Collaborator contracts consumed by the bookmark list.
//!
//! [`DataServiceClient`] covers reads, identity and change notifications;
//! [`MutationGateway`] covers inserts and deletes. Both take an explicit
//! [`SessionContext`] instead of reading ambient session state.

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use tokio::sync::mpsc;
use tokio::task::JoinHandle;

use crate::types::bookmark::Bookmark;
use crate::types::errors::{DataServiceError, MutationError};
use crate::types::page::{RangedQuery, RangedRows};
use crate::types::session::{SessionContext, UserIdentity};

/// What happened to a row, when the backend knows.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ChangeKind {
    Insert,
    Update,
    Delete,
    /// The backend only knows that something changed.
    Unknown,
}

/// An opaque "something changed" signal for a subscribed table.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ChangeEvent {
    pub table: String,
    pub kind: ChangeKind,
    pub record_id: Option<String>,
}

/// Scope of a change subscription: one table, one owner.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ChangeFilter {
    pub table: String,
    pub owner_id: String,
}

impl ChangeFilter {
    pub fn bookmarks_of(owner_id: &str) -> Self {
        Self {
            table: "bookmarks".to_string(),
            owner_id: owner_id.to_string(),
        }
    }
}

/// A cancellable stream of [`ChangeEvent`]s.
///
/// Once closed (explicitly or because the producer went away) it never yields
/// again. Dropping the subscription closes it.
pub struct Subscription {
    rx: mpsc::Receiver<ChangeEvent>,
    producer: Option<JoinHandle<()>>,
    closed: bool,
}

impl Subscription {
    /// Creates a subscription fed through the returned sender.
    pub fn channel(capacity: usize) -> (mpsc::Sender<ChangeEvent>, Self) {
        let (tx, rx) = mpsc::channel(capacity.max(1));
        (tx, Self::from_receiver(rx, None))
    }

    /// Wraps a receiver whose events are produced by `producer`.
    ///
    /// The producer task is aborted when the subscription closes.
    pub fn from_receiver(rx: mpsc::Receiver<ChangeEvent>, producer: Option<JoinHandle<()>>) -> Self {
        Self {
            rx,
            producer,
            closed: false,
        }
    }

    /// Waits for the next change. Returns `None` once the subscription is closed.
    pub async fn next(&mut self) -> Option<ChangeEvent> {
        if self.closed {
            return None;
        }
        match self.rx.recv().await {
            Some(event) => Some(event),
            None => {
                self.close();
                None
            }
        }
    }

    /// Stops delivery and releases the producer.
    pub fn close(&mut self) {
        if self.closed {
            return;
        }
        self.closed = true;
        self.rx.close();
        if let Some(producer) = self.producer.take() {
            producer.abort();
        }
    }

    pub fn is_closed(&self) -> bool {
        self.closed
    }
}

impl Drop for Subscription {
    fn drop(&mut self) {
        self.close();
    }
}

/// Reads, identity lookups and change notifications.
#[async_trait]
pub trait DataServiceClient: Send + Sync {
    /// Ordered slice of rows in `query.range` plus the exact total row count.
    async fn ranged_select(
        &self,
        session: &SessionContext,
        query: &RangedQuery,
    ) -> Result<RangedRows, DataServiceError>;

    /// The user the session belongs to, or `None` when it is not valid.
    async fn current_user(
        &self,
        session: &SessionContext,
    ) -> Result<Option<UserIdentity>, DataServiceError>;

    /// Opens a change subscription for rows matching `filter`.
    async fn subscribe_to_changes(
        &self,
        session: &SessionContext,
        filter: &ChangeFilter,
    ) -> Result<Subscription, DataServiceError>;
}

/// Server-side create and delete entry points.
#[async_trait]
pub trait MutationGateway: Send + Sync {
    /// Creates a bookmark owned by the session user.
    async fn insert_bookmark(
        &self,
        session: &SessionContext,
        title: &str,
        url: &str,
    ) -> Result<Bookmark, MutationError>;

    /// Deletes the bookmark with `id` if the session user owns it.
    async fn delete_bookmark(&self, session: &SessionContext, id: &str) -> Result<(), MutationError>;
}
