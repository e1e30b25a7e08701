//! Ordering and lifecycle tests for the bookmark list view model.
//!
//! A scripted data service holds every ranged read open until the test
//! answers it, so responses can be resolved in any order.

use std::sync::{Arc, Mutex};
use std::time::Duration;

use async_trait::async_trait;
use tokio::sync::{mpsc, oneshot, watch};

use linkshelf::managers::bookmark_list::{
    BookmarkListConfig, BookmarkListViewModel, LoadOutcome, MutationOutcome, SAVED_MESSAGE,
};
use linkshelf::services::data_service::{
    ChangeEvent, ChangeFilter, ChangeKind, DataServiceClient, MutationGateway, Subscription,
};
use linkshelf::types::bookmark::Bookmark;
use linkshelf::types::errors::{DataServiceError, MutationError};
use linkshelf::types::notice::NoticeKind;
use linkshelf::types::page::{RangedQuery, RangedRows};
use linkshelf::types::session::{SessionContext, UserIdentity};

type Reply = Result<RangedRows, DataServiceError>;

/// Data service whose reads wait for an explicit answer.
struct ScriptedData {
    pending: Mutex<Vec<(RangedQuery, Option<oneshot::Sender<Reply>>)>>,
    calls: watch::Sender<usize>,
    change_feed: Mutex<Option<mpsc::Sender<ChangeEvent>>>,
    subscribed_filter: Mutex<Option<ChangeFilter>>,
}

impl ScriptedData {
    fn new() -> Arc<Self> {
        Arc::new(Self {
            pending: Mutex::new(Vec::new()),
            calls: watch::channel(0).0,
            change_feed: Mutex::new(None),
            subscribed_filter: Mutex::new(None),
        })
    }

    async fn wait_for_calls(&self, n: usize) {
        let mut rx = self.calls.subscribe();
        rx.wait_for(|count| *count >= n).await.unwrap();
    }

    fn query(&self, call: usize) -> RangedQuery {
        self.pending.lock().unwrap()[call].0.clone()
    }

    fn answer(&self, call: usize, reply: Reply) {
        let tx = self.pending.lock().unwrap()[call].1.take().unwrap();
        let _ = tx.send(reply);
    }

    fn push_change(&self) {
        let feed = self.change_feed.lock().unwrap().clone().unwrap();
        feed.try_send(ChangeEvent {
            table: "bookmarks".to_string(),
            kind: ChangeKind::Insert,
            record_id: None,
        })
        .unwrap();
    }

    fn feed_closed(&self) -> bool {
        self.change_feed
            .lock()
            .unwrap()
            .as_ref()
            .map(|tx| tx.is_closed())
            .unwrap_or(false)
    }
}

#[async_trait]
impl DataServiceClient for ScriptedData {
    async fn ranged_select(
        &self,
        _session: &SessionContext,
        query: &RangedQuery,
    ) -> Result<RangedRows, DataServiceError> {
        let (tx, rx) = oneshot::channel();
        self.pending.lock().unwrap().push((query.clone(), Some(tx)));
        self.calls.send_modify(|c| *c += 1);
        rx.await
            .unwrap_or_else(|_| Err(DataServiceError::Network("script dropped".to_string())))
    }

    async fn current_user(
        &self,
        session: &SessionContext,
    ) -> Result<Option<UserIdentity>, DataServiceError> {
        Ok(Some(session.user.clone()))
    }

    async fn subscribe_to_changes(
        &self,
        _session: &SessionContext,
        filter: &ChangeFilter,
    ) -> Result<Subscription, DataServiceError> {
        let (tx, sub) = Subscription::channel(8);
        *self.change_feed.lock().unwrap() = Some(tx);
        *self.subscribed_filter.lock().unwrap() = Some(filter.clone());
        Ok(sub)
    }
}

/// Gateway that accepts everything and counts calls.
#[derive(Default)]
struct AcceptingGateway {
    inserts: Mutex<Vec<(String, String)>>,
}

#[async_trait]
impl MutationGateway for AcceptingGateway {
    async fn insert_bookmark(
        &self,
        session: &SessionContext,
        title: &str,
        url: &str,
    ) -> Result<Bookmark, MutationError> {
        self.inserts
            .lock()
            .unwrap()
            .push((title.to_string(), url.to_string()));
        Ok(bookmark(session.user_id(), title))
    }

    async fn delete_bookmark(&self, _session: &SessionContext, _id: &str) -> Result<(), MutationError> {
        Ok(())
    }
}

/// Gateway whose deletes are refused by the backend.
struct RefusingGateway;

#[async_trait]
impl MutationGateway for RefusingGateway {
    async fn insert_bookmark(
        &self,
        session: &SessionContext,
        title: &str,
        _url: &str,
    ) -> Result<Bookmark, MutationError> {
        Ok(bookmark(session.user_id(), title))
    }

    async fn delete_bookmark(&self, _session: &SessionContext, _id: &str) -> Result<(), MutationError> {
        Err(MutationError::new("permission denied"))
    }
}

fn session() -> SessionContext {
    SessionContext::for_user(UserIdentity {
        id: "user-1".to_string(),
        email: Some("me@example.com".to_string()),
    })
}

fn bookmark(user_id: &str, title: &str) -> Bookmark {
    Bookmark {
        id: format!("id-{}", title),
        user_id: user_id.to_string(),
        title: title.to_string(),
        url: format!("https://example.com/{}", title),
        created_at: "2024-01-01T00:00:00.000000+00:00".to_string(),
    }
}

fn rows(titles: &[&str], total: usize) -> Reply {
    Ok(RangedRows {
        rows: titles.iter().map(|t| bookmark("user-1", t)).collect(),
        exact_total: total,
    })
}

fn setup() -> (Arc<ScriptedData>, Arc<AcceptingGateway>, Arc<BookmarkListViewModel>) {
    let data = ScriptedData::new();
    let gateway = Arc::new(AcceptingGateway::default());
    let vm = BookmarkListViewModel::new(
        data.clone(),
        gateway.clone(),
        session(),
        BookmarkListConfig {
            page_size: 5,
            notice_ttl: Duration::from_secs(5),
        },
    );
    (data, gateway, Arc::new(vm))
}

#[tokio::test]
async fn test_later_request_wins_when_earlier_resolves_last() {
    let (data, _gw, vm) = setup();

    let first = tokio::spawn({
        let vm = vm.clone();
        async move { vm.load_page(1, true).await }
    });
    data.wait_for_calls(1).await;
    let second = tokio::spawn({
        let vm = vm.clone();
        async move { vm.load_page(2, true).await }
    });
    data.wait_for_calls(2).await;

    data.answer(1, rows(&["f", "g"], 7));
    assert_eq!(second.await.unwrap(), LoadOutcome::Applied);
    data.answer(0, rows(&["a", "b", "c", "d", "e"], 7));
    assert_eq!(first.await.unwrap(), LoadOutcome::Stale);

    let snap = vm.snapshot();
    assert_eq!(snap.page, 2);
    assert_eq!(snap.total_count, 7);
    assert_eq!(snap.items.len(), 2);
    assert_eq!(snap.items[0].title, "f");
}

#[tokio::test]
async fn test_stale_response_never_overwrites_newer_window() {
    let (data, _gw, vm) = setup();

    let first = tokio::spawn({
        let vm = vm.clone();
        async move { vm.load_page(1, true).await }
    });
    data.wait_for_calls(1).await;
    let second = tokio::spawn({
        let vm = vm.clone();
        async move { vm.load_page(2, true).await }
    });
    data.wait_for_calls(2).await;

    // Older answers first; it must be dropped even though the newer one is still pending.
    data.answer(0, rows(&["a"], 6));
    assert_eq!(first.await.unwrap(), LoadOutcome::Stale);
    assert!(vm.snapshot().items.is_empty());
    assert!(vm.snapshot().busy);

    data.answer(1, rows(&["b"], 6));
    assert_eq!(second.await.unwrap(), LoadOutcome::Applied);
    assert_eq!(vm.snapshot().items[0].title, "b");
    assert!(!vm.snapshot().busy);
}

#[tokio::test]
async fn test_range_requested_for_page() {
    let (data, _gw, vm) = setup();
    let load = tokio::spawn({
        let vm = vm.clone();
        async move { vm.load_page(3, true).await }
    });
    data.wait_for_calls(1).await;
    let query = data.query(0);
    assert_eq!(query.table, "bookmarks");
    assert_eq!(query.range.from, 10);
    assert_eq!(query.range.to, 15);
    assert_eq!(query.range.last_inclusive(), Some(14));
    assert_eq!(query.order_by, "created_at");
    data.answer(0, rows(&["k", "l"], 12));
    assert_eq!(load.await.unwrap(), LoadOutcome::Applied);
}

#[tokio::test]
async fn test_silent_load_never_sets_busy() {
    let (data, _gw, vm) = setup();
    let load = tokio::spawn({
        let vm = vm.clone();
        async move { vm.load_page(1, false).await }
    });
    data.wait_for_calls(1).await;
    assert!(!vm.snapshot().busy);
    data.answer(0, rows(&["a"], 1));
    load.await.unwrap();
    assert!(!vm.snapshot().busy);
}

#[tokio::test]
async fn test_busy_clears_only_when_latest_resolves() {
    let (data, _gw, vm) = setup();
    let busy_load = tokio::spawn({
        let vm = vm.clone();
        async move { vm.load_page(1, true).await }
    });
    data.wait_for_calls(1).await;
    let silent = tokio::spawn({
        let vm = vm.clone();
        async move { vm.load_page(1, false).await }
    });
    data.wait_for_calls(2).await;

    data.answer(0, rows(&["a"], 1));
    assert_eq!(busy_load.await.unwrap(), LoadOutcome::Stale);
    assert!(vm.snapshot().busy);

    data.answer(1, rows(&["a"], 1));
    assert_eq!(silent.await.unwrap(), LoadOutcome::Applied);
    assert!(!vm.snapshot().busy);
}

#[tokio::test]
async fn test_failed_fetch_keeps_previous_window() {
    let (data, _gw, vm) = setup();
    let load = tokio::spawn({
        let vm = vm.clone();
        async move { vm.load_page(1, true).await }
    });
    data.wait_for_calls(1).await;
    data.answer(0, rows(&["a", "b"], 2));
    load.await.unwrap();

    let load = tokio::spawn({
        let vm = vm.clone();
        async move { vm.load_page(1, true).await }
    });
    data.wait_for_calls(2).await;
    data.answer(1, Err(DataServiceError::Network("connection reset".to_string())));
    assert_eq!(load.await.unwrap(), LoadOutcome::Failed);

    let snap = vm.snapshot();
    assert_eq!(snap.items.len(), 2);
    assert_eq!(snap.total_count, 2);
    assert!(!snap.busy);
    assert!(snap.notice.is_none());
}

#[tokio::test]
async fn test_disposed_view_model_ignores_late_response() {
    let (data, _gw, vm) = setup();
    let load = tokio::spawn({
        let vm = vm.clone();
        async move { vm.load_page(1, true).await }
    });
    data.wait_for_calls(1).await;
    let before = vm.snapshot();

    vm.dispose();
    data.answer(0, rows(&["a"], 1));
    assert_eq!(load.await.unwrap(), LoadOutcome::Disposed);
    assert_eq!(vm.snapshot(), before);

    assert_eq!(vm.load_page(1, true).await, LoadOutcome::Disposed);
    assert!(!vm.change_page(1).await);
    assert_eq!(vm.submit_add("Docs", "https://docs.rs").await, MutationOutcome::Ignored);
}

#[tokio::test]
async fn test_dispose_is_idempotent() {
    let (_data, _gw, vm) = setup();
    vm.dispose();
    vm.dispose();
    assert!(vm.is_disposed());
}

#[tokio::test]
async fn test_initialize_subscribes_for_current_user_and_refreshes_silently() {
    let (data, _gw, vm) = setup();
    let init = tokio::spawn({
        let vm = vm.clone();
        async move { vm.initialize().await }
    });
    data.wait_for_calls(1).await;
    assert!(vm.snapshot().show_skeleton);
    data.answer(0, rows(&["a"], 1));
    assert!(init.await.unwrap());
    assert!(!vm.snapshot().show_skeleton);

    let filter = data.subscribed_filter.lock().unwrap().clone().unwrap();
    assert_eq!(filter, ChangeFilter::bookmarks_of("user-1"));

    data.push_change();
    data.wait_for_calls(2).await;
    assert!(!vm.snapshot().busy, "realtime refresh must be silent");
    assert_eq!(data.query(1).range.from, 0);
    data.answer(1, rows(&["b", "a"], 2));

    let mut state = vm.subscribe_state();
    state
        .wait_for(|_| vm.snapshot().total_count == 2)
        .await
        .unwrap();
    assert_eq!(vm.snapshot().items[0].title, "b");
}

#[tokio::test]
async fn test_initialize_runs_once() {
    let (data, _gw, vm) = setup();
    let init = tokio::spawn({
        let vm = vm.clone();
        async move { vm.initialize().await }
    });
    data.wait_for_calls(1).await;
    data.answer(0, rows(&[], 0));
    assert!(init.await.unwrap());
    assert!(!vm.initialize().await);
}

#[tokio::test]
async fn test_dispose_closes_change_subscription() {
    let (data, _gw, vm) = setup();
    let init = tokio::spawn({
        let vm = vm.clone();
        async move { vm.initialize().await }
    });
    data.wait_for_calls(1).await;
    data.answer(0, rows(&[], 0));
    init.await.unwrap();
    assert!(!data.feed_closed());

    vm.dispose();
    // The aborted follower drops its subscription on its next poll.
    for _ in 0..50 {
        if data.feed_closed() {
            break;
        }
        tokio::time::sleep(Duration::from_millis(10)).await;
    }
    assert!(data.feed_closed());
}

#[tokio::test]
async fn test_change_page_out_of_range_is_rejected() {
    let (data, _gw, vm) = setup();
    let load = tokio::spawn({
        let vm = vm.clone();
        async move { vm.load_page(1, true).await }
    });
    data.wait_for_calls(1).await;
    data.answer(0, rows(&["a", "b", "c", "d", "e"], 12));
    load.await.unwrap();

    assert!(!vm.change_page(0).await);
    assert!(!vm.change_page(4).await);
    assert_eq!(*data.calls.borrow(), 1);

    let change = tokio::spawn({
        let vm = vm.clone();
        async move { vm.change_page(3).await }
    });
    data.wait_for_calls(2).await;
    assert_eq!(vm.snapshot().page, 3, "cursor moves before the response arrives");
    data.answer(1, rows(&["k", "l"], 12));
    assert!(change.await.unwrap());
}

#[tokio::test]
async fn test_out_of_range_page_clamps_to_last() {
    let (data, _gw, vm) = setup();
    let load = tokio::spawn({
        let vm = vm.clone();
        async move { vm.load_page(3, true).await }
    });
    data.wait_for_calls(1).await;
    data.answer(0, rows(&[], 6));
    data.wait_for_calls(2).await;
    assert_eq!(data.query(1).range.from, 5);
    data.answer(1, rows(&["f"], 6));
    assert_eq!(load.await.unwrap(), LoadOutcome::Applied);

    let snap = vm.snapshot();
    assert_eq!(snap.page, 2);
    assert_eq!(snap.items.len(), 1);
}

#[tokio::test]
async fn test_second_add_while_submitting_is_ignored() {
    let (data, gw, vm) = setup();
    let add = tokio::spawn({
        let vm = vm.clone();
        async move { vm.submit_add("Docs", "https://docs.rs").await }
    });
    // The add's page-1 reload is held open, so the add is still in flight.
    data.wait_for_calls(1).await;
    assert!(vm.snapshot().submitting);
    assert_eq!(vm.submit_add("Other", "https://other.dev").await, MutationOutcome::Ignored);

    data.answer(0, rows(&["Docs"], 1));
    assert_eq!(add.await.unwrap(), MutationOutcome::Completed);
    assert!(!vm.snapshot().submitting);
    assert_eq!(gw.inserts.lock().unwrap().len(), 1);
}

#[tokio::test(start_paused = true)]
async fn test_notice_expires_after_ttl() {
    let (data, _gw, vm) = setup();
    let add = tokio::spawn({
        let vm = vm.clone();
        async move { vm.submit_add("Docs", "https://docs.rs").await }
    });
    data.wait_for_calls(1).await;
    data.answer(0, rows(&["Docs"], 1));
    add.await.unwrap();

    let notice = vm.notice().unwrap();
    assert_eq!(notice.kind, NoticeKind::Success);
    assert_eq!(notice.message, SAVED_MESSAGE);

    tokio::time::sleep(Duration::from_millis(4_900)).await;
    assert!(vm.notice().is_some());
    tokio::time::sleep(Duration::from_millis(200)).await;
    assert!(vm.notice().is_none());
}

#[tokio::test(start_paused = true)]
async fn test_new_notice_restarts_window() {
    let (_data, _gw, vm) = setup();
    assert!(matches!(vm.submit_add("", "https://a.io").await, MutationOutcome::Rejected(_)));
    tokio::time::sleep(Duration::from_secs(3)).await;
    assert!(matches!(vm.submit_add("A", "").await, MutationOutcome::Rejected(_)));
    tokio::time::sleep(Duration::from_secs(3)).await;

    let notice = vm.notice().unwrap();
    assert_eq!(notice.kind, NoticeKind::Error);
    tokio::time::sleep(Duration::from_secs(3)).await;
    assert!(vm.notice().is_none());
}

#[tokio::test]
async fn test_realtime_refresh_during_page_change_targets_new_page() {
    let (data, _gw, vm) = setup();
    let init = tokio::spawn({
        let vm = vm.clone();
        async move { vm.initialize().await }
    });
    data.wait_for_calls(1).await;
    data.answer(0, rows(&["a", "b", "c", "d", "e"], 12));
    assert!(init.await.unwrap());

    let change = tokio::spawn({
        let vm = vm.clone();
        async move { vm.change_page(2).await }
    });
    data.wait_for_calls(2).await;
    assert_eq!(data.query(1).range.from, 5);

    data.push_change();
    data.wait_for_calls(3).await;
    assert_eq!(data.query(2).range.from, 5, "refresh follows the moved cursor");

    data.answer(2, rows(&["f", "g", "h", "i", "j"], 12));
    let mut state = vm.subscribe_state();
    state
        .wait_for(|_| vm.snapshot().items.first().map(|b| b.title.as_str()) == Some("f"))
        .await
        .unwrap();
    data.answer(1, rows(&["x"], 12));
    assert!(change.await.unwrap());

    let snap = vm.snapshot();
    assert_eq!(snap.page, 2);
    assert_eq!(snap.items[0].title, "f");
    assert!(!snap.busy);
}

#[tokio::test]
async fn test_refused_delete_shows_error_without_refetch() {
    let data = ScriptedData::new();
    let vm = BookmarkListViewModel::new(
        data.clone(),
        Arc::new(RefusingGateway),
        session(),
        BookmarkListConfig::default(),
    );

    let outcome = vm.submit_delete("id-a").await;
    assert_eq!(outcome, MutationOutcome::Rejected("permission denied".to_string()));

    let notice = vm.notice().unwrap();
    assert_eq!(notice.kind, NoticeKind::Error);
    assert_eq!(notice.message, "permission denied");
    assert_eq!(*data.calls.borrow(), 0);
    assert!(!vm.snapshot().busy);
}
