//! Unit tests for the BookmarkListViewModel against the local backend.
//!
//! These tests drive the view model the way the UI does: mount, page, add,
//! delete, and watch what the snapshot shows afterwards.

use std::sync::Arc;
use std::time::Duration;

use rstest::rstest;

use linkshelf::managers::bookmark_list::{
    BookmarkListConfig, BookmarkListViewModel, LoadOutcome, MutationOutcome,
    DUPLICATE_TITLE_MESSAGE, INVALID_URL_MESSAGE, REMOVED_MESSAGE, SAVED_MESSAGE,
    TITLE_REQUIRED_MESSAGE, TITLE_TOO_LONG_MESSAGE, URL_REQUIRED_MESSAGE,
};
use linkshelf::services::data_service::{DataServiceClient, MutationGateway};
use linkshelf::services::local_backend::LocalBackend;
use linkshelf::types::bookmark::BookmarkDraft;
use linkshelf::types::notice::NoticeKind;
use linkshelf::types::page::{PageRange, RangedQuery};
use linkshelf::types::session::SessionContext;

/// Helper: a view model over a fresh in-memory backend, plus the backend
/// itself for seeding rows behind the view model's back.
fn setup() -> (Arc<LocalBackend>, SessionContext, BookmarkListViewModel) {
    let backend = Arc::new(LocalBackend::open_in_memory().expect("in-memory backend"));
    let session = backend.sign_in("me@example.com").expect("sign in");
    let vm = BookmarkListViewModel::new(
        backend.clone(),
        backend.clone(),
        session.clone(),
        BookmarkListConfig::default(),
    );
    (backend, session, vm)
}

async fn seed(backend: &LocalBackend, session: &SessionContext, n: usize) {
    for i in 1..=n {
        backend
            .insert_bookmark(session, &format!("Link {}", i), &format!("https://example.com/{}", i))
            .await
            .unwrap();
    }
}

#[tokio::test]
async fn test_skeleton_until_mounted() {
    let (_backend, _session, vm) = setup();
    let snap = vm.snapshot();
    assert!(!snap.mounted);
    assert!(snap.show_skeleton);
    assert_eq!(snap.page, 1);
    assert_eq!(snap.total_pages, 0);

    assert!(vm.initialize().await);
    let snap = vm.snapshot();
    assert!(snap.mounted);
    assert!(!snap.show_skeleton);
    assert!(snap.items.is_empty());
}

#[tokio::test]
async fn test_twelve_bookmarks_make_three_pages() {
    let (backend, session, vm) = setup();
    seed(&backend, &session, 12).await;
    vm.initialize().await;

    let snap = vm.snapshot();
    assert_eq!(snap.total_count, 12);
    assert_eq!(snap.total_pages, 3);
    assert_eq!(snap.items.len(), 5);
    assert_eq!(snap.items[0].title, "Link 12");

    assert!(vm.change_page(3).await);
    let snap = vm.snapshot();
    assert_eq!(snap.page, 3);
    assert_eq!(snap.items.len(), 2);
    assert_eq!(snap.items[1].title, "Link 1");
}

#[tokio::test]
async fn test_add_resets_to_first_page_and_shows_newest() {
    let (backend, session, vm) = setup();
    seed(&backend, &session, 7).await;
    vm.initialize().await;
    vm.change_page(2).await;

    vm.edit_draft("Rust", "https://rust-lang.org");
    assert_eq!(vm.snapshot().draft.title, "Rust");

    let outcome = vm.submit_add("Rust", "https://rust-lang.org").await;
    assert_eq!(outcome, MutationOutcome::Completed);

    let snap = vm.snapshot();
    assert_eq!(snap.page, 1);
    assert_eq!(snap.items[0].title, "Rust");
    assert_eq!(snap.total_count, 8);
    assert_eq!(snap.draft, BookmarkDraft::default());
    let notice = snap.notice.unwrap();
    assert_eq!(notice.kind, NoticeKind::Success);
    assert_eq!(notice.message, SAVED_MESSAGE);
}

#[tokio::test]
async fn test_duplicate_title_shows_friendly_error() {
    let (_backend, _session, vm) = setup();
    vm.initialize().await;
    vm.submit_add("Docs", "https://docs.rs").await;

    vm.edit_draft("Docs", "https://docs.rs/std");
    let outcome = vm.submit_add("Docs", "https://docs.rs/std").await;
    assert_eq!(outcome, MutationOutcome::Rejected(DUPLICATE_TITLE_MESSAGE.to_string()));

    let snap = vm.snapshot();
    assert_eq!(snap.total_count, 1);
    assert_eq!(snap.notice.unwrap().message, DUPLICATE_TITLE_MESSAGE);
    // A rejected add keeps the draft for correction.
    assert_eq!(snap.draft.url, "https://docs.rs/std");
    assert!(!snap.submitting);
}

#[tokio::test]
async fn test_malformed_url_shows_friendly_error() {
    let (_backend, _session, vm) = setup();
    vm.initialize().await;
    let outcome = vm.submit_add("Bad", "not a url").await;
    assert_eq!(outcome, MutationOutcome::Rejected(INVALID_URL_MESSAGE.to_string()));
    let notice = vm.notice().unwrap();
    assert_eq!(notice.kind, NoticeKind::Error);
    assert_eq!(vm.snapshot().total_count, 0);
}

#[rstest]
#[case(String::new(), "https://docs.rs", TITLE_REQUIRED_MESSAGE)]
#[case("Docs".to_string(), "", URL_REQUIRED_MESSAGE)]
#[case("x".repeat(51), "https://docs.rs", TITLE_TOO_LONG_MESSAGE)]
#[tokio::test]
async fn test_client_validation_rejects_without_calling_backend(
    #[case] title: String,
    #[case] url: &str,
    #[case] expected: &str,
) {
    let (backend, session, vm) = setup();
    vm.initialize().await;
    let outcome = vm.submit_add(&title, url).await;
    assert_eq!(outcome, MutationOutcome::Rejected(expected.to_string()));
    assert_eq!(vm.notice().unwrap().message, expected);

    let rows = backend
        .ranged_select(&session, &RangedQuery::bookmarks(PageRange::for_page(1, 5)))
        .await
        .unwrap();
    assert_eq!(rows.exact_total, 0);
}

#[tokio::test]
async fn test_delete_removes_row_and_stays_on_page() {
    let (backend, session, vm) = setup();
    seed(&backend, &session, 7).await;
    vm.initialize().await;
    vm.change_page(2).await;
    let target = vm.snapshot().items[0].clone();

    assert_eq!(vm.submit_delete(&target.id).await, MutationOutcome::Completed);
    let snap = vm.snapshot();
    assert_eq!(snap.page, 2);
    assert_eq!(snap.total_count, 6);
    assert!(snap.items.iter().all(|b| b.id != target.id));
    assert_eq!(snap.notice.unwrap().message, REMOVED_MESSAGE);
}

#[tokio::test]
async fn test_deleting_last_item_on_last_page_clamps() {
    let (backend, session, vm) = setup();
    seed(&backend, &session, 6).await;
    vm.initialize().await;
    vm.change_page(2).await;
    let only = vm.snapshot().items[0].clone();
    assert_eq!(vm.snapshot().items.len(), 1);

    vm.submit_delete(&only.id).await;
    let snap = vm.snapshot();
    assert_eq!(snap.page, 1);
    assert_eq!(snap.total_pages, 1);
    assert_eq!(snap.items.len(), 5);
}

#[tokio::test]
async fn test_reloading_same_page_is_idempotent() {
    let (backend, session, vm) = setup();
    seed(&backend, &session, 4).await;
    vm.initialize().await;
    let before = vm.snapshot();
    assert_eq!(vm.load_page(1, true).await, LoadOutcome::Applied);
    assert_eq!(vm.snapshot(), before);
}

#[tokio::test]
async fn test_external_insert_refreshes_silently() {
    let (backend, session, vm) = setup();
    vm.initialize().await;
    let mut state = vm.subscribe_state();

    // Another client adds a bookmark for the same user.
    backend
        .insert_bookmark(&session, "Elsewhere", "https://example.org")
        .await
        .unwrap();

    tokio::time::timeout(
        Duration::from_secs(2),
        state.wait_for(|_| vm.snapshot().total_count == 1),
    )
    .await
    .expect("refresh in time")
    .unwrap();
    let snap = vm.snapshot();
    assert_eq!(snap.items[0].title, "Elsewhere");
    assert!(snap.notice.is_none());
}

#[tokio::test]
async fn test_other_users_changes_do_not_leak() {
    let (backend, _session, vm) = setup();
    vm.initialize().await;
    let other = backend.sign_in("other@example.com").unwrap();
    backend
        .insert_bookmark(&other, "Theirs", "https://example.org")
        .await
        .unwrap();
    tokio::time::sleep(Duration::from_millis(50)).await;
    assert_eq!(vm.snapshot().total_count, 0);
}

#[tokio::test]
async fn test_notice_ttl_comes_from_config() {
    let backend = Arc::new(LocalBackend::open_in_memory().unwrap());
    let session = backend.sign_in("me@example.com").unwrap();
    let vm = BookmarkListViewModel::new(
        backend.clone(),
        backend,
        session,
        BookmarkListConfig {
            page_size: 3,
            notice_ttl: Duration::from_millis(30),
        },
    );
    vm.initialize().await;
    vm.submit_add("", "").await;
    assert!(vm.notice().is_some());
    tokio::time::sleep(Duration::from_millis(60)).await;
    assert!(vm.notice().is_none());
}
