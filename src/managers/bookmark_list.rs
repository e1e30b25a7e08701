//! Bookmark List view model for Linkshelf.
//!
//! Owns the paginated window of the signed-in user's bookmarks and keeps it
//! consistent with the remote table:
//!
//! - every fetch replaces the slice and the total count together;
//! - fetches carry a request sequence token and only the latest one is applied;
//! - a realtime change notification triggers a silent refetch of the current page;
//! - add resets to page 1, delete refetches the current page;
//! - after [`BookmarkListViewModel::dispose`] nothing mutates observable state.
//!
//! Operations never return errors to the caller. Fetch failures are logged and
//! swallowed; mutation failures surface as notices.

use std::sync::{Arc, Mutex, MutexGuard, PoisonError, Weak};
use std::time::Duration;

use serde::Serialize;
use tokio::sync::watch;
use tokio::task::JoinHandle;
use tracing::{debug, info, warn};

use crate::managers::notice_board::{NoticeBoard, DEFAULT_NOTICE_TTL};
use crate::services::data_service::{ChangeFilter, DataServiceClient, MutationGateway, Subscription};
use crate::types::bookmark::{Bookmark, BookmarkDraft, MAX_TITLE_CHARS};
use crate::types::notice::Notice;
use crate::types::page::{PageRange, PageWindow, RangedQuery, DEFAULT_PAGE_SIZE};
use crate::types::session::SessionContext;
use crate::types::settings::ViewSettings;

pub const DUPLICATE_TITLE_MESSAGE: &str = "You already have a bookmark with this title.";
pub const INVALID_URL_MESSAGE: &str = "Please enter a valid URL.";
pub const SAVED_MESSAGE: &str = "Link saved successfully!";
pub const REMOVED_MESSAGE: &str = "Bookmark removed";
pub const TITLE_REQUIRED_MESSAGE: &str = "Please enter a title.";
pub const TITLE_TOO_LONG_MESSAGE: &str = "Titles can be at most 50 characters.";
pub const URL_REQUIRED_MESSAGE: &str = "Please enter a URL.";
const UNKNOWN_ERROR_MESSAGE: &str = "Something went wrong.";

/// Maps a raw mutation error message to the text shown to the user.
pub fn friendly_mutation_message(raw: &str) -> String {
    if raw.contains("unique_title_per_user") || raw.contains("duplicate key") {
        DUPLICATE_TITLE_MESSAGE.to_string()
    } else if raw.contains("url_format_check") {
        INVALID_URL_MESSAGE.to_string()
    } else if raw.trim().is_empty() {
        UNKNOWN_ERROR_MESSAGE.to_string()
    } else {
        raw.to_string()
    }
}

/// Client-side checks mirroring the add form's constraints.
fn validate_draft(title: &str, url: &str) -> Result<(), &'static str> {
    if title.is_empty() {
        return Err(TITLE_REQUIRED_MESSAGE);
    }
    if title.chars().count() > MAX_TITLE_CHARS {
        return Err(TITLE_TOO_LONG_MESSAGE);
    }
    if url.is_empty() {
        return Err(URL_REQUIRED_MESSAGE);
    }
    Ok(())
}

/// Tunables for one view model instance.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct BookmarkListConfig {
    pub page_size: usize,
    pub notice_ttl: Duration,
}

impl Default for BookmarkListConfig {
    fn default() -> Self {
        Self {
            page_size: DEFAULT_PAGE_SIZE,
            notice_ttl: DEFAULT_NOTICE_TTL,
        }
    }
}

impl From<&ViewSettings> for BookmarkListConfig {
    fn from(view: &ViewSettings) -> Self {
        Self {
            page_size: view.page_size.max(1),
            notice_ttl: Duration::from_millis(view.notice_ttl_ms),
        }
    }
}

/// What happened to one `load_page` call.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum LoadOutcome {
    /// The response replaced the displayed window.
    Applied,
    /// A newer request was issued before this one resolved; response dropped.
    Stale,
    /// The fetch failed; the previous window is kept.
    Failed,
    /// The view model was disposed; nothing was applied.
    Disposed,
}

/// What happened to an add or delete.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum MutationOutcome {
    Completed,
    /// Rejected by validation or by the gateway; carries the notice text.
    Rejected(String),
    /// Not attempted: another add is in flight or the view model is disposed.
    Ignored,
}

/// Immutable copy of everything the UI renders.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct BookmarkListSnapshot {
    pub page: usize,
    pub page_size: usize,
    pub total_count: usize,
    pub total_pages: usize,
    pub items: Vec<Bookmark>,
    pub busy: bool,
    pub submitting: bool,
    pub mounted: bool,
    pub show_skeleton: bool,
    pub notice: Option<Notice>,
    pub draft: BookmarkDraft,
}

struct ListState {
    window: PageWindow,
    busy: bool,
    submitting: bool,
    mounted: bool,
    disposed: bool,
    latest_request: u64,
    draft: BookmarkDraft,
    notices: NoticeBoard,
    notice_generation: u64,
}

struct Inner {
    data: Arc<dyn DataServiceClient>,
    gateway: Arc<dyn MutationGateway>,
    session: SessionContext,
    config: BookmarkListConfig,
    state: Mutex<ListState>,
    revision: watch::Sender<u64>,
    realtime: Mutex<Option<JoinHandle<()>>>,
}

/// Paginated, live-refreshing list of the session user's bookmarks.
pub struct BookmarkListViewModel {
    inner: Arc<Inner>,
}

impl BookmarkListViewModel {
    pub fn new(
        data: Arc<dyn DataServiceClient>,
        gateway: Arc<dyn MutationGateway>,
        session: SessionContext,
        config: BookmarkListConfig,
    ) -> Self {
        let page_size = config.page_size.max(1);
        let config = BookmarkListConfig { page_size, ..config };
        let (revision, _) = watch::channel(0);
        let state = ListState {
            window: PageWindow::empty(page_size),
            busy: false,
            submitting: false,
            mounted: false,
            disposed: false,
            latest_request: 0,
            draft: BookmarkDraft::default(),
            notices: NoticeBoard::new(config.notice_ttl),
            notice_generation: 0,
        };
        Self {
            inner: Arc::new(Inner {
                data,
                gateway,
                session,
                config,
                state: Mutex::new(state),
                revision,
                realtime: Mutex::new(None),
            }),
        }
    }

    pub fn session(&self) -> &SessionContext {
        &self.inner.session
    }

    pub fn config(&self) -> BookmarkListConfig {
        self.inner.config
    }

    /// Mounts the list: loads page 1, then follows the user's changes.
    ///
    /// Returns `false` if the view model was already mounted or is disposed.
    pub async fn initialize(&self) -> bool {
        {
            let mut st = self.inner.lock_state();
            if st.disposed || st.mounted {
                return false;
            }
            st.mounted = true;
        }
        self.inner.bump();
        info!(user_id = %self.inner.session.user_id(), "bookmark list mounted");

        self.inner.load_page(1, true).await;

        let user = match self.inner.data.current_user(&self.inner.session).await {
            Ok(Some(user)) => user,
            Ok(None) => {
                warn!("no current user, realtime refresh disabled");
                return true;
            }
            Err(e) => {
                warn!(error = %e, "identity lookup failed, realtime refresh disabled");
                return true;
            }
        };

        let filter = ChangeFilter::bookmarks_of(&user.id);
        let subscription = match self
            .inner
            .data
            .subscribe_to_changes(&self.inner.session, &filter)
            .await
        {
            Ok(sub) => sub,
            Err(e) => {
                warn!(error = %e, "change subscription failed, realtime refresh disabled");
                return true;
            }
        };

        let handle = tokio::spawn(follow_changes(Arc::downgrade(&self.inner), subscription));
        let mut slot = self
            .inner
            .realtime
            .lock()
            .unwrap_or_else(PoisonError::into_inner);
        if self.inner.is_disposed() {
            handle.abort();
        } else {
            *slot = Some(handle);
        }
        true
    }

    /// Fetches `page` and replaces the window if this is still the latest request.
    ///
    /// With `show_busy == false` the loading indicator is left alone.
    pub async fn load_page(&self, page: usize, show_busy: bool) -> LoadOutcome {
        self.inner.load_page(page, show_busy).await
    }

    /// Moves the cursor to `new_page` and loads it.
    ///
    /// Returns `false` without fetching when the page is out of range.
    pub async fn change_page(&self, new_page: usize) -> bool {
        {
            let mut st = self.inner.lock_state();
            if st.disposed || !st.window.contains_page(new_page) {
                return false;
            }
            st.window.page = new_page;
        }
        self.inner.bump();
        self.inner.load_page(new_page, true).await;
        true
    }

    /// Replaces the add-form draft.
    pub fn edit_draft(&self, title: &str, url: &str) {
        {
            let mut st = self.inner.lock_state();
            if st.disposed {
                return;
            }
            st.draft = BookmarkDraft {
                title: title.to_string(),
                url: url.to_string(),
            };
        }
        self.inner.bump();
    }

    /// Adds a bookmark, then shows page 1.
    ///
    /// At most one add is in flight; a second call while one is pending is ignored.
    pub async fn submit_add(&self, title: &str, url: &str) -> MutationOutcome {
        {
            let mut st = self.inner.lock_state();
            if st.disposed || st.submitting {
                return MutationOutcome::Ignored;
            }
            st.submitting = true;
        }
        self.inner.bump();

        let outcome = self.add_inner(title, url).await;

        {
            let mut st = self.inner.lock_state();
            if !st.disposed {
                st.submitting = false;
            }
        }
        self.inner.bump();
        outcome
    }

    async fn add_inner(&self, title: &str, url: &str) -> MutationOutcome {
        if let Err(message) = validate_draft(title, url) {
            self.inner.show_notice(Notice::error(message));
            return MutationOutcome::Rejected(message.to_string());
        }

        match self
            .inner
            .gateway
            .insert_bookmark(&self.inner.session, title, url)
            .await
        {
            Ok(bookmark) => {
                debug!(id = %bookmark.id, "bookmark added");
                {
                    let mut st = self.inner.lock_state();
                    if st.disposed {
                        return MutationOutcome::Completed;
                    }
                    st.draft = BookmarkDraft::default();
                    st.window.page = 1;
                }
                self.inner.show_notice(Notice::success(SAVED_MESSAGE));
                self.inner.load_page(1, true).await;
                MutationOutcome::Completed
            }
            Err(e) => {
                let message = friendly_mutation_message(&e.message);
                debug!(error = %e, "bookmark add rejected");
                self.inner.show_notice(Notice::error(message.clone()));
                MutationOutcome::Rejected(message)
            }
        }
    }

    /// Deletes a bookmark and refreshes the current page.
    pub async fn submit_delete(&self, id: &str) -> MutationOutcome {
        if self.inner.is_disposed() {
            return MutationOutcome::Ignored;
        }
        match self
            .inner
            .gateway
            .delete_bookmark(&self.inner.session, id)
            .await
        {
            Ok(()) => {
                debug!(id, "bookmark deleted");
                self.inner.show_notice(Notice::success(REMOVED_MESSAGE));
                self.inner.load_current(true).await;
                MutationOutcome::Completed
            }
            Err(e) => {
                let message = friendly_mutation_message(&e.message);
                debug!(error = %e, "bookmark delete rejected");
                self.inner.show_notice(Notice::error(message.clone()));
                MutationOutcome::Rejected(message)
            }
        }
    }

    /// Current observable state. Expired notices are not included.
    pub fn snapshot(&self) -> BookmarkListSnapshot {
        let st = self.inner.lock_state();
        BookmarkListSnapshot {
            page: st.window.page,
            page_size: st.window.page_size,
            total_count: st.window.total_count,
            total_pages: st.window.total_pages(),
            items: st.window.items.clone(),
            busy: st.busy,
            submitting: st.submitting,
            mounted: st.mounted,
            show_skeleton: !st.mounted || st.busy,
            notice: st.notices.current().cloned(),
            draft: st.draft.clone(),
        }
    }

    /// The live notice, if any.
    pub fn notice(&self) -> Option<Notice> {
        self.inner.lock_state().notices.current().cloned()
    }

    /// Receiver whose value changes whenever observable state changes.
    pub fn subscribe_state(&self) -> watch::Receiver<u64> {
        self.inner.revision.subscribe()
    }

    pub fn is_disposed(&self) -> bool {
        self.inner.is_disposed()
    }

    /// Stops realtime refresh and freezes the observable state. Idempotent.
    pub fn dispose(&self) {
        {
            let mut st = self.inner.lock_state();
            if st.disposed {
                return;
            }
            st.disposed = true;
        }
        let handle = self
            .inner
            .realtime
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .take();
        if let Some(handle) = handle {
            handle.abort();
        }
        info!("bookmark list disposed");
    }
}

impl Drop for BookmarkListViewModel {
    fn drop(&mut self) {
        self.dispose();
    }
}

/// Refetches the current page, silently, for every change notification.
async fn follow_changes(inner: Weak<Inner>, mut subscription: Subscription) {
    while let Some(event) = subscription.next().await {
        let Some(inner) = inner.upgrade() else {
            break;
        };
        if inner.is_disposed() {
            break;
        }
        debug!(kind = ?event.kind, record = ?event.record_id, "realtime change");
        inner.load_current(false).await;
    }
    subscription.close();
}

impl Inner {
    fn lock_state(&self) -> MutexGuard<'_, ListState> {
        self.state.lock().unwrap_or_else(PoisonError::into_inner)
    }

    fn bump(&self) {
        self.revision.send_modify(|r| *r = r.wrapping_add(1));
    }

    fn is_disposed(&self) -> bool {
        self.lock_state().disposed
    }

    async fn load_page(&self, page: usize, show_busy: bool) -> LoadOutcome {
        self.load(Some(page.max(1)), show_busy).await
    }

    /// Refetches whatever page the cursor is on when the request is issued.
    async fn load_current(&self, show_busy: bool) -> LoadOutcome {
        self.load(None, show_busy).await
    }

    async fn load(&self, page: Option<usize>, show_busy: bool) -> LoadOutcome {
        let (outcome, clamp_to) = self.fetch_page(page, show_busy).await;
        match clamp_to {
            Some(last) => {
                debug!(to = last, "page out of range, clamping");
                self.fetch_page(Some(last), show_busy).await.0
            }
            None => outcome,
        }
    }

    /// One ranged fetch of `page`, or of the cursor's page when `None`.
    ///
    /// The cursor is read and the sequence token taken under the same lock.
    /// The second value is set when the applied page turned out to lie past
    /// the last page and the caller should load that one.
    async fn fetch_page(
        &self,
        page: Option<usize>,
        show_busy: bool,
    ) -> (LoadOutcome, Option<usize>) {
        let (seq, page) = {
            let mut st = self.lock_state();
            if st.disposed {
                return (LoadOutcome::Disposed, None);
            }
            let page = page.unwrap_or(st.window.page).max(1);
            st.latest_request += 1;
            if show_busy {
                st.busy = true;
            }
            (st.latest_request, page)
        };
        if show_busy {
            self.bump();
        }

        let query = RangedQuery::bookmarks(PageRange::for_page(page, self.config.page_size));
        let result = self.data.ranged_select(&self.session, &query).await;

        let mut st = self.lock_state();
        if st.disposed {
            return (LoadOutcome::Disposed, None);
        }
        if seq != st.latest_request {
            debug!(page, seq, latest = st.latest_request, "dropping stale page response");
            return (LoadOutcome::Stale, None);
        }
        st.busy = false;

        let outcome = match result {
            Ok(rows) => {
                st.window.page = page;
                st.window.items = rows.rows;
                st.window.total_count = rows.exact_total;
                debug!(page, total = rows.exact_total, "page applied");
                LoadOutcome::Applied
            }
            Err(e) => {
                warn!(page, error = %e, "page fetch failed, keeping previous window");
                LoadOutcome::Failed
            }
        };

        let clamp_to = (outcome == LoadOutcome::Applied
            && st.window.items.is_empty()
            && st.window.total_count > 0
            && page > st.window.last_page())
        .then(|| st.window.last_page());
        if let Some(last) = clamp_to {
            st.window.page = last;
        }
        drop(st);
        self.bump();
        (outcome, clamp_to)
    }

    /// Shows a notice and schedules a wake-up for watchers when it expires.
    fn show_notice(self: &Arc<Self>, notice: Notice) {
        let (generation, expires) = {
            let mut st = self.lock_state();
            if st.disposed {
                return;
            }
            let expires = st.notices.set(notice);
            st.notice_generation += 1;
            (st.notice_generation, expires)
        };
        self.bump();

        let weak = Arc::downgrade(self);
        tokio::spawn(async move {
            tokio::time::sleep_until(expires).await;
            let Some(inner) = weak.upgrade() else {
                return;
            };
            let expired = {
                let mut st = inner.lock_state();
                !st.disposed && st.notice_generation == generation && st.notices.prune()
            };
            if expired {
                inner.bump();
            }
        });
    }
}
