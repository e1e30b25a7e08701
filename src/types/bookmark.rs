use serde::{Deserialize, Serialize};

/// Maximum title length accepted by the add form and the bookmarks table.
pub const MAX_TITLE_CHARS: usize = 50;

/// Represents a saved bookmark row.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct Bookmark {
    pub id: String,
    pub user_id: String,
    pub title: String,
    pub url: String,
    /// RFC 3339 timestamp in UTC. Ordering key for every listing.
    pub created_at: String,
}

impl Bookmark {
    /// Returns the host part of the bookmark URL, if it parses.
    pub fn hostname(&self) -> Option<String> {
        url::Url::parse(&self.url)
            .ok()
            .and_then(|u| u.host_str().map(str::to_string))
    }
}

/// Insert payload sent to the mutation gateway. The owner comes from the session.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct NewBookmark {
    pub title: String,
    pub url: String,
}

/// Contents of the add form.
#[derive(Debug, Clone, Default, Serialize, Deserialize, PartialEq, Eq)]
pub struct BookmarkDraft {
    pub title: String,
    pub url: String,
}
