use serde::{Deserialize, Serialize};

use super::bookmark::Bookmark;

/// Default number of bookmarks shown per page.
pub const DEFAULT_PAGE_SIZE: usize = 5;

/// Half-open record range `[from, to)` for one page.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct PageRange {
    pub from: usize,
    pub to: usize,
}

impl PageRange {
    /// Range covering the 1-based `page` for the given page size.
    ///
    /// Page 0 is treated as page 1.
    pub fn for_page(page: usize, page_size: usize) -> Self {
        let page = page.max(1);
        let from = (page - 1).saturating_mul(page_size);
        Self {
            from,
            to: from.saturating_add(page_size),
        }
    }

    pub fn len(&self) -> usize {
        self.to.saturating_sub(self.from)
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Inclusive upper bound, as used by `Range` headers.
    pub fn last_inclusive(&self) -> Option<usize> {
        if self.is_empty() {
            None
        } else {
            Some(self.to - 1)
        }
    }
}

/// Number of pages needed for `total` records: `ceil(total / page_size)`.
pub fn total_pages(total: usize, page_size: usize) -> usize {
    if page_size == 0 {
        return 0;
    }
    total.div_ceil(page_size)
}

/// Sort direction for the recency ordering.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum SortDirection {
    Ascending,
    Descending,
}

impl SortDirection {
    pub fn as_sql(&self) -> &'static str {
        match self {
            SortDirection::Ascending => "ASC",
            SortDirection::Descending => "DESC",
        }
    }

    pub fn as_rest(&self) -> &'static str {
        match self {
            SortDirection::Ascending => "asc",
            SortDirection::Descending => "desc",
        }
    }
}

/// A ranged, ordered read of one table.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RangedQuery {
    pub table: String,
    pub range: PageRange,
    pub order_by: String,
    pub direction: SortDirection,
}

impl RangedQuery {
    /// Newest-first read of the bookmarks table.
    pub fn bookmarks(range: PageRange) -> Self {
        Self {
            table: "bookmarks".to_string(),
            range,
            order_by: "created_at".to_string(),
            direction: SortDirection::Descending,
        }
    }
}

/// Rows of one ranged read together with the exact total row count.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct RangedRows {
    pub rows: Vec<Bookmark>,
    pub exact_total: usize,
}

/// The window of bookmarks currently displayed.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct PageWindow {
    pub page: usize,
    pub page_size: usize,
    pub total_count: usize,
    pub items: Vec<Bookmark>,
}

impl PageWindow {
    pub fn empty(page_size: usize) -> Self {
        Self {
            page: 1,
            page_size,
            total_count: 0,
            items: Vec::new(),
        }
    }

    pub fn total_pages(&self) -> usize {
        total_pages(self.total_count, self.page_size)
    }

    /// Last valid page index; 1 even when there are no bookmarks.
    pub fn last_page(&self) -> usize {
        self.total_pages().max(1)
    }

    pub fn contains_page(&self, page: usize) -> bool {
        page >= 1 && page <= self.last_page()
    }
}
