// Linkshelf state managers
// Managers hold UI-facing state: the paginated bookmark list and the transient notice.

pub mod bookmark_list;
pub mod notice_board;
