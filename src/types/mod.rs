// Linkshelf shared type definitions
// Each submodule defines types used across the client: bookmarks, pages, notices, sessions, settings, errors.

pub mod bookmark;
pub mod errors;
pub mod notice;
pub mod page;
pub mod session;
pub mod settings;
