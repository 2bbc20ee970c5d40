use super::classify::Record;
use super::markup::{parse_status, PageMeta};

/// Containers that only ever hold error payloads.
pub const ERROR_CONTAINERS: &[&str] = &["error", "errors"];
pub const ERROR_LEAF: &str = "message";
pub const DEFAULT_ERROR_STATUS: u16 = 400;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub enum Route {
    Main,
    Error(u16),
}

/// Decide which response tree a response-body record belongs to.
pub fn route(record: &Record, page: &PageMeta) -> Route {
    let heading_status = record.status_heading.as_deref().and_then(parse_status);

    let reserved = ERROR_CONTAINERS.contains(&record.path.container());
    let message_leaf = record.path.leaf().name == ERROR_LEAF
        && page.has_error_marker()
        && !matches!(heading_status, Some(200..=299));

    if !(reserved || message_leaf) {
        return Route::Main;
    }
    match heading_status {
        Some(code) if !(200..=299).contains(&code) => Route::Error(code),
        _ => Route::Error(DEFAULT_ERROR_STATUS),
    }
}
