//! Relative endpoint paths of the desk API.

use std::sync::LazyLock;

use url::{Url, form_urlencoded};

static PATH_BASE: LazyLock<Url> =
    LazyLock::new(|| Url::parse("http://desk.invalid/").expect("valid base url"));

/// Join `segments` into an absolute path, percent-encoding each one so an
/// id can never add path levels or a query.
fn path(segments: &[&str]) -> String {
    let mut url = PATH_BASE.clone();
    if let Ok(mut parts) = url.path_segments_mut() {
        parts.clear().extend(segments);
    }
    url.path().to_string()
}

/// One page of the ticket listing.
///
/// A `status` of `all` (or none) lists every status.
pub fn list_tickets(from: usize, limit: usize, sort: &str, status: Option<&str>) -> String {
    let mut query = form_urlencoded::Serializer::new(String::new());
    query
        .append_pair("from", &from.to_string())
        .append_pair("limit", &limit.to_string())
        .append_pair("sortBy", sort)
        .append_pair("include", "contacts");
    if let Some(status) = status.filter(|s| !s.is_empty() && *s != "all") {
        query.append_pair("status", status);
    }
    format!("/tickets?{}", query.finish())
}

pub fn ticket(ticket_id: &str) -> String {
    path(&["tickets", ticket_id])
}

pub fn threads(ticket_id: &str) -> String {
    path(&["tickets", ticket_id, "threads"])
}

pub fn thread(ticket_id: &str, thread_id: &str) -> String {
    path(&["tickets", ticket_id, "threads", thread_id])
}
