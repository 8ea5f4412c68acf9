use std::time::Duration;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::Value;

use crate::html::strip_html;

/// Requester of a ticket.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct Contact {
    pub name: String,
    pub email: String,
}

/// A normalized ticket, the unit written to one output file.
///
/// Everything but `threads` is fixed at listing time; enrichment only
/// appends to `threads`.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct Ticket {
    pub ticket_id: String,
    pub ticket_number: String,
    pub subject: String,
    pub status: String,
    pub status_type: String,
    pub priority: String,
    pub category: String,
    pub sub_category: String,
    pub channel: String,
    pub sentiment: String,
    pub created_time: String,
    pub modified_time: String,
    pub closed_time: String,
    pub due_date: String,
    pub response_due_date: String,
    pub customer_response_time: String,
    pub thread_count: u64,
    pub department_id: String,
    pub assignee_id: String,
    pub contact: Option<Contact>,
    pub description: String,
    pub threads: Vec<Thread>,
}

impl Ticket {
    /// Normalize a raw listing or detail entry. Missing fields default to
    /// empty values so schema drift never fails a run.
    pub fn from_raw(raw: &Value) -> Self {
        Self {
            ticket_id: text(raw, "id"),
            ticket_number: text(raw, "ticketNumber"),
            subject: text(raw, "subject"),
            status: text(raw, "status"),
            status_type: text(raw, "statusType"),
            priority: text(raw, "priority"),
            category: text(raw, "category"),
            sub_category: text(raw, "subCategory"),
            channel: text(raw, "channel"),
            sentiment: text(raw, "sentiment"),
            created_time: text(raw, "createdTime"),
            modified_time: text(raw, "modifiedTime"),
            closed_time: text(raw, "closedTime"),
            due_date: text(raw, "dueDate"),
            response_due_date: text(raw, "responseDueDate"),
            customer_response_time: text(raw, "customerResponseTime"),
            thread_count: count(raw, "threadCount"),
            department_id: text(raw, "departmentId"),
            assignee_id: text(raw, "assigneeId"),
            contact: contact(raw),
            description: strip_html(&text(raw, "description")),
            threads: Vec::new(),
        }
    }

    /// Timestamp used by the time-window filter: last modification,
    /// then creation, then the Unix epoch.
    pub fn activity_time(&self) -> DateTime<Utc> {
        parse_time(&self.modified_time)
            .or_else(|| parse_time(&self.created_time))
            .unwrap_or(DateTime::<Utc>::UNIX_EPOCH)
    }

    /// Timestamp that decides where the ticket lands on disk: creation,
    /// then last modification, then now.
    pub fn placement_time(&self) -> DateTime<Utc> {
        parse_time(&self.created_time)
            .or_else(|| parse_time(&self.modified_time))
            .unwrap_or_else(Utc::now)
    }

    /// Stable per-ticket label for file names and progress lines.
    pub fn label(&self) -> &str {
        if self.ticket_number.is_empty() {
            &self.ticket_id
        } else {
            &self.ticket_number
        }
    }
}

/// One message/comment on a ticket.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct Thread {
    pub thread_id: String,
    pub direction: String,
    #[serde(rename = "type")]
    pub kind: String,
    pub created_time: String,
    pub from_email: String,
    pub to_email: String,
    pub content: String,
    pub has_attachment: bool,
}

impl Thread {
    /// Normalize a full thread or, as a fallback, a thread-list summary.
    pub fn from_raw(raw: &Value) -> Self {
        let content = first_text(raw, &["content", "plainText"]);
        Self {
            thread_id: text(raw, "id"),
            direction: text(raw, "direction"),
            kind: text(raw, "type"),
            created_time: text(raw, "createdTime"),
            from_email: first_text(raw, &["fromEmailAddress", "from"]),
            to_email: text(raw, "to"),
            content: strip_html(&content),
            has_attachment: flag(raw, "hasAttach") || flag(raw, "hasAttachment"),
        }
    }
}

/// Totals of one pull run.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct PullResult {
    /// Tickets accepted from the listing.
    pub tickets: usize,
    /// Tickets successfully written to the sink.
    pub written: usize,
    pub write_failures: usize,
    pub api_calls: u64,
    /// Thread fetches that degraded or failed during enrichment.
    pub errors: u64,
    pub elapsed: Duration,
    pub remaining_credits: Option<i64>,
}

/// Items of a listing response: either a bare array or `{ "data": [...] }`.
/// Anything else (including an empty 204 body) yields no items.
pub fn items_of(body: &Value) -> Vec<Value> {
    match body {
        Value::Array(items) => items.clone(),
        Value::Object(map) => match map.get("data") {
            Some(Value::Array(items)) => items.clone(),
            _ => Vec::new(),
        },
        _ => Vec::new(),
    }
}

/// Parse an API timestamp (RFC 3339, e.g. `2024-03-01T10:20:30.000Z`).
pub fn parse_time(value: &str) -> Option<DateTime<Utc>> {
    if value.is_empty() {
        return None;
    }
    DateTime::parse_from_rfc3339(value)
        .ok()
        .map(|t| t.with_timezone(&Utc))
}

/// String value of a field; numbers are rendered, null/absent is empty.
pub(crate) fn text(raw: &Value, key: &str) -> String {
    match raw.get(key) {
        Some(Value::String(s)) => s.clone(),
        Some(Value::Number(n)) => n.to_string(),
        Some(Value::Bool(b)) => b.to_string(),
        _ => String::new(),
    }
}

fn first_text(raw: &Value, keys: &[&str]) -> String {
    keys.iter()
        .map(|k| text(raw, k))
        .find(|v| !v.is_empty())
        .unwrap_or_default()
}

fn count(raw: &Value, key: &str) -> u64 {
    match raw.get(key) {
        Some(Value::Number(n)) => n.as_u64().unwrap_or(0),
        Some(Value::String(s)) => s.trim().parse().unwrap_or(0),
        _ => 0,
    }
}

fn flag(raw: &Value, key: &str) -> bool {
    match raw.get(key) {
        Some(Value::Bool(b)) => *b,
        Some(Value::String(s)) => s == "true",
        Some(Value::Number(n)) => n.as_u64().is_some_and(|n| n != 0),
        _ => false,
    }
}

fn contact(raw: &Value) -> Option<Contact> {
    match raw.get("contact") {
        Some(c @ Value::Object(_)) => {
            let first = text(c, "firstName");
            let last = text(c, "lastName");
            let name = if last.is_empty() {
                first_text(c, &["firstName", "name"])
            } else {
                format!("{first} {last}").trim().to_string()
            };
            Some(Contact {
                name,
                email: text(c, "email"),
            })
        }
        _ => {
            let email = text(raw, "email");
            (!email.is_empty()).then(|| Contact {
                name: String::new(),
                email,
            })
        }
    }
}
