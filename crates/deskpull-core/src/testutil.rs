//! Test utilities: handwritten mocks of the core traits.
//!
//! All mocks keep their state behind `Arc<Mutex<_>>` so clones handed to
//! the code under test stay observable from the test body.

use std::collections::{HashMap, HashSet, VecDeque};
use std::path::PathBuf;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;

use serde_json::{Value, json};

use crate::error::AppError;
use crate::fetcher::DeskFetcher;
use crate::models::Ticket;
use crate::pull::{PullEvent, PullReporter, PullService};
use crate::rate_limit::RateLimiter;
use crate::traits::{ApiResponse, StaticToken, TicketSink, TokenProvider, Transport};

/// Base URL every mock-backed fetcher uses.
pub const MOCK_BASE: &str = "http://desk.test/api/v1";

// ---------------------------------------------------------------------------
// MockTransport
// ---------------------------------------------------------------------------

#[derive(Default)]
struct Script {
    /// One-shot replies per path, consumed in order.
    queued: HashMap<String, VecDeque<Result<ApiResponse, AppError>>>,
    /// Reply used once the queue of a path is empty.
    fallback: HashMap<String, ApiResponse>,
    /// Every requested endpoint, query included, in call order.
    requests: Vec<String>,
}

/// Scripted transport keyed by endpoint path (query string ignored).
///
/// Paths with nothing scripted answer `204` with an empty body, which the
/// fetcher reads as an empty list.
#[derive(Clone, Default)]
pub struct MockTransport {
    script: Arc<Mutex<Script>>,
    delay: Duration,
    in_flight: Arc<AtomicUsize>,
    peak: Arc<AtomicUsize>,
}

impl MockTransport {
    pub fn new() -> Self {
        Self::default()
    }

    /// Hold every response for `delay`, so concurrent calls overlap.
    pub fn with_delay(mut self, delay: Duration) -> Self {
        self.delay = delay;
        self
    }

    pub fn respond(&self, path: &str, response: ApiResponse) {
        self.push(path, Ok(response));
    }

    pub fn respond_json(&self, path: &str, body: Value) {
        self.respond(path, ApiResponse::new(200, body.to_string()));
    }

    pub fn respond_always(&self, path: &str, response: ApiResponse) {
        self.script
            .lock()
            .unwrap()
            .fallback
            .insert(path.to_string(), response);
    }

    pub fn fail(&self, path: &str, error: AppError) {
        self.push(path, Err(error));
    }

    pub fn requests(&self) -> Vec<String> {
        self.script.lock().unwrap().requests.clone()
    }

    /// Number of requests whose path equals `path`.
    pub fn calls_to(&self, path: &str) -> usize {
        self.requests()
            .iter()
            .filter(|r| path_of(r) == path)
            .count()
    }

    /// Highest number of requests that were in flight at once.
    pub fn peak_in_flight(&self) -> usize {
        self.peak.load(Ordering::SeqCst)
    }

    fn push(&self, path: &str, reply: Result<ApiResponse, AppError>) {
        self.script
            .lock()
            .unwrap()
            .queued
            .entry(path.to_string())
            .or_default()
            .push_back(reply);
    }

    fn next_reply(&self, endpoint: &str) -> Result<ApiResponse, AppError> {
        let mut script = self.script.lock().unwrap();
        script.requests.push(endpoint.to_string());
        let path = path_of(endpoint);
        if let Some(reply) = script.queued.get_mut(path).and_then(VecDeque::pop_front) {
            return reply;
        }
        Ok(script
            .fallback
            .get(path)
            .cloned()
            .unwrap_or_else(|| ApiResponse::new(204, "")))
    }
}

impl Transport for MockTransport {
    async fn get(&self, url: &str, _access_token: &str) -> Result<ApiResponse, AppError> {
        let endpoint = url.strip_prefix(MOCK_BASE).unwrap_or(url);

        let now = self.in_flight.fetch_add(1, Ordering::SeqCst) + 1;
        self.peak.fetch_max(now, Ordering::SeqCst);
        if !self.delay.is_zero() {
            tokio::time::sleep(self.delay).await;
        }
        let reply = self.next_reply(endpoint);
        self.in_flight.fetch_sub(1, Ordering::SeqCst);
        reply
    }
}

fn path_of(endpoint: &str) -> &str {
    endpoint.split('?').next().unwrap_or(endpoint)
}

// ---------------------------------------------------------------------------
// Tokens
// ---------------------------------------------------------------------------

/// Token provider whose refresh always fails.
#[derive(Clone)]
pub struct FailingTokens;

impl TokenProvider for FailingTokens {
    async fn access_token(&self) -> Result<String, AppError> {
        Err(AppError::AuthError("refresh token revoked".into()))
    }
}

pub fn fetcher_with(transport: MockTransport) -> DeskFetcher<MockTransport, StaticToken> {
    DeskFetcher::new(
        transport,
        StaticToken("test-token".into()),
        MOCK_BASE,
        RateLimiter::default(),
    )
}

pub fn service_with(transport: MockTransport) -> PullService<MockTransport, StaticToken> {
    PullService::new(transport, StaticToken("test-token".into()), MOCK_BASE)
}

// ---------------------------------------------------------------------------
// Fixtures
// ---------------------------------------------------------------------------

/// Raw listing entry with the given id and timestamps.
pub fn raw_ticket(id: u32, created: &str, modified: &str) -> Value {
    json!({
        "id": id.to_string(),
        "ticketNumber": (1000 + id).to_string(),
        "subject": format!("Ticket {id}"),
        "status": "Open",
        "createdTime": created,
        "modifiedTime": modified,
    })
}

/// `count` listing entries, newest first, one hour apart from 2024-03-10.
pub fn listing(start: u32, count: u32) -> Value {
    let items: Vec<Value> = (start..start + count)
        .map(|i| {
            let at = chrono::DateTime::parse_from_rfc3339("2024-03-10T12:00:00Z")
                .unwrap()
                .with_timezone(&chrono::Utc)
                - chrono::Duration::hours(i64::from(i));
            let ts = at.to_rfc3339_opts(chrono::SecondsFormat::Millis, true);
            raw_ticket(i, &ts, &ts)
        })
        .collect();
    json!({ "data": items })
}

// ---------------------------------------------------------------------------
// MemorySink
// ---------------------------------------------------------------------------

/// Sink that keeps written tickets in memory.
#[derive(Clone, Default)]
pub struct MemorySink {
    written: Arc<Mutex<Vec<Ticket>>>,
    reject: HashSet<String>,
}

impl MemorySink {
    pub fn new() -> Self {
        Self::default()
    }

    /// Fail writes of the ticket with this label.
    pub fn rejecting(mut self, label: &str) -> Self {
        self.reject.insert(label.to_string());
        self
    }

    pub fn written(&self) -> Vec<Ticket> {
        self.written.lock().unwrap().clone()
    }
}

impl TicketSink for MemorySink {
    fn write(&self, ticket: &Ticket) -> Result<PathBuf, AppError> {
        if self.reject.contains(ticket.label()) {
            return Err(AppError::Io(std::io::Error::other("disk full")));
        }
        self.written.lock().unwrap().push(ticket.clone());
        Ok(PathBuf::from(format!("{}.txt", ticket.label())))
    }
}

// ---------------------------------------------------------------------------
// MockReporter
// ---------------------------------------------------------------------------

/// Reporter recording the debug form of every event.
#[derive(Clone, Default)]
pub struct MockReporter {
    events: Arc<Mutex<Vec<String>>>,
}

impl MockReporter {
    pub fn events(&self) -> Vec<String> {
        self.events.lock().unwrap().clone()
    }

    /// Number of recorded events of the given variant.
    pub fn count(&self, variant: &str) -> usize {
        self.events()
            .iter()
            .filter(|e| e.starts_with(variant))
            .count()
    }
}

impl PullReporter for MockReporter {
    fn report(&self, event: PullEvent<'_>) {
        self.events.lock().unwrap().push(format!("{event:?}"));
    }
}
