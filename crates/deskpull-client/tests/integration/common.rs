use std::collections::HashMap;
use std::sync::Arc;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::time::Duration;

use axum::extract::{Path, Query, State};
use axum::http::{HeaderMap, StatusCode, header};
use axum::response::{IntoResponse, Response};
use axum::routing::{get, post};
use axum::{Json, Router};
use deskpull_client::{OAuthCredentials, OAuthTokenProvider, ReqwestTransport};
use deskpull_core::PullService;
use serde_json::{Value, json};

pub const ACCESS_TOKEN: &str = "mock-access-token";
pub const ORG_ID: &str = "org-1";
pub const REMAINING_CREDITS: i64 = 9000;

/// Requests seen by the mock desk, per kind.
#[derive(Default)]
pub struct Counters {
    pub token: AtomicUsize,
    pub listing: AtomicUsize,
    pub detail: AtomicUsize,
}

impl Counters {
    pub fn token(&self) -> usize {
        self.token.load(Ordering::SeqCst)
    }
}

struct DeskState {
    tickets: Vec<Value>,
    counters: Arc<Counters>,
}

/// A running mock desk API plus its accounts (token) endpoint.
pub struct MockDesk {
    pub base_url: String,
    pub accounts_url: String,
    pub counters: Arc<Counters>,
}

impl MockDesk {
    pub fn provider(&self, refresh_token: &str) -> OAuthTokenProvider {
        OAuthTokenProvider::new(credentials(refresh_token), &self.accounts_url).unwrap()
    }

    pub fn service(&self, org_id: &str) -> PullService<ReqwestTransport, OAuthTokenProvider> {
        PullService::new(
            ReqwestTransport::with_timeout(org_id, Duration::from_secs(5)).unwrap(),
            self.provider("valid"),
            &self.base_url,
        )
    }
}

pub fn credentials(refresh_token: &str) -> OAuthCredentials {
    OAuthCredentials {
        client_id: "1000.CLIENT".into(),
        client_secret: "client-secret".into(),
        refresh_token: refresh_token.into(),
    }
}

/// Ticket `i`: id `900i`, number `10i`, created on March `20 - i` 2024.
pub fn ticket_fixture(i: usize) -> Value {
    let day = 20 - i;
    json!({
        "id": (9000 + i).to_string(),
        "ticketNumber": (100 + i).to_string(),
        "subject": format!("Mock ticket {i}"),
        "status": "Open",
        "statusType": "Open",
        "channel": "Email",
        "threadCount": "2",
        "createdTime": format!("2024-03-{day:02}T10:15:30.000Z"),
        "modifiedTime": format!("2024-03-{day:02}T11:15:30.000Z"),
        "description": "<div>Cannot log in<br>since <b>Monday</b></div>",
        "contact": {"firstName": "Grace", "lastName": "Hopper", "email": "grace@example.com"},
    })
}

/// Serve the mock desk on a loopback port.
pub async fn start_mock_desk(ticket_count: usize) -> MockDesk {
    let counters = Arc::new(Counters::default());
    let state = Arc::new(DeskState {
        tickets: (0..ticket_count).map(ticket_fixture).collect(),
        counters: counters.clone(),
    });

    let app = Router::new()
        .route("/oauth/v2/token", post(token))
        .route("/api/v1/tickets", get(list_tickets))
        .route("/api/v1/tickets/{id}", get(get_ticket))
        .route("/api/v1/tickets/{id}/threads", get(list_threads))
        .route("/api/v1/tickets/{id}/threads/{thread_id}", get(get_thread))
        .with_state(state);

    let listener = tokio::net::TcpListener::bind("127.0.0.1:0").await.unwrap();
    let addr = listener.local_addr().unwrap();
    tokio::spawn(async move {
        axum::serve(listener, app).await.unwrap();
    });

    MockDesk {
        base_url: format!("http://{addr}/api/v1"),
        accounts_url: format!("http://{addr}"),
        counters,
    }
}

fn authorized(headers: &HeaderMap) -> bool {
    let expected = format!("Zoho-oauthtoken {ACCESS_TOKEN}");
    let auth = headers
        .get(header::AUTHORIZATION)
        .and_then(|v| v.to_str().ok());
    let org = headers.get("orgid").and_then(|v| v.to_str().ok());
    auth == Some(expected.as_str()) && org == Some(ORG_ID)
}

fn with_credits(body: Value) -> Response {
    (
        [("x-rate-limit-remaining-v3", REMAINING_CREDITS.to_string())],
        Json(body),
    )
        .into_response()
}

fn unauthorized() -> Response {
    (StatusCode::UNAUTHORIZED, r#"{"errorCode":"INVALID_OAUTH"}"#).into_response()
}

async fn token(State(state): State<Arc<DeskState>>, body: String) -> Response {
    state.counters.token.fetch_add(1, Ordering::SeqCst);
    // Slow enough for concurrent callers to pile up behind one refresh.
    tokio::time::sleep(Duration::from_millis(50)).await;

    let form: HashMap<String, String> = url::form_urlencoded::parse(body.as_bytes())
        .into_owned()
        .collect();
    if form.get("grant_type").map(String::as_str) != Some("refresh_token") {
        return (StatusCode::BAD_REQUEST, "unsupported grant").into_response();
    }

    match form.get("refresh_token").map(String::as_str) {
        Some("revoked") => {
            (StatusCode::BAD_REQUEST, Json(json!({"error": "invalid_code"}))).into_response()
        }
        Some("no-token") => Json(json!({"expires_in_sec": 3600})).into_response(),
        Some("legacy") => {
            Json(json!({"access_token": ACCESS_TOKEN, "expires_in": 7200})).into_response()
        }
        _ => Json(json!({
            "access_token": ACCESS_TOKEN,
            "expires_in_sec": 3600,
            "token_type": "Bearer",
        }))
        .into_response(),
    }
}

async fn list_tickets(
    State(state): State<Arc<DeskState>>,
    headers: HeaderMap,
    Query(query): Query<HashMap<String, String>>,
) -> Response {
    if !authorized(&headers) {
        return unauthorized();
    }
    state.counters.listing.fetch_add(1, Ordering::SeqCst);

    let from: usize = query.get("from").and_then(|v| v.parse().ok()).unwrap_or(0);
    let limit: usize = query.get("limit").and_then(|v| v.parse().ok()).unwrap_or(50);
    let page: Vec<Value> = state.tickets.iter().skip(from).take(limit).cloned().collect();
    if page.is_empty() {
        return StatusCode::NO_CONTENT.into_response();
    }
    with_credits(json!({ "data": page }))
}

async fn get_ticket(
    State(state): State<Arc<DeskState>>,
    headers: HeaderMap,
    Path(id): Path<String>,
) -> Response {
    if !authorized(&headers) {
        return unauthorized();
    }
    state.counters.detail.fetch_add(1, Ordering::SeqCst);

    match state.tickets.iter().find(|t| t["id"] == id.as_str()) {
        Some(ticket) => with_credits(ticket.clone()),
        None => (StatusCode::NOT_FOUND, "ticket not found").into_response(),
    }
}

async fn list_threads(
    State(state): State<Arc<DeskState>>,
    headers: HeaderMap,
    Path(id): Path<String>,
) -> Response {
    if !authorized(&headers) {
        return unauthorized();
    }
    state.counters.detail.fetch_add(1, Ordering::SeqCst);

    with_credits(json!({
        "data": [
            {"id": "t1", "direction": "in", "summary": format!("first on {id}")},
            {"id": "t2", "direction": "out", "summary": format!("second on {id}")},
        ]
    }))
}

async fn get_thread(
    State(state): State<Arc<DeskState>>,
    headers: HeaderMap,
    Path((id, thread_id)): Path<(String, String)>,
) -> Response {
    if !authorized(&headers) {
        return unauthorized();
    }
    state.counters.detail.fetch_add(1, Ordering::SeqCst);

    with_credits(json!({
        "id": thread_id,
        "direction": if thread_id == "t1" { "in" } else { "out" },
        "type": "email",
        "createdTime": "2024-03-01T09:00:00.000Z",
        "fromEmailAddress": "grace@example.com",
        "to": "support@example.com",
        "content": format!("<p>Reply {thread_id} on {id}</p>"),
        "hasAttach": thread_id == "t2",
    }))
}
