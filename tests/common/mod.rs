//! Shared helpers for integration tests: a recording HTTP mock and fixtures.

#![allow(dead_code)]

use std::collections::HashMap;
use std::sync::Arc;

use axum::Router;
use axum::body::Bytes;
use axum::extract::State;
use axum::http::{HeaderMap, Method, StatusCode, Uri, header};
use axum::response::{IntoResponse, Response};
use base64::Engine;
use base64::engine::general_purpose::URL_SAFE_NO_PAD;
use parking_lot::Mutex;
use tokio::net::TcpListener;
use tokio::task::JoinHandle;

/// A canned response for one path.
#[derive(Clone)]
pub struct Route {
    pub path: String,
    pub status: StatusCode,
    pub content_type: &'static str,
    pub body: String,
}

impl Route {
    pub fn json(path: impl Into<String>, body: serde_json::Value) -> Self {
        Self {
            path: path.into(),
            status: StatusCode::OK,
            content_type: "application/json",
            body: body.to_string(),
        }
    }

    pub fn xml(path: impl Into<String>, body: impl Into<String>) -> Self {
        Self {
            path: path.into(),
            status: StatusCode::OK,
            content_type: "text/xml",
            body: body.into(),
        }
    }

    pub fn with_status(mut self, status: StatusCode) -> Self {
        self.status = status;
        self
    }
}

/// A request the mock received.
#[derive(Debug, Clone)]
pub struct Recorded {
    pub method: Method,
    pub path: String,
    pub authorization: Option<String>,
    pub body: String,
}

impl Recorded {
    /// Body decoded as `application/x-www-form-urlencoded`.
    pub fn form(&self) -> HashMap<String, String> {
        serde_urlencoded::from_str(&self.body).unwrap()
    }

    /// Body decoded as JSON.
    pub fn json(&self) -> serde_json::Value {
        serde_json::from_str(&self.body).unwrap()
    }
}

#[derive(Clone)]
struct MockState {
    routes: Arc<HashMap<String, Route>>,
    seen: Arc<Mutex<Vec<Recorded>>>,
}

/// HTTP server on an ephemeral port answering from a fixed route table.
pub struct MockServer {
    pub base: String,
    seen: Arc<Mutex<Vec<Recorded>>>,
    handle: JoinHandle<()>,
}

impl MockServer {
    /// Start a server. `routes` receives the base URL so bodies can refer
    /// back to the server (e.g. discovery documents).
    pub async fn start(routes: impl FnOnce(&str) -> Vec<Route>) -> Self {
        let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
        let base = format!("http://{}", listener.local_addr().unwrap());

        let state = MockState {
            routes: Arc::new(
                routes(&base)
                    .into_iter()
                    .map(|r| (r.path.clone(), r))
                    .collect(),
            ),
            seen: Arc::new(Mutex::new(Vec::new())),
        };
        let seen = state.seen.clone();

        let app = Router::new().fallback(respond).with_state(state);
        let handle = tokio::spawn(async move {
            axum::serve(listener, app).await.unwrap();
        });

        Self { base, seen, handle }
    }

    /// Every request received so far, in order.
    pub fn requests(&self) -> Vec<Recorded> {
        self.seen.lock().clone()
    }

    /// Requests received for `path`.
    pub fn requests_to(&self, path: &str) -> Vec<Recorded> {
        self.seen
            .lock()
            .iter()
            .filter(|r| r.path == path)
            .cloned()
            .collect()
    }
}

impl Drop for MockServer {
    fn drop(&mut self) {
        self.handle.abort();
    }
}

async fn respond(
    State(state): State<MockState>,
    method: Method,
    uri: Uri,
    headers: HeaderMap,
    body: Bytes,
) -> Response {
    state.seen.lock().push(Recorded {
        method,
        path: uri.path().to_string(),
        authorization: headers
            .get(header::AUTHORIZATION)
            .and_then(|v| v.to_str().ok())
            .map(String::from),
        body: String::from_utf8_lossy(&body).into_owned(),
    });

    match state.routes.get(uri.path()) {
        Some(route) => (
            route.status,
            [(header::CONTENT_TYPE, route.content_type)],
            route.body.clone(),
        )
            .into_response(),
        None => (StatusCode::NOT_FOUND, format!("no route for {}", uri.path())).into_response(),
    }
}

/// Discovery document and token endpoint of an OIDC issuer at `base`.
pub fn oidc_routes(base: &str, access_token: &str) -> Vec<Route> {
    vec![
        Route::json(
            "/.well-known/openid-configuration",
            serde_json::json!({
                "issuer": base,
                "token_endpoint": format!("{base}/token"),
                "scopes_supported": ["openid"],
            }),
        ),
        Route::json(
            "/token",
            serde_json::json!({
                "access_token": access_token,
                "token_type": "Bearer",
                "expires_in": 3600,
            }),
        ),
    ]
}

/// Unsigned JWT carrying `claims`.
pub fn unsigned_jwt(claims: &serde_json::Value) -> String {
    let header = URL_SAFE_NO_PAD.encode(br#"{"alg":"none","typ":"JWT"}"#);
    let payload = URL_SAFE_NO_PAD.encode(claims.to_string());
    format!("{header}.{payload}.sig")
}

/// RSA key used to sign service-account assertions in tests.
pub const SERVICE_ACCOUNT_PEM: &str = include_str!("../fixtures/gcp-sa-key.pem");
