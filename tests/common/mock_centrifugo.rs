//! In-process stand-in for the Centrifugo HTTP server API.
//!
//! Keeps per-channel history, deduplicates publications on
//! `(channel, idempotency_key)` and can be told to fail a method a number of
//! times, either before or after applying it. [`MockState`] is shared with
//! the gRPC mock, which answers from the same state.

use std::collections::{HashMap, HashSet};
use std::net::SocketAddr;
use std::sync::Arc;

use axum::extract::{Path, State};
use axum::http::{HeaderMap, StatusCode};
use axum::response::{IntoResponse, Response};
use axum::routing::post;
use axum::{Json, Router};
use parking_lot::Mutex;
use serde_json::{json, Value};
use tokio::task::JoinHandle;

pub const TEST_API_KEY: &str = "test_key";
pub const EPOCH: &str = "mock-epoch";

/// Error code for publishing into a rejected channel
pub const UNKNOWN_CHANNEL: u32 = 102;

/// A request the mock received, auth included
#[derive(Debug, Clone)]
pub struct RecordedRequest {
    pub method: String,
    pub body: Value,
    pub authorization: Option<String>,
}

#[derive(Debug, Clone, Copy)]
struct Failure {
    remaining: u32,
    apply_first: bool,
}

/// Calls answered before reaching the API
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Rejection {
    Unauthorized,
    Injected,
}

/// Outcome of one API call: the result, or an `(code, message)` error object
pub type ApiOutcome = Result<Value, (u32, String)>;

#[derive(Debug, Default)]
pub struct MockState {
    history: HashMap<String, Vec<Value>>,
    offsets: HashMap<String, u64>,
    seen_keys: HashSet<(String, String)>,
    failures: HashMap<String, Failure>,
    rejected_channels: HashSet<String>,
    requests: Vec<RecordedRequest>,
}

impl MockState {
    /// Record, authenticate and run one call.
    ///
    /// A batch answers `{"replies": [...]}` with one object per command.
    pub fn handle(
        &mut self,
        method: &str,
        body: Value,
        authorization: Option<String>,
    ) -> Result<ApiOutcome, Rejection> {
        self.requests.push(RecordedRequest {
            method: method.to_string(),
            body: body.clone(),
            authorization: authorization.clone(),
        });

        let expected = format!("apikey {TEST_API_KEY}");
        if authorization.as_deref() != Some(expected.as_str()) {
            return Err(Rejection::Unauthorized);
        }

        if let Some(failure) = self.take_failure(method) {
            if failure.apply_first {
                let _ = self.run(method, &body);
            }
            return Err(Rejection::Injected);
        }
        Ok(self.run(method, &body))
    }

    fn run(&mut self, method: &str, body: &Value) -> ApiOutcome {
        if method != "batch" {
            return self.apply(method, body);
        }
        let commands = body
            .get("commands")
            .and_then(Value::as_array)
            .cloned()
            .unwrap_or_default();
        let replies: Vec<Value> = commands
            .iter()
            .map(|command| {
                let Some((name, params)) = command.as_object().and_then(|c| c.iter().next())
                else {
                    return json!({ "error": { "code": 107, "message": "bad request" } });
                };
                match self.apply(name, params) {
                    Ok(result) => json!({ name.as_str(): result }),
                    Err((code, message)) => {
                        json!({ "error": { "code": code, "message": message } })
                    }
                }
            })
            .collect();
        Ok(json!({ "replies": replies }))
    }

    fn publish(&mut self, channel: &str, body: &Value) -> Value {
        if let Some(key) = body.get("idempotency_key").and_then(Value::as_str) {
            if !self
                .seen_keys
                .insert((channel.to_string(), key.to_string()))
            {
                let offset = self.offsets.get(channel).copied().unwrap_or(0);
                return json!({ "offset": offset, "epoch": EPOCH });
            }
        }

        let offset = self.offsets.entry(channel.to_string()).or_insert(0);
        *offset += 1;
        let publication = json!({
            "data": body.get("data").cloned().unwrap_or(Value::Null),
            "offset": *offset,
            "tags": body.get("tags").cloned().unwrap_or_else(|| json!({})),
        });
        let offset = *offset;
        self.history
            .entry(channel.to_string())
            .or_default()
            .push(publication);
        json!({ "offset": offset, "epoch": EPOCH })
    }

    fn unknown_channel() -> (u32, String) {
        (UNKNOWN_CHANNEL, "unknown channel".to_string())
    }

    fn apply(&mut self, method: &str, body: &Value) -> ApiOutcome {
        let channel = body
            .get("channel")
            .and_then(Value::as_str)
            .unwrap_or_default()
            .to_string();

        match method {
            "publish" if self.rejected_channels.contains(&channel) => {
                Err(Self::unknown_channel())
            }
            "publish" => Ok(self.publish(&channel, body)),
            "broadcast" => {
                let channels: Vec<String> = body
                    .get("channels")
                    .and_then(Value::as_array)
                    .map(|list| {
                        list.iter()
                            .filter_map(Value::as_str)
                            .map(str::to_string)
                            .collect()
                    })
                    .unwrap_or_default();
                let responses: Vec<Value> = channels
                    .iter()
                    .map(|channel| {
                        if self.rejected_channels.contains(channel) {
                            let (code, message) = Self::unknown_channel();
                            json!({ "error": { "code": code, "message": message } })
                        } else {
                            json!({ "result": self.publish(channel, body) })
                        }
                    })
                    .collect();
                Ok(json!({ "responses": responses }))
            }
            "history" => {
                let limit = body.get("limit").and_then(Value::as_u64).unwrap_or(0) as usize;
                let reverse = body.get("reverse").and_then(Value::as_bool).unwrap_or(false);
                let stored = self.history.get(&channel).cloned().unwrap_or_default();
                let publications: Vec<Value> = if reverse {
                    stored.into_iter().rev().take(limit).collect()
                } else {
                    stored.into_iter().take(limit).collect()
                };
                let offset = self.offsets.get(&channel).copied().unwrap_or(0);
                Ok(json!({
                    "publications": publications,
                    "offset": offset,
                    "epoch": EPOCH,
                }))
            }
            "history_remove" => {
                self.history.remove(&channel);
                Ok(json!({}))
            }
            "presence" => Ok(json!({
                "presence": {
                    "client-1": { "user": "u1", "client": "client-1" }
                }
            })),
            "presence_stats" => Ok(json!({ "num_clients": 1, "num_users": 1 })),
            "channels" => {
                let pattern = body.get("pattern").and_then(Value::as_str);
                let channels: serde_json::Map<String, Value> = self
                    .history
                    .keys()
                    .filter(|name| matches_pattern(name, pattern))
                    .map(|name| (name.clone(), json!({ "num_clients": 0 })))
                    .collect();
                Ok(json!({ "channels": channels }))
            }
            "info" => Ok(json!({
                "nodes": [{
                    "uid": "node-1",
                    "name": "mock",
                    "version": "5.4.0",
                    "num_clients": 2,
                    "num_users": 1,
                    "num_channels": self.history.len(),
                    "num_subs": 2,
                    "uptime": 60
                }]
            })),
            "subscribe" | "unsubscribe" | "disconnect" | "refresh" => Ok(json!({})),
            other => Err((102, format!("unknown method {other}"))),
        }
    }

    pub fn inject_failure(&mut self, method: &str, times: u32, apply_first: bool) {
        self.failures.insert(
            method.to_string(),
            Failure {
                remaining: times,
                apply_first,
            },
        );
    }

    pub fn reject_channel(&mut self, channel: &str) {
        self.rejected_channels.insert(channel.to_string());
    }

    pub fn history_len(&self, channel: &str) -> usize {
        self.history.get(channel).map_or(0, Vec::len)
    }

    pub fn requests_for(&self, method: &str) -> Vec<RecordedRequest> {
        self.requests
            .iter()
            .filter(|r| r.method == method)
            .cloned()
            .collect()
    }

    fn take_failure(&mut self, method: &str) -> Option<Failure> {
        let failure = self.failures.get_mut(method)?;
        if failure.remaining == 0 {
            return None;
        }
        failure.remaining -= 1;
        Some(*failure)
    }
}

fn matches_pattern(name: &str, pattern: Option<&str>) -> bool {
    match pattern {
        None | Some("") => true,
        Some(pattern) => match pattern.strip_suffix('*') {
            Some(prefix) => name.starts_with(prefix),
            None => name == pattern,
        },
    }
}

pub type SharedState = Arc<Mutex<MockState>>;

async fn api(
    State(state): State<SharedState>,
    Path(method): Path<String>,
    headers: HeaderMap,
    Json(body): Json<Value>,
) -> Response {
    let authorization = headers
        .get("authorization")
        .and_then(|v| v.to_str().ok())
        .map(str::to_string);

    let outcome = state.lock().handle(&method, body, authorization);
    match outcome {
        Err(Rejection::Unauthorized) => (StatusCode::UNAUTHORIZED, "unauthorized").into_response(),
        Err(Rejection::Injected) => {
            (StatusCode::INTERNAL_SERVER_ERROR, "injected failure").into_response()
        }
        Ok(Ok(result)) if method == "batch" => Json(result).into_response(),
        Ok(Ok(result)) => Json(json!({ "result": result })).into_response(),
        Ok(Err((code, message))) => {
            Json(json!({ "error": { "code": code, "message": message } })).into_response()
        }
    }
}

/// Running mock server bound to an ephemeral local port
pub struct MockCentrifugo {
    addr: SocketAddr,
    state: SharedState,
    server: JoinHandle<()>,
}

impl MockCentrifugo {
    pub async fn start() -> Self {
        let state = SharedState::default();
        let router = Router::new()
            .route("/api/:method", post(api))
            .with_state(state.clone());

        let listener = tokio::net::TcpListener::bind("127.0.0.1:0")
            .await
            .expect("bind mock server");
        let addr = listener.local_addr().expect("mock server address");
        let server = tokio::spawn(async move {
            axum::serve(listener, router).await.expect("mock server");
        });

        Self {
            addr,
            state,
            server,
        }
    }

    pub fn endpoint(&self) -> String {
        format!("http://{}", self.addr)
    }

    pub fn state(&self) -> &SharedState {
        &self.state
    }

    /// Answer the next `times` calls of `method` with a 500, after applying them
    pub fn fail_after_apply(&self, method: &str, times: u32) {
        self.state.lock().inject_failure(method, times, true);
    }

    /// Answer the next `times` calls of `method` with a 500 without applying them
    pub fn fail(&self, method: &str, times: u32) {
        self.state.lock().inject_failure(method, times, false);
    }

    /// Publishing into `channel` fails with [`UNKNOWN_CHANNEL`]
    pub fn reject_channel(&self, channel: &str) {
        self.state.lock().reject_channel(channel);
    }

    pub fn history_len(&self, channel: &str) -> usize {
        self.state.lock().history_len(channel)
    }

    pub fn requests(&self) -> Vec<RecordedRequest> {
        self.state.lock().requests.clone()
    }

    pub fn requests_for(&self, method: &str) -> Vec<RecordedRequest> {
        self.state.lock().requests_for(method)
    }
}

impl Drop for MockCentrifugo {
    fn drop(&mut self) {
        self.server.abort();
    }
}
