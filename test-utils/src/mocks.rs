//! Mock implementations for testing.
//!
//! [`MockTransport`] answers Vault requests from per-route reply queues and
//! records everything it is asked; [`RecordingLogSink`] keeps run log lines.

use async_trait::async_trait;
use pipeline_common::TransportError;
use pipeline_vault::{
    ConnectOptions, Connection, LogLevel, LogSink, Method, Transport, VaultReply, VaultRequest,
};
use std::collections::{HashMap, VecDeque};
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};

#[derive(Debug, Clone)]
enum MockReply {
    Reply(VaultReply),
    Timeout,
}

#[derive(Debug, Default)]
struct MockState {
    routes: HashMap<(Method, String), VecDeque<MockReply>>,
    requests: Vec<VaultRequest>,
    connects: Vec<ConnectOptions>,
    refuse_connect: bool,
}

/// Scriptable in-memory Vault.
///
/// Each `(method, path)` route holds a queue of replies. Replies are used in
/// order and the last one repeats. Unrouted requests get a 404.
#[derive(Debug, Clone, Default)]
pub struct MockTransport {
    state: Arc<Mutex<MockState>>,
}

impl MockTransport {
    /// Create a transport with no routes.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    fn state(&self) -> MutexGuard<'_, MockState> {
        self.state.lock().unwrap_or_else(PoisonError::into_inner)
    }

    fn push(self, method: Method, path: &str, reply: MockReply) -> Self {
        self.state()
            .routes
            .entry((method, path.trim_start_matches('/').to_string()))
            .or_default()
            .push_back(reply);
        self
    }

    /// Answer `method path` with `status` and `body`.
    #[must_use]
    pub fn route(self, method: Method, path: &str, status: u16, body: serde_json::Value) -> Self {
        self.push(method, path, MockReply::Reply(VaultReply::new(status, body)))
    }

    /// Answer `GET path` with `status` and `body`.
    #[must_use]
    pub fn get(self, path: &str, status: u16, body: serde_json::Value) -> Self {
        self.route(Method::Get, path, status, body)
    }

    /// Answer `POST path` with `status` and `body`.
    #[must_use]
    pub fn post(self, path: &str, status: u16, body: serde_json::Value) -> Self {
        self.route(Method::Post, path, status, body)
    }

    /// Answer lease revocations with `status`.
    #[must_use]
    pub fn revoke(self, status: u16) -> Self {
        self.route(Method::Put, "sys/leases/revoke", status, serde_json::Value::Null)
    }

    /// Fail `method path` with a transport timeout.
    #[must_use]
    pub fn timeout(self, method: Method, path: &str) -> Self {
        self.push(method, path, MockReply::Timeout)
    }

    /// Make every `connect` fail.
    #[must_use]
    pub fn refuse_connect(self) -> Self {
        self.state().refuse_connect = true;
        self
    }

    /// Every request sent so far, in order.
    #[must_use]
    pub fn requests(&self) -> Vec<VaultRequest> {
        self.state().requests.clone()
    }

    /// Number of requests sent to `method path`.
    #[must_use]
    pub fn count(&self, method: Method, path: &str) -> usize {
        self.state()
            .requests
            .iter()
            .filter(|r| r.method == method && r.path == path)
            .count()
    }

    /// Lease ids of every revoke request, in order.
    #[must_use]
    pub fn revoked_leases(&self) -> Vec<String> {
        self.state()
            .requests
            .iter()
            .filter(|r| r.method == Method::Put && r.path == "sys/leases/revoke")
            .filter_map(|r| r.body.as_ref()?.get("lease_id")?.as_str().map(str::to_string))
            .collect()
    }

    /// Options of every `connect` call.
    #[must_use]
    pub fn connects(&self) -> Vec<ConnectOptions> {
        self.state().connects.clone()
    }

    fn answer(&self, request: VaultRequest) -> Result<VaultReply, TransportError> {
        let mut state = self.state();
        let key = (request.method, request.path.clone());
        state.requests.push(request);

        let reply = match state.routes.get_mut(&key) {
            Some(queue) if queue.len() > 1 => queue.pop_front(),
            Some(queue) => queue.front().cloned(),
            None => None,
        };

        match reply {
            Some(MockReply::Reply(reply)) => Ok(reply),
            Some(MockReply::Timeout) => Err(TransportError::Timeout(key.1)),
            None => Ok(VaultReply::new(404, serde_json::json!({ "errors": [] }))),
        }
    }
}

struct MockConnection {
    transport: MockTransport,
}

#[async_trait]
impl Connection for MockConnection {
    async fn send(&self, request: VaultRequest) -> Result<VaultReply, TransportError> {
        self.transport.answer(request)
    }
}

impl Transport for MockTransport {
    fn connect(&self, options: &ConnectOptions) -> Result<Box<dyn Connection>, TransportError> {
        let mut state = self.state();
        state.connects.push(options.clone());
        if state.refuse_connect {
            return Err(TransportError::invalid_address(
                options.address.clone(),
                "connection refused by mock",
            ));
        }
        Ok(Box::new(MockConnection {
            transport: self.clone(),
        }))
    }
}

/// Log sink that keeps every line.
#[derive(Debug, Default)]
pub struct RecordingLogSink {
    lines: Mutex<Vec<(LogLevel, String)>>,
}

impl RecordingLogSink {
    /// Create an empty sink.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// All lines, in order.
    #[must_use]
    pub fn lines(&self) -> Vec<(LogLevel, String)> {
        self.lines
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .clone()
    }

    /// Messages logged at `level`.
    #[must_use]
    pub fn at(&self, level: LogLevel) -> Vec<String> {
        self.lines()
            .into_iter()
            .filter(|(l, _)| *l == level)
            .map(|(_, message)| message)
            .collect()
    }

    /// Whether any line contains `needle`.
    #[must_use]
    pub fn contains(&self, needle: &str) -> bool {
        self.lines().iter().any(|(_, message)| message.contains(needle))
    }
}

impl LogSink for RecordingLogSink {
    fn write(&self, level: LogLevel, message: &str) {
        self.lines
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .push((level, message.to_string()));
    }
}
