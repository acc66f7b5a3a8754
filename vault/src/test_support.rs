//! In-crate scripted transport for unit tests.

use crate::log_sink::{LogLevel, LogSink};
use crate::transport::{ConnectOptions, Connection, Transport, VaultReply, VaultRequest};
use async_trait::async_trait;
use pipeline_common::TransportError;
use std::collections::VecDeque;
use std::sync::{Arc, Mutex};

enum Step {
    Answer(Result<VaultReply, TransportError>),
    Stall,
}

#[derive(Default)]
struct Script {
    replies: VecDeque<Step>,
    requests: Vec<VaultRequest>,
    connects: Vec<ConnectOptions>,
}

/// Answers requests from a queue, in order, and records what was sent.
#[derive(Clone, Default)]
pub struct Scripted {
    inner: Arc<Mutex<Script>>,
}

impl Scripted {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn reply(self, status: u16, body: serde_json::Value) -> Self {
        self.inner
            .lock()
            .unwrap()
            .replies
            .push_back(Step::Answer(Ok(VaultReply::new(status, body))));
        self
    }

    pub fn fail(self, error: TransportError) -> Self {
        self.inner
            .lock()
            .unwrap()
            .replies
            .push_back(Step::Answer(Err(error)));
        self
    }

    /// Next request never gets an answer.
    pub fn stall(self) -> Self {
        self.inner.lock().unwrap().replies.push_back(Step::Stall);
        self
    }

    pub fn requests(&self) -> Vec<VaultRequest> {
        self.inner.lock().unwrap().requests.clone()
    }

    pub fn connects(&self) -> Vec<ConnectOptions> {
        self.inner.lock().unwrap().connects.clone()
    }
}

#[async_trait]
impl Connection for Scripted {
    async fn send(&self, request: VaultRequest) -> Result<VaultReply, TransportError> {
        let step = {
            let mut script = self.inner.lock().unwrap();
            script.requests.push(request);
            script.replies.pop_front()
        };
        match step {
            Some(Step::Answer(reply)) => reply,
            Some(Step::Stall) => std::future::pending().await,
            None => Ok(VaultReply::new(404, serde_json::Value::Null)),
        }
    }
}

impl Transport for Scripted {
    fn connect(&self, options: &ConnectOptions) -> Result<Box<dyn Connection>, TransportError> {
        self.inner.lock().unwrap().connects.push(options.clone());
        Ok(Box::new(self.clone()))
    }
}

/// Collects run log lines.
#[derive(Default)]
pub struct Lines(Mutex<Vec<(LogLevel, String)>>);

impl Lines {
    pub fn all(&self) -> Vec<(LogLevel, String)> {
        self.0.lock().unwrap().clone()
    }

    pub fn at(&self, level: LogLevel) -> Vec<String> {
        self.all()
            .into_iter()
            .filter(|(l, _)| *l == level)
            .map(|(_, m)| m)
            .collect()
    }
}

impl LogSink for Lines {
    fn write(&self, level: LogLevel, message: &str) {
        self.0.lock().unwrap().push((level, message.to_string()));
    }
}
