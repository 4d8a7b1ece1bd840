//! Scripted Transport
//!
//! In-process transport that answers from a script instead of the network.
//! Used by the test suites.

use std::collections::{HashMap, VecDeque};
use std::sync::{Mutex, MutexGuard, PoisonError};
use std::time::Duration;

use async_trait::async_trait;
use serde_json::{json, Value};
use tokio::time::Instant;

use crate::cache::{FingerprintBuilder, Params};
use crate::error::Result;
use crate::fetch::{Transport, UpstreamResponse};

type Scripted = Result<UpstreamResponse>;

/// One call observed by the transport.
#[derive(Debug, Clone)]
pub struct RecordedCall {
    pub endpoint: String,
    pub params: Params,
    pub at: Instant,
}

#[derive(Debug, Default)]
struct Script {
    queued: HashMap<String, VecDeque<Scripted>>,
    sticky: HashMap<String, Scripted>,
    fallback: Option<Scripted>,
    calls: Vec<RecordedCall>,
}

// == Scripted Transport ==
#[derive(Debug, Default)]
pub struct ScriptedTransport {
    script: Mutex<Script>,
    latency: Duration,
}

fn route(endpoint: &str, params: &Params) -> String {
    FingerprintBuilder::new(endpoint)
        .params(params.iter().map(|(k, v)| (k.clone(), v.clone())))
        .canonical()
}

fn to_params(pairs: &[(&str, &str)]) -> Params {
    pairs
        .iter()
        .map(|(k, v)| (k.to_string(), v.to_string()))
        .collect()
}

/// Body shaped like the upstream envelope around `items`.
pub fn envelope_body(endpoint: &str, items: Vec<Value>) -> Vec<u8> {
    json!({
        "get": endpoint,
        "parameters": {},
        "errors": [],
        "results": items.len(),
        "paging": {"current": 1, "total": 1},
        "response": items,
    })
    .to_string()
    .into_bytes()
}

impl ScriptedTransport {
    pub fn new() -> Self {
        Self::default()
    }

    /// Delays every answer, simulating network time.
    pub fn with_latency(mut self, latency: Duration) -> Self {
        self.latency = latency;
        self
    }

    fn lock(&self) -> MutexGuard<'_, Script> {
        self.script.lock().unwrap_or_else(PoisonError::into_inner)
    }

    /// Answers every call for this request with an envelope around `items`.
    pub fn respond(&self, endpoint: &str, params: &[(&str, &str)], items: Vec<Value>) {
        let body = envelope_body(endpoint, items);
        self.lock()
            .sticky
            .insert(route(endpoint, &to_params(params)), Ok(UpstreamResponse::ok(body)));
    }

    /// Answers every call for this request with `response`.
    pub fn respond_with(&self, endpoint: &str, params: &[(&str, &str)], response: Scripted) {
        self.lock()
            .sticky
            .insert(route(endpoint, &to_params(params)), response);
    }

    /// Queues a one-shot answer, consumed before any sticky answer.
    pub fn enqueue(&self, endpoint: &str, params: &[(&str, &str)], response: Scripted) {
        self.lock()
            .queued
            .entry(route(endpoint, &to_params(params)))
            .or_default()
            .push_back(response);
    }

    /// Answer for requests with no script of their own.
    pub fn fallback(&self, response: Scripted) {
        self.lock().fallback = Some(response);
    }

    pub fn calls(&self) -> Vec<RecordedCall> {
        self.lock().calls.clone()
    }

    pub fn call_count(&self) -> usize {
        self.lock().calls.len()
    }

    fn answer(&self, endpoint: &str, params: &Params) -> Scripted {
        let key = route(endpoint, params);
        let mut script = self.lock();
        script.calls.push(RecordedCall {
            endpoint: endpoint.to_string(),
            params: params.clone(),
            at: Instant::now(),
        });

        if let Some(next) = script.queued.get_mut(&key).and_then(VecDeque::pop_front) {
            return next;
        }
        if let Some(sticky) = script.sticky.get(&key) {
            return sticky.clone();
        }
        script
            .fallback
            .clone()
            .unwrap_or_else(|| Ok(UpstreamResponse::ok(envelope_body(endpoint, Vec::new()))))
    }
}

#[async_trait]
impl Transport for ScriptedTransport {
    fn name(&self) -> &'static str {
        "scripted"
    }

    async fn call(&self, endpoint: &str, params: &Params) -> Result<UpstreamResponse> {
        let answer = self.answer(endpoint, params);
        if !self.latency.is_zero() {
            tokio::time::sleep(self.latency).await;
        }
        answer
    }
}
