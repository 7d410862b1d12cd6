//! Test doubles and common utilities for the contract tests
//!
//! Everything here is deterministic: transports answer from a script,
//! sleepers record instead of waiting, and jitter is fixed.

#![allow(dead_code)]

use aci_rest_core::backoff::{Backoff, BackoffPolicy, FixedJitter, Sleeper};
use aci_rest_core::error::{Error, Result};
use aci_rest_core::traits::{Method, Transport};
use aci_rest_core::{ChildRef, LifecycleEvent, ManagedObject, Orchestrator, RestConfig};
use serde_json::{Value, json};
use std::collections::VecDeque;
use std::sync::{Arc, Mutex};
use std::time::Duration;
use tokio::sync::mpsc;

/// One request seen by a [`ScriptedTransport`]
#[derive(Debug, Clone, PartialEq)]
pub struct Recorded {
    pub method: Method,
    pub path: String,
    pub body: Option<Value>,
}

#[derive(Default)]
struct Script {
    replies: VecDeque<std::result::Result<Value, String>>,
    fallback: Option<Value>,
    requests: Vec<Recorded>,
}

/// A transport that answers from a queue of canned replies
///
/// Once the queue is empty every request gets the fallback reply, or a
/// transport error if none was set.
#[derive(Clone, Default)]
pub struct ScriptedTransport {
    script: Arc<Mutex<Script>>,
}

impl ScriptedTransport {
    pub fn new() -> Self {
        Self::default()
    }

    /// Queue a response body
    pub fn reply(self, body: Value) -> Self {
        self.script.lock().unwrap().replies.push_back(Ok(body));
        self
    }

    /// Queue a transport failure
    pub fn fail(self, message: &str) -> Self {
        self.script
            .lock()
            .unwrap()
            .replies
            .push_back(Err(message.to_string()));
        self
    }

    /// Answer every request past the queue with `body`
    pub fn always(self, body: Value) -> Self {
        self.script.lock().unwrap().fallback = Some(body);
        self
    }

    pub fn requests(&self) -> Vec<Recorded> {
        self.script.lock().unwrap().requests.clone()
    }

    pub fn request_count(&self) -> usize {
        self.script.lock().unwrap().requests.len()
    }

    pub fn methods(&self) -> Vec<Method> {
        self.requests().into_iter().map(|r| r.method).collect()
    }
}

#[async_trait::async_trait]
impl Transport for ScriptedTransport {
    async fn request(&self, method: Method, path: &str, body: Option<&Value>) -> Result<Value> {
        let mut script = self.script.lock().unwrap();
        script.requests.push(Recorded {
            method,
            path: path.to_string(),
            body: body.cloned(),
        });

        match script.replies.pop_front() {
            Some(Ok(body)) => Ok(body),
            Some(Err(message)) => Err(Error::transport(message)),
            None => script
                .fallback
                .clone()
                .ok_or_else(|| Error::transport("script exhausted")),
        }
    }

    fn transport_name(&self) -> &'static str {
        "scripted"
    }
}

/// A sleeper that records requested delays and returns immediately
#[derive(Clone, Default)]
pub struct RecordingSleeper {
    slept: Arc<Mutex<Vec<Duration>>>,
}

impl RecordingSleeper {
    pub fn delays(&self) -> Vec<Duration> {
        self.slept.lock().unwrap().clone()
    }
}

#[async_trait::async_trait]
impl Sleeper for RecordingSleeper {
    async fn sleep(&self, duration: Duration) {
        self.slept.lock().unwrap().push(duration);
    }
}

/// A sleeper that never wakes up
pub struct PendingSleeper;

#[async_trait::async_trait]
impl Sleeper for PendingSleeper {
    async fn sleep(&self, _duration: Duration) {
        std::future::pending::<()>().await;
    }
}

/// Configuration with a password and the given retry bound
pub fn test_config(retries: u32) -> RestConfig {
    RestConfig::new("https://apic.test", "admin")
        .with_password("secret")
        .with_retries(retries)
}

/// Backoff with the default schedule, a recording sleeper and zero jitter
pub fn recording_backoff() -> (Backoff, RecordingSleeper) {
    let sleeper = RecordingSleeper::default();
    let backoff = Backoff::new(BackoffPolicy::default())
        .with_sleeper(Arc::new(sleeper.clone()))
        .with_jitter(Arc::new(FixedJitter(0.0)));
    (backoff, sleeper)
}

/// Orchestrator over `transport` that never really sleeps
pub fn orchestrator<T: Transport + 'static>(
    transport: T,
    config: &RestConfig,
) -> (Orchestrator, mpsc::Receiver<LifecycleEvent>, RecordingSleeper) {
    let (orchestrator, events) =
        Orchestrator::new(Box::new(transport), config).expect("orchestrator construction succeeds");
    let (backoff, sleeper) = recording_backoff();
    (orchestrator.with_backoff(backoff), events, sleeper)
}

/// Every event emitted so far
pub fn drain(events: &mut mpsc::Receiver<LifecycleEvent>) -> Vec<LifecycleEvent> {
    let mut seen = Vec::new();
    while let Ok(event) = events.try_recv() {
        seen.push(event);
    }
    seen
}

/// Tenant "a" with a tracked description
pub fn tenant() -> ManagedObject {
    ManagedObject::new("uni/tn-a", "fvTenant")
        .with_attr("name", "a")
        .with_attr("descr", "desired")
}

/// Tenant "a" declaring one VRF child
pub fn tenant_with_ctx(ctx: &str) -> ManagedObject {
    tenant().with_child(ChildRef::new(format!("ctx-{}", ctx), "fvCtx").with_attr("name", ctx))
}

/// A GET response for tenant "a"
pub fn tenant_response(descr: &str, children: Vec<Value>) -> Value {
    json!({
        "totalCount": "1",
        "imdata": [{
            "fvTenant": {
                "attributes": {
                    "dn": "uni/tn-a",
                    "name": "a",
                    "descr": descr,
                    "modTs": "2024-05-01T10:00:00.000+00:00"
                },
                "children": children
            }
        }]
    })
}

/// A child entry for [`tenant_response`]
pub fn ctx_entry(name: &str) -> Value {
    json!({ "fvCtx": { "attributes": { "rn": format!("ctx-{}", name), "name": name } } })
}

/// Successful write reply
pub fn ok_reply() -> Value {
    json!({ "totalCount": "0", "imdata": [] })
}

/// Error document reply
pub fn error_reply(code: &str, text: &str) -> Value {
    json!({
        "totalCount": "1",
        "imdata": [ { "error": { "attributes": { "code": code, "text": text } } } ]
    })
}
