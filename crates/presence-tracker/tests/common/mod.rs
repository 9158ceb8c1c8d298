//! In-memory stand-ins for the SSH transport and the MQTT broker.

#![allow(dead_code)]

use std::collections::HashMap;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Mutex;
use std::time::Duration;

use async_trait::async_trait;
use serde_json::json;

use presence_broker::{BrokerError, Publisher, RetainedMessage, RetainedReader};
use presence_tracker::remote::{RemoteExecutor, RemoteFailure, RemoteOutput};

/// Canned answer for one access point.
#[derive(Clone)]
pub enum Reply {
    Output(Vec<u8>),
    Fail(RemoteFailure),
}

/// Serves canned `mca-dump` output per host and counts calls.
#[derive(Default)]
pub struct FakeExecutor {
    replies: Mutex<HashMap<String, Reply>>,
    delays: HashMap<String, Duration>,
    calls: AtomicUsize,
}

impl FakeExecutor {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn reply(self, host: &str, reply: Reply) -> Self {
        self.set(host, reply);
        self
    }

    /// Delay the answer for `host`, to shape completion order.
    pub fn delay(mut self, host: &str, delay: Duration) -> Self {
        self.delays.insert(host.to_string(), delay);
        self
    }

    pub fn set(&self, host: &str, reply: Reply) {
        self.replies
            .lock()
            .unwrap()
            .insert(host.to_string(), reply);
    }

    pub fn calls(&self) -> usize {
        self.calls.load(Ordering::SeqCst)
    }
}

#[async_trait]
impl RemoteExecutor for FakeExecutor {
    async fn execute(
        &self,
        _user: &str,
        host: &str,
        _command: &str,
    ) -> Result<RemoteOutput, RemoteFailure> {
        self.calls.fetch_add(1, Ordering::SeqCst);
        if let Some(delay) = self.delays.get(host) {
            tokio::time::sleep(*delay).await;
        }
        let reply = self.replies.lock().unwrap().get(host).cloned();
        match reply {
            Some(Reply::Output(stdout)) => Ok(RemoteOutput {
                stdout,
                stderr: Vec::new(),
                exit_code: Some(0),
            }),
            Some(Reply::Fail(failure)) => Err(failure),
            None => Err(RemoteFailure::Connect(format!("no route to {host}"))),
        }
    }
}

/// Records every retained publish.
#[derive(Default)]
pub struct RecordingPublisher {
    published: Mutex<Vec<(String, Vec<u8>)>>,
}

impl RecordingPublisher {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn take(&self) -> Vec<(String, String)> {
        self.published
            .lock()
            .unwrap()
            .drain(..)
            .map(|(topic, payload)| (topic, String::from_utf8(payload).unwrap()))
            .collect()
    }
}

#[async_trait]
impl Publisher for RecordingPublisher {
    async fn publish_retained(&self, topic: &str, payload: &[u8]) -> Result<(), BrokerError> {
        self.published
            .lock()
            .unwrap()
            .push((topic.to_string(), payload.to_vec()));
        Ok(())
    }
}

/// Replays a fixed set of retained messages, or fails.
pub struct FakeRetained {
    pub messages: Option<Vec<RetainedMessage>>,
    pub patterns: Mutex<Vec<String>>,
}

impl FakeRetained {
    pub fn with(messages: &[(&str, &str)]) -> Self {
        Self {
            messages: Some(
                messages
                    .iter()
                    .map(|(topic, payload)| RetainedMessage {
                        topic: topic.to_string(),
                        payload: payload.as_bytes().to_vec(),
                    })
                    .collect(),
            ),
            patterns: Mutex::new(Vec::new()),
        }
    }

    pub fn unreachable() -> Self {
        Self {
            messages: None,
            patterns: Mutex::new(Vec::new()),
        }
    }
}

#[async_trait]
impl RetainedReader for FakeRetained {
    async fn fetch_retained(
        &self,
        topic_pattern: &str,
        wait: Duration,
    ) -> Result<Vec<RetainedMessage>, BrokerError> {
        self.patterns.lock().unwrap().push(topic_pattern.to_string());
        self.messages.clone().ok_or(BrokerError::Timeout(wait))
    }
}

/// Build an `mca-dump` document with one SSID per client list.
pub fn dump(ap_hostname: &str, ssids: &[&[(&str, u64)]]) -> Reply {
    let vaps: Vec<_> = ssids
        .iter()
        .map(|clients| {
            let stations: Vec<_> = clients
                .iter()
                .map(|(mac, idle)| json!({ "mac": mac, "hostname": format!("host-{mac}"), "idletime": idle }))
                .collect();
            json!({ "essid": "home", "sta_table": stations })
        })
        .collect();
    let doc = json!({ "hostname": ap_hostname, "vap_table": vaps });
    Reply::Output(serde_json::to_vec(&doc).unwrap())
}
