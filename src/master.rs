//! One-way log channel from request workers to the coordinating process.
//!
//! Posting never blocks and never fails: once the coordinator is gone,
//! records are dropped. Request resolution must not depend on delivery.

use std::{sync::Arc, time::Duration};

use serde::Serialize;
use tokio::{sync::mpsc, task::JoinHandle};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub enum MessageKind {
    Log,
    ExecTime,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(untagged)]
pub enum LogData {
    Text(String),
    Millis(u64),
}

/// Wire shape: `{name, id, msgId, data}`.
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct MasterMessage {
    pub name: String,
    pub id: Option<u64>,
    pub msg_id: MessageKind,
    pub data: LogData,
}

/// Cloneable sending end of the channel.
#[derive(Debug, Clone)]
pub struct MasterLink {
    tx: Option<mpsc::UnboundedSender<MasterMessage>>,
}

impl MasterLink {
    /// A link whose records go nowhere.
    pub fn disconnected() -> Self {
        Self { tx: None }
    }

    pub fn post(&self, message: MasterMessage) {
        if let Some(tx) = &self.tx {
            let _ = tx.send(message);
        }
    }

    /// Binds a worker identity, fixed for the lifetime of the returned log.
    pub fn worker(&self, name: impl Into<String>, id: Option<u64>) -> WorkerLog {
        WorkerLog {
            link: self.clone(),
            name: Arc::from(name.into()),
            id,
        }
    }
}

/// Creates a channel without a coordinator. The caller drains the receiver.
pub fn channel() -> (MasterLink, mpsc::UnboundedReceiver<MasterMessage>) {
    let (tx, rx) = mpsc::unbounded_channel();
    (MasterLink { tx: Some(tx) }, rx)
}

/// Coordinator that writes every worker record to `tracing`.
pub struct MasterChannel;

impl MasterChannel {
    pub fn spawn() -> (MasterLink, JoinHandle<()>) {
        let (link, mut rx) = channel();
        let handle = tokio::spawn(async move {
            while let Some(message) = rx.recv().await {
                record(&message);
            }
        });
        (link, handle)
    }
}

fn record(message: &MasterMessage) {
    let worker = message.id.map(|id| id.to_string()).unwrap_or_default();
    match (&message.msg_id, &message.data) {
        (MessageKind::ExecTime, LogData::Millis(ms)) => {
            tracing::info!(service = %message.name, worker = %worker, kind = "execTime", exec_ms = *ms);
        }
        (_, LogData::Text(text)) => {
            tracing::info!(service = %message.name, worker = %worker, kind = "log", "{text}");
        }
        (MessageKind::Log, LogData::Millis(ms)) => {
            tracing::info!(service = %message.name, worker = %worker, kind = "log", "{ms}");
        }
    }
}

/// Per-worker handle that stamps records with the worker identity.
#[derive(Debug, Clone)]
pub struct WorkerLog {
    link: MasterLink,
    name: Arc<str>,
    id: Option<u64>,
}

impl WorkerLog {
    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn log(&self, text: impl Into<String>) {
        self.post(MessageKind::Log, LogData::Text(text.into()));
    }

    pub fn exec_time(&self, elapsed: Duration) {
        let ms = u64::try_from(elapsed.as_millis()).unwrap_or(u64::MAX);
        self.post(MessageKind::ExecTime, LogData::Millis(ms));
    }

    fn post(&self, msg_id: MessageKind, data: LogData) {
        self.link.post(MasterMessage {
            name: self.name.to_string(),
            id: self.id,
            msg_id,
            data,
        });
    }
}
