pub mod cognitive;
pub mod speech;
pub mod tts;
pub mod vision;

use std::{collections::BTreeMap, sync::Arc};

use futures_util::future::BoxFuture;
use serde_json::{json, Value};

use crate::{
    bridge::BridgeCall,
    broker::{CallKind, CallSpec, RequestBroker},
    config::ServiceTable,
    ids::IdentifierCache,
    master::MasterLink,
    staging::UploadStaging,
};

pub use cognitive::{CognitiveGetHistory, CognitiveGetScores, CognitiveTestChooser};
pub use speech::SpeechRecognitionSphinx4;
pub use tts::TextToSpeech;
pub use vision::{HazardDetectionDoorCheck, ObjectRecognitionCaffe};

/// Type-erased entry point the host routes requests to.
pub trait ServiceHandler: Send + Sync {
    fn name(&self) -> &'static str;

    /// Decodes `body` into the kind's request and resolves it to a JSON
    /// response. Decoding failures come back error-shaped, never as `Err`.
    fn handle(&self, body: Value) -> BoxFuture<'_, Value>;

    /// Error-shaped response for a body that never reached decoding.
    fn failure(&self, message: &str) -> Value;
}

impl<K: CallKind> ServiceHandler for RequestBroker<K> {
    fn name(&self) -> &'static str {
        self.spec().kind.name()
    }

    fn handle(&self, body: Value) -> BoxFuture<'_, Value> {
        Box::pin(async move {
            let body = if body.is_null() { json!({}) } else { body };
            let response = match serde_json::from_value::<K::Request>(body) {
                Ok(request) => self.dispatch(request).await.response,
                Err(error) => self
                    .spec()
                    .kind
                    .failure(&format!("invalid request payload: {error}")),
            };
            self.encode(response)
        })
    }

    fn failure(&self, message: &str) -> Value {
        self.encode(self.spec().kind.failure(message))
    }
}

impl<K: CallKind> RequestBroker<K> {
    fn encode(&self, response: K::Response) -> Value {
        serde_json::to_value(response).unwrap_or_else(|error| {
            tracing::error!(
                service = self.spec().kind.name(),
                "failed to serialize response: {error}"
            );
            json!({ "error": crate::error::PLATFORM_FAILURE })
        })
    }
}

/// Shared collaborators every broker in the process is built from.
#[derive(Clone)]
pub struct BrokerDeps {
    pub ids: Arc<IdentifierCache>,
    pub staging: Arc<UploadStaging>,
    pub bridge: Arc<dyn BridgeCall>,
    pub master: MasterLink,
}

pub struct ServiceRegistry {
    handlers: BTreeMap<&'static str, Arc<dyn ServiceHandler>>,
}

impl ServiceRegistry {
    /// Builds one broker per known call kind. Kinds missing from `table` are
    /// not exposed.
    pub fn new(table: &ServiceTable, deps: &BrokerDeps) -> Self {
        let mut registry = Self {
            handlers: BTreeMap::new(),
        };

        registry.register(table, deps, TextToSpeech);
        registry.register(table, deps, CognitiveTestChooser);
        registry.register(table, deps, CognitiveGetScores);
        registry.register(table, deps, CognitiveGetHistory);
        registry.register(table, deps, ObjectRecognitionCaffe);
        registry.register(table, deps, HazardDetectionDoorCheck);
        registry.register(table, deps, SpeechRecognitionSphinx4);

        registry
    }

    fn register<K: CallKind>(&mut self, table: &ServiceTable, deps: &BrokerDeps, kind: K) {
        let name = kind.name();
        let Some(service) = table.get(name) else {
            tracing::warn!(service = name, "no service configuration; not exposed");
            return;
        };

        let worker_id = self.handlers.len() as u64;
        let broker = RequestBroker::new(
            CallSpec::new(kind, service.clone()),
            Arc::clone(&deps.ids),
            Arc::clone(&deps.staging),
            Arc::clone(&deps.bridge),
            deps.master.worker(name, Some(worker_id)),
        );
        self.handlers.insert(name, Arc::new(broker));
    }

    pub fn get(&self, name: &str) -> Option<Arc<dyn ServiceHandler>> {
        self.handlers.get(name).cloned()
    }

    pub fn names(&self) -> impl Iterator<Item = &'static str> + '_ {
        self.handlers.keys().copied()
    }
}
