//! One-shot request broker.
//!
//! Each dispatched request is backed by an [`InFlight`] slot that three
//! triggers race to resolve: the bridge success callback, the bridge failure
//! callback, and the retry ladder giving up. The slot state moves
//! `Pending -> Resolved(reason)` through a single compare-and-set, so exactly
//! one trigger releases the identifier, removes staged files and answers the
//! client. Later triggers are dropped.

use std::{
    path::{Path, PathBuf},
    sync::{
        atomic::{AtomicU32, AtomicU8, Ordering},
        Arc, Mutex, PoisonError,
    },
};

use serde::{de::DeserializeOwned, Serialize};
use serde_json::Value;
use tokio::{sync::oneshot, time::Instant};

use crate::{
    bridge::{Args, BackendFailure, BridgeCall, CallTicket, OnFailure, OnSuccess},
    config::ServiceConfig,
    error::{BrokerError, PLATFORM_FAILURE},
    ids::{IdentifierCache, RequestId},
    master::WorkerLog,
    shaper::backend_error,
    staging::UploadStaging,
};

/// A category of externally exposed request: its inputs, backend arguments
/// and response shape.
pub trait CallKind: Send + Sync + 'static {
    type Request: DeserializeOwned + Send + 'static;
    type Response: Serialize + Send + 'static;

    fn name(&self) -> &'static str;

    /// Host-stored upload this request carries, if any.
    fn upload<'a>(&self, _request: &'a Self::Request) -> Option<&'a str> {
        None
    }

    /// Path the backend writes its output to, if the kind produces one.
    fn artifact(&self, _id: &RequestId, _cache_root: &Path) -> Option<PathBuf> {
        None
    }

    fn args(&self, request: Self::Request, ctx: &CallContext) -> Args;

    /// Builds the response for a payload that did not report failure.
    fn shape(&self, payload: &Value, ctx: &CallContext) -> Self::Response;

    /// All-defaults response carrying `message` in its `error` field.
    fn failure(&self, message: &str) -> Self::Response;
}

/// Per-request data handed to the call kind.
#[derive(Debug, Clone)]
pub struct CallContext {
    pub id: RequestId,
    pub upload: Option<PathBuf>,
    pub artifact: Option<PathBuf>,
}

/// A call kind bound to its backend service settings.
#[derive(Debug, Clone)]
pub struct CallSpec<K> {
    pub kind: K,
    pub service: ServiceConfig,
}

impl<K> CallSpec<K> {
    pub fn new(kind: K, service: ServiceConfig) -> Self {
        Self { kind, service }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Resolution {
    /// The backend answered. The payload itself may still report failure.
    Replied,
    /// The bridge reported failure for the call.
    Failed,
    /// Every response window elapsed without an answer.
    Exhausted,
    /// Pre-flight checks failed; no backend call was made.
    Rejected,
}

impl Resolution {
    fn tag(self) -> u8 {
        match self {
            Self::Replied => 1,
            Self::Failed => 2,
            Self::Exhausted => 3,
            Self::Rejected => 4,
        }
    }

    fn from_tag(tag: u8) -> Option<Self> {
        match tag {
            1 => Some(Self::Replied),
            2 => Some(Self::Failed),
            3 => Some(Self::Exhausted),
            4 => Some(Self::Rejected),
            _ => None,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SlotState {
    Pending,
    Resolved(Resolution),
}

const PENDING: u8 = 0;

#[derive(Debug)]
pub struct Outcome<R> {
    pub response: R,
    pub resolution: Resolution,
}

enum Trigger {
    Reply(Value),
    Failure(BackendFailure),
    Exhausted,
}

impl Trigger {
    fn resolution(&self) -> Resolution {
        match self {
            Self::Reply(_) => Resolution::Replied,
            Self::Failure(_) => Resolution::Failed,
            Self::Exhausted => Resolution::Exhausted,
        }
    }
}

/// Generic broker for one call kind.
///
/// The identifier cache, staging area and bridge are shared with every other
/// broker in the process; the worker log identity is fixed at construction.
pub struct RequestBroker<K: CallKind> {
    spec: Arc<CallSpec<K>>,
    ids: Arc<IdentifierCache>,
    staging: Arc<UploadStaging>,
    bridge: Arc<dyn BridgeCall>,
    log: WorkerLog,
}

impl<K: CallKind> RequestBroker<K> {
    pub fn new(
        spec: CallSpec<K>,
        ids: Arc<IdentifierCache>,
        staging: Arc<UploadStaging>,
        bridge: Arc<dyn BridgeCall>,
        log: WorkerLog,
    ) -> Self {
        Self {
            spec: Arc::new(spec),
            ids,
            staging,
            bridge,
            log,
        }
    }

    pub fn spec(&self) -> &CallSpec<K> {
        &self.spec
    }

    /// Runs one request to resolution. Never fails: every error becomes the
    /// kind's error-shaped response.
    pub async fn dispatch(&self, request: K::Request) -> Outcome<K::Response> {
        let started_at = Instant::now();
        let service = self.spec.service.ros_srv_name.as_str();
        self.log.log(format!("client-request {{{service}}}"));

        let upload_source = match self.spec.kind.upload(&request) {
            Some(raw) => match self.staging.check(raw) {
                Ok(_) => Some(raw.to_string()),
                Err(error) => return self.reject(error, None, started_at),
            },
            None => None,
        };

        let id = match self.ids.issue() {
            Ok(id) => id,
            Err(error) => return self.reject(error, None, started_at),
        };

        let upload = match upload_source {
            Some(raw) => match self.staging.stage(&raw, &id) {
                Ok(staged) => {
                    self.log.log(format!(
                        "Created copy of file {raw} at {}",
                        staged.display()
                    ));
                    Some(staged)
                }
                Err(error) => return self.reject(error, Some(&id), started_at),
            },
            None => None,
        };

        let artifact = self.spec.kind.artifact(&id, self.staging.cache_root());
        let ctx = CallContext {
            id,
            upload,
            artifact,
        };
        let args = self.spec.kind.args(request, &ctx);

        let (responder, response) = oneshot::channel();
        let (trigger_tx, triggers) = oneshot::channel();
        let slot = Arc::new(InFlight {
            spec: Arc::clone(&self.spec),
            ids: Arc::clone(&self.ids),
            staging: Arc::clone(&self.staging),
            bridge: Arc::clone(&self.bridge),
            log: self.log.clone(),
            ctx,
            started_at,
            state: AtomicU8::new(PENDING),
            retries: AtomicU32::new(0),
            trigger: Mutex::new(Some(trigger_tx)),
        });

        let on_success: OnSuccess = {
            let slot = Arc::clone(&slot);
            Box::new(move |payload| {
                slot.resolve(Trigger::Reply(payload));
            })
        };
        let on_failure: OnFailure = {
            let slot = Arc::clone(&slot);
            Box::new(move |failure| {
                slot.resolve(Trigger::Failure(failure));
            })
        };

        let ticket = self.bridge.call(service, args, on_success, on_failure);

        // Detached so cleanup still happens if the caller stops waiting.
        tokio::spawn(slot.run(triggers, ticket, responder));

        response.await.unwrap_or_else(|_| Outcome {
            response: self.spec.kind.failure(PLATFORM_FAILURE),
            resolution: Resolution::Exhausted,
        })
    }

    fn reject(
        &self,
        error: BrokerError,
        id: Option<&RequestId>,
        started_at: Instant,
    ) -> Outcome<K::Response> {
        if let Some(id) = id {
            self.ids.release(id);
        }

        tracing::warn!(service = self.spec.kind.name(), "request rejected: {error}");
        self.log.log(format!("Return to client with error --> {error}"));
        self.log.exec_time(started_at.elapsed());

        Outcome {
            response: self.spec.kind.failure(&error.client_message()),
            resolution: Resolution::Rejected,
        }
    }
}

/// State of one in-flight request, shared by its three triggers.
///
/// Callbacks only claim the slot and hand their trigger over; every side
/// effect runs on the request's own resolution task.
struct InFlight<K: CallKind> {
    spec: Arc<CallSpec<K>>,
    ids: Arc<IdentifierCache>,
    staging: Arc<UploadStaging>,
    bridge: Arc<dyn BridgeCall>,
    log: WorkerLog,
    ctx: CallContext,
    started_at: Instant,
    state: AtomicU8,
    retries: AtomicU32,
    trigger: Mutex<Option<oneshot::Sender<Trigger>>>,
}

impl<K: CallKind> InFlight<K> {
    fn state(&self) -> SlotState {
        match Resolution::from_tag(self.state.load(Ordering::Acquire)) {
            Some(resolution) => SlotState::Resolved(resolution),
            None => SlotState::Pending,
        }
    }

    fn claim(&self, resolution: Resolution) -> bool {
        let claimed = self
            .state
            .compare_exchange(PENDING, resolution.tag(), Ordering::AcqRel, Ordering::Acquire)
            .is_ok();
        if !claimed {
            tracing::debug!(id = %self.ctx.id, ?resolution, "late trigger ignored");
        }
        claimed
    }

    /// Callback entry point. Returns `false` when another trigger already
    /// resolved the slot.
    fn resolve(&self, trigger: Trigger) -> bool {
        if !self.claim(trigger.resolution()) {
            return false;
        }

        let sender = self
            .trigger
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .take();
        if let Some(sender) = sender {
            let _ = sender.send(trigger);
        }
        true
    }

    /// Waits for a callback trigger while polling once per window, then
    /// performs the winning trigger's side effects and answers the caller.
    ///
    /// The backend call is not re-issued; a late answer still resolves the
    /// slot until the cap.
    async fn run(
        self: Arc<Self>,
        mut triggers: oneshot::Receiver<Trigger>,
        ticket: Option<CallTicket>,
        responder: oneshot::Sender<Outcome<K::Response>>,
    ) {
        let window = self.spec.service.window();
        let max_retries = self.spec.service.retries;

        let trigger = loop {
            tokio::select! {
                received = &mut triggers => match received {
                    Ok(trigger) => break trigger,
                    Err(_) => return,
                },
                _ = tokio::time::sleep(window) => {
                    if self.state() != SlotState::Pending {
                        continue;
                    }

                    let retries = self.retries.fetch_add(1, Ordering::AcqRel) + 1;
                    self.log.log(format!(
                        "Reached rosbridge response timeout ---> [{}] ms ... Retry-{retries}",
                        window.as_millis()
                    ));

                    if retries >= max_retries && self.claim(Resolution::Exhausted) {
                        break Trigger::Exhausted;
                    }
                }
            }
        };

        if let (Trigger::Exhausted, Some(ticket)) = (&trigger, &ticket) {
            self.bridge.cancel(ticket);
        }

        let resolution = trigger.resolution();
        let response = self.settle(trigger).await;
        self.log.exec_time(self.started_at.elapsed());

        let _ = responder.send(Outcome {
            response,
            resolution,
        });
    }

    /// Releases the identifier, then does the file work off the async
    /// workers: unstage the upload, shape the response, drop the artifact.
    async fn settle(self: &Arc<Self>, trigger: Trigger) -> K::Response {
        self.ids.release(&self.ctx.id);

        let slot = Arc::clone(self);
        match tokio::task::spawn_blocking(move || slot.settle_files(trigger)).await {
            Ok(response) => response,
            Err(error) => {
                tracing::error!(id = %self.ctx.id, "resolution task failed: {error}");
                self.spec.kind.failure(PLATFORM_FAILURE)
            }
        }
    }

    fn settle_files(&self, trigger: Trigger) -> K::Response {
        if let Some(upload) = &self.ctx.upload {
            self.remove(upload);
        }

        let response = self.respond(trigger);

        // The shaper may already have consumed it.
        if let Some(artifact) = &self.ctx.artifact {
            self.remove(artifact);
        }
        response
    }

    fn respond(&self, trigger: Trigger) -> K::Response {
        let service = &self.spec.service.ros_srv_name;
        let kind = &self.spec.kind;

        match trigger {
            Trigger::Reply(payload) => match backend_error(&payload) {
                Some(message) => {
                    let error = BrokerError::Backend(message);
                    self.log.log(format!(
                        "Returning to client. ROS service [{service}] error ---> {error}"
                    ));
                    kind.failure(&error.client_message())
                }
                None => {
                    self.log.log(format!(
                        "Returning to client. ROS service [{service}] returned with success"
                    ));
                    kind.shape(&payload, &self.ctx)
                }
            },
            Trigger::Failure(failure) => {
                let error = if failure.is_connection() {
                    BrokerError::Connection(failure.error)
                } else {
                    BrokerError::Backend(failure.effective_message())
                };
                self.log
                    .log(format!("ROS service [{service}] call failed ---> {error}"));
                kind.failure(&error.client_message())
            }
            Trigger::Exhausted => {
                let error = BrokerError::TimeoutExhausted {
                    retries: self.retries.load(Ordering::Acquire),
                    timeout_ms: self.spec.service.timeout,
                };
                self.log.log(format!(
                    "Reached max_retries [{}] Could not receive response from rosbridge: {error}",
                    self.spec.service.retries
                ));
                kind.failure(&error.client_message())
            }
        }
    }

    fn remove(&self, path: &Path) {
        if let Err(error) = self.staging.unstage(path) {
            tracing::warn!(id = %self.ctx.id, "cleanup failed: {error}");
            self.log.log(format!("Failed to remove {}: {error}", path.display()));
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::master::MasterLink;
    use serde_json::json;
    use std::sync::atomic::AtomicUsize;

    struct Probe;

    impl CallKind for Probe {
        type Request = ();
        type Response = Value;

        fn name(&self) -> &'static str {
            "probe"
        }

        fn args(&self, _request: (), _ctx: &CallContext) -> Args {
            Args::new()
        }

        fn shape(&self, payload: &Value, _ctx: &CallContext) -> Value {
            json!({"value": payload.get("value").cloned().unwrap_or(Value::Null), "error": ""})
        }

        fn failure(&self, message: &str) -> Value {
            json!({"value": Value::Null, "error": message})
        }
    }

    struct Unused;

    impl BridgeCall for Unused {
        fn call(&self, _: &str, _: Args, _: OnSuccess, _: OnFailure) -> Option<CallTicket> {
            None
        }
    }

    fn pending_slot(
        ids: &Arc<IdentifierCache>,
        artifact: Option<PathBuf>,
    ) -> (Arc<InFlight<Probe>>, oneshot::Receiver<Trigger>) {
        let dir = std::env::temp_dir();
        let id = ids.issue().expect("issue id");
        let (tx, rx) = oneshot::channel();
        let slot = Arc::new(InFlight {
            spec: Arc::new(CallSpec::new(Probe, ServiceConfig::new("/probe", 100, 3))),
            ids: Arc::clone(ids),
            staging: Arc::new(UploadStaging::new(&dir, &dir)),
            bridge: Arc::new(Unused),
            log: MasterLink::disconnected().worker("probe", None),
            ctx: CallContext {
                id,
                upload: None,
                artifact,
            },
            started_at: Instant::now(),
            state: AtomicU8::new(PENDING),
            retries: AtomicU32::new(0),
            trigger: Mutex::new(Some(tx)),
        });
        (slot, rx)
    }

    async fn finish(
        slot: Arc<InFlight<Probe>>,
        triggers: oneshot::Receiver<Trigger>,
    ) -> Outcome<Value> {
        let (responder, response) = oneshot::channel();
        slot.run(triggers, None, responder).await;
        response.await.expect("outcome")
    }

    #[tokio::test]
    async fn only_the_first_trigger_resolves() {
        let ids = Arc::new(IdentifierCache::default());
        let (slot, triggers) = pending_slot(&ids, None);

        assert!(slot.resolve(Trigger::Failure(BackendFailure::new("down"))));
        assert!(!slot.resolve(Trigger::Reply(json!({"value": 1}))));
        assert!(!slot.resolve(Trigger::Exhausted));
        assert_eq!(slot.state(), SlotState::Resolved(Resolution::Failed));

        let outcome = finish(slot, triggers).await;
        assert_eq!(outcome.resolution, Resolution::Failed);
        assert_eq!(outcome.response["error"], "down");
        assert_eq!(ids.in_flight(), 0);
    }

    #[test]
    fn racing_threads_resolve_exactly_once() {
        let ids = Arc::new(IdentifierCache::default());
        for _ in 0..32 {
            let (slot, mut triggers) = pending_slot(&ids, None);
            let winners = Arc::new(AtomicUsize::new(0));

            let handles = (0..6)
                .map(|n| {
                    let slot = Arc::clone(&slot);
                    let winners = Arc::clone(&winners);
                    std::thread::spawn(move || {
                        let trigger = match n % 3 {
                            0 => Trigger::Reply(json!({"value": n})),
                            1 => Trigger::Failure(BackendFailure::new("down")),
                            _ => Trigger::Exhausted,
                        };
                        if slot.resolve(trigger) {
                            winners.fetch_add(1, Ordering::Relaxed);
                        }
                    })
                })
                .collect::<Vec<_>>();
            for handle in handles {
                handle.join().expect("trigger thread");
            }

            assert_eq!(winners.load(Ordering::Relaxed), 1);
            let trigger = triggers.try_recv().expect("winning trigger handed over");
            assert_eq!(
                slot.state(),
                SlotState::Resolved(trigger.resolution())
            );
            slot.ids.release(&slot.ctx.id);
        }
        assert_eq!(ids.in_flight(), 0);
    }

    #[tokio::test]
    async fn callback_leaves_file_work_to_the_resolution_task() {
        let dir = tempfile::tempdir().expect("tmpdir");
        let artifact = dir.path().join("out.wav");
        std::fs::write(&artifact, b"RIFF").expect("write artifact");

        let ids = Arc::new(IdentifierCache::default());
        let (slot, triggers) = pending_slot(&ids, Some(artifact.clone()));

        assert!(slot.resolve(Trigger::Reply(json!({"value": 7}))));
        assert!(artifact.exists());
        assert_eq!(ids.in_flight(), 1);

        let outcome = finish(slot, triggers).await;
        assert_eq!(outcome.response["value"], 7);
        assert!(!artifact.exists());
        assert_eq!(ids.in_flight(), 0);
    }

    #[tokio::test]
    async fn reply_reporting_failure_is_shaped_as_error() {
        let ids = Arc::new(IdentifierCache::default());
        let (slot, triggers) = pending_slot(&ids, None);

        slot.resolve(Trigger::Reply(json!({"success": false, "trace": ["x", "y"]})));
        let outcome = finish(slot, triggers).await;
        assert_eq!(outcome.resolution, Resolution::Replied);
        assert_eq!(outcome.response["error"], "y");
    }

    #[tokio::test]
    async fn connection_failure_hides_its_detail() {
        let ids = Arc::new(IdentifierCache::default());
        let (slot, triggers) = pending_slot(&ids, None);

        slot.resolve(Trigger::Failure(BackendFailure::connection(
            "rosbridge connection closed",
        )));
        let outcome = finish(slot, triggers).await;
        assert_eq!(outcome.resolution, Resolution::Failed);
        assert_eq!(outcome.response["error"], PLATFORM_FAILURE);
    }
}
