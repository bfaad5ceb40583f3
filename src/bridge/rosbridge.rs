use std::{
    collections::HashMap,
    sync::{
        atomic::{AtomicU64, Ordering},
        Arc, Mutex, MutexGuard, PoisonError,
    },
    time::Duration,
};

use futures_util::{SinkExt, StreamExt};
use serde_json::{json, Value};
use tokio::sync::mpsc;
use tokio_tungstenite::{connect_async, tungstenite::Message};

use super::{Args, BackendFailure, BridgeCall, CallTicket, OnFailure, OnSuccess};

struct PendingCall {
    service: String,
    on_success: OnSuccess,
    on_failure: OnFailure,
}

/// `call_service` adapter over a single persistent rosbridge websocket.
///
/// Every in-flight call shares the one connection. When the socket drops,
/// each pending call fails through its `on_failure` and the client
/// reconnects after `reconnect_delay`.
pub struct RosbridgeClient {
    url: String,
    reconnect_delay: Duration,
    outbound: Mutex<Option<mpsc::UnboundedSender<Message>>>,
    pending_calls: Mutex<HashMap<String, PendingCall>>,
    next_call_id: AtomicU64,
}

impl RosbridgeClient {
    pub fn start(url: impl Into<String>, reconnect_delay: Duration) -> Arc<Self> {
        let client = Arc::new(Self {
            url: url.into(),
            reconnect_delay,
            outbound: Mutex::new(None),
            pending_calls: Mutex::new(HashMap::new()),
            next_call_id: AtomicU64::new(1),
        });

        client.spawn_connection_loop();
        client
    }

    pub fn is_connected(&self) -> bool {
        lock(&self.outbound).is_some()
    }

    pub fn pending(&self) -> usize {
        lock(&self.pending_calls).len()
    }

    fn spawn_connection_loop(self: &Arc<Self>) {
        let this = Arc::clone(self);
        tokio::spawn(async move {
            loop {
                match connect_async(this.url.as_str()).await {
                    Ok((socket, _)) => {
                        tracing::info!(url = %this.url, "connected to rosbridge");
                        this.run_connection(socket).await;
                        tracing::warn!(url = %this.url, "rosbridge connection closed");
                    }
                    Err(error) => {
                        tracing::warn!(url = %this.url, "rosbridge connect failed: {error}");
                    }
                }

                tokio::time::sleep(this.reconnect_delay).await;
            }
        });
    }

    async fn run_connection<S>(&self, socket: tokio_tungstenite::WebSocketStream<S>)
    where
        S: tokio::io::AsyncRead + tokio::io::AsyncWrite + Unpin + Send + 'static,
    {
        let (mut socket_tx, mut socket_rx) = socket.split();
        let (tx, mut rx) = mpsc::unbounded_channel::<Message>();
        *lock(&self.outbound) = Some(tx);

        let writer_task = tokio::spawn(async move {
            while let Some(message) = rx.recv().await {
                if socket_tx.send(message).await.is_err() {
                    break;
                }
            }
        });

        while let Some(message) = socket_rx.next().await {
            match message {
                Ok(Message::Text(text)) => self.handle_incoming(text.as_str()),
                Ok(Message::Close(_)) => break,
                Ok(_) => {}
                Err(error) => {
                    tracing::warn!("rosbridge socket error: {error}");
                    break;
                }
            }
        }

        lock(&self.outbound).take();
        writer_task.abort();
        self.fail_all_pending("rosbridge connection closed");
    }

    fn handle_incoming(&self, text: &str) {
        let value = match serde_json::from_str::<Value>(text) {
            Ok(value) => value,
            Err(error) => {
                tracing::warn!("invalid rosbridge json: {error}");
                return;
            }
        };

        let Some(reply) = parse_service_response(&value) else {
            return;
        };

        let pending = lock(&self.pending_calls).remove(&reply.id);
        let Some(pending) = pending else {
            tracing::debug!(id = %reply.id, "service response for unknown call");
            return;
        };

        if reply.result {
            (pending.on_success)(reply.values);
        } else {
            tracing::debug!(service = %pending.service, "service call reported failure");
            (pending.on_failure)(BackendFailure::from_value(&reply.values));
        }
    }

    fn fail_all_pending(&self, message: &str) {
        let pending_calls = lock(&self.pending_calls)
            .drain()
            .map(|(_, pending)| pending)
            .collect::<Vec<_>>();

        for pending in pending_calls {
            (pending.on_failure)(BackendFailure::connection(message));
        }
    }
}

impl BridgeCall for RosbridgeClient {
    fn call(
        &self,
        service: &str,
        args: Args,
        on_success: OnSuccess,
        on_failure: OnFailure,
    ) -> Option<CallTicket> {
        let outbound = lock(&self.outbound).clone();
        let Some(outbound) = outbound else {
            on_failure(BackendFailure::connection("rosbridge connection unavailable"));
            return None;
        };

        let call_id = format!(
            "call_service:{service}:{}",
            self.next_call_id.fetch_add(1, Ordering::Relaxed)
        );
        let payload = json!({
            "op": "call_service",
            "id": call_id,
            "service": service,
            "args": args,
        });

        lock(&self.pending_calls).insert(
            call_id.clone(),
            PendingCall {
                service: service.to_string(),
                on_success,
                on_failure,
            },
        );

        if outbound.send(Message::Text(payload.to_string().into())).is_err() {
            if let Some(pending) = lock(&self.pending_calls).remove(&call_id) {
                (pending.on_failure)(BackendFailure::connection(
                    "rosbridge connection unavailable",
                ));
            }
            return None;
        }

        Some(CallTicket::new(call_id))
    }

    fn cancel(&self, ticket: &CallTicket) {
        if let Some(pending) = lock(&self.pending_calls).remove(ticket.as_str()) {
            tracing::debug!(id = ticket.as_str(), service = %pending.service, "call abandoned");
        }
    }
}

#[derive(Debug, PartialEq)]
struct ServiceReply {
    id: String,
    result: bool,
    values: Value,
}

fn parse_service_response(value: &Value) -> Option<ServiceReply> {
    let object = value.as_object()?;
    if object.get("op").and_then(Value::as_str) != Some("service_response") {
        return None;
    }

    Some(ServiceReply {
        id: object.get("id").and_then(Value::as_str)?.to_string(),
        // Older rosbridge servers omit `result` on success.
        result: object.get("result").and_then(Value::as_bool).unwrap_or(true),
        values: object.get("values").cloned().unwrap_or(Value::Null),
    })
}

fn lock<T>(mutex: &Mutex<T>) -> MutexGuard<'_, T> {
    mutex.lock().unwrap_or_else(PoisonError::into_inner)
}
