//! Seam between the broker and the persistent backend connection.
//!
//! The broker only needs a fire-and-forget call with two mutually exclusive
//! outcomes. Liveness, reconnection and request correlation on the shared
//! connection belong to the adapter.

pub mod rosbridge;

pub use rosbridge::RosbridgeClient;

use serde_json::{Map, Value};
use thiserror::Error;

use crate::error::PLATFORM_FAILURE;

pub type Args = Map<String, Value>;
pub type OnSuccess = Box<dyn FnOnce(Value) + Send + 'static>;
pub type OnFailure = Box<dyn FnOnce(BackendFailure) + Send + 'static>;

/// Adapter-side handle for a call that is still waiting for its reply.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct CallTicket(String);

impl CallTicket {
    pub fn new(id: impl Into<String>) -> Self {
        Self(id.into())
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

/// Dispatches one backend service call over the shared connection.
///
/// Implementations invoke at most one of `on_success` / `on_failure`, from any
/// thread, at any later point or synchronously inside `call`. They may also
/// never invoke either; the broker's retry ladder covers that case.
pub trait BridgeCall: Send + Sync {
    /// Returns a ticket when the call stays registered with the adapter
    /// after `call` returns.
    fn call(
        &self,
        service: &str,
        args: Args,
        on_success: OnSuccess,
        on_failure: OnFailure,
    ) -> Option<CallTicket>;

    /// Forgets a call nobody waits for any more. Its callbacks are dropped
    /// without firing. Unknown tickets are ignored.
    fn cancel(&self, _ticket: &CallTicket) {}
}

/// Where a failure originated.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum FailureOrigin {
    /// The backend service answered and reported failure.
    #[default]
    Backend,
    /// The call never got an answer because the connection was unavailable
    /// or dropped.
    Connection,
}

/// Failure reported by the backend or by the connection carrying the call.
#[derive(Debug, Clone, PartialEq, Error)]
#[error("{}", self.effective_message())]
pub struct BackendFailure {
    pub error: String,
    pub trace: Vec<String>,
    pub origin: FailureOrigin,
}

impl BackendFailure {
    pub fn new(error: impl Into<String>) -> Self {
        Self::with_trace(error, Vec::new())
    }

    pub fn with_trace(error: impl Into<String>, trace: Vec<String>) -> Self {
        Self {
            error: error.into(),
            trace,
            origin: FailureOrigin::Backend,
        }
    }

    /// Transport-level failure. Its text is diagnostic only.
    pub fn connection(detail: impl Into<String>) -> Self {
        Self {
            origin: FailureOrigin::Connection,
            ..Self::new(detail)
        }
    }

    pub fn is_connection(&self) -> bool {
        self.origin == FailureOrigin::Connection
    }

    /// Reads `{error, trace}` objects and bare error strings.
    pub fn from_value(value: &Value) -> Self {
        match value {
            Value::String(message) => Self::new(message.clone()),
            Value::Object(object) => Self::with_trace(
                object
                    .get("error")
                    .and_then(Value::as_str)
                    .unwrap_or_default(),
                object
                    .get("trace")
                    .and_then(Value::as_array)
                    .map(|entries| {
                        entries
                            .iter()
                            .filter_map(Value::as_str)
                            .map(str::to_string)
                            .collect()
                    })
                    .unwrap_or_default(),
            ),
            _ => Self::new(""),
        }
    }

    /// The direct error, else the most recent trace entry, else the generic
    /// platform failure.
    pub fn effective_message(&self) -> String {
        effective_error(&self.error, &self.trace)
    }
}

pub(crate) fn effective_error(error: &str, trace: &[String]) -> String {
    if !error.is_empty() {
        return error.to_string();
    }
    match trace.last() {
        Some(last) if !last.is_empty() => last.clone(),
        _ => PLATFORM_FAILURE.to_string(),
    }
}
