use std::{
    collections::HashSet,
    fmt,
    sync::{Mutex, MutexGuard, PoisonError},
};

use rand::{distr::Alphanumeric, Rng};
use serde::Serialize;

use crate::error::{BrokerError, Result};

pub const DEFAULT_ID_LENGTH: usize = 5;
pub const DEFAULT_MAX_ATTEMPTS: usize = 1024;

/// Opaque fixed-length alphanumeric token naming one in-flight request.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize)]
#[serde(transparent)]
pub struct RequestId(String);

impl RequestId {
    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for RequestId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

impl From<&str> for RequestId {
    fn from(value: &str) -> Self {
        Self(value.to_string())
    }
}

/// Source of candidate identifiers.
pub trait IdSource: Send + Sync {
    fn draw(&self, length: usize) -> String;
}

/// Draws from the thread-local RNG. Holds no state, so it is freely shared.
#[derive(Debug, Default, Clone, Copy)]
pub struct ThreadAlphanumeric;

impl IdSource for ThreadAlphanumeric {
    fn draw(&self, length: usize) -> String {
        rand::rng()
            .sample_iter(Alphanumeric)
            .take(length)
            .map(char::from)
            .collect()
    }
}

/// Issues identifiers that are unique among those currently in flight.
///
/// The in-flight set is shared by every concurrently active request of the
/// process; `issue` and `release` may be called from any thread.
pub struct IdentifierCache {
    length: usize,
    max_attempts: usize,
    source: Box<dyn IdSource>,
    in_flight: Mutex<HashSet<RequestId>>,
}

impl IdentifierCache {
    pub fn new(length: usize, max_attempts: usize) -> Self {
        Self::with_source(length, max_attempts, ThreadAlphanumeric)
    }

    pub fn with_source(length: usize, max_attempts: usize, source: impl IdSource + 'static) -> Self {
        Self {
            length: length.max(1),
            max_attempts: max_attempts.max(1),
            source: Box::new(source),
            in_flight: Mutex::new(HashSet::new()),
        }
    }

    /// Draws candidates until one is not in flight, then marks it in flight.
    ///
    /// Fails closed once `max_attempts` candidates in a row have collided.
    pub fn issue(&self) -> Result<RequestId> {
        let mut in_flight = self.lock();
        for _ in 0..self.max_attempts {
            let candidate = RequestId(self.source.draw(self.length));
            if !in_flight.contains(&candidate) {
                in_flight.insert(candidate.clone());
                return Ok(candidate);
            }
        }

        tracing::error!(
            in_flight = in_flight.len(),
            attempts = self.max_attempts,
            "request identifier space exhausted"
        );
        Err(BrokerError::IdentifiersExhausted(self.max_attempts))
    }

    /// Returns whether the identifier was in flight. Releasing twice is a no-op.
    pub fn release(&self, id: &RequestId) -> bool {
        self.lock().remove(id)
    }

    pub fn contains(&self, id: &RequestId) -> bool {
        self.lock().contains(id)
    }

    pub fn in_flight(&self) -> usize {
        self.lock().len()
    }

    fn lock(&self) -> MutexGuard<'_, HashSet<RequestId>> {
        self.in_flight.lock().unwrap_or_else(PoisonError::into_inner)
    }
}

impl Default for IdentifierCache {
    fn default() -> Self {
        Self::new(DEFAULT_ID_LENGTH, DEFAULT_MAX_ATTEMPTS)
    }
}
