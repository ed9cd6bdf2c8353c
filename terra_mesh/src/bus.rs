//! Mesh implementation: topic registry, fan-out, request dispatch.

use parking_lot::Mutex;
use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration;
use thiserror::Error;
use tokio::sync::{mpsc, oneshot};
use tracing::{debug, warn};

use terra_common::clock::monotonic_ns;
use terra_common::metrics::{Metrics, METRIC_MESH_DROPPED};
use terra_common::types::bus::BusMessage;

/// Default timeout for status queries.
pub const DEFAULT_STATUS_TIMEOUT: Duration = Duration::from_secs(1);
/// Default timeout for diagnostic requests.
pub const DEFAULT_DIAGNOSTIC_TIMEOUT: Duration = Duration::from_secs(10);

/// Error type for mesh registration operations.
#[derive(Debug, Clone, Error)]
pub enum MeshError {
    /// A handler is already registered for this topic (first wins).
    #[error("handler already registered for topic '{topic}'")]
    HandlerExists { topic: String },
}

/// A message delivered to subscribers.
#[derive(Debug, Clone)]
pub struct Envelope {
    /// Concrete topic the message was published on.
    pub topic: String,
    pub payload: BusMessage,
    /// Monotonic publish timestamp [ns].
    pub timestamp_ns: u64,
}

/// Opaque handle returned by [`Mesh::subscribe`]; pass to
/// [`Mesh::unsubscribe`] to remove the subscription.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct SubscriptionHandle(u64);

/// Opaque handle returned by [`Mesh::register_handler`].
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct HandlerHandle {
    topic: String,
    id: u64,
}

/// One pending request handed to the topic's handler task.
///
/// The handler computes a result and resolves the caller through `reply`;
/// dropping the job without replying settles the caller as a handler error.
#[derive(Debug)]
pub struct RequestJob {
    pub topic: String,
    pub payload: BusMessage,
    pub reply: oneshot::Sender<Result<BusMessage, String>>,
}

/// Settled outcome of [`Mesh::request`].
#[derive(Debug)]
pub enum RequestOutcome {
    /// Handler produced a response in time.
    Ok(BusMessage),
    /// No handler registered for the topic.
    NoHandler,
    /// Handler did not respond within the caller's timeout.
    Timeout,
    /// Handler failed (error string) or dropped the job.
    HandlerError(String),
}

impl RequestOutcome {
    /// Convenience for tests and callers that only care about success.
    pub fn ok(self) -> Option<BusMessage> {
        match self {
            RequestOutcome::Ok(msg) => Some(msg),
            _ => None,
        }
    }
}

// ─── Topic patterns ─────────────────────────────────────────────────

/// Subscription pattern: exact topic, `prefix.*`, or bare `*`.
#[derive(Debug, Clone)]
enum TopicPattern {
    Exact(String),
    Prefix(String),
    All,
}

impl TopicPattern {
    fn parse(pattern: &str) -> Self {
        if pattern == "*" {
            TopicPattern::All
        } else if let Some(prefix) = pattern.strip_suffix(".*") {
            TopicPattern::Prefix(format!("{prefix}."))
        } else {
            TopicPattern::Exact(pattern.to_string())
        }
    }

    fn matches(&self, topic: &str) -> bool {
        match self {
            TopicPattern::Exact(t) => t == topic,
            TopicPattern::Prefix(p) => topic.starts_with(p.as_str()),
            TopicPattern::All => true,
        }
    }
}

// ─── Registry ───────────────────────────────────────────────────────

struct Subscriber {
    id: u64,
    pattern: TopicPattern,
    tx: mpsc::UnboundedSender<Envelope>,
}

struct HandlerEntry {
    id: u64,
    tx: mpsc::UnboundedSender<RequestJob>,
}

#[derive(Default)]
struct Registry {
    next_id: u64,
    /// Kept in registration order; delivery iterates front to back.
    subscribers: Vec<Subscriber>,
    handlers: HashMap<String, HandlerEntry>,
}

/// The process-local event mesh.
///
/// Cheap to clone; all clones share one registry.
#[derive(Clone)]
pub struct Mesh {
    registry: Arc<Mutex<Registry>>,
    metrics: Metrics,
}

impl Mesh {
    pub fn new(metrics: Metrics) -> Self {
        Self {
            registry: Arc::new(Mutex::new(Registry::default())),
            metrics,
        }
    }

    /// Subscribe to a topic or pattern (`exact`, `prefix.*`, `*`).
    ///
    /// Returns the removal handle and the receiving end of the
    /// subscription's channel.
    pub fn subscribe(
        &self,
        pattern: &str,
    ) -> (SubscriptionHandle, mpsc::UnboundedReceiver<Envelope>) {
        let (tx, rx) = mpsc::unbounded_channel();
        let mut reg = self.registry.lock();
        reg.next_id += 1;
        let id = reg.next_id;
        reg.subscribers.push(Subscriber {
            id,
            pattern: TopicPattern::parse(pattern),
            tx,
        });
        (SubscriptionHandle(id), rx)
    }

    /// Remove a subscription; a stale handle is a no-op.
    pub fn unsubscribe(&self, handle: SubscriptionHandle) {
        self.registry.lock().subscribers.retain(|s| s.id != handle.0);
    }

    /// Publish a message to every matching subscriber.
    ///
    /// Enqueues in registration order and returns immediately; a closed
    /// subscriber channel is dropped from the registry on the next publish
    /// and counted, never surfaced to the publisher.
    pub fn publish(&self, topic: &str, payload: BusMessage) {
        let envelope = Envelope {
            topic: topic.to_string(),
            payload,
            timestamp_ns: monotonic_ns(),
        };
        let mut dropped = 0u32;
        {
            let reg = self.registry.lock();
            for sub in reg.subscribers.iter().filter(|s| s.pattern.matches(topic)) {
                if sub.tx.send(envelope.clone()).is_err() {
                    dropped += 1;
                }
            }
        }
        if dropped > 0 {
            self.metrics.incr_by(METRIC_MESH_DROPPED, dropped as f64);
            debug!(topic, dropped, "dropped publish to closed subscribers");
        }
    }

    /// Register the request handler for a topic.
    ///
    /// The first registration wins; later attempts are rejected with
    /// [`MeshError::HandlerExists`]. A handler whose task exits frees the
    /// topic implicitly (requests settle as `NoHandler` once the channel is
    /// observed closed).
    pub fn register_handler(
        &self,
        topic: &str,
    ) -> Result<(HandlerHandle, mpsc::UnboundedReceiver<RequestJob>), MeshError> {
        let mut reg = self.registry.lock();
        if let Some(existing) = reg.handlers.get(topic) {
            if !existing.tx.is_closed() {
                warn!(topic, "rejected duplicate handler registration");
                return Err(MeshError::HandlerExists {
                    topic: topic.to_string(),
                });
            }
            // Previous handler task is gone; let the topic be reclaimed.
        }
        let (tx, rx) = mpsc::unbounded_channel();
        reg.next_id += 1;
        let id = reg.next_id;
        reg.handlers.insert(topic.to_string(), HandlerEntry { id, tx });
        Ok((
            HandlerHandle {
                topic: topic.to_string(),
                id,
            },
            rx,
        ))
    }

    /// Remove a handler registration; a stale handle is a no-op.
    pub fn remove_handler(&self, handle: &HandlerHandle) {
        let mut reg = self.registry.lock();
        if reg
            .handlers
            .get(&handle.topic)
            .is_some_and(|e| e.id == handle.id)
        {
            reg.handlers.remove(&handle.topic);
        }
    }

    /// Issue a request and await a settled outcome within `timeout`.
    ///
    /// The timeout runs on the tokio monotonic clock. The registry lock is
    /// released before any await.
    pub async fn request(
        &self,
        topic: &str,
        payload: BusMessage,
        timeout: Duration,
    ) -> RequestOutcome {
        let handler_tx = {
            let reg = self.registry.lock();
            match reg.handlers.get(topic) {
                Some(entry) => entry.tx.clone(),
                None => return RequestOutcome::NoHandler,
            }
        };

        let (reply_tx, reply_rx) = oneshot::channel();
        let job = RequestJob {
            topic: topic.to_string(),
            payload,
            reply: reply_tx,
        };
        if handler_tx.send(job).is_err() {
            // Handler task exited after registration.
            return RequestOutcome::NoHandler;
        }

        match tokio::time::timeout(timeout, reply_rx).await {
            Err(_) => RequestOutcome::Timeout,
            Ok(Err(_)) => RequestOutcome::HandlerError("handler dropped request".to_string()),
            Ok(Ok(Ok(msg))) => RequestOutcome::Ok(msg),
            Ok(Ok(Err(e))) => RequestOutcome::HandlerError(e),
        }
    }

    /// Number of live subscriptions (diagnostics).
    pub fn subscriber_count(&self) -> usize {
        self.registry.lock().subscribers.len()
    }
}

// ─── Tests ──────────────────────────────────────────────────────────
