//! TERRA Event Mesh
//!
//! Process-local topic bus wiring all subsystems together. Two delivery
//! modes:
//!
//! - **Publish/subscribe**: fan-out fire-and-forget. Subscribers receive
//!   through unbounded channels in registration order; the publisher returns
//!   as soon as every matching subscriber has been enqueued. A dead
//!   subscriber is logged and skipped, never propagated to the publisher or
//!   to later subscribers.
//! - **Request/response**: exactly one handler per topic (first registration
//!   wins), per-call timeout on a monotonic clock, settled outcome.
//!
//! The mesh is the only communication path between subsystems; every payload
//! is an immutable [`BusMessage`](terra_common::types::bus::BusMessage)
//! snapshot, so there is no shared mutable state to guard.

mod bus;

pub use bus::{
    Envelope, HandlerHandle, Mesh, MeshError, RequestJob, RequestOutcome, SubscriptionHandle,
    DEFAULT_DIAGNOSTIC_TIMEOUT, DEFAULT_STATUS_TIMEOUT,
};
