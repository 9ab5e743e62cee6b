use crate::{Event, EventEnvelope};

/// A projection builds a read model from an append-only event stream.
///
/// Projections are the CQRS read side: they fold events into queryable,
/// denormalized state. Read models are **disposable** - the event stream is
/// the source of truth and a projection can always be rebuilt by replaying
/// the stream from scratch.
///
/// Projections must be **idempotent**: the bus gives at-least-once delivery,
/// so applying the same envelope twice must not change the read model
/// (implementations typically track sequence-number cursors per stream).
///
/// Persistence is out of scope here; implementations decide where the read
/// model lives (in-memory map for tests, SQL tables in production, ...).
pub trait Projection {
    type Ev: Event;

    /// Apply a single event to the projection, updating the read model.
    fn apply(&mut self, envelope: &EventEnvelope<Self::Ev>);
}
