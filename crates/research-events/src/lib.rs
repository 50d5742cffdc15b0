//! Process-local event bus, embedded SQLite event store, and the
//! event-sourced research state aggregate.
//!
//! These three pieces are layered: `bus` is purely advisory UI plumbing,
//! `store` persists `events::DomainEvent`s durably, and `aggregate` is the
//! command/event/apply state machine the orchestrators drive through the
//! store.

pub mod aggregate;
pub mod bus;
pub mod events;
pub mod store;

pub use aggregate::{Command, ResearchState};
pub use bus::{EngineEvent, EventBus};
pub use events::DomainEvent;
pub use store::{EventStore, Snapshot, SqliteEventStore, StoredEvent};

/// Current version of the research-events crate.
pub const VERSION: &str = env!("CARGO_PKG_VERSION");
