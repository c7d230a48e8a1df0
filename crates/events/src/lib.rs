//! Event model: the `Event` trait, recorded events, and snapshots.

pub mod command;
pub mod event;
pub mod recorded;

pub use command::CommandMeta;
pub use event::Event;
pub use recorded::{RecordedEvent, StreamSnapshot};
