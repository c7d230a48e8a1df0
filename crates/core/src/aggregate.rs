//! Aggregate traits for event-sourced domain models.

/// Aggregate root marker + minimal interface.
///
/// This is intentionally small so domain modules can decide how they model
/// state transitions without bringing in any infrastructure concerns.
pub trait AggregateRoot {
    /// Strongly-typed aggregate identifier.
    type Id: Clone + Eq + core::hash::Hash + core::fmt::Debug;

    /// Returns the aggregate identifier.
    fn id(&self) -> &Self::Id;

    /// Monotonically increasing version of the aggregate's state.
    ///
    /// Corresponds to the number of events applied (the stream revision).
    fn version(&self) -> u64;
}

/// Event-sourced aggregate: pure decide + total fold.
///
/// `handle` is the decider: it never mutates state and either accepts the
/// command by returning exactly one event, or rejects it with a domain error.
/// `apply` is the fold: total and deterministic, so replaying a stream (or a
/// snapshot plus its tail) always reproduces the same state.
pub trait Aggregate: AggregateRoot {
    /// The command union this aggregate accepts.
    type Command;

    /// The event union this aggregate emits and folds.
    type Event;

    /// Rejection type for `handle`.
    type Error;

    /// Fold one event into state. Must be total and side-effect free.
    fn apply(&mut self, event: &Self::Event);

    /// Decide on a command against current state. Must not mutate `self`.
    fn handle(&self, command: &Self::Command) -> Result<Self::Event, Self::Error>;
}
