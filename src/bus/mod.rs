//! Shared-file buses between cooperating instances.
//!
//! Exactly one writer (the leader) replaces the document; every other
//! instance polls it. Unreadable content always means "nothing new".

pub mod atomic;
pub mod command;
pub mod state;

pub use command::CommandBus;
pub use state::StateBus;
