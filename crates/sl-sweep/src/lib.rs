//! # sl-sweep
//!
//! The sweep controller: runs N trials of a training script with parameters
//! proposed by a search algorithm, under a concurrency cap, and tracks each
//! trial from pending to succeeded, failed or pruned.
//!
//! - [`Sweep`] is the per-sweep state machine, advanced by [`Sweep::tick`].
//! - [`SweepController`] keeps live sweeps in line with the configurations in
//!   a [`sl_store::ConfigStore`].
//! - [`ObjectiveRunner`] executes one trial; [`ScriptObjective`] runs it as a
//!   local process.
//! - [`SweepLogger`] receives trial lifecycle notifications.

pub mod controller;
pub mod logger;
pub mod objective;
pub mod script;
pub mod sweep;

#[cfg(test)]
mod test_support;

pub use controller::SweepController;
pub use logger::{build_logger, ChannelLogger, SilentLogger, SweepEvent, SweepLogger, TracingLogger};
pub use objective::{ObjectiveContext, ObjectiveFactory, ObjectiveRegistry, ObjectiveRunner};
pub use script::ScriptObjective;
pub use sweep::Sweep;
