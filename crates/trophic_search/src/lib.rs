//! Concurrent random search over the three-species food-chain model.
//!
//! The binary samples parameter vectors, integrates each one from a grid of
//! initial states and sorts the outcomes into category logs:
//!
//! - [`orchestrator`] keeps a fixed number of search chains in flight.
//! - [`aggregator`] owns the counters, the log files and the status line.
//! - [`config`], [`cli`] and [`logging`] form the ambient layer.

pub mod aggregator;
pub mod app;
pub mod cli;
pub mod config;
pub mod logging;
pub mod orchestrator;
