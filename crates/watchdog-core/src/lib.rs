//! Health check and self-healing loop for the WhatsApp gateway.
//!
//! One call to [`Orchestrator::run_exclusive`] is one scheduled check. The
//! gateway, the email CLI and the voice API sit behind the traits in
//! [`probe`], [`gateway`] and [`alert`], so every step can be swapped out.

pub mod alert;
pub mod command;
pub mod config;
pub mod error;
pub mod gateway;
pub mod io;
pub mod lock;
pub mod orchestrator;
pub mod paths;
pub mod probe;
pub mod state;

pub use error::{Result, WatchdogError};
pub use orchestrator::{CheckOutcome, CheckReport, Orchestrator};
