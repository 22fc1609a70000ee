#![warn(clippy::all)]
#![allow(clippy::module_name_repetitions, clippy::missing_errors_doc)]

//! Critical-only routing for code-review suggestions.
//!
//! Producers push suggestions into a [`tunnel::Tunnel`], which drops
//! optimization noise and bins what is left for downstream dispatch. A
//! background [`adjudication::EvaluationScheduler`] periodically has an
//! external classifier judge each agent and credits the outcome to the
//! [`rewards::RewardLedger`].

pub mod adjudication;
pub mod config;
pub mod error;
pub mod pipeline;
pub mod rewards;
pub mod tunnel;

pub use config::Config;
pub use error::{AdjudicationError, TunnelError};
pub use pipeline::Pipeline;
