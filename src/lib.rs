//! Building blocks of the Nillion quickstart: devnet configuration, payment
//! for cluster operations, secret values, Nada programs and the workflow that
//! strings them together.

pub mod client;
pub mod config;
pub mod devnet;
pub mod error;
pub mod keys;
pub mod operation;
pub mod payments;
pub mod program;
pub mod telemetry;
pub mod values;
pub mod workflow;

pub use error::{
    Error,
    Result,
};
