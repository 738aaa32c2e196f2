//! The turn engine (§4.10): two entrypoints — inbound chat messages and
//! inbound gateway events — sharing one tool-call loop.

pub mod canonical;
pub mod engine;

pub use engine::{handle_gateway_event, handle_matrix_message};
