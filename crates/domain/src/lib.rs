pub mod config;
pub mod error;
pub mod redact;
pub mod tool;
pub mod trace;

mod capability;
mod stream;

pub use error::{Error, Result};
pub use stream::{BoxStream, StreamEvent, Usage};
