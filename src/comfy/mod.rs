pub mod client;
pub mod error;
pub mod types;

pub use client::ComfyClient;
pub use error::{ComfyError, ComfyErrorKind};
