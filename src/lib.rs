// Clippy allows for reasonable defaults
#![allow(clippy::new_without_default)] // Default not always appropriate for stateful types
#![allow(clippy::collapsible_if)] // Separate ifs can be more readable

//! PTY relay: runs an interactive coding-assistant CLI inside a pseudo-terminal
//! and shares it with remote observers over WebSocket.
//!
//! Output is replayed to late joiners, scanned for usage metrics, and watched
//! for prompts so a debounced push alert can go out when the assistant is
//! waiting on a human.

// Module declarations
pub mod config;
pub mod error;
pub mod hub;
pub mod notify;
pub mod server;
pub mod shutdown;
pub mod supervisor;
pub mod terminal;
mod utils;

pub use error::{RelayError, Result};
