//! Host orchestration: tool namespace merging and the tool-calling loop

pub mod core;
pub mod namespace;

pub use core::{close_sessions, open_servers, Host};
pub use namespace::{ToolConflict, ToolNamespace};
