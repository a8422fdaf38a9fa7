// ABOUTME: Agent module — conversation model, session log, provider adapter, turn executor.
// ABOUTME: The executor drives model ↔ tools ↔ history until a final reply or suspension.

pub mod context;
pub mod r#loop;
pub mod provider;
pub mod sessions;

pub use context::*;
pub use provider::*;
pub use r#loop::*;
pub use sessions::*;
