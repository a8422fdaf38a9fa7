// ABOUTME: Policy module — scopes, durable approvals, and the enforcement engine.
// ABOUTME: Side-effect tools pass through here before any handler runs.

pub mod approvals;
pub mod engine;
pub mod scopes;

pub use approvals::*;
pub use engine::*;
pub use scopes::*;
