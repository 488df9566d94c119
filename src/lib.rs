//! Human-in-the-loop trading agent
//!
//! A conversational agent that:
//! - Lets a model answer directly or request tool calls
//! - Dispatches tool calls through a schema-checked registry
//! - Suspends the whole run when a tool needs human approval
//! - Checkpoints every transition so a suspended thread can resume later
//!
//! RUN LOOP:
//! INPUT → MODEL → TOOLS → MODEL → ... → ANSWER
//!                   ↓
//!               SUSPEND → (human decision) → RESUME

pub mod api;
pub mod checkpoint;
pub mod config;
pub mod error;
pub mod gateway;
pub mod graph;
pub mod models;
pub mod shell;
pub mod tools;

pub use error::Result;

// Re-export common types
pub use models::*;
pub use graph::ExecutionGraph;
