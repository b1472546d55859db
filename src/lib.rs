//! Dealership assistant
//!
//! A conversational agent for a car dealership: it answers inventory
//! questions and books, lists and cancels test drives through tool calls,
//! with cancellations gated behind an explicit confirmation.

pub mod agents;
pub mod config;
pub mod db;
pub mod llm;
pub mod runtime;
pub mod session;
pub mod state_machine;
pub mod store;
pub mod system_prompt;
pub mod tools;
