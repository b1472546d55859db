//! Turn state machine
//!
//! Elm-style: `transition` is pure and returns effects for the executor in
//! `runtime` to carry out.

mod effect;
pub mod event;
pub mod state;
pub(crate) mod transition;

#[cfg(test)]
mod proptests;

pub use effect::Effect;
pub use event::{DepartmentOutcome, Event};
pub use state::{ConvContext, ConvState, DelegationFrame, Department, PendingInterrupt, ToolCall, ToolInput};
pub use transition::{transition, TransitionError, TransitionResult};
