//! The conversation engine — the heart of chatterclaw.
//!
//! A batch of chat lines goes in, one reply comes out:
//!
//! 1. **Build turns**: a context turn plus one user turn per new line
//! 2. **Compact**: fold old turns into a summary when over budget
//! 3. **Call the model** with the tool catalog
//! 4. **If tool calls**: execute them, append results, loop back to step 2
//! 5. **Finalize**: strip reasoning, prune tool rounds, persist
//!
//! The loop is bounded by a round limit and by a repeat detector; either
//! one ends it with a single tools-disabled call.

pub mod context;
pub mod engine;
pub mod finalizer;
pub mod inline_calls;
pub mod resilience;
pub mod tool_loop;
pub mod turn_builder;

#[cfg(test)]
pub(crate) mod test_helpers;

pub use context::{ContextCompactor, SUMMARY_PREFIX, hard_trim};
pub use engine::ConversationEngine;
pub use finalizer::{OutputFinalizer, strip_reasoning};
pub use resilience::{FORCE_ANSWER_INSTRUCTION, ModelClient, ModelSettings};
pub use tool_loop::{FORCE_FINAL_INSTRUCTION, ForcedReason, LoopOutcome, NOT_EXECUTED, ToolLoop};
pub use turn_builder::TurnBuilder;
