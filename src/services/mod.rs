//! External service integrations
//!
//! Currently the LLM chat provider used by the adjudication committee and
//! the item generator.

pub mod llm;

pub use llm::{AnthropicProvider, ChatProvider, LlmConfig};
