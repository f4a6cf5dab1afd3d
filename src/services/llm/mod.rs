//! LLM layer: the generation capability trait, the OpenAI-compatible HTTP
//! client, and the pipeline's prompt builders.

pub mod client;
pub mod models;
pub mod prompts;

pub use client::{LlmClient, OpenAiCompatClient};
pub use models::{GenerateRequest, GenerateResponse, LlmError, LlmProvider};
pub use prompts::SchemaHints;
