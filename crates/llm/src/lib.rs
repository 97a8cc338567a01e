//! Chat-completion clients for Beebo.
//!
//! The memory crate only needs one thing from a language model: a short
//! digest of recent memories for change-stream subscribers. This crate keeps
//! that dependency behind the [`LlmClient`] trait, with an OpenAI-compatible
//! implementation wrapped in retry and concurrency limits.

pub mod client;
pub mod config;
pub mod openai;
pub mod retry;

pub use client::{ChatMessage, LlmClient, LlmRequest, LlmResponse, Role, TokenUsage};
pub use config::{build_llm_client, LlmConfig, SemaphoredClient};
pub use openai::OpenAiClient;
pub use retry::{RetryConfig, RetryingClient};
