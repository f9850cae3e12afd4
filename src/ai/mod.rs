pub mod client;
pub mod credentials;
pub mod gateway;
pub mod prompts;
pub mod retry;
pub mod utils;

pub use client::{ChatBackend, ChatMessage, ChatRequest, ChatResponse, OpenAiClient};
pub use gateway::LanguageModelGateway;
pub use prompts::{PromptSet, PromptTemplate};
pub use retry::{is_transient, RetryPolicy};
