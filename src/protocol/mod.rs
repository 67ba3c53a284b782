pub mod anthropic;
pub mod canonical;
pub mod error_shapes;
pub mod gemini;
pub mod mapping;
pub mod openai_chat;
pub mod openai_responses;
