pub mod client;
pub mod error;
pub mod prompt;
pub mod transform;
pub mod types;

pub use client::{ChatBackend, Endpoint, HttpChatClient};
pub use error::ApiError;
pub use transform::{Generated, TransformationClient};
pub use types::{ChatMessage, ChatRequest, ChatResponse, QaPair};
