//! Inference session engine
//!
//! This module handles all interaction with llama.cpp: model lifecycle,
//! context management, and the generation loop.

pub mod batch;
pub mod chat;
pub mod generate;
pub mod model;
pub mod sampler;
pub mod session;
pub mod state;
pub mod text;

mod worker;

// Re-export main types for convenience
pub use chat::{format_chat, ChatTurn, Role, TURN_END};
pub use generate::{CancelHandle, GenerationRequest, GenerationResult, StopReason};
pub use model::{read_gguf_header, GgufHeader, ModelFileError, ModelInfo, GGUF_MAGIC};
pub use session::{EngineError, InferenceSession};
pub use state::Readiness;
