//! pocketlm
//!
//! On-device LLM inference session engine built on llama.cpp. A session
//! owns one loaded model and turns prompts into text under fixed memory and
//! context budgets, serializing all work through a dedicated worker thread.

pub mod config;
pub mod engine;

pub use config::{load_config, save_config, EngineConfig, KvPrecision};
pub use engine::{
    CancelHandle, ChatTurn, EngineError, GenerationRequest, GenerationResult, InferenceSession,
    ModelInfo, Readiness, Role, StopReason,
};
