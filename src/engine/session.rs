//! Inference session
//!
//! The public surface of the engine. A session owns its model and decode
//! state by value behind a dedicated worker thread; callers hold this handle
//! and submit work over a channel, receiving results on per-call reply
//! channels. Two sessions in one process are fully independent apart from
//! the shared llama.cpp backend handle.
//!
//! Every entry point is a long-running, thread-blocking call. Invoke off
//! any latency-sensitive thread.

use std::path::Path;
use std::sync::mpsc::{self, Sender};
use std::thread::JoinHandle;

use thiserror::Error;

use crate::config::EngineConfig;
use crate::engine::chat::{format_chat, ChatTurn};
use crate::engine::generate::{CancelHandle, GenerationRequest, GenerationResult};
use crate::engine::model::{read_gguf_header, ModelFileError, ModelInfo};
use crate::engine::state::{Readiness, ReadinessCell};
use crate::engine::worker::{spawn_worker, Command};

/// Errors surfaced by session operations.
///
/// Native failures never cross this boundary as panics; they collapse into
/// one of these variants so callers can branch on the failure kind.
#[derive(Debug, Error, Clone)]
pub enum EngineError {
    #[error("No model loaded")]
    NotLoaded,

    #[error("Failed to initialize backend: {0}")]
    Backend(String),

    #[error("Invalid model file: {0}")]
    FileInvalid(String),

    #[error("Failed to load model: {0}")]
    ModelLoad(String),

    #[error("Failed to create context: {0}")]
    ContextCreate(String),

    #[error("Tokenization failed: {0}")]
    Tokenize(String),

    #[error("Prompt encoded to zero tokens")]
    EmptyTokenization,

    #[error("Prompt too long: {tokens} tokens, budget is {budget}")]
    PromptTooLong { tokens: usize, budget: usize },

    #[error("Decode failed: {0}")]
    Decode(String),

    #[error("Worker thread error: {0}")]
    Worker(String),
}

impl From<ModelFileError> for EngineError {
    fn from(e: ModelFileError) -> Self {
        EngineError::FileInvalid(e.to_string())
    }
}

/// Handle to one inference session.
///
/// At most one model is resident per session; loading another frees the old
/// one first. All operations are serialized by the session's worker: two
/// overlapping `generate` calls produce two sequential results, first
/// sender wins.
pub struct InferenceSession {
    command_tx: Option<Sender<Command>>,
    worker: Option<JoinHandle<()>>,
    state: ReadinessCell,
    config: EngineConfig,
    info: Option<ModelInfo>,
}

impl InferenceSession {
    /// Starts a session with the given configuration (validated first).
    /// The worker thread lives until the handle is dropped.
    pub fn spawn(mut config: EngineConfig) -> Self {
        config.validate();
        let state = ReadinessCell::new();
        let (command_tx, worker) = spawn_worker(config.clone(), state.clone());
        tracing::debug!("inference session started");
        Self {
            command_tx: Some(command_tx),
            worker: Some(worker),
            state,
            config,
            info: None,
        }
    }

    fn send(&self, command: Command) -> Result<(), EngineError> {
        self.command_tx
            .as_ref()
            .ok_or_else(|| EngineError::Worker("worker stopped".to_string()))?
            .send(command)
            .map_err(|e| EngineError::Worker(e.to_string()))
    }

    /// Loads GGUF weights from `path`, replacing any resident model.
    ///
    /// The file header is validated on the calling thread before the worker
    /// is involved, so a malformed file fails fast. On any failure the
    /// session is left in the `Error` readiness state with no model
    /// resident.
    pub fn load_model<P: AsRef<Path>>(&mut self, path: P) -> Result<ModelInfo, EngineError> {
        let path = path.as_ref();

        if let Err(e) = read_gguf_header(path) {
            self.state.set(Readiness::Error);
            self.info = None;
            return Err(e.into());
        }
        tracing::debug!("GGUF header valid for {}", path.display());

        let (reply_tx, reply_rx) = mpsc::channel();
        self.send(Command::Load {
            path: path.to_path_buf(),
            reply: reply_tx,
        })?;

        let result = reply_rx
            .recv()
            .map_err(|e| EngineError::Worker(e.to_string()))?;
        match result {
            Ok(info) => {
                self.info = Some(info.clone());
                Ok(info)
            }
            Err(e) => {
                self.info = None;
                Err(e)
            }
        }
    }

    /// Runs one generation to completion and returns the result.
    ///
    /// A stepping decode failure or cancellation still returns `Ok` with
    /// the partial text and a stop reason saying so; only failures that
    /// produce no output at all are errors.
    pub fn generate(&self, request: GenerationRequest) -> Result<GenerationResult, EngineError> {
        self.generate_with_cancel(request, CancelHandle::new())
    }

    /// Like [`generate`](Self::generate), with a cancellation flag checked
    /// between decode steps.
    pub fn generate_with_cancel(
        &self,
        request: GenerationRequest,
        cancel: CancelHandle,
    ) -> Result<GenerationResult, EngineError> {
        let (reply_tx, reply_rx) = mpsc::channel();
        self.send(Command::Generate {
            request,
            cancel,
            reply: reply_tx,
        })?;
        reply_rx
            .recv()
            .map_err(|e| EngineError::Worker(e.to_string()))?
    }

    /// Formats a dialog with the session's chat template and generates the
    /// open assistant turn. `request.prompt` is replaced by the rendered
    /// dialog; the other request fields are used as given.
    pub fn chat(
        &self,
        turns: &[ChatTurn],
        mut request: GenerationRequest,
    ) -> Result<GenerationResult, EngineError> {
        request.prompt = format_chat(turns);
        self.generate(request)
    }

    /// Current lifecycle state. Side-effect free.
    pub fn readiness(&self) -> Readiness {
        self.state.get()
    }

    /// True once a model is resident, including during warm-up.
    pub fn is_loaded(&self) -> bool {
        self.state.is_loaded()
    }

    /// Metadata of the resident model, if any.
    pub fn model_info(&self) -> Option<&ModelInfo> {
        self.info.as_ref()
    }

    /// Diagnostic one-liner. Never empty.
    pub fn info_string(&self) -> String {
        match &self.info {
            Some(info) if self.is_loaded() => info.summary(&self.config),
            _ => "no model loaded".to_string(),
        }
    }

    pub fn config(&self) -> &EngineConfig {
        &self.config
    }

    /// Frees the resident model and context. Idempotent; a no-op when
    /// nothing is loaded.
    pub fn unload(&mut self) {
        let (reply_tx, reply_rx) = mpsc::channel();
        if self.send(Command::Unload { reply: reply_tx }).is_ok() {
            let _ = reply_rx.recv();
        }
        self.info = None;
    }
}

impl Drop for InferenceSession {
    fn drop(&mut self) {
        if let Some(tx) = self.command_tx.take() {
            let _ = tx.send(Command::Shutdown);
        }
        if let Some(worker) = self.worker.take() {
            let _ = worker.join();
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Write;

    fn session() -> InferenceSession {
        InferenceSession::spawn(EngineConfig::default())
    }

    #[test]
    fn test_generate_before_load_fails_not_loaded() {
        let s = session();
        let result = s.generate(GenerationRequest::new("Hello"));
        assert!(matches!(result, Err(EngineError::NotLoaded)));
        // The failed call must not disturb the lifecycle state.
        assert_eq!(s.readiness(), Readiness::NotLoaded);
        assert!(!s.is_loaded());
    }

    #[test]
    fn test_chat_before_load_fails_not_loaded() {
        let s = session();
        let result = s.chat(
            &[ChatTurn::user("Hello")],
            GenerationRequest::default(),
        );
        assert!(matches!(result, Err(EngineError::NotLoaded)));
    }

    #[test]
    fn test_load_rejects_invalid_file() {
        let mut file = tempfile::Builder::new().suffix(".gguf").tempfile().unwrap();
        file.write_all(b"this is not a model").unwrap();
        file.flush().unwrap();

        let mut s = session();
        let result = s.load_model(file.path());
        assert!(matches!(result, Err(EngineError::FileInvalid(_))));
        assert_eq!(s.readiness(), Readiness::Error);
        assert!(s.model_info().is_none());
    }

    #[test]
    fn test_load_rejects_missing_file() {
        let mut s = session();
        let result = s.load_model("/nonexistent/model.gguf");
        assert!(matches!(result, Err(EngineError::FileInvalid(_))));
        assert_eq!(s.readiness(), Readiness::Error);
    }

    #[test]
    fn test_unload_without_model_is_idempotent() {
        let mut s = session();
        s.unload();
        s.unload();
        assert_eq!(s.readiness(), Readiness::NotLoaded);
        assert!(s.model_info().is_none());
    }

    #[test]
    fn test_info_string_without_model() {
        let s = session();
        assert_eq!(s.info_string(), "no model loaded");
    }

    #[test]
    fn test_config_is_validated_on_spawn() {
        let config = EngineConfig {
            context_length: 1, // below the minimum, must be clamped
            ..EngineConfig::default()
        };
        let s = InferenceSession::spawn(config);
        assert!(s.config().context_length >= 256);
    }
}
