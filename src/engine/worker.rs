//! Worker thread
//!
//! llama-cpp-2 handles (`LlamaBackend`, `LlamaModel`, `LlamaContext`) wrap
//! raw pointers that must never see concurrent native calls. Each session
//! therefore runs one dedicated worker thread that owns the resident model
//! and processes commands strictly one at a time. Serialization of load,
//! generate, and unload falls out of the channel; no lock is held across
//! the blocking native calls.

use std::num::NonZeroU32;
use std::path::{Path, PathBuf};
use std::sync::mpsc::{self, Receiver, Sender};
use std::sync::OnceLock;
use std::thread::JoinHandle;
use std::time::Instant;

use llama_cpp_2::context::params::LlamaContextParams;
use llama_cpp_2::llama_backend::LlamaBackend;
use llama_cpp_2::model::params::LlamaModelParams;
use llama_cpp_2::model::LlamaModel;

use crate::config::EngineConfig;
use crate::engine::chat::{format_chat, ChatTurn};
use crate::engine::generate::{run_generation, CancelHandle, GenerationRequest, GenerationResult};
use crate::engine::model::ModelInfo;
use crate::engine::session::EngineError;
use crate::engine::state::{Readiness, ReadinessCell};

/// The process-wide llama.cpp backend. llama.cpp only allows one backend
/// init per process, so every session shares this handle.
static BACKEND: OnceLock<Result<LlamaBackend, String>> = OnceLock::new();

fn backend() -> Result<&'static LlamaBackend, EngineError> {
    let result = BACKEND.get_or_init(|| {
        let mut backend = LlamaBackend::init().map_err(|e| e.to_string())?;
        backend.void_logs();
        Ok(backend)
    });
    result
        .as_ref()
        .map_err(|e| EngineError::Backend(e.clone()))
}

/// Commands sent to the worker thread
pub(crate) enum Command {
    Load {
        path: PathBuf,
        reply: Sender<Result<ModelInfo, EngineError>>,
    },
    Generate {
        request: GenerationRequest,
        cancel: CancelHandle,
        reply: Sender<Result<GenerationResult, EngineError>>,
    },
    Unload {
        reply: Sender<()>,
    },
    Shutdown,
}

/// Spawns the session worker. The returned sender is the only way in.
pub(crate) fn spawn_worker(
    config: EngineConfig,
    state: ReadinessCell,
) -> (Sender<Command>, JoinHandle<()>) {
    let (command_tx, command_rx) = mpsc::channel::<Command>();
    let handle = std::thread::spawn(move || {
        worker_main(config, state, command_rx);
    });
    (command_tx, handle)
}

fn worker_main(config: EngineConfig, state: ReadinessCell, command_rx: Receiver<Command>) {
    let mut model: Option<LlamaModel> = None;

    loop {
        match command_rx.recv() {
            Ok(Command::Load { path, reply }) => {
                // Free any resident model before loading the replacement.
                if model.take().is_some() {
                    tracing::info!("freeing resident model before load");
                }
                state.set(Readiness::Loading);

                match load_model(&path, &config) {
                    Ok((m, info)) => {
                        model = Some(m);
                        state.set(Readiness::WarmingUp);
                        let _ = reply.send(Ok(info));

                        // Warm-up is a latency optimization, not a
                        // correctness gate; failure still advances to Ready.
                        if let (Ok(b), Some(m)) = (backend(), model.as_ref()) {
                            warm_up(b, m, &config);
                        }
                        state.set(Readiness::Ready);
                    }
                    Err(e) => {
                        state.set(Readiness::Error);
                        let _ = reply.send(Err(e));
                    }
                }
            }
            Ok(Command::Generate {
                request,
                cancel,
                reply,
            }) => {
                let result = match model.as_ref() {
                    Some(m) => {
                        backend().and_then(|b| run_generation(b, m, &config, &request, &cancel))
                    }
                    None => Err(EngineError::NotLoaded),
                };
                let _ = reply.send(result);
            }
            Ok(Command::Unload { reply }) => {
                if model.take().is_some() {
                    tracing::info!("model unloaded");
                }
                state.set(Readiness::NotLoaded);
                let _ = reply.send(());
            }
            Ok(Command::Shutdown) => {
                tracing::debug!("worker shutting down");
                break;
            }
            Err(_) => {
                // All session handles dropped.
                break;
            }
        }
    }
}

/// Loads weights CPU-only and probes that a context can be built against
/// them. If the probe fails the fresh model is dropped on return, so the
/// engine never retains a model it cannot decode with.
fn load_model(path: &Path, config: &EngineConfig) -> Result<(LlamaModel, ModelInfo), EngineError> {
    let backend = backend()?;
    let started = Instant::now();

    // Accelerator offload explicitly disabled.
    let model_params = LlamaModelParams::default().with_n_gpu_layers(0);

    let model = LlamaModel::load_from_file(backend, path, &model_params)
        .map_err(|e| EngineError::ModelLoad(e.to_string()))?;

    {
        let n_ctx = NonZeroU32::new(config.context_length)
            .ok_or_else(|| EngineError::ContextCreate("context length is zero".to_string()))?;
        let probe_params = LlamaContextParams::default()
            .with_n_ctx(Some(n_ctx))
            .with_n_batch(config.batch_size)
            .with_n_threads(config.threads)
            .with_n_threads_batch(config.threads);
        let probe = model
            .new_context(backend, probe_params)
            .map_err(|e| EngineError::ContextCreate(e.to_string()))?;
        drop(probe);
    }

    let info = ModelInfo {
        path: path.to_path_buf(),
        vocab_size: model.n_vocab(),
        embedding_dim: model.n_embd(),
        train_context_length: model.n_ctx_train(),
        param_count: model.n_params() as u64,
        size_bytes: model.size() as u64,
    };

    tracing::info!(
        "model loaded in {:?}: {}",
        started.elapsed(),
        info.summary(config)
    );

    Ok((model, info))
}

/// One trivial greedy generation to pre-trigger lazy native initialization.
fn warm_up(backend: &LlamaBackend, model: &LlamaModel, config: &EngineConfig) {
    let request = GenerationRequest {
        prompt: format_chat(&[ChatTurn::user("Hi")]),
        max_tokens: 2,
        temperature: 0.0,
        top_p: 1.0,
        seed: 1,
    };

    let started = Instant::now();
    match run_generation(backend, model, config, &request, &CancelHandle::new()) {
        Ok(_) => tracing::info!("warm-up pass finished in {:?}", started.elapsed()),
        Err(e) => tracing::warn!("warm-up pass failed (non-fatal): {e}"),
    }
}
