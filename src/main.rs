//! One-shot generation demo
//!
//! Loads a GGUF model and generates a single chat reply:
//! `pocketlm <model.gguf> [prompt]`

use tracing::info;
use tracing_subscriber::{fmt, prelude::*, EnvFilter};

use pocketlm::{load_config, ChatTurn, GenerationRequest, InferenceSession};

fn main() {
    tracing_subscriber::registry()
        .with(fmt::layer())
        .with(EnvFilter::from_default_env().add_directive("pocketlm=info".parse().unwrap()))
        .init();

    let mut args = std::env::args().skip(1);
    let model_path = match args.next() {
        Some(p) => p,
        None => {
            eprintln!("usage: pocketlm <model.gguf> [prompt]");
            std::process::exit(2);
        }
    };
    let prompt = args.next().unwrap_or_else(|| "Hello! Who are you?".to_string());

    info!("Starting pocketlm v{}", env!("CARGO_PKG_VERSION"));

    let mut session = InferenceSession::spawn(load_config());

    if let Err(e) = session.load_model(&model_path) {
        eprintln!("failed to load model: {e}");
        std::process::exit(1);
    }
    info!("{}", session.info_string());

    let turns = [
        ChatTurn::system("You are a concise assistant."),
        ChatTurn::user(prompt),
    ];
    match session.chat(&turns, GenerationRequest::default()) {
        Ok(result) => {
            info!(
                "{} tokens, stopped on {:?}",
                result.tokens_generated, result.stop_reason
            );
            println!("{}", result.text);
        }
        Err(e) => {
            eprintln!("generation failed: {e}");
            std::process::exit(1);
        }
    }
}
