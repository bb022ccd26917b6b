//! Model file handling
//!
//! GGUF header validation and the metadata snapshot kept for a resident
//! model. The header check runs before the path is handed to llama.cpp so an
//! obviously broken file fails fast with a precise error instead of a
//! loader-internal one.

use std::fs::File;
use std::io::{BufReader, Read};
use std::path::{Path, PathBuf};
use thiserror::Error;

use crate::config::EngineConfig;

/// GGUF magic bytes (little-endian: "GGUF")
pub const GGUF_MAGIC: u32 = 0x4655_4747;

/// Header size: magic(4) + version(4) + tensor_count(8) + kv_count(8)
const GGUF_HEADER_LEN: u64 = 24;

/// Errors raised by model file validation
#[derive(Debug, Error)]
pub enum ModelFileError {
    #[error("Failed to open model file: {0}")]
    Open(#[from] std::io::Error),

    #[error("Not a GGUF file: magic bytes mismatch (expected 0x{GGUF_MAGIC:08X}, got 0x{0:08X})")]
    BadMagic(u32),

    #[error("Unsupported GGUF version: {0}")]
    UnsupportedVersion(u32),

    #[error("File truncated: {0} bytes is smaller than a GGUF header")]
    Truncated(u64),
}

/// Fields read from a GGUF file header.
#[derive(Debug, Clone)]
pub struct GgufHeader {
    pub version: u32,
    pub tensor_count: u64,
    pub kv_count: u64,
}

fn read_u32_le(r: &mut impl Read) -> Result<u32, ModelFileError> {
    let mut buf = [0u8; 4];
    r.read_exact(&mut buf)?;
    Ok(u32::from_le_bytes(buf))
}

fn read_u64_le(r: &mut impl Read) -> Result<u64, ModelFileError> {
    let mut buf = [0u8; 8];
    r.read_exact(&mut buf)?;
    Ok(u64::from_le_bytes(buf))
}

/// Checks that `path` starts with a well-formed GGUF header.
///
/// GGUF v2 and v3 are accepted. This parses the fixed-size header only; the
/// tensor payload is left to the runtime loader.
pub fn read_gguf_header<P: AsRef<Path>>(path: P) -> Result<GgufHeader, ModelFileError> {
    let file = File::open(path.as_ref())?;

    let file_size = file.metadata()?.len();
    if file_size < GGUF_HEADER_LEN {
        return Err(ModelFileError::Truncated(file_size));
    }

    let mut reader = BufReader::new(file);

    let magic = read_u32_le(&mut reader)?;
    if magic != GGUF_MAGIC {
        return Err(ModelFileError::BadMagic(magic));
    }

    let version = read_u32_le(&mut reader)?;
    if !(2..=3).contains(&version) {
        return Err(ModelFileError::UnsupportedVersion(version));
    }

    let tensor_count = read_u64_le(&mut reader)?;
    let kv_count = read_u64_le(&mut reader)?;

    Ok(GgufHeader {
        version,
        tensor_count,
        kv_count,
    })
}

/// Metadata snapshot of the resident model.
#[derive(Debug, Clone)]
pub struct ModelInfo {
    /// Path the model was loaded from
    pub path: PathBuf,
    /// Vocabulary size
    pub vocab_size: i32,
    /// Embedding dimension
    pub embedding_dim: i32,
    /// Context length the model was trained with
    pub train_context_length: u32,
    /// Total parameter count
    pub param_count: u64,
    /// Model file size in bytes
    pub size_bytes: u64,
}

impl ModelInfo {
    /// One-line diagnostic summary, combining model metadata with the
    /// session's decode configuration.
    pub fn summary(&self, config: &EngineConfig) -> String {
        format!(
            "vocab {} | ctx {} (trained {}) | threads {} | kv {} | {:.1}M params",
            self.vocab_size,
            config.context_length,
            self.train_context_length,
            config.threads,
            config.kv_precision.label(),
            self.param_count as f64 / 1.0e6,
        )
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Write;
    use tempfile::NamedTempFile;

    fn write_header(version: u32, tensors: u64, kvs: u64) -> NamedTempFile {
        let mut file = tempfile::Builder::new().suffix(".gguf").tempfile().unwrap();
        file.write_all(&GGUF_MAGIC.to_le_bytes()).unwrap();
        file.write_all(&version.to_le_bytes()).unwrap();
        file.write_all(&tensors.to_le_bytes()).unwrap();
        file.write_all(&kvs.to_le_bytes()).unwrap();
        file.flush().unwrap();
        file
    }

    #[test]
    fn test_valid_header() {
        let file = write_header(3, 291, 24);
        let header = read_gguf_header(file.path()).unwrap();
        assert_eq!(header.version, 3);
        assert_eq!(header.tensor_count, 291);
        assert_eq!(header.kv_count, 24);
    }

    #[test]
    fn test_bad_magic() {
        let mut file = tempfile::Builder::new().suffix(".gguf").tempfile().unwrap();
        file.write_all(&0xDEAD_BEEFu32.to_le_bytes()).unwrap();
        file.write_all(&[0u8; 20]).unwrap();
        file.flush().unwrap();

        let result = read_gguf_header(file.path());
        assert!(matches!(result, Err(ModelFileError::BadMagic(0xDEAD_BEEF))));
    }

    #[test]
    fn test_unsupported_version() {
        let file = write_header(1, 0, 0);
        let result = read_gguf_header(file.path());
        assert!(matches!(result, Err(ModelFileError::UnsupportedVersion(1))));
    }

    #[test]
    fn test_truncated_file() {
        let mut file = tempfile::Builder::new().suffix(".gguf").tempfile().unwrap();
        file.write_all(&GGUF_MAGIC.to_le_bytes()).unwrap();
        file.flush().unwrap();

        let result = read_gguf_header(file.path());
        assert!(matches!(result, Err(ModelFileError::Truncated(4))));
    }

    #[test]
    fn test_missing_file() {
        let result = read_gguf_header("/nonexistent/model.gguf");
        assert!(matches!(result, Err(ModelFileError::Open(_))));
    }

    #[test]
    fn test_info_summary_mentions_every_field() {
        let info = ModelInfo {
            path: PathBuf::from("m.gguf"),
            vocab_size: 32000,
            embedding_dim: 2048,
            train_context_length: 8192,
            param_count: 1_100_000_000,
            size_bytes: 700_000_000,
        };
        let config = EngineConfig::default();
        let summary = info.summary(&config);
        assert!(summary.contains("32000"));
        assert!(summary.contains("4096"));
        assert!(summary.contains("threads 4"));
        assert!(summary.contains("f16"));
        assert!(!summary.is_empty());
    }
}
