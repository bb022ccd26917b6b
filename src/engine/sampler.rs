//! Token selection
//!
//! Builds a fresh sampler per request. Greedy selection when the request
//! asks for zero temperature, otherwise temperature scaling into nucleus
//! filtering into a seeded weighted draw. Nothing is shared between
//! requests.

use llama_cpp_2::sampling::LlamaSampler;

/// Sampling inputs resolved from one generation request.
#[derive(Debug, Clone, Copy)]
pub struct SamplerSpec {
    pub temperature: f32,
    pub top_p: f32,
    pub seed: u32,
}

impl SamplerSpec {
    /// Normalizes raw request parameters. A zero seed is replaced with one
    /// drawn from system entropy so two stochastic requests do not repeat.
    pub fn resolve(temperature: f32, top_p: f32, seed: u32) -> Self {
        Self {
            temperature,
            top_p: top_p.clamp(0.01, 1.0),
            seed: if seed == 0 { entropy_seed().max(1) } else { seed },
        }
    }

    /// Deterministic selection is used at or below zero temperature.
    pub fn is_greedy(&self) -> bool {
        self.temperature <= 0.0
    }

    /// Builds the llama.cpp sampler chain for this request.
    pub fn build(&self) -> LlamaSampler {
        if self.is_greedy() {
            LlamaSampler::greedy()
        } else {
            LlamaSampler::chain_simple([
                LlamaSampler::temp(self.temperature),
                LlamaSampler::top_p(self.top_p, 1),
                LlamaSampler::dist(self.seed),
            ])
        }
    }
}

/// Generates a random seed using system entropy
fn entropy_seed() -> u32 {
    use std::collections::hash_map::RandomState;
    use std::hash::{BuildHasher, Hasher};
    RandomState::new().build_hasher().finish() as u32
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_zero_temperature_is_greedy() {
        assert!(SamplerSpec::resolve(0.0, 0.9, 1).is_greedy());
        assert!(SamplerSpec::resolve(-1.0, 0.9, 1).is_greedy());
    }

    #[test]
    fn test_positive_temperature_is_stochastic() {
        assert!(!SamplerSpec::resolve(0.01, 0.9, 1).is_greedy());
        assert!(!SamplerSpec::resolve(0.7, 0.9, 1).is_greedy());
    }

    #[test]
    fn test_top_p_is_clamped() {
        let spec = SamplerSpec::resolve(0.7, 3.0, 1);
        assert_eq!(spec.top_p, 1.0);
        let spec = SamplerSpec::resolve(0.7, 0.0, 1);
        assert_eq!(spec.top_p, 0.01);
    }

    #[test]
    fn test_explicit_seed_is_kept() {
        let spec = SamplerSpec::resolve(0.7, 0.9, 1234);
        assert_eq!(spec.seed, 1234);
    }

    #[test]
    fn test_zero_seed_is_replaced() {
        let spec = SamplerSpec::resolve(0.7, 0.9, 0);
        assert_ne!(spec.seed, 0);
    }
}
