//! The engine handle carrying validated configuration and the salt hash.

use veilql_error::Result;
use veilql_types::AnonConfig;

use crate::oracle::{
    Seed, generate_layered_noise, generate_lcf_threshold, generate_normal_noise,
    generate_uniform_noise, hash_bytes,
};

/// Validated anonymization context.
///
/// Owns the parameter bundle and the precomputed salt hash; a reference is
/// threaded into every aggregation call instead of any global state. Cheap
/// to clone behind an `Arc` at the descriptor level.
#[derive(Debug, Clone)]
pub struct AnonContext {
    config: AnonConfig,
    salt_hash: Seed,
}

impl AnonContext {
    /// Validates `config` and derives the salt hash.
    pub fn new(config: AnonConfig) -> Result<Self> {
        config.validate()?;
        let salt_hash = hash_bytes(config.salt.as_bytes());
        Ok(Self { config, salt_hash })
    }

    #[must_use]
    pub fn config(&self) -> &AnonConfig {
        &self.config
    }

    #[must_use]
    pub fn salt_hash(&self) -> Seed {
        self.salt_hash
    }

    /// Uniform integer in `[min, max]` for `seed` at `step_name`.
    #[must_use]
    pub fn uniform(&self, seed: Seed, step_name: &str, min: i64, max: i64) -> i64 {
        generate_uniform_noise(self.salt_hash, seed, step_name, min, max)
    }

    /// Zero-mean gaussian for `seed` at `step_name`.
    #[must_use]
    pub fn normal(&self, seed: Seed, step_name: &str, sd: f64) -> f64 {
        generate_normal_noise(self.salt_hash, seed, step_name, sd)
    }

    /// Zero-mean gaussian over XOR-combined layer seeds.
    #[must_use]
    pub fn layered_normal(&self, layer_seeds: &[Seed], step_name: &str, sd: f64) -> f64 {
        generate_layered_noise(self.salt_hash, layer_seeds, step_name, sd)
    }

    /// Noisy low-count threshold over the given layer seeds.
    #[must_use]
    pub fn lcf_threshold(&self, layer_seeds: &[Seed]) -> i64 {
        generate_lcf_threshold(self.salt_hash, layer_seeds, &self.config)
    }
}
