//! Seed preparation and the uniform/normal/threshold draws.

use std::f64::consts::TAU;

use veilql_types::AnonConfig;
use xxhash_rust::xxh3::xxh3_64;

/// A 64-bit noise layer seed.
pub type Seed = u64;

/// Step name for the outlier band size draw.
pub const STEP_OUTLIER: &str = "outlier";
/// Step name for the top band size draw.
pub const STEP_TOP: &str = "top";
/// Step name for the aggregate value noise draw.
pub const STEP_NOISE: &str = "noise";
/// Step name for the low-count threshold draw.
pub const STEP_SUPPRESS: &str = "suppress";
/// Step name for the per-bin histogram noise draw.
pub const STEP_COUNT_HISTOGRAM: &str = "count_histogram";

/// Applied when a prepared seed has both 32-bit halves zero, which would
/// starve the Box-Muller transform of input.
const ZERO_SEED_PERTURBATION: Seed = 0x9E37_79B9_7F4A_7C15;

const MAX_U32: f64 = 4_294_967_296.0;

/// 64-bit hash of arbitrary bytes; the basis of every seed in the engine.
#[must_use]
pub fn hash_bytes(bytes: &[u8]) -> Seed {
    xxh3_64(bytes)
}

/// Mixes a layer seed with the salt hash and the step name hash.
fn prepare_seed(salt_hash: Seed, seed: Seed, step_name: &str) -> Seed {
    seed ^ salt_hash ^ hash_bytes(step_name.as_bytes())
}

/// A uniform integer in the inclusive interval `[min, max]`.
///
/// Modulo bounding is biased, but the ranges here are tiny (single digits)
/// against a 32-bit space.
#[must_use]
pub fn generate_uniform_noise(
    salt_hash: Seed,
    seed: Seed,
    step_name: &str,
    min: i64,
    max: i64,
) -> i64 {
    debug_assert!(max >= min);
    debug_assert!(min >= 0);

    let seed = prepare_seed(salt_hash, seed, step_name);

    // Mix higher and lower dwords together.
    let uniform = u64::from(((seed >> 32) as u32) ^ (seed as u32));
    let bounded = uniform % ((max - min + 1) as u64);

    min + bounded as i64
}

/// A zero-mean gaussian with the given standard deviation.
#[must_use]
pub fn generate_normal_noise(salt_hash: Seed, seed: Seed, step_name: &str, sd: f64) -> f64 {
    let mut seed = prepare_seed(salt_hash, seed, step_name);
    if seed == 0 {
        seed ^= ZERO_SEED_PERTURBATION;
    }

    // Box-Muller on the two dword halves mapped to [0, 1).
    let mut u1 = f64::from(seed as u32) / MAX_U32;
    let u2 = f64::from((seed >> 32) as u32) / MAX_U32;
    if u1 == 0.0 {
        // ln(0) guard; the offset is below the draw's resolution.
        u1 = 1.0 / MAX_U32;
    }

    sd * (-2.0 * u1.ln()).sqrt() * (TAU * u2).sin()
}

/// Combines multiple layer seeds by XOR before the normal draw.
#[must_use]
pub fn generate_layered_noise(
    salt_hash: Seed,
    layer_seeds: &[Seed],
    step_name: &str,
    sd: f64,
) -> f64 {
    let seed = layer_seeds.iter().fold(0, |acc, s| acc ^ s);
    generate_normal_noise(salt_hash, seed, step_name, sd)
}

/// The noisy low-count threshold for the given layer seeds.
///
/// Mean sits `low_count_mean_gap` standard deviations above the hard
/// minimum; the result never reports below the hard minimum.
#[must_use]
pub fn generate_lcf_threshold(salt_hash: Seed, layer_seeds: &[Seed], config: &AnonConfig) -> i64 {
    let threshold_mean = config.low_count_min_threshold as f64
        + config.low_count_mean_gap * config.low_count_layer_sd;
    let noise = generate_layered_noise(
        salt_hash,
        layer_seeds,
        STEP_SUPPRESS,
        config.low_count_layer_sd,
    );
    let noisy_threshold = (threshold_mean + noise).round() as i64;
    noisy_threshold.max(config.low_count_min_threshold)
}

/// Rounds a reported noise magnitude to the nearest 1/2/5 step of its
/// decade, so the report cannot leak fine-grained state.
#[must_use]
pub fn money_round(value: f64) -> f64 {
    if value <= 0.0 || !value.is_finite() {
        return 0.0;
    }
    let power = 10f64.powf(value.log10().floor());
    let mantissa = value / power;
    let step = if mantissa < 1.5 {
        1.0
    } else if mantissa < 3.5 {
        2.0
    } else if mantissa < 7.5 {
        5.0
    } else {
        10.0
    };
    step * power
}

/// The low 48 bits of a seed as three 16-bit words, for explain output.
#[must_use]
pub fn seed_preview(seed: Seed) -> String {
    format!(
        "{:04x}{:04x}{:04x}",
        seed & 0xffff,
        (seed >> 16) & 0xffff,
        (seed >> 32) & 0xffff
    )
}
