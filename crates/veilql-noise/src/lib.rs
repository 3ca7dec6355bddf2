//! Deterministic noise oracle.
//!
//! Noise seeds are 64-bit hash values. From each prepared seed exactly one
//! value is drawn, uniform or normal; a decent hash distributes uniformly
//! over the output space, so the uniform draw only bounds the seed to the
//! requested interval and the normal draw applies Box-Muller to the two
//! 32-bit halves. Step names partition the noise space: draws for different
//! steps of the same seed cannot correlate.

mod context;
mod oracle;

pub use context::AnonContext;
pub use oracle::{
    STEP_COUNT_HISTOGRAM, STEP_NOISE, STEP_OUTLIER, STEP_SUPPRESS, STEP_TOP, Seed,
    generate_layered_noise, generate_lcf_threshold, generate_normal_noise,
    generate_uniform_noise, hash_bytes, money_round, seed_preview,
};
