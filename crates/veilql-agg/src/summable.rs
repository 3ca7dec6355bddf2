//! The flattening + noise core shared by the summable aggregators.
//!
//! For each AID instance, the top contributions are split into a noisy
//! outlier band and a noisy top band; outliers are replaced by the top
//! band's average ("flattening"), and a gaussian noise layer scaled to the
//! average contribution is drawn from the bucket and AID seeds. Results for
//! multiple AID instances combine by taking the maximum flattening and the
//! maximum noise standard deviation.

use veilql_error::{Result, VeilError};
use veilql_noise::{AnonContext, STEP_NOISE, STEP_OUTLIER, STEP_TOP, Seed, money_round};
use veilql_types::AnonConfig;

use crate::contribution::ContributionOps;
use crate::contribution_tracker::{ContributionTracker, Contributor};

/// The anonymized aggregation of one AID instance.
#[derive(Debug, Clone, Copy, Default)]
pub struct SummableResult {
    pub aid_seed: Seed,
    pub true_value: f64,
    pub flattening: f64,
    pub flattened_sum: f64,
    pub noisy_outlier_count: i64,
    pub noisy_top_count: i64,
    pub noise_sd: f64,
    pub noise: f64,
    pub not_enough_aid_values: bool,
}

/// When the unaccounted-for compensation folds into the flattened sum:
/// counts fold it before the noise scale is derived, sums after.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum UnaccountedFold {
    BeforeNoise,
    AfterNoise,
}

/// Shrinks the outlier/top intervals so both bands fit the contributor
/// population. The top interval takes the ceiling share of the adjustment;
/// a band whose interval cannot absorb its share spills the surplus onto
/// the other.
fn compact_flattening_intervals(config: &AnonConfig, total_count: u64) -> Result<(i64, i64)> {
    let mut compact_outlier_max = config.outlier_count_max;
    let mut compact_top_max = config.top_count_max;

    let total_adjustment = config.outlier_count_max + config.top_count_max - total_count as i64;
    if total_adjustment > 0 {
        let outlier_range = config.outlier_count_max - config.outlier_count_min;
        let top_range = config.top_count_max - config.top_count_min;
        let outlier_adjustment = total_adjustment / 2;
        let top_adjustment = total_adjustment - outlier_adjustment;

        if outlier_range >= outlier_adjustment && top_range >= top_adjustment {
            compact_outlier_max -= outlier_adjustment;
            compact_top_max -= top_adjustment;
        } else if outlier_range < outlier_adjustment && top_range >= top_adjustment {
            compact_outlier_max = config.outlier_count_min;
            compact_top_max -= total_adjustment - outlier_range;
        } else if outlier_range >= outlier_adjustment && top_range < top_adjustment {
            compact_outlier_max -= total_adjustment - top_range;
            compact_top_max = config.top_count_min;
        } else {
            return Err(VeilError::IntervalCompactingImpossible {
                adjustment: total_adjustment,
                slack: outlier_range + top_range,
            });
        }
    }

    Ok((compact_outlier_max, compact_top_max))
}

fn contributors_seed<C: ContributionOps>(contributors: &[Contributor<C>]) -> Seed {
    contributors.iter().fold(0, |seed, c| seed ^ c.aid)
}

fn aggregate_contributions<C: ContributionOps>(
    ctx: &AnonContext,
    bucket_seed: Seed,
    aid_seed: Seed,
    true_sum: C,
    distinct_contributors: u64,
    unaccounted_for: C,
    top_contributors: &[Contributor<C>],
    fold: UnaccountedFold,
) -> Result<SummableResult> {
    let config = ctx.config();

    let mut result = SummableResult {
        aid_seed,
        true_value: true_sum.to_f64(),
        ..SummableResult::default()
    };

    if distinct_contributors < config.minimum_contributors() {
        result.not_enough_aid_values = true;
        return Ok(result);
    }

    let (compact_outlier_max, compact_top_max) =
        compact_flattening_intervals(config, distinct_contributors)?;

    let seed_width = ((compact_outlier_max + compact_top_max) as usize).min(top_contributors.len());
    let flattening_seed = contributors_seed(&top_contributors[..seed_width]);

    result.noisy_outlier_count = ctx.uniform(
        flattening_seed,
        STEP_OUTLIER,
        config.outlier_count_min,
        compact_outlier_max,
    );
    result.noisy_top_count = ctx.uniform(
        flattening_seed,
        STEP_TOP,
        config.top_count_min,
        compact_top_max,
    );

    let outlier_end = result.noisy_outlier_count as usize;
    let top_end = outlier_end + result.noisy_top_count as usize;
    debug_assert!(top_end <= top_contributors.len());

    // Remove outliers from the overall value.
    result.flattening = top_contributors[..outlier_end]
        .iter()
        .map(|c| c.contribution.to_f64())
        .sum();

    // Replace them by the average of the top band.
    let top_contribution: f64 = top_contributors[outlier_end..top_end]
        .iter()
        .map(|c| c.contribution.to_f64())
        .sum();
    let top_average = top_contribution / result.noisy_top_count as f64;
    result.flattening -= top_average * result.noisy_outlier_count as f64;

    // Compensate for contributions whose AID was NULL, up to the flattening.
    let flattened_unaccounted_for = (unaccounted_for.to_f64() - result.flattening).max(0.0);

    result.flattened_sum = result.true_value - result.flattening;
    if fold == UnaccountedFold::BeforeNoise {
        result.flattened_sum += flattened_unaccounted_for;
    }

    let average = result.flattened_sum / distinct_contributors as f64;
    let noise_scale = average.max(0.5 * top_average);
    result.noise_sd = config.noise_layer_sd * noise_scale;
    result.noise = ctx.layered_normal(&[bucket_seed, aid_seed], STEP_NOISE, result.noise_sd);

    if fold == UnaccountedFold::AfterNoise {
        result.flattened_sum += flattened_unaccounted_for;
    }

    Ok(result)
}

/// Count-style result for one tracker: the NULL-AID compensation joins the
/// flattened value before the noise scale is derived.
pub fn calculate_count_result(
    ctx: &AnonContext,
    bucket_seed: Seed,
    tracker: &ContributionTracker<i64>,
) -> Result<SummableResult> {
    aggregate_contributions(
        ctx,
        bucket_seed,
        tracker.aid_seed(),
        tracker.overall_contribution(),
        tracker.distinct_contributors(),
        tracker.unaccounted_for(),
        tracker.top_contributors(),
        UnaccountedFold::BeforeNoise,
    )
}

/// Sum-style result for one tracker: the NULL-AID compensation joins only
/// after the noise draw, leaving the noise scale on accounted data.
pub fn calculate_sum_result<C: ContributionOps>(
    ctx: &AnonContext,
    bucket_seed: Seed,
    tracker: &ContributionTracker<C>,
) -> Result<SummableResult> {
    aggregate_contributions(
        ctx,
        bucket_seed,
        tracker.aid_seed(),
        tracker.overall_contribution(),
        tracker.distinct_contributors(),
        tracker.unaccounted_for(),
        tracker.top_contributors(),
        UnaccountedFold::AfterNoise,
    )
}

/// Combines per-AID-instance results into one value: maximum flattening
/// (draws resolved by the larger flattened sum) and maximum noise SD (draws
/// resolved by the larger absolute noise).
#[derive(Debug, Clone, Copy, Default)]
pub struct SummableResultAccumulator {
    max_flattening: f64,
    sum_for_flattening: f64,
    max_noise_sd: f64,
    noise_with_max_sd: f64,
    not_enough_aid_values: bool,
}

impl SummableResultAccumulator {
    pub fn accumulate(&mut self, result: &SummableResult) {
        if result.not_enough_aid_values {
            self.not_enough_aid_values = true;
            return;
        }

        if result.flattening > self.max_flattening {
            self.max_flattening = result.flattening;
            self.sum_for_flattening = result.flattened_sum;
        } else if result.flattening == self.max_flattening {
            self.sum_for_flattening = self.sum_for_flattening.max(result.flattened_sum);
        }

        if result.noise_sd > self.max_noise_sd {
            self.max_noise_sd = result.noise_sd;
            self.noise_with_max_sd = result.noise;
        } else if result.noise_sd == self.max_noise_sd
            && result.noise.abs() > self.noise_with_max_sd.abs()
        {
            self.noise_with_max_sd = result.noise;
        }
    }

    #[must_use]
    pub fn not_enough_aid_values(&self) -> bool {
        self.not_enough_aid_values
    }

    /// The flattened value plus the retained noise draw.
    #[must_use]
    pub fn noisy_sum(&self) -> f64 {
        self.sum_for_flattening + self.noise_with_max_sd
    }

    /// Rounded, non-negative count form of [`Self::noisy_sum`].
    #[must_use]
    pub fn noisy_count(&self) -> i64 {
        (self.noisy_sum().round() as i64).max(0)
    }

    /// The retained noise SD, money-rounded for reporting.
    #[must_use]
    pub fn reported_noise_sd(&self) -> f64 {
        money_round(self.max_noise_sd)
    }
}
