//! Deterministic synthetic populations.
//!
//! Tests need varied but reproducible datasets; nothing here draws from an
//! OS RNG. The generator is a SplitMix64 stream, which is more than enough
//! mixing for test data.

/// SplitMix64 finalization (deterministic 64-bit mixer).
#[must_use]
pub fn mix64(x: u64) -> u64 {
    let mut z = x.wrapping_add(0x9E37_79B9_7F4A_7C15);
    z = (z ^ (z >> 30)).wrapping_mul(0xBF58_476D_1CE4_E5B9);
    z = (z ^ (z >> 27)).wrapping_mul(0x94D0_49BB_1331_11EB);
    z ^ (z >> 31)
}

/// Seeded deterministic generator.
#[derive(Debug, Clone)]
pub struct TestRng {
    state: u64,
}

impl TestRng {
    #[must_use]
    pub fn new(seed: u64) -> Self {
        Self { state: seed }
    }

    pub fn next_u64(&mut self) -> u64 {
        self.state = self.state.wrapping_add(0x9E37_79B9_7F4A_7C15);
        mix64(self.state)
    }

    /// Uniform value in `[0, bound)`.
    pub fn below(&mut self, bound: u64) -> u64 {
        debug_assert!(bound > 0);
        self.next_u64() % bound
    }
}

/// One synthetic row: a user and a value they report.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct UserRow {
    pub user: i64,
    pub value: i64,
}

/// `users` users with 1 to `max_rows_per_user` rows each (skew drawn from
/// the seed), reporting values in `[min_value, max_value]`.
#[must_use]
pub fn skewed_user_rows(
    seed: u64,
    users: usize,
    max_rows_per_user: usize,
    min_value: i64,
    max_value: i64,
) -> Vec<UserRow> {
    debug_assert!(max_rows_per_user >= 1);
    debug_assert!(max_value >= min_value);

    let mut rng = TestRng::new(seed);
    let span = (max_value - min_value + 1) as u64;
    let mut rows = Vec::new();
    for user in 0..users as i64 {
        let row_count = 1 + rng.below(max_rows_per_user as u64) as usize;
        for _ in 0..row_count {
            let value = min_value + rng.below(span) as i64;
            rows.push(UserRow { user, value });
        }
    }
    rows
}
