//! Seed selection under the rerandomization policies.
//!
//! The seed makes a learner's variant of a problem reproducible. It is chosen
//! once when attempt state is first materialized and again on reset when the
//! policy reseeds.
//!
//! ## Policies
//!
//! | Policy | Seed |
//! |--------|------|
//! | `never` | always [`FIXED_SEED`] |
//! | `per_learner` | digest of learner and problem ids, folded into [`NUM_RANDOMIZATION_BINS`] |
//! | `always` / `onreset` | random draw below [`MAX_RANDOMIZATION_BINS`] |
//!
//! Random draws use an explicit generator owned by the manager rather than a
//! process-global one, so tests can inject a seeded generator.

use rand::rngs::OsRng;
use rand::{Rng, RngCore};
use sha2::{Digest, Sha256};

use crate::settings::Rerandomize;

/// Seed used when the problem never rerandomizes.
pub const FIXED_SEED: u32 = 1;

/// Number of distinct variants handed out under `per_learner`.
pub const NUM_RANDOMIZATION_BINS: u32 = 20;

/// Upper bound on random seeds; bounds the script cache cardinality.
pub const MAX_RANDOMIZATION_BINS: u32 = 1000;

/// Learner id substituted when the host did not provide one.
const ANONYMOUS_LEARNER: &str = "0";

/// Chooses seeds for attempt state.
pub struct SeedManager {
    rng: Box<dyn RngCore + Send>,
}

impl std::fmt::Debug for SeedManager {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("SeedManager").finish_non_exhaustive()
    }
}

impl Default for SeedManager {
    fn default() -> Self {
        Self::new()
    }
}

impl SeedManager {
    /// A manager drawing random seeds from the operating system.
    pub fn new() -> Self {
        Self {
            rng: Box::new(OsRng),
        }
    }

    /// A manager drawing random seeds from the given generator.
    pub fn with_rng(rng: impl RngCore + Send + 'static) -> Self {
        Self { rng: Box::new(rng) }
    }

    /// Choose a fresh seed for the policy.
    ///
    /// # Arguments
    ///
    /// * `policy` - The problem's rerandomize policy
    /// * `learner_id` - Stable learner identifier, if the host knows one
    /// * `problem_id` - Stable problem identifier
    pub fn choose_seed(
        &mut self,
        policy: Rerandomize,
        learner_id: Option<&str>,
        problem_id: &str,
    ) -> u32 {
        match policy {
            Rerandomize::Never => FIXED_SEED,
            Rerandomize::PerLearner => {
                let learner = learner_id.unwrap_or_else(|| {
                    tracing::warn!(
                        problem_id = %problem_id,
                        "No learner id available for per_learner randomization, using anonymous bin"
                    );
                    ANONYMOUS_LEARNER
                });
                per_learner_bin(learner, problem_id)
            }
            Rerandomize::Always | Rerandomize::OnReset => {
                self.rng.gen_range(0..MAX_RANDOMIZATION_BINS)
            }
        }
    }

    /// Return the persisted seed, choosing one if none exists yet.
    ///
    /// Under `never` the fixed seed always wins, even over a persisted value
    /// left behind by an earlier policy.
    pub fn ensure_seed(
        &mut self,
        policy: Rerandomize,
        learner_id: Option<&str>,
        problem_id: &str,
        current: Option<u32>,
    ) -> u32 {
        match (policy, current) {
            (Rerandomize::Never, _) => FIXED_SEED,
            (_, Some(seed)) => seed,
            (_, None) => self.choose_seed(policy, learner_id, problem_id),
        }
    }
}

/// Deterministic seed bin for a learner and problem.
pub fn per_learner_bin(learner_id: &str, problem_id: &str) -> u32 {
    let digest = learner_digest(learner_id, problem_id);
    // Leading seven hex digits of the digest.
    let prefix = u32::from_be_bytes([digest[0], digest[1], digest[2], digest[3]]) >> 4;
    prefix % NUM_RANDOMIZATION_BINS
}

fn learner_digest(learner_id: &str, problem_id: &str) -> Vec<u8> {
    let mut hasher = Sha256::new();
    hasher.update(learner_id.as_bytes());
    // Delimiter keeps ("ab", "c") and ("a", "bc") apart.
    hasher.update([0u8]);
    hasher.update(problem_id.as_bytes());
    hasher.finalize().to_vec()
}
