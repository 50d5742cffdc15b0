//! Token estimation. The context manager's budget math and the cost
//! accounting above both need the *same* estimator so that additivity
//! holds; this module is the single place that decision is made.

use once_cell::sync::OnceCell;
use tiktoken_rs::CoreBPE;

/// Estimates the token count of a piece of text. Implementations must be
/// monotonically additive: `estimate(a) + estimate(b) >= estimate(a + b)`
/// does not need to hold exactly, but doubling input must never halve the
/// estimate, and budget/summary code must use a single shared instance.
pub trait TokenEstimator: Send + Sync {
    fn estimate(&self, text: &str) -> usize;
}

/// The default estimator: `characters / 4`, rounded up. Used unless a
/// session explicitly opts into exact counting, so budget math never
/// depends on a downloaded encoding table.
#[derive(Debug, Default, Clone, Copy)]
pub struct CharDiv4Estimator;

impl TokenEstimator for CharDiv4Estimator {
    fn estimate(&self, text: &str) -> usize {
        (text.chars().count() + 3) / 4
    }
}

/// An exact estimator backed by `tiktoken-rs`'s `cl100k_base` encoding.
pub struct TiktokenEstimator {
    bpe: CoreBPE,
}

impl TiktokenEstimator {
    pub fn cl100k() -> Result<Self, crate::error::ResearchError> {
        let bpe = tiktoken_rs::cl100k_base()
            .map_err(|e| crate::error::ResearchError::Fatal(format!("tiktoken init: {e}")))?;
        Ok(TiktokenEstimator { bpe })
    }
}

impl TokenEstimator for TiktokenEstimator {
    fn estimate(&self, text: &str) -> usize {
        self.bpe.encode_with_special_tokens(text).len()
    }
}

static DEFAULT_ESTIMATOR: OnceCell<CharDiv4Estimator> = OnceCell::new();

/// Returns the process-wide default estimator (char/4).
pub fn default_estimator() -> &'static CharDiv4Estimator {
    DEFAULT_ESTIMATOR.get_or_init(CharDiv4Estimator::default)
}
