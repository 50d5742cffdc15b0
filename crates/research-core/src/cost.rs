//! Token/cost accounting. [`CostRecord`] is the immutable, component-wise
//! additive unit every component (context manager, sub-researchers,
//! supervisor, analyzer, synthesizer) folds its LLM usage into.

use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};
use std::ops::Add;

/// Per-million-token pricing for a model, used to turn a [`Usage`] into a
/// [`CostRecord`].
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct Pricing {
    pub input_per_million: Decimal,
    pub output_per_million: Decimal,
}

impl Pricing {
    pub fn new(input_per_million: Decimal, output_per_million: Decimal) -> Self {
        Pricing {
            input_per_million,
            output_per_million,
        }
    }
}

/// Raw token counts returned by an LLM call, prior to pricing.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
pub struct Usage {
    pub input_tokens: u64,
    pub output_tokens: u64,
}

impl Usage {
    pub fn new(input_tokens: u64, output_tokens: u64) -> Self {
        Usage {
            input_tokens,
            output_tokens,
        }
    }

    pub fn total_tokens(&self) -> u64 {
        self.input_tokens + self.output_tokens
    }

    pub fn priced(&self, pricing: &Pricing) -> CostRecord {
        let input_cost = Decimal::from(self.input_tokens) * pricing.input_per_million
            / Decimal::from(1_000_000u64);
        let output_cost = Decimal::from(self.output_tokens) * pricing.output_per_million
            / Decimal::from(1_000_000u64);
        CostRecord {
            input_tokens: self.input_tokens,
            output_tokens: self.output_tokens,
            total_tokens: self.total_tokens(),
            input_cost,
            output_cost,
            total_cost: input_cost + output_cost,
        }
    }
}

/// An immutable, additive cost record. Addition is component-wise;
/// `CostRecord::zero()` is the identity.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct CostRecord {
    pub input_tokens: u64,
    pub output_tokens: u64,
    pub total_tokens: u64,
    pub input_cost: Decimal,
    pub output_cost: Decimal,
    pub total_cost: Decimal,
}

impl CostRecord {
    pub fn zero() -> Self {
        CostRecord {
            input_tokens: 0,
            output_tokens: 0,
            total_tokens: 0,
            input_cost: Decimal::ZERO,
            output_cost: Decimal::ZERO,
            total_cost: Decimal::ZERO,
        }
    }
}

impl Default for CostRecord {
    fn default() -> Self {
        CostRecord::zero()
    }
}

impl Add for CostRecord {
    type Output = CostRecord;

    fn add(self, rhs: CostRecord) -> CostRecord {
        CostRecord {
            input_tokens: self.input_tokens + rhs.input_tokens,
            output_tokens: self.output_tokens + rhs.output_tokens,
            total_tokens: self.total_tokens + rhs.total_tokens,
            input_cost: self.input_cost + rhs.input_cost,
            output_cost: self.output_cost + rhs.output_cost,
            total_cost: self.total_cost + rhs.total_cost,
        }
    }
}
