//! Bitwise allocation codec.
//!
//! Vault configuration travels to the controller as two packed words: the
//! strategy indices (8 bits each) and the per-strategy proportions in basis
//! points (14 bits each). The first list element always sits in the lowest
//! field.

use alloy::primitives::U256;
use serde::{Deserialize, Serialize};

use crate::error::EncodingError;

/// Upper bound on strategies per vault.
pub const MAX_STRATEGIES: usize = 18;
pub const STRATEGY_INDEX_BITS: usize = 8;
pub const PROPORTION_BITS: usize = 14;
/// 100.00% in basis points.
pub const FULL_PROPORTION: u32 = 10_000;
pub const MAX_PROPORTION: u32 = (1 << PROPORTION_BITS) - 1;

const MAX_STRATEGY_INDEX: usize = (1 << STRATEGY_INDEX_BITS) - 1;

/// Pack strategy indices into 8-bit fields.
pub fn encode_strategy_bitmap(indices: &[usize]) -> Result<U256, EncodingError> {
    check_count(indices.len())?;

    for (position, &index) in indices.iter().enumerate() {
        if index > MAX_STRATEGY_INDEX {
            return Err(EncodingError::InvalidIndex { position, index });
        }
        if indices[..position].contains(&index) {
            return Err(EncodingError::DuplicateIndex { index });
        }
    }

    Ok(indices.iter().rev().fold(U256::ZERO, |acc, &index| {
        (acc << STRATEGY_INDEX_BITS) | U256::from(index)
    }))
}

/// Unpack `length` strategy indices from the lowest 8-bit fields.
pub fn decode_strategy_bitmap(packed: U256, length: usize) -> Result<Vec<usize>, EncodingError> {
    let fields = unpack_fields(packed, length, STRATEGY_INDEX_BITS)?;
    Ok(fields.into_iter().map(|f| f as usize).collect())
}

/// Pack proportions into 14-bit fields.
///
/// Only the field width is checked here. Use [`Allocation::new`] when the
/// proportions must also sum to [`FULL_PROPORTION`].
pub fn encode_proportion_bitmap(proportions: &[u32]) -> Result<U256, EncodingError> {
    check_count(proportions.len())?;

    if let Some((position, &value)) = proportions
        .iter()
        .enumerate()
        .find(|(_, v)| **v > MAX_PROPORTION)
    {
        return Err(EncodingError::ProportionOutOfRange { position, value });
    }

    Ok(proportions.iter().rev().fold(U256::ZERO, |acc, &value| {
        (acc << PROPORTION_BITS) | U256::from(value)
    }))
}

/// Unpack `length` proportions from the lowest 14-bit fields.
pub fn decode_proportion_bitmap(packed: U256, length: usize) -> Result<Vec<u32>, EncodingError> {
    let fields = unpack_fields(packed, length, PROPORTION_BITS)?;
    Ok(fields.into_iter().map(|f| f as u32).collect())
}

/// Split 100% across `count` strategies. The remainder goes to the first one.
pub fn even_proportions(count: usize) -> Result<Vec<u32>, EncodingError> {
    if count == 0 {
        return Ok(Vec::new());
    }
    check_count(count)?;

    let share = FULL_PROPORTION / count as u32;
    let remainder = FULL_PROPORTION - share * count as u32;
    let mut proportions = vec![share; count];
    proportions[0] += remainder;
    Ok(proportions)
}

fn check_count(count: usize) -> Result<(), EncodingError> {
    if count > MAX_STRATEGIES {
        return Err(EncodingError::TooManyStrategies {
            count,
            max: MAX_STRATEGIES,
        });
    }
    Ok(())
}

fn unpack_fields(packed: U256, length: usize, bits: usize) -> Result<Vec<u64>, EncodingError> {
    if length * bits > 256 {
        return Err(EncodingError::WidthExceeded { length, bits });
    }

    let mask = (U256::from(1u8) << bits) - U256::from(1u8);
    Ok((0..length)
        .map(|i| ((packed >> (i * bits)) & mask).as_limbs()[0])
        .collect())
}

/// A strategy/proportion pair that is safe to send on-chain.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Allocation {
    indices: Vec<usize>,
    proportions: Vec<u32>,
}

/// Packed form of an [`Allocation`], as passed to `createAllocationRequest`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct PackedAllocation {
    pub count: usize,
    pub strategies: U256,
    pub proportions: U256,
}

impl Allocation {
    /// Validate indices and proportions together, including the 100% sum.
    pub fn new(indices: Vec<usize>, proportions: Vec<u32>) -> Result<Self, EncodingError> {
        if indices.len() != proportions.len() {
            return Err(EncodingError::LengthMismatch {
                strategies: indices.len(),
                proportions: proportions.len(),
            });
        }

        // Range and uniqueness checks live in the encoders.
        encode_strategy_bitmap(&indices)?;
        encode_proportion_bitmap(&proportions)?;

        let sum: u64 = proportions.iter().map(|&p| p as u64).sum();
        if sum != FULL_PROPORTION as u64 {
            return Err(EncodingError::ProportionSum {
                sum,
                expected: FULL_PROPORTION,
            });
        }

        Ok(Self {
            indices,
            proportions,
        })
    }

    /// Spread evenly over `indices`.
    pub fn even(indices: Vec<usize>) -> Result<Self, EncodingError> {
        let proportions = even_proportions(indices.len())?;
        Self::new(indices, proportions)
    }

    pub fn indices(&self) -> &[usize] {
        &self.indices
    }

    pub fn proportions(&self) -> &[u32] {
        &self.proportions
    }

    pub fn len(&self) -> usize {
        self.indices.len()
    }

    pub fn is_empty(&self) -> bool {
        self.indices.is_empty()
    }

    pub fn encode(&self) -> Result<PackedAllocation, EncodingError> {
        Ok(PackedAllocation {
            count: self.indices.len(),
            strategies: encode_strategy_bitmap(&self.indices)?,
            proportions: encode_proportion_bitmap(&self.proportions)?,
        })
    }

    /// Decode and re-validate a packed allocation.
    pub fn decode(packed: &PackedAllocation) -> Result<Self, EncodingError> {
        let indices = decode_strategy_bitmap(packed.strategies, packed.count)?;
        let proportions = decode_proportion_bitmap(packed.proportions, packed.count)?;
        Self::new(indices, proportions)
    }
}
