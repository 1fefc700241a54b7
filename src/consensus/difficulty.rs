//! Base target adjustment and leader election
//!
//! Pure functions, no chain access. A block's base target is the threshold a
//! miner's hit must fall under; lower means harder. The hit is derived from
//! the parent's generation signature and the miner key, so anyone can
//! recompute it from public chain data.

use crate::constants::{
    BASE_TARGET_GAMMA_PERCENT, DIFFICULTY_NUMERATOR, MAX_BASE_TARGET, MAX_INTERVAL_RATIO_SIXTIETHS,
    MIN_INTERVAL_RATIO_SIXTIETHS,
};
use crate::crypto::{hash_concat, Hash, PublicKey};

/// Starting base target: a single unit of total genesis power is expected to
/// find a block roughly once per `block_time_interval`.
pub fn initial_base_target(block_time_interval: u64, total_power: u64) -> u64 {
    let denominator = (block_time_interval.max(1) as u128) * (total_power.max(1) as u128);
    clamp_base_target((1u128 << 63) / denominator)
}

/// Base target of the next block, given the previous base target and the
/// average spacing of the recent blocks.
///
/// Faster than `block_time_interval` lowers the target (harder), slower
/// raises it. The spacing is bounded to [53/60, 67/60] of the interval and
/// decreases are damped by gamma.
pub fn next_base_target(previous_base_target: u64, average_interval: u64, block_time_interval: u64) -> u64 {
    let bt = previous_base_target as u128;
    // work in sixtieths of a second to keep the ratio bounds exact
    let target = block_time_interval.max(1) as u128 * 60;
    let actual = average_interval as u128 * 60;

    let next = if actual > target {
        let capped = actual.min(block_time_interval as u128 * MAX_INTERVAL_RATIO_SIXTIETHS);
        bt * capped / target
    } else {
        let floored = actual.max(block_time_interval as u128 * MIN_INTERVAL_RATIO_SIXTIETHS);
        let decrease = bt * BASE_TARGET_GAMMA_PERCENT * (target - floored) / (100 * target);
        bt - decrease
    };
    clamp_base_target(next)
}

fn clamp_base_target(value: u128) -> u64 {
    value.clamp(1, MAX_BASE_TARGET as u128) as u64
}

/// Work contributed by one block
pub fn block_work(base_target: u64) -> u128 {
    DIFFICULTY_NUMERATOR / base_target.max(1) as u128
}

pub fn next_cumulative_difficulty(parent_cumulative: u128, base_target: u64) -> u128 {
    parent_cumulative.saturating_add(block_work(base_target))
}

pub fn generation_signature(parent_generation_signature: &Hash, miner: &PublicKey) -> Hash {
    hash_concat(&[&parent_generation_signature.0, &miner.0])
}

pub fn hit(generation_signature: &Hash) -> u64 {
    generation_signature.leading_u64()
}

/// Leader election: may `power` produce a block `elapsed` seconds after its parent?
pub fn is_eligible(hit: u64, base_target: u64, power: u64, elapsed: u64) -> bool {
    if power == 0 || elapsed == 0 {
        return false;
    }
    let threshold = base_target as u128 * power as u128 * elapsed as u128;
    (hit as u128) < threshold
}

/// Smallest `elapsed` for which `is_eligible` holds
pub fn mining_delay(hit: u64, base_target: u64, power: u64) -> Option<u64> {
    if power == 0 {
        return None;
    }
    let per_second = base_target.max(1) as u128 * power as u128;
    let delay = hit as u128 / per_second + 1;
    Some(delay.min(u64::MAX as u128) as u64)
}
