//! Quorum and fault-tolerance thresholds
//!
//! For a voting population of `n = min(qualified, committee_size)`:
//!
//! ```text
//!   quorum(n) = n              if n < 4
//!             = ceil(2n / 3)   otherwise
//!   f(n)      = ceil(n / 3) - 1
//! ```
//!
//! `quorum > 2f` holds for every `n`, so any two quorums share a correct node.

/// Number of voters taking part in a round
pub fn voting_population(qualified_len: usize, committee_size: u64) -> usize {
    let committee_size = usize::try_from(committee_size).unwrap_or(usize::MAX);
    qualified_len.min(committee_size)
}

/// Matching messages required to advance a phase
pub fn calc_quorum_size(qualified_len: usize, committee_size: u64) -> usize {
    let size = voting_population(qualified_len, committee_size);
    if size < 4 {
        // tiny networks require unanimity
        return size;
    }
    (2 * size).div_ceil(3)
}

/// Maximum number of tolerated Byzantine voters
pub fn calc_fault_tolerance(qualified_len: usize, committee_size: u64) -> usize {
    let size = voting_population(qualified_len, committee_size);
    size.div_ceil(3).saturating_sub(1)
}
