//! Chunk placement: least-loaded-first under capacity constraints
//!
//! A whole file is planned before any byte is uploaded, so a file that cannot
//! fit fails with `InsufficientStorage` without touching a backend.

use std::cmp::Ordering;
use strata_core::types::AccountSnapshot;
use strata_core::{StrataError, StrataResult};

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Placement {
    pub index: u32,
    pub account_id: String,
}

/// Compare load ratios `used/total` without floating point.
fn load_cmp(a: &AccountSnapshot, b: &AccountSnapshot) -> Ordering {
    let lhs = a.capacity_used as u128 * b.capacity_total as u128;
    let rhs = b.capacity_used as u128 * a.capacity_total as u128;
    lhs.cmp(&rhs)
        .then_with(|| b.free().cmp(&a.free()))
        .then_with(|| a.account_id.cmp(&b.account_id))
}

/// Assign each chunk (by encrypted size, in index order) to an account.
///
/// The chosen account's usage is bumped after every assignment so later
/// chunks of the same file spread out.
pub fn plan(chunk_sizes: &[u64], accounts: &[AccountSnapshot]) -> StrataResult<Vec<Placement>> {
    let mut projected: Vec<AccountSnapshot> = accounts
        .iter()
        .filter(|a| a.capacity_total > 0)
        .cloned()
        .collect();

    let mut placements = Vec::with_capacity(chunk_sizes.len());
    for (index, &size) in chunk_sizes.iter().enumerate() {
        let target = projected
            .iter_mut()
            .filter(|a| a.free() >= size)
            .min_by(|a, b| load_cmp(a, b));

        match target {
            Some(account) => {
                account.capacity_used += size;
                placements.push(Placement {
                    index: index as u32,
                    account_id: account.account_id.clone(),
                });
            }
            None => {
                let best_free = projected.iter().map(|a| a.free()).max().unwrap_or(0);
                return Err(StrataError::InsufficientStorage {
                    chunk_index: index as u32,
                    required: size,
                    best_free,
                });
            }
        }
    }
    Ok(placements)
}
