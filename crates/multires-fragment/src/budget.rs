//! Memory budget for resident fragment payloads.
//!
//! Provides [`MemoryBudget`] limits and [`select_evictions`], which picks the
//! fragments to unload when resident payloads exceed the budget.

use rustc_hash::FxHashSet;

/// Upper bound on the bytes held by loaded fragment payloads.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct MemoryBudget {
    pub limit_bytes: usize,
}

impl MemoryBudget {
    #[must_use]
    pub fn new(limit_bytes: usize) -> Self {
        Self { limit_bytes }
    }

    /// How many bytes `resident` exceeds the budget by (0 if within).
    #[must_use]
    pub fn overage(&self, resident: usize) -> usize {
        resident.saturating_sub(self.limit_bytes)
    }
}

/// A loaded fragment that may be unloaded.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct EvictionCandidate {
    pub id: u32,
    pub bytes: usize,
    /// Frame number of the last use; older fragments go first.
    pub last_used: u64,
}

/// Pick fragments to unload so that `overage` bytes are freed.
///
/// Candidates in `keep` are never chosen. The rest are taken least recently
/// used first, ties broken by id, until enough bytes are freed or none remain.
pub fn select_evictions(
    candidates: &[EvictionCandidate],
    overage: usize,
    keep: &FxHashSet<u32>,
) -> Vec<u32> {
    if overage == 0 {
        return Vec::new();
    }

    let mut ordered: Vec<&EvictionCandidate> =
        candidates.iter().filter(|c| !keep.contains(&c.id)).collect();
    ordered.sort_by_key(|c| (c.last_used, c.id));

    let mut evictions = Vec::new();
    let mut freed = 0usize;
    for candidate in ordered {
        if freed >= overage {
            break;
        }
        freed += candidate.bytes;
        evictions.push(candidate.id);
    }
    evictions
}
