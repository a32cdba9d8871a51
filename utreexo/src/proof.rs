//! Inclusion proofs and the row-by-row root calculator.
use serde::{Deserialize, Serialize};

use crate::error::UtreexoError;
use crate::position::*;
use crate::EMPTY;
use merkle::{Hash, Hasher};

/// Inclusion proof for a batch of leaves.
#[derive(Clone, Debug, Default, PartialEq, Serialize, Deserialize)]
pub struct Proof {
    /// Positions of the leaves being proven, in the caller's order. With the
    /// tree below, proving leaves 00 and 01 makes the targets `[00, 01]`.
    ///
    /// ```ascii
    /// 06
    /// |-------\
    /// 04      05
    /// |---\   |---\
    /// 00  01  02  03
    /// ```
    pub targets: Vec<Position>,

    /// The hashes needed to recompute the roots from the targets, sorted by
    /// the position they sit at. For targets `[00, 01]` that is just `[05]`:
    /// 04 is computed from 00 and 01, and 06 from 04 and 05.
    pub hashes: Vec<Hash>,
}

/// Pairs targets with their hashes and sorts the records by position.
pub(crate) fn to_hash_and_pos(targets: &[Position], hashes: &[Hash]) -> Vec<(Position, Hash)> {
    let mut records: Vec<(Position, Hash)> = targets
        .iter()
        .cloned()
        .zip(hashes.iter().cloned())
        .collect();
    records.sort_unstable_by_key(|&(pos, _)| pos);
    records
}

/// Merges two position-sorted record lists, dropping duplicate positions.
pub(crate) fn merge_sorted_records(
    a: Vec<(Position, Hash)>,
    b: Vec<(Position, Hash)>,
) -> Vec<(Position, Hash)> {
    if a.is_empty() {
        return b;
    }
    if b.is_empty() {
        return a;
    }
    let mut merged = Vec::with_capacity(a.len() + b.len());
    let (mut i, mut j) = (0, 0);
    while i < a.len() || j < b.len() {
        let take_a = match (a.get(i), b.get(j)) {
            (Some(&(apos, _)), Some(&(bpos, _))) => {
                if apos == bpos {
                    j += 1;
                }
                apos <= bpos
            }
            (Some(_), None) => true,
            _ => false,
        };
        if take_a {
            merged.push(a[i]);
            i += 1;
        } else {
            merged.push(b[j]);
            j += 1;
        }
    }
    merged
}

fn merge_sorted_positions(a: &[Position], b: &[Position]) -> Vec<Position> {
    let mut merged = Vec::with_capacity(a.len() + b.len());
    let (mut i, mut j) = (0, 0);
    while i < a.len() || j < b.len() {
        let take_a = match (a.get(i), b.get(j)) {
            (Some(&x), Some(&y)) => {
                if x == y {
                    j += 1;
                }
                x <= y
            }
            (Some(_), None) => true,
            _ => false,
        };
        if take_a {
            merged.push(a[i]);
            i += 1;
        } else {
            merged.push(b[j]);
            j += 1;
        }
    }
    merged
}

/// Enumerates the positions involved in proving the given sorted targets.
///
/// Returns `(needed, computable)`, both ascending: `needed` are the positions
/// whose hashes have to be supplied alongside the targets, and `computable`
/// the ancestor positions whose hashes fall out of hashing the targets up
/// toward the roots. When two targets share a parent, the parent is
/// computable rather than needed; a target that is a root contributes
/// nothing to either list.
pub fn proof_positions(
    sorted_targets: &[Position],
    num_leaves: u64,
    forest_rows: u8,
) -> (Vec<Position>, Vec<Position>) {
    let mut needed = Vec::new();
    let mut computable = Vec::new();
    let mut rest = sorted_targets;
    let mut carry: Vec<Position> = Vec::new();

    for row in 0..=forest_rows {
        // Rows occupy disjoint ascending ranges, so this row's targets are a
        // prefix of the remaining sorted list.
        let split = rest
            .iter()
            .position(|&pos| detect_row(pos, forest_rows) != row)
            .unwrap_or_else(|| rest.len());
        let (extracted, tail) = rest.split_at(split);
        rest = tail;

        let current = merge_sorted_positions(&carry, extracted);
        carry = Vec::new();

        let mut i = 0;
        while i < current.len() {
            let pos = current[i];
            if is_root_position(pos, num_leaves, forest_rows) {
                i += 1;
                continue;
            }
            if i + 1 < current.len() && current[i + 1] == right_sib(pos) {
                // The sibling is itself being proven.
                i += 2;
            } else {
                needed.push(sibling(pos));
                i += 1;
            }
            let par = parent(pos, forest_rows);
            carry.push(par);
            computable.push(par);
        }
    }
    (needed, computable)
}

/// Computes every hash reachable from the targets: the non-root ancestors
/// and the root candidates, each paired with its position. Root candidates
/// come out lowest row first.
///
/// An `EMPTY` target stands for a deleted leaf: its sibling's hash moves up
/// unhashed, which is what recomputing the roots after a deletion relies on.
pub fn calculate_hashes(
    num_leaves: u64,
    del_hashes: &[Hash],
    proof: &Proof,
    hasher: &Hasher<Hash>,
) -> Result<(Vec<(Position, Hash)>, Vec<(Position, Hash)>), UtreexoError> {
    let total_rows = tree_rows(num_leaves);
    if del_hashes.len() != proof.targets.len() {
        return Err(UtreexoError::MalformedProof);
    }

    let to_prove = to_hash_and_pos(&proof.targets, del_hashes);

    let mut computed: Vec<(Position, Hash)> = Vec::new();
    let mut roots: Vec<(Position, Hash)> = Vec::with_capacity(num_roots(num_leaves));
    let mut next_proves: Vec<(Position, Hash)> = Vec::new();
    let mut rest = &to_prove[..];
    let mut proof_idx = 0;

    for row in 0..=total_rows {
        let split = rest
            .iter()
            .position(|&(pos, _)| detect_row(pos, total_rows) != row)
            .unwrap_or_else(|| rest.len());
        let (extracted, tail) = rest.split_at(split);
        rest = tail;

        let proves = merge_sorted_records(next_proves, extracted.to_vec());
        next_proves = Vec::new();

        let mut i = 0;
        while i < proves.len() {
            let (pos, hash) = proves[i];
            if is_root_position(pos, num_leaves, total_rows) {
                roots.push((pos, hash));
                i += 1;
                continue;
            }

            let parent_pos = parent(pos, total_rows);
            let parent_hash = if i + 1 < proves.len() && proves[i + 1].0 == right_sib(pos) {
                // The sibling is in the queue as well.
                let sib_hash = proves[i + 1].1;
                i += 2;
                if hash == EMPTY {
                    sib_hash
                } else if sib_hash == EMPTY {
                    hash
                } else {
                    hasher.intermediate(&hash, &sib_hash)
                }
            } else {
                // The sibling comes from the supplied proof hashes.
                let sib_hash = *proof
                    .hashes
                    .get(proof_idx)
                    .ok_or(UtreexoError::MalformedProof)?;
                proof_idx += 1;
                i += 1;
                if hash == EMPTY {
                    sib_hash
                } else if is_left_niece(pos) {
                    hasher.intermediate(&hash, &sib_hash)
                } else {
                    hasher.intermediate(&sib_hash, &hash)
                }
            };

            if !is_root_position(parent_pos, num_leaves, total_rows) {
                computed.push((parent_pos, parent_hash));
            }
            next_proves.push((parent_pos, parent_hash));
        }
    }

    if proof_idx != proof.hashes.len() || !rest.is_empty() {
        return Err(UtreexoError::MalformedProof);
    }
    Ok((computed, roots))
}

/// Computes the root candidate hashes for the given proof, lowest row first.
pub fn calculate_roots(
    num_leaves: u64,
    del_hashes: &[Hash],
    proof: &Proof,
    hasher: &Hasher<Hash>,
) -> Result<Vec<Hash>, UtreexoError> {
    calculate_hashes(num_leaves, del_hashes, proof, hasher)
        .map(|(_, roots)| roots.into_iter().map(|(_, hash)| hash).collect())
}
