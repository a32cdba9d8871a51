//! Algebra on proofs: reshaping them for deletions, merging and shrinking
//! them without access to the full forest.
use std::collections::HashSet;

use crate::position::*;
use crate::proof::{merge_sorted_records, proof_positions, to_hash_and_pos, Proof};
use crate::EMPTY;
use merkle::{Hash, Hasher};

/// Removes every element of sorted `b` from sorted `a`, preserving order.
pub(crate) fn subtract_sorted(a: &mut Vec<Position>, b: &[Position]) {
    let mut bi = 0;
    a.retain(|&x| {
        while bi < b.len() && b[bi] < x {
            bi += 1;
        }
        !(bi < b.len() && b[bi] == x)
    });
}

/// Removes every record whose position appears in sorted `b`.
fn subtract_records_by_pos(a: &mut Vec<(Position, Hash)>, b: &[Position]) {
    let mut bi = 0;
    a.retain(|&(pos, _)| {
        while bi < b.len() && b[bi] < pos {
            bi += 1;
        }
        !(bi < b.len() && b[bi] == pos)
    });
}

fn dedup_by_pos(records: &mut Vec<(Position, Hash)>) {
    let mut seen = HashSet::with_capacity(records.len());
    records.retain(|&(pos, _)| seen.insert(pos));
}

/// Reshapes the proof so that it proves the siblings of its targets, i.e.
/// the members that remain once the targets are deleted. Verifying the
/// returned pair recomputes the roots as if every target were `EMPTY`.
pub fn proof_after_deletion(num_leaves: u64, proof: &Proof) -> (Vec<Hash>, Proof) {
    let forest_rows = tree_rows(num_leaves);

    let mut targets = proof.targets.clone();
    targets.sort_unstable();

    // Attach a position to each of the proof hashes.
    let (proof_pos, _) = proof_positions(&targets, num_leaves, forest_rows);
    let mut records: Vec<(Position, Hash)> = proof_pos
        .into_iter()
        .zip(proof.hashes.iter().cloned())
        .collect();

    // New targets with their hashes, in processing order.
    let mut new_targets: Vec<(Position, Hash)> = Vec::with_capacity(targets.len());

    let targets = detwin(targets, forest_rows);

    // For each deletion, either promote the sibling from the proof hashes to
    // the parent slot, or shift the sibling's already-collected descendants
    // up one row.
    for &target in targets.iter() {
        if is_root_position(target, num_leaves, forest_rows) {
            // A deleted root leaves a barren slot behind.
            new_targets.push((target, EMPTY));
            continue;
        }

        let sib = sibling(target);
        if let Some(idx) = records.iter().position(|&(pos, _)| pos == sib) {
            // The sibling is a proof hash: it becomes a target at the parent.
            let (_, sib_hash) = records.remove(idx);
            new_targets.push((parent(sib, forest_rows), sib_hash));
        } else {
            // The sibling's descendants are among the new targets or the
            // remaining proofs already. Example, deleting 00 and 09:
            //
            // 14
            // |---------------\
            // 12              13
            // |-------\       |-------\
            // 08      09      10      11
            // |---\   |---\   |---\   |---\
            // 00  01          04  05  06  07
            //
            // 01 has already moved up to 08 when 00 was processed, and
            // deleting 09 now moves 08 further up to 12.
            let moved_parent = parent(sib, forest_rows);
            for entry in new_targets.iter_mut() {
                if is_ancestor(moved_parent, entry.0, forest_rows) {
                    entry.0 = calc_next_position(entry.0, sib, forest_rows);
                }
            }
            for entry in records.iter_mut() {
                if is_ancestor(moved_parent, entry.0, forest_rows) {
                    entry.0 = calc_next_position(entry.0, sib, forest_rows);
                }
            }
            dedup_by_pos(&mut new_targets);
        }
    }

    // The leftover proofs are the proofs for the new targets.
    records.sort_unstable_by_key(|&(pos, _)| pos);

    let (positions, hashes): (Vec<Position>, Vec<Hash>) = new_targets.into_iter().unzip();
    (
        hashes,
        Proof {
            targets: positions,
            hashes: records.into_iter().map(|(_, hash)| hash).collect(),
        },
    )
}

/// Returns the positions a prover is missing to cover `desired_targets` on
/// top of an existing proof for `proof_targets`. Both target lists must
/// refer to valid positions in the accumulator.
pub fn get_missing_positions(
    num_leaves: u64,
    proof_targets: &[Position],
    desired_targets: &[Position],
) -> Vec<Position> {
    let forest_rows = tree_rows(num_leaves);

    let mut targets = proof_targets.to_vec();
    targets.sort_unstable();
    let mut desired = desired_targets.to_vec();
    desired.sort_unstable();

    // Drop the targets we can already prove.
    subtract_sorted(&mut desired, &targets);
    if desired.is_empty() {
        return Vec::new();
    }

    let (mut missing, _) = proof_positions(&desired, num_leaves, forest_rows);

    // Everything reachable from the current proof: its hashes, its targets
    // and whatever hashing the targets up produces.
    let (mut have, computable) = proof_positions(&targets, num_leaves, forest_rows);
    have.extend_from_slice(&targets);
    have.extend_from_slice(&computable);
    have.sort_unstable();

    subtract_sorted(&mut missing, &have);
    missing
}

/// Merges `other` into `proof`, dropping positions that became computable
/// from the union of targets along with any duplicates. Returns the merged
/// leaf hashes and proof, both sorted by target position.
pub fn add_proof(
    proof: &Proof,
    other: &Proof,
    del_hashes: &[Hash],
    other_del_hashes: &[Hash],
    num_leaves: u64,
) -> (Vec<Hash>, Proof) {
    let forest_rows = tree_rows(num_leaves);

    let mut targets = proof.targets.clone();
    targets.sort_unstable();
    let (positions, mut computable) = proof_positions(&targets, num_leaves, forest_rows);
    let mut records: Vec<(Position, Hash)> = positions
        .into_iter()
        .zip(proof.hashes.iter().cloned())
        .collect();

    let mut other_targets = other.targets.clone();
    other_targets.sort_unstable();
    let (positions, other_computable) = proof_positions(&other_targets, num_leaves, forest_rows);
    let other_records: Vec<(Position, Hash)> = positions
        .into_iter()
        .zip(other.hashes.iter().cloned())
        .collect();

    records.extend(other_records);
    records.sort_unstable_by_key(|&(pos, _)| pos);
    dedup_by_pos(&mut records);

    // A hash that the union of targets can compute is no longer proof material.
    computable.extend(other_computable);
    computable.sort_unstable();
    computable.dedup();
    subtract_records_by_pos(&mut records, &computable);

    let merged_dels = merge_sorted_records(
        to_hash_and_pos(&proof.targets, del_hashes),
        to_hash_and_pos(&other.targets, other_del_hashes),
    );

    let (merged_targets, merged_hashes): (Vec<Position>, Vec<Hash>) =
        merged_dels.into_iter().unzip();
    (
        merged_hashes,
        Proof {
            targets: merged_targets,
            hashes: records.into_iter().map(|(_, hash)| hash).collect(),
        },
    )
}

/// Hashes the pair up to the parent, then keeps merging the result with any
/// sibling present in `records` until none is found, and stores the final
/// ancestor back in `records`.
fn hash_siblings(
    records: &mut Vec<(Position, Hash)>,
    entry: (Position, Hash),
    sib_hash: Hash,
    forest_rows: u8,
    hasher: &Hasher<Hash>,
) {
    let (mut pos, mut hash) = entry;
    hash = if is_left_niece(pos) {
        hasher.intermediate(&hash, &sib_hash)
    } else {
        hasher.intermediate(&sib_hash, &hash)
    };
    pos = parent(pos, forest_rows);

    while let Some(idx) = records.iter().position(|&(p, _)| p == sibling(pos)) {
        let (_, found) = records.remove(idx);
        hash = if is_left_niece(pos) {
            hasher.intermediate(&hash, &found)
        } else {
            hasher.intermediate(&found, &hash)
        };
        pos = parent(pos, forest_rows);
    }
    records.push((pos, hash));
}

/// Shrinks the proof to cover only the targets not listed in `rem_targets`.
/// The supplied proof must be valid; positions that served only the removed
/// targets are hashed upward into whatever ancestors the remaining targets
/// still require, and subtrees with no remaining target contribute nothing.
pub fn remove_targets(
    num_leaves: u64,
    del_hashes: &[Hash],
    proof: &Proof,
    rem_targets: &[Position],
    hasher: &Hasher<Hash>,
) -> Proof {
    let forest_rows = tree_rows(num_leaves);

    let mut targets = proof.targets.clone();
    let target_records = to_hash_and_pos(&targets, del_hashes);
    targets.sort_unstable();

    let (have_positions, _) = proof_positions(&targets, num_leaves, forest_rows);
    let mut records: Vec<(Position, Hash)> = have_positions
        .into_iter()
        .zip(proof.hashes.iter().cloned())
        .collect();

    // Some targets turn into plain proof material once their neighbors leave.
    records.extend(target_records);
    records.sort_unstable_by_key(|&(pos, _)| pos);

    let mut rem = rem_targets.to_vec();
    rem.sort_unstable();
    subtract_sorted(&mut targets, &rem);

    // Whatever is still a target is not proof material.
    subtract_records_by_pos(&mut records, &targets);

    // Only subtrees holding a remaining target matter for the output.
    let mut subtrees: Vec<u8> = Vec::new();
    for &target in &targets {
        if let Some(loc) = detect_offset(target, num_leaves) {
            if !subtrees.contains(&loc.subtree) {
                subtrees.push(loc.subtree);
            }
        }
    }
    records.retain(|&(pos, _)| {
        detect_offset(pos, num_leaves)
            .map(|loc| subtrees.contains(&loc.subtree))
            .unwrap_or(false)
    });

    // Positions required to prove what remains.
    let (mut want, computable) = proof_positions(&targets, num_leaves, forest_rows);
    want.extend(computable);
    want.sort_unstable();

    // Positions that served only the removed targets.
    let (mut removals, _) = proof_positions(&rem, num_leaves, forest_rows);
    removals.extend_from_slice(&rem);
    removals.sort_unstable();
    subtract_sorted(&mut removals, &want);

    // Walk the removals against the sorted records, hashing up whenever a
    // removed position pairs with a kept sibling: the pair may hash up to an
    // ancestor the remaining targets still need. In the tree below, with
    // targets [00, 04] and 00 being removed, 00 and 01 hash up to 12 which
    // stays required for proving 04.
    //
    // 14
    // |---------------\
    // 12              13
    // |-------\       |-------\
    // 08      09      10      11
    // |---\   |---\   |---\   |---\
    // 00  01  02  03  04  05  06  07
    let mut record_idx = 0;
    let mut i = 0;
    while i < removals.len() {
        if record_idx >= records.len() {
            break;
        }
        let (pos, hash) = records[record_idx];
        let removal = removals[i];
        if removal == pos {
            if record_idx + 1 < records.len() && records[record_idx + 1].0 == right_sib(pos) {
                let sib_hash = records[record_idx + 1].1;
                hash_siblings(&mut records, (pos, hash), sib_hash, forest_rows, hasher);
                records.drain(record_idx..=record_idx + 1);
            } else if record_idx >= 1 && records[record_idx - 1].0 == left_sib(pos) {
                let sib_hash = records[record_idx - 1].1;
                hash_siblings(&mut records, (pos, hash), sib_hash, forest_rows, hasher);
                records.drain(record_idx - 1..=record_idx);
                record_idx -= 1;
            } else {
                records.remove(record_idx);
            }
            records.sort_unstable_by_key(|&(p, _)| p);
            i += 1;
        } else if removal < pos {
            i += 1;
        } else {
            record_idx += 1;
        }
    }

    records.sort_unstable_by_key(|&(pos, _)| pos);
    Proof {
        targets,
        hashes: records.into_iter().map(|(_, hash)| hash).collect(),
    }
}

/// Rewrites a cached proof to stay valid across the deletion described by
/// `new_proof`: the sibling-of-deleted hashes are learned from the deletion,
/// merged into the cached proof, and the deletion's own targets dropped.
///
/// In the tree below, if the cached proof covers 04 and `new_proof` deletes
/// 00, the hash at 12 becomes the parent of 01 and 09 and the cached proof
/// is updated accordingly.
///
/// ```ascii
/// 14
/// |---------------\
/// 12              13
/// |-------\       |-------\
/// 08      09      10      11
/// |---\   |---\   |---\   |---\
/// 00  01  02  03  04  05  06  07
/// ```
pub fn modify_proof(
    cached_proof: &Proof,
    new_proof: &Proof,
    cached_del_hashes: &[Hash],
    num_leaves: u64,
    hasher: &Hasher<Hash>,
) -> Proof {
    let (after_hashes, after_proof) = proof_after_deletion(num_leaves, new_proof);
    let (merged_hashes, merged_proof) = add_proof(
        &after_proof,
        cached_proof,
        &after_hashes,
        cached_del_hashes,
        num_leaves,
    );
    remove_targets(
        num_leaves,
        &merged_hashes,
        &merged_proof,
        &after_proof.targets,
        hasher,
    )
}
