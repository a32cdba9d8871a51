//! Implementation of a utxo set accumulator based on Tadge Dryja's Utreexo
//! design: a forest of perfect merkle binary trees committing to a mutable
//! set of 32-byte leaves. The accumulator itself stores only the tree roots;
//! membership is shown with logarithmic-size proofs, and a map-backed
//! pollard keeps a chosen subset of leaves provable across updates.
#[macro_use]
extern crate failure;

mod error;
mod pollard;
mod position;
mod proof;
mod serialization;
mod stump;
mod update;

#[cfg(test)]
mod tests;

// Public API
pub use self::error::UtreexoError;
pub use self::pollard::{Leaf, MapPollard, MiniHash};
pub use self::position::{
    calc_next_position, detect_offset, detect_row, detwin, is_ancestor, is_left_niece,
    is_root_position, left_child, left_sib, num_roots, parent, right_child, right_sib,
    root_position, root_positions, sibling, start_row, translate_pos, tree_rows, Position,
    TreeLocation,
};
pub use self::proof::{calculate_hashes, calculate_roots, proof_positions, Proof};
pub use self::stump::Stump;
pub use self::update::{
    add_proof, get_missing_positions, modify_proof, proof_after_deletion, remove_targets,
};

pub use merkle::{Hash, Hasher, MerkleItem};

/// Hash value marking an absent node: deleted leaves and barren roots read
/// as `EMPTY`. It is never produced by hashing.
pub const EMPTY: Hash = Hash([0u8; 32]);

/// Utreexo-labeled hasher for the merkle tree nodes.
pub fn utreexo_hasher() -> Hasher<Hash> {
    Hasher::new(b"utreexo")
}
