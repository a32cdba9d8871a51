//! Map-backed pollard: a partial accumulator that caches a chosen subset of
//! leaves together with exactly the nodes needed to keep proving them.
use std::collections::{HashMap, HashSet};
use std::fmt;
use std::mem;

use subtle::ConstantTimeEq;

use crate::error::UtreexoError;
use crate::position::*;
use crate::proof::{calculate_hashes, proof_positions, Proof};
use crate::stump::Stump;
use crate::update::proof_after_deletion;
use crate::{utreexo_hasher, EMPTY};
use merkle::{Hash, Hasher};

/// Truncated leaf hash used as the key of the leaf-position map.
#[derive(Copy, Clone, PartialEq, Eq, Hash, Debug)]
pub struct MiniHash([u8; 12]);

impl From<&Hash> for MiniHash {
    fn from(hash: &Hash) -> Self {
        let mut mini = [0u8; 12];
        mini.copy_from_slice(&hash[..12]);
        MiniHash(mini)
    }
}

/// A leaf queued for addition to the accumulator.
#[derive(Copy, Clone, PartialEq, Debug)]
pub struct Leaf {
    /// Hash of the leaf.
    pub hash: Hash,
    /// Whether the accumulator should keep this leaf provable.
    pub remember: bool,
}

/// A single cached node of the forest.
#[derive(Copy, Clone, PartialEq, Debug)]
pub(crate) struct Node {
    pub(crate) hash: Hash,
    /// True iff this is the position of a cached leaf.
    pub(crate) remember: bool,
}

/// Accumulator over a virtual forest, storing only the roots, the cached
/// leaves and the nodes required to prove them.
///
/// All positions crossing the public API are in the natural
/// `tree_rows(num_leaves)` convention; internally the forest may be laid out
/// over a larger fixed number of rows, and positions are translated at the
/// boundary.
#[derive(Clone)]
pub struct MapPollard {
    /// Every materialized node of the forest, keyed by position.
    pub(crate) nodes: HashMap<Position, Node>,
    /// Maps a cached leaf hash to its current position.
    pub(crate) cached_leaves: HashMap<MiniHash, Position>,
    /// Total number of leaves ever added. Deletions leave ghost slots and do
    /// not decrement this.
    pub(crate) num_leaves: u64,
    /// Fixed height of the internal forest layout.
    pub(crate) total_rows: u8,
    hasher: Hasher<Hash>,
}

impl PartialEq for MapPollard {
    fn eq(&self, other: &Self) -> bool {
        self.num_leaves == other.num_leaves
            && self.total_rows == other.total_rows
            && self.nodes == other.nodes
            && self.cached_leaves == other.cached_leaves
    }
}

impl fmt::Debug for MapPollard {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("MapPollard")
            .field("num_leaves", &self.num_leaves)
            .field("total_rows", &self.total_rows)
            .field("nodes", &self.nodes)
            .field("cached_leaves", &self.cached_leaves)
            .finish()
    }
}

impl MapPollard {
    /// Creates an empty accumulator whose forest grows with the leaf count.
    pub fn new() -> Self {
        Self::with_hasher(utreexo_hasher())
    }

    /// Creates an empty accumulator with a caller-supplied node hasher.
    pub fn with_hasher(hasher: Hasher<Hash>) -> Self {
        MapPollard {
            nodes: HashMap::new(),
            cached_leaves: HashMap::new(),
            num_leaves: 0,
            total_rows: 0,
            hasher,
        }
    }

    /// Creates an empty accumulator with a fixed forest height, avoiding
    /// re-keying as the leaf count grows up to `1 << total_rows`.
    pub fn with_total_rows(total_rows: u8) -> Self {
        MapPollard {
            total_rows,
            ..Self::new()
        }
    }

    /// Total number of leaves ever added.
    pub fn get_num_leaves(&self) -> u64 {
        self.num_leaves
    }

    /// Hashes of the forest roots, tallest tree first. A barren root (all of
    /// its leaves deleted) reads as `EMPTY`.
    pub fn get_roots(&self) -> Vec<Hash> {
        root_positions(self.num_leaves, self.total_rows)
            .into_iter()
            .map(|pos| self.nodes.get(&pos).map(|node| node.hash).unwrap_or(EMPTY))
            .collect()
    }

    /// Hash stored at the position, or `EMPTY` when nothing is cached there.
    pub fn get_hash(&self, pos: Position) -> Hash {
        let internal = translate_pos(pos, tree_rows(self.num_leaves), self.total_rows);
        self.nodes
            .get(&internal)
            .map(|node| node.hash)
            .unwrap_or(EMPTY)
    }

    /// The minimal verifier state for the current accumulator.
    pub fn to_stump(&self) -> Stump {
        Stump {
            roots: self.get_roots(),
            num_leaves: self.num_leaves,
        }
    }

    /// Builds the inclusion proof for the given cached leaves. Targets are
    /// returned in the order the hashes were passed in.
    pub fn prove(&self, hashes: &[Hash]) -> Result<Proof, UtreexoError> {
        if hashes.is_empty() || self.num_leaves == 0 {
            return Ok(Proof::default());
        }

        let mut seen = HashSet::with_capacity(hashes.len());
        let mut targets = Vec::with_capacity(hashes.len());
        for wanted in hashes {
            if !seen.insert(MiniHash::from(wanted)) {
                return Err(UtreexoError::MalformedInput);
            }
            let pos = self
                .cached_leaves
                .get(&MiniHash::from(wanted))
                .cloned()
                .ok_or(UtreexoError::MissingCachedLeaf)?;
            targets.push(pos);
        }

        let mut sorted = targets.clone();
        sorted.sort_unstable();
        let (needed, _) = proof_positions(&sorted, self.num_leaves, self.total_rows);

        let mut proof_hashes = Vec::with_capacity(needed.len());
        for pos in needed {
            let node = self.nodes.get(&pos).ok_or(UtreexoError::CorruptedState)?;
            if node.hash == EMPTY {
                return Err(UtreexoError::CorruptedState);
            }
            proof_hashes.push(node.hash);
        }

        let natural = tree_rows(self.num_leaves);
        Ok(Proof {
            targets: targets
                .into_iter()
                .map(|pos| translate_pos(pos, self.total_rows, natural))
                .collect(),
            hashes: proof_hashes,
        })
    }

    /// Checks the proof against the current roots. With `remember` set, the
    /// verified targets become cached leaves and every hash learned from the
    /// proof is kept so they stay provable.
    pub fn verify(
        &mut self,
        del_hashes: &[Hash],
        proof: &Proof,
        remember: bool,
    ) -> Result<(), UtreexoError> {
        if del_hashes.len() != proof.targets.len() {
            return Err(UtreexoError::MalformedProof);
        }
        if del_hashes.is_empty() {
            return Ok(());
        }

        let (computed, root_candidates) =
            calculate_hashes(self.num_leaves, del_hashes, proof, &self.hasher)?;
        self.check_against_roots(&root_candidates)?;

        if remember {
            self.ingest_proof(del_hashes, proof, &computed);
        }
        Ok(())
    }

    /// Applies a block of changes: deletions first (validated against the
    /// current roots via `proof`), then additions. All mutations are staged
    /// and the accumulator is left untouched on error.
    pub fn modify(
        &mut self,
        adds: &[Leaf],
        del_hashes: &[Hash],
        proof: &Proof,
    ) -> Result<(), UtreexoError> {
        let mut staged = self.clone();
        staged.verify(del_hashes, proof, false)?;
        staged.delete(del_hashes, proof)?;
        staged.ingest_adds(adds)?;
        staged.prune_unneeded();
        let _ = mem::replace(self, staged);
        Ok(())
    }

    /// Stops maintaining proofs for the given leaves and drops every node
    /// that no other cached leaf requires.
    pub fn prune(&mut self, hashes: &[Hash]) -> Result<(), UtreexoError> {
        let mut staged = self.clone();
        for hash in hashes {
            let pos = staged
                .cached_leaves
                .remove(&MiniHash::from(hash))
                .ok_or(UtreexoError::NotCached)?;
            match staged.nodes.get_mut(&pos) {
                Some(node) => node.remember = false,
                None => return Err(UtreexoError::CorruptedState),
            }
        }
        staged.prune_unneeded();
        let _ = mem::replace(self, staged);
        Ok(())
    }

    /// Compares root candidates against the stored roots. Candidates arrive
    /// lowest row first while the stored roots are tallest first, so the
    /// stored array is matched in reverse.
    fn check_against_roots(&self, candidates: &[(Position, Hash)]) -> Result<(), UtreexoError> {
        let stored = self.get_roots();
        let mut matched = 0;
        for root in stored.iter().rev() {
            if matched < candidates.len() && root.ct_eq(&candidates[matched].1).unwrap_u8() == 1 {
                matched += 1;
            }
        }
        if matched != candidates.len() {
            return Err(UtreexoError::RootMismatch);
        }
        Ok(())
    }

    /// Stores everything a verified proof teaches us: the targets (as cached
    /// leaves), the supplied proof hashes and the computed ancestors.
    fn ingest_proof(&mut self, del_hashes: &[Hash], proof: &Proof, computed: &[(Position, Hash)]) {
        let natural = tree_rows(self.num_leaves);

        let mut internal_targets = Vec::with_capacity(proof.targets.len());
        for (target, hash) in proof.targets.iter().zip(del_hashes.iter()) {
            let pos = translate_pos(*target, natural, self.total_rows);
            internal_targets.push(pos);
            let node = self.nodes.entry(pos).or_insert(Node {
                hash: *hash,
                remember: true,
            });
            node.hash = *hash;
            node.remember = true;
            self.cached_leaves.insert(MiniHash::from(hash), pos);
        }

        internal_targets.sort_unstable();
        let (needed, _) = proof_positions(&internal_targets, self.num_leaves, self.total_rows);
        for (pos, hash) in needed.into_iter().zip(proof.hashes.iter()) {
            self.nodes.entry(pos).or_insert(Node {
                hash: *hash,
                remember: false,
            });
        }

        for &(pos, hash) in computed {
            let internal = translate_pos(pos, natural, self.total_rows);
            self.nodes.entry(internal).or_insert(Node {
                hash,
                remember: false,
            });
        }
    }

    /// Applies the deletion described by an already-verified proof.
    fn delete(&mut self, del_hashes: &[Hash], proof: &Proof) -> Result<(), UtreexoError> {
        if proof.targets.is_empty() {
            return Ok(());
        }
        let natural = tree_rows(self.num_leaves);

        // Learn the post-deletion hashes of every position along the deleted
        // paths by recomputing the roots with the targets emptied out.
        let (after_hashes, after_proof) = proof_after_deletion(self.num_leaves, proof);
        let (computed, new_roots) =
            calculate_hashes(self.num_leaves, &after_hashes, &after_proof, &self.hasher)?;

        for hash in del_hashes {
            self.cached_leaves.remove(&MiniHash::from(hash));
        }

        // Re-key the surviving sibling subtrees one row up, walking the
        // deletions in ascending order so later collapses see the moves made
        // by earlier ones.
        let mut dels: Vec<Position> = proof
            .targets
            .iter()
            .map(|&target| translate_pos(target, natural, self.total_rows))
            .collect();
        dels.sort_unstable();
        let dels = detwin(dels, self.total_rows);
        for del in dels {
            if is_root_position(del, self.num_leaves, self.total_rows) {
                self.remove_subtree(del);
                self.nodes.insert(
                    del,
                    Node {
                        hash: EMPTY,
                        remember: false,
                    },
                );
            } else {
                let sib = sibling(del);
                self.remove_subtree(del);
                self.move_subtree_up(sib);
            }
        }

        // Overwrite the post-deletion hashes: the promoted targets (their
        // slots may hold a stale parent hash when the sibling itself was not
        // cached), the recomputed ancestors and the roots.
        for (&pos, &hash) in after_proof.targets.iter().zip(after_hashes.iter()) {
            let internal = translate_pos(pos, natural, self.total_rows);
            if let Some(node) = self.nodes.get_mut(&internal) {
                node.hash = hash;
            }
        }
        for &(pos, hash) in &computed {
            let internal = translate_pos(pos, natural, self.total_rows);
            if let Some(node) = self.nodes.get_mut(&internal) {
                node.hash = hash;
            }
        }
        for &(pos, hash) in &new_roots {
            let internal = translate_pos(pos, natural, self.total_rows);
            let node = self.nodes.entry(internal).or_insert(Node {
                hash,
                remember: false,
            });
            node.hash = hash;
        }
        Ok(())
    }

    /// Appends the new leaves, growing the forest height first if they would
    /// not fit under the current one.
    fn ingest_adds(&mut self, adds: &[Leaf]) -> Result<(), UtreexoError> {
        if adds.is_empty() {
            return Ok(());
        }
        let required = tree_rows(self.num_leaves + adds.len() as u64);
        if required > self.total_rows {
            self.remap(required);
        }
        for leaf in adds {
            self.add_single(leaf)?;
        }
        Ok(())
    }

    /// Re-keys every node from the current forest height to a taller one.
    fn remap(&mut self, new_rows: u8) {
        let old_rows = self.total_rows;
        let nodes = mem::replace(&mut self.nodes, HashMap::new());
        self.nodes = nodes
            .into_iter()
            .map(|(pos, node)| (translate_pos(pos, old_rows, new_rows), node))
            .collect();
        for pos in self.cached_leaves.values_mut() {
            *pos = translate_pos(*pos, old_rows, new_rows);
        }
        self.total_rows = new_rows;
    }

    /// Adds one leaf, merging subtree roots along the set bits of the leaf
    /// count, exactly like appending to an incremental merkle forest.
    fn add_single(&mut self, leaf: &Leaf) -> Result<(), UtreexoError> {
        let mut pos = self.num_leaves;
        self.nodes.insert(
            pos,
            Node {
                hash: leaf.hash,
                remember: leaf.remember,
            },
        );
        if leaf.remember {
            self.cached_leaves.insert(MiniHash::from(&leaf.hash), pos);
        }

        let mut row = 0;
        while (self.num_leaves >> row) & 1 == 1 {
            // The existing root of this row sits directly to the left.
            let left_pos = left_sib(pos);
            let left = self
                .nodes
                .get(&left_pos)
                .cloned()
                .ok_or(UtreexoError::CorruptedState)?;
            if left.hash == EMPTY {
                // Barren root: the incoming subtree takes the parent slot
                // without hashing.
                self.nodes.remove(&left_pos);
                self.move_subtree_up(pos);
                pos = parent(pos, self.total_rows);
            } else {
                let cur = self
                    .nodes
                    .get(&pos)
                    .map(|node| node.hash)
                    .ok_or(UtreexoError::CorruptedState)?;
                let parent_pos = parent(pos, self.total_rows);
                self.nodes.insert(
                    parent_pos,
                    Node {
                        hash: self.hasher.intermediate(&left.hash, &cur),
                        remember: false,
                    },
                );
                pos = parent_pos;
            }
            row += 1;
        }
        self.num_leaves += 1;
        Ok(())
    }

    /// Drops the node at `top` and everything below it.
    fn remove_subtree(&mut self, top: Position) {
        let rows = self.total_rows;
        self.nodes
            .retain(|&pos, _| pos != top && !is_ancestor(top, pos, rows));
    }

    /// Re-keys the node at `from` and everything below it one row up,
    /// updating cached leaf positions along the way.
    fn move_subtree_up(&mut self, from: Position) {
        let rows = self.total_rows;
        let keys: Vec<Position> = self
            .nodes
            .keys()
            .cloned()
            .filter(|&pos| pos == from || is_ancestor(from, pos, rows))
            .collect();
        let mut moved = Vec::with_capacity(keys.len());
        for key in keys {
            if let Some(node) = self.nodes.remove(&key) {
                moved.push((calc_next_position(key, from, rows), node));
            }
        }
        for (pos, node) in moved {
            if node.remember {
                self.cached_leaves.insert(MiniHash::from(&node.hash), pos);
            }
            self.nodes.insert(pos, node);
        }
    }

    /// Restores the pruning invariant: a node survives only if it is a root,
    /// a cached leaf, or on the sibling path of a cached leaf.
    fn prune_unneeded(&mut self) {
        let mut keep: HashSet<Position> = root_positions(self.num_leaves, self.total_rows)
            .into_iter()
            .collect();
        for &pos in self.cached_leaves.values() {
            keep.insert(pos);
            let (needed, _) = proof_positions(&[pos], self.num_leaves, self.total_rows);
            keep.extend(needed);
        }
        self.nodes.retain(|pos, _| keep.contains(pos));
    }
}

impl Default for MapPollard {
    fn default() -> Self {
        Self::new()
    }
}
