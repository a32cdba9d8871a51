//! The stump: the bare state a verifier needs to check inclusion proofs.
use serde::{Deserialize, Serialize};
use subtle::ConstantTimeEq;

use crate::error::UtreexoError;
use crate::proof::{calculate_roots, Proof};
use merkle::{Hash, Hasher};

/// Minimal verifier-side state of the accumulator.
#[derive(Clone, Debug, Default, PartialEq, Serialize, Deserialize)]
pub struct Stump {
    /// Roots of the forest's perfect subtrees, tallest tree first.
    pub roots: Vec<Hash>,
    /// Total number of leaves ever added.
    pub num_leaves: u64,
}

impl Stump {
    /// Verifies that the proof commits the given leaf hashes to this stump's
    /// roots. Returns the index of the matched stored root for each computed
    /// root candidate.
    ///
    /// Candidates are computed lowest row first, while `roots` stores the
    /// tallest tree first, so matching walks the stored roots in reverse.
    pub fn verify(
        &self,
        del_hashes: &[Hash],
        proof: &Proof,
        hasher: &Hasher<Hash>,
    ) -> Result<Vec<usize>, UtreexoError> {
        if del_hashes.len() != proof.targets.len() {
            return Err(UtreexoError::MalformedProof);
        }
        if del_hashes.is_empty() {
            return Ok(Vec::new());
        }

        let candidates = calculate_roots(self.num_leaves, del_hashes, proof, hasher)?;
        if candidates.is_empty() {
            return Err(UtreexoError::RootMismatch);
        }

        let mut indexes = Vec::with_capacity(candidates.len());
        for (i, root) in self.roots.iter().rev().enumerate() {
            if indexes.len() < candidates.len()
                && root.ct_eq(&candidates[indexes.len()]).unwrap_u8() == 1
            {
                indexes.push(self.roots.len() - 1 - i);
            }
        }
        if indexes.len() != candidates.len() {
            return Err(UtreexoError::RootMismatch);
        }
        Ok(indexes)
    }
}
