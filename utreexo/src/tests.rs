//! Scenario tests driving the accumulator the way a chain of blocks would.
use std::collections::HashSet;

use rand::rngs::StdRng;
use rand::{Rng, SeedableRng};

use super::*;

fn leaf_hash(i: u64) -> Hash {
    let mut bytes = [0u8; 32];
    bytes[..8].copy_from_slice(&i.to_le_bytes());
    bytes[31] = 1;
    Hash(bytes)
}

/// Produces blocks of fresh leaves and spends them a few blocks later,
/// with random lifetimes. A lifetime of zero means the leaf is never spent
/// and not worth remembering.
struct SimChain {
    rng: StdRng,
    ttl: Vec<Vec<Hash>>,
    counter: u64,
    max_lifetime: usize,
}

impl SimChain {
    fn new(seed: u64, max_lifetime: usize) -> Self {
        SimChain {
            rng: StdRng::seed_from_u64(seed),
            ttl: vec![Vec::new(); max_lifetime + 1],
            counter: 0,
            max_lifetime,
        }
    }

    fn next_block(&mut self, num_adds: u64) -> (Vec<Leaf>, Vec<Hash>) {
        let del_hashes = self.ttl.remove(0);
        self.ttl.push(Vec::new());

        let mut adds = Vec::with_capacity(num_adds as usize);
        for _ in 0..num_adds {
            let hash = leaf_hash(self.counter);
            self.counter += 1;
            let lifetime = self.rng.gen_range(0..=self.max_lifetime);
            if lifetime > 0 {
                self.ttl[lifetime - 1].push(hash);
            }
            adds.push(Leaf {
                hash,
                remember: lifetime != 0,
            });
        }
        (adds, del_hashes)
    }
}

/// Checks the accumulator invariants: cached leaves are remembered with
/// matching hashes, the node map holds what proving needs and nothing it
/// does not, and everything cached hashes up to the stored roots.
fn sanity_check(acc: &MapPollard) {
    let natural = tree_rows(acc.get_num_leaves());

    let mut cached: Vec<(Hash, Position)> = Vec::new();
    for (mini, &pos) in acc.cached_leaves.iter() {
        let node = acc
            .nodes
            .get(&pos)
            .expect("cached leaf must be present in the node map");
        assert!(node.remember, "cached leaf at {} is not remembered", pos);
        assert_eq!(MiniHash::from(&node.hash), *mini);
        cached.push((node.hash, pos));
    }

    // Everything in the node map must be justified by a cached leaf or be a
    // root, and every position a cached leaf's proof needs must be present.
    let mut allowed: HashSet<Position> =
        root_positions(acc.get_num_leaves(), acc.total_rows)
            .into_iter()
            .collect();
    for &(_, pos) in cached.iter() {
        allowed.insert(pos);
        let (needed, computable) =
            proof_positions(&[pos], acc.get_num_leaves(), acc.total_rows);
        for need in needed {
            assert!(
                acc.nodes.contains_key(&need),
                "missing position {} needed for proving {}",
                need,
                pos
            );
            allowed.insert(need);
        }
        allowed.extend(computable);
    }
    for key in acc.nodes.keys() {
        assert!(allowed.contains(key), "unneeded position {} is cached", key);
    }

    if cached.is_empty() {
        return;
    }

    // Prove every cached leaf and check the proof and all the intermediate
    // hashes against the stored state.
    let hashes: Vec<Hash> = cached.iter().map(|&(hash, _)| hash).collect();
    let proof = acc.prove(&hashes).expect("cached leaves must be provable");
    let hasher = utreexo_hasher();
    acc.to_stump()
        .verify(&hashes, &proof, &hasher)
        .expect("cached proof must verify against the roots");

    let (computed, root_candidates) =
        calculate_hashes(acc.get_num_leaves(), &hashes, &proof, &hasher).unwrap();
    for (pos, hash) in computed.into_iter().chain(root_candidates) {
        let internal = translate_pos(pos, natural, acc.total_rows);
        if let Some(node) = acc.nodes.get(&internal) {
            assert_eq!(node.hash, hash, "stale hash at position {}", pos);
        }
    }
}

/// Runs a chain of blocks against a fully-remembering reference accumulator
/// and a partially-caching one, checking they stay in lockstep.
fn run_chain(seed: u64, partial_rows: Option<u8>, blocks: usize) {
    let mut full = MapPollard::new();
    let mut partial = match partial_rows {
        Some(rows) => MapPollard::with_total_rows(rows),
        None => MapPollard::new(),
    };
    let mut chain = SimChain::new(seed, 4);

    for block in 0..blocks {
        let (adds, del_hashes) = chain.next_block(4);
        let full_adds: Vec<Leaf> = adds
            .iter()
            .map(|leaf| Leaf {
                hash: leaf.hash,
                remember: true,
            })
            .collect();

        // The reference accumulator serves the block's deletion proof; the
        // partial one ingests it, after which it can produce it itself.
        let expected = full.prove(&del_hashes).unwrap();
        partial
            .verify(&del_hashes, &expected, true)
            .unwrap_or_else(|err| panic!("block {}: {}", block, err));
        let proof = partial.prove(&del_hashes).unwrap();
        assert_eq!(proof, expected, "block {}: proofs differ", block);

        for &target in proof.targets.iter() {
            assert_ne!(partial.get_hash(target), EMPTY);
        }

        partial.modify(&adds, &del_hashes, &proof).unwrap();
        full.modify(&full_adds, &del_hashes, &proof).unwrap();

        assert_eq!(full.get_roots(), partial.get_roots(), "block {}", block);
        assert_eq!(full.get_num_leaves(), partial.get_num_leaves());

        // Whatever the partial accumulator still caches must prove the same
        // way the reference does.
        let cached: Vec<Hash> = partial
            .cached_leaves
            .values()
            .map(|pos| partial.nodes[pos].hash)
            .collect();
        let cached_proof = partial.prove(&cached).unwrap();
        let expected_cached = full.prove(&cached).unwrap();
        assert_eq!(cached_proof, expected_cached, "block {}", block);

        sanity_check(&partial);
        sanity_check(&full);
    }
}

#[test]
fn chain_simulation_natural_rows() {
    run_chain(0x07, None, 30);
}

#[test]
fn chain_simulation_fixed_rows() {
    run_chain(0x07, Some(50), 30);
}

#[test]
fn chain_simulation_more_seeds() {
    for seed in 1..6u64 {
        run_chain(seed, None, 20);
        run_chain(seed, Some(40), 12);
    }
}

#[test]
fn every_cached_subset_proves() {
    let mut acc = MapPollard::new();
    let adds: Vec<Leaf> = (0..8)
        .map(|i| Leaf {
            hash: leaf_hash(i),
            remember: true,
        })
        .collect();
    acc.modify(&adds, &[], &Proof::default()).unwrap();

    for mask in 0u32..256 {
        let subset: Vec<Hash> = (0..8)
            .filter(|i| mask & (1 << i) != 0)
            .map(leaf_hash)
            .collect();
        let proof = acc.prove(&subset).unwrap();
        acc.verify(&subset, &proof, false)
            .unwrap_or_else(|err| panic!("subset {:#b}: {}", mask, err));
    }
}

#[test]
fn snapshot_roundtrip_after_chain() {
    let mut acc = MapPollard::new();
    let mut chain = SimChain::new(0x2a, 3);
    for _ in 0..20 {
        let (adds, del_hashes) = chain.next_block(3);
        // Everything that will be spent is remembered, so the accumulator
        // can prove its own deletions.
        let proof = acc.prove(&del_hashes).unwrap();
        acc.modify(&adds, &del_hashes, &proof).unwrap();
    }
    sanity_check(&acc);

    let mut buf = Vec::new();
    let wrote = acc.write(&mut buf).unwrap();
    assert_eq!(wrote, buf.len());
    assert_eq!(wrote, acc.serialized_size());

    let mut restored = MapPollard::new();
    let mut slice = &buf[..];
    let read = restored.read(&mut slice).unwrap();
    assert_eq!(read, wrote);
    assert_eq!(slice.len(), 0);
    assert_eq!(restored, acc);
    sanity_check(&restored);
}

#[test]
fn prune_keeps_exactly_what_proving_needs() {
    let mut acc = MapPollard::new();
    let adds: Vec<Leaf> = (0..8)
        .map(|i| Leaf {
            hash: leaf_hash(i),
            remember: true,
        })
        .collect();
    acc.modify(&adds, &[], &Proof::default()).unwrap();

    let pruned: Vec<Hash> = [0u64, 1, 4].iter().cloned().map(leaf_hash).collect();
    let kept: Vec<u64> = vec![2, 3, 5, 6, 7];
    acc.prune(&pruned).unwrap();

    // Pruned leaves are gone...
    for hash in pruned.iter() {
        assert_eq!(acc.prove(&[*hash]), Err(UtreexoError::MissingCachedLeaf));
    }
    // ...the kept ones still prove...
    for &i in kept.iter() {
        let proof = acc.prove(&[leaf_hash(i)]).unwrap();
        acc.verify(&[leaf_hash(i)], &proof, false).unwrap();
    }
    // ...and the node map holds exactly the kept leaves, their proof
    // positions and the roots.
    let mut expected: HashSet<Position> = root_positions(8, 3).into_iter().collect();
    for &pos in kept.iter() {
        expected.insert(pos);
        let (needed, _) = proof_positions(&[pos], 8, 3);
        expected.extend(needed);
    }
    let have: HashSet<Position> = acc.nodes.keys().cloned().collect();
    assert_eq!(have, expected);
}

#[test]
fn merged_proofs_equal_joint_proof() {
    let hasher = utreexo_hasher();
    let mut acc = MapPollard::new();
    let adds: Vec<Leaf> = (0..8)
        .map(|i| Leaf {
            hash: leaf_hash(i),
            remember: true,
        })
        .collect();
    acc.modify(&adds, &[], &Proof::default()).unwrap();

    let first_hashes = vec![leaf_hash(0), leaf_hash(1)];
    let second_hashes = vec![leaf_hash(2), leaf_hash(5)];
    let first = acc.prove(&first_hashes).unwrap();
    let second = acc.prove(&second_hashes).unwrap();

    let (merged_hashes, merged) = add_proof(&first, &second, &first_hashes, &second_hashes, 8);

    let joint = acc
        .prove(&[leaf_hash(0), leaf_hash(1), leaf_hash(2), leaf_hash(5)])
        .unwrap();
    assert_eq!(merged, joint);
    assert_eq!(
        merged_hashes,
        vec![leaf_hash(0), leaf_hash(1), leaf_hash(2), leaf_hash(5)]
    );
    acc.to_stump()
        .verify(&merged_hashes, &merged, &hasher)
        .unwrap();
}

#[test]
fn modified_proof_tracks_deletion() {
    let hasher = utreexo_hasher();
    let mut acc = MapPollard::new();
    let adds: Vec<Leaf> = (0..8)
        .map(|i| Leaf {
            hash: leaf_hash(i),
            remember: true,
        })
        .collect();
    acc.modify(&adds, &[], &Proof::default()).unwrap();

    let cached_hashes = vec![leaf_hash(4)];
    let cached_proof = acc.prove(&cached_hashes).unwrap();
    let del_hashes = vec![leaf_hash(0)];
    let del_proof = acc.prove(&del_hashes).unwrap();

    // Rewrite the cached proof across the deletion, then apply the deletion
    // and compare against proving from scratch.
    let updated = modify_proof(&cached_proof, &del_proof, &cached_hashes, 8, &hasher);
    acc.modify(&[], &del_hashes, &del_proof).unwrap();

    let expected = acc.prove(&cached_hashes).unwrap();
    assert_eq!(updated, expected);
    acc.to_stump()
        .verify(&cached_hashes, &updated, &hasher)
        .unwrap();
}

#[test]
fn missing_positions_complete_a_proof() {
    let mut acc = MapPollard::new();
    let adds: Vec<Leaf> = (0..8)
        .map(|i| Leaf {
            hash: leaf_hash(i),
            remember: true,
        })
        .collect();
    acc.modify(&adds, &[], &Proof::default()).unwrap();

    let have = acc.prove(&[leaf_hash(0)]).unwrap();
    let want = acc.prove(&[leaf_hash(0), leaf_hash(2)]).unwrap();

    // The positions reported missing, fetched from the accumulator and
    // merged with what the narrow proof already has, cover everything the
    // wider proof carries.
    let missing = get_missing_positions(8, &have.targets, &[0, 2]);
    let mut fetched: Vec<(Position, Hash)> = missing
        .iter()
        .map(|&pos| (pos, acc.get_hash(pos)))
        .collect();
    let (have_positions, _) = proof_positions(&have.targets, 8, 3);
    fetched.extend(have_positions.into_iter().zip(have.hashes.iter().cloned()));
    fetched.sort_unstable_by_key(|&(pos, _)| pos);

    let (want_positions, _) = proof_positions(&want.targets, 8, 3);
    for record in want_positions.into_iter().zip(want.hashes.iter().cloned()) {
        assert!(fetched.contains(&record));
    }
}
