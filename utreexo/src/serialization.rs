//! Wire formats for proofs and snapshots.
//!
//! A proof is the targets in caller order followed by the sibling hashes,
//! both with a varint count prefix:
//!
//! ```ascii
//!    +-----------------+---------------+-----+-----------------+----------+-----
//!    | targets: varint | target: u64LE | ... | hashes: varint  | 32 bytes | ...
//!    +-----------------+---------------+-----+-----------------+----------+-----
//! ```
//!
//! A MapPollard snapshot stores the forest shape and the node map; the leaf
//! cache is rebuilt from the remember flags on load:
//!
//! ```ascii
//!    +---------+----------------+---------------+------------------------------+-----
//!    | rows:u8 | numleaves: u64 | nodes: varint | pos u64 | hash | remember u8 | ...
//!    +---------+----------------+---------------+------------------------------+-----
//! ```
//!
//! Nodes are written in ascending position order so the encoding is
//! deterministic.
use std::collections::HashMap;

use readerwriter::{
    varint_len, Decodable, Encodable, ExactSizeEncodable, ReadError, Reader, WriteError, Writer,
};

use crate::error::UtreexoError;
use crate::pollard::{MapPollard, MiniHash, Node};
use crate::position::Position;
use crate::proof::Proof;
use crate::stump::Stump;
use merkle::Hash;

impl Encodable for Proof {
    fn encode(&self, w: &mut impl Writer) -> Result<(), WriteError> {
        w.write_varint(b"targets", self.targets.len() as u64)?;
        for &target in self.targets.iter() {
            w.write_u64(b"target", target)?;
        }
        w.write_varint(b"hashes", self.hashes.len() as u64)?;
        for hash in self.hashes.iter() {
            hash.encode(w)?;
        }
        Ok(())
    }
}

impl ExactSizeEncodable for Proof {
    fn encoded_size(&self) -> usize {
        varint_len(self.targets.len() as u64)
            + 8 * self.targets.len()
            + varint_len(self.hashes.len() as u64)
            + 32 * self.hashes.len()
    }
}

impl Decodable for Proof {
    fn decode(reader: &mut impl Reader) -> Result<Self, ReadError> {
        let count = reader.read_varint()? as usize;
        if count > reader.remaining_bytes() / 8 {
            // A well-formed buffer holds at least 8 bytes per target.
            return Err(ReadError::InsufficientBytes);
        }
        let targets = reader.read_vec(count, |r| r.read_u64())?;
        let count = reader.read_varint()? as usize;
        if count > reader.remaining_bytes() / 32 {
            return Err(ReadError::InsufficientBytes);
        }
        let hashes = reader.read_vec(count, |r| Hash::decode(r))?;
        Ok(Proof { targets, hashes })
    }
}

impl Encodable for Stump {
    fn encode(&self, w: &mut impl Writer) -> Result<(), WriteError> {
        w.write_varint(b"roots", self.roots.len() as u64)?;
        for root in self.roots.iter() {
            root.encode(w)?;
        }
        w.write_u64(b"numleaves", self.num_leaves)
    }
}

impl ExactSizeEncodable for Stump {
    fn encoded_size(&self) -> usize {
        varint_len(self.roots.len() as u64) + 32 * self.roots.len() + 8
    }
}

impl Decodable for Stump {
    fn decode(reader: &mut impl Reader) -> Result<Self, ReadError> {
        let count = reader.read_varint()? as usize;
        if count > reader.remaining_bytes() / 32 {
            return Err(ReadError::InsufficientBytes);
        }
        let roots = reader.read_vec(count, |r| Hash::decode(r))?;
        let num_leaves = reader.read_u64()?;
        Ok(Stump { roots, num_leaves })
    }
}

/// Bytes per serialized node entry: position, hash, remember flag.
const NODE_ENTRY_SIZE: usize = 8 + 32 + 1;

impl MapPollard {
    /// Exact size of the snapshot produced by [`MapPollard::write`].
    pub fn serialized_size(&self) -> usize {
        1 + 8 + varint_len(self.nodes.len() as u64) + NODE_ENTRY_SIZE * self.nodes.len()
    }

    /// Writes the accumulator snapshot. Returns the number of bytes written.
    pub fn write(&self, w: &mut impl Writer) -> Result<usize, UtreexoError> {
        w.write_u8(b"rows", self.total_rows)?;
        w.write_u64(b"numleaves", self.num_leaves)?;
        w.write_varint(b"nodes", self.nodes.len() as u64)?;

        let mut entries: Vec<(&Position, &Node)> = self.nodes.iter().collect();
        entries.sort_unstable_by_key(|&(&pos, _)| pos);
        for (&pos, node) in entries {
            w.write_u64(b"pos", pos)?;
            node.hash.encode(w)?;
            w.write_u8(b"remember", node.remember as u8)?;
        }
        Ok(self.serialized_size())
    }

    /// Restores the accumulator from a snapshot produced by
    /// [`MapPollard::write`]. Returns the number of bytes read.
    pub fn read(&mut self, reader: &mut impl Reader) -> Result<usize, UtreexoError> {
        let total_rows = reader.read_u8()?;
        let num_leaves = reader.read_u64()?;
        let count = reader.read_varint()? as usize;
        if count > reader.remaining_bytes() / NODE_ENTRY_SIZE {
            return Err(ReadError::InsufficientBytes.into());
        }

        let mut nodes = HashMap::with_capacity(count);
        let mut cached_leaves = HashMap::new();
        for _ in 0..count {
            let pos = reader.read_u64()?;
            let hash = Hash::decode(reader)?;
            let remember = match reader.read_u8()? {
                0 => false,
                1 => true,
                _ => return Err(UtreexoError::MalformedInput),
            };
            if remember {
                cached_leaves.insert(MiniHash::from(&hash), pos);
            }
            nodes.insert(pos, Node { hash, remember });
        }

        self.nodes = nodes;
        self.cached_leaves = cached_leaves;
        self.num_leaves = num_leaves;
        self.total_rows = total_rows;
        Ok(self.serialized_size())
    }
}
