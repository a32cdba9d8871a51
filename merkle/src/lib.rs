#![deny(missing_docs)]

//! API for operations on merkle binary trees.
use core::marker::PhantomData;
use merlin::Transcript;
use readerwriter::*;
use std::fmt;

/// Merkle hash of a node.
#[derive(Clone, Copy, PartialEq, Eq, Hash, Default)]
pub struct Hash(pub [u8; 32]);

/// MerkleItem defines an item in the Merkle tree.
pub trait MerkleItem: Sized {
    /// Commits the hash of the item to Transcript.
    fn commit(&self, t: &mut Transcript);
}

/// Precomputed hash instance.
pub struct Hasher<M: MerkleItem> {
    t: Transcript,
    phantom: PhantomData<M>,
}

/// Merkle tree of hashes with a given size.
pub struct MerkleTree;

/// Efficient builder of the merkle root.
/// See `MerkleTree::build_root`
pub struct MerkleRootBuilder<M: MerkleItem> {
    hasher: Hasher<M>,
    roots: Vec<Option<Hash>>,
}

impl fmt::Debug for Hash {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "Hash({})", hex::encode(&self.0))
        // Without hex crate we'd do this, but it outputs comma-separated numbers: [aa, 11, 5a, ...]
        // write!(f, "{:x?}", &self.0)
    }
}

impl MerkleTree {
    /// Builds and returns the root hash of a Merkle tree constructed from
    /// the supplied list.
    pub fn root<M, I>(label: &'static [u8], list: I) -> Hash
    where
        M: MerkleItem,
        I: IntoIterator<Item = M>,
    {
        list.into_iter()
            .fold(Self::build_root(label), |mut builder, item| {
                builder.append(&item);
                builder
            })
            .root()
    }

    /// Prepares a root builder to compute the root iteratively.
    pub fn build_root<M: MerkleItem>(label: &'static [u8]) -> MerkleRootBuilder<M> {
        MerkleRootBuilder {
            hasher: Hasher::new(label),
            roots: Vec::new(),
        }
    }

    /// Returns a root of an empty tree.
    /// This is provided so the user does not have to fill in complex type annotations
    /// when the empty container is untyped.
    pub fn empty_root(label: &'static [u8]) -> Hash {
        Hasher::<()>::new(label).empty()
    }

    /// Connects roots of perfect binary trees, enumerated from low to high,
    /// into a merkle root of an imperfect tree.
    pub fn connect_perfect_roots<M: MerkleItem>(
        roots: impl IntoIterator<Item = Hash>,
        hasher: &Hasher<M>,
    ) -> Hash {
        roots
            .into_iter()
            .fold(None, |maybe_current, root| {
                maybe_current
                    .map(|curr| hasher.intermediate(&root, &curr))
                    .or(Some(root))
            })
            .unwrap_or_else(|| {
                // If no root was computed (the roots vector was empty),
                // return a hash for the "empty" set.
                hasher.empty()
            })
    }
}

impl<M: MerkleItem> MerkleRootBuilder<M> {
    /// Appends an item to the merkle tree.
    pub fn append(&mut self, item: &M) {
        self.append_leaf(self.hasher.leaf(item));
    }

    /// Appends an already-hashed leaf to the merkle tree.
    pub fn append_leaf(&mut self, leaf_hash: Hash) {
        let mut level = 0usize;
        let mut current_hash = leaf_hash;
        while self.roots.len() > level {
            if let Some(left_hash) = self.roots[level].take() {
                // Found an existing slot at the current level:
                // merge with the current hash. Slot is liberated via Option::take().
                current_hash = self.hasher.intermediate(&left_hash, &current_hash);
            } else {
                // Found an empty slot - fill it with the current hash and return
                self.roots[level] = Some(current_hash);
                return;
            }
            level += 1;
        }
        // Did not find an existing slot - push a new one.
        self.roots.push(Some(current_hash));
    }

    /// Compute the merkle root.
    pub fn root(&self) -> Hash {
        MerkleTree::connect_perfect_roots(self.roots.iter().filter_map(|r| *r), &self.hasher)
    }

    /// Roots of the perfect binary subtrees built so far, ordered from the
    /// lowest level to the highest. Level `i` holds a root over `2^i` items.
    pub fn perfect_roots(&self) -> &[Option<Hash>] {
        &self.roots
    }

    /// Resets the builder to the clean state,
    /// keeping allocated memory.
    /// Use this to recycle allocated memoy when you need to compute multiple roots.
    pub fn reset(&mut self) {
        self.roots.truncate(0);
    }
}

/// The only reason for this impl is to compute an empty hash and
/// keep that implementation in one place (Hasher), generic over the item type:
/// `Hasher::<()>::new(label).empty()`.
impl MerkleItem for () {
    fn commit(&self, t: &mut Transcript) {
        t.append_message(b"", b"");
    }
}

impl<T> MerkleItem for &T
where
    T: MerkleItem,
{
    fn commit(&self, t: &mut Transcript) {
        T::commit(*self, t)
    }
}

/// A hash is itself a committable item, so `Hasher<Hash>` can hash
/// pairs of precomputed digests.
impl MerkleItem for Hash {
    fn commit(&self, t: &mut Transcript) {
        t.append_message(b"hash", &self.0)
    }
}

impl AsRef<[u8]> for Hash {
    fn as_ref(&self) -> &[u8] {
        &self.0
    }
}

impl core::ops::Deref for Hash {
    type Target = [u8];
    fn deref(&self) -> &Self::Target {
        &self.0
    }
}

impl core::ops::DerefMut for Hash {
    fn deref_mut(&mut self) -> &mut Self::Target {
        &mut self.0
    }
}

impl<M: MerkleItem> Clone for Hasher<M> {
    fn clone(&self) -> Self {
        Self {
            t: self.t.clone(),
            phantom: self.phantom,
        }
    }
}

impl<M: MerkleItem> Hasher<M> {
    /// Creates a new hasher instance.
    pub fn new(label: &'static [u8]) -> Self {
        Self {
            t: Transcript::new(label),
            phantom: PhantomData,
        }
    }

    /// Computes hash of the leaf node in a merkle tree.
    pub fn leaf(&self, item: &M) -> Hash {
        let mut t = self.t.clone();
        item.commit(&mut t);
        let mut hash = Hash::default();
        t.challenge_bytes(b"merkle.leaf", &mut hash);
        hash
    }

    /// Computes hash of the inner node in a merkle tree (that contains left/right child nodes).
    pub fn intermediate(&self, left: &Hash, right: &Hash) -> Hash {
        let mut t = self.t.clone();
        t.append_message(b"L", &left);
        t.append_message(b"R", &right);
        let mut hash = Hash::default();
        t.challenge_bytes(b"merkle.node", &mut hash);
        hash
    }

    /// Computes a hash of an empty tree.
    pub fn empty(&self) -> Hash {
        let mut t = self.t.clone();
        let mut hash = Hash::default();
        t.challenge_bytes(b"merkle.empty", &mut hash);
        hash
    }
}

impl Encodable for Hash {
    fn encode(&self, w: &mut impl Writer) -> Result<(), WriteError> {
        w.write(b"hash", &self.0)
    }
}

impl ExactSizeEncodable for Hash {
    fn encoded_size(&self) -> usize {
        32
    }
}

impl Decodable for Hash {
    fn decode(reader: &mut impl Reader) -> Result<Self, ReadError> {
        reader.read_u8x32().map(Hash)
    }
}

impl serde::Serialize for Hash {
    fn serialize<S>(&self, serializer: S) -> Result<S::Ok, S::Error>
    where
        S: serde::Serializer,
    {
        serializer.serialize_bytes(&self.0)
    }
}

impl<'de> serde::Deserialize<'de> for Hash {
    fn deserialize<D>(deserializer: D) -> Result<Self, D::Error>
    where
        D: serde::Deserializer<'de>,
    {
        struct BytesVisitor;

        impl<'de> serde::de::Visitor<'de> for BytesVisitor {
            type Value = Hash;

            fn expecting(&self, formatter: &mut ::core::fmt::Formatter) -> ::core::fmt::Result {
                formatter.write_str("a valid 32-byte string")
            }

            fn visit_bytes<E>(self, v: &[u8]) -> Result<Hash, E>
            where
                E: serde::de::Error,
            {
                if v.len() == 32 {
                    let mut buf = [0u8; 32];
                    buf[0..32].copy_from_slice(v);
                    Ok(Hash(buf))
                } else {
                    Err(serde::de::Error::invalid_length(v.len(), &self))
                }
            }
        }

        deserializer.deserialize_bytes(BytesVisitor)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[derive(Clone)]
    struct TestItem(u64);

    impl MerkleItem for TestItem {
        fn commit(&self, t: &mut Transcript) {
            t.append_u64(b"item", self.0)
        }
    }

    fn test_items(num: usize) -> Vec<TestItem> {
        let mut items = Vec::with_capacity(num);
        for i in 0..num {
            items.push(TestItem(i as u64))
        }
        items
    }

    #[test]
    fn empty_root_is_stable() {
        assert_eq!(
            MerkleTree::root(b"test", test_items(0)),
            MerkleTree::empty_root(b"test")
        );
    }

    #[test]
    fn append_leaf_matches_append() {
        let hasher = Hasher::new(b"test");
        let mut a = MerkleTree::build_root(b"test");
        let mut b = MerkleTree::build_root::<TestItem>(b"test");
        for item in test_items(9) {
            a.append(&item);
            b.append_leaf(hasher.leaf(&item));
        }
        assert_eq!(a.root(), b.root());
    }

    #[test]
    fn perfect_roots_shape() {
        let hasher = Hasher::new(b"test");
        let items = test_items(3);
        let mut builder = MerkleTree::build_root(b"test");
        for item in items.iter() {
            builder.append(item);
        }
        // 3 items form a 2-leaf tree plus a lone leaf.
        let roots = builder.perfect_roots();
        assert_eq!(roots.len(), 2);
        assert_eq!(roots[0], Some(hasher.leaf(&items[2])));
        assert_eq!(
            roots[1],
            Some(hasher.intermediate(&hasher.leaf(&items[0]), &hasher.leaf(&items[1])))
        );
    }

    #[test]
    fn root_of_pair() {
        let hasher = Hasher::new(b"test");
        let items = test_items(2);
        assert_eq!(
            MerkleTree::root(b"test", items.iter()),
            hasher.intermediate(&hasher.leaf(&&items[0]), &hasher.leaf(&&items[1]))
        );
    }

    #[test]
    fn hash_codable_roundtrip() {
        let hash = Hash([42u8; 32]);
        let buf = hash.encode_to_vec();
        assert_eq!(buf.len(), hash.encoded_size());
        let mut slice = &buf[..];
        assert_eq!(Hash::decode(&mut slice).unwrap(), hash);
    }
}
