use std::sync::LazyLock;

use serde::{Deserialize, Serialize};
use sha1::{Digest, Sha1};
use uuid::Uuid;

/// Slots allocated by a fresh bag. The frontier doubles from here.
pub const INITIAL_CAPACITY: usize = 64;

/// Expected number of children per node.
const BRANCHING_FACTOR: f64 = 4.0;

/// `ln(b / (1 + b))`, the denominator of the child-count draw.
static DEN: LazyLock<f64> = LazyLock::new(|| (BRANCHING_FACTOR / (1.0 + BRANCHING_FACTOR)).ln());

/// One node of the frontier: a hash state plus the `[lower, upper)` range of
/// children still to be explored at `depth`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct FrontierEntry {
    #[serde(with = "hash_bytes")]
    pub hash: [u8; 20],
    pub depth: u32,
    pub lower: u32,
    pub upper: u32,
}

impl FrontierEntry {
    /// Unexplored children left in this entry.
    pub fn pending(&self) -> u32 {
        self.upper - self.lower
    }
}

/// The unexplored frontier of a probabilistic tree plus the number of nodes
/// already visited.
///
/// A bag stores only frontier entries, never the parent chain: every child is
/// derived from its parent's hash and its own index, so the tree a bag
/// represents is the same no matter how the bag was split or merged along the way.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(try_from = "RawBag")]
pub struct Bag {
    entries: Vec<FrontierEntry>,
    count: u64,
    id: Uuid,
    parent: Option<Uuid>,
}

impl Default for Bag {
    fn default() -> Self {
        Self::new()
    }
}

impl Bag {
    pub fn new() -> Self {
        Self::with_capacity(INITIAL_CAPACITY)
    }

    pub fn with_capacity(capacity: usize) -> Self {
        Self {
            entries: Vec::with_capacity(capacity),
            count: 0,
            id: Uuid::new_v4(),
            parent: None,
        }
    }

    /// A bag holding the root of the tree for `seed`, explored to `depth`.
    pub fn seeded(seed: u32, depth: u32) -> Self {
        let mut bag = Self::new();
        bag.seed(seed, depth);
        bag
    }

    /// Reset the frontier to the root node for `seed`. The count is kept.
    pub fn seed(&mut self, seed: u32, depth: u32) {
        self.entries.clear();
        let mut hasher = Sha1::new();
        hasher.update([0u8; 16]);
        hasher.update(seed.to_be_bytes());
        self.digest(hasher.finalize().into(), depth);
    }

    /// Visit one node: count it and push its children, or count them as
    /// leaves when they sit on the last level.
    fn digest(&mut self, hash: [u8; 20], depth: u32) {
        self.count += 1;
        let children = child_count(&hash);
        if children == 0 {
            return;
        }
        if depth > 1 {
            self.push(FrontierEntry {
                hash,
                depth: depth - 1,
                lower: 0,
                upper: children,
            });
        } else {
            self.count += u64::from(children);
        }
    }

    fn push(&mut self, entry: FrontierEntry) {
        self.grow_to(self.entries.len() + 1);
        self.entries.push(entry);
    }

    /// Double the frontier until it holds `needed` entries.
    fn grow_to(&mut self, needed: usize) {
        let capacity = self.entries.capacity();
        if needed <= capacity {
            return;
        }
        let mut target = capacity.max(1);
        while target < needed {
            target *= 2;
        }
        self.entries.reserve_exact(target - self.entries.len());
    }

    /// Explore the highest-index unexplored child of the newest entry.
    /// Does nothing on an empty bag.
    pub fn expand(&mut self) {
        let Some(top) = self.entries.last_mut() else {
            return;
        };
        let index = top.upper - 1;
        let (parent, depth) = (top.hash, top.depth);
        if index == top.lower {
            self.entries.pop();
        } else {
            top.upper = index;
        }

        let mut hasher = Sha1::new();
        hasher.update(parent);
        hasher.update(index.to_be_bytes());
        self.digest(hasher.finalize().into(), depth);
    }

    /// Expand up to `budget` times, stopping early once the bag is empty.
    /// Returns the number of expansions performed.
    pub fn expand_n(&mut self, budget: u64) -> u64 {
        let mut done = 0;
        while done < budget && !self.entries.is_empty() {
            self.expand();
            done += 1;
        }
        done
    }

    /// Expand until the frontier is exhausted.
    pub fn run(&mut self) {
        while !self.entries.is_empty() {
            self.expand();
        }
    }

    /// Move the upper half of every entry with at least two pending children
    /// into a new bag. Returns `None` when no entry could be divided.
    /// The new bag is sized to the entries it receives.
    pub fn split(&mut self) -> Option<Bag> {
        let divisible = self.entries.iter().filter(|e| e.pending() >= 2).count();
        if divisible == 0 {
            return None;
        }
        let mut half = Bag::with_capacity(divisible);
        for entry in &mut self.entries {
            let pending = entry.pending();
            if pending < 2 {
                continue;
            }
            let moved = pending / 2;
            half.entries.push(FrontierEntry {
                lower: entry.upper - moved,
                ..*entry
            });
            entry.upper -= moved;
        }
        half.parent = Some(self.id);
        Some(half)
    }

    /// Absorb `other`: its entries and its count.
    pub fn merge(&mut self, other: Bag) {
        self.grow_to(self.entries.len() + other.entries.len());
        self.entries.extend(other.entries);
        self.count += other.count;
    }

    /// Right-sized copy holding only the live entries.
    pub fn trim(&self) -> Bag {
        let mut entries = Vec::with_capacity(self.entries.len());
        entries.extend_from_slice(&self.entries);
        Bag {
            entries,
            count: self.count,
            id: self.id,
            parent: self.parent,
        }
    }

    /// Number of frontier entries.
    pub fn size(&self) -> usize {
        self.entries.len()
    }

    pub fn count(&self) -> u64 {
        self.count
    }

    /// Hand the visited-node count to the caller, leaving zero behind.
    pub fn take_count(&mut self) -> u64 {
        std::mem::take(&mut self.count)
    }

    /// Unexplored children across all entries.
    pub fn pending(&self) -> u64 {
        self.entries.iter().map(|e| u64::from(e.pending())).sum()
    }

    pub fn capacity(&self) -> usize {
        self.entries.capacity()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    pub fn id(&self) -> Uuid {
        self.id
    }

    /// The bag this one was split from.
    pub fn parent(&self) -> Option<Uuid> {
        self.parent
    }

    pub fn entries(&self) -> &[FrontierEntry] {
        &self.entries
    }
}

/// Geometric draw from the 31 low bits of digest bytes 16..20.
fn child_count(hash: &[u8; 20]) -> u32 {
    let v = u32::from_be_bytes([hash[16] & 0x7f, hash[17], hash[18], hash[19]]);
    let u = f64::from(v) / 2_147_483_648.0;
    ((1.0 - u).ln() / *DEN) as u32
}

/// Node count of the whole tree, explored on the calling thread.
pub fn sequential_count(seed: u32, depth: u32) -> u64 {
    let mut bag = Bag::seeded(seed, depth);
    bag.run();
    bag.count()
}

#[derive(Deserialize)]
struct RawBag {
    entries: Vec<FrontierEntry>,
    count: u64,
    id: Uuid,
    parent: Option<Uuid>,
}

impl TryFrom<RawBag> for Bag {
    type Error = String;

    fn try_from(raw: RawBag) -> Result<Self, Self::Error> {
        if let Some(bad) = raw.entries.iter().find(|e| e.lower >= e.upper || e.depth == 0) {
            return Err(format!(
                "invalid frontier entry: depth {} range [{}, {})",
                bad.depth, bad.lower, bad.upper
            ));
        }
        let mut entries = Vec::with_capacity(raw.entries.len().max(INITIAL_CAPACITY));
        entries.extend(raw.entries);
        Ok(Bag {
            entries,
            count: raw.count,
            id: raw.id,
            parent: raw.parent,
        })
    }
}

/// SHA-1 digests as raw bytes in MessagePack.
mod hash_bytes {
    use std::fmt;

    use serde::de::{self, SeqAccess, Visitor};
    use serde::{Deserializer, Serializer};

    pub fn serialize<S: Serializer>(hash: &[u8; 20], s: S) -> Result<S::Ok, S::Error> {
        s.serialize_bytes(hash)
    }

    pub fn deserialize<'de, D: Deserializer<'de>>(d: D) -> Result<[u8; 20], D::Error> {
        d.deserialize_bytes(HashVisitor)
    }

    struct HashVisitor;

    impl<'de> Visitor<'de> for HashVisitor {
        type Value = [u8; 20];

        fn expecting(&self, f: &mut fmt::Formatter) -> fmt::Result {
            f.write_str("20 bytes")
        }

        fn visit_bytes<E: de::Error>(self, v: &[u8]) -> Result<Self::Value, E> {
            v.try_into().map_err(|_| E::invalid_length(v.len(), &self))
        }

        fn visit_seq<A: SeqAccess<'de>>(self, mut seq: A) -> Result<Self::Value, A::Error> {
            let mut hash = [0u8; 20];
            for (i, byte) in hash.iter_mut().enumerate() {
                *byte = seq
                    .next_element()?
                    .ok_or_else(|| de::Error::invalid_length(i, &self))?;
            }
            if seq.next_element::<u8>()?.is_some() {
                return Err(de::Error::invalid_length(21, &self));
            }
            Ok(hash)
        }
    }
}
