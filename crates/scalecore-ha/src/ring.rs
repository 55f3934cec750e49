//! Consistent-hash ring over replica member IDs (§4.3).
//!
//! Built from the sorted list of live `agent-id`s; an ID's owner is the
//! member whose ring point is the successor of the ID's own hash. No
//! virtual nodes: one point per member, keyed on `member-id` directly,
//! so distribution quality depends on the entropy of the agent IDs
//! (random UUIDs in practice) rather than on tunable replication of
//! points.

fn hash64(data: &str) -> u64 {
    let hash = blake3::hash(data.as_bytes());
    let bytes = hash.as_bytes();
    u64::from_be_bytes(bytes[..8].try_into().expect("blake3 digest is >= 8 bytes"))
}

/// A point on the ring: `(hash, member_id)`, sorted by hash then member
/// ID to break ties deterministically.
#[derive(Debug, Clone, PartialEq, Eq)]
struct RingPoint {
    hash: u64,
    member_id: String,
}

/// The ring itself: an ordered set of member ring points.
#[derive(Debug, Clone, Default)]
pub struct HashRing {
    points: Vec<RingPoint>,
}

impl HashRing {
    /// Builds a ring from the given member IDs (deduplicated).
    #[must_use]
    pub fn from_members<I, S>(members: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        let mut seen = std::collections::HashSet::new();
        let mut points: Vec<RingPoint> = members
            .into_iter()
            .map(Into::into)
            .filter(|m| seen.insert(m.clone()))
            .map(|member_id| RingPoint {
                hash: hash64(&member_id),
                member_id,
            })
            .collect();
        points.sort_by(|a, b| a.hash.cmp(&b.hash).then_with(|| a.member_id.cmp(&b.member_id)));
        Self { points }
    }

    /// Whether the ring has no members.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.points.is_empty()
    }

    /// The number of members on the ring.
    #[must_use]
    pub fn len(&self) -> usize {
        self.points.len()
    }

    /// The member owning `key`: the ring point whose hash is the
    /// successor of `key`'s hash, wrapping around to the first point.
    #[must_use]
    pub fn owner(&self, key: &str) -> Option<&str> {
        if self.points.is_empty() {
            return None;
        }
        let key_hash = hash64(key);
        let idx = self
            .points
            .partition_point(|p| p.hash < key_hash)
            % self.points.len();
        Some(&self.points[idx].member_id)
    }

    /// Whether `member_id` owns `key` on this ring.
    #[must_use]
    pub fn owned_by(&self, key: &str, member_id: &str) -> bool {
        self.owner(key) == Some(member_id)
    }
}
