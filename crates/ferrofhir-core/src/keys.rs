//! Primary keys and multi-type scan ranges.
//!
//! A search over several resource types pages through rows in
//! (resource-type-id, surrogate-id) order. `PrimaryKeyRange` captures the
//! resume point of such a scan as one value: the last row seen plus the
//! set of type ids still to be scanned after it.

use serde::{Deserialize, Serialize};

use crate::resource_type::ResourceTypeId;
use crate::surrogate_id::SurrogateId;

/// A resource row's physical identity: type id plus surrogate id.
#[derive(
    Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize, Default,
)]
#[serde(rename_all = "camelCase")]
pub struct PrimaryKey {
    pub resource_type_id: ResourceTypeId,
    pub resource_surrogate_id: SurrogateId,
}

impl PrimaryKey {
    pub fn new(resource_type_id: ResourceTypeId, resource_surrogate_id: SurrogateId) -> Self {
        Self {
            resource_type_id,
            resource_surrogate_id,
        }
    }
}

/// A compact bitset over resource-type ids.
///
/// Iteration yields ids in ascending order. Negative ids are outside the
/// id space and are ignored on insert.
#[derive(Debug, Clone, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(into = "Vec<i16>", from = "Vec<i16>")]
pub struct TypeIdBitset {
    blocks: Vec<u64>,
}

impl TypeIdBitset {
    pub fn new() -> Self {
        Self::default()
    }

    /// Build a bitset from an iterator of type ids.
    pub fn from_ids<I: IntoIterator<Item = ResourceTypeId>>(ids: I) -> Self {
        let mut set = Self::new();
        for id in ids {
            set.insert(id);
        }
        set
    }

    pub fn insert(&mut self, id: ResourceTypeId) {
        if id.0 < 0 {
            return;
        }
        let bit = id.0 as usize;
        let block = bit / 64;
        if block >= self.blocks.len() {
            self.blocks.resize(block + 1, 0);
        }
        self.blocks[block] |= 1 << (bit % 64);
    }

    pub fn contains(&self, id: ResourceTypeId) -> bool {
        if id.0 < 0 {
            return false;
        }
        let bit = id.0 as usize;
        self.blocks
            .get(bit / 64)
            .is_some_and(|b| b & (1 << (bit % 64)) != 0)
    }

    pub fn is_empty(&self) -> bool {
        self.blocks.iter().all(|b| *b == 0)
    }

    /// Number of ids present.
    pub fn len(&self) -> usize {
        self.blocks.iter().map(|b| b.count_ones() as usize).sum()
    }

    /// Ids present, ascending.
    pub fn iter(&self) -> impl Iterator<Item = ResourceTypeId> + '_ {
        self.blocks.iter().enumerate().flat_map(|(block, bits)| {
            (0usize..64)
                .filter(move |i| bits & (1u64 << i) != 0)
                .map(move |i| ResourceTypeId((block * 64 + i) as i16))
        })
    }
}

impl From<TypeIdBitset> for Vec<i16> {
    fn from(set: TypeIdBitset) -> Self {
        set.iter().map(|id| id.0).collect()
    }
}

impl From<Vec<i16>> for TypeIdBitset {
    fn from(ids: Vec<i16>) -> Self {
        Self::from_ids(ids.into_iter().map(ResourceTypeId))
    }
}

/// "Everything after this row, across the remaining types" as one value.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct PrimaryKeyRange {
    /// The last row already returned.
    pub current: PrimaryKey,
    /// Type ids still to be scanned after `current`'s type.
    pub next_type_ids: TypeIdBitset,
}

impl PrimaryKeyRange {
    pub fn new(current: PrimaryKey, next_type_ids: TypeIdBitset) -> Self {
        Self {
            current,
            next_type_ids,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_primary_key_ordering() {
        let a = PrimaryKey::new(ResourceTypeId(1), SurrogateId::new(50).unwrap());
        let b = PrimaryKey::new(ResourceTypeId(1), SurrogateId::new(51).unwrap());
        let c = PrimaryKey::new(ResourceTypeId(2), SurrogateId::new(1).unwrap());
        assert!(a < b);
        assert!(b < c);
    }

    #[test]
    fn test_bitset_insert_contains() {
        let mut set = TypeIdBitset::new();
        assert!(set.is_empty());

        set.insert(ResourceTypeId(3));
        set.insert(ResourceTypeId(70));
        assert!(set.contains(ResourceTypeId(3)));
        assert!(set.contains(ResourceTypeId(70)));
        assert!(!set.contains(ResourceTypeId(4)));
        assert_eq!(set.len(), 2);
    }

    #[test]
    fn test_bitset_iterates_ascending() {
        let set = TypeIdBitset::from_ids([ResourceTypeId(9), ResourceTypeId(2), ResourceTypeId(65)]);
        let ids: Vec<i16> = set.iter().map(|id| id.0).collect();
        assert_eq!(ids, vec![2, 9, 65]);
    }

    #[test]
    fn test_bitset_ignores_negative_ids() {
        let mut set = TypeIdBitset::new();
        set.insert(ResourceTypeId(-5));
        assert!(set.is_empty());
        assert!(!set.contains(ResourceTypeId(-5)));
    }

    #[test]
    fn test_bitset_vec_round_trip() {
        let set = TypeIdBitset::from_ids([ResourceTypeId(1), ResourceTypeId(8)]);
        let ids: Vec<i16> = set.clone().into();
        assert_eq!(ids, vec![1, 8]);
        assert_eq!(TypeIdBitset::from(ids), set);
    }
}
