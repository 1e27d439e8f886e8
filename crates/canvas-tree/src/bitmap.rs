//! Document-id sets.
//!
//! Document ids are opaque `u64`s, so sets are 64-bit roaring treemaps.

use roaring::RoaringTreemap;

pub type DocumentId = u64;

/// A compressed set of document ids.
pub type DocumentSet = RoaringTreemap;

/// Build a set from any id iterator.
pub fn document_set<I: IntoIterator<Item = DocumentId>>(ids: I) -> DocumentSet {
    let mut set = DocumentSet::new();
    for id in ids {
        set.insert(id);
    }
    set
}

/// Union of a sequence of sets; empty input yields the empty set.
pub fn union_all<'a, I: IntoIterator<Item = &'a DocumentSet>>(sets: I) -> DocumentSet {
    let mut out = DocumentSet::new();
    for set in sets {
        out |= set;
    }
    out
}

/// Serde adapter storing a treemap in its portable roaring byte format.
pub(crate) mod serde_bytes {
    use super::DocumentSet;
    use serde::de::Error as _;
    use serde::ser::Error as _;
    use serde::{Deserialize, Deserializer, Serializer};

    pub fn serialize<S: Serializer>(set: &DocumentSet, serializer: S) -> Result<S::Ok, S::Error> {
        let mut buf = Vec::with_capacity(set.serialized_size());
        set.serialize_into(&mut buf).map_err(S::Error::custom)?;
        serializer.serialize_bytes(&buf)
    }

    pub fn deserialize<'de, D: Deserializer<'de>>(deserializer: D) -> Result<DocumentSet, D::Error> {
        let buf: Vec<u8> = Vec::deserialize(deserializer)?;
        DocumentSet::deserialize_from(&buf[..]).map_err(D::Error::custom)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_union_all() {
        let a = document_set([1, 2, 3]);
        let b = document_set([3, 4, u64::MAX]);
        let out = union_all([&a, &b]);
        assert_eq!(out.len(), 5);
        assert!(out.contains(u64::MAX));
        assert!(union_all(std::iter::empty()).is_empty());
    }
}
