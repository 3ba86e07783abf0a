// scmo_core/src/ordered_set.rs
//
// Hash-indexed ordered set stored inside a chunk. A fixed bucket table maps
// a name tag to the first node of a chain; nodes live in one array whose
// order is the externally visible index.

use crate::error::{Result, ScmoError};
use crate::memory::layout::*;
use crate::memory::Chunk;

/// Cheap lossy hash of a name: upper-cased first and last character. Each
/// character is lower-cased first, the same folding [`names_equal`] uses,
/// so names that compare equal always share a tag.
pub fn name_tag(name: &str) -> u32 {
    let first = name.chars().next().and_then(|c| c.to_lowercase().next());
    let last = name.chars().next_back().and_then(|c| c.to_lowercase().last());
    match (first, last) {
        (Some(first), Some(last)) => (fold(first) << 1) | fold(last),
        _ => 0,
    }
}

fn fold(c: char) -> u32 {
    c.to_uppercase().next().unwrap_or(c) as u32
}

/// Case-insensitive name comparison.
pub fn names_equal(a: &str, b: &str) -> bool {
    if a.is_ascii() && b.is_ascii() {
        return a.eq_ignore_ascii_case(b);
    }
    a.chars()
        .flat_map(char::to_lowercase)
        .eq(b.chars().flat_map(char::to_lowercase))
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub(crate) struct SetLayout {
    pub hash_size: usize,
    pub node_size: usize,
}

pub(crate) const PROPERTY_SET: SetLayout = SetLayout {
    hash_size: PROPERTY_HASH_SIZE,
    node_size: PROP_NODE_SIZE,
};

pub(crate) const KEY_BINDING_SET: SetLayout = SetLayout {
    hash_size: KEY_BINDING_HASH_SIZE,
    node_size: KEY_NODE_SIZE,
};

/// A set header at a fixed offset of a chunk.
#[derive(Debug, Clone, Copy)]
pub(crate) struct HashedSet {
    header: usize,
    layout: SetLayout,
}

impl HashedSet {
    pub fn at(header: usize, layout: SetLayout) -> Self {
        Self { header, layout }
    }

    pub fn len(&self, chunk: &Chunk) -> usize {
        chunk.read_u32(self.header + SET_NUMBER) as usize
    }

    fn capacity(&self, chunk: &Chunk) -> usize {
        chunk.read_ptr(self.header + set_node_array(self.layout.hash_size)).size as usize
            / self.layout.node_size
    }

    pub fn node(&self, chunk: &Chunk, index: usize) -> usize {
        let array = chunk.read_ptr(self.header + set_node_array(self.layout.hash_size));
        array.start as usize + index * self.layout.node_size
    }

    pub fn name_at<'c>(&self, chunk: &'c Chunk, index: usize) -> &'c str {
        chunk.str_field(self.node(chunk, index) + NODE_NAME).unwrap_or("")
    }

    fn bucket_slot(&self, bucket: usize) -> usize {
        self.header + SET_HASH_TABLE + bucket * 4
    }

    fn bucket_of(&self, tag: u32) -> usize {
        tag as usize & (self.layout.hash_size - 1)
    }

    /// Node index + 1 stored in each bucket, 0 for empty buckets.
    pub fn buckets(&self, chunk: &Chunk) -> Vec<u32> {
        (0..self.layout.hash_size)
            .map(|b| chunk.read_u32(self.bucket_slot(b)))
            .collect()
    }

    /// Reserves the node array. Must run before the first insert.
    pub fn reserve(&self, chunk: &mut Chunk, count: usize) -> Result<()> {
        let array = chunk.alloc(count * self.layout.node_size)?;
        chunk.write_ptr(self.header + set_node_array(self.layout.hash_size), array);
        chunk.write_u32(self.header + SET_NUMBER, 0);
        Ok(())
    }

    pub fn find(&self, chunk: &Chunk, name: &str) -> Option<usize> {
        let tag = name_tag(name);
        let head = chunk.read_u32(self.bucket_slot(self.bucket_of(tag)));
        if head == 0 {
            return None;
        }
        let len = self.len(chunk);
        let mut index = head as usize - 1;
        for _ in 0..len {
            if index >= len {
                return None;
            }
            let node = self.node(chunk, index);
            if chunk.read_u32(node + NODE_TAG) == tag && names_equal(self.name_at(chunk, index), name) {
                return Some(index);
            }
            if chunk.read_u32(node + NODE_HAS_NEXT) == 0 {
                return None;
            }
            index = chunk.read_u32(node + NODE_NEXT) as usize;
        }
        debug_assert!(false, "hash chain longer than the set");
        None
    }

    /// Appends a node named `name` and links it at the tail of its chain.
    /// Returns the new node's index. Duplicates are rejected before anything
    /// is written.
    pub fn insert(&self, chunk: &mut Chunk, name: &str) -> Result<usize> {
        if self.find(chunk, name).is_some() {
            return Err(ScmoError::AlreadyExists {
                name: name.to_string(),
            });
        }
        let index = self.len(chunk);
        if index >= self.capacity(chunk) {
            return Err(ScmoError::invalid_parameter(
                name,
                format!("set is full at {} entries", index),
            ));
        }

        let tag = name_tag(name);
        let name_ptr = chunk.append_str(name)?;
        let node = self.node(chunk, index);
        chunk.write_ptr(node + NODE_NAME, name_ptr);
        chunk.write_u32(node + NODE_TAG, tag);
        chunk.write_u32(node + NODE_HAS_NEXT, 0);

        let slot = self.bucket_slot(self.bucket_of(tag));
        let head = chunk.read_u32(slot);
        if head == 0 {
            chunk.write_u32(slot, index as u32 + 1);
        } else {
            let mut tail = self.node(chunk, head as usize - 1);
            while chunk.read_u32(tail + NODE_HAS_NEXT) != 0 {
                tail = self.node(chunk, chunk.read_u32(tail + NODE_NEXT) as usize);
            }
            chunk.write_u32(tail + NODE_HAS_NEXT, 1);
            chunk.write_u32(tail + NODE_NEXT, index as u32);
        }
        chunk.write_u32(self.header + SET_NUMBER, index as u32 + 1);
        Ok(index)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn set_with(names: &[&str]) -> (Chunk, HashedSet) {
        let mut chunk = Chunk::new(CLASS_MAGIC, CLASS_MAIN_SIZE, 1024, 8);
        let set = HashedSet::at(CLS_PROPERTY_SET, PROPERTY_SET);
        set.reserve(&mut chunk, names.len() + 4).unwrap();
        for n in names {
            set.insert(&mut chunk, n).unwrap();
        }
        (chunk, set)
    }

    #[test]
    fn tags() {
        assert_eq!(name_tag(""), 0);
        assert_eq!(name_tag("a"), ('A' as u32) << 1 | 'A' as u32);
        assert_eq!(name_tag("Name"), name_tag("NAME"));
        assert_eq!(name_tag("Axb"), name_tag("Ayb"));
    }

    #[test]
    fn lookups_are_case_insensitive() {
        let (chunk, set) = set_with(&["Name", "Caption", "InstanceID"]);
        assert_eq!(set.find(&chunk, "name"), Some(0));
        assert_eq!(set.find(&chunk, "CAPTION"), Some(1));
        assert_eq!(set.find(&chunk, "instanceid"), Some(2));
        assert_eq!(set.find(&chunk, "missing"), None);
        assert!(names_equal("Ünïcode", "üNÏCODE"));
    }

    #[test]
    fn case_duplicates_are_rejected_untouched() {
        let (mut chunk, set) = set_with(&["Name"]);
        let before = chunk.used_bytes().to_vec();
        let err = set.insert(&mut chunk, "NAME").unwrap_err();
        assert!(matches!(err, ScmoError::AlreadyExists { .. }));
        assert_eq!(set.len(&chunk), 1);
        assert_eq!(chunk.used_bytes(), &before[..]);
    }

    #[test]
    fn tag_collisions_are_both_findable() {
        let (chunk, set) = set_with(&["Axb", "Ayb", "AzB"]);
        assert_eq!(set.find(&chunk, "axb"), Some(0));
        assert_eq!(set.find(&chunk, "AYB"), Some(1));
        assert_eq!(set.find(&chunk, "azb"), Some(2));
        let occupied = set.buckets(&chunk).iter().filter(|b| **b != 0).count();
        assert_eq!(occupied, 1);
    }

    #[test]
    fn bucket_collisions_with_different_tags() {
        let (a, b) = ("H0", "pp");
        assert_ne!(name_tag(a), name_tag(b));
        assert_eq!(
            name_tag(a) as usize % PROPERTY_HASH_SIZE,
            name_tag(b) as usize % PROPERTY_HASH_SIZE
        );
        let (chunk, set) = set_with(&[a, "filler", b]);
        assert_eq!(set.find(&chunk, "h0"), Some(0));
        assert_eq!(set.find(&chunk, "PP"), Some(2));
        // same bucket, tag of neither node
        assert_eq!(set.find(&chunk, "00"), None);
        let occupied = set.buckets(&chunk).iter().filter(|b| **b != 0).count();
        assert_eq!(occupied, 2);
    }

    #[test]
    fn unicode_case_pairs_are_one_name() {
        let kelvin = "\u{212A}";
        assert!(names_equal(kelvin, "k"));
        assert_eq!(name_tag(kelvin), name_tag("K"));

        let (mut chunk, set) = set_with(&[kelvin]);
        assert_eq!(set.find(&chunk, "k"), Some(0));
        assert!(matches!(
            set.insert(&mut chunk, "K"),
            Err(ScmoError::AlreadyExists { .. })
        ));

        let (chunk, set) = set_with(&["Straße", "ÉTÉ"]);
        assert_eq!(set.find(&chunk, "STRAßE"), Some(0));
        assert_eq!(set.find(&chunk, "été"), Some(1));
    }

    #[test]
    fn empty_name_is_a_legal_key() {
        let (chunk, set) = set_with(&["", "x"]);
        assert_eq!(set.find(&chunk, ""), Some(0));
        assert_eq!(set.name_at(&chunk, 0), "");
    }

    #[test]
    fn index_order_is_insertion_order() {
        let names = ["z", "a", "M", "b", "Zz"];
        let (chunk, set) = set_with(&names);
        for _ in 0..3 {
            for n in names.iter().rev() {
                set.find(&chunk, n);
            }
            for (i, n) in names.iter().enumerate() {
                assert_eq!(set.name_at(&chunk, i), *n);
            }
        }
    }

    #[test]
    fn full_set_is_an_error() {
        let mut chunk = Chunk::new(CLASS_MAGIC, CLASS_MAIN_SIZE, 1024, 8);
        let set = HashedSet::at(CLS_KEY_SET, KEY_BINDING_SET);
        set.reserve(&mut chunk, 1).unwrap();
        set.insert(&mut chunk, "a").unwrap();
        assert!(matches!(
            set.insert(&mut chunk, "b"),
            Err(ScmoError::InvalidParameter { .. })
        ));
    }
}
