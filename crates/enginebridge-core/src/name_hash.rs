//! Deterministic hashes for engine names.
//!
//! [`NameHash`] keys every cache the bridge keeps: interned names, resolved
//! method binds, registered classes and declared virtuals. It is computed
//! from the names alone, so a key can be built before the engine is touched.
//!
//! # Examples
//!
//! ```
//! use enginebridge_core::NameHash;
//!
//! let a = NameHash::from_method("Node", "get_name", 2002593661);
//! let b = NameHash::from_method("Node", "get_name", 2002593661);
//! assert_eq!(a, b);
//! assert_ne!(a, NameHash::from_method("Node", "get_name", 1));
//! ```

use std::fmt;
use xxhash_rust::xxh64::xxh64;

/// Domain constants that keep hashes of different kinds of names apart.
pub mod hash_constants {
    /// Separator mixed between path components
    pub const SEP: u64 = 0x4bc94d6bd06053ad;

    /// Plain names (interned strings, singletons)
    pub const NAME: u64 = 0x2fac10b63a6cc57c;

    /// Class names
    pub const CLASS: u64 = 0x5ea77ffbcdf5f302;

    /// Method binds
    pub const METHOD: u64 = 0x7d3c8b4a92e15f6d;

    /// Virtual method slots on extension classes
    pub const VIRTUAL: u64 = 0x3e9f5d2a8c7b1403;
}

/// A deterministic 64-bit hash of one or more engine names.
#[derive(Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
#[repr(transparent)]
pub struct NameHash(pub u64);

impl NameHash {
    pub const EMPTY: NameHash = NameHash(0);

    pub fn from_name(name: &str) -> Self {
        NameHash(xxh64(name.as_bytes(), hash_constants::NAME))
    }

    pub fn from_class(class: &str) -> Self {
        NameHash(xxh64(class.as_bytes(), hash_constants::CLASS))
    }

    /// Key of a method bind. The engine-side hash takes part so that two
    /// signatures of the same method never share a cache entry.
    pub fn from_method(class: &str, method: &str, hash: i64) -> Self {
        let owner = Self::from_class(class).0;
        let name = xxh64(method.as_bytes(), hash_constants::METHOD);
        NameHash(
            owner
                .wrapping_mul(hash_constants::SEP)
                .wrapping_add(name)
                ^ (hash as u64).rotate_left(17),
        )
    }

    pub fn from_virtual(class: &str, method: &str) -> Self {
        let owner = Self::from_class(class).0;
        let name = xxh64(method.as_bytes(), hash_constants::VIRTUAL);
        NameHash(owner.wrapping_mul(hash_constants::SEP).wrapping_add(name))
    }

    pub const fn is_empty(self) -> bool {
        self.0 == 0
    }

    pub const fn as_u64(self) -> u64 {
        self.0
    }
}

impl fmt::Debug for NameHash {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "NameHash({:#018x})", self.0)
    }
}

impl fmt::Display for NameHash {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{:#018x}", self.0)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn name_hash_determinism() {
        assert_eq!(NameHash::from_name("Engine"), NameHash::from_name("Engine"));
        assert_ne!(NameHash::from_name("Engine"), NameHash::from_name("Input"));
    }

    #[test]
    fn class_and_name_domains_differ() {
        assert_ne!(NameHash::from_name("Node"), NameHash::from_class("Node"));
    }

    #[test]
    fn method_hash_includes_owner() {
        let a = NameHash::from_method("Node", "queue_free", 3218959716);
        let b = NameHash::from_method("Node2D", "queue_free", 3218959716);
        assert_ne!(a, b);
    }

    #[test]
    fn method_hash_includes_engine_hash() {
        let a = NameHash::from_method("Node", "add_child", 3863233950);
        let b = NameHash::from_method("Node", "add_child", 3070154285);
        assert_ne!(a, b);
    }

    #[test]
    fn virtual_and_method_domains_differ() {
        assert_ne!(
            NameHash::from_virtual("Node", "_ready"),
            NameHash::from_method("Node", "_ready", 0)
        );
    }

    #[test]
    fn empty_hash() {
        assert!(NameHash::EMPTY.is_empty());
        assert!(!NameHash::from_name("x").is_empty());
    }

    #[test]
    fn hash_display() {
        let h = NameHash(0x1234);
        assert_eq!(h.to_string(), "0x0000000000001234");
        assert_eq!(format!("{:?}", h), "NameHash(0x0000000000001234)");
        assert_eq!(h.as_u64(), 0x1234);
    }
}
