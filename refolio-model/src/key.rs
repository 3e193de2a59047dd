//! Library and node identifiers.
//!
//! Every synchronized node is addressed by a [`GlobalKey`] of the form
//! `<library>:<native>`, where `<native>` is the key the remote service
//! assigned to the record. Prefixing with the library identifier keeps keys
//! unique when several libraries are mirrored side by side. A key is stable
//! for the life of the logical entity; renames and moves never change it.

use std::fmt;

use serde::{Deserialize, Serialize};

/// Identifier of a synchronized library (a user library or a shared group).
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(transparent)]
pub struct LibraryId(String);

impl LibraryId {
    pub fn new(id: impl Into<String>) -> Self {
        Self(id.into())
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for LibraryId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

impl From<&str> for LibraryId {
    fn from(id: &str) -> Self {
        Self(id.to_string())
    }
}

/// Globally unique, stable node key: `<library>:<native>`.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(transparent)]
pub struct GlobalKey(String);

impl GlobalKey {
    /// Builds a key from a library and the remote's native record key.
    pub fn new(library: &LibraryId, native: &str) -> Self {
        Self(format!("{}:{}", library.as_str(), native))
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }

    /// The library prefix of the key.
    ///
    /// The split is on the last `:`: native keys are short service-assigned
    /// identifiers that never contain one, while a library identifier may
    /// (`user:42`).
    pub fn library(&self) -> &str {
        match self.0.rfind(':') {
            Some(idx) => &self.0[..idx],
            None => &self.0,
        }
    }

    /// The remote-native part of the key.
    pub fn native(&self) -> &str {
        match self.0.rfind(':') {
            Some(idx) => &self.0[idx + 1..],
            None => &self.0,
        }
    }

    /// Whether this key belongs to the given library.
    pub fn in_library(&self, library: &LibraryId) -> bool {
        self.library() == library.as_str()
    }
}

impl fmt::Display for GlobalKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_global_key_format() {
        let lib = LibraryId::new("user-42");
        let key = GlobalKey::new(&lib, "ABCD1234");

        assert_eq!(key.as_str(), "user-42:ABCD1234");
        assert_eq!(key.library(), "user-42");
        assert_eq!(key.native(), "ABCD1234");
        assert!(key.in_library(&lib));
        assert!(!key.in_library(&LibraryId::new("group-7")));
    }

    #[test]
    fn test_compound_library_id_with_colon() {
        let lib = LibraryId::new("user:42");
        let key = GlobalKey::new(&lib, "ABCD1234");

        assert_eq!(key.as_str(), "user:42:ABCD1234");
        assert_eq!(key.library(), "user:42");
        assert_eq!(key.native(), "ABCD1234");
        assert!(key.in_library(&lib));
        assert!(!key.in_library(&LibraryId::new("user")));
    }

    #[test]
    fn test_key_stability_under_clone() {
        let lib = LibraryId::new("lib");
        let a = GlobalKey::new(&lib, "K1");
        let b = a.clone();
        assert_eq!(a, b);

        let mut set = std::collections::HashSet::new();
        set.insert(a);
        assert!(set.contains(&b));
    }

    #[test]
    fn test_serde_transparent_roundtrip() {
        let key = GlobalKey::new(&LibraryId::new("lib"), "K1");
        let json = serde_json::to_string(&key).unwrap();
        assert_eq!(json, "\"lib:K1\"");

        let back: GlobalKey = serde_json::from_str(&json).unwrap();
        assert_eq!(back, key);
    }
}
