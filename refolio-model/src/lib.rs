//! Data model for refolio library mirrors.
//!
//! This crate defines the vocabulary the sync engine speaks: stable
//! [`GlobalKey`]s, typed [`Node`]s with open-but-typed [`Payload`]s, and the
//! [`Tree`] snapshot built from a flat node list. It is deliberately free of
//! IO; everything here is plain data the engine can diff and merge.

pub mod key;
pub mod node;
pub mod payload;
pub mod tree;

pub use key::{GlobalKey, LibraryId};
pub use node::{Node, NodeKind};
pub use payload::{Creator, Payload};
pub use tree::{Tree, TreeWarning};
