use crate::prelude::*;

/// A concatenation of groups. Leaf chunks are never held: `push` and
/// `unshift` reject them, `append` and parsing drop them.
pub struct Cat;

impl Cat {
    pub const ID: &'static [u8; 4] = b"CAT ";
}

impl Tree {
    pub fn cat(&mut self, subtype: impl Into<Identifier>) -> NodeId {
        self.create(GroupKind::Cat, Identifier::from(Cat::ID), subtype.into())
    }
}
