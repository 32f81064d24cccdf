use crate::prelude::*;

/// Shared properties for the FORMs of a LIST.
pub struct Prop;

impl Prop {
    pub const ID: &'static [u8; 4] = b"PROP";
}

impl Tree {
    pub fn prop(&mut self, subtype: impl Into<Identifier>) -> NodeId {
        self.create(GroupKind::Prop, Identifier::from(Prop::ID), subtype.into())
    }
}
