use crate::prelude::*;

/// A typed collection of local chunks, e.g. `FORM AIFF`.
pub struct Form;

impl Form {
    pub const ID: &'static [u8; 4] = b"FORM";
}

impl Tree {
    pub fn form(&mut self, subtype: impl Into<Identifier>) -> NodeId {
        self.create(GroupKind::Form, Identifier::from(Form::ID), subtype.into())
    }
}
