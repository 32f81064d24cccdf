use crate::prelude::*;

/// A collection of FORMs, with PROP groups holding shared properties.
pub struct List;

impl List {
    pub const ID: &'static [u8; 4] = b"LIST";
}

impl Tree {
    pub fn list(&mut self, subtype: impl Into<Identifier>) -> NodeId {
        self.create(GroupKind::List, Identifier::from(List::ID), subtype.into())
    }

    /// The PROP children of `list`, in order.
    pub fn props(&self, list: NodeId) -> R<Vec<NodeId>> {
        Ok(self
            .iter(list)?
            .filter(|&child| self.id(child).is_ok_and(|id| id == *Prop::ID))
            .collect())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_props() {
        let mut tree = Tree::new();
        let list = tree.list("AIFF");
        let prop = tree.prop("AIFF");
        let form = tree.form("AIFF");
        tree.push(list, [prop, form]).unwrap();

        assert_eq!(tree.props(list).unwrap(), vec![prop]);

        let bytes = tree.to_bytes(list).unwrap();
        let parsed = tree.parse(&bytes).unwrap();
        let props = tree.props(parsed).unwrap();
        assert_eq!(props.len(), 1);
        assert_eq!(tree.group(props[0]).unwrap().kind(), GroupKind::Prop);
    }
}
