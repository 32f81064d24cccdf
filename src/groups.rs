pub mod cat;
pub mod form;
pub mod list;
pub mod prop;

pub use cat::Cat;
pub use form::Form;
pub use list::List;
pub use prop::Prop;

use crate::prelude::*;

/// How a group treats its tag and its children.
#[derive(Debug, Default, Clone, Copy, PartialEq, Eq, Hash)]
pub enum GroupKind {
    /// Any tag, any children.
    #[default]
    Group,
    Form,
    List,
    Cat,
    Prop,
}

impl GroupKind {
    /// The fixed container tag, if the kind has one.
    pub fn id(&self) -> Option<Identifier> {
        let id: &[u8; 4] = match self {
            GroupKind::Group => return None,
            GroupKind::Form => Form::ID,
            GroupKind::List => List::ID,
            GroupKind::Cat => Cat::ID,
            GroupKind::Prop => Prop::ID,
        };
        Some(Identifier::from(id))
    }

    pub fn only_groups(&self) -> bool {
        matches!(self, GroupKind::Cat)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_kind_ids() {
        assert_eq!(GroupKind::Group.id(), None);
        assert_eq!(GroupKind::Form.id(), Some(Identifier::from("FORM")));
        assert_eq!(GroupKind::Cat.id(), Some(Identifier::from("CAT ")));
        assert!(GroupKind::Cat.only_groups());
        assert!(!GroupKind::List.only_groups());
    }

    #[test]
    fn test_constructors_fix_the_tag() {
        let mut tree = Tree::new();
        for (node, id, kind) in [
            (tree.form("AIFF"), "FORM", GroupKind::Form),
            (tree.list("INFO"), "LIST", GroupKind::List),
            (tree.cat("AIFF"), "CAT ", GroupKind::Cat),
            (tree.prop("AIFF"), "PROP", GroupKind::Prop),
        ] {
            let group = tree.group(node).unwrap();
            assert_eq!(group.id(), id);
            assert_eq!(group.kind(), kind);
        }
    }
}
