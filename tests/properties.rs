use iffcodex_lib::prelude::*;
use proptest::prelude::*;

fn tag() -> impl Strategy<Value = String> {
    "[A-Za-z][A-Za-z0-9 ]{3}"
}

#[derive(Debug, Clone)]
enum Op {
    Push(usize),
    Unshift(usize),
    Pop,
    Shift,
    Splice(usize, usize, usize),
}

fn op() -> impl Strategy<Value = Op> {
    prop_oneof![
        (0usize..4).prop_map(Op::Push),
        (0usize..4).prop_map(Op::Unshift),
        Just(Op::Pop),
        Just(Op::Shift),
        (0usize..6, 0usize..3, 0usize..3).prop_map(|(s, d, n)| Op::Splice(s, d, n)),
    ]
}

fn leaves(tree: &mut Tree, count: usize) -> Vec<NodeId> {
    (0..count)
        .map(|i| tree.insert(Chunk::with_data("leaf", vec![i as u8; i + 1])).unwrap())
        .collect()
}

proptest! {
    #[test]
    fn chunk_round_trip(id in tag(), data in proptest::collection::vec(any::<u8>(), 0..64)) {
        let chunk = Chunk::with_data(id.as_str(), &data);
        let decoded = Chunk::from_bytes(&chunk.to_bytes().unwrap()).unwrap();
        prop_assert_eq!(decoded.id(), chunk.id());
        prop_assert_eq!(decoded.data(), data.as_slice());
        prop_assert_eq!(decoded, chunk);
    }

    #[test]
    fn padding_law(n in 0usize..512) {
        let chunk = Chunk::new("size", n);
        prop_assert_eq!(chunk.len(), n + n % 2);
        prop_assert_eq!(chunk.size(), n);

        let bytes = chunk.to_bytes().unwrap();
        prop_assert_eq!(bytes.len(), 8 + n + n % 2);
        prop_assert_eq!(u32::from_be_bytes([bytes[4], bytes[5], bytes[6], bytes[7]]) as usize, n);
    }

    #[test]
    fn ancestor_invariant(ops in proptest::collection::vec(op(), 1..24)) {
        let mut tree = Tree::new();
        let group = tree.form("TEST");
        let mut removed: Vec<NodeId> = Vec::new();

        for op in ops {
            match op {
                Op::Push(n) => {
                    let nodes = leaves(&mut tree, n);
                    tree.push(group, nodes).unwrap();
                }
                Op::Unshift(n) => {
                    let nodes = leaves(&mut tree, n);
                    tree.unshift(group, nodes).unwrap();
                }
                Op::Pop => removed.extend(tree.pop(group).unwrap()),
                Op::Shift => removed.extend(tree.shift(group).unwrap()),
                Op::Splice(start, delete, n) => {
                    let nodes = leaves(&mut tree, n);
                    let out = tree.splice(group, start, delete, nodes).unwrap();
                    let taken = tree.to_array(out).unwrap();
                    prop_assert_eq!(tree.clear(out).unwrap(), taken.len());
                    removed.extend(taken);
                }
            }

            for child in tree.to_array(group).unwrap() {
                prop_assert_eq!(tree.ancestor(child), Some(group));
            }
            for &node in &removed {
                prop_assert_eq!(tree.ancestor(node), None);
            }
        }
    }

    #[test]
    fn size_additivity(sizes in proptest::collection::vec(proptest::collection::vec(0usize..40, 0..5), 0..5)) {
        let mut tree = Tree::new();
        let root = tree.list("TEST");
        let mut total = 0;
        for group_sizes in &sizes {
            let form = tree.form("TEST");
            for &size in group_sizes {
                tree.push(form, Chunk::new("leaf", size)).unwrap();
                total += size;
            }
            let expected: usize = group_sizes.iter().sum();
            prop_assert_eq!(tree.size(form).unwrap(), expected);
            tree.push(root, form).unwrap();
        }
        prop_assert_eq!(tree.size(root).unwrap(), total);

        let bytes = tree.to_bytes(root).unwrap();
        let parsed = tree.parse(&bytes).unwrap();
        prop_assert_eq!(tree.size(parsed).unwrap(), total);
        prop_assert!(tree.deep_eq(parsed, root));
    }
}
