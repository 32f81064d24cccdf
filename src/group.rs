//! Group trees.
//!
//! Every chunk and group lives in a [`Tree`] arena and is addressed by a
//! [`NodeId`]. A group's children are a list of ids, and each node stores the
//! id of its ancestor. All structural edits go through `Tree` methods so the
//! ancestor links always agree with the child lists:
//!
//! - a node listed in a group's children has that group as its ancestor
//! - a node removed from a group has no ancestor
//! - a node belongs to at most one group; attaching it elsewhere moves it
//!
//! Handles carry a generation, so using one after [`Tree::release`] is an
//! error rather than a silent alias of a newer node.

use crate::chunk::clamp_range;
use crate::prelude::*;
use crate::registry::{Decoder, Extension, Registry};
use std::ops::RangeBounds;

/// Group depth a parse builds before keeping deeper groups as chunks.
pub const MAX_NESTING: usize = 256;

/// Tag, size and sub-type.
pub const GROUP_HEADER_SIZE: usize = 12;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct NodeId {
    index: usize,
    generation: u64,
}

/// Ordered children sharing a container tag and a sub-type.
#[derive(Debug, Clone)]
pub struct Group {
    id: Identifier,
    subtype: Identifier,
    kind: GroupKind,
    children: Vec<NodeId>,
}

impl Group {
    fn new(kind: GroupKind, id: Identifier, subtype: Identifier) -> Self {
        Self {
            id,
            subtype,
            kind,
            children: Vec::new(),
        }
    }

    pub fn id(&self) -> Identifier {
        self.id
    }

    /// The 4 byte type following the size field, e.g. `AIFF` in a FORM.
    pub fn subtype(&self) -> Identifier {
        self.subtype
    }

    pub fn kind(&self) -> GroupKind {
        self.kind
    }

    /// Cat containers only hold groups.
    pub fn only_groups(&self) -> bool {
        self.kind.only_groups()
    }

    pub fn children(&self) -> &[NodeId] {
        &self.children
    }

    pub fn len(&self) -> usize {
        self.children.len()
    }

    pub fn is_empty(&self) -> bool {
        self.children.is_empty()
    }
}

#[derive(Debug)]
pub enum Node {
    Chunk(Chunk),
    Extension(Box<dyn Extension>),
    Group(Group),
}

impl Node {
    pub fn id(&self) -> Identifier {
        match self {
            Node::Chunk(chunk) => chunk.id(),
            Node::Extension(ext) => ext.chunk().id(),
            Node::Group(group) => group.id(),
        }
    }

    pub fn is_group(&self) -> bool {
        matches!(self, Node::Group(_))
    }

    /// The leaf chunk, whether plain or decoded by an extension.
    pub fn as_chunk(&self) -> Option<&Chunk> {
        match self {
            Node::Chunk(chunk) => Some(chunk),
            Node::Extension(ext) => Some(ext.chunk()),
            Node::Group(_) => None,
        }
    }

    pub fn as_group(&self) -> Option<&Group> {
        match self {
            Node::Group(group) => Some(group),
            _ => None,
        }
    }

    pub fn as_extension(&self) -> Option<&dyn Extension> {
        match self {
            Node::Extension(ext) => Some(&**ext),
            _ => None,
        }
    }
}

/// Anything that can be attached to a group.
#[derive(Debug)]
pub enum Item {
    /// A node already in the tree. Attaching moves it.
    Node(NodeId),
    Chunk(Chunk),
    Extension(Box<dyn Extension>),
    /// A serialized chunk or group, decoded on attach.
    Bytes(Vec<u8>),
    /// Flattened one level at a time.
    Many(Vec<Item>),
}

impl From<NodeId> for Item {
    fn from(node: NodeId) -> Self {
        Item::Node(node)
    }
}

impl From<Chunk> for Item {
    fn from(chunk: Chunk) -> Self {
        Item::Chunk(chunk)
    }
}

impl From<Box<dyn Extension>> for Item {
    fn from(ext: Box<dyn Extension>) -> Self {
        Item::Extension(ext)
    }
}

impl From<Vec<u8>> for Item {
    fn from(bytes: Vec<u8>) -> Self {
        Item::Bytes(bytes)
    }
}

impl From<&[u8]> for Item {
    fn from(bytes: &[u8]) -> Self {
        Item::Bytes(bytes.to_vec())
    }
}

impl From<Vec<NodeId>> for Item {
    fn from(nodes: Vec<NodeId>) -> Self {
        Item::Many(nodes.into_iter().map(Item::Node).collect())
    }
}

impl From<&[NodeId]> for Item {
    fn from(nodes: &[NodeId]) -> Self {
        Item::Many(nodes.iter().copied().map(Item::Node).collect())
    }
}

impl<const N: usize> From<[NodeId; N]> for Item {
    fn from(nodes: [NodeId; N]) -> Self {
        Item::Many(nodes.into_iter().map(Item::Node).collect())
    }
}

impl From<Vec<Chunk>> for Item {
    fn from(chunks: Vec<Chunk>) -> Self {
        Item::Many(chunks.into_iter().map(Item::Chunk).collect())
    }
}

impl From<Vec<Item>> for Item {
    fn from(items: Vec<Item>) -> Self {
        Item::Many(items)
    }
}

/// Child ids of a group, in order.
pub type Children<'a> = std::iter::Copied<std::slice::Iter<'a, NodeId>>;

#[derive(Debug)]
struct Occupant {
    node: Node,
    ancestor: Option<NodeId>,
}

#[derive(Debug)]
struct Slot {
    generation: u64,
    occupant: Option<Occupant>,
}

enum Placement {
    Back,
    At(usize),
}

#[derive(Debug, Default)]
pub struct Tree {
    slots: Vec<Slot>,
    free: Vec<usize>,
    registry: Registry,
}

impl Tree {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_registry(registry: Registry) -> Self {
        Self {
            registry,
            ..Self::default()
        }
    }

    pub fn registry(&self) -> &Registry {
        &self.registry
    }

    pub fn registry_mut(&mut self) -> &mut Registry {
        &mut self.registry
    }

    /// A detached empty group. A builtin container tag picks the matching
    /// kind.
    pub fn create_group(
        &mut self,
        id: impl Into<Identifier>,
        subtype: impl Into<Identifier>,
    ) -> NodeId {
        let id = id.into();
        let kind = self.registry.builtins.get(id).unwrap_or(GroupKind::Group);
        self.create(kind, id, subtype.into())
    }

    pub(crate) fn create(&mut self, kind: GroupKind, id: Identifier, subtype: Identifier) -> NodeId {
        self.alloc(Node::Group(Group::new(kind, id, subtype)), None)
    }

    // ---------------------------------------------------------------- arena

    fn alloc(&mut self, node: Node, ancestor: Option<NodeId>) -> NodeId {
        let occupant = Some(Occupant { node, ancestor });
        if let Some(index) = self.free.pop() {
            let slot = &mut self.slots[index];
            slot.occupant = occupant;
            NodeId {
                index,
                generation: slot.generation,
            }
        } else {
            self.slots.push(Slot {
                generation: 0,
                occupant,
            });
            NodeId {
                index: self.slots.len() - 1,
                generation: 0,
            }
        }
    }

    fn take(&mut self, node: NodeId) -> R<Occupant> {
        self.occupant(node)?;
        let slot = &mut self.slots[node.index];
        let occupant = slot.occupant.take().ok_or_else(|| stale(node))?;
        slot.generation += 1;
        self.free.push(node.index);
        Ok(occupant)
    }

    fn occupant(&self, node: NodeId) -> R<&Occupant> {
        self.slots
            .get(node.index)
            .filter(|slot| slot.generation == node.generation)
            .and_then(|slot| slot.occupant.as_ref())
            .ok_or_else(|| stale(node))
    }

    fn occupant_mut(&mut self, node: NodeId) -> R<&mut Occupant> {
        self.slots
            .get_mut(node.index)
            .filter(|slot| slot.generation == node.generation)
            .and_then(|slot| slot.occupant.as_mut())
            .ok_or_else(|| stale(node))
    }

    fn group_mut(&mut self, node: NodeId) -> R<&mut Group> {
        match &mut self.occupant_mut(node)?.node {
            Node::Group(group) => Ok(group),
            other => Err(not_a_group(node, other)),
        }
    }

    fn set_ancestor(&mut self, node: NodeId, ancestor: Option<NodeId>) -> R<()> {
        self.occupant_mut(node)?.ancestor = ancestor;
        Ok(())
    }

    pub fn contains(&self, node: NodeId) -> bool {
        self.occupant(node).is_ok()
    }

    /// Number of live nodes, attached or not.
    pub fn node_count(&self) -> usize {
        self.slots.len() - self.free.len()
    }

    // ------------------------------------------------------------- accessors

    pub fn get(&self, node: NodeId) -> Option<&Node> {
        self.occupant(node).ok().map(|o| &o.node)
    }

    pub fn node(&self, node: NodeId) -> R<&Node> {
        Ok(&self.occupant(node)?.node)
    }

    pub fn group(&self, node: NodeId) -> R<&Group> {
        match self.node(node)? {
            Node::Group(group) => Ok(group),
            other => Err(not_a_group(node, other)),
        }
    }

    pub fn chunk(&self, node: NodeId) -> R<&Chunk> {
        self.node(node)?
            .as_chunk()
            .ok_or_else(|| anyhow!("Node {:?} is a group, not a chunk", node))
    }

    pub fn chunk_mut(&mut self, node: NodeId) -> R<&mut Chunk> {
        match &mut self.occupant_mut(node)?.node {
            Node::Chunk(chunk) => Ok(chunk),
            Node::Extension(ext) => Ok(ext.chunk_mut()),
            Node::Group(_) => Err(anyhow!("Node {:?} is a group, not a chunk", node)),
        }
    }

    /// The decoded extension at `node` if it is a `T`.
    pub fn extension<T: Extension + 'static>(&self, node: NodeId) -> Option<&T> {
        self.get(node)?.as_extension()?.as_any().downcast_ref::<T>()
    }

    pub fn extension_mut<T: Extension + 'static>(&mut self, node: NodeId) -> Option<&mut T> {
        match &mut self.occupant_mut(node).ok()?.node {
            Node::Extension(ext) => ext.as_any_mut().downcast_mut::<T>(),
            _ => None,
        }
    }

    /// The group holding `node`, or for derived chunks the node they were
    /// derived from.
    pub fn ancestor(&self, node: NodeId) -> Option<NodeId> {
        self.occupant(node).ok()?.ancestor
    }

    /// The ancestor, only when it is a group listing `node` as a child.
    fn parent(&self, node: NodeId) -> Option<NodeId> {
        let ancestor = self.ancestor(node)?;
        let group = self.group(ancestor).ok()?;
        group.children.contains(&node).then_some(ancestor)
    }

    pub fn id(&self, node: NodeId) -> R<Identifier> {
        Ok(self.node(node)?.id())
    }

    pub fn is_group(&self, node: NodeId) -> bool {
        self.get(node).is_some_and(Node::is_group)
    }

    pub fn set_id(&mut self, group: NodeId, id: impl Into<Identifier>) -> R<()> {
        self.group_mut(group)?.id = id.into();
        Ok(())
    }

    pub fn set_subtype(&mut self, group: NodeId, subtype: impl Into<Identifier>) -> R<()> {
        self.group_mut(group)?.subtype = subtype.into();
        Ok(())
    }

    pub fn len(&self, group: NodeId) -> R<usize> {
        Ok(self.group(group)?.len())
    }

    pub fn is_empty(&self, group: NodeId) -> R<bool> {
        Ok(self.group(group)?.is_empty())
    }

    pub fn children(&self, group: NodeId) -> R<&[NodeId]> {
        Ok(self.group(group)?.children())
    }

    /// Snapshot of the direct children.
    pub fn to_array(&self, group: NodeId) -> R<Vec<NodeId>> {
        Ok(self.children(group)?.to_vec())
    }

    /// Iterates the children present now. The borrow on the tree rules out
    /// edits while iterating.
    pub fn iter(&self, group: NodeId) -> R<Children<'_>> {
        Ok(self.children(group)?.iter().copied())
    }

    /// Declared size of a chunk, or the sum over a group's children.
    pub fn size(&self, node: NodeId) -> R<usize> {
        match self.node(node)? {
            Node::Group(group) => group
                .children
                .iter()
                .try_fold(0usize, |sum, &child| -> R<usize> { Ok(sum + self.size(child)?) }),
            leaf => Ok(leaf.as_chunk().map_or(0, Chunk::size)),
        }
    }

    /// Serialized length including headers and padding.
    pub fn encoded_len(&self, node: NodeId) -> R<usize> {
        match self.node(node)? {
            Node::Group(group) => Ok(GROUP_HEADER_SIZE + self.payload_len(group)?),
            leaf => Ok(leaf.as_chunk().map_or(0, Chunk::encoded_len)),
        }
    }

    fn payload_len(&self, group: &Group) -> R<usize> {
        group
            .children
            .iter()
            .try_fold(0usize, |sum, &child| -> R<usize> {
                Ok(sum + self.encoded_len(child)?)
            })
    }

    // --------------------------------------------------------- serialization

    /// `tag(4) size(4, BE) subtype(4)`, where size covers the sub-type and
    /// every serialized child.
    pub fn header(&self, group: NodeId) -> R<[u8; GROUP_HEADER_SIZE]> {
        let group = self.group(group)?;
        let size = 4 + self.payload_len(group)?;
        let size = u32::try_from(size)
            .map_err(|_| anyhow!("Group '{}' is too large to encode", group.id))?;

        let mut header = [0u8; GROUP_HEADER_SIZE];
        header[0..4].copy_from_slice(group.id.as_bytes());
        (&mut header[4..8]).write_u32::<BigEndian>(size)?;
        header[8..12].copy_from_slice(group.subtype.as_bytes());
        Ok(header)
    }

    /// Concatenated serialized children, without the group header.
    pub fn chunks(&self, group: NodeId) -> R<Vec<u8>> {
        let mut out = Vec::new();
        for child in self.iter(group)? {
            self.write_to(child, &mut out)?;
        }
        Ok(out)
    }

    pub fn write_to<W: Write>(&self, node: NodeId, out: &mut W) -> R<()> {
        match self.node(node)? {
            Node::Group(group) => {
                out.write_all(&self.header(node)?)?;
                for &child in &group.children {
                    self.write_to(child, out)?;
                }
                Ok(())
            }
            leaf => match leaf.as_chunk() {
                Some(chunk) => chunk.write_to(out),
                None => Ok(()),
            },
        }
    }

    pub fn to_bytes(&self, node: NodeId) -> R<Vec<u8>> {
        let mut out = Vec::with_capacity(self.encoded_len(node)?);
        self.write_to(node, &mut out)?;
        Ok(out)
    }

    // --------------------------------------------------------------- parsing

    /// Decodes a serialized group. The container tag picks the group kind
    /// through the registry; unknown tags give a plain group. The tag read
    /// from `bytes` is kept, so re-serializing gives the same bytes.
    pub fn parse(&mut self, bytes: &[u8]) -> R<NodeId> {
        let (id, subtype, payload) = split_group(bytes)?;
        let kind = match self.registry.resolve(&id) {
            Some(Decoder::Group(kind)) => kind,
            _ => GroupKind::Group,
        };
        Ok(self.decode_group(kind, id, subtype, payload))
    }

    /// Decodes a serialized group as `kind`. Kinds with a fixed tag keep it
    /// regardless of the tag in `bytes`.
    pub fn parse_as(&mut self, kind: GroupKind, bytes: &[u8]) -> R<NodeId> {
        let (id, subtype, payload) = split_group(bytes)?;
        Ok(self.decode_group(kind, kind.id().unwrap_or(id), subtype, payload))
    }

    /// Builds a group and everything nested in it from `payload`.
    ///
    /// Walks the records with an explicit stack of borrowed payloads, so
    /// neither the call stack nor copying grows with depth. Groups nested
    /// deeper than [`MAX_NESTING`] are kept as plain chunks.
    fn decode_group(
        &mut self,
        kind: GroupKind,
        id: Identifier,
        subtype: Identifier,
        payload: &[u8],
    ) -> NodeId {
        let root = self.create(kind, id, subtype);
        let mut stack = vec![(root, ChunkIterator::new(payload))];

        while let Some((group, records)) = stack.last_mut() {
            let group = *group;
            let Some((id, data)) = records.next_record() else {
                stack.pop();
                continue;
            };

            let nested = match self.registry.resolve(&id) {
                Some(Decoder::Group(kind)) if data.len() >= 4 => Some(kind),
                _ => None,
            };
            let child = match nested {
                Some(_) if stack.len() >= MAX_NESTING => {
                    log::warn!(
                        "'{}' is nested more than {} groups deep, keeping it as a chunk",
                        id,
                        MAX_NESTING
                    );
                    self.alloc(Node::Chunk(Chunk::with_data(id, data)), None)
                }
                Some(kind) => {
                    log::trace!("decoding '{}' as {:?}", id, kind);
                    let node = self.create(kind, id, Identifier::from(&data[0..4]));
                    stack.push((node, ChunkIterator::new(&data[4..])));
                    node
                }
                None => self.decode_chunk(Chunk::with_data(id, data)),
            };
            self.adopt(group, child);
        }
        root
    }

    /// Turns a decoded chunk into a node, specialized when the registry
    /// knows its tag.
    fn decode_chunk(&mut self, chunk: Chunk) -> NodeId {
        match self.specialize(&chunk, None) {
            Some(node) => node,
            None => self.alloc(Node::Chunk(chunk), None),
        }
    }

    /// Registry dispatch for one leaf. Returns a new detached node when the
    /// tag maps to a group kind or to an extension other than `current`.
    fn specialize(&mut self, chunk: &Chunk, current: Option<&'static str>) -> Option<NodeId> {
        let id = chunk.id();
        match self.registry.resolve(&id)? {
            Decoder::Group(kind) => {
                let data = chunk.data();
                if data.len() < 4 {
                    log::warn!("'{}' chunk is too small to hold a group", id);
                    return None;
                }
                log::trace!("decoding '{}' as {:?}", id, kind);
                let subtype = Identifier::from(&data[0..4]);
                Some(self.decode_group(kind, id, subtype, &data[4..]))
            }
            Decoder::Extension { name, .. } if current == Some(name) => None,
            Decoder::Extension { name, decode } => {
                let decoded = chunk.to_bytes().and_then(|bytes| decode(&bytes));
                match decoded {
                    Ok(ext) => {
                        log::trace!("decoded '{}' with {}", id, name);
                        Some(self.alloc(Node::Extension(ext), None))
                    }
                    Err(e) => {
                        log::warn!("{} could not decode '{}': {:#}", name, id, e);
                        None
                    }
                }
            }
        }
    }

    /// Re-decodes a leaf node in place when the registry specializes its
    /// tag. Groups are left alone.
    fn coerce(&mut self, node: NodeId) -> R<()> {
        let (chunk, current) = match &self.occupant(node)?.node {
            Node::Group(_) => return Ok(()),
            Node::Chunk(chunk) => (chunk.clone(), None),
            Node::Extension(ext) => (ext.chunk().clone(), Some(ext.name())),
        };

        if let Some(replacement) = self.specialize(&chunk, current) {
            let Occupant { node: decoded, .. } = self.take(replacement)?;
            if let Node::Group(group) = &decoded {
                for &child in &group.children {
                    self.set_ancestor(child, Some(node))?;
                }
            }
            self.occupant_mut(node)?.node = decoded;
        }
        Ok(())
    }

    /// Turns an item into a single detached (or already present) node.
    pub fn insert(&mut self, item: impl Into<Item>) -> R<NodeId> {
        match item.into() {
            Item::Node(node) => {
                self.coerce(node)?;
                Ok(node)
            }
            Item::Chunk(chunk) => Ok(self.decode_chunk(chunk)),
            Item::Extension(ext) => {
                let node = self.alloc(Node::Extension(ext), None);
                self.coerce(node)?;
                Ok(node)
            }
            Item::Bytes(bytes) => {
                let chunk = Chunk::from_bytes(&bytes)?;
                Ok(self.decode_chunk(chunk))
            }
            Item::Many(items) => bail!(
                "Expected a single chunk or group, got a list of {}",
                items.len()
            ),
        }
    }

    // ------------------------------------------------------------- mutation

    /// Inserts every item, flattening lists. On error, nodes created here
    /// are released again and existing ones are left as they were.
    fn prepare(&mut self, item: Item, out: &mut Vec<(NodeId, bool)>) -> R<()> {
        match item {
            Item::Many(items) => {
                for item in items {
                    self.prepare(item, out)?;
                }
                Ok(())
            }
            item => {
                let fresh = !matches!(item, Item::Node(_));
                out.push((self.insert(item)?, fresh));
                Ok(())
            }
        }
    }

    fn prepare_all(&mut self, group: NodeId, item: Item, strict: bool) -> R<Vec<NodeId>> {
        let only_groups = self.group(group)?.only_groups();
        let mut prepared = Vec::new();

        let checked = self.prepare(item, &mut prepared).and_then(|_| {
            for &(node, _) in &prepared {
                if self.is_ancestor_or_self(node, group) {
                    bail!("Cannot attach {:?} inside itself", node);
                }
                if strict && only_groups && !self.is_group(node) {
                    bail!(
                        "'{}' only holds groups, got chunk '{}'",
                        self.id(group)?,
                        self.id(node)?
                    );
                }
            }
            Ok(())
        });

        if let Err(e) = checked {
            for (node, fresh) in prepared {
                if fresh {
                    self.release(node)?;
                }
            }
            return Err(e);
        }

        Ok(prepared.into_iter().map(|(node, _)| node).collect())
    }

    fn is_ancestor_or_self(&self, candidate: NodeId, mut node: NodeId) -> bool {
        for _ in 0..=self.slots.len() {
            if node == candidate {
                return true;
            }
            match self.parent(node) {
                Some(parent) => node = parent,
                None => return false,
            }
        }
        false
    }

    fn detach(&mut self, node: NodeId) -> R<()> {
        if let Some(parent) = self.parent(node) {
            self.group_mut(parent)?.children.retain(|&child| child != node);
        }
        self.set_ancestor(node, None)
    }

    fn attach(&mut self, group: NodeId, node: NodeId, placement: Placement) -> R<()> {
        self.detach(node)?;
        let children = &mut self.group_mut(group)?.children;
        match placement {
            Placement::Back => children.push(node),
            Placement::At(index) => children.insert(index.min(children.len()), node),
        }
        self.set_ancestor(node, Some(group))
    }

    /// Appends a node during decoding, dropping leaves offered to a Cat.
    fn adopt(&mut self, group: NodeId, node: NodeId) -> bool {
        let only_groups = self.group(group).is_ok_and(Group::only_groups);
        if only_groups && !self.is_group(node) {
            dprintln!(
                "dropping chunk '{}' from groups-only container",
                self.id(node).map(|id| id.to_string()).unwrap_or_default()
            );
            let _ = self.release(node);
            return false;
        }
        self.attach(group, node, Placement::Back).is_ok()
    }

    /// Appends items at the end. Returns the new number of children.
    ///
    /// Items are coerced through the registry. Existing nodes are moved out
    /// of their previous group. Offering a chunk to a Cat is an error here;
    /// [`Tree::append`] drops it instead.
    pub fn push(&mut self, group: NodeId, item: impl Into<Item>) -> R<usize> {
        for node in self.prepare_all(group, item.into(), true)? {
            self.attach(group, node, Placement::Back)?;
        }
        self.len(group)
    }

    /// Prepends items, keeping their relative order. Returns the new number
    /// of children.
    pub fn unshift(&mut self, group: NodeId, item: impl Into<Item>) -> R<usize> {
        let nodes = self.prepare_all(group, item.into(), true)?;
        for (offset, node) in nodes.into_iter().enumerate() {
            self.attach(group, node, Placement::At(offset))?;
        }
        self.len(group)
    }

    pub fn pop(&mut self, group: NodeId) -> R<Option<NodeId>> {
        let node = self.group_mut(group)?.children.pop();
        if let Some(node) = node {
            self.set_ancestor(node, None)?;
        }
        Ok(node)
    }

    pub fn shift(&mut self, group: NodeId) -> R<Option<NodeId>> {
        let children = &mut self.group_mut(group)?.children;
        if children.is_empty() {
            return Ok(None);
        }
        let node = children.remove(0);
        self.set_ancestor(node, None)?;
        Ok(Some(node))
    }

    /// Appends items, flattening lists. In a Cat, anything that is not a
    /// group is dropped. Returns how many items were attached.
    pub fn append(&mut self, group: NodeId, item: impl Into<Item>) -> R<usize> {
        let only_groups = self.group(group)?.only_groups();
        match item.into() {
            Item::Many(items) => {
                let mut appended = 0;
                for item in items {
                    appended += self.append(group, item)?;
                }
                Ok(appended)
            }
            item => {
                let fresh = !matches!(item, Item::Node(_));
                let node = self.insert(item)?;
                if only_groups && !self.is_group(node) {
                    dprintln!(
                        "dropping chunk '{}' appended to '{}'",
                        self.id(node)?,
                        self.id(group)?
                    );
                    if fresh {
                        self.release(node)?;
                    }
                    return Ok(0);
                }
                if self.is_ancestor_or_self(node, group) {
                    bail!("Cannot attach {:?} inside itself", node);
                }
                self.attach(group, node, Placement::Back)?;
                Ok(1)
            }
        }
    }

    /// An empty group with the same tag, sub-type and kind as `group`.
    fn empty_like(&mut self, group: NodeId) -> R<NodeId> {
        let group = self.group(group)?;
        let (kind, id, subtype) = (group.kind, group.id, group.subtype);
        Ok(self.create(kind, id, subtype))
    }

    /// Appends into a fresh group. Nodes still held by some group are copied
    /// so the source stays intact; detached nodes are moved in.
    fn concat_into(&mut self, out: NodeId, item: Item) -> R<()> {
        match item {
            Item::Many(items) => {
                for item in items {
                    self.concat_into(out, item)?;
                }
            }
            Item::Node(node) if self.parent(node).is_some() => {
                let copy = self.copy(node)?;
                self.append(out, copy)?;
            }
            item => {
                self.append(out, item)?;
            }
        }
        Ok(())
    }

    /// A new group holding copies of this group's children followed by
    /// `item`. Lists are flattened, groups are kept whole. The receiver is
    /// not modified.
    pub fn concat(&mut self, group: NodeId, item: impl Into<Item>) -> R<NodeId> {
        let out = self.empty_like(group)?;
        let children = self.to_array(group)?;
        self.concat_into(out, children.into())?;
        self.concat_into(out, item.into())?;
        Ok(out)
    }

    fn derive(&mut self, group: NodeId, items: Item) -> R<NodeId> {
        let out = self.empty_like(group)?;
        self.concat_into(out, items)?;
        Ok(out)
    }

    /// A new group built from `f` applied to each child.
    pub fn map<F, I>(&mut self, group: NodeId, mut f: F) -> R<NodeId>
    where
        F: FnMut(&mut Tree, NodeId) -> R<I>,
        I: Into<Item>,
    {
        let mut items = Vec::new();
        for child in self.to_array(group)? {
            items.push(f(self, child)?.into());
        }
        self.derive(group, Item::Many(items))
    }

    /// A new group holding copies of the children `f` accepts.
    pub fn filter<F>(&mut self, group: NodeId, mut f: F) -> R<NodeId>
    where
        F: FnMut(&Tree, NodeId) -> bool,
    {
        let mut kept = Vec::new();
        for child in self.to_array(group)? {
            if f(self, child) {
                kept.push(child);
            }
        }
        self.derive(group, kept.into())
    }

    /// A new group holding copies of the children in `range`.
    pub fn slice(&mut self, group: NodeId, range: impl RangeBounds<usize>) -> R<NodeId> {
        let children = self.to_array(group)?;
        let (start, end) = clamp_range(range, children.len());
        self.derive(group, children[start..end].into())
    }

    /// Removes up to `delete_count` children from `start` and inserts
    /// `item` in their place. The removed children are returned as a new
    /// group of the same kind.
    pub fn splice(
        &mut self,
        group: NodeId,
        start: usize,
        delete_count: usize,
        item: impl Into<Item>,
    ) -> R<NodeId> {
        let inserted = self.prepare_all(group, item.into(), true)?;

        let children = &mut self.group_mut(group)?.children;
        let start = start.min(children.len());
        let end = start.saturating_add(delete_count).min(children.len());
        let removed: Vec<NodeId> = children.drain(start..end).collect();
        for &node in &removed {
            self.set_ancestor(node, None)?;
        }

        for (offset, node) in inserted.into_iter().enumerate() {
            self.attach(group, node, Placement::At(start + offset))?;
        }

        let out = self.empty_like(group)?;
        for node in removed {
            self.attach(out, node, Placement::Back)?;
        }
        Ok(out)
    }

    /// Empties the group in place, detaching every child. Returns how many
    /// were removed.
    pub fn clear(&mut self, group: NodeId) -> R<usize> {
        let removed = std::mem::take(&mut self.group_mut(group)?.children);
        for &node in &removed {
            self.set_ancestor(node, None)?;
        }
        Ok(removed.len())
    }

    /// A detached deep copy of `node`.
    pub fn copy(&mut self, node: NodeId) -> R<NodeId> {
        let copy = match &self.occupant(node)?.node {
            Node::Chunk(chunk) => Node::Chunk(chunk.clone()),
            Node::Extension(ext) => Node::Extension(ext.clone()),
            Node::Group(group) => Node::Group(Group {
                children: Vec::new(),
                ..group.clone()
            }),
        };
        let out = self.alloc(copy, None);

        if self.is_group(node) {
            for child in self.to_array(node)? {
                let child = self.copy(child)?;
                self.attach(out, child, Placement::Back)?;
            }
        }
        Ok(out)
    }

    /// Detaches `node` and frees it together with everything below it. Its
    /// handle, and those of its descendants, become invalid.
    pub fn release(&mut self, node: NodeId) -> R<()> {
        self.detach(node)?;
        let occupant = self.take(node)?;
        if let Node::Group(group) = occupant.node {
            for child in group.children {
                self.set_ancestor(child, None)?;
                self.release(child)?;
            }
        }
        Ok(())
    }

    /// Structural equality: tags, sub-types, sizes and bytes, recursively.
    /// Ancestors and group kinds are not compared.
    pub fn deep_eq(&self, a: NodeId, b: NodeId) -> bool {
        let (Some(left), Some(right)) = (self.get(a), self.get(b)) else {
            return false;
        };
        match (left, right) {
            (Node::Group(x), Node::Group(y)) => {
                x.id == y.id
                    && x.subtype == y.subtype
                    && x.children.len() == y.children.len()
                    && x.children
                        .iter()
                        .zip(&y.children)
                        .all(|(&a, &b)| self.deep_eq(a, b))
            }
            (Node::Group(_), _) | (_, Node::Group(_)) => false,
            (x, y) => {
                x.as_extension().map(|e| e.name()) == y.as_extension().map(|e| e.name())
                    && x.as_chunk() == y.as_chunk()
            }
        }
    }

    // ----------------------------------------------------- chunk derivations

    fn derive_chunk(&mut self, source: NodeId, chunk: Chunk) -> R<NodeId> {
        let node = self.alloc(Node::Chunk(chunk), Some(source));
        self.coerce(node)?;
        Ok(node)
    }

    /// A new detached chunk with each data byte passed through `f`. Its
    /// ancestor is `node`.
    pub fn map_chunk(&mut self, node: NodeId, f: impl FnMut(u8) -> u8) -> R<NodeId> {
        let chunk = self.chunk(node)?.map(f);
        self.derive_chunk(node, chunk)
    }

    pub fn filter_chunk(&mut self, node: NodeId, f: impl FnMut(u8) -> bool) -> R<NodeId> {
        let chunk = self.chunk(node)?.filter(f);
        self.derive_chunk(node, chunk)
    }

    pub fn slice_chunk(&mut self, node: NodeId, range: impl RangeBounds<usize>) -> R<NodeId> {
        let chunk = self.chunk(node)?.slice(range);
        self.derive_chunk(node, chunk)
    }
}

/// Frames a serialized group: tag, sub-type and the payload after them,
/// cut at the end of `bytes` when the size field asks for more.
fn split_group(bytes: &[u8]) -> R<(Identifier, Identifier, &[u8])> {
    if bytes.len() < GROUP_HEADER_SIZE {
        bail!(
            "Group header needs {} bytes, got {}",
            GROUP_HEADER_SIZE,
            bytes.len()
        );
    }

    let id = Identifier::from(&bytes[0..4]);
    let size = (&bytes[4..8]).read_u32::<BigEndian>()? as usize;
    let subtype = Identifier::from(&bytes[8..12]);

    let end = GROUP_HEADER_SIZE
        .saturating_add(size.saturating_sub(4))
        .min(bytes.len());
    if end - GROUP_HEADER_SIZE < size.saturating_sub(4) {
        log::warn!(
            "group '{}' declares {} bytes but only {} are present",
            id,
            size,
            end - HEADER_SIZE
        );
    }
    Ok((id, subtype, &bytes[GROUP_HEADER_SIZE..end]))
}

fn stale(node: NodeId) -> anyhow::Error {
    anyhow!("Node {:?} is not in this tree", node)
}

fn not_a_group(node: NodeId, found: &Node) -> anyhow::Error {
    anyhow!("Node {:?} ('{}') is not a group", node, found.id())
}
