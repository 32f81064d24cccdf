//! Tag to decoder lookup tables.
//!
//! `Builtins` is the fixed table of structural containers (CAT, FORM, LIST,
//! PROP). `Extensions` is filled by callers with decoders for their own leaf
//! or container tags. A [`Registry`] pairs the two and resolves a tag to a
//! [`Decoder`], builtins first.

use crate::prelude::*;
use std::any::Any;
use std::collections::HashMap;
use std::fmt;
use std::sync::OnceLock;

/// Decodes the serialized bytes of one chunk (header included) into a
/// specialized leaf.
pub type DecodeFn = fn(&[u8]) -> R<Box<dyn Extension>>;

/// What a tag decodes into.
#[derive(Debug, Clone, Copy)]
pub enum Decoder {
    /// The chunk payload is a sub-type followed by nested chunks.
    Group(GroupKind),
    /// A caller supplied leaf decoder. `name` identifies the produced type so
    /// already-decoded leaves are not decoded twice.
    Extension { name: &'static str, decode: DecodeFn },
}

impl Decoder {
    pub fn extension(name: &'static str, decode: DecodeFn) -> Self {
        Decoder::Extension { name, decode }
    }
}

pub trait ExtensionBase {
    fn clone_box(&self) -> Box<dyn Extension>;
    fn as_any(&self) -> &dyn Any;
    fn as_any_mut(&mut self) -> &mut dyn Any;
}

impl<T: Extension + Clone + 'static> ExtensionBase for T {
    fn clone_box(&self) -> Box<dyn Extension> {
        Box::new(self.clone())
    }

    fn as_any(&self) -> &dyn Any {
        self
    }

    fn as_any_mut(&mut self) -> &mut dyn Any {
        self
    }
}

/// A specialized leaf chunk produced by a registered [`DecodeFn`].
///
/// Implementors wrap the [`Chunk`] they were decoded from and add typed
/// accessors on top of it. Serialization always goes through `chunk()`.
pub trait Extension: ExtensionBase + fmt::Debug {
    /// Must match the `name` the decoder was registered with.
    fn name(&self) -> &'static str;
    fn chunk(&self) -> &Chunk;
    fn chunk_mut(&mut self) -> &mut Chunk;
}

impl Clone for Box<dyn Extension> {
    fn clone(&self) -> Self {
        self.clone_box()
    }
}

fn normalize_key(key: &[u8]) -> String {
    String::from_utf8_lossy(key).into_owned()
}

fn builtin_table() -> &'static HashMap<&'static str, GroupKind> {
    static TABLE: OnceLock<HashMap<&'static str, GroupKind>> = OnceLock::new();
    TABLE.get_or_init(|| {
        HashMap::from([
            ("CAT", GroupKind::Cat),
            ("FORM", GroupKind::Form),
            ("LIST", GroupKind::List),
            ("PROP", GroupKind::Prop),
        ])
    })
}

/// The four structural container types. Keys are trimmed, so `"CAT"` and
/// `"CAT "` both resolve.
#[derive(Debug, Default, Clone, Copy)]
pub struct Builtins;

impl Builtins {
    pub fn get(&self, key: impl AsRef<[u8]>) -> Option<GroupKind> {
        let key = normalize_key(key.as_ref());
        builtin_table().get(key.trim()).copied()
    }

    pub fn has(&self, key: impl AsRef<[u8]>) -> bool {
        self.get(key).is_some()
    }

    pub fn keys(&self) -> impl Iterator<Item = &'static str> {
        builtin_table().keys().copied()
    }
}

/// Caller registered decoders. Keys must be exactly 4 characters; trailing
/// spaces are part of the key (`"ID3 "`, `"(c) "`).
#[derive(Debug, Default, Clone)]
pub struct Extensions {
    map: HashMap<String, Decoder>,
}

impl Extensions {
    /// Registers `decoder` for `key`, returning the decoder it replaced.
    pub fn set(&mut self, key: impl AsRef<[u8]>, decoder: Decoder) -> R<Option<Decoder>> {
        let key = checked_key(key.as_ref())?;
        Ok(self.map.insert(key, decoder))
    }

    pub fn get(&self, key: impl AsRef<[u8]>) -> Option<Decoder> {
        self.map.get(&normalize_key(key.as_ref())).copied()
    }

    pub fn has(&self, key: impl AsRef<[u8]>) -> bool {
        self.map.contains_key(&normalize_key(key.as_ref()))
    }

    /// Removes `key`, returning whether it was registered.
    pub fn delete(&mut self, key: impl AsRef<[u8]>) -> R<bool> {
        let key = checked_key(key.as_ref())?;
        Ok(self.map.remove(&key).is_some())
    }

    pub fn len(&self) -> usize {
        self.map.len()
    }

    pub fn is_empty(&self) -> bool {
        self.map.is_empty()
    }

    pub fn iter(&self) -> impl Iterator<Item = (&str, &Decoder)> {
        self.map.iter().map(|(key, decoder)| (key.as_str(), decoder))
    }
}

fn checked_key(key: &[u8]) -> R<String> {
    let key = normalize_key(key);
    if key.chars().count() != Identifier::BYTES {
        bail!("Invalid extension key length: {:?}", key);
    }
    Ok(key)
}

#[derive(Debug, Default, Clone)]
pub struct Registry {
    pub builtins: Builtins,
    pub extensions: Extensions,
}

impl Registry {
    pub fn new() -> Self {
        Self::default()
    }

    /// Looks `id` up in the builtins, then in the extensions by raw and by
    /// trimmed key.
    pub fn resolve(&self, id: &Identifier) -> Option<Decoder> {
        if let Some(kind) = self.builtins.get(id) {
            return Some(Decoder::Group(kind));
        }

        self.extensions
            .get(id)
            .or_else(|| self.extensions.get(id.key()))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[derive(Debug, Clone)]
    struct Ping(Chunk);

    impl Extension for Ping {
        fn name(&self) -> &'static str {
            "test.PING"
        }
        fn chunk(&self) -> &Chunk {
            &self.0
        }
        fn chunk_mut(&mut self) -> &mut Chunk {
            &mut self.0
        }
    }

    fn decode_ping(bytes: &[u8]) -> R<Box<dyn Extension>> {
        Ok(Box::new(Ping(Chunk::from_bytes(bytes)?)))
    }

    fn ping() -> Decoder {
        Decoder::extension("test.PING", decode_ping)
    }

    #[test]
    fn test_builtins() {
        let builtins = Builtins;
        assert!(matches!(builtins.get(Identifier::from("CAT ")), Some(GroupKind::Cat)));
        assert!(matches!(builtins.get(b"FORM"), Some(GroupKind::Form)));
        assert!(matches!(builtins.get("LIST"), Some(GroupKind::List)));
        assert!(matches!(builtins.get("PROP"), Some(GroupKind::Prop)));
        assert!(builtins.get("ping").is_none());
        assert_eq!(builtins.keys().count(), 4);
    }

    #[test]
    fn test_extension_key_length() {
        let mut extensions = Extensions::default();
        assert!(extensions.set("PIN", ping()).is_err());
        assert!(extensions.set("PINGS", ping()).is_err());
        assert!(extensions.set("PING", ping()).unwrap().is_none());
        assert!(extensions.set("PING", ping()).unwrap().is_some());
        assert_eq!(extensions.len(), 1);
    }

    #[test]
    fn test_extension_keys_accept_bytes_and_ids() {
        let mut extensions = Extensions::default();
        extensions.set("PING", ping()).unwrap();
        extensions.set(b"PONG", ping()).unwrap();

        assert!(extensions.has("PING"));
        assert!(extensions.has(b"PING"));
        assert!(extensions.has(Identifier::from("PONG")));

        assert!(extensions.delete("PING").unwrap());
        assert!(extensions.delete(b"PONG").unwrap());
        assert!(!extensions.delete("PONG").unwrap());
        assert!(!extensions.has("PING"));
        assert!(extensions.is_empty());
        assert!(extensions.delete("XY").is_err());
    }

    #[test]
    fn test_resolve_prefers_builtins() {
        let mut registry = Registry::new();
        registry.extensions.set("FORM", ping()).unwrap();
        registry.extensions.set("ID3 ", ping()).unwrap();

        assert!(matches!(
            registry.resolve(&Identifier::from("FORM")),
            Some(Decoder::Group(GroupKind::Form))
        ));
        assert!(matches!(
            registry.resolve(&Identifier::from("ID3 ")),
            Some(Decoder::Extension { name: "test.PING", .. })
        ));
        assert!(registry.resolve(&Identifier::from("SSND")).is_none());
    }

    #[test]
    fn test_extension_downcast() {
        let bytes = Chunk::with_data("PING", "hello").to_bytes().unwrap();
        let decoded = decode_ping(&bytes).unwrap();
        let copy = decoded.clone();
        assert_eq!(copy.name(), "test.PING");
        let ping = copy.as_any().downcast_ref::<Ping>().unwrap();
        assert_eq!(ping.chunk().data(), b"hello");
    }
}
