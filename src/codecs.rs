use crate::prelude::*;
use crate::registry::Registry;
use std::path::Path;
mod aif;
pub use aif::{AifCodec, CommonChunk, SoundDataChunk, TextChunk};

/// Picks a codec by file extension. Anything unrecognized is read as a
/// generic IFF container.
pub fn get_codec(file_path: &str) -> R<Box<dyn Codec>> {
    let extension = Path::new(file_path)
        .extension()
        .and_then(|ext| ext.to_str())
        .unwrap_or_default();

    match extension.to_lowercase().as_str() {
        "aif" | "aiff" | "aifc" => Ok(Box::new(AifCodec)),
        _ => Ok(Box::new(IffCodec)),
    }
}

/// A container format built on IFF chunks.
///
/// A codec knows how to recognize its files and which leaf decoders to
/// register before parsing. Everything structural is shared through
/// [`Tree`].
pub trait Codec: Send + Sync {
    fn file_extension(&self) -> &'static str;

    fn validate_file_format(&self, data: &[u8]) -> R<()> {
        if data.len() < GROUP_HEADER_SIZE {
            return Err(anyhow!("File too small to be a valid IFF container"));
        }
        if !Builtins.has(&data[0..4]) {
            return Err(anyhow!(
                "Not an IFF container: '{}'",
                Identifier::from(&data[0..4])
            ));
        }
        Ok(())
    }

    fn register_extensions(&self, _registry: &mut Registry) -> R<()> {
        Ok(())
    }

    /// A fresh registry with this codec's decoders installed.
    fn registry(&self) -> R<Registry> {
        let mut registry = Registry::new();
        self.register_extensions(&mut registry)?;
        Ok(registry)
    }

    /// One line summary of a decoded leaf, if the codec knows it.
    fn describe(&self, _tree: &Tree, _node: NodeId) -> Option<String> {
        None
    }

    fn decode(&self, input: &[u8]) -> R<(Tree, NodeId)> {
        self.validate_file_format(input)?;
        let mut tree = Tree::with_registry(self.registry()?);
        let root = tree.parse(input)?;
        Ok((tree, root))
    }

    fn decode_file(&self, file_path: &Path) -> R<(Tree, NodeId)> {
        let file = std::fs::File::open(file_path)
            .with_context(|| format!("Failed to open {}", file_path.display()))?;
        let mapped_file = unsafe { MmapOptions::new().map(&file)? };
        self.decode(&mapped_file)
    }

    fn encode(&self, tree: &Tree, node: NodeId) -> R<Vec<u8>> {
        tree.to_bytes(node)
    }

    fn encode_file(&self, tree: &Tree, node: NodeId, file_path: &str) -> R<()> {
        let encoded_data = self.encode(tree, node)?;
        std::fs::write(file_path, encoded_data)?;
        Ok(())
    }
}

/// Any FORM, LIST, CAT or PROP file, with no leaf decoders.
pub struct IffCodec;

impl Codec for IffCodec {
    fn file_extension(&self) -> &'static str {
        "iff"
    }
}
