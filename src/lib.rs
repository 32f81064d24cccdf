pub mod chunk;
pub mod codecs;
pub mod describe;
pub mod group;
pub mod groups;
pub mod id;
pub mod logging;
pub mod prelude;
pub mod registry;
pub mod stream;
use std::path::PathBuf;

use crate::prelude::*;
pub use chunk::{Chunk, ChunkIterator, HEADER_SIZE};
pub use codecs::*;
pub use group::{Children, GROUP_HEADER_SIZE, Group, Item, MAX_NESTING, Node, NodeId, Tree};
pub use groups::{Cat, Form, GroupKind, List, Prop};
pub use id::{IdSource, Identifier};
pub use registry::{Builtins, DecodeFn, Decoder, Extension, ExtensionBase, Extensions, Registry};
pub use stream::{GroupReader, GroupWriter};

pub fn debug_println(args: std::fmt::Arguments) {
    log::debug!("{}", args);
}

// Helper macro to use it like println!
#[macro_export]
macro_rules! dprintln {
    ($($arg:tt)*) => {
        $crate::debug_println(format_args!($($arg)*))
    };
}

/// Decodes and re-encodes the file at `path` in place.
pub fn rewrite(path: &str) -> R<()> {
    let c = Codex::open(path)?;
    c.export(path)?;
    Ok(())
}

/// A file on disk decoded into a [`Tree`].
#[derive(Default)]
pub struct Codex {
    pub path: PathBuf,
    pub tree: Tree,
    pub root: Option<NodeId>,
    pub codec: Option<Box<dyn Codec>>,
}

impl Codex {
    pub fn new(input_file: &str) -> R<Self> {
        let path = PathBuf::from(input_file);
        if !path.exists() {
            return Err(anyhow!("Input file does not exist: {}", path.display()));
        }

        Ok(Self {
            path,
            codec: get_codec(input_file).ok(),
            ..Self::default()
        })
    }

    pub fn decode(mut self) -> R<Self> {
        let codec = self.codec.as_ref().ok_or_else(|| {
            anyhow!(
                "No codec available for decoding file: {}",
                self.path.display()
            )
        })?;
        let (tree, root) = codec.decode_file(&self.path)?;
        dprintln!(
            "decoded {} with {} codec: {} nodes",
            self.path.display(),
            codec.file_extension(),
            tree.node_count()
        );
        self.tree = tree;
        self.root = Some(root);
        Ok(self)
    }

    pub fn open(input_file: &str) -> R<Self> {
        Self::new(input_file)?.decode()
    }

    pub fn get_filename(&self) -> &str {
        self.path
            .file_name()
            .and_then(|name| name.to_str())
            .unwrap_or("unknown")
    }

    pub fn root(&self) -> R<NodeId> {
        self.root
            .ok_or_else(|| anyhow!("Nothing decoded from {}", self.path.display()))
    }

    pub fn codec(&self) -> &dyn Codec {
        match &self.codec {
            Some(codec) => codec.as_ref(),
            None => &IffCodec,
        }
    }

    pub fn to_bytes(&self) -> R<Vec<u8>> {
        self.codec().encode(&self.tree, self.root()?)
    }

    /// Writes the tree to `output_file` through a temporary file next to
    /// it, so a failed write leaves the target untouched.
    pub fn export(&self, output_file: &str) -> R<()> {
        let temp_file = PathBuf::from(format!("{}.tmp", output_file));
        let temp_path = temp_file
            .to_str()
            .ok_or_else(|| anyhow!("Invalid output path: {}", output_file))?;

        self.codec().encode_file(&self.tree, self.root()?, temp_path)?;

        match std::fs::rename(&temp_file, output_file) {
            Ok(_) => Ok(()),
            Err(e) => {
                // As a fallback, try to copy then delete
                if let Err(_copy_err) = std::fs::copy(&temp_file, output_file) {
                    Err(e.into()) // Return the original error
                } else {
                    let _ = std::fs::remove_file(&temp_file); // Try to cleanup
                    Ok(())
                }
            }
        }
    }

    pub fn describe_json(&self) -> R<serde_json::Value> {
        describe::to_json(&self.tree, self.root()?, self.codec())
    }
}
