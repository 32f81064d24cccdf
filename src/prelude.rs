pub use crate::dprintln; // Make the macro available
pub use crate::*;
pub use anyhow::{Context, Result as R, anyhow, bail};
pub use byteorder::{BigEndian, ReadBytesExt, WriteBytesExt};

pub use memmap2::MmapOptions;
pub use std::io::{Cursor, Read, Write};
