use crate::prelude::*;
use std::fmt;
use std::ops::{Bound, RangeBounds};

/// Tag + size field.
pub const HEADER_SIZE: usize = 8;

/// A tagged byte container: `tag(4) size(4, BE) data(size) pad(0|1)`.
///
/// The backing buffer is always padded to an even length while `size` keeps
/// the declared byte count, so serializing never has to guess whether a
/// trailing zero is data or padding.
#[derive(Clone, PartialEq, Eq)]
pub struct Chunk {
    id: Identifier,
    size: usize,
    bytes: Vec<u8>,
}

fn padded_len(size: usize) -> usize {
    size + size % 2
}

impl Chunk {
    pub const HEADER_SIZE: usize = HEADER_SIZE;

    /// A zero-filled chunk declaring `size` bytes.
    pub fn new(id: impl Into<Identifier>, size: usize) -> Self {
        Self {
            id: id.into(),
            size,
            bytes: vec![0; padded_len(size)],
        }
    }

    /// A chunk holding exactly `data`.
    pub fn with_data(id: impl Into<Identifier>, data: impl AsRef<[u8]>) -> Self {
        let data = data.as_ref();
        let mut chunk = Self::new(id, data.len());
        chunk.bytes[..data.len()].copy_from_slice(data);
        chunk
    }

    /// Decodes one chunk from the front of `buffer`. A size field larger
    /// than the bytes present is clamped to what is there.
    pub fn from_bytes(buffer: &[u8]) -> R<Self> {
        let (id, data) = split_record(buffer)?;
        Ok(Self::with_data(id, data))
    }

    /// Decodes one chunk from the front of `buffer` with a caller supplied
    /// size, ignoring the size field. A payload shorter than `size` is copied
    /// as far as it goes and the rest stays zero.
    pub fn from_bytes_with_size(buffer: &[u8], size: usize) -> R<Self> {
        if buffer.len() < HEADER_SIZE {
            bail!(
                "Chunk header needs {} bytes, got {}",
                HEADER_SIZE,
                buffer.len()
            );
        }

        let id = Identifier::from(&buffer[0..4]);
        if !id.is_valid() {
            dprintln!("chunk tag {:02x?} is not a valid identifier", &buffer[0..4]);
        }

        let payload = &buffer[HEADER_SIZE..];
        let available = payload.len().min(size);
        if available < size {
            log::warn!(
                "chunk '{}' declares {} bytes but only {} are present",
                id,
                size,
                available
            );
        }

        let mut chunk = Self::new(id, size);
        chunk.bytes[..available].copy_from_slice(&payload[..available]);
        Ok(chunk)
    }

    pub fn id(&self) -> Identifier {
        self.id
    }

    pub fn set_id(&mut self, id: impl Into<Identifier>) {
        self.id = id.into();
    }

    /// Declared payload size, without padding.
    pub fn size(&self) -> usize {
        self.size
    }

    /// Length of the padded backing buffer.
    pub fn len(&self) -> usize {
        self.bytes.len()
    }

    pub fn is_empty(&self) -> bool {
        self.size == 0
    }

    /// The declared `size` bytes.
    pub fn data(&self) -> &[u8] {
        &self.bytes[..self.size]
    }

    pub fn data_mut(&mut self) -> &mut [u8] {
        &mut self.bytes[..self.size]
    }

    /// The backing buffer including any pad byte.
    pub fn padded(&self) -> &[u8] {
        &self.bytes
    }

    /// Copies `bytes` into the chunk at `offset`. Strings are written as
    /// their UTF-8 bytes.
    pub fn set(&mut self, bytes: impl AsRef<[u8]>, offset: usize) -> R<()> {
        let bytes = bytes.as_ref();
        let end = offset
            .checked_add(bytes.len())
            .filter(|&end| end <= self.size)
            .ok_or_else(|| {
                anyhow!(
                    "Cannot set {} bytes at offset {} in chunk '{}' of size {}",
                    bytes.len(),
                    offset,
                    self.id,
                    self.size
                )
            })?;
        self.bytes[offset..end].copy_from_slice(bytes);
        Ok(())
    }

    /// A new chunk with the same tag and every data byte passed through `f`.
    pub fn map(&self, f: impl FnMut(u8) -> u8) -> Chunk {
        let data: Vec<u8> = self.data().iter().copied().map(f).collect();
        Self::with_data(self.id, data)
    }

    /// A new chunk with the same tag keeping the data bytes `f` accepts.
    pub fn filter(&self, mut f: impl FnMut(u8) -> bool) -> Chunk {
        let data: Vec<u8> = self.data().iter().copied().filter(|&b| f(b)).collect();
        Self::with_data(self.id, data)
    }

    /// A new chunk with the same tag over a sub-range of the data. Bounds
    /// are clamped to the declared size.
    pub fn slice(&self, range: impl RangeBounds<usize>) -> Chunk {
        let (start, end) = clamp_range(range, self.size);
        Self::with_data(self.id, &self.data()[start..end])
    }

    /// Serialized length: header, data and pad byte.
    pub fn encoded_len(&self) -> usize {
        HEADER_SIZE + self.bytes.len()
    }

    pub fn write_to<W: Write>(&self, out: &mut W) -> R<()> {
        let size = u32::try_from(self.size)
            .map_err(|_| anyhow!("Chunk '{}' is too large to encode", self.id))?;
        out.write_all(self.id.as_bytes())?;
        out.write_u32::<BigEndian>(size)?;
        out.write_all(&self.bytes)?;
        Ok(())
    }

    pub fn to_bytes(&self) -> R<Vec<u8>> {
        let mut out = Vec::with_capacity(self.encoded_len());
        self.write_to(&mut out)?;
        Ok(out)
    }
}

/// Frames one record at the front of `buffer`, borrowing its data. The data
/// stops at the end of `buffer` when the size field asks for more.
pub(crate) fn split_record(buffer: &[u8]) -> R<(Identifier, &[u8])> {
    if buffer.len() < HEADER_SIZE {
        bail!(
            "Chunk header needs {} bytes, got {}",
            HEADER_SIZE,
            buffer.len()
        );
    }

    let id = Identifier::from(&buffer[0..4]);
    if !id.is_valid() {
        dprintln!("chunk tag {:02x?} is not a valid identifier", &buffer[0..4]);
    }

    let size = (&buffer[4..8]).read_u32::<BigEndian>()? as usize;
    let payload = &buffer[HEADER_SIZE..];
    if payload.len() < size {
        log::warn!(
            "chunk '{}' declares {} bytes but only {} are present",
            id,
            size,
            payload.len()
        );
    }
    Ok((id, &payload[..size.min(payload.len())]))
}

/// Resolves `range` against a sequence of `len` items, clamping both ends.
pub(crate) fn clamp_range(range: impl RangeBounds<usize>, len: usize) -> (usize, usize) {
    let start = match range.start_bound() {
        Bound::Included(&s) => s,
        Bound::Excluded(&s) => s.saturating_add(1),
        Bound::Unbounded => 0,
    };
    let end = match range.end_bound() {
        Bound::Included(&e) => e.saturating_add(1),
        Bound::Excluded(&e) => e,
        Bound::Unbounded => len,
    };
    let end = end.min(len);
    (start.min(end), end)
}

impl fmt::Debug for Chunk {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Chunk")
            .field("id", &self.id)
            .field("size", &self.size)
            .field("data", &String::from_utf8_lossy(self.data()))
            .finish()
    }
}

/// Walks back-to-back chunk records in a flat buffer.
///
/// Each step decodes one record and advances by its header plus padded
/// payload. Iteration stops at the end of the buffer, or early when fewer
/// than [`HEADER_SIZE`] bytes remain.
#[derive(Debug, Clone)]
pub struct ChunkIterator<'a> {
    buffer: &'a [u8],
    offset: usize,
}

impl<'a> ChunkIterator<'a> {
    pub fn new(buffer: &'a [u8]) -> Self {
        Self { buffer, offset: 0 }
    }

    pub fn offset(&self) -> usize {
        self.offset
    }

    pub fn is_done(&self) -> bool {
        self.offset >= self.buffer.len()
    }

    /// Starts over from the first record.
    pub fn reset(&mut self) {
        self.offset = 0;
    }
}

impl<'a> ChunkIterator<'a> {
    /// Steps over one record without copying its data.
    pub(crate) fn next_record(&mut self) -> Option<(Identifier, &'a [u8])> {
        if self.is_done() {
            return None;
        }

        let rest = &self.buffer[self.offset..];
        match split_record(rest) {
            Ok((id, data)) => {
                self.offset = (self.offset + HEADER_SIZE + padded_len(data.len()))
                    .min(self.buffer.len());
                Some((id, data))
            }
            Err(e) => {
                log::warn!("ignoring {} trailing bytes: {}", rest.len(), e);
                self.offset = self.buffer.len();
                None
            }
        }
    }
}

impl Iterator for ChunkIterator<'_> {
    type Item = Chunk;

    fn next(&mut self) -> Option<Chunk> {
        self.next_record()
            .map(|(id, data)| Chunk::with_data(id, data))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_new_chunk_padding() {
        let chunk = Chunk::new("FORM", 32);
        assert_eq!(chunk.id(), "FORM");
        assert_eq!(chunk.len(), 32);
        assert_eq!(chunk.size(), 32);

        let chunk = Chunk::new("FORM", 31);
        assert_eq!(chunk.len(), 32); // accounts for padding
        assert_eq!(chunk.size(), 31);
        assert_eq!(chunk.data().len(), 31);
    }

    #[test]
    fn test_set_and_round_trip() {
        let mut pong = Chunk::new("pong", 5);
        pong.set("world", 0).unwrap();

        let bytes = pong.to_bytes().unwrap();
        assert_eq!(&bytes[0..4], b"pong");
        assert_eq!(&bytes[4..8], &[0, 0, 0, 5]);
        assert_eq!(&bytes[8..13], b"world");
        assert_eq!(bytes.len(), 14); // pad byte

        assert_eq!(Chunk::from_bytes(&bytes).unwrap(), pong);
    }

    #[test]
    fn test_trailing_zero_data_survives() {
        let chunk = Chunk::with_data("zero", [1u8, 2, 0]);
        let bytes = chunk.to_bytes().unwrap();
        assert_eq!(&bytes[4..8], &[0, 0, 0, 3]);
        let decoded = Chunk::from_bytes(&bytes).unwrap();
        assert_eq!(decoded.data(), &[1, 2, 0]);
    }

    #[test]
    fn test_set_out_of_bounds() {
        let mut chunk = Chunk::new("ping", 4);
        assert!(chunk.set("hello", 0).is_err());
        assert!(chunk.set("hi", 3).is_err());
        chunk.set("hi", 2).unwrap();
        assert_eq!(chunk.data(), b"\0\0hi");
    }

    #[test]
    fn test_short_header_is_an_error() {
        assert!(Chunk::from_bytes(b"FORM").is_err());
    }

    #[test]
    fn test_truncated_payload_is_clamped() {
        let chunk = Chunk::from_bytes(b"ping\x00\x00\x00\x05hel").unwrap();
        assert_eq!(chunk.size(), 3);
        assert_eq!(chunk.data(), b"hel");

        // caller supplied sizes still zero-fill
        let chunk = Chunk::from_bytes_with_size(b"ping\x00\x00\x00\x05hel", 5).unwrap();
        assert_eq!(chunk.data(), b"hel\0\0");
    }

    #[test]
    fn test_oversized_field_follows_input_length() {
        let buffer = b"ping\xff\xff\xff\xf0abcd";
        let chunk = Chunk::from_bytes(buffer).unwrap();
        assert_eq!(chunk.size(), 4);
        assert_eq!(chunk.encoded_len(), buffer.len());

        let mut chunks = ChunkIterator::new(buffer);
        assert_eq!(chunks.next().unwrap().data(), b"abcd");
        assert!(chunks.next().is_none());
    }

    #[test]
    fn test_caller_supplied_size() {
        let chunk = Chunk::from_bytes_with_size(b"ping\x00\x00\x00\x05hello", 2).unwrap();
        assert_eq!(chunk.data(), b"he");
    }

    #[test]
    fn test_map_filter_slice() {
        let chunk = Chunk::with_data("NAME", "joseph");
        let upper = chunk.map(|b| b.to_ascii_uppercase());
        assert_eq!(upper.data(), b"JOSEPH");
        assert_eq!(upper.id(), "NAME");

        let vowels = chunk.filter(|b| b"aeiou".contains(&b));
        assert_eq!(vowels.data(), b"oe");
        assert_eq!(vowels.size(), 2);

        assert_eq!(chunk.slice(1..3).data(), b"os");
        assert_eq!(chunk.slice(4..).data(), b"ph");
        assert_eq!(chunk.slice(..100).data(), b"joseph");
        assert_eq!(chunk.slice(5..2).size(), 0);
    }

    #[test]
    fn test_iterator_walks_padded_records() {
        let mut buffer = Chunk::with_data("ping", "hello").to_bytes().unwrap();
        buffer.extend(Chunk::with_data("pong", "worlds").to_bytes().unwrap());

        let mut chunks = ChunkIterator::new(&buffer);
        let ids: Vec<String> = chunks.by_ref().map(|c| c.id().to_string()).collect();
        assert_eq!(ids, ["ping", "pong"]);
        assert!(chunks.is_done());

        chunks.reset();
        assert_eq!(chunks.next().unwrap().data(), b"hello");
    }

    #[test]
    fn test_iterator_stops_at_trailing_garbage() {
        let mut buffer = Chunk::with_data("ping", "hi").to_bytes().unwrap();
        buffer.extend_from_slice(b"abc");
        assert_eq!(ChunkIterator::new(&buffer).count(), 1);
    }
}
