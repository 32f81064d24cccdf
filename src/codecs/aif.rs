use crate::prelude::*;
use crate::registry::{Decoder, Extension, Registry};
use byteorder::ByteOrder;

// Chunk Identifiers
const FORM_CHUNK_ID: &[u8; 4] = b"FORM";
const AIFF_FORMAT_ID: &[u8; 4] = b"AIFF";
const AIFC_FORMAT_ID: &[u8; 4] = b"AIFC";
const FMT_CHUNK_ID: &[u8; 4] = b"COMM";
const DATA_CHUNK_ID: &[u8; 4] = b"SSND";

// AIFF Metadata Chunk Identifiers
const ANNO_CHUNK_ID: &[u8; 4] = b"ANNO";
const NAME_CHUNK_ID: &[u8; 4] = b"NAME";
const AUTH_CHUNK_ID: &[u8; 4] = b"AUTH";
const COPYRIGHT_CHUNK_ID: &[u8; 4] = b"(c) ";

// Chunk Structures
const MIN_VALID_FILE_SIZE: usize = 12;
const COMM_SIZE: usize = 18; // channels(2) + frames(4) + bits(2) + rate(10)
const AIFC_COMM_SIZE: usize = 22; // + compression type(4)
const SSND_HEADER_SIZE: usize = 8; // offset(4) + block size(4)

pub struct AifCodec;

impl Codec for AifCodec {
    fn file_extension(&self) -> &'static str {
        "aif"
    }

    fn validate_file_format(&self, data: &[u8]) -> R<()> {
        if data.len() < MIN_VALID_FILE_SIZE {
            return Err(anyhow!("File too small to be a valid AIFF"));
        }

        let mut cursor = Cursor::new(data);

        // Read FORM header
        let mut form = [0u8; 4];
        cursor.read_exact(&mut form)?;
        if &form != FORM_CHUNK_ID {
            return Err(anyhow!("Not a FORM file"));
        }

        cursor.read_u32::<BigEndian>()?; // File size
        let mut aiff = [0u8; 4];
        cursor.read_exact(&mut aiff)?;
        if &aiff != AIFF_FORMAT_ID && &aiff != AIFC_FORMAT_ID {
            return Err(anyhow!("Not an AIFF file"));
        }

        Ok(())
    }

    fn register_extensions(&self, registry: &mut Registry) -> R<()> {
        let extensions = &mut registry.extensions;
        extensions.set(FMT_CHUNK_ID, Decoder::extension(CommonChunk::NAME, CommonChunk::decode))?;
        extensions.set(
            DATA_CHUNK_ID,
            Decoder::extension(SoundDataChunk::NAME, SoundDataChunk::decode),
        )?;
        for id in [NAME_CHUNK_ID, AUTH_CHUNK_ID, COPYRIGHT_CHUNK_ID, ANNO_CHUNK_ID] {
            extensions.set(id, Decoder::extension(TextChunk::NAME, TextChunk::decode))?;
        }
        Ok(())
    }

    fn describe(&self, tree: &Tree, node: NodeId) -> Option<String> {
        if let Some(comm) = tree.extension::<CommonChunk>(node) {
            return Some(format!(
                "channels={} frames={} bits={} rate={}",
                comm.num_channels(),
                comm.num_sample_frames(),
                comm.sample_size(),
                comm.sample_rate()
            ));
        }
        if let Some(ssnd) = tree.extension::<SoundDataChunk>(node) {
            return Some(format!(
                "offset={} block_size={} bytes={}",
                ssnd.offset(),
                ssnd.block_size(),
                ssnd.sound_data().len()
            ));
        }
        tree.extension::<TextChunk>(node)
            .map(|text| format!("{:?}", text.text()))
    }
}

/// `COMM`: channel count, frame count, bit depth and sample rate.
#[derive(Debug, Clone)]
pub struct CommonChunk(Chunk);

impl CommonChunk {
    pub const NAME: &'static str = "aif.COMM";

    pub fn new(
        num_channels: i16,
        num_sample_frames: u32,
        sample_size: i16,
        sample_rate: f64,
    ) -> R<Self> {
        let mut data = Vec::with_capacity(COMM_SIZE);
        data.write_i16::<BigEndian>(num_channels)?;
        data.write_u32::<BigEndian>(num_sample_frames)?;
        data.write_i16::<BigEndian>(sample_size)?;
        write_ieee_extended_simple(&mut data, sample_rate)?;
        Ok(Self(Chunk::with_data(FMT_CHUNK_ID, data)))
    }

    pub fn from_chunk(chunk: Chunk) -> R<Self> {
        if chunk.size() < COMM_SIZE {
            bail!("COMM chunk needs {} bytes, got {}", COMM_SIZE, chunk.size());
        }
        Ok(Self(chunk))
    }

    pub fn decode(bytes: &[u8]) -> R<Box<dyn Extension>> {
        Ok(Box::new(Self::from_chunk(Chunk::from_bytes(bytes)?)?))
    }

    pub fn num_channels(&self) -> i16 {
        BigEndian::read_i16(&self.0.data()[0..2])
    }

    pub fn num_sample_frames(&self) -> u32 {
        BigEndian::read_u32(&self.0.data()[2..6])
    }

    pub fn sample_size(&self) -> i16 {
        BigEndian::read_i16(&self.0.data()[6..8])
    }

    pub fn sample_rate(&self) -> f64 {
        let mut extended = [0u8; 10];
        extended.copy_from_slice(&self.0.data()[8..18]);
        read_ieee_extended(&extended)
    }

    /// AIFC only.
    pub fn compression_type(&self) -> Option<Identifier> {
        let data = self.0.data();
        (data.len() >= AIFC_COMM_SIZE).then(|| Identifier::from(&data[18..22]))
    }

    pub fn set_num_channels(&mut self, num_channels: i16) -> R<()> {
        self.0.set(num_channels.to_be_bytes(), 0)
    }

    pub fn set_sample_rate(&mut self, sample_rate: f64) -> R<()> {
        let mut extended = Vec::with_capacity(10);
        write_ieee_extended_simple(&mut extended, sample_rate)?;
        self.0.set(extended, 8)
    }
}

impl Extension for CommonChunk {
    fn name(&self) -> &'static str {
        Self::NAME
    }

    fn chunk(&self) -> &Chunk {
        &self.0
    }

    fn chunk_mut(&mut self) -> &mut Chunk {
        &mut self.0
    }
}

/// `SSND`: sample data with its alignment header.
#[derive(Debug, Clone)]
pub struct SoundDataChunk(Chunk);

impl SoundDataChunk {
    pub const NAME: &'static str = "aif.SSND";

    pub fn new(offset: u32, block_size: u32, sound_data: &[u8]) -> R<Self> {
        let mut data = Vec::with_capacity(SSND_HEADER_SIZE + sound_data.len());
        data.write_u32::<BigEndian>(offset)?;
        data.write_u32::<BigEndian>(block_size)?;
        data.write_all(sound_data)?;
        Ok(Self(Chunk::with_data(DATA_CHUNK_ID, data)))
    }

    pub fn from_chunk(chunk: Chunk) -> R<Self> {
        if chunk.size() < SSND_HEADER_SIZE {
            bail!(
                "SSND chunk needs {} bytes, got {}",
                SSND_HEADER_SIZE,
                chunk.size()
            );
        }
        Ok(Self(chunk))
    }

    pub fn decode(bytes: &[u8]) -> R<Box<dyn Extension>> {
        Ok(Box::new(Self::from_chunk(Chunk::from_bytes(bytes)?)?))
    }

    pub fn offset(&self) -> u32 {
        BigEndian::read_u32(&self.0.data()[0..4])
    }

    pub fn block_size(&self) -> u32 {
        BigEndian::read_u32(&self.0.data()[4..8])
    }

    pub fn sound_data(&self) -> &[u8] {
        &self.0.data()[SSND_HEADER_SIZE..]
    }
}

impl Extension for SoundDataChunk {
    fn name(&self) -> &'static str {
        Self::NAME
    }

    fn chunk(&self) -> &Chunk {
        &self.0
    }

    fn chunk_mut(&mut self) -> &mut Chunk {
        &mut self.0
    }
}

/// `NAME`, `AUTH`, `(c) ` and `ANNO`: plain text.
#[derive(Debug, Clone)]
pub struct TextChunk(Chunk);

impl TextChunk {
    pub const NAME: &'static str = "aif.text";

    pub fn new(id: impl Into<Identifier>, text: &str) -> Self {
        Self(Chunk::with_data(id, text))
    }

    pub fn decode(bytes: &[u8]) -> R<Box<dyn Extension>> {
        Ok(Box::new(Self(Chunk::from_bytes(bytes)?)))
    }

    pub fn text(&self) -> String {
        String::from_utf8_lossy(self.0.data())
            .trim_end_matches('\0')
            .to_string()
    }
}

impl Extension for TextChunk {
    fn name(&self) -> &'static str {
        Self::NAME
    }

    fn chunk(&self) -> &Chunk {
        &self.0
    }

    fn chunk_mut(&mut self) -> &mut Chunk {
        &mut self.0
    }
}

fn read_ieee_extended(extended: &[u8; 10]) -> f64 {
    // Extract the sign, exponent, and mantissa
    let sign = (extended[0] & 0x80) != 0;
    let exponent = ((extended[0] as u16 & 0x7F) << 8) | (extended[1] as u16);
    let mantissa = BigEndian::read_u64(&extended[2..10]);

    if exponent == 0 {
        return 0.0;
    }

    let bias = 16383i32;
    let adjusted_exponent = exponent as i32 - bias;

    if adjusted_exponent > 1023 {
        return if sign {
            f64::NEG_INFINITY
        } else {
            f64::INFINITY
        };
    }

    let mantissa_f64 = mantissa as f64 / (1u64 << 63) as f64;
    let result = mantissa_f64 * 2.0_f64.powi(adjusted_exponent);

    if sign { -result } else { result }
}

fn write_ieee_extended<W: Write>(writer: &mut W, mut value: f64) -> R<()> {
    let mut buffer = [0u8; 10];

    if value.is_nan() {
        buffer[0] = 0x7F;
        buffer[1] = 0xFF;
        buffer[2] = 0xFF;
        writer.write_all(&buffer)?;
        return Ok(());
    }

    if value.is_infinite() {
        buffer[0] = if value.is_sign_negative() { 0xFF } else { 0x7F };
        buffer[1] = 0xFF;
        buffer[2] = 0x80; // explicit leading bit
        writer.write_all(&buffer)?;
        return Ok(());
    }

    if value < 0.0 {
        buffer[0] = 0x80;
        value = -value;
    }

    if value == 0.0 {
        writer.write_all(&buffer)?;
        return Ok(());
    }

    let mut exponent: i32 = 16383; // Bias for 80-bit IEEE

    // Normalize to [1, 2)
    let mut fraction = value;
    while fraction >= 2.0 {
        fraction /= 2.0;
        exponent += 1;
    }
    while fraction < 1.0 {
        fraction *= 2.0;
        exponent -= 1;
    }

    if exponent > 0x7FFE {
        buffer[0] |= 0x7F;
        buffer[1] = 0xFF;
        buffer[2] = 0x80;
        writer.write_all(&buffer)?;
        return Ok(());
    }

    if exponent < 0 {
        // underflow
        writer.write_all(&buffer)?;
        return Ok(());
    }

    // The leading bit is explicit in the 80-bit format
    let mantissa_bits = (fraction * (1u64 << 63) as f64) as u64;

    buffer[0] |= ((exponent >> 8) & 0x7F) as u8;
    buffer[1] = (exponent & 0xFF) as u8;
    BigEndian::write_u64(&mut buffer[2..10], mantissa_bits);

    writer.write_all(&buffer)?;
    Ok(())
}

fn write_ieee_extended_simple<W: Write>(writer: &mut W, value: f64) -> R<()> {
    if value.fract() != 0.0 {
        return write_ieee_extended(writer, value);
    }

    // Common audio sample rates
    let buffer: [u8; 10] = match value as u32 {
        44100 => [0x40, 0x0E, 0xAC, 0x44, 0x00, 0x00, 0x00, 0x00, 0x00, 0x00],
        48000 => [0x40, 0x0E, 0xBB, 0x80, 0x00, 0x00, 0x00, 0x00, 0x00, 0x00],
        88200 => [0x40, 0x0F, 0xAC, 0x44, 0x00, 0x00, 0x00, 0x00, 0x00, 0x00],
        96000 => [0x40, 0x0F, 0xBB, 0x80, 0x00, 0x00, 0x00, 0x00, 0x00, 0x00],
        _ => return write_ieee_extended(writer, value),
    };

    writer.write_all(&buffer)?;
    Ok(())
}
