use std::fmt;

/// The number of bytes in an [`Identifier`].
pub const BYTES: usize = 4;

// Continuation bit of an unsigned LEB128 byte.
const VARINT_MSB: u8 = 0x80;
const VARINT_MAX_BYTES: usize = 10;

/// A 4 byte chunk tag: printable ASCII in `0x20..=0x7E`, where a space may
/// not lead and trailing spaces are allowed. The all-zero value is the empty
/// sentinel.
///
/// Construction never fails. Anything that does not validate becomes
/// [`Identifier::EMPTY`], and callers check [`Identifier::is_valid`].
#[derive(Clone, Copy, PartialEq, Eq, Hash, Default, PartialOrd, Ord)]
pub struct Identifier([u8; BYTES]);

/// Inputs an [`Identifier`] can be built from.
///
/// `normalize` turns the input into candidate bytes, or `None` when the input
/// has no byte form at all (a missing value).
pub trait IdSource {
    fn normalize(&self) -> Option<Vec<u8>>;
}

impl Identifier {
    pub const BYTES: usize = BYTES;
    pub const EMPTY: Identifier = Identifier([0; BYTES]);

    pub fn alloc() -> Self {
        Self::EMPTY
    }

    pub fn from_value<T: IdSource + ?Sized>(value: &T) -> Self {
        let mut id = Self::EMPTY;
        id.set(value);
        id
    }

    /// Checks a candidate value against the tag rules without building an
    /// `Identifier`. The all-zero 4 byte value passes here.
    pub fn validate<T: IdSource + ?Sized>(value: &T) -> bool {
        value.normalize().is_some_and(|bytes| validate_bytes(&bytes))
    }

    /// Replaces the held bytes when `value` validates. Returns whether it did;
    /// an invalid value leaves the identifier untouched.
    pub fn set<T: IdSource + ?Sized>(&mut self, value: &T) -> bool {
        match value.normalize() {
            Some(bytes) if validate_bytes(&bytes) => {
                self.0.copy_from_slice(&bytes);
                true
            }
            _ => false,
        }
    }

    pub fn is_valid(&self) -> bool {
        *self != Self::EMPTY && validate_bytes(&self.0)
    }

    pub fn is_empty(&self) -> bool {
        *self == Self::EMPTY
    }

    pub fn as_bytes(&self) -> &[u8; BYTES] {
        &self.0
    }

    pub fn to_bytes(&self) -> [u8; BYTES] {
        self.0
    }

    /// The tag as a string with surrounding whitespace removed, e.g. `"CAT"`
    /// for `"CAT "`. Used for registry lookups.
    pub fn key(&self) -> String {
        self.to_string().trim().to_string()
    }
}

fn validate_bytes(bytes: &[u8]) -> bool {
    if bytes.len() != BYTES {
        return false;
    }

    // spaces may not precede printable characters
    if bytes[0] == 0x20 {
        return false;
    }

    bytes.iter().all(|&b| b == 0 || (0x20..=0x7e).contains(&b))
}

/// Minimal big-endian bytes of `value`; zero has no bytes at all.
fn number_bytes(value: u64) -> Vec<u8> {
    let bytes = value.to_be_bytes();
    let first = bytes.iter().position(|&b| b != 0).unwrap_or(bytes.len());
    bytes[first..].to_vec()
}

/// Decodes an unsigned LEB128 value from the front of `bytes`.
fn decode_varint(bytes: &[u8]) -> Option<u64> {
    let mut value = 0u64;
    for (i, &byte) in bytes.iter().take(VARINT_MAX_BYTES).enumerate() {
        value |= u64::from(byte & !VARINT_MSB) << (7 * i);
        if byte & VARINT_MSB == 0 {
            return Some(value);
        }
    }
    None
}

fn normalize_bytes(bytes: &[u8]) -> Option<Vec<u8>> {
    if bytes.len() > BYTES {
        return decode_varint(bytes).map(number_bytes);
    }
    Some(bytes.to_vec())
}

impl IdSource for [u8] {
    fn normalize(&self) -> Option<Vec<u8>> {
        normalize_bytes(self)
    }
}

impl<const N: usize> IdSource for [u8; N] {
    fn normalize(&self) -> Option<Vec<u8>> {
        normalize_bytes(self)
    }
}

impl IdSource for Vec<u8> {
    fn normalize(&self) -> Option<Vec<u8>> {
        normalize_bytes(self)
    }
}

impl IdSource for str {
    fn normalize(&self) -> Option<Vec<u8>> {
        normalize_bytes(self.as_bytes())
    }
}

impl IdSource for String {
    fn normalize(&self) -> Option<Vec<u8>> {
        normalize_bytes(self.as_bytes())
    }
}

impl IdSource for u32 {
    fn normalize(&self) -> Option<Vec<u8>> {
        Some(number_bytes(u64::from(*self)))
    }
}

impl IdSource for u64 {
    fn normalize(&self) -> Option<Vec<u8>> {
        normalize_bytes(&number_bytes(*self))
    }
}

impl IdSource for Identifier {
    fn normalize(&self) -> Option<Vec<u8>> {
        Some(self.0.to_vec())
    }
}

impl<T: IdSource + ?Sized> IdSource for &T {
    fn normalize(&self) -> Option<Vec<u8>> {
        (**self).normalize()
    }
}

impl<T: IdSource> IdSource for Option<T> {
    fn normalize(&self) -> Option<Vec<u8>> {
        self.as_ref().and_then(IdSource::normalize)
    }
}

impl From<&str> for Identifier {
    fn from(value: &str) -> Self {
        Self::from_value(value)
    }
}

impl From<String> for Identifier {
    fn from(value: String) -> Self {
        Self::from_value(&value)
    }
}

impl From<&[u8]> for Identifier {
    fn from(value: &[u8]) -> Self {
        Self::from_value(value)
    }
}

impl From<[u8; BYTES]> for Identifier {
    fn from(value: [u8; BYTES]) -> Self {
        Self::from_value(&value)
    }
}

impl From<&[u8; BYTES]> for Identifier {
    fn from(value: &[u8; BYTES]) -> Self {
        Self::from_value(value)
    }
}

impl From<Vec<u8>> for Identifier {
    fn from(value: Vec<u8>) -> Self {
        Self::from_value(&value)
    }
}

impl From<u32> for Identifier {
    fn from(value: u32) -> Self {
        Self::from_value(&value)
    }
}

impl From<u64> for Identifier {
    fn from(value: u64) -> Self {
        Self::from_value(&value)
    }
}

impl AsRef<[u8]> for Identifier {
    fn as_ref(&self) -> &[u8] {
        &self.0
    }
}

impl PartialEq<&str> for Identifier {
    fn eq(&self, other: &&str) -> bool {
        self.0.as_slice() == other.as_bytes()
    }
}

impl PartialEq<[u8; BYTES]> for Identifier {
    fn eq(&self, other: &[u8; BYTES]) -> bool {
        &self.0 == other
    }
}

impl fmt::Display for Identifier {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&String::from_utf8_lossy(&self.0))
    }
}

impl fmt::Debug for Identifier {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "Identifier({:?})", self.to_string())
    }
}

/// Encode a given tag value as an [`Identifier`].
pub fn encode<T: IdSource + ?Sized>(value: &T) -> Identifier {
    Identifier::from_value(value)
}

/// Decode an [`Identifier`] into its tag string.
pub fn decode(id: &Identifier) -> String {
    id.to_string()
}

pub fn encoding_length() -> usize {
    BYTES
}

#[cfg(test)]
mod tests {
    use super::*;

    fn encode_varint(mut value: u64) -> Vec<u8> {
        let mut out = Vec::new();
        loop {
            let byte = (value & 0x7f) as u8;
            value >>= 7;
            if value == 0 {
                out.push(byte);
                return out;
            }
            out.push(byte | VARINT_MSB);
        }
    }

    #[test]
    fn test_alloc_is_empty() {
        let id = Identifier::alloc();
        assert_eq!(id.as_bytes(), &[0, 0, 0, 0]);
        assert!(id.is_empty());
        assert!(!id.is_valid());
        assert_eq!(Identifier::BYTES, 4);
        assert_eq!(encoding_length(), 4);
    }

    #[test]
    fn test_from_string_and_number() {
        let id = Identifier::from("FORM");
        assert_eq!(id.as_bytes(), b"FORM");
        assert!(id.is_valid());

        let id = Identifier::from(0x464f524du32);
        assert_eq!(id.as_bytes(), b"FORM");
        assert!(id.is_valid());

        let id = Identifier::from(0u32);
        assert_eq!(id, Identifier::EMPTY);
        assert!(!id.is_valid());

        let id = Identifier::from_value(&None::<&str>);
        assert_eq!(id, Identifier::EMPTY);
        assert!(!id.is_valid());
    }

    #[test]
    fn test_from_varint_bytes() {
        let bytes = encode_varint(u64::from(u32::from_be_bytes(*b"form")));
        assert!(bytes.len() > BYTES);
        assert!(Identifier::validate(&bytes));
        assert_eq!(Identifier::from(bytes), "form");

        // eight ASCII zeros decode as a one byte varint
        assert_eq!(Identifier::from("00000000"), Identifier::EMPTY);
    }

    #[test]
    fn test_validate_table() {
        assert!(!Identifier::validate(&0u32));
        assert!(!Identifier::validate(&None::<&str>));
        assert!(!Identifier::validate(&[0u8; 0]));
        assert!(!Identifier::validate(&[0u8, 0, 0]));
        assert!(!Identifier::validate(&[0u8, 0x20 - 1, 0x20, 0x21]));
        assert!(!Identifier::validate(&[0u8, 0x20, 0x20, 0x7e + 1]));
        assert!(!Identifier::validate(""));
        assert!(!Identifier::validate("foo"));
        assert!(!Identifier::validate(" foo"));
        assert!(!Identifier::validate(&[0u8; 3]));

        assert!(Identifier::validate(&[0u8; 4]));
        assert!(Identifier::validate("form"));
        assert!(Identifier::validate("foo "));
        assert!(Identifier::validate(&Identifier::from("form")));
        assert!(Identifier::validate(&0x666f726du32));
    }

    #[test]
    fn test_all_zero_validates_but_is_not_valid() {
        assert!(Identifier::validate(&[0u8; 4]));
        assert!(!Identifier::from([0u8; 4]).is_valid());
    }

    #[test]
    fn test_set_keeps_old_value_on_failure() {
        let mut id = Identifier::from("FORM");
        assert!(!id.set(" bad"));
        assert_eq!(id, "FORM");
        assert!(id.set("LIST"));
        assert_eq!(id, "LIST");
    }

    #[test]
    fn test_key_trims_padding() {
        assert_eq!(Identifier::from("CAT ").key(), "CAT");
        assert_eq!(Identifier::from("CAT ").to_string(), "CAT ");
    }

    #[test]
    fn test_encode_decode() {
        let id = encode("FORM");
        assert_eq!(id.to_bytes(), *b"FORM");
        assert_eq!(decode(&id), "FORM");
    }
}
