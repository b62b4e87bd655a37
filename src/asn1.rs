// BER element handling for LDAP v3.
// Only definite-length, single-byte-tag encodings are accepted; that covers
// everything LDAP clients and servers actually put on the wire.

use thiserror::Error;

/// Universal BOOLEAN type tag.
pub const BOOLEAN_TYPE: u8 = 0x01;
/// Universal INTEGER type tag.
pub const INTEGER_TYPE: u8 = 0x02;
/// Universal OCTET STRING type tag.
pub const OCTET_STRING_TYPE: u8 = 0x04;
/// Universal NULL type tag.
pub const NULL_TYPE: u8 = 0x05;
/// Universal ENUMERATED type tag.
pub const ENUMERATED_TYPE: u8 = 0x0A;
/// Universal SEQUENCE OF type tag.
pub const SEQUENCE_TYPE: u8 = 0x30;
/// Universal SET OF type tag.
pub const SET_TYPE: u8 = 0x31;

/// BER boolean TRUE value byte.
const BOOLEAN_TRUE: u8 = 0xFF;

/// Errors raised while decoding BER data or the LDAP structures built on it.
#[derive(Debug, Error)]
pub enum BerError {
    #[error("truncated input: {0}")]
    TruncatedInput(&'static str),

    #[error("malformed tag or length: {0}")]
    MalformedTagOrLength(String),

    #[error("unexpected element count: expected {expected}, got {got}")]
    UnexpectedElementCount { expected: &'static str, got: usize },

    #[error("unrecognized tag or OID: {0}")]
    UnrecognizedTagOrOid(String),

    #[error("value out of range: {0}")]
    ValueOutOfRange(String),

    #[error("cannot decode {context}: {source}")]
    Protocol {
        context: &'static str,
        #[source]
        source: Box<BerError>,
    },
}

impl BerError {
    /// Wrap this error with the protocol structure being decoded when it occurred.
    pub fn in_context(self, context: &'static str) -> BerError {
        BerError::Protocol {
            context,
            source: Box::new(self),
        }
    }
}

/// A single BER element: one tag byte, a definite length, and the raw value.
/// Constructed types hold their encoded children in `value` and expose them
/// through [`Element::as_elements`]. The original tag byte is always kept so
/// re-encoding reproduces the input exactly.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Element {
    pub tag: u8,
    pub value: Vec<u8>,
}

impl Element {
    pub fn new(tag: u8, value: Vec<u8>) -> Self {
        Self { tag, value }
    }

    pub fn boolean(value: bool) -> Self {
        Self::new(BOOLEAN_TYPE, vec![if value { BOOLEAN_TRUE } else { 0x00 }])
    }

    pub fn integer(value: i32) -> Self {
        Self::new(INTEGER_TYPE, encode_integer_value(value))
    }

    pub fn enumerated(value: i32) -> Self {
        Self::new(ENUMERATED_TYPE, encode_integer_value(value))
    }

    pub fn octet_string(value: impl Into<Vec<u8>>) -> Self {
        Self::new(OCTET_STRING_TYPE, value.into())
    }

    /// Octet string with a non-default tag (context-specific [0] IMPLICIT etc.).
    pub fn octet_string_with_tag(tag: u8, value: impl Into<Vec<u8>>) -> Self {
        Self::new(tag, value.into())
    }

    pub fn null() -> Self {
        Self::new(NULL_TYPE, Vec::new())
    }

    pub fn sequence(elements: Vec<Element>) -> Self {
        Self::container(SEQUENCE_TYPE, elements)
    }

    pub fn set(elements: Vec<Element>) -> Self {
        Self::container(SET_TYPE, elements)
    }

    /// Constructed element with an explicit tag whose value is the
    /// concatenation of the encoded children, in the given order.
    pub fn container(tag: u8, elements: Vec<Element>) -> Self {
        let mut value = Vec::new();
        for element in elements {
            value.extend_from_slice(&element.encode());
        }
        Self::new(tag, value)
    }

    /// Encode to tag + length + value bytes.
    pub fn encode(&self) -> Vec<u8> {
        let mut buf = Vec::with_capacity(self.value.len() + 6);
        buf.push(self.tag);
        encode_length_into(self.value.len(), &mut buf);
        buf.extend_from_slice(&self.value);
        buf
    }

    /// Decode exactly one element from the buffer. Trailing bytes are an error.
    pub fn decode(bytes: &[u8]) -> Result<Element, BerError> {
        let mut pos = 0usize;
        let element = read_element(bytes, &mut pos)?;
        if pos != bytes.len() {
            return Err(BerError::MalformedTagOrLength(format!(
                "{} trailing bytes after element",
                bytes.len() - pos
            )));
        }
        Ok(element)
    }

    /// Decode the value as a run of child elements, preserving source order.
    pub fn as_elements(&self) -> Result<Vec<Element>, BerError> {
        let mut elements = Vec::new();
        let mut pos = 0usize;
        while pos < self.value.len() {
            elements.push(read_element(&self.value, &mut pos)?);
        }
        Ok(elements)
    }

    pub fn as_boolean(&self) -> Result<bool, BerError> {
        if self.value.len() != 1 {
            return Err(BerError::ValueOutOfRange(format!(
                "boolean value must be 1 byte, got {}",
                self.value.len()
            )));
        }
        Ok(self.value[0] != 0)
    }

    pub fn as_integer(&self) -> Result<i32, BerError> {
        if self.value.is_empty() || self.value.len() > 4 {
            return Err(BerError::ValueOutOfRange(format!(
                "integer value must be 1 to 4 bytes, got {}",
                self.value.len()
            )));
        }
        let mut value: i32 = if (self.value[0] & 0x80) != 0 { -1 } else { 0 };
        for &byte in &self.value {
            value = (value << 8) | (byte as i32);
        }
        Ok(value)
    }

    pub fn as_enumerated(&self) -> Result<i32, BerError> {
        self.as_integer()
    }

    /// Value as text. Non-UTF-8 bytes are replaced rather than rejected so
    /// that display of arbitrary binary values never fails.
    pub fn as_text(&self) -> String {
        String::from_utf8_lossy(&self.value).into_owned()
    }
}

/// Minimal two's-complement encoding of an integer value.
fn encode_integer_value(value: i32) -> Vec<u8> {
    let bytes = value.to_be_bytes();
    let mut start = 0usize;
    while start < 3 {
        let drop = (bytes[start] == 0x00 && (bytes[start + 1] & 0x80) == 0)
            || (bytes[start] == 0xFF && (bytes[start + 1] & 0x80) != 0);
        if !drop {
            break;
        }
        start += 1;
    }
    bytes[start..].to_vec()
}

fn encode_length_into(length: usize, buf: &mut Vec<u8>) {
    if length < 128 {
        buf.push(length as u8);
        return;
    }
    let bytes = (length as u32).to_be_bytes();
    let skip = bytes.iter().take_while(|&&b| b == 0).count();
    buf.push(0x80 | (4 - skip) as u8);
    buf.extend_from_slice(&bytes[skip..]);
}

/// Read one element starting at `pos`, advancing `pos` past it.
fn read_element(bytes: &[u8], pos: &mut usize) -> Result<Element, BerError> {
    if bytes.len() - *pos < 2 {
        return Err(BerError::TruncatedInput("element header"));
    }
    let tag = bytes[*pos];
    if (tag & 0x1F) == 0x1F {
        return Err(BerError::MalformedTagOrLength(format!(
            "multi-byte tag 0x{:02X} not supported",
            tag
        )));
    }
    *pos += 1;
    let length = read_length(bytes, pos)?;
    if bytes.len() - *pos < length {
        return Err(BerError::TruncatedInput("element value"));
    }
    let value = bytes[*pos..*pos + length].to_vec();
    *pos += length;
    Ok(Element::new(tag, value))
}

fn read_length(bytes: &[u8], pos: &mut usize) -> Result<usize, BerError> {
    let first = bytes[*pos];
    *pos += 1;
    if (first & 0x80) == 0 {
        return Ok(first as usize);
    }
    let length_bytes = (first & 0x7F) as usize;
    if length_bytes == 0 {
        return Err(BerError::MalformedTagOrLength(
            "indefinite length not supported".to_string(),
        ));
    }
    if length_bytes > 4 {
        return Err(BerError::MalformedTagOrLength(format!(
            "length encoding uses {} bytes",
            length_bytes
        )));
    }
    if bytes.len() - *pos < length_bytes {
        return Err(BerError::TruncatedInput("length bytes"));
    }
    let mut length = 0usize;
    for _ in 0..length_bytes {
        length = (length << 8) | bytes[*pos] as usize;
        *pos += 1;
    }
    Ok(length)
}

/// Total encoded size of the element at the start of the buffer, or None if
/// more bytes are needed to tell. Used for framing reads from a socket.
pub fn measure_element(bytes: &[u8]) -> Result<Option<usize>, BerError> {
    if bytes.len() < 2 {
        return Ok(None);
    }
    let tag = bytes[0];
    if (tag & 0x1F) == 0x1F {
        return Err(BerError::MalformedTagOrLength(format!(
            "multi-byte tag 0x{:02X} not supported",
            tag
        )));
    }
    let first = bytes[1];
    if (first & 0x80) == 0 {
        return Ok(Some(2 + first as usize));
    }
    let length_bytes = (first & 0x7F) as usize;
    if length_bytes == 0 {
        return Err(BerError::MalformedTagOrLength(
            "indefinite length not supported".to_string(),
        ));
    }
    if length_bytes > 4 {
        return Err(BerError::MalformedTagOrLength(format!(
            "length encoding uses {} bytes",
            length_bytes
        )));
    }
    if bytes.len() < 2 + length_bytes {
        return Ok(None);
    }
    let mut length = 0usize;
    for i in 0..length_bytes {
        length = (length << 8) | bytes[2 + i] as usize;
    }
    Ok(Some(2 + length_bytes + length))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_encode_boolean() {
        assert_eq!(Element::boolean(true).encode(), vec![0x01, 0x01, 0xFF]);
        assert_eq!(Element::boolean(false).encode(), vec![0x01, 0x01, 0x00]);
    }

    #[test]
    fn test_encode_integer_minimal() {
        assert_eq!(Element::integer(0).encode(), vec![0x02, 0x01, 0x00]);
        assert_eq!(Element::integer(127).encode(), vec![0x02, 0x01, 0x7F]);
        // 128 needs a leading zero byte to stay positive
        assert_eq!(Element::integer(128).encode(), vec![0x02, 0x02, 0x00, 0x80]);
        assert_eq!(Element::integer(-1).encode(), vec![0x02, 0x01, 0xFF]);
        assert_eq!(Element::integer(-129).encode(), vec![0x02, 0x02, 0xFF, 0x7F]);
        assert_eq!(
            Element::integer(65536).encode(),
            vec![0x02, 0x03, 0x01, 0x00, 0x00]
        );
    }

    #[test]
    fn test_integer_round_trip() {
        for value in [0, 1, -1, 127, 128, -128, -129, 32767, -32768, i32::MAX, i32::MIN] {
            let encoded = Element::integer(value).encode();
            let decoded = Element::decode(&encoded).unwrap();
            assert_eq!(decoded.as_integer().unwrap(), value, "value {}", value);
        }
    }

    #[test]
    fn test_decode_sign_extension() {
        let element = Element::new(INTEGER_TYPE, vec![0xFF]);
        assert_eq!(element.as_integer().unwrap(), -1);
        let element = Element::new(INTEGER_TYPE, vec![0x80, 0x00]);
        assert_eq!(element.as_integer().unwrap(), -32768);
    }

    #[test]
    fn test_octet_string_round_trip() {
        let data = b"dc=example,dc=com".to_vec();
        let encoded = Element::octet_string(data.clone()).encode();
        let decoded = Element::decode(&encoded).unwrap();
        assert_eq!(decoded.tag, OCTET_STRING_TYPE);
        assert_eq!(decoded.value, data);
    }

    #[test]
    fn test_context_tag_preserved() {
        // Simple bind password uses context tag 0x80
        let encoded = Element::octet_string_with_tag(0x80, b"secret".to_vec()).encode();
        assert_eq!(encoded[0], 0x80);
        let decoded = Element::decode(&encoded).unwrap();
        assert_eq!(decoded.tag, 0x80);
        assert_eq!(decoded.encode(), encoded);
    }

    #[test]
    fn test_sequence_preserves_child_order() {
        let seq = Element::sequence(vec![
            Element::octet_string(b"b".to_vec()),
            Element::octet_string(b"a".to_vec()),
            Element::integer(5),
        ]);
        let children = Element::decode(&seq.encode()).unwrap().as_elements().unwrap();
        assert_eq!(children.len(), 3);
        assert_eq!(children[0].value, b"b");
        assert_eq!(children[1].value, b"a");
        assert_eq!(children[2].as_integer().unwrap(), 5);
    }

    #[test]
    fn test_set_preserves_source_order() {
        let set = Element::set(vec![
            Element::octet_string(b"zzz".to_vec()),
            Element::octet_string(b"aaa".to_vec()),
        ]);
        let decoded = Element::decode(&set.encode()).unwrap();
        assert_eq!(decoded.tag, SET_TYPE);
        let children = decoded.as_elements().unwrap();
        assert_eq!(children[0].value, b"zzz");
        assert_eq!(children[1].value, b"aaa");
    }

    #[test]
    fn test_long_form_length() {
        let data = vec![0x41u8; 300];
        let encoded = Element::octet_string(data.clone()).encode();
        assert_eq!(&encoded[..4], &[0x04, 0x82, 0x01, 0x2C]);
        let decoded = Element::decode(&encoded).unwrap();
        assert_eq!(decoded.value, data);
    }

    #[test]
    fn test_decode_truncated() {
        assert!(matches!(
            Element::decode(&[0x30]),
            Err(BerError::TruncatedInput(_))
        ));
        assert!(matches!(
            Element::decode(&[0x04, 0x05, 0x61, 0x62]),
            Err(BerError::TruncatedInput(_))
        ));
        // long-form length claims 2 bytes but only 1 present
        assert!(matches!(
            Element::decode(&[0x04, 0x82, 0x01]),
            Err(BerError::TruncatedInput(_))
        ));
    }

    #[test]
    fn test_decode_indefinite_length_rejected() {
        assert!(matches!(
            Element::decode(&[0x30, 0x80, 0x00, 0x00]),
            Err(BerError::MalformedTagOrLength(_))
        ));
    }

    #[test]
    fn test_decode_oversized_length_encoding_rejected() {
        assert!(matches!(
            Element::decode(&[0x04, 0x85, 0x01, 0x01, 0x01, 0x01, 0x01]),
            Err(BerError::MalformedTagOrLength(_))
        ));
    }

    #[test]
    fn test_decode_multibyte_tag_rejected() {
        assert!(matches!(
            Element::decode(&[0x1F, 0x01, 0x00]),
            Err(BerError::MalformedTagOrLength(_))
        ));
    }

    #[test]
    fn test_decode_trailing_bytes_rejected() {
        assert!(Element::decode(&[0x05, 0x00, 0x00]).is_err());
    }

    #[test]
    fn test_as_integer_range() {
        let element = Element::new(INTEGER_TYPE, vec![0x01, 0x02, 0x03, 0x04, 0x05]);
        assert!(matches!(
            element.as_integer(),
            Err(BerError::ValueOutOfRange(_))
        ));
        let element = Element::new(INTEGER_TYPE, vec![]);
        assert!(element.as_integer().is_err());
    }

    #[test]
    fn test_measure_element() {
        assert_eq!(measure_element(&[0x30]).unwrap(), None);
        assert_eq!(measure_element(&[0x30, 0x05]).unwrap(), Some(7));
        assert_eq!(measure_element(&[0x30, 0x82]).unwrap(), None);
        assert_eq!(
            measure_element(&[0x30, 0x82, 0x01, 0x2C]).unwrap(),
            Some(4 + 300)
        );
        assert!(measure_element(&[0x30, 0x80]).is_err());
    }

    #[test]
    fn test_nested_round_trip() {
        let inner = Element::sequence(vec![
            Element::integer(1),
            Element::octet_string(b"cn=Directory Manager".to_vec()),
            Element::octet_string_with_tag(0x80, b"password".to_vec()),
        ]);
        let outer = Element::sequence(vec![Element::integer(1), inner.clone()]);
        let bytes = outer.encode();
        let decoded = Element::decode(&bytes).unwrap();
        assert_eq!(decoded.encode(), bytes);
        let children = decoded.as_elements().unwrap();
        assert_eq!(children.len(), 2);
        assert_eq!(children[1], inner);
    }
}
