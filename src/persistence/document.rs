use std::collections::BTreeMap;
use std::io::{Read, Write};

use flate2::read::GzDecoder;
use flate2::write::GzEncoder;
use flate2::Compression;
use serde::{Deserialize, Serialize};

use crate::persistence::{corrupted, PersistenceError, PersistenceResult};

/// Magic bytes identifying a region document.
const DOC_MAGIC: &[u8; 4] = b"SREG";

/// Version of the document envelope.
const DOC_FORMAT_VERSION: u32 = 1;

/// Envelope header length: magic + version + checksum.
const HEADER_LEN: usize = 4 + 4 + 4;

/// One entry of a [`Document`].
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub enum Value {
    Bool(bool),
    I32(i32),
    I64(i64),
    Str(String),
    /// Raw bytes (light rows and other byte tables).
    Bytes(Vec<u8>),
    /// Dense u16 rows (tile and wall id tables).
    U16Row(Vec<u16>),
    List(Vec<Value>),
    Map(Document),
}

/// A tagged binary document: an ordered mapping from string keys to values.
///
/// Keys are kept sorted so that serialising the same logical content always
/// produces the same bytes; together with the fixed compression level this
/// makes quiescent saves byte-identical.
#[derive(Debug, Clone, PartialEq, Default, Serialize, Deserialize)]
pub struct Document {
    entries: BTreeMap<String, Value>,
}

impl Document {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn put(&mut self, key: &str, value: Value) {
        self.entries.insert(key.to_owned(), value);
    }

    pub fn put_bool(&mut self, key: &str, v: bool) {
        self.put(key, Value::Bool(v));
    }

    pub fn put_i32(&mut self, key: &str, v: i32) {
        self.put(key, Value::I32(v));
    }

    pub fn put_i64(&mut self, key: &str, v: i64) {
        self.put(key, Value::I64(v));
    }

    pub fn put_str(&mut self, key: &str, v: impl Into<String>) {
        self.put(key, Value::Str(v.into()));
    }

    pub fn put_bytes(&mut self, key: &str, v: Vec<u8>) {
        self.put(key, Value::Bytes(v));
    }

    pub fn put_u16_row(&mut self, key: &str, v: Vec<u16>) {
        self.put(key, Value::U16Row(v));
    }

    pub fn put_list(&mut self, key: &str, v: Vec<Value>) {
        self.put(key, Value::List(v));
    }

    pub fn put_map(&mut self, key: &str, v: Document) {
        self.put(key, Value::Map(v));
    }

    pub fn get(&self, key: &str) -> Option<&Value> {
        self.entries.get(key)
    }

    pub fn opt_bool(&self, key: &str) -> Option<bool> {
        match self.get(key) {
            Some(Value::Bool(v)) => Some(*v),
            _ => None,
        }
    }

    pub fn opt_i32(&self, key: &str) -> Option<i32> {
        match self.get(key) {
            Some(Value::I32(v)) => Some(*v),
            _ => None,
        }
    }

    pub fn opt_i64(&self, key: &str) -> Option<i64> {
        match self.get(key) {
            Some(Value::I64(v)) => Some(*v),
            _ => None,
        }
    }

    pub fn opt_str(&self, key: &str) -> Option<&str> {
        match self.get(key) {
            Some(Value::Str(v)) => Some(v),
            _ => None,
        }
    }

    pub fn get_bool(&self, key: &str) -> PersistenceResult<bool> {
        self.opt_bool(key)
            .ok_or_else(|| corrupted(format!("missing bool entry '{}'", key)))
    }

    pub fn get_i32(&self, key: &str) -> PersistenceResult<i32> {
        self.opt_i32(key)
            .ok_or_else(|| corrupted(format!("missing int entry '{}'", key)))
    }

    pub fn get_str(&self, key: &str) -> PersistenceResult<&str> {
        self.opt_str(key)
            .ok_or_else(|| corrupted(format!("missing string entry '{}'", key)))
    }

    pub fn get_bytes(&self, key: &str) -> PersistenceResult<&[u8]> {
        match self.get(key) {
            Some(Value::Bytes(v)) => Ok(v),
            _ => Err(corrupted(format!("missing byte entry '{}'", key))),
        }
    }

    pub fn get_u16_row(&self, key: &str) -> PersistenceResult<&[u16]> {
        match self.get(key) {
            Some(Value::U16Row(v)) => Ok(v),
            _ => Err(corrupted(format!("missing u16 row entry '{}'", key))),
        }
    }

    pub fn get_list(&self, key: &str) -> PersistenceResult<&[Value]> {
        match self.get(key) {
            Some(Value::List(v)) => Ok(v),
            _ => Err(corrupted(format!("missing list entry '{}'", key))),
        }
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    /// Serialises the document into its gzip-compressed on-disk form:
    /// magic, version and payload checksum, then the bincode payload.
    pub fn encode(&self) -> PersistenceResult<Vec<u8>> {
        let payload = bincode::serialize(self)?;
        let checksum = {
            let mut hasher = crc32fast::Hasher::new();
            hasher.update(&payload);
            hasher.finalize()
        };

        let mut body = Vec::with_capacity(HEADER_LEN + payload.len());
        body.extend_from_slice(DOC_MAGIC);
        body.extend_from_slice(&DOC_FORMAT_VERSION.to_le_bytes());
        body.extend_from_slice(&checksum.to_le_bytes());
        body.extend_from_slice(&payload);

        let mut encoder = GzEncoder::new(Vec::new(), Compression::default());
        encoder
            .write_all(&body)
            .map_err(|e| PersistenceError::Compression(format!("gzip write failed: {}", e)))?;
        encoder
            .finish()
            .map_err(|e| PersistenceError::Compression(format!("gzip finish failed: {}", e)))
    }

    /// Reverses [`Self::encode`], validating the envelope.
    pub fn decode(data: &[u8]) -> PersistenceResult<Self> {
        let mut decoder = GzDecoder::new(data);
        let mut body = Vec::new();
        decoder
            .read_to_end(&mut body)
            .map_err(|e| PersistenceError::Compression(format!("gzip read failed: {}", e)))?;

        if body.len() < HEADER_LEN {
            return Err(corrupted("document shorter than its header"));
        }
        if &body[0..4] != DOC_MAGIC {
            return Err(corrupted("bad document magic"));
        }
        let version = u32::from_le_bytes([body[4], body[5], body[6], body[7]]);
        if version != DOC_FORMAT_VERSION {
            return Err(PersistenceError::VersionMismatch {
                expected: DOC_FORMAT_VERSION,
                found: version,
            });
        }
        let stored_checksum = u32::from_le_bytes([body[8], body[9], body[10], body[11]]);
        let payload = &body[HEADER_LEN..];
        let checksum = {
            let mut hasher = crc32fast::Hasher::new();
            hasher.update(payload);
            hasher.finalize()
        };
        if checksum != stored_checksum {
            return Err(corrupted("document checksum mismatch"));
        }

        bincode::deserialize(payload)
            .map_err(|e| PersistenceError::Deserialization(e.to_string()))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn sample() -> Document {
        let mut doc = Document::new();
        doc.put_bool("generated", true);
        doc.put_i32("answer", -42);
        doc.put_str("name", "glow_pocket");
        doc.put_u16_row("tiles", vec![0, 1, 2, 65535]);
        doc.put_bytes("light", vec![15; 8]);
        let mut nested = Document::new();
        nested.put_i64("age", 1 << 40);
        doc.put_map("meta", nested);
        doc.put_list(
            "list",
            vec![Value::I32(1), Value::Str("two".into()), Value::Bool(false)],
        );
        doc
    }

    #[test]
    fn encode_decode_roundtrip() {
        let doc = sample();
        let bytes = doc.encode().expect("encode should succeed");
        let decoded = Document::decode(&bytes).expect("decode should succeed");
        assert_eq!(doc, decoded);
        assert_eq!(decoded.get_bool("generated").expect("bool present"), true);
        assert_eq!(decoded.get_u16_row("tiles").expect("row present")[3], 65535);
    }

    #[test]
    fn encoding_is_deterministic() {
        // Key order is canonical, so equal content gives equal bytes.
        let mut a = Document::new();
        a.put_bool("b", true);
        a.put_i32("a", 1);
        let mut b = Document::new();
        b.put_i32("a", 1);
        b.put_bool("b", true);
        assert_eq!(
            a.encode().expect("encode a"),
            b.encode().expect("encode b")
        );
    }

    #[test]
    fn bad_magic_is_rejected() {
        let doc = sample();
        let bytes = doc.encode().expect("encode should succeed");
        let mut body = {
            let mut decoder = GzDecoder::new(&bytes[..]);
            let mut body = Vec::new();
            decoder.read_to_end(&mut body).expect("gzip read");
            body
        };
        body[0..4].copy_from_slice(b"FAKE");
        let mut encoder = GzEncoder::new(Vec::new(), Compression::default());
        encoder.write_all(&body).expect("gzip write");
        let tampered = encoder.finish().expect("gzip finish");

        match Document::decode(&tampered) {
            Err(PersistenceError::CorruptedData(msg)) => {
                assert!(msg.contains("magic"));
            }
            other => panic!("expected CorruptedData, got {:?}", other.map(|_| ())),
        }
    }

    #[test]
    fn checksum_mismatch_is_rejected() {
        let doc = sample();
        let bytes = doc.encode().expect("encode should succeed");
        let mut body = {
            let mut decoder = GzDecoder::new(&bytes[..]);
            let mut body = Vec::new();
            decoder.read_to_end(&mut body).expect("gzip read");
            body
        };
        let last = body.len() - 1;
        body[last] = body[last].wrapping_add(1);
        let mut encoder = GzEncoder::new(Vec::new(), Compression::default());
        encoder.write_all(&body).expect("gzip write");
        let tampered = encoder.finish().expect("gzip finish");

        match Document::decode(&tampered) {
            Err(PersistenceError::CorruptedData(msg)) => {
                assert!(msg.contains("checksum"));
            }
            other => panic!("expected CorruptedData, got {:?}", other.map(|_| ())),
        }
    }

    #[test]
    fn version_mismatch_is_reported() {
        let doc = sample();
        let bytes = doc.encode().expect("encode should succeed");
        let mut body = {
            let mut decoder = GzDecoder::new(&bytes[..]);
            let mut body = Vec::new();
            decoder.read_to_end(&mut body).expect("gzip read");
            body
        };
        body[4..8].copy_from_slice(&99u32.to_le_bytes());
        let mut encoder = GzEncoder::new(Vec::new(), Compression::default());
        encoder.write_all(&body).expect("gzip write");
        let tampered = encoder.finish().expect("gzip finish");

        match Document::decode(&tampered) {
            Err(PersistenceError::VersionMismatch { expected, found }) => {
                assert_eq!(expected, DOC_FORMAT_VERSION);
                assert_eq!(found, 99);
            }
            other => panic!("expected VersionMismatch, got {:?}", other.map(|_| ())),
        }
    }

    #[test]
    fn garbage_is_not_gzip() {
        assert!(matches!(
            Document::decode(&[1, 2, 3, 4]),
            Err(PersistenceError::Compression(_))
        ));
    }
}
