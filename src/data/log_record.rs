//! The on-disk record format: `CRC32(4) || Type(1) || VarInt(keyLen) ||
//! VarInt(valueLen) || Key || Value`, plus the `Position` triple that locates
//! one such record within the data files.

use super::varint::{get_varint, put_varint, MAX_VARINT_LEN32};
use crate::error::{Error, Result};

/// `4` (CRC) `+ 1` (type) `+` two 32-bit varints, the widest a header can be.
pub const MAX_LOG_RECORD_HEADER_SIZE: usize = 4 + 1 + MAX_VARINT_LEN32 * 2;

/// What role a record plays in the log.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum LogRecordType {
    /// A live put.
    Normal = 1,
    /// A delete marker.
    Tombstone = 2,
    /// Terminal marker committing a write batch.
    BatchFinalizer = 3,
}

impl LogRecordType {
    fn from_byte(b: u8) -> Option<Self> {
        match b {
            1 => Some(Self::Normal),
            2 => Some(Self::Tombstone),
            3 => Some(Self::BatchFinalizer),
            _ => None,
        }
    }
}

/// A decoded record: the raw on-disk key (sequence-number prefix still
/// attached — see [`crate::batch`]) and value.
#[derive(Debug, Clone)]
pub struct LogRecord {
    pub key: Vec<u8>,
    pub value: Vec<u8>,
    pub rec_type: LogRecordType,
}

impl LogRecord {
    /// Encodes this record, returning the bytes and their length.
    pub fn encode(&self) -> (Vec<u8>, usize) {
        let mut header = Vec::with_capacity(MAX_LOG_RECORD_HEADER_SIZE);
        header.extend_from_slice(&[0u8; 4]); // CRC placeholder
        header.push(self.rec_type as u8);
        put_varint(&mut header, self.key.len() as i64);
        put_varint(&mut header, self.value.len() as i64);

        let mut buf = header;
        buf.extend_from_slice(&self.key);
        buf.extend_from_slice(&self.value);

        let crc = crc32fast::hash(&buf[4..]);
        buf[0..4].copy_from_slice(&crc.to_le_bytes());

        let len = buf.len();
        (buf, len)
    }
}

/// A decoded header plus the number of header bytes it was parsed from.
pub struct LogRecordHeader {
    pub crc: u32,
    pub rec_type: LogRecordType,
    pub key_len: usize,
    pub value_len: usize,
}

/// Decodes a record header from the front of `buf`. Returns `None` if `buf`
/// is too short to even hold a CRC, mirroring the source's `nil` header.
pub fn decode_log_record_header(buf: &[u8]) -> Option<(LogRecordHeader, usize)> {
    if buf.len() <= 4 {
        return None;
    }
    let crc = u32::from_le_bytes(buf[0..4].try_into().unwrap());
    let rec_type_byte = buf[4];
    let (key_len, n1) = get_varint(&buf[5..])?;
    let (value_len, n2) = get_varint(&buf[5 + n1..])?;

    // An all-zero header (crc/type/lengths) is the sentinel for "nothing
    // written here yet", not a type we recognize.
    if crc == 0 && rec_type_byte == 0 && key_len == 0 && value_len == 0 {
        return Some((
            LogRecordHeader { crc: 0, rec_type: LogRecordType::Normal, key_len: 0, value_len: 0 },
            5 + n1 + n2,
        ));
    }

    let rec_type = LogRecordType::from_byte(rec_type_byte)?;
    Some((
        LogRecordHeader { crc, rec_type, key_len: key_len as usize, value_len: value_len as usize },
        5 + n1 + n2,
    ))
}

/// Recomputes the CRC a record's bytes should carry, given its header (minus
/// the CRC field itself) and its key/value payload.
pub fn log_record_crc(header_without_crc: &[u8], key: &[u8], value: &[u8]) -> u32 {
    let mut hasher = crc32fast::Hasher::new();
    hasher.update(header_without_crc);
    hasher.update(key);
    hasher.update(value);
    hasher.finalize()
}

/// (file id, offset, size) locating one record on disk.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Position {
    pub file_id: u32,
    pub offset: u64,
    pub size: u64,
}

impl Position {
    /// `VarInt(fid) || VarInt(offset) || VarInt(size)`, used as the value of
    /// a hint record and as the value stored in the persistent B+-tree
    /// index.
    pub fn encode(&self) -> Vec<u8> {
        let mut buf = Vec::with_capacity(30);
        put_varint(&mut buf, self.file_id as i64);
        put_varint(&mut buf, self.offset as i64);
        put_varint(&mut buf, self.size as i64);
        buf
    }

    pub fn decode(buf: &[u8]) -> Result<Self> {
        let (file_id, n1) = get_varint(buf).ok_or(Error::IndexUpdateFailed)?;
        let (offset, n2) = get_varint(&buf[n1..]).ok_or(Error::IndexUpdateFailed)?;
        let (size, _) = get_varint(&buf[n1 + n2..]).ok_or(Error::IndexUpdateFailed)?;
        Ok(Self { file_id: file_id as u32, offset: offset as u64, size: size as u64 })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn encode_decode_round_trip() {
        let record = LogRecord {
            key: b"name".to_vec(),
            value: b"enophan".to_vec(),
            rec_type: LogRecordType::Normal,
        };
        let (buf, size) = record.encode();
        assert_eq!(buf.len(), size);

        let (header, header_len) = decode_log_record_header(&buf).unwrap();
        assert_eq!(header.key_len, 4);
        assert_eq!(header.value_len, 7);
        assert_eq!(header.rec_type, LogRecordType::Normal);

        let key = &buf[header_len..header_len + header.key_len];
        let value = &buf[header_len + header.key_len..header_len + header.key_len + header.value_len];
        assert_eq!(key, b"name");
        assert_eq!(value, b"enophan");

        let crc = log_record_crc(&buf[4..header_len], key, value);
        assert_eq!(crc, header.crc);
    }

    #[test]
    fn tombstone_has_empty_value() {
        let record =
            LogRecord { key: b"k".to_vec(), value: Vec::new(), rec_type: LogRecordType::Tombstone };
        let (buf, _) = record.encode();
        let (header, _) = decode_log_record_header(&buf).unwrap();
        assert_eq!(header.value_len, 0);
        assert_eq!(header.rec_type, LogRecordType::Tombstone);
    }

    #[test]
    fn position_round_trips_through_encoding() {
        let pos = Position { file_id: 7, offset: 12345, size: 42 };
        let decoded = Position::decode(&pos.encode()).unwrap();
        assert_eq!(pos, decoded);
    }

    #[test]
    fn flipped_value_byte_mismatches_crc() {
        let record =
            LogRecord { key: b"k".to_vec(), value: b"v".to_vec(), rec_type: LogRecordType::Normal };
        let (mut buf, _) = record.encode();
        let last = buf.len() - 1;
        buf[last] ^= 0xff; // corrupt the value byte, well after the CRC field

        let (header, header_len) = decode_log_record_header(&buf).unwrap();
        let key = &buf[header_len..header_len + header.key_len];
        let value = &buf[header_len + header.key_len..header_len + header.key_len + header.value_len];
        let crc = log_record_crc(&buf[4..header_len], key, value);
        assert_ne!(crc, header.crc);
    }
}
