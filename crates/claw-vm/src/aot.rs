//! AOT constant records and chunk serialization.
//!
//! Each constant is a 16-byte record: one tag byte, seven pad bytes, an
//! eight-byte payload. Numbers carry the IEEE 754 bit pattern; strings
//! carry an offset into a sibling byte table of NUL-terminated entries,
//! resolved against the string pool at load time.

use std::fmt;

use claw_runtime::bytecode::{Chunk, LineInfo};
use claw_runtime::string_pool::intern;
use claw_runtime::value::Value;

pub const RECORD_SIZE: usize = 16;

const TAG_NIL: u8 = 0;
const TAG_BOOL: u8 = 1;
const TAG_NUMBER: u8 = 2;
const TAG_STRING: u8 = 3;

const CHUNK_MAGIC: [u8; 4] = *b"CLWB";
const CHUNK_VERSION: u32 = 1;

#[derive(Debug, PartialEq, Eq)]
pub enum AotError {
    /// Function and object constants are emitted by the AOT compiler, not
    /// this codec.
    UnsupportedConstant,
    BadTag(u8),
    Truncated,
    BadMagic,
    BadVersion(u32),
    BadStringOffset(u64),
}

impl fmt::Display for AotError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            AotError::UnsupportedConstant => write!(f, "constant kind not encodable"),
            AotError::BadTag(t) => write!(f, "unknown constant tag {}", t),
            AotError::Truncated => write!(f, "truncated input"),
            AotError::BadMagic => write!(f, "bad chunk magic"),
            AotError::BadVersion(v) => write!(f, "unsupported chunk version {}", v),
            AotError::BadStringOffset(o) => write!(f, "string offset {} out of table", o),
        }
    }
}

impl std::error::Error for AotError {}

/// Encode one constant into a record, appending string bytes to `strtab`.
pub fn encode_constant(v: Value, strtab: &mut Vec<u8>) -> Result<[u8; RECORD_SIZE], AotError> {
    let mut record = [0u8; RECORD_SIZE];
    if v.is_nil() {
        record[0] = TAG_NIL;
    } else if v.is_bool() {
        record[0] = TAG_BOOL;
        record[8..16].copy_from_slice(&(v.as_bool() as u64).to_le_bytes());
    } else if v.is_number() {
        record[0] = TAG_NUMBER;
        record[8..16].copy_from_slice(&v.as_number().to_bits().to_le_bytes());
    } else if v.is_string() {
        record[0] = TAG_STRING;
        let offset = strtab.len() as u64;
        strtab.extend_from_slice(v.as_str().as_str().as_bytes());
        strtab.push(0);
        record[8..16].copy_from_slice(&offset.to_le_bytes());
    } else {
        return Err(AotError::UnsupportedConstant);
    }
    Ok(record)
}

/// Decode one record against its string table.
pub fn decode_constant(record: &[u8], strtab: &[u8]) -> Result<Value, AotError> {
    if record.len() < RECORD_SIZE {
        return Err(AotError::Truncated);
    }
    let payload = u64::from_le_bytes(record[8..16].try_into().expect("record payload"));
    match record[0] {
        TAG_NIL => Ok(Value::nil()),
        TAG_BOOL => Ok(Value::boolean(payload != 0)),
        TAG_NUMBER => Ok(Value::number(f64::from_bits(payload))),
        TAG_STRING => {
            let start = payload as usize;
            if start >= strtab.len() {
                return Err(AotError::BadStringOffset(payload));
            }
            let end = strtab[start..]
                .iter()
                .position(|&b| b == 0)
                .map(|i| start + i)
                .ok_or(AotError::BadStringOffset(payload))?;
            let s = std::str::from_utf8(&strtab[start..end])
                .map_err(|_| AotError::BadStringOffset(payload))?;
            Ok(Value::string(intern(s)))
        }
        other => Err(AotError::BadTag(other)),
    }
}

/// Encode a constant pool into (records, string table).
pub fn encode_constants(constants: &[Value]) -> Result<(Vec<u8>, Vec<u8>), AotError> {
    let mut records = Vec::with_capacity(constants.len() * RECORD_SIZE);
    let mut strtab = Vec::new();
    for &c in constants {
        records.extend_from_slice(&encode_constant(c, &mut strtab)?);
    }
    Ok((records, strtab))
}

pub fn decode_constants(records: &[u8], strtab: &[u8]) -> Result<Vec<Value>, AotError> {
    if records.len() % RECORD_SIZE != 0 {
        return Err(AotError::Truncated);
    }
    records
        .chunks(RECORD_SIZE)
        .map(|r| decode_constant(r, strtab))
        .collect()
}

/// Serialize a chunk: magic, version, then length-prefixed code bytes,
/// line table, constant records and string table.
pub fn serialize_chunk(chunk: &Chunk) -> Result<Vec<u8>, AotError> {
    let (records, strtab) = encode_constants(chunk.constants())?;

    let mut out = Vec::new();
    out.extend_from_slice(&CHUNK_MAGIC);
    out.extend_from_slice(&CHUNK_VERSION.to_le_bytes());

    out.extend_from_slice(&(chunk.len() as u32).to_le_bytes());
    out.extend_from_slice(chunk.code());
    for offset in 0..chunk.len() {
        let li = chunk.line_info(offset);
        out.extend_from_slice(&li.line.to_le_bytes());
        out.extend_from_slice(&li.column.to_le_bytes());
    }

    out.extend_from_slice(&((records.len() / RECORD_SIZE) as u32).to_le_bytes());
    out.extend_from_slice(&records);
    out.extend_from_slice(&(strtab.len() as u32).to_le_bytes());
    out.extend_from_slice(&strtab);

    out.extend_from_slice(&chunk.loop_count().to_le_bytes());
    Ok(out)
}

pub fn deserialize_chunk(bytes: &[u8]) -> Result<Chunk, AotError> {
    let mut cursor = Cursor { bytes, pos: 0 };
    if cursor.take(4)? != CHUNK_MAGIC {
        return Err(AotError::BadMagic);
    }
    let version = cursor.read_u32()?;
    if version != CHUNK_VERSION {
        return Err(AotError::BadVersion(version));
    }

    let code_len = cursor.read_u32()? as usize;
    let code = cursor.take(code_len)?.to_vec();
    let mut lines = Vec::with_capacity(code_len);
    for _ in 0..code_len {
        let line = cursor.read_u32()?;
        let column = cursor.read_u32()?;
        lines.push(LineInfo::new(line, column));
    }

    let const_count = cursor.read_u32()? as usize;
    let records = cursor.take(const_count * RECORD_SIZE)?.to_vec();
    let strtab_len = cursor.read_u32()? as usize;
    let strtab = cursor.take(strtab_len)?.to_vec();
    let constants = decode_constants(&records, &strtab)?;

    let loop_count = cursor.read_u32()?;

    let mut chunk = Chunk::new();
    for (byte, li) in code.iter().zip(lines.iter()) {
        chunk.write(*byte, *li);
    }
    for c in constants {
        chunk.add_constant(c);
    }
    chunk.set_loop_count(loop_count);
    Ok(chunk)
}

struct Cursor<'a> {
    bytes: &'a [u8],
    pos: usize,
}

impl<'a> Cursor<'a> {
    fn take(&mut self, n: usize) -> Result<&'a [u8], AotError> {
        if self.pos + n > self.bytes.len() {
            return Err(AotError::Truncated);
        }
        let slice = &self.bytes[self.pos..self.pos + n];
        self.pos += n;
        Ok(slice)
    }

    fn read_u32(&mut self) -> Result<u32, AotError> {
        let b = self.take(4)?;
        Ok(u32::from_le_bytes(b.try_into().expect("u32 slice")))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use claw_runtime::bytecode::OpCode;
    use claw_runtime::value::is_equal;

    #[test]
    fn test_constant_roundtrip() {
        let values = vec![
            Value::nil(),
            Value::boolean(true),
            Value::boolean(false),
            Value::number(3.25),
            Value::number(-0.0),
            Value::string(intern("hello")),
            Value::string(intern("")),
        ];
        let (records, strtab) = encode_constants(&values).unwrap();
        assert_eq!(records.len(), values.len() * RECORD_SIZE);
        let decoded = decode_constants(&records, &strtab).unwrap();
        for (a, b) in values.iter().zip(decoded.iter()) {
            assert!(is_equal(*a, *b), "{:?} != {:?}", a, b);
        }
        // String identity survives: decode re-interns into the pool.
        assert_eq!(decoded[5].as_str(), intern("hello"));
    }

    #[test]
    fn test_number_payload_is_ieee_bits() {
        let mut strtab = Vec::new();
        let record = encode_constant(Value::number(1.5), &mut strtab).unwrap();
        assert_eq!(record[0], 2);
        assert_eq!(&record[1..8], &[0u8; 7]);
        let bits = u64::from_le_bytes(record[8..16].try_into().unwrap());
        assert_eq!(f64::from_bits(bits), 1.5);
    }

    #[test]
    fn test_function_constant_rejected() {
        use claw_runtime::objects::function;
        use claw_runtime::objects::VMFunction;
        let f = function::create_function(VMFunction::new("f", 0, 0, Chunk::new()));
        let mut strtab = Vec::new();
        assert_eq!(
            encode_constant(Value::object(f), &mut strtab),
            Err(AotError::UnsupportedConstant)
        );
    }

    #[test]
    fn test_bad_tag() {
        let record = [9u8; RECORD_SIZE];
        assert!(matches!(
            decode_constant(&record, &[]),
            Err(AotError::BadTag(9))
        ));
    }

    #[test]
    fn test_chunk_roundtrip() {
        let mut chunk = Chunk::new();
        let li = LineInfo::new(1, 1);
        let idx = chunk.add_constant(Value::number(7.0));
        chunk.write_op(OpCode::Constant, li);
        chunk.write(idx as u8, li);
        chunk.write_op(OpCode::Print, LineInfo::new(2, 3));
        chunk.set_loop_count(0);

        let bytes = serialize_chunk(&chunk).unwrap();
        let restored = deserialize_chunk(&bytes).unwrap();
        assert_eq!(restored.code(), chunk.code());
        assert_eq!(restored.constants().len(), 1);
        assert!(is_equal(restored.constants()[0], Value::number(7.0)));
        assert_eq!(restored.line_info(1), LineInfo::new(1, 1));
        assert_eq!(restored.line_info(2), LineInfo::new(2, 3));
    }

    #[test]
    fn test_truncated_chunk() {
        let mut chunk = Chunk::new();
        chunk.write_op(OpCode::Nil, LineInfo::new(1, 1));
        let bytes = serialize_chunk(&chunk).unwrap();
        assert!(matches!(
            deserialize_chunk(&bytes[..bytes.len() - 2]),
            Err(AotError::Truncated)
        ));
        assert!(matches!(deserialize_chunk(b"NOPE"), Err(AotError::BadMagic)));
        assert!(matches!(deserialize_chunk(b"CL"), Err(AotError::Truncated)));
    }
}
