//! Conversion between [`Value`] trees and typed binary records of the kind
//! instrument-control hosts pass across a foreign-function boundary.
//!
//! A record is a 16 byte header followed by `data_size` payload bytes:
//!
//! ```text
//! offset  0  type_code  u32
//! offset  4  flags      u32
//! offset  8  data_size  u32
//! offset 12  dimensions u32   (element count of array records)
//! ```
//!
//! Header fields and scalar payloads use the host's native byte order. String
//! payloads are a little-endian `u32` length followed by UTF-8 bytes. A cluster
//! payload is a sequence of field records; an array payload is `dimensions`
//! element records. Clusters and arrays only hold scalars.

use crate::ast::{Object, Value};
use crate::error::{BinaryError, BufferTooSmall};
use crate::schema::{ObjectSchema, TypeRef};

pub const HEADER_SIZE: usize = 16;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
#[repr(u32)]
pub enum TypeCode {
    Void = 0,
    I8 = 1,
    I16 = 2,
    I32 = 3,
    U64 = 4,
    I64 = 5,
    U8 = 6,
    U16 = 7,
    U32 = 8,
    Sgl = 9,
    Dbl = 10,
    Variant = 15,
    Boolean = 33,
    String = 48,
    Array = 64,
    Cluster = 80,
}

impl TypeCode {
    pub fn from_u32(code: u32) -> Option<TypeCode> {
        Some(match code {
            0 => TypeCode::Void,
            1 => TypeCode::I8,
            2 => TypeCode::I16,
            3 => TypeCode::I32,
            4 => TypeCode::U64,
            5 => TypeCode::I64,
            6 => TypeCode::U8,
            7 => TypeCode::U16,
            8 => TypeCode::U32,
            9 => TypeCode::Sgl,
            10 => TypeCode::Dbl,
            15 => TypeCode::Variant,
            33 => TypeCode::Boolean,
            48 => TypeCode::String,
            64 => TypeCode::Array,
            80 => TypeCode::Cluster,
            _ => return None,
        })
    }

    pub fn name(self) -> &'static str {
        match self {
            TypeCode::Void => "void",
            TypeCode::I8 => "i8",
            TypeCode::I16 => "i16",
            TypeCode::I32 => "i32",
            TypeCode::U64 => "u64",
            TypeCode::I64 => "i64",
            TypeCode::U8 => "u8",
            TypeCode::U16 => "u16",
            TypeCode::U32 => "u32",
            TypeCode::Sgl => "sgl",
            TypeCode::Dbl => "dbl",
            TypeCode::Variant => "variant",
            TypeCode::Boolean => "boolean",
            TypeCode::String => "string",
            TypeCode::Array => "array",
            TypeCode::Cluster => "cluster",
        }
    }

    /// Payload width of fixed-size scalars.
    pub fn fixed_width(self) -> Option<usize> {
        match self {
            TypeCode::Void => Some(0),
            TypeCode::I8 | TypeCode::U8 | TypeCode::Boolean => Some(1),
            TypeCode::I16 | TypeCode::U16 => Some(2),
            TypeCode::I32 | TypeCode::U32 | TypeCode::Sgl => Some(4),
            TypeCode::I64 | TypeCode::U64 | TypeCode::Dbl => Some(8),
            TypeCode::Variant | TypeCode::String | TypeCode::Array | TypeCode::Cluster => None,
        }
    }

    /// The schema type a decoded value of this code satisfies.
    pub fn schema_type(self) -> TypeRef {
        match self {
            TypeCode::Void => TypeRef::Null,
            TypeCode::I8
            | TypeCode::I16
            | TypeCode::I32
            | TypeCode::U64
            | TypeCode::I64
            | TypeCode::U8
            | TypeCode::U16
            | TypeCode::U32 => TypeRef::Integer,
            TypeCode::Sgl | TypeCode::Dbl => TypeRef::Double,
            TypeCode::Boolean => TypeRef::Boolean,
            TypeCode::String => TypeRef::String,
            TypeCode::Variant => TypeRef::Any,
            TypeCode::Array => TypeRef::Array(Box::new(TypeRef::Any)),
            TypeCode::Cluster => TypeRef::Object,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RecordHeader {
    pub type_code: u32,
    pub flags: u32,
    pub data_size: u32,
    pub dimensions: u32,
}

impl RecordHeader {
    pub fn new(code: TypeCode, data_size: u32) -> Self {
        RecordHeader {
            type_code: code as u32,
            flags: 0,
            data_size,
            dimensions: 0,
        }
    }

    /// Reads a header from the start of `bytes`.
    pub fn read(bytes: &[u8]) -> Result<RecordHeader, BinaryError> {
        Reader::new(bytes, 0).header()
    }

    pub fn write_to(&self, out: &mut Vec<u8>) {
        out.extend_from_slice(&self.type_code.to_ne_bytes());
        out.extend_from_slice(&self.flags.to_ne_bytes());
        out.extend_from_slice(&self.data_size.to_ne_bytes());
        out.extend_from_slice(&self.dimensions.to_ne_bytes());
    }
}

/// Cursor over a byte slice. `base` is the slice's offset within the
/// outermost buffer so that errors point at absolute positions.
struct Reader<'a> {
    bytes: &'a [u8],
    position: usize,
    base: usize,
}

/// One record split into its parts. `offset` is where its header starts.
struct Record<'a> {
    header: RecordHeader,
    payload: &'a [u8],
    offset: usize,
}

impl<'a> Reader<'a> {
    fn new(bytes: &'a [u8], base: usize) -> Self {
        Reader {
            bytes,
            position: 0,
            base,
        }
    }

    fn offset(&self) -> usize {
        self.base + self.position
    }

    fn is_empty(&self) -> bool {
        self.position >= self.bytes.len()
    }

    fn remaining(&self) -> usize {
        self.bytes.len().saturating_sub(self.position)
    }

    fn take(&mut self, needed: usize) -> Result<&'a [u8], BinaryError> {
        let available = self.remaining();
        if needed > available {
            return Err(BinaryError::Truncated {
                offset: self.offset(),
                needed,
                available,
            });
        }
        let slice = &self.bytes[self.position..self.position + needed];
        self.position += needed;
        Ok(slice)
    }

    fn u32(&mut self) -> Result<u32, BinaryError> {
        let bytes = self.take(4)?;
        Ok(u32::from_ne_bytes([bytes[0], bytes[1], bytes[2], bytes[3]]))
    }

    fn header(&mut self) -> Result<RecordHeader, BinaryError> {
        Ok(RecordHeader {
            type_code: self.u32()?,
            flags: self.u32()?,
            data_size: self.u32()?,
            dimensions: self.u32()?,
        })
    }

    fn record(&mut self) -> Result<Record<'a>, BinaryError> {
        let offset = self.offset();
        let header = self.header()?;
        let payload = self.take(header.data_size as usize)?;
        Ok(Record {
            header,
            payload,
            offset,
        })
    }
}

/// Decodes one complete record. `field_names` names the fields of a cluster
/// record, or of a cluster carried in a variant.
pub fn decode(record: &[u8], field_names: &[&str]) -> Result<Value, BinaryError> {
    let mut reader = Reader::new(record, 0);
    let decoded = reader.record()?;
    if !reader.is_empty() {
        log::warn!(
            "ignoring {} trailing bytes after a {} byte record",
            reader.remaining(),
            reader.position
        );
    }
    decode_record(&decoded, field_names, true)
}

/// Decodes a headerless sequence of field records into an object, as found
/// in a cluster payload. With names, exactly `names.len()` fields are read;
/// without, every record up to the end is read as `field_N`.
pub fn decode_fields(bytes: &[u8], names: &[&str]) -> Result<Value, BinaryError> {
    decode_fields_at(bytes, 0, names)
}

fn decode_fields_at(bytes: &[u8], base: usize, names: &[&str]) -> Result<Value, BinaryError> {
    let mut reader = Reader::new(bytes, base);
    let mut object = Object::new();
    let mut index = 0;

    while more_fields(&reader, index, names) {
        let record = reader.record().map_err(|e| truncated_cluster(e, index, names))?;
        let value = decode_record(&record, &[], false)?;
        object.insert(field_name(names, index), value);
        index += 1;
    }
    if !reader.is_empty() {
        log::warn!(
            "ignoring {} bytes after the {} named cluster fields",
            reader.remaining(),
            names.len()
        );
    }
    if index < names.len() {
        return Err(BinaryError::TruncatedCluster {
            decoded: index,
            expected: names.len(),
        });
    }
    Ok(Value::Object(object))
}

fn more_fields(reader: &Reader<'_>, index: usize, names: &[&str]) -> bool {
    !reader.is_empty() && (names.is_empty() || index < names.len())
}

fn truncated_cluster(error: BinaryError, decoded: usize, names: &[&str]) -> BinaryError {
    if error.is_truncation() {
        BinaryError::TruncatedCluster {
            decoded,
            expected: names.len().max(decoded + 1),
        }
    } else {
        error
    }
}

fn field_name(names: &[&str], index: usize) -> String {
    match names.get(index) {
        Some(name) => (*name).to_string(),
        None => format!("field_{index}"),
    }
}

fn type_code(record: &Record<'_>) -> Result<TypeCode, BinaryError> {
    TypeCode::from_u32(record.header.type_code).ok_or(BinaryError::UnknownTypeCode {
        code: record.header.type_code,
        offset: record.offset,
    })
}

/// `top` is false inside clusters and arrays, where aggregates are rejected.
fn decode_record(record: &Record<'_>, names: &[&str], top: bool) -> Result<Value, BinaryError> {
    let payload_offset = record.offset + HEADER_SIZE;
    match type_code(record)? {
        TypeCode::Cluster | TypeCode::Array if !top => Err(BinaryError::NestedAggregate {
            offset: record.offset,
        }),
        TypeCode::Cluster => decode_fields_at(record.payload, payload_offset, names),
        TypeCode::Array => {
            let mut reader = Reader::new(record.payload, payload_offset);
            let mut items = Vec::with_capacity(record.header.dimensions.min(1024) as usize);
            for _ in 0..record.header.dimensions {
                let element = reader.record()?;
                items.push(decode_record(&element, &[], false)?);
            }
            Ok(Value::Array(items))
        }
        TypeCode::Variant => {
            let mut reader = Reader::new(record.payload, payload_offset);
            let inner = reader.record()?;
            if inner.header.type_code == TypeCode::Variant as u32 {
                return Err(BinaryError::NestedAggregate {
                    offset: inner.offset,
                });
            }
            decode_record(&inner, names, top)
        }
        code => decode_scalar(code, record.payload, payload_offset),
    }
}

fn fixed<const N: usize>(
    code: TypeCode,
    payload: &[u8],
    offset: usize,
) -> Result<[u8; N], BinaryError> {
    payload
        .get(..N)
        .and_then(|bytes| bytes.try_into().ok())
        .ok_or(BinaryError::PayloadSize {
            type_name: code.name(),
            offset,
            expected: N,
            actual: payload.len(),
        })
}

fn decode_scalar(code: TypeCode, payload: &[u8], offset: usize) -> Result<Value, BinaryError> {
    let value = match code {
        TypeCode::Void => Value::Null,
        TypeCode::Boolean => Value::Boolean(fixed::<1>(code, payload, offset)?[0] != 0),
        TypeCode::I8 => Value::Integer(i8::from_ne_bytes(fixed(code, payload, offset)?).into()),
        TypeCode::I16 => Value::Integer(i16::from_ne_bytes(fixed(code, payload, offset)?).into()),
        TypeCode::I32 => Value::Integer(i32::from_ne_bytes(fixed(code, payload, offset)?).into()),
        TypeCode::I64 => Value::Integer(i64::from_ne_bytes(fixed(code, payload, offset)?)),
        TypeCode::U8 => Value::Integer(u8::from_ne_bytes(fixed(code, payload, offset)?).into()),
        TypeCode::U16 => Value::Integer(u16::from_ne_bytes(fixed(code, payload, offset)?).into()),
        TypeCode::U32 => Value::Integer(u32::from_ne_bytes(fixed(code, payload, offset)?).into()),
        TypeCode::U64 => {
            let value = u64::from_ne_bytes(fixed(code, payload, offset)?);
            Value::Integer(
                i64::try_from(value).map_err(|_| BinaryError::IntegerOverflow { value, offset })?,
            )
        }
        TypeCode::Sgl => Value::Double(f32::from_ne_bytes(fixed(code, payload, offset)?).into()),
        TypeCode::Dbl => Value::Double(f64::from_ne_bytes(fixed(code, payload, offset)?)),
        TypeCode::String => {
            let length = u32::from_le_bytes(fixed(code, payload, offset)?) as usize;
            let bytes = payload
                .get(4..)
                .and_then(|rest| rest.get(..length))
                .ok_or(BinaryError::PayloadSize {
                    type_name: code.name(),
                    offset,
                    expected: length.saturating_add(4),
                    actual: payload.len(),
                })?;
            let text = std::str::from_utf8(bytes)
                .map_err(|_| BinaryError::InvalidUtf8 { offset: offset + 4 })?;
            Value::String(text.to_string())
        }
        TypeCode::Variant | TypeCode::Array | TypeCode::Cluster => {
            return Err(BinaryError::NestedAggregate { offset });
        }
    };
    Ok(value)
}

/// Encodes a value as one record. Objects become clusters and arrays become
/// array records; their members must be scalars.
pub fn encode(value: &Value) -> Result<Vec<u8>, BinaryError> {
    let mut out = Vec::new();
    encode_record(value, "", true, &mut out)?;
    Ok(out)
}

/// Encodes into a caller-provided buffer and returns the number of bytes
/// written. The buffer is left untouched when it is too small.
pub fn encode_into(value: &Value, buffer: &mut [u8]) -> Result<usize, BinaryError> {
    let bytes = encode(value)?;
    let available = buffer.len();
    let target = buffer.get_mut(..bytes.len()).ok_or(BufferTooSmall {
        required: bytes.len(),
        available,
    })?;
    target.copy_from_slice(&bytes);
    Ok(bytes.len())
}

fn encode_record(value: &Value, path: &str, top: bool, out: &mut Vec<u8>) -> Result<(), BinaryError> {
    match value {
        Value::Object(_) | Value::Array(_) if !top => Err(BinaryError::NestedContainer {
            path: path.to_string(),
        }),
        Value::Object(object) => {
            let mut payload = Vec::new();
            for (key, field) in &object.fields {
                let field_path = if path.is_empty() {
                    key.clone()
                } else {
                    format!("{path}.{key}")
                };
                encode_record(field, &field_path, false, &mut payload)?;
            }
            write_record(TypeCode::Cluster, 0, &payload, out)
        }
        Value::Array(items) => {
            let mut payload = Vec::new();
            for (i, item) in items.iter().enumerate() {
                encode_record(item, &format!("{path}[{i}]"), false, &mut payload)?;
            }
            let dimensions = u32::try_from(items.len())
                .map_err(|_| BinaryError::PayloadTooLarge { size: items.len() })?;
            write_record(TypeCode::Array, dimensions, &payload, out)
        }
        Value::Null => write_record(TypeCode::Void, 0, &[], out),
        Value::Boolean(b) => write_record(TypeCode::Boolean, 0, &[u8::from(*b)], out),
        Value::Integer(i) => write_record(TypeCode::I64, 0, &i.to_ne_bytes(), out),
        Value::Double(d) => write_record(TypeCode::Dbl, 0, &d.to_ne_bytes(), out),
        Value::String(s) | Value::EnumRef(s) => {
            let length = u32::try_from(s.len())
                .map_err(|_| BinaryError::PayloadTooLarge { size: s.len() })?;
            let mut payload = Vec::with_capacity(s.len() + 4);
            payload.extend_from_slice(&length.to_le_bytes());
            payload.extend_from_slice(s.as_bytes());
            write_record(TypeCode::String, 0, &payload, out)
        }
    }
}

fn write_record(
    code: TypeCode,
    dimensions: u32,
    payload: &[u8],
    out: &mut Vec<u8>,
) -> Result<(), BinaryError> {
    let data_size = u32::try_from(payload.len())
        .map_err(|_| BinaryError::PayloadTooLarge { size: payload.len() })?;
    let header = RecordHeader {
        dimensions,
        ..RecordHeader::new(code, data_size)
    };
    header.write_to(out);
    out.extend_from_slice(payload);
    Ok(())
}

/// Generates schema text describing a cluster payload's fields, typed by
/// their record codes. Unknown codes become `any`.
pub fn cluster_schema(
    bytes: &[u8],
    names: &[&str],
    schema_name: &str,
) -> Result<String, BinaryError> {
    let mut reader = Reader::new(bytes, 0);
    let mut schema = ObjectSchema::new(schema_name);
    let mut index = 0;

    while more_fields(&reader, index, names) {
        let record = reader.record().map_err(|e| truncated_cluster(e, index, names))?;
        let ty = match TypeCode::from_u32(record.header.type_code) {
            Some(TypeCode::Array) => TypeRef::Array(Box::new(element_type(&record))),
            Some(code) => code.schema_type(),
            None => TypeRef::Any,
        };
        schema = schema.field(field_name(names, index), ty);
        index += 1;
    }
    if index < names.len() {
        return Err(BinaryError::TruncatedCluster {
            decoded: index,
            expected: names.len(),
        });
    }
    Ok(schema.to_string())
}

/// Element type of an array record, read from its first element.
fn element_type(record: &Record<'_>) -> TypeRef {
    if record.header.dimensions == 0 {
        return TypeRef::Any;
    }
    RecordHeader::read(record.payload)
        .ok()
        .and_then(|header| TypeCode::from_u32(header.type_code))
        .map_or(TypeRef::Any, TypeCode::schema_type)
}

#[cfg(test)]
mod tests {
    use super::*;

    fn record(code: TypeCode, payload: &[u8]) -> Vec<u8> {
        let mut out = Vec::new();
        write_record(code, 0, payload, &mut out).unwrap();
        out
    }

    fn string_payload(text: &str) -> Vec<u8> {
        let mut payload = (text.len() as u32).to_le_bytes().to_vec();
        payload.extend_from_slice(text.as_bytes());
        payload
    }

    #[test]
    fn test_header_layout() {
        let bytes = record(TypeCode::Dbl, &1.5f64.to_ne_bytes());
        assert_eq!(bytes.len(), HEADER_SIZE + 8);
        let header = RecordHeader::read(&bytes).unwrap();
        assert_eq!(header.type_code, 10);
        assert_eq!(header.data_size, 8);
        assert_eq!(header.dimensions, 0);
    }

    #[test]
    fn test_decode_scalars() {
        assert_eq!(decode(&record(TypeCode::Boolean, &[1]), &[]).unwrap(), Value::Boolean(true));
        assert_eq!(decode(&record(TypeCode::Boolean, &[0]), &[]).unwrap(), Value::Boolean(false));
        assert_eq!(
            decode(&record(TypeCode::I8, &(-5i8).to_ne_bytes()), &[]).unwrap(),
            Value::Integer(-5)
        );
        assert_eq!(
            decode(&record(TypeCode::U16, &65535u16.to_ne_bytes()), &[]).unwrap(),
            Value::Integer(65535)
        );
        assert_eq!(
            decode(&record(TypeCode::I32, &(-70000i32).to_ne_bytes()), &[]).unwrap(),
            Value::Integer(-70000)
        );
        assert_eq!(
            decode(&record(TypeCode::Dbl, &3.14159f64.to_ne_bytes()), &[]).unwrap(),
            Value::Double(3.14159)
        );
        assert_eq!(
            decode(&record(TypeCode::Sgl, &0.5f32.to_ne_bytes()), &[]).unwrap(),
            Value::Double(0.5)
        );
        assert_eq!(
            decode(&record(TypeCode::String, &string_payload("héllo")), &[]).unwrap(),
            Value::String("héllo".into())
        );
        assert_eq!(decode(&record(TypeCode::Void, &[]), &[]).unwrap(), Value::Null);
    }

    #[test]
    fn test_u64_overflow() {
        let big = record(TypeCode::U64, &u64::MAX.to_ne_bytes());
        assert_eq!(
            decode(&big, &[]).unwrap_err(),
            BinaryError::IntegerOverflow {
                value: u64::MAX,
                offset: HEADER_SIZE
            }
        );
        let fits = record(TypeCode::U64, &(i64::MAX as u64).to_ne_bytes());
        assert_eq!(decode(&fits, &[]).unwrap(), Value::Integer(i64::MAX));
    }

    #[test]
    fn test_short_payloads() {
        assert!(matches!(
            decode(&record(TypeCode::I32, &[1, 2]), &[]),
            Err(BinaryError::PayloadSize { expected: 4, actual: 2, .. })
        ));
        let mut lying = 10u32.to_le_bytes().to_vec();
        lying.extend_from_slice(b"abc");
        assert!(matches!(
            decode(&record(TypeCode::String, &lying), &[]),
            Err(BinaryError::PayloadSize { .. })
        ));
        assert!(matches!(
            decode(&record(TypeCode::String, &string_payload("\u{0}")[..4]), &[]),
            Err(BinaryError::PayloadSize { .. })
        ));
    }

    #[test]
    fn test_invalid_utf8_and_unknown_code() {
        let mut payload = 2u32.to_le_bytes().to_vec();
        payload.extend_from_slice(&[0xff, 0xfe]);
        assert_eq!(
            decode(&record(TypeCode::String, &payload), &[]).unwrap_err(),
            BinaryError::InvalidUtf8 { offset: HEADER_SIZE + 4 }
        );

        let mut bytes = Vec::new();
        RecordHeader {
            type_code: 99,
            flags: 0,
            data_size: 0,
            dimensions: 0,
        }
        .write_to(&mut bytes);
        assert_eq!(
            decode(&bytes, &[]).unwrap_err(),
            BinaryError::UnknownTypeCode { code: 99, offset: 0 }
        );
    }

    #[test]
    fn test_cluster_with_names() {
        let mut fields = record(TypeCode::String, &string_payload("motor"));
        fields.extend(record(TypeCode::I32, &42i32.to_ne_bytes()));
        fields.extend(record(TypeCode::Boolean, &[1]));
        let cluster = record(TypeCode::Cluster, &fields);

        let value = decode(&cluster, &["name", "speed"]).unwrap();
        let object = value.as_object().unwrap();
        assert_eq!(object.fields.keys().collect::<Vec<_>>(), vec!["name", "speed"]);
        assert_eq!(value.get("speed"), Some(&Value::Integer(42)));

        let unnamed = decode(&cluster, &[]).unwrap();
        assert_eq!(
            unnamed.as_object().unwrap().fields.keys().collect::<Vec<_>>(),
            vec!["field_0", "field_1", "field_2"]
        );
        assert_eq!(unnamed.get("field_2"), Some(&Value::Boolean(true)));
    }

    #[test]
    fn test_named_cluster_stops_after_its_names() {
        let mut fields = record(TypeCode::I32, &1i32.to_ne_bytes());
        fields.extend(record(TypeCode::I32, &2i32.to_ne_bytes()));
        // An unknown type code past the named fields is never read.
        fields.extend(record(TypeCode::I32, &3i32.to_ne_bytes()));
        fields[2 * (HEADER_SIZE + 4)] = 99;

        let value = decode_fields(&fields, &["x", "y"]).unwrap();
        assert_eq!(value.as_object().unwrap().len(), 2);
        assert_eq!(value.get("y"), Some(&Value::Integer(2)));
        assert!(decode_fields(&fields, &[]).is_err());

        let schema = cluster_schema(&fields, &["x", "y"], "Point").unwrap();
        assert_eq!(schema, "Point {\n    x: integer;\n    y: integer;\n}\n");
    }

    #[test]
    fn test_truncated_cluster() {
        let fields = record(TypeCode::I32, &7i32.to_ne_bytes());
        let cluster = record(TypeCode::Cluster, &fields);
        assert_eq!(
            decode(&cluster, &["a", "b"]).unwrap_err(),
            BinaryError::TruncatedCluster {
                decoded: 1,
                expected: 2
            }
        );

        let mut partial = fields.clone();
        partial.extend_from_slice(&[48, 0, 0]);
        assert!(matches!(
            decode_fields(&partial, &["a"]),
            Err(BinaryError::TruncatedCluster { decoded: 1, .. })
        ));
    }

    #[test]
    fn test_nested_aggregates_are_rejected() {
        let inner = record(TypeCode::Cluster, &[]);
        let outer = record(TypeCode::Cluster, &inner);
        assert_eq!(
            decode(&outer, &[]).unwrap_err(),
            BinaryError::NestedAggregate { offset: HEADER_SIZE }
        );
    }

    #[test]
    fn test_variant_inside_variant_is_rejected() {
        let depth = 200_000u32;
        let mut bytes = Vec::new();
        for level in 0..depth {
            let wrapped = (depth - level) * HEADER_SIZE as u32;
            RecordHeader::new(TypeCode::Variant, wrapped).write_to(&mut bytes);
        }
        RecordHeader::new(TypeCode::Void, 0).write_to(&mut bytes);
        assert_eq!(
            decode(&bytes, &[]).unwrap_err(),
            BinaryError::NestedAggregate { offset: HEADER_SIZE }
        );

        let once = record(TypeCode::Variant, &record(TypeCode::Variant, &record(TypeCode::U8, &[1])));
        assert!(matches!(
            decode(&once, &[]),
            Err(BinaryError::NestedAggregate { .. })
        ));
    }

    #[test]
    fn test_variant_unwraps_one_record() {
        let inner = record(TypeCode::Dbl, &2.5f64.to_ne_bytes());
        let variant = record(TypeCode::Variant, &inner);
        assert_eq!(decode(&variant, &[]).unwrap(), Value::Double(2.5));
    }

    #[test]
    fn test_trailing_bytes_are_ignored() {
        let mut bytes = record(TypeCode::U8, &[9]);
        bytes.extend_from_slice(&[0, 0]);
        assert_eq!(decode(&bytes, &[]).unwrap(), Value::Integer(9));
    }

    #[test]
    fn test_encode_scalars_round_trip() {
        for value in [
            Value::Null,
            Value::Boolean(true),
            Value::Integer(-123_456_789_012),
            Value::Double(3.14159),
            Value::String("text".into()),
        ] {
            assert_eq!(decode(&encode(&value).unwrap(), &[]).unwrap(), value);
        }
    }

    #[test]
    fn test_encode_cluster_and_array() {
        let value = Value::Object(
            Object::new()
                .with_field("gain", 2.0)
                .with_field("label", "ch0")
                .with_field("enabled", false),
        );
        let bytes = encode(&value).unwrap();
        assert_eq!(RecordHeader::read(&bytes).unwrap().type_code, TypeCode::Cluster as u32);
        assert_eq!(decode(&bytes, &["gain", "label", "enabled"]).unwrap(), value);

        let array = Value::Array(vec![Value::Integer(1), Value::Integer(2), Value::Integer(3)]);
        let bytes = encode(&array).unwrap();
        assert_eq!(RecordHeader::read(&bytes).unwrap().dimensions, 3);
        assert_eq!(decode(&bytes, &[]).unwrap(), array);
    }

    #[test]
    fn test_encode_rejects_nested_containers() {
        let value = Value::Object(Object::new().with_field(
            "inner",
            Object::new().with_field("x", Value::Integer(1)),
        ));
        assert_eq!(
            encode(&value).unwrap_err(),
            BinaryError::NestedContainer {
                path: "inner".into()
            }
        );
        let value = Value::Array(vec![Value::Array(vec![])]);
        assert_eq!(
            encode(&value).unwrap_err(),
            BinaryError::NestedContainer { path: "[0]".into() }
        );
    }

    #[test]
    fn test_encode_into_fixed_buffer() {
        let value = Value::Integer(7);
        let mut small = [0u8; 8];
        assert_eq!(
            encode_into(&value, &mut small).unwrap_err(),
            BinaryError::BufferTooSmall(BufferTooSmall {
                required: HEADER_SIZE + 8,
                available: 8
            })
        );
        assert_eq!(small, [0u8; 8]);

        let mut buffer = [0u8; 64];
        let written = encode_into(&value, &mut buffer).unwrap();
        assert_eq!(written, HEADER_SIZE + 8);
        assert_eq!(decode(&buffer[..written], &[]).unwrap(), value);
    }

    #[test]
    fn test_cluster_schema() {
        let mut fields = record(TypeCode::String, &string_payload("x"));
        fields.extend(record(TypeCode::U16, &3u16.to_ne_bytes()));
        fields.extend(encode(&Value::Array(vec![Value::Double(1.5)])).unwrap());
        let text = cluster_schema(&fields, &["name", "count", "samples"], "Channel").unwrap();
        assert_eq!(
            text,
            "Channel {\n    name: string;\n    count: integer;\n    samples: array<double>;\n}\n"
        );
        let schema = crate::schema::Schema::parse(&text).unwrap();
        assert!(schema.object("Channel").is_some());
    }
}
