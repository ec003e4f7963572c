use std::path::Path;

use indexmap::IndexMap;

use super::dataframe::{ColumnData, DataFrame, Table};
use super::parser;
use super::value::{Formula, Intent, NaKind, NDArray};
use super::{ErrorCode, TError, Value};

const MAGIC: &[u8; 4] = b"TOBJ";
const VERSION: u8 = 1;

// value tags
const TAG_NULL: u8 = 0x00;
const TAG_BOOL: u8 = 0x01;
const TAG_INT: u8 = 0x02;
const TAG_FLOAT: u8 = 0x03;
const TAG_STRING: u8 = 0x04;
const TAG_NA_GENERIC: u8 = 0x05;
const TAG_NA_BOOL: u8 = 0x06;
const TAG_NA_INT: u8 = 0x07;
const TAG_NA_FLOAT: u8 = 0x08;
const TAG_NA_STRING: u8 = 0x09;
const TAG_VECTOR: u8 = 0x0a;
const TAG_NDARRAY: u8 = 0x0b;
const TAG_LIST: u8 = 0x0c;
const TAG_DICT: u8 = 0x0d;
const TAG_ERROR: u8 = 0x0e;
const TAG_FORMULA: u8 = 0x0f;
const TAG_INTENT: u8 = 0x10;
const TAG_DATAFRAME: u8 = 0x11;

// column tags inside a dataframe payload
const COL_INT: u8 = 0;
const COL_FLOAT: u8 = 1;
const COL_BOOL: u8 = 2;
const COL_STRING: u8 = 3;
const COL_NULL: u8 = 4;

/// Encode a value as a standalone TOBJ file image: magic, version, payload.
/// The encoding is deterministic: equal values produce identical bytes.
pub fn serialize_value(v: &Value) -> Result<Vec<u8>, TError> {
    let mut out = Vec::new();
    out.extend_from_slice(MAGIC);
    out.push(VERSION);
    encode(v, &mut out)?;
    Ok(out)
}

pub fn deserialize_value(bytes: &[u8]) -> Result<Value, TError> {
    let mut cursor = Cursor { buf: bytes, pos: 0 };
    let magic = cursor.take(4)?;
    if magic != MAGIC {
        return Err(TError::file_error("not a TOBJ file: bad magic"));
    }
    let version = cursor.take_u8()?;
    if version != VERSION {
        return Err(TError::file_error(format!(
            "unsupported TOBJ version {version}"
        )));
    }
    let value = decode(&mut cursor)?;
    if cursor.pos != bytes.len() {
        return Err(TError::file_error("trailing garbage after TOBJ payload"));
    }
    Ok(value)
}

pub fn write_value(v: &Value, path: &Path) -> Result<(), TError> {
    let bytes = serialize_value(v)?;
    std::fs::write(path, bytes)
        .map_err(|e| TError::file_error(format!("cannot write {}: {e}", path.display())))
}

pub fn read_value(path: &Path) -> Result<Value, TError> {
    let bytes = std::fs::read(path)
        .map_err(|e| TError::file_error(format!("cannot read {}: {e}", path.display())))?;
    deserialize_value(&bytes)
}

fn push_u32(out: &mut Vec<u8>, n: usize) -> Result<(), TError> {
    let n = u32::try_from(n).map_err(|_| TError::value_error("value too large to serialize"))?;
    out.extend_from_slice(&n.to_le_bytes());
    Ok(())
}

fn push_str(out: &mut Vec<u8>, s: &str) -> Result<(), TError> {
    push_u32(out, s.len())?;
    out.extend_from_slice(s.as_bytes());
    Ok(())
}

fn encode(v: &Value, out: &mut Vec<u8>) -> Result<(), TError> {
    match v {
        Value::Null => out.push(TAG_NULL),
        Value::Bool(b) => {
            out.push(TAG_BOOL);
            out.push(u8::from(*b));
        }
        Value::Int(n) => {
            out.push(TAG_INT);
            out.extend_from_slice(&n.to_le_bytes());
        }
        Value::Float(x) => {
            out.push(TAG_FLOAT);
            out.extend_from_slice(&x.to_le_bytes());
        }
        Value::String(s) => {
            out.push(TAG_STRING);
            push_str(out, s)?;
        }
        Value::Na(kind) => out.push(match kind {
            NaKind::Generic => TAG_NA_GENERIC,
            NaKind::Bool => TAG_NA_BOOL,
            NaKind::Int => TAG_NA_INT,
            NaKind::Float => TAG_NA_FLOAT,
            NaKind::String => TAG_NA_STRING,
        }),
        Value::Vector(items) => {
            out.push(TAG_VECTOR);
            push_u32(out, items.len())?;
            for item in items {
                encode(item, out)?;
            }
        }
        Value::NDArray(a) => {
            out.push(TAG_NDARRAY);
            push_u32(out, a.shape.len())?;
            for dim in &a.shape {
                push_u32(out, *dim)?;
            }
            for x in &a.data {
                out.extend_from_slice(&x.to_le_bytes());
            }
        }
        Value::List(items) => {
            out.push(TAG_LIST);
            push_u32(out, items.len())?;
            for (name, item) in items {
                match name {
                    Some(n) => {
                        out.push(1);
                        push_str(out, n)?;
                    }
                    None => out.push(0),
                }
                encode(item, out)?;
            }
        }
        Value::Dict(map) => {
            out.push(TAG_DICT);
            push_u32(out, map.len())?;
            for (k, item) in map {
                push_str(out, k)?;
                encode(item, out)?;
            }
        }
        Value::Error(e) => {
            out.push(TAG_ERROR);
            out.push(e.code.tag());
            push_str(out, &e.message)?;
            push_u32(out, e.context.len())?;
            for (k, item) in &e.context {
                push_str(out, k)?;
                encode(item, out)?;
            }
        }
        Value::Formula(f) => {
            out.push(TAG_FORMULA);
            push_str(out, &f.lhs.deparse())?;
            push_str(out, &f.rhs.deparse())?;
        }
        Value::Intent(intent) => {
            out.push(TAG_INTENT);
            push_u32(out, intent.fields.len())?;
            for (k, item) in &intent.fields {
                push_str(out, k)?;
                encode(item, out)?;
            }
        }
        Value::DataFrame(df) => {
            out.push(TAG_DATAFRAME);
            push_u32(out, df.table.num_columns())?;
            for (name, col) in df.table.columns() {
                push_str(out, name)?;
                encode_column(col, out)?;
            }
            push_u32(out, df.groups.len())?;
            for g in &df.groups {
                push_str(out, g)?;
            }
        }
        Value::Function(_) | Value::Pipeline(_) => {
            return Err(TError::value_error(format!(
                "values of kind {} cannot be serialized",
                v.kind()
            )))
        }
    }
    Ok(())
}

fn encode_column(col: &ColumnData, out: &mut Vec<u8>) -> Result<(), TError> {
    match col {
        ColumnData::Int(v) => {
            out.push(COL_INT);
            push_u32(out, v.len())?;
            for slot in v {
                match slot {
                    Some(n) => {
                        out.push(1);
                        out.extend_from_slice(&n.to_le_bytes());
                    }
                    None => out.push(0),
                }
            }
        }
        ColumnData::Float(v) => {
            out.push(COL_FLOAT);
            push_u32(out, v.len())?;
            for slot in v {
                match slot {
                    Some(x) => {
                        out.push(1);
                        out.extend_from_slice(&x.to_le_bytes());
                    }
                    None => out.push(0),
                }
            }
        }
        ColumnData::Bool(v) => {
            out.push(COL_BOOL);
            push_u32(out, v.len())?;
            for slot in v {
                match slot {
                    Some(b) => {
                        out.push(1);
                        out.push(u8::from(*b));
                    }
                    None => out.push(0),
                }
            }
        }
        ColumnData::String(v) => {
            out.push(COL_STRING);
            push_u32(out, v.len())?;
            for slot in v {
                match slot {
                    Some(s) => {
                        out.push(1);
                        push_str(out, s)?;
                    }
                    None => out.push(0),
                }
            }
        }
        ColumnData::Null(n) => {
            out.push(COL_NULL);
            push_u32(out, *n)?;
        }
    }
    Ok(())
}

struct Cursor<'a> {
    buf: &'a [u8],
    pos: usize,
}

impl<'a> Cursor<'a> {
    fn take(&mut self, n: usize) -> Result<&'a [u8], TError> {
        if self.pos + n > self.buf.len() {
            return Err(TError::file_error("truncated TOBJ payload"));
        }
        let slice = &self.buf[self.pos..self.pos + n];
        self.pos += n;
        Ok(slice)
    }

    fn take_u8(&mut self) -> Result<u8, TError> {
        Ok(self.take(1)?[0])
    }

    fn take_u32(&mut self) -> Result<usize, TError> {
        let bytes: [u8; 4] = self.take(4)?.try_into().expect("sized");
        Ok(u32::from_le_bytes(bytes) as usize)
    }

    fn take_i64(&mut self) -> Result<i64, TError> {
        let bytes: [u8; 8] = self.take(8)?.try_into().expect("sized");
        Ok(i64::from_le_bytes(bytes))
    }

    fn take_f64(&mut self) -> Result<f64, TError> {
        let bytes: [u8; 8] = self.take(8)?.try_into().expect("sized");
        Ok(f64::from_le_bytes(bytes))
    }

    fn take_str(&mut self) -> Result<String, TError> {
        let len = self.take_u32()?;
        let bytes = self.take(len)?;
        String::from_utf8(bytes.to_vec())
            .map_err(|_| TError::file_error("invalid UTF-8 in TOBJ string"))
    }
}

fn decode(cursor: &mut Cursor<'_>) -> Result<Value, TError> {
    let tag = cursor.take_u8()?;
    let value = match tag {
        TAG_NULL => Value::Null,
        TAG_BOOL => Value::Bool(cursor.take_u8()? != 0),
        TAG_INT => Value::Int(cursor.take_i64()?),
        TAG_FLOAT => Value::Float(cursor.take_f64()?),
        TAG_STRING => Value::String(cursor.take_str()?),
        TAG_NA_GENERIC => Value::Na(NaKind::Generic),
        TAG_NA_BOOL => Value::Na(NaKind::Bool),
        TAG_NA_INT => Value::Na(NaKind::Int),
        TAG_NA_FLOAT => Value::Na(NaKind::Float),
        TAG_NA_STRING => Value::Na(NaKind::String),
        TAG_VECTOR => {
            let len = cursor.take_u32()?;
            let mut items = Vec::with_capacity(len);
            for _ in 0..len {
                items.push(decode(cursor)?);
            }
            Value::Vector(items)
        }
        TAG_NDARRAY => {
            let rank = cursor.take_u32()?;
            let mut shape = Vec::with_capacity(rank);
            for _ in 0..rank {
                shape.push(cursor.take_u32()?);
            }
            let count: usize = shape.iter().product();
            let mut data = Vec::with_capacity(count);
            for _ in 0..count {
                data.push(cursor.take_f64()?);
            }
            Value::NDArray(NDArray::new(shape, data)?)
        }
        TAG_LIST => {
            let len = cursor.take_u32()?;
            let mut items = Vec::with_capacity(len);
            for _ in 0..len {
                let name = if cursor.take_u8()? == 1 {
                    Some(cursor.take_str()?)
                } else {
                    None
                };
                items.push((name, decode(cursor)?));
            }
            Value::List(items)
        }
        TAG_DICT => {
            let len = cursor.take_u32()?;
            let mut map = IndexMap::with_capacity(len);
            for _ in 0..len {
                let k = cursor.take_str()?;
                map.insert(k, decode(cursor)?);
            }
            Value::Dict(map)
        }
        TAG_ERROR => {
            let code_tag = cursor.take_u8()?;
            let code = ErrorCode::from_tag(code_tag)
                .ok_or_else(|| TError::file_error(format!("unknown error code tag {code_tag}")))?;
            let message = cursor.take_str()?;
            let len = cursor.take_u32()?;
            let mut context = IndexMap::with_capacity(len);
            for _ in 0..len {
                let k = cursor.take_str()?;
                context.insert(k, decode(cursor)?);
            }
            Value::Error(Box::new(TError {
                code,
                message,
                context,
            }))
        }
        TAG_FORMULA => {
            let lhs = cursor.take_str()?;
            let rhs = cursor.take_str()?;
            let lhs = parser::parse_expression(&lhs)
                .map_err(|e| TError::file_error(format!("bad formula payload: {}", e.message)))?;
            let rhs = parser::parse_expression(&rhs)
                .map_err(|e| TError::file_error(format!("bad formula payload: {}", e.message)))?;
            Value::Formula(Formula { lhs, rhs })
        }
        TAG_INTENT => {
            let len = cursor.take_u32()?;
            let mut fields = Vec::with_capacity(len);
            for _ in 0..len {
                let k = cursor.take_str()?;
                fields.push((k, decode(cursor)?));
            }
            Value::Intent(Intent { fields })
        }
        TAG_DATAFRAME => {
            let ncols = cursor.take_u32()?;
            let mut columns = Vec::with_capacity(ncols);
            for _ in 0..ncols {
                let name = cursor.take_str()?;
                columns.push((name, decode_column(cursor)?));
            }
            let ngroups = cursor.take_u32()?;
            let mut groups = Vec::with_capacity(ngroups);
            for _ in 0..ngroups {
                groups.push(cursor.take_str()?);
            }
            let df = DataFrame::new(Table::new(columns)?);
            Value::DataFrame(df.with_groups(groups))
        }
        tag => return Err(TError::file_error(format!("unknown TOBJ tag {tag:#04x}"))),
    };
    Ok(value)
}

fn decode_column(cursor: &mut Cursor<'_>) -> Result<ColumnData, TError> {
    let tag = cursor.take_u8()?;
    let len = cursor.take_u32()?;
    let col = match tag {
        COL_INT => {
            let mut v = Vec::with_capacity(len);
            for _ in 0..len {
                v.push(if cursor.take_u8()? == 1 {
                    Some(cursor.take_i64()?)
                } else {
                    None
                });
            }
            ColumnData::Int(v)
        }
        COL_FLOAT => {
            let mut v = Vec::with_capacity(len);
            for _ in 0..len {
                v.push(if cursor.take_u8()? == 1 {
                    Some(cursor.take_f64()?)
                } else {
                    None
                });
            }
            ColumnData::Float(v)
        }
        COL_BOOL => {
            let mut v = Vec::with_capacity(len);
            for _ in 0..len {
                v.push(if cursor.take_u8()? == 1 {
                    Some(cursor.take_u8()? != 0)
                } else {
                    None
                });
            }
            ColumnData::Bool(v)
        }
        COL_STRING => {
            let mut v = Vec::with_capacity(len);
            for _ in 0..len {
                v.push(if cursor.take_u8()? == 1 {
                    Some(cursor.take_str()?)
                } else {
                    None
                });
            }
            ColumnData::String(v)
        }
        COL_NULL => ColumnData::Null(len),
        tag => {
            return Err(TError::file_error(format!(
                "unknown TOBJ column tag {tag:#04x}"
            )))
        }
    };
    Ok(col)
}

#[cfg(test)]
mod tests {
    use super::*;

    fn round_trip(v: Value) {
        let bytes = serialize_value(&v).unwrap();
        let back = deserialize_value(&bytes).unwrap();
        assert_eq!(v, back);
    }

    #[test]
    fn scalars_round_trip() {
        round_trip(Value::Null);
        round_trip(Value::Bool(true));
        round_trip(Value::Int(-42));
        round_trip(Value::Float(2.5));
        round_trip(Value::String("héllo\nworld".into()));
        round_trip(Value::Na(NaKind::Float));
    }

    #[test]
    fn containers_round_trip() {
        round_trip(Value::Vector(vec![
            Value::Int(1),
            Value::Na(NaKind::Int),
            Value::String("x".into()),
        ]));
        round_trip(Value::List(vec![
            (Some("a".to_string()), Value::Int(1)),
            (None, Value::Bool(false)),
        ]));
        let mut map = IndexMap::new();
        map.insert("k1".to_string(), Value::Int(1));
        map.insert("k2".to_string(), Value::Vector(vec![Value::Float(0.5)]));
        round_trip(Value::Dict(map));
        round_trip(Value::NDArray(
            NDArray::new(vec![2, 2], vec![1.0, 2.0, 3.0, 4.0]).unwrap(),
        ));
    }

    #[test]
    fn errors_and_intents_round_trip() {
        round_trip(Value::error(
            TError::key_error("missing").with_context("file", "a.t"),
        ));
        round_trip(Value::Intent(Intent {
            fields: vec![("goal".to_string(), Value::String("report".into()))],
        }));
    }

    #[test]
    fn formula_round_trips_via_deparse() {
        let f = parser::parse_expression("y ~ x + z").unwrap();
        let v = match &*f {
            crate::interp::ast::Expr::Formula(l, r) => Value::Formula(Formula {
                lhs: l.clone(),
                rhs: r.clone(),
            }),
            _ => unreachable!(),
        };
        let bytes = serialize_value(&v).unwrap();
        let back = deserialize_value(&bytes).unwrap();
        match back {
            Value::Formula(f) => {
                assert_eq!(f.lhs.deparse(), "y");
                assert_eq!(f.rhs.deparse(), "(x + z)");
            }
            other => panic!("expected formula, got {other}"),
        }
    }

    #[test]
    fn dataframe_round_trips() {
        let df = DataFrame::from_columns(vec![
            (
                "name".to_string(),
                vec![Value::String("a".into()), Value::Na(NaKind::Generic)],
            ),
            ("age".to_string(), vec![Value::Int(30), Value::Int(25)]),
        ])
        .unwrap()
        .with_groups(vec!["name".to_string()]);
        let bytes = serialize_value(&Value::DataFrame(df.clone())).unwrap();
        match deserialize_value(&bytes).unwrap() {
            Value::DataFrame(back) => {
                assert_eq!(*back.table, *df.table);
                assert_eq!(back.groups, df.groups);
            }
            other => panic!("expected dataframe, got {other}"),
        }
    }

    #[test]
    fn deterministic_bytes() {
        let v = Value::Vector(vec![Value::Int(1), Value::Float(2.0)]);
        assert_eq!(serialize_value(&v).unwrap(), serialize_value(&v).unwrap());
    }

    #[test]
    fn functions_refuse_to_serialize() {
        let interp = crate::interp::eval::Interpreter::new();
        let f = interp.eval_source("\\(x) x");
        let err = serialize_value(&f).unwrap_err();
        assert_eq!(err.code, ErrorCode::ValueError);
    }

    #[test]
    fn bad_payloads_are_file_errors() {
        assert_eq!(
            deserialize_value(b"NOPE").unwrap_err().code,
            ErrorCode::FileError
        );
        let mut bytes = serialize_value(&Value::Int(1)).unwrap();
        bytes.push(0xff);
        assert_eq!(
            deserialize_value(&bytes).unwrap_err().code,
            ErrorCode::FileError
        );
        let bytes = serialize_value(&Value::Vector(vec![Value::Int(1)])).unwrap();
        assert_eq!(
            deserialize_value(&bytes[..bytes.len() - 2]).unwrap_err().code,
            ErrorCode::FileError
        );
    }
}
