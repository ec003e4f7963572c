use std::fmt::Display;

use crate::interp::value::NaKind;
use crate::interp::{TError, Value};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ColumnType {
    Int64,
    Float64,
    Bool,
    String,
    Null,
}

impl Display for ColumnType {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let s = match self {
            ColumnType::Int64 => "Int64",
            ColumnType::Float64 => "Float64",
            ColumnType::Bool => "Bool",
            ColumnType::String => "String",
            ColumnType::Null => "Null",
        };
        f.write_str(s)
    }
}

/// Typed column storage. A `None` slot is a null, surfaced to the value layer
/// as the matching typed NA.
#[derive(Debug, Clone, PartialEq)]
pub enum ColumnData {
    Int(Vec<Option<i64>>),
    Float(Vec<Option<f64>>),
    Bool(Vec<Option<bool>>),
    String(Vec<Option<String>>),
    /// All-null column of unknown type (e.g. an empty CSV column).
    Null(usize),
}

impl ColumnData {
    pub fn len(&self) -> usize {
        match self {
            ColumnData::Int(v) => v.len(),
            ColumnData::Float(v) => v.len(),
            ColumnData::Bool(v) => v.len(),
            ColumnData::String(v) => v.len(),
            ColumnData::Null(n) => *n,
        }
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    pub fn column_type(&self) -> ColumnType {
        match self {
            ColumnData::Int(_) => ColumnType::Int64,
            ColumnData::Float(_) => ColumnType::Float64,
            ColumnData::Bool(_) => ColumnType::Bool,
            ColumnData::String(_) => ColumnType::String,
            ColumnData::Null(_) => ColumnType::Null,
        }
    }

    pub fn value_at(&self, i: usize) -> Value {
        match self {
            ColumnData::Int(v) => match v[i] {
                Some(n) => Value::Int(n),
                None => Value::Na(NaKind::Int),
            },
            ColumnData::Float(v) => match v[i] {
                Some(x) => Value::Float(x),
                None => Value::Na(NaKind::Float),
            },
            ColumnData::Bool(v) => match v[i] {
                Some(b) => Value::Bool(b),
                None => Value::Na(NaKind::Bool),
            },
            ColumnData::String(v) => match &v[i] {
                Some(s) => Value::String(s.clone()),
                None => Value::Na(NaKind::String),
            },
            ColumnData::Null(_) => Value::Na(NaKind::Generic),
        }
    }

    pub fn take(&self, indices: &[usize]) -> ColumnData {
        match self {
            ColumnData::Int(v) => ColumnData::Int(indices.iter().map(|&i| v[i]).collect()),
            ColumnData::Float(v) => ColumnData::Float(indices.iter().map(|&i| v[i]).collect()),
            ColumnData::Bool(v) => ColumnData::Bool(indices.iter().map(|&i| v[i]).collect()),
            ColumnData::String(v) => {
                ColumnData::String(indices.iter().map(|&i| v[i].clone()).collect())
            }
            ColumnData::Null(_) => ColumnData::Null(indices.len()),
        }
    }

    pub fn filter(&self, mask: &[bool]) -> ColumnData {
        let indices: Vec<usize> = mask
            .iter()
            .enumerate()
            .filter_map(|(i, keep)| keep.then_some(i))
            .collect();
        self.take(&indices)
    }

    /// Zero-copy view over a contiguous Int64 buffer, when the column holds
    /// no nulls.
    pub fn int_buffer(&self) -> Option<Vec<i64>> {
        match self {
            ColumnData::Int(v) => v.iter().copied().collect::<Option<Vec<_>>>(),
            _ => None,
        }
    }

    pub fn float_buffer(&self) -> Option<Vec<f64>> {
        match self {
            ColumnData::Float(v) => v.iter().copied().collect::<Option<Vec<_>>>(),
            ColumnData::Int(v) => v
                .iter()
                .map(|o| o.map(|n| n as f64))
                .collect::<Option<Vec<_>>>(),
            _ => None,
        }
    }

    /// Build a typed column from runtime values: the bridge from the value
    /// model into the engine. Mixed Int/Float widens to Float; anything else
    /// mixed is a TypeError.
    pub fn from_values(values: &[Value]) -> Result<ColumnData, TError> {
        let mut ty: Option<ColumnType> = None;
        for v in values {
            let t = match v {
                Value::Int(_) => ColumnType::Int64,
                Value::Float(_) => ColumnType::Float64,
                Value::Bool(_) => ColumnType::Bool,
                Value::String(_) => ColumnType::String,
                Value::Na(_) | Value::Null => continue,
                v => {
                    return Err(TError::type_error(format!(
                        "cannot store {} in a dataframe column",
                        v.kind()
                    )))
                }
            };
            ty = Some(match (ty, t) {
                (None, t) => t,
                (Some(a), b) if a == b => a,
                (Some(ColumnType::Int64), ColumnType::Float64)
                | (Some(ColumnType::Float64), ColumnType::Int64) => ColumnType::Float64,
                (Some(a), b) => {
                    return Err(TError::type_error(format!(
                        "column mixes {a} and {b} values"
                    )))
                }
            });
        }
        let out = match ty {
            None => ColumnData::Null(values.len()),
            Some(ColumnType::Int64) => ColumnData::Int(
                values
                    .iter()
                    .map(|v| match v {
                        Value::Int(n) => Some(*n),
                        _ => None,
                    })
                    .collect(),
            ),
            Some(ColumnType::Float64) => ColumnData::Float(
                values
                    .iter()
                    .map(|v| match v {
                        Value::Int(n) => Some(*n as f64),
                        Value::Float(x) => Some(*x),
                        _ => None,
                    })
                    .collect(),
            ),
            Some(ColumnType::Bool) => ColumnData::Bool(
                values
                    .iter()
                    .map(|v| match v {
                        Value::Bool(b) => Some(*b),
                        _ => None,
                    })
                    .collect(),
            ),
            Some(ColumnType::String) => ColumnData::String(
                values
                    .iter()
                    .map(|v| match v {
                        Value::String(s) => Some(s.clone()),
                        _ => None,
                    })
                    .collect(),
            ),
            Some(ColumnType::Null) => ColumnData::Null(values.len()),
        };
        Ok(out)
    }

    pub fn to_values(&self) -> Vec<Value> {
        (0..self.len()).map(|i| self.value_at(i)).collect()
    }
}

/// A borrowed window into a column.
#[derive(Debug, Clone, Copy)]
pub struct ColumnView<'a> {
    data: &'a ColumnData,
    start: usize,
    len: usize,
}

impl<'a> ColumnView<'a> {
    pub fn new(data: &'a ColumnData) -> Self {
        Self {
            data,
            start: 0,
            len: data.len(),
        }
    }

    pub fn length(&self) -> usize {
        self.len
    }

    pub fn column_type(&self) -> ColumnType {
        self.data.column_type()
    }

    pub fn get_value_at(&self, i: usize) -> Result<Value, TError> {
        if i >= self.len {
            return Err(TError::index_error(format!(
                "row {i} out of range for column of length {}",
                self.len
            )));
        }
        Ok(self.data.value_at(self.start + i))
    }

    pub fn get_slice(&self, start: usize, len: usize) -> Result<ColumnView<'a>, TError> {
        if start + len > self.len {
            return Err(TError::index_error(format!(
                "slice {start}..{} out of range for column of length {}",
                start + len,
                self.len
            )));
        }
        Ok(ColumnView {
            data: self.data,
            start: self.start + start,
            len,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn from_values_infers_and_widens() {
        let col = ColumnData::from_values(&[Value::Int(1), Value::Float(2.5)]).unwrap();
        assert_eq!(col.column_type(), ColumnType::Float64);
        let col =
            ColumnData::from_values(&[Value::Int(1), Value::Na(NaKind::Int), Value::Int(3)])
                .unwrap();
        assert_eq!(col.column_type(), ColumnType::Int64);
        assert_eq!(col.value_at(1), Value::Na(NaKind::Int));
        assert!(ColumnData::from_values(&[Value::Int(1), Value::Bool(true)]).is_err());
    }

    #[test]
    fn null_slots_surface_as_typed_na() {
        let col = ColumnData::String(vec![Some("a".into()), None]);
        assert_eq!(col.value_at(1), Value::Na(NaKind::String));
    }

    #[test]
    fn views_slice_within_bounds() {
        let col = ColumnData::Int(vec![Some(1), Some(2), Some(3), Some(4)]);
        let view = ColumnView::new(&col);
        let slice = view.get_slice(1, 2).unwrap();
        assert_eq!(slice.length(), 2);
        assert_eq!(slice.get_value_at(0).unwrap(), Value::Int(2));
        assert!(slice.get_value_at(2).is_err());
        assert!(view.get_slice(3, 2).is_err());
    }

    #[test]
    fn buffers_require_no_nulls() {
        let col = ColumnData::Int(vec![Some(1), None]);
        assert!(col.int_buffer().is_none());
        let col = ColumnData::Int(vec![Some(1), Some(2)]);
        assert_eq!(col.float_buffer().unwrap(), vec![1.0, 2.0]);
    }
}
