use std::rc::Rc;

use indexmap::IndexMap;

use crate::interp::{TError, Value};

pub mod column;
pub mod csv;
pub mod table;

pub use column::{ColumnData, ColumnType, ColumnView};
pub use table::{AggOp, Grouping, Table};

/// A table handle plus grouping metadata. The table itself is shared; data
/// verbs produce new handles.
#[derive(Debug, Clone)]
pub struct DataFrame {
    pub table: Rc<Table>,
    pub groups: Vec<String>,
}

impl DataFrame {
    pub fn new(table: Table) -> Self {
        Self {
            table: Rc::new(table),
            groups: Vec::new(),
        }
    }

    pub fn with_table(&self, table: Table) -> Self {
        Self {
            table: Rc::new(table),
            groups: self.groups.clone(),
        }
    }

    pub fn with_groups(&self, groups: Vec<String>) -> Self {
        Self {
            table: self.table.clone(),
            groups,
        }
    }

    /// Build a dataframe from named vectors, checking lengths agree.
    pub fn from_columns(columns: Vec<(String, Vec<Value>)>) -> Result<Self, TError> {
        let mut typed = Vec::with_capacity(columns.len());
        for (name, values) in columns {
            let col = ColumnData::from_values(&values)
                .map_err(|e| TError::new(e.code, format!("column `{name}`: {}", e.message)))?;
            typed.push((name, col));
        }
        Ok(Self::new(Table::new(typed)?))
    }

    /// Bridge a column out of the engine as a Vector with typed NAs.
    pub fn column_vector(&self, name: &str) -> Value {
        match self.table.column(name) {
            Some(col) => Value::Vector(col.to_values()),
            None => Value::error(TError::key_error(format!("column `{name}` not found"))),
        }
    }

    /// One row as a dict, used by the desugared row lambdas.
    pub fn row_dict(&self, row: usize) -> IndexMap<String, Value> {
        self.table
            .columns()
            .iter()
            .map(|(name, col)| (name.clone(), col.value_at(row)))
            .collect()
    }

    /// Per-group dict of column vectors, used by `summarize`.
    pub fn group_dict(&self, rows: &[usize]) -> IndexMap<String, Value> {
        self.table
            .columns()
            .iter()
            .map(|(name, col)| {
                let values: Vec<Value> = rows.iter().map(|&r| col.value_at(r)).collect();
                (name.clone(), Value::Vector(values))
            })
            .collect()
    }

    pub fn render(&self) -> String {
        let names = self.table.column_names().join(", ");
        let mut out = format!(
            "DataFrame({} rows x {} cols: {names})",
            self.table.num_rows(),
            self.table.num_columns()
        );
        if !self.groups.is_empty() {
            out.push_str(&format!(" grouped by [{}]", self.groups.join(", ")));
        }
        out
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::interp::value::NaKind;

    #[test]
    fn from_columns_checks_lengths() {
        let df = DataFrame::from_columns(vec![
            ("a".to_string(), vec![Value::Int(1), Value::Int(2)]),
            ("b".to_string(), vec![Value::Float(1.0), Value::Float(2.0)]),
        ])
        .unwrap();
        assert_eq!(df.table.num_rows(), 2);
        let err = DataFrame::from_columns(vec![
            ("a".to_string(), vec![Value::Int(1)]),
            ("b".to_string(), vec![Value::Int(1), Value::Int(2)]),
        ])
        .unwrap_err();
        assert_eq!(err.code, crate::interp::ErrorCode::ValueError);
    }

    #[test]
    fn column_vector_carries_typed_na() {
        let df = DataFrame::from_columns(vec![(
            "x".to_string(),
            vec![Value::Int(1), Value::Na(NaKind::Generic)],
        )])
        .unwrap();
        match df.column_vector("x") {
            Value::Vector(v) => assert_eq!(v[1], Value::Na(NaKind::Int)),
            other => panic!("expected vector, got {other}"),
        }
        assert!(df.column_vector("nope").is_error());
    }

    #[test]
    fn row_dict_preserves_column_order() {
        let df = DataFrame::from_columns(vec![
            ("b".to_string(), vec![Value::Int(1)]),
            ("a".to_string(), vec![Value::Int(2)]),
        ])
        .unwrap();
        let row = df.row_dict(0);
        let keys: Vec<_> = row.keys().cloned().collect();
        assert_eq!(keys, vec!["b", "a"]);
    }
}
