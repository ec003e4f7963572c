use std::collections::HashMap;

use super::column::{ColumnData, ColumnType, ColumnView};
use crate::interp::{TError, Value};

/// The in-memory columnar table. Every operation is pure: it returns a new
/// table and leaves the receiver untouched.
#[derive(Debug, Clone, PartialEq, Default)]
pub struct Table {
    columns: Vec<(String, ColumnData)>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum AggOp {
    Sum,
    Mean,
    Count,
    Min,
    Max,
}

impl AggOp {
    /// The aggregate column name; `count` follows the `n` convention.
    pub fn output_name(&self, col: &str) -> String {
        match self {
            AggOp::Count => "n".to_string(),
            AggOp::Sum => format!("sum_{col}"),
            AggOp::Mean => format!("mean_{col}"),
            AggOp::Min => format!("min_{col}"),
            AggOp::Max => format!("max_{col}"),
        }
    }
}

/// Row indices per group key, in first-appearance order.
#[derive(Debug, Clone)]
pub struct Grouping {
    pub keys: Vec<String>,
    pub groups: Vec<(Vec<Value>, Vec<usize>)>,
}

impl Table {
    pub fn new(columns: Vec<(String, ColumnData)>) -> Result<Self, TError> {
        if let Some((first_name, first)) = columns.first() {
            let n = first.len();
            for (name, col) in &columns {
                if col.len() != n {
                    return Err(TError::value_error(format!(
                        "column `{name}` has {} rows but `{first_name}` has {n}",
                        col.len()
                    )));
                }
            }
        }
        let mut seen = HashMap::new();
        for (name, _) in &columns {
            if seen.insert(name.clone(), ()).is_some() {
                return Err(TError::value_error(format!("duplicate column `{name}`")));
            }
        }
        Ok(Self { columns })
    }

    pub fn num_rows(&self) -> usize {
        self.columns.first().map_or(0, |(_, c)| c.len())
    }

    pub fn num_columns(&self) -> usize {
        self.columns.len()
    }

    pub fn column_names(&self) -> Vec<String> {
        self.columns.iter().map(|(n, _)| n.clone()).collect()
    }

    pub fn has_column(&self, name: &str) -> bool {
        self.columns.iter().any(|(n, _)| n == name)
    }

    pub fn schema(&self) -> Vec<(String, ColumnType)> {
        self.columns
            .iter()
            .map(|(n, c)| (n.clone(), c.column_type()))
            .collect()
    }

    pub fn column(&self, name: &str) -> Option<&ColumnData> {
        self.columns
            .iter()
            .find(|(n, _)| n == name)
            .map(|(_, c)| c)
    }

    pub fn get_column(&self, name: &str) -> Option<ColumnView<'_>> {
        self.column(name).map(ColumnView::new)
    }

    pub fn columns(&self) -> &[(String, ColumnData)] {
        &self.columns
    }

    pub fn project(&self, names: &[String]) -> Result<Table, TError> {
        let mut out = Vec::with_capacity(names.len());
        for name in names {
            match self.column(name) {
                Some(col) => out.push((name.clone(), col.clone())),
                None => {
                    return Err(TError::key_error(format!("column `{name}` not found")));
                }
            }
        }
        Ok(Table { columns: out })
    }

    pub fn filter(&self, mask: &[bool]) -> Result<Table, TError> {
        if mask.len() != self.num_rows() {
            return Err(TError::value_error(format!(
                "filter mask has {} entries for {} rows",
                mask.len(),
                self.num_rows()
            )));
        }
        Ok(Table {
            columns: self
                .columns
                .iter()
                .map(|(n, c)| (n.clone(), c.filter(mask)))
                .collect(),
        })
    }

    /// Add or replace a column; the new column must match the row count
    /// (except on an empty table).
    pub fn add_column(&self, name: &str, column: ColumnData) -> Result<Table, TError> {
        if self.num_columns() > 0 && column.len() != self.num_rows() {
            return Err(TError::value_error(format!(
                "column `{name}` has {} rows but the table has {}",
                column.len(),
                self.num_rows()
            )));
        }
        let mut columns = self.columns.clone();
        match columns.iter_mut().find(|(n, _)| n == name) {
            Some(slot) => slot.1 = column,
            None => columns.push((name.to_string(), column)),
        }
        Ok(Table { columns })
    }

    pub fn take_rows(&self, indices: &[usize]) -> Result<Table, TError> {
        let n = self.num_rows();
        if let Some(&bad) = indices.iter().find(|&&i| i >= n) {
            return Err(TError::index_error(format!(
                "row {bad} out of range for table of {n} rows"
            )));
        }
        Ok(Table {
            columns: self
                .columns
                .iter()
                .map(|(name, c)| (name.clone(), c.take(indices)))
                .collect(),
        })
    }

    pub fn sort_by_indices(&self, indices: &[usize]) -> Result<Table, TError> {
        self.take_rows(indices)
    }

    /// Engine-side single-column sort. Falls back to a stable client-side
    /// index sort; nulls sort last regardless of direction.
    pub fn sort_by_column(&self, name: &str, ascending: bool) -> Result<Table, TError> {
        let col = self
            .column(name)
            .ok_or_else(|| TError::key_error(format!("column `{name}` not found")))?;
        let mut indices: Vec<usize> = (0..self.num_rows()).collect();
        indices.sort_by(|&a, &b| {
            let va = col.value_at(a);
            let vb = col.value_at(b);
            match (va.is_na(), vb.is_na()) {
                (true, true) => std::cmp::Ordering::Equal,
                (true, false) => std::cmp::Ordering::Greater,
                (false, true) => std::cmp::Ordering::Less,
                (false, false) => {
                    let ord = va.try_cmp(&vb).unwrap_or(std::cmp::Ordering::Equal);
                    if ascending {
                        ord
                    } else {
                        ord.reverse()
                    }
                }
            }
        });
        self.take_rows(&indices)
    }

    pub fn group_by(&self, keys: &[String]) -> Result<Grouping, TError> {
        let key_cols: Vec<&ColumnData> = keys
            .iter()
            .map(|k| {
                self.column(k)
                    .ok_or_else(|| TError::key_error(format!("column `{k}` not found")))
            })
            .collect::<Result<_, _>>()?;
        let mut seen: HashMap<String, usize> = HashMap::new();
        let mut groups: Vec<(Vec<Value>, Vec<usize>)> = Vec::new();
        for row in 0..self.num_rows() {
            let key_values: Vec<Value> = key_cols.iter().map(|c| c.value_at(row)).collect();
            let mut fingerprint = String::new();
            for v in &key_values {
                fingerprint.push_str(&v.to_string());
                fingerprint.push('\u{1}');
            }
            match seen.get(&fingerprint) {
                Some(&idx) => groups[idx].1.push(row),
                None => {
                    seen.insert(fingerprint, groups.len());
                    groups.push((key_values, vec![row]));
                }
            }
        }
        Ok(Grouping {
            keys: keys.to_vec(),
            groups,
        })
    }

    /// Group-wise aggregate. Null slots are skipped; summation is sequential
    /// per group so results are reproducible.
    pub fn group_aggregate(&self, grouping: &Grouping, op: AggOp, col: &str) -> Result<Table, TError> {
        let data = if op == AggOp::Count {
            None
        } else {
            Some(self.column(col).ok_or_else(|| {
                TError::key_error(format!("column `{col}` not found"))
            })?)
        };

        let mut key_columns: Vec<Vec<Value>> = vec![Vec::new(); grouping.keys.len()];
        let mut agg_values: Vec<Value> = Vec::with_capacity(grouping.groups.len());
        for (key_values, rows) in &grouping.groups {
            for (i, v) in key_values.iter().enumerate() {
                key_columns[i].push(v.clone());
            }
            let out = match (op, data) {
                (AggOp::Count, _) => Value::Int(rows.len() as i64),
                (_, Some(col_data)) => {
                    let values: Vec<Value> = rows
                        .iter()
                        .map(|&r| col_data.value_at(r))
                        .filter(|v| !v.is_na())
                        .collect();
                    aggregate(op, &values)?
                }
                _ => unreachable!(),
            };
            agg_values.push(out);
        }

        let mut columns = Vec::new();
        for (i, key) in grouping.keys.iter().enumerate() {
            columns.push((key.clone(), ColumnData::from_values(&key_columns[i])?));
        }
        columns.push((op.output_name(col), ColumnData::from_values(&agg_values)?));
        Table::new(columns)
    }

    /// Columnwise vectorized math over one numeric column.
    pub fn map_column(&self, name: &str, f: impl Fn(f64) -> f64) -> Result<Table, TError> {
        let col = self
            .column(name)
            .ok_or_else(|| TError::key_error(format!("column `{name}` not found")))?;
        let mapped = match col {
            ColumnData::Int(v) => {
                ColumnData::Float(v.iter().map(|o| o.map(|n| f(n as f64))).collect())
            }
            ColumnData::Float(v) => ColumnData::Float(v.iter().map(|o| o.map(&f)).collect()),
            other => {
                return Err(TError::type_error(format!(
                    "column `{name}` is {} and not numeric",
                    other.column_type()
                )))
            }
        };
        self.add_column(name, mapped)
    }
}

fn aggregate(op: AggOp, values: &[Value]) -> Result<Value, TError> {
    match op {
        AggOp::Count => Ok(Value::Int(values.len() as i64)),
        AggOp::Sum | AggOp::Mean => {
            let mut total = 0.0;
            let mut all_int = true;
            for v in values {
                match v {
                    Value::Int(n) => total += *n as f64,
                    Value::Float(x) => {
                        all_int = false;
                        total += x;
                    }
                    v => {
                        return Err(TError::type_error(format!(
                            "cannot aggregate {} values",
                            v.kind()
                        )))
                    }
                }
            }
            if op == AggOp::Mean {
                Ok(Value::Float(total / values.len() as f64))
            } else if all_int {
                Ok(Value::Int(total as i64))
            } else {
                Ok(Value::Float(total))
            }
        }
        AggOp::Min | AggOp::Max => {
            let mut best: Option<Value> = None;
            for v in values {
                best = Some(match best {
                    None => v.clone(),
                    Some(b) => {
                        let ord = v.try_cmp(&b).ok_or_else(|| {
                            TError::type_error(format!("cannot aggregate {} values", v.kind()))
                        })?;
                        let replace = if op == AggOp::Min {
                            ord.is_lt()
                        } else {
                            ord.is_gt()
                        };
                        if replace {
                            v.clone()
                        } else {
                            b
                        }
                    }
                });
            }
            best.ok_or_else(|| TError::value_error("aggregate over an empty group"))
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn sample() -> Table {
        Table::new(vec![
            (
                "city".to_string(),
                ColumnData::String(vec![
                    Some("ghent".into()),
                    Some("liege".into()),
                    Some("ghent".into()),
                ]),
            ),
            (
                "age".to_string(),
                ColumnData::Int(vec![Some(30), Some(25), Some(35)]),
            ),
        ])
        .unwrap()
    }

    #[test]
    fn projection_and_filtering() {
        let t = sample();
        let p = t.project(&["age".to_string()]).unwrap();
        assert_eq!(p.num_columns(), 1);
        let f = t.filter(&[true, false, true]).unwrap();
        assert_eq!(f.num_rows(), 2);
        assert!(t.filter(&[true]).is_err());
        assert!(t.project(&["nope".to_string()]).is_err());
    }

    #[test]
    fn add_column_replaces_in_place() {
        let t = sample();
        let t2 = t
            .add_column("age", ColumnData::Int(vec![Some(1), Some(2), Some(3)]))
            .unwrap();
        assert_eq!(t2.num_columns(), 2);
        assert_eq!(t2.column("age").unwrap().value_at(0), Value::Int(1));
        assert!(t
            .add_column("bad", ColumnData::Int(vec![Some(1)]))
            .is_err());
    }

    #[test]
    fn grouping_preserves_first_appearance_order() {
        let t = sample();
        let g = t.group_by(&["city".to_string()]).unwrap();
        assert_eq!(g.groups.len(), 2);
        assert_eq!(g.groups[0].0[0], Value::String("ghent".into()));
        assert_eq!(g.groups[0].1, vec![0, 2]);
    }

    #[test]
    fn group_aggregate_layout() {
        let t = sample();
        let g = t.group_by(&["city".to_string()]).unwrap();
        let agg = t.group_aggregate(&g, AggOp::Mean, "age").unwrap();
        assert_eq!(agg.column_names(), vec!["city", "mean_age"]);
        assert_eq!(agg.column("mean_age").unwrap().value_at(0), Value::Float(32.5));
        let counts = t.group_aggregate(&g, AggOp::Count, "age").unwrap();
        assert_eq!(counts.column_names(), vec!["city", "n"]);
        assert_eq!(counts.column("n").unwrap().value_at(1), Value::Int(1));
    }

    #[test]
    fn sort_puts_nulls_last() {
        let t = Table::new(vec![(
            "x".to_string(),
            ColumnData::Int(vec![Some(2), None, Some(1)]),
        )])
        .unwrap();
        let sorted = t.sort_by_column("x", true).unwrap();
        assert_eq!(sorted.column("x").unwrap().value_at(0), Value::Int(1));
        assert!(sorted.column("x").unwrap().value_at(2).is_na());
    }

    #[test]
    fn map_column_vectorizes() {
        let t = Table::new(vec![(
            "x".to_string(),
            ColumnData::Int(vec![Some(1), Some(4)]),
        )])
        .unwrap();
        let out = t.map_column("x", f64::sqrt).unwrap();
        assert_eq!(out.column("x").unwrap().value_at(1), Value::Float(2.0));
    }
}
