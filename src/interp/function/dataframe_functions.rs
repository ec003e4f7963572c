use std::path::Path;

use super::{Builtin, CallSite};
use crate::interp::ast::{Arg, Expr};
use crate::interp::dataframe::{csv, ColumnData, DataFrame};
use crate::interp::env::Environment;
use crate::interp::eval::Interpreter;
use crate::interp::{nse, TError, Value};

/// Resolve the dataframe input of a raw data verb: either piped in (already
/// evaluated) or the first unnamed raw argument.
fn df_input<'a>(
    interp: &Interpreter,
    env: &Environment,
    verb: &str,
    site: &'a CallSite,
) -> Result<(DataFrame, &'a [Arg]), TError> {
    if let Some(v) = site.positional.first() {
        let df = v.get_dataframe()?.clone();
        return Ok((df, &site.raw));
    }
    let first = site
        .raw
        .first()
        .ok_or_else(|| TError::arity_error(format!("`{verb}` expects a dataframe")))?;
    if first.name.is_some() {
        return Err(TError::type_error(format!(
            "`{verb}` expects the dataframe as its first argument"
        )));
    }
    let v = interp.eval(&first.value, env);
    match v {
        Value::Error(e) => Err(*e),
        v => Ok((v.get_dataframe()?.clone(), &site.raw[1..])),
    }
}

/// `select`/`arrange`/`group_by` arguments: `$col` or a string literal.
fn column_name_arg(verb: &str, arg: &Arg) -> Result<String, TError> {
    if arg.name.is_some() {
        return Err(TError::type_error(format!(
            "`{verb}` does not take named arguments"
        )));
    }
    match &*arg.value {
        Expr::ColumnRef(name) => Ok(name.clone()),
        Expr::Str(name) => Ok(name.clone()),
        e => Err(TError::type_error(format!(
            "`{verb}` expects `$column` or a string literal, got `{}`",
            e.deparse()
        ))),
    }
}

fn eval_row_fn(
    interp: &Interpreter,
    f: &Value,
    row: indexmap::IndexMap<String, Value>,
) -> Value {
    interp.call_function(f, vec![Value::Dict(row)])
}

fn select(interp: &Interpreter, env: &Environment, site: CallSite) -> Value {
    let (df, rest) = match df_input(interp, env, "select", &site) {
        Ok(x) => x,
        Err(e) => return Value::error(e),
    };
    let mut names = Vec::with_capacity(rest.len());
    for arg in rest {
        match column_name_arg("select", arg) {
            Ok(name) => names.push(name),
            Err(e) => return Value::error(e),
        }
    }
    match df.table.project(&names) {
        Ok(table) => {
            let groups: Vec<String> = df
                .groups
                .iter()
                .filter(|g| names.contains(g))
                .cloned()
                .collect();
            Value::DataFrame(df.with_table(table).with_groups(groups))
        }
        Err(e) => Value::error(e),
    }
}

fn filter(interp: &Interpreter, env: &Environment, site: CallSite) -> Value {
    let (df, rest) = match df_input(interp, env, "filter", &site) {
        Ok(x) => x,
        Err(e) => return Value::error(e),
    };
    if rest.is_empty() {
        return Value::error(TError::arity_error(
            "`filter` expects at least one predicate",
        ));
    }
    let mut preds = Vec::with_capacity(rest.len());
    for arg in rest {
        if arg.name.is_some() {
            return Value::error(TError::type_error(
                "`filter` does not take named arguments",
            ));
        }
        match nse::as_row_fn(interp, env, "filter", &arg.value) {
            Ok(f) => preds.push(f),
            Err(e) => return Value::error(e),
        }
    }
    let nrows = df.table.num_rows();
    let mut mask = Vec::with_capacity(nrows);
    for row in 0..nrows {
        let mut keep = true;
        for pred in &preds {
            match eval_row_fn(interp, pred, df.row_dict(row)) {
                Value::Bool(b) => keep = keep && b,
                Value::Error(e) => return Value::Error(e),
                Value::Na(_) => {
                    return Value::error(TError::na_operand("`filter` predicate returned NA"))
                }
                v => {
                    return Value::error(TError::type_error(format!(
                        "`filter` predicate must return a bool, got {}",
                        v.kind()
                    )))
                }
            }
            if !keep {
                break;
            }
        }
        mask.push(keep);
    }
    match df.table.filter(&mask) {
        Ok(table) => Value::DataFrame(df.with_table(table)),
        Err(e) => Value::error(e),
    }
}

fn mutate(interp: &Interpreter, env: &Environment, site: CallSite) -> Value {
    let (mut df, rest) = match df_input(interp, env, "mutate", &site) {
        Ok(x) => x,
        Err(e) => return Value::error(e),
    };
    if rest.is_empty() {
        return Value::error(TError::arity_error(
            "`mutate` expects at least one `name = expression` argument",
        ));
    }
    for arg in rest {
        let name = match &arg.name {
            Some(name) => name.clone(),
            None => {
                return Value::error(TError::type_error(
                    "`mutate` arguments must be named: `mutate(df, col = $a + 1)`",
                ))
            }
        };
        let f = match nse::as_row_fn(interp, env, "mutate", &arg.value) {
            Ok(f) => f,
            Err(e) => return Value::error(e),
        };
        let nrows = df.table.num_rows();
        let mut values = Vec::with_capacity(nrows);
        for row in 0..nrows {
            match eval_row_fn(interp, &f, df.row_dict(row)) {
                Value::Error(e) => return Value::Error(e),
                v => values.push(v),
            }
        }
        let column = match ColumnData::from_values(&values) {
            Ok(c) => c,
            Err(e) => return Value::error(e),
        };
        match df.table.add_column(&name, column) {
            Ok(table) => df = df.with_table(table),
            Err(e) => return Value::error(e),
        }
    }
    Value::DataFrame(df)
}

fn arrange(interp: &Interpreter, env: &Environment, site: CallSite) -> Value {
    let (df, rest) = match df_input(interp, env, "arrange", &site) {
        Ok(x) => x,
        Err(e) => return Value::error(e),
    };
    let mut keys = Vec::with_capacity(rest.len());
    for arg in rest {
        match column_name_arg("arrange", arg) {
            Ok(name) => keys.push(name),
            Err(e) => return Value::error(e),
        }
    }
    if keys.is_empty() {
        return Value::error(TError::arity_error(
            "`arrange` expects at least one sort key",
        ));
    }
    let mut key_cols = Vec::with_capacity(keys.len());
    for key in &keys {
        match df.table.column(key) {
            Some(col) => key_cols.push(col),
            None => {
                return Value::error(TError::key_error(format!("column `{key}` not found")))
            }
        }
    }
    let mut indices: Vec<usize> = (0..df.table.num_rows()).collect();
    indices.sort_by(|&a, &b| {
        for col in &key_cols {
            let va = col.value_at(a);
            let vb = col.value_at(b);
            let ord = match (va.is_na(), vb.is_na()) {
                (true, true) => std::cmp::Ordering::Equal,
                (true, false) => std::cmp::Ordering::Greater,
                (false, true) => std::cmp::Ordering::Less,
                (false, false) => va.try_cmp(&vb).unwrap_or(std::cmp::Ordering::Equal),
            };
            if ord != std::cmp::Ordering::Equal {
                return ord;
            }
        }
        std::cmp::Ordering::Equal
    });
    match df.table.sort_by_indices(&indices) {
        Ok(table) => Value::DataFrame(df.with_table(table)),
        Err(e) => Value::error(e),
    }
}

fn group_by(interp: &Interpreter, env: &Environment, site: CallSite) -> Value {
    let (df, rest) = match df_input(interp, env, "group_by", &site) {
        Ok(x) => x,
        Err(e) => return Value::error(e),
    };
    let mut keys = Vec::with_capacity(rest.len());
    for arg in rest {
        match column_name_arg("group_by", arg) {
            Ok(name) => {
                if !df.table.has_column(&name) {
                    return Value::error(TError::key_error(format!(
                        "column `{name}` not found"
                    )));
                }
                keys.push(name);
            }
            Err(e) => return Value::error(e),
        }
    }
    if keys.is_empty() {
        return Value::error(TError::arity_error(
            "`group_by` expects at least one column",
        ));
    }
    Value::DataFrame(df.with_groups(keys))
}

fn summarize(interp: &Interpreter, env: &Environment, site: CallSite) -> Value {
    let (df, rest) = match df_input(interp, env, "summarize", &site) {
        Ok(x) => x,
        Err(e) => return Value::error(e),
    };
    if rest.is_empty() {
        return Value::error(TError::arity_error(
            "`summarize` expects at least one `name = expression` argument",
        ));
    }
    let mut outputs: Vec<(String, Value)> = Vec::with_capacity(rest.len());
    for arg in rest {
        let name = match &arg.name {
            Some(name) => name.clone(),
            None => {
                return Value::error(TError::type_error(
                    "`summarize` arguments must be named: `summarize(df, m = mean($x))`",
                ))
            }
        };
        match nse::as_row_fn(interp, env, "summarize", &arg.value) {
            Ok(f) => outputs.push((name, f)),
            Err(e) => return Value::error(e),
        }
    }

    // one group per distinct key combination, or a single whole-table group
    let groups: Vec<(Vec<Value>, Vec<usize>)> = if df.groups.is_empty() {
        vec![(Vec::new(), (0..df.table.num_rows()).collect())]
    } else {
        match df.table.group_by(&df.groups) {
            Ok(grouping) => grouping.groups,
            Err(e) => return Value::error(e),
        }
    };

    let mut key_columns: Vec<Vec<Value>> = vec![Vec::new(); df.groups.len()];
    let mut out_columns: Vec<Vec<Value>> = vec![Vec::new(); outputs.len()];
    for (key_values, rows) in &groups {
        for (i, key) in key_values.iter().enumerate() {
            key_columns[i].push(key.clone());
        }
        for (i, (name, f)) in outputs.iter().enumerate() {
            match eval_row_fn(interp, f, df.group_dict(rows)) {
                Value::Error(e) => return Value::Error(e),
                v @ (Value::Int(_)
                | Value::Float(_)
                | Value::Bool(_)
                | Value::String(_)
                | Value::Na(_)) => out_columns[i].push(v),
                v => {
                    return Value::error(TError::type_error(format!(
                        "`summarize` expression `{name}` must return a scalar, got {}",
                        v.kind()
                    )))
                }
            }
        }
    }

    let mut columns = Vec::with_capacity(df.groups.len() + outputs.len());
    for (i, key) in df.groups.iter().enumerate() {
        match ColumnData::from_values(&key_columns[i]) {
            Ok(c) => columns.push((key.clone(), c)),
            Err(e) => return Value::error(e),
        }
    }
    for (i, (name, _)) in outputs.iter().enumerate() {
        match ColumnData::from_values(&out_columns[i]) {
            Ok(c) => columns.push((name.clone(), c)),
            Err(e) => return Value::error(e),
        }
    }
    match crate::interp::dataframe::Table::new(columns) {
        Ok(table) => Value::DataFrame(DataFrame::new(table)),
        Err(e) => Value::error(e),
    }
}

pub fn builtins() -> Vec<Builtin> {
    vec![
        Builtin::new("dataframe", 0, None, "Build a dataframe from named vectors.", |_, _, site| {
            if !site.positional.is_empty() {
                return Value::error(TError::type_error(
                    "`dataframe` only takes named arguments",
                ));
            }
            let mut n = 1;
            for v in site.named.values() {
                if let Value::Vector(items) = v {
                    n = n.max(items.len());
                }
            }
            let mut columns = Vec::with_capacity(site.named.len());
            for (name, v) in &site.named {
                let values = match v {
                    Value::Vector(items) => items.clone(),
                    scalar @ (Value::Int(_)
                    | Value::Float(_)
                    | Value::Bool(_)
                    | Value::String(_)
                    | Value::Na(_)) => vec![scalar.clone(); n],
                    v => {
                        return Value::error(TError::type_error(format!(
                            "`dataframe` column `{name}` must be a vector, got {}",
                            v.kind()
                        )))
                    }
                };
                columns.push((name.clone(), values));
            }
            match DataFrame::from_columns(columns) {
                Ok(df) => Value::DataFrame(df),
                Err(e) => Value::error(e),
            }
        })
        .any_named(),
        Builtin::new("select", 1, None, "Keep only the named columns.", select).raw(),
        Builtin::new("filter", 1, None, "Keep the rows every predicate accepts.", filter).raw(),
        Builtin::new("mutate", 1, None, "Add or replace computed columns.", mutate).raw(),
        Builtin::new("arrange", 1, None, "Sort rows by one or more columns.", arrange).raw(),
        Builtin::new("group_by", 1, None, "Record grouping columns.", group_by).raw(),
        Builtin::new("summarize", 1, None, "Collapse groups to one row each.", summarize).raw(),
        Builtin::new("summarise", 1, None, "Alias of `summarize`.", summarize).raw(),
        Builtin::new("ungroup", 1, Some(1), "Drop grouping metadata.", |_, _, site| {
            match site.arg(0).get_dataframe() {
                Ok(df) => Value::DataFrame(df.with_groups(Vec::new())),
                Err(e) => Value::error(e),
            }
        }),
        Builtin::new("nrow", 1, Some(1), "Number of rows.", |_, _, site| {
            match site.arg(0).get_dataframe() {
                Ok(df) => Value::Int(df.table.num_rows() as i64),
                Err(e) => Value::error(e),
            }
        }),
        Builtin::new("ncol", 1, Some(1), "Number of columns.", |_, _, site| {
            match site.arg(0).get_dataframe() {
                Ok(df) => Value::Int(df.table.num_columns() as i64),
                Err(e) => Value::error(e),
            }
        }),
        Builtin::new("colnames", 1, Some(1), "Column names in order.", |_, _, site| {
            match site.arg(0).get_dataframe() {
                Ok(df) => Value::Vector(
                    df.table
                        .column_names()
                        .into_iter()
                        .map(Value::String)
                        .collect(),
                ),
                Err(e) => Value::error(e),
            }
        }),
        Builtin::new("head", 1, Some(2), "First n rows (default 6).", |_, _, site| {
            let df = match site.arg(0).get_dataframe() {
                Ok(df) => df.clone(),
                Err(e) => return Value::error(e),
            };
            let n = match site.positional.get(1) {
                Some(v) => match v.get_usize() {
                    Ok(n) => n,
                    Err(e) => return Value::error(e),
                },
                None => 6,
            };
            let n = n.min(df.table.num_rows());
            let indices: Vec<usize> = (0..n).collect();
            match df.table.take_rows(&indices) {
                Ok(table) => Value::DataFrame(df.with_table(table)),
                Err(e) => Value::error(e),
            }
        }),
        Builtin::new("read_csv", 1, Some(1), "Load a CSV file as a dataframe.", |_, _, site| {
            let path = match site.arg(0).get_string() {
                Ok(p) => p.to_string(),
                Err(e) => return Value::error(e),
            };
            let separator = match csv_separator(&site) {
                Ok(sep) => sep,
                Err(e) => return Value::error(e),
            };
            let header = match site.named_bool("header", true) {
                Ok(h) => h,
                Err(e) => return Value::error(e),
            };
            match csv::read_csv(Path::new(&path), separator, header) {
                Ok(table) => Value::DataFrame(DataFrame::new(table)),
                Err(e) => Value::error(e),
            }
        })
        .named(&["separator", "header"])
        .io(),
        Builtin::new("write_csv", 2, Some(2), "Write a dataframe to a CSV file.", |_, _, site| {
            let df = match site.arg(0).get_dataframe() {
                Ok(df) => df,
                Err(e) => return Value::error(e),
            };
            let path = match site.arg(1).get_string() {
                Ok(p) => p.to_string(),
                Err(e) => return Value::error(e),
            };
            let separator = match csv_separator(&site) {
                Ok(sep) => sep,
                Err(e) => return Value::error(e),
            };
            match csv::write_csv(&df.table, Path::new(&path), separator) {
                Ok(()) => Value::String(path),
                Err(e) => Value::error(e),
            }
        })
        .named(&["separator"])
        .io(),
    ]
}

fn csv_separator(site: &CallSite) -> Result<u8, TError> {
    let sep = site.named_str("separator", ",")?;
    let bytes = sep.as_bytes();
    if bytes.len() != 1 {
        return Err(TError::value_error(format!(
            "`separator` must be a single character, got {sep:?}"
        )));
    }
    Ok(bytes[0])
}

#[cfg(test)]
mod tests {
    use crate::interp::eval::Interpreter;
    use crate::interp::{ErrorCode, Value};

    fn eval(src: &str) -> Value {
        Interpreter::new().eval_source(src)
    }

    const PEOPLE: &str =
        "df = dataframe(name = [\"ada\", \"bob\", \"cyd\"], age = [30, 25, 35], city = [\"x\", \"y\", \"x\"])\n";

    #[test]
    fn filter_with_column_refs() {
        let v = eval(&format!("{PEOPLE}df |> filter($age > 28) |> nrow"));
        assert_eq!(v, Value::Int(2));
    }

    #[test]
    fn filter_accepts_plain_lambdas() {
        let v = eval(&format!(
            "{PEOPLE}df |> filter(\\(row) row.age > 28) |> nrow"
        ));
        assert_eq!(v, Value::Int(2));
    }

    #[test]
    fn select_restricts_columns() {
        let v = eval(&format!("{PEOPLE}df |> select($name, \"age\") |> colnames"));
        assert_eq!(
            v,
            Value::Vector(vec![
                Value::String("name".into()),
                Value::String("age".into())
            ])
        );
        match eval(&format!("{PEOPLE}df |> select($age + 1)")) {
            Value::Error(e) => assert_eq!(e.code, ErrorCode::TypeError),
            other => panic!("expected type error, got {other}"),
        }
    }

    #[test]
    fn mutate_adds_columns_sequentially() {
        let v = eval(&format!(
            "{PEOPLE}df |> mutate(next_age = $age + 1, doubled = $next_age * 2) |> select($doubled) |> head(1)"
        ));
        match v {
            Value::DataFrame(df) => {
                assert_eq!(df.column_vector("doubled"), Value::Vector(vec![Value::Int(62)]));
            }
            other => panic!("expected dataframe, got {other}"),
        }
        match eval(&format!("{PEOPLE}df |> mutate($age + 1)")) {
            Value::Error(e) => assert_eq!(e.code, ErrorCode::TypeError),
            other => panic!("expected named-arg error, got {other}"),
        }
    }

    #[test]
    fn arrange_orders_rows() {
        let v = eval(&format!("{PEOPLE}(df |> arrange($age)).name"));
        assert_eq!(
            v,
            Value::Vector(vec![
                Value::String("bob".into()),
                Value::String("ada".into()),
                Value::String("cyd".into())
            ])
        );
    }

    #[test]
    fn group_by_and_summarize() {
        let v = eval(&format!(
            "{PEOPLE}df |> group_by($city) |> summarize(avg = mean($age), n = length($age))"
        ));
        match v {
            Value::DataFrame(df) => {
                assert_eq!(
                    df.table.column_names(),
                    vec!["city", "avg", "n"]
                );
                assert_eq!(
                    df.column_vector("avg"),
                    Value::Vector(vec![Value::Float(32.5), Value::Float(25.0)])
                );
                assert_eq!(
                    df.column_vector("n"),
                    Value::Vector(vec![Value::Int(2), Value::Int(1)])
                );
            }
            other => panic!("expected dataframe, got {other}"),
        }
    }

    #[test]
    fn summarize_without_groups_collapses_to_one_row() {
        let v = eval(&format!("{PEOPLE}df |> summarize(oldest = max($age)) |> nrow"));
        assert_eq!(v, Value::Int(1));
    }

    #[test]
    fn na_in_filter_predicate_is_a_type_error() {
        let v = eval(
            "df = dataframe(x = [1, NA, 3])\ndf |> filter($x > 1)",
        );
        match v {
            Value::Error(e) => assert_eq!(e.code, ErrorCode::TypeError),
            other => panic!("expected NA error, got {other}"),
        }
    }

    #[test]
    fn dollar_access_outside_verbs_fails() {
        match eval("$age > 1") {
            Value::Error(e) => assert_eq!(e.code, ErrorCode::TypeError),
            other => panic!("expected error, got {other}"),
        }
    }

    #[test]
    fn column_extraction_via_dot() {
        let v = eval(&format!("{PEOPLE}df.age"));
        assert_eq!(
            v,
            Value::Vector(vec![Value::Int(30), Value::Int(25), Value::Int(35)])
        );
    }

    #[test]
    fn dataframe_checks_column_lengths() {
        match eval("dataframe(a = [1, 2], b = [1, 2, 3])") {
            Value::Error(e) => assert_eq!(e.code, ErrorCode::ValueError),
            other => panic!("expected length error, got {other}"),
        }
        let v = eval("df = dataframe(a = [1, 2], tag = \"x\")\ndf.tag");
        assert_eq!(
            v,
            Value::Vector(vec![
                Value::String("x".into()),
                Value::String("x".into())
            ])
        );
    }

    #[test]
    fn read_csv_rejects_sep_spelling() {
        match eval("read_csv(\"f.csv\", sep = \";\")") {
            Value::Error(e) => {
                assert_eq!(e.code, ErrorCode::ArityError);
                assert!(e.message.contains("sep"));
            }
            other => panic!("expected unknown-arg error, got {other}"),
        }
    }
}
