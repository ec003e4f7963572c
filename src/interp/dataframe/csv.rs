use std::path::Path;

use tracing::debug;

use super::column::ColumnData;
use super::table::Table;
use crate::interp::TError;

/// Cells spelled `NA` or left empty load as null slots.
fn is_missing(cell: &str) -> bool {
    cell.is_empty() || cell == "NA"
}

/// Read a CSV file into a typed table. Column types are inferred per column:
/// Int64, then Float64, then Bool, then String.
pub fn read_csv(path: &Path, separator: u8, header: bool) -> Result<Table, TError> {
    let mut reader = csv::ReaderBuilder::new()
        .delimiter(separator)
        .has_headers(header)
        .flexible(false)
        .from_path(path)
        .map_err(|e| TError::file_error(format!("cannot open {}: {e}", path.display())))?;

    let names: Vec<String> = if header {
        reader
            .headers()
            .map_err(|e| TError::file_error(e.to_string()))?
            .iter()
            .map(|s| s.to_string())
            .collect()
    } else {
        Vec::new()
    };

    let mut cells: Vec<Vec<String>> = Vec::new();
    for record in reader.records() {
        let record = record.map_err(|e| TError::file_error(e.to_string()))?;
        cells.push(record.iter().map(|s| s.to_string()).collect());
    }

    let ncols = if header {
        names.len()
    } else {
        cells.first().map_or(0, Vec::len)
    };
    let names = if header {
        names
    } else {
        (1..=ncols).map(|i| format!("V{i}")).collect()
    };

    let mut columns = Vec::with_capacity(ncols);
    for (i, name) in names.iter().enumerate() {
        let column: Vec<&str> = cells.iter().map(|row| row[i].as_str()).collect();
        columns.push((name.clone(), infer_column(&column)));
    }
    debug!(
        "read {} rows x {} columns from {}",
        cells.len(),
        ncols,
        path.display()
    );
    Table::new(columns)
}

fn infer_column(cells: &[&str]) -> ColumnData {
    let present: Vec<&str> = cells.iter().copied().filter(|c| !is_missing(c)).collect();
    if present.is_empty() {
        return ColumnData::Null(cells.len());
    }
    if present.iter().all(|c| c.parse::<i64>().is_ok()) {
        return ColumnData::Int(
            cells
                .iter()
                .map(|c| {
                    if is_missing(c) {
                        None
                    } else {
                        c.parse().ok()
                    }
                })
                .collect(),
        );
    }
    if present.iter().all(|c| c.parse::<f64>().is_ok()) {
        return ColumnData::Float(
            cells
                .iter()
                .map(|c| {
                    if is_missing(c) {
                        None
                    } else {
                        c.parse().ok()
                    }
                })
                .collect(),
        );
    }
    if present.iter().all(|c| parse_bool(c).is_some()) {
        return ColumnData::Bool(
            cells
                .iter()
                .map(|c| if is_missing(c) { None } else { parse_bool(c) })
                .collect(),
        );
    }
    ColumnData::String(
        cells
            .iter()
            .map(|c| {
                if is_missing(c) {
                    None
                } else {
                    Some(c.to_string())
                }
            })
            .collect(),
    )
}

fn parse_bool(cell: &str) -> Option<bool> {
    match cell {
        "true" | "TRUE" | "True" => Some(true),
        "false" | "FALSE" | "False" => Some(false),
        _ => None,
    }
}

/// Write a table back out; null slots are spelled `NA`.
pub fn write_csv(table: &Table, path: &Path, separator: u8) -> Result<(), TError> {
    let mut writer = csv::WriterBuilder::new()
        .delimiter(separator)
        .from_path(path)
        .map_err(|e| TError::file_error(format!("cannot write {}: {e}", path.display())))?;
    writer
        .write_record(table.column_names())
        .map_err(|e| TError::file_error(e.to_string()))?;
    for row in 0..table.num_rows() {
        let record: Vec<String> = table
            .columns()
            .iter()
            .map(|(_, col)| render_cell(col, row))
            .collect();
        writer
            .write_record(&record)
            .map_err(|e| TError::file_error(e.to_string()))?;
    }
    writer
        .flush()
        .map_err(|e| TError::file_error(e.to_string()))?;
    Ok(())
}

fn render_cell(col: &ColumnData, row: usize) -> String {
    match col {
        ColumnData::Int(v) => v[row].map_or_else(|| "NA".to_string(), |n| n.to_string()),
        ColumnData::Float(v) => v[row].map_or_else(|| "NA".to_string(), |x| format!("{x}")),
        ColumnData::Bool(v) => v[row].map_or_else(|| "NA".to_string(), |b| b.to_string()),
        ColumnData::String(v) => v[row].clone().unwrap_or_else(|| "NA".to_string()),
        ColumnData::Null(_) => "NA".to_string(),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::interp::dataframe::column::ColumnType;

    fn temp_path(name: &str) -> std::path::PathBuf {
        let dir = std::env::temp_dir().join(format!("tlang-csv-{}", std::process::id()));
        std::fs::create_dir_all(&dir).unwrap();
        dir.join(name)
    }

    #[test]
    fn round_trip_with_inference() {
        let path = temp_path("people.csv");
        std::fs::write(&path, "name,age,score\nalice,30,1.5\nbob,NA,2.5\ncarol,35,\n").unwrap();
        let table = read_csv(&path, b',', true).unwrap();
        assert_eq!(table.num_rows(), 3);
        let schema = table.schema();
        assert_eq!(schema[0].1, ColumnType::String);
        assert_eq!(schema[1].1, ColumnType::Int64);
        assert_eq!(schema[2].1, ColumnType::Float64);
        assert!(table.column("age").unwrap().value_at(1).is_na());

        let out = temp_path("people-out.csv");
        write_csv(&table, &out, b',').unwrap();
        let again = read_csv(&out, b',', true).unwrap();
        assert_eq!(table, again);
    }

    #[test]
    fn semicolon_separator_and_bools() {
        let path = temp_path("flags.csv");
        std::fs::write(&path, "id;ok\n1;true\n2;FALSE\n").unwrap();
        let table = read_csv(&path, b';', true).unwrap();
        assert_eq!(table.schema()[1].1, ColumnType::Bool);
    }

    #[test]
    fn missing_file_is_a_file_error() {
        let err = read_csv(Path::new("definitely-not-here.csv"), b',', true).unwrap_err();
        assert_eq!(err.code, crate::interp::ErrorCode::FileError);
    }
}
