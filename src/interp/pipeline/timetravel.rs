use std::path::Path;

use regex::Regex;
use serde::Deserialize;
use tracing::debug;

use crate::interp::serialization;
use crate::interp::{TError, Value};

#[derive(Debug, Deserialize)]
struct LogEntry {
    node: String,
    path: String,
    success: bool,
}

#[derive(Debug, Deserialize)]
struct BuildLog {
    nodes: Vec<LogEntry>,
}

/// Build-log file names sort chronologically because of the timestamp
/// component, so "latest" is the lexicographic maximum.
pub fn list_log_names(root: &Path) -> Result<Vec<String>, TError> {
    let entries = std::fs::read_dir(root)
        .map_err(|e| TError::file_error(format!("cannot read {}: {e}", root.display())))?;
    let mut names: Vec<String> = entries
        .filter_map(|e| e.ok())
        .map(|e| e.file_name().to_string_lossy().into_owned())
        .filter(|n| n.starts_with("build_log_") && n.ends_with(".json"))
        .collect();
    names.sort();
    Ok(names)
}

pub fn list_logs(root: &Path) -> Value {
    match list_log_names(root) {
        Ok(names) => Value::Vector(names.into_iter().map(Value::String).collect()),
        Err(e) => Value::error(e),
    }
}

/// Time travel: read `name`'s artifact through the latest build log matching
/// `which_log` (a regex), or the latest log overall.
pub fn read_node(root: &Path, name: &str, which_log: Option<&str>) -> Value {
    let names = match list_log_names(root) {
        Ok(names) => names,
        Err(e) => return Value::error(e),
    };
    let matching: Vec<String> = match which_log {
        Some(pattern) => {
            let re = match Regex::new(pattern) {
                Ok(re) => re,
                Err(e) => {
                    return Value::error(TError::type_error(format!(
                        "invalid regex for which_log: {e}"
                    )))
                }
            };
            names.into_iter().filter(|n| re.is_match(n)).collect()
        }
        None => names,
    };
    let latest = match matching.last() {
        Some(name) => name.clone(),
        None => {
            return Value::error(TError::file_error(match which_log {
                Some(p) => format!("no build log matching `{p}` under {}", root.display()),
                None => format!("no build logs under {}", root.display()),
            }))
        }
    };
    debug!("time travel through {latest}");

    let log_path = root.join(&latest);
    let log: BuildLog = match std::fs::read_to_string(&log_path)
        .map_err(|e| TError::file_error(format!("cannot read {}: {e}", log_path.display())))
        .and_then(|text| {
            serde_json::from_str(&text)
                .map_err(|e| TError::file_error(format!("malformed build log {latest}: {e}")))
        }) {
        Ok(v) => v,
        Err(e) => return Value::error(e),
    };

    let entry = match log.nodes.iter().find(|n| n.node == name) {
        Some(e) => e,
        None => {
            return Value::error(TError::key_error(format!(
                "build log {latest} has no node `{name}`"
            )))
        }
    };
    if !entry.success {
        return Value::error(TError::file_error(format!(
            "node `{name}` failed in {latest}; no artifact to read"
        )));
    }
    match serialization::read_value(Path::new(&entry.path)) {
        Ok(v) => v,
        Err(e) => Value::error(e),
    }
}

/// Summary of the on-disk pipeline state: the DAG plus the known logs.
pub fn inspect_pipeline(root: &Path) -> Value {
    let dag_path = root.join("dag.json");
    let dag: serde_json::Value = match std::fs::read_to_string(&dag_path)
        .map_err(|e| TError::file_error(format!("cannot read {}: {e}", dag_path.display())))
        .and_then(|text| {
            serde_json::from_str(&text)
                .map_err(|e| TError::file_error(format!("malformed dag.json: {e}")))
        }) {
        Ok(v) => v,
        Err(e) => return Value::error(e),
    };

    let mut out = indexmap::IndexMap::new();
    out.insert("dag".to_string(), json_to_value(&dag));
    match list_log_names(root) {
        Ok(names) => out.insert(
            "logs".to_string(),
            Value::Vector(names.into_iter().map(Value::String).collect()),
        ),
        Err(e) => return Value::error(e),
    };
    Value::Dict(out)
}

fn json_to_value(v: &serde_json::Value) -> Value {
    match v {
        serde_json::Value::Null => Value::Null,
        serde_json::Value::Bool(b) => Value::Bool(*b),
        serde_json::Value::Number(n) => {
            if let Some(i) = n.as_i64() {
                Value::Int(i)
            } else {
                Value::Float(n.as_f64().unwrap_or(f64::NAN))
            }
        }
        serde_json::Value::String(s) => Value::String(s.clone()),
        serde_json::Value::Array(items) => {
            Value::Vector(items.iter().map(json_to_value).collect())
        }
        serde_json::Value::Object(map) => Value::Dict(
            map.iter()
                .map(|(k, v)| (k.clone(), json_to_value(v)))
                .collect(),
        ),
    }
}
