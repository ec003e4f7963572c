use std::path::{Path, PathBuf};
use std::process::Command;

use chrono::Utc;
use serde::Serialize;
use serde_json::json;
use sha2::{Digest, Sha256};
use tracing::{debug, info, warn};

use super::{run, NodeState, PipelineData};
use crate::interp::eval::Interpreter;
use crate::interp::serialization;
use crate::interp::{TError, Value};
use crate::Logged;

pub const DEFAULT_ROOT: &str = "_pipeline";

/// One line of the build log.
#[derive(Debug, Clone, Serialize)]
pub struct LogEntry {
    pub node: String,
    pub path: String,
    pub success: bool,
}

#[derive(Debug, Serialize)]
struct BuildLog {
    timestamp: String,
    hash: String,
    out_path: String,
    nodes: Vec<LogEntry>,
}

/// Everything a single build produced, ready for the build log.
struct BuildOutcome {
    dag_json: String,
    node_entries: Vec<LogEntry>,
}

fn dag_json(data: &PipelineData) -> serde_json::Value {
    let nodes: serde_json::Map<String, serde_json::Value> = data
        .deps
        .iter()
        .map(|(name, deps)| (name.clone(), json!(deps)))
        .collect();
    json!({ "nodes": nodes, "order": data.order })
}

/// Run the pipeline and write one `artifact.tobj` per resolved node under
/// `root`, plus `dag.json` and `registry.json`.
fn materialize(
    interp: &Interpreter,
    data: &PipelineData,
    root: &Path,
) -> Result<BuildOutcome, TError> {
    run(interp, data);
    std::fs::create_dir_all(root)
        .map_err(|e| TError::file_error(format!("cannot create {}: {e}", root.display())))?;

    let mut node_entries = Vec::new();
    let cache = data.cache.borrow();
    for name in &data.order {
        match cache.get(name) {
            Some(NodeState::Resolved(value)) => {
                let dir = root.join(name);
                std::fs::create_dir_all(&dir).map_err(|e| {
                    TError::file_error(format!("cannot create {}: {e}", dir.display()))
                })?;
                let path = dir.join("artifact.tobj");
                serialization::write_value(value, &path)?;
                node_entries.push(LogEntry {
                    node: name.clone(),
                    path: absolute(&path),
                    success: true,
                });
            }
            Some(NodeState::Failed(e)) => {
                warn!("node `{name}` failed: {e}");
                node_entries.push(LogEntry {
                    node: name.clone(),
                    path: String::new(),
                    success: false,
                });
            }
            _ => node_entries.push(LogEntry {
                node: name.clone(),
                path: String::new(),
                success: false,
            }),
        }
    }
    drop(cache);

    let dag = dag_json(data);
    let dag_text = serde_json::to_string_pretty(&dag)
        .map_err(|e| TError::generic(format!("cannot render dag.json: {e}")))?;
    std::fs::write(root.join("dag.json"), &dag_text)
        .map_err(|e| TError::file_error(e.to_string()))?;

    let registry: serde_json::Map<String, serde_json::Value> = node_entries
        .iter()
        .filter(|entry| entry.success)
        .map(|entry| (entry.node.clone(), json!(entry.path)))
        .collect();
    let registry_text = serde_json::to_string_pretty(&serde_json::Value::Object(registry))
        .map_err(|e| TError::generic(format!("cannot render registry.json: {e}")))?;
    std::fs::write(root.join("registry.json"), registry_text)
        .map_err(|e| TError::file_error(e.to_string()))?;

    Ok(BuildOutcome {
        dag_json: dag_text,
        node_entries,
    })
}

fn absolute(path: &Path) -> String {
    std::fs::canonicalize(path)
        .unwrap_or_else(|_| path.to_path_buf())
        .display()
        .to_string()
}

fn write_build_log(
    root: &Path,
    outcome: &BuildOutcome,
    out_path: &str,
) -> Result<(String, String), TError> {
    let mut hasher = Sha256::new();
    hasher.update(outcome.dag_json.as_bytes());
    let hash = format!("{:x}", hasher.finalize());
    let short_hash = &hash[..8];
    let now = Utc::now();
    let file_name = format!("build_log_{}_{short_hash}.json", now.format("%Y%m%d_%H%M%S"));
    let log = BuildLog {
        timestamp: now.to_rfc3339(),
        hash: short_hash.to_string(),
        out_path: out_path.to_string(),
        nodes: outcome.node_entries.clone(),
    };
    let text = serde_json::to_string_pretty(&log)
        .map_err(|e| TError::generic(format!("cannot render build log: {e}")))?;
    let path = root.join(&file_name);
    std::fs::write(&path, text).map_err(|e| TError::file_error(e.to_string()))?;
    info!("build log written to {}", path.display());
    Ok((file_name, short_hash.to_string()))
}

fn paths_dict(outcome: &BuildOutcome) -> Value {
    let mut map = indexmap::IndexMap::new();
    for entry in &outcome.node_entries {
        if entry.success {
            map.insert(entry.node.clone(), Value::String(entry.path.clone()));
        }
    }
    Value::Dict(map)
}

/// `populate_pipeline(p, root?)`: local artifact build. Returns the
/// node-to-artifact-path dict.
pub fn populate_pipeline(interp: &Interpreter, data: &PipelineData, root: &str) -> Value {
    let root = PathBuf::from(root);
    let outcome = match materialize(interp, data, &root) {
        Ok(o) => o,
        Err(e) => return Value::error(e),
    };
    if let Err(e) = write_build_log(&root, &outcome, &absolute(&root)) {
        return Value::error(e);
    }
    paths_dict(&outcome)
}

/// `build_pipeline(p, root?)`: emit `pipeline.nix` and `env.nix`, then use
/// `nix-build` when it is on PATH, falling back to the local artifact layout
/// otherwise.
pub fn build_pipeline(interp: &Interpreter, data: &PipelineData, root: &str) -> Value {
    let root = PathBuf::from(root);
    let outcome = match materialize(interp, data, &root) {
        Ok(o) => o,
        Err(e) => return Value::error(e),
    };
    if let Err(e) = std::fs::write("pipeline.nix", render_pipeline_nix(data)) {
        return Value::error(TError::file_error(format!("cannot write pipeline.nix: {e}")));
    }
    if let Err(e) = std::fs::write(root.join("env.nix"), render_env_nix(data)) {
        return Value::error(TError::file_error(format!("cannot write env.nix: {e}")));
    }

    let out_path = match find_nix_build() {
        Some(nix_build) => {
            debug!("using {} for the pipeline build", nix_build.display());
            match Command::new(nix_build).arg("pipeline.nix").output().log() {
                Ok(output) if output.status.success() => {
                    let stdout = String::from_utf8_lossy(&output.stdout);
                    stdout
                        .lines()
                        .last()
                        .unwrap_or_default()
                        .trim()
                        .to_string()
                }
                Ok(output) => {
                    return Value::error(TError::file_error(format!(
                        "nix-build failed: {}",
                        String::from_utf8_lossy(&output.stderr).trim()
                    )))
                }
                Err(e) => {
                    return Value::error(TError::file_error(format!("cannot run nix-build: {e}")))
                }
            }
        }
        None => {
            debug!("nix-build not found on PATH, using the local artifact layout");
            absolute(&root)
        }
    };

    if let Err(e) = write_build_log(&root, &outcome, &out_path) {
        return Value::error(e);
    }
    paths_dict(&outcome)
}

/// Logical derivation layout: one attribute per node, depending on its
/// upstream nodes, materialized from the local artifact store.
fn render_pipeline_nix(data: &PipelineData) -> String {
    let mut out = String::from("{ pkgs ? import <nixpkgs> {} }:\nlet\n");
    for (name, deps) in &data.deps {
        let inputs = deps
            .iter()
            .map(|d| d.as_str())
            .collect::<Vec<_>>()
            .join(" ");
        out.push_str(&format!(
            "  {name} = pkgs.runCommand \"{name}\" {{ inputs = [ {inputs} ]; }} ''\n    cp ${{./{root}/{name}/artifact.tobj}} $out\n  '';\n",
            root = DEFAULT_ROOT,
        ));
    }
    out.push_str("in {\n");
    for name in &data.order {
        out.push_str(&format!("  inherit {name};\n"));
    }
    out.push_str("}\n");
    out
}

fn render_env_nix(data: &PipelineData) -> String {
    let mut out = String::from("{ pkgs ? import <nixpkgs> {} }:\npkgs.mkShell {\n  packages = [\n");
    for import in &data.imports {
        out.push_str(&format!("    # {import}\n"));
    }
    out.push_str("  ];\n}\n");
    out
}

fn find_nix_build() -> Option<PathBuf> {
    let path = std::env::var_os("PATH")?;
    for dir in std::env::split_paths(&path) {
        let candidate = dir.join("nix-build");
        if candidate.is_file() {
            return Some(candidate);
        }
    }
    None
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::interp::eval::Interpreter;

    fn temp_root(name: &str) -> PathBuf {
        let dir = std::env::temp_dir().join(format!("tlang-build-{}-{name}", std::process::id()));
        let _ = std::fs::remove_dir_all(&dir);
        dir
    }

    fn build_in(root: &Path, src: &str) -> Value {
        let interp = Interpreter::new();
        let env = interp.root_env();
        let (v, env) = interp.eval_source_in(src, env);
        assert!(!v.is_error(), "setup failed: {v}");
        let (out, _) = interp.eval_source_in(
            &format!("populate_pipeline(p, \"{}\")", root.display()),
            env,
        );
        out
    }

    #[test]
    fn populate_writes_the_documented_layout() {
        let root = temp_root("layout");
        let out = build_in(&root, "p = pipeline { x = 1\n y = x + 1 }");
        match out {
            Value::Dict(map) => {
                assert!(map.contains_key("x"));
                assert!(map.contains_key("y"));
            }
            other => panic!("expected path dict, got {other}"),
        }
        assert!(root.join("x/artifact.tobj").is_file());
        assert!(root.join("y/artifact.tobj").is_file());
        assert!(root.join("dag.json").is_file());
        assert!(root.join("registry.json").is_file());
        let logs: Vec<_> = std::fs::read_dir(&root)
            .unwrap()
            .filter_map(|e| e.ok())
            .filter(|e| e.file_name().to_string_lossy().starts_with("build_log_"))
            .collect();
        assert_eq!(logs.len(), 1);

        let dag: serde_json::Value =
            serde_json::from_str(&std::fs::read_to_string(root.join("dag.json")).unwrap())
                .unwrap();
        assert_eq!(dag["nodes"]["y"], serde_json::json!(["x"]));
        assert_eq!(dag["order"], serde_json::json!(["x", "y"]));
    }

    #[test]
    fn artifacts_are_bitwise_reproducible() {
        let root_a = temp_root("repro-a");
        let root_b = temp_root("repro-b");
        let src = "p = pipeline { xs = [1, 2, 3]\n total = sum(xs) }";
        build_in(&root_a, src);
        build_in(&root_b, src);
        for node in ["xs", "total"] {
            let a = std::fs::read(root_a.join(node).join("artifact.tobj")).unwrap();
            let b = std::fs::read(root_b.join(node).join("artifact.tobj")).unwrap();
            assert_eq!(a, b, "artifact for `{node}` differs between runs");
        }
    }

    #[test]
    fn failed_nodes_are_logged_without_artifacts() {
        let root = temp_root("failed");
        let out = build_in(&root, "p = pipeline { bad = 1 / 0\n ok = 2 }");
        match out {
            Value::Dict(map) => {
                assert!(map.contains_key("ok"));
                assert!(!map.contains_key("bad"));
            }
            other => panic!("expected dict, got {other}"),
        }
        assert!(!root.join("bad").join("artifact.tobj").exists());
        let log_name = std::fs::read_dir(&root)
            .unwrap()
            .filter_map(|e| e.ok())
            .find(|e| e.file_name().to_string_lossy().starts_with("build_log_"))
            .unwrap();
        let log: serde_json::Value =
            serde_json::from_str(&std::fs::read_to_string(log_name.path()).unwrap()).unwrap();
        let nodes = log["nodes"].as_array().unwrap();
        let bad = nodes.iter().find(|n| n["node"] == "bad").unwrap();
        assert_eq!(bad["success"], serde_json::json!(false));
    }

    #[test]
    fn build_emits_nix_files_and_falls_back_locally() {
        let root = temp_root("nix");
        let interp = Interpreter::new();
        let env = interp.root_env();
        let (_, env) = interp.eval_source_in("p = pipeline { x = 41 + 1 }", env);
        let (out, _) = interp.eval_source_in(
            &format!("build_pipeline(p, \"{}\")", root.display()),
            env,
        );
        assert!(matches!(out, Value::Dict(_)), "got {out}");
        assert!(root.join("env.nix").is_file());
        assert!(Path::new("pipeline.nix").is_file());
        let _ = std::fs::remove_file("pipeline.nix");
    }
}
