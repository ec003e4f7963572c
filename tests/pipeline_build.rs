use std::path::PathBuf;

use tlang::{ErrorCode, Interpreter, Value};

fn temp_root(name: &str) -> PathBuf {
    let root = std::env::temp_dir().join(format!("tlang-it-{}-{name}", std::process::id()));
    let _ = std::fs::remove_dir_all(&root);
    root
}

#[test]
fn populate_writes_layout_and_read_node_travels_back() {
    let root = temp_root("travel");
    let interp = Interpreter::new();
    let env = interp.root_env();
    let (_, env) = interp.eval_source_in(
        "p = pipeline { base = [10, 20, 30]\n total = sum(base)\n ratio = total / 10 }",
        env,
    );
    let (paths, env) = interp.eval_source_in(
        &format!("populate_pipeline(p, \"{}\")", root.display()),
        env,
    );
    match paths {
        Value::Dict(map) => assert_eq!(map.len(), 3),
        other => panic!("expected path dict, got {other}"),
    }
    assert!(root.join("dag.json").is_file());
    assert!(root.join("registry.json").is_file());
    assert!(root.join("total").join("artifact.tobj").is_file());

    let (v, env) = interp.eval_source_in(
        &format!("read_node(\"total\", root = \"{}\")", root.display()),
        env,
    );
    assert_eq!(v, Value::Int(60));

    let (v, env) = interp.eval_source_in(
        &format!(
            "read_node(\"ratio\", which_log = \"build_log_.*\", root = \"{}\")",
            root.display()
        ),
        env,
    );
    assert_eq!(v, Value::Float(6.0));

    let (logs, env) = interp.eval_source_in(
        &format!("list_logs(\"{}\")", root.display()),
        env,
    );
    match logs {
        Value::Vector(names) => assert_eq!(names.len(), 1),
        other => panic!("expected log list, got {other}"),
    }

    let (v, _) = interp.eval_source_in(
        &format!("read_node(\"total\", which_log = \"([\", root = \"{}\")", root.display()),
        env,
    );
    match v {
        Value::Error(e) => assert_eq!(e.code, ErrorCode::TypeError),
        other => panic!("expected invalid-regex error, got {other}"),
    }
}

#[test]
fn reruns_produce_bitwise_identical_artifacts() {
    let src = "p = pipeline { xs = [1.5, 2.5, NA]\n n = length(xs) }";
    let mut images: Vec<Vec<u8>> = Vec::new();
    for run in 0..2 {
        let root = temp_root(&format!("repro{run}"));
        let interp = Interpreter::new();
        let env = interp.root_env();
        let (_, env) = interp.eval_source_in(src, env);
        let (out, _) = interp.eval_source_in(
            &format!("populate_pipeline(p, \"{}\")", root.display()),
            env,
        );
        assert!(matches!(out, Value::Dict(_)), "build failed: {out}");
        images.push(std::fs::read(root.join("xs").join("artifact.tobj")).unwrap());
    }
    assert_eq!(images[0], images[1]);
}

#[test]
fn dataframe_artifacts_survive_the_codec() {
    let root = temp_root("df");
    let interp = Interpreter::new();
    let env = interp.root_env();
    let (_, env) = interp.eval_source_in(
        "p = pipeline { d = dataframe(x = [1, 2, 3], y = [\"a\", \"b\", \"c\"]) }",
        env,
    );
    let (out, env) = interp.eval_source_in(
        &format!("populate_pipeline(p, \"{}\")", root.display()),
        env,
    );
    assert!(matches!(out, Value::Dict(_)), "build failed: {out}");
    let (v, _) = interp.eval_source_in(
        &format!("read_node(\"d\", root = \"{}\") |> nrow", root.display()),
        env,
    );
    assert_eq!(v, Value::Int(3));
}

#[test]
fn filesystem_builtins_are_gated_inside_pipelines() {
    let interp = Interpreter::new();
    let v = interp.eval_source(
        "p = pipeline { d = read_csv(\"whatever.csv\") }\np.d",
    );
    match v {
        Value::Error(e) => {
            assert_eq!(e.code, ErrorCode::FileError);
            assert!(e.message.contains("--unsafe"), "message: {}", e.message);
        }
        other => panic!("expected gating error, got {other}"),
    }

    // with --unsafe the call goes through and fails on the missing file instead
    let interp = Interpreter::new().with_unsafe(true);
    let v = interp.eval_source(
        "p = pipeline { d = read_csv(\"definitely-missing.csv\") }\np.d",
    );
    match v {
        Value::Error(e) => {
            assert_eq!(e.code, ErrorCode::FileError);
            assert!(e.message.contains("definitely-missing.csv"));
        }
        other => panic!("expected file error, got {other}"),
    }
}

#[test]
fn failed_nodes_keep_the_pipeline_usable_and_logged() {
    let root = temp_root("failures");
    let interp = Interpreter::new();
    let env = interp.root_env();
    let (_, env) = interp.eval_source_in(
        "p = pipeline { good = 1\n bad = good / 0\n downstream = bad + 1 }",
        env,
    );
    let (paths, env) = interp.eval_source_in(
        &format!("populate_pipeline(p, \"{}\")", root.display()),
        env,
    );
    match paths {
        Value::Dict(map) => {
            assert!(map.contains_key("good"));
            assert!(!map.contains_key("bad"));
            assert!(!map.contains_key("downstream"));
        }
        other => panic!("expected dict, got {other}"),
    }

    // introspection still works on the failed pipeline value
    let (nodes, env) = interp.eval_source_in("pipeline_nodes(p)", env);
    assert_eq!(
        nodes,
        Value::Vector(vec![
            Value::String("good".into()),
            Value::String("bad".into()),
            Value::String("downstream".into())
        ])
    );

    let (v, _) = interp.eval_source_in(
        &format!("read_node(\"bad\", root = \"{}\")", root.display()),
        env,
    );
    match v {
        Value::Error(e) => assert_eq!(e.code, ErrorCode::FileError),
        other => panic!("expected artifact error, got {other}"),
    }
}

#[test]
fn pipeline_runs_are_idempotent() {
    let interp = Interpreter::new();
    let v = interp.eval_source(
        "p = pipeline { x = 21 * 2 }\npipeline_run(p)\npipeline_run(p)\np.x",
    );
    assert_eq!(v, Value::Int(42));
}
