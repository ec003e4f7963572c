use std::cell::RefCell;
use std::collections::HashSet;
use std::rc::Rc;

use indexmap::IndexMap;
use tracing::debug;

use super::ast::{Expr, PipelineItem};
use super::env::Environment;
use super::eval::Interpreter;
use super::{TError, Value};

pub mod build;
pub mod timetravel;

/// A declared pipeline: nodes with their captured expressions, the dependency
/// graph, the topological order and the definition-time environment. Node
/// values are cached lazily.
#[derive(Debug)]
pub struct PipelineData {
    pub imports: Vec<String>,
    pub nodes: Vec<(String, Rc<Expr>)>,
    pub deps: IndexMap<String, Vec<String>>,
    pub order: Vec<String>,
    pub env: Environment,
    pub cache: RefCell<IndexMap<String, NodeState>>,
}

#[derive(Debug, Clone)]
pub enum NodeState {
    Running,
    Resolved(Value),
    Failed(TError),
}

/// Evaluate a `pipeline { ... }` block: collect nodes and imports, extract
/// dependencies, and reject cyclic graphs before any node runs.
pub fn build_pipeline_value(_interp: &Interpreter, env: &Environment, items: &[PipelineItem]) -> Value {
    let mut imports = Vec::new();
    let mut nodes: Vec<(String, Rc<Expr>)> = Vec::new();
    for item in items {
        match item {
            PipelineItem::Import(name) => imports.push(name.clone()),
            PipelineItem::Node(name, expr) => {
                if nodes.iter().any(|(n, _)| n == name) {
                    return Value::error(TError::name_error(format!(
                        "pipeline node `{name}` is declared twice"
                    )));
                }
                nodes.push((name.clone(), expr.clone()));
            }
        }
    }

    let node_names: HashSet<String> = nodes.iter().map(|(n, _)| n.clone()).collect();
    let mut deps: IndexMap<String, Vec<String>> = IndexMap::new();
    for (name, expr) in &nodes {
        let mut bound = HashSet::new();
        let mut free = Vec::new();
        expr.free_vars(&mut bound, &mut free);
        let node_deps: Vec<String> = free
            .into_iter()
            .filter(|v| node_names.contains(v))
            .collect();
        deps.insert(name.clone(), node_deps);
    }

    if let Some(node) = first_cycle_member(&nodes, &deps) {
        return Value::error(TError::value_error(format!(
            "Pipeline has a dependency cycle involving node `{node}`."
        )));
    }

    let order = topo_order(&nodes, &deps);
    debug!("pipeline declared: {} nodes, order {:?}", nodes.len(), order);
    Value::Pipeline(Rc::new(PipelineData {
        imports,
        nodes,
        deps,
        order,
        env: env.clone(),
        cache: RefCell::new(IndexMap::new()),
    }))
}

/// The declaration-order-first node that can reach itself through the dep
/// graph, if any.
fn first_cycle_member(
    nodes: &[(String, Rc<Expr>)],
    deps: &IndexMap<String, Vec<String>>,
) -> Option<String> {
    for (name, _) in nodes {
        let mut stack: Vec<&String> = deps.get(name).map(|d| d.iter().collect()).unwrap_or_default();
        let mut seen: HashSet<&String> = HashSet::new();
        while let Some(current) = stack.pop() {
            if current == name {
                return Some(name.clone());
            }
            if seen.insert(current) {
                if let Some(next) = deps.get(current) {
                    stack.extend(next.iter());
                }
            }
        }
    }
    None
}

/// Kahn's algorithm with declaration order as the tie-breaker: scan the
/// declaration list for the first node whose dependencies are all emitted.
fn topo_order(nodes: &[(String, Rc<Expr>)], deps: &IndexMap<String, Vec<String>>) -> Vec<String> {
    let mut emitted: Vec<String> = Vec::with_capacity(nodes.len());
    let mut done: HashSet<String> = HashSet::new();
    while emitted.len() < nodes.len() {
        let mut progressed = false;
        for (name, _) in nodes {
            if done.contains(name) {
                continue;
            }
            let ready = deps
                .get(name)
                .map(|d| d.iter().all(|dep| done.contains(dep)))
                .unwrap_or(true);
            if ready {
                done.insert(name.clone());
                emitted.push(name.clone());
                progressed = true;
                break;
            }
        }
        if !progressed {
            // unreachable once cycles are rejected up front
            break;
        }
    }
    emitted
}

/// Evaluate every node in topological order. Idempotent: cached states are
/// kept across runs.
pub fn run(interp: &Interpreter, data: &PipelineData) {
    for name in &data.order {
        ensure_node(interp, data, name);
    }
}

/// Lazy node resolution: dependencies first, then the node itself, with the
/// per-node failure rules of the engine.
pub fn ensure_node(interp: &Interpreter, data: &PipelineData, name: &str) -> NodeState {
    if let Some(state) = data.cache.borrow().get(name) {
        if !matches!(state, NodeState::Running) {
            return state.clone();
        }
    }
    if matches!(data.cache.borrow().get(name), Some(NodeState::Running)) {
        return NodeState::Failed(TError::value_error(format!(
            "Pipeline has a dependency cycle involving node `{name}`."
        )));
    }
    data.cache
        .borrow_mut()
        .insert(name.to_string(), NodeState::Running);

    let deps: Vec<String> = data.deps.get(name).cloned().unwrap_or_default();
    let mut failed_upstream: Option<(String, TError)> = None;
    for dep in &deps {
        match ensure_node(interp, data, dep) {
            NodeState::Failed(e) => {
                if failed_upstream.is_none() {
                    failed_upstream = Some((dep.clone(), e));
                }
            }
            NodeState::Resolved(_) | NodeState::Running => {}
        }
    }

    let state = match failed_upstream {
        Some((dep, cause)) => NodeState::Failed(
            TError::new(
                cause.code,
                format!("upstream node `{dep}` failed: {}", cause.message),
            )
            .with_context("upstream", dep.as_str()),
        ),
        None => {
            let expr = data
                .nodes
                .iter()
                .find(|(n, _)| n == name)
                .map(|(_, e)| e.clone())
                .expect("node exists");
            let node_env = data.env.child();
            {
                let cache = data.cache.borrow();
                for (n, st) in cache.iter() {
                    if let NodeState::Resolved(v) = st {
                        node_env.force_define(n, v.clone());
                    }
                }
            }
            interp.enter_pipeline();
            let value = interp.eval(&expr, &node_env);
            interp.exit_pipeline();
            match value {
                Value::Error(e) => NodeState::Failed(*e),
                v => NodeState::Resolved(v),
            }
        }
    };
    data.cache
        .borrow_mut()
        .insert(name.to_string(), state.clone());
    state
}

/// `.name` access on a pipeline value.
pub fn node_value(interp: &Interpreter, data: &PipelineData, name: &str) -> Value {
    if !data.nodes.iter().any(|(n, _)| n == name) {
        return Value::error(TError::key_error(format!(
            "pipeline has no node `{name}`"
        )));
    }
    match ensure_node(interp, data, name) {
        NodeState::Resolved(v) => v,
        NodeState::Failed(e) => Value::error(e),
        NodeState::Running => unreachable!("cycles are rejected at declaration"),
    }
}

impl PipelineData {
    pub fn node_names(&self) -> Vec<String> {
        self.nodes.iter().map(|(n, _)| n.clone()).collect()
    }

    /// Declaration-ordered failed nodes recorded by the last run.
    pub fn failures(&self) -> Vec<(String, TError)> {
        let cache = self.cache.borrow();
        self.nodes
            .iter()
            .filter_map(|(n, _)| match cache.get(n) {
                Some(NodeState::Failed(e)) => Some((n.clone(), e.clone())),
                _ => None,
            })
            .collect()
    }

    pub fn render(&self) -> String {
        let mut out = format!(
            "Pipeline({} nodes: [{}])",
            self.nodes.len(),
            self.node_names().join(", ")
        );
        let failures = self.failures();
        if !failures.is_empty() {
            out.push_str("\nErrors:");
            for (name, e) in failures {
                out.push_str(&format!("\n  - `{name}` failed: {}.", e.message));
            }
        }
        out
    }
}

/// The pipeline package surface.
pub fn builtins() -> Vec<super::function::Builtin> {
    use super::function::Builtin;
    use std::path::Path;

    fn get_pipeline(v: &Value) -> Result<Rc<PipelineData>, TError> {
        match v {
            Value::Pipeline(p) => Ok(p.clone()),
            v => Err(TError::type_error(format!(
                "expected a pipeline, got {}",
                v.kind()
            ))),
        }
    }

    fn root_arg(site: &super::function::CallSite, index: usize) -> Result<String, TError> {
        match site.positional.get(index) {
            Some(v) => Ok(v.get_string()?.to_string()),
            None => site.named_str("root", build::DEFAULT_ROOT),
        }
    }

    vec![
        Builtin::new("pipeline_run", 1, Some(1), "Evaluate every node in topological order.", |interp, _, site| {
            match get_pipeline(site.arg(0)) {
                Ok(p) => {
                    run(interp, &p);
                    Value::Pipeline(p)
                }
                Err(e) => Value::error(e),
            }
        }),
        Builtin::new("pipeline_nodes", 1, Some(1), "Node names in declaration order.", |_, _, site| {
            match get_pipeline(site.arg(0)) {
                Ok(p) => Value::Vector(p.node_names().into_iter().map(Value::String).collect()),
                Err(e) => Value::error(e),
            }
        }),
        Builtin::new("pipeline_node", 2, Some(2), "Value of one node, computing it if needed.", |interp, _, site| {
            let p = match get_pipeline(site.arg(0)) {
                Ok(p) => p,
                Err(e) => return Value::error(e),
            };
            let name = match site.arg(1).get_string() {
                Ok(n) => n.to_string(),
                Err(e) => return Value::error(e),
            };
            node_value(interp, &p, &name)
        }),
        Builtin::new("pipeline_deps", 1, Some(1), "Dependency map of a pipeline.", |_, _, site| {
            match get_pipeline(site.arg(0)) {
                Ok(p) => Value::Dict(
                    p.deps
                        .iter()
                        .map(|(name, deps)| {
                            (
                                name.clone(),
                                Value::Vector(
                                    deps.iter().cloned().map(Value::String).collect(),
                                ),
                            )
                        })
                        .collect(),
                ),
                Err(e) => Value::error(e),
            }
        }),
        Builtin::new("populate_pipeline", 1, Some(2), "Build artifacts into a local directory.", |interp, _, site| {
            let p = match get_pipeline(site.arg(0)) {
                Ok(p) => p,
                Err(e) => return Value::error(e),
            };
            let root = match root_arg(&site, 1) {
                Ok(r) => r,
                Err(e) => return Value::error(e),
            };
            build::populate_pipeline(interp, &p, &root)
        })
        .named(&["root"])
        .io(),
        Builtin::new("build_pipeline", 1, Some(2), "Build artifacts, via nix-build when available.", |interp, _, site| {
            let p = match get_pipeline(site.arg(0)) {
                Ok(p) => p,
                Err(e) => return Value::error(e),
            };
            let root = match root_arg(&site, 1) {
                Ok(r) => r,
                Err(e) => return Value::error(e),
            };
            build::build_pipeline(interp, &p, &root)
        })
        .named(&["root"])
        .io(),
        Builtin::new("read_node", 1, Some(2), "Read a node's artifact from a prior build log.", |_, _, site| {
            let name = match site.arg(0).get_string() {
                Ok(n) => n.to_string(),
                Err(e) => return Value::error(e),
            };
            let which_log = match site.named_value("which_log") {
                Some(v) => match v.get_string() {
                    Ok(s) => Some(s.to_string()),
                    Err(e) => return Value::error(e),
                },
                None => match site.positional.get(1) {
                    Some(v) => match v.get_string() {
                        Ok(s) => Some(s.to_string()),
                        Err(e) => return Value::error(e),
                    },
                    None => None,
                },
            };
            let root = match site.named_str("root", build::DEFAULT_ROOT) {
                Ok(r) => r,
                Err(e) => return Value::error(e),
            };
            timetravel::read_node(Path::new(&root), &name, which_log.as_deref())
        })
        .named(&["which_log", "root"])
        .io(),
        Builtin::new("list_logs", 0, Some(1), "Known build logs, oldest first.", |_, _, site| {
            let root = match root_arg(&site, 0) {
                Ok(r) => r,
                Err(e) => return Value::error(e),
            };
            timetravel::list_logs(Path::new(&root))
        })
        .named(&["root"])
        .io(),
        Builtin::new("inspect_pipeline", 0, Some(1), "On-disk DAG and build-log summary.", |_, _, site| {
            let root = match root_arg(&site, 0) {
                Ok(r) => r,
                Err(e) => return Value::error(e),
            };
            timetravel::inspect_pipeline(Path::new(&root))
        })
        .named(&["root"])
        .io(),
    ]
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::interp::ErrorCode;

    fn interp() -> Interpreter {
        Interpreter::new()
    }

    fn eval(src: &str) -> Value {
        interp().eval_source(src)
    }

    #[test]
    fn nodes_resolve_in_dependency_order() {
        let v = eval("p = pipeline { z = x + y\n x = 1\n y = 2 }\np.z");
        assert_eq!(v, Value::Int(3));
    }

    #[test]
    fn declaration_order_is_kept_for_introspection() {
        let v = eval("p = pipeline { z = x + y\n x = 1\n y = 2 }\npipeline_nodes(p)");
        assert_eq!(
            v,
            Value::Vector(vec![
                Value::String("z".into()),
                Value::String("x".into()),
                Value::String("y".into()),
            ])
        );
    }

    #[test]
    fn cycles_are_rejected_before_any_evaluation() {
        let v = eval("pipeline { a = b\n b = a }");
        match v {
            Value::Error(e) => {
                assert_eq!(e.code, ErrorCode::ValueError);
                assert_eq!(
                    e.message,
                    "Pipeline has a dependency cycle involving node `a`."
                );
            }
            other => panic!("expected cycle error, got {other}"),
        }
    }

    #[test]
    fn self_cycle_names_itself() {
        let v = eval("pipeline { a = a + 1 }");
        match v {
            Value::Error(e) => assert!(e.message.contains("`a`")),
            other => panic!("expected cycle error, got {other}"),
        }
    }

    #[test]
    fn downstream_of_failure_fails_with_cause() {
        let v = eval(
            "p = pipeline { bad = 1 / 0\n next = bad + 1\n ok = 5 }\npipeline_run(p)\np.next",
        );
        match v {
            Value::Error(e) => {
                assert_eq!(e.code, ErrorCode::DivisionByZero);
                assert!(e.message.contains("upstream node `bad` failed"));
                assert_eq!(
                    e.context.get("upstream"),
                    Some(&Value::String("bad".into()))
                );
            }
            other => panic!("expected upstream failure, got {other}"),
        }
    }

    #[test]
    fn failed_pipeline_still_renders_and_introspects() {
        let v = eval("p = pipeline { bad = 1 / 0\n ok = 2 }\npipeline_run(p)\np");
        match v {
            Value::Pipeline(p) => {
                let text = p.render();
                assert!(text.starts_with("Pipeline(2 nodes: [bad, ok])"));
                assert!(text.contains("`bad` failed"));
            }
            other => panic!("expected pipeline, got {other}"),
        }
        let ok = eval("p = pipeline { bad = 1 / 0\n ok = 2 }\npipeline_run(p)\np.ok");
        assert_eq!(ok, Value::Int(2));
    }

    #[test]
    fn nodes_capture_definition_time_environment() {
        let v = eval("base = 10\np = pipeline { out = base * 2 }\np.out");
        assert_eq!(v, Value::Int(20));
    }

    #[test]
    fn pure_nodes_do_not_leak_into_ambient_scope() {
        let v = eval("p = pipeline { hidden = 1 }\nhidden");
        match v {
            Value::Error(e) => assert_eq!(e.code, ErrorCode::NameError),
            other => panic!("expected name error, got {other}"),
        }
    }

    #[test]
    fn unknown_node_access_is_a_key_error() {
        let v = eval("p = pipeline { x = 1 }\np.zzz");
        match v {
            Value::Error(e) => assert_eq!(e.code, ErrorCode::KeyError),
            other => panic!("expected key error, got {other}"),
        }
    }

    #[test]
    fn lambda_params_are_not_dependencies() {
        let v = eval("p = pipeline { f = \\(x) x + 1\n y = f(41) }\np.y");
        assert_eq!(v, Value::Int(42));
    }
}
