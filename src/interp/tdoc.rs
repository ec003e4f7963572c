use regex::Regex;

use super::function::{Builtin, FunctionValue};
use super::{TError, Value};

/// Structured form of a `--#` doc comment block.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct Tdoc {
    pub title: String,
    pub description: String,
    pub params: Vec<(String, String)>,
    pub returns: Option<String>,
    pub examples: Vec<String>,
}

/// Parse the body of a doc block. The first plain line is the title, further
/// plain lines are the description; `@param name text`, `@return text` and
/// `@example code` are recognized fields.
pub fn parse(text: &str) -> Tdoc {
    let mut doc = Tdoc::default();
    for line in text.lines() {
        let line = line.trim();
        if let Some(rest) = line.strip_prefix("@param") {
            let rest = rest.trim();
            match rest.split_once(char::is_whitespace) {
                Some((name, desc)) => doc
                    .params
                    .push((name.to_string(), desc.trim().to_string())),
                None => doc.params.push((rest.to_string(), String::new())),
            }
        } else if let Some(rest) = line.strip_prefix("@return") {
            doc.returns = Some(rest.trim().to_string());
        } else if let Some(rest) = line.strip_prefix("@example") {
            doc.examples.push(rest.trim().to_string());
        } else if doc.title.is_empty() {
            doc.title = line.to_string();
        } else if !line.is_empty() {
            if !doc.description.is_empty() {
                doc.description.push(' ');
            }
            doc.description.push_str(line);
        }
    }
    doc
}

pub fn render(name: &str, package: Option<&str>, doc: &Tdoc) -> String {
    let mut out = match package {
        Some(pkg) => format!("{name}  (package {pkg})\n\n{}\n", doc.title),
        None => format!("{name}\n\n{}\n", doc.title),
    };
    if !doc.description.is_empty() {
        out.push_str(&format!("\n{}\n", doc.description));
    }
    if !doc.params.is_empty() {
        out.push_str("\nArguments:\n");
        for (param, desc) in &doc.params {
            out.push_str(&format!("  {param}: {desc}\n"));
        }
    }
    if let Some(ret) = &doc.returns {
        out.push_str(&format!("\nReturns: {ret}\n"));
    }
    if !doc.examples.is_empty() {
        out.push_str("\nExamples:\n");
        for example in &doc.examples {
            out.push_str(&format!("  {example}\n"));
        }
    }
    out
}

fn help_target(v: &Value) -> Result<String, TError> {
    match v {
        Value::String(name) => Ok(name.clone()),
        Value::Function(FunctionValue::Builtin(b)) => Ok(b.name.to_string()),
        v => Err(TError::type_error(format!(
            "`help` expects a function name or function, got {}",
            v.kind()
        ))),
    }
}

pub fn builtins() -> Vec<Builtin> {
    vec![
        Builtin::new("help", 1, Some(1), "Documentation for a builtin or user binding.", |interp, _, site| {
            let name = match help_target(site.arg(0)) {
                Ok(n) => n,
                Err(e) => return Value::error(e),
            };
            if let Some(text) = interp.user_docs.borrow().get(&name) {
                let doc = parse(text);
                return Value::String(render(&name, None, &doc));
            }
            match interp.registry.find(&name) {
                Some((pkg, b)) => {
                    let doc = Tdoc {
                        title: b.doc.to_string(),
                        ..Tdoc::default()
                    };
                    Value::String(render(&name, Some(pkg.name), &doc))
                }
                None => Value::error(TError::name_error(format!(
                    "no documentation for `{name}`"
                ))),
            }
        }),
        Builtin::new("apropos", 1, Some(1), "Names whose docs match a regex.", |interp, _, site| {
            let pattern = match site.arg(0).get_string() {
                Ok(p) => p,
                Err(e) => return Value::error(e),
            };
            let re = match Regex::new(pattern) {
                Ok(re) => re,
                Err(e) => {
                    return Value::error(TError::type_error(format!(
                        "invalid regex for `apropos`: {e}"
                    )))
                }
            };
            let mut names = Vec::new();
            for pkg in &interp.registry.packages {
                for b in &pkg.builtins {
                    if re.is_match(b.name) || re.is_match(b.doc) {
                        names.push(Value::String(b.name.to_string()));
                    }
                }
            }
            for (name, text) in interp.user_docs.borrow().iter() {
                if re.is_match(name) || re.is_match(text) {
                    names.push(Value::String(name.clone()));
                }
            }
            Value::Vector(names)
        }),
        Builtin::new("args", 1, Some(1), "Call signature of a function.", |_, _, site| {
            match site.arg(0) {
                Value::Function(FunctionValue::Lambda(l)) => Value::Vector(
                    l.params
                        .iter()
                        .map(|p| Value::String(p.clone()))
                        .collect(),
                ),
                Value::Function(FunctionValue::Builtin(b)) => Value::List(vec![
                    (Some("name".to_string()), Value::String(b.name.to_string())),
                    (
                        Some("min_arity".to_string()),
                        Value::Int(b.min_arity as i64),
                    ),
                    (
                        Some("variadic".to_string()),
                        Value::Bool(b.max_arity.is_none()),
                    ),
                    (
                        Some("named".to_string()),
                        Value::Vector(
                            b.named_params
                                .iter()
                                .map(|n| Value::String((*n).to_string()))
                                .collect(),
                        ),
                    ),
                ]),
                v => Value::error(TError::type_error(format!(
                    "`args` expects a function, got {}",
                    v.kind()
                ))),
            }
        }),
        Builtin::new("package_info", 1, Some(1), "Metadata for a package.", |interp, _, site| {
            let name = match site.arg(0).get_string() {
                Ok(n) => n,
                Err(e) => return Value::error(e),
            };
            match interp.registry.package(name) {
                Some(pkg) => {
                    let mut map = indexmap::IndexMap::new();
                    map.insert("name".to_string(), Value::String(pkg.name.to_string()));
                    map.insert("title".to_string(), Value::String(pkg.title.to_string()));
                    map.insert(
                        "functions".to_string(),
                        Value::Vector(
                            pkg.builtins
                                .iter()
                                .map(|b| Value::String(b.name.to_string()))
                                .collect(),
                        ),
                    );
                    Value::Dict(map)
                }
                None => Value::error(TError::name_error(format!(
                    "no package named `{name}`"
                ))),
            }
        }),
        Builtin::new("packages", 0, Some(0), "Names of the loaded packages.", |interp, _, _| {
            Value::Vector(
                interp
                    .registry
                    .packages
                    .iter()
                    .map(|p| Value::String(p.name.to_string()))
                    .collect(),
            )
        }),
    ]
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::interp::eval::Interpreter;
    use crate::interp::ErrorCode;

    #[test]
    fn parse_extracts_fields() {
        let doc = parse(
            "Scale a vector.\nLonger text\nhere.\n@param xs the vector\n@param by factor\n@return the scaled vector\n@example scale([1, 2], 2)",
        );
        assert_eq!(doc.title, "Scale a vector.");
        assert_eq!(doc.description, "Longer text here.");
        assert_eq!(doc.params.len(), 2);
        assert_eq!(doc.params[1], ("by".to_string(), "factor".to_string()));
        assert_eq!(doc.returns.as_deref(), Some("the scaled vector"));
        assert_eq!(doc.examples, vec!["scale([1, 2], 2)"]);
    }

    #[test]
    fn help_covers_builtins_and_user_docs() {
        let interp = Interpreter::new();
        let env = interp.root_env();
        let (v, env) = interp.eval_source_in("help(\"mean\")", env);
        match v {
            Value::String(s) => assert!(s.contains("mean") && s.contains("stats")),
            other => panic!("expected help text, got {other}"),
        }
        let (_, env) =
            interp.eval_source_in("--# Doubles a number.\n--# @param x the number\ndouble = \\(x) x * 2\n", env);
        let (v, _) = interp.eval_source_in("help(\"double\")", env);
        match v {
            Value::String(s) => assert!(s.contains("Doubles a number.")),
            other => panic!("expected help text, got {other}"),
        }
    }

    #[test]
    fn apropos_matches_and_validates() {
        let interp = Interpreter::new();
        let v = interp.eval_source("apropos(\"quantile\")");
        match v {
            Value::Vector(names) => {
                assert!(names.contains(&Value::String("quantile".into())))
            }
            other => panic!("expected names, got {other}"),
        }
        match interp.eval_source("apropos(\"([\")") {
            Value::Error(e) => assert_eq!(e.code, ErrorCode::TypeError),
            other => panic!("expected regex error, got {other}"),
        }
    }

    #[test]
    fn args_reports_signatures() {
        let interp = Interpreter::new();
        let v = interp.eval_source("args(\\(a, b) a + b)");
        assert_eq!(
            v,
            Value::Vector(vec![
                Value::String("a".into()),
                Value::String("b".into())
            ])
        );
        let v = interp.eval_source("args(mean).named");
        assert_eq!(v, Value::Vector(vec![Value::String("na_rm".into())]));
    }

    #[test]
    fn package_info_lists_functions() {
        let interp = Interpreter::new();
        let v = interp.eval_source("package_info(\"stats\").functions");
        match v {
            Value::Vector(names) => assert!(names.contains(&Value::String("mean".into()))),
            other => panic!("expected names, got {other}"),
        }
    }
}
