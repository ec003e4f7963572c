use super::{Builtin, FunctionValue};
use crate::interp::serialization;
use crate::interp::value::ValueKind;
use crate::interp::{TError, Value};

fn kind_predicate(name: &'static str, doc: &'static str, kind: ValueKind) -> Builtin {
    Builtin::new(name, 1, Some(1), doc, move |_, _, site| {
        Value::Bool(site.arg(0).kind() == kind)
    })
}

pub fn builtins() -> Vec<Builtin> {
    vec![
        Builtin::new("typeof", 1, Some(1), "Kind tag of a value as a string.", |_, _, site| {
            Value::String(site.arg(0).kind().to_string())
        }),
        Builtin::new("length", 1, Some(1), "Number of elements in a value.", |_, _, site| {
            let n = match site.arg(0) {
                Value::Null => 0,
                Value::Vector(v) => v.len(),
                Value::List(v) => v.len(),
                Value::Dict(m) => m.len(),
                Value::String(s) => s.chars().count(),
                Value::NDArray(a) => a.data.len(),
                Value::DataFrame(df) => df.table.num_rows(),
                Value::Intent(i) => i.fields.len(),
                _ => 1,
            };
            Value::Int(n as i64)
        }),
        Builtin::new("names", 1, Some(1), "Names of a list, dict, intent or dataframe.", |_, _, site| {
            match site.arg(0) {
                Value::List(items) => Value::Vector(
                    items
                        .iter()
                        .map(|(n, _)| match n {
                            Some(n) => Value::String(n.clone()),
                            None => Value::String(String::new()),
                        })
                        .collect(),
                ),
                Value::Dict(map) => {
                    Value::Vector(map.keys().map(|k| Value::String(k.clone())).collect())
                }
                Value::Intent(i) => Value::Vector(
                    i.fields.iter().map(|(k, _)| Value::String(k.clone())).collect(),
                ),
                Value::DataFrame(df) => Value::Vector(
                    df.table
                        .column_names()
                        .into_iter()
                        .map(Value::String)
                        .collect(),
                ),
                _ => Value::Null,
            }
        }),
        Builtin::new("identity", 1, Some(1), "Return the argument unchanged.", |_, _, site| {
            site.arg(0).clone()
        }),
        Builtin::new("print", 1, Some(1), "Print a value and return it.", |_, _, site| {
            println!("{}", site.arg(0));
            site.arg(0).clone()
        })
        .error_aware(),
        // predicates
        Builtin::new("is_na", 1, Some(1), "True when the value is a (typed) NA.", |_, _, site| {
            Value::Bool(site.arg(0).is_na())
        }),
        Builtin::new("is_null", 1, Some(1), "True when the value is null.", |_, _, site| {
            Value::Bool(site.arg(0).is_null())
        }),
        Builtin::new("is_numeric", 1, Some(1), "True for int and float scalars.", |_, _, site| {
            Value::Bool(site.arg(0).is_numeric())
        }),
        kind_predicate("is_int", "True for int scalars.", ValueKind::Int),
        kind_predicate("is_float", "True for float scalars.", ValueKind::Float),
        kind_predicate("is_bool", "True for bools.", ValueKind::Bool),
        kind_predicate("is_string", "True for strings.", ValueKind::String),
        kind_predicate("is_vector", "True for vectors.", ValueKind::Vector),
        kind_predicate("is_ndarray", "True for ndarrays.", ValueKind::NDArray),
        kind_predicate("is_list", "True for lists.", ValueKind::List),
        kind_predicate("is_dict", "True for dicts.", ValueKind::Dict),
        kind_predicate("is_function", "True for functions.", ValueKind::Function),
        kind_predicate("is_dataframe", "True for dataframes.", ValueKind::DataFrame),
        kind_predicate("is_formula", "True for formulas.", ValueKind::Formula),
        kind_predicate("is_pipeline", "True for pipelines.", ValueKind::Pipeline),
        kind_predicate("is_intent", "True for intents.", ValueKind::Intent),
        // error interception points
        Builtin::new("is_error", 1, Some(1), "True when the value is an error.", |_, _, site| {
            Value::Bool(site.arg(0).is_error())
        })
        .error_aware(),
        Builtin::new("error_code", 1, Some(1), "Code of an error value.", |_, _, site| {
            match site.arg(0) {
                Value::Error(e) => Value::String(e.code.to_string()),
                v => Value::error(TError::type_error(format!(
                    "`error_code` expects an error, got {}",
                    v.kind()
                ))),
            }
        })
        .error_aware(),
        Builtin::new("error_message", 1, Some(1), "Message of an error value.", |_, _, site| {
            match site.arg(0) {
                Value::Error(e) => Value::String(e.message.clone()),
                v => Value::error(TError::type_error(format!(
                    "`error_message` expects an error, got {}",
                    v.kind()
                ))),
            }
        })
        .error_aware(),
        Builtin::new("error_context", 1, Some(1), "Context dict of an error value.", |_, _, site| {
            match site.arg(0) {
                Value::Error(e) => Value::Dict(e.context.clone()),
                v => Value::error(TError::type_error(format!(
                    "`error_context` expects an error, got {}",
                    v.kind()
                ))),
            }
        })
        .error_aware(),
        Builtin::new("assert", 1, Some(2), "AssertionError unless the condition holds.", |_, _, site| {
            let message = || -> String {
                match site.positional.get(1) {
                    Some(Value::String(s)) => s.clone(),
                    _ => "assertion failed".to_string(),
                }
            };
            match site.arg(0) {
                Value::Bool(true) => Value::Bool(true),
                Value::Bool(false) => Value::error(TError::assertion_error(message())),
                Value::Na(_) => Value::error(TError::assertion_error(format!(
                    "{}: received NA",
                    message()
                ))),
                v => Value::error(TError::type_error(format!(
                    "`assert` expects a bool, got {}",
                    v.kind()
                ))),
            }
        }),
        // conversions
        Builtin::new("as_int", 1, Some(1), "Convert to an int.", |_, _, site| {
            match site.arg(0) {
                Value::Int(n) => Value::Int(*n),
                Value::Float(x) => Value::Int(*x as i64),
                Value::Bool(b) => Value::Int(i64::from(*b)),
                Value::String(s) => match s.trim().parse::<i64>() {
                    Ok(n) => Value::Int(n),
                    Err(_) => Value::error(TError::value_error(format!(
                        "cannot convert {s:?} to int"
                    ))),
                },
                Value::Na(_) => Value::error(TError::na_operand("`as_int` received NA")),
                v => Value::error(TError::type_error(format!(
                    "cannot convert {} to int",
                    v.kind()
                ))),
            }
        }),
        Builtin::new("as_float", 1, Some(1), "Convert to a float.", |_, _, site| {
            match site.arg(0) {
                Value::Int(n) => Value::Float(*n as f64),
                Value::Float(x) => Value::Float(*x),
                Value::Bool(b) => Value::Float(f64::from(u8::from(*b))),
                Value::String(s) => match s.trim().parse::<f64>() {
                    Ok(x) => Value::Float(x),
                    Err(_) => Value::error(TError::value_error(format!(
                        "cannot convert {s:?} to float"
                    ))),
                },
                Value::Na(_) => Value::error(TError::na_operand("`as_float` received NA")),
                v => Value::error(TError::type_error(format!(
                    "cannot convert {} to float",
                    v.kind()
                ))),
            }
        }),
        Builtin::new("as_string", 1, Some(1), "Render a value as a string.", |_, _, site| {
            match site.arg(0) {
                Value::String(s) => Value::String(s.clone()),
                v => Value::String(v.to_string()),
            }
        }),
        Builtin::new("as_bool", 1, Some(1), "Convert to a bool.", |_, _, site| {
            match site.arg(0) {
                Value::Bool(b) => Value::Bool(*b),
                Value::String(s) => match s.as_str() {
                    "true" | "TRUE" | "True" => Value::Bool(true),
                    "false" | "FALSE" | "False" => Value::Bool(false),
                    s => Value::error(TError::value_error(format!(
                        "cannot convert {s:?} to bool"
                    ))),
                },
                Value::Int(n) => Value::Bool(*n != 0),
                Value::Na(_) => Value::error(TError::na_operand("`as_bool` received NA")),
                v => Value::error(TError::type_error(format!(
                    "cannot convert {} to bool",
                    v.kind()
                ))),
            }
        }),
        // value persistence
        Builtin::new("serialize", 2, Some(2), "Write a value to a .tobj file.", |_, _, site| {
            let path = match site.arg(1).get_string() {
                Ok(p) => p.to_string(),
                Err(e) => return Value::error(e),
            };
            match serialization::write_value(site.arg(0), std::path::Path::new(&path)) {
                Ok(()) => Value::String(path),
                Err(e) => Value::error(e),
            }
        })
        .io(),
        Builtin::new("deserialize", 1, Some(1), "Read a value back from a .tobj file.", |_, _, site| {
            let path = match site.arg(0).get_string() {
                Ok(p) => p.to_string(),
                Err(e) => return Value::error(e),
            };
            match serialization::read_value(std::path::Path::new(&path)) {
                Ok(v) => v,
                Err(e) => Value::error(e),
            }
        })
        .io(),
        Builtin::new("deparse", 1, Some(1), "Render a formula or function back to source.", |_, _, site| {
            match site.arg(0) {
                Value::Formula(f) => {
                    Value::String(format!("{} ~ {}", f.lhs.deparse(), f.rhs.deparse()))
                }
                Value::Function(FunctionValue::Lambda(l)) => {
                    Value::String(format!("\\({}) {}", l.params.join(", "), l.body.deparse()))
                }
                Value::Function(FunctionValue::Builtin(b)) => Value::String(b.name.to_string()),
                v => Value::String(v.to_string()),
            }
        }),
    ]
}

#[cfg(test)]
mod tests {
    use crate::interp::eval::Interpreter;
    use crate::interp::{ErrorCode, Value};

    fn eval(src: &str) -> Value {
        Interpreter::new().eval_source(src)
    }

    #[test]
    fn predicates_hold_for_plain_values() {
        assert_eq!(eval("is_na(1)"), Value::Bool(false));
        assert_eq!(eval("is_error(1)"), Value::Bool(false));
        assert_eq!(eval("is_na(NA)"), Value::Bool(true));
        assert_eq!(eval("typeof(2.5)"), Value::String("float".into()));
    }

    #[test]
    fn error_interception_points_see_errors() {
        assert_eq!(eval("is_error(1 / 0)"), Value::Bool(true));
        assert_eq!(
            eval("error_code(1 / 0)"),
            Value::String("DivisionByZero".into())
        );
        let v = eval("error_message(mean([1, NA]))");
        match v {
            Value::String(s) => assert!(s.contains("NA")),
            other => panic!("expected message, got {other}"),
        }
    }

    #[test]
    fn other_builtins_absorb_errors() {
        match eval("length(1 / 0)") {
            Value::Error(e) => assert_eq!(e.code, ErrorCode::DivisionByZero),
            other => panic!("expected absorption, got {other}"),
        }
    }

    #[test]
    fn assert_covers_all_three_outcomes() {
        assert_eq!(eval("assert(1 < 2)"), Value::Bool(true));
        match eval("assert(1 > 2, \"order\")") {
            Value::Error(e) => {
                assert_eq!(e.code, ErrorCode::AssertionError);
                assert_eq!(e.message, "order");
            }
            other => panic!("expected assertion error, got {other}"),
        }
        match eval("assert(NA)") {
            Value::Error(e) => {
                assert_eq!(e.code, ErrorCode::AssertionError);
                assert!(e.message.contains("received NA"));
            }
            other => panic!("expected assertion error, got {other}"),
        }
    }

    #[test]
    fn conversions() {
        assert_eq!(eval("as_int(\"42\")"), Value::Int(42));
        assert_eq!(eval("as_float(3)"), Value::Float(3.0));
        assert_eq!(eval("as_string(3.5)"), Value::String("3.5".into()));
        assert_eq!(eval("as_bool(\"TRUE\")"), Value::Bool(true));
        match eval("as_int(\"nope\")") {
            Value::Error(e) => assert_eq!(e.code, ErrorCode::ValueError),
            other => panic!("expected value error, got {other}"),
        }
    }
}
