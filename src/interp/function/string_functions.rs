use super::Builtin;
use crate::interp::{TError, Value};

fn string_builtin(
    name: &'static str,
    doc: &'static str,
    f: impl Fn(&str) -> Value + 'static,
) -> Builtin {
    Builtin::new(name, 1, Some(1), doc, move |_, _, site| {
        match site.arg(0).get_string() {
            Ok(s) => f(s),
            Err(e) => Value::error(e),
        }
    })
}

/// Plain rendering used when gluing values into text: strings stay unquoted.
fn to_text(v: &Value) -> Result<String, TError> {
    match v {
        Value::String(s) => Ok(s.clone()),
        Value::Na(_) => Err(TError::na_operand("cannot paste NA")),
        Value::Int(_) | Value::Float(_) | Value::Bool(_) => Ok(v.to_string()),
        v => Err(TError::type_error(format!(
            "cannot paste {} values",
            v.kind()
        ))),
    }
}

pub fn builtins() -> Vec<Builtin> {
    vec![
        string_builtin("toupper", "Uppercase a string.", |s| {
            Value::String(s.to_uppercase())
        }),
        string_builtin("tolower", "Lowercase a string.", |s| {
            Value::String(s.to_lowercase())
        }),
        string_builtin("trim", "Strip surrounding whitespace.", |s| {
            Value::String(s.trim().to_string())
        }),
        string_builtin("nchar", "Number of characters.", |s| {
            Value::Int(s.chars().count() as i64)
        }),
        Builtin::new("substr", 3, Some(3), "1-based inclusive substring.", |_, _, site| {
            let s = match site.arg(0).get_string() {
                Ok(s) => s,
                Err(e) => return Value::error(e),
            };
            let start = match site.arg(1).get_int() {
                Ok(n) => n,
                Err(e) => return Value::error(e),
            };
            let stop = match site.arg(2).get_int() {
                Ok(n) => n,
                Err(e) => return Value::error(e),
            };
            let chars: Vec<char> = s.chars().collect();
            if start < 1 || stop < start || stop as usize > chars.len() {
                return Value::error(TError::index_error(format!(
                    "substr range {start}..{stop} out of bounds for string of {} characters",
                    chars.len()
                )));
            }
            Value::String(chars[start as usize - 1..stop as usize].iter().collect())
        }),
        Builtin::new("split", 1, Some(2), "Split a string on a separator.", |_, _, site| {
            let s = match site.arg(0).get_string() {
                Ok(s) => s,
                Err(e) => return Value::error(e),
            };
            let sep = match site.positional.get(1) {
                Some(v) => match v.get_string() {
                    Ok(sep) => sep.to_string(),
                    Err(e) => return Value::error(e),
                },
                None => match site.named_str("separator", ",") {
                    Ok(sep) => sep,
                    Err(e) => return Value::error(e),
                },
            };
            Value::Vector(
                s.split(sep.as_str())
                    .map(|part| Value::String(part.to_string()))
                    .collect(),
            )
        })
        .named(&["separator"]),
        Builtin::new("join", 1, Some(1), "Join a vector of strings with a separator.", |_, _, site| {
            let sep = match site.named_str("separator", ",") {
                Ok(sep) => sep,
                Err(e) => return Value::error(e),
            };
            let items = match site.arg(0) {
                Value::Vector(items) => items,
                v => {
                    return Value::error(TError::type_error(format!(
                        "`join` expects a vector, got {}",
                        v.kind()
                    )))
                }
            };
            let mut parts = Vec::with_capacity(items.len());
            for item in items {
                match to_text(item) {
                    Ok(text) => parts.push(text),
                    Err(e) => return Value::error(e),
                }
            }
            Value::String(parts.join(&sep))
        })
        .named(&["separator"]),
        Builtin::new("paste", 1, None, "Glue values into one string.", |_, _, site| {
            let sep = match site.named_str("separator", " ") {
                Ok(sep) => sep,
                Err(e) => return Value::error(e),
            };
            let mut parts = Vec::with_capacity(site.positional.len());
            for item in &site.positional {
                match to_text(item) {
                    Ok(text) => parts.push(text),
                    Err(e) => return Value::error(e),
                }
            }
            Value::String(parts.join(&sep))
        })
        .named(&["separator"]),
        Builtin::new("startswith", 2, Some(2), "Prefix test.", |_, _, site| {
            match (site.arg(0).get_string(), site.arg(1).get_string()) {
                (Ok(s), Ok(prefix)) => Value::Bool(s.starts_with(prefix)),
                (Err(e), _) | (_, Err(e)) => Value::error(e),
            }
        }),
        Builtin::new("endswith", 2, Some(2), "Suffix test.", |_, _, site| {
            match (site.arg(0).get_string(), site.arg(1).get_string()) {
                (Ok(s), Ok(suffix)) => Value::Bool(s.ends_with(suffix)),
                (Err(e), _) | (_, Err(e)) => Value::error(e),
            }
        }),
        Builtin::new("replace", 3, Some(3), "Replace every occurrence of a pattern.", |_, _, site| {
            match (
                site.arg(0).get_string(),
                site.arg(1).get_string(),
                site.arg(2).get_string(),
            ) {
                (Ok(s), Ok(from), Ok(to)) => Value::String(s.replace(from, to)),
                (Err(e), _, _) | (_, Err(e), _) | (_, _, Err(e)) => Value::error(e),
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
    fn casing_and_trimming() {
        assert_eq!(eval("toupper(\"abc\")"), Value::String("ABC".into()));
        assert_eq!(eval("trim(\"  x \")"), Value::String("x".into()));
        assert_eq!(eval("nchar(\"héllo\")"), Value::Int(5));
    }

    #[test]
    fn substr_is_one_based_inclusive() {
        assert_eq!(eval("substr(\"hello\", 2, 4)"), Value::String("ell".into()));
        match eval("substr(\"hi\", 0, 1)") {
            Value::Error(e) => assert_eq!(e.code, ErrorCode::IndexError),
            other => panic!("expected index error, got {other}"),
        }
    }

    #[test]
    fn split_join_round_trip() {
        assert_eq!(
            eval("join(split(\"a,b,c\"), separator = \",\")"),
            Value::String("a,b,c".into())
        );
        assert_eq!(
            eval("split(\"a-b\", \"-\")"),
            Value::Vector(vec![
                Value::String("a".into()),
                Value::String("b".into())
            ])
        );
    }

    #[test]
    fn paste_glues_mixed_scalars() {
        assert_eq!(
            eval("paste(\"x\", 1, true, separator = \"-\")"),
            Value::String("x-1-true".into())
        );
        match eval("paste(\"x\", NA)") {
            Value::Error(e) => assert_eq!(e.code, ErrorCode::TypeError),
            other => panic!("expected NA error, got {other}"),
        }
    }
}
