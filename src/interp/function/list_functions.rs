use super::Builtin;
use crate::interp::{TError, Value};

pub fn builtins() -> Vec<Builtin> {
    vec![
        Builtin::new("list", 0, None, "Build a list from (optionally named) values.", |_, _, site| {
            let mut items: Vec<(Option<String>, Value)> = site
                .positional
                .iter()
                .map(|v| (None, v.clone()))
                .collect();
            for (k, v) in &site.named {
                items.push((Some(k.clone()), v.clone()));
            }
            Value::List(items)
        })
        .any_named(),
        Builtin::new("dict", 0, None, "Build a dict from named values.", |_, _, site| {
            if !site.positional.is_empty() {
                return Value::error(TError::type_error(
                    "`dict` only takes named arguments",
                ));
            }
            Value::Dict(site.named.clone())
        })
        .any_named(),
        Builtin::new("vector", 0, None, "Build a vector from values.", |_, _, site| {
            Value::Vector(site.positional.clone())
        }),
        Builtin::new("keys", 1, Some(1), "Keys of a dict.", |_, _, site| match site.arg(0) {
            Value::Dict(map) => {
                Value::Vector(map.keys().map(|k| Value::String(k.clone())).collect())
            }
            v => Value::error(TError::type_error(format!(
                "`keys` expects a dict, got {}",
                v.kind()
            ))),
        }),
        Builtin::new("values", 1, Some(1), "Values of a dict.", |_, _, site| match site.arg(0) {
            Value::Dict(map) => Value::Vector(map.values().cloned().collect()),
            v => Value::error(TError::type_error(format!(
                "`values` expects a dict, got {}",
                v.kind()
            ))),
        }),
        Builtin::new("get", 2, Some(3), "Dict lookup with an optional default.", |_, _, site| {
            let map = match site.arg(0) {
                Value::Dict(map) => map,
                v => {
                    return Value::error(TError::type_error(format!(
                        "`get` expects a dict, got {}",
                        v.kind()
                    )))
                }
            };
            let key = match site.arg(1).get_string() {
                Ok(k) => k,
                Err(e) => return Value::error(e),
            };
            match map.get(key) {
                Some(v) => v.clone(),
                None => match site.positional.get(2) {
                    Some(default) => default.clone(),
                    None => Value::error(TError::key_error(format!("key `{key}` not found"))),
                },
            }
        }),
        Builtin::new("append", 2, Some(2), "Append an element to a vector or list.", |_, _, site| {
            match site.arg(0) {
                Value::Vector(items) => {
                    let mut out = items.clone();
                    out.push(site.arg(1).clone());
                    Value::Vector(out)
                }
                Value::List(items) => {
                    let mut out = items.clone();
                    out.push((None, site.arg(1).clone()));
                    Value::List(out)
                }
                v => Value::error(TError::type_error(format!(
                    "`append` expects a vector or list, got {}",
                    v.kind()
                ))),
            }
        }),
        Builtin::new("contains", 2, Some(2), "Membership test for vectors, lists, dicts and strings.", |_, _, site| {
            match site.arg(0) {
                Value::Vector(items) => {
                    Value::Bool(items.iter().any(|v| v.equals(site.arg(1))))
                }
                Value::List(items) => {
                    Value::Bool(items.iter().any(|(_, v)| v.equals(site.arg(1))))
                }
                Value::Dict(map) => match site.arg(1).get_string() {
                    Ok(k) => Value::Bool(map.contains_key(k)),
                    Err(e) => Value::error(e),
                },
                Value::String(s) => match site.arg(1).get_string() {
                    Ok(needle) => Value::Bool(s.contains(needle)),
                    Err(e) => Value::error(e),
                },
                v => Value::error(TError::type_error(format!(
                    "`contains` expects a collection or string, got {}",
                    v.kind()
                ))),
            }
        }),
        Builtin::new("map", 2, Some(2), "Apply a function to each element.", |interp, _, site| {
            let f = site.arg(1);
            match site.arg(0) {
                Value::Vector(items) => {
                    let mut out = Vec::with_capacity(items.len());
                    for item in items {
                        match interp.call_function(f, vec![item.clone()]) {
                            Value::Error(e) => return Value::Error(e),
                            v => out.push(v),
                        }
                    }
                    Value::Vector(out)
                }
                Value::List(items) => {
                    let mut out = Vec::with_capacity(items.len());
                    for (name, item) in items {
                        match interp.call_function(f, vec![item.clone()]) {
                            Value::Error(e) => return Value::Error(e),
                            v => out.push((name.clone(), v)),
                        }
                    }
                    Value::List(out)
                }
                v => Value::error(TError::type_error(format!(
                    "`map` expects a vector or list, got {}",
                    v.kind()
                ))),
            }
        }),
        Builtin::new("keep", 2, Some(2), "Keep the elements a predicate accepts.", |interp, _, site| {
            let f = site.arg(1);
            match site.arg(0) {
                Value::Vector(items) => {
                    let mut out = Vec::new();
                    for item in items {
                        match interp.call_function(f, vec![item.clone()]) {
                            Value::Bool(true) => out.push(item.clone()),
                            Value::Bool(false) => {}
                            Value::Error(e) => return Value::Error(e),
                            v => {
                                return Value::error(TError::type_error(format!(
                                    "`keep` predicate must return a bool, got {}",
                                    v.kind()
                                )))
                            }
                        }
                    }
                    Value::Vector(out)
                }
                v => Value::error(TError::type_error(format!(
                    "`keep` expects a vector, got {}",
                    v.kind()
                ))),
            }
        }),
        Builtin::new("reduce", 2, Some(3), "Fold a vector with a two-argument function.", |interp, _, site| {
            let items = match site.arg(0) {
                Value::Vector(items) => items.clone(),
                v => {
                    return Value::error(TError::type_error(format!(
                        "`reduce` expects a vector, got {}",
                        v.kind()
                    )))
                }
            };
            let f = site.arg(1).clone();
            let mut iter = items.into_iter();
            let mut acc = match site.positional.get(2) {
                Some(init) => init.clone(),
                None => match iter.next() {
                    Some(v) => v,
                    None => {
                        return Value::error(TError::value_error(
                            "`reduce` of an empty vector with no initial value",
                        ))
                    }
                },
            };
            for item in iter {
                acc = interp.call_function(&f, vec![acc, item]);
                if acc.is_error() {
                    return acc;
                }
            }
            acc
        }),
        Builtin::new("seq", 2, Some(3), "Integer sequence from `from` to `to`.", |_, _, site| {
            let from = match site.arg(0).get_int() {
                Ok(n) => n,
                Err(e) => return Value::error(e),
            };
            let to = match site.arg(1).get_int() {
                Ok(n) => n,
                Err(e) => return Value::error(e),
            };
            let by = match site.positional.get(2) {
                Some(v) => match v.get_int() {
                    Ok(n) => n,
                    Err(e) => return Value::error(e),
                },
                None => {
                    if to >= from {
                        1
                    } else {
                        -1
                    }
                }
            };
            if by == 0 {
                return Value::error(TError::value_error("`seq` step must not be zero"));
            }
            let mut out = Vec::new();
            let mut current = from;
            while (by > 0 && current <= to) || (by < 0 && current >= to) {
                out.push(Value::Int(current));
                current += by;
            }
            Value::Vector(out)
        }),
        Builtin::new("rep", 2, Some(2), "Repeat a value n times.", |_, _, site| {
            let times = match site.arg(1).get_usize() {
                Ok(n) => n,
                Err(e) => return Value::error(e),
            };
            Value::Vector(vec![site.arg(0).clone(); times])
        }),
        Builtin::new("rev", 1, Some(1), "Reverse a vector.", |_, _, site| match site.arg(0) {
            Value::Vector(items) => {
                Value::Vector(items.iter().rev().cloned().collect())
            }
            v => Value::error(TError::type_error(format!(
                "`rev` expects a vector, got {}",
                v.kind()
            ))),
        }),
        Builtin::new("sort", 1, Some(1), "Sort a vector (NA rejected).", |_, _, site| {
            match site.named_bool("desc", false) {
                Ok(desc) => sort_vector(site.arg(0), desc),
                Err(e) => Value::error(e),
            }
        })
        .named(&["desc"]),
        Builtin::new("unique", 1, Some(1), "Drop duplicate elements, keeping first appearance.", |_, _, site| {
            match site.arg(0) {
                Value::Vector(items) => {
                    let mut out: Vec<Value> = Vec::new();
                    for item in items {
                        if !out.iter().any(|v| v.equals(item)) {
                            out.push(item.clone());
                        }
                    }
                    Value::Vector(out)
                }
                v => Value::error(TError::type_error(format!(
                    "`unique` expects a vector, got {}",
                    v.kind()
                ))),
            }
        }),
        Builtin::new("range_of", 1, Some(1), "Two-element vector [min, max].", |_, _, site| {
            match site.arg(0) {
                Value::Vector(items) if !items.is_empty() => {
                    let mut min = items[0].clone();
                    let mut max = items[0].clone();
                    for item in &items[1..] {
                        if item.is_na() {
                            return Value::error(TError::na_operand(
                                "`range_of` encountered NA value",
                            ));
                        }
                        match item.try_cmp(&min) {
                            Some(ord) if ord.is_lt() => min = item.clone(),
                            Some(_) => {}
                            None => {
                                return Value::error(TError::type_error(
                                    "`range_of` expects comparable elements",
                                ))
                            }
                        }
                        if let Some(ord) = item.try_cmp(&max) {
                            if ord.is_gt() {
                                max = item.clone();
                            }
                        }
                    }
                    if min.is_na() || max.is_na() {
                        return Value::error(TError::na_operand(
                            "`range_of` encountered NA value",
                        ));
                    }
                    Value::Vector(vec![min, max])
                }
                Value::Vector(_) => {
                    Value::error(TError::value_error("`range_of` of an empty vector"))
                }
                v => Value::error(TError::type_error(format!(
                    "`range_of` expects a vector, got {}",
                    v.kind()
                ))),
            }
        }),
    ]
}

fn sort_vector(v: &Value, desc: bool) -> Value {
    match v {
        Value::Vector(items) => {
            if items.iter().any(|v| v.is_na()) {
                return Value::error(TError::na_operand("`sort` encountered NA value"));
            }
            let mut out = items.clone();
            let mut bad = false;
            out.sort_by(|a, b| {
                a.try_cmp(b).unwrap_or_else(|| {
                    bad = true;
                    std::cmp::Ordering::Equal
                })
            });
            if bad {
                return Value::error(TError::type_error(
                    "`sort` expects elements of one comparable kind",
                ));
            }
            if desc {
                out.reverse();
            }
            Value::Vector(out)
        }
        v => Value::error(TError::type_error(format!(
            "`sort` expects a vector, got {}",
            v.kind()
        ))),
    }
}

#[cfg(test)]
mod tests {
    use crate::interp::eval::Interpreter;
    use crate::interp::{ErrorCode, Value};

    fn eval(src: &str) -> Value {
        Interpreter::new().eval_source(src)
    }

    #[test]
    fn list_and_dict_construction() {
        assert_eq!(eval("l = list(1, x = 2)\nl.x"), Value::Int(2));
        assert_eq!(eval("d = dict(a = 1, b = 2)\nkeys(d)[2]"), Value::String("b".into()));
    }

    #[test]
    fn higher_order_functions() {
        assert_eq!(
            eval("map([1, 2, 3], \\(x) x * x)"),
            Value::Vector(vec![Value::Int(1), Value::Int(4), Value::Int(9)])
        );
        assert_eq!(
            eval("keep([1, 2, 3, 4], \\(x) x % 2 == 0)"),
            Value::Vector(vec![Value::Int(2), Value::Int(4)])
        );
        assert_eq!(eval("reduce([1, 2, 3], \\(a, b) a + b)"), Value::Int(6));
        assert_eq!(eval("reduce([], \\(a, b) a + b, 0)"), Value::Int(0));
    }

    #[test]
    fn sequence_helpers() {
        assert_eq!(
            eval("seq(1, 4)"),
            Value::Vector((1..=4).map(Value::Int).collect())
        );
        assert_eq!(
            eval("seq(5, 1, -2)"),
            Value::Vector(vec![Value::Int(5), Value::Int(3), Value::Int(1)])
        );
        match eval("seq(1, 3, 0)") {
            Value::Error(e) => assert_eq!(e.code, ErrorCode::ValueError),
            other => panic!("expected error, got {other}"),
        }
        assert_eq!(
            eval("sort([3, 1, 2])"),
            Value::Vector(vec![Value::Int(1), Value::Int(2), Value::Int(3)])
        );
        assert_eq!(
            eval("unique([1, 2, 1, 3])"),
            Value::Vector(vec![Value::Int(1), Value::Int(2), Value::Int(3)])
        );
        assert_eq!(
            eval("range_of([4, 1, 9])"),
            Value::Vector(vec![Value::Int(1), Value::Int(9)])
        );
    }

    #[test]
    fn na_is_rejected_by_sorters() {
        match eval("sort([1, NA])") {
            Value::Error(e) => assert_eq!(e.code, ErrorCode::TypeError),
            other => panic!("expected error, got {other}"),
        }
    }
}
