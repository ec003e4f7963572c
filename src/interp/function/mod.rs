use std::fmt::{Debug, Display};
use std::rc::Rc;

use indexmap::IndexMap;

use super::ast::{Arg, Expr};
use super::env::Environment;
use super::eval::Interpreter;
use super::{TError, Value};

pub mod core_functions;
pub mod dataframe_functions;
pub mod list_functions;
pub mod math_functions;
pub mod stats_functions;
pub mod string_functions;

/// A user lambda: parameters, body and the captured environment.
#[derive(Debug)]
pub struct Lambda {
    pub params: Vec<String>,
    pub body: Rc<Expr>,
    pub env: Environment,
}

/// Arguments as a builtin sees them. Raw builtins get the unevaluated
/// expressions (that is how the data verbs inspect `$col` shapes); everything
/// else gets `positional` and `named` filled in.
pub struct CallSite {
    pub positional: Vec<Value>,
    pub named: IndexMap<String, Value>,
    pub raw: Vec<Arg>,
}

impl CallSite {
    pub fn arg(&self, i: usize) -> &Value {
        &self.positional[i]
    }

    pub fn named_value(&self, name: &str) -> Option<&Value> {
        self.named.get(name)
    }

    pub fn named_bool(&self, name: &str, default: bool) -> Result<bool, TError> {
        match self.named.get(name) {
            Some(v) => v.get_bool(),
            None => Ok(default),
        }
    }

    pub fn named_str(&self, name: &str, default: &str) -> Result<String, TError> {
        match self.named.get(name) {
            Some(v) => v.get_string().map(|s| s.to_string()),
            None => Ok(default.to_string()),
        }
    }

    pub fn named_int(&self, name: &str, default: i64) -> Result<i64, TError> {
        match self.named.get(name) {
            Some(v) => v.get_int(),
            None => Ok(default),
        }
    }
}

pub type BuiltinImpl = Rc<dyn Fn(&Interpreter, &Environment, CallSite) -> Value>;

/// A builtin descriptor: dispatch metadata plus the handler. Handlers never
/// panic and never return `Result`; failures come back as `Value::Error`.
#[derive(Clone)]
pub struct Builtin {
    pub name: &'static str,
    pub min_arity: usize,
    /// `None` means variadic.
    pub max_arity: Option<usize>,
    /// Receive unevaluated argument expressions.
    pub raw: bool,
    /// Receive `Value::Error` arguments instead of absorbing them.
    pub error_aware: bool,
    /// Touches the filesystem; gated inside pipeline nodes.
    pub io: bool,
    /// Accept arbitrary named arguments (constructors like `list`, `dict`).
    pub any_named: bool,
    pub named_params: &'static [&'static str],
    pub doc: &'static str,
    pub func: BuiltinImpl,
}

impl Debug for Builtin {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Builtin")
            .field("name", &self.name)
            .field("min_arity", &self.min_arity)
            .field("max_arity", &self.max_arity)
            .finish()
    }
}

impl Builtin {
    pub fn new(
        name: &'static str,
        min_arity: usize,
        max_arity: Option<usize>,
        doc: &'static str,
        func: impl Fn(&Interpreter, &Environment, CallSite) -> Value + 'static,
    ) -> Self {
        Self {
            name,
            min_arity,
            max_arity,
            raw: false,
            error_aware: false,
            io: false,
            any_named: false,
            named_params: &[],
            doc,
            func: Rc::new(func),
        }
    }

    pub fn named(mut self, names: &'static [&'static str]) -> Self {
        self.named_params = names;
        self
    }

    pub fn raw(mut self) -> Self {
        self.raw = true;
        self
    }

    pub fn error_aware(mut self) -> Self {
        self.error_aware = true;
        self
    }

    pub fn io(mut self) -> Self {
        self.io = true;
        self
    }

    pub fn any_named(mut self) -> Self {
        self.any_named = true;
        self
    }
}

#[derive(Debug, Clone)]
pub enum FunctionValue {
    Lambda(Rc<Lambda>),
    Builtin(Rc<Builtin>),
}

impl Display for FunctionValue {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            FunctionValue::Lambda(l) => {
                write!(f, "\\({}) {}", l.params.join(", "), l.body.deparse())
            }
            FunctionValue::Builtin(b) => write!(f, "builtin(\"{}\")", b.name),
        }
    }
}

/// A scalar float function lifted over Int/Float scalars, Vectors and
/// NDArrays, with the usual NA policy.
pub fn unary_float(name: &'static str, doc: &'static str, f: fn(f64) -> f64) -> Builtin {
    Builtin::new(name, 1, Some(1), doc, move |_, _, site| {
        map_numeric(site.arg(0), name, f)
    })
}

pub fn map_numeric(v: &Value, name: &str, f: fn(f64) -> f64) -> Value {
    match v {
        Value::Int(n) => Value::Float(f(*n as f64)),
        Value::Float(x) => Value::Float(f(*x)),
        Value::Na(_) => Value::error(TError::na_operand(format!("`{name}` received NA"))),
        Value::Vector(items) => {
            let mut out = Vec::with_capacity(items.len());
            for item in items {
                match map_numeric(item, name, f) {
                    Value::Error(e) => return Value::Error(e),
                    v => out.push(v),
                }
            }
            Value::Vector(out)
        }
        Value::NDArray(a) => {
            let data = a.data.iter().map(|x| f(*x)).collect();
            Value::NDArray(super::value::NDArray {
                shape: a.shape.clone(),
                data,
            })
        }
        v => Value::error(TError::type_error(format!(
            "`{name}` expects a number, vector or ndarray, got {}",
            v.kind()
        ))),
    }
}

/// A two-float function over scalars only.
pub fn binary_float(name: &'static str, doc: &'static str, f: fn(f64, f64) -> f64) -> Builtin {
    Builtin::new(name, 2, Some(2), doc, move |_, _, site| {
        let a = match site.arg(0).get_float() {
            Ok(v) => v,
            Err(e) => return Value::error(e),
        };
        let b = match site.arg(1).get_float() {
            Ok(v) => v,
            Err(e) => return Value::error(e),
        };
        Value::Float(f(a, b))
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::interp::value::NaKind;

    #[test]
    fn map_numeric_lifts_over_vectors() {
        let v = Value::Vector(vec![Value::Int(1), Value::Int(4)]);
        let out = map_numeric(&v, "sqrt", f64::sqrt);
        assert_eq!(
            out,
            Value::Vector(vec![Value::Float(1.0), Value::Float(2.0)])
        );
    }

    #[test]
    fn map_numeric_rejects_na() {
        let v = Value::Vector(vec![Value::Int(1), Value::Na(NaKind::Int)]);
        let out = map_numeric(&v, "sqrt", f64::sqrt);
        match out {
            Value::Error(e) => assert_eq!(e.code, crate::interp::ErrorCode::TypeError),
            other => panic!("expected error, got {other}"),
        }
    }
}
