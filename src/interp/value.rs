use std::cmp::Ordering;
use std::fmt::Display;
use std::rc::Rc;

use indexmap::IndexMap;

use super::ast::Expr;
use super::dataframe::DataFrame;
use super::function::FunctionValue;
use super::pipeline::PipelineData;
use super::TError;

/// The kind tag of a value, used in error messages and by `typeof`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ValueKind {
    Null,
    Bool,
    Int,
    Float,
    String,
    Na,
    Vector,
    NDArray,
    List,
    Dict,
    DataFrame,
    Function,
    Error,
    Formula,
    Pipeline,
    Intent,
}

impl Display for ValueKind {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let s = match self {
            ValueKind::Null => "null",
            ValueKind::Bool => "bool",
            ValueKind::Int => "int",
            ValueKind::Float => "float",
            ValueKind::String => "string",
            ValueKind::Na => "NA",
            ValueKind::Vector => "vector",
            ValueKind::NDArray => "ndarray",
            ValueKind::List => "list",
            ValueKind::Dict => "dict",
            ValueKind::DataFrame => "dataframe",
            ValueKind::Function => "function",
            ValueKind::Error => "error",
            ValueKind::Formula => "formula",
            ValueKind::Pipeline => "pipeline",
            ValueKind::Intent => "intent",
        };
        f.write_str(s)
    }
}

/// NA carries the type it stands in for, so CSV columns and vector slots can
/// report a typed missing value.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum NaKind {
    Generic,
    Bool,
    Int,
    Float,
    String,
}

/// A dense row-major float array of rank >= 1.
#[derive(Debug, Clone, PartialEq)]
pub struct NDArray {
    pub shape: Vec<usize>,
    pub data: Vec<f64>,
}

impl NDArray {
    pub fn new(shape: Vec<usize>, data: Vec<f64>) -> Result<Self, TError> {
        let expected: usize = shape.iter().product();
        if shape.is_empty() {
            return Err(TError::value_error("ndarray rank must be at least 1"));
        }
        if expected != data.len() {
            return Err(TError::value_error(format!(
                "ndarray shape {:?} implies {} elements, got {}",
                shape,
                expected,
                data.len()
            )));
        }
        Ok(Self { shape, data })
    }

    pub fn rank(&self) -> usize {
        self.shape.len()
    }
}

/// A first-class capture of `lhs ~ rhs`. Neither side is evaluated.
#[derive(Debug, Clone)]
pub struct Formula {
    pub lhs: Rc<Expr>,
    pub rhs: Rc<Expr>,
}

/// The fields of an `intent { ... }` block, in declaration order.
#[derive(Debug, Clone)]
pub struct Intent {
    pub fields: Vec<(String, Value)>,
}

/// A runtime value. Errors and NA are in-band: evaluation never unwinds, it
/// returns `Value::Error` or a typed NA and lets the propagation rules apply.
#[derive(Debug, Clone, Default)]
pub enum Value {
    #[default]
    Null,
    Bool(bool),
    Int(i64),
    Float(f64),
    String(String),
    Na(NaKind),
    Vector(Vec<Value>),
    NDArray(NDArray),
    List(Vec<(Option<String>, Value)>),
    Dict(IndexMap<String, Value>),
    DataFrame(DataFrame),
    Function(FunctionValue),
    Error(Box<TError>),
    Formula(Formula),
    Pipeline(Rc<PipelineData>),
    Intent(Intent),
}

impl Value {
    pub fn kind(&self) -> ValueKind {
        match self {
            Value::Null => ValueKind::Null,
            Value::Bool(_) => ValueKind::Bool,
            Value::Int(_) => ValueKind::Int,
            Value::Float(_) => ValueKind::Float,
            Value::String(_) => ValueKind::String,
            Value::Na(_) => ValueKind::Na,
            Value::Vector(_) => ValueKind::Vector,
            Value::NDArray(_) => ValueKind::NDArray,
            Value::List(_) => ValueKind::List,
            Value::Dict(_) => ValueKind::Dict,
            Value::DataFrame(_) => ValueKind::DataFrame,
            Value::Function(_) => ValueKind::Function,
            Value::Error(_) => ValueKind::Error,
            Value::Formula(_) => ValueKind::Formula,
            Value::Pipeline(_) => ValueKind::Pipeline,
            Value::Intent(_) => ValueKind::Intent,
        }
    }

    pub fn error(e: TError) -> Self {
        Value::Error(Box::new(e))
    }

    pub fn is_error(&self) -> bool {
        matches!(self, Value::Error(_))
    }

    pub fn is_na(&self) -> bool {
        matches!(self, Value::Na(_))
    }

    pub fn is_null(&self) -> bool {
        matches!(self, Value::Null)
    }

    pub fn is_numeric(&self) -> bool {
        matches!(self, Value::Int(_) | Value::Float(_))
    }

    pub fn get_bool(&self) -> Result<bool, TError> {
        match self {
            Value::Bool(b) => Ok(*b),
            Value::Na(_) => Err(TError::na_operand("expected a bool, got NA")),
            v => Err(TError::type_error(format!(
                "expected a bool, got {}",
                v.kind()
            ))),
        }
    }

    pub fn get_int(&self) -> Result<i64, TError> {
        match self {
            Value::Int(n) => Ok(*n),
            Value::Na(_) => Err(TError::na_operand("expected an int, got NA")),
            v => Err(TError::type_error(format!(
                "expected an int, got {}",
                v.kind()
            ))),
        }
    }

    /// Numeric coercion used by math builtins: Int widens to Float.
    pub fn get_float(&self) -> Result<f64, TError> {
        match self {
            Value::Int(n) => Ok(*n as f64),
            Value::Float(f) => Ok(*f),
            Value::Na(_) => Err(TError::na_operand("expected a number, got NA")),
            v => Err(TError::type_error(format!(
                "expected a number, got {}",
                v.kind()
            ))),
        }
    }

    pub fn get_string(&self) -> Result<&str, TError> {
        match self {
            Value::String(s) => Ok(s),
            Value::Na(_) => Err(TError::na_operand("expected a string, got NA")),
            v => Err(TError::type_error(format!(
                "expected a string, got {}",
                v.kind()
            ))),
        }
    }

    pub fn get_usize(&self) -> Result<usize, TError> {
        let n = self.get_int()?;
        usize::try_from(n)
            .map_err(|_| TError::value_error(format!("expected a non-negative int, got {n}")))
    }

    pub fn get_vector(&self) -> Result<&[Value], TError> {
        match self {
            Value::Vector(v) => Ok(v),
            Value::Na(_) => Err(TError::na_operand("expected a vector, got NA")),
            v => Err(TError::type_error(format!(
                "expected a vector, got {}",
                v.kind()
            ))),
        }
    }

    pub fn get_dataframe(&self) -> Result<&DataFrame, TError> {
        match self {
            Value::DataFrame(df) => Ok(df),
            v => Err(TError::type_error(format!(
                "expected a dataframe, got {}",
                v.kind()
            ))),
        }
    }

    /// Structural equality with Int/Float numeric promotion. NA never equals
    /// anything, including another NA; callers enforce the NA policy before
    /// asking.
    pub fn equals(&self, other: &Value) -> bool {
        match (self, other) {
            (Value::Null, Value::Null) => true,
            (Value::Bool(a), Value::Bool(b)) => a == b,
            (Value::Int(a), Value::Int(b)) => a == b,
            (Value::Float(a), Value::Float(b)) => a == b,
            (Value::Int(a), Value::Float(b)) | (Value::Float(b), Value::Int(a)) => {
                *a as f64 == *b
            }
            (Value::String(a), Value::String(b)) => a == b,
            (Value::Vector(a), Value::Vector(b)) => {
                a.len() == b.len() && a.iter().zip(b).all(|(x, y)| x.equals(y))
            }
            (Value::NDArray(a), Value::NDArray(b)) => a == b,
            (Value::List(a), Value::List(b)) => {
                a.len() == b.len()
                    && a.iter()
                        .zip(b)
                        .all(|((an, av), (bn, bv))| an == bn && av.equals(bv))
            }
            (Value::Dict(a), Value::Dict(b)) => {
                a.len() == b.len()
                    && a.iter()
                        .zip(b.iter())
                        .all(|((ak, av), (bk, bv))| ak == bk && av.equals(bv))
            }
            (Value::Error(a), Value::Error(b)) => a == b,
            _ => false,
        }
    }

    /// Ordering for `< > <= >=` and for sorts. `None` means the two kinds are
    /// unorderable.
    pub fn try_cmp(&self, other: &Value) -> Option<Ordering> {
        match (self, other) {
            (Value::Int(a), Value::Int(b)) => Some(a.cmp(b)),
            (Value::Float(a), Value::Float(b)) => a.partial_cmp(b),
            (Value::Int(a), Value::Float(b)) => (*a as f64).partial_cmp(b),
            (Value::Float(a), Value::Int(b)) => a.partial_cmp(&(*b as f64)),
            (Value::String(a), Value::String(b)) => Some(a.cmp(b)),
            (Value::Bool(a), Value::Bool(b)) => Some(a.cmp(b)),
            _ => None,
        }
    }
}

impl From<bool> for Value {
    fn from(v: bool) -> Self {
        Value::Bool(v)
    }
}

impl From<i64> for Value {
    fn from(v: i64) -> Self {
        Value::Int(v)
    }
}

impl From<i32> for Value {
    fn from(v: i32) -> Self {
        Value::Int(v as i64)
    }
}

impl From<usize> for Value {
    fn from(v: usize) -> Self {
        Value::Int(v as i64)
    }
}

impl From<f64> for Value {
    fn from(v: f64) -> Self {
        Value::Float(v)
    }
}

impl From<String> for Value {
    fn from(v: String) -> Self {
        Value::String(v)
    }
}

impl From<&str> for Value {
    fn from(v: &str) -> Self {
        Value::String(v.to_string())
    }
}

impl From<TError> for Value {
    fn from(e: TError) -> Self {
        Value::error(e)
    }
}

impl From<Vec<Value>> for Value {
    fn from(v: Vec<Value>) -> Self {
        Value::Vector(v)
    }
}

impl<T> From<Option<T>> for Value
where
    T: Into<Value>,
{
    fn from(v: Option<T>) -> Self {
        match v {
            Some(v) => v.into(),
            None => Value::Null,
        }
    }
}

impl<T> From<Result<T, TError>> for Value
where
    T: Into<Value>,
{
    fn from(v: Result<T, TError>) -> Self {
        match v {
            Ok(v) => v.into(),
            Err(e) => Value::error(e),
        }
    }
}

impl From<Value> for Result<Value, TError> {
    fn from(v: Value) -> Self {
        match v {
            Value::Error(e) => Err(*e),
            v => Ok(v),
        }
    }
}

impl PartialEq for Value {
    fn eq(&self, other: &Self) -> bool {
        if let (Value::Na(a), Value::Na(b)) = (self, other) {
            return a == b;
        }
        self.equals(other)
    }
}

/// Floats always render with a decimal point so `2.0` does not read as an int.
pub fn format_float(f: f64) -> String {
    if f.is_finite() && f.fract() == 0.0 && f.abs() < 1e15 {
        format!("{f:.1}")
    } else {
        format!("{f}")
    }
}

fn escape_string(s: &str) -> String {
    let mut out = String::with_capacity(s.len() + 2);
    out.push('"');
    for c in s.chars() {
        match c {
            '"' => out.push_str("\\\""),
            '\\' => out.push_str("\\\\"),
            '\n' => out.push_str("\\n"),
            '\r' => out.push_str("\\r"),
            '\t' => out.push_str("\\t"),
            c => out.push(c),
        }
    }
    out.push('"');
    out
}

impl Display for Value {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Value::Null => write!(f, "null"),
            Value::Bool(b) => write!(f, "{b}"),
            Value::Int(n) => write!(f, "{n}"),
            Value::Float(x) => write!(f, "{}", format_float(*x)),
            Value::String(s) => write!(f, "{}", escape_string(s)),
            Value::Na(_) => write!(f, "NA"),
            Value::Vector(items) => {
                write!(f, "[")?;
                for (i, v) in items.iter().enumerate() {
                    if i > 0 {
                        write!(f, ", ")?;
                    }
                    write!(f, "{v}")?;
                }
                write!(f, "]")
            }
            Value::NDArray(a) => {
                write!(f, "ndarray(shape = {:?}, data = [", a.shape)?;
                for (i, x) in a.data.iter().enumerate() {
                    if i > 0 {
                        write!(f, ", ")?;
                    }
                    write!(f, "{}", format_float(*x))?;
                }
                write!(f, "])")
            }
            Value::List(items) => {
                write!(f, "list(")?;
                for (i, (name, v)) in items.iter().enumerate() {
                    if i > 0 {
                        write!(f, ", ")?;
                    }
                    match name {
                        Some(n) => write!(f, "{n} = {v}")?,
                        None => write!(f, "{v}")?,
                    }
                }
                write!(f, ")")
            }
            Value::Dict(map) => {
                write!(f, "{{")?;
                for (i, (k, v)) in map.iter().enumerate() {
                    if i > 0 {
                        write!(f, ", ")?;
                    }
                    write!(f, "{k}: {v}")?;
                }
                write!(f, "}}")
            }
            Value::DataFrame(df) => write!(f, "{}", df.render()),
            Value::Function(func) => write!(f, "{func}"),
            Value::Error(e) => write!(f, "Error({}: {:?})", e.code, e.message),
            Value::Formula(formula) => {
                write!(f, "{} ~ {}", formula.lhs.deparse(), formula.rhs.deparse())
            }
            Value::Pipeline(p) => write!(f, "{}", p.render()),
            Value::Intent(intent) => {
                write!(f, "intent(")?;
                for (i, (k, v)) in intent.fields.iter().enumerate() {
                    if i > 0 {
                        write!(f, ", ")?;
                    }
                    write!(f, "{k}: {v}")?;
                }
                write!(f, ")")
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn typed_na_is_not_equal_to_values() {
        assert!(!Value::Na(NaKind::Int).equals(&Value::Int(1)));
        assert!(!Value::Na(NaKind::Int).equals(&Value::Na(NaKind::Int)));
    }

    #[test]
    fn numeric_promotion_in_equality() {
        assert!(Value::Int(2).equals(&Value::Float(2.0)));
        assert!(!Value::Int(2).equals(&Value::Float(2.5)));
    }

    #[test]
    fn ordering_rules() {
        assert_eq!(
            Value::Int(1).try_cmp(&Value::Float(1.5)),
            Some(Ordering::Less)
        );
        assert_eq!(
            Value::String("a".into()).try_cmp(&Value::String("b".into())),
            Some(Ordering::Less)
        );
        assert_eq!(
            Value::Bool(false).try_cmp(&Value::Bool(true)),
            Some(Ordering::Less)
        );
        assert!(Value::Int(1).try_cmp(&Value::String("a".into())).is_none());
    }

    #[test]
    fn display_forms() {
        assert_eq!(Value::Float(2.0).to_string(), "2.0");
        assert_eq!(Value::Float(2.5).to_string(), "2.5");
        assert_eq!(
            Value::Vector(vec![Value::Int(1), Value::Na(NaKind::Int)]).to_string(),
            "[1, NA]"
        );
        assert_eq!(
            Value::error(TError::type_error("nope")).to_string(),
            "Error(TypeError: \"nope\")"
        );
    }

    #[test]
    fn ndarray_shape_must_match_data() {
        assert!(NDArray::new(vec![2, 2], vec![1.0, 2.0, 3.0]).is_err());
        assert!(NDArray::new(vec![2, 2], vec![1.0, 2.0, 3.0, 4.0]).is_ok());
    }
}
