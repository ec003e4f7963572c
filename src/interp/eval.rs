use std::cell::{Cell, RefCell};
use std::rc::Rc;

use indexmap::IndexMap;
use tracing::debug;

use crate::{Appliable, Logged};

use super::ast::{Arg, BinOp, Expr, Stmt, StmtKind, UnOp};
use super::env::Environment;
use super::function::{CallSite, FunctionValue, Lambda};
use super::packages::PackageRegistry;
use super::parser;
use super::pipeline;
use super::value::{Formula, NaKind, NDArray};
use super::{TError, Value};

/// The tree-walking interpreter. Single-threaded and eager; reentrancy only
/// happens through user lambdas invoked by builtins.
pub struct Interpreter {
    pub registry: PackageRegistry,
    pub unsafe_mode: bool,
    /// Depth of pipeline-node evaluation, used to gate filesystem builtins.
    pipeline_depth: Cell<usize>,
    /// `--#` docs attached to top-level user definitions.
    pub user_docs: RefCell<IndexMap<String, String>>,
}

impl Default for Interpreter {
    fn default() -> Self {
        Self::new()
    }
}

impl Interpreter {
    pub fn new() -> Self {
        Self {
            registry: PackageRegistry::standard(),
            unsafe_mode: false,
            pipeline_depth: Cell::new(0),
            user_docs: RefCell::new(IndexMap::new()),
        }
    }

    pub fn with_unsafe(mut self, unsafe_mode: bool) -> Self {
        self.unsafe_mode = unsafe_mode;
        self
    }

    /// A fresh environment seeded with every package binding.
    pub fn root_env(&self) -> Environment {
        let root = Environment::new();
        self.registry.seed(&root);
        root.child()
    }

    pub fn inside_pipeline(&self) -> bool {
        self.pipeline_depth.get() > 0
    }

    pub fn enter_pipeline(&self) {
        self.pipeline_depth.set(self.pipeline_depth.get() + 1);
    }

    pub fn exit_pipeline(&self) {
        self.pipeline_depth.set(self.pipeline_depth.get() - 1);
    }

    /// Evaluate a whole source text in a fresh environment and return the
    /// value of the last statement. Parse failures come back as a
    /// SyntaxError value.
    pub fn eval_source(&self, src: &str) -> Value {
        let env = self.root_env();
        self.eval_source_in(src, env).0
    }

    pub fn eval_source_in(&self, src: &str, env: Environment) -> (Value, Environment) {
        let stmts = match parser::parse_program(src) {
            Ok(stmts) => stmts,
            Err(e) => return (Value::error(e), env),
        };
        let mut env = env;
        let mut last = Value::Null;
        for stmt in &stmts {
            let (value, next) = self.eval_stmt(stmt, env);
            env = next;
            last = value;
        }
        (last, env)
    }

    /// File mode: evaluate statements top to bottom, reporting the value of
    /// every expression statement that is not Null. Runtime errors do not
    /// stop the sequence; a parse error does.
    pub fn run_script(&self, src: &str, mut report: impl FnMut(&Value)) -> Value {
        let stmts = match parser::parse_program(src).log() {
            Ok(stmts) => stmts.then(|s| debug!("loaded {} statements", s.len())),
            Err(e) => {
                let v = Value::error(e);
                report(&v);
                return v;
            }
        };
        let mut env = self.root_env();
        let mut last = Value::Null;
        for stmt in &stmts {
            let is_expr = matches!(stmt.kind, StmtKind::Expr(_));
            let (value, next) = self.eval_stmt(stmt, env);
            env = next;
            if (is_expr || value.is_error()) && !value.is_null() {
                report(&value);
            }
            last = value;
        }
        last
    }

    /// Evaluate one statement; returns its value and the environment the next
    /// statement runs in (`:=` shadows instead of mutating).
    pub fn eval_stmt(&self, stmt: &Stmt, env: Environment) -> (Value, Environment) {
        match &stmt.kind {
            StmtKind::Define(name, expr) => {
                let value = self.eval(expr, &env);
                if let Some(doc) = &stmt.doc {
                    self.user_docs
                        .borrow_mut()
                        .insert(name.clone(), doc.clone());
                }
                let result = if value.is_error() {
                    value.clone()
                } else {
                    Value::Null
                };
                match env.define(name, value) {
                    Ok(()) => (result, env),
                    Err(e) => (Value::error(e), env),
                }
            }
            StmtKind::Override(name, expr) => {
                let value = self.eval(expr, &env);
                let result = if value.is_error() {
                    value.clone()
                } else {
                    Value::Null
                };
                let next = env.rebind(name, value);
                (result, next)
            }
            StmtKind::Expr(expr) => (self.eval(expr, &env), env),
        }
    }

    pub fn eval(&self, expr: &Expr, env: &Environment) -> Value {
        match expr {
            Expr::Int(n) => Value::Int(*n),
            Expr::Float(x) => Value::Float(*x),
            Expr::Bool(b) => Value::Bool(*b),
            Expr::Str(s) => Value::String(s.clone()),
            Expr::Null => Value::Null,
            Expr::Na => Value::Na(NaKind::Generic),
            Expr::Ident(name) => match env.lookup(name) {
                Some(v) => v,
                None => Value::error(TError::name_error(format!("object `{name}` not found"))),
            },
            Expr::ColumnRef(name) => Value::error(TError::type_error(format!(
                "column reference `${name}` is only valid inside data verbs"
            ))),
            Expr::Unary(op, operand) => {
                let v = self.eval(operand, env);
                if v.is_error() {
                    return v;
                }
                unary_op(*op, v)
            }
            Expr::Binary(op, lhs, rhs) => self.eval_binary(*op, lhs, rhs, env),
            Expr::Broadcast(op, lhs, rhs) => {
                let l = self.eval(lhs, env);
                if l.is_error() {
                    return l;
                }
                let r = self.eval(rhs, env);
                if r.is_error() {
                    return r;
                }
                broadcast_op(*op, &l, &r)
            }
            Expr::Pipe(lhs, rhs) => {
                let input = self.eval(lhs, env);
                self.eval_pipe_target(input, rhs, env)
            }
            Expr::TryPipe(lhs, rhs) => {
                let input = self.eval(lhs, env);
                if input.is_error() {
                    return input;
                }
                self.eval_pipe_target(input, rhs, env)
            }
            Expr::Formula(lhs, rhs) => Value::Formula(Formula {
                lhs: lhs.clone(),
                rhs: rhs.clone(),
            }),
            Expr::If(cond, then, alt) => {
                let c = self.eval(cond, env);
                match c {
                    Value::Error(_) => c,
                    Value::Bool(true) => self.eval(then, env),
                    Value::Bool(false) => self.eval(alt, env),
                    Value::Na(_) => {
                        Value::error(TError::na_operand("`if` condition is NA"))
                    }
                    v => Value::error(TError::type_error(format!(
                        "`if` condition must be a bool, got {}",
                        v.kind()
                    ))),
                }
            }
            Expr::Lambda(params, body) => Value::Function(FunctionValue::Lambda(Rc::new(Lambda {
                params: params.clone(),
                body: body.clone(),
                env: env.clone(),
            }))),
            Expr::Call(callee, args) => {
                let f = self.eval(callee, env);
                if f.is_error() {
                    return f;
                }
                self.apply(&f, None, args, env)
            }
            Expr::Dot(recv, field) => {
                let v = self.eval(recv, env);
                if v.is_error() {
                    return v;
                }
                self.access_field(&v, field)
            }
            Expr::Index(recv, idx) => {
                let v = self.eval(recv, env);
                if v.is_error() {
                    return v;
                }
                let i = self.eval(idx, env);
                if i.is_error() {
                    return i;
                }
                index_value(&v, &i)
            }
            Expr::Collection(items) => {
                let mut values = Vec::with_capacity(items.len());
                let mut any_named = false;
                for item in items {
                    let v = self.eval(&item.value, env);
                    if v.is_error() {
                        return v;
                    }
                    any_named |= item.name.is_some();
                    values.push((item.name.clone(), v));
                }
                if any_named {
                    Value::List(values)
                } else {
                    Value::Vector(values.into_iter().map(|(_, v)| v).collect())
                }
            }
            Expr::DictLit(pairs) => {
                let mut map = IndexMap::new();
                for (k, e) in pairs {
                    let v = self.eval(e, env);
                    if v.is_error() {
                        return v;
                    }
                    map.insert(k.clone(), v);
                }
                Value::Dict(map)
            }
            Expr::Block(stmts) => {
                let mut block_env = env.child();
                let mut last = Value::Null;
                for stmt in stmts {
                    let (value, next) = self.eval_stmt(stmt, block_env);
                    block_env = next;
                    if value.is_error() {
                        return value;
                    }
                    last = value;
                }
                last
            }
            Expr::PipelineBlock(items) => pipeline::build_pipeline_value(self, env, items),
            Expr::IntentBlock(pairs) => {
                let mut fields = Vec::with_capacity(pairs.len());
                for (k, e) in pairs {
                    let v = self.eval(e, env);
                    if v.is_error() {
                        return v;
                    }
                    fields.push((k.clone(), v));
                }
                Value::Intent(super::value::Intent { fields })
            }
        }
    }

    fn eval_binary(&self, op: BinOp, lhs: &Expr, rhs: &Expr, env: &Environment) -> Value {
        // && and || short-circuit before the right side is evaluated
        if matches!(op, BinOp::And | BinOp::Or) {
            let l = self.eval(lhs, env);
            let lb = match l {
                Value::Error(_) => return l,
                Value::Na(_) => {
                    return Value::error(TError::na_operand(format!("`{}` operand", op.symbol())))
                }
                Value::Bool(b) => b,
                v => {
                    return Value::error(TError::type_error(format!(
                        "`{}` expects bool operands, got {}",
                        op.symbol(),
                        v.kind()
                    )))
                }
            };
            match (op, lb) {
                (BinOp::And, false) => return Value::Bool(false),
                (BinOp::Or, true) => return Value::Bool(true),
                _ => {}
            }
            let r = self.eval(rhs, env);
            return match r {
                Value::Error(_) => r,
                Value::Na(_) => {
                    Value::error(TError::na_operand(format!("`{}` operand", op.symbol())))
                }
                Value::Bool(b) => Value::Bool(b),
                v => Value::error(TError::type_error(format!(
                    "`{}` expects bool operands, got {}",
                    op.symbol(),
                    v.kind()
                ))),
            };
        }

        let l = self.eval(lhs, env);
        if l.is_error() {
            return l;
        }
        let r = self.eval(rhs, env);
        if r.is_error() {
            return r;
        }
        scalar_binop(op, &l, &r)
    }

    fn eval_pipe_target(&self, input: Value, target: &Expr, env: &Environment) -> Value {
        match target {
            Expr::Call(callee, args) => {
                let f = self.eval(callee, env);
                if f.is_error() {
                    return f;
                }
                self.apply(&f, Some(input), args, env)
            }
            _ => {
                let f = self.eval(target, env);
                if f.is_error() {
                    return f;
                }
                self.apply(&f, Some(input), &[], env)
            }
        }
    }

    /// Call a function value with an optional piped-in first argument plus
    /// raw call-site arguments.
    pub fn apply(
        &self,
        f: &Value,
        piped: Option<Value>,
        args: &[Arg],
        env: &Environment,
    ) -> Value {
        match f {
            Value::Function(FunctionValue::Builtin(b)) => {
                if b.raw {
                    return self.apply_raw_builtin(b, piped, args, env);
                }
                let mut full = Vec::new();
                let mut named = IndexMap::new();
                if let Some(v) = piped {
                    if v.is_error() && !b.error_aware {
                        return v;
                    }
                    full.push(v);
                }
                for arg in args {
                    let v = self.eval(&arg.value, env);
                    if v.is_error() && !b.error_aware {
                        return v;
                    }
                    match &arg.name {
                        Some(n) => {
                            named.insert(n.clone(), v);
                        }
                        None => full.push(v),
                    }
                }
                self.invoke_builtin(b, full, named, args, env)
            }
            Value::Function(FunctionValue::Lambda(l)) => {
                let mut positional = Vec::new();
                let mut named = Vec::new();
                if let Some(v) = piped {
                    if v.is_error() {
                        return v;
                    }
                    positional.push(v);
                }
                for arg in args {
                    let v = self.eval(&arg.value, env);
                    if v.is_error() {
                        return v;
                    }
                    match &arg.name {
                        Some(n) => named.push((n.clone(), v)),
                        None => positional.push(v),
                    }
                }
                self.call_lambda(l, positional, named)
            }
            v => Value::error(TError::type_error(format!(
                "value of kind {} is not callable",
                v.kind()
            ))),
        }
    }

    fn apply_raw_builtin(
        &self,
        b: &super::function::Builtin,
        piped: Option<Value>,
        args: &[Arg],
        env: &Environment,
    ) -> Value {
        if b.io && self.inside_pipeline() && !self.unsafe_mode {
            return Value::error(TError::file_error(format!(
                "`{}` touches the filesystem and is not permitted inside pipelines; re-run with --unsafe",
                b.name
            )));
        }
        if let Some(v) = &piped {
            if v.is_error() && !b.error_aware {
                return v.clone();
            }
        }
        let positional_count =
            args.iter().filter(|a| a.name.is_none()).count() + usize::from(piped.is_some());
        if positional_count < b.min_arity {
            return Value::error(TError::arity_error(format!(
                "`{}` expects at least {} argument{}, got {}",
                b.name,
                b.min_arity,
                if b.min_arity == 1 { "" } else { "s" },
                positional_count
            )));
        }
        if let Some(max) = b.max_arity {
            if positional_count > max {
                return Value::error(TError::arity_error(format!(
                    "`{}` expects at most {} argument{}, got {}",
                    b.name,
                    max,
                    if max == 1 { "" } else { "s" },
                    positional_count
                )));
            }
        }
        let site = CallSite {
            positional: match piped {
                Some(v) => vec![v],
                None => Vec::new(),
            },
            named: IndexMap::new(),
            raw: args.to_vec(),
        };
        (b.func)(self, env, site)
    }

    fn invoke_builtin(
        &self,
        b: &super::function::Builtin,
        positional: Vec<Value>,
        named: IndexMap<String, Value>,
        raw: &[Arg],
        env: &Environment,
    ) -> Value {
        if b.io && self.inside_pipeline() && !self.unsafe_mode {
            return Value::error(TError::file_error(format!(
                "`{}` touches the filesystem and is not permitted inside pipelines; re-run with --unsafe",
                b.name
            )));
        }
        for name in named.keys() {
            if !b.any_named && !b.named_params.contains(&name.as_str()) {
                return Value::error(TError::arity_error(format!(
                    "unknown named argument `{name}` for `{}`",
                    b.name
                )));
            }
        }
        if positional.len() < b.min_arity {
            return Value::error(TError::arity_error(format!(
                "`{}` expects at least {} argument{}, got {}",
                b.name,
                b.min_arity,
                if b.min_arity == 1 { "" } else { "s" },
                positional.len()
            )));
        }
        if let Some(max) = b.max_arity {
            if positional.len() > max {
                return Value::error(TError::arity_error(format!(
                    "`{}` expects at most {} argument{}, got {}",
                    b.name,
                    max,
                    if max == 1 { "" } else { "s" },
                    positional.len()
                )));
            }
        }
        let site = CallSite {
            positional,
            named,
            raw: raw.to_vec(),
        };
        (b.func)(self, env, site)
    }

    /// Bind lambda parameters: positional left-to-right, then named by
    /// parameter name.
    pub fn call_lambda(
        &self,
        lambda: &Lambda,
        positional: Vec<Value>,
        named: Vec<(String, Value)>,
    ) -> Value {
        if positional.len() > lambda.params.len() {
            return Value::error(TError::arity_error(format!(
                "function expects {} argument{}, got {}",
                lambda.params.len(),
                if lambda.params.len() == 1 { "" } else { "s" },
                positional.len() + named.len()
            )));
        }
        let frame = lambda.env.child();
        let mut bound: Vec<Option<Value>> = vec![None; lambda.params.len()];
        for (i, v) in positional.into_iter().enumerate() {
            bound[i] = Some(v);
        }
        for (name, v) in named {
            match lambda.params.iter().position(|p| p == &name) {
                Some(i) => {
                    if bound[i].is_some() {
                        return Value::error(TError::arity_error(format!(
                            "argument `{name}` bound twice"
                        )));
                    }
                    bound[i] = Some(v);
                }
                None => {
                    return Value::error(TError::arity_error(format!(
                        "unknown named argument `{name}`"
                    )))
                }
            }
        }
        for (i, slot) in bound.into_iter().enumerate() {
            match slot {
                Some(v) => {
                    if let Err(e) = frame.define(&lambda.params[i], v) {
                        return Value::error(e);
                    }
                }
                None => {
                    return Value::error(TError::arity_error(format!(
                        "missing argument `{}`",
                        lambda.params[i]
                    )))
                }
            }
        }
        self.eval(&lambda.body, &frame)
    }

    /// Call a function value with already-evaluated positional arguments.
    /// Used by the data verbs and the higher-order list builtins.
    pub fn call_function(&self, f: &Value, args: Vec<Value>) -> Value {
        match f {
            Value::Function(FunctionValue::Lambda(l)) => self.call_lambda(l, args, Vec::new()),
            Value::Function(FunctionValue::Builtin(b)) => {
                if b.raw {
                    return Value::error(TError::type_error(format!(
                        "`{}` cannot be called with pre-evaluated arguments",
                        b.name
                    )));
                }
                for v in &args {
                    if v.is_error() && !b.error_aware {
                        return v.clone();
                    }
                }
                self.invoke_builtin(b, args, IndexMap::new(), &[], &Environment::new())
            }
            v => Value::error(TError::type_error(format!(
                "value of kind {} is not callable",
                v.kind()
            ))),
        }
    }

    fn access_field(&self, v: &Value, field: &str) -> Value {
        match v {
            Value::Dict(map) => match map.get(field) {
                Some(v) => v.clone(),
                None => Value::error(TError::key_error(format!("key `{field}` not found"))),
            },
            Value::List(items) => {
                for (name, item) in items {
                    if name.as_deref() == Some(field) {
                        return item.clone();
                    }
                }
                Value::error(TError::key_error(format!(
                    "list has no entry named `{field}`"
                )))
            }
            Value::Intent(intent) => {
                for (name, item) in &intent.fields {
                    if name == field {
                        return item.clone();
                    }
                }
                Value::error(TError::key_error(format!(
                    "intent has no field named `{field}`"
                )))
            }
            Value::Pipeline(p) => pipeline::node_value(self, p, field),
            Value::DataFrame(df) => df.column_vector(field),
            v => Value::error(TError::type_error(format!(
                "cannot access field `{field}` on {}",
                v.kind()
            ))),
        }
    }
}

fn unary_op(op: UnOp, v: Value) -> Value {
    match op {
        UnOp::Neg => match v {
            Value::Int(n) => Value::Int(-n),
            Value::Float(x) => Value::Float(-x),
            Value::Na(_) => Value::error(TError::na_operand("unary `-`")),
            Value::Vector(items) => {
                let mut out = Vec::with_capacity(items.len());
                for item in items {
                    match unary_op(UnOp::Neg, item) {
                        Value::Error(e) => return Value::Error(e),
                        v => out.push(v),
                    }
                }
                Value::Vector(out)
            }
            Value::NDArray(a) => Value::NDArray(NDArray {
                shape: a.shape,
                data: a.data.into_iter().map(|x| -x).collect(),
            }),
            v => Value::error(TError::type_error(format!(
                "cannot negate {}",
                v.kind()
            ))),
        },
        UnOp::Not => match v {
            Value::Bool(b) => Value::Bool(!b),
            Value::Na(_) => Value::error(TError::na_operand("unary `!`")),
            v => Value::error(TError::type_error(format!(
                "`!` expects a bool, got {}",
                v.kind()
            ))),
        },
    }
}

/// Scalar binary operator semantics: promotion, NA rejection, string rules.
pub fn scalar_binop(op: BinOp, l: &Value, r: &Value) -> Value {
    if l.is_na() || r.is_na() {
        return Value::error(TError::na_operand(format!("`{}` operand", op.symbol())));
    }
    match op {
        BinOp::Add | BinOp::Sub | BinOp::Mul | BinOp::Div | BinOp::Mod => arith(op, l, r),
        BinOp::Eq => Value::Bool(l.equals(r)),
        BinOp::Ne => Value::Bool(!l.equals(r)),
        BinOp::Lt | BinOp::Gt | BinOp::Le | BinOp::Ge => match l.try_cmp(r) {
            Some(ord) => {
                let res = match op {
                    BinOp::Lt => ord.is_lt(),
                    BinOp::Gt => ord.is_gt(),
                    BinOp::Le => ord.is_le(),
                    BinOp::Ge => ord.is_ge(),
                    _ => unreachable!(),
                };
                Value::Bool(res)
            }
            None => Value::error(TError::type_error(format!(
                "cannot compare {} and {} with `{}`",
                l.kind(),
                r.kind(),
                op.symbol()
            ))),
        },
        // non-short-circuit forms used by broadcast
        BinOp::And | BinOp::Or => match (l, r) {
            (Value::Bool(a), Value::Bool(b)) => Value::Bool(if op == BinOp::And {
                *a && *b
            } else {
                *a || *b
            }),
            _ => Value::error(TError::type_error(format!(
                "`{}` expects bool operands, got {} and {}",
                op.symbol(),
                l.kind(),
                r.kind()
            ))),
        },
    }
}

fn arith(op: BinOp, l: &Value, r: &Value) -> Value {
    if let (Value::String(_), Value::String(_)) = (l, r) {
        if op == BinOp::Add {
            return Value::error(TError::type_error(
                "`+` is not defined for strings; use `join` or `paste`",
            ));
        }
    }
    match (l, r) {
        (Value::Int(a), Value::Int(b)) => match op {
            BinOp::Add => Value::Int(a + b),
            BinOp::Sub => Value::Int(a - b),
            BinOp::Mul => Value::Int(a * b),
            BinOp::Div => {
                if *b == 0 {
                    Value::error(TError::division_by_zero("division by zero"))
                } else {
                    Value::Float(*a as f64 / *b as f64)
                }
            }
            BinOp::Mod => {
                if *b == 0 {
                    Value::error(TError::division_by_zero("remainder by zero"))
                } else {
                    Value::Int(a % b)
                }
            }
            _ => unreachable!(),
        },
        (Value::Int(_) | Value::Float(_), Value::Int(_) | Value::Float(_)) => {
            let a = l.get_float().expect("numeric");
            let b = r.get_float().expect("numeric");
            let out = match op {
                BinOp::Add => a + b,
                BinOp::Sub => a - b,
                BinOp::Mul => a * b,
                BinOp::Div => a / b,
                BinOp::Mod => a % b,
                _ => unreachable!(),
            };
            Value::Float(out)
        }
        _ => Value::error(TError::type_error(format!(
            "cannot apply `{}` to {} and {}",
            op.symbol(),
            l.kind(),
            r.kind()
        ))),
    }
}

/// Elementwise `.op`. Sequences must have equal lengths; a scalar on either
/// side broadcasts.
pub fn broadcast_op(op: BinOp, l: &Value, r: &Value) -> Value {
    let arith_op = matches!(
        op,
        BinOp::Add | BinOp::Sub | BinOp::Mul | BinOp::Div | BinOp::Mod
    );
    match (l, r) {
        (Value::Vector(a), Value::Vector(b)) => {
            if a.len() != b.len() {
                return Value::error(TError::value_error(format!(
                    "broadcast lengths do not match: {} vs {}",
                    a.len(),
                    b.len()
                )));
            }
            let mut out = Vec::with_capacity(a.len());
            for (x, y) in a.iter().zip(b) {
                match scalar_binop(op, x, y) {
                    Value::Error(e) => return Value::Error(e),
                    v => out.push(v),
                }
            }
            Value::Vector(out)
        }
        (Value::Vector(a), scalar) if !matches!(scalar, Value::NDArray(_)) => {
            let mut out = Vec::with_capacity(a.len());
            for x in a {
                match scalar_binop(op, x, scalar) {
                    Value::Error(e) => return Value::Error(e),
                    v => out.push(v),
                }
            }
            Value::Vector(out)
        }
        (scalar, Value::Vector(b)) if !matches!(scalar, Value::NDArray(_)) => {
            let mut out = Vec::with_capacity(b.len());
            for y in b {
                match scalar_binop(op, scalar, y) {
                    Value::Error(e) => return Value::Error(e),
                    v => out.push(v),
                }
            }
            Value::Vector(out)
        }
        (Value::NDArray(a), Value::NDArray(b)) => {
            if a.shape != b.shape {
                return Value::error(TError::value_error(format!(
                    "broadcast lengths do not match: {} vs {}",
                    a.data.len(),
                    b.data.len()
                )));
            }
            ndarray_zip(op, arith_op, &a.shape, a.data.iter(), b.data.iter())
        }
        (Value::NDArray(a), scalar) if scalar.is_numeric() => {
            let s = scalar.get_float().expect("numeric");
            ndarray_zip(
                op,
                arith_op,
                &a.shape,
                a.data.iter(),
                std::iter::repeat(&s).take(a.data.len()),
            )
        }
        (scalar, Value::NDArray(b)) if scalar.is_numeric() => {
            let s = scalar.get_float().expect("numeric");
            ndarray_zip(
                op,
                arith_op,
                &b.shape,
                std::iter::repeat(&s).take(b.data.len()),
                b.data.iter(),
            )
        }
        (l, r) => scalar_binop(op, l, r),
    }
}

fn ndarray_zip<'a>(
    op: BinOp,
    arith_op: bool,
    shape: &[usize],
    xs: impl Iterator<Item = &'a f64>,
    ys: impl Iterator<Item = &'a f64>,
) -> Value {
    if arith_op {
        let mut data = Vec::new();
        for (x, y) in xs.zip(ys) {
            let v = match op {
                BinOp::Add => x + y,
                BinOp::Sub => x - y,
                BinOp::Mul => x * y,
                BinOp::Div => x / y,
                BinOp::Mod => x % y,
                _ => unreachable!(),
            };
            data.push(v);
        }
        Value::NDArray(NDArray {
            shape: shape.to_vec(),
            data,
        })
    } else {
        let mut out = Vec::new();
        for (x, y) in xs.zip(ys) {
            match scalar_binop(op, &Value::Float(*x), &Value::Float(*y)) {
                Value::Error(e) => return Value::Error(e),
                v => out.push(v),
            }
        }
        Value::Vector(out)
    }
}

fn index_value(v: &Value, idx: &Value) -> Value {
    match v {
        Value::Vector(items) => match idx.get_int() {
            Ok(i) => {
                if i < 1 || i as usize > items.len() {
                    Value::error(TError::index_error(format!(
                        "index {i} out of range for vector of length {}",
                        items.len()
                    )))
                } else {
                    items[i as usize - 1].clone()
                }
            }
            Err(e) => Value::error(e),
        },
        Value::List(items) => match idx {
            Value::Int(i) => {
                if *i < 1 || *i as usize > items.len() {
                    Value::error(TError::index_error(format!(
                        "index {i} out of range for list of length {}",
                        items.len()
                    )))
                } else {
                    items[*i as usize - 1].1.clone()
                }
            }
            Value::String(key) => {
                for (name, item) in items {
                    if name.as_deref() == Some(key.as_str()) {
                        return item.clone();
                    }
                }
                Value::error(TError::key_error(format!(
                    "list has no entry named `{key}`"
                )))
            }
            v => Value::error(TError::type_error(format!(
                "list index must be an int or string, got {}",
                v.kind()
            ))),
        },
        Value::Dict(map) => match idx.get_string() {
            Ok(key) => match map.get(key) {
                Some(v) => v.clone(),
                None => Value::error(TError::key_error(format!("key `{key}` not found"))),
            },
            Err(e) => Value::error(e),
        },
        Value::NDArray(a) => match idx.get_int() {
            Ok(i) => {
                if i < 1 || i as usize > a.data.len() {
                    Value::error(TError::index_error(format!(
                        "index {i} out of range for ndarray of {} elements",
                        a.data.len()
                    )))
                } else {
                    Value::Float(a.data[i as usize - 1])
                }
            }
            Err(e) => Value::error(e),
        },
        Value::DataFrame(df) => match idx.get_string() {
            Ok(name) => df.column_vector(name),
            Err(e) => Value::error(e),
        },
        v => Value::error(TError::type_error(format!(
            "cannot index into {}",
            v.kind()
        ))),
    }
}
