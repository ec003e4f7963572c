use std::collections::HashSet;
use std::fmt::Display;
use std::rc::Rc;

/// Binary operators. Broadcast forms (`.+`, `.==`, ...) reuse these tags and
/// are distinguished by the `Broadcast` expression node.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum BinOp {
    Add,
    Sub,
    Mul,
    Div,
    Mod,
    Eq,
    Ne,
    Lt,
    Gt,
    Le,
    Ge,
    And,
    Or,
}

impl BinOp {
    pub fn symbol(&self) -> &'static str {
        match self {
            BinOp::Add => "+",
            BinOp::Sub => "-",
            BinOp::Mul => "*",
            BinOp::Div => "/",
            BinOp::Mod => "%",
            BinOp::Eq => "==",
            BinOp::Ne => "!=",
            BinOp::Lt => "<",
            BinOp::Gt => ">",
            BinOp::Le => "<=",
            BinOp::Ge => ">=",
            BinOp::And => "&&",
            BinOp::Or => "||",
        }
    }
}

impl Display for BinOp {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.symbol())
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum UnOp {
    Neg,
    Not,
}

/// One call-site argument, possibly named. NSE builtins receive these
/// unevaluated.
#[derive(Debug, Clone)]
pub struct Arg {
    pub name: Option<String>,
    pub value: Rc<Expr>,
}

/// A statement inside a `pipeline { ... }` block.
#[derive(Debug, Clone)]
pub enum PipelineItem {
    Import(String),
    Node(String, Rc<Expr>),
}

#[derive(Debug, Clone)]
pub enum Expr {
    Int(i64),
    Float(f64),
    Bool(bool),
    Str(String),
    Null,
    Na,
    Ident(String),
    /// The `$name` syntactic form. Never evaluates on its own; data verbs
    /// rewrite it before evaluation.
    ColumnRef(String),
    Unary(UnOp, Rc<Expr>),
    Binary(BinOp, Rc<Expr>, Rc<Expr>),
    /// Elementwise `.op` form.
    Broadcast(BinOp, Rc<Expr>, Rc<Expr>),
    Pipe(Rc<Expr>, Rc<Expr>),
    /// `?|>`: short-circuits on a left-hand error without calling.
    TryPipe(Rc<Expr>, Rc<Expr>),
    Formula(Rc<Expr>, Rc<Expr>),
    If(Rc<Expr>, Rc<Expr>, Rc<Expr>),
    Lambda(Vec<String>, Rc<Expr>),
    Call(Rc<Expr>, Vec<Arg>),
    Dot(Rc<Expr>, String),
    Index(Rc<Expr>, Rc<Expr>),
    /// `[a, b, name = c]`: a Vector when no entry is named, a List otherwise.
    Collection(Vec<Arg>),
    DictLit(Vec<(String, Rc<Expr>)>),
    Block(Vec<Stmt>),
    PipelineBlock(Vec<PipelineItem>),
    IntentBlock(Vec<(String, Rc<Expr>)>),
}

#[derive(Debug, Clone)]
pub enum StmtKind {
    Define(String, Rc<Expr>),
    Override(String, Rc<Expr>),
    Expr(Rc<Expr>),
}

#[derive(Debug, Clone)]
pub struct Stmt {
    pub kind: StmtKind,
    /// Joined `--#` doc-comment lines immediately preceding the statement.
    pub doc: Option<String>,
}

impl Expr {
    /// Render the expression back to source text. Used by Formula printing,
    /// `pipeline.nix` emission and the serializer.
    pub fn deparse(&self) -> String {
        match self {
            Expr::Int(n) => n.to_string(),
            Expr::Float(x) => {
                if x.fract() == 0.0 && x.is_finite() {
                    format!("{x:.1}")
                } else {
                    format!("{x}")
                }
            }
            Expr::Bool(b) => b.to_string(),
            Expr::Str(s) => format!("{s:?}"),
            Expr::Null => "null".to_string(),
            Expr::Na => "NA".to_string(),
            Expr::Ident(name) => name.clone(),
            Expr::ColumnRef(name) => format!("${name}"),
            Expr::Unary(UnOp::Neg, e) => format!("-{}", e.deparse()),
            Expr::Unary(UnOp::Not, e) => format!("!{}", e.deparse()),
            Expr::Binary(op, l, r) => format!("({} {} {})", l.deparse(), op, r.deparse()),
            Expr::Broadcast(op, l, r) => format!("({} .{} {})", l.deparse(), op, r.deparse()),
            Expr::Pipe(l, r) => format!("{} |> {}", l.deparse(), r.deparse()),
            Expr::TryPipe(l, r) => format!("{} ?|> {}", l.deparse(), r.deparse()),
            Expr::Formula(l, r) => format!("{} ~ {}", l.deparse(), r.deparse()),
            Expr::If(c, t, e) => format!(
                "if ({}) {} else {}",
                c.deparse(),
                t.deparse(),
                e.deparse()
            ),
            Expr::Lambda(params, body) => {
                format!("\\({}) {}", params.join(", "), body.deparse())
            }
            Expr::Call(callee, args) => {
                let rendered: Vec<String> = args
                    .iter()
                    .map(|a| match &a.name {
                        Some(n) => format!("{n} = {}", a.value.deparse()),
                        None => a.value.deparse(),
                    })
                    .collect();
                format!("{}({})", callee.deparse(), rendered.join(", "))
            }
            Expr::Dot(recv, field) => format!("{}.{field}", recv.deparse()),
            Expr::Index(recv, idx) => format!("{}[{}]", recv.deparse(), idx.deparse()),
            Expr::Collection(items) => {
                let rendered: Vec<String> = items
                    .iter()
                    .map(|a| match &a.name {
                        Some(n) => format!("{n} = {}", a.value.deparse()),
                        None => a.value.deparse(),
                    })
                    .collect();
                format!("[{}]", rendered.join(", "))
            }
            Expr::DictLit(pairs) => {
                let rendered: Vec<String> = pairs
                    .iter()
                    .map(|(k, v)| format!("{k}: {}", v.deparse()))
                    .collect();
                format!("{{{}}}", rendered.join(", "))
            }
            Expr::Block(stmts) => {
                let rendered: Vec<String> = stmts.iter().map(|s| s.deparse()).collect();
                format!("{{ {} }}", rendered.join("; "))
            }
            Expr::PipelineBlock(items) => {
                let rendered: Vec<String> = items
                    .iter()
                    .map(|item| match item {
                        PipelineItem::Import(name) => format!("import {name:?}"),
                        PipelineItem::Node(name, e) => format!("{name} = {}", e.deparse()),
                    })
                    .collect();
                format!("pipeline {{ {} }}", rendered.join("; "))
            }
            Expr::IntentBlock(pairs) => {
                let rendered: Vec<String> = pairs
                    .iter()
                    .map(|(k, v)| format!("{k}: {}", v.deparse()))
                    .collect();
                format!("intent {{{}}}", rendered.join(", "))
            }
        }
    }

    /// Collect every free identifier. `bound` carries lambda parameters and
    /// block-local definitions while walking.
    pub fn free_vars(&self, bound: &mut HashSet<String>, out: &mut Vec<String>) {
        match self {
            Expr::Ident(name) => {
                if !bound.contains(name) && !out.iter().any(|n| n == name) {
                    out.push(name.clone());
                }
            }
            Expr::Int(_)
            | Expr::Float(_)
            | Expr::Bool(_)
            | Expr::Str(_)
            | Expr::Null
            | Expr::Na
            | Expr::ColumnRef(_) => {}
            Expr::Unary(_, e) => e.free_vars(bound, out),
            Expr::Binary(_, l, r) | Expr::Broadcast(_, l, r) => {
                l.free_vars(bound, out);
                r.free_vars(bound, out);
            }
            Expr::Pipe(l, r) | Expr::TryPipe(l, r) | Expr::Formula(l, r) => {
                l.free_vars(bound, out);
                r.free_vars(bound, out);
            }
            Expr::If(c, t, e) => {
                c.free_vars(bound, out);
                t.free_vars(bound, out);
                e.free_vars(bound, out);
            }
            Expr::Lambda(params, body) => {
                let added: Vec<String> = params
                    .iter()
                    .filter(|p| bound.insert((*p).clone()))
                    .cloned()
                    .collect();
                body.free_vars(bound, out);
                for p in added {
                    bound.remove(&p);
                }
            }
            Expr::Call(callee, args) => {
                callee.free_vars(bound, out);
                for a in args {
                    a.value.free_vars(bound, out);
                }
            }
            Expr::Dot(recv, _) => recv.free_vars(bound, out),
            Expr::Index(recv, idx) => {
                recv.free_vars(bound, out);
                idx.free_vars(bound, out);
            }
            Expr::Collection(items) => {
                for a in items {
                    a.value.free_vars(bound, out);
                }
            }
            Expr::DictLit(pairs) => {
                for (_, v) in pairs {
                    v.free_vars(bound, out);
                }
            }
            Expr::Block(stmts) => {
                let mut added = Vec::new();
                for stmt in stmts {
                    match &stmt.kind {
                        StmtKind::Define(name, e) | StmtKind::Override(name, e) => {
                            e.free_vars(bound, out);
                            if bound.insert(name.clone()) {
                                added.push(name.clone());
                            }
                        }
                        StmtKind::Expr(e) => e.free_vars(bound, out),
                    }
                }
                for name in added {
                    bound.remove(&name);
                }
            }
            Expr::PipelineBlock(items) => {
                for item in items {
                    if let PipelineItem::Node(_, e) = item {
                        e.free_vars(bound, out);
                    }
                }
            }
            Expr::IntentBlock(pairs) => {
                for (_, v) in pairs {
                    v.free_vars(bound, out);
                }
            }
        }
    }
}

impl Stmt {
    pub fn deparse(&self) -> String {
        match &self.kind {
            StmtKind::Define(name, e) => format!("{name} = {}", e.deparse()),
            StmtKind::Override(name, e) => format!("{name} := {}", e.deparse()),
            StmtKind::Expr(e) => e.deparse(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn ident(name: &str) -> Rc<Expr> {
        Rc::new(Expr::Ident(name.to_string()))
    }

    #[test]
    fn deparse_round_readable() {
        let e = Expr::Binary(BinOp::Add, ident("a"), Rc::new(Expr::Int(1)));
        assert_eq!(e.deparse(), "(a + 1)");
        let lam = Expr::Lambda(vec!["x".into()], ident("x"));
        assert_eq!(lam.deparse(), "\\(x) x");
    }

    #[test]
    fn free_vars_skip_lambda_params() {
        let body = Rc::new(Expr::Binary(BinOp::Add, ident("x"), ident("y")));
        let lam = Expr::Lambda(vec!["x".into()], body);
        let mut bound = HashSet::new();
        let mut out = Vec::new();
        lam.free_vars(&mut bound, &mut out);
        assert_eq!(out, vec!["y"]);
    }

    #[test]
    fn free_vars_are_deduplicated_in_order() {
        let e = Expr::Binary(
            BinOp::Add,
            Rc::new(Expr::Binary(BinOp::Add, ident("b"), ident("a"))),
            ident("b"),
        );
        let mut bound = HashSet::new();
        let mut out = Vec::new();
        e.free_vars(&mut bound, &mut out);
        assert_eq!(out, vec!["b", "a"]);
    }
}
