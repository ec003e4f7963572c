use std::rc::Rc;

use super::ast::{Arg, Expr, Stmt, StmtKind};
use super::env::Environment;
use super::eval::Interpreter;
use super::{TError, Value};

/// The synthetic row parameter the data verbs desugar into. The grammar has
/// no way to spell an identifier starting with `.`, so user code can neither
/// shadow nor observe it.
pub const ROW_VAR: &str = ".row";

/// True when the expression mentions `$col` anywhere the rewrite would reach.
pub fn contains_column_ref(expr: &Expr) -> bool {
    let mut found = false;
    walk(expr, &mut |e| {
        if matches!(e, Expr::ColumnRef(_)) {
            found = true;
        }
    });
    found
}

/// Collect the distinct column names mentioned by `$col` references, in
/// appearance order.
pub fn column_refs(expr: &Expr) -> Vec<String> {
    let mut names: Vec<String> = Vec::new();
    walk(expr, &mut |e| {
        if let Expr::ColumnRef(name) = e {
            if !names.iter().any(|n| n == name) {
                names.push(name.clone());
            }
        }
    });
    names
}

fn walk(expr: &Expr, f: &mut impl FnMut(&Expr)) {
    f(expr);
    match expr {
        Expr::Unary(_, e) | Expr::Dot(e, _) => walk(e, f),
        Expr::Binary(_, l, r)
        | Expr::Broadcast(_, l, r)
        | Expr::Pipe(l, r)
        | Expr::TryPipe(l, r)
        | Expr::Formula(l, r)
        | Expr::Index(l, r) => {
            walk(l, f);
            walk(r, f);
        }
        Expr::If(c, t, e) => {
            walk(c, f);
            walk(t, f);
            walk(e, f);
        }
        Expr::Lambda(_, body) => walk(body, f),
        Expr::Call(callee, args) => {
            walk(callee, f);
            for a in args {
                walk(&a.value, f);
            }
        }
        Expr::Collection(items) => {
            for a in items {
                walk(&a.value, f);
            }
        }
        Expr::DictLit(pairs) | Expr::IntentBlock(pairs) => {
            for (_, v) in pairs {
                walk(v, f);
            }
        }
        Expr::Block(stmts) => {
            for s in stmts {
                match &s.kind {
                    StmtKind::Define(_, e) | StmtKind::Override(_, e) | StmtKind::Expr(e) => {
                        walk(e, f)
                    }
                }
            }
        }
        _ => {}
    }
}

/// The pure AST-to-AST pass: every `$name` becomes `.row.name`. Subtrees
/// without column references are shared, not copied.
pub fn rewrite(expr: &Rc<Expr>) -> Rc<Expr> {
    if !contains_column_ref(expr) {
        return expr.clone();
    }
    let rebuilt = match &**expr {
        Expr::ColumnRef(name) => {
            Expr::Dot(Rc::new(Expr::Ident(ROW_VAR.to_string())), name.clone())
        }
        Expr::Unary(op, e) => Expr::Unary(*op, rewrite(e)),
        Expr::Binary(op, l, r) => Expr::Binary(*op, rewrite(l), rewrite(r)),
        Expr::Broadcast(op, l, r) => Expr::Broadcast(*op, rewrite(l), rewrite(r)),
        Expr::Pipe(l, r) => Expr::Pipe(rewrite(l), rewrite(r)),
        Expr::TryPipe(l, r) => Expr::TryPipe(rewrite(l), rewrite(r)),
        Expr::Formula(l, r) => Expr::Formula(rewrite(l), rewrite(r)),
        Expr::If(c, t, e) => Expr::If(rewrite(c), rewrite(t), rewrite(e)),
        Expr::Lambda(params, body) => Expr::Lambda(params.clone(), rewrite(body)),
        Expr::Call(callee, args) => Expr::Call(
            rewrite(callee),
            args.iter()
                .map(|a| Arg {
                    name: a.name.clone(),
                    value: rewrite(&a.value),
                })
                .collect(),
        ),
        Expr::Dot(e, field) => Expr::Dot(rewrite(e), field.clone()),
        Expr::Index(e, i) => Expr::Index(rewrite(e), rewrite(i)),
        Expr::Collection(items) => Expr::Collection(
            items
                .iter()
                .map(|a| Arg {
                    name: a.name.clone(),
                    value: rewrite(&a.value),
                })
                .collect(),
        ),
        Expr::DictLit(pairs) => Expr::DictLit(
            pairs
                .iter()
                .map(|(k, v)| (k.clone(), rewrite(v)))
                .collect(),
        ),
        Expr::Block(stmts) => Expr::Block(
            stmts
                .iter()
                .map(|s| Stmt {
                    doc: s.doc.clone(),
                    kind: match &s.kind {
                        StmtKind::Define(n, e) => StmtKind::Define(n.clone(), rewrite(e)),
                        StmtKind::Override(n, e) => StmtKind::Override(n.clone(), rewrite(e)),
                        StmtKind::Expr(e) => StmtKind::Expr(rewrite(e)),
                    },
                })
                .collect(),
        ),
        // pipeline/intent blocks and plain leaves are left as-is
        other => other.clone(),
    };
    Rc::new(rebuilt)
}

/// Resolve one argument of `filter`/`mutate`/`summarize` into a callable:
/// column-referencing expressions desugar to `\(.row) expr'`; an expression
/// already evaluating to a function is used as-is.
pub fn as_row_fn(
    interp: &Interpreter,
    env: &Environment,
    verb: &str,
    expr: &Rc<Expr>,
) -> Result<Value, TError> {
    if contains_column_ref(expr) {
        let lambda = Expr::Lambda(vec![ROW_VAR.to_string()], rewrite(expr));
        return Ok(interp.eval(&lambda, env));
    }
    let v = interp.eval(expr, env);
    match v {
        Value::Function(_) => Ok(v),
        Value::Error(e) => Err(*e),
        v => Err(TError::type_error(format!(
            "`{verb}` expects a `$column` expression or a function, got {}",
            v.kind()
        ))),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::interp::parser::parse_expression;

    #[test]
    fn detects_column_refs_through_compounds() {
        let e = parse_expression("f($age) + [1, $x]").unwrap();
        assert!(contains_column_ref(&e));
        assert_eq!(column_refs(&e), vec!["age", "x"]);
        let plain = parse_expression("a + b").unwrap();
        assert!(!contains_column_ref(&plain));
    }

    #[test]
    fn rewrite_targets_the_row_variable() {
        let e = parse_expression("$age > 28").unwrap();
        let rewritten = rewrite(&e);
        assert_eq!(rewritten.deparse(), "(.row.age > 28)");
    }

    #[test]
    fn rewrite_shares_untouched_subtrees() {
        let e = parse_expression("a + b").unwrap();
        let rewritten = rewrite(&e);
        assert!(Rc::ptr_eq(&e, &rewritten));
    }

    #[test]
    fn rewrite_recurses_into_calls_and_literals() {
        let e = parse_expression("mean($x) + {k: $y}.k").unwrap();
        let rewritten = rewrite(&e);
        let text = rewritten.deparse();
        assert!(text.contains(".row.x"));
        assert!(text.contains(".row.y"));
    }
}
