use std::rc::Rc;

use super::ast::{Arg, BinOp, Expr, PipelineItem, Stmt, StmtKind, UnOp};
use super::TError;

// Newline discipline: a newline ends a statement unless it follows an
// operator, a comma, or an opening bracket. `_` is horizontal whitespace,
// `__` also spans newlines.
peg::parser! {
    grammar t_parser() for str {
        rule plain_comment() = "--" !"#" (!"\n" [_])*
        rule _() = quiet!{ (" " / "\t" / "\r" / plain_comment())* }
        rule __() = quiet!{ (" " / "\t" / "\r" / "\n" / plain_comment())* }
        rule nl() = "\n"
        rule sep() = _ ((";" / nl()) _)+

        rule ident_char() = ['a'..='z' | 'A'..='Z' | '0'..='9' | '_']

        rule keyword()
            = ("if" / "else" / "and" / "or" / "not" / "true" / "false" / "null"
               / "NA" / "pipeline" / "intent" / "import" / "export") !ident_char()

        rule identifier() -> String
            = s:$(!keyword() ['a'..='z' | 'A'..='Z' | '_'] ident_char()*) { s.to_string() }

        pub rule program() -> Vec<Stmt>
            = __() stmts:(statement() ** sep()) sep()? __() { stmts }

        pub rule expression_only() -> Rc<Expr>
            = __() e:expression() __() { e }

        rule statement() -> Stmt
            = doc:doc_block()? kind:stmt_kind() { Stmt { kind, doc } }

        rule doc_block() -> String
            = lines:doc_line()+ { lines.join("\n") }

        rule doc_line() -> String
            = "--#" s:$((!"\n" [_])*) nl() _ { s.trim().to_string() }

        rule stmt_kind() -> StmtKind
            = name:identifier() _ ":=" __ e:expression() { StmtKind::Override(name, e) }
            / name:identifier() _ "=" !"=" __ e:expression() { StmtKind::Define(name, e) }
            / e:expression() { StmtKind::Expr(e) }

        pub rule expression() -> Rc<Expr> = precedence!{
            x:(@) _ "|>" __ y:@ { Rc::new(Expr::Pipe(x, y)) }
            x:(@) _ "?|>" __ y:@ { Rc::new(Expr::TryPipe(x, y)) }
            --
            x:(@) _ "~" __ y:@ { Rc::new(Expr::Formula(x, y)) }
            --
            x:(@) _ "||" __ y:@ { Rc::new(Expr::Binary(BinOp::Or, x, y)) }
            x:(@) _ "or" !ident_char() __ y:@ { Rc::new(Expr::Binary(BinOp::Or, x, y)) }
            x:(@) _ ".|" __ y:@ { Rc::new(Expr::Broadcast(BinOp::Or, x, y)) }
            x:(@) _ "|" !['|' | '>'] __ y:@ { Rc::new(Expr::Broadcast(BinOp::Or, x, y)) }
            --
            x:(@) _ "&&" __ y:@ { Rc::new(Expr::Binary(BinOp::And, x, y)) }
            x:(@) _ "and" !ident_char() __ y:@ { Rc::new(Expr::Binary(BinOp::And, x, y)) }
            x:(@) _ ".&" __ y:@ { Rc::new(Expr::Broadcast(BinOp::And, x, y)) }
            x:(@) _ "&" !"&" __ y:@ { Rc::new(Expr::Broadcast(BinOp::And, x, y)) }
            --
            x:(@) _ ".==" __ y:@ { Rc::new(Expr::Broadcast(BinOp::Eq, x, y)) }
            x:(@) _ ".!=" __ y:@ { Rc::new(Expr::Broadcast(BinOp::Ne, x, y)) }
            x:(@) _ ".<=" __ y:@ { Rc::new(Expr::Broadcast(BinOp::Le, x, y)) }
            x:(@) _ ".>=" __ y:@ { Rc::new(Expr::Broadcast(BinOp::Ge, x, y)) }
            x:(@) _ ".<" __ y:@ { Rc::new(Expr::Broadcast(BinOp::Lt, x, y)) }
            x:(@) _ ".>" __ y:@ { Rc::new(Expr::Broadcast(BinOp::Gt, x, y)) }
            x:(@) _ "==" __ y:@ { Rc::new(Expr::Binary(BinOp::Eq, x, y)) }
            x:(@) _ "!=" __ y:@ { Rc::new(Expr::Binary(BinOp::Ne, x, y)) }
            x:(@) _ "<=" __ y:@ { Rc::new(Expr::Binary(BinOp::Le, x, y)) }
            x:(@) _ ">=" __ y:@ { Rc::new(Expr::Binary(BinOp::Ge, x, y)) }
            x:(@) _ "<" __ y:@ { Rc::new(Expr::Binary(BinOp::Lt, x, y)) }
            x:(@) _ ">" !"=" __ y:@ { Rc::new(Expr::Binary(BinOp::Gt, x, y)) }
            --
            x:(@) _ ".+" __ y:@ { Rc::new(Expr::Broadcast(BinOp::Add, x, y)) }
            x:(@) _ ".-" __ y:@ { Rc::new(Expr::Broadcast(BinOp::Sub, x, y)) }
            x:(@) _ "+" __ y:@ { Rc::new(Expr::Binary(BinOp::Add, x, y)) }
            x:(@) _ "-" __ y:@ { Rc::new(Expr::Binary(BinOp::Sub, x, y)) }
            --
            x:(@) _ ".*" __ y:@ { Rc::new(Expr::Broadcast(BinOp::Mul, x, y)) }
            x:(@) _ "./" __ y:@ { Rc::new(Expr::Broadcast(BinOp::Div, x, y)) }
            x:(@) _ "*" __ y:@ { Rc::new(Expr::Binary(BinOp::Mul, x, y)) }
            x:(@) _ "/" __ y:@ { Rc::new(Expr::Binary(BinOp::Div, x, y)) }
            x:(@) _ "%" __ y:@ { Rc::new(Expr::Binary(BinOp::Mod, x, y)) }
            --
            "-" _ x:@ { Rc::new(Expr::Unary(UnOp::Neg, x)) }
            "!" !"=" _ x:@ { Rc::new(Expr::Unary(UnOp::Not, x)) }
            "not" !ident_char() _ x:@ { Rc::new(Expr::Unary(UnOp::Not, x)) }
            --
            x:(@) "." name:identifier() { Rc::new(Expr::Dot(x, name)) }
            x:(@) _ "(" __ args:call_args() __ ")" { Rc::new(Expr::Call(x, args)) }
            x:(@) _ "[" __ idx:expression() __ "]" { Rc::new(Expr::Index(x, idx)) }
            --
            a:atom() { a }
        }

        rule call_args() -> Vec<Arg>
            = args:(call_arg() ** (__ "," __)) (__ ",")? { args }

        rule call_arg() -> Arg
            = name:identifier() _ (":" / "=" !"=") __ v:expression() {
                Arg { name: Some(name), value: v }
            }
            / v:expression() { Arg { name: None, value: v } }

        rule atom() -> Rc<Expr>
            = float_lit()
            / int_lit()
            / string_atom()
            / "true" !ident_char() { Rc::new(Expr::Bool(true)) }
            / "false" !ident_char() { Rc::new(Expr::Bool(false)) }
            / "null" !ident_char() { Rc::new(Expr::Null) }
            / "NA" !ident_char() { Rc::new(Expr::Na) }
            / if_expr()
            / lambda()
            / pipeline_block()
            / intent_block()
            / column_ref()
            / name:identifier() { Rc::new(Expr::Ident(name)) }
            / collection()
            / dict_lit()
            / block()
            / "(" __ e:expression() __ ")" { e }

        rule column_ref() -> Rc<Expr>
            = "$" name:identifier() { Rc::new(Expr::ColumnRef(name)) }

        rule if_expr() -> Rc<Expr>
            = "if" !ident_char() _ "(" __ cond:expression() __ ")" __ then:expression() __ "else" !ident_char() __ alt:expression() {
                Rc::new(Expr::If(cond, then, alt))
            }

        rule lambda() -> Rc<Expr>
            = "\\" _ "(" __ params:(identifier() ** (__ "," __)) __ ")" __ body:expression() {
                Rc::new(Expr::Lambda(params, body))
            }

        rule pipeline_block() -> Rc<Expr>
            = "pipeline" !ident_char() __ "{" __() items:(pipeline_item() ** sep()) sep()? __() "}" {
                Rc::new(Expr::PipelineBlock(items))
            }

        rule pipeline_item() -> PipelineItem
            = "import" !ident_char() _ s:string_lit() { PipelineItem::Import(s) }
            / name:identifier() _ "=" !"=" __ e:expression() { PipelineItem::Node(name, e) }

        rule intent_block() -> Rc<Expr>
            = "intent" !ident_char() __ "{" __ pairs:(dict_pair() ** (__ "," __)) (__ ",")? __ "}" {
                Rc::new(Expr::IntentBlock(pairs))
            }

        rule dict_lit() -> Rc<Expr>
            = "{" __ pairs:(dict_pair() ++ (__ "," __)) (__ ",")? __ "}" {
                Rc::new(Expr::DictLit(pairs))
            }
            / "{" __ "}" { Rc::new(Expr::DictLit(Vec::new())) }

        rule dict_pair() -> (String, Rc<Expr>)
            = k:dict_key() _ ":" __ v:expression() { (k, v) }

        rule dict_key() -> String
            = identifier()
            / string_lit()

        rule block() -> Rc<Expr>
            = "{" __() stmts:(statement() ** sep()) sep()? __() "}" {
                Rc::new(Expr::Block(stmts))
            }

        rule collection() -> Rc<Expr>
            = "[" __ items:(call_arg() ** (__ "," __)) (__ ",")? __ "]" {
                Rc::new(Expr::Collection(items))
            }

        rule float_lit() -> Rc<Expr>
            = n:$(['0'..='9']+ "." ['0'..='9']* (['e' | 'E'] ['+' | '-']? ['0'..='9']+)?) {?
                n.parse().map(|v: f64| Rc::new(Expr::Float(v))).or(Err("float"))
            }
            / n:$(['0'..='9']+ ['e' | 'E'] ['+' | '-']? ['0'..='9']+) {?
                n.parse().map(|v: f64| Rc::new(Expr::Float(v))).or(Err("float"))
            }

        rule int_lit() -> Rc<Expr>
            = n:$(['0'..='9']+) {?
                n.parse().map(|v: i64| Rc::new(Expr::Int(v))).or(Err("int"))
            }

        rule string_atom() -> Rc<Expr>
            = s:string_lit() { Rc::new(Expr::Str(s)) }

        rule string_lit() -> String
            = "\"" chars:string_char()* "\"" { chars.into_iter().collect() }

        rule string_char() -> char
            = "\\n" { '\n' }
            / "\\r" { '\r' }
            / "\\t" { '\t' }
            / "\\\\" { '\\' }
            / "\\\"" { '"' }
            / "\\u" d:$(['0'..='9' | 'a'..='f' | 'A'..='F']*<4>) {?
                u32::from_str_radix(d, 16)
                    .ok()
                    .and_then(char::from_u32)
                    .ok_or("unicode escape")
            }
            / c:[^ '\0'..='\x1f' | '"' | '\\'] { c }
    }
}

fn syntax_error(e: peg::error::ParseError<peg::str::LineCol>) -> TError {
    TError::syntax_error(format!(
        "parse error at line {}, column {}: expected {}",
        e.location.line, e.location.column, e.expected
    ))
    .with_context("line", e.location.line as i64)
    .with_context("column", e.location.column as i64)
}

pub fn parse_program(input: &str) -> Result<Vec<Stmt>, TError> {
    t_parser::program(input).map_err(syntax_error)
}

pub fn parse_expression(input: &str) -> Result<Rc<Expr>, TError> {
    t_parser::expression_only(input).map_err(syntax_error)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::interp::ast::{Expr, StmtKind};

    fn parse_one(src: &str) -> Rc<Expr> {
        parse_expression(src).unwrap()
    }

    #[test]
    fn parses_statement_per_line() {
        let stmts = parse_program("x = 1\ny = 2\nx + y\n").unwrap();
        assert_eq!(stmts.len(), 3);
        assert!(matches!(stmts[0].kind, StmtKind::Define(..)));
        assert!(matches!(stmts[2].kind, StmtKind::Expr(..)));
    }

    #[test]
    fn semicolons_and_comments_separate() {
        let stmts = parse_program("a = 1; b = 2 -- trailing note\nb").unwrap();
        assert_eq!(stmts.len(), 3);
    }

    #[test]
    fn rebind_operator() {
        let stmts = parse_program("x := 2").unwrap();
        assert!(matches!(stmts[0].kind, StmtKind::Override(..)));
    }

    #[test]
    fn doc_comments_attach_to_statement() {
        let stmts = parse_program("--# The answer.\n--# @return int\nx = 42\n").unwrap();
        assert_eq!(stmts.len(), 1);
        assert_eq!(stmts[0].doc.as_deref(), Some("The answer.\n@return int"));
    }

    #[test]
    fn precedence_of_arithmetic() {
        assert_eq!(parse_one("1 + 2 * 3").deparse(), "(1 + (2 * 3))");
        assert_eq!(parse_one("-2 + 3").deparse(), "(-2 + 3)");
    }

    #[test]
    fn formula_captures_full_sum() {
        let e = parse_one("y ~ x + z");
        match &*e {
            Expr::Formula(lhs, rhs) => {
                assert_eq!(lhs.deparse(), "y");
                assert_eq!(rhs.deparse(), "(x + z)");
            }
            other => panic!("expected formula, got {other:?}"),
        }
    }

    #[test]
    fn pipes_lower_than_everything() {
        let e = parse_one("data |> f(1) |> g");
        assert_eq!(e.deparse(), "data |> f(1) |> g");
        assert!(matches!(&*e, Expr::Pipe(..)));
        let e = parse_one("x ?|> handler");
        assert!(matches!(&*e, Expr::TryPipe(..)));
    }

    #[test]
    fn column_refs_and_broadcast() {
        let e = parse_one("$age .>= 30");
        assert!(matches!(&*e, Expr::Broadcast(BinOp::Ge, ..)));
        let e = parse_one("xs .+ ys");
        assert!(matches!(&*e, Expr::Broadcast(BinOp::Add, ..)));
    }

    #[test]
    fn keyword_logic_aliases() {
        assert!(matches!(
            &*parse_one("a and b"),
            Expr::Binary(BinOp::And, ..)
        ));
        assert!(matches!(&*parse_one("not a"), Expr::Unary(UnOp::Not, _)));
        assert!(matches!(&*parse_one("a or b"), Expr::Binary(BinOp::Or, ..)));
    }

    #[test]
    fn lambdas_and_calls() {
        let e = parse_one("\\(x, y) x + y");
        match &*e {
            Expr::Lambda(params, _) => assert_eq!(params, &["x", "y"]),
            other => panic!("expected lambda, got {other:?}"),
        }
        let e = parse_one("f(1, n = 2, na_rm = true)");
        match &*e {
            Expr::Call(_, args) => {
                assert_eq!(args.len(), 3);
                assert_eq!(args[1].name.as_deref(), Some("n"));
            }
            other => panic!("expected call, got {other:?}"),
        }
    }

    #[test]
    fn string_escapes() {
        let e = parse_one("\"a\\tb\\u0041\\n\"");
        match &*e {
            Expr::Str(s) => assert_eq!(s, "a\tbA\n"),
            other => panic!("expected string, got {other:?}"),
        }
    }

    #[test]
    fn collections_and_dicts() {
        assert!(matches!(&*parse_one("[1, 2, 3,]"), Expr::Collection(_)));
        assert!(matches!(&*parse_one("{a: 1, b: 2}"), Expr::DictLit(_)));
        assert!(matches!(&*parse_one("{}"), Expr::DictLit(_)));
        let e = parse_one("{ x = 1\n x + 1 }");
        assert!(matches!(&*e, Expr::Block(_)));
    }

    #[test]
    fn newlines_inside_brackets_are_whitespace() {
        let e = parse_one("f(\n  1,\n  2\n)");
        assert!(matches!(&*e, Expr::Call(..)));
        let e = parse_one("[\n 1,\n 2\n]");
        assert!(matches!(&*e, Expr::Collection(_)));
    }

    #[test]
    fn pipeline_block_items() {
        let stmts = parse_program("p = pipeline {\n  x = 1\n  y = x + 1\n}\n").unwrap();
        match &stmts[0].kind {
            StmtKind::Define(name, e) => {
                assert_eq!(name, "p");
                match &**e {
                    Expr::PipelineBlock(items) => assert_eq!(items.len(), 2),
                    other => panic!("expected pipeline block, got {other:?}"),
                }
            }
            other => panic!("expected define, got {other:?}"),
        }
    }

    #[test]
    fn pipeline_rejects_bare_expressions() {
        assert!(parse_program("p = pipeline { x = 1\n x + 1 }").is_err());
    }

    #[test]
    fn intent_block() {
        let e = parse_one("intent { goal: \"report\", rows: 10 }");
        match &*e {
            Expr::IntentBlock(pairs) => {
                assert_eq!(pairs[0].0, "goal");
                assert_eq!(pairs[1].0, "rows");
            }
            other => panic!("expected intent, got {other:?}"),
        }
    }

    #[test]
    fn dollar_access_chain() {
        let e = parse_one("p.z");
        assert!(matches!(&*e, Expr::Dot(..)));
        let e = parse_one("xs[2]");
        assert!(matches!(&*e, Expr::Index(..)));
    }

    #[test]
    fn parse_failure_reports_location() {
        let err = parse_program("x = (1 +").unwrap_err();
        assert_eq!(err.code, crate::interp::ErrorCode::SyntaxError);
        assert!(err.message.contains("line 1"));
    }
}
