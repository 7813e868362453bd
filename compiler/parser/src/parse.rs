use crate::lex::{Span, Token};
use ariadne::{Color, Fmt, Label, Report, ReportKind, Source};
use chumsky::prelude::*;
use chumsky::{Error, Stream};
use num_bigint::BigInt;
use std::io::Write;

#[derive(Debug, PartialEq, Clone)]
pub struct SourceFileAst {
    pub items: Vec<Item>,
}

#[derive(Debug, PartialEq, Clone)]
pub enum Item {
    Def(Def),
    Publish {
        name: String,
        name_span: Span,
        body: Expr,
    },
    // placeholder left behind by error recovery; later passes skip it
    Error,
}

// `name` is the canonical definition key: a plain identifier, or the
// operator spellings "binary <op>" / "unary <op>".
#[derive(Debug, PartialEq, Clone)]
pub struct Def {
    pub global: bool,
    pub name: String,
    pub name_span: Span,
    pub params: Vec<(String, Span)>,
    pub body: Expr,
}

#[derive(Debug, PartialEq, Clone)]
pub struct Expr {
    pub kind: ExprKind,
    pub span: Span,
}

#[derive(Debug, PartialEq, Clone)]
pub enum ExprKind {
    Seq(Vec<OpSequenceUnit>),
    Lambda {
        param: String,
        param_span: Span,
        body: Box<Expr>,
    },
    If {
        cond: Box<Expr>,
        then: Box<Expr>,
        otherwise: Box<Expr>,
    },
    Match {
        args: Vec<(ExprUnit, Span)>,
        arms: Vec<Arm>,
    },
    Memoize(Box<Expr>),
    Block(Box<Block>),
}

#[derive(Debug, PartialEq, Clone)]
pub enum OpSequenceUnit {
    Operand(ExprUnit, Span),
    Op(String, Span),
}

#[derive(Debug, PartialEq, Clone)]
pub enum ExprUnit {
    Int(BigInt),
    Str(String),
    Ident(String),
    Subscribe(String),
    PrimRef(String),
    Here,
    Paren(Box<Expr>),
}

#[derive(Debug, PartialEq, Clone)]
pub struct Arm {
    pub patterns: Vec<Pattern>,
    pub guard: Option<Expr>,
    pub body: Expr,
    pub span: Span,
}

// A pattern atom: "_" is a wildcard, a lowercase name binds, a capitalized
// name is a constructor; arms reconcile juxtaposed atoms against the number
// of scrutinees later.
#[derive(Debug, PartialEq, Clone)]
pub struct Pattern {
    pub name: String,
    pub args: Vec<Pattern>,
    pub span: Span,
}

#[derive(Debug, PartialEq, Clone)]
pub struct Block {
    pub items: Vec<Item>,
    pub body: Expr,
}

enum Entry {
    It(Item),
    Ex(Expr),
}

fn parser() -> impl Parser<Token, Vec<Item>, Error = Simple<Token>> {
    let ident = (select! { Token::Ident(i) => i }).map_with_span(|i, s: Span| (i, s));
    let op = (select! { Token::Op(o) => o }).map_with_span(|o, s: Span| (o, s));
    let str_lit = select! { Token::Str(s) => s };

    let pattern = recursive(|pattern| {
        let atom = ident
            .clone()
            .map(|(name, span)| Pattern {
                name,
                args: Vec::new(),
                span,
            })
            .or(pattern
                .delimited_by(just(Token::OpenParen), just(Token::CloseParen)));
        ident
            .clone()
            .then(atom.clone().repeated().at_least(1))
            .map_with_span(|((name, _), args), span| Pattern { name, args, span })
            .or(atom)
    });
    let atom_pattern = ident
        .clone()
        .map(|(name, span)| Pattern {
            name,
            args: Vec::new(),
            span,
        })
        .or(pattern
            .delimited_by(just(Token::OpenParen), just(Token::CloseParen)));

    let ident_in_expr = ident.clone();
    let op_in_expr = op.clone();
    let expr = recursive(|expr| {
        let operand = select! {
            Token::Int(i) => ExprUnit::Int(i),
            Token::Str(s) => ExprUnit::Str(s),
            Token::Ident(i) => ExprUnit::Ident(i),
            Token::Here => ExprUnit::Here,
        }
        .or(just(Token::Subscribe)
            .ignore_then(ident_in_expr.clone())
            .map(|(name, _)| ExprUnit::Subscribe(name)))
        .or(just(Token::Prim)
            .ignore_then(str_lit)
            .map(ExprUnit::PrimRef))
        .or(expr
            .clone()
            .delimited_by(just(Token::OpenParen), just(Token::CloseParen))
            .map(|e| ExprUnit::Paren(Box::new(e))))
        .map_with_span(|e, s: Span| (e, s));

        let seq = operand
            .clone()
            .map(|(e, s)| OpSequenceUnit::Operand(e, s))
            .or(op_in_expr.map(|(o, s)| OpSequenceUnit::Op(o, s)))
            .repeated()
            .at_least(1)
            .map_with_span(|units, span| Expr {
                kind: ExprKind::Seq(units),
                span,
            });

        let lambda = just(Token::Lambda)
            .ignore_then(ident_in_expr)
            .then_ignore(just(Token::Op(".".to_string())))
            .then(expr.clone())
            .map_with_span(|((param, param_span), body), span| Expr {
                kind: ExprKind::Lambda {
                    param,
                    param_span,
                    body: Box::new(body),
                },
                span,
            });

        let if_ = just(Token::If)
            .ignore_then(expr.clone())
            .then_ignore(just(Token::Then))
            .then(expr.clone())
            .then_ignore(just(Token::Else))
            .then(expr.clone())
            .map_with_span(|((cond, then), otherwise), span| Expr {
                kind: ExprKind::If {
                    cond: Box::new(cond),
                    then: Box::new(then),
                    otherwise: Box::new(otherwise),
                },
                span,
            });

        let arm = atom_pattern
            .clone()
            .repeated()
            .at_least(1)
            .then(just(Token::If).ignore_then(expr.clone()).or_not())
            .then_ignore(just(Token::Assign))
            .then(expr.clone())
            .map_with_span(|((patterns, guard), body), span| Arm {
                patterns,
                guard,
                body,
                span,
            });

        let match_ = just(Token::Match)
            .ignore_then(operand.repeated().at_least(1))
            .then(
                arm.then_ignore(just(Token::Eol).or_not())
                    .repeated()
                    .at_least(1)
                    .delimited_by(just(Token::Indent), just(Token::Dedent)),
            )
            .map_with_span(|(args, arms), span| Expr {
                kind: ExprKind::Match { args, arms },
                span,
            });

        let memoize = just(Token::Memoize)
            .ignore_then(expr)
            .map_with_span(|e, span| Expr {
                kind: ExprKind::Memoize(Box::new(e)),
                span,
            });

        choice((memoize, lambda, if_, match_, seq))
    });

    recursive(|item| {
        let entry = item
            .map(Entry::It)
            .or(expr.clone().map(Entry::Ex));
        let block = entry
            .then_ignore(just(Token::Eol).or_not())
            .repeated()
            .at_least(1)
            .delimited_by(just(Token::Indent), just(Token::Dedent))
            .try_map(|mut entries: Vec<Entry>, span: Span| {
                let body = match entries.pop() {
                    Some(Entry::Ex(e)) => e,
                    _ => {
                        return Err(Simple::custom(
                            span,
                            "a definition block must end with a result expression",
                        ))
                    }
                };
                let mut items = Vec::with_capacity(entries.len());
                for e in entries {
                    match e {
                        Entry::It(i) => items.push(i),
                        Entry::Ex(_) => {
                            return Err(Simple::custom(
                                span,
                                "only the last entry of a block may be an expression",
                            ))
                        }
                    }
                }
                Ok(Expr {
                    span: span.clone(),
                    kind: ExprKind::Block(Box::new(Block { items, body })),
                })
            });
        let def_body = block.or(expr);

        let param = ident.clone();
        let binary_lhs = param
            .clone()
            .then(op.clone())
            .then(param.clone())
            .map(|(((l, lspan), (o, ospan)), (r, rspan))| {
                (format!("binary {o}"), ospan, vec![(l, lspan), (r, rspan)])
            });
        let unary_lhs = op
            .then(param.clone())
            .map(|((o, ospan), (x, xspan))| (format!("unary {o}"), ospan, vec![(x, xspan)]));
        let plain_lhs = ident
            .clone()
            .then(param.repeated())
            .map(|((name, name_span), params)| (name, name_span, params));
        let def = just(Token::Global)
            .or_not()
            .then_ignore(just(Token::Def))
            .then(binary_lhs.or(unary_lhs).or(plain_lhs))
            .then_ignore(just(Token::Assign))
            .then(def_body.clone())
            .map(|((global, (name, name_span, params)), body)| {
                Item::Def(Def {
                    global: global.is_some(),
                    name,
                    name_span,
                    params,
                    body,
                })
            });

        let publish = just(Token::Publish)
            .ignore_then(ident)
            .then_ignore(just(Token::Assign))
            .then(def_body)
            .map(|((name, name_span), body)| Item::Publish {
                name,
                name_span,
                body,
            });

        def.or(publish)
            .recover_with(skip_until([Token::Eol], |_| Item::Error))
    })
    .then_ignore(just(Token::Eol).or_not())
    .repeated()
    .then_ignore(just(Token::End))
}

pub fn parse(
    tokens: Vec<(Token, Span)>,
    src_len: usize,
) -> (Option<SourceFileAst>, Vec<Simple<Token>>) {
    let (items, errors) =
        parser().parse_recovery(Stream::from_iter(src_len..src_len + 1, tokens.into_iter()));
    (items.map(|items| SourceFileAst { items }), errors)
}

pub fn render_errors<W: Write>(
    errors: Vec<Simple<Token>>,
    filename: &str,
    src: &str,
    w: &mut W,
) -> std::io::Result<()> {
    for e in errors {
        let e = e.map(|t| t.to_string());
        let report = Report::build(ReportKind::Error, filename, e.span().start);
        let report = match e.reason() {
            chumsky::error::SimpleReason::Unclosed { span, delimiter } => report
                .with_message(format!(
                    "Unclosed delimiter {}",
                    delimiter.fg(Color::Yellow)
                ))
                .with_label(
                    Label::new((filename, span.clone()))
                        .with_message(format!(
                            "Unclosed delimiter {}",
                            delimiter.fg(Color::Yellow)
                        ))
                        .with_color(Color::Yellow),
                )
                .with_label(
                    Label::new((filename, e.span()))
                        .with_message(format!(
                            "Must be closed before this {}",
                            e.found()
                                .unwrap_or(&"end of file".to_string())
                                .fg(Color::Red)
                        ))
                        .with_color(Color::Red),
                ),
            chumsky::error::SimpleReason::Unexpected => report
                .with_message(format!(
                    "{}, expected {}",
                    if e.found().is_some() {
                        "Unexpected token in input"
                    } else {
                        "Unexpected end of input"
                    },
                    if e.expected().len() == 0 {
                        "something else".to_string()
                    } else {
                        e.expected()
                            .map(|expected| match expected {
                                Some(expected) => expected.to_string(),
                                None => "end of input".to_string(),
                            })
                            .collect::<Vec<_>>()
                            .join(", ")
                    }
                ))
                .with_label(
                    Label::new((filename, e.span()))
                        .with_message(format!(
                            "Unexpected token {}",
                            e.found()
                                .unwrap_or(&"end of file".to_string())
                                .fg(Color::Red)
                        ))
                        .with_color(Color::Red),
                ),
            chumsky::error::SimpleReason::Custom(msg) => report.with_message(msg).with_label(
                Label::new((filename, e.span()))
                    .with_message(format!("{}", msg.fg(Color::Red)))
                    .with_color(Color::Red),
            ),
        };
        report
            .finish()
            .write((filename, Source::from(&src)), &mut *w)?;
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::lex::lex;

    fn parse_str(src: &str) -> SourceFileAst {
        let (tokens, len) = lex(src);
        let (ast, errors) = parse(tokens, len);
        assert!(errors.is_empty(), "parse errors: {errors:?}");
        ast.expect("no ast")
    }

    #[test]
    fn plain_def_with_params() {
        let ast = parse_str("def f x y = x\n");
        match &ast.items[0] {
            Item::Def(d) => {
                assert_eq!(d.name, "f");
                assert_eq!(
                    d.params.iter().map(|(p, _)| p.as_str()).collect::<Vec<_>>(),
                    vec!["x", "y"]
                );
            }
            other => panic!("unexpected item {other:?}"),
        }
    }

    #[test]
    fn operator_defs_get_spelled_names() {
        let ast = parse_str("def l ++ r = l\ndef - x = x\n");
        match (&ast.items[0], &ast.items[1]) {
            (Item::Def(b), Item::Def(u)) => {
                assert_eq!(b.name, "binary ++");
                assert_eq!(u.name, "unary -");
            }
            other => panic!("unexpected items {other:?}"),
        }
    }

    #[test]
    fn nested_block_body() {
        let ast = parse_str("def a =\n    def b = 1\n    b\n");
        match &ast.items[0] {
            Item::Def(d) => match &d.body.kind {
                ExprKind::Block(b) => {
                    assert_eq!(b.items.len(), 1);
                }
                other => panic!("expected block, got {other:?}"),
            },
            other => panic!("unexpected item {other:?}"),
        }
    }

    #[test]
    fn match_with_arms_and_guard() {
        let ast = parse_str("def f x = match x\n    (Cons h t) if h = h\n    Nil = 0\n");
        match &ast.items[0] {
            Item::Def(d) => match &d.body.kind {
                ExprKind::Match { args, arms } => {
                    assert_eq!(args.len(), 1);
                    assert_eq!(arms.len(), 2);
                    assert!(arms[0].guard.is_some());
                    assert_eq!(arms[0].patterns[0].name, "Cons");
                    assert_eq!(arms[0].patterns[0].args.len(), 2);
                }
                other => panic!("expected match, got {other:?}"),
            },
            other => panic!("unexpected item {other:?}"),
        }
    }

    #[test]
    fn unparenthesized_constructor_arm_spreads_into_atoms() {
        let ast = parse_str("def f x = match x\n    Cons h t = h\n    Nil = 0\n");
        match &ast.items[0] {
            Item::Def(d) => match &d.body.kind {
                ExprKind::Match { arms, .. } => {
                    assert_eq!(arms[0].patterns.len(), 3);
                    assert_eq!(arms[0].patterns[0].name, "Cons");
                }
                other => panic!("expected match, got {other:?}"),
            },
            other => panic!("unexpected item {other:?}"),
        }
    }

    #[test]
    fn lambda_and_publish_and_subscribe() {
        let ast = parse_str("publish ps = 1, Nil\ndef use = subscribe ps\ndef id = \\x.x\n");
        assert!(matches!(&ast.items[0], Item::Publish { name, .. } if name == "ps"));
        match &ast.items[2] {
            Item::Def(d) => {
                assert!(matches!(&d.body.kind, ExprKind::Lambda { param, .. } if param == "x"));
            }
            other => panic!("unexpected item {other:?}"),
        }
    }

    #[test]
    fn bad_item_recovers_at_eol() {
        let (tokens, len) = lex("def = nope\ndef ok = 1\n");
        let (ast, errors) = parse(tokens, len);
        assert!(!errors.is_empty());
        let ast = ast.expect("recovered ast");
        assert!(ast
            .items
            .iter()
            .any(|i| matches!(i, Item::Def(d) if d.name == "ok")));
    }
}
