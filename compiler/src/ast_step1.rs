//! Builds the core expression tree from the surface AST: operator sequences
//! become application chains under the first-character precedence table,
//! definition parameters become lambdas, `if` lowers onto `destruct
//! Boolean`, and each file becomes one `DefMap` of a `Top`.

use crate::errors::Diagnostics;
use crate::expr::{
    DefMap, Expr, ExprKind, LitValue, MatchArm, MatchExpr, NamedDef, PatAst, Prim, PubDef, Top,
    FLAG_MEMOIZE,
};
use crate::intrinsics::{op_precedence, APP_PRECEDENCE};
use crate::location::{FileId, Location};
use fxhash::{FxHashMap, FxHashSet};
use parser::{Span, SourceFileAst};

pub fn new_top(body: Expr) -> Top {
    Top {
        files: Vec::new(),
        globals: FxHashMap::default(),
        body: Box::new(body),
    }
}

pub fn add_file(top: &mut Top, file: FileId, ast: SourceFileAst, diag: &mut Diagnostics) {
    let index = top.files.len();
    let map = convert_items(
        ast.items,
        file,
        diag,
        Some((&mut top.globals, index)),
    );
    top.files.push(map);
}

fn convert_items(
    items: Vec<parser::Item>,
    file: FileId,
    diag: &mut Diagnostics,
    mut globals: Option<(&mut FxHashMap<String, usize>, usize)>,
) -> DefMap {
    let mut map = DefMap::default();
    let mut seen: FxHashSet<String> = FxHashSet::default();
    for item in items {
        match item {
            parser::Item::Def(d) => {
                let loc = Location::new(file, d.name_span.clone());
                if !seen.insert(d.name.clone()) {
                    diag.error(&loc, &format!("duplicate definition of '{}'", d.name));
                    continue;
                }
                if d.global {
                    match &mut globals {
                        Some((globals, index)) => {
                            if let Some(owner) = globals.get(&d.name) {
                                let msg = format!(
                                    "global '{}' is already owned by another file (file #{owner})",
                                    d.name
                                );
                                diag.error(&loc, &msg);
                            } else {
                                globals.insert(d.name.clone(), *index);
                            }
                        }
                        None => {
                            diag.error(
                                &loc,
                                "global definitions are only allowed at the top level of a file",
                            );
                        }
                    }
                }
                let mut body = convert_expr(d.body, file, diag);
                for (param, pspan) in d.params.into_iter().rev() {
                    let ploc = Location::new(file, pspan);
                    let mut lam = Expr::lambda(ploc.clone(), param, body);
                    if let ExprKind::Lambda(l) = &mut lam.kind {
                        l.token = Some(ploc);
                    }
                    body = lam;
                }
                map.defs.push(NamedDef {
                    name: d.name,
                    location: loc,
                    body,
                });
            }
            parser::Item::Publish {
                name,
                name_span,
                body,
            } => {
                let location = Location::new(file, name_span);
                let body = convert_expr(body, file, diag);
                let entry = PubDef { location, body };
                match map.pubs.iter_mut().find(|(n, _)| *n == name) {
                    Some((_, list)) => list.push(entry),
                    None => map.pubs.push((name, vec![entry])),
                }
            }
            parser::Item::Error => {
                // the parser already reported and resynchronized
                diag.set_fail();
            }
        }
    }
    map
}

fn convert_expr(e: parser::Expr, file: FileId, diag: &mut Diagnostics) -> Expr {
    let loc = Location::new(file, e.span.clone());
    match e.kind {
        parser::ExprKind::Seq(units) => resolve_ops(units, loc, file, diag),
        parser::ExprKind::Lambda {
            param,
            param_span,
            body,
        } => {
            let body = convert_expr(*body, file, diag);
            let mut lam = Expr::lambda(loc, param, body);
            if let ExprKind::Lambda(l) = &mut lam.kind {
                l.token = Some(Location::new(file, param_span));
            }
            lam
        }
        parser::ExprKind::If {
            cond,
            then,
            otherwise,
        } => {
            let cond = convert_expr(*cond, file, diag);
            let then = convert_expr(*then, file, diag);
            let otherwise = convert_expr(*otherwise, file, diag);
            let dest = Expr::var(loc.clone(), "destruct Boolean");
            let on_true = Expr::lambda(then.location.clone(), "_", then);
            let on_false = Expr::lambda(otherwise.location.clone(), "_", otherwise);
            let e = Expr::app(loc.clone(), dest, on_true);
            let e = Expr::app(loc.clone(), e, on_false);
            Expr::app(loc, e, cond)
        }
        parser::ExprKind::Match { args, arms } => {
            let nargs = args.len();
            let args: Vec<Expr> = args
                .into_iter()
                .map(|(u, span)| convert_operand(u, span, file, diag))
                .collect();
            let arms = arms
                .into_iter()
                .map(|arm| {
                    let pattern = reconcile_patterns(arm.patterns, nargs, file, diag);
                    MatchArm {
                        pattern,
                        guard: arm.guard.map(|g| convert_expr(g, file, diag)),
                        body: convert_expr(arm.body, file, diag),
                    }
                })
                .collect();
            Expr::new(loc, ExprKind::Match(MatchExpr { args, arms }))
        }
        parser::ExprKind::Memoize(inner) => {
            let mut e = convert_expr(*inner, file, diag);
            e.flags |= FLAG_MEMOIZE;
            e
        }
        parser::ExprKind::Block(b) => {
            let mut map = convert_items(b.items, file, diag, None);
            map.body = Some(Box::new(convert_expr(b.body, file, diag)));
            Expr::new(loc, ExprKind::DefMap(map))
        }
    }
}

fn convert_operand(
    u: parser::ExprUnit,
    span: Span,
    file: FileId,
    diag: &mut Diagnostics,
) -> Expr {
    let loc = Location::new(file, span);
    match u {
        parser::ExprUnit::Int(i) => Expr::new(loc, ExprKind::Literal(LitValue::Integer(i))),
        parser::ExprUnit::Str(s) => Expr::new(loc, ExprKind::Literal(LitValue::Str(s))),
        parser::ExprUnit::Ident(n) => Expr::var(loc, n),
        parser::ExprUnit::Subscribe(n) => Expr::new(loc, ExprKind::Subscribe(n)),
        parser::ExprUnit::PrimRef(n) => Expr::new(
            loc,
            ExprKind::Prim(Prim {
                name: n,
                args: 0,
                pflags: 0,
            }),
        ),
        parser::ExprUnit::Here => {
            let (row, _) = diag.row_col(file, loc.span.start);
            let here = format!("{}:{row}", diag.file_name(file));
            Expr::new(loc, ExprKind::Literal(LitValue::Str(here)))
        }
        parser::ExprUnit::Paren(inner) => convert_expr(*inner, file, diag),
    }
}

fn is_constructor_name(name: &str) -> bool {
    name.chars().next().is_some_and(|c| c.is_ascii_uppercase())
}

fn convert_pattern(p: parser::Pattern, file: FileId, diag: &mut Diagnostics) -> PatAst {
    let location = Location::new(file, p.span.clone());
    if !p.args.is_empty() && !is_constructor_name(&p.name) {
        diag.error(
            &location,
            &format!("pattern constructor '{}' must be capitalized", p.name),
        );
        return PatAst {
            name: "_".to_string(),
            args: Vec::new(),
            location,
        };
    }
    PatAst {
        name: p.name,
        args: p
            .args
            .into_iter()
            .map(|a| convert_pattern(a, file, diag))
            .collect(),
        location,
    }
}

// An arm parses as juxtaposed pattern atoms; the number of scrutinees decides
// whether they are one constructor application or one pattern per scrutinee.
fn reconcile_patterns(
    mut atoms: Vec<parser::Pattern>,
    nargs: usize,
    file: FileId,
    diag: &mut Diagnostics,
) -> PatAst {
    if nargs == 1 {
        if atoms.len() == 1 {
            let p = atoms.pop().expect("one pattern");
            return convert_pattern(p, file, diag);
        }
        let head = atoms.remove(0);
        let span = head.span.start..atoms.last().map(|a| a.span.end).unwrap_or(head.span.end);
        let location = Location::new(file, span);
        if !head.args.is_empty() {
            diag.error(&location, "malformed pattern");
            return PatAst {
                name: "_".to_string(),
                args: Vec::new(),
                location,
            };
        }
        let merged = parser::Pattern {
            name: head.name,
            args: atoms,
            span: location.span.clone(),
        };
        convert_pattern(merged, file, diag)
    } else {
        let span = atoms
            .first()
            .map(|a| a.span.start)
            .unwrap_or_default()
            ..atoms.last().map(|a| a.span.end).unwrap_or_default();
        PatAst {
            name: String::new(),
            args: atoms
                .into_iter()
                .map(|a| convert_pattern(a, file, diag))
                .collect(),
            location: Location::new(file, span),
        }
    }
}

enum El {
    Operand(Expr),
    Op(String, Span),
}

struct PendingOp {
    prec: i32,
    left: bool,
    // None is implicit application
    name: Option<(String, Span)>,
}

fn resolve_ops(
    units: Vec<parser::OpSequenceUnit>,
    loc: Location,
    file: FileId,
    diag: &mut Diagnostics,
) -> Expr {
    // fold prefix operators into their operand first
    let mut elems: Vec<El> = Vec::new();
    let mut pending: Vec<(String, Span)> = Vec::new();
    for unit in units {
        match unit {
            parser::OpSequenceUnit::Operand(u, span) => {
                let mut e = convert_operand(u, span, file, diag);
                for (op, ospan) in pending.drain(..).rev() {
                    let oloc = Location::new(file, ospan);
                    let span = oloc.span.start..e.location.span.end;
                    let f = Expr::var(oloc, format!("unary {op}"));
                    e = Expr::app(Location::new(file, span), f, e);
                }
                elems.push(El::Operand(e));
            }
            parser::OpSequenceUnit::Op(op, span) => {
                let binary = pending.is_empty()
                    && matches!(elems.last(), Some(El::Operand(_)));
                if binary {
                    elems.push(El::Op(op, span));
                } else {
                    pending.push((op, span));
                }
            }
        }
    }
    if let Some((op, span)) = pending.pop() {
        diag.error(
            &Location::new(file, span),
            &format!("operator '{op}' is missing an operand"),
        );
    }
    if matches!(elems.last(), Some(El::Op(..))) {
        if let Some(El::Op(op, span)) = elems.pop() {
            diag.error(
                &Location::new(file, span),
                &format!("operator '{op}' is missing an operand"),
            );
        }
    }

    // shunting-yard with juxtaposition as an implicit operator
    let mut output: Vec<Expr> = Vec::new();
    let mut ops: Vec<PendingOp> = Vec::new();
    let reduce = |output: &mut Vec<Expr>, op: PendingOp, file: FileId| {
        let r = output.pop();
        let l = output.pop();
        if let (Some(l), Some(r)) = (l, r) {
            let span = l.location.span.start..r.location.span.end;
            let e = match op.name {
                None => Expr::app(Location::new(file, span), l, r),
                Some((name, ospan)) => {
                    let f = Expr::var(Location::new(file, ospan), format!("binary {name}"));
                    let e = Expr::app(Location::new(file, span.clone()), f, l);
                    Expr::app(Location::new(file, span), e, r)
                }
            };
            output.push(e);
        }
    };
    let mut push_op = |output: &mut Vec<Expr>, ops: &mut Vec<PendingOp>, new: PendingOp| {
        while let Some(top) = ops.last() {
            if top.prec > new.prec || (top.prec == new.prec && new.left) {
                let op = ops.pop().expect("op stack non-empty");
                reduce(output, op, file);
            } else {
                break;
            }
        }
        ops.push(new);
    };
    let mut prev_operand = false;
    for el in elems {
        match el {
            El::Operand(e) => {
                if prev_operand {
                    push_op(
                        &mut output,
                        &mut ops,
                        PendingOp {
                            prec: APP_PRECEDENCE,
                            left: true,
                            name: None,
                        },
                    );
                }
                output.push(e);
                prev_operand = true;
            }
            El::Op(op, span) => {
                let (prec, left) = op_precedence(&op);
                push_op(
                    &mut output,
                    &mut ops,
                    PendingOp {
                        prec,
                        left,
                        name: Some((op, span)),
                    },
                );
                prev_operand = false;
            }
        }
    }
    while let Some(op) = ops.pop() {
        reduce(&mut output, op, file);
    }
    match output.pop() {
        Some(e) if output.is_empty() => e,
        _ => {
            diag.error(&loc, "malformed expression");
            Expr::new(loc, ExprKind::Literal(LitValue::Str("<error>".to_string())))
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::errors::Diagnostics;

    fn build(src: &str) -> (Top, Diagnostics) {
        let mut diag = Diagnostics::new();
        let file = diag.add_file("test.weft".to_string(), src.to_string());
        let (tokens, len) = parser::lex(src);
        let (ast, errors) = parser::parse(tokens, len);
        assert!(errors.is_empty(), "parse errors: {errors:?}");
        let body = Expr::new(
            Location::new(file, 0..0),
            ExprKind::Literal(LitValue::Str("top".to_string())),
        );
        let mut top = new_top(body);
        add_file(&mut top, file, ast.expect("ast"), &mut diag);
        (top, diag)
    }

    fn first_def_rendered(src: &str) -> String {
        let (top, diag) = build(src);
        assert!(diag.ok(), "unexpected diagnostics");
        format!("{}", top.files[0].defs[0].body)
    }

    #[test]
    fn precedence_follows_first_character() {
        assert_eq!(first_def_rendered("def x = 1 + 2 * 3\n"), "1 + 2 * 3");
        assert_eq!(first_def_rendered("def x = (1 + 2) * 3\n"), "(1 + 2) * 3");
        // application binds tighter than binary operators
        assert_eq!(first_def_rendered("def x = f 1 + g 2\n"), "f 1 + g 2");
    }

    #[test]
    fn comma_is_right_associative_and_lowest() {
        assert_eq!(
            first_def_rendered("def x = 1, 2, Nil\n"),
            "1, 2, Nil"
        );
        let (top, _) = build("def x = 1, 2, Nil\n");
        // shape: binary , 1 (binary , 2 Nil)
        let e = &top.files[0].defs[0].body;
        match &e.kind {
            ExprKind::App(f, r) => {
                assert!(matches!(&r.kind, ExprKind::App(..)));
                match &f.kind {
                    ExprKind::App(g, _) => match &g.kind {
                        ExprKind::VarRef(v) => assert_eq!(v.name, "binary ,"),
                        other => panic!("unexpected {other:?}"),
                    },
                    other => panic!("unexpected {other:?}"),
                }
            }
            other => panic!("unexpected {other:?}"),
        }
    }

    #[test]
    fn unary_prefix_becomes_unary_reference() {
        assert_eq!(first_def_rendered("def x = -y\n"), "-y");
        let (top, _) = build("def x = -y\n");
        match &top.files[0].defs[0].body.kind {
            ExprKind::App(f, _) => match &f.kind {
                ExprKind::VarRef(v) => assert_eq!(v.name, "unary -"),
                other => panic!("unexpected {other:?}"),
            },
            other => panic!("unexpected {other:?}"),
        }
    }

    #[test]
    fn if_lowers_to_boolean_destructor() {
        let rendered = first_def_rendered("def x = if c then 1 else 2\n");
        assert_eq!(rendered, "destruct Boolean (\\_.1) (\\_.2) c");
    }

    #[test]
    fn params_desugar_to_lambdas() {
        assert_eq!(first_def_rendered("def f x y = x\n"), "\\x.\\y.x");
    }

    #[test]
    fn duplicate_definitions_are_reported() {
        let (_, mut diag) = build("def x = 1\ndef x = 2\n");
        assert!(!diag.ok());
        assert!(diag.take_output().contains("duplicate definition"));
    }

    #[test]
    fn lowercase_constructor_pattern_is_rejected() {
        let (_, mut diag) = build("def f x = match x\n    cons h t = h\n");
        assert!(!diag.ok());
        assert!(diag.take_output().contains("capitalized"));
    }

    #[test]
    fn here_renders_file_and_row() {
        let rendered = first_def_rendered("def x = here\n");
        assert_eq!(rendered, "\"test.weft:1\"");
    }
}
