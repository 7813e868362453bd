mod ast_step1;
mod ast_step2;
mod ast_step3;
mod errors;
mod expr;
mod intrinsics;
mod location;
mod types;

pub use crate::errors::Diagnostics;
pub use crate::expr::Expr;
pub use crate::intrinsics::{prim_register_all, PrimMap};
pub use crate::location::{FileId, Location};
pub use crate::types::TypePool;

use crate::expr::{ExprKind, LitValue};
use itertools::Itertools;

pub const PRELUDE: &str = include_str!("../library/prelude.weft");

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Command {
    Check,
    PrintAst,
    PrintTypedAst,
    Globals,
}

pub struct Output {
    pub ok: bool,
    pub stdout: String,
    pub diagnostics: String,
}

// Runs the front end over the given (name, source) files: lex, parse, tree
// construction, fracture, inference. Every pass keeps going as far as it
// can; `ok` reports whether the whole compile stayed clean.
pub fn run(files: Vec<(String, String)>, command: Command, use_prelude: bool) -> Output {
    let pmap = prim_register_all();
    let mut diag = Diagnostics::new();
    let mut pool = TypePool::new();
    let mut stdout = String::new();

    let builtin_file = diag.add_file(
        "<builtin>".to_string(),
        "<built-in definitions>\n".to_string(),
    );
    let body = Expr::new(
        Location::new(builtin_file, 0..0),
        ExprKind::Literal(LitValue::Str("top".to_string())),
    );
    let mut top = ast_step1::new_top(body);
    intrinsics::inject_builtins(builtin_file, &mut top);

    let mut inputs: Vec<(String, String)> = Vec::new();
    if use_prelude {
        inputs.push(("<prelude>".to_string(), PRELUDE.to_string()));
    }
    inputs.extend(files);

    for (name, src) in inputs {
        log::debug!("parsing {name}");
        let fid = diag.add_file(name.clone(), src.clone());
        let (tokens, len) = parser::lex(&src);
        for (t, span) in &tokens {
            if let parser::Token::Error(msg) = t {
                diag.error(&Location::new(fid, span.clone()), msg);
            }
        }
        let (ast, errors) = parser::parse(tokens, len);
        if !errors.is_empty() {
            diag.set_fail();
            let _ = parser::render_errors(errors, &name, &src, diag.buffer_mut());
        }
        if let Some(ast) = ast {
            ast_step1::add_file(&mut top, fid, ast, &mut diag);
        }
    }

    let globals: Vec<String> = top.globals.keys().cloned().sorted().collect();
    let top_expr = Expr::new(Location::new(builtin_file, 0..0), ExprKind::Top(top));

    if command == Command::PrintAst {
        stdout.push_str(&top_expr.to_string());
        return Output {
            ok: diag.ok(),
            stdout,
            diagnostics: diag.take_output(),
        };
    }

    let root = match ast_step2::resolve(top_expr, &mut diag) {
        Some(mut root) => {
            if ast_step3::explore_root(&mut root, &pmap, &mut pool, &mut diag) {
                Some(root)
            } else {
                diag.set_fail();
                None
            }
        }
        None => {
            diag.set_fail();
            None
        }
    };

    if let Some(root) = &root {
        match command {
            Command::PrintTypedAst => stdout.push_str(&root.to_string()),
            Command::Globals => {
                for g in &globals {
                    let mut e: &Expr = root;
                    while let ExprKind::DefBinding(d) = &e.kind {
                        if let Some(ov) = d.order.get(g) {
                            let target = if ov.index < d.vals.len() {
                                &d.vals[ov.index]
                            } else {
                                &d.funs[ov.index - d.vals.len()]
                            };
                            stdout.push_str(&format!(
                                "{g}: {} = <{}>\n",
                                pool.format(target.ty),
                                diag.file_name(target.location.file)
                            ));
                            break;
                        }
                        e = &d.body;
                    }
                }
            }
            _ => {}
        }
    }

    Output {
        ok: diag.ok(),
        stdout,
        diagnostics: diag.take_output(),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::expr::ExprKind;

    fn check(src: &str) -> Output {
        run(
            vec![("test.weft".to_string(), src.to_string())],
            Command::Globals,
            true,
        )
    }

    fn global_type(out: &Output, name: &str) -> String {
        for line in out.stdout.lines() {
            if let Some(rest) = line.strip_prefix(&format!("{name}: ")) {
                if let Some((ty, _)) = rest.rsplit_once(" = <") {
                    return ty.to_string();
                }
            }
        }
        panic!("no global {name} in output:\n{}", out.stdout);
    }

    #[test]
    fn prelude_compiles_cleanly() {
        let out = run(Vec::new(), Command::Globals, true);
        assert!(out.ok, "prelude diagnostics:\n{}", out.diagnostics);
        assert_eq!(global_type(&out, "map"), "(a => b) => List a => List b");
        assert_eq!(global_type(&out, "binary ++"), "List a => List a => List a");
        assert_eq!(global_type(&out, "binary ,"), "a => List a => List a");
        assert_eq!(global_type(&out, "itos"), "Integer => String");
        assert_eq!(global_type(&out, "version"), "String");
        assert_eq!(
            global_type(&out, "sources"),
            "String => String => List String"
        );
    }

    #[test]
    fn value_levels_type_and_order() {
        let out = check("global def x = 1\nglobal def y = x + 1\n");
        assert!(out.ok, "diagnostics:\n{}", out.diagnostics);
        assert_eq!(global_type(&out, "x"), "Integer");
        assert_eq!(global_type(&out, "y"), "Integer");
    }

    #[test]
    fn mutually_recursive_functions_share_a_type() {
        let out = check("global def f x = g x\nglobal def g x = f x\n");
        assert!(out.ok, "diagnostics:\n{}", out.diagnostics);
        assert_eq!(global_type(&out, "f"), "a => b");
        assert_eq!(global_type(&out, "g"), "a => b");
    }

    #[test]
    fn value_cycle_is_rejected() {
        let out = check("def a = b\ndef b = a\n");
        assert!(!out.ok);
        assert!(
            out.diagnostics.contains("Value definition cycle"),
            "diagnostics:\n{}",
            out.diagnostics
        );
        assert!(out.diagnostics.contains("a at"));
        assert!(out.diagnostics.contains("b at"));
    }

    #[test]
    fn match_on_list_infers_integer() {
        let out = check(
            "global def len l = match l\n    (Cons h t) = 1 + len t\n    Nil = 0\n\
             global def n = len (1, 2, Nil)\n",
        );
        assert!(out.ok, "diagnostics:\n{}", out.diagnostics);
        assert_eq!(global_type(&out, "len"), "List a => Integer");
        assert_eq!(global_type(&out, "n"), "Integer");
    }

    #[test]
    fn multi_scrutinee_match_expands_by_position() {
        let out = check("global def both a b = match a b\n    Nil Nil = 0\n    x y = 1\n");
        assert!(out.ok, "diagnostics:\n{}", out.diagnostics);
        assert_eq!(global_type(&out, "both"), "List a => List b => Integer");
    }

    #[test]
    fn non_exhaustive_match_reports_missing_shape() {
        let out = check("def f x = match x\n    (Cons h t) = h\n");
        assert!(!out.ok);
        assert!(
            out.diagnostics.contains("Non-exhaustive match"),
            "diagnostics:\n{}",
            out.diagnostics
        );
        assert!(out.diagnostics.contains("missing: Nil"));
    }

    #[test]
    fn unreachable_arm_is_reported() {
        let out = check("def f x = match x\n    y = y\n    Nil = 0\n");
        assert!(!out.ok);
        assert!(
            out.diagnostics.contains("Pattern unreachable"),
            "diagnostics:\n{}",
            out.diagnostics
        );
    }

    #[test]
    fn wrong_sum_constructor_is_reported() {
        let out = check("def f x = match x\n    (Pair a b) = a\n    Nil = 0\n");
        assert!(!out.ok);
        assert!(
            out.diagnostics.contains("is not a member of"),
            "diagnostics:\n{}",
            out.diagnostics
        );
    }

    #[test]
    fn constructor_arity_mismatch_is_reported() {
        let out = check("def f x = match x\n    (Cons h) = h\n    Nil = 0\n");
        assert!(!out.ok);
        assert!(
            out.diagnostics.contains("must have 2"),
            "diagnostics:\n{}",
            out.diagnostics
        );
    }

    #[test]
    fn guards_compile_through_boolean_destructor() {
        let out = check(
            "global def f x = match x\n    (Cons h t) if h == 1 = h\n    (Cons h t) = h + 1\n    Nil = 0\n",
        );
        assert!(out.ok, "diagnostics:\n{}", out.diagnostics);
        assert_eq!(global_type(&out, "f"), "List Integer => Integer");
    }

    #[test]
    fn publish_subscribe_folds_into_a_list() {
        let out = check(
            "publish ps = 1, Nil\npublish ps = 2, Nil\nglobal def got = subscribe ps\n",
        );
        assert!(out.ok, "diagnostics:\n{}", out.diagnostics);
        assert_eq!(global_type(&out, "got"), "List Integer");
    }

    #[test]
    fn subscribe_without_publication_is_nil() {
        let out = check("global def got = subscribe nothing\n");
        assert!(out.ok, "diagnostics:\n{}", out.diagnostics);
        assert_eq!(global_type(&out, "got"), "List a");
    }

    #[test]
    fn generalization_allows_polymorphic_uses() {
        let out = check(
            "global def id x = x\nglobal def a = id 1\nglobal def s = id \"y\"\n",
        );
        assert!(out.ok, "diagnostics:\n{}", out.diagnostics);
        assert_eq!(global_type(&out, "a"), "Integer");
        assert_eq!(global_type(&out, "s"), "String");
        assert_eq!(global_type(&out, "id"), "a => a");
    }

    #[test]
    fn unbound_reference_is_reported() {
        let out = check("def x = nope\n");
        assert!(!out.ok);
        assert!(
            out.diagnostics.contains("is unbound"),
            "diagnostics:\n{}",
            out.diagnostics
        );
    }

    #[test]
    fn occurs_check_rejects_self_application() {
        let out = check("def w = \\x.x x\n");
        assert!(!out.ok);
        assert!(
            out.diagnostics.contains("Type error"),
            "diagnostics:\n{}",
            out.diagnostics
        );
    }

    #[test]
    fn application_argument_mismatch_is_reported() {
        let out = check("def x = itos \"nope\"\n");
        assert!(!out.ok);
        assert!(
            out.diagnostics.contains("Type error"),
            "diagnostics:\n{}",
            out.diagnostics
        );
    }

    fn resolve_bare(src: &str) -> Expr {
        let mut diag = Diagnostics::new();
        let fid = diag.add_file("t.weft".to_string(), src.to_string());
        let (tokens, len) = parser::lex(src);
        let (ast, errors) = parser::parse(tokens, len);
        assert!(errors.is_empty(), "parse errors: {errors:?}");
        let body = Expr::new(
            Location::new(fid, 0..0),
            ExprKind::Literal(LitValue::Str("top".to_string())),
        );
        let mut top = ast_step1::new_top(body);
        ast_step1::add_file(&mut top, fid, ast.expect("ast"), &mut diag);
        let top_expr = Expr::new(Location::new(fid, 0..0), ExprKind::Top(top));
        let out = ast_step2::resolve(top_expr, &mut diag);
        assert!(diag.ok(), "diagnostics:\n{}", diag.take_output());
        out.expect("resolution failed")
    }

    #[test]
    fn fracture_orders_values_by_dependency() {
        let root = resolve_bare("def x = 1\ndef y = x\n");
        // x is the most depended-on definition, so it lands in the
        // outermost binding; y's binding wraps the tail body
        match &root.kind {
            ExprKind::DefBinding(outer) => {
                assert!(outer.order.contains_key("0 x"));
                assert_eq!(outer.vals.len(), 1);
                match &outer.body.kind {
                    ExprKind::DefBinding(inner) => {
                        assert!(inner.order.contains_key("0 y"));
                    }
                    other => panic!("expected inner binding, got {other:?}"),
                }
            }
            other => panic!("expected binding, got {other:?}"),
        }
    }

    #[test]
    fn scc_groups_are_minimal_and_contiguous() {
        let root = resolve_bare("def f x = g x\ndef g x = f x\ndef h x = f x\n");
        match &root.kind {
            ExprKind::DefBinding(b) => {
                assert_eq!(b.vals.len(), 0);
                assert_eq!(b.funs.len(), 3);
                let idx =
                    |n: &str| b.order.get(n).unwrap_or_else(|| panic!("no {n}")).index;
                let (f, g, h) = (idx("0 f"), idx("0 g"), idx("0 h"));
                assert_eq!(b.scc[f], b.scc[g], "f and g are mutually recursive");
                assert_ne!(b.scc[h], b.scc[f], "h is alone in its component");
                // an scc id is the index of its earliest member
                assert_eq!(b.scc[f], f.min(g));
                assert_eq!(b.scc[h], h);
            }
            other => panic!("expected binding, got {other:?}"),
        }
    }

    #[test]
    fn resolution_is_idempotent() {
        let root = resolve_bare("def x = 1\ndef y = x\n");
        let before = root.to_string();
        let mut diag = Diagnostics::new();
        diag.add_file("t.weft".to_string(), "def x = 1\ndef y = x\n".to_string());
        let again = ast_step2::resolve(root, &mut diag).expect("no-op resolve");
        assert_eq!(before, again.to_string());
    }

    #[test]
    fn stop_after_parse_prints_the_surface_tree() {
        let out = run(
            vec![("t.weft".to_string(), "def x = 1 + 2\n".to_string())],
            Command::PrintAst,
            false,
        );
        assert!(out.ok, "diagnostics:\n{}", out.diagnostics);
        assert!(out.stdout.contains("def x = 1 + 2"), "stdout:\n{}", out.stdout);
    }
}
