//! Elaborates `match` expressions into nested destructor dispatch. A vector
//! of pattern rows is refined against a prototype row; the leftmost position
//! where the prototype is still a wildcard but a row names a constructor
//! picks the sum to destructure next. Missing shapes and unused arms are
//! rejected here.

use super::{dont_generalize, ResolveBinding};
use crate::errors::Diagnostics;
use crate::expr::{DefMap, Expr, ExprKind, MatchExpr, NamedDef, PatAst};
use crate::intrinsics::{op_precedence, CArg, Constructor, Sum, TypeAst, APP_PRECEDENCE};
use crate::location::Location;
use std::cell::Cell;
use std::fmt::Write;
use std::rc::Rc;

#[derive(Clone)]
pub(crate) struct PatternTree<'s> {
    // None while this position is an unexpanded wildcard
    sum: Option<&'s Sum>,
    cons: usize,
    // -1 when unbound; the prototype row carries variable slot ids here
    var: i32,
    children: Vec<PatternTree<'s>>,
}

impl<'s> PatternTree<'s> {
    fn wildcard() -> PatternTree<'s> {
        PatternTree {
            sum: None,
            cons: 0,
            var: -1,
            children: Vec::new(),
        }
    }

    fn slot(var: i32) -> PatternTree<'s> {
        PatternTree {
            var,
            ..PatternTree::wildcard()
        }
    }

    fn format(&self, out: &mut String, p: i32) {
        let sum = match self.sum {
            Some(s) => s,
            None => {
                out.push('_');
                return;
            }
        };
        let name = sum.members[self.cons].name;
        if let Some(op) = name.strip_prefix("binary ") {
            let (q, left) = op_precedence(op);
            if q < p {
                out.push('(');
            }
            self.children[0].format(out, q + if left { 0 } else { 1 });
            if op != "," {
                out.push(' ');
            }
            let _ = write!(out, "{op} ");
            self.children[1].format(out, q + if left { 1 } else { 0 });
            if q < p {
                out.push(')');
            }
        } else if let Some(op) = name.strip_prefix("unary ") {
            let (q, _) = op_precedence(op);
            if q < p {
                out.push('(');
            }
            out.push_str(op);
            self.children[0].format(out, q);
            if q < p {
                out.push(')');
            }
        } else {
            let q = APP_PRECEDENCE;
            if q < p && !self.children.is_empty() {
                out.push('(');
            }
            out.push_str(name);
            for c in &self.children {
                out.push(' ');
                c.format(out, q + 1);
            }
            if q < p && !self.children.is_empty() {
                out.push(')');
            }
        }
    }

    fn render(&self) -> String {
        let mut s = String::new();
        self.format(&mut s, 0);
        s
    }
}

#[derive(Clone)]
struct PatternRef<'s> {
    location: Location,
    tree: PatternTree<'s>,
    // the arm's function index; unused on the prototype row
    fn_index: usize,
    guard: bool,
    uses: Rc<Cell<usize>>,
}

// Finds the leftmost position where the prototype is still a wildcard but
// the row already names a constructor. Assumes the row refines the
// prototype, so shapes agree wherever both are expanded.
fn find_mismatch<'s>(
    path: &mut Vec<usize>,
    a: &PatternTree<'s>,
    b: &PatternTree<'s>,
) -> Option<&'s Sum> {
    if a.sum.is_none() {
        return b.sum;
    }
    for (i, (ca, cb)) in a.children.iter().zip(&b.children).enumerate() {
        path.push(i);
        if let Some(out) = find_mismatch(path, ca, cb) {
            return Some(out);
        }
        path.pop();
    }
    None
}

// Applies the row's bound variables to the arm function, in prototype slot
// order.
fn fill_pattern(expr: Expr, a: &PatternTree, b: &PatternTree) -> Expr {
    if b.var >= 0 {
        let loc = expr.location.clone();
        let arg = Expr::var(loc.clone(), format!("_ a{}", a.var));
        Expr::app(loc, expr, arg)
    } else {
        let mut expr = expr;
        for (ca, cb) in a.children.iter().zip(&b.children) {
            expr = fill_pattern(expr, ca, cb);
        }
        expr
    }
}

fn get_expansion<'t, 's>(t: &'t PatternTree<'s>, path: &[usize]) -> &'t PatternTree<'s> {
    let mut t = t;
    for &i in path {
        t = &t.children[i];
    }
    t
}

fn get_expansion_mut<'t, 's>(
    t: &'t mut PatternTree<'s>,
    path: &[usize],
) -> &'t mut PatternTree<'s> {
    let mut t = t;
    for &i in path {
        t = &mut t.children[i];
    }
    t
}

// invariant: rows[0] is the prototype and every row refines it
fn expand_patterns<'s>(
    rows: &mut Vec<PatternRef<'s>>,
    next_var: &mut usize,
    diag: &mut Diagnostics,
) -> Option<Expr> {
    let proto_location = rows[0].location.clone();
    if rows.len() == 1 {
        diag.error(
            &proto_location,
            &format!("Non-exhaustive match; missing: {}", rows[0].tree.render()),
        );
        return None;
    }
    let mut path: Vec<usize> = Vec::new();
    let sum = find_mismatch(&mut path, &rows[0].tree, &rows[1].tree);
    if let Some(sum) = sum {
        // destructure: one continuation per member, each taking the
        // scrutinee and then the member's arguments
        let loc = proto_location;
        let mut defs: Vec<NamedDef> = Vec::new();
        let mut body = Expr::var(loc.clone(), format!("destruct {}", sum.name));
        for (c, member) in sum.members.iter().enumerate() {
            let cname = format!("_ c{c}");
            body = Expr::app(loc.clone(), body, Expr::var(loc.clone(), cname.clone()));
            let args = member.args.len();
            let var0 = *next_var;
            *next_var += args;
            let mut bucket: Vec<PatternRef<'s>> = Vec::new();
            for (ri, row) in rows.iter().enumerate() {
                let t = get_expansion(&row.tree, &path);
                match t.sum {
                    None => {
                        let mut refined = row.clone();
                        let t2 = get_expansion_mut(&mut refined.tree, &path);
                        t2.sum = Some(sum);
                        t2.cons = c;
                        t2.children = vec![PatternTree::wildcard(); args];
                        if ri == 0 {
                            for (k, ch) in t2.children.iter_mut().enumerate() {
                                ch.var = (var0 + k) as i32;
                            }
                        }
                        bucket.push(refined);
                    }
                    Some(s) if !std::ptr::eq(s, sum) => {
                        diag.error(
                            &row.location,
                            &format!(
                                "Constructor {} is not a member of {} but is used in pattern",
                                s.members[t.cons].name, sum.name
                            ),
                        );
                        return None;
                    }
                    Some(_) if t.cons == c => bucket.push(row.clone()),
                    Some(_) => {}
                }
            }
            let sub = expand_patterns(&mut bucket, next_var, diag)?;
            let mut exp = sub;
            for i in (0..args).rev() {
                exp = Expr::lambda(loc.clone(), format!("_ a{}", var0 + i), exp);
            }
            exp = Expr::lambda(loc.clone(), "_", exp);
            defs.push(NamedDef {
                name: cname,
                location: loc.clone(),
                body: exp,
            });
        }
        let scrutinee = get_expansion(&rows[0].tree, &path).var;
        body = Expr::app(
            loc.clone(),
            body,
            Expr::var(loc.clone(), format!("_ a{scrutinee}")),
        );
        Some(Expr::new(
            loc,
            ExprKind::DefMap(DefMap {
                defs,
                pubs: Vec::new(),
                body: Some(Box::new(body)),
            }),
        ))
    } else {
        // the second row matches the prototype completely
        rows[1].uses.set(rows[1].uses.get() + 1);
        let p_loc = rows[1].location.clone();
        let fn_index = rows[1].fn_index;
        let head = Expr::app(
            p_loc.clone(),
            Expr::var(p_loc.clone(), format!("_ f{fn_index}")),
            Expr::var(p_loc.clone(), "_ a0"),
        );
        let guard_true = fill_pattern(head, &rows[0].tree, &rows[1].tree);
        if !rows[1].guard {
            return Some(guard_true);
        }
        let save = rows.remove(1);
        let guard_false = expand_patterns(rows, next_var, diag);
        rows.insert(1, save);
        let guard_false = guard_false?;
        let guard_head = Expr::app(
            p_loc.clone(),
            Expr::var(p_loc.clone(), format!("_ g{fn_index}")),
            Expr::var(p_loc.clone(), "_ a0"),
        );
        let guard = fill_pattern(guard_head, &rows[0].tree, &rows[1].tree);
        let out = Expr::app(
            p_loc.clone(),
            Expr::app(
                p_loc.clone(),
                Expr::app(
                    p_loc.clone(),
                    Expr::var(p_loc.clone(), "destruct Boolean"),
                    Expr::lambda(p_loc.clone(), "_", guard_true),
                ),
                Expr::lambda(p_loc.clone(), "_", guard_false),
            ),
            guard,
        );
        Some(out)
    }
}

fn is_binder_name(name: &str) -> bool {
    name.chars()
        .next()
        .map(|c| c.is_ascii_lowercase() || c == '_')
        .unwrap_or(false)
}

// Resolves what a pattern atom means: wildcard, binder (wrapping the arm
// function and its guard in a lambda), or a constructor whose definition in
// scope reduces under leading lambdas to a `Construct`.
fn cons_lookup<'s>(
    stack: &[ResolveBinding],
    expr: &mut Expr,
    guard: &mut Option<Expr>,
    ast: &PatAst,
    multiarg: Option<&'s Sum>,
    diag: &mut Diagnostics,
) -> PatternTree<'s> {
    let mut out = PatternTree::wildcard();
    if ast.name == "_" {
        return out;
    }
    if !ast.name.is_empty() && is_binder_name(&ast.name) {
        let loc = expr.location.clone();
        let placeholder = Expr::var(loc.clone(), "");
        let inner = std::mem::replace(expr, placeholder);
        let mut lam = Expr::lambda(loc.clone(), ast.name.clone(), inner);
        if let ExprKind::Lambda(l) = &mut lam.kind {
            l.token = Some(ast.location.clone());
        }
        *expr = lam;
        if let Some(g) = guard.take() {
            let gloc = g.location.clone();
            *guard = Some(Expr::lambda(gloc, ast.name.clone(), g));
        }
        out.var = 0;
        return out;
    }
    for frame in stack.iter().rev() {
        let mut found = None;
        if let Some(prefix) = frame.prefix {
            found = frame.index.get(&format!("{prefix} {}", ast.name));
        }
        let found = found.or_else(|| frame.index.get(&ast.name));
        if let Some(&idx) = found {
            if let Some(def) = &frame.defs[idx].expr {
                let mut cur = def;
                while let ExprKind::Lambda(l) = &cur.kind {
                    cur = &l.body;
                }
                if let ExprKind::Construct { sum, cons } = &cur.kind {
                    out.sum = Some(*sum);
                    out.cons = *cons;
                }
            }
        }
    }
    if ast.name.is_empty() {
        out.sum = multiarg;
    }
    match out.sum {
        None => {
            diag.error(
                &ast.location,
                &format!("Constructor {} in pattern match not found", ast.name),
            );
            out.var = 0;
        }
        Some(sum) if sum.members[out.cons].args.len() != ast.args.len() => {
            let what = if ast.name.is_empty() {
                "Case".to_string()
            } else {
                format!("Constructor {}", ast.name)
            };
            diag.error(
                &ast.location,
                &format!(
                    "{what} in pattern match has {} parameters, but must have {}",
                    ast.args.len(),
                    sum.members[out.cons].args.len()
                ),
            );
            out.sum = None;
            out.var = 0;
        }
        Some(_) => {
            for a in ast.args.iter().rev() {
                out.children
                    .push(cons_lookup(stack, expr, guard, a, None, diag));
            }
            out.children.reverse();
        }
    }
    out
}

pub(crate) fn rebind_match(
    stack: &mut Vec<ResolveBinding>,
    location: &Location,
    m: MatchExpr,
    diag: &mut Diagnostics,
) -> Option<Expr> {
    let nargs = m.args.len();
    let multiarg = Sum {
        name: "",
        args: Vec::new(),
        members: vec![Constructor {
            name: "",
            args: vec![
                CArg {
                    tag: None,
                    ty: TypeAst::Var("_"),
                };
                nargs
            ],
            index: 0,
        }],
    };

    let mut defs: Vec<NamedDef> = Vec::new();
    let mut children: Vec<PatternTree> = Vec::new();
    for (index, a) in m.args.into_iter().enumerate() {
        defs.push(NamedDef {
            name: format!("_ a{index}"),
            location: a.location.clone(),
            body: a,
        });
        children.push(PatternTree::slot(index as i32));
    }

    let proto_tree = if nargs == 1 {
        children.pop().expect("one scrutinee")
    } else {
        let mut t = PatternTree::wildcard();
        t.sum = Some(&multiarg);
        t.children = children;
        t
    };
    let mut rows: Vec<PatternRef> = vec![PatternRef {
        location: location.clone(),
        tree: proto_tree,
        fn_index: 0,
        guard: false,
        uses: Rc::new(Cell::new(1)),
    }];
    let mut next_var = nargs;

    let mut ok = true;
    for (f, arm) in m.arms.into_iter().enumerate() {
        let body_location = arm.body.location.clone();
        let mut expr = arm.body;
        let mut guard = arm.guard;
        let tree = cons_lookup(stack, &mut expr, &mut guard, &arm.pattern, Some(&multiarg), diag);
        ok &= rows[0].tree.sum.is_none() || tree.sum.is_some();
        let eloc = expr.location.clone();
        let expr = Expr::lambda(eloc.clone(), "_", expr);
        defs.push(NamedDef {
            name: format!("_ f{f}"),
            location: eloc.clone(),
            body: expr,
        });
        let has_guard = guard.is_some();
        if let Some(g) = guard {
            let gloc = g.location.clone();
            defs.push(NamedDef {
                name: format!("_ g{f}"),
                location: gloc.clone(),
                body: Expr::lambda(gloc, "_", g),
            });
        }
        rows.push(PatternRef {
            location: body_location,
            tree,
            fn_index: f,
            guard: has_guard,
            uses: Rc::new(Cell::new(0)),
        });
    }
    if !ok {
        return None;
    }
    let body = expand_patterns(&mut rows, &mut next_var, diag)?;
    for r in &rows[1..] {
        if r.uses.get() == 0 {
            diag.error(&r.location, "Pattern unreachable in match");
            return None;
        }
    }
    // lambdas + applications instead of a binding, so the match's internal
    // definitions never generalize
    Some(dont_generalize(location, defs, body))
}
