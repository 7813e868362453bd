//! The fracture pass: collapses nested definition maps into layered
//! `DefBinding`s. Each scope builds a dependency graph over its own
//! definitions, assigns levels by longest path, and groups the lambdas of a
//! level into strongly connected components. Publish contributions are
//! threaded into synthetic definitions along the way.

pub mod patterns;

use crate::errors::Diagnostics;
use crate::expr::{DefBinding, Expr, ExprKind, NamedDef, OrderValue, PubDef, FLAG_AST};
use crate::location::Location;
use fxhash::{FxHashMap, FxHashSet};
use petgraph::algo::tarjan_scc;
use petgraph::graph::{Graph, NodeIndex};
use std::collections::VecDeque;

pub(crate) struct ResolveDef {
    pub name: String,
    pub location: Location,
    pub expr: Option<Expr>,
    // definitions this one references within its own scope
    pub edges: FxHashSet<usize>,
}

impl ResolveDef {
    fn new(name: String, location: Location, expr: Option<Expr>) -> ResolveDef {
        ResolveDef {
            name,
            location,
            expr,
            edges: FxHashSet::default(),
        }
    }
}

pub(crate) struct ResolveBinding {
    // index of the definition currently being resolved; edges found while
    // inside it are charged to it
    pub current_index: Option<usize>,
    // file prefix for Top-level scopes
    pub prefix: Option<usize>,
    pub depth: usize,
    pub index: FxHashMap<String, usize>,
    pub defs: Vec<ResolveDef>,
}

fn reference_map(stack: &mut [ResolveBinding], fi: usize, name: &str) -> bool {
    if let Some(&idx) = stack[fi].index.get(name) {
        if let Some(ci) = stack[fi].current_index {
            stack[fi].defs[ci].edges.insert(idx);
        }
        true
    } else {
        false
    }
}

// Rewrites a reference to its canonical scope-local key, walking the scope
// chain and preferring the file-qualified name wherever a frame has a
// prefix. Unbound names are left alone; inference reports them.
fn rebind_ref(stack: &mut [ResolveBinding], name: &mut String) -> bool {
    for fi in (0..stack.len()).rev() {
        if let Some(prefix) = stack[fi].prefix {
            let qualified = format!("{prefix} {name}");
            if reference_map(stack, fi, &qualified) {
                *name = qualified;
                return true;
            }
        }
        if reference_map(stack, fi, name) {
            return true;
        }
    }
    false
}

fn rebind_subscribe(
    stack: &mut [ResolveBinding],
    location: &Location,
    name: &str,
    record: bool,
) -> Expr {
    for fi in (0..stack.len()).rev() {
        let pub_name = format!("publish {} {}", stack[fi].depth, name);
        let found = if record {
            reference_map(stack, fi, &pub_name)
        } else {
            stack[fi].index.contains_key(&pub_name)
        };
        if found {
            return Expr::var(location.clone(), pub_name);
        }
    }
    Expr::var(location.clone(), "Nil")
}

// Folds publish contributions into synthetic definitions on the innermost
// frame. The newest contribution keeps the canonical "publish <depth> <n>"
// name; older ones are renamed into a chain so the dependency graph sees a
// list. The bottom of the chain subscribes to the enclosing scope.
fn chain_publish(
    stack: &mut Vec<ResolveBinding>,
    pubs: Vec<(String, Vec<PubDef>)>,
    chain: &mut usize,
) {
    let depth = match stack.last() {
        Some(f) => f.depth,
        None => return,
    };
    for (n, contributions) in pubs {
        let def_name = format!("publish {depth} {n}");
        for j in contributions.into_iter().rev() {
            let l = j.body.location.clone();
            let frame = stack.len() - 1;
            let tail = match stack[frame].index.get(&def_name).copied() {
                Some(prev) => {
                    *chain += 1;
                    let renamed = format!("publish {depth} {chain} {n}");
                    stack[frame].index.insert(renamed.clone(), prev);
                    stack[frame].defs[prev].name = renamed.clone();
                    Expr::var(l.clone(), renamed)
                }
                None => rebind_subscribe(stack, &l, &n, false),
            };
            let append = Expr::var(l.clone(), "binary ++");
            let body = Expr::app(
                l.clone(),
                Expr::app(l.clone(), append, j.body),
                tail,
            );
            let frame = stack.len() - 1;
            let idx = stack[frame].defs.len();
            stack[frame].index.insert(def_name.clone(), idx);
            stack[frame]
                .defs
                .push(ResolveDef::new(def_name.clone(), j.location, Some(body)));
        }
    }
}

// Bellman-Ford over the scope's dependency graph, run for longest path. A
// definition used by `f` must live at `f`'s level or deeper; uses from
// non-lambda values push their targets strictly deeper. A distance reaching
// the definition count means a cycle of values.
fn fracture_binding(
    location: &Location,
    mut defs: Vec<ResolveDef>,
    body: Expr,
    diag: &mut Diagnostics,
) -> Option<Expr> {
    let n = defs.len();
    if defs.iter().any(|d| d.expr.is_none()) {
        return None;
    }

    let mut d = vec![0usize; n];
    let mut p = vec![usize::MAX; n];
    let mut q: VecDeque<(usize, usize)> = (0..n).map(|i| (i, 0)).collect();
    while let Some((v, dist)) = q.pop_front() {
        let drv = d[v];
        if dist < drv {
            continue;
        }
        if drv >= n {
            let mut j = v;
            for _ in 0..n {
                if p[j] == usize::MAX {
                    break;
                }
                j = p[j];
            }
            diag.error_plain("Value definition cycle detected including:");
            let mut i = j;
            loop {
                diag.note_plain(&format!(
                    "  {} at {}",
                    defs[i].name,
                    diag.location_string(&defs[i].location)
                ));
                if p[i] == usize::MAX {
                    break;
                }
                i = p[i];
                if i == j {
                    break;
                }
            }
            return None;
        }
        let w = if defs[v].expr.as_ref().map(|e| e.is_lambda()).unwrap_or(false) {
            0
        } else {
            1
        };
        let targets: Vec<usize> = defs[v].edges.iter().copied().collect();
        for u in targets {
            if drv + w > d[u] {
                d[u] = drv + w;
                p[u] = v;
                q.push_back((u, drv + w));
            }
        }
    }

    let mut levels: Vec<Vec<usize>> = vec![Vec::new(); n];
    for i in 0..n {
        levels[d[i]].push(i);
    }

    let mut out = body;
    for lvl in 0..n {
        if levels[lvl].is_empty() {
            continue;
        }
        let mut order: FxHashMap<String, OrderValue> = FxHashMap::default();
        let mut vals: Vec<Expr> = Vec::new();
        let mut funs: Vec<Expr> = Vec::new();
        let mut scc: Vec<usize> = Vec::new();

        for &j in &levels[lvl] {
            let is_lambda = defs[j]
                .expr
                .as_ref()
                .map(|e| e.is_lambda())
                .unwrap_or(false);
            if !is_lambda {
                let expr = match defs[j].expr.take() {
                    Some(e) => e,
                    None => return None,
                };
                order.insert(
                    defs[j].name.clone(),
                    OrderValue {
                        location: defs[j].location.clone(),
                        index: vals.len(),
                    },
                );
                vals.push(expr);
            }
        }

        // group the level's lambdas into SCCs; each component becomes a
        // contiguous block of funs sharing the id of its first member
        let mut graph: Graph<usize, ()> = Graph::new();
        let mut node_of: FxHashMap<usize, NodeIndex> = FxHashMap::default();
        for &j in &levels[lvl] {
            if defs[j].expr.as_ref().map(|e| e.is_lambda()).unwrap_or(false) {
                node_of.insert(j, graph.add_node(j));
            }
        }
        for (&j, &nj) in &node_of {
            for &u in &defs[j].edges {
                if let Some(&nu) = node_of.get(&u) {
                    graph.add_edge(nj, nu, ());
                }
            }
        }
        for group in tarjan_scc(&graph) {
            let scc_id = funs.len();
            for ni in group {
                let j = graph[ni];
                let expr = match defs[j].expr.take() {
                    Some(e) => e,
                    None => return None,
                };
                order.insert(
                    defs[j].name.clone(),
                    OrderValue {
                        location: defs[j].location.clone(),
                        index: vals.len() + funs.len(),
                    },
                );
                funs.push(expr);
                scc.push(scc_id);
            }
        }

        log::debug!(
            "level {lvl}: {} values, {} functions in {} sccs",
            vals.len(),
            funs.len(),
            scc.iter().collect::<FxHashSet<_>>().len()
        );
        out = Expr::new(
            location.clone(),
            ExprKind::DefBinding(DefBinding {
                order,
                vals,
                funs,
                scc,
                body: Box::new(out),
            }),
        );
    }
    Some(out)
}

pub fn resolve(expr: Expr, diag: &mut Diagnostics) -> Option<Expr> {
    let mut stack: Vec<ResolveBinding> = Vec::new();
    fracture(&mut stack, expr, diag)
}

pub(crate) fn fracture(
    stack: &mut Vec<ResolveBinding>,
    expr: Expr,
    diag: &mut Diagnostics,
) -> Option<Expr> {
    let Expr {
        location,
        flags,
        ty,
        kind,
    } = expr;
    match kind {
        ExprKind::VarRef(mut v) => {
            // unbound names are reported by inference, not here
            rebind_ref(stack, &mut v.name);
            Some(Expr {
                location,
                flags,
                ty,
                kind: ExprKind::VarRef(v),
            })
        }
        ExprKind::Subscribe(name) => {
            let mut out = rebind_subscribe(stack, &location, &name, true);
            out.flags |= FLAG_AST;
            Some(out)
        }
        ExprKind::App(f, a) => {
            let f = fracture(stack, *f, diag);
            let a = fracture(stack, *a, diag);
            match (f, a) {
                (Some(f), Some(a)) => Some(Expr {
                    location,
                    flags,
                    ty,
                    kind: ExprKind::App(Box::new(f), Box::new(a)),
                }),
                _ => None,
            }
        }
        ExprKind::Lambda(mut l) => {
            let depth = stack.last().map(|f| f.depth + 1).unwrap_or(0);
            let mut index = FxHashMap::default();
            index.insert(l.name.clone(), 0);
            stack.push(ResolveBinding {
                current_index: Some(0),
                prefix: None,
                depth,
                index,
                defs: vec![ResolveDef::new(l.name.clone(), location.clone(), None)],
            });
            let body = fracture(stack, *l.body, diag);
            stack.pop();
            let body = body?;
            l.body = Box::new(body);
            Some(Expr {
                location,
                flags,
                ty,
                kind: ExprKind::Lambda(l),
            })
        }
        ExprKind::Match(m) => {
            let mut out = patterns::rebind_match(stack, &location, m, diag)?;
            out.flags |= FLAG_AST;
            fracture(stack, out, diag)
        }
        ExprKind::DefMap(map) => {
            let body = match map.body {
                Some(b) => *b,
                None => return None,
            };
            let depth = stack.last().map(|f| f.depth + 1).unwrap_or(0);
            let mut frame = ResolveBinding {
                current_index: None,
                prefix: None,
                depth,
                index: FxHashMap::default(),
                defs: Vec::new(),
            };
            for def in map.defs {
                frame.index.insert(def.name.clone(), frame.defs.len());
                frame
                    .defs
                    .push(ResolveDef::new(def.name, def.location, Some(def.body)));
            }
            stack.push(frame);
            let mut chain = 0;
            chain_publish(stack, map.pubs, &mut chain);
            let total = stack.last().map(|f| f.defs.len()).unwrap_or(0);
            for i in 0..total {
                if let Some(f) = stack.last_mut() {
                    f.current_index = Some(i);
                }
                let taken = stack.last_mut().and_then(|f| f.defs[i].expr.take());
                let out = match taken {
                    Some(e) => fracture(stack, e, diag),
                    None => None,
                };
                if let Some(f) = stack.last_mut() {
                    f.defs[i].expr = out;
                }
            }
            if let Some(f) = stack.last_mut() {
                f.current_index = None;
            }
            let body = fracture(stack, body, diag);
            let frame = stack.pop()?;
            let out = fracture_binding(&location, frame.defs, body?, diag)?;
            let mut out = out;
            if flags & FLAG_AST != 0 {
                out.flags |= FLAG_AST;
            }
            Some(out)
        }
        ExprKind::Top(t) => {
            let depth = stack.last().map(|f| f.depth + 1).unwrap_or(0);
            stack.push(ResolveBinding {
                current_index: None,
                prefix: Some(0),
                depth,
                index: FxHashMap::default(),
                defs: Vec::new(),
            });
            let mut chain = 0;
            let mut file_counts: Vec<usize> = Vec::new();
            for (fi, filemap) in t.files.into_iter().enumerate() {
                let frame = stack.len() - 1;
                stack[frame].prefix = Some(fi);
                let before = stack[frame].defs.len();
                for def in filemap.defs {
                    // the owning file binds a global at its bare name;
                    // everyone else sees the file-qualified alias
                    let name = if t.globals.get(&def.name) == Some(&fi) {
                        def.name
                    } else {
                        format!("{fi} {}", def.name)
                    };
                    let idx = stack[frame].defs.len();
                    stack[frame].index.insert(name.clone(), idx);
                    stack[frame]
                        .defs
                        .push(ResolveDef::new(name, def.location, Some(def.body)));
                }
                chain_publish(stack, filemap.pubs, &mut chain);
                let frame = stack.len() - 1;
                file_counts.push(stack[frame].defs.len() - before);
            }
            let mut i = 0;
            for (fi, count) in file_counts.into_iter().enumerate() {
                if let Some(f) = stack.last_mut() {
                    f.prefix = Some(fi);
                }
                for _ in 0..count {
                    if let Some(f) = stack.last_mut() {
                        f.current_index = Some(i);
                    }
                    let taken = stack.last_mut().and_then(|f| f.defs[i].expr.take());
                    let out = match taken {
                        Some(e) => fracture(stack, e, diag),
                        None => None,
                    };
                    if let Some(f) = stack.last_mut() {
                        f.defs[i].expr = out;
                    }
                    i += 1;
                }
            }
            if let Some(f) = stack.last_mut() {
                f.current_index = None;
            }
            let body = fracture(stack, *t.body, diag);
            let frame = stack.pop()?;
            fracture_binding(&location, frame.defs, body?, diag)
        }
        other => Some(Expr {
            location,
            flags,
            ty,
            kind: other,
        }),
    }
}

// Reused by the pattern compiler to lower a match result map without
// letting its bindings generalize: the map becomes lambdas applied to the
// bound expressions.
pub(crate) fn dont_generalize(
    location: &Location,
    defs: Vec<NamedDef>,
    body: Expr,
) -> Expr {
    let mut lam = body;
    for d in defs.iter().rev() {
        lam = Expr::lambda(location.clone(), d.name.clone(), lam);
    }
    let mut out = lam;
    for d in defs {
        out = Expr::app(location.clone(), out, d.body);
    }
    out
}
