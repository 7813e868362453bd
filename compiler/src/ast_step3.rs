//! The explore pass: Hindley-Milner inference with let-generalization over
//! the resolved tree. A chain of `NameBinding` frames mirrors the lexical
//! `Lambda`/`DefBinding` structure; the `generalized` watermark of a binding
//! frame decides whether a reference clones its target's type or shares it.

use crate::errors::{Diagnostics, TypeErrorMessage};
use crate::expr::{Expr, ExprKind, LitValue, OrderValue};
use crate::intrinsics::PrimMap;
use crate::location::Location;
use crate::types::{TypePool, TypeRef};
use fxhash::FxHashMap;
use std::cell::Cell;

struct NameBinding<'a> {
    next: Option<&'a NameBinding<'a>>,
    kind: Frame,
    // closed once traversal passes an application or binding; primitives
    // count only the still-open enclosing lambdas as their arguments
    open: Cell<bool>,
    generalized: Cell<usize>,
}

enum Frame {
    Root,
    Lambda {
        name: String,
        ty: TypeRef,
        target: Option<Location>,
    },
    Binding {
        order: FxHashMap<String, OrderValue>,
        vals: Vec<TypeRef>,
        funs: Vec<TypeRef>,
    },
}

struct NameRef {
    depth: i32,
    offset: i32,
    def: bool,
    ty: Option<TypeRef>,
    target: Option<Location>,
}

impl<'a> NameBinding<'a> {
    fn find(&self, pool: &mut TypePool, x: &str) -> Option<NameRef> {
        match &self.kind {
            Frame::Lambda { name, ty, target } if name == x => {
                return Some(NameRef {
                    depth: 0,
                    offset: 0,
                    def: false,
                    ty: pool.try_child(*ty, 0),
                    target: target.clone(),
                });
            }
            Frame::Binding { order, vals, funs } => {
                if let Some(ov) = order.get(x) {
                    let ty = if ov.index < vals.len() {
                        vals[ov.index]
                    } else {
                        funs[ov.index - vals.len()]
                    };
                    return Some(NameRef {
                        depth: 0,
                        offset: ov.index as i32,
                        def: ov.index < self.generalized.get(),
                        ty: Some(ty),
                        target: Some(ov.location.clone()),
                    });
                }
            }
            _ => {}
        }
        match self.next {
            Some(next) => {
                let mut out = next.find(pool, x)?;
                out.depth += 1;
                Some(out)
            }
            None => None,
        }
    }
}

pub fn explore_root(
    expr: &mut Expr,
    pmap: &PrimMap,
    pool: &mut TypePool,
    diag: &mut Diagnostics,
) -> bool {
    let root = NameBinding {
        next: None,
        kind: Frame::Root,
        open: Cell::new(true),
        generalized: Cell::new(0),
    };
    explore(expr, pmap, pool, diag, &root)
}

fn explore(
    expr: &mut Expr,
    pmap: &PrimMap,
    pool: &mut TypePool,
    diag: &mut Diagnostics,
    binding: &NameBinding,
) -> bool {
    if expr.ty.is_none() {
        expr.ty = pool.fresh();
    }
    pool.set_dob(expr.ty);
    let loc = expr.location.clone();
    let expr_ty = expr.ty;
    match &mut expr.kind {
        ExprKind::VarRef(v) => {
            let pos = match binding.find(pool, &v.name) {
                Some(pos) => pos,
                None => {
                    diag.error(
                        &loc,
                        &format!("Variable reference '{}' is unbound", v.name),
                    );
                    return false;
                }
            };
            v.depth = pos.depth;
            v.offset = pos.offset;
            v.target = pos.target;
            let target_ty = match pos.ty {
                Some(t) => t,
                None => return true,
            };
            if pos.def {
                let temp = pool.clone_type(target_ty);
                pool.unify(expr_ty, temp, &TypeErrorMessage::Mismatch { loc }, diag)
            } else {
                pool.unify(expr_ty, target_ty, &TypeErrorMessage::Mismatch { loc }, diag)
            }
        }
        ExprKind::App(f, a) => {
            binding.open.set(false);
            let fok = explore(f, pmap, pool, diag, binding);
            let aok = explore(a, pmap, pool, diag, binding);
            let fn2 = pool.fn2();
            let t = fok
                && pool.unify(
                    f.ty,
                    fn2,
                    &TypeErrorMessage::NotFunction {
                        fn_loc: f.location.clone(),
                    },
                    diag,
                );
            let tag = if t { pool.tag(f.ty, 0) } else { None };
            let ta = t && aok && {
                let arg_ty = pool.child(f.ty, 0);
                pool.unify(
                    arg_ty,
                    a.ty,
                    &TypeErrorMessage::BadArgument {
                        fn_loc: f.location.clone(),
                        arg_loc: a.location.clone(),
                        arg: tag,
                    },
                    diag,
                )
            };
            let tr = t && {
                let res_ty = pool.child(f.ty, 1);
                pool.unify(res_ty, expr_ty, &TypeErrorMessage::Mismatch { loc }, diag)
            };
            fok && aok && t && ta && tr
        }
        ExprKind::Lambda(l) => {
            let fn2 = pool.fn2();
            let t = pool.unify(
                expr_ty,
                fn2,
                &TypeErrorMessage::Mismatch { loc: loc.clone() },
                diag,
            );
            if t && l.name != "_" && !l.name.contains(' ') {
                pool.set_tag(expr_ty, 0, &l.name);
            }
            let frame = NameBinding {
                next: Some(binding),
                kind: Frame::Lambda {
                    name: l.name.clone(),
                    ty: expr_ty,
                    target: l.token.clone(),
                },
                open: Cell::new(true),
                generalized: Cell::new(0),
            };
            let out = explore(&mut l.body, pmap, pool, diag, &frame);
            let tr = t && out && {
                let res_ty = pool.child(expr_ty, 1);
                pool.unify(
                    res_ty,
                    l.body.ty,
                    &TypeErrorMessage::RecursiveReturn {
                        body_loc: l.body.location.clone(),
                    },
                    diag,
                )
            };
            out && t && tr
        }
        ExprKind::DefBinding(d) => {
            binding.open.set(false);
            for v in d.vals.iter_mut() {
                if v.ty.is_none() {
                    v.ty = pool.fresh();
                }
            }
            for f in d.funs.iter_mut() {
                if f.ty.is_none() {
                    f.ty = pool.fresh();
                }
            }
            let frame = NameBinding {
                next: Some(binding),
                kind: Frame::Binding {
                    order: d.order.clone(),
                    vals: d.vals.iter().map(|v| v.ty).collect(),
                    funs: d.funs.iter().map(|f| f.ty).collect(),
                },
                open: Cell::new(true),
                generalized: Cell::new(0),
            };
            let mut ok = true;
            // values are invisible to each other and to the functions while
            // inferred; fracture guarantees they are non-recursive
            for v in d.vals.iter_mut() {
                ok = explore(v, pmap, pool, diag, binding) && ok;
            }
            let fun_tys: Vec<TypeRef> = d.funs.iter().map(|f| f.ty).collect();
            for i in 0..d.funs.len() {
                pool.set_dob(fun_tys[i]);
                let mut j = i + 1;
                while j < d.funs.len() && d.scc[j] == i {
                    pool.set_dob_from(fun_tys[j], fun_tys[i]);
                    j += 1;
                }
                frame.generalized.set(d.vals.len() + d.scc[i]);
                ok = explore(&mut d.funs[i], pmap, pool, diag, &frame) && ok;
            }
            frame.generalized.set(d.vals.len() + d.funs.len());
            ok = explore(&mut d.body, pmap, pool, diag, &frame) && ok;
            ok = ok
                && pool.unify(
                    expr_ty,
                    d.body.ty,
                    &TypeErrorMessage::Mismatch { loc },
                    diag,
                )
                && ok;
            ok
        }
        ExprKind::Literal(l) => {
            let name = match l {
                LitValue::Integer(_) => "Integer",
                LitValue::Str(_) => "String",
            };
            let t = pool.term(name, vec![]);
            pool.unify(expr_ty, t, &TypeErrorMessage::Mismatch { loc }, diag)
        }
        ExprKind::Construct { sum, cons } => {
            let args: Vec<TypeRef> = sum.args.iter().map(|_| pool.fresh()).collect();
            let term = pool.term(sum.name, args);
            if !pool.unify(
                expr_ty,
                term,
                &TypeErrorMessage::Mismatch { loc },
                diag,
            ) {
                return false;
            }
            let mut ids: FxHashMap<&'static str, TypeRef> = FxHashMap::default();
            for (i, a) in sum.args.iter().enumerate() {
                let child = pool.child(expr_ty, i);
                ids.insert(*a, child);
            }
            let member = &sum.members[*cons];
            let mut ok = true;
            let mut iter: Option<&NameBinding> = Some(binding);
            for i in (0..member.args.len()).rev() {
                let b = match iter {
                    Some(b) => b,
                    None => return false,
                };
                let lty = match &b.kind {
                    Frame::Lambda { ty, .. } => *ty,
                    _ => return false,
                };
                let param = pool.child(lty, 0);
                ok = member.args[i].ty.unify(pool, param, &ids) && ok;
                if let Some(tag) = member.args[i].tag {
                    pool.set_tag(lty, 0, tag);
                }
                iter = b.next;
            }
            ok
        }
        ExprKind::Destruct { sum } => {
            // (typ => cons0 => b) => (typ => cons1 => b) => typ => b
            let scrut_lty = match &binding.kind {
                Frame::Lambda { ty, .. } => *ty,
                _ => return false,
            };
            let typ = pool.child(scrut_lty, 0);
            let sargs: Vec<TypeRef> = sum.args.iter().map(|_| pool.fresh()).collect();
            let term = pool.term(sum.name, sargs);
            let mut ok = pool.unify(
                typ,
                term,
                &TypeErrorMessage::Mismatch { loc: loc.clone() },
                diag,
            );
            if !ok {
                return false;
            }
            let mut ids: FxHashMap<&'static str, TypeRef> = FxHashMap::default();
            for (i, a) in sum.args.iter().enumerate() {
                let child = pool.child(typ, i);
                ids.insert(*a, child);
            }
            let mut iter: Option<&NameBinding> = binding.next;
            for ci in (0..sum.members.len()).rev() {
                let b = match iter {
                    Some(b) => b,
                    None => return false,
                };
                let lty = match &b.kind {
                    Frame::Lambda { ty, .. } => *ty,
                    _ => return false,
                };
                let mut tail = pool.child(lty, 0);
                let member = &sum.members[ci];
                let fn2 = pool.fn2();
                if !pool.unify(
                    tail,
                    fn2,
                    &TypeErrorMessage::Mismatch { loc: loc.clone() },
                    diag,
                ) {
                    ok = false;
                    break;
                }
                let scrut = pool.child(tail, 0);
                ok = pool.unify(
                    scrut,
                    typ,
                    &TypeErrorMessage::Mismatch { loc: loc.clone() },
                    diag,
                ) && ok;
                tail = pool.child(tail, 1);
                let mut complete = true;
                for j in 0..member.args.len() {
                    let fn2 = pool.fn2();
                    if !pool.unify(
                        tail,
                        fn2,
                        &TypeErrorMessage::Mismatch { loc: loc.clone() },
                        diag,
                    ) {
                        ok = false;
                        complete = false;
                        break;
                    }
                    let arg = pool.child(tail, 0);
                    ok = member.args[j].ty.unify(pool, arg, &ids) && ok;
                    tail = pool.child(tail, 1);
                }
                if complete {
                    ok = pool.unify(
                        expr_ty,
                        tail,
                        &TypeErrorMessage::Mismatch { loc: loc.clone() },
                        diag,
                    ) && ok;
                }
                iter = b.next;
            }
            ok
        }
        ExprKind::Prim(p) => {
            let mut args: Vec<TypeRef> = Vec::new();
            let mut iter: Option<&NameBinding> = Some(binding);
            while let Some(b) = iter {
                if !b.open.get() {
                    break;
                }
                match &b.kind {
                    Frame::Lambda { ty, .. } => {
                        match pool.try_child(*ty, 0) {
                            Some(param) => args.push(param),
                            None => break,
                        }
                        iter = b.next;
                    }
                    _ => break,
                }
            }
            args.reverse();
            p.args = args.len();
            match pmap.get(&p.name) {
                None => {
                    diag.error(
                        &loc,
                        &format!("Primitive reference {} is unbound", p.name),
                    );
                    false
                }
                Some(def) => {
                    p.pflags = def.flags;
                    let ok = (def.type_check)(pool, &args, expr_ty);
                    if !ok {
                        diag.error(
                            &loc,
                            &format!(
                                "Primitive reference {} has wrong type signature",
                                p.name
                            ),
                        );
                    }
                    ok
                }
            }
        }
        ExprKind::Subscribe(_)
        | ExprKind::Match(_)
        | ExprKind::DefMap(_)
        | ExprKind::Top(_) => {
            unreachable!("surface form survived resolution")
        }
    }
}
