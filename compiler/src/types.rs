use crate::errors::{Diagnostics, TypeErrorMessage};
use fxhash::FxHashMap;

// The function type constructor. It carries an operator spelling so types
// print infix, the same way operator-named values do.
pub const FN: &str = "binary =>";

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct TypeRef(u32);

impl TypeRef {
    pub const NONE: TypeRef = TypeRef(u32::MAX);

    pub fn is_none(self) -> bool {
        self == TypeRef::NONE
    }

    fn idx(self) -> usize {
        self.0 as usize
    }
}

#[derive(Debug)]
enum Node {
    Free {
        dob: u32,
    },
    Link(TypeRef),
    Term {
        name: String,
        args: Vec<TypeRef>,
        tags: Vec<Option<String>>,
        dob: u32,
    },
}

// Union-find arena for type variables. A "pointer" from a variable to its
// representative is an index; path compression rewrites the arena in place.
// DOB is the generation tag bounding let-generalization: a variable is
// cloned fresh at a use site iff it was born during the referent's own
// inference.
pub struct TypePool {
    nodes: Vec<Node>,
    epoch: u32,
}

fn effective(dob: u32) -> u32 {
    if dob == 0 {
        u32::MAX
    } else {
        dob
    }
}

impl TypePool {
    pub fn new() -> TypePool {
        TypePool {
            nodes: Vec::new(),
            epoch: 0,
        }
    }

    pub fn fresh(&mut self) -> TypeRef {
        self.nodes.push(Node::Free { dob: 0 });
        TypeRef(self.nodes.len() as u32 - 1)
    }

    pub fn term(&mut self, name: &str, args: Vec<TypeRef>) -> TypeRef {
        let tags = vec![None; args.len()];
        self.nodes.push(Node::Term {
            name: name.to_string(),
            args,
            tags,
            dob: 0,
        });
        TypeRef(self.nodes.len() as u32 - 1)
    }

    pub fn fn2(&mut self) -> TypeRef {
        let a = self.fresh();
        let b = self.fresh();
        self.term(FN, vec![a, b])
    }

    // Non-compressing resolution, usable from &self (formatting).
    fn resolve(&self, mut t: TypeRef) -> TypeRef {
        while let Node::Link(next) = self.nodes[t.idx()] {
            t = next;
        }
        t
    }

    pub fn find(&mut self, t: TypeRef) -> TypeRef {
        let root = self.resolve(t);
        let mut cur = t;
        while let Node::Link(next) = self.nodes[cur.idx()] {
            self.nodes[cur.idx()] = Node::Link(root);
            cur = next;
        }
        root
    }

    fn dob_of(&self, t: TypeRef) -> u32 {
        match &self.nodes[self.resolve(t).idx()] {
            Node::Free { dob } => *dob,
            Node::Term { dob, .. } => *dob,
            Node::Link(_) => unreachable!(),
        }
    }

    fn set_dob_raw(&mut self, t: TypeRef, dob: u32) {
        let r = self.find(t);
        match &mut self.nodes[r.idx()] {
            Node::Free { dob: d } => *d = dob,
            Node::Term { dob: d, .. } => *d = dob,
            Node::Link(_) => unreachable!(),
        }
    }

    // Marks a node's date of birth on first visit.
    pub fn set_dob(&mut self, t: TypeRef) {
        if self.dob_of(t) == 0 {
            self.epoch += 1;
            self.set_dob_raw(t, self.epoch);
        }
    }

    // Co-dates a node with another, for members of one recursive group.
    pub fn set_dob_from(&mut self, t: TypeRef, other: TypeRef) {
        if self.dob_of(t) == 0 {
            let dob = self.dob_of(other);
            self.set_dob_raw(t, dob);
        }
    }

    pub fn child(&mut self, t: TypeRef, i: usize) -> TypeRef {
        let r = self.find(t);
        match &self.nodes[r.idx()] {
            Node::Term { args, .. } => args[i],
            _ => panic!("child() on a non-term type"),
        }
    }

    pub fn try_child(&mut self, t: TypeRef, i: usize) -> Option<TypeRef> {
        let r = self.find(t);
        match &self.nodes[r.idx()] {
            Node::Term { args, .. } => args.get(i).copied(),
            _ => None,
        }
    }

    pub fn set_tag(&mut self, t: TypeRef, i: usize, tag: &str) {
        let r = self.find(t);
        if let Node::Term { tags, .. } = &mut self.nodes[r.idx()] {
            tags[i] = Some(tag.to_string());
        }
    }

    pub fn tag(&self, t: TypeRef, i: usize) -> Option<String> {
        let r = self.resolve(t);
        match &self.nodes[r.idx()] {
            Node::Term { tags, .. } => tags.get(i).cloned().flatten(),
            _ => None,
        }
    }

    fn occurs(&self, var: TypeRef, t: TypeRef) -> bool {
        let r = self.resolve(t);
        if r == var {
            return true;
        }
        match &self.nodes[r.idx()] {
            Node::Term { args, .. } => args.iter().any(|a| self.occurs(var, *a)),
            _ => false,
        }
    }

    // Binding a variable of generation `dob` captures everything inside the
    // bound term: younger variables and terms must have their generation
    // lowered so later generalization does not clone them fresh.
    fn lower_dob(&mut self, t: TypeRef, dob: u32) {
        if dob == 0 {
            return;
        }
        let r = self.find(t);
        let (cur, children) = match &self.nodes[r.idx()] {
            Node::Free { dob: d } => (*d, Vec::new()),
            Node::Term { dob: d, args, .. } => (*d, args.clone()),
            Node::Link(_) => unreachable!(),
        };
        if effective(cur) > dob {
            self.set_dob_raw(r, dob);
        }
        for c in children {
            self.lower_dob(c, dob);
        }
    }

    fn unify_inner(&mut self, a: TypeRef, b: TypeRef) -> bool {
        let ra = self.find(a);
        let rb = self.find(b);
        if ra == rb {
            return true;
        }
        let a_free = matches!(self.nodes[ra.idx()], Node::Free { .. });
        let b_free = matches!(self.nodes[rb.idx()], Node::Free { .. });
        match (a_free, b_free) {
            (true, true) => {
                let da = self.dob_of(ra);
                let db = self.dob_of(rb);
                let (winner, loser) = if effective(da) <= effective(db) {
                    (ra, rb)
                } else {
                    (rb, ra)
                };
                self.nodes[loser.idx()] = Node::Link(winner);
                true
            }
            (true, false) | (false, true) => {
                let (var, term) = if a_free { (ra, rb) } else { (rb, ra) };
                if self.occurs(var, term) {
                    return false;
                }
                let dob = self.dob_of(var);
                self.lower_dob(term, dob);
                self.nodes[var.idx()] = Node::Link(term);
                true
            }
            (false, false) => {
                let (na, aa, da) = match &self.nodes[ra.idx()] {
                    Node::Term {
                        name, args, dob, ..
                    } => (name.clone(), args.clone(), *dob),
                    _ => unreachable!(),
                };
                let (nb, ab, db) = match &self.nodes[rb.idx()] {
                    Node::Term {
                        name, args, dob, ..
                    } => (name.clone(), args.clone(), *dob),
                    _ => unreachable!(),
                };
                if na != nb || aa.len() != ab.len() {
                    return false;
                }
                // merge argument tags onto the surviving representative
                for i in 0..aa.len() {
                    if self.tag(ra, i).is_none() {
                        if let Some(t) = self.tag(rb, i) {
                            self.set_tag(ra, i, &t);
                        }
                    }
                }
                if effective(db) < effective(da) {
                    self.set_dob_raw(ra, db);
                }
                self.nodes[rb.idx()] = Node::Link(ra);
                let mut ok = true;
                for (ca, cb) in aa.into_iter().zip(ab) {
                    ok = self.unify_inner(ca, cb) && ok;
                }
                ok
            }
        }
    }

    pub fn try_unify(&mut self, a: TypeRef, b: TypeRef) -> bool {
        self.unify_inner(a, b)
    }

    pub fn unify(
        &mut self,
        a: TypeRef,
        b: TypeRef,
        msg: &TypeErrorMessage,
        diag: &mut Diagnostics,
    ) -> bool {
        if self.unify_inner(a, b) {
            true
        } else {
            let ta = self.format(a);
            let tb = self.format(b);
            diag.type_error(msg, &ta, &tb);
            false
        }
    }

    // Clones the structure of a generalized binding's type. Variables born
    // during that binding's inference (DOB at or past the root's) come out
    // fresh; older variables stay shared.
    pub fn clone_type(&mut self, t: TypeRef) -> TypeRef {
        let cutoff = effective(self.dob_of(t));
        let mut memo: FxHashMap<TypeRef, TypeRef> = FxHashMap::default();
        self.clone_rec(t, cutoff, &mut memo)
    }

    fn clone_rec(
        &mut self,
        t: TypeRef,
        cutoff: u32,
        memo: &mut FxHashMap<TypeRef, TypeRef>,
    ) -> TypeRef {
        let r = self.find(t);
        if let Some(&c) = memo.get(&r) {
            return c;
        }
        let out = match &self.nodes[r.idx()] {
            Node::Free { dob } => {
                if effective(*dob) >= cutoff {
                    let f = self.fresh();
                    memo.insert(r, f);
                    f
                } else {
                    r
                }
            }
            Node::Term {
                name, args, tags, ..
            } => {
                let name = name.clone();
                let args = args.clone();
                let tags = tags.clone();
                let new_args: Vec<TypeRef> = args
                    .into_iter()
                    .map(|a| self.clone_rec(a, cutoff, memo))
                    .collect();
                let c = self.term(&name, new_args);
                if let Node::Term { tags: nt, .. } = &mut self.nodes[c.idx()] {
                    *nt = tags;
                }
                memo.insert(r, c);
                c
            }
            Node::Link(_) => unreachable!(),
        };
        out
    }

    pub fn format(&self, t: TypeRef) -> String {
        let mut names: FxHashMap<TypeRef, String> = FxHashMap::default();
        let mut out = String::new();
        self.format_rec(t, 0, &mut names, &mut out);
        out
    }

    // prec 0: top level, 1: function argument side, 2: constructor argument
    fn format_rec(
        &self,
        t: TypeRef,
        prec: u8,
        names: &mut FxHashMap<TypeRef, String>,
        out: &mut String,
    ) {
        let r = self.resolve(t);
        match &self.nodes[r.idx()] {
            Node::Free { .. } => {
                let n = names.len();
                let name = names.entry(r).or_insert_with(|| {
                    let mut s = String::new();
                    let mut n = n;
                    loop {
                        s.insert(0, (b'a' + (n % 26) as u8) as char);
                        if n < 26 {
                            break;
                        }
                        n = n / 26 - 1;
                    }
                    s
                });
                out.push_str(name);
            }
            Node::Term { name, args, .. } => {
                if name == FN && args.len() == 2 {
                    if prec > 0 {
                        out.push('(');
                    }
                    self.format_rec(args[0], 1, names, out);
                    out.push_str(" => ");
                    self.format_rec(args[1], 0, names, out);
                    if prec > 0 {
                        out.push(')');
                    }
                } else {
                    if prec == 2 && !args.is_empty() {
                        out.push('(');
                    }
                    out.push_str(name);
                    for a in args {
                        out.push(' ');
                        self.format_rec(*a, 2, names, out);
                    }
                    if prec == 2 && !args.is_empty() {
                        out.push(')');
                    }
                }
            }
            Node::Link(_) => unreachable!(),
        }
    }
}

impl Default for TypePool {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::errors::Diagnostics;
    use crate::location::Location;

    fn int(pool: &mut TypePool) -> TypeRef {
        pool.term("Integer", vec![])
    }

    #[test]
    fn unify_binds_variables_both_ways() {
        let mut pool = TypePool::new();
        let v = pool.fresh();
        let i = int(&mut pool);
        assert!(pool.try_unify(v, i));
        assert_eq!(pool.format(v), "Integer");
        let w = pool.fresh();
        assert!(pool.try_unify(i, w));
        assert_eq!(pool.format(w), "Integer");
    }

    #[test]
    fn mismatched_terms_fail() {
        let mut pool = TypePool::new();
        let i = int(&mut pool);
        let s = pool.term("String", vec![]);
        assert!(!pool.try_unify(i, s));
    }

    #[test]
    fn occurs_check_rejects_infinite_types() {
        let mut pool = TypePool::new();
        let v = pool.fresh();
        let f = pool.term(FN, vec![v, v]);
        assert!(!pool.try_unify(v, f));
    }

    #[test]
    fn function_types_print_infix() {
        let mut pool = TypePool::new();
        let a = pool.fresh();
        let b = pool.fresh();
        let inner = pool.term(FN, vec![a, b]);
        let c = pool.fresh();
        let outer = pool.term(FN, vec![inner, c]);
        assert_eq!(pool.format(outer), "(a => b) => c");
    }

    #[test]
    fn constructor_arguments_parenthesize() {
        let mut pool = TypePool::new();
        let a = pool.fresh();
        let la = pool.term("List", vec![a]);
        let lla = pool.term("List", vec![la]);
        assert_eq!(pool.format(lla), "List (List a)");
    }

    #[test]
    fn generalization_clones_only_young_variables() {
        let mut pool = TypePool::new();
        let old = pool.fresh();
        pool.set_dob(old);
        let root = pool.fresh();
        pool.set_dob(root);
        let young = pool.fresh();
        pool.set_dob(young);
        let t = pool.term(FN, vec![old, young]);
        assert!(pool.try_unify(root, t));
        let c = pool.clone_type(root);
        // the old variable is shared, the young one is fresh
        let old2 = pool.child(c, 0);
        let young2 = pool.child(c, 1);
        assert_eq!(pool.find(old2), pool.find(old));
        assert_ne!(pool.find(young2), pool.find(young));
    }

    #[test]
    fn failed_unify_reports_both_types() {
        let mut pool = TypePool::new();
        let mut diag = Diagnostics::new();
        let file = diag.add_file("t".to_string(), "x\n".to_string());
        let loc = Location::new(file, 0..1);
        let i = int(&mut pool);
        let s = pool.term("String", vec![]);
        let ok = pool.unify(i, s, &TypeErrorMessage::Mismatch { loc }, &mut diag);
        assert!(!ok);
        assert!(!diag.ok());
        let out = diag.take_output();
        assert!(out.contains("Integer"), "missing type in {out}");
        assert!(out.contains("String"), "missing type in {out}");
    }
}
