use crate::expr::{Expr, ExprKind, NamedDef, Top};
use crate::location::{FileId, Location};
use crate::types::{TypePool, TypeRef};
use fxhash::FxHashMap;
use once_cell::sync::Lazy;
use std::any::Any;
use std::rc::Rc;
use strum::{EnumIter, IntoEnumIterator};

// A nominal algebraic data type. Sums are compiled in: user code reaches
// them through the injected constructor and destructor definitions.
#[derive(Debug)]
pub struct Sum {
    pub name: &'static str,
    pub args: Vec<&'static str>,
    pub members: Vec<Constructor>,
}

#[derive(Debug)]
pub struct Constructor {
    pub name: &'static str,
    pub args: Vec<CArg>,
    pub index: usize,
}

#[derive(Debug, Clone)]
pub struct CArg {
    pub tag: Option<&'static str>,
    pub ty: TypeAst,
}

#[derive(Debug, Clone)]
pub enum TypeAst {
    Var(&'static str),
    Cons(&'static str, Vec<TypeAst>),
}

impl TypeAst {
    // Unifies this declared argument shape against a live type variable,
    // with `ids` mapping the owning sum's parameters to the instantiated
    // children.
    pub fn unify(
        &self,
        pool: &mut TypePool,
        target: TypeRef,
        ids: &FxHashMap<&'static str, TypeRef>,
    ) -> bool {
        match self {
            TypeAst::Var(v) => match ids.get(v) {
                Some(t) => pool.try_unify(target, *t),
                None => false,
            },
            TypeAst::Cons(name, args) => {
                let children: Vec<TypeRef> = args.iter().map(|_| pool.fresh()).collect();
                let term = pool.term(name, children.clone());
                let mut ok = pool.try_unify(target, term);
                for (ast, child) in args.iter().zip(children) {
                    ok = ast.unify(pool, child, ids) && ok;
                }
                ok
            }
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, EnumIter)]
pub enum IntrinsicSum {
    Boolean,
    Order,
    Unit,
    Pair,
    List,
    Result,
}

impl IntrinsicSum {
    fn decl(self) -> Sum {
        fn cons(index: usize, name: &'static str, args: Vec<CArg>) -> Constructor {
            Constructor { name, args, index }
        }
        fn arg(tag: &'static str, ty: TypeAst) -> CArg {
            CArg {
                tag: Some(tag),
                ty,
            }
        }
        match self {
            IntrinsicSum::Boolean => Sum {
                name: "Boolean",
                args: vec![],
                members: vec![cons(0, "True", vec![]), cons(1, "False", vec![])],
            },
            IntrinsicSum::Order => Sum {
                name: "Order",
                args: vec![],
                members: vec![
                    cons(0, "LT", vec![]),
                    cons(1, "EQ", vec![]),
                    cons(2, "GT", vec![]),
                ],
            },
            IntrinsicSum::Unit => Sum {
                name: "Unit",
                args: vec![],
                members: vec![cons(0, "Unit", vec![])],
            },
            IntrinsicSum::Pair => Sum {
                name: "Pair",
                args: vec!["a", "b"],
                members: vec![cons(
                    0,
                    "Pair",
                    vec![
                        arg("first", TypeAst::Var("a")),
                        arg("second", TypeAst::Var("b")),
                    ],
                )],
            },
            IntrinsicSum::List => Sum {
                name: "List",
                args: vec!["a"],
                members: vec![
                    cons(0, "Nil", vec![]),
                    cons(
                        1,
                        "Cons",
                        vec![
                            arg("head", TypeAst::Var("a")),
                            arg(
                                "tail",
                                TypeAst::Cons("List", vec![TypeAst::Var("a")]),
                            ),
                        ],
                    ),
                ],
            },
            IntrinsicSum::Result => Sum {
                name: "Result",
                args: vec!["p", "f"],
                members: vec![
                    cons(0, "Pass", vec![arg("pass", TypeAst::Var("p"))]),
                    cons(1, "Fail", vec![arg("fail", TypeAst::Var("f"))]),
                ],
            },
        }
    }
}

pub static SUMS: Lazy<Vec<Sum>> =
    Lazy::new(|| IntrinsicSum::iter().map(|s| s.decl()).collect());

pub fn lookup_sum(name: &str) -> Option<&'static Sum> {
    SUMS.iter().find(|s| s.name == name)
}

// Operator precedence is keyed by the operator's first character. The bool
// is true for left associativity. Application is tighter than every binary
// operator except `.`.
pub const APP_PRECEDENCE: i32 = 8;

pub static OP_PRECEDENCE: Lazy<FxHashMap<char, (i32, bool)>> = Lazy::new(|| {
    [
        ('.', (9, true)),
        ('^', (7, false)),
        ('*', (6, true)),
        ('/', (6, true)),
        ('%', (6, true)),
        ('-', (5, true)),
        ('+', (5, true)),
        ('~', (5, true)),
        ('<', (4, true)),
        ('>', (4, true)),
        ('!', (3, true)),
        ('=', (3, true)),
        ('&', (2, true)),
        ('$', (2, true)),
        ('|', (1, true)),
        (',', (0, false)),
    ]
    .iter()
    .copied()
    .collect()
});

pub fn op_precedence(op: &str) -> (i32, bool) {
    match op.chars().next() {
        Some(c) => OP_PRECEDENCE.get(&c).copied().unwrap_or((3, true)),
        None => (3, true),
    }
}

pub const PRIM_PURE: u8 = 1;
pub const PRIM_SHALLOW: u8 = 2;

pub type PrimTypeCheck = fn(&mut TypePool, &[TypeRef], TypeRef) -> bool;

// What the resolver keeps of a registered primitive: the signature check,
// the behavior flags, and an opaque handle the evaluator interprets.
pub struct PrimDef {
    pub flags: u8,
    pub type_check: PrimTypeCheck,
    pub data: Rc<dyn Any>,
}

pub type PrimMap = FxHashMap<String, PrimDef>;

fn t_integer(pool: &mut TypePool) -> TypeRef {
    pool.term("Integer", vec![])
}

fn t_string(pool: &mut TypePool) -> TypeRef {
    pool.term("String", vec![])
}

fn unify_all(pool: &mut TypePool, args: &[TypeRef], shapes: &[TypeRef]) -> bool {
    args.len() == shapes.len()
        && args
            .iter()
            .zip(shapes)
            .all(|(a, s)| pool.try_unify(*a, *s))
}

fn type_int_int_int(pool: &mut TypePool, args: &[TypeRef], out: TypeRef) -> bool {
    let i1 = t_integer(pool);
    let i2 = t_integer(pool);
    let r = t_integer(pool);
    unify_all(pool, args, &[i1, i2]) && pool.try_unify(out, r)
}

fn type_int_int_boolean(pool: &mut TypePool, args: &[TypeRef], out: TypeRef) -> bool {
    let i1 = t_integer(pool);
    let i2 = t_integer(pool);
    let r = pool.term("Boolean", vec![]);
    unify_all(pool, args, &[i1, i2]) && pool.try_unify(out, r)
}

fn type_int_int_order(pool: &mut TypePool, args: &[TypeRef], out: TypeRef) -> bool {
    let i1 = t_integer(pool);
    let i2 = t_integer(pool);
    let r = pool.term("Order", vec![]);
    unify_all(pool, args, &[i1, i2]) && pool.try_unify(out, r)
}

fn type_int_int(pool: &mut TypePool, args: &[TypeRef], out: TypeRef) -> bool {
    let i = t_integer(pool);
    let r = t_integer(pool);
    unify_all(pool, args, &[i]) && pool.try_unify(out, r)
}

fn type_str_str_str(pool: &mut TypePool, args: &[TypeRef], out: TypeRef) -> bool {
    let s1 = t_string(pool);
    let s2 = t_string(pool);
    let r = t_string(pool);
    unify_all(pool, args, &[s1, s2]) && pool.try_unify(out, r)
}

fn type_str_int(pool: &mut TypePool, args: &[TypeRef], out: TypeRef) -> bool {
    let s = t_string(pool);
    let r = t_integer(pool);
    unify_all(pool, args, &[s]) && pool.try_unify(out, r)
}

fn type_int_str(pool: &mut TypePool, args: &[TypeRef], out: TypeRef) -> bool {
    let i = t_integer(pool);
    let r = t_string(pool);
    unify_all(pool, args, &[i]) && pool.try_unify(out, r)
}

fn type_version(pool: &mut TypePool, args: &[TypeRef], out: TypeRef) -> bool {
    let r = t_string(pool);
    args.is_empty() && pool.try_unify(out, r)
}

// Contract of the external source enumerator: a canonical base path and a
// full-match regular expression produce the matching file names.
fn type_enumerate(pool: &mut TypePool, args: &[TypeRef], out: TypeRef) -> bool {
    let s1 = t_string(pool);
    let s2 = t_string(pool);
    let elem = t_string(pool);
    let r = pool.term("List", vec![elem]);
    unify_all(pool, args, &[s1, s2]) && pool.try_unify(out, r)
}

pub fn prim_register_all() -> PrimMap {
    let mut pmap = PrimMap::default();
    let mut reg = |name: &str, flags: u8, type_check: PrimTypeCheck| {
        pmap.insert(
            name.to_string(),
            PrimDef {
                flags,
                type_check,
                data: Rc::new(()),
            },
        );
    };
    reg("add", PRIM_PURE, type_int_int_int);
    reg("sub", PRIM_PURE, type_int_int_int);
    reg("mul", PRIM_PURE, type_int_int_int);
    reg("div", PRIM_PURE, type_int_int_int);
    reg("mod", PRIM_PURE, type_int_int_int);
    reg("neg", PRIM_PURE, type_int_int);
    reg("ilt", PRIM_PURE, type_int_int_boolean);
    reg("ieq", PRIM_PURE, type_int_int_boolean);
    reg("icmp", PRIM_PURE, type_int_int_order);
    reg("cat", PRIM_PURE, type_str_str_str);
    reg("len", PRIM_PURE, type_str_int);
    reg("itos", PRIM_PURE, type_int_str);
    reg("version", PRIM_PURE, type_version);
    reg("sources", PRIM_SHALLOW, type_enumerate);
    reg("files", PRIM_SHALLOW, type_enumerate);
    pmap
}

// Injects one definition per constructor and one destructor per sum into a
// synthetic file, all declared global. A constructor C with n arguments
// becomes n lambdas around a Construct node; `destruct S` takes one
// continuation per member and then the scrutinee.
pub fn inject_builtins(file: FileId, top: &mut Top) {
    let file_index = top.files.len();
    let loc = Location::new(file, 0..0);
    let mut defs: Vec<NamedDef> = Vec::new();
    for sum in SUMS.iter() {
        for (ci, cons) in sum.members.iter().enumerate() {
            let mut body = Expr::new(loc.clone(), ExprKind::Construct { sum, cons: ci });
            for k in (0..cons.args.len()).rev() {
                body = Expr::lambda(loc.clone(), format!("_ v{k}"), body);
            }
            defs.push(NamedDef {
                name: cons.name.to_string(),
                location: loc.clone(),
                body,
            });
            top.globals.insert(cons.name.to_string(), file_index);
        }
        let mut body = Expr::new(loc.clone(), ExprKind::Destruct { sum });
        body = Expr::lambda(loc.clone(), "_ x".to_string(), body);
        for c in (0..sum.members.len()).rev() {
            body = Expr::lambda(loc.clone(), format!("_ c{c}"), body);
        }
        let name = format!("destruct {}", sum.name);
        defs.push(NamedDef {
            name: name.clone(),
            location: loc.clone(),
            body,
        });
        top.globals.insert(name, file_index);
    }
    top.files.push(crate::expr::DefMap {
        defs,
        pubs: Vec::new(),
        body: None,
    });
}
