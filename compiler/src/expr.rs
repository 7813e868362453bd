use crate::intrinsics::{op_precedence, Sum, APP_PRECEDENCE};
use crate::location::Location;
use crate::types::TypeRef;
use fxhash::FxHashMap;
use num_bigint::BigInt;
use std::fmt::{self, Display, Write};

// synthesized during resolution but standing in for surface syntax
pub const FLAG_AST: u8 = 1;
// the evaluator may cache this function's results
pub const FLAG_MEMOIZE: u8 = 2;

#[derive(Debug)]
pub struct Expr {
    pub location: Location,
    pub flags: u8,
    pub ty: TypeRef,
    pub kind: ExprKind,
}

#[derive(Debug)]
pub enum ExprKind {
    VarRef(VarRef),
    Subscribe(String),
    Literal(LitValue),
    Prim(Prim),
    App(Box<Expr>, Box<Expr>),
    Lambda(Lambda),
    Match(MatchExpr),
    DefMap(DefMap),
    Top(Top),
    DefBinding(DefBinding),
    Construct { sum: &'static Sum, cons: usize },
    Destruct { sum: &'static Sum },
}

#[derive(Debug)]
pub struct VarRef {
    pub name: String,
    // lexical coordinates, filled during inference
    pub depth: i32,
    pub offset: i32,
    pub target: Option<Location>,
}

#[derive(Debug)]
pub enum LitValue {
    Integer(BigInt),
    Str(String),
}

#[derive(Debug)]
pub struct Prim {
    pub name: String,
    pub args: usize,
    pub pflags: u8,
}

#[derive(Debug)]
pub struct Lambda {
    pub name: String,
    pub token: Option<Location>,
    pub body: Box<Expr>,
}

#[derive(Debug)]
pub struct MatchExpr {
    pub args: Vec<Expr>,
    pub arms: Vec<MatchArm>,
}

#[derive(Debug)]
pub struct MatchArm {
    pub pattern: PatAst,
    pub guard: Option<Expr>,
    pub body: Expr,
}

// A surface pattern: "_" is a wildcard, a lowercase name binds, a
// capitalized name is a constructor, and the empty name wraps the patterns
// of a multi-scrutinee match.
#[derive(Debug, Clone)]
pub struct PatAst {
    pub name: String,
    pub args: Vec<PatAst>,
    pub location: Location,
}

#[derive(Debug)]
pub struct NamedDef {
    pub name: String,
    pub location: Location,
    pub body: Expr,
}

#[derive(Debug)]
pub struct PubDef {
    pub location: Location,
    pub body: Expr,
}

// One scope of definitions plus its publish contributions. File-level maps
// inside a `Top` carry no body of their own.
#[derive(Debug, Default)]
pub struct DefMap {
    pub defs: Vec<NamedDef>,
    pub pubs: Vec<(String, Vec<PubDef>)>,
    pub body: Option<Box<Expr>>,
}

#[derive(Debug)]
pub struct Top {
    pub files: Vec<DefMap>,
    // name of a global -> index of the file that owns it
    pub globals: FxHashMap<String, usize>,
    pub body: Box<Expr>,
}

#[derive(Debug, Clone)]
pub struct OrderValue {
    pub location: Location,
    pub index: usize,
}

// The resolved form of a scope: values ordered so that each references only
// earlier levels, lambdas grouped into strongly connected components. The
// scc id of a function is the fun-index of the earliest member of its
// component.
#[derive(Debug)]
pub struct DefBinding {
    pub order: FxHashMap<String, OrderValue>,
    pub vals: Vec<Expr>,
    pub funs: Vec<Expr>,
    pub scc: Vec<usize>,
    pub body: Box<Expr>,
}

impl Expr {
    pub fn new(location: Location, kind: ExprKind) -> Expr {
        Expr {
            location,
            flags: 0,
            ty: TypeRef::NONE,
            kind,
        }
    }

    pub fn var(location: Location, name: impl Into<String>) -> Expr {
        Expr::new(
            location,
            ExprKind::VarRef(VarRef {
                name: name.into(),
                depth: -1,
                offset: -1,
                target: None,
            }),
        )
    }

    pub fn app(location: Location, f: Expr, a: Expr) -> Expr {
        Expr::new(location, ExprKind::App(Box::new(f), Box::new(a)))
    }

    pub fn lambda(location: Location, name: impl Into<String>, body: Expr) -> Expr {
        Expr::new(
            location,
            ExprKind::Lambda(Lambda {
                name: name.into(),
                token: None,
                body: Box::new(body),
            }),
        )
    }

    pub fn is_lambda(&self) -> bool {
        matches!(self.kind, ExprKind::Lambda(_))
    }
}

fn pad(f: &mut fmt::Formatter<'_>, indent: usize) -> fmt::Result {
    for _ in 0..indent {
        f.write_str("    ")?;
    }
    Ok(())
}

// operator-aware view of an application spine
fn binary_view(e: &Expr) -> Option<(&str, &Expr, &Expr)> {
    if let ExprKind::App(f, r) = &e.kind {
        if let ExprKind::App(g, l) = &f.kind {
            if let ExprKind::VarRef(v) = &g.kind {
                if let Some(op) = v.name.strip_prefix("binary ") {
                    return Some((op, l, r));
                }
            }
        }
    }
    None
}

fn unary_view(e: &Expr) -> Option<(&str, &Expr)> {
    if let ExprKind::App(f, x) = &e.kind {
        if let ExprKind::VarRef(v) = &f.kind {
            if let Some(op) = v.name.strip_prefix("unary ") {
                return Some((op, x));
            }
        }
    }
    None
}

impl Expr {
    fn fmt_inline(&self, f: &mut fmt::Formatter<'_>, prec: i32) -> fmt::Result {
        match &self.kind {
            ExprKind::VarRef(v) => f.write_str(&v.name),
            ExprKind::Subscribe(n) => write!(f, "subscribe {n}"),
            ExprKind::Literal(LitValue::Integer(i)) => write!(f, "{i}"),
            ExprKind::Literal(LitValue::Str(s)) => write!(f, "{s:?}"),
            ExprKind::Prim(p) => write!(f, "prim {:?}", p.name),
            ExprKind::Construct { sum, cons } => {
                write!(f, "{}", sum.members[*cons].name)
            }
            ExprKind::Destruct { sum } => write!(f, "destruct {}", sum.name),
            ExprKind::Lambda(l) => {
                if prec > 0 {
                    f.write_char('(')?;
                }
                write!(f, "\\{}.", l.name)?;
                l.body.fmt_inline(f, 0)?;
                if prec > 0 {
                    f.write_char(')')?;
                }
                Ok(())
            }
            ExprKind::App(..) => {
                if let Some((op, l, r)) = binary_view(self) {
                    let (p, left) = op_precedence(op);
                    if p < prec {
                        f.write_char('(')?;
                    }
                    l.fmt_inline(f, p + if left { 0 } else { 1 })?;
                    if op == "," {
                        write!(f, "{op} ")?;
                    } else {
                        write!(f, " {op} ")?;
                    }
                    r.fmt_inline(f, p + if left { 1 } else { 0 })?;
                    if p < prec {
                        f.write_char(')')?;
                    }
                    Ok(())
                } else if let Some((op, x)) = unary_view(self) {
                    let (p, _) = op_precedence(op);
                    if p < prec {
                        f.write_char('(')?;
                    }
                    f.write_str(op)?;
                    x.fmt_inline(f, p)?;
                    if p < prec {
                        f.write_char(')')?;
                    }
                    Ok(())
                } else if let ExprKind::App(fn_, arg) = &self.kind {
                    if APP_PRECEDENCE < prec {
                        f.write_char('(')?;
                    }
                    fn_.fmt_inline(f, APP_PRECEDENCE)?;
                    f.write_char(' ')?;
                    arg.fmt_inline(f, APP_PRECEDENCE + 1)?;
                    if APP_PRECEDENCE < prec {
                        f.write_char(')')?;
                    }
                    Ok(())
                } else {
                    unreachable!()
                }
            }
            // block forms fall back to a parenthesized multi-line rendering
            _ => {
                f.write_char('(')?;
                self.fmt_block(f, 1)?;
                f.write_char(')')
            }
        }
    }

    fn fmt_block(&self, f: &mut fmt::Formatter<'_>, indent: usize) -> fmt::Result {
        match &self.kind {
            ExprKind::DefMap(d) => {
                for def in &d.defs {
                    pad(f, indent)?;
                    write!(f, "def {} = ", def.name)?;
                    def.body.fmt_inline(f, 0)?;
                    f.write_char('\n')?;
                }
                for (name, contribs) in &d.pubs {
                    for c in contribs {
                        pad(f, indent)?;
                        write!(f, "publish {name} = ")?;
                        c.body.fmt_inline(f, 0)?;
                        f.write_char('\n')?;
                    }
                }
                if let Some(body) = &d.body {
                    pad(f, indent)?;
                    body.fmt_inline(f, 0)?;
                    f.write_char('\n')?;
                }
                Ok(())
            }
            ExprKind::Top(t) => {
                for file in &t.files {
                    Expr::fmt_defmap(file, f, indent)?;
                }
                pad(f, indent)?;
                t.body.fmt_inline(f, 0)?;
                f.write_char('\n')
            }
            ExprKind::DefBinding(d) => {
                let mut names: Vec<&str> = vec![""; d.vals.len() + d.funs.len()];
                for (name, ov) in &d.order {
                    names[ov.index] = name;
                }
                for (i, v) in d.vals.iter().enumerate() {
                    pad(f, indent)?;
                    write!(f, "def {} = ", names[i])?;
                    v.fmt_inline(f, 0)?;
                    f.write_char('\n')?;
                }
                for (i, v) in d.funs.iter().enumerate() {
                    pad(f, indent)?;
                    write!(f, "def {} = ", names[d.vals.len() + i])?;
                    v.fmt_inline(f, 0)?;
                    f.write_char('\n')?;
                }
                d.body.fmt_block(f, indent)
            }
            ExprKind::Match(m) => {
                pad(f, indent)?;
                f.write_str("match")?;
                for a in &m.args {
                    f.write_char(' ')?;
                    a.fmt_inline(f, APP_PRECEDENCE + 1)?;
                }
                f.write_char('\n')?;
                for arm in &m.arms {
                    pad(f, indent + 1)?;
                    write!(f, "{}", arm.pattern)?;
                    if let Some(g) = &arm.guard {
                        f.write_str(" if ")?;
                        g.fmt_inline(f, 0)?;
                    }
                    f.write_str(" = ")?;
                    arm.body.fmt_inline(f, 0)?;
                    f.write_char('\n')?;
                }
                Ok(())
            }
            _ => {
                pad(f, indent)?;
                self.fmt_inline(f, 0)?;
                f.write_char('\n')
            }
        }
    }

    fn fmt_defmap(d: &DefMap, f: &mut fmt::Formatter<'_>, indent: usize) -> fmt::Result {
        for def in &d.defs {
            pad(f, indent)?;
            write!(f, "def {} = ", def.name)?;
            def.body.fmt_inline(f, 0)?;
            f.write_char('\n')?;
        }
        for (name, contribs) in &d.pubs {
            for c in contribs {
                pad(f, indent)?;
                write!(f, "publish {name} = ")?;
                c.body.fmt_inline(f, 0)?;
                f.write_char('\n')?;
            }
        }
        Ok(())
    }
}

impl Display for Expr {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match &self.kind {
            ExprKind::DefMap(_)
            | ExprKind::Top(_)
            | ExprKind::DefBinding(_)
            | ExprKind::Match(_) => self.fmt_block(f, 0),
            _ => self.fmt_inline(f, 0),
        }
    }
}

impl Display for PatAst {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        if self.args.is_empty() {
            return f.write_str(&self.name);
        }
        f.write_char('(')?;
        f.write_str(&self.name)?;
        for a in &self.args {
            write!(f, " {a}")?;
        }
        f.write_char(')')
    }
}
