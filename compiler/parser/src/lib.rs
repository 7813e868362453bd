pub mod lex;
pub mod parse;

pub use lex::{lex, Span, Token, OPERATOR_CHARS};
pub use parse::{
    parse, render_errors, Arm, Block, Def, Expr, ExprKind, ExprUnit, Item, OpSequenceUnit,
    Pattern, SourceFileAst,
};
