use chumsky::prelude::*;
use num_bigint::BigInt;
use std::fmt::Display;

#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub enum Token {
    Ident(String),
    Op(String),
    Int(BigInt),
    Str(String),
    Def,
    Global,
    Publish,
    Subscribe,
    Prim,
    Match,
    If,
    Then,
    Else,
    Here,
    Memoize,
    Assign,
    OpenParen,
    CloseParen,
    Lambda,
    Eol,
    Indent,
    Dedent,
    End,
    Error(String),
}

impl Display for Token {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Token::Ident(s) => write!(f, "{s}"),
            Token::Op(s) => write!(f, "{s}"),
            Token::Int(i) => write!(f, "{i}"),
            Token::Str(s) => write!(f, "{s:?}"),
            Token::Def => write!(f, "def"),
            Token::Global => write!(f, "global"),
            Token::Publish => write!(f, "publish"),
            Token::Subscribe => write!(f, "subscribe"),
            Token::Prim => write!(f, "prim"),
            Token::Match => write!(f, "match"),
            Token::If => write!(f, "if"),
            Token::Then => write!(f, "then"),
            Token::Else => write!(f, "else"),
            Token::Here => write!(f, "here"),
            Token::Memoize => write!(f, "memoize"),
            Token::Assign => write!(f, "="),
            Token::OpenParen => write!(f, "("),
            Token::CloseParen => write!(f, ")"),
            Token::Lambda => write!(f, "\\"),
            Token::Eol => write!(f, "end of line"),
            Token::Indent => write!(f, "indent"),
            Token::Dedent => write!(f, "dedent"),
            Token::End => write!(f, "end of file"),
            Token::Error(_) => write!(f, "lex error"),
        }
    }
}

pub type Span = std::ops::Range<usize>;

pub const OPERATOR_CHARS: &str = ".$^*/%-+~<>=!&|,";

fn int_token(digits: &str, radix: u32) -> Token {
    let cleaned: String = digits.chars().filter(|c| *c != '_').collect();
    if cleaned.is_empty() {
        return Token::Error("integer literal has no digits".to_string());
    }
    match BigInt::parse_bytes(cleaned.as_bytes(), radix) {
        Some(i) => Token::Int(i),
        None => Token::Error("malformed integer literal".to_string()),
    }
}

// Decodes the raw body of a quoted literal. Escapes operate at the byte
// level, so the result must re-validate as UTF-8.
fn decode_literal(raw: &str) -> Token {
    let mut bytes: Vec<u8> = Vec::with_capacity(raw.len());
    let mut chars = raw.chars().peekable();
    while let Some(c) = chars.next() {
        if c != '\\' {
            let mut buf = [0u8; 4];
            bytes.extend_from_slice(c.encode_utf8(&mut buf).as_bytes());
            continue;
        }
        let e = match chars.next() {
            Some(e) => e,
            None => return Token::Error("dangling escape in literal".to_string()),
        };
        match e {
            'a' => bytes.push(0x07),
            'b' => bytes.push(0x08),
            'f' => bytes.push(0x0c),
            'n' => bytes.push(b'\n'),
            'r' => bytes.push(b'\r'),
            't' => bytes.push(b'\t'),
            'v' => bytes.push(0x0b),
            '\\' => bytes.push(b'\\'),
            '\'' => bytes.push(b'\''),
            '"' => bytes.push(b'"'),
            '?' => bytes.push(b'?'),
            '0'..='7' => {
                let mut v = e.to_digit(8).unwrap();
                for _ in 0..2 {
                    match chars.peek().and_then(|c| c.to_digit(8)) {
                        Some(d) => {
                            chars.next();
                            v = v * 8 + d;
                        }
                        None => break,
                    }
                }
                if v > 0xff {
                    return Token::Error("octal escape out of range".to_string());
                }
                bytes.push(v as u8);
            }
            'x' | 'u' | 'U' => {
                let want = match e {
                    'x' => 2,
                    'u' => 4,
                    _ => 8,
                };
                let mut v: u32 = 0;
                for _ in 0..want {
                    match chars.next().and_then(|c| c.to_digit(16)) {
                        Some(d) => v = v * 16 + d,
                        None => {
                            return Token::Error(format!("malformed \\{e} escape in literal"));
                        }
                    }
                }
                if e == 'x' {
                    bytes.push(v as u8);
                } else {
                    match char::from_u32(v) {
                        Some(c) => {
                            let mut buf = [0u8; 4];
                            bytes.extend_from_slice(c.encode_utf8(&mut buf).as_bytes());
                        }
                        None => {
                            return Token::Error("unicode escape out of range".to_string());
                        }
                    }
                }
            }
            other => {
                return Token::Error(format!("unknown escape \\{other} in literal"));
            }
        }
    }
    match String::from_utf8(bytes) {
        Ok(s) => Token::Str(s),
        Err(_) => Token::Error("literal does not decode to valid UTF-8".to_string()),
    }
}

type Line = ((usize, Span), Vec<(Token, Span)>);

fn char_lexer() -> impl Parser<char, Vec<Line>, Error = Simple<char>> {
    let line_ws = filter(|c: &char| *c == ' ' || *c == '\t');

    let hex = just("0x")
        .ignore_then(
            filter(|c: &char| c.is_ascii_hexdigit() || *c == '_')
                .repeated()
                .collect::<String>(),
        )
        .map(|s| int_token(&s, 16));
    let bin = just("0b")
        .ignore_then(
            filter(|c: &char| matches!(c, '0' | '1' | '_'))
                .repeated()
                .collect::<String>(),
        )
        .map(|s| int_token(&s, 2));
    let dec = filter(|c: &char| c.is_ascii_digit())
        .chain(filter(|c: &char| c.is_ascii_digit() || *c == '_').repeated())
        .collect::<String>()
        .map(|s| int_token(&s, 10));
    let int = hex.or(bin).or(dec);

    let escape = just('\\').chain(filter(|c: &char| *c != '\n' && *c != '\r'));
    let literal = |delim: char| {
        just(delim)
            .ignore_then(
                escape
                    .clone()
                    .or(filter(move |c: &char| {
                        *c != delim && *c != '\\' && *c != '\n' && *c != '\r'
                    })
                    .map(|c| vec![c]))
                    .repeated()
                    .flatten()
                    .collect::<String>(),
            )
            .then_ignore(just(delim))
            .map(|raw| decode_literal(&raw))
    };

    let ident = text::ident().map(|i: String| match i.as_str() {
        "def" => Token::Def,
        "global" => Token::Global,
        "publish" => Token::Publish,
        "subscribe" => Token::Subscribe,
        "prim" => Token::Prim,
        "match" => Token::Match,
        "if" => Token::If,
        "then" => Token::Then,
        "else" => Token::Else,
        "here" => Token::Here,
        "memoize" => Token::Memoize,
        _ => Token::Ident(i),
    });

    let op = filter(|c: &char| OPERATOR_CHARS.contains(*c))
        .repeated()
        .at_least(1)
        .collect::<String>()
        .map(|op| match op.as_str() {
            "=" => Token::Assign,
            _ => Token::Op(op),
        });

    let punct = just('(')
        .to(Token::OpenParen)
        .or(just(')').to(Token::CloseParen))
        .or(just('\\').to(Token::Lambda));

    let unknown = filter(|c: &char| !matches!(c, '\n' | '\r' | '#'))
        .map(|c| Token::Error(format!("invalid character {c:?}")));

    let token = int
        .or(literal('"'))
        .or(literal('\''))
        .or(ident)
        .or(op)
        .or(punct)
        .or(unknown);

    let comment = just('#')
        .then(filter(|c: &char| *c != '\n' && *c != '\r').repeated())
        .ignored();

    let tt = line_ws
        .clone()
        .repeated()
        .ignore_then(token.map_with_span(|tok, span| (tok, span)));
    let line = tt
        .repeated()
        .then_ignore(line_ws.clone().repeated())
        .then_ignore(comment.or_not());

    line_ws
        .repeated()
        .map_with_span(|ws, span: Span| (ws.len(), span))
        .then(line)
        .separated_by(text::newline())
        .then_ignore(end())
}

// Turns raw per-line token runs into a stream with explicit layout markers.
// The indentation stack starts at [0]; deeper lines push and emit `Indent`,
// shallower lines pop and emit `Dedent`, lines at an equal depth are
// separated by `Eol`. A depth landing strictly between two stack entries is
// a lex error. Blank and comment-only lines never carry tokens, so they are
// swallowed here.
fn layout(lines: Vec<Line>, src_len: usize) -> Vec<(Token, Span)> {
    let mut out: Vec<(Token, Span)> = Vec::new();
    let mut stack: Vec<usize> = vec![0];
    let mut first = true;
    for ((indent, ispan), mut line) in lines {
        if line.is_empty() {
            continue;
        }
        let top = *stack.last().unwrap();
        if indent > top {
            out.push((Token::Indent, ispan.clone()));
            stack.push(indent);
        } else {
            while indent < *stack.last().unwrap() {
                stack.pop();
                out.push((Token::Dedent, ispan.clone()));
            }
            if indent > *stack.last().unwrap() {
                out.push((
                    Token::Error("indentation does not match any enclosing block".to_string()),
                    ispan.clone(),
                ));
            } else if !first {
                out.push((Token::Eol, ispan.clone()));
            }
        }
        first = false;
        out.append(&mut line);
    }
    let eof = src_len.saturating_sub(1)..src_len;
    while stack.len() > 1 {
        stack.pop();
        out.push((Token::Dedent, eof.clone()));
    }
    out.push((Token::End, eof));
    out
}

pub fn lex(src: &str) -> (Vec<(Token, Span)>, usize) {
    let len = src.chars().count();
    let (lines, errs) = char_lexer().parse_recovery(src);
    let mut tokens = match lines {
        Some(lines) => layout(lines, len),
        None => vec![(Token::End, len.saturating_sub(1)..len)],
    };
    for e in errs {
        tokens.push((Token::Error("unreadable input".to_string()), e.span()));
    }
    (tokens, len)
}

#[cfg(test)]
mod tests {
    use super::*;

    fn kinds(src: &str) -> Vec<Token> {
        lex(src).0.into_iter().map(|(t, _)| t).collect()
    }

    #[test]
    fn layout_markers() {
        use Token::*;
        assert_eq!(
            kinds("def a =\n    1\ndef b = 2\n"),
            vec![
                Def,
                Ident("a".to_string()),
                Assign,
                Indent,
                Int(1.into()),
                Dedent,
                Eol,
                Def,
                Ident("b".to_string()),
                Assign,
                Int(2.into()),
                End,
            ]
        );
    }

    #[test]
    fn blank_and_comment_lines_are_swallowed() {
        use Token::*;
        assert_eq!(
            kinds("def a = 1\n\n# note\ndef b = 2"),
            vec![
                Def,
                Ident("a".to_string()),
                Assign,
                Int(1.into()),
                Eol,
                Def,
                Ident("b".to_string()),
                Assign,
                Int(2.into()),
                End,
            ]
        );
    }

    #[test]
    fn indent_between_levels_is_an_error() {
        let toks = kinds("def a =\n        1\n    2\n");
        assert!(toks
            .iter()
            .any(|t| matches!(t, Token::Error(m) if m.contains("indentation"))));
    }

    #[test]
    fn integer_radixes_and_separators() {
        use Token::*;
        assert_eq!(
            kinds("1_000 0xff_ff 0b1010"),
            vec![Int(1000.into()), Int(0xffff.into()), Int(10.into()), End]
        );
    }

    #[test]
    fn string_escapes_decode() {
        assert_eq!(
            kinds("\"a\\tb\\x41\\u00e9\""),
            vec![Token::Str("a\tbA\u{e9}".to_string()), Token::End]
        );
        assert_eq!(kinds("'c'"), vec![Token::Str("c".to_string()), Token::End]);
    }

    #[test]
    fn invalid_utf8_escape_is_an_error() {
        let toks = kinds("\"\\xff\"");
        assert!(matches!(&toks[0], Token::Error(m) if m.contains("UTF-8")));
    }

    #[test]
    fn reserved_characters_lex_as_errors() {
        for src in ["@", "{", "[", ":", ";", "`"] {
            let toks = kinds(src);
            assert!(
                matches!(&toks[0], Token::Error(_)),
                "expected error for {src:?}"
            );
        }
    }

    #[test]
    fn lone_equals_is_assign_and_runs_are_operators() {
        use Token::*;
        assert_eq!(
            kinds("a = b == c"),
            vec![
                Ident("a".to_string()),
                Assign,
                Ident("b".to_string()),
                Op("==".to_string()),
                Ident("c".to_string()),
                End,
            ]
        );
    }
}
