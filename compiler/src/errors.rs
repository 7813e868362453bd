use crate::location::{FileId, Location};
use ariadne::{Label, Report, ReportKind, Source};

// Tagged unification call sites. The formatter dispatches on the variant
// instead of carrying a formatting closure through every unify call.
#[derive(Debug, Clone)]
pub enum TypeErrorMessage {
    NotFunction {
        fn_loc: Location,
    },
    BadArgument {
        fn_loc: Location,
        arg_loc: Location,
        arg: Option<String>,
    },
    RecursiveReturn {
        body_loc: Location,
    },
    Mismatch {
        loc: Location,
    },
}

// The single sink every pass reports through. It owns the loaded sources,
// renders each report immediately into an append-only buffer, and latches
// the global ok flag on the first error.
pub struct Diagnostics {
    files: Vec<(String, String)>,
    buf: Vec<u8>,
    ok: bool,
}

impl Diagnostics {
    pub fn new() -> Diagnostics {
        Diagnostics {
            files: Vec::new(),
            buf: Vec::new(),
            ok: true,
        }
    }

    pub fn add_file(&mut self, name: String, source: String) -> FileId {
        self.files.push((name, source));
        self.files.len() - 1
    }

    pub fn file_name(&self, file: FileId) -> &str {
        &self.files[file].0
    }

    pub fn source(&self, file: FileId) -> &str {
        &self.files[file].1
    }

    pub fn ok(&self) -> bool {
        self.ok
    }

    pub fn set_fail(&mut self) {
        self.ok = false;
    }

    // 1-based row and column of a character offset.
    pub fn row_col(&self, file: FileId, offset: usize) -> (usize, usize) {
        let src = self.source(file);
        let mut row = 1;
        let mut col = 1;
        for (i, c) in src.chars().enumerate() {
            if i >= offset {
                break;
            }
            if c == '\n' {
                row += 1;
                col = 1;
            } else {
                col += 1;
            }
        }
        (row, col)
    }

    pub fn location_string(&self, loc: &Location) -> String {
        let (row, col) = self.row_col(loc.file, loc.span.start);
        format!("{}:{}:{}", self.file_name(loc.file), row, col)
    }

    pub fn error(&mut self, loc: &Location, msg: &str) {
        self.ok = false;
        let (name, src) = self.files[loc.file].clone();
        let report = Report::build(ReportKind::Error, name.as_str(), loc.span.start)
            .with_message(msg)
            .with_label(Label::new((name.as_str(), loc.span.clone())).with_message(msg))
            .finish();
        let _ = report.write((name.as_str(), Source::from(&src)), &mut self.buf);
    }

    // Plain-text reporting for diagnostics that span files, like value
    // definition cycles.
    pub fn error_plain(&mut self, msg: &str) {
        self.ok = false;
        self.buf.extend_from_slice(msg.as_bytes());
        self.buf.push(b'\n');
    }

    pub fn note_plain(&mut self, msg: &str) {
        self.buf.extend_from_slice(msg.as_bytes());
        self.buf.push(b'\n');
    }

    pub fn type_error(&mut self, msg: &TypeErrorMessage, type_a: &str, type_b: &str) {
        match msg {
            TypeErrorMessage::NotFunction { fn_loc } => {
                let m = format!(
                    "Type error; expression has type {type_a} but is used as a function \
                     and must have function type {type_b}"
                );
                self.error(fn_loc, &m);
            }
            TypeErrorMessage::BadArgument {
                fn_loc,
                arg_loc,
                arg,
            } => {
                let named = match arg {
                    Some(a) if !a.is_empty() && !a.contains(' ') && a != "_" => {
                        format!(" '{a}'")
                    }
                    _ => String::new(),
                };
                let m = format!(
                    "Type error; function expected argument{named} of type {type_a} \
                     but was supplied argument of type {type_b}"
                );
                if fn_loc.file == arg_loc.file {
                    self.ok = false;
                    let (name, src) = self.files[fn_loc.file].clone();
                    let report =
                        Report::build(ReportKind::Error, name.as_str(), fn_loc.span.start)
                            .with_message(&m)
                            .with_label(
                                Label::new((name.as_str(), fn_loc.span.clone()))
                                    .with_message(format!("expects{named} {type_a}")),
                            )
                            .with_label(
                                Label::new((name.as_str(), arg_loc.span.clone()))
                                    .with_message(format!("this has type {type_b}")),
                            )
                            .finish();
                    let _ = report.write((name.as_str(), Source::from(&src)), &mut self.buf);
                } else {
                    self.error(fn_loc, &m);
                }
            }
            TypeErrorMessage::RecursiveReturn { body_loc } => {
                let m = format!(
                    "Type error; recursive use requires return type {type_a} \
                     but the function body actually returns type {type_b}"
                );
                self.error(body_loc, &m);
            }
            TypeErrorMessage::Mismatch { loc } => {
                let m = format!("Type error; {type_a} does not match {type_b}");
                self.error(loc, &m);
            }
        }
    }

    pub fn buffer_mut(&mut self) -> &mut Vec<u8> {
        &mut self.buf
    }

    pub fn take_output(&mut self) -> String {
        String::from_utf8_lossy(&std::mem::take(&mut self.buf)).into_owned()
    }
}

impl Default for Diagnostics {
    fn default() -> Self {
        Self::new()
    }
}
