use parser::Span;

pub type FileId = usize;

// A file handle plus the character range the construct occupies. Row and
// column rendering lives with the diagnostic sink, which owns the sources.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Location {
    pub file: FileId,
    pub span: Span,
}

impl Location {
    pub fn new(file: FileId, span: Span) -> Location {
        Location { file, span }
    }
}
