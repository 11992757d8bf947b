use thiserror::Error;

#[derive(Debug, Error, Clone, Copy, PartialEq, Eq)]
#[error("unsupported rotation angle {0}, expected one of 0, 90, 180, 270")]
pub struct InvalidAngle(pub u16);

/// Why a piece of table markup could not be turned into rows of cells.
#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum MarkupError {
    #[error("no table markup")]
    Empty,
    #[error("table markup is missing `{0}`")]
    MissingTag(&'static str),
    #[error("no <table> element found")]
    NoTable,
    #[error("unexpected </{tag}> outside of an open element")]
    Unbalanced { tag: String },
    #[error("<table> is never closed")]
    Unterminated,
    #[error("invalid {attr} value `{value}`")]
    InvalidSpan { attr: &'static str, value: String },
    #[error("table has no cells")]
    NoRows,
    #[error("table spans {rows}x{cols} cells, at most {max} allowed")]
    TooLarge { rows: usize, cols: usize, max: usize },
}

/// Quality gate outcome for a reconstructed table.
#[derive(Debug, Error, Clone, PartialEq)]
pub enum RejectReason {
    #[error("{rows} rows, at least {min} required")]
    TooFewRows { rows: usize, min: usize },
    #[error("{cols} columns, at least {min} required")]
    TooFewCols { cols: usize, min: usize },
    #[error("{ratio:.2} of the cells are empty, at most {max:.2} allowed")]
    TooManyEmpty { ratio: f64, max: f64 },
}

#[derive(Debug, Error)]
pub enum EngineError {
    #[error("{0} engine is not configured")]
    Unavailable(&'static str),
    #[error("{engine} engine call failed")]
    Failed {
        engine: &'static str,
        #[source]
        source: Box<dyn std::error::Error + Send + Sync + 'static>,
    },
    #[error("malformed {engine} engine output: {reason}")]
    MalformedOutput { engine: &'static str, reason: String },
}
