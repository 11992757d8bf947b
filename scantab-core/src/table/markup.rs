//! HTML table markup to rows of [`Cell`]s.
//!
//! Two parsers share one tag tokenizer. [`parse_structured`] follows the HTML table model
//! (implied end tags, implied rows, span attributes parsed as non-negative integers) and
//! refuses markup whose structure doesn't nest. [`parse_lenient`] is a flat state machine
//! that only keeps cells and rows that are explicitly closed; it is the fallback when the
//! structured parser gives up.

use std::borrow::Cow;

use lazy_static::lazy_static;
use regex::Regex;

use crate::{entities::Cell, error::MarkupError};

pub type CellRows = Vec<Vec<Cell>>;

const MAX_COLSPAN: usize = 1000;
const MAX_ROWSPAN: usize = 65534;

lazy_static! {
    static ref COMMENT_RE: Regex = Regex::new(r"(?s)<!--.*?-->").unwrap();
    static ref TAG_RE: Regex =
        Regex::new(r#"<(/?)([a-zA-Z][a-zA-Z0-9]*)((?:[^>"']|"[^"]*"|'[^']*')*)>"#).unwrap();
    static ref SPAN_ATTR_RE: Regex = Regex::new(
        r#"(?i)\b(rowspan|colspan)\s*=\s*(?:"([^"]*)"|'([^']*)'|([^\s"'>/]+))"#
    )
    .unwrap();
}

const REQUIRED_TAGS: [&str; 4] = ["<table", "</table>", "<tr", "</tr>"];

/// Checks that the markup contains the tags of at least one table row.
pub fn check_required_tags(markup: &str) -> Result<(), MarkupError> {
    if markup.trim().is_empty() {
        return Err(MarkupError::Empty);
    }
    let lowered = markup.to_ascii_lowercase();
    match REQUIRED_TAGS.iter().find(|tag| !lowered.contains(**tag)) {
        Some(tag) => Err(MarkupError::MissingTag(*tag)),
        None => Ok(()),
    }
}

/// Rows of the first table in `markup`, falling back to the lenient parser when the
/// structured one fails.
pub fn parse_table_rows(markup: &str) -> Result<CellRows, MarkupError> {
    match parse_structured(markup) {
        Ok(rows) => Ok(rows),
        Err(e) => {
            tracing::debug!("structured table parsing failed ({e}), using fallback parser");
            parse_lenient(markup)
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
enum Token<'a> {
    Open { name: String, attrs: &'a str },
    Close { name: String },
    Text(&'a str),
}

fn strip_comments(markup: &str) -> Cow<'_, str> {
    COMMENT_RE.replace_all(markup, "")
}

fn tokenize(markup: &str) -> Vec<Token<'_>> {
    let mut tokens = Vec::new();
    let mut last = 0;
    for caps in TAG_RE.captures_iter(markup) {
        let Some(whole) = caps.get(0) else {
            continue;
        };
        if whole.start() > last {
            tokens.push(Token::Text(&markup[last..whole.start()]));
        }
        let name = caps[2].to_ascii_lowercase();
        if &caps[1] == "/" {
            tokens.push(Token::Close { name });
        } else {
            let attrs = caps.get(3).map_or("", |a| a.as_str());
            tokens.push(Token::Open { name, attrs });
        }
        last = whole.end();
    }
    if last < markup.len() {
        tokens.push(Token::Text(&markup[last..]));
    }
    tokens
}

/// Raw `(rowspan, colspan)` attribute values.
fn span_attrs(attrs: &str) -> (Option<&str>, Option<&str>) {
    let mut rowspan = None;
    let mut colspan = None;
    for caps in SPAN_ATTR_RE.captures_iter(attrs) {
        let value = caps
            .get(2)
            .or_else(|| caps.get(3))
            .or_else(|| caps.get(4))
            .map(|m| m.as_str());
        if caps[1].eq_ignore_ascii_case("rowspan") {
            rowspan = rowspan.or(value);
        } else {
            colspan = colspan.or(value);
        }
    }
    (rowspan, colspan)
}

/// HTML rules for non-negative integers: leading digits, anything unusable means 1.
fn html_span(value: Option<&str>, max: usize) -> usize {
    let Some(value) = value else {
        return 1;
    };
    let value = value.trim_start();
    let value = value.strip_prefix('+').unwrap_or(value);
    let digits_end = value
        .find(|c: char| !c.is_ascii_digit())
        .unwrap_or(value.len());
    let digits = &value[..digits_end];
    if digits.is_empty() {
        return 1;
    }
    match digits.parse::<usize>() {
        Ok(0) => 1,
        Ok(n) => n.min(max),
        Err(_) => max,
    }
}

/// Strict integer spans: the whole value must be an integer.
fn integer_span(attr: &'static str, value: Option<&str>, max: usize) -> Result<usize, MarkupError> {
    let Some(raw) = value else {
        return Ok(1);
    };
    raw.trim()
        .parse::<i64>()
        .map(|n| (n.max(1) as usize).min(max))
        .map_err(|_| MarkupError::InvalidSpan {
            attr,
            value: raw.to_owned(),
        })
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Element {
    Table,
    Section,
    Row,
    Cell,
}

#[derive(Debug, Default)]
struct StructuredBuilder {
    stack: Vec<Element>,
    rows: CellRows,
    row: Vec<Cell>,
    cell_text: String,
    cell_spans: (usize, usize),
    /// Tables opened inside the current cell; their text is flattened into it.
    nested: usize,
    finished: bool,
}

impl StructuredBuilder {
    fn top(&self) -> Option<Element> {
        self.stack.last().copied()
    }

    fn close_cell(&mut self) {
        if self.top() == Some(Element::Cell) {
            self.stack.pop();
            let (rowspan, colspan) = self.cell_spans;
            let text = std::mem::take(&mut self.cell_text);
            self.row.push(Cell::new(text.trim(), rowspan, colspan));
        }
    }

    fn close_row(&mut self) {
        if self.top() == Some(Element::Row) {
            self.stack.pop();
            if !self.row.is_empty() {
                self.rows.push(std::mem::take(&mut self.row));
            }
        }
    }

    fn close_section(&mut self) {
        if self.top() == Some(Element::Section) {
            self.stack.pop();
        }
    }

    fn push_text(&mut self, text: &str) {
        if self.top() == Some(Element::Cell) {
            self.cell_text.push_str(&html_escape::decode_html_entities(text));
        }
    }

    fn open(&mut self, name: &str, attrs: &str) {
        if self.nested > 0 {
            match name {
                "table" => self.nested += 1,
                "br" => self.push_text(" "),
                _ => {}
            }
            return;
        }
        match name {
            "table" if self.stack.is_empty() => self.stack.push(Element::Table),
            "table" => self.nested += 1,
            _ if self.stack.is_empty() => {}
            "thead" | "tbody" | "tfoot" => {
                self.close_cell();
                self.close_row();
                self.close_section();
                self.stack.push(Element::Section);
            }
            "tr" => {
                self.close_cell();
                self.close_row();
                self.stack.push(Element::Row);
            }
            "td" | "th" => {
                self.close_cell();
                if matches!(self.top(), Some(Element::Table | Element::Section)) {
                    self.stack.push(Element::Row);
                }
                let (rowspan, colspan) = span_attrs(attrs);
                self.cell_spans = (
                    html_span(rowspan, MAX_ROWSPAN),
                    html_span(colspan, MAX_COLSPAN),
                );
                self.stack.push(Element::Cell);
            }
            "br" => self.push_text(" "),
            _ => {}
        }
    }

    fn close(&mut self, name: &str) -> Result<(), MarkupError> {
        if self.nested > 0 {
            if name == "table" {
                self.nested -= 1;
            }
            return Ok(());
        }
        let unbalanced = || MarkupError::Unbalanced {
            tag: name.to_owned(),
        };
        match name {
            "table" if self.stack.is_empty() => return Err(unbalanced()),
            _ if self.stack.is_empty() => {}
            "td" | "th" => {
                if self.top() != Some(Element::Cell) {
                    return Err(unbalanced());
                }
                self.close_cell();
            }
            "tr" => {
                self.close_cell();
                if self.top() != Some(Element::Row) {
                    return Err(unbalanced());
                }
                self.close_row();
            }
            "thead" | "tbody" | "tfoot" => {
                self.close_cell();
                self.close_row();
                if self.top() != Some(Element::Section) {
                    return Err(unbalanced());
                }
                self.close_section();
            }
            "table" => {
                self.close_cell();
                self.close_row();
                self.close_section();
                self.stack.clear();
                self.finished = true;
            }
            _ => {}
        }
        Ok(())
    }
}

/// Parses the first table following the HTML table model.
pub fn parse_structured(markup: &str) -> Result<CellRows, MarkupError> {
    let markup = strip_comments(markup);
    let mut builder = StructuredBuilder::default();
    for token in tokenize(&markup) {
        match token {
            Token::Open { name, attrs } => builder.open(&name, attrs),
            Token::Close { name } => builder.close(&name)?,
            Token::Text(text) => builder.push_text(text),
        }
        if builder.finished {
            return Ok(builder.rows);
        }
    }
    if builder.stack.is_empty() {
        Err(MarkupError::NoTable)
    } else {
        Err(MarkupError::Unterminated)
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum LenientState {
    Outside,
    InTable,
    InRow,
    InCell,
}

#[derive(Debug, Default)]
struct Accumulator {
    tables: Vec<CellRows>,
    table: CellRows,
    row: Vec<Cell>,
    cell_text: String,
    cell_spans: (usize, usize),
}

/// Parses the first explicitly closed table, keeping only explicitly closed rows and
/// cells. Span attributes must be plain integers.
pub fn parse_lenient(markup: &str) -> Result<CellRows, MarkupError> {
    let markup = strip_comments(markup);
    let mut state = LenientState::Outside;
    let mut acc = Accumulator::default();

    for token in tokenize(&markup) {
        state = match (state, token) {
            (_, Token::Open { name, .. }) if name == "table" => {
                acc.table.clear();
                LenientState::InTable
            }
            (LenientState::Outside, Token::Open { .. }) => LenientState::Outside,
            (_, Token::Open { name, .. }) if name == "tr" => {
                acc.row.clear();
                LenientState::InRow
            }
            (LenientState::InRow | LenientState::InCell, Token::Open { name, attrs })
                if name == "td" || name == "th" =>
            {
                let (rowspan, colspan) = span_attrs(attrs);
                acc.cell_spans = (
                    integer_span("rowspan", rowspan, MAX_ROWSPAN)?,
                    integer_span("colspan", colspan, MAX_COLSPAN)?,
                );
                acc.cell_text.clear();
                LenientState::InCell
            }
            (LenientState::InCell, Token::Close { name }) if name == "td" || name == "th" => {
                let (rowspan, colspan) = acc.cell_spans;
                let text = std::mem::take(&mut acc.cell_text);
                acc.row.push(Cell::new(text.trim(), rowspan, colspan));
                LenientState::InRow
            }
            (LenientState::InRow | LenientState::InCell, Token::Close { name })
                if name == "tr" =>
            {
                if !acc.row.is_empty() {
                    acc.table.push(std::mem::take(&mut acc.row));
                }
                LenientState::InTable
            }
            (_, Token::Close { name }) if name == "table" => {
                if !acc.table.is_empty() {
                    acc.tables.push(std::mem::take(&mut acc.table));
                }
                LenientState::Outside
            }
            (LenientState::InCell, Token::Text(text)) => {
                acc.cell_text
                    .push_str(&html_escape::decode_html_entities(text));
                LenientState::InCell
            }
            (state, _) => state,
        };
    }

    acc.tables.into_iter().next().ok_or(MarkupError::NoTable)
}
