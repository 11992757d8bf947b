//! Table and text extraction from scanned documents.
//!
//! A page goes through table detection (trying the four orientations), overlap
//! filtering, grid reconstruction and validation. Accepted tables are then masked out
//! of the page before the remaining text is recognized.

pub(crate) mod draw;

pub mod config;
pub mod engines;
pub mod entities;
pub mod error;
pub mod geometry;
pub mod layout;
pub mod ocr;
pub mod parse;
pub mod render;
pub mod table;
pub mod utils;

pub use config::ExtractionConfig;
pub use engines::{EngineContext, EngineMode, LazyEngine};
pub use parse::document::{DocumentKind, ScantabParseConfig, ScantabParser};
