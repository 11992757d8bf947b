//! Engines implemented by an external program.
//!
//! The page (or table crop) is written to a temporary PNG whose path is appended to the
//! command line. The program prints a JSON document on stdout.

use std::{
    ffi::OsString,
    path::{Path, PathBuf},
    process::Command,
};

use anyhow::Context;
use image::{DynamicImage, GenericImageView, ImageFormat};
use serde_json::Value;

use crate::{
    entities::{DetectedRegion, TextRegion},
    error::EngineError,
    layout::{regions_from_json, LayoutDetector},
    ocr::{text_regions_from_json, TextEngine},
    table::{structure_from_json, TableStructure, TableStructureEngine},
};

#[derive(Debug, Clone)]
pub struct CommandEngine {
    name: &'static str,
    program: PathBuf,
    args: Vec<OsString>,
}

impl CommandEngine {
    pub fn new<P, I, S>(name: &'static str, program: P, args: I) -> Self
    where
        P: Into<PathBuf>,
        I: IntoIterator<Item = S>,
        S: Into<OsString>,
    {
        Self {
            name,
            program: program.into(),
            args: args.into_iter().map(Into::into).collect(),
        }
    }

    /// Parses a shell-like command line: the first word is the program.
    pub fn from_command_line(name: &'static str, command_line: &str) -> anyhow::Result<Self> {
        let mut words = command_line.split_whitespace();
        let program = words
            .next()
            .with_context(|| format!("empty {name} engine command"))?;
        Ok(Self::new(name, program, words))
    }

    pub fn program(&self) -> &Path {
        &self.program
    }

    #[tracing::instrument(skip_all, fields(engine = self.name))]
    fn run(&self, image: &DynamicImage) -> anyhow::Result<Value> {
        let input = tempfile::Builder::new()
            .prefix("scantab-")
            .suffix(".png")
            .tempfile()
            .context("can't create engine input file")?;
        image
            .save_with_format(input.path(), ImageFormat::Png)
            .context("can't write engine input image")?;

        let output = Command::new(&self.program)
            .args(&self.args)
            .arg(input.path())
            .output()
            .map_err(|e| EngineError::Failed {
                engine: self.name,
                source: Box::new(e),
            })
            .with_context(|| format!("can't run {}", self.program.display()))?;

        if !output.status.success() {
            let stderr = String::from_utf8_lossy(&output.stderr);
            return Err(EngineError::Failed {
                engine: self.name,
                source: format!("{} exited with {}: {}", self.program.display(), output.status, stderr.trim()).into(),
            }
            .into());
        }

        serde_json::from_slice(&output.stdout).map_err(|e| {
            EngineError::MalformedOutput {
                engine: self.name,
                reason: format!("stdout is not JSON: {e}"),
            }
            .into()
        })
    }
}

impl LayoutDetector for CommandEngine {
    fn detect(&mut self, image: &DynamicImage) -> anyhow::Result<Vec<DetectedRegion>> {
        let (width, height) = image.dimensions();
        regions_from_json(self.run(image)?, width, height)
    }
}

impl TableStructureEngine for CommandEngine {
    fn recognize(&mut self, crop: &DynamicImage) -> anyhow::Result<TableStructure> {
        let (width, height) = crop.dimensions();
        structure_from_json(self.run(crop)?, width, height)
    }
}

impl TextEngine for CommandEngine {
    fn recognize(&mut self, image: &DynamicImage) -> anyhow::Result<Vec<TextRegion>> {
        let (width, height) = image.dimensions();
        text_regions_from_json(self.run(image)?, width, height)
    }
}
