//! Lazily built inference engines shared across pages and documents.

use anyhow::Context;
use serde::{Deserialize, Serialize};

use crate::{layout::LayoutDetector, ocr::TextEngine, table::TableStructureEngine};

pub mod command;

/// Hardware an engine is built for. Changing it rebuilds the engines.
#[derive(Debug, Default, Clone, Copy, PartialEq, Eq, Hash, Deserialize, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum EngineMode {
    #[default]
    Cpu,
    Gpu {
        device_id: i32,
    },
}

pub type EngineBuilder<T> = Box<dyn Fn(EngineMode) -> anyhow::Result<Box<T>> + Send + Sync>;

/// An engine built on first use and kept until the requested mode changes.
pub struct LazyEngine<T: ?Sized> {
    name: &'static str,
    build: EngineBuilder<T>,
    slot: Option<(EngineMode, Box<T>)>,
}

impl<T: ?Sized> LazyEngine<T> {
    pub fn new(
        name: &'static str,
        build: impl Fn(EngineMode) -> anyhow::Result<Box<T>> + Send + Sync + 'static,
    ) -> Self {
        Self {
            name,
            build: Box::new(build),
            slot: None,
        }
    }

    pub fn is_built(&self) -> bool {
        self.slot.is_some()
    }

    /// The engine for `mode`, building it when missing or built for another mode.
    ///
    /// A failed build is not cached: the next call tries again.
    pub fn get(&mut self, mode: EngineMode) -> anyhow::Result<&mut T> {
        if !matches!(&self.slot, Some((built_for, _)) if *built_for == mode) {
            if self.slot.is_some() {
                tracing::info!("rebuilding {} engine for {mode:?}", self.name);
            } else {
                tracing::debug!("building {} engine for {mode:?}", self.name);
            }
            self.slot = None;
            let engine = (self.build)(mode)
                .with_context(|| format!("can't build {} engine", self.name))?;
            self.slot = Some((mode, engine));
        }
        let (_, engine) = self.slot.as_mut().expect("engine slot was just filled");
        Ok(&mut **engine)
    }
}

/// Borrowed engines for one page. A `None` engine was unavailable and the page degrades
/// accordingly.
pub struct PageEngines<'a> {
    pub detector: Option<&'a mut (dyn LayoutDetector + 'static)>,
    pub structure: Option<&'a mut (dyn TableStructureEngine + 'static)>,
    pub text: Option<&'a mut (dyn TextEngine + 'static)>,
}

/// Owns the engines used by the extraction pipeline.
pub struct EngineContext {
    mode: EngineMode,
    layout: LazyEngine<dyn LayoutDetector>,
    structure: LazyEngine<dyn TableStructureEngine>,
    text: LazyEngine<dyn TextEngine>,
}

impl EngineContext {
    pub fn new(
        mode: EngineMode,
        layout: LazyEngine<dyn LayoutDetector>,
        structure: LazyEngine<dyn TableStructureEngine>,
        text: LazyEngine<dyn TextEngine>,
    ) -> Self {
        Self {
            mode,
            layout,
            structure,
            text,
        }
    }

    pub fn mode(&self) -> EngineMode {
        self.mode
    }

    /// Engines are rebuilt lazily on their next use.
    pub fn set_mode(&mut self, mode: EngineMode) {
        if mode != self.mode {
            tracing::info!("engine mode changed from {:?} to {mode:?}", self.mode);
            self.mode = mode;
        }
    }

    pub fn layout(&mut self) -> anyhow::Result<&mut (dyn LayoutDetector + 'static)> {
        self.layout.get(self.mode)
    }

    pub fn structure(&mut self) -> anyhow::Result<&mut (dyn TableStructureEngine + 'static)> {
        self.structure.get(self.mode)
    }

    pub fn text(&mut self) -> anyhow::Result<&mut (dyn TextEngine + 'static)> {
        self.text.get(self.mode)
    }

    /// Builds what's missing and lends every available engine for one page.
    pub fn page_engines(&mut self) -> PageEngines<'_> {
        let Self {
            mode,
            layout,
            structure,
            text,
        } = self;
        let mode = *mode;
        PageEngines {
            detector: available(layout.get(mode)),
            structure: available(structure.get(mode)),
            text: available(text.get(mode)),
        }
    }
}

fn available<T: ?Sized>(engine: anyhow::Result<&mut T>) -> Option<&mut T> {
    match engine {
        Ok(engine) => Some(engine),
        Err(e) => {
            tracing::warn!("{e:#}");
            None
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::{entities::DetectedRegion, error::EngineError};
    use image::DynamicImage;
    use std::sync::{
        atomic::{AtomicUsize, Ordering},
        Arc,
    };

    struct ModeDetector(EngineMode);

    impl LayoutDetector for ModeDetector {
        fn detect(&mut self, _image: &DynamicImage) -> anyhow::Result<Vec<DetectedRegion>> {
            Ok(Vec::new())
        }
    }

    fn counting_layout(builds: Arc<AtomicUsize>) -> LazyEngine<dyn LayoutDetector> {
        LazyEngine::new("layout", move |mode| {
            builds.fetch_add(1, Ordering::SeqCst);
            Ok(Box::new(ModeDetector(mode)) as Box<dyn LayoutDetector>)
        })
    }

    fn unavailable_structure() -> LazyEngine<dyn TableStructureEngine> {
        LazyEngine::new("table structure", |_| {
            Err(EngineError::Unavailable("table structure").into())
        })
    }

    fn unavailable_text() -> LazyEngine<dyn TextEngine> {
        LazyEngine::new("text", |_| Err(EngineError::Unavailable("text").into()))
    }

    #[test]
    fn test_engine_built_once_per_mode() {
        let builds = Arc::new(AtomicUsize::new(0));
        let mut engine = counting_layout(builds.clone());
        assert!(!engine.is_built());

        engine.get(EngineMode::Cpu).unwrap();
        engine.get(EngineMode::Cpu).unwrap();
        assert_eq!(builds.load(Ordering::SeqCst), 1);

        engine.get(EngineMode::Gpu { device_id: 0 }).unwrap();
        assert_eq!(builds.load(Ordering::SeqCst), 2);
        engine.get(EngineMode::Gpu { device_id: 1 }).unwrap();
        assert_eq!(builds.load(Ordering::SeqCst), 3);
        assert!(engine.is_built());
    }

    #[test]
    fn test_failed_build_is_retried() {
        let attempts = Arc::new(AtomicUsize::new(0));
        let counter = attempts.clone();
        let mut engine: LazyEngine<dyn TextEngine> = LazyEngine::new("text", move |_| {
            counter.fetch_add(1, Ordering::SeqCst);
            Err(anyhow::anyhow!("no model"))
        });
        assert!(engine.get(EngineMode::Cpu).is_err());
        assert!(engine.get(EngineMode::Cpu).is_err());
        assert_eq!(attempts.load(Ordering::SeqCst), 2);
        assert!(!engine.is_built());
    }

    #[test]
    fn test_context_rebuilds_on_mode_change() {
        let builds = Arc::new(AtomicUsize::new(0));
        let mut context = EngineContext::new(
            EngineMode::Cpu,
            counting_layout(builds.clone()),
            unavailable_structure(),
            unavailable_text(),
        );

        let engines = context.page_engines();
        assert!(engines.detector.is_some());
        assert!(engines.structure.is_none());
        assert!(engines.text.is_none());

        context.page_engines();
        assert_eq!(builds.load(Ordering::SeqCst), 1);

        context.set_mode(EngineMode::Gpu { device_id: 0 });
        assert!(context.layout().is_ok());
        assert_eq!(builds.load(Ordering::SeqCst), 2);
        assert_eq!(context.mode(), EngineMode::Gpu { device_id: 0 });
    }
}
