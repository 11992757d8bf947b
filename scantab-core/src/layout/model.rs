use std::path::PathBuf;

use anyhow::Context;
use image::{imageops::FilterType, DynamicImage, GenericImageView};
use lazy_static::lazy_static;
use ndarray::{s, Array3, Array4, ArrayView3, Axis};
use ort::{
    execution_providers::{
        CPUExecutionProvider, CUDAExecutionProvider, CoreMLExecutionProvider,
        ExecutionProviderDispatch, TensorRTExecutionProvider,
    },
    session::{builder::GraphOptimizationLevel, Session},
};

use crate::{
    engines::EngineMode,
    entities::{DetectedRegion, RegionKind},
    geometry::BBox,
    layout::{nms, LayoutDetector},
};

pub const LAYOUT_MODEL_FILE: &str = "yolov8s-doclaynet.onnx";

const LETTERBOX_FILL: f32 = 144.0 / 255.0;

/// Where the layout model is looked up when no path is configured.
pub fn default_model_path() -> Option<PathBuf> {
    dirs::cache_dir().map(|dir| dir.join("scantab").join("models").join(LAYOUT_MODEL_FILE))
}

#[derive(Debug, Clone)]
pub struct OrtConfig {
    pub execution_providers: Vec<OrtExecutionProvider>,
    pub intra_threads: usize,
    pub inter_threads: usize,
    pub model_path: Option<PathBuf>,
}

#[derive(Debug, Clone, PartialEq, Eq, PartialOrd, Ord)]
pub enum OrtExecutionProvider {
    CPU,
    CoreML { ane_only: bool },
    CUDA(i32),
    Trt(i32),
}

impl OrtExecutionProvider {
    fn dispatch(&self) -> ExecutionProviderDispatch {
        match *self {
            OrtExecutionProvider::Trt(device_id) => TensorRTExecutionProvider::default()
                .with_device_id(device_id)
                .build(),
            OrtExecutionProvider::CUDA(device_id) => CUDAExecutionProvider::default()
                .with_device_id(device_id)
                .build(),
            OrtExecutionProvider::CoreML { ane_only: true } => {
                CoreMLExecutionProvider::default().with_ane_only().build()
            }
            OrtExecutionProvider::CoreML { ane_only: false } => {
                CoreMLExecutionProvider::default().build()
            }
            OrtExecutionProvider::CPU => CPUExecutionProvider::default().build(),
        }
    }
}

impl Default for OrtConfig {
    fn default() -> Self {
        let mut execution_providers = vec![OrtExecutionProvider::CPU];
        if cfg!(target_os = "macos") {
            execution_providers.push(OrtExecutionProvider::CoreML { ane_only: false });
        }
        Self {
            execution_providers,
            intra_threads: OrtLayoutDetector::ORT_INTRATHREAD,
            inter_threads: OrtLayoutDetector::ORT_INTERTHREAD,
            model_path: None,
        }
    }
}

impl OrtConfig {
    /// Adds the CUDA provider for the requested device when running in GPU mode.
    pub fn for_mode(&self, mode: EngineMode) -> Self {
        let mut config = self.clone();
        if let EngineMode::Gpu { device_id } = mode {
            let cuda = OrtExecutionProvider::CUDA(device_id);
            if !config.execution_providers.contains(&cuda) {
                config.execution_providers.push(cuda);
            }
        }
        config
    }
}

lazy_static! {
    static ref ID2LABEL: [&'static str; 11] = [
        "Caption",
        "Footnote",
        "Formula",
        "List-item",
        "Page-footer",
        "Page-header",
        "Picture",
        "Section-header",
        "Table",
        "Text",
        "Title",
    ];
}

/// YOLOv8 document layout detector trained on DocLayNet.
#[derive(Debug)]
pub struct OrtLayoutDetector {
    session: Session,
    output_name: String,
}

impl OrtLayoutDetector {
    /// Required width of the input image for layout parsing.
    pub const REQUIRED_WIDTH: u32 = 1024;
    /// Required height of the input image for layout parsing.
    pub const REQUIRED_HEIGHT: u32 = 1024;

    // [batch_size = 1, bbox(4) + classes(11), candidate_boxes = 21504]
    const OUTPUT_SIZE: [usize; 3] = [1, 15, 21504];

    /// Candidates below this class probability are ignored.
    pub const CONF_THRESHOLD: f32 = 0.3;

    /// Overlap above which the model's own candidates are merged, whatever their class.
    pub const IOU_THRESHOLD: f64 = 0.8;

    pub const ORT_INTRATHREAD: usize = 16;
    pub const ORT_INTERTHREAD: usize = 4;

    pub fn new(config: OrtConfig) -> anyhow::Result<Self> {
        let model_path = config
            .model_path
            .or_else(default_model_path)
            .context("can't locate the layout model")?;
        if !model_path.exists() {
            anyhow::bail!("layout model not found at {}", model_path.display());
        }

        // Sort providers by priority
        let mut providers = config.execution_providers;
        providers.sort();
        let dispatch: Vec<_> = providers.iter().map(OrtExecutionProvider::dispatch).collect();

        let session = Session::builder()?
            .with_execution_providers(dispatch)?
            .with_optimization_level(GraphOptimizationLevel::Level3)?
            .with_intra_threads(config.intra_threads)?
            .with_inter_threads(config.inter_threads)?
            .commit_from_file(&model_path)
            .with_context(|| format!("can't load layout model {}", model_path.display()))?;

        let output_name = session
            .outputs
            .first()
            .map(|i| &i.name)
            .context("layout model has no output")?
            .to_owned();

        tracing::info!("loaded layout model {}", model_path.display());
        Ok(Self {
            session,
            output_name,
        })
    }

    fn run(&self, input: Array4<f32>) -> anyhow::Result<Array3<f32>> {
        let outputs = self.session.run(ort::inputs![input]?)?;

        let output_tensor = outputs
            .get(&self.output_name)
            .context("can't get the value of first output")?
            .try_extract_tensor::<f32>()?;

        Ok(output_tensor.to_shape(Self::OUTPUT_SIZE)?.to_owned())
    }

    /// Turns raw `(cx, cy, w, h, class probabilities..)` candidates into regions in the
    /// frame of the original image.
    fn extract_regions(
        output: ArrayView3<f32>,
        original_width: u32,
        original_height: u32,
    ) -> Vec<DetectedRegion> {
        let mut result = Vec::new();
        let output = output.slice(s![0, .., ..]);
        let ratio = (Self::REQUIRED_WIDTH as f32 / original_width as f32)
            .min(Self::REQUIRED_HEIGHT as f32 / original_height as f32);

        for prediction in output.axis_iter(Axis(1)) {
            const CXYWH_OFFSET: usize = 4;
            let bbox = prediction.slice(s![0..CXYWH_OFFSET]);
            let classes = prediction.slice(s![CXYWH_OFFSET..CXYWH_OFFSET + ID2LABEL.len()]);
            let Some((max_prob_idx, &proba)) = classes
                .iter()
                .enumerate()
                .max_by(|(_, a), (_, b)| a.total_cmp(b))
            else {
                continue;
            };

            if proba < Self::CONF_THRESHOLD {
                continue;
            }
            let [xc, yc, w, h] = [0usize, 1, 2, 3].map(|i| bbox[i] / ratio);
            let coords = [xc - w / 2.0, yc - h / 2.0, xc + w / 2.0, yc + h / 2.0];

            result.push(DetectedRegion::new(
                BBox::normalize_f32(coords, original_width, original_height),
                RegionKind::from_label(ID2LABEL[max_prob_idx]),
                proba,
            ));
        }

        result
    }

    fn scale_wh(w0: f32, h0: f32, w1: f32, h1: f32) -> (f32, f32, f32) {
        let r = (w1 / w0).min(h1 / h0);
        (r, (w0 * r).round(), (h0 * r).round())
    }

    /// Letterboxes the page into the model's input, padding with grey.
    fn preprocess(img: &DynamicImage) -> Array4<f32> {
        let (w0, h0) = img.dimensions();
        let (_, w_new, h_new) = Self::scale_wh(
            w0 as f32,
            h0 as f32,
            Self::REQUIRED_WIDTH as f32,
            Self::REQUIRED_HEIGHT as f32,
        );
        let resized = img
            .resize_exact(w_new as u32, h_new as u32, FilterType::Triangle)
            .to_rgb8();
        let shape = [
            1,
            3,
            Self::REQUIRED_HEIGHT as usize,
            Self::REQUIRED_WIDTH as usize,
        ];
        let mut input_tensor = Array4::from_elem(shape, LETTERBOX_FILL);
        for (x, y, pixel) in resized.enumerate_pixels() {
            for (channel, value) in pixel.0.iter().enumerate() {
                input_tensor[[0, channel, y as usize, x as usize]] = *value as f32 / 255.0;
            }
        }
        input_tensor
    }
}

impl LayoutDetector for OrtLayoutDetector {
    #[tracing::instrument(skip_all)]
    fn detect(&mut self, image: &DynamicImage) -> anyhow::Result<Vec<DetectedRegion>> {
        let (img_width, img_height) = image.dimensions();
        let input = Self::preprocess(image);
        let output = self.run(input)?;
        let regions = Self::extract_regions(output.view(), img_width, img_height);
        Ok(nms::suppress(regions, Self::IOU_THRESHOLD))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use image::{Rgb, RgbImage};

    #[test]
    fn test_extract_regions_rescales_to_original_frame() {
        // Two candidates: a confident table and background noise.
        let mut output = Array3::<f32>::zeros([1, 15, 2]);
        for (row, value) in [512.0, 256.0, 200.0, 100.0].into_iter().enumerate() {
            output[[0, row, 0]] = value;
        }
        output[[0, 4 + 8, 0]] = 0.9;
        for class in 4..15 {
            output[[0, class, 1]] = 0.1;
        }

        // 2048x1024 page is scaled by 0.5 into the model input
        let regions = OrtLayoutDetector::extract_regions(output.view(), 2048, 1024);
        assert_eq!(regions.len(), 1);
        assert!(regions[0].is_table());
        assert_eq!(regions[0].bbox, BBox::new(824, 412, 1224, 612));
        assert_eq!(regions[0].confidence, 0.9);
    }

    #[test]
    fn test_extract_regions_clamps_and_labels() {
        let mut output = Array3::<f32>::zeros([1, 15, 1]);
        output[[0, 2, 0]] = 100.0;
        output[[0, 3, 0]] = 100.0;
        output[[0, 4 + 10, 0]] = 0.5;

        let regions = OrtLayoutDetector::extract_regions(output.view(), 1024, 1024);
        assert_eq!(regions[0].bbox, BBox::new(0, 0, 50, 50));
        assert_eq!(regions[0].kind, RegionKind::Other("Title".to_owned()));
    }

    #[test]
    fn test_preprocess_letterboxes() {
        let img = DynamicImage::ImageRgb8(RgbImage::from_pixel(512, 256, Rgb([255, 0, 0])));
        let input = OrtLayoutDetector::preprocess(&img);
        assert_eq!(input.shape(), &[1, 3, 1024, 1024]);
        assert_eq!(input[[0, 0, 10, 10]], 1.0);
        assert_eq!(input[[0, 1, 10, 10]], 0.0);
        // below the resized page is padding
        assert_eq!(input[[0, 0, 600, 10]], 144.0 / 255.0);
    }

    #[test]
    fn test_gpu_mode_adds_cuda() {
        let config = OrtConfig::default().for_mode(EngineMode::Gpu { device_id: 1 });
        assert!(config
            .execution_providers
            .contains(&OrtExecutionProvider::CUDA(1)));
        let cpu = OrtConfig::default().for_mode(EngineMode::Cpu);
        assert!(!cpu
            .execution_providers
            .iter()
            .any(|p| matches!(p, OrtExecutionProvider::CUDA(_))));
    }
}
