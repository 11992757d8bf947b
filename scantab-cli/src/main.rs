use anyhow::Context;
use clap::Parser;
use colored::*;

use indicatif::{ProgressBar, ProgressState, ProgressStyle};
use memmap2::Mmap;
use scantab_core::{
    engines::command::CommandEngine,
    error::EngineError,
    layout::{
        model::{OrtConfig, OrtExecutionProvider, OrtLayoutDetector},
        LayoutDetector,
    },
    ocr::TextEngine,
    render::{table::TableFormat, text::to_text},
    table::TableStructureEngine,
    utils::{create_dirs, get_doc_length, parse_page_list, save_parsed_document},
    DocumentKind, EngineContext, EngineMode, ExtractionConfig, LazyEngine, ScantabParseConfig,
    ScantabParser,
};
use std::{fmt::Write, fs::File, path::PathBuf};
use tracing_subscriber::EnvFilter;
use uuid::Uuid;

#[derive(Parser, Debug)]
#[command(
    version,
    about = "scantab - extract tables and text from scanned documents",
    long_about = "scantab finds the tables of scanned PDFs and images, whatever their orientation, rebuilds them as grids and recognizes the text around them."
)]
struct Args {
    /// Path to the PDF or image file to be parsed
    file_path: PathBuf,

    #[arg(
        long,
        short('p'),
        help = "Specify pages to parse (e.g., '1,3-5' or '2' for a single page)"
    )]
    pages: Option<String>,

    #[arg(long, env = "SCANTAB_PASSWORD", help = "Password of an encrypted PDF")]
    password: Option<String>,

    /// Specifies the target directory where parsing results will be saved
    ///
    /// If not specified, defaults to the current working directory.
    #[arg(
        long,
        env = "SCANTAB_OUTPUT_DIR",
        help = "Specify the directory to store parsing result"
    )]
    output_dir: Option<PathBuf>,

    #[arg(
        long,
        env = "SCANTAB_CONFIG",
        help = "JSON file with extraction settings"
    )]
    config: Option<PathBuf>,

    #[arg(long, env = "SCANTAB_PDF_ZOOM", help = "Zoom used to rasterize PDF pages")]
    pdf_zoom: Option<f32>,

    #[arg(
        long,
        default_value_t = false,
        help = "Only look for tables in the page's upright orientation"
    )]
    no_rotation: bool,

    #[arg(
        long,
        default_value_t = false,
        help = "Keep recognized text as is, without whitespace cleanup"
    )]
    raw_text: bool,

    #[arg(
        long,
        default_value_t = false,
        help = "Always recognize page text, even when the PDF has a text layer"
    )]
    no_embedded_text: bool,

    #[arg(long, default_value_t = false, help = "Also save an HTML rendering")]
    html: bool,

    #[arg(
        long,
        default_value_t = false,
        help = "Print the extracted content on stdout"
    )]
    print: bool,

    /// Path to the layout model. If not specified, the model is looked up in the cache dir.
    #[arg(
        long,
        env = "SCANTAB_LAYOUT_MODEL_PATH",
        help = "Specify the path to the layout model for table detection"
    )]
    layout_model_path: Option<PathBuf>,

    #[arg(
        long,
        env = "SCANTAB_LAYOUT_COMMAND",
        help = "External program detecting tables, used instead of the layout model"
    )]
    layout_command: Option<String>,

    #[arg(
        long,
        env = "SCANTAB_STRUCTURE_COMMAND",
        help = "External program recognizing the structure of a table crop"
    )]
    structure_command: Option<String>,

    #[arg(
        long,
        env = "SCANTAB_OCR_COMMAND",
        help = "External program recognizing page text"
    )]
    ocr_command: Option<String>,

    #[arg(
        long,
        default_value_t = false,
        env = "SCANTAB_GPU",
        help = "Run the engines on GPU"
    )]
    gpu: bool,

    /// Use CoreML for layout inference (default: true)
    #[arg(
        long,
        default_value_t = cfg!(target_os = "macos"),
        help = "Enable or disable the use of CoreML for layout inference"
    )]
    coreml: bool,

    #[arg(
        long,
        default_value_t = true,
        help = "Enable or disable Apple Neural Engine acceleration (only applies when CoreML is enabled)"
    )]
    use_ane: bool,

    #[arg(
        long,
        default_value_t = false,
        help = "Enable or disable the use of TensorRT for layout inference"
    )]
    trt: bool,

    #[arg(
        long,
        default_value_t = false,
        help = "Enable or disable the use of CUDA for layout inference"
    )]
    cuda: bool,

    /// CUDA device ID to use for GPU acceleration (e.g. 0 for first GPU)
    #[arg(
        long,
        help = "CUDA device ID to use (0 for first GPU)",
        default_value_t = 0
    )]
    device_id: i32,

    /// Number of threads to use within individual operations
    #[arg(
        long,
        help = "Number of threads to use for parallel processing within operations",
        default_value = "16"
    )]
    intra_threads: usize,

    /// Number of threads to use for parallel operation execution
    #[arg(
        long,
        help = "Number of threads to use for executing operations in parallel",
        default_value = "4"
    )]
    inter_threads: usize,

    /// Enable debug mode to output additional information
    #[arg(
        long,
        default_value_t = false,
        env = "SCANTAB_DEBUG",
        help = "Activate debug mode: verbose logs and page overlays"
    )]
    debug: bool,
}

fn init_tracing(debug: bool) {
    let env_filter = EnvFilter::try_from_env("LOG_LEVEL").unwrap_or_else(|_| {
        EnvFilter::new(if debug {
            "scantab=debug,scantab_core=debug"
        } else {
            "scantab=info,scantab_core=info"
        })
    });
    tracing_subscriber::fmt()
        .with_env_filter(env_filter)
        .with_line_number(true)
        .with_writer(std::io::stderr)
        .init();
}

fn setup_progress_bar(length_pages: usize) -> anyhow::Result<ProgressBar> {
    let pb = ProgressBar::new(length_pages as u64);
    pb.set_style(
        ProgressStyle::with_template(
            "{spinner:.green} [{elapsed_precise}] [{bar:40.cyan/blue}] {msg}",
        )?
        .with_key("eta", |state: &ProgressState, w: &mut dyn Write| {
            let _ = write!(w, "{:.1}s", state.eta().as_secs_f64());
        })
        .progress_chars("#>-"),
    );
    Ok(pb)
}

fn parse_ep_args(args: &Args) -> Vec<OrtExecutionProvider> {
    let mut providers = Vec::new();
    if args.trt {
        providers.push(OrtExecutionProvider::Trt(args.device_id));
    }
    if args.cuda {
        providers.push(OrtExecutionProvider::CUDA(args.device_id));
    }

    if args.coreml {
        providers.push(OrtExecutionProvider::CoreML {
            ane_only: args.use_ane,
        });
    }
    providers.push(OrtExecutionProvider::CPU);
    providers
}

fn extraction_config(args: &Args) -> anyhow::Result<ExtractionConfig> {
    let mut config = match &args.config {
        Some(path) => ExtractionConfig::from_json_file(path)?,
        None => ExtractionConfig::default(),
    };
    if let Some(zoom) = args.pdf_zoom {
        config.pdf_zoom = zoom;
    }
    if args.no_rotation {
        config.detect_rotation = false;
    }
    if args.raw_text {
        config.clean_text = false;
    }
    if args.no_embedded_text {
        config.use_embedded_text = false;
    }
    if args.gpu {
        config.engine_mode = EngineMode::Gpu {
            device_id: args.device_id,
        };
    }
    config.validate()?;
    Ok(config)
}

fn command_engine(name: &'static str, command_line: &str) -> anyhow::Result<CommandEngine> {
    CommandEngine::from_command_line(name, command_line)
}

fn engine_context(args: &Args, mode: EngineMode) -> EngineContext {
    let layout: LazyEngine<dyn LayoutDetector> = match args.layout_command.clone() {
        Some(cmd) => LazyEngine::new("layout", move |_| {
            Ok(Box::new(command_engine("layout", &cmd)?) as Box<dyn LayoutDetector>)
        }),
        None => {
            let ort_config = OrtConfig {
                execution_providers: parse_ep_args(args),
                intra_threads: args.intra_threads,
                inter_threads: args.inter_threads,
                model_path: args.layout_model_path.clone(),
            };
            LazyEngine::new("layout", move |mode| {
                Ok(Box::new(OrtLayoutDetector::new(ort_config.for_mode(mode))?)
                    as Box<dyn LayoutDetector>)
            })
        }
    };

    let structure: LazyEngine<dyn TableStructureEngine> = match args.structure_command.clone() {
        Some(cmd) => LazyEngine::new("table structure", move |_| {
            Ok(Box::new(command_engine("table structure", &cmd)?) as Box<dyn TableStructureEngine>)
        }),
        None => LazyEngine::new("table structure", |_| {
            Err(EngineError::Unavailable("table structure").into())
        }),
    };

    let text: LazyEngine<dyn TextEngine> = match args.ocr_command.clone() {
        Some(cmd) => LazyEngine::new("text", move |_| {
            Ok(Box::new(command_engine("text", &cmd)?) as Box<dyn TextEngine>)
        }),
        None => default_text_engine(),
    };

    EngineContext::new(mode, layout, structure, text)
}

#[cfg(target_os = "macos")]
fn default_text_engine() -> LazyEngine<dyn TextEngine> {
    use scantab_core::ocr::vision::VisionTextEngine;
    LazyEngine::new("text", |_| {
        Ok(Box::new(VisionTextEngine::default()) as Box<dyn TextEngine>)
    })
}

#[cfg(not(target_os = "macos"))]
fn default_text_engine() -> LazyEngine<dyn TextEngine> {
    LazyEngine::new("text", |_| Err(EngineError::Unavailable("text").into()))
}

#[tokio::main(flavor = "multi_thread")]
async fn main() -> anyhow::Result<()> {
    let args = Args::parse();
    init_tracing(args.debug);

    let config = extraction_config(&args)?;
    tracing::debug!("extraction config: {config:?}");
    let kind = DocumentKind::from_path(&args.file_path)?;
    let pages = args.pages.as_deref().map(parse_page_list).transpose()?;

    let length_pages = get_doc_length(&args.file_path, args.password.as_deref(), pages.as_deref())?;
    let pb = setup_progress_bar(length_pages)?;
    let pbc = pb.clone();

    let doc_name = args
        .file_path
        .file_name()
        .and_then(|name| name.to_str())
        .map(|name| name.to_owned())
        .unwrap_or(Uuid::new_v4().to_string());

    let (res_dir_path, debug_dir) = create_dirs(args.output_dir.as_ref(), &doc_name, args.debug)?;

    let file = File::open(&args.file_path)
        .with_context(|| format!("can't open {}", args.file_path.display()))?;
    let mmap = unsafe { Mmap::map(&file)? };

    let context = engine_context(&args, config.engine_mode);
    let password = args.password.clone();
    let parse_doc_name = doc_name.clone();
    let doc = tokio::task::spawn_blocking(move || {
        let mut parser = ScantabParser::new(context, config);
        parser.parse_document(
            &mmap,
            parse_doc_name,
            kind,
            ScantabParseConfig {
                password: password.as_deref(),
                pages,
                debug_dir,
            },
            Some(move |page_number| {
                pbc.set_message(format!("Page #{page_number}"));
                pbc.inc(1u64);
            }),
        )
    })
    .await
    .context("parsing task panicked")??;

    pb.finish_with_message(format!(
        "Parsed {} in {}ms, found {} tables",
        doc_name,
        doc.metadata.parsing_duration.as_millis(),
        doc.metadata.table_count.to_string().bold()
    ));

    if args.print {
        println!("{}", to_text(&doc, TableFormat::Markdown)?);
    }
    save_parsed_document(&doc, res_dir_path, args.html)?;
    Ok(())
}
