use crate::{
    config::Config,
    engine::{Engine, ToolEngine},
    language::{LanguageCascade, ResolvedLanguage},
    naming::apply_pattern,
    pipeline::{DocumentKind, Pipeline},
    request::{IngestRequest, ProcessingOptions, Source},
    respond::{OutputFile, Response},
    server,
    util::{ensure_dir, now_rfc3339, sha256_file},
};
use anyhow::{Context, Result, anyhow};
use clap::{Parser, Subcommand};
use serde::Serialize;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use tracing::info;
use tracing_appender::non_blocking::WorkerGuard;
use tracing_subscriber::{EnvFilter, Layer, layer::SubscriberExt, util::SubscriberInitExt};

#[derive(Parser, Debug)]
#[command(name = "scanflow")]
#[command(about = "Scan/upload ingestion orchestrator (language cascade + patch split + OCR + naming)")]
pub struct Args {
    #[command(subcommand)]
    pub cmd: Command,

    /// Path to config TOML. If omitted, uses ./scanflow.toml if present.
    #[arg(long)]
    pub config: Option<PathBuf>,

    /// Override log level (trace/debug/info/warn/error).
    #[arg(long)]
    pub log_level: Option<String>,
}

#[derive(Subcommand, Debug)]
pub enum Command {
    /// Run the HTTP server.
    Serve {
        #[arg(long)]
        listen: Option<String>,
    },
    /// Run one document through the pipeline.
    Process {
        #[arg(long, conflicts_with = "scan_profile", required_unless_present = "scan_profile")]
        input: Option<PathBuf>,
        #[arg(long)]
        scan_profile: Option<String>,
        #[arg(long)]
        no_ocr: bool,
        #[arg(long)]
        contains_patch: bool,
        #[arg(long)]
        patch_mode: Option<String>,
        #[arg(long)]
        naming: Option<String>,
        #[arg(long)]
        naming_pattern: Option<String>,
        #[arg(long)]
        lang: Option<String>,
        #[arg(long)]
        output_dir: Option<PathBuf>,
    },
    /// Resolve the recognition language of a PDF or image.
    DetectLanguage {
        #[arg(long)]
        input: PathBuf,
        #[arg(long)]
        lang: Option<String>,
    },
    /// Apply a naming pattern to a file name.
    Name {
        #[arg(long)]
        base: String,
        #[arg(long)]
        pattern: String,
        #[arg(long, default_value_t = 1)]
        index: usize,
    },
    /// List scanners visible through the configured drivers.
    Scanners {},
    Doctor {},
}

pub fn dispatch(args: Args) -> Result<()> {
    let cfg_path = resolve_config_path(args.config.as_deref())?;
    let cfg = Config::load(&cfg_path)?;

    let log_path = resolve_log_path(&cfg);
    let _guard = match &args.cmd {
        // no tools, nothing worth a log file
        Command::Name { .. } => None,
        _ => init_logging(&args, &cfg, log_path.as_deref())?,
    };

    match args.cmd {
        Command::Serve { listen } => serve(&cfg, listen.as_deref()),
        Command::Process {
            input,
            scan_profile,
            no_ocr,
            contains_patch,
            patch_mode,
            naming,
            naming_pattern,
            lang,
            output_dir,
        } => {
            let mut options = ProcessingOptions::defaults(&cfg);
            options.ocr_enabled = !no_ocr;
            options.contains_patch = contains_patch;
            if let Some(v) = patch_mode {
                options.patch_mode = v;
            }
            if let Some(v) = naming {
                options.naming_strategy = v;
            }
            if naming_pattern.is_some() {
                options.naming_pattern = naming_pattern.filter(|p| !p.is_empty());
            }
            options.language = lang;
            if let Some(v) = output_dir {
                options.output_dir = v;
            }
            process(&cfg, input.as_deref(), scan_profile, options)
        }
        Command::DetectLanguage { input, lang } => detect_language(&cfg, &input, lang.as_deref()),
        Command::Name {
            base,
            pattern,
            index,
        } => {
            println!("{}", apply_pattern(&base, Some(&pattern), index));
            Ok(())
        }
        Command::Scanners {} => scanners(&cfg),
        Command::Doctor {} => doctor(&cfg),
    }
}

fn resolve_config_path(user: Option<&Path>) -> Result<PathBuf> {
    if let Some(p) = user {
        return Ok(p.to_path_buf());
    }
    let default = PathBuf::from("scanflow.toml");
    if default.exists() {
        Ok(default)
    } else {
        Ok(PathBuf::from("scanflow.example.toml"))
    }
}

fn init_logging(args: &Args, cfg: &Config, file_path: Option<&Path>) -> Result<Option<WorkerGuard>> {
    let level = args
        .log_level
        .as_deref()
        .unwrap_or(cfg.logging.level.as_str());

    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(level));

    // stdout carries command output; logs go to stderr
    let stderr_layer = if cfg.logging.json {
        tracing_subscriber::fmt::layer()
            .json()
            .with_writer(std::io::stderr)
            .with_target(true)
            .boxed()
    } else {
        tracing_subscriber::fmt::layer()
            .with_writer(std::io::stderr)
            .with_target(true)
            .boxed()
    };

    let (file_layer, guard) = if let Some(path) = file_path {
        let parent = path.parent().unwrap_or_else(|| Path::new("."));
        ensure_dir(parent)?;
        let file = std::fs::OpenOptions::new()
            .create(true)
            .append(true)
            .open(path)
            .with_context(|| format!("open log file: {}", path.display()))?;
        let (non_blocking, guard) = tracing_appender::non_blocking(file);
        let layer = tracing_subscriber::fmt::layer()
            .with_writer(non_blocking)
            .with_ansi(false)
            .with_target(true)
            .boxed();
        (Some(layer), Some(guard))
    } else {
        (None, None)
    };

    tracing_subscriber::registry()
        .with(filter)
        .with(stderr_layer)
        .with(file_layer)
        .try_init()
        .map_err(|e| anyhow!("failed to init logging: {e}"))?;

    Ok(guard)
}

fn resolve_log_path(cfg: &Config) -> Option<PathBuf> {
    if !cfg.logging.write_to_file {
        return None;
    }

    if !cfg.logging.file_path.is_empty() {
        return Some(PathBuf::from(&cfg.logging.file_path));
    }

    Some(PathBuf::from(&cfg.paths.work_dir).join("scanflow.log"))
}

fn serve(cfg: &Config, listen: Option<&str>) -> Result<()> {
    ensure_dir(Path::new(&cfg.paths.work_dir))?;
    ensure_dir(Path::new(&cfg.paths.output_dir))?;
    let pipeline = Arc::new(Pipeline::new(cfg, ToolEngine::new(cfg)));

    let runtime = tokio::runtime::Runtime::new().context("start async runtime")?;
    runtime
        .block_on(server::serve(pipeline, listen))
        .context("server failed")
}

#[derive(Debug, Serialize)]
struct OutputSummary {
    name: String,
    path: PathBuf,
    bytes: u64,
    sha256: String,
    pages: Vec<u32>,
    barcode: Option<String>,
}

impl OutputSummary {
    fn of(file: &OutputFile) -> Result<Self> {
        let bytes = std::fs::metadata(&file.path)
            .with_context(|| format!("stat output: {}", file.path.display()))?
            .len();
        let sha256 = sha256_file(&file.path)
            .with_context(|| format!("hashing output: {}", file.path.display()))?;
        Ok(Self {
            name: file.name.clone(),
            path: file.path.clone(),
            bytes,
            sha256,
            pages: file.pages.clone(),
            barcode: file.barcode.clone(),
        })
    }
}

fn process(
    cfg: &Config,
    input: Option<&Path>,
    scan_profile: Option<String>,
    options: ProcessingOptions,
) -> Result<()> {
    ensure_dir(Path::new(&cfg.paths.work_dir))?;
    let pipeline = Pipeline::new(cfg, ToolEngine::new(cfg));
    let mut scope = pipeline.scope()?;
    let request_id = scope.id();

    let source = match (input, scan_profile) {
        (Some(path), _) => scope.stage_local(path)?,
        (None, Some(profile)) => Source::Scan { profile },
        (None, None) => return Err(anyhow!("either --input or --scan-profile is required")),
    };
    info!(request = %request_id, origin = source.origin(), "processing");

    let started = now_rfc3339();
    let response = pipeline.run(scope, IngestRequest { source, options })?;

    let (shape, outputs) = match &response {
        Response::Download(d) => (
            "download",
            vec![OutputFile {
                name: d.file_name.clone(),
                path: d.path.clone(),
                pages: Vec::new(),
                barcode: None,
            }],
        ),
        Response::Files { files, .. } => ("files", files.clone()),
    };
    let outputs = outputs
        .iter()
        .map(OutputSummary::of)
        .collect::<Result<Vec<_>>>()?;

    let summary = ProcessSummary {
        request: request_id.to_string(),
        status: "ok",
        shape,
        started,
        finished: now_rfc3339(),
        outputs,
    };
    println!("{}", serde_json::to_string_pretty(&summary)?);
    Ok(())
}

#[derive(Debug, Serialize)]
struct ProcessSummary {
    request: String,
    status: &'static str,
    shape: &'static str,
    started: String,
    finished: String,
    outputs: Vec<OutputSummary>,
}

#[derive(Debug, Serialize)]
struct DetectSummary<'a> {
    input: &'a Path,
    kind: &'static str,
    #[serde(flatten)]
    language: ResolvedLanguage,
}

fn detect_language(cfg: &Config, input: &Path, lang: Option<&str>) -> Result<()> {
    ensure_dir(Path::new(&cfg.paths.work_dir))?;
    let engine = ToolEngine::new(cfg);
    let kind = DocumentKind::classify(input)?;
    let mut scope = crate::request::RequestScope::new(cfg)?;

    let cascade = LanguageCascade::new(&cfg.language, &engine);
    let language = match kind {
        DocumentKind::Pdf => cascade.resolve_pdf(lang, input, &mut scope),
        DocumentKind::Image => cascade.resolve_image(lang, input, &mut scope),
    };
    scope.sweep();

    let summary = DetectSummary {
        input,
        kind: match kind {
            DocumentKind::Pdf => "pdf",
            DocumentKind::Image => "image",
        },
        language,
    };
    println!("{}", serde_json::to_string_pretty(&summary)?);
    Ok(())
}

fn scanners(cfg: &Config) -> Result<()> {
    let engine = ToolEngine::new(cfg);
    let devices = engine.list_scanners()?;
    println!("{}", serde_json::to_string_pretty(&devices)?);
    Ok(())
}

fn doctor(cfg: &Config) -> Result<()> {
    let engine = ToolEngine::new(cfg);
    let diag = engine.doctor();
    println!("{}", serde_json::to_string_pretty(&diag)?);
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn process_summary_carries_the_request_id_as_text() {
        let id = uuid::Uuid::new_v4();
        let summary = ProcessSummary {
            request: id.to_string(),
            status: "ok",
            shape: "files",
            started: "2025-03-07T10:00:00Z".into(),
            finished: "2025-03-07T10:00:01Z".into(),
            outputs: vec![OutputSummary {
                name: "a-1.pdf".into(),
                path: PathBuf::from("out/a-1.pdf"),
                bytes: 12,
                sha256: "00".into(),
                pages: vec![1, 2],
                barcode: None,
            }],
        };
        let json = serde_json::to_value(&summary).unwrap();
        assert_eq!(json["request"], id.to_string());
        assert_eq!(json["outputs"][0]["pages"], serde_json::json!([1, 2]));
    }

    #[test]
    fn process_requires_an_input_or_a_profile() {
        assert!(Args::try_parse_from(["scanflow", "process"]).is_err());
        assert!(
            Args::try_parse_from(["scanflow", "process", "--input", "a.pdf", "--scan-profile", "p"])
                .is_err()
        );
        let args = Args::try_parse_from(["scanflow", "process", "--scan-profile", "office"]).unwrap();
        assert!(matches!(
            args.cmd,
            Command::Process { scan_profile: Some(ref p), .. } if p == "office"
        ));
    }
}
