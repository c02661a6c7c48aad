#![allow(dead_code)]

use scanflow::{
    config::Config,
    engine::{Engine, ScanOutcome, ScannerDevice, SplitEntry, SplitRequest, ToolDiag},
    error::{Error, Result},
    request::{IngestRequest, ProcessingOptions, RequestScope, Source},
};
use std::collections::{BTreeMap, BTreeSet};
use std::path::{Path, PathBuf};
use std::sync::Mutex;

/// How the fake splitter describes one block.
#[derive(Debug, Clone)]
pub enum FakeBlock {
    Bare(&'static str),
    Described {
        name: &'static str,
        pages: Vec<u32>,
        barcode: Option<&'static str>,
    },
}

impl FakeBlock {
    fn name(&self) -> &'static str {
        match self {
            FakeBlock::Bare(name) | FakeBlock::Described { name, .. } => *name,
        }
    }
}

/// How a scripted tool call goes wrong.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Failure {
    Tool,
    Timeout,
}

impl Failure {
    fn error(self, tool: &str) -> Error {
        match self {
            Failure::Tool => Error::tool(tool, format!("{tool} crashed: exit status 2")),
            Failure::Timeout => Error::Timeout {
                tool: tool.to_string(),
                seconds: 1,
            },
        }
    }
}

/// Scripted engine writing real files, recording every call.
#[derive(Debug, Default)]
pub struct FakeEngine {
    pub embedded_text: String,
    pub page_count: u32,
    pub page_text: String,
    pub detected: Option<String>,
    pub detect_fails: bool,
    pub blocks: Vec<FakeBlock>,
    /// Stems whose recognized output is reported but never written.
    pub ocr_missing: BTreeSet<String>,
    /// Stems whose recognition fails outright.
    pub ocr_fails: BTreeMap<String, Failure>,
    pub split_fails: Option<Failure>,
    pub scan_fails: Option<Failure>,
    pub calls: Mutex<Vec<String>>,
}

impl FakeEngine {
    pub fn new() -> Self {
        Self {
            page_count: 1,
            ..Self::default()
        }
    }

    pub fn calls(&self) -> Vec<String> {
        self.calls.lock().unwrap().clone()
    }

    pub fn called(&self, prefix: &str) -> usize {
        self.calls().iter().filter(|c| c.starts_with(prefix)).count()
    }

    fn record(&self, call: String) {
        self.calls.lock().unwrap().push(call);
    }
}

fn stem(path: &Path) -> String {
    path.file_stem().unwrap().to_string_lossy().into_owned()
}

impl Engine for FakeEngine {
    fn doctor(&self) -> Vec<ToolDiag> {
        Vec::new()
    }

    fn list_scanners(&self) -> Result<Vec<ScannerDevice>> {
        self.record("list_scanners".into());
        Ok(vec![ScannerDevice {
            id: "wia_Office Scanner".into(),
            name: "Office Scanner".into(),
            driver: "wia".into(),
        }])
    }

    fn scan(&self, profile: &str, out_dir: &Path) -> Result<ScanOutcome> {
        self.record(format!("scan:{profile}"));
        if profile == "missing" {
            return Err(Error::input(format!("unknown scan profile: {profile}")));
        }
        if let Some(failure) = self.scan_fails {
            return Err(failure.error("scanner"));
        }
        let path = out_dir.join("scan_20250301_101500.pdf");
        std::fs::write(&path, pdf_bytes("scanned page"))?;
        Ok(ScanOutcome::Described { path })
    }

    fn extract_text(&self, pdf: &Path) -> Result<String> {
        self.record(format!("extract_text:{}", stem(pdf)));
        Ok(self.embedded_text.clone())
    }

    fn page_count(&self, pdf: &Path) -> Result<u32> {
        self.record(format!("page_count:{}", stem(pdf)));
        Ok(self.page_count)
    }

    fn render_page(&self, _pdf: &Path, page: u32, out_dir: &Path) -> Result<PathBuf> {
        self.record(format!("render_page:{page}"));
        let path = out_dir.join(format!("page-{page}.png"));
        std::fs::write(&path, b"png")?;
        Ok(path)
    }

    fn recognize_image(&self, image: &Path) -> Result<String> {
        self.record(format!("recognize_image:{}", stem(image)));
        Ok(self.page_text.clone())
    }

    fn detect_language(&self, sample: &str) -> Result<Option<String>> {
        self.record(format!("detect_language:{}", sample.chars().count()));
        if self.detect_fails {
            return Err(Error::tool("language_detector", "boom"));
        }
        Ok(self.detected.clone())
    }

    fn split(&self, pdf: &Path, req: &SplitRequest, out_dir: &Path) -> Result<Vec<SplitEntry>> {
        self.record(format!("split:{}:{}:{}", stem(pdf), req.mode, req.lang));
        if let Some(failure) = self.split_fails {
            return Err(failure.error("splitter"));
        }
        let mut entries = Vec::new();
        for block in &self.blocks {
            let path = out_dir.join(block.name());
            std::fs::write(&path, pdf_bytes(block.name()))?;
            entries.push(match block {
                FakeBlock::Bare(_) => SplitEntry::Bare(path),
                FakeBlock::Described { pages, barcode, .. } => SplitEntry::Described {
                    file: path,
                    pages: Some(pages.clone()),
                    barcode: barcode.map(str::to_string),
                },
            });
        }
        Ok(entries)
    }

    fn generate_patch(&self, data: &str, out_dir: &Path) -> Result<PathBuf> {
        self.record(format!("generate_patch:{data}"));
        let path = out_dir.join("patch_sheet.pdf");
        std::fs::write(&path, pdf_bytes(data))?;
        Ok(path)
    }

    fn recognize_pdf(&self, pdf: &Path, lang: &str, out_dir: &Path) -> Result<PathBuf> {
        let stem = stem(pdf);
        self.record(format!("recognize_pdf:{stem}:{lang}"));
        if let Some(failure) = self.ocr_fails.get(&stem) {
            return Err(failure.error("ocr"));
        }
        let target = out_dir.join(format!("{stem}_ocr.pdf"));
        if !self.ocr_missing.contains(&stem) {
            std::fs::copy(pdf, &target)?;
        }
        Ok(target)
    }

    fn image_to_searchable_pdf(
        &self,
        image: &Path,
        lang: &str,
        out_dir: &Path,
    ) -> Result<PathBuf> {
        let stem = stem(image);
        self.record(format!("image_to_searchable_pdf:{stem}:{lang}"));
        let target = out_dir.join(format!("{stem}_ocr.pdf"));
        std::fs::write(&target, pdf_bytes(&stem))?;
        Ok(target)
    }
}

/// A PDF-looking payload large enough to pass validation.
pub fn pdf_bytes(marker: &str) -> Vec<u8> {
    let mut bytes = format!("%PDF-1.4\n% {marker}\n").into_bytes();
    bytes.resize(1200, b' ');
    bytes
}

pub fn test_config(root: &Path) -> Config {
    let mut cfg = Config::default();
    cfg.paths.work_dir = root.join("work").display().to_string();
    cfg.paths.output_dir = root.join("out").display().to_string();
    cfg.logging.write_to_file = false;
    cfg
}

pub fn upload(
    cfg: &Config,
    name: &str,
    bytes: &[u8],
    options: ProcessingOptions,
) -> (RequestScope, IngestRequest) {
    let mut scope = RequestScope::new(cfg).unwrap();
    let source = scope.stage_upload(name, bytes).unwrap();
    (scope, IngestRequest { source, options })
}

pub fn scan(cfg: &Config, profile: &str, options: ProcessingOptions) -> (RequestScope, IngestRequest) {
    let scope = RequestScope::new(cfg).unwrap();
    let source = Source::Scan {
        profile: profile.to_string(),
    };
    (scope, IngestRequest { source, options })
}

pub fn write_png(path: &Path) {
    image::RgbaImage::from_pixel(4, 4, image::Rgba([200, 10, 10, 128]))
        .save(path)
        .unwrap();
}

pub fn jpeg_bytes() -> Vec<u8> {
    let img = image::DynamicImage::ImageRgb8(image::RgbImage::from_pixel(
        8,
        8,
        image::Rgb([240, 240, 240]),
    ));
    let mut out = std::io::Cursor::new(Vec::new());
    img.write_to(&mut out, image::ImageFormat::Jpeg).unwrap();
    out.into_inner()
}

/// Entries in the output directory, empty when it does not exist.
pub fn output_entries(cfg: &Config) -> BTreeSet<String> {
    match std::fs::read_dir(&cfg.paths.output_dir) {
        Ok(rd) => rd
            .map(|e| e.unwrap().file_name().to_string_lossy().into_owned())
            .collect(),
        Err(_) => BTreeSet::new(),
    }
}

/// Entries left under the work directory (scratch dirs of finished requests).
pub fn work_entries(cfg: &Config) -> usize {
    match std::fs::read_dir(&cfg.paths.work_dir) {
        Ok(rd) => rd.count(),
        Err(_) => 0,
    }
}
