use crate::{
    config::Config,
    error::{Error, Result},
    tracker::{TempStage, TempTracker},
    util::sanitize_file_name,
};
use serde::Serialize;
use std::collections::BTreeMap;
use std::path::{Path, PathBuf};
use uuid::Uuid;

/// Option fields exactly as a client sent them.
pub type RawOptions = BTreeMap<String, String>;

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct ProcessingOptions {
    pub ocr_enabled: bool,
    pub language: Option<String>,
    pub contains_patch: bool,
    pub patch_mode: String,
    pub naming_strategy: String,
    pub naming_pattern: Option<String>,
    pub output_dir: PathBuf,
}

impl ProcessingOptions {
    pub fn defaults(cfg: &Config) -> Self {
        Self {
            ocr_enabled: cfg.defaults.ocr_enabled,
            language: None,
            contains_patch: false,
            patch_mode: cfg.defaults.patch_mode.clone(),
            naming_strategy: cfg.defaults.naming.clone(),
            naming_pattern: non_empty(&cfg.naming.default_pattern),
            output_dir: PathBuf::from(&cfg.paths.output_dir),
        }
    }

    /// Reads the recognized fields; anything else is ignored. `ocrMode` is on
    /// unless it is literally `false`, `containsPatch` only when literally `true`.
    pub fn from_raw(raw: &RawOptions, cfg: &Config) -> Self {
        let mut opts = Self::defaults(cfg);
        let get = |k: &str| raw.get(k).map(|v| v.trim()).filter(|v| !v.is_empty());

        if let Some(v) = get("ocrMode") {
            opts.ocr_enabled = v != "false";
        }
        opts.contains_patch = get("containsPatch") == Some("true");
        if let Some(v) = get("patchMode") {
            opts.patch_mode = v.to_string();
        }
        if let Some(v) = get("naming") {
            opts.naming_strategy = v.to_string();
        }
        if let Some(v) = get("namingPattern") {
            opts.naming_pattern = Some(v.to_string());
        }
        opts.language = get("lang").map(str::to_string);
        if cfg.security.allow_output_dir_override {
            if let Some(v) = get("outputDir") {
                opts.output_dir = PathBuf::from(v);
            }
        }
        opts
    }
}

fn non_empty(s: &str) -> Option<String> {
    (!s.is_empty()).then(|| s.to_string())
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Source {
    /// A file already staged on disk; `file_name` is the client's name for it.
    Upload { path: PathBuf, file_name: String },
    Scan { profile: String },
}

impl Source {
    pub fn origin(&self) -> &'static str {
        match self {
            Source::Upload { .. } => "upload",
            Source::Scan { .. } => "scan",
        }
    }
}

#[derive(Debug, Clone)]
pub struct IngestRequest {
    pub source: Source,
    pub options: ProcessingOptions,
}

/// Everything one request owns on disk: a scratch directory and the tracker
/// of every path created on its behalf.
#[derive(Debug)]
pub struct RequestScope {
    id: Uuid,
    scratch: PathBuf,
    tracker: TempTracker,
}

impl RequestScope {
    pub fn new(cfg: &Config) -> Result<Self> {
        let id = Uuid::new_v4();
        let scratch = Path::new(&cfg.paths.work_dir).join(id.to_string());
        std::fs::create_dir_all(&scratch)?;
        let mut tracker = TempTracker::new();
        tracker.register(&scratch, TempStage::Scratch);
        Ok(Self {
            id,
            scratch,
            tracker,
        })
    }

    pub fn id(&self) -> Uuid {
        self.id
    }

    pub fn scratch_dir(&self) -> &Path {
        &self.scratch
    }

    /// Creates (if needed) and returns a named subdirectory of the scratch dir.
    pub fn subdir(&self, name: &str) -> Result<PathBuf> {
        let dir = self.scratch.join(name);
        std::fs::create_dir_all(&dir)?;
        Ok(dir)
    }

    pub fn tracker(&self) -> &TempTracker {
        &self.tracker
    }

    pub fn tracker_mut(&mut self) -> &mut TempTracker {
        &mut self.tracker
    }

    /// Writes an uploaded file under its sanitized client name.
    pub fn stage_upload(&mut self, file_name: &str, bytes: &[u8]) -> Result<Source> {
        let dir = self.subdir("upload")?;
        let name = sanitize_file_name(file_name);
        let path = dir.join(&name);
        std::fs::write(&path, bytes)?;
        self.tracker.register(&path, TempStage::Upload);
        Ok(Source::Upload {
            path,
            file_name: name,
        })
    }

    /// Stages a copy of a local file; the original is left untouched.
    pub fn stage_local(&mut self, path: &Path) -> Result<Source> {
        if !path.is_file() {
            return Err(Error::input(format!("input does not exist: {}", path.display())));
        }
        let name = crate::util::file_name(path);
        let bytes = std::fs::read(path)?;
        self.stage_upload(&name, &bytes)
    }

    pub fn sweep(&mut self) -> usize {
        self.tracker.sweep()
    }
}
