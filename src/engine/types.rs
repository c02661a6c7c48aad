use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ToolDiag {
    pub tool: String,
    pub program: String,
    pub ok: bool,
    #[serde(default)]
    pub version: Option<String>,
    #[serde(default)]
    pub error: Option<String>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ScannerDevice {
    pub id: String,
    pub name: String,
    pub driver: String,
}

/// What a scanner hands back: a bare path or an object carrying it.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(untagged)]
pub enum ScanOutcome {
    Path(PathBuf),
    Described {
        #[serde(alias = "file", alias = "filePath")]
        path: PathBuf,
    },
}

impl ScanOutcome {
    pub fn into_path(self) -> PathBuf {
        match self {
            ScanOutcome::Path(p) | ScanOutcome::Described { path: p } => p,
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SplitRequest {
    pub mode: String,
    pub lang: String,
    pub naming: String,
}

/// One splitter result entry: a bare path or a described block.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(untagged)]
pub enum SplitEntry {
    Bare(PathBuf),
    Described {
        #[serde(alias = "path")]
        file: PathBuf,
        #[serde(default)]
        pages: Option<Vec<u32>>,
        #[serde(default)]
        barcode: Option<String>,
    },
}

impl SplitEntry {
    pub fn path(&self) -> &Path {
        match self {
            SplitEntry::Bare(p) => p,
            SplitEntry::Described { file, .. } => file,
        }
    }
}
