pub mod tools;
pub mod types;

use crate::error::Result;
use std::path::{Path, PathBuf};

pub use tools::ToolEngine;
pub use types::{ScanOutcome, ScannerDevice, SplitEntry, SplitRequest, ToolDiag};

/// External collaborators the pipeline sequences. Every call is a single
/// attempt; retrying is the caller's business.
pub trait Engine: Send + Sync {
    fn doctor(&self) -> Vec<ToolDiag>;

    fn list_scanners(&self) -> Result<Vec<ScannerDevice>>;
    fn scan(&self, profile: &str, out_dir: &Path) -> Result<ScanOutcome>;

    /// Embedded text layer, possibly empty.
    fn extract_text(&self, pdf: &Path) -> Result<String>;
    fn page_count(&self, pdf: &Path) -> Result<u32>;
    /// Rasterizes one 1-based page into `out_dir`.
    fn render_page(&self, pdf: &Path, page: u32, out_dir: &Path) -> Result<PathBuf>;
    fn recognize_image(&self, image: &Path) -> Result<String>;
    /// Raw detector code for `sample`, `None` when nothing was detected.
    fn detect_language(&self, sample: &str) -> Result<Option<String>>;

    fn split(&self, pdf: &Path, req: &SplitRequest, out_dir: &Path) -> Result<Vec<SplitEntry>>;
    fn generate_patch(&self, data: &str, out_dir: &Path) -> Result<PathBuf>;

    /// Returns the path the OCR tool declared; it may not exist.
    fn recognize_pdf(&self, pdf: &Path, lang: &str, out_dir: &Path) -> Result<PathBuf>;
    fn image_to_searchable_pdf(&self, image: &Path, lang: &str, out_dir: &Path)
        -> Result<PathBuf>;
}
