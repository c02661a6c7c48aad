use crate::{
    engine::{Engine, SplitEntry, SplitRequest},
    error::{Error, Result},
    request::RequestScope,
    tracker::TempStage,
};
use serde::Serialize;
use std::path::{Path, PathBuf};
use tracing::info;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum BlockOrigin {
    /// The unsplit input standing in as the only block.
    Whole,
    /// The splitter returned just a path.
    BareSplit,
    /// The splitter described the block (pages, barcode).
    DescribedSplit,
}

/// One logical document within a request.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct DocumentBlock {
    /// 1-based position within the request.
    pub ordinal: usize,
    pub path: PathBuf,
    pub pages: Vec<u32>,
    pub barcode: Option<String>,
    pub origin: BlockOrigin,
}

impl DocumentBlock {
    pub fn whole(path: impl Into<PathBuf>) -> Self {
        Self {
            ordinal: 1,
            path: path.into(),
            pages: Vec::new(),
            barcode: None,
            origin: BlockOrigin::Whole,
        }
    }

    pub fn from_entry(ordinal: usize, entry: SplitEntry) -> Self {
        match entry {
            SplitEntry::Bare(path) => Self {
                ordinal,
                path,
                pages: Vec::new(),
                barcode: None,
                origin: BlockOrigin::BareSplit,
            },
            SplitEntry::Described {
                file,
                pages,
                barcode,
            } => Self {
                ordinal,
                path: file,
                pages: pages.unwrap_or_default(),
                barcode: barcode.filter(|b| !b.trim().is_empty()),
                origin: BlockOrigin::DescribedSplit,
            },
        }
    }

    pub fn file_name(&self) -> String {
        crate::util::file_name(&self.path)
    }
}

/// Splits `pdf` at its separator sheets. Every returned block is already
/// tracked by the request.
pub fn split_document<E: Engine + ?Sized>(
    engine: &E,
    pdf: &Path,
    req: &SplitRequest,
    scope: &mut RequestScope,
) -> Result<Vec<DocumentBlock>> {
    let dir = scope.subdir("split")?;
    let entries = engine.split(pdf, req, &dir)?;

    let blocks: Vec<DocumentBlock> = entries
        .into_iter()
        .enumerate()
        .map(|(i, entry)| DocumentBlock::from_entry(i + 1, entry))
        .collect();
    for block in &blocks {
        scope.tracker_mut().register(&block.path, TempStage::Split);
    }

    if blocks.is_empty() {
        return Err(Error::NoOutput {
            details: format!("splitter returned no blocks for {}", pdf.display()),
        });
    }
    info!(count = blocks.len(), mode = %req.mode, "document split");
    Ok(blocks)
}
