//! What a finished request hands back, independent of transport.

use crate::error::Result;
use base64::{Engine as _, engine::general_purpose::STANDARD};
use serde::Serialize;
use std::path::{Path, PathBuf};
use tracing::warn;

/// JSON when the request carried separator sheets or produced more than one
/// file; a raw download otherwise.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ResponseShape {
    Download,
    Files,
}

impl ResponseShape {
    pub fn select(contains_patch: bool, outputs: usize) -> Self {
        if contains_patch || outputs > 1 {
            ResponseShape::Files
        } else {
            ResponseShape::Download
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct OutputFile {
    pub name: String,
    pub path: PathBuf,
    pub pages: Vec<u32>,
    pub barcode: Option<String>,
}

impl OutputFile {
    pub fn read_content(&self) -> Result<Vec<u8>> {
        Ok(std::fs::read(&self.path)?)
    }
}

/// A single file to stream back. With `remove_after` the file is deleted once
/// the transfer ends, however it ends.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Download {
    pub path: PathBuf,
    pub file_name: String,
    pub remove_after: bool,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Response {
    Download(Download),
    Files {
        message: String,
        files: Vec<OutputFile>,
    },
}

impl Response {
    pub fn shape(&self) -> ResponseShape {
        match self {
            Response::Download(_) => ResponseShape::Download,
            Response::Files { .. } => ResponseShape::Files,
        }
    }

    /// Every file the response hands over.
    pub fn paths(&self) -> Vec<&Path> {
        match self {
            Response::Download(d) => vec![d.path.as_path()],
            Response::Files { files, .. } => files.iter().map(|f| f.path.as_path()).collect(),
        }
    }

    /// Deletes every file the response hands over.
    pub fn discard(&self) {
        for path in self.paths() {
            if let Err(err) = std::fs::remove_file(path) {
                warn!(path = %path.display(), "failed to discard output: {err}");
            }
        }
    }
}

#[derive(Debug, Clone, Serialize)]
pub struct FileEntry {
    pub name: String,
    pub content: String,
    pub pages: Vec<u32>,
    pub barcode: Option<String>,
}

#[derive(Debug, Clone, Serialize)]
pub struct FilesBody {
    pub status: &'static str,
    pub message: String,
    pub files: Vec<FileEntry>,
}

/// Builds the multi-file JSON body, inlining each file base64-encoded.
pub fn files_body(message: &str, files: &[OutputFile]) -> Result<FilesBody> {
    let files = files
        .iter()
        .map(|f| -> Result<FileEntry> {
            Ok(FileEntry {
                name: f.name.clone(),
                content: STANDARD.encode(f.read_content()?),
                pages: f.pages.clone(),
                barcode: f.barcode.clone(),
            })
        })
        .collect::<Result<Vec<_>>>()?;
    Ok(FilesBody {
        status: "success",
        message: message.to_string(),
        files,
    })
}

/// A generated separator sheet, held in memory.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PatchSheet {
    pub name: String,
    pub content: Vec<u8>,
    pub mime_type: String,
}

impl PatchSheet {
    pub fn read(path: &Path) -> Result<Self> {
        Ok(Self {
            name: crate::util::file_name(path),
            content: std::fs::read(path)?,
            mime_type: mime_guess::from_path(path)
                .first_or_octet_stream()
                .essence_str()
                .to_string(),
        })
    }
}

#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct PatchEntry {
    pub name: String,
    pub base64: String,
    pub mime_type: String,
}

#[derive(Debug, Clone, Serialize)]
pub struct PatchBody {
    pub status: &'static str,
    pub message: String,
    pub results: Vec<PatchEntry>,
}

pub fn patch_body(sheets: &[PatchSheet]) -> PatchBody {
    PatchBody {
        status: "success",
        message: format!("{} patch sheet(s) generated", sheets.len()),
        results: sheets
            .iter()
            .map(|s| PatchEntry {
                name: s.name.clone(),
                base64: STANDARD.encode(&s.content),
                mime_type: s.mime_type.clone(),
            })
            .collect(),
    }
}
