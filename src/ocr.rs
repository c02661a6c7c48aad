use crate::{
    engine::Engine,
    error::{Error, Result},
    naming::NamingContext,
    request::RequestScope,
    tracker::TempStage,
    util::file_name,
};
use std::path::{Path, PathBuf};
use tracing::debug;

/// Recognizes one block into a searchable PDF named for position `index`.
/// The result is tracked by the request until the caller releases it.
pub fn recognize_block<E: Engine + ?Sized>(
    engine: &E,
    block: &Path,
    lang: &str,
    naming: &NamingContext,
    index: usize,
    scope: &mut RequestScope,
) -> Result<PathBuf> {
    let dir = scope.subdir("ocr")?;
    let produced = engine.recognize_pdf(block, lang, &dir)?;
    finish(produced, naming, index, scope)
}

/// Turns one image into a single-page searchable PDF.
pub fn image_to_searchable_pdf<E: Engine + ?Sized>(
    engine: &E,
    image: &Path,
    lang: &str,
    naming: &NamingContext,
    scope: &mut RequestScope,
) -> Result<PathBuf> {
    let dir = scope.subdir("ocr")?;
    let produced = engine.image_to_searchable_pdf(image, lang, &dir)?;
    finish(produced, naming, 1, scope)
}

fn finish(
    produced: PathBuf,
    naming: &NamingContext,
    index: usize,
    scope: &mut RequestScope,
) -> Result<PathBuf> {
    if !produced.is_file() {
        return Err(Error::OutputMissing {
            tool: "ocr".into(),
            path: produced,
        });
    }
    scope.tracker_mut().register(&produced, TempStage::Ocr);

    if naming.pattern().is_none() {
        return Ok(produced);
    }
    let renamed_name = naming.apply(&file_name(&produced), index);
    let renamed = produced.with_file_name(&renamed_name);
    if renamed == produced {
        return Ok(produced);
    }

    std::fs::rename(&produced, &renamed)?;
    scope.tracker_mut().release(&produced);
    scope.tracker_mut().register(&renamed, TempStage::Ocr);
    debug!(from = %produced.display(), to = %renamed.display(), "renamed recognized output");

    if !renamed.is_file() {
        return Err(Error::OutputMissing {
            tool: "rename".into(),
            path: renamed,
        });
    }
    Ok(renamed)
}
