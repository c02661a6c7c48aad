//! Recognition language resolution.
//!
//! Rungs, first hit wins: an explicit code, detection over the embedded text
//! layer, detection over a few recognized sample pages. Whatever happens, the
//! result is a usable code; the configured fallback is the floor.

use crate::{
    config,
    engine::Engine,
    request::RequestScope,
    tracker::TempStage,
};
use serde::Serialize;
use std::collections::BTreeMap;
use std::path::Path;
use tracing::{debug, info, warn};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum LanguageSource {
    Explicit,
    EmbeddedText,
    Sampled,
    Fallback,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct ResolvedLanguage {
    pub code: String,
    pub source: LanguageSource,
}

/// What to recognize when there is no text to detect from.
#[derive(Debug, Clone, Copy)]
pub enum Sample<'a> {
    PdfPages(&'a Path),
    Image(&'a Path),
    Nothing,
}

pub struct LanguageCascade<'a, E: Engine + ?Sized> {
    cfg: &'a config::Language,
    engine: &'a E,
}

impl<'a, E: Engine + ?Sized> LanguageCascade<'a, E> {
    pub fn new(cfg: &'a config::Language, engine: &'a E) -> Self {
        Self { cfg, engine }
    }

    /// Resolves the language of a PDF. The text layer is only extracted when
    /// no usable explicit code was given.
    pub fn resolve_pdf(
        &self,
        explicit: Option<&str>,
        pdf: &Path,
        scope: &mut RequestScope,
    ) -> ResolvedLanguage {
        if let Some(code) = self.explicit(explicit) {
            return self.resolved(code, LanguageSource::Explicit);
        }
        let embedded = self.engine.extract_text(pdf).unwrap_or_else(|err| {
            warn!("text extraction failed, treating as empty: {err}");
            String::new()
        });
        self.resolve(None, Some(&embedded), Sample::PdfPages(pdf), scope)
    }

    pub fn resolve_image(
        &self,
        explicit: Option<&str>,
        image: &Path,
        scope: &mut RequestScope,
    ) -> ResolvedLanguage {
        self.resolve(explicit, None, Sample::Image(image), scope)
    }

    pub fn resolve(
        &self,
        explicit: Option<&str>,
        embedded: Option<&str>,
        sample: Sample<'_>,
        scope: &mut RequestScope,
    ) -> ResolvedLanguage {
        if let Some(code) = self.explicit(explicit) {
            return self.resolved(code, LanguageSource::Explicit);
        }

        if let Some(text) = embedded.map(str::trim).filter(|t| !t.is_empty()) {
            return match self.detect(text) {
                Some(code) => self.resolved(code, LanguageSource::EmbeddedText),
                None => self.fallback(),
            };
        }

        let sampled = match sample {
            Sample::PdfPages(pdf) => self.sample_pages(pdf, scope),
            Sample::Image(image) => self.recognize(image),
            Sample::Nothing => String::new(),
        };
        if sampled.trim().is_empty() {
            return self.fallback();
        }
        match self.detect(&sampled) {
            Some(code) => self.resolved(code, LanguageSource::Sampled),
            None => self.fallback(),
        }
    }

    fn explicit(&self, explicit: Option<&str>) -> Option<String> {
        explicit
            .map(str::trim)
            .filter(|l| l.chars().count() >= self.cfg.min_explicit_len)
            .map(str::to_string)
    }

    /// Runs the detector on the head of `sample`; the detector takes its input
    /// as a single argument, so the text is capped.
    fn detect(&self, sample: &str) -> Option<String> {
        let head: String = sample.chars().take(self.cfg.embedded_sample_chars).collect();
        match self.engine.detect_language(&head) {
            Ok(Some(raw)) => {
                let mapped = map_code(&self.cfg.codes, &raw);
                if mapped.is_none() {
                    debug!("detector code {raw:?} has no recognizer mapping");
                }
                mapped
            }
            Ok(None) => None,
            Err(err) => {
                warn!("language detection failed: {err}");
                None
            }
        }
    }

    fn recognize(&self, image: &Path) -> String {
        self.engine.recognize_image(image).unwrap_or_else(|err| {
            warn!(image = %image.display(), "sample recognition failed: {err}");
            String::new()
        })
    }

    fn sample_pages(&self, pdf: &Path, scope: &mut RequestScope) -> String {
        let total = self.engine.page_count(pdf).unwrap_or_else(|err| {
            warn!("page count failed, nothing to sample: {err}");
            0
        });
        let pages = self.cfg.sample_pages.min(total);
        if pages == 0 {
            return String::new();
        }
        let dir = match scope.subdir("language") {
            Ok(dir) => dir,
            Err(err) => {
                warn!("cannot create sampling dir: {err}");
                return String::new();
            }
        };

        let mut text = String::new();
        for page in 1..=pages {
            let image = match self.engine.render_page(pdf, page, &dir) {
                Ok(image) => image,
                Err(err) => {
                    warn!("page {page} could not be rendered: {err}");
                    continue;
                }
            };
            scope.tracker_mut().register(&image, TempStage::Language);
            let page_text = self.recognize(&image);
            if !page_text.is_empty() {
                text.push_str(&page_text);
                text.push('\n');
            }
        }
        debug!(pages, chars = text.chars().count(), "sampled pages for language");
        text
    }

    fn resolved(&self, code: String, source: LanguageSource) -> ResolvedLanguage {
        info!(code = %code, ?source, "language resolved");
        ResolvedLanguage { code, source }
    }

    fn fallback(&self) -> ResolvedLanguage {
        self.resolved(self.cfg.fallback.clone(), LanguageSource::Fallback)
    }
}

/// Maps a detector code (`fr`, `fr-CA`, `fra`...) to the recognizer's code by prefix.
pub fn map_code(codes: &BTreeMap<String, String>, raw: &str) -> Option<String> {
    let raw = raw.trim().to_ascii_lowercase();
    if raw.is_empty() {
        return None;
    }
    codes
        .iter()
        .find(|(prefix, _)| raw.starts_with(prefix.as_str()))
        .map(|(_, code)| code.clone())
}
