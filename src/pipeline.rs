use crate::{
    config::Config,
    engine::{Engine, SplitRequest},
    error::{Error, Result},
    language::{LanguageCascade, ResolvedLanguage},
    naming::NamingContext,
    ocr,
    raster::{self, IMAGE_EXTENSIONS},
    request::{IngestRequest, ProcessingOptions, RequestScope, Source},
    respond::{Download, OutputFile, PatchSheet, Response, ResponseShape},
    splitter::{self, BlockOrigin, DocumentBlock},
    tracker::TempStage,
    util::{claim_unique, file_name, move_file},
};
use std::io::Read;
use std::path::{Path, PathBuf};
use std::time::Instant;
use time::Date;
use tracing::{debug, info, warn};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DocumentKind {
    Pdf,
    Image,
}

impl DocumentKind {
    /// Classifies by extension, case-insensitively.
    pub fn classify(path: &Path) -> Result<Self> {
        let ext = path
            .extension()
            .map(|e| e.to_string_lossy().to_ascii_lowercase())
            .unwrap_or_default();
        if ext == "pdf" {
            Ok(DocumentKind::Pdf)
        } else if IMAGE_EXTENSIONS.contains(&ext.as_str()) {
            Ok(DocumentKind::Image)
        } else {
            Err(Error::input(format!(
                "unsupported file type: {}",
                file_name(path)
            )))
        }
    }
}

/// How a PDF travels through the pipeline, chosen once per request.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PdfRoute {
    /// Serve the input back untouched.
    Passthrough,
    /// Split at separator sheets and return the blocks as they are.
    SplitOnly,
    Recognize { split: bool },
}

impl PdfRoute {
    pub fn select(ocr_enabled: bool, contains_patch: bool) -> Self {
        match (ocr_enabled, contains_patch) {
            (false, false) => PdfRoute::Passthrough,
            (false, true) => PdfRoute::SplitOnly,
            (true, split) => PdfRoute::Recognize { split },
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PipelineState {
    ReceivedInput,
    Classified(&'static str),
    TypeDispatched(DocumentKind),
    RouteSelected(PdfRoute),
    LanguageResolved,
    Split(usize),
    Recognized { block: usize },
    ResponseComposed(ResponseShape),
}

pub struct Pipeline<E: Engine> {
    cfg: Config,
    engine: E,
}

impl<E: Engine> Pipeline<E> {
    pub fn new(cfg: &Config, engine: E) -> Self {
        Self {
            cfg: cfg.clone(),
            engine,
        }
    }

    pub fn config(&self) -> &Config {
        &self.cfg
    }

    pub fn engine(&self) -> &E {
        &self.engine
    }

    pub fn scope(&self) -> Result<RequestScope> {
        RequestScope::new(&self.cfg)
    }

    pub fn run(&self, scope: RequestScope, req: IngestRequest) -> Result<Response> {
        let naming = NamingContext::today(req.options.naming_pattern.as_deref());
        self.execute(scope, req, naming)
    }

    /// Same as [`Pipeline::run`] with the naming date pinned.
    pub fn run_on(&self, scope: RequestScope, req: IngestRequest, date: Date) -> Result<Response> {
        let naming = NamingContext::new(req.options.naming_pattern.as_deref(), date);
        self.execute(scope, req, naming)
    }

    fn execute(
        &self,
        mut scope: RequestScope,
        req: IngestRequest,
        naming: NamingContext,
    ) -> Result<Response> {
        let started = Instant::now();
        let id = scope.id();
        let result = self.drive(&mut scope, &req, &naming);
        if let Ok(resp) = &result {
            // handed over; anything else still tracked goes with the sweep
            for path in resp.paths() {
                scope.tracker_mut().release(path);
            }
        }

        let failures = scope.sweep();
        if failures > 0 {
            warn!(request = %id, failures, "sweep left resources behind");
        }

        match &result {
            Ok(resp) => info!(
                request = %id,
                shape = ?resp.shape(),
                elapsed_ms = started.elapsed().as_millis() as u64,
                "request finished"
            ),
            Err(err) => warn!(
                request = %id,
                kind = ?err.kind(),
                elapsed_ms = started.elapsed().as_millis() as u64,
                "request failed: {err}"
            ),
        }
        result
    }

    fn drive(
        &self,
        scope: &mut RequestScope,
        req: &IngestRequest,
        naming: &NamingContext,
    ) -> Result<Response> {
        self.transition(scope, PipelineState::ReceivedInput);
        let opts = &req.options;
        std::fs::create_dir_all(&opts.output_dir)?;

        let source = self.acquire(&req.source, scope)?;
        self.transition(scope, PipelineState::Classified(req.source.origin()));

        let kind = DocumentKind::classify(&source)?;
        self.transition(scope, PipelineState::TypeDispatched(kind));

        let resp = match kind {
            DocumentKind::Pdf => self.run_pdf(&source, opts, naming, scope)?,
            DocumentKind::Image => self.run_image(&source, opts, naming, scope)?,
        };
        self.transition(scope, PipelineState::ResponseComposed(resp.shape()));
        Ok(resp)
    }

    fn acquire(&self, source: &Source, scope: &mut RequestScope) -> Result<PathBuf> {
        match source {
            Source::Upload { path, .. } => {
                if !path.is_file() {
                    return Err(Error::input("no file received"));
                }
                Ok(path.clone())
            }
            Source::Scan { profile } => {
                let profile = profile.trim();
                if profile.is_empty() {
                    return Err(Error::input("scan requested without a profile name"));
                }
                let dir = scope.subdir("scan")?;
                let path = self.engine.scan(profile, &dir)?.into_path();
                scope.tracker_mut().register(&path, TempStage::Scan);
                if !path.is_file() {
                    return Err(Error::OutputMissing {
                        tool: "scanner".into(),
                        path,
                    });
                }
                info!(profile, path = %path.display(), "scan acquired");
                Ok(path)
            }
        }
    }

    fn run_pdf(
        &self,
        source: &Path,
        opts: &ProcessingOptions,
        naming: &NamingContext,
        scope: &mut RequestScope,
    ) -> Result<Response> {
        validate_pdf(source, self.cfg.limits.min_pdf_bytes)?;
        let route = PdfRoute::select(opts.ocr_enabled, opts.contains_patch);
        self.transition(scope, PipelineState::RouteSelected(route));

        match route {
            PdfRoute::Passthrough => {
                let name = file_name(source);
                self.retain_download(source, &opts.output_dir, name, scope)
            }
            PdfRoute::SplitOnly => {
                let lang = self.resolve_pdf_language(source, opts, scope);
                let blocks = self.split(source, opts, &lang, scope)?;
                let mut files = Vec::with_capacity(blocks.len());
                for block in blocks {
                    if !block.path.is_file() {
                        warn!(block = block.ordinal, "split block vanished, skipping");
                        continue;
                    }
                    let name = self.split_block_name(&block, naming);
                    let path = self.retain_output(&block.path, &opts.output_dir, &name, scope)?;
                    files.push(OutputFile {
                        name,
                        path,
                        pages: block.pages,
                        barcode: block.barcode,
                    });
                }
                if files.is_empty() {
                    return Err(Error::NoOutput {
                        details: "every split block vanished".into(),
                    });
                }
                Ok(Response::Files {
                    message: format!("{} document(s) split", files.len()),
                    files,
                })
            }
            PdfRoute::Recognize { split } => {
                let lang = self.resolve_pdf_language(source, opts, scope);
                let blocks = if split {
                    self.split(source, opts, &lang, scope)?
                } else {
                    vec![DocumentBlock::whole(source)]
                };
                self.recognize_blocks(blocks, &lang, opts, naming, scope)
            }
        }
    }

    fn recognize_blocks(
        &self,
        blocks: Vec<DocumentBlock>,
        lang: &ResolvedLanguage,
        opts: &ProcessingOptions,
        naming: &NamingContext,
        scope: &mut RequestScope,
    ) -> Result<Response> {
        let sole = blocks.len() == 1;
        let mut recognized = Vec::with_capacity(blocks.len());

        for block in blocks {
            if !block.path.is_file() {
                if sole {
                    return Err(Error::NoOutput {
                        details: format!("{} vanished before recognition", block.path.display()),
                    });
                }
                warn!(block = block.ordinal, "block vanished before recognition, skipping");
                continue;
            }
            match ocr::recognize_block(
                &self.engine,
                &block.path,
                &lang.code,
                naming,
                block.ordinal,
                scope,
            ) {
                Ok(path) => {
                    self.transition(scope, PipelineState::Recognized { block: block.ordinal });
                    recognized.push((block, path));
                }
                Err(err @ Error::OutputMissing { .. }) if !sole => {
                    warn!(block = block.ordinal, "block produced no output, skipping: {err}");
                }
                Err(err) => return Err(err),
            }
        }

        if recognized.is_empty() {
            return Err(Error::NoOutput {
                details: "no block produced a recognized document".into(),
            });
        }

        if ResponseShape::select(opts.contains_patch, recognized.len()) == ResponseShape::Download {
            let (_, path) = recognized.remove(0);
            let name = file_name(&path);
            return self.retain_download(&path, &opts.output_dir, name, scope);
        }

        let mut files = Vec::with_capacity(recognized.len());
        for (block, path) in recognized {
            let name = file_name(&path);
            let path = self.retain_output(&path, &opts.output_dir, &name, scope)?;
            files.push(OutputFile {
                name,
                path,
                pages: block.pages,
                barcode: block.barcode,
            });
        }
        Ok(Response::Files {
            message: format!("{} document(s) processed", files.len()),
            files,
        })
    }

    fn run_image(
        &self,
        source: &Path,
        opts: &ProcessingOptions,
        naming: &NamingContext,
        scope: &mut RequestScope,
    ) -> Result<Response> {
        let dir = scope.subdir("image")?;
        let normalized = dir.join(file_name(source));
        raster::strip_alpha(source, &normalized)?;
        scope.tracker_mut().register(&normalized, TempStage::Image);

        let lang = LanguageCascade::new(&self.cfg.language, &self.engine).resolve_image(
            opts.language.as_deref(),
            &normalized,
            scope,
        );
        self.transition(scope, PipelineState::LanguageResolved);

        let pdf = ocr::image_to_searchable_pdf(&self.engine, &normalized, &lang.code, naming, scope)?;
        self.transition(scope, PipelineState::Recognized { block: 1 });

        let name = file_name(&pdf);
        self.retain_download(&pdf, &opts.output_dir, name, scope)
    }

    /// Generates separator sheets from `data` and returns them in memory.
    pub fn generate_patch(&self, mut scope: RequestScope, data: &str) -> Result<Vec<PatchSheet>> {
        let result = self.patch_sheets(&mut scope, data);
        scope.sweep();
        result
    }

    fn patch_sheets(&self, scope: &mut RequestScope, data: &str) -> Result<Vec<PatchSheet>> {
        if data.trim().is_empty() {
            return Err(Error::input("patchData is required"));
        }
        let dir = scope.subdir("patch")?;
        let path = self.engine.generate_patch(data, &dir)?;
        if !path.is_file() {
            return Err(Error::OutputMissing {
                tool: "splitter".into(),
                path,
            });
        }
        let sheet = PatchSheet::read(&path)?;
        info!(name = %sheet.name, bytes = sheet.content.len(), "patch sheet generated");
        Ok(vec![sheet])
    }

    fn resolve_pdf_language(
        &self,
        source: &Path,
        opts: &ProcessingOptions,
        scope: &mut RequestScope,
    ) -> ResolvedLanguage {
        let lang = LanguageCascade::new(&self.cfg.language, &self.engine).resolve_pdf(
            opts.language.as_deref(),
            source,
            scope,
        );
        self.transition(scope, PipelineState::LanguageResolved);
        lang
    }

    fn split(
        &self,
        source: &Path,
        opts: &ProcessingOptions,
        lang: &ResolvedLanguage,
        scope: &mut RequestScope,
    ) -> Result<Vec<DocumentBlock>> {
        let req = SplitRequest {
            mode: opts.patch_mode.clone(),
            lang: lang.code.clone(),
            naming: opts.naming_strategy.clone(),
        };
        let blocks = splitter::split_document(&self.engine, source, &req, scope)?;
        self.transition(scope, PipelineState::Split(blocks.len()));
        Ok(blocks)
    }

    fn split_block_name(&self, block: &DocumentBlock, naming: &NamingContext) -> String {
        let name = block.file_name();
        let rename = match block.origin {
            BlockOrigin::DescribedSplit => true,
            BlockOrigin::BareSplit => self.cfg.naming.rename_bare_split_blocks,
            BlockOrigin::Whole => false,
        };
        if rename {
            naming.apply(&name, block.ordinal)
        } else {
            name
        }
    }

    /// Moves a result into the output directory under `name`, or under
    /// `name-2`, `name-3`, ... when a file of that name is already there.
    fn retain_output(
        &self,
        path: &Path,
        out_dir: &Path,
        name: &str,
        scope: &mut RequestScope,
    ) -> Result<PathBuf> {
        let dest = claim_unique(out_dir, name)?;
        self.keep(path, dest, scope)
    }

    /// Moves the single result to a path private to this request; the client
    /// still receives it as `name`.
    fn retain_download(
        &self,
        path: &Path,
        out_dir: &Path,
        name: String,
        scope: &mut RequestScope,
    ) -> Result<Response> {
        let dest = claim_unique(out_dir, &format!("{}_{name}", scope.id()))?;
        let path = self.keep(path, dest, scope)?;
        Ok(Response::Download(Download {
            path,
            file_name: name,
            remove_after: true,
        }))
    }

    /// The destination stays tracked until the response is handed over, so a
    /// later failure removes it with everything else.
    fn keep(&self, path: &Path, dest: PathBuf, scope: &mut RequestScope) -> Result<PathBuf> {
        scope.tracker_mut().register(&dest, TempStage::Output);
        move_file(path, &dest)?;
        scope.tracker_mut().release(path);
        debug!(dest = %dest.display(), "output retained");
        Ok(dest)
    }

    fn transition(&self, scope: &RequestScope, state: PipelineState) {
        info!(request = %scope.id(), ?state, "pipeline transition");
    }
}

/// A PDF must carry the `%PDF` signature and be at least `min_bytes` long.
pub fn validate_pdf(path: &Path, min_bytes: u64) -> Result<()> {
    let len = std::fs::metadata(path)?.len();
    let mut header = [0u8; 4];
    let read = std::fs::File::open(path)?.read(&mut header)?;
    if read < header.len() || &header != b"%PDF" {
        return Err(Error::input(format!(
            "{} is not a valid PDF",
            file_name(path)
        )));
    }
    if len < min_bytes {
        return Err(Error::input(format!(
            "{} is too small to be a valid PDF ({len} bytes)",
            file_name(path)
        )));
    }
    Ok(())
}
