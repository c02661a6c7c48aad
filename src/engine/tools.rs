use super::{Engine, types::*};
use crate::{
    config::{Config, ToolCommand},
    error::{Error, Result},
    util::{file_name, move_file, sanitize_file_name},
};
use regex::Regex;
use std::ffi::OsString;
use std::io::Read;
use std::path::{Path, PathBuf};
use std::process::{Child, Command, Output, Stdio};
use std::sync::LazyLock;
use std::time::{Duration, Instant};
use time::macros::format_description;
use tracing::{debug, warn};

static PATCH_OUTPUT: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r"(?im)^.*patch[^:\n]*:\s*(\S.*?\.(?:pdf|png))\s*$").expect("valid patch regex")
});

/// Engine backed by command-line tools run as child processes.
pub struct ToolEngine {
    cfg: Config,
}

impl ToolEngine {
    pub fn new(cfg: &Config) -> Self {
        Self { cfg: cfg.clone() }
    }

    fn run_tool(
        &self,
        name: &str,
        tool: &ToolCommand,
        args: Vec<OsString>,
        cwd: Option<&Path>,
    ) -> Result<Output> {
        debug!(
            "tool run {} program={} args={:?} timeout={}s",
            name, tool.program, args, tool.timeout_seconds
        );
        let mut child = tool_command(tool, args, cwd)
            .spawn()
            .map_err(|e| Error::tool(name, format!("failed to launch {}: {e}", tool.program)))?;

        let output = if tool.timeout_seconds > 0 {
            wait_with_timeout(name, &mut child, Duration::from_secs(tool.timeout_seconds))?
        } else {
            child.wait_with_output()?
        };

        if !output.status.success() {
            let stderr = String::from_utf8_lossy(&output.stderr);
            let details = if stderr.trim().is_empty() {
                String::from_utf8_lossy(&output.stdout).trim().to_string()
            } else {
                stderr.trim().to_string()
            };
            return Err(Error::tool(
                name,
                format!("{} ({})", details, output.status),
            ));
        }

        if self.cfg.debug.keep_tool_stderr && !output.stderr.is_empty() {
            let stderr = String::from_utf8_lossy(&output.stderr);
            debug!("tool stderr {}: {}", name, stderr.trim());
        }

        Ok(output)
    }

    fn template_path(&self) -> Result<PathBuf> {
        let tmpl = PathBuf::from(&self.cfg.splitter.template_path);
        if !tmpl.exists() {
            return Err(Error::Internal(format!(
                "patch template not found: {}",
                tmpl.display()
            )));
        }
        Ok(absolute(&tmpl))
    }

    fn probe(&self, name: &str, tool: &ToolCommand) -> ToolDiag {
        let mut cmd = Command::new(&tool.program);
        cmd.arg("--version");
        cmd.stdin(Stdio::null());
        cmd.stdout(Stdio::piped());
        cmd.stderr(Stdio::piped());
        for (k, v) in &tool.env {
            cmd.env(k, v);
        }
        own_process_group(&mut cmd);
        let outcome = cmd
            .spawn()
            .map_err(|e| Error::tool(name, e.to_string()))
            .and_then(|mut child| wait_with_timeout(name, &mut child, Duration::from_secs(10)));
        match outcome {
            Ok(out) => {
                let text = format!(
                    "{}\n{}",
                    String::from_utf8_lossy(&out.stdout),
                    String::from_utf8_lossy(&out.stderr)
                );
                ToolDiag {
                    tool: name.to_string(),
                    program: tool.program.clone(),
                    ok: true,
                    version: text
                        .lines()
                        .map(str::trim)
                        .find(|l| !l.is_empty())
                        .map(str::to_string),
                    error: None,
                }
            }
            Err(err) => ToolDiag {
                tool: name.to_string(),
                program: tool.program.clone(),
                ok: false,
                version: None,
                error: Some(err.details().unwrap_or_else(|| err.to_string())),
            },
        }
    }
}

impl Engine for ToolEngine {
    fn doctor(&self) -> Vec<ToolDiag> {
        let t = &self.cfg.tools;
        [
            ("scanner", &t.scanner),
            ("text_extractor", &t.text_extractor),
            ("page_info", &t.page_info),
            ("page_renderer", &t.page_renderer),
            ("image_recognizer", &t.image_recognizer),
            ("language_detector", &t.language_detector),
            ("splitter", &t.splitter),
            ("ocr", &t.ocr),
        ]
        .into_iter()
        .map(|(name, tool)| self.probe(name, tool))
        .collect()
    }

    fn list_scanners(&self) -> Result<Vec<ScannerDevice>> {
        let mut devices = Vec::new();
        for driver in &self.cfg.scanner.drivers {
            let args = vec!["--driver".into(), driver.into(), "--listdevices".into()];
            match self.run_tool("scanner", &self.cfg.tools.scanner, args, None) {
                Ok(out) => {
                    let stdout = String::from_utf8_lossy(&out.stdout);
                    devices.extend(parse_device_lines(&stdout, driver));
                }
                Err(err) => warn!("scanner driver {driver} failed: {err}"),
            }
        }
        Ok(devices)
    }

    fn scan(&self, profile: &str, out_dir: &Path) -> Result<ScanOutcome> {
        let stamp = time::OffsetDateTime::now_utc()
            .format(format_description!("[year][month][day]_[hour][minute][second]"))
            .unwrap_or_else(|_| "scan".to_string());
        let target = out_dir.join(format!("{}_{}.pdf", self.cfg.scanner.file_prefix, stamp));
        let args = vec![
            "-o".into(),
            target.clone().into_os_string(),
            "-p".into(),
            profile.into(),
        ];
        match self.run_tool("scanner", &self.cfg.tools.scanner, args, None) {
            Ok(_) => Ok(ScanOutcome::Path(target)),
            Err(Error::Tool { details, .. }) if mentions_unknown_profile(&details) => {
                Err(Error::input(format!("unknown scan profile: {profile}")))
            }
            Err(err) => Err(err),
        }
    }

    fn extract_text(&self, pdf: &Path) -> Result<String> {
        let args = vec![
            "-enc".into(),
            "UTF-8".into(),
            pdf.as_os_str().to_owned(),
            "-".into(),
        ];
        let out = self.run_tool("text_extractor", &self.cfg.tools.text_extractor, args, None)?;
        Ok(String::from_utf8_lossy(&out.stdout).trim().to_string())
    }

    fn page_count(&self, pdf: &Path) -> Result<u32> {
        let out = self.run_tool(
            "page_info",
            &self.cfg.tools.page_info,
            vec![pdf.as_os_str().to_owned()],
            None,
        )?;
        let stdout = String::from_utf8_lossy(&out.stdout);
        parse_page_count(&stdout)
            .ok_or_else(|| Error::tool("page_info", "no page count in pdfinfo output"))
    }

    fn render_page(&self, pdf: &Path, page: u32, out_dir: &Path) -> Result<PathBuf> {
        let prefix = out_dir.join(format!("page-{page}"));
        let args = vec![
            "-f".into(),
            page.to_string().into(),
            "-l".into(),
            page.to_string().into(),
            "-png".into(),
            "-r".into(),
            self.cfg.recognition.render_dpi.to_string().into(),
            "-singlefile".into(),
            pdf.as_os_str().to_owned(),
            prefix.clone().into_os_string(),
        ];
        self.run_tool("page_renderer", &self.cfg.tools.page_renderer, args, None)?;
        let image = prefix.with_extension("png");
        if !image.exists() {
            return Err(Error::OutputMissing {
                tool: "page_renderer".into(),
                path: image,
            });
        }
        Ok(image)
    }

    fn recognize_image(&self, image: &Path) -> Result<String> {
        let args = vec![
            image.as_os_str().to_owned(),
            "stdout".into(),
            "-l".into(),
            self.cfg.recognition.sample_languages.clone().into(),
        ];
        let out = self.run_tool("image_recognizer", &self.cfg.tools.image_recognizer, args, None)?;
        Ok(collapse_whitespace(&String::from_utf8_lossy(&out.stdout)))
    }

    fn detect_language(&self, sample: &str) -> Result<Option<String>> {
        let out = self.run_tool(
            "language_detector",
            &self.cfg.tools.language_detector,
            vec![sample.into()],
            None,
        )?;
        let code = String::from_utf8_lossy(&out.stdout).trim().to_string();
        if code.is_empty() || code.eq_ignore_ascii_case("error") {
            return Ok(None);
        }
        Ok(Some(code))
    }

    fn split(&self, pdf: &Path, req: &SplitRequest, out_dir: &Path) -> Result<Vec<SplitEntry>> {
        let template = self.template_path()?;
        let args = vec![
            "--pdf_path".into(),
            absolute(pdf).into_os_string(),
            "--template_path".into(),
            template.into_os_string(),
            "--mode".into(),
            req.mode.clone().into(),
            "--lang".into(),
            req.lang.clone().into(),
            "--naming".into(),
            req.naming.clone().into(),
        ];
        let out = self.run_tool("splitter", &self.cfg.tools.splitter, args, Some(out_dir))?;
        let stdout = String::from_utf8_lossy(&out.stdout);
        let results_file = out_dir.join(&self.cfg.splitter.results_file);
        let entries = parse_split_output(&stdout, &results_file)?;
        Ok(entries
            .into_iter()
            .map(|e| reroot_entry(e, out_dir))
            .collect())
    }

    fn generate_patch(&self, data: &str, out_dir: &Path) -> Result<PathBuf> {
        let template = self.template_path()?;
        let args = vec![
            "--template_path".into(),
            template.into_os_string(),
            "--generate_patch".into(),
            "--data".into(),
            data.into(),
        ];
        let out = self.run_tool("splitter", &self.cfg.tools.splitter, args, Some(out_dir))?;
        let stdout = String::from_utf8_lossy(&out.stdout);
        let generated = PATCH_OUTPUT
            .captures(&stdout)
            .map(|c| PathBuf::from(c[1].trim()))
            .ok_or_else(|| Error::tool("splitter", "no generated patch path in output"))?;
        let generated = if generated.is_relative() {
            out_dir.join(generated)
        } else {
            generated
        };
        if !generated.exists() {
            return Err(Error::OutputMissing {
                tool: "splitter".into(),
                path: generated,
            });
        }
        let dest = out_dir.join(file_name(&generated));
        move_file(&generated, &dest)?;
        Ok(dest)
    }

    fn recognize_pdf(&self, pdf: &Path, lang: &str, out_dir: &Path) -> Result<PathBuf> {
        let target = ocr_target(pdf, out_dir);
        let mut args = vec![
            absolute(pdf).into_os_string(),
            target.clone().into_os_string(),
            "--language".into(),
            lang.into(),
        ];
        if self.cfg.recognition.force_ocr {
            args.push("--force-ocr".into());
        }
        self.run_tool("ocr", &self.cfg.tools.ocr, args, None)?;
        Ok(target)
    }

    fn image_to_searchable_pdf(
        &self,
        image: &Path,
        lang: &str,
        out_dir: &Path,
    ) -> Result<PathBuf> {
        let target = ocr_target(image, out_dir);
        let mut args = vec![
            image.as_os_str().to_owned(),
            target.clone().into_os_string(),
            "-l".into(),
            lang.into(),
        ];
        if self.cfg.recognition.force_ocr {
            args.push("--force-ocr".into());
        }
        args.push("--image-dpi".into());
        args.push(self.cfg.recognition.image_dpi.to_string().into());
        self.run_tool("ocr", &self.cfg.tools.ocr, args, None)?;
        Ok(target)
    }
}

fn ocr_target(input: &Path, out_dir: &Path) -> PathBuf {
    let stem = input
        .file_stem()
        .map(|s| s.to_string_lossy().into_owned())
        .unwrap_or_default();
    out_dir.join(format!("{}_ocr.pdf", sanitize_file_name(&stem)))
}

fn absolute(p: &Path) -> PathBuf {
    std::path::absolute(p).unwrap_or_else(|_| p.to_path_buf())
}

fn mentions_unknown_profile(details: &str) -> bool {
    let d = details.to_ascii_lowercase();
    d.contains("profile")
        && (d.contains("not found")
            || d.contains("could not be found")
            || d.contains("does not exist")
            || d.contains("doesn't exist"))
}

fn collapse_whitespace(s: &str) -> String {
    s.split_whitespace().collect::<Vec<_>>().join(" ")
}

pub(crate) fn parse_page_count(pdfinfo: &str) -> Option<u32> {
    pdfinfo
        .lines()
        .find_map(|l| l.strip_prefix("Pages:"))
        .and_then(|v| v.trim().parse().ok())
}

/// Device names from a `--listdevices` listing; banner and status lines are dropped.
pub(crate) fn parse_device_lines(output: &str, driver: &str) -> Vec<ScannerDevice> {
    const NOISE: [&str; 7] = [
        "Qt:",
        "Untested",
        "No devices",
        "Beginning",
        "Starting",
        "Finished",
        "Error",
    ];
    output
        .lines()
        .map(str::trim)
        .filter(|l| l.len() > 2 && !NOISE.iter().any(|n| l.contains(n)))
        .map(|name| ScannerDevice {
            id: format!("{driver}_{name}"),
            name: name.to_string(),
            driver: driver.to_string(),
        })
        .collect()
}

/// Split results come from stdout JSON when the tool prints it, otherwise from
/// the results file it leaves in its working directory.
pub(crate) fn parse_split_output(stdout: &str, results_file: &Path) -> Result<Vec<SplitEntry>> {
    let trimmed = stdout.trim();
    if let Ok(entries) = serde_json::from_str::<Vec<SplitEntry>>(trimmed) {
        return Ok(entries);
    }
    if let Some(last) = trimmed.lines().rev().map(str::trim).find(|l| l.starts_with('[')) {
        if let Ok(entries) = serde_json::from_str::<Vec<SplitEntry>>(last) {
            return Ok(entries);
        }
    }
    if results_file.exists() {
        let raw = std::fs::read_to_string(results_file)?;
        return serde_json::from_str(&raw).map_err(|e| {
            Error::tool(
                "splitter",
                format!("unreadable {}: {e}", results_file.display()),
            )
        });
    }
    Err(Error::tool(
        "splitter",
        format!("no split results on stdout or in {}", results_file.display()),
    ))
}

fn reroot_entry(entry: SplitEntry, dir: &Path) -> SplitEntry {
    match entry {
        SplitEntry::Bare(p) => SplitEntry::Bare(dir.join(file_name(&p))),
        SplitEntry::Described {
            file,
            pages,
            barcode,
        } => SplitEntry::Described {
            file: dir.join(file_name(&file)),
            pages,
            barcode,
        },
    }
}

/// Builds the child process for `tool`. On Unix the child leads its own
/// process group so a timeout can take down everything it spawned.
fn tool_command(tool: &ToolCommand, args: Vec<OsString>, cwd: Option<&Path>) -> Command {
    let mut cmd = Command::new(&tool.program);
    cmd.args(&tool.args);
    cmd.args(&args);
    cmd.stdin(Stdio::null());
    cmd.stdout(Stdio::piped());
    cmd.stderr(Stdio::piped());
    for (k, v) in &tool.env {
        cmd.env(k, v);
    }
    if let Some(dir) = cwd {
        cmd.current_dir(dir);
    }
    own_process_group(&mut cmd);
    cmd
}

fn own_process_group(cmd: &mut Command) {
    #[cfg(unix)]
    {
        use std::os::unix::process::CommandExt;
        cmd.process_group(0);
    }
    #[cfg(not(unix))]
    let _ = cmd;
}

/// Kills the child and, on Unix, every process left in its group.
fn kill_tree(name: &str, child: &mut Child) {
    #[cfg(unix)]
    {
        let group = format!("-{}", child.id());
        match Command::new("kill")
            .args(["-KILL", "--", group.as_str()])
            .stdout(Stdio::null())
            .stderr(Stdio::null())
            .status()
        {
            Ok(status) if status.success() => {}
            Ok(status) => debug!("{name} process group kill exited with {status}"),
            Err(err) => warn!("{name} process group kill failed: {err}"),
        }
    }
    let _ = child.kill();
}

fn wait_with_timeout(name: &str, child: &mut Child, timeout: Duration) -> Result<Output> {
    // Drain pipes while waiting so a chatty tool can't deadlock on a full
    // stdout/stderr buffer.
    let stdout_reader = child.stdout.take();
    let stderr_reader = child.stderr.take();

    let stdout_thread = std::thread::spawn(move || -> std::io::Result<Vec<u8>> {
        let mut buf = Vec::new();
        if let Some(mut out) = stdout_reader {
            out.read_to_end(&mut buf)?;
        }
        Ok(buf)
    });

    let stderr_thread = std::thread::spawn(move || -> std::io::Result<Vec<u8>> {
        let mut buf = Vec::new();
        if let Some(mut err) = stderr_reader {
            err.read_to_end(&mut buf)?;
        }
        Ok(buf)
    });

    let join = |h: std::thread::JoinHandle<std::io::Result<Vec<u8>>>| -> Result<Vec<u8>> {
        h.join()
            .map_err(|_| Error::Internal(format!("{name} pipe reader panicked")))?
            .map_err(Error::from)
    };

    let start = Instant::now();
    loop {
        if let Some(status) = child.try_wait()? {
            let stdout = join(stdout_thread)?;
            let stderr = join(stderr_thread)?;
            return Ok(Output {
                status,
                stdout,
                stderr,
            });
        }

        if start.elapsed() > timeout {
            warn!("{name} timed out after {:?}", timeout);
            kill_tree(name, child);
            child.wait()?;
            // readers finish on their own once the last pipe holder is gone
            drop(stdout_thread);
            drop(stderr_thread);
            return Err(Error::Timeout {
                tool: name.to_string(),
                seconds: timeout.as_secs(),
            });
        }

        std::thread::sleep(Duration::from_millis(50));
    }
}
