use anyhow::{Context, Result};
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::path::Path;

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct Config {
    #[serde(default)]
    pub server: Server,
    #[serde(default)]
    pub paths: Paths,
    #[serde(default)]
    pub limits: Limits,
    #[serde(default)]
    pub defaults: Defaults,
    #[serde(default)]
    pub language: Language,
    #[serde(default)]
    pub naming: Naming,
    #[serde(default)]
    pub scanner: Scanner,
    #[serde(default)]
    pub splitter: Splitter,
    #[serde(default)]
    pub recognition: Recognition,
    #[serde(default)]
    pub tools: Tools,
    #[serde(default)]
    pub logging: Logging,
    #[serde(default)]
    pub debug: Debug,
    #[serde(default)]
    pub security: Security,
}

impl Config {
    pub fn load(path: &Path) -> Result<Self> {
        let raw = std::fs::read_to_string(path)
            .with_context(|| format!("reading config: {}", path.display()))?;
        let cfg: Config = toml::from_str(&raw).with_context(|| "parsing TOML")?;
        Ok(cfg)
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct Server {
    pub listen_addr: String,
    pub max_upload_bytes: usize,
    pub drain_timeout_seconds: u64,
}
impl Default for Server {
    fn default() -> Self {
        Self {
            listen_addr: "127.0.0.1:3000".into(),
            max_upload_bytes: 100 * 1024 * 1024,
            drain_timeout_seconds: 10,
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct Paths {
    pub output_dir: String,
    pub work_dir: String,
}
impl Default for Paths {
    fn default() -> Self {
        Self {
            output_dir: "output".into(),
            work_dir: ".scanflow-work".into(),
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct Limits {
    pub min_pdf_bytes: u64,
}
impl Default for Limits {
    fn default() -> Self {
        Self {
            min_pdf_bytes: 1000,
        }
    }
}

/// Values used when a request leaves an option unset.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct Defaults {
    pub ocr_enabled: bool,
    pub patch_mode: String,
    pub naming: String,
}
impl Default for Defaults {
    fn default() -> Self {
        Self {
            ocr_enabled: true,
            patch_mode: "T_classique".into(),
            naming: "generic".into(),
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct Language {
    pub fallback: String,
    pub min_explicit_len: usize,
    pub embedded_sample_chars: usize,
    pub sample_pages: u32,
    /// Detector code prefix -> recognizer language code.
    pub codes: BTreeMap<String, String>,
}
impl Default for Language {
    fn default() -> Self {
        Self {
            fallback: "eng".into(),
            min_explicit_len: 2,
            embedded_sample_chars: 1000,
            sample_pages: 3,
            codes: [("fr", "fra"), ("ar", "ara"), ("en", "eng")]
                .into_iter()
                .map(|(k, v)| (k.to_string(), v.to_string()))
                .collect(),
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct Naming {
    /// Pattern applied when a request does not carry one. Empty keeps tool names.
    pub default_pattern: String,
    pub rename_bare_split_blocks: bool,
}
impl Default for Naming {
    fn default() -> Self {
        Self {
            default_pattern: "".into(),
            rename_bare_split_blocks: false,
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct Scanner {
    pub drivers: Vec<String>,
    pub file_prefix: String,
}
impl Default for Scanner {
    fn default() -> Self {
        Self {
            drivers: vec!["wia".into(), "twain".into(), "escl".into()],
            file_prefix: "scan".into(),
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct Splitter {
    pub template_path: String,
    pub results_file: String,
}
impl Default for Splitter {
    fn default() -> Self {
        Self {
            template_path: "patchT/patchT_template.png".into(),
            results_file: "results.json".into(),
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct Recognition {
    /// Languages used when sampling pages before the document language is known.
    pub sample_languages: String,
    pub render_dpi: u32,
    pub image_dpi: u32,
    pub force_ocr: bool,
}
impl Default for Recognition {
    fn default() -> Self {
        Self {
            sample_languages: "eng+fra+ara".into(),
            render_dpi: 300,
            image_dpi: 300,
            force_ocr: true,
        }
    }
}

/// How one external program is launched.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct ToolCommand {
    pub program: String,
    /// Arguments placed before the per-call arguments.
    pub args: Vec<String>,
    /// 0 disables the timeout.
    pub timeout_seconds: u64,
    pub env: BTreeMap<String, String>,
}
impl Default for ToolCommand {
    fn default() -> Self {
        Self::new("true", 60)
    }
}

impl ToolCommand {
    pub fn new(program: &str, timeout_seconds: u64) -> Self {
        Self {
            program: program.into(),
            args: Vec::new(),
            timeout_seconds,
            env: Default::default(),
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct Tools {
    pub scanner: ToolCommand,
    pub text_extractor: ToolCommand,
    pub page_info: ToolCommand,
    pub page_renderer: ToolCommand,
    pub image_recognizer: ToolCommand,
    pub language_detector: ToolCommand,
    pub splitter: ToolCommand,
    pub ocr: ToolCommand,
}
impl Default for Tools {
    fn default() -> Self {
        Self {
            scanner: ToolCommand::new("NAPS2.Console", 300),
            text_extractor: ToolCommand::new("pdftotext", 60),
            page_info: ToolCommand::new("pdfinfo", 30),
            page_renderer: ToolCommand::new("pdftoppm", 120),
            image_recognizer: ToolCommand::new("tesseract", 120),
            language_detector: ToolCommand {
                program: "python3".into(),
                args: vec!["scripts/langdetect_script.py".into()],
                timeout_seconds: 30,
                env: Default::default(),
            },
            splitter: ToolCommand::new("patchsplitter", 600),
            ocr: ToolCommand::new("ocrmypdf", 900),
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct Logging {
    pub level: String,
    pub json: bool,
    pub write_to_file: bool,
    pub file_path: String,
}
impl Default for Logging {
    fn default() -> Self {
        Self {
            level: "info".into(),
            json: false,
            write_to_file: true,
            file_path: "".into(),
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct Debug {
    pub keep_tool_stderr: bool,
}
impl Default for Debug {
    fn default() -> Self {
        Self {
            keep_tool_stderr: true,
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct Security {
    pub allow_output_dir_override: bool,
}
impl Default for Security {
    fn default() -> Self {
        Self {
            allow_output_dir_override: true,
        }
    }
}
