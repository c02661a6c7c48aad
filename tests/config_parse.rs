use scanflow::config::Config;

#[test]
fn parse_example_config() {
    let raw = include_str!("../scanflow.example.toml");
    let cfg: Config = toml::from_str(raw).expect("parse TOML");
    assert_eq!(cfg.language.fallback, "eng");
    assert_eq!(cfg.language.codes.get("fr").map(String::as_str), Some("fra"));
    assert_eq!(cfg.tools.ocr.program, "ocrmypdf");
    assert_eq!(cfg.tools.language_detector.args, vec!["scripts/langdetect_script.py"]);
    assert!(!cfg.paths.output_dir.is_empty());
    assert_eq!(cfg.limits.min_pdf_bytes, 1000);
}

#[test]
fn missing_sections_take_defaults() {
    let cfg: Config = toml::from_str("[paths]\noutput_dir = \"elsewhere\"\n").expect("parse TOML");
    assert_eq!(cfg.paths.output_dir, "elsewhere");
    assert_eq!(cfg.paths.work_dir, ".scanflow-work");
    assert_eq!(cfg.defaults.patch_mode, "T_classique");
    assert!(cfg.defaults.ocr_enabled);
    assert_eq!(cfg.tools.splitter.program, "patchsplitter");
    assert!(!cfg.naming.rename_bare_split_blocks);
}

#[test]
fn tool_overrides_keep_other_fields() {
    let raw = "[tools.ocr]\nprogram = \"/opt/ocrmypdf\"\n";
    let cfg: Config = toml::from_str(raw).expect("parse TOML");
    assert_eq!(cfg.tools.ocr.program, "/opt/ocrmypdf");
    assert!(cfg.tools.ocr.args.is_empty());
    assert_eq!(cfg.tools.page_info.program, "pdfinfo");
}
