use anyhow::Context;
use sha2::{Digest, Sha256};
use std::fs::{File, OpenOptions};
use std::io::{ErrorKind, Read};
use std::path::{Path, PathBuf};
use time::format_description::well_known::Rfc3339;
use unicode_normalization::{UnicodeNormalization, char::is_combining_mark};

pub fn ensure_dir(p: &Path) -> anyhow::Result<()> {
    std::fs::create_dir_all(p).with_context(|| format!("create_dir_all {}", p.display()))
}

pub fn sha256_file(path: &Path) -> std::io::Result<String> {
    let mut f = File::open(path)?;
    let mut h = Sha256::new();
    let mut buf = vec![0u8; 1024 * 1024];
    loop {
        let n = f.read(&mut buf)?;
        if n == 0 {
            break;
        }
        h.update(&buf[..n]);
    }
    Ok(format!("{:x}", h.finalize()))
}

pub fn now_rfc3339() -> String {
    time::OffsetDateTime::now_utc()
        .format(&Rfc3339)
        .unwrap_or_else(|_| "1970-01-01T00:00:00Z".to_string())
}

/// Final path component as an owned string, empty when there is none.
pub fn file_name(path: &Path) -> String {
    path.file_name()
        .map(|n| n.to_string_lossy().into_owned())
        .unwrap_or_default()
}

/// Strips diacritics and replaces anything outside `[A-Za-z0-9_.-]` with `_`.
pub fn sanitize_file_name(name: &str) -> String {
    let mut out = String::with_capacity(name.len());
    for ch in name.nfd().filter(|c| !is_combining_mark(*c)) {
        let ch = if ch.is_ascii_alphanumeric() || matches!(ch, '_' | '-' | '.') {
            ch
        } else {
            '_'
        };
        if ch == '_' && out.ends_with('_') {
            continue;
        }
        out.push(ch);
    }
    let trimmed = out.trim_matches('_');
    if trimmed.is_empty() {
        "document".to_string()
    } else {
        trimmed.to_string()
    }
}

/// Renames `from` to `to`, copying across filesystems when a plain rename fails.
pub fn move_file(from: &Path, to: &Path) -> std::io::Result<()> {
    if from == to {
        return Ok(());
    }
    match std::fs::rename(from, to) {
        Ok(()) => Ok(()),
        Err(_) => {
            std::fs::copy(from, to)?;
            std::fs::remove_file(from)
        }
    }
}

/// Reserves a fresh file for `name` inside `dir` and returns its path. When
/// the name is taken, `-2`, `-3`, ... is inserted before the extension. The
/// reservation is an empty file created with `create_new`, so two concurrent
/// callers never get the same path.
pub fn claim_unique(dir: &Path, name: &str) -> std::io::Result<PathBuf> {
    let (stem, ext) = match name.rfind('.') {
        Some(idx) if idx > 0 => name.split_at(idx),
        _ => (name, ""),
    };
    for n in 1..=MAX_CLAIM_ATTEMPTS {
        let candidate = if n == 1 {
            dir.join(name)
        } else {
            dir.join(format!("{stem}-{n}{ext}"))
        };
        match OpenOptions::new().write(true).create_new(true).open(&candidate) {
            Ok(_) => return Ok(candidate),
            Err(e) if e.kind() == ErrorKind::AlreadyExists => continue,
            Err(e) => return Err(e),
        }
    }
    Err(std::io::Error::new(
        ErrorKind::AlreadyExists,
        format!("no free name for {name} in {}", dir.display()),
    ))
}

const MAX_CLAIM_ATTEMPTS: usize = 1000;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn claims_never_share_a_path() {
        let tmp = tempfile::tempdir().unwrap();
        let a = claim_unique(tmp.path(), "scan.pdf").unwrap();
        let b = claim_unique(tmp.path(), "scan.pdf").unwrap();
        let c = claim_unique(tmp.path(), "README").unwrap();
        assert_eq!(a, tmp.path().join("scan.pdf"));
        assert_eq!(b, tmp.path().join("scan-2.pdf"));
        assert_eq!(c, tmp.path().join("README"));
        assert!(a.is_file() && b.is_file());
    }

    #[test]
    fn move_replaces_a_reserved_file() {
        let tmp = tempfile::tempdir().unwrap();
        let src = tmp.path().join("src.pdf");
        std::fs::write(&src, b"payload").unwrap();
        let dest = claim_unique(tmp.path(), "out.pdf").unwrap();
        move_file(&src, &dest).unwrap();
        assert_eq!(std::fs::read(&dest).unwrap(), b"payload");
        assert!(!src.exists());
    }

    #[test]
    fn sanitized_names_lose_accents_and_separators() {
        assert_eq!(sanitize_file_name("Relevé de compte (mars).pdf"), "Releve_de_compte_mars_.pdf");
        assert_eq!(sanitize_file_name("///"), "document");
    }
}
