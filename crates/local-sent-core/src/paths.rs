//! Relative-path normalization and collision-free target naming.
//!
//! Every inbound `relative_path` is normalized and containment-checked before
//! any filesystem operation; temp files encode a short digest tag so a resumed
//! session can find its own partial data next to unrelated duplicates.

use std::path::{Path, PathBuf};

use crate::constants::{TEMP_DIGEST_TAG_LEN, TEMP_SUFFIX};
use crate::error::{Error, Result};

/// Normalize a wire-format relative path.
///
/// Backslashes become forward slashes, `.` segments and repeated slashes
/// collapse, leading slashes are stripped. Rejects empty results and any
/// remaining parent-directory traversal.
pub fn normalize_relative(input: &str) -> Result<String> {
    let unified = input.replace('\\', "/");
    let trimmed = unified.trim();

    let mut segments: Vec<&str> = Vec::new();
    for segment in trimmed.split('/') {
        match segment {
            "" | "." => continue,
            other => segments.push(other),
        }
    }
    let normalized = segments.join("/");

    if normalized.is_empty() || normalized == "." || normalized == ".." {
        return Err(Error::path(format!("invalid relative path: {input:?}")));
    }
    if normalized.starts_with("../") || normalized.contains("/../") || normalized.ends_with("/..") {
        return Err(Error::path(format!(
            "relative path escapes its root: {input:?}"
        )));
    }
    Ok(normalized)
}

/// Join a normalized relative path to `output_root` and require the result to
/// stay inside the root.
pub fn resolve_under(output_root: &Path, relative: &str) -> Result<PathBuf> {
    let normalized = normalize_relative(relative)?;
    let mut resolved = output_root.to_path_buf();
    for segment in normalized.split('/') {
        resolved.push(segment);
    }

    // String prefix plus separator check; the leaf does not exist yet so
    // canonicalization is not an option.
    let root_str = output_root.to_string_lossy();
    let resolved_str = resolved.to_string_lossy();
    let root_with_sep = if root_str.ends_with(std::path::MAIN_SEPARATOR) {
        root_str.to_string()
    } else {
        format!("{root_str}{}", std::path::MAIN_SEPARATOR)
    };
    if !resolved_str.starts_with(&root_with_sep) {
        return Err(Error::path("path escapes output directory"));
    }
    Ok(resolved)
}

/// The i-th duplicate candidate for a final path: `stem(i).ext`.
///
/// Index 0 is the path itself.
pub fn indexed_candidate(final_path: &Path, index: u32) -> PathBuf {
    if index == 0 {
        return final_path.to_path_buf();
    }
    let stem = final_path
        .file_stem()
        .map(|s| s.to_string_lossy().into_owned())
        .unwrap_or_default();
    let name = match final_path.extension() {
        Some(ext) => format!("{stem}({index}).{}", ext.to_string_lossy()),
        None => format!("{stem}({index})"),
    };
    final_path.with_file_name(name)
}

/// Temp-file path for a final target: `<final>.<digest-prefix-16>.local-sent.part`.
pub fn temp_path_for(final_path: &Path, sha256_hex: &str) -> PathBuf {
    let tag: String = sha256_hex.chars().take(TEMP_DIGEST_TAG_LEN).collect();
    let name = format!(
        "{}.{tag}{TEMP_SUFFIX}",
        final_path
            .file_name()
            .map(|s| s.to_string_lossy().into_owned())
            .unwrap_or_default()
    );
    final_path.with_file_name(name)
}
