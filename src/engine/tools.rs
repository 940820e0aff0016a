//! Naming and path utilities

use anyhow::{Result, bail};
use std::path::{Component, Path, PathBuf};
use std::time::{SystemTime, UNIX_EPOCH};

use crate::utils::config::MAX_NAME_COLLISIONS;

/// Milliseconds since the Unix epoch (0 if the clock is before it).
pub fn now_ms() -> i64 {
    SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .map(|d| d.as_millis() as i64)
        .unwrap_or(0)
}

/// Replace every char outside ASCII alphanumerics, `.`, `-` and space with `_`.
pub fn sanitize_file_name(name: &str) -> String {
    name.chars()
        .map(|c| {
            if c.is_ascii_alphanumeric() || c == '.' || c == '-' || c == ' ' {
                c
            } else {
                '_'
            }
        })
        .collect()
}

/// File name for an object: sanitized display name plus `.ext` unless it already ends with it.
pub fn output_file_name(display_name: &str, extension: &str) -> String {
    let mut name = sanitize_file_name(display_name);
    if name.is_empty() {
        name.push('_');
    }
    let ext = sanitize_file_name(extension.trim_start_matches('.'));
    let suffix = format!(".{}", ext.to_ascii_lowercase());
    if !ext.is_empty() && !name.to_ascii_lowercase().ends_with(&suffix) {
        name.push('.');
        name.push_str(&ext);
    }
    name
}

/// Split at the last `.` into (stem, extension-with-dot). A leading dot is part of the stem.
fn split_extension(file_name: &str) -> (&str, &str) {
    match file_name.rfind('.') {
        Some(i) if i > 0 => file_name.split_at(i),
        _ => (file_name, ""),
    }
}

/// `report.pdf`, n=2 → `report (2).pdf`.
pub fn numbered_file_name(file_name: &str, n: u32) -> String {
    let (stem, ext) = split_extension(file_name);
    format!("{stem} ({n}){ext}")
}

/// First free name in `dir`: `file_name`, then `stem (1).ext`, `stem (2).ext`, ...
/// Fails after [`MAX_NAME_COLLISIONS`] taken names.
pub fn resolve_collision(dir: &Path, file_name: &str) -> Result<PathBuf> {
    resolve_collision_bounded(dir, file_name, MAX_NAME_COLLISIONS)
}

pub fn resolve_collision_bounded(dir: &Path, file_name: &str, max: u32) -> Result<PathBuf> {
    let bare = dir.join(file_name);
    if !bare.exists() {
        return Ok(bare);
    }
    for n in 1..=max {
        let candidate = dir.join(numbered_file_name(file_name, n));
        if !candidate.exists() {
            return Ok(candidate);
        }
    }
    bail!(
        "no free name for {} in {} after {} attempts",
        file_name,
        dir.display(),
        max
    )
}

/// Map a repository folder path (e.g. `/Cabinet/Reports`) under `root`. Only normal components are kept,
/// so `..` or a drive prefix cannot escape the output root.
pub fn folder_to_output_dir(root: &Path, folder_path: &str) -> PathBuf {
    let mut dir = root.to_path_buf();
    for comp in Path::new(folder_path).components() {
        if let Component::Normal(part) = comp {
            dir.push(part);
        }
    }
    dir
}

/// Path string for the manifest: forward slashes on every platform.
pub fn path_to_manifest_string(path: &Path) -> String {
    path.to_string_lossy().replace('\\', "/")
}
