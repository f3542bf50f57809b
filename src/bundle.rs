//! Gathers the JavaScript to compile from the supported input shapes: a
//! single `.js` or `.html` file, a directory of them, or a `.zip` bundle
//! whose root-level entries are unpacked into a per-request temp dir.

use anyhow::{anyhow, bail, Context, Result};
use regex::Regex;
use std::fs;
use std::io::Read;
use std::path::Path;

pub fn collect_source(input: &Path) -> Result<String> {
    if input.is_dir() {
        return collect_from_dir(input);
    }
    match extension_of(input).as_str() {
        "js" => fs::read_to_string(input)
            .with_context(|| format!("Failed to read '{}'.", input.display())),
        "html" | "htm" => {
            let html = fs::read_to_string(input)
                .with_context(|| format!("Failed to read '{}'.", input.display()))?;
            extract_scripts(&html)
        }
        "zip" => collect_from_archive(input),
        other => bail!(
            "Unsupported input '{}': expected a .js, .html, or .zip file, or a directory (got '.{}').",
            input.display(),
            other
        ),
    }
}

fn collect_from_dir(dir: &Path) -> Result<String> {
    let mut entries: Vec<_> = fs::read_dir(dir)
        .with_context(|| format!("Failed to read directory '{}'.", dir.display()))?
        .filter_map(|entry| entry.ok())
        .map(|entry| entry.path())
        .filter(|path| path.is_file())
        .collect();
    entries.sort_by_key(|path| path.file_name().map(|n| n.to_os_string()));

    let mut merged = String::new();
    for path in entries {
        match extension_of(&path).as_str() {
            "js" => {
                let source = fs::read_to_string(&path)
                    .with_context(|| format!("Failed to read '{}'.", path.display()))?;
                push_chunk(&mut merged, &source);
            }
            "html" | "htm" => {
                let html = fs::read_to_string(&path)
                    .with_context(|| format!("Failed to read '{}'.", path.display()))?;
                push_chunk(&mut merged, &extract_scripts(&html)?);
            }
            _ => {}
        }
    }
    if merged.trim().is_empty() {
        bail!("No .js or .html sources found in '{}'.", dir.display());
    }
    Ok(merged)
}

/// Only root-level archive entries are considered; nested directories in
/// the bundle are ignored.
fn collect_from_archive(path: &Path) -> Result<String> {
    let file =
        fs::File::open(path).with_context(|| format!("Failed to open '{}'.", path.display()))?;
    let mut archive = zip::ZipArchive::new(file)
        .map_err(|_| anyhow!("Input '{}' is not a valid .zip archive.", path.display()))?;

    let temp_dir = tempfile::tempdir().context("Failed to create a temporary directory.")?;
    for index in 0..archive.len() {
        let mut entry = archive.by_index(index)?;
        let name = entry.name().to_string();
        if name.contains('/') || name.contains('\\') {
            continue;
        }
        let ext = name.rsplit('.').next().unwrap_or("").to_ascii_lowercase();
        if ext != "js" && ext != "html" && ext != "htm" {
            continue;
        }
        let mut contents = String::new();
        entry
            .read_to_string(&mut contents)
            .with_context(|| format!("Failed to read '{}' from the bundle.", name))?;
        fs::write(temp_dir.path().join(&name), contents)?;
    }

    let merged = collect_from_dir(temp_dir.path())
        .map_err(|_| anyhow!("Bundle '{}' contains no .js or .html entries.", path.display()))?;
    if let Err(err) = temp_dir.close() {
        eprintln!("Warning: failed to remove temporary directory: {}", err);
    }
    Ok(merged)
}

fn extract_scripts(html: &str) -> Result<String> {
    let script_re = Regex::new(r"(?is)<script[^>]*>(.*?)</script>")?;
    let mut merged = String::new();
    for captures in script_re.captures_iter(html) {
        if let Some(body) = captures.get(1) {
            push_chunk(&mut merged, body.as_str());
        }
    }
    Ok(merged)
}

fn push_chunk(merged: &mut String, chunk: &str) {
    if chunk.trim().is_empty() {
        return;
    }
    merged.push_str(chunk);
    if !chunk.ends_with('\n') {
        merged.push('\n');
    }
}

fn extension_of(path: &Path) -> String {
    path.extension()
        .and_then(|e| e.to_str())
        .unwrap_or("")
        .to_ascii_lowercase()
}
