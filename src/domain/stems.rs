//! Pure helpers for the separation pipeline: tool arguments, worker sizing,
//! and the output folder layout.

use regex::Regex;
use std::ffi::OsString;
use std::path::{Path, PathBuf};
use std::sync::OnceLock;

/// Separation model passed with `-n`.
pub const MODEL_NAME: &str = "htdemucs_ft";

/// Stems produced by the separation tool, in output order.
pub const STEMS: [&str; 4] = ["bass", "drums", "other", "vocals"];

pub const INSTRUMENTAL: &str = "instrumental";

/// Hard cap on separation workers.
pub const MAX_WORKERS: usize = 4;

/// Memory budgeted per separation worker.
pub const BYTES_PER_WORKER: u64 = 2_000_000_000;

/// Filter graph used to mix bass, drums and other into the instrumental.
pub const MIX_FILTER: &str = "amix=inputs=3:normalize=0";

const MAX_FOLDER_NAME_BYTES: usize = 255;

/// Used when neither the title nor the id survive sanitizing.
const FALLBACK_FOLDER_NAME: &str = "untitled";

/// Compute backend forced on the separation tool.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, serde::Serialize, serde::Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Backend {
    #[default]
    Auto,
    Cpu,
}

/// Number of separation workers: bounded by cores, free memory and `MAX_WORKERS`,
/// never less than one.
pub fn worker_count(cpus: usize, free_memory: u64) -> usize {
    let by_memory = (free_memory / BYTES_PER_WORKER) as usize;
    cpus.min(by_memory).min(MAX_WORKERS).max(1)
}

pub fn separation_args(
    media: &Path,
    workers: usize,
    backend: Backend,
    models_dir: Option<&Path>,
) -> Vec<OsString> {
    let mut args: Vec<OsString> = vec![
        media.into(),
        "-n".into(),
        MODEL_NAME.into(),
        "-j".into(),
        workers.to_string().into(),
    ];
    if backend == Backend::Cpu {
        args.push("-d".into());
        args.push("cpu".into());
    }
    if let Some(dir) = models_dir {
        args.push("--repo".into());
        args.push(dir.into());
    }
    args
}

/// Directory under which the separation tool writes one folder per input.
pub fn separated_root(workspace: &Path) -> PathBuf {
    workspace.join("separated").join(MODEL_NAME)
}

pub fn stem_paths(dir: &Path) -> Vec<(&'static str, PathBuf)> {
    STEMS
        .iter()
        .map(|stem| (*stem, dir.join(format!("{stem}.wav"))))
        .collect()
}

pub fn mix_args(bass: &Path, drums: &Path, other: &Path, output: &Path) -> Vec<OsString> {
    vec![
        "-i".into(),
        bass.into(),
        "-i".into(),
        drums.into(),
        "-i".into(),
        other.into(),
        "-filter_complex".into(),
        MIX_FILTER.into(),
        output.into(),
    ]
}

/// `<output_root>/<sanitized "<title>-<id>">`, never the root itself.
pub fn output_dir(output_root: &Path, title: &str, id: &str) -> PathBuf {
    let name = [format!("{title}-{id}"), id.to_string()]
        .iter()
        .map(|candidate| sanitize_folder_name(candidate))
        .find(|name| !name.is_empty())
        .unwrap_or_else(|| String::from(FALLBACK_FOLDER_NAME));
    output_root.join(name)
}

fn illegal_chars() -> &'static Regex {
    static RE: OnceLock<Regex> = OnceLock::new();
    RE.get_or_init(|| Regex::new(r#"[/\?<>\\:\*\|"\x00-\x1f\x80-\x9f]"#).unwrap())
}

fn windows_reserved() -> &'static Regex {
    static RE: OnceLock<Regex> = OnceLock::new();
    RE.get_or_init(|| Regex::new(r"(?i)^(con|prn|aux|nul|com[0-9]|lpt[0-9])(\..*)?$").unwrap())
}

/// Make a string safe to use as a single path component on every platform.
pub fn sanitize_folder_name(name: &str) -> String {
    let cleaned = illegal_chars().replace_all(name, "");
    let cleaned = cleaned.trim_end_matches(['.', ' ']);
    if cleaned.is_empty() || cleaned == "." || cleaned == ".." || windows_reserved().is_match(cleaned)
    {
        return String::new();
    }

    let mut end = cleaned.len().min(MAX_FOLDER_NAME_BYTES);
    while !cleaned.is_char_boundary(end) {
        end -= 1;
    }
    cleaned[..end].to_string()
}
