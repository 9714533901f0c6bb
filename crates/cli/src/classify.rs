use anyhow::{bail, Context, Result};
use doctax_core::models::ClassificationResult;
use std::path::Path;

/// Content-addressed chunk id used when the caller does not supply one.
pub fn default_chunk_id(text: &str) -> String {
    blake3::hash(text.as_bytes()).to_hex().to_string()
}

pub fn read_input(text: Option<String>, file: Option<&Path>) -> Result<String> {
    match (text, file) {
        (Some(t), None) => Ok(t),
        (None, Some(p)) => {
            std::fs::read_to_string(p).with_context(|| format!("read {}", p.display()))
        }
        (Some(_), Some(_)) => bail!("pass either --text or --file, not both"),
        (None, None) => bail!("one of --text or --file is required"),
    }
}

pub fn render(chunk_id: &str, result: &ClassificationResult) -> String {
    let mut out = format!(
        "{chunk_id}: {} ({:.3}, {})",
        result.canonical_path.join(" > "),
        result.confidence,
        result.method
    );
    if result.hitl_required {
        out.push_str(if result.drift {
            " [review: drift]"
        } else {
            " [review]"
        });
    }
    for reason in &result.reasoning {
        out.push_str("\n  - ");
        out.push_str(reason);
    }
    for candidate in &result.candidates {
        out.push_str("\n  alt: ");
        out.push_str(&candidate.join(" > "));
    }
    out
}
