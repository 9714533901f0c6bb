use anyhow::{bail, Result};
use doctax_core::models::{HitlStats, HitlTask};

/// Parse a reviewer path such as `Finance/Reports` or `Finance > Reports`.
pub fn parse_path(raw: &str) -> Result<Vec<String>> {
    let sep = if raw.contains('>') { '>' } else { '/' };
    let labels: Vec<String> = raw
        .split(sep)
        .map(|l| l.trim().to_string())
        .filter(|l| !l.is_empty())
        .collect();
    if labels.is_empty() {
        bail!("empty taxonomy path: {raw:?}");
    }
    Ok(labels)
}

pub fn task_line(task: &HitlTask) -> String {
    format!(
        "{}  {:.3}  {:<6}  {}  {}",
        task.task_id,
        task.confidence,
        task.priority.as_str(),
        task.chunk_id,
        task.suggested_path.join(" > ")
    )
}

pub fn task_detail(task: &HitlTask) -> String {
    let mut out = format!(
        "task:        {}\nchunk:       {}\nversion:     {}\nstatus:      {}\npriority:    {}\nsuggested:   {} ({:.3})\ncreated:     {}",
        task.task_id,
        task.chunk_id,
        task.taxonomy_version,
        task.status.as_str(),
        task.priority.as_str(),
        task.suggested_path.join(" > "),
        task.confidence,
        task.created_at.to_rfc3339(),
    );
    for alt in &task.alternatives {
        out.push_str(&format!("\nalternative: {}", alt.join(" > ")));
    }
    if let Some(path) = &task.approved_path {
        out.push_str(&format!(
            "\napproved:    {} ({:.3}) by {}",
            path.join(" > "),
            task.final_confidence.unwrap_or_default(),
            task.reviewer_id.as_deref().unwrap_or("-"),
        ));
    }
    if let Some(notes) = &task.reviewer_notes {
        out.push_str(&format!("\nnotes:       {notes}"));
    }
    out.push_str("\n\n");
    out.push_str(&task.text_snippet);
    out
}

pub fn stats_summary(stats: &HitlStats) -> String {
    let mean = stats
        .recent_mean_confidence
        .map(|m| format!("{m:.3}"))
        .unwrap_or_else(|| "-".to_string());
    format!(
        "pending: {}\ncompleted: {}\nrecent mean confidence: {}\nsuccess rate: {:.1}%\nmodel ready: {}",
        stats.pending,
        stats.completed,
        mean,
        stats.success_rate * 100.0,
        if stats.model_ready { "yes" } else { "no" },
    )
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn parses_both_separators() {
        assert_eq!(parse_path("Finance/Reports").unwrap(), vec!["Finance", "Reports"]);
        assert_eq!(
            parse_path(" Legal > Contracts ").unwrap(),
            vec!["Legal", "Contracts"]
        );
        assert!(parse_path(" / ").is_err());
    }

    #[test]
    fn stats_summary_handles_no_completions() {
        let text = stats_summary(&HitlStats {
            pending: 3,
            completed: 0,
            recent_mean_confidence: None,
            success_rate: 0.0,
            interactions: 0,
            model_ready: false,
        });
        assert!(text.contains("pending: 3"));
        assert!(text.contains("recent mean confidence: -"));
        assert!(text.contains("model ready: no"));
    }
}
