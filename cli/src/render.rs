use comfy_table::{presets::UTF8_FULL, ContentArrangement, Table};
use common::{EntrySource, Job, ViewEntry};
use serde::Serialize;
use std::io::Write;

const OUTPUT_PREVIEW: usize = 60;

fn preview(output: Option<&str>) -> String {
    let last = output.unwrap_or("").lines().rev().find(|l| !l.trim().is_empty()).unwrap_or("");
    if last.chars().count() > OUTPUT_PREVIEW {
        let cut: String = last.chars().take(OUTPUT_PREVIEW - 3).collect();
        format!("{}...", cut)
    } else {
        last.to_string()
    }
}

pub fn entries_table(entries: &[ViewEntry]) -> Table {
    let mut table = Table::new();
    table
        .load_preset(UTF8_FULL)
        .set_content_arrangement(ContentArrangement::Dynamic)
        .set_header(vec!["When", "Status", "Title", "Env", "ID", "Output"]);

    for entry in entries {
        let id = match entry.source {
            EntrySource::Ledger => format!("{} (local)", entry.id),
            EntrySource::JobStore => entry.id.clone(),
        };
        table.add_row(vec![
            entry.timestamp.to_string(),
            entry.display_status(),
            entry.title.clone(),
            entry.environment.as_ref().map(|e| e.to_string()).unwrap_or_else(|| "-".into()),
            id,
            preview(entry.output.as_deref()),
        ]);
    }
    table
}

#[derive(Serialize)]
struct CsvRow<'a> {
    timestamp: i64,
    id: &'a str,
    source: &'static str,
    title: &'a str,
    status: &'static str,
    reason: &'a str,
    environment: String,
    playbook: &'a str,
}

pub fn write_csv<W: Write>(entries: &[ViewEntry], out: W) -> anyhow::Result<()> {
    let mut writer = csv::Writer::from_writer(out);
    for entry in entries {
        let reason = match &entry.status {
            common::Status::Failed(reason) => reason.as_str(),
            _ => "",
        };
        writer.serialize(CsvRow {
            timestamp: entry.timestamp.as_millis(),
            id: &entry.id,
            source: match entry.source {
                EntrySource::Ledger => "ledger",
                EntrySource::JobStore => "job_store",
            },
            title: &entry.title,
            status: entry.status.label(),
            reason,
            environment: entry.environment.as_ref().map(|e| e.to_string()).unwrap_or_default(),
            playbook: entry.playbook.as_deref().unwrap_or(""),
        })?;
    }
    writer.flush()?;
    Ok(())
}

pub fn print_job(job: &Job) {
    println!("Job Details:");
    println!("  ID:          {}", job.id);
    println!("  Description: {}", job.description);
    println!("  Status:      {}", job.status);
    println!("  Created:     {}", job.created_at);
    if let Some(env) = &job.environment {
        println!("  Environment: {}", env);
    }
    if let Some(task) = &job.task_file {
        println!("  Task:        {}", task);
    }
    if let Some(cluster) = &job.cluster {
        println!("  Cluster:     {}", cluster);
    }
    println!("  Log lines:   {}", job.logs.len());
}

pub fn all_terminal(entries: &[ViewEntry]) -> bool {
    entries.iter().all(|e| e.status.is_terminal())
}

/// Parses a `key=value` extra variable.
pub fn parse_var(s: &str) -> Result<(String, String), String> {
    match s.split_once('=') {
        Some((key, value)) if !key.trim().is_empty() => Ok((key.trim().to_string(), value.to_string())),
        _ => Err(format!("expected KEY=VALUE, got '{}'", s)),
    }
}
