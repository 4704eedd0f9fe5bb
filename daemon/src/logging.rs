use anyhow::Context;
use log::LevelFilter;
use std::path::PathBuf;

use crate::config::LoggingConfig;

/// Target used for backend job output lines, routed to their own file.
pub const JOB_OUTPUT_TARGET: &str = "job_output";

pub fn parse_level(level: &str) -> anyhow::Result<LevelFilter> {
    level
        .parse::<LevelFilter>()
        .map_err(|_| anyhow::anyhow!("invalid log level '{}'", level))
}

fn format_text(out: fern::FormatCallback, message: &std::fmt::Arguments, record: &log::Record) {
    out.finish(format_args!(
        "[{}][{}][{}] {}",
        chrono::Local::now().format("%Y-%m-%d][%H:%M:%S"),
        record.target(),
        record.level(),
        message
    ))
}

fn format_json(out: fern::FormatCallback, message: &std::fmt::Arguments, record: &log::Record) {
    let line = serde_json::json!({
        "ts": chrono::Utc::now().to_rfc3339(),
        "level": record.level().to_string(),
        "target": record.target(),
        "message": message.to_string(),
    });
    out.finish(format_args!("{}", line))
}

/// Main log file: `CAPIOPS_LOG` wins over the configured path.
fn main_log_path(config: &LoggingConfig) -> Option<PathBuf> {
    std::env::var("CAPIOPS_LOG").ok().map(PathBuf::from).or_else(|| config.output.clone())
}

pub fn setup_logging(config: &LoggingConfig) -> anyhow::Result<()> {
    let mut base_config = fern::Dispatch::new().level(parse_level(&config.level)?);
    for (target, level) in &config.targets {
        base_config = base_config.level_for(target.clone(), parse_level(level)?);
    }
    // Job output is always recorded at info, whatever the global level.
    base_config = base_config.level_for(JOB_OUTPUT_TARGET, LevelFilter::Info);

    base_config = match config.format.as_str() {
        "json" => base_config.format(format_json),
        "text" => base_config.format(format_text),
        other => anyhow::bail!("unknown log format '{}' (expected text or json)", other),
    };

    // Main log: filter OUT job_output
    let mut main_log = fern::Dispatch::new()
        .filter(|metadata| metadata.target() != JOB_OUTPUT_TARGET)
        .chain(std::io::stdout());
    if let Some(path) = main_log_path(config) {
        main_log = main_log.chain(
            fern::log_file(&path).with_context(|| format!("opening log file {}", path.display()))?,
        );
    }
    base_config = base_config.chain(main_log);

    // Jobs log: filter IN job_output
    if let Some(path) = &config.jobs_output {
        let jobs_log = fern::Dispatch::new()
            .filter(|metadata| metadata.target() == JOB_OUTPUT_TARGET)
            .chain(fern::log_file(path).with_context(|| format!("opening jobs log {}", path.display()))?);
        base_config = base_config.chain(jobs_log);
    }

    base_config.apply()?;
    Ok(())
}
