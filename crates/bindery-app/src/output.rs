//! Output renderers for CLI commands.

use std::collections::BTreeMap;
use std::fmt::Write as _;

use bindery_config::SettingKey;
use bindery_core::DownloadRecord;
use bindery_library::{OrganizeOutcome, format_bytes};
use clap::ValueEnum;
use serde::Serialize;

use crate::error::{AppError, AppResult};

const SECRET_MASK: &str = "********";

/// Output format for listings.
#[derive(Copy, Clone, Debug, Default, PartialEq, Eq, ValueEnum)]
pub enum OutputFormat {
    /// Aligned columns.
    #[default]
    Table,
    /// Pretty-printed JSON.
    Json,
}

/// Render a record listing.
///
/// # Errors
///
/// Returns [`AppError::Encode`] when JSON encoding fails.
pub fn render_records(records: &[DownloadRecord], format: OutputFormat) -> AppResult<String> {
    match format {
        OutputFormat::Json => json("records", records),
        OutputFormat::Table => {
            let mut out = format!("{:<36} {:<11} {:>7} TITLE\n", "ID", "STATUS", "PROG");
            for record in records {
                let _ = writeln!(
                    out,
                    "{:<36} {:<11} {:>7} {}",
                    record.id,
                    record.status,
                    format!("{:.1}%", record.progress),
                    book_label(record)
                );
            }
            Ok(out)
        }
    }
}

/// Render one record in full.
///
/// # Errors
///
/// Returns [`AppError::Encode`] when JSON encoding fails.
pub fn render_record(record: &DownloadRecord, format: OutputFormat) -> AppResult<String> {
    if format == OutputFormat::Json {
        return json("record", record);
    }

    let mut out = String::new();
    let _ = writeln!(out, "id: {}", record.id);
    let _ = writeln!(out, "title: {}", record.title);
    let _ = writeln!(out, "author: {}", record.author);
    if let Some(series) = record.series_name() {
        match record.series_number.as_deref() {
            Some(number) => {
                let _ = writeln!(out, "series: {series} #{number}");
            }
            None => {
                let _ = writeln!(out, "series: {series}");
            }
        }
    }
    if let Some(category) = &record.category {
        let _ = writeln!(out, "category: {category}");
    }
    let _ = writeln!(out, "handle: {}", record.remote_handle);
    let _ = writeln!(out, "status: {}", record.status);
    let _ = writeln!(out, "progress: {:.1}%", record.progress);
    let _ = writeln!(out, "created: {}", record.created_at);
    if let Some(completed) = record.completed_at {
        let _ = writeln!(out, "completed: {completed}");
    }
    if let Some(organized) = record.organized_at {
        let _ = writeln!(out, "organized: {organized}");
    }
    if let Some(path) = &record.organized_path {
        let _ = writeln!(out, "library: {}", path.display());
    }
    if let Some(message) = &record.error_message {
        let _ = writeln!(out, "error: {message}");
    }
    Ok(out)
}

/// Summary line for a finished organize.
#[must_use]
pub fn render_outcome(outcome: &OrganizeOutcome) -> String {
    format!(
        "{} {} file(s), {} into {}\n",
        match outcome.mode {
            bindery_config::TransferMode::Copy => "copied",
            bindery_config::TransferMode::Move => "moved",
        },
        outcome.files,
        format_bytes(outcome.bytes),
        outcome.target.display()
    )
}

/// Render configured settings, masking secrets.
///
/// # Errors
///
/// Returns [`AppError::Encode`] when JSON encoding fails.
pub fn render_settings(
    values: &BTreeMap<SettingKey, String>,
    format: OutputFormat,
) -> AppResult<String> {
    let shown: BTreeMap<&'static str, String> = SettingKey::ALL
        .into_iter()
        .filter_map(|key| {
            let value = values
                .get(&key)
                .map(|value| display_value(key, value))
                .or_else(|| key.default_value().map(str::to_string))?;
            Some((key.as_str(), value))
        })
        .collect();

    match format {
        OutputFormat::Json => json("settings", &shown),
        OutputFormat::Table => Ok(shown.iter().fold(String::new(), |mut out, (key, value)| {
            let _ = writeln!(out, "{key} = {value}");
            out
        })),
    }
}

/// Value as shown to the operator.
#[must_use]
pub fn display_value(key: SettingKey, value: &str) -> String {
    if key.is_secret() && !value.is_empty() {
        SECRET_MASK.to_string()
    } else {
        value.to_string()
    }
}

fn book_label(record: &DownloadRecord) -> String {
    match record.series_name() {
        Some(series) => format!("{} ({series}) by {}", record.title, record.author),
        None => format!("{} by {}", record.title, record.author),
    }
}

fn json<T: Serialize + ?Sized>(operation: &'static str, value: &T) -> AppResult<String> {
    serde_json::to_string_pretty(value)
        .map(|text| text + "\n")
        .map_err(|source| AppError::Encode { operation, source })
}

#[cfg(test)]
mod tests {
    use std::path::PathBuf;

    use bindery_config::TransferMode;
    use bindery_core::NewDownload;

    use super::*;

    fn record() -> DownloadRecord {
        DownloadRecord::new(
            NewDownload {
                title: "The Hero of Ages".into(),
                author: "Brandon Sanderson".into(),
                series: Some("Mistborn".into()),
                series_number: Some("3".into()),
                category: None,
            },
            "abc123",
        )
    }

    #[test]
    fn table_lists_status_and_progress() -> anyhow::Result<()> {
        let mut record = record();
        record.progress = 42.25;
        let text = render_records(std::slice::from_ref(&record), OutputFormat::Table)?;
        let line = text.lines().nth(1).unwrap_or_default();
        assert!(line.starts_with(&record.id.to_string()));
        assert!(line.contains("queued"));
        assert!(line.contains("42.2%") || line.contains("42.3%"));
        assert!(line.ends_with("The Hero of Ages (Mistborn) by Brandon Sanderson"));
        Ok(())
    }

    #[test]
    fn json_listing_round_trips() -> anyhow::Result<()> {
        let record = record();
        let text = render_records(std::slice::from_ref(&record), OutputFormat::Json)?;
        let decoded: Vec<DownloadRecord> = serde_json::from_str(&text)?;
        assert_eq!(decoded, vec![record]);
        Ok(())
    }

    #[test]
    fn detail_shows_errors_and_series() -> anyhow::Result<()> {
        let mut record = record();
        record.error_message = Some("source file missing: /downloads/a.mp3".into());
        let text = render_record(&record, OutputFormat::Table)?;
        assert!(text.contains("series: Mistborn #3\n"));
        assert!(text.contains("error: source file missing: /downloads/a.mp3\n"));
        assert!(!text.contains("library:"));
        Ok(())
    }

    #[test]
    fn settings_mask_secrets_and_show_defaults() -> anyhow::Result<()> {
        let values = BTreeMap::from([
            (SettingKey::QbittorrentPassword, "hunter2".to_string()),
            (SettingKey::PathsDestination, "/library".to_string()),
        ]);
        let text = render_settings(&values, OutputFormat::Table)?;
        assert!(text.contains("qbittorrent.password = ********\n"));
        assert!(text.contains("paths.destination = /library\n"));
        assert!(text.contains("paths.operation = copy\n"));
        assert!(!text.contains("hunter2"));
        assert!(!text.contains("qbittorrent.url"));
        Ok(())
    }

    #[test]
    fn outcome_summary_names_the_mode() {
        let outcome = OrganizeOutcome {
            target: PathBuf::from("/library/Brandon Sanderson/Elantris"),
            files: 2,
            bytes: 3 * 1024 * 1024 + 512 * 1024,
            mode: TransferMode::Move,
        };
        assert_eq!(
            render_outcome(&outcome),
            "moved 2 file(s), 3.5 MB into /library/Brandon Sanderson/Elantris\n"
        );
    }
}
