//! Command-line surface of the `bindery` binary.
//!
//! Every command works against a state directory. `list`, `show`, `preview`
//! and `config` only read local state; the others also talk to qBittorrent.

use std::fmt::Write as _;
use std::path::{Path, PathBuf};
use std::str::FromStr;

use bindery_config::{ConfigError, SettingKey, SettingsProvider};
use bindery_core::{DownloadStore, NewDownload, TemplateVars};
use bindery_telemetry::{DEFAULT_LOG_LEVEL, LogFormat, LoggingConfig, init_logging};
use clap::{Args, Parser, Subcommand};
use serde::Deserialize;
use tokio_util::sync::CancellationToken;
use tracing::{info, warn};
use uuid::Uuid;

use crate::bootstrap::{
    DEFAULT_STATE_DIR, STATE_DIR_ENV, StatePaths, build_context, open_records, open_settings,
    run_monitor,
};
use crate::downloads::{AddDownload, DownloadService};
use crate::error::{AppError, AppResult};
use crate::output::{
    OutputFormat, display_value, render_outcome, render_record, render_records, render_settings,
};

/// Parse arguments, install logging, run the command and print its output.
/// Returns the process exit code.
pub async fn run() -> i32 {
    let cli = Cli::parse();
    let logging = LoggingConfig {
        level: &cli.log_level,
        format: cli.log_format.unwrap_or_else(LogFormat::infer),
        build_version: env!("CARGO_PKG_VERSION"),
    };
    if let Err(err) = init_logging(&logging) {
        eprintln!("error: {err}");
        return 3;
    }

    match execute(cli).await {
        Ok(output) => {
            print!("{output}");
            0
        }
        Err(err) => {
            eprintln!("error: {}", display_chain(&err));
            err.exit_code()
        }
    }
}

/// Audiobook download monitor and library organizer.
#[derive(Debug, Parser)]
#[command(
    name = "bindery",
    version,
    about = "Audiobook download monitor and library organizer"
)]
pub struct Cli {
    /// Directory holding settings.json and downloads.db.
    #[arg(long, global = true, env = STATE_DIR_ENV, default_value = DEFAULT_STATE_DIR)]
    pub state_dir: PathBuf,
    /// Log level directive; `RUST_LOG` takes precedence.
    #[arg(long, global = true, env = "BINDERY_LOG_LEVEL", default_value = DEFAULT_LOG_LEVEL)]
    pub log_level: String,
    /// `json` or `pretty`.
    #[arg(long, global = true, env = "BINDERY_LOG_FORMAT", value_parser = LogFormat::from_str)]
    pub log_format: Option<LogFormat>,
    /// Output format for listings.
    #[arg(long, global = true, value_enum, default_value_t = OutputFormat::Table)]
    pub output: OutputFormat,
    /// Command to run.
    #[command(subcommand)]
    pub command: Command,
}

/// Top-level commands.
#[derive(Debug, Subcommand)]
pub enum Command {
    /// Poll qBittorrent and organize finished downloads until interrupted.
    Run,
    /// Send a new download to qBittorrent and track it.
    Add(AddArgs),
    /// Add every download listed in a JSON file.
    Import(ImportArgs),
    /// List tracked downloads.
    List,
    /// Show one download.
    Show(IdArgs),
    /// Remove a download from qBittorrent (keeping its files) and stop tracking it.
    Cancel(IdArgs),
    /// Organize a completed or failed download now.
    Organize(IdArgs),
    /// Show where a book would be placed in the library.
    Preview(PreviewArgs),
    /// Read and change settings.
    #[command(subcommand)]
    Config(ConfigCommand),
}

/// Book metadata and transfer source for `add`.
#[derive(Debug, Args)]
pub struct AddArgs {
    /// Book title.
    #[arg(long)]
    pub title: String,
    /// Book author.
    #[arg(long)]
    pub author: String,
    /// Series name.
    #[arg(long)]
    pub series: Option<String>,
    /// Position within the series.
    #[arg(long)]
    pub series_number: Option<String>,
    /// qBittorrent category.
    #[arg(long)]
    pub category: Option<String>,
    /// Magnet link.
    #[arg(long, conflicts_with = "url", required_unless_present = "url")]
    pub magnet: Option<String>,
    /// Torrent file URL.
    #[arg(long)]
    pub url: Option<String>,
    /// Info-hash of the torrent behind `--url`.
    #[arg(long, requires = "url")]
    pub hash: Option<String>,
}

impl AddArgs {
    fn into_request(self) -> AppResult<AddDownload> {
        AddDownload::from_links(
            NewDownload {
                title: self.title,
                author: self.author,
                series: self.series,
                series_number: self.series_number,
                category: self.category,
            },
            self.magnet,
            self.url,
            self.hash,
        )
    }
}

/// File argument for `import`.
#[derive(Debug, Args)]
pub struct ImportArgs {
    /// JSON document of the form `{"downloads": [...]}`.
    pub file: PathBuf,
}

/// Record identifier argument.
#[derive(Debug, Args)]
pub struct IdArgs {
    /// Download identifier.
    pub id: Uuid,
}

/// Metadata for `preview`.
#[derive(Debug, Args)]
pub struct PreviewArgs {
    /// Book title.
    #[arg(long)]
    pub title: String,
    /// Book author.
    #[arg(long)]
    pub author: String,
    /// Series name.
    #[arg(long)]
    pub series: Option<String>,
    /// Position within the series.
    #[arg(long)]
    pub series_number: Option<String>,
    /// Template to try instead of the configured one.
    #[arg(long)]
    pub template: Option<String>,
}

/// Settings commands.
#[derive(Debug, Subcommand)]
pub enum ConfigCommand {
    /// Print one setting.
    Get {
        /// Setting key, e.g. `paths.destination`.
        #[arg(value_parser = parse_key)]
        key: SettingKey,
    },
    /// Validate and store a setting; an empty value clears it.
    Set {
        /// Setting key, e.g. `paths.destination`.
        #[arg(value_parser = parse_key)]
        key: SettingKey,
        /// New value.
        value: String,
    },
    /// Print every setting, defaults included.
    List,
}

#[derive(Debug, Deserialize)]
struct ImportDocument {
    downloads: Vec<ImportEntry>,
}

#[derive(Debug, Deserialize)]
struct ImportEntry {
    title: String,
    author: String,
    #[serde(default)]
    series: Option<String>,
    #[serde(default)]
    series_number: Option<String>,
    #[serde(default)]
    category: Option<String>,
    #[serde(default)]
    magnet_link: Option<String>,
    #[serde(default)]
    torrent_url: Option<String>,
    #[serde(default)]
    hash: Option<String>,
}

impl ImportEntry {
    fn into_request(self) -> AppResult<AddDownload> {
        AddDownload::from_links(
            NewDownload {
                title: self.title,
                author: self.author,
                series: self.series,
                series_number: self.series_number,
                category: self.category,
            },
            self.magnet_link,
            self.torrent_url,
            self.hash,
        )
    }
}

fn parse_key(input: &str) -> Result<SettingKey, String> {
    input.parse().map_err(|err: ConfigError| err.to_string())
}

/// Run a parsed command and return what it prints.
///
/// # Errors
///
/// Returns the command's [`AppError`]; see [`AppError::exit_code`].
pub async fn execute(cli: Cli) -> AppResult<String> {
    let paths = StatePaths::new(cli.state_dir);
    let format = cli.output;

    match cli.command {
        Command::Run => {
            run_until_interrupted(&paths).await?;
            Ok(String::new())
        }
        Command::Add(args) => {
            let request = args.into_request()?;
            let record = service(&paths).await?.create(request).await?;
            render_record(&record, format)
        }
        Command::Import(args) => {
            let requests = read_import(&args.file).await?;
            let outcome = service(&paths).await?.create_batch(requests).await?;
            match format {
                OutputFormat::Json => serde_json::to_string_pretty(&outcome)
                    .map(|text| text + "\n")
                    .map_err(|source| AppError::Encode {
                        operation: "import",
                        source,
                    }),
                OutputFormat::Table => {
                    let mut output = render_records(&outcome.created, format)?;
                    for failure in &outcome.failed {
                        let _ = writeln!(output, "entry {}: {}", failure.index, failure.error);
                    }
                    Ok(output)
                }
            }
        }
        Command::List => {
            let records = open_records(&paths)
                .await?
                .list()
                .await
                .map_err(|err| AppError::store("downloads.list", err))?;
            render_records(&records, format)
        }
        Command::Show(args) => {
            let record = open_records(&paths)
                .await?
                .get(args.id)
                .await
                .map_err(|err| AppError::store("downloads.get", err))?;
            render_record(&record, format)
        }
        Command::Cancel(args) => {
            service(&paths).await?.cancel(args.id).await?;
            Ok(format!("cancelled {}\n", args.id))
        }
        Command::Organize(args) => {
            let outcome = service(&paths).await?.organize(args.id).await?;
            Ok(render_outcome(&outcome))
        }
        Command::Preview(args) => preview(&paths, args).await,
        Command::Config(command) => configure(&paths, command, format).await,
    }
}

async fn service(paths: &StatePaths) -> AppResult<DownloadService> {
    let settings = open_settings(paths).await?;
    let ctx = build_context(paths, settings).await?;
    Ok(DownloadService::new(&ctx))
}

async fn run_until_interrupted(paths: &StatePaths) -> AppResult<()> {
    let settings = open_settings(paths).await?;
    let ctx = build_context(paths, settings).await?;

    let shutdown = CancellationToken::new();
    let trigger = shutdown.clone();
    tokio::spawn(async move {
        match tokio::signal::ctrl_c().await {
            Ok(()) => {
                info!("interrupt received; stopping monitor");
                trigger.cancel();
            }
            Err(err) => warn!(error = %err, "failed to listen for interrupts"),
        }
    });

    run_monitor(&ctx, shutdown).await
}

async fn read_import(path: &Path) -> AppResult<Vec<AppResult<AddDownload>>> {
    let bytes = tokio::fs::read(path).await.map_err(|source| AppError::Io {
        operation: "import.read",
        path: Some(path.to_path_buf()),
        source,
    })?;
    parse_import(&bytes)
}

fn parse_import(bytes: &[u8]) -> AppResult<Vec<AppResult<AddDownload>>> {
    let document: ImportDocument = serde_json::from_slice(bytes)
        .map_err(|err| AppError::validation("import file", err.to_string()))?;
    Ok(document
        .downloads
        .into_iter()
        .map(ImportEntry::into_request)
        .collect())
}

async fn preview(paths: &StatePaths, args: PreviewArgs) -> AppResult<String> {
    let has_series = args
        .series
        .as_deref()
        .is_some_and(|series| !series.trim().is_empty());
    let template = match args.template {
        Some(template) => template,
        None => {
            let key = if has_series {
                SettingKey::PathsTemplate
            } else {
                SettingKey::PathsNoSeriesTemplate
            };
            let settings = open_settings(paths).await?;
            setting_or_default(settings.as_ref(), key).await?
        }
    };

    let vars = TemplateVars::book(
        &args.author,
        &args.title,
        args.series.as_deref(),
        args.series_number.as_deref(),
    );
    Ok(bindery_core::preview(&template, &vars)? + "\n")
}

async fn setting_or_default(settings: &dyn SettingsProvider, key: SettingKey) -> AppResult<String> {
    let value = settings
        .get(key)
        .await
        .map_err(|err| AppError::config("config.get", err))?;
    value
        .or_else(|| key.default_value().map(str::to_string))
        .ok_or_else(|| AppError::config("config.get", ConfigError::Missing { key: key.as_str() }))
}

async fn configure(
    paths: &StatePaths,
    command: ConfigCommand,
    format: OutputFormat,
) -> AppResult<String> {
    let settings = open_settings(paths).await?;
    match command {
        ConfigCommand::Get { key } => {
            let value = setting_or_default(settings.as_ref(), key).await?;
            Ok(format!("{}\n", display_value(key, &value)))
        }
        ConfigCommand::Set { key, value } => {
            settings
                .set(key, &value)
                .await
                .map_err(|err| AppError::config("config.set", err))?;
            info!(key = %key, "setting updated");
            Ok(format!("{key} = {}\n", display_value(key, value.trim())))
        }
        ConfigCommand::List => {
            let values = settings
                .all()
                .await
                .map_err(|err| AppError::config("config.list", err))?;
            render_settings(&values, format)
        }
    }
}

fn display_chain(err: &AppError) -> String {
    let mut message = err.to_string();
    let mut source = std::error::Error::source(err);
    while let Some(cause) = source {
        let text = cause.to_string();
        if !message.contains(&text) {
            message.push_str(": ");
            message.push_str(&text);
        }
        source = cause.source();
    }
    message
}

#[cfg(test)]
mod tests {
    use bindery_core::{DownloadStatus, TransferSource};
    use bindery_runtime::RecordStore;

    use super::*;

    fn cli(state_dir: &std::path::Path, args: &[&str]) -> anyhow::Result<Cli> {
        let mut argv = vec![
            "bindery".to_string(),
            "--state-dir".to_string(),
            state_dir.display().to_string(),
        ];
        argv.extend(args.iter().map(ToString::to_string));
        Ok(Cli::try_parse_from(argv)?)
    }

    #[test]
    fn add_requires_exactly_one_source() -> anyhow::Result<()> {
        let dir = tempfile::tempdir()?;
        let parsed = cli(
            dir.path(),
            &[
                "add",
                "--title",
                "Elantris",
                "--author",
                "Brandon Sanderson",
                "--magnet",
                "magnet:?xt=urn:btih:ab",
            ],
        )?;
        assert!(matches!(parsed.command, Command::Add(AddArgs { magnet: Some(_), .. })));

        assert!(cli(dir.path(), &["add", "--title", "Elantris", "--author", "B"]).is_err());
        assert!(
            cli(
                dir.path(),
                &["add", "--title", "E", "--author", "B", "--magnet", "m", "--url", "u"],
            )
            .is_err()
        );
        assert!(
            cli(
                dir.path(),
                &["add", "--title", "E", "--author", "B", "--magnet", "m", "--hash", "h"],
            )
            .is_err()
        );
        Ok(())
    }

    #[test]
    fn config_keys_are_checked_while_parsing() -> anyhow::Result<()> {
        let dir = tempfile::tempdir()?;
        let parsed = cli(dir.path(), &["config", "get", "paths.operation"])?;
        assert!(matches!(
            parsed.command,
            Command::Config(ConfigCommand::Get {
                key: SettingKey::PathsOperation
            })
        ));
        assert!(cli(dir.path(), &["config", "get", "paths.nope"]).is_err());
        Ok(())
    }

    #[tokio::test]
    async fn config_round_trips_through_the_state_dir() -> anyhow::Result<()> {
        let dir = tempfile::tempdir()?;

        let output = execute(cli(dir.path(), &["config", "get", "paths.operation"])?).await?;
        assert_eq!(output, "copy\n");

        let output = execute(cli(dir.path(), &["config", "set", "paths.operation", "move"])?).await?;
        assert_eq!(output, "paths.operation = move\n");
        let output = execute(cli(dir.path(), &["config", "get", "paths.operation"])?).await?;
        assert_eq!(output, "move\n");

        execute(cli(dir.path(), &["config", "set", "qbittorrent.password", "hunter2"])?).await?;
        let output = execute(cli(dir.path(), &["config", "list"])?).await?;
        assert!(output.contains("qbittorrent.password = ********\n"));
        assert!(!output.contains("hunter2"));
        assert!(dir.path().join("settings.json").is_file());

        let err = execute(cli(dir.path(), &["config", "set", "paths.operation", "link"])?).await;
        assert!(matches!(&err, Err(err) if err.exit_code() == 2));

        let err = execute(cli(dir.path(), &["config", "get", "paths.destination"])?).await;
        assert!(matches!(err, Err(AppError::Config { .. })));
        Ok(())
    }

    #[tokio::test]
    async fn preview_uses_the_configured_layouts() -> anyhow::Result<()> {
        let dir = tempfile::tempdir()?;

        let output = execute(cli(
            dir.path(),
            &["preview", "--title", "Warbreaker", "--author", "Brandon Sanderson"],
        )?)
        .await?;
        assert_eq!(output, "Brandon Sanderson/Warbreaker\n");

        let output = execute(cli(
            dir.path(),
            &[
                "preview", "--title", "Oathbringer", "--author", "Brandon Sanderson", "--series",
                "Stormlight: Archive", "--series-number", "3",
            ],
        )?)
        .await?;
        assert_eq!(output, "Brandon Sanderson/Stormlight- Archive/Oathbringer\n");

        let output = execute(cli(
            dir.path(),
            &[
                "preview", "--title", "Oathbringer", "--author", "Brandon Sanderson", "--series",
                "Stormlight", "--series-number", "3", "--template",
                "{author}/{series} {series_number} - {title}",
            ],
        )?)
        .await?;
        assert_eq!(output, "Brandon Sanderson/Stormlight 3 - Oathbringer\n");

        let err = execute(cli(
            dir.path(),
            &["preview", "--title", "T", "--author", "A", "--template", "{narrator}/{title}"],
        )?)
        .await;
        assert!(matches!(err, Err(AppError::Template { .. })));
        Ok(())
    }

    #[tokio::test]
    async fn listing_reads_local_state_only() -> anyhow::Result<()> {
        let dir = tempfile::tempdir()?;
        let store = RecordStore::open(dir.path().join("downloads.db")).await?;
        let record = bindery_core::DownloadRecord::new(
            NewDownload {
                title: "Mistborn".into(),
                author: "Brandon Sanderson".into(),
                ..NewDownload::default()
            },
            "aa11",
        );
        store.create(record.clone()).await?;

        let output = execute(cli(dir.path(), &["list"])?).await?;
        assert_eq!(output.lines().count(), 2);
        assert!(output.contains("Mistborn by Brandon Sanderson"));

        let id = record.id.to_string();
        let output = execute(cli(dir.path(), &["--output", "json", "show", &id])?).await?;
        let shown: bindery_core::DownloadRecord = serde_json::from_str(&output)?;
        assert_eq!(shown.status, DownloadStatus::Queued);

        let missing = Uuid::new_v4().to_string();
        let err = execute(cli(dir.path(), &["show", &missing])?).await;
        assert!(matches!(
            err,
            Err(AppError::Store {
                operation: "downloads.get",
                ..
            })
        ));
        Ok(())
    }

    #[tokio::test]
    async fn agent_commands_need_a_qbittorrent_url() -> anyhow::Result<()> {
        let dir = tempfile::tempdir()?;
        let err = execute(cli(
            dir.path(),
            &[
                "add",
                "--title",
                "Elantris",
                "--author",
                "Brandon Sanderson",
                "--magnet",
                "magnet:?xt=urn:btih:ab",
            ],
        )?)
        .await;
        assert!(matches!(
            err,
            Err(AppError::Config {
                operation: "agent.resolve",
                ..
            })
        ));
        Ok(())
    }

    #[test]
    fn import_documents_keep_bad_entries_for_reporting() -> anyhow::Result<()> {
        let requests = parse_import(
            br#"{"downloads": [
                {"title": "Elantris", "author": "Brandon Sanderson", "magnet_link": "magnet:?xt=urn:btih:ab"},
                {"title": "Warbreaker", "author": "Brandon Sanderson"},
                {"title": "Arcanum", "author": "Brandon Sanderson", "torrent_url": "https://t.example/a.torrent", "hash": "CD"}
            ]}"#,
        )?;
        assert_eq!(requests.len(), 3);
        assert!(matches!(
            &requests[0],
            Ok(AddDownload { source: TransferSource::Magnet(_), .. })
        ));
        assert!(matches!(&requests[1], Err(AppError::Validation { field: "source", .. })));
        assert!(matches!(
            &requests[2],
            Ok(AddDownload { source: TransferSource::Url { handle: Some(handle), .. }, .. }) if handle == "cd"
        ));

        assert!(matches!(
            parse_import(b"[]"),
            Err(AppError::Validation { field: "import file", .. })
        ));
        Ok(())
    }

    #[test]
    fn error_chains_skip_repeated_text() {
        let err = AppError::config(
            "config.get",
            ConfigError::Missing {
                key: "paths.destination",
            },
        );
        let text = display_chain(&err);
        assert_eq!(text.matches("paths.destination").count(), 1);
    }
}
