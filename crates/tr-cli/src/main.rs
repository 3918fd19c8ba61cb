//! # tr-cli: `trib`, the terminal face of TRIBUTARY
//!
//! - `trib logs -f level=error`: Fetch one page from the hub.
//! - `trib tail -f log_type=postgres`: Follow new rows.
//! - `trib sql --shape facets -f method=GET`: Compile locally, print the SQL.
//! - `trib sources`: List the hub's log sources.
//!
//! Talks to the hub at `TRIB_BASE_URL` (default `http://127.0.0.1:3100`),
//! sending `TRIB_API_KEY` as a bearer token when set.

use chrono::{SecondsFormat, Utc};
use clap::{Parser, Subcommand};
use std::time::Duration;
use tabled::{Table, Tabled};
use thiserror::Error;

use tr_core::{
    compile, CompileError, Cursor, FilterError, FilterState, LogsPage, QueryShape, SourceRegistry,
    UnifiedRow,
};

/// TRIBUTARY: one query over every log source.
#[derive(Parser)]
#[command(name = "trib", version, about, long_about = None)]
struct Cli {
    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Fetch one page of unified logs.
    Logs {
        /// Filter as key=value (repeatable), e.g. -f level=error,warning
        #[arg(short = 'f', long = "filter")]
        filters: Vec<String>,

        /// Print the raw JSON envelope instead of a table.
        #[arg(long)]
        json: bool,
    },

    /// Follow new rows as they arrive.
    Tail {
        #[arg(short = 'f', long = "filter")]
        filters: Vec<String>,

        /// Poll interval in milliseconds.
        #[arg(long, default_value_t = 2000)]
        interval_ms: u64,
    },

    /// Compile a filter to SQL without contacting the hub.
    Sql {
        /// rows, facets or histogram
        #[arg(long, default_value = "rows")]
        shape: String,

        #[arg(short = 'f', long = "filter")]
        filters: Vec<String>,
    },

    /// List the log sources the hub federates.
    Sources,
}

#[derive(Debug, Error)]
enum CliError {
    #[error("request failed: {0}")]
    Http(#[from] reqwest::Error),

    #[error("hub returned {status}: {message}")]
    Hub { status: u16, message: String },

    #[error(transparent)]
    Filter(#[from] FilterError),

    #[error(transparent)]
    Compile(#[from] CompileError),

    #[error("filter '{0}' is not of the form key=value")]
    FilterSyntax(String),
}

fn main() {
    let cli = Cli::parse();

    let result = match cli.command {
        Commands::Sql { shape, filters } => compile_locally(&shape, &filters),

        // Async Commands
        cmd => match tokio::runtime::Builder::new_current_thread()
            .enable_all()
            .build()
        {
            Ok(rt) => rt.block_on(async_main(cmd)),
            Err(e) => {
                eprintln!("Failed to build tokio runtime: {}", e);
                std::process::exit(1);
            }
        },
    };

    if let Err(e) = result {
        eprintln!("Error: {}", e);
        std::process::exit(1);
    }
}

fn compile_locally(shape: &str, filters: &[String]) -> Result<(), CliError> {
    let shape: QueryShape = shape.parse()?;
    let filter = FilterState::from_params(parse_filters(filters)?)?;
    let registry = SourceRegistry::with_default_sources();
    let compiled = compile(&filter, shape, &registry, Utc::now())?;

    eprintln!("-- shape:  {}", compiled.shape);
    eprintln!(
        "-- window: {} .. {}",
        compiled.window.iso_start(),
        compiled.window.iso_end()
    );
    if let Some(granularity) = compiled.granularity {
        eprintln!("-- bucket: {:?}", granularity);
    }
    println!("{}", compiled.sql);
    Ok(())
}

async fn async_main(cmd: Commands) -> Result<(), CliError> {
    let hub = Hub::from_env();

    match cmd {
        Commands::Logs { filters, json } => {
            let params = parse_filters(&filters)?;
            if json {
                let envelope: serde_json::Value = hub.get("/api/logs", &params).await?;
                println!("{}", serde_json::to_string_pretty(&envelope).unwrap_or_default());
                return Ok(());
            }
            let page: LogsPage = hub.get("/api/logs", &params).await?;
            println!("{}", render_rows(&page.data));
            println!(
                "{} of {} rows match | next cursor: {} | prev cursor: {}",
                page.meta.filter_row_count,
                page.meta.total_row_count,
                page.next_cursor
                    .map(|c| c.to_string())
                    .unwrap_or_else(|| "-".into()),
                page.prev_cursor
            );
        }

        Commands::Tail {
            filters,
            interval_ms,
        } => {
            let mut params = parse_filters(&filters)?;
            params.push(("live".into(), "true".into()));

            let first: LogsPage = hub.get("/api/logs", &params).await?;
            print_oldest_first(&first.data);
            let mut prev = first.prev_cursor;

            loop {
                tokio::time::sleep(Duration::from_millis(interval_ms)).await;
                let mut step = params.clone();
                step.push(("cursor".into(), prev.to_string()));
                step.push(("direction".into(), "prev".into()));

                match hub.get::<LogsPage>("/api/logs", &step).await {
                    Ok(page) => {
                        print_oldest_first(&page.data);
                        prev = page.prev_cursor;
                    }
                    Err(e) => eprintln!("tail: {}", e),
                }
            }
        }

        Commands::Sources => {
            let sources: serde_json::Value = hub.get("/api/sources", &[]).await?;
            println!("{}", serde_json::to_string_pretty(&sources).unwrap_or_default());
        }

        Commands::Sql { .. } => {}
    }
    Ok(())
}

/// Split `key=value` arguments into query-string pairs.
fn parse_filters(filters: &[String]) -> Result<Vec<(String, String)>, CliError> {
    filters
        .iter()
        .map(|raw| {
            raw.split_once('=')
                .map(|(k, v)| (k.trim().to_string(), v.trim().to_string()))
                .filter(|(k, _)| !k.is_empty())
                .ok_or_else(|| CliError::FilterSyntax(raw.clone()))
        })
        .collect()
}

// =============================================================================
// Hub client
// =============================================================================

struct Hub {
    client: reqwest::Client,
    base_url: String,
    api_key: Option<String>,
}

impl Hub {
    fn from_env() -> Self {
        Self {
            client: reqwest::Client::new(),
            base_url: std::env::var("TRIB_BASE_URL")
                .unwrap_or_else(|_| "http://127.0.0.1:3100".to_string()),
            api_key: std::env::var("TRIB_API_KEY").ok(),
        }
    }

    async fn get<T: serde::de::DeserializeOwned>(
        &self,
        path: &str,
        params: &[(String, String)],
    ) -> Result<T, CliError> {
        let url = format!("{}{}", self.base_url.trim_end_matches('/'), path);
        let mut req = self.client.get(&url).query(params);
        if let Some(k) = &self.api_key {
            req = req.header("Authorization", format!("Bearer {}", k));
        }
        let resp = req.send().await?;
        let status = resp.status();
        if !status.is_success() {
            let body: serde_json::Value = resp.json().await.unwrap_or_default();
            return Err(CliError::Hub {
                status: status.as_u16(),
                message: hub_message(&body),
            });
        }
        Ok(resp.json().await?)
    }
}

fn hub_message(body: &serde_json::Value) -> String {
    body.pointer("/error/message")
        .and_then(|m| m.as_str())
        .map(str::to_string)
        .unwrap_or_else(|| body.to_string())
}

// =============================================================================
// Rendering
// =============================================================================

#[derive(Tabled)]
struct RowView {
    #[tabled(rename = "time")]
    time: String,
    #[tabled(rename = "source")]
    source: String,
    #[tabled(rename = "level")]
    level: String,
    #[tabled(rename = "status")]
    status: String,
    #[tabled(rename = "message")]
    message: String,
}

impl From<&UnifiedRow> for RowView {
    fn from(row: &UnifiedRow) -> Self {
        let time = Cursor::from_micros(row.timestamp)
            .to_datetime()
            .map(|t| t.to_rfc3339_opts(SecondsFormat::Millis, true))
            .unwrap_or_else(|| row.timestamp.to_string());
        let message = match (&row.method, &row.path) {
            (Some(method), Some(path)) => format!("{} {}", method, path),
            _ => row.event_message.clone().unwrap_or_default(),
        };
        Self {
            time,
            source: row.source_type.as_str().to_string(),
            level: row.level.as_str().to_string(),
            status: row.status.clone().unwrap_or_default(),
            message: truncate(&message, 96),
        }
    }
}

fn truncate(text: &str, max: usize) -> String {
    let line = text.lines().next().unwrap_or_default();
    if line.chars().count() <= max {
        line.to_string()
    } else {
        let cut: String = line.chars().take(max.saturating_sub(1)).collect();
        format!("{}…", cut)
    }
}

fn render_rows(rows: &[UnifiedRow]) -> String {
    Table::new(rows.iter().map(RowView::from)).to_string()
}

/// Pages arrive newest first; a tail reads better oldest first.
fn print_oldest_first(rows: &[UnifiedRow]) {
    for row in rows.iter().rev() {
        let view = RowView::from(row);
        println!(
            "{} {:<14} {:<7} {:>5} {}",
            view.time, view.source, view.level, view.status, view.message
        );
    }
}
