//! insight-cli: ask the Insight service natural-language questions about sales data
//!
//! # Subcommands
//! - `ask <question> [--json]`     run one analysis and print it
//! - `history [-n <limit>] [--json]` list recent analyses
//! - `status`                      show server health

use clap::{Parser, Subcommand};
use insight_core::models::{AnalysisRecord, AnalysisResponse, ResultSet};
use serde::Deserialize;

const DEFAULT_SERVER: &str = "http://127.0.0.1:8787";
const DEFAULT_HISTORY_LIMIT: u32 = 10;
const MAX_CELL_WIDTH: usize = 40;

// ============================================================================
// CLI Definition
// ============================================================================

#[derive(Debug, Parser)]
#[command(
    name = "insight-cli",
    version,
    about = "Ask natural-language questions of your sales data"
)]
struct Cli {
    /// Insight HTTP server URL (overrides INSIGHT_HTTP_URL env var)
    #[arg(long, env = "INSIGHT_HTTP_URL", default_value = DEFAULT_SERVER)]
    server: String,

    /// Bearer token of the session to analyze as
    #[arg(long, env = "INSIGHT_TOKEN", hide_env_values = true)]
    token: Option<String>,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Debug, Subcommand)]
enum Commands {
    /// Analyze one question
    Ask {
        /// The question, in any language the providers understand
        question: String,

        /// Print the raw JSON response
        #[arg(long)]
        json: bool,
    },

    /// List the most recent analyses
    History {
        /// Maximum number of records to return
        #[arg(short = 'n', long, default_value_t = DEFAULT_HISTORY_LIMIT)]
        limit: u32,

        /// Print the raw JSON response
        #[arg(long)]
        json: bool,
    },

    /// Show Insight server status
    Status,
}

// ============================================================================
// API Response Types
// ============================================================================

#[derive(Debug, Deserialize)]
pub struct HistoryResponse {
    pub count: usize,
    pub records: Vec<AnalysisRecord>,
}

#[derive(Debug, Deserialize)]
struct ErrorBody {
    error: String,
}

// ============================================================================
// Rendering
// ============================================================================

fn truncate(text: &str, width: usize) -> String {
    if text.chars().count() <= width {
        return text.to_string();
    }
    let mut out: String = text.chars().take(width.saturating_sub(1)).collect();
    out.push('…');
    out
}

/// Render rows as an aligned text table, columns taken from the first row.
pub fn render_table(rows: &ResultSet) -> String {
    let Some(first) = rows.first() else {
        return "(no rows)\n".to_string();
    };
    let columns: Vec<&String> = first.keys().collect();

    let cells: Vec<Vec<String>> = rows
        .iter()
        .map(|row| {
            columns
                .iter()
                .map(|c| {
                    let value = row.get(*c).map(|v| v.to_string()).unwrap_or_default();
                    truncate(&value, MAX_CELL_WIDTH)
                })
                .collect()
        })
        .collect();

    let widths: Vec<usize> = columns
        .iter()
        .enumerate()
        .map(|(i, c)| {
            cells
                .iter()
                .map(|r| r[i].chars().count())
                .chain(std::iter::once(c.chars().count()))
                .max()
                .unwrap_or(0)
        })
        .collect();

    let line = |values: Vec<&str>| -> String {
        let padded: Vec<String> = values
            .iter()
            .zip(&widths)
            .map(|(v, w)| format!("{:<width$}", v, width = *w))
            .collect();
        format!("{}\n", padded.join(" | ").trim_end())
    };

    let mut out = line(columns.iter().map(|c| c.as_str()).collect());
    out.push_str(&format!(
        "{}\n",
        widths
            .iter()
            .map(|w| "-".repeat(*w))
            .collect::<Vec<_>>()
            .join("-+-")
    ));
    for row in &cells {
        out.push_str(&line(row.iter().map(String::as_str).collect()));
    }
    out
}

fn print_analysis(response: &AnalysisResponse) {
    println!("{}\n", response.interpretation);
    println!("SQL:\n  {}\n", response.sql_query);
    println!("Results ({} rows):", response.results.len());
    print!("{}", render_table(&response.results));
    if let Some(title) = &response.chart_config.title {
        println!("\nChart: {:?} ({})", response.chart_config.kind, title);
    }
    println!();
    for section in response.insights.sections() {
        println!("## {}\n{}\n", section.title, section.content);
    }
}

// ============================================================================
// HTTP Client Calls
// ============================================================================

fn client(timeout_secs: u64) -> anyhow::Result<reqwest::blocking::Client> {
    Ok(reqwest::blocking::Client::builder()
        .timeout(std::time::Duration::from_secs(timeout_secs))
        .build()?)
}

fn fail_with_body(url: &str, resp: reqwest::blocking::Response) -> ! {
    let status = resp.status();
    let body = resp.text().unwrap_or_default();
    let message = serde_json::from_str::<ErrorBody>(&body)
        .map(|b| b.error)
        .unwrap_or(body);
    eprintln!("insight-cli: {} returned {}: {}", url, status, message);
    std::process::exit(1);
}

fn do_ask(server: &str, token: Option<&str>, question: &str, json_output: bool) -> anyhow::Result<()> {
    // Two provider round trips plus a query; allow for the slow ones.
    let client = client(120)?;
    let url = format!("{}/analyze", server);

    let mut request = client
        .post(&url)
        .json(&serde_json::json!({ "question": question }));
    if let Some(token) = token {
        request = request.bearer_auth(token);
    }

    let resp = match request.send() {
        Ok(r) => r,
        Err(e) => {
            eprintln!("insight-cli: connection failed to {}: {}", url, e);
            std::process::exit(1);
        }
    };
    if !resp.status().is_success() {
        fail_with_body(&url, resp);
    }

    if json_output {
        let body: serde_json::Value = resp.json()?;
        println!("{}", serde_json::to_string_pretty(&body)?);
        return Ok(());
    }

    let analysis: AnalysisResponse = resp.json()?;
    print_analysis(&analysis);
    Ok(())
}

fn do_history(server: &str, token: Option<&str>, limit: u32, json_output: bool) -> anyhow::Result<()> {
    let client = client(30)?;
    let url = format!("{}/history", server);

    let mut request = client.get(&url).query(&[("limit", limit)]);
    if let Some(token) = token {
        request = request.bearer_auth(token);
    }

    let resp = match request.send() {
        Ok(r) => r,
        Err(e) => {
            eprintln!("insight-cli: connection failed to {}: {}", url, e);
            std::process::exit(1);
        }
    };
    if !resp.status().is_success() {
        fail_with_body(&url, resp);
    }

    if json_output {
        let body: serde_json::Value = resp.json()?;
        println!("{}", serde_json::to_string_pretty(&body)?);
        return Ok(());
    }

    let history: HistoryResponse = resp.json()?;
    if history.count == 0 {
        eprintln!("No analyses yet");
        return Ok(());
    }
    for record in &history.records {
        println!(
            "{}  {}  ({} rows, {:?})",
            record.created_at.format("%Y-%m-%d %H:%M"),
            record.question,
            record.results.len(),
            record.chart_config.kind
        );
    }
    Ok(())
}

/// Show the server status by calling GET /health.
fn do_status(server: &str) -> anyhow::Result<()> {
    let client = client(10)?;

    let url = format!("{}/health", server);
    let resp = client.get(&url).send();

    match resp {
        Ok(r) if r.status().is_success() => {
            let body: serde_json::Value = r.json().unwrap_or_default();
            println!("Insight server: {}", body["status"].as_str().unwrap_or("unknown"));
            println!("Version:        {}", body["version"].as_str().unwrap_or("?"));
            println!("PostgreSQL:     {}", body["postgresql"].as_str().unwrap_or("?"));
        }
        Ok(r) => {
            let status = r.status();
            eprintln!("insight-cli: server unhealthy (HTTP {})", status);
            std::process::exit(1);
        }
        Err(e) => {
            eprintln!("insight-cli: cannot reach {}: {}", url, e);
            std::process::exit(1);
        }
    }

    Ok(())
}

// ============================================================================
// Main
// ============================================================================

fn main() {
    let cli = Cli::parse();
    let server = cli.server.trim_end_matches('/').to_string();
    let token = cli.token.as_deref();

    let result = match cli.command {
        Commands::Ask { question, json } => do_ask(&server, token, &question, json),
        Commands::History { limit, json } => do_history(&server, token, limit, json),
        Commands::Status => do_status(&server),
    };

    if let Err(e) = result {
        eprintln!("insight-cli: {}", e);
        std::process::exit(1);
    }
}

// ============================================================================
// Tests
// ============================================================================
