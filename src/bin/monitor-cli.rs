use clap::{Parser, Subcommand};
use serde_json::{json, Map, Value};

#[derive(Parser)]
#[command(name = "monitor-cli")]
#[command(about = "Operator CLI for the monitor hub", long_about = None)]
struct Cli {
    /// Base URL of the monitoring surface, prefix included
    #[arg(short, long, default_value = "http://127.0.0.1:9100/debug")]
    url: String,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Show task, request and process statistics
    Stats,
    /// List tasks (all known by default)
    Tasks {
        #[arg(long, conflicts_with = "history")]
        active: bool,
        #[arg(long)]
        history: bool,
    },
    /// Show one task by id
    Task { id: String },
    /// List request summaries
    Requests {
        #[arg(long)]
        active: bool,
        #[arg(long)]
        history: bool,
        #[arg(long)]
        limit: Option<usize>,
    },
    /// Show one request by id
    Request { id: String },
    /// Search requests in memory and, optionally, the audit backend
    Search {
        #[arg(long)]
        method: Option<String>,
        #[arg(long)]
        url: Option<String>,
        #[arg(long)]
        user_id: Option<String>,
        #[arg(long)]
        status_code: Option<u16>,
        #[arg(long)]
        min_duration_ms: Option<u64>,
        #[arg(long)]
        errors: bool,
        #[arg(long, default_value_t = 1)]
        page: usize,
        #[arg(long, default_value_t = 50)]
        page_size: usize,
        #[arg(long)]
        audit: bool,
    },
    /// List connected subscribers
    Connections,
    /// Zero the task counters
    ResetStats,
}

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    let cli = Cli::parse();
    let client = reqwest::Client::new();
    let base = cli.url.trim_end_matches('/');

    let res = match cli.command {
        Commands::Stats => client.get(format!("{base}/stats")).send().await?,
        Commands::Tasks { active, history } => {
            let path = if active {
                "tasks/active"
            } else if history {
                "tasks/history"
            } else {
                "tasks"
            };
            client.get(format!("{base}/{path}")).send().await?
        }
        Commands::Task { id } => client.get(format!("{base}/task/{id}")).send().await?,
        Commands::Requests {
            active,
            history,
            limit,
        } => {
            let mut query: Vec<(&str, String)> = Vec::new();
            if active {
                query.push(("active", "true".into()));
            }
            if history {
                query.push(("history", "true".into()));
            }
            if let Some(limit) = limit {
                query.push(("limit", limit.to_string()));
            }
            client
                .get(format!("{base}/requests"))
                .query(&query)
                .send()
                .await?
        }
        Commands::Request { id } => client.get(format!("{base}/request/{id}")).send().await?,
        Commands::Search {
            method,
            url,
            user_id,
            status_code,
            min_duration_ms,
            errors,
            page,
            page_size,
            audit,
        } => {
            let mut query = Map::new();
            insert_some(&mut query, "method", method);
            insert_some(&mut query, "url", url);
            insert_some(&mut query, "user_id", user_id);
            insert_some(&mut query, "status_code", status_code);
            insert_some(&mut query, "min_duration_ms", min_duration_ms);
            if errors {
                query.insert("has_error".into(), json!(true));
            }
            query.insert("page".into(), json!(page));
            query.insert("page_size".into(), json!(page_size));
            query.insert("include_audit_logs".into(), json!(audit));
            client
                .post(format!("{base}/requests/search"))
                .json(&query)
                .send()
                .await?
        }
        Commands::Connections => client.get(format!("{base}/connections")).send().await?,
        Commands::ResetStats => client.post(format!("{base}/stats/reset")).send().await?,
    };

    print_response(res).await
}

fn insert_some<T: Into<Value>>(map: &mut Map<String, Value>, key: &str, value: Option<T>) {
    if let Some(value) = value {
        map.insert(key.to_string(), value.into());
    }
}

async fn print_response(res: reqwest::Response) -> Result<(), Box<dyn std::error::Error>> {
    let status = res.status();
    if !status.is_success() {
        eprintln!("Error: monitor API returned status {}", status);
        if let Ok(text) = res.text().await {
            if !text.is_empty() {
                eprintln!("Response: {}", text);
            }
        }
        std::process::exit(1);
    }

    let text = res.text().await?;
    if text.is_empty() {
        println!("ok");
        return Ok(());
    }
    let json: Value = serde_json::from_str(&text)?;
    println!("{}", serde_json::to_string_pretty(&json)?);
    Ok(())
}
