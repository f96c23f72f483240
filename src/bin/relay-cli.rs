use clap::{Parser, Subcommand};
use reqwest::header::{HeaderMap, HeaderValue, AUTHORIZATION};
use serde_json::{json, Value};

#[derive(Parser)]
#[command(name = "relay-cli")]
#[command(about = "Management CLI for the relay engine", long_about = None)]
struct Cli {
    #[arg(short, long, default_value = "http://localhost:8081")]
    url: String,

    #[arg(short, long, env = "RELAY_ADMIN_KEY", default_value = "CHANGE_ME_IN_PRODUCTION")]
    key: String,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Check engine status
    Status,
    /// Show rule set budgets and queue depth
    Throttle,
    /// Set a rule set budget in bytes per second (0 disables throttling)
    SetBudget { name: String, bytes_per_second: i64 },
    /// Set the scheduler tick period in milliseconds (1-1000)
    SetBurstInterval { ms: u64 },
    /// List live sessions
    Sessions,
}

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    let cli = Cli::parse();
    let client = reqwest::Client::new();

    let mut headers = HeaderMap::new();
    headers.insert(
        AUTHORIZATION,
        HeaderValue::from_str(&format!("Bearer {}", cli.key))?,
    );

    let request = match cli.command {
        Commands::Status => client.get(format!("{}/admin/status", cli.url)),
        Commands::Throttle => client.get(format!("{}/admin/throttle", cli.url)),
        Commands::SetBudget { name, bytes_per_second } => client
            .put(format!("{}/admin/throttle/{}", cli.url, name))
            .json(&json!({ "bytes_per_second": bytes_per_second })),
        Commands::SetBurstInterval { ms } => client
            .put(format!("{}/admin/burst-interval", cli.url))
            .json(&json!({ "ms": ms })),
        Commands::Sessions => client.get(format!("{}/admin/sessions", cli.url)),
    };

    let res = request.headers(headers).send().await?;
    print_response(res).await
}

async fn print_response(res: reqwest::Response) -> Result<(), Box<dyn std::error::Error>> {
    let status = res.status();
    if !status.is_success() {
        eprintln!("Error: Admin API returned status {}", status);
        if let Ok(text) = res.text().await {
            eprintln!("Response: {}", text);
        }
        return Ok(());
    }

    let json: Value = res.json().await?;
    println!("{}", serde_json::to_string_pretty(&json)?);
    Ok(())
}
