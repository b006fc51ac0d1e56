use clap::{Parser, Subcommand, ValueEnum};
use reqwest::header::{HeaderMap, HeaderValue, AUTHORIZATION};
use serde_json::{json, Value};

#[derive(Parser)]
#[command(name = "proxy-cli")]
#[command(about = "Management CLI for the tiered database proxy", long_about = None)]
struct Cli {
    #[arg(short, long, default_value = "http://localhost:8081")]
    url: String,

    #[arg(short, long, env = "TIER_PROXY_ADMIN_KEY", default_value = "admin-secret-key")]
    key: String,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Overall status, session counts and degraded tiers
    Status,
    /// Per-tier pool counts and bounds
    Pools,
    /// Endpoint states across both tiers
    Endpoints,
    /// Live client sessions
    Sessions,
    /// Queue a topology change
    Topology {
        #[arg(value_enum)]
        action: TopologyAction,
        #[arg(value_enum)]
        tier: TierArg,
        /// Endpoint address (host:port)
        address: String,
    },
}

#[derive(Clone, Copy, ValueEnum)]
enum TopologyAction {
    Add,
    Remove,
    Drain,
}

impl TopologyAction {
    fn kind(self) -> &'static str {
        match self {
            TopologyAction::Add => "endpoint_added",
            TopologyAction::Remove => "endpoint_removed",
            TopologyAction::Drain => "node_draining",
        }
    }
}

#[derive(Clone, Copy, ValueEnum)]
enum TierArg {
    Admin,
    Readonly,
}

impl TierArg {
    fn as_str(self) -> &'static str {
        match self {
            TierArg::Admin => "admin",
            TierArg::Readonly => "readonly",
        }
    }
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
        Commands::Pools => client.get(format!("{}/admin/pools", cli.url)),
        Commands::Endpoints => client.get(format!("{}/admin/endpoints", cli.url)),
        Commands::Sessions => client.get(format!("{}/admin/sessions", cli.url)),
        Commands::Topology { action, tier, address } => client
            .post(format!("{}/admin/topology", cli.url))
            .json(&json!({
                "kind": action.kind(),
                "tier": tier.as_str(),
                "address": address,
            })),
    };

    let res = request.headers(headers).send().await?;
    print_response(res).await
}

async fn print_response(res: reqwest::Response) -> Result<(), Box<dyn std::error::Error>> {
    let status = res.status();
    if !status.is_success() {
        eprintln!("Error: Admin API returned status {}", status);
        if let Ok(text) = res.text().await {
            if !text.is_empty() {
                eprintln!("{}", text);
            }
        }
        std::process::exit(1);
    }

    let body: Value = res.json().await?;
    println!("{}", serde_json::to_string_pretty(&body)?);
    Ok(())
}
