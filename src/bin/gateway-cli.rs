use clap::{Parser, Subcommand};
use reqwest::header::{HeaderMap, HeaderValue, AUTHORIZATION};
use serde_json::{json, Value};

#[derive(Parser)]
#[command(name = "gateway-cli")]
#[command(about = "Management CLI for the API gateway", long_about = None)]
struct Cli {
    #[arg(long, default_value = "http://localhost:8080")]
    url: String,

    #[arg(short, long, default_value = "admin")]
    username: String,

    #[arg(short, long, default_value = "password123")]
    password: String,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Show gateway status and per-route pools
    Status,
    /// List backend health and connections
    Backends,
    /// Manually mark a backend healthy or unhealthy
    SetHealth {
        /// Backend URL as configured
        backend: String,
        #[arg(action = clap::ArgAction::Set)]
        healthy: bool,
    },
    /// Detailed health report (no login needed)
    Health,
}

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    let cli = Cli::parse();
    let client = reqwest::Client::new();
    let base = cli.url.trim_end_matches('/');

    let res = match cli.command {
        Commands::Health => client.get(format!("{base}/health/detailed")).send().await?,
        Commands::Status => {
            let headers = login(&client, base, &cli.username, &cli.password).await?;
            client
                .get(format!("{base}/admin/status"))
                .headers(headers)
                .send()
                .await?
        }
        Commands::Backends => {
            let headers = login(&client, base, &cli.username, &cli.password).await?;
            client
                .get(format!("{base}/admin/backends"))
                .headers(headers)
                .send()
                .await?
        }
        Commands::SetHealth { backend, healthy } => {
            let headers = login(&client, base, &cli.username, &cli.password).await?;
            client
                .post(format!("{base}/admin/backends/health"))
                .headers(headers)
                .json(&json!({ "backend": backend, "healthy": healthy }))
                .send()
                .await?
        }
    };
    print_response(res).await
}

async fn login(
    client: &reqwest::Client,
    base: &str,
    username: &str,
    password: &str,
) -> Result<HeaderMap, Box<dyn std::error::Error>> {
    let res = client
        .post(format!("{base}/auth/login"))
        .json(&json!({ "username": username, "password": password }))
        .send()
        .await?;
    if !res.status().is_success() {
        return Err(format!("login failed with status {}", res.status()).into());
    }
    let body: Value = res.json().await?;
    let token = body["access_token"]
        .as_str()
        .ok_or("login response has no access_token")?;

    let mut headers = HeaderMap::new();
    headers.insert(AUTHORIZATION, HeaderValue::from_str(&format!("Bearer {token}"))?);
    Ok(headers)
}

async fn print_response(res: reqwest::Response) -> Result<(), Box<dyn std::error::Error>> {
    let status = res.status();
    if !status.is_success() {
        eprintln!("Error: gateway returned status {status}");
        if let Ok(text) = res.text().await {
            eprintln!("Response: {text}");
        }
        std::process::exit(1);
    }

    let json: Value = res.json().await?;
    println!("{}", serde_json::to_string_pretty(&json)?);
    Ok(())
}
