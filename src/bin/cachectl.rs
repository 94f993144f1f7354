use clap::{Parser, Subcommand};
use reqwest::header::{HeaderMap, HeaderValue, AUTHORIZATION};
use reqwest::{Client, RequestBuilder, Response};
use serde_json::{json, Value};
use uuid::Uuid;

#[derive(Parser)]
#[command(name = "cachectl")]
#[command(about = "Management CLI for the Valkey cache gateway", long_about = None)]
struct Cli {
    #[arg(short, long, env = "CACHECTL_URL", default_value = "http://localhost:8080")]
    url: String,

    /// Admin API key, sent as a bearer token.
    #[arg(short, long, env = "CACHECTL_KEY", default_value = "CHANGE_ME_IN_PRODUCTION")]
    key: String,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Read a value
    Get { key: String },
    /// Store a value, optionally with a TTL in seconds
    Put {
        key: String,
        value: String,
        #[arg(long)]
        ttl: Option<i64>,
    },
    /// Remove a key
    Delete { key: String },
    /// Gateway status summary
    Status,
    /// Connection pool statistics
    Pool,
    /// Circuit breaker state
    Circuit,
    /// Force the circuit breaker closed
    ResetCircuit,
    /// Per-command outcome and latency counters
    Telemetry,
}

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    let cli = Cli::parse();
    let client = Client::new();
    let base = cli.url.trim_end_matches('/');

    let mut admin_headers = HeaderMap::new();
    admin_headers.insert(
        AUTHORIZATION,
        HeaderValue::from_str(&format!("Bearer {}", cli.key))?,
    );

    let response = match &cli.command {
        Commands::Get { key } => send(client.get(cache_url(base, key))).await?,
        Commands::Put { key, value, ttl } => {
            send(
                client
                    .put(cache_url(base, key))
                    .json(&json!({ "value": value, "ttl_secs": ttl })),
            )
            .await?
        }
        Commands::Delete { key } => send(client.delete(cache_url(base, key))).await?,
        Commands::Status => admin(&client, base, "status", admin_headers).await?,
        Commands::Pool => admin(&client, base, "pool", admin_headers).await?,
        Commands::Circuit => admin(&client, base, "circuit", admin_headers).await?,
        Commands::Telemetry => admin(&client, base, "telemetry", admin_headers).await?,
        Commands::ResetCircuit => {
            send(
                client
                    .post(format!("{}/admin/circuit/reset", base))
                    .headers(admin_headers),
            )
            .await?
        }
    };

    print_response(response).await
}

fn cache_url(base: &str, key: &str) -> String {
    let mut url = format!("{}/api/v1/cache/", base);
    url.push_str(&encode_segment(key));
    url
}

fn encode_segment(segment: &str) -> String {
    let mut out = String::with_capacity(segment.len());
    for byte in segment.bytes() {
        match byte {
            b'A'..=b'Z' | b'a'..=b'z' | b'0'..=b'9' | b'-' | b'.' | b'_' | b'~' | b':' => {
                out.push(byte as char)
            }
            _ => out.push_str(&format!("%{:02X}", byte)),
        }
    }
    out
}

async fn admin(
    client: &Client,
    base: &str,
    path: &str,
    headers: HeaderMap,
) -> Result<Response, reqwest::Error> {
    send(client.get(format!("{}/admin/{}", base, path)).headers(headers)).await
}

async fn send(request: RequestBuilder) -> Result<Response, reqwest::Error> {
    request
        .header("x-request-id", Uuid::new_v4().to_string())
        .send()
        .await
}

async fn print_response(res: Response) -> Result<(), Box<dyn std::error::Error>> {
    let status = res.status();
    let text = res.text().await?;

    if !status.is_success() {
        eprintln!("Error: gateway returned status {}", status);
        if !text.is_empty() {
            eprintln!("Response: {}", text);
        }
        std::process::exit(1);
    }

    match serde_json::from_str::<Value>(&text) {
        Ok(json) => println!("{}", serde_json::to_string_pretty(&json)?),
        Err(_) => println!("{}", text),
    }
    Ok(())
}
