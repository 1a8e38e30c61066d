use std::time::Duration;

use clap::{Args, Parser, Subcommand};
use reqwest::Method;
use serde_json::Value;

use apiserver_kit::rest::client::{ClientError, Credentials, RawResponse, RestClient};

#[derive(Parser)]
#[command(name = "apiserver-cli")]
#[command(about = "Command-line client for apiserver-kit", long_about = None)]
struct Cli {
    #[arg(short, long, default_value = "http://localhost:8080")]
    url: String,

    /// Bearer token sent as `Authorization: Bearer <token>`.
    #[arg(short, long, global = true)]
    token: Option<String>,

    /// Request timeout in seconds.
    #[arg(long, default_value_t = 30, global = true)]
    timeout: u64,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Args)]
struct RequestArgs {
    /// Request path, e.g. /api/v1/users/alice
    path: String,

    /// JSON request body.
    #[arg(short, long)]
    data: Option<String>,

    /// Query parameter as key=value. Repeatable.
    #[arg(short, long = "query", value_parser = parse_pair)]
    query: Vec<(String, String)>,

    /// Header as key=value. Repeatable.
    #[arg(short = 'H', long = "header", value_parser = parse_pair)]
    header: Vec<(String, String)>,
}

#[derive(Subcommand)]
enum Commands {
    /// Send a GET request
    Get(RequestArgs),
    /// Send a POST request
    Post(RequestArgs),
    /// Send a PUT request
    Put(RequestArgs),
    /// Send a DELETE request
    Delete(RequestArgs),
}

fn parse_pair(raw: &str) -> Result<(String, String), String> {
    raw.split_once('=')
        .map(|(k, v)| (k.to_string(), v.to_string()))
        .ok_or_else(|| format!("expected key=value, got {:?}", raw))
}

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    let cli = Cli::parse();
    let credentials = match cli.token {
        Some(token) => Credentials::Bearer(token),
        None => Credentials::None,
    };
    let client = RestClient::new(&cli.url, credentials)?;

    let (method, args) = match cli.command {
        Commands::Get(args) => (Method::GET, args),
        Commands::Post(args) => (Method::POST, args),
        Commands::Put(args) => (Method::PUT, args),
        Commands::Delete(args) => (Method::DELETE, args),
    };

    let mut request = client
        .request(method)
        .path(&args.path)
        .timeout(Duration::from_secs(cli.timeout));
    for (key, value) in &args.query {
        request = request.query(key, value);
    }
    for (name, value) in &args.header {
        request = request.header(name, value);
    }
    if let Some(data) = &args.data {
        let body: Value = serde_json::from_str(data)?;
        request = request.body(&body);
    }

    match request.do_raw().await {
        Ok(response) => print_response(&response),
        Err(ClientError::Status { code, body }) => {
            eprintln!("Error: server returned status {}", code);
            print_body(body.as_bytes());
            std::process::exit(1);
        }
        Err(e) => return Err(e.into()),
    }
    Ok(())
}

fn print_response(response: &RawResponse) {
    if !response.status.is_success() {
        eprintln!("Error: server returned status {}", response.status);
    }
    print_body(&response.body);
}

fn print_body(body: &[u8]) {
    match serde_json::from_slice::<Value>(body) {
        Ok(json) => match serde_json::to_string_pretty(&json) {
            Ok(pretty) => println!("{}", pretty),
            Err(_) => println!("{}", String::from_utf8_lossy(body)),
        },
        Err(_) => println!("{}", String::from_utf8_lossy(body)),
    }
}
