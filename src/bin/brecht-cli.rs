//! brecht-cli: command-line client for a brecht server
//!
//! Commands:
//! - append <text>
//! - retrieve <offset>
//! - ping
//!
//! Connects to `BRECHT_ADDR` (default 127.0.0.1:8080).
//! All output is JSON for script-friendly parsing.

use brecht::protocol::{frame, request::Request, response::Response};
use serde_json::json;
use tokio::net::TcpStream;

const DEFAULT_ADDR: &str = "127.0.0.1:8080";

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let args: Vec<String> = std::env::args().collect();

    let request = match args.get(1).map(String::as_str) {
        Some("append") if args.len() >= 3 => Request::Append {
            value: args[2..].join(" ").into_bytes(),
        },
        Some("retrieve") if args.len() >= 3 => {
            let offset: u64 = args[2]
                .parse()
                .map_err(|_| anyhow::anyhow!("Invalid offset: {}", args[2]))?;
            Request::Retrieve { offset }
        }
        Some("ping") => Request::Ping,
        _ => {
            print_usage();
            std::process::exit(1);
        }
    };

    let addr = std::env::var("BRECHT_ADDR").unwrap_or_else(|_| DEFAULT_ADDR.to_string());
    let response = send(&addr, &request).await?;

    let output = match response {
        Response::Appended { offset } => json!({ "status": "success", "offset": offset }),
        Response::Retrieved { record } => json!({
            "status": "success",
            "offset": record.offset,
            "value": String::from_utf8_lossy(&record.value),
        }),
        Response::Pong => json!({ "status": "success", "message": "pong" }),
        Response::Error { code, message } => {
            json!({ "status": "error", "code": code, "message": message })
        }
    };
    println!("{}", serde_json::to_string_pretty(&output)?);

    Ok(())
}

async fn send(addr: &str, request: &Request) -> anyhow::Result<Response> {
    let mut stream = TcpStream::connect(addr).await?;

    frame::write_frame(&mut stream, &request.encode()?).await?;
    let response_bytes = frame::read_frame(&mut stream).await?;

    Ok(Response::decode(&response_bytes)?)
}

fn print_usage() {
    eprintln!("brecht-cli: client for the brecht commit log");
    eprintln!();
    eprintln!("Usage:");
    eprintln!("  brecht-cli append <text>");
    eprintln!("  brecht-cli retrieve <offset>");
    eprintln!("  brecht-cli ping");
    eprintln!();
    eprintln!("Environment:");
    eprintln!("  BRECHT_ADDR  server address (default {})", DEFAULT_ADDR);
}
