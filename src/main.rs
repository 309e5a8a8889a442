//! `rtfetch`: send one HTTP request through a resilient transport pipeline.

use std::path::PathBuf;
use std::process::ExitCode;
use std::time::Duration;

use axum::body::Body;
use clap::Parser;
use http::{HeaderName, HeaderValue, Method};
use serde_json::Value;
use url::Url;

use resilient_transport::config::{load_config, PipelineConfig};
use resilient_transport::lifecycle::{signals::cancel_on_interrupt, CancelSource};
use resilient_transport::observability::{init_logging, init_metrics};
use resilient_transport::pipeline;
use resilient_transport::transport::{Request, Response};

#[derive(Parser)]
#[command(name = "rtfetch", version)]
#[command(about = "Send one HTTP request with retries and circuit breaking", long_about = None)]
struct Cli {
    /// Pipeline configuration (TOML)
    #[arg(short, long)]
    config: Option<PathBuf>,

    /// Request method
    #[arg(short = 'X', long, default_value = "GET")]
    method: String,

    /// Request header, as 'Name: value'
    #[arg(short = 'H', long = "header")]
    headers: Vec<String>,

    /// Request body
    #[arg(short = 'd', long)]
    data: Option<String>,

    /// Overall deadline covering every attempt
    #[arg(long)]
    timeout_ms: Option<u64>,

    url: String,
}

#[tokio::main]
async fn main() -> Result<ExitCode, Box<dyn std::error::Error>> {
    let cli = Cli::parse();

    let config = match &cli.config {
        Some(path) => load_config(path)?,
        None => PipelineConfig::default(),
    };

    init_logging(&config.observability.log_level, config.observability.log_format)?;

    tracing::debug!(
        retry_enabled = config.retry.enabled,
        max_attempts = config.retry.max_attempts,
        breaker_enabled = config.circuit_breaker.enabled,
        "Configuration loaded"
    );

    if config.observability.metrics_enabled {
        match config.observability.metrics_address.parse() {
            Ok(addr) => {
                if let Err(e) = init_metrics(addr) {
                    tracing::error!(error = %e, "Failed to start metrics exporter");
                }
            }
            Err(_) => tracing::error!(
                metrics_address = %config.observability.metrics_address,
                "Failed to parse metrics address"
            ),
        }
    }

    let url = Url::parse(&cli.url)?;
    if url.scheme() != "http" {
        eprintln!("Error: only http:// URLs are supported, got {}", url.scheme());
        return Ok(ExitCode::from(2));
    }

    let mut request = build_request(&cli, &url)?;

    let source = CancelSource::new();
    let mut cancel = source.signal();
    if let Some(ms) = cli.timeout_ms {
        cancel = cancel.with_timeout(Duration::from_millis(ms));
    }
    request.extensions_mut().insert(cancel);

    let transport = pipeline::build(&config)?;
    let interrupt = cancel_on_interrupt(source);
    let outcome = transport.send(request).await;
    interrupt.abort();

    match outcome {
        Ok(res) => {
            let success = res.status().is_success();
            print_response(res).await?;
            Ok(if success {
                ExitCode::SUCCESS
            } else {
                ExitCode::FAILURE
            })
        }
        Err(e) => {
            tracing::error!(error = %e, "Request failed");
            eprintln!("Error: {e}");
            Ok(ExitCode::FAILURE)
        }
    }
}

fn build_request(cli: &Cli, url: &Url) -> Result<Request, Box<dyn std::error::Error>> {
    let method = Method::from_bytes(cli.method.to_ascii_uppercase().as_bytes())?;
    let mut builder = http::Request::builder().method(method).uri(url.as_str());

    for raw in &cli.headers {
        let Some((name, value)) = raw.split_once(':') else {
            return Err(format!("malformed header '{raw}', expected 'Name: value'").into());
        };
        builder = builder.header(
            HeaderName::from_bytes(name.trim().as_bytes())?,
            HeaderValue::from_str(value.trim())?,
        );
    }

    let body = match &cli.data {
        Some(data) => Body::from(data.clone()),
        None => Body::empty(),
    };
    Ok(builder.body(body)?)
}

async fn print_response(res: Response) -> Result<(), Box<dyn std::error::Error>> {
    let (parts, body) = res.into_parts();

    println!("{:?} {}", parts.version, parts.status);
    for (name, value) in &parts.headers {
        println!("{}: {}", name, value.to_str().unwrap_or("<binary>"));
    }
    println!();

    let bytes = axum::body::to_bytes(body, usize::MAX).await?;
    match serde_json::from_slice::<Value>(&bytes) {
        Ok(json) => println!("{}", serde_json::to_string_pretty(&json)?),
        Err(_) => println!("{}", String::from_utf8_lossy(&bytes)),
    }
    Ok(())
}
