//! Ramps to 100 virtual users hammering one endpoint, then checks latency and
//! error-rate thresholds.
//!
//! ```sh
//! cargo run --example k6_simple -- demos/k6_simple.json --url http://localhost:3000/
//! ```
use std::{path::PathBuf, process::ExitCode, time::Duration};

use clap::Parser;
use reqwest::{Client, Method};
use stampede::{
    LoadTest, Options, Reporter,
    config::RequestOptions,
    metric::Tags,
    report::{JsonReporter, StdoutReporter},
};
use tracing_subscriber::EnvFilter;

#[derive(Debug, Parser)]
#[command(about = "Run a staged HTTP load test")]
struct Args {
    /// Options file, JSON or TOML
    #[arg(default_value = "demos/k6_simple.json")]
    config: PathBuf,

    /// Request this URL instead of the configured one
    #[arg(long)]
    url: Option<String>,

    /// Print the summary as JSON
    #[arg(long)]
    json: bool,
}

#[tokio::main]
async fn main() -> Result<ExitCode, Box<dyn std::error::Error>> {
    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::try_from_default_env().unwrap_or_else(|_| "info".into()))
        .init();

    let args = Args::parse();
    let mut options = Options::load(&args.config)?;
    if let Some(url) = args.url {
        match options.request.as_mut() {
            Some(request) => request.url = url,
            None => {
                options.request = Some(RequestOptions {
                    method: Method::GET,
                    url,
                    timeout: Duration::from_secs(60),
                    tags: Tags::new(),
                })
            }
        }
    }

    // One client for every virtual user, it pools connections.
    let outcome = LoadTest::new(options).run_http(Client::new()).await?;

    if args.json {
        JsonReporter.report(&outcome.summary).await?;
    } else {
        StdoutReporter.report(&outcome.summary).await?;
    }
    println!("thresholds:\n{}", outcome.evaluation);

    Ok(ExitCode::from(outcome.exit_code() as u8))
}
