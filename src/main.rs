//! # Main — CLI Entry Point
//!
//! Wires the three roles together: `--server` runs the coordinator,
//! `--proxy` the frame multiplexer on `port + 1`, and `-t N` spawns N
//! scanning workers (pointed at the local proxy when one is running,
//! otherwise straight at the coordinator). Positional numbers are classified
//! with the quadratic test and the process exits; `--self-test` runs the
//! built-in battery.

use std::net::{IpAddr, SocketAddr};
use std::time::{Duration, Instant};

use anyhow::{Context, Result};
use clap::Parser;
use tracing::error;

use lnrc::{coordinator, proxy, selftest, tlv, worker};

#[global_allocator]
static GLOBAL: mimalloc::MiMalloc = mimalloc::MiMalloc;

#[derive(Parser)]
#[command(
    name = "lnrc",
    about = "Scan odd numbers for counterexamples to a conjectured quadratic primality test"
)]
struct Cli {
    /// Run the coordinator
    #[arg(long)]
    server: bool,

    /// Run the frame proxy (listens on port + 1, forwards to the coordinator)
    #[arg(long)]
    proxy: bool,

    /// Worker mode: number of scan threads
    #[arg(short = 't', long, value_name = "N")]
    threads: Option<usize>,

    /// Coordinator address, for workers and the proxy
    #[arg(short = 's', long, default_value = "127.0.0.1", value_name = "IP")]
    server_addr: IpAddr,

    /// Coordinator port
    #[arg(short = 'p', long, default_value_t = lnrc::SERVER_PORT)]
    port: u16,

    /// Resume the scan so the next dispatched candidate equals this number
    /// (decimal or 0x hex)
    #[arg(short = 'e', long = "resume", value_name = "NUMBER")]
    resume: Option<String>,

    /// Run the built-in self tests and exit
    #[arg(long)]
    self_test: bool,

    /// Classify these values with the quadratic test and exit
    #[arg(value_name = "NUMBER")]
    values: Vec<String>,
}

fn classify(values: &[String]) -> Result<()> {
    for arg in values {
        let v = tlv::parse_u128(arg).with_context(|| format!("cannot parse {arg:?}"))?;
        let t0 = Instant::now();
        let verdict = lnrc::bignum::quadratic_prime(&rug::Integer::from(v));
        let ms = t0.elapsed().as_millis();
        println!(
            "{arg} is {} ({ms} ms)",
            if verdict { "prime" } else { "composite" }
        );
    }
    Ok(())
}

fn main() -> Result<()> {
    tracing_subscriber::fmt()
        .with_writer(std::io::stderr)
        .with_target(false)
        .init();

    let cli = Cli::parse();

    if cli.self_test {
        let ok = selftest::run();
        println!("self-test {}", if ok { "passed" } else { "failed" });
        std::process::exit(if ok { 0 } else { 1 });
    }

    if !cli.values.is_empty() {
        return classify(&cli.values);
    }

    if !cli.server && !cli.proxy && cli.threads.is_none() {
        anyhow::bail!("nothing to do: pass --server, --proxy and/or -t <threads> (see --help)");
    }

    let resume = cli
        .resume
        .as_deref()
        .map(tlv::parse_u128)
        .transpose()
        .context("bad --resume value")?;
    let proxy_port = cli
        .port
        .checked_add(1)
        .context("port leaves no room for the proxy port")?;

    let rt = tokio::runtime::Runtime::new()?;
    rt.block_on(async {
        if cli.server {
            let cfg = coordinator::Config {
                port: cli.port,
                resume,
                ..coordinator::Config::default()
            };
            tokio::spawn(async move {
                if let Err(e) = coordinator::run(cfg).await {
                    error!(error = %e, "coordinator failed");
                    std::process::exit(1);
                }
            });
            tokio::time::sleep(Duration::from_secs(1)).await;
        }

        if cli.proxy {
            let cfg = proxy::Config {
                listen_port: proxy_port,
                upstream: SocketAddr::new(cli.server_addr, cli.port),
            };
            tokio::spawn(async move {
                if let Err(e) = proxy::run(cfg).await {
                    error!(error = %e, "proxy failed");
                    std::process::exit(1);
                }
            });
            tokio::time::sleep(Duration::from_secs(1)).await;
        }

        if let Some(threads) = cli.threads {
            let target = if cli.proxy {
                SocketAddr::new([127, 0, 0, 1].into(), proxy_port)
            } else {
                SocketAddr::new(cli.server_addr, cli.port)
            };
            let mut handles = Vec::with_capacity(threads);
            for _ in 0..threads {
                handles.push(tokio::spawn(worker::run(target)));
            }
            // exit cleanly once every worker received its STOP
            for h in handles {
                h.await??;
            }
            return Ok(());
        }

        // coordinator / proxy only: run until killed
        std::future::pending::<()>().await;
        Ok(())
    })
}
