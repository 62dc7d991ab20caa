use clap::Parser;
use colored::*;
use reqwest::Client;
use std::time::Duration;
use tracing::warn;
use tracing_subscriber::EnvFilter;

use duet_relay::cli::Args;
use duet_relay::config::RelayConfig;
use duet_relay::display::{print_footer, print_header, render_panel};
use duet_relay::duel::DuelSession;
use duet_relay::providers::ModelSelector;
use duet_relay::server;

fn init_logging() {
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info"));
    tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_writer(std::io::stderr)
        .init();
}

async fn run_relay(args: &Args) -> Result<(), Box<dyn std::error::Error>> {
    let mut config = RelayConfig::load(args.config.as_deref())?;
    args.apply_overrides(&mut config);

    if config.upstream.credentials().is_err() {
        warn!("upstream not configured; /api/chat will answer 500 until CHAT_API_BASE and CHAT_API_KEY are set");
    }

    eprintln!(
        "{}",
        format!("  Relay running at http://{}/api/chat", config.bind_addr()).bright_green()
    );
    eprintln!("{}", "  Press Ctrl+C to stop.".bright_blue());

    tokio::select! {
        result = server::serve(config) => result?,
        _ = tokio::signal::ctrl_c() => eprintln!("{}", "  shutting down".bright_blue()),
    }
    Ok(())
}

async fn run_compare(args: &Args, prompt: &str) -> Result<(), Box<dyn std::error::Error>> {
    let mut duel = DuelSession::new(Client::new(), args.endpoint.clone());
    if let Some(secs) = args.timeout_secs {
        duel = duel.with_timeout(Duration::from_secs(secs));
    }

    print_header(prompt, &args.endpoint);
    if !duel.submit(prompt).await {
        return Err("prompt is empty".into());
    }

    let mut gpt_rx = duel.column(ModelSelector::Gpt).subscribe();
    let mut gemini_rx = duel.column(ModelSelector::Gemini).subscribe();
    let settled = async {
        let _ = gpt_rx.wait_for(|s| s.phase.is_terminal()).await;
        let _ = gemini_rx.wait_for(|s| s.phase.is_terminal()).await;
    };

    tokio::select! {
        _ = settled => {}
        _ = tokio::signal::ctrl_c() => {
            eprintln!("{}", "  stopping both columns".bright_yellow());
            duel.stop();
        }
    }
    duel.wait().await;

    let (gpt, gemini) = duel.snapshots();
    print!("{}", render_panel(ModelSelector::Gpt, &gpt));
    print!("{}", render_panel(ModelSelector::Gemini, &gemini));
    print_footer(&gpt, &gemini);
    Ok(())
}

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    init_logging();
    let args = Args::parse();

    if args.serve {
        return run_relay(&args).await;
    }

    match args.prompt.as_deref() {
        Some(prompt) => run_compare(&args, prompt).await,
        None => Err("a prompt is required unless --serve is given".into()),
    }
}
