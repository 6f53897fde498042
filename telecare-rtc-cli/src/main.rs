//! Telecare RTC CLI Application

use anyhow::{bail, Context, Result};
use clap::{Parser, Subcommand};
use std::sync::Arc;
use std::time::Duration;
use telecare_rtc_core::prelude::*;
use telecare_rtc_core::SessionServiceConfig;
use terminal_view::TerminalView;
use tracing_subscriber::EnvFilter;

mod terminal_view;
#[cfg(test)]
mod terminal_view_tests;

#[derive(Parser)]
#[command(author, version, about)]
struct Cli {
    /// Log filter, used when RUST_LOG is unset
    #[arg(long, env = "TELECARE_LOG", default_value = "telecare_rtc_core=info")]
    log: String,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Run a clinician/patient call between two local peer connections
    Demo {
        /// Capture audio only
        #[arg(long)]
        audio_only: bool,

        /// Seconds to stay connected before hanging up
        #[arg(long, default_value_t = 6)]
        hold_secs: u64,

        /// STUN server URL (repeatable); host candidates only when omitted
        #[arg(long = "stun")]
        stun: Vec<String>,
    },

    /// Fetch a session record from the session service
    Session {
        /// Session identifier
        id: String,

        /// Session service base URL
        #[arg(
            long,
            env = "TELECARE_API_URL",
            default_value = "http://localhost:5000/api/telemedicine"
        )]
        api_url: String,

        /// Request timeout in seconds
        #[arg(long, default_value_t = 10)]
        timeout_secs: u64,
    },

    /// Show configuration defaults
    Status,
}

#[tokio::main]
async fn main() -> Result<()> {
    let cli = Cli::parse();

    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(&cli.log));
    tracing_subscriber::fmt().with_env_filter(filter).init();

    match cli.command {
        Commands::Demo {
            audio_only,
            hold_secs,
            stun,
        } => {
            handle_demo(audio_only, hold_secs, stun).await?;
        }
        Commands::Session {
            id,
            api_url,
            timeout_secs,
        } => {
            handle_session(&id, api_url, timeout_secs).await?;
        }
        Commands::Status => {
            handle_status()?;
        }
    }

    Ok(())
}

async fn handle_demo(audio_only: bool, hold_secs: u64, stun: Vec<String>) -> Result<()> {
    let session_id = SessionId::new("demo");
    let clinician = ParticipantId::new("dr-demo");
    let patient = ParticipantId::new("pt-demo");

    let constraints = if audio_only {
        MediaConstraints::audio_only()
    } else {
        MediaConstraints::video_call()
    };
    let config = CallConfig {
        ice_servers: stun.into_iter().map(IceServerConfig::stun).collect(),
        constraints,
        ..Default::default()
    };
    let directory = StaticSessionDirectory::with_sessions([Session::instant(
        session_id.clone(),
        Participant::clinician(clinician.clone()),
        Participant::patient(patient.clone()),
    )]);

    let service = TelecareService::builder()
        .with_signaling(Arc::new(LoopbackRelay::new()))
        .with_directory(Arc::new(directory))
        .with_config(config)
        .build()?;
    println!("✅ Telecare service started");

    let dr = service.join(&session_id, &clinician).await?;
    let pt = service.join(&session_id, &patient).await?;
    let dr_view = tokio::spawn(watch(dr.clone(), "clinician"));
    let pt_view = tokio::spawn(watch(pt.clone(), "patient"));
    tokio::task::yield_now().await;

    println!("📞 {clinician} calling {patient} in session {session_id}");
    dr.start().await?;

    let reached = dr
        .wait_for(|s| s.phase == CallPhase::Connected || s.phase.is_terminal())
        .await?;
    if reached.phase == CallPhase::Connected {
        let half = Duration::from_secs(hold_secs) / 2;
        tokio::time::sleep(half).await;
        dr.set_muted(true)?;
        if !audio_only {
            pt.set_video_off(true)?;
        }
        tokio::time::sleep(half).await;
    }

    service.hangup_all().await;
    let dr_final = dr_view.await.context("clinician view task")?;
    let pt_final = pt_view.await.context("patient view task")?;

    println!();
    println!("📊 Call summary");
    println!("===============");
    println!("   clinician: {dr_final}");
    println!("   patient:   {pt_final}");
    if let Some(failure) = dr.snapshot().last_error {
        println!("   last error: {failure}");
    }
    if reached.phase != CallPhase::Connected {
        bail!("call never connected, finished as {}", reached.phase);
    }
    Ok(())
}

async fn watch(handle: SessionHandle, label: &'static str) -> CallPhase {
    let mut view = TerminalView::new(label);
    drive_view(&handle, &mut view).await
}

async fn handle_session(id: &str, api_url: String, timeout_secs: u64) -> Result<()> {
    let directory = HttpSessionDirectory::new(&SessionServiceConfig {
        base_url: api_url,
        request_timeout: Duration::from_secs(timeout_secs),
    })?;
    println!("🔎 Fetching session {id} from {}", directory.base_url());

    let session = directory.fetch(&SessionId::new(id)).await?;
    println!("{}", serde_json::to_string_pretty(&session)?);
    match session.validate() {
        Ok(()) => println!("✅ Session is callable"),
        Err(e) => println!("⚠️  {e}"),
    }
    Ok(())
}

fn handle_status() -> Result<()> {
    println!("📊 Telecare RTC Status");
    println!("======================");
    println!("Call defaults:");
    println!("{}", serde_json::to_string_pretty(&CallConfig::default())?);
    println!("Session service defaults:");
    println!(
        "{}",
        serde_json::to_string_pretty(&SessionServiceConfig::default())?
    );
    println!();
    println!("Available commands:");
    println!("  telecare demo [--audio-only] [--hold-secs N]  - Run a local call");
    println!("  telecare session <id> --api-url URL           - Fetch session metadata");
    println!("  telecare status                               - Show this status");
    println!();
    println!("Use 'telecare --help' for detailed options");

    Ok(())
}
