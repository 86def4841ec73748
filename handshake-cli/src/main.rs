//! Offline QR key exchange from the terminal
//!
//! Usage:
//!   handshake show-key [--svg]     # Show this device's key as a QR code
//!   handshake scan [PAYLOAD]       # Process a scanned payload (or stdin lines)
//!   handshake list                 # List verified keys
//!   handshake clear [--yes]        # Delete all verified keys

mod config;
mod scan_source;

use anyhow::Context;
use clap::{Parser, Subcommand};
use config::HandshakeConfig;
use handshake_pairing::{
    render_qr_ascii, render_qr_svg, ExchangeEngine, ExchangeSession, Notification,
    NotificationKind, PayloadCodec, ScanOutcome, SqliteStorage,
};
use scan_source::LineScanSource;
use std::io::{BufRead, Write};
use std::path::PathBuf;

#[derive(Debug, Parser)]
#[command(about = "Mutually verify public keys by exchanging QR codes")]
struct Opts {
    /// Database holding the identity and verified keys
    #[arg(long, global = true)]
    db: Option<PathBuf>,

    /// Base URL embedded in this device's QR code
    #[arg(long, global = true)]
    exchange_url: Option<String>,

    #[command(subcommand)]
    command: Command,
}

#[derive(Debug, Subcommand)]
enum Command {
    /// Show this device's public key as a QR code
    ShowKey {
        /// Print SVG instead of terminal blocks
        #[arg(long)]
        svg: bool,
    },
    /// Process a scanned QR payload; reads one payload per line from stdin
    /// when none is given
    Scan { payload: Option<String> },
    /// List verified keys
    List,
    /// Delete all verified keys
    Clear {
        /// Skip the confirmation prompt
        #[arg(long)]
        yes: bool,
    },
}

fn main() -> anyhow::Result<()> {
    env_logger::init();
    let opts = Opts::parse();

    let config = HandshakeConfig::resolve(opts.db, opts.exchange_url)?;
    let storage = SqliteStorage::open(&config.db_path)
        .with_context(|| format!("opening store {}", config.db_path.display()))?;
    let engine = ExchangeEngine::new(PayloadCodec::new(&config.exchange_url));
    let mut session =
        ExchangeSession::open(storage, engine).context("loading device identity")?;

    match opts.command {
        Command::ShowKey { svg } => cmd_show_key(&session, svg),
        Command::Scan { payload } => cmd_scan(&mut session, payload),
        Command::List => cmd_list(&session),
        Command::Clear { yes } => cmd_clear(&mut session, yes),
    }
}

fn cmd_show_key(session: &ExchangeSession<SqliteStorage>, svg: bool) -> anyhow::Result<()> {
    let uri = session.public_key_uri();
    if svg {
        println!("{}", render_qr_svg(&uri)?);
        return Ok(());
    }

    println!("Your Public Key");
    println!();
    println!("{}", session.identity().public_key().to_base64());
    println!();
    print!("{}", render_qr_ascii(&uri)?);
    println!();
    println!("{uri}");
    Ok(())
}

fn cmd_scan(
    session: &mut ExchangeSession<SqliteStorage>,
    payload: Option<String>,
) -> anyhow::Result<()> {
    let outcome = match payload {
        Some(scanned) => {
            let outcome = session.handle_scan(&scanned);
            print_notification(&outcome.notification);
            Some(outcome)
        }
        None => {
            let stdin = std::io::stdin();
            let mut source = LineScanSource::new(stdin.lock());
            session.run(&mut source, |o: &ScanOutcome| print_notification(&o.notification))?
        }
    };

    if outcome.map_or(true, |o| !o.is_success()) {
        anyhow::bail!("no response generated");
    }

    if let Some(text) = session.current_response_text()? {
        println!();
        println!("Have the other device scan this QR code to complete the exchange:");
        println!();
        print!("{}", render_qr_ascii(&text)?);
        println!();
        println!("{text}");
    }
    Ok(())
}

fn cmd_list(session: &ExchangeSession<SqliteStorage>) -> anyhow::Result<()> {
    let entries = session.trust().list();
    if entries.is_empty() {
        println!("No verified keys yet. Scan a QR code to verify and store keys.");
        return Ok(());
    }

    let my_key = session.identity().public_key();
    println!("Verified Keys ({}):", entries.len());
    println!();

    for (i, entry) in entries.iter().enumerate() {
        let verified_at = entry
            .created_at
            .map(|dt| dt.format("%Y-%m-%d %H:%M:%S UTC").to_string())
            .unwrap_or_else(|| "Unknown".to_string());
        let countersigned = if entry.countersigned_by_peer(&my_key) {
            "yes"
        } else {
            "no"
        };

        println!("  Verified Key #{}", i + 1);
        println!("    Public Key:    {}", entry.public_key);
        println!("    Signed:        {}", entry.signed_key);
        println!("    Verified At:   {verified_at}");
        println!("    Countersigned: {countersigned}");
        println!();
    }
    Ok(())
}

fn cmd_clear(session: &mut ExchangeSession<SqliteStorage>, yes: bool) -> anyhow::Result<()> {
    let count = session.trust().len();
    if count == 0 {
        println!("No verified keys to delete.");
        return Ok(());
    }

    let prompt = "Are you sure you want to delete all verified keys? This action cannot be undone.";
    if !yes && !confirm(prompt)? {
        println!("Cancelled.");
        return Ok(());
    }

    session
        .clear_verified()
        .context("Failed to delete verified keys")?;
    println!("✓ Deleted {count} verified keys");
    Ok(())
}

fn confirm(prompt: &str) -> anyhow::Result<bool> {
    print!("{prompt} [y/N] ");
    std::io::stdout().flush()?;

    let mut answer = String::new();
    std::io::stdin().lock().read_line(&mut answer)?;
    Ok(matches!(answer.trim(), "y" | "Y" | "yes"))
}

fn print_notification(notification: &Notification) {
    let marker = match notification.kind {
        NotificationKind::Success => "✓",
        NotificationKind::Info => "i",
        NotificationKind::Warning => "!",
        NotificationKind::Error => "✗",
    };
    match notification.kind {
        NotificationKind::Error | NotificationKind::Warning => {
            eprintln!("{marker} {}", notification.message)
        }
        _ => println!("{marker} {}", notification.message),
    }
}
