//! vicictl
//!
//! A small operator tool for the IKE daemon: runs VICI commands, streamed
//! commands and event listeners against the control socket.

mod cli;
mod config;
mod fields;

use clap::Parser;
use cli::{Cli, Command};
use color_eyre::eyre::{Result, WrapErr};
use config::Config;
use fields::parse_fields;
use tracing_subscriber::{EnvFilter, fmt, prelude::*};
use vici::{CancellationToken, Error, Message, Session};

#[tokio::main]
async fn main() -> Result<()> {
    color_eyre::install()?;

    let cli = Cli::parse();

    let config = Config::load(cli.config.as_ref())?
        .with_socket(cli.socket.clone())
        .with_log_level(cli.log_level.clone());

    init_logging(&config.log_level)?;

    let session = Session::connect(config.session.clone())
        .await
        .wrap_err_with(|| {
            format!(
                "Failed to connect to {}",
                config.session.socket_path.display()
            )
        })?;

    let result = match cli.command {
        Command::Command { name, fields } => cmd_command(&session, &name, &fields).await,
        Command::Stream {
            name,
            event,
            fields,
        } => cmd_stream(&session, &name, &event, &fields).await,
        Command::Listen { events } => cmd_listen(&session, events).await,
        Command::Version => cmd_version(&session).await,
    };

    session.close().await?;
    result
}

fn init_logging(level: &str) -> Result<()> {
    let filter = EnvFilter::try_from_default_env().or_else(|_| EnvFilter::try_new(level))?;

    tracing_subscriber::registry()
        .with(fmt::layer().with_target(true).with_writer(std::io::stderr))
        .with(filter)
        .init();

    Ok(())
}

async fn cmd_command(session: &Session, name: &str, fields: &[String]) -> Result<()> {
    let request = parse_fields(fields)?;
    let response = session.command(name, request).await?;
    print!("{response}");
    response.check_success()?;
    Ok(())
}

async fn cmd_stream(session: &Session, name: &str, event: &str, fields: &[String]) -> Result<()> {
    let request = parse_fields(fields)?;
    let streamed = session.streamed_command(name, event, request).await?;

    for msg in &streamed.events {
        println!("{event}:");
        print!("{msg}");
    }
    print!("{}", streamed.response);
    streamed.response.check_success()?;
    Ok(())
}

async fn cmd_listen(session: &Session, events: Vec<String>) -> Result<()> {
    let ctx = CancellationToken::new();

    let interrupt = ctx.clone();
    tokio::spawn(async move {
        if tokio::signal::ctrl_c().await.is_ok() {
            tracing::info!("Received Ctrl+C");
        }
        interrupt.cancel();
    });

    session.listen(ctx, events.iter().map(String::as_str)).await?;
    tracing::info!(events = ?events, "Listening for events");

    loop {
        match session.next_event().await {
            Ok(msg) => {
                print!("{msg}");
                println!();
            }
            Err(Error::Cancelled | Error::ListenerClosed) => break,
            Err(e) => return Err(e.into()),
        }
    }

    session.stop_listening().await;
    Ok(())
}

async fn cmd_version(session: &Session) -> Result<()> {
    let response = session.command("version", Message::new()).await?;
    response.check_success()?;

    let field = |key: &str| -> Result<String> {
        Ok(response.scalar(key)?.unwrap_or("unknown").to_string())
    };
    println!(
        "{} {} ({} {} {})",
        field("daemon")?,
        field("version")?,
        field("sysname")?,
        field("release")?,
        field("machine")?
    );
    Ok(())
}
