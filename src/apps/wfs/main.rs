//! wfs main entry point
//! wfs 主入口点

mod cli;

use std::sync::Arc;

use anyhow::{Context, Result};
use clap::Parser;
use tokio::io::AsyncWriteExt;
use webhdfs_ha::client::{Client, FileStatus, HeaderSigner};
use webhdfs_ha::config::{init_tracing, AppConfig, WfsConfig};

use cli::{CliArgs, Command, TokenAction};

fn main() -> Result<()> {
    let args = CliArgs::parse();
    let cfg = WfsConfig::load_with(args.config.as_deref(), args.overrides())?;

    init_tracing(&cfg.logging)?;
    tracing::debug!(namenodes = ?cfg.client.namenodes, "wfs configuration loaded");

    let runtime = tokio::runtime::Builder::new_multi_thread()
        .enable_all()
        .build()?;
    runtime.block_on(run(args, cfg))
}

async fn run(args: CliArgs, cfg: WfsConfig) -> Result<()> {
    let mut builder = Client::builder(cfg.client.clone());
    if let Some(token) = args.negotiate.as_deref() {
        builder = builder.signer(Arc::new(HeaderSigner::negotiate(token)?));
    }
    let client = builder.connect().await.context("connect to gateway")?;

    let result = dispatch(&client, args.command).await;
    client.shutdown();
    result
}

async fn dispatch(client: &Client, command: Command) -> Result<()> {
    match command {
        Command::Active => {
            let endpoint = client.resolve().await?;
            println!("{}", endpoint);
        }
        Command::Ls { path } => {
            let mut entries = client.list_status(&path).await?;
            sort_by_name(&mut entries);
            for entry in &entries {
                println!("{}", format_entry(entry));
            }
        }
        Command::Stat { path } => {
            let status = client.get_file_status(&path).await?;
            println!("{}", format_entry(&status));
        }
        Command::Checksum { path } => {
            let checksum = client.get_file_checksum(&path).await?;
            println!("{}\t{}\t{}", checksum.algorithm, checksum.bytes, checksum.length);
        }
        Command::Du { path } => {
            let summary = client.get_content_summary(&path).await?;
            println!(
                "dirs={} files={} length={} consumed={}",
                summary.directory_count, summary.file_count, summary.length, summary.space_consumed
            );
        }
        Command::Cat {
            path,
            offset,
            length,
            buffer_size,
        } => {
            let reader = client.open(&path, offset, length, buffer_size).await?;
            let mut reader = reader.into_async_read();
            let mut stdout = tokio::io::stdout();
            tokio::io::copy(&mut reader, &mut stdout).await?;
            stdout.flush().await?;
        }
        Command::Mkdir { path, permission } => {
            let ok = client.mkdirs(&path, permission.as_deref()).await?;
            println!("{}", ok);
        }
        Command::Mv { src, dst } => {
            let ok = client.rename(&src, &dst).await?;
            println!("{}", ok);
        }
        Command::Rm { path, recursive } => {
            let ok = client.delete(&path, recursive).await?;
            println!("{}", ok);
        }
        Command::Token { action } => match action {
            TokenAction::Get => {
                let token = client.get_delegation_token().await?;
                println!("{}", token.value);
            }
            TokenAction::Renew => {
                let expires_at = client.renew_delegation_token().await?;
                println!("{}", expires_at.to_rfc3339());
            }
            TokenAction::Cancel => {
                client.cancel_delegation_token().await?;
            }
        },
    }
    Ok(())
}

fn sort_by_name(entries: &mut [FileStatus]) {
    entries.sort_by(|a, b| a.path_suffix.cmp(&b.path_suffix));
}

fn format_entry(entry: &FileStatus) -> String {
    let kind = if entry.is_dir() { 'd' } else { '-' };
    format!(
        "{}{:>4} {:>3} {:<10} {:<10} {:>12} {}",
        kind,
        entry.permission,
        entry.replication,
        entry.owner,
        entry.group,
        entry.length,
        entry.path_suffix
    )
}
