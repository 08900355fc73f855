//! taskwire - command-line client for a taskwired server

use anyhow::{Context, Result};
use clap::Parser;
use indicatif::{ProgressBar, ProgressStyle};
use std::path::Path;
use std::time::Duration;

use taskwire::cli::{ClientOpts, Command};
use taskwire::config::ClientConfig;
use taskwire::{logging, Task, TaskClient, TaskDraft};

fn main() {
    let opts = ClientOpts::parse();
    logging::init(logging::CLIENT_DEFAULT_FILTER);

    let result = tokio::runtime::Builder::new_current_thread()
        .enable_all()
        .build()
        .context("Failed to build tokio runtime")
        .and_then(|rt| rt.block_on(run(opts)));

    if let Err(e) = result {
        // Server-side ERROR text is printed exactly as received
        match e.downcast_ref::<taskwire::Error>() {
            Some(taskwire::Error::Remote(message)) => eprintln!("{}", message),
            _ => eprintln!("Error: {:#}", e),
        }
        std::process::exit(1);
    }
}

async fn run(opts: ClientOpts) -> Result<()> {
    let config = ClientConfig::with_server(opts.server.clone());
    let mut client = TaskClient::connect(&config.server)
        .await
        .with_context(|| format!("Failed to connect to {}", config.server))?;

    match &opts.command {
        Command::List => {
            let tasks = client.list().await?;
            print_tasks(&tasks, opts.json)?;
        }
        cmd @ Command::Filter { .. } => {
            let filter = cmd.task_filter().unwrap_or_default();
            let tasks = client.filter(&filter).await?;
            print_tasks(&tasks, opts.json)?;
        }
        Command::Create {
            description,
            due,
            priority,
        } => {
            let ok = client
                .create(TaskDraft::new(description.as_str(), *due, *priority))
                .await?;
            report(opts.json, ok, "created")?;
        }
        Command::Delete { id } => {
            let ok = client.delete(*id).await?;
            report(opts.json, ok, &format!("deleted #{}", id))?;
        }
        Command::Done { id } => {
            client.change_state(*id, true).await?;
            report(opts.json, true, &format!("marked #{} completed", id))?;
        }
        Command::Undo { id } => {
            client.change_state(*id, false).await?;
            report(opts.json, true, &format!("marked #{} pending", id))?;
        }
        Command::Upload { id, path } => {
            let bytes = upload_with_progress(&mut client, *id, path, opts.json).await?;
            report(opts.json, true, &format!("uploaded {} bytes to #{}", bytes, id))?;
        }
        Command::Download { id, dest } => {
            let bytes = download_with_progress(&mut client, *id, dest, opts.json).await?;
            report(
                opts.json,
                true,
                &format!("saved {} bytes to {}", bytes, dest.display()),
            )?;
        }
    }

    client.close().await?;
    Ok(())
}

fn byte_bar(len: Option<u64>, hidden: bool) -> ProgressBar {
    if hidden {
        return ProgressBar::hidden();
    }
    match len {
        Some(len) => {
            let pb = ProgressBar::new(len);
            pb.set_style(
                ProgressStyle::default_bar()
                    .template("{bar:40.cyan/blue} {bytes}/{total_bytes} {bytes_per_sec} {eta}")
                    .unwrap_or_else(|_| ProgressStyle::default_bar()),
            );
            pb
        }
        None => {
            let pb = ProgressBar::new_spinner();
            pb.set_style(
                ProgressStyle::default_spinner()
                    .template("{spinner:.green} {bytes} {bytes_per_sec}")
                    .unwrap_or_else(|_| ProgressStyle::default_spinner()),
            );
            pb.enable_steady_tick(Duration::from_millis(120));
            pb
        }
    }
}

async fn upload_with_progress(client: &mut TaskClient, id: u64, path: &Path, quiet: bool) -> Result<u64> {
    let file_name = path
        .file_name()
        .map(|n| n.to_string_lossy().into_owned())
        .with_context(|| format!("Not a file path: {}", path.display()))?;
    let file = tokio::fs::File::open(path)
        .await
        .with_context(|| format!("Failed to open {}", path.display()))?;
    let len = file.metadata().await.map(|m| m.len()).ok();

    let pb = byte_bar(len, quiet);
    let mut reader = pb.wrap_async_read(file);
    let result = client.upload_from(id, &file_name, &mut reader).await;
    pb.finish_and_clear();
    Ok(result?)
}

async fn download_with_progress(client: &mut TaskClient, id: u64, dest: &Path, quiet: bool) -> Result<u64> {
    let file = tokio::fs::File::create(dest)
        .await
        .with_context(|| format!("Failed to create {}", dest.display()))?;

    let pb = byte_bar(None, quiet);
    let mut writer = pb.wrap_async_write(file);
    let result = client.download_to(id, &mut writer).await;
    pb.finish_and_clear();
    drop(writer);

    if result.is_err() {
        let _ = tokio::fs::remove_file(dest).await;
    }
    Ok(result?)
}

fn report(json: bool, ok: bool, what: &str) -> Result<()> {
    if json {
        println!("{}", serde_json::to_string(&serde_json::json!({ "ok": ok }))?);
    } else if ok {
        println!("{}", what);
    } else {
        println!("server refused: {}", what);
    }
    Ok(())
}

fn print_tasks(tasks: &[Task], json: bool) -> Result<()> {
    if json {
        println!("{}", serde_json::to_string_pretty(tasks)?);
        return Ok(());
    }
    if tasks.is_empty() {
        println!("no tasks");
        return Ok(());
    }
    println!(
        "{:>5}  {:<6}  {:<16}  {:<4}  {:<4}  DESCRIPTION",
        "ID", "PRIO", "DUE", "DONE", "FILE"
    );
    for t in tasks {
        let due = t
            .due_date
            .map(|d| d.format("%Y-%m-%d %H:%M").to_string())
            .unwrap_or_else(|| "-".to_string());
        println!(
            "{:>5}  {:<6}  {:<16}  {:<4}  {:<4}  {}",
            t.id,
            t.priority.to_string(),
            due,
            if t.completed { "yes" } else { "no" },
            if t.has_attachment { "yes" } else { "-" },
            t.description
        );
    }
    Ok(())
}
