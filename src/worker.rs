//! The batch driver: N workers pulling hosts from a shared queue, each
//! driving one console session and logging command output to stdout or a
//! per-host file.

use std::path::{Path, PathBuf};
use std::sync::Arc;

use tokio::io::{AsyncWrite, AsyncWriteExt};
use tokio::sync::{Mutex, mpsc};
use tokio_util::sync::CancellationToken;

use crate::config::HostJob;
use crate::console::Console;

#[derive(Debug, Clone, Default)]
pub struct BatchOptions {
    pub workers: usize,
    /// When set, output goes to `<dir>/<host>.log` in append mode instead
    /// of stdout.
    pub log_dir: Option<PathBuf>,
}

/// Stream `jobs` through a pool of workers. Returns once every worker has
/// drained the queue or the token was cancelled and in-flight hosts
/// finished.
pub async fn run_batch(
    jobs: Vec<HostJob>,
    opts: BatchOptions,
    cancel: CancellationToken,
) -> std::io::Result<()> {
    if let Some(dir) = &opts.log_dir {
        std::fs::create_dir_all(dir)?;
    }

    let (tx, rx) = mpsc::channel::<HostJob>(1);
    let rx = Arc::new(Mutex::new(rx));

    let mut handles = Vec::new();
    for id in 0..opts.workers.max(1) {
        let rx = Arc::clone(&rx);
        let cancel = cancel.clone();
        let log_dir = opts.log_dir.clone();
        handles.push(tokio::spawn(async move {
            loop {
                let job = rx.lock().await.recv().await;
                let Some(job) = job else { break };
                run_host(job, log_dir.as_deref(), cancel.clone()).await;
            }
            tracing::debug!(worker = id, "worker finished");
        }));
    }

    for job in jobs {
        tokio::select! {
            _ = cancel.cancelled() => break,
            sent = tx.send(job) => {
                if sent.is_err() {
                    break;
                }
            }
        }
    }
    drop(tx);

    for handle in handles {
        let _ = handle.await;
    }
    Ok(())
}

async fn run_host(job: HostJob, log_dir: Option<&Path>, cancel: CancellationToken) {
    let addr = job.host.addr.clone();
    tracing::info!(host = %addr, "starting host");

    let mut sink: Box<dyn AsyncWrite + Send + Unpin> = match log_dir {
        None => Box::new(tokio::io::stdout()),
        Some(dir) => {
            let path = dir.join(format!("{addr}.log"));
            match tokio::fs::OpenOptions::new()
                .create(true)
                .append(true)
                .open(&path)
                .await
            {
                Ok(file) => Box::new(file),
                Err(e) => {
                    tracing::error!(host = %addr, error = %e, "cannot open log file");
                    return;
                }
            }
        }
    };

    let mut console = Console::new(job.console.clone());
    if let Err(e) = console.open(&job.host, cancel).await {
        tracing::error!(host = %addr, error = %e, "cannot open console");
        return;
    }

    for cmd in &job.initial_commands {
        if let Err(e) = console.run(cmd).await {
            tracing::warn!(host = %addr, command = %cmd, error = %e, "initial command failed");
        }
    }

    for cmd in &job.commands {
        match console.execute(cmd).await {
            Ok(output) => {
                if let Err(e) = sink.write_all(output.as_bytes()).await {
                    tracing::error!(host = %addr, error = %e, "cannot write output");
                }
            }
            Err(e) => {
                tracing::warn!(host = %addr, command = %cmd, error = %e, "command failed");
            }
        }
    }

    let _ = sink.flush().await;
    let _ = console.sendln(&job.exit_command).await;
    if let Err(e) = console.close().await {
        tracing::warn!(host = %addr, error = %e, "close failed");
    }
    tracing::info!(host = %addr, "host done");
}
