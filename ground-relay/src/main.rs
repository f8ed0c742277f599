//! Ground relay service.
//!
//! Runs the full fuel-link plant in-process (controller ↔ air relay over a
//! simulated UART, air ↔ ground over a simulated half-duplex radio) and
//! bridges the ground relay to the host: stdin is the USB shell, stdout
//! carries the host-parsable `[TELEM]`/`[ACK]`/`[CMD]` lines.
//!
//! Architecture: 10 ms tick interval → plant tick → stdout; a reader task
//! forwards stdin lines over a channel into the same loop.

use anyhow::{Context, Result};
use ground_relay::sim::SimPlant;
use std::io::Write;
use std::time::{Duration, Instant};
use tokio::io::{AsyncBufRead, AsyncBufReadExt, BufReader};
use tokio::sync::mpsc;
use tracing::{error, info, warn};

const TICK_MS: u64 = 10;

/// Wall-clock milliseconds since service start, wrapped to the u32 domain
/// the cores use.
fn now_ms(start: Instant) -> u32 {
    start.elapsed().as_millis() as u32
}

/// Forward '\n'-terminated shell lines into the tick loop.
async fn forward_lines<R>(reader: R, tx: mpsc::Sender<String>)
where
    R: AsyncBufRead + Unpin,
{
    let mut lines = reader.lines();
    loop {
        match lines.next_line().await {
            Ok(Some(line)) => {
                if tx.send(line).await.is_err() {
                    break;
                }
            }
            Ok(None) => {
                warn!("Shell input closed (EOF)");
                break;
            }
            Err(e) => {
                error!(error = %e, "Error reading shell input");
                break;
            }
        }
    }
}

#[tokio::main(flavor = "current_thread")]
async fn main() -> Result<()> {
    // Structured logs go to stderr; stdout is reserved for the
    // host-parsable output lines.
    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new("info")),
        )
        .with_target(false)
        .with_writer(std::io::stderr)
        .init();

    info!("Fuel-link ground relay starting");

    let mut plant = SimPlant::new();

    let (line_tx, mut line_rx) = mpsc::channel::<String>(16);
    tokio::spawn(forward_lines(BufReader::new(tokio::io::stdin()), line_tx));

    let start = Instant::now();
    let mut ticker = tokio::time::interval(Duration::from_millis(TICK_MS));
    let stdout = std::io::stdout();

    info!("Service running. Press Ctrl+C to stop.");
    loop {
        tokio::select! {
            _ = ticker.tick() => {
                let mut out = stdout.lock();
                plant
                    .tick(&mut out, now_ms(start))
                    .context("writing host output")?;
                out.flush().ok();
            }
            Some(line) = line_rx.recv() => {
                let mut out = stdout.lock();
                plant
                    .shell_line(&line, &mut out, now_ms(start))
                    .context("writing shell response")?;
                out.flush().ok();
            }
            _ = tokio::signal::ctrl_c() => {
                info!("Received Ctrl+C, shutting down");
                break;
            }
        }
    }

    info!("Fuel-link ground relay stopped");
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_forward_lines_splits_input() {
        tokio_test::block_on(async {
            let reader = tokio_test::io::Builder::new()
                .read(b"mode manual\nhelp\n")
                .build();
            let (tx, mut rx) = mpsc::channel(4);
            forward_lines(BufReader::new(reader), tx).await;

            assert_eq!(rx.recv().await.as_deref(), Some("mode manual"));
            assert_eq!(rx.recv().await.as_deref(), Some("help"));
            assert_eq!(rx.recv().await, None);
        });
    }
}
