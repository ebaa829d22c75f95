//! Interrupt listener and run deadline.
//!
//! Both only set flags on [`Signals`]; neither touches the browser.
//!
//! - Ctrl+C: stop. A second Ctrl+C exits immediately with status 130.
//! - `r` + Enter on stdin: refresh request.
//! - `q` + Enter on stdin: stop.

use std::time::Duration;

use tokio::io::{AsyncBufReadExt, BufReader};
use tokio::task::JoinHandle;
use tms_executor::{Signals, StopReason};
use tracing::{info, warn};

/// Exit status for a forced (second interrupt) termination.
pub const FORCED_EXIT_CODE: i32 = 130;

/// What a line typed on stdin asks for.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Command {
    Refresh,
    Stop,
}

pub fn parse_command(line: &str) -> Option<Command> {
    match line.trim().to_ascii_lowercase().as_str() {
        "r" | "refresh" => Some(Command::Refresh),
        "q" | "quit" | "stop" => Some(Command::Stop),
        _ => None,
    }
}

/// Raise stop with `Deadline` once `duration` has elapsed.
pub fn spawn_deadline(signals: Signals, duration: Duration) -> JoinHandle<()> {
    tokio::spawn(async move {
        let token = signals.child_token();
        tokio::select! {
            _ = tokio::time::sleep(duration) => {
                info!("Run duration elapsed");
                signals.request_stop(StopReason::Deadline);
            }
            _ = token.cancelled() => {}
        }
    })
}

/// Listen for Ctrl+C and stdin commands until the process exits.
pub fn spawn_interrupt_listener(signals: Signals) -> JoinHandle<()> {
    tokio::spawn(async move {
        let mut lines = Some(BufReader::new(tokio::io::stdin()).lines());
        info!("Controls: Ctrl+C or 'q' to stop, 'r' to refresh");

        loop {
            tokio::select! {
                result = tokio::signal::ctrl_c() => {
                    if let Err(e) = result {
                        warn!(error = %e, "Ctrl+C handler unavailable");
                        return;
                    }
                    if signals.is_stopped() {
                        warn!("Second interrupt, forcing exit");
                        std::process::exit(FORCED_EXIT_CODE);
                    }
                    signals.request_stop(StopReason::Operator);
                }
                line = next_line(&mut lines) => match line.as_deref().and_then(parse_command) {
                    Some(Command::Refresh) => signals.request_refresh(),
                    Some(Command::Stop) => signals.request_stop(StopReason::Operator),
                    None => {}
                },
            }
        }
    })
}

type StdinLines = tokio::io::Lines<BufReader<tokio::io::Stdin>>;

/// Next stdin line. Never resolves once stdin is closed.
async fn next_line(lines: &mut Option<StdinLines>) -> Option<String> {
    let Some(reader) = lines.as_mut() else {
        return std::future::pending().await;
    };
    match reader.next_line().await {
        Ok(Some(line)) => Some(line),
        Ok(None) | Err(_) => {
            *lines = None;
            None
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_parse_command() {
        assert_eq!(parse_command("r\n"), Some(Command::Refresh));
        assert_eq!(parse_command(" Q "), Some(Command::Stop));
        assert_eq!(parse_command("stop"), Some(Command::Stop));
        assert_eq!(parse_command(""), None);
        assert_eq!(parse_command("buy"), None);
    }

    #[tokio::test(start_paused = true)]
    async fn test_deadline_raises_stop() {
        let signals = Signals::new();
        let handle = spawn_deadline(signals.clone(), Duration::from_secs(3600));

        tokio::time::sleep(Duration::from_secs(3599)).await;
        assert!(!signals.is_stopped());

        handle.await.unwrap();
        assert_eq!(signals.stop_reason(), Some(StopReason::Deadline));
    }

    #[tokio::test(start_paused = true)]
    async fn test_deadline_ends_on_earlier_stop() {
        let signals = Signals::new();
        let handle = spawn_deadline(signals.clone(), Duration::from_secs(3600));
        signals.request_stop(StopReason::Operator);

        handle.await.unwrap();
        assert_eq!(signals.stop_reason(), Some(StopReason::Operator));
    }
}
