//! Terminal notification sink.

use std::future::Future;
use std::io::{BufRead, Write};

use async_trait::async_trait;
use selfupdate_core::{NotificationSink, UserNotice};
use tokio::sync::oneshot;
use tracing::{debug, info, warn};

pub const NO_UPDATE_MESSAGE: &str = "No updates for the current installation have been found.";
pub const RESTART_PROMPT: &str = "Updates have been installed. Do you want to restart?";

/// Prints to stdout/stderr and asks on stdin.
#[derive(Debug, Clone, Default)]
pub struct ConsoleSink {
    assume_yes: bool,
    restart_command: Option<String>,
}

impl ConsoleSink {
    pub fn new(assume_yes: bool, restart_command: Option<String>) -> Self {
        Self {
            assume_yes,
            restart_command,
        }
    }
}

#[async_trait]
impl NotificationSink for ConsoleSink {
    async fn notify_no_update(&self) {
        println!("{NO_UPDATE_MESSAGE}");
    }

    async fn notify_error(&self, notice: &UserNotice) {
        eprintln!("{}", notice.title);
        eprintln!("  {}", notice.message);
        if let Some(reference) = notice.reference {
            eprintln!("  reference: {reference}");
        }
    }

    async fn confirm_restart(&self) -> bool {
        if self.assume_yes {
            println!("{RESTART_PROMPT} [y/N] y");
            return true;
        }
        // Runtime shutdown waits for `spawn_blocking` tasks, so the stdin
        // read gets a detached thread of its own.
        let (tx, rx) = oneshot::channel();
        std::thread::spawn(move || {
            let answer = read_answer();
            if tx.send(answer).is_err() {
                debug!("restart prompt abandoned");
            }
        });
        let answer = async move {
            match rx.await {
                Ok(Ok(line)) => Some(line),
                Ok(Err(e)) => {
                    warn!("Could not read restart answer: {}", e);
                    None
                }
                Err(_) => None,
            }
        };
        let interrupt = async {
            if tokio::signal::ctrl_c().await.is_err() {
                std::future::pending::<()>().await;
            }
        };
        answer_or_interrupt(answer, interrupt).await
    }

    async fn restart_host(&self) {
        let Some(command) = &self.restart_command else {
            println!("Restart the application to start using the new version.");
            return;
        };
        let mut parts = command.split_whitespace();
        let Some(program) = parts.next() else {
            warn!("Empty restart command");
            return;
        };
        match tokio::process::Command::new(program).args(parts).spawn() {
            Ok(child) => info!(pid = child.id(), "Launched restart command `{}`", command),
            Err(e) => warn!("Failed to launch restart command `{}`: {}", command, e),
        }
    }
}

fn read_answer() -> std::io::Result<String> {
    print!("{RESTART_PROMPT} [y/N] ");
    std::io::stdout().flush()?;
    let mut line = String::new();
    std::io::stdin().lock().read_line(&mut line)?;
    Ok(line)
}

/// Ctrl-C at the prompt counts as "no".
async fn answer_or_interrupt<A, I>(answer: A, interrupt: I) -> bool
where
    A: Future<Output = Option<String>>,
    I: Future<Output = ()>,
{
    tokio::select! {
        line = answer => line.as_deref().is_some_and(is_yes),
        () = interrupt => {
            println!();
            info!("Interrupted at the restart prompt, not restarting");
            false
        }
    }
}

fn is_yes(answer: &str) -> bool {
    matches!(answer.trim().to_ascii_lowercase().as_str(), "y" | "yes")
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_is_yes() {
        assert!(is_yes("y\n"));
        assert!(is_yes(" YES "));
        assert!(!is_yes("\n"));
        assert!(!is_yes("no"));
        assert!(!is_yes("yep"));
    }

    #[tokio::test]
    async fn test_interrupt_at_prompt_declines_restart() {
        let answer = std::future::pending::<Option<String>>();
        assert!(!answer_or_interrupt(answer, async {}).await);
    }

    #[tokio::test]
    async fn test_prompt_answer_is_used_without_interrupt() {
        let yes = async { Some("yes\n".to_string()) };
        assert!(answer_or_interrupt(yes, std::future::pending()).await);
        let closed = async { None };
        assert!(!answer_or_interrupt(closed, std::future::pending()).await);
    }

    #[tokio::test]
    async fn test_assume_yes_skips_prompt() {
        assert!(ConsoleSink::new(true, None).confirm_restart().await);
    }

    #[tokio::test]
    async fn test_restart_without_command_is_noop() {
        ConsoleSink::new(true, None).restart_host().await;
        ConsoleSink::new(true, Some("   ".to_string())).restart_host().await;
    }
}
