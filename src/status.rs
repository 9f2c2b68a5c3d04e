//! User-facing status lines.
//!
//! Jobs send short progress lines through a [`StatusReporter`]; a printer
//! task drains the channel to stdout while tracing output goes to stderr.

use tokio::sync::mpsc::{self, UnboundedReceiver, UnboundedSender};
use tokio::task::JoinHandle;
use tracing::debug;

#[derive(Debug, Clone)]
pub struct StatusReporter {
    tx: UnboundedSender<String>,
}

impl StatusReporter {
    pub fn channel() -> (Self, UnboundedReceiver<String>) {
        let (tx, rx) = mpsc::unbounded_channel();
        (Self { tx }, rx)
    }

    /// Queue a line. Lines sent after the printer stopped are dropped.
    pub fn send(&self, line: impl Into<String>) {
        if self.tx.send(line.into()).is_err() {
            debug!("Status receiver closed");
        }
    }
}

/// Print every received line until all reporters are dropped.
pub fn spawn_printer(mut rx: UnboundedReceiver<String>) -> JoinHandle<()> {
    tokio::spawn(async move {
        while let Some(line) = rx.recv().await {
            println!("{line}");
        }
    })
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn test_lines_arrive_in_order() {
        let (reporter, mut rx) = StatusReporter::channel();
        reporter.send("one");
        reporter.clone().send(String::from("two"));
        drop(reporter);
        assert_eq!(rx.recv().await.as_deref(), Some("one"));
        assert_eq!(rx.recv().await.as_deref(), Some("two"));
        assert_eq!(rx.recv().await, None);
    }

    #[tokio::test]
    async fn test_printer_stops_when_senders_drop() {
        let (reporter, rx) = StatusReporter::channel();
        let printer = spawn_printer(rx);
        reporter.send("done");
        drop(reporter);
        printer.await.unwrap();
    }
}
