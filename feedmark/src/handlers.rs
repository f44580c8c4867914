use std::io::Write;
use std::process::{Command, Stdio};

use clap::ValueEnum;
use feedmark_core::{Entry, EntryHandler};
use tokio::runtime::{Handle, RuntimeFlavor};
use tokio::task::block_in_place;
use tracing::warn;

#[derive(Debug, Clone, Copy, PartialEq, Eq, ValueEnum)]
pub enum OutputFormat {
    /// Title and link, one entry per line
    Print,
    /// One JSON object per line
    Json,
}

/// Writes entries to stdout. Fails only when stdout is gone.
pub struct PrintHandler {
    format: OutputFormat,
}

impl PrintHandler {
    pub fn new(format: OutputFormat) -> Self {
        Self { format }
    }

    fn render(&self, entry: &Entry) -> Result<String, serde_json::Error> {
        Ok(match self.format {
            OutputFormat::Print => match &entry.link {
                Some(link) => format!("{}\n  {}", entry.title, link),
                None => entry.title.clone(),
            },
            OutputFormat::Json => serde_json::to_string(entry)?,
        })
    }
}

impl EntryHandler for PrintHandler {
    fn handle_entry(&mut self, entry: &Entry) -> bool {
        let line = match self.render(entry) {
            Ok(line) => line,
            Err(err) => {
                warn!(error = %err, title = %entry.title, "failed to serialize entry");
                return false;
            }
        };
        let mut stdout = std::io::stdout().lock();
        match writeln!(stdout, "{line}").and_then(|_| stdout.flush()) {
            Ok(()) => true,
            Err(err) => {
                warn!(error = %err, "failed to write entry to stdout");
                false
            }
        }
    }
}

/// Runs a shell command per entry; the entry counts as handled when the
/// command exits successfully.
pub struct ExecHandler {
    command: String,
}

impl ExecHandler {
    pub fn new(command: impl Into<String>) -> Self {
        Self {
            command: command.into(),
        }
    }

    fn build(&self, entry: &Entry) -> Command {
        let mut cmd = Command::new("sh");
        cmd.arg("-c")
            .arg(&self.command)
            .env("FEED_URL", &entry.feed_url)
            .env("ENTRY_TITLE", &entry.title)
            .env("ENTRY_LINK", entry.link.as_deref().unwrap_or_default())
            .env("ENTRY_ID", entry.id.as_deref().unwrap_or_default())
            .env(
                "ENTRY_UPDATED",
                entry.timestamp().map(|ts| ts.to_string()).unwrap_or_default(),
            )
            .stdin(Stdio::null());
        cmd
    }
}

impl EntryHandler for ExecHandler {
    fn handle_entry(&mut self, entry: &Entry) -> bool {
        let mut cmd = self.build(entry);
        // Waiting on the child blocks; in watch mode this runs on a runtime worker.
        let status = match Handle::try_current().map(|handle| handle.runtime_flavor()) {
            Ok(RuntimeFlavor::MultiThread) => block_in_place(|| cmd.status()),
            _ => cmd.status(),
        };
        match status {
            Ok(status) if status.success() => true,
            Ok(status) => {
                warn!(title = %entry.title, %status, "handler command failed");
                false
            }
            Err(err) => {
                warn!(error = %err, command = %self.command, "failed to spawn handler command");
                false
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn entry() -> Entry {
        let mut entry = Entry::new("http://example.com/feed", "Hello").updated_at(1_700_000_000);
        entry.link = Some("http://example.com/1".into());
        entry
    }

    #[test]
    fn print_format_includes_link() {
        let handler = PrintHandler::new(OutputFormat::Print);
        assert_eq!(
            handler.render(&entry()).unwrap(),
            "Hello\n  http://example.com/1"
        );
    }

    #[test]
    fn json_format_is_one_object() {
        let handler = PrintHandler::new(OutputFormat::Json);
        let line = handler.render(&entry()).unwrap();
        assert!(!line.contains('\n'));
        let value: serde_json::Value = serde_json::from_str(&line).unwrap();
        assert_eq!(value["title"], "Hello");
        assert_eq!(value["feed_url"], "http://example.com/feed");
    }

    #[cfg(unix)]
    #[test]
    fn exec_reports_exit_status() {
        let mut ok = ExecHandler::new(
            r#"test "$ENTRY_TITLE" = Hello && test "$ENTRY_UPDATED" = 1700000000"#,
        );
        assert!(ok.handle_entry(&entry()));

        let mut failing = ExecHandler::new("exit 3");
        assert!(!failing.handle_entry(&entry()));
    }

    #[cfg(unix)]
    #[tokio::test(flavor = "multi_thread")]
    async fn exec_runs_inside_a_multi_thread_runtime() {
        let mut handler = ExecHandler::new(r#"test "$FEED_URL" = http://example.com/feed"#);
        assert!(handler.handle_entry(&entry()));
    }

    #[cfg(unix)]
    #[tokio::test]
    async fn exec_runs_inside_a_current_thread_runtime() {
        let mut handler = ExecHandler::new("true");
        assert!(handler.handle_entry(&entry()));
    }
}
