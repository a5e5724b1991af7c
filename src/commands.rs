//! Operator commands and the command submission API.
//!
//! [`OperatorCommands`] answers the stats commands the host dispatcher
//! routes to us. [`CommandBridge`] goes the other way: it lets in-process
//! collaborators submit command lines to the host dispatcher.

use std::str::FromStr;
use std::sync::Arc;

use tracing::{debug, info, warn};

use crate::host::{CommandDispatcher, HostError, MainThread};
use crate::remediation::LeakStats;

/// Prefix the host dispatcher requires on every command line.
pub const COMMAND_PREFIX: char = '/';

/// Stats dump command name.
pub const STATS_COMMAND: &str = "leakstats";

/// Stats reset command name.
pub const RESET_COMMAND: &str = "leakstats_reset";

/// Commands this crate registers with the host dispatcher.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum OperatorCommand {
    /// Print the current counters.
    StatsDump,
    /// Zero every counter.
    StatsReset,
}

impl OperatorCommand {
    /// Every command.
    pub const ALL: [OperatorCommand; 2] = [Self::StatsDump, Self::StatsReset];

    /// Name the host dispatcher routes on.
    pub fn name(self) -> &'static str {
        match self {
            Self::StatsDump => STATS_COMMAND,
            Self::StatsReset => RESET_COMMAND,
        }
    }

    /// One-line help text.
    pub fn help(self) -> &'static str {
        match self {
            Self::StatsDump => "show terrain mesh leak remediation counters",
            Self::StatsReset => "reset terrain mesh leak remediation counters",
        }
    }
}

impl FromStr for OperatorCommand {
    type Err = ();

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let name = s.trim().trim_start_matches(COMMAND_PREFIX);
        Self::ALL.into_iter().find(|c| c.name() == name).ok_or(())
    }
}

/// Handler for the operator commands.
#[derive(Debug, Clone)]
pub struct OperatorCommands {
    stats: Arc<LeakStats>,
    bytes_per_element: u64,
}

impl OperatorCommands {
    /// Create handlers over the shared counters.
    pub fn new(stats: Arc<LeakStats>, bytes_per_element: u64) -> Self {
        Self {
            stats,
            bytes_per_element,
        }
    }

    /// Run a command and return its output text.
    pub fn execute(&self, command: OperatorCommand) -> String {
        match command {
            OperatorCommand::StatsDump => self.stats.snapshot().render(self.bytes_per_element),
            OperatorCommand::StatsReset => {
                let cleared = self.stats.reset();
                info!(
                    destroyed = cleared.resources_destroyed,
                    units = cleared.units_freed,
                    "leak stats reset by operator"
                );
                "leak remediation counters reset".to_owned()
            }
        }
    }

    /// Entry point for the host dispatcher. `None` when `name` is not ours.
    ///
    /// Arguments are ignored; both commands take none.
    pub fn handle(&self, name: &str, args: &[&str]) -> Option<String> {
        let command = name.parse::<OperatorCommand>().ok()?;
        if !args.is_empty() {
            debug!(command = command.name(), ?args, "ignoring command arguments");
        }
        Some(self.execute(command))
    }
}

/// Errors from command submission.
#[derive(Debug, thiserror::Error)]
pub enum CommandError {
    /// Nothing to submit.
    #[error("command is empty")]
    Empty,
    /// The host dispatcher failed.
    #[error(transparent)]
    Host(#[from] HostError),
}

/// Normalise a command line: trim it and add the dispatcher prefix.
pub fn normalize_command(command: &str) -> Option<String> {
    let trimmed = command.trim();
    if trimmed.is_empty() || trimmed.strip_prefix(COMMAND_PREFIX) == Some("") {
        return None;
    }
    if trimmed.starts_with(COMMAND_PREFIX) {
        Some(trimmed.to_owned())
    } else {
        Some(format!("{COMMAND_PREFIX}{trimmed}"))
    }
}

/// Submits command lines to the host dispatcher.
#[derive(Clone)]
pub struct CommandBridge {
    dispatcher: Arc<dyn CommandDispatcher>,
    main: MainThread,
}

impl std::fmt::Debug for CommandBridge {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("CommandBridge").finish_non_exhaustive()
    }
}

impl CommandBridge {
    /// Create a bridge over the host dispatcher.
    pub fn new(dispatcher: Arc<dyn CommandDispatcher>, main: MainThread) -> Self {
        Self { dispatcher, main }
    }

    /// Submit a command and return the host's result text. Main thread only.
    ///
    /// # Errors
    ///
    /// Returns [`CommandError::Empty`] for blank input and
    /// [`CommandError::Host`] when the dispatcher fails.
    pub fn try_submit(&self, command: &str) -> Result<Option<String>, CommandError> {
        let line = normalize_command(command).ok_or(CommandError::Empty)?;
        debug!(command = %line, "submitting host command");
        Ok(self.dispatcher.dispatch(&line)?)
    }

    /// Submit a command. Main thread only. Returns whether it succeeded.
    pub fn submit(&self, command: &str) -> bool {
        match self.try_submit(command) {
            Ok(_) => true,
            Err(e) => {
                warn!(command = %command, error = %e, "host command failed");
                false
            }
        }
    }

    /// Hand off to the main thread, then submit.
    pub async fn submit_async(&self, command: impl Into<String>) -> bool {
        let command = command.into();
        let bridge = self.clone();
        match self.main.run(move || bridge.submit(&command)).await {
            Ok(ok) => ok,
            Err(e) => {
                warn!(error = %e, "could not reach main thread for host command");
                false
            }
        }
    }

    /// Broadcast a chat message to every connected player. Main thread only.
    pub fn broadcast(&self, message: &str) -> bool {
        let message = message.trim();
        if message.is_empty() {
            return false;
        }
        self.submit(&format!("say \"{}\"", message.replace('"', "'")))
    }
}
