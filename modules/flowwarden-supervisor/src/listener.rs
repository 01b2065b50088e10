//! Change-notification listener on the management channel.
//!
//! The listener runs beside the computation and forwards control commands to
//! it. Any command ends the current computation; the supervisor then starts a
//! new cycle.

use std::fmt;

use anyhow::Result;
use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use sqlx::postgres::PgListener;
use tokio::sync::mpsc;
use tracing::{info, warn};

use flowwarden_common::{Settings, SourceKind};

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "command", rename_all = "snake_case")]
pub enum ControlCommand {
    Stop,
    Restart,
    SourcesChanged { kind: SourceKind },
}

impl fmt::Display for ControlCommand {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Stop => write!(f, "stop"),
            Self::Restart => write!(f, "restart"),
            Self::SourcesChanged { kind } => write!(f, "sources_changed({kind})"),
        }
    }
}

#[async_trait]
pub trait ChangeListener: Send + Sync {
    /// Forward commands into `commands` until the receiver goes away or the
    /// listener fails. Returning ends the running computation.
    async fn listen(&self, commands: mpsc::Sender<ControlCommand>) -> Result<()>;
}

/// Listens with Postgres `LISTEN` on the command and config queues.
///
/// Command-queue payloads are JSON [`ControlCommand`]s. Config-queue payloads
/// may also be a bare source kind name, meaning that kind's configuration
/// changed.
pub struct PgChangeListener {
    connection_string: String,
    command_queue: String,
    config_queue: String,
}

impl PgChangeListener {
    pub fn new(
        connection_string: impl Into<String>,
        command_queue: impl Into<String>,
        config_queue: impl Into<String>,
    ) -> Self {
        Self {
            connection_string: connection_string.into(),
            command_queue: command_queue.into(),
            config_queue: config_queue.into(),
        }
    }

    pub fn from_settings(settings: &Settings) -> Self {
        Self::new(
            &settings.bus_connection_string,
            &settings.bus_command_queue,
            &settings.bus_config_queue,
        )
    }

    /// Decode a notification. `None` for payloads that mean nothing to us.
    pub fn parse_command(&self, channel: &str, payload: &str) -> Option<ControlCommand> {
        if let Ok(cmd) = serde_json::from_str::<ControlCommand>(payload) {
            return Some(cmd);
        }
        if channel == self.config_queue {
            return payload
                .parse::<SourceKind>()
                .ok()
                .map(|kind| ControlCommand::SourcesChanged { kind });
        }
        None
    }
}

#[async_trait]
impl ChangeListener for PgChangeListener {
    async fn listen(&self, commands: mpsc::Sender<ControlCommand>) -> Result<()> {
        let mut listener = PgListener::connect(&self.connection_string).await?;
        listener
            .listen_all([self.command_queue.as_str(), self.config_queue.as_str()])
            .await?;

        info!(
            command_queue = self.command_queue.as_str(),
            config_queue = self.config_queue.as_str(),
            "Listening for control commands"
        );

        loop {
            let notification = listener.recv().await?;
            let channel = notification.channel();

            match self.parse_command(channel, notification.payload()) {
                Some(cmd) => {
                    info!(channel, command = %cmd, "Control command received");
                    if commands.send(cmd).await.is_err() {
                        return Ok(());
                    }
                }
                None => {
                    warn!(channel, payload = notification.payload(), "Ignoring unrecognised notification");
                }
            }
        }
    }
}

/// Listener that never produces a command. Keeps its sender alive so the
/// computation only ends through its own failures.
pub struct NoopListener;

#[async_trait]
impl ChangeListener for NoopListener {
    async fn listen(&self, _commands: mpsc::Sender<ControlCommand>) -> Result<()> {
        std::future::pending::<()>().await;
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn listener() -> PgChangeListener {
        PgChangeListener::new("postgres://localhost/bus", "commands", "config")
    }

    #[test]
    fn json_command_on_any_channel() {
        assert_eq!(
            listener().parse_command("commands", r#"{"command":"stop"}"#),
            Some(ControlCommand::Stop)
        );
        assert_eq!(
            listener().parse_command("config", r#"{"command":"restart"}"#),
            Some(ControlCommand::Restart)
        );
    }

    #[test]
    fn sources_changed_carries_kind() {
        assert_eq!(
            listener().parse_command("commands", r#"{"command":"sources_changed","kind":"smtp"}"#),
            Some(ControlCommand::SourcesChanged {
                kind: SourceKind::Smtp
            })
        );
    }

    #[test]
    fn bare_kind_on_config_queue() {
        assert_eq!(
            listener().parse_command("config", "kerberos"),
            Some(ControlCommand::SourcesChanged {
                kind: SourceKind::Kerberos
            })
        );
    }

    #[test]
    fn bare_kind_on_command_queue_is_ignored() {
        assert_eq!(listener().parse_command("commands", "kerberos"), None);
    }

    #[test]
    fn garbage_is_ignored() {
        assert_eq!(listener().parse_command("config", "{not json"), None);
    }

    #[tokio::test(start_paused = true)]
    async fn noop_listener_never_sends_or_closes() {
        let (tx, mut rx) = mpsc::channel(1);
        let task = tokio::spawn(async move { NoopListener.listen(tx).await });

        let waited = tokio::time::timeout(std::time::Duration::from_secs(3600), rx.recv()).await;
        assert!(waited.is_err(), "channel should stay open and silent");
        task.abort();
    }
}
