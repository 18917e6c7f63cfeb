//! Plugin hooks.
//!
//! Plugins are registered in a [`PluginRegistry`] and invoked through the
//! [`HookPipeline`]. Each hook point has its own callback on the [`Plugin`]
//! trait:
//!
//! * **Command** - chat lines starting with `/`, routed to plugins that
//!   declare the command name
//! * **Set block** - every plugin votes; any `true` vetoes the change
//! * **Stop** - the plugin is being unloaded or the server is shutting down
//!
//! A plugin that returns an error or panics is logged and counted as "no
//! veto"; it never affects the connection that triggered it.

pub mod builtin;
pub mod pipeline;
pub mod registry;

pub use pipeline::{HookEvent, HookPipeline, HookResult};
pub use registry::{PluginRegistry, ReloadOutcome};

use crate::error::PluginError;
use crate::server::ServerHandle;
use crate::session::Session;
use async_trait::async_trait;
use voxel_protocol::{BlockMode, BlockPos};

/// A server extension reacting to hook events.
#[async_trait]
pub trait Plugin: Send + Sync {
    /// Unique plugin name.
    fn name(&self) -> &str;

    /// Plugin version; reloading with the same version is a no-op.
    fn version(&self) -> &str;

    /// Command names (without the slash) this plugin handles.
    fn commands(&self) -> &[&'static str] {
        &[]
    }

    async fn on_command(
        &self,
        _ctx: &HookContext,
        _invocation: &CommandInvocation,
    ) -> Result<(), PluginError> {
        Ok(())
    }

    /// Returns `true` to veto the change.
    async fn on_set_block(
        &self,
        _ctx: &HookContext,
        _change: &BlockChange,
    ) -> Result<bool, PluginError> {
        Ok(false)
    }

    async fn on_stop(&self) -> Result<(), PluginError> {
        Ok(())
    }
}

/// What a hook can see and do: the triggering session and the server.
#[derive(Debug, Clone)]
pub struct HookContext {
    pub session: Session,
    pub server: ServerHandle,
}

impl HookContext {
    pub fn new(session: Session, server: ServerHandle) -> Self {
        Self { session, server }
    }

    /// Sends a server message to the triggering player only.
    pub fn reply(&self, text: &str) {
        self.server.send_text(&self.session.connection, text);
    }
}

/// A parsed `/command arg arg` chat line.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CommandInvocation {
    /// Command name, lowercased, without the slash
    pub command: String,
    pub args: Vec<String>,
    /// Everything after the command name
    pub raw_args: String,
}

impl CommandInvocation {
    /// Parses a chat line. Returns `None` unless it starts with `/` followed
    /// by a command name.
    pub fn parse(line: &str) -> Option<Self> {
        let body = line.trim().strip_prefix('/')?;
        let (command, raw_args) = match body.split_once(char::is_whitespace) {
            Some((command, rest)) => (command, rest.trim()),
            None => (body, ""),
        };
        if command.is_empty() {
            return None;
        }
        Some(Self {
            command: command.to_ascii_lowercase(),
            args: raw_args.split_whitespace().map(str::to_string).collect(),
            raw_args: raw_args.to_string(),
        })
    }
}

/// A requested block change, before it is committed.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct BlockChange {
    pub world: String,
    pub position: BlockPos,
    pub mode: BlockMode,
    /// Block held by the player (ignored for destroy)
    pub block: u8,
}
