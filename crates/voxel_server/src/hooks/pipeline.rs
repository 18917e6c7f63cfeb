//! Hook dispatch.

use super::{BlockChange, CommandInvocation, HookContext, Plugin, PluginRegistry};
use crate::error::PluginError;
use futures::future::join_all;
use futures::FutureExt;
use std::future::Future;
use std::panic::AssertUnwindSafe;
use std::sync::Arc;
use tracing::{debug, error, info, warn};

/// A hook point being triggered.
#[derive(Debug, Clone, Copy)]
pub enum HookEvent<'a> {
    Command {
        ctx: &'a HookContext,
        invocation: &'a CommandInvocation,
    },
    SetBlock {
        ctx: &'a HookContext,
        change: &'a BlockChange,
    },
    Stop,
}

impl HookEvent<'_> {
    pub fn name(&self) -> &'static str {
        match self {
            Self::Command { .. } => "command",
            Self::SetBlock { .. } => "set_block",
            Self::Stop => "stop",
        }
    }
}

/// Outcome of a dispatch.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct HookResult {
    /// Plugins that received the event
    pub invoked: usize,
    /// Veto votes, in registration order (set-block only)
    pub votes: Vec<bool>,
}

impl HookResult {
    /// Whether any plugin vetoed.
    pub fn is_vetoed(&self) -> bool {
        self.votes.iter().any(|vote| *vote)
    }
}

/// Invokes plugins for hook events.
#[derive(Debug, Clone)]
pub struct HookPipeline {
    registry: Arc<PluginRegistry>,
}

impl HookPipeline {
    pub fn new(registry: Arc<PluginRegistry>) -> Self {
        Self { registry }
    }

    pub fn registry(&self) -> &Arc<PluginRegistry> {
        &self.registry
    }

    /// Runs every interested plugin concurrently and collects the results in
    /// registration order.
    pub async fn dispatch(&self, event: HookEvent<'_>) -> HookResult {
        let plugins = self.registry.snapshot().await;

        match event {
            HookEvent::Command { ctx, invocation } => {
                let handlers: Vec<Arc<dyn Plugin>> = plugins
                    .into_iter()
                    .filter(|p| {
                        p.commands()
                            .iter()
                            .any(|c| c.eq_ignore_ascii_case(&invocation.command))
                    })
                    .collect();
                let outcomes = join_all(handlers.iter().map(|plugin| {
                    guarded(plugin.as_ref(), event.name(), plugin.on_command(ctx, invocation))
                }))
                .await;
                debug!(
                    "/{} handled by {} plugin(s)",
                    invocation.command,
                    outcomes.len()
                );
                HookResult {
                    invoked: outcomes.len(),
                    votes: Vec::new(),
                }
            }
            HookEvent::SetBlock { ctx, change } => {
                let votes: Vec<bool> = join_all(plugins.iter().map(|plugin| {
                    guarded(plugin.as_ref(), event.name(), plugin.on_set_block(ctx, change))
                }))
                .await
                .into_iter()
                .map(|vote| vote.unwrap_or(false))
                .collect();

                if let Some(index) = votes.iter().position(|vote| *vote) {
                    debug!(
                        "Block change at {:?} in {} vetoed by {}",
                        change.position,
                        change.world,
                        plugins[index].name()
                    );
                }
                HookResult {
                    invoked: plugins.len(),
                    votes,
                }
            }
            HookEvent::Stop => {
                join_all(
                    plugins
                        .iter()
                        .map(|plugin| guarded(plugin.as_ref(), event.name(), plugin.on_stop())),
                )
                .await;
                HookResult {
                    invoked: plugins.len(),
                    votes: Vec::new(),
                }
            }
        }
    }

    /// Stops and removes every plugin.
    pub async fn shutdown(&self) {
        let plugins = self.registry.drain().await;
        info!("Shutting down {} plugins", plugins.len());
        for plugin in plugins {
            guarded(plugin.as_ref(), "stop", plugin.on_stop()).await;
        }
        info!("All plugins shut down");
    }
}

/// Awaits a plugin callback, turning errors and panics into `None`.
async fn guarded<T, F>(plugin: &dyn Plugin, hook: &str, call: F) -> Option<T>
where
    F: Future<Output = Result<T, PluginError>>,
{
    match AssertUnwindSafe(call).catch_unwind().await {
        Ok(Ok(value)) => Some(value),
        Ok(Err(e)) => {
            warn!("Plugin {} failed in {} hook: {}", plugin.name(), hook, e);
            None
        }
        Err(_) => {
            error!("💥 Plugin {} panicked in {} hook", plugin.name(), hook);
            None
        }
    }
}
