//! Plugins every server registers at startup.

use super::{BlockChange, CommandInvocation, HookContext, Plugin};
use crate::error::PluginError;
use async_trait::async_trait;
use tracing::info;

/// `/who`: lists the players in the caller's world.
#[derive(Debug, Default)]
pub struct WhoPlugin;

#[async_trait]
impl Plugin for WhoPlugin {
    fn name(&self) -> &str {
        "who"
    }

    fn version(&self) -> &str {
        env!("CARGO_PKG_VERSION")
    }

    fn commands(&self) -> &[&'static str] {
        &["who"]
    }

    async fn on_command(
        &self,
        ctx: &HookContext,
        _invocation: &CommandInvocation,
    ) -> Result<(), PluginError> {
        let world = &ctx.session.world;
        let players = ctx.server.players_in_world(world).await;
        ctx.reply(&format!(
            "&ePlayers in {} ({}): &f{}",
            world,
            players.len(),
            players.join(", ")
        ));
        Ok(())
    }
}

/// `/worlds` and `/goto <world>`: world listing and transfer.
#[derive(Debug, Default)]
pub struct WorldsPlugin;

#[async_trait]
impl Plugin for WorldsPlugin {
    fn name(&self) -> &str {
        "worlds"
    }

    fn version(&self) -> &str {
        env!("CARGO_PKG_VERSION")
    }

    fn commands(&self) -> &[&'static str] {
        &["worlds", "goto"]
    }

    async fn on_command(
        &self,
        ctx: &HookContext,
        invocation: &CommandInvocation,
    ) -> Result<(), PluginError> {
        match invocation.command.as_str() {
            "worlds" => {
                ctx.reply(&format!("&eWorlds: &f{}", ctx.server.world_names().join(", ")));
                Ok(())
            }
            "goto" => {
                let Some(target) = invocation.args.first() else {
                    ctx.reply("&cUsage: /goto <world>");
                    return Ok(());
                };
                if !ctx.server.world_names().contains(target) {
                    ctx.reply(&format!("&cNo world named {}", target));
                    return Ok(());
                }
                ctx.server
                    .transfer(ctx.session.connection_id(), target)
                    .await
                    .map_err(|e| PluginError::ExecutionError(e.to_string()))
            }
            _ => Ok(()),
        }
    }
}

/// Keeps non-operators from editing blocks near a world's spawn point.
#[derive(Debug)]
pub struct SpawnProtection {
    radius: u16,
}

impl SpawnProtection {
    pub fn new(radius: u16) -> Self {
        Self { radius }
    }

    /// Whether `change` lies within `radius` blocks (horizontally) of `spawn`.
    fn is_protected(&self, spawn: voxel_protocol::BlockPos, change: &BlockChange) -> bool {
        let dx = (i32::from(change.position.x) - i32::from(spawn.x)).abs();
        let dz = (i32::from(change.position.z) - i32::from(spawn.z)).abs();
        dx.max(dz) <= i32::from(self.radius)
    }
}

#[async_trait]
impl Plugin for SpawnProtection {
    fn name(&self) -> &str {
        "spawn_protection"
    }

    fn version(&self) -> &str {
        env!("CARGO_PKG_VERSION")
    }

    async fn on_set_block(
        &self,
        ctx: &HookContext,
        change: &BlockChange,
    ) -> Result<bool, PluginError> {
        if self.radius == 0 || ctx.session.role.is_operator() {
            return Ok(false);
        }
        let Some(spawn) = ctx.server.world_spawn(&change.world).await else {
            return Ok(false);
        };
        if self.is_protected(spawn, change) {
            info!(
                "🛡️ Blocked {} from editing spawn of {}",
                ctx.session.username, change.world
            );
            ctx.reply("&cThe area around spawn is protected");
            return Ok(true);
        }
        Ok(false)
    }
}
