//! # Voxel Server
//!
//! A multiplayer session server for a block-based voxel world. Clients
//! connect over TCP, identify themselves, receive the world and then exchange
//! movement, chat and block edits with everyone in the same world.
//!
//! ## Architecture Overview
//!
//! * **[`GameServer`]** - Accept loop, background tasks, orderly shutdown
//! * **Connection tasks** - One per socket; reads frames and dispatches them
//!   strictly in order
//! * **[`SessionRegistry`](session::SessionRegistry)** - Authenticated
//!   players, unique names and player ids
//! * **[`Worlds`](world::Worlds)** - Named block stores, each behind its own lock
//! * **[`AuthHandshake`](auth::AuthHandshake)** - Name verification
//! * **[`HookPipeline`](hooks::HookPipeline)** - Plugin hooks for commands
//!   and block-change vetoes
//! * **[`BroadcastRouter`](broadcast::BroadcastRouter)** - World-scoped fan-out
//!
//! ### Message Flow
//!
//! 1. Bytes from the socket go through a [`FrameReader`](voxel_protocol::FrameReader)
//! 2. Each complete frame is decoded into a [`Packet`](voxel_protocol::Packet)
//! 3. The connection dispatches it according to its phase
//! 4. Responses and broadcasts are queued on the recipients' connection handles
//!
//! ## Error Handling
//!
//! [`ServerError`] separates framing, authentication, plugin, world and
//! transport failures. Only framing, authentication and transport errors end
//! a connection; plugin failures never do.
//!
//! ## Thread Safety
//!
//! * The session registry is an `RwLock<HashMap>`; uniqueness checks and
//!   insertion happen under one write lock
//! * Worlds live in a `DashMap`, each with its own lock, so edits in
//!   different worlds never contend
//! * Every connection owns a bounded outbound queue drained by its writer task

// Re-export core types and functions for easy access
pub use config::ServerConfig;
pub use error::ServerError;
pub use server::{GameServer, ServerHandle};
pub use utils::{create_server, create_server_with_config};

// Public module declarations
pub mod auth;
pub mod broadcast;
pub mod config;
pub mod connection;
pub mod error;
pub mod heartbeat;
pub mod hooks;
pub mod server;
pub mod session;
pub mod utils;
pub mod world;
