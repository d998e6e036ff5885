//! mixcoin-server
//!
//! The service layer: request validation, warrant issuance, the per-block
//! orchestrator, and the client-facing JSON-RPC surface.

pub mod api;
pub mod orchestrator;
pub mod rpc_types;
pub mod server;
pub mod validate;
pub mod warrant;

pub use orchestrator::{watch_blocks, MixerConfig, MixerContext, Orchestrator};
pub use server::RpcServer;
pub use validate::validate_request;
pub use warrant::{verify_warrant, WarrantService};
