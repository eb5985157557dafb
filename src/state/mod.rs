//! State module for a site's crawl loop
//!
//! # Components
//!
//! - `EngineState`: the states of the per-site crawl state machine and the legal steps between them
//! - `IdentityRotation`: the user-agent/proxy identity requests are issued with, and its rotation

mod engine_state;
mod identity;

pub use engine_state::EngineState;
pub use identity::{Identity, IdentityCursor, IdentityRotation, ProxyRoute};
