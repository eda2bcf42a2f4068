//! Account pool and upstream HTTP client for the Cloud Code service.
//!
//! The pool owns every credential for the process lifetime: sticky account
//! selection for prompt-cache affinity, per-account cooldowns, cached access
//! tokens and project ids, and best-effort persistence to disk. The client
//! wraps it with endpoint failover and a bounded outer retry loop.

pub mod account;
pub mod client;
pub mod oauth;
pub mod pool;
pub mod project;
pub mod reset;

pub use account::{Account, CredentialSource, DatabaseTokenSource};
pub use client::{UpstreamClient, UpstreamResponse};
pub use pool::{AccountPool, StickyPick};
