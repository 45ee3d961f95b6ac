//! Upstream access for the Overtile proxy: URL pool with cooldown and
//! daily quota, the Overpass fetch client, and the pass-through forwarder.

pub mod client;
pub mod pool;
pub mod proxy;

pub use crate::client::UpstreamClient;
pub use crate::pool::{AcquireOutcome, AttemptFailure, UpstreamPool};
pub use crate::proxy::{Forwarder, ProxiedResponse, ProxyRequest, UpstreamProxy};
