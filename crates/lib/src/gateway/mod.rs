//! Gateway: HTTP listener that upgrades `/ws` requests and starts one bridge
//! session per connection.
//!
//! Non-GET requests to `/ws` get 405, requests that cannot be upgraded get 400
//! and an unreachable backend gets 500.

mod server;

pub use server::{router, run_gateway, GatewayState};
