//! Utility modules

pub mod net;
pub mod throttle;

pub use net::{bind_tcp_listener, parse_bind_addr};
pub use throttle::LogThrottler;
