//! Request middleware.

pub mod firewall;

pub use firewall::{client_ip, firewall_middleware, is_file_request, FirewallLayerState};
