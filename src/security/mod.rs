//! Security subsystem.
//!
//! # Data Flow
//! ```text
//! Incoming request (via http::middleware::firewall):
//!     → firewall.rs (single admission entry point)
//!         → ip.rs          (LAN addresses skip blocklist and rate limits)
//!         → rate_limit.rs  (per-second counters per folded IP)
//!         → danger.rs      (keyword screening of query and body)
//!         → signature.rs   (timestamp freshness, MD5 signature)
//!         → replay.rs      (seen-signature buckets)
//!     → admit / reject
//!
//! Live record (blocklist, threshold):
//!     watch::ConfigWatcher → Firewall::apply_record
//! ```
//!
//! # Design Decisions
//! - Checks short-circuit in a fixed order; the first failure rejects
//! - Keyword screening fails open if its pattern cannot be compiled
//! - Counters are per process; nothing is shared between instances

pub mod danger;
pub mod firewall;
pub mod ip;
pub mod rate_limit;
pub mod replay;
pub mod signature;

pub use firewall::{AdmissionRequest, Firewall, FirewallConfigError, FirewallRecord, Rejection};
pub use signature::Signer;
