//! setecs - EDNS Client-Subnet rewriting for DNS queries.
//!
//! This crate decides, per query, whether a client's DNS query should carry a
//! substitute EDNS Client-Subnet (ECS) address, and rewrites the query and its
//! response accordingly.
//!
//! # Features
//!
//! - **Bindings**: map client address ranges to one substitute ECS address
//! - **Tables**: exact client address to substitute address dictionaries
//! - **File and URL sources**: loaded once, refreshed periodically, reparsed
//!   only when changed (mtime/size for files, content hash for URLs)
//! - **ECS rewriting**: add or replace the ECS option in the query and strip it
//!   from the response when the client never asked for ECS
//! - **Thread-safe**: lookups run concurrently with refreshes
//!
//! # Quick Start
//!
//! ```ignore
//! use setecs::{HttpFetcher, SetEcs};
//! use std::sync::Arc;
//!
//! let setecs = SetEcs::from_text(
//!     r#"setecs {
//!         ecs-binding 203.0.113.9 clients 10.0.0.0/24 /etc/setecs/clients.txt
//!         ecs-table https://example.com/ecs-tables.txt
//!         reload 10m
//!     }"#,
//!     Arc::new(HttpFetcher::new()?),
//! )?;
//! setecs.on_startup()?;
//!
//! // Per query: rewrite the request, wrap the response writer.
//! let writer = setecs.handle("10.0.0.5", &mut request, writer);
//! ```
//!
//! # Matching
//!
//! A client must first be listed in some table by its exact address string.
//! Only then are the bindings consulted, in registration order; the first
//! binding containing the client supplies the substitute address. Anything
//! else leaves the query untouched.
//!
//! # Source Format
//!
//! Both source kinds are line based, `#` starts a comment and blank lines are
//! skipped:
//!
//! - client lists: one address or CIDR range per line
//! - tables: `client:substitute` per line

mod error;

pub mod binding;
pub mod config;
pub mod plugin;
pub mod resolver;
pub mod rewrite;
pub mod scheduler;
pub mod source;
pub mod subnet;
pub mod table;

// Re-export core types
pub use error::{Error, LineError, Result};

// Re-export the handler and its configuration
pub use config::{parse_duration, BindingDirective, SetEcsConfig};
pub use plugin::SetEcs;

// Re-export engine types
pub use binding::EcsBinding;
pub use resolver::{EcsResolver, Snapshot};
pub use scheduler::RefreshScheduler;
pub use source::{ContentFetcher, HttpFetcher, Source};
pub use subnet::SubnetSet;
pub use table::EcsTable;

// Re-export message helpers
pub use rewrite::{
    get_ecs, new_client_subnet, remove_ecs, set_ecs, EcsStrippingWriter, ResponseWriter,
};
