//! ECS bindings: one substitute address for a set of client ranges.

use ipnet::IpNet;
use parking_lot::RwLock;
use std::fmt;
use std::net::IpAddr;
use std::sync::Arc;

use crate::error::{LineError, Result};
use crate::source::{self, ContentFetcher, ContentMeta, LineParser, Source};
use crate::subnet::SubnetSet;

/// Ranges shown per set in the debug dump.
const PREVIEW_LIMIT: usize = 5;

/// Parses client-list sources into a [`SubnetSet`].
///
/// Ranges already covered by an earlier line are rejected.
pub struct ClientList;

impl LineParser for ClientList {
    type Output = SubnetSet;

    fn parse_line(out: &mut SubnetSet, line: &str) -> std::result::Result<(), LineError> {
        out.insert_line(line)
    }

    fn entries(out: &SubnetSet) -> usize {
        out.len()
    }
}

/// Where a binding's client ranges come from.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum BindingKind {
    /// Loaded and refreshed from a file or URL
    Sourced(Source),
    /// Declared directly in the configuration
    Inline,
}

#[derive(Default)]
struct BindingState {
    clients: SubnetSet,
    inline: SubnetSet,
    meta: ContentMeta,
}

/// Maps every client inside its ranges to one substitute ECS address.
pub struct EcsBinding {
    ecs_ip: IpAddr,
    kind: BindingKind,
    state: RwLock<BindingState>,
    log_target: Arc<str>,
}

impl EcsBinding {
    /// Create a binding refreshed from `source`. Nothing is loaded yet.
    pub fn new(ecs_ip: IpAddr, source: Source, log_target: Arc<str>) -> Self {
        Self {
            ecs_ip,
            kind: BindingKind::Sourced(source),
            state: RwLock::new(BindingState::default()),
            log_target,
        }
    }

    /// Create the binding that collects inline-declared ranges.
    pub fn inline(ecs_ip: IpAddr, log_target: Arc<str>) -> Self {
        Self {
            ecs_ip,
            kind: BindingKind::Inline,
            state: RwLock::new(BindingState::default()),
            log_target,
        }
    }

    /// Substitute address handed out for matching clients.
    pub fn ecs_ip(&self) -> IpAddr {
        self.ecs_ip
    }

    /// Classification of this binding.
    pub fn kind(&self) -> &BindingKind {
        &self.kind
    }

    /// Check if this is the inline binding.
    pub fn is_inline(&self) -> bool {
        self.kind == BindingKind::Inline
    }

    /// Check if `ip` is in the loaded or the inline ranges.
    pub fn contains(&self, ip: &IpAddr) -> bool {
        let state = self.state.read();
        state.clients.exists_containing(ip) || state.inline.exists_containing(ip)
    }

    /// Check if `net` is fully covered by the loaded or the inline ranges.
    pub fn contains_net(&self, net: &IpNet) -> bool {
        let state = self.state.read();
        state.clients.covers(net) || state.inline.covers(net)
    }

    /// Add an inline range.
    ///
    /// Returns `false` if an earlier inline range already covers it.
    pub fn add_inline(&self, net: IpNet) -> bool {
        match self.state.write().inline.insert(net) {
            Ok(()) => true,
            Err(e) => {
                log::warn!(target: &*self.log_target, "{}", e);
                false
            }
        }
    }

    /// Number of loaded client ranges.
    pub fn client_count(&self) -> usize {
        self.state.read().clients.len()
    }

    /// Number of inline ranges.
    pub fn inline_count(&self) -> usize {
        self.state.read().inline.len()
    }

    /// Change-detection state of the last load.
    pub fn meta(&self) -> ContentMeta {
        self.state.read().meta
    }

    /// Reload client ranges from the source.
    ///
    /// Returns `Ok(true)` if the ranges were replaced, `Ok(false)` if the
    /// source was unchanged or this binding is inline. On error the previous
    /// ranges are kept.
    pub fn reload(&self, fetcher: &dyn ContentFetcher) -> Result<bool> {
        let BindingKind::Sourced(source) = &self.kind else {
            return Ok(false);
        };

        let previous = self.state.read().meta;
        let Some(loaded) = source::load::<ClientList>(source, previous, fetcher, &self.log_target)? else {
            return Ok(false);
        };

        let mut state = self.state.write();
        state.clients = loaded.data;
        state.meta = loaded.meta;
        Ok(true)
    }
}

fn write_preview<'a>(
    f: &mut fmt::Formatter<'_>,
    nets: impl Iterator<Item = &'a IpNet>,
) -> fmt::Result {
    for (i, net) in nets.enumerate() {
        if i >= PREVIEW_LIMIT {
            return write!(f, "......");
        }
        write!(f, "{},", net)?;
    }
    Ok(())
}

impl fmt::Display for EcsBinding {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let state = self.state.read();
        write!(f, "ecsBinding:ecsip={};clients=", self.ecs_ip)?;
        write_preview(f, state.clients.iter())?;
        write!(f, ";inlines=")?;
        write_preview(f, state.inline.iter())
    }
}

impl fmt::Debug for EcsBinding {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("EcsBinding")
            .field("ecs_ip", &self.ecs_ip)
            .field("kind", &self.kind)
            .field("clients", &self.client_count())
            .field("inline", &self.inline_count())
            .finish()
    }
}
