//! EDNS Client-Subnet rewriting of DNS messages.
//!
//! Implements the query/response side of RFC 7871 for substitute addresses:
//! - synthesize an ECS option (/24 for IPv4, /48 for IPv6, scope 0)
//! - add it to the query, creating the OPT record if needed, or replace an
//!   existing ECS option in place
//! - strip ECS from the response when the client never sent one

use hickory_proto::op::{Edns, Message};
use hickory_proto::rr::rdata::opt::{ClientSubnet, EdnsCode, EdnsOption};
use std::net::IpAddr;

use crate::error::Result;

/// Source prefix for IPv4 substitutes.
pub const IPV4_SOURCE_PREFIX: u8 = 24;

/// Source prefix for IPv6 substitutes.
pub const IPV6_SOURCE_PREFIX: u8 = 48;

/// UDP payload size advertised by an OPT record we create.
pub const DEFAULT_MAX_PAYLOAD: u16 = 512;

/// Address family code carried on the wire for `ip` (1 = IPv4, 2 = IPv6).
pub fn family(ip: &IpAddr) -> u16 {
    match ip {
        IpAddr::V4(_) => 1,
        IpAddr::V6(_) => 2,
    }
}

/// Build the ECS option for a substitute address.
///
/// Scope prefix is always 0, as required for queries.
pub fn new_client_subnet(ecs_ip: IpAddr) -> ClientSubnet {
    let source_prefix = match ecs_ip {
        IpAddr::V4(_) => IPV4_SOURCE_PREFIX,
        IpAddr::V6(_) => IPV6_SOURCE_PREFIX,
    };
    ClientSubnet::new(ecs_ip, source_prefix, 0)
}

/// ECS option carried by `msg`, if any.
pub fn get_ecs(msg: &Message) -> Option<&ClientSubnet> {
    match msg.extensions().as_ref()?.options().get(EdnsCode::Subnet)? {
        EdnsOption::Subnet(subnet) => Some(subnet),
        _ => None,
    }
}

/// Check if `msg` carries an ECS option.
pub fn has_ecs(msg: &Message) -> bool {
    get_ecs(msg).is_some()
}

/// Put `ecs` into `msg`.
///
/// Without an OPT record a new one is created holding only `ecs`. Otherwise an
/// existing ECS option is replaced, or `ecs` is added next to the other options.
pub fn set_ecs(msg: &mut Message, ecs: ClientSubnet) {
    match msg.extensions_mut() {
        Some(edns) => edns.options_mut().insert(EdnsOption::Subnet(ecs)),
        None => {
            let mut edns = Edns::new();
            edns.set_max_payload(DEFAULT_MAX_PAYLOAD);
            edns.set_version(0);
            edns.options_mut().insert(EdnsOption::Subnet(ecs));
            msg.set_edns(edns);
        }
    }
}

/// Remove the ECS option from `msg`, returning it.
///
/// The OPT record itself is left in place.
pub fn remove_ecs(msg: &mut Message) -> Option<ClientSubnet> {
    let removed = get_ecs(msg).cloned()?;
    if let Some(edns) = msg.extensions_mut() {
        edns.options_mut().remove(EdnsCode::Subnet);
    }
    Some(removed)
}

/// Outcome of rewriting one query.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct Rewrite {
    /// ECS option written into the query, if any
    pub ecs_ip: Option<IpAddr>,
    /// Whether ECS must be removed from the response before it is sent
    pub strip_response_ecs: bool,
}

/// Apply a resolved substitute address to `query`.
///
/// `None` leaves the query untouched. Otherwise the query carries the
/// synthesized ECS option afterwards, and the response is marked for ECS
/// stripping if the original query had no ECS option.
pub fn rewrite_query(query: &mut Message, ecs_ip: Option<IpAddr>) -> Rewrite {
    let Some(ecs_ip) = ecs_ip else {
        return Rewrite::default();
    };
    let had_ecs = has_ecs(query);
    set_ecs(query, new_client_subnet(ecs_ip));
    Rewrite {
        ecs_ip: Some(ecs_ip),
        strip_response_ecs: !had_ecs,
    }
}

/// Sink for outgoing responses, provided by the host server.
pub trait ResponseWriter {
    /// Send `msg` to the client.
    fn write_msg(&mut self, msg: Message) -> Result<()>;
}

impl<W: ResponseWriter + ?Sized> ResponseWriter for &mut W {
    fn write_msg(&mut self, msg: Message) -> Result<()> {
        (**self).write_msg(msg)
    }
}

impl<W: ResponseWriter + ?Sized> ResponseWriter for Box<W> {
    fn write_msg(&mut self, msg: Message) -> Result<()> {
        (**self).write_msg(msg)
    }
}

/// Response writer that removes ECS from the first response it forwards.
///
/// When not armed it passes responses straight through.
pub struct EcsStrippingWriter<W> {
    inner: W,
    armed: bool,
}

impl<W: ResponseWriter> EcsStrippingWriter<W> {
    /// Wrap `inner`; `strip` arms the one-shot ECS removal.
    pub fn new(inner: W, strip: bool) -> Self {
        Self { inner, armed: strip }
    }

    /// Check if the next response will have ECS removed.
    pub fn is_armed(&self) -> bool {
        self.armed
    }

    /// Unwrap the inner writer.
    pub fn into_inner(self) -> W {
        self.inner
    }
}

impl<W: ResponseWriter> ResponseWriter for EcsStrippingWriter<W> {
    fn write_msg(&mut self, mut msg: Message) -> Result<()> {
        if self.armed {
            self.armed = false;
            remove_ecs(&mut msg);
        }
        self.inner.write_msg(msg)
    }
}
