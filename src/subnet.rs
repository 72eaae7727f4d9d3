//! Client subnet ranges and ordered subnet sets.

use ipnet::IpNet;
use std::net::IpAddr;

use crate::error::{Error, LineError, Result};

/// Parse an address or CIDR range.
///
/// A bare address becomes a single-host range (/32 for IPv4, /128 for IPv6).
///
/// # Examples
/// ```
/// use setecs::subnet::parse_ip_net;
///
/// let net = parse_ip_net("192.168.0.1").unwrap();
/// assert_eq!(net.to_string(), "192.168.0.1/32");
/// ```
pub fn parse_ip_net(s: &str) -> Result<IpNet> {
    let s = s.trim();
    if !s.contains('/') {
        return s
            .parse::<IpAddr>()
            .map(IpNet::from)
            .map_err(|_| Error::InvalidCidrPattern(s.to_string()));
    }
    s.parse::<IpNet>()
        .map_err(|_| Error::InvalidCidrPattern(s.to_string()))
}

/// True if `ip` falls within `range`.
///
/// Ranges and addresses of different families never contain each other.
pub fn contains_address(range: &IpNet, ip: &IpAddr) -> bool {
    range.contains(ip)
}

/// True if every address of `inner` is also in `outer`.
pub fn contains_range(outer: &IpNet, inner: &IpNet) -> bool {
    outer.contains(inner)
}

/// An insertion-ordered sequence of client ranges.
///
/// Lookup is a linear scan; the first containing range wins.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct SubnetSet {
    nets: Vec<IpNet>,
}

impl SubnetSet {
    /// Create an empty set.
    pub fn new() -> Self {
        Self::default()
    }

    /// Number of ranges in the set.
    pub fn len(&self) -> usize {
        self.nets.len()
    }

    /// Check if the set holds no ranges.
    pub fn is_empty(&self) -> bool {
        self.nets.is_empty()
    }

    /// Iterate ranges in insertion order.
    pub fn iter(&self) -> impl Iterator<Item = &IpNet> {
        self.nets.iter()
    }

    /// Check if any range contains `ip`.
    pub fn exists_containing(&self, ip: &IpAddr) -> bool {
        self.nets.iter().any(|net| contains_address(net, ip))
    }

    /// First range that fully covers `net`, if any.
    pub fn parent_of(&self, net: &IpNet) -> Option<&IpNet> {
        self.nets.iter().find(|outer| contains_range(outer, net))
    }

    /// Check if some range fully covers `net`.
    pub fn covers(&self, net: &IpNet) -> bool {
        self.parent_of(net).is_some()
    }

    /// Append `net` unless an earlier range already covers it.
    pub fn insert(&mut self, net: IpNet) -> std::result::Result<(), LineError> {
        if let Some(parent) = self.parent_of(&net) {
            return Err(LineError::Overlap {
                range: net.to_string(),
                parent: parent.to_string(),
            });
        }
        self.nets.push(net);
        Ok(())
    }

    /// Parse one source line (comment already stripped) and insert it.
    pub fn insert_line(&mut self, line: &str) -> std::result::Result<(), LineError> {
        let net = parse_ip_net(line).map_err(|_| LineError::InvalidSubnet(line.trim().to_string()))?;
        self.insert(net)
    }
}

impl FromIterator<IpNet> for SubnetSet {
    fn from_iter<I: IntoIterator<Item = IpNet>>(iter: I) -> Self {
        let mut set = SubnetSet::new();
        for net in iter {
            let _ = set.insert(net);
        }
        set
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn ip(s: &str) -> IpAddr {
        s.parse().unwrap()
    }

    #[test]
    fn test_bare_address_is_singleton() {
        let v4 = parse_ip_net("192.168.0.1").unwrap();
        assert_eq!(v4.prefix_len(), 32);
        assert!(contains_address(&v4, &ip("192.168.0.1")));
        assert!(!contains_address(&v4, &ip("192.168.0.2")));

        let v6 = parse_ip_net("2001:db8::1").unwrap();
        assert_eq!(v6.prefix_len(), 128);
        assert!(contains_address(&v6, &ip("2001:db8::1")));
        assert!(!contains_address(&v6, &ip("2001:db8::2")));
    }

    #[test]
    fn test_explicit_host_prefix() {
        let net = parse_ip_net("192.168.0.1/32").unwrap();
        assert!(contains_address(&net, &ip("192.168.0.1")));
        assert!(!contains_address(&net, &ip("192.168.0.0")));
    }

    #[test]
    fn test_invalid_patterns() {
        assert!(parse_ip_net("invalid").is_err());
        assert!(parse_ip_net("192.168.1.1/33").is_err());
        assert!(parse_ip_net("2001:db8::/129").is_err());
        assert!(parse_ip_net("").is_err());
    }

    #[test]
    fn test_contains_range() {
        let outer = parse_ip_net("10.0.0.0/8").unwrap();
        let inner = parse_ip_net("10.1.0.0/16").unwrap();
        assert!(contains_range(&outer, &inner));
        assert!(!contains_range(&inner, &outer));
        assert!(contains_range(&outer, &outer));

        let v6 = parse_ip_net("::/0").unwrap();
        assert!(!contains_range(&v6, &inner));
    }

    #[test]
    fn test_mixed_families_do_not_match() {
        let net = parse_ip_net("0.0.0.0/0").unwrap();
        assert!(!contains_address(&net, &ip("::1")));
    }

    #[test]
    fn test_insert_rejects_covered_range() {
        let mut set = SubnetSet::new();
        set.insert_line("10.0.0.0/8").unwrap();
        let err = set.insert_line("10.1.2.0/24").unwrap_err();
        assert_eq!(
            err,
            LineError::Overlap {
                range: "10.1.2.0/24".to_string(),
                parent: "10.0.0.0/8".to_string(),
            }
        );
        assert_eq!(set.len(), 1);
    }

    #[test]
    fn test_wider_range_after_narrow_is_kept() {
        let mut set = SubnetSet::new();
        set.insert_line("10.1.2.0/24").unwrap();
        set.insert_line("10.0.0.0/8").unwrap();
        assert_eq!(set.len(), 2);
    }

    #[test]
    fn test_exists_containing() {
        let set: SubnetSet = ["172.21.66.0/24", "fc00::/7"]
            .iter()
            .map(|s| parse_ip_net(s).unwrap())
            .collect();

        assert!(set.exists_containing(&ip("172.21.66.10")));
        assert!(set.exists_containing(&ip("fd00::1")));
        assert!(!set.exists_containing(&ip("172.21.67.1")));
        assert!(!SubnetSet::new().exists_containing(&ip("1.1.1.1")));
    }

    #[test]
    fn test_insert_line_invalid() {
        let mut set = SubnetSet::new();
        assert_eq!(
            set.insert_line(" bogus "),
            Err(LineError::InvalidSubnet("bogus".to_string()))
        );
        assert!(set.is_empty());
    }
}
