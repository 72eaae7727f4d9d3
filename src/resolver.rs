//! Client to substitute-address resolution over registered tables and bindings.

use arc_swap::ArcSwap;
use parking_lot::Mutex;
use serde::Serialize;
use std::net::IpAddr;
use std::sync::Arc;

use crate::binding::{BindingKind, EcsBinding};
use crate::source::{ContentFetcher, Source};
use crate::subnet::parse_ip_net;
use crate::table::EcsTable;

/// Log target used when none is injected.
pub const DEFAULT_LOG_TARGET: &str = "setecs";

/// Registry of ECS tables and bindings.
///
/// Tables and bindings are appended during configuration and never removed.
/// Each registry is an atomically swapped list, so lookups never hold a
/// registry lock while taking a table's or binding's own lock.
///
/// # Matching
///
/// A client is first looked up by its exact string form in the tables, in
/// registration order. Only if some table knows the client are the bindings
/// consulted; the first binding whose ranges contain the client supplies the
/// substitute address. Without a binding match the result is `None`.
pub struct EcsResolver {
    tables: ArcSwap<Vec<Arc<EcsTable>>>,
    bindings: ArcSwap<Vec<Arc<EcsBinding>>>,
    inline: Mutex<Option<Arc<EcsBinding>>>,
    fetcher: Arc<dyn ContentFetcher>,
    log_target: Arc<str>,
}

impl EcsResolver {
    /// Create an empty resolver using `fetcher` for URL sources.
    pub fn new(fetcher: Arc<dyn ContentFetcher>) -> Self {
        Self::with_log_target(fetcher, DEFAULT_LOG_TARGET)
    }

    /// Create an empty resolver logging under `log_target`.
    pub fn with_log_target(fetcher: Arc<dyn ContentFetcher>, log_target: &str) -> Self {
        Self {
            tables: ArcSwap::from_pointee(Vec::new()),
            bindings: ArcSwap::from_pointee(Vec::new()),
            inline: Mutex::new(None),
            fetcher,
            log_target: Arc::from(log_target),
        }
    }

    /// Log target injected into registered tables and bindings.
    pub fn log_target(&self) -> &str {
        &self.log_target
    }

    /// Append a table to the registry.
    pub fn add_table(&self, table: Arc<EcsTable>) {
        self.tables.rcu(|tables| {
            let mut tables = Vec::clone(tables);
            tables.push(table.clone());
            tables
        });
    }

    /// Append a binding to the registry.
    pub fn add_binding(&self, binding: Arc<EcsBinding>) {
        self.bindings.rcu(|bindings| {
            let mut bindings = Vec::clone(bindings);
            bindings.push(binding.clone());
            bindings
        });
    }

    /// Registered tables, in registration order.
    pub fn tables(&self) -> Vec<Arc<EcsTable>> {
        self.tables.load().to_vec()
    }

    /// Registered bindings, in registration order.
    pub fn bindings(&self) -> Vec<Arc<EcsBinding>> {
        self.bindings.load().to_vec()
    }

    /// The binding collecting inline ranges, if one was declared.
    pub fn inline_binding(&self) -> Option<Arc<EcsBinding>> {
        self.inline.lock().clone()
    }

    /// Register and load a table for each file or URL item.
    ///
    /// Items that are neither are logged and skipped.
    pub fn register_table_items<S: AsRef<str>>(&self, items: &[S]) {
        for item in items {
            let item = item.as_ref();
            let Some(source) = Source::classify(item) else {
                log::error!(target: &*self.log_target, "ecs-table format error {}", item);
                continue;
            };
            let table = Arc::new(EcsTable::new(source, self.log_target.clone()));
            if let Err(e) = table.reload(self.fetcher.as_ref()) {
                log::error!(target: &*self.log_target, "Failed to load {}: {}", table.source(), e);
            }
            self.add_table(table);
        }
    }

    /// Register client items for substitute `ecs_ip`.
    ///
    /// Files and URLs each become a loaded binding. Anything else must be an
    /// address or range and joins the single inline binding, which keeps the
    /// substitute address it was first created with. Bad items are logged and
    /// skipped.
    pub fn register_binding_items<S: AsRef<str>>(&self, ecs_ip: IpAddr, items: &[S]) {
        for item in items {
            let item = item.as_ref();
            if let Some(source) = Source::classify(item) {
                let binding = Arc::new(EcsBinding::new(ecs_ip, source, self.log_target.clone()));
                if let Err(e) = binding.reload(self.fetcher.as_ref()) {
                    log::error!(target: &*self.log_target, "Failed to load {:?}: {}", binding.kind(), e);
                }
                self.add_binding(binding);
                continue;
            }

            let net = match parse_ip_net(item) {
                Ok(net) => net,
                Err(e) => {
                    log::error!(target: &*self.log_target, "{}", e);
                    continue;
                }
            };

            let mut inline = self.inline.lock();
            let binding = match inline.as_ref() {
                Some(binding) => binding.clone(),
                None => {
                    let binding = Arc::new(EcsBinding::inline(ecs_ip, self.log_target.clone()));
                    self.add_binding(binding.clone());
                    *inline = Some(binding.clone());
                    binding
                }
            };
            drop(inline);
            binding.add_inline(net);
        }
    }

    /// First table entry for the exact client string.
    pub fn match_table(&self, client: &str) -> Option<IpAddr> {
        self.tables.load().iter().find_map(|table| table.lookup(client))
    }

    /// Substitute of the first binding containing `ip`.
    pub fn match_binding(&self, ip: &IpAddr) -> Option<IpAddr> {
        self.bindings
            .load()
            .iter()
            .find(|binding| binding.contains(ip))
            .map(|binding| binding.ecs_ip())
    }

    /// Resolve the substitute ECS address for a client.
    ///
    /// Unparsable client strings resolve to `None`.
    pub fn resolve(&self, client: &str) -> Option<IpAddr> {
        let client_ip = client.parse::<IpAddr>().ok()?;
        self.match_table(client)?;
        self.match_binding(&client_ip.to_canonical())
    }

    /// Reload every table and every sourced binding, in registration order.
    ///
    /// Failures are logged; the affected entry keeps its previous data.
    pub fn reload_all(&self) {
        for table in self.tables.load().iter() {
            if let Err(e) = table.reload(self.fetcher.as_ref()) {
                log::warn!(target: &*self.log_target, "Failed to update {}: {}", table.source(), e);
            }
        }
        for binding in self.bindings.load().iter() {
            if let BindingKind::Sourced(source) = binding.kind() {
                if let Err(e) = binding.reload(self.fetcher.as_ref()) {
                    log::warn!(target: &*self.log_target, "Failed to update {}: {}", source, e);
                }
            }
        }
    }

    /// Log every binding and table.
    pub fn dump(&self) {
        for binding in self.bindings.load().iter() {
            log::info!(target: &*self.log_target, "{}", binding);
        }
        for table in self.tables.load().iter() {
            log::info!(target: &*self.log_target, "{}", table);
        }
    }

    /// Summary of the registered state.
    pub fn snapshot(&self) -> Snapshot {
        Snapshot {
            bindings: self
                .bindings
                .load()
                .iter()
                .map(|binding| BindingSnapshot {
                    ecs_ip: binding.ecs_ip(),
                    source: match binding.kind() {
                        BindingKind::Sourced(source) => Some(source.locator()),
                        BindingKind::Inline => None,
                    },
                    clients: binding.client_count(),
                    inline: binding.inline_count(),
                })
                .collect(),
            tables: self
                .tables
                .load()
                .iter()
                .map(|table| TableSnapshot {
                    source: table.source().locator(),
                    entries: table.len(),
                })
                .collect(),
        }
    }
}

/// Serializable summary of a resolver.
#[derive(Debug, Clone, Serialize, PartialEq, Eq)]
pub struct Snapshot {
    pub bindings: Vec<BindingSnapshot>,
    pub tables: Vec<TableSnapshot>,
}

/// Summary of one binding; `source` is `None` for the inline binding.
#[derive(Debug, Clone, Serialize, PartialEq, Eq)]
pub struct BindingSnapshot {
    pub ecs_ip: IpAddr,
    pub source: Option<String>,
    pub clients: usize,
    pub inline: usize,
}

/// Summary of one table.
#[derive(Debug, Clone, Serialize, PartialEq, Eq)]
pub struct TableSnapshot {
    pub source: String,
    pub entries: usize,
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::source::testing::StaticFetcher;
    use std::io::Write;

    fn ip(s: &str) -> IpAddr {
        s.parse().unwrap()
    }

    fn resolver_with(fetcher: Arc<StaticFetcher>) -> EcsResolver {
        EcsResolver::new(fetcher)
    }

    #[test]
    fn test_table_gates_binding() {
        let fetcher = Arc::new(StaticFetcher::new());
        fetcher.serve("http://t.example/table", "10.0.0.5:203.0.113.9\n");
        let resolver = resolver_with(fetcher);

        resolver.register_table_items(&["http://t.example/table"]);
        resolver.register_binding_items(ip("203.0.113.9"), &["10.0.0.0/24"]);

        assert_eq!(resolver.resolve("10.0.0.5"), Some(ip("203.0.113.9")));
        // Inside the binding but unknown to every table.
        assert_eq!(resolver.resolve("10.0.0.6"), None);
    }

    #[test]
    fn test_binding_address_overrides_table_value() {
        let fetcher = Arc::new(StaticFetcher::new());
        fetcher.serve("http://t.example/table", "10.0.0.5:198.51.100.1\n");
        let resolver = resolver_with(fetcher);

        resolver.register_table_items(&["http://t.example/table"]);
        resolver.register_binding_items(ip("203.0.113.9"), &["10.0.0.0/24"]);

        assert_eq!(resolver.resolve("10.0.0.5"), Some(ip("203.0.113.9")));
    }

    #[test]
    fn test_table_hit_without_binding_is_none() {
        let fetcher = Arc::new(StaticFetcher::new());
        fetcher.serve("http://t.example/table", "10.0.0.5:203.0.113.9\n");
        let resolver = resolver_with(fetcher);
        resolver.register_table_items(&["http://t.example/table"]);

        assert_eq!(resolver.match_table("10.0.0.5"), Some(ip("203.0.113.9")));
        assert_eq!(resolver.resolve("10.0.0.5"), None);
    }

    #[test]
    fn test_unparsable_client_is_none() {
        let resolver = resolver_with(Arc::new(StaticFetcher::new()));
        resolver.register_binding_items(ip("1.1.1.1"), &["0.0.0.0/0"]);
        assert_eq!(resolver.resolve("not-an-ip"), None);
        assert_eq!(resolver.resolve(""), None);
    }

    #[test]
    fn test_first_binding_wins() {
        let fetcher = Arc::new(StaticFetcher::new());
        fetcher.serve("http://t.example/table", "10.0.0.5:1.1.1.1\n");
        fetcher.serve("http://b.example/wide", "10.0.0.0/8\n");
        let resolver = resolver_with(fetcher);

        resolver.register_table_items(&["http://t.example/table"]);
        resolver.register_binding_items(ip("198.51.100.1"), &["http://b.example/wide"]);
        resolver.register_binding_items(ip("198.51.100.2"), &["10.0.0.0/24"]);

        assert_eq!(resolver.resolve("10.0.0.5"), Some(ip("198.51.100.1")));
    }

    #[test]
    fn test_single_inline_binding() {
        let resolver = resolver_with(Arc::new(StaticFetcher::new()));
        resolver.register_binding_items(ip("1.1.1.1"), &["127.0.0.1", "172.21.66.0/24"]);
        resolver.register_binding_items(ip("2.2.2.2"), &["192.168.0.0/16", "bogus"]);

        let bindings = resolver.bindings();
        assert_eq!(bindings.len(), 1);
        let inline = resolver.inline_binding().unwrap();
        assert!(Arc::ptr_eq(&inline, &bindings[0]));
        assert_eq!(inline.inline_count(), 3);
        assert_eq!(inline.ecs_ip(), ip("1.1.1.1"));
        assert_eq!(resolver.match_binding(&ip("192.168.1.1")), Some(ip("1.1.1.1")));
    }

    #[test]
    fn test_sourced_bindings_registered_per_item() {
        let mut file = tempfile::NamedTempFile::new().unwrap();
        writeln!(file, "10.1.0.0/16").unwrap();
        let path = file.path().to_str().unwrap().to_string();

        let fetcher = Arc::new(StaticFetcher::new());
        fetcher.serve("http://b.example/list", "10.2.0.0/16\n");
        let resolver = resolver_with(fetcher);
        resolver.register_binding_items(ip("1.1.1.1"), &[path.as_str(), "http://b.example/list"]);

        assert_eq!(resolver.bindings().len(), 2);
        assert!(resolver.inline_binding().is_none());
        assert_eq!(resolver.match_binding(&ip("10.2.3.4")), Some(ip("1.1.1.1")));
    }

    #[test]
    fn test_bad_table_item_is_skipped() {
        let resolver = resolver_with(Arc::new(StaticFetcher::new()));
        resolver.register_table_items(&["no-such-file.txt"]);
        assert!(resolver.tables().is_empty());
    }

    #[test]
    fn test_failed_initial_fetch_still_registers() {
        let resolver = resolver_with(Arc::new(StaticFetcher::new()));
        resolver.register_table_items(&["http://t.example/down"]);
        assert_eq!(resolver.tables().len(), 1);
        assert!(resolver.tables()[0].is_empty());
    }

    #[test]
    fn test_reload_all_picks_up_changes() {
        let fetcher = Arc::new(StaticFetcher::new());
        fetcher.serve("http://t.example/table", "10.0.0.5:1.1.1.1\n");
        fetcher.serve("http://b.example/list", "10.0.0.0/24\n");
        let resolver = resolver_with(fetcher.clone());
        resolver.register_table_items(&["http://t.example/table"]);
        resolver.register_binding_items(ip("203.0.113.9"), &["http://b.example/list"]);
        assert_eq!(resolver.resolve("10.0.1.5"), None);

        fetcher.serve("http://t.example/table", "10.0.1.5:1.1.1.1\n");
        fetcher.serve("http://b.example/list", "10.0.1.0/24\n");
        resolver.reload_all();

        assert_eq!(resolver.resolve("10.0.1.5"), Some(ip("203.0.113.9")));
        assert_eq!(resolver.resolve("10.0.0.5"), None);
    }

    #[test]
    fn test_ipv4_mapped_client_matches_v4_binding() {
        let mut file = tempfile::NamedTempFile::new().unwrap();
        writeln!(file, "::ffff:10.0.0.5 # comment only, wrong field count").unwrap();
        writeln!(file, "10.0.0.5:198.51.100.1").unwrap();
        let path = file.path().to_str().unwrap().to_string();

        let resolver = resolver_with(Arc::new(StaticFetcher::new()));
        resolver.register_table_items(&[path.as_str()]);
        resolver.register_binding_items(ip("203.0.113.9"), &["10.0.0.0/24"]);

        assert_eq!(resolver.resolve("::ffff:10.0.0.5"), None);
        assert_eq!(
            resolver.match_binding(&ip("::ffff:10.0.0.5").to_canonical()),
            Some(ip("203.0.113.9"))
        );
    }

    #[test]
    fn test_snapshot() {
        let fetcher = Arc::new(StaticFetcher::new());
        fetcher.serve("http://t.example/table", "10.0.0.5:1.1.1.1\n10.0.0.6:1.1.1.1\n");
        let resolver = resolver_with(fetcher);
        resolver.register_table_items(&["http://t.example/table"]);
        resolver.register_binding_items(ip("1.1.1.1"), &["10.0.0.0/24"]);

        let snapshot = resolver.snapshot();
        assert_eq!(snapshot.tables[0].entries, 2);
        assert_eq!(snapshot.tables[0].source, "http://t.example/table");
        assert_eq!(snapshot.bindings[0].source, None);
        assert_eq!(snapshot.bindings[0].inline, 1);

        let json = serde_json::to_string(&snapshot).unwrap();
        assert!(json.contains("\"ecs_ip\":\"1.1.1.1\""));
    }
}
