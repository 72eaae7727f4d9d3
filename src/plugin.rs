//! The `setecs` query handler: resolver, rewriter and refresh lifecycle.

use hickory_proto::op::Message;
use parking_lot::Mutex;
use std::sync::Arc;
use std::time::Duration;

use crate::config::SetEcsConfig;
use crate::error::Result;
use crate::resolver::EcsResolver;
use crate::rewrite::{rewrite_query, EcsStrippingWriter, ResponseWriter};
use crate::scheduler::RefreshScheduler;
use crate::source::ContentFetcher;

/// Per-query ECS rewriting over a configured resolver.
///
/// # Example
///
/// ```no_run
/// use setecs::{HttpFetcher, SetEcs, SetEcsConfig};
/// use std::sync::Arc;
///
/// let config = SetEcsConfig::parse("ecs-binding 1.1.1.1 clients 10.0.0.0/8")?;
/// let setecs = SetEcs::from_config(&config, Arc::new(HttpFetcher::new()?));
/// setecs.on_startup()?;
/// # Ok::<(), setecs::Error>(())
/// ```
pub struct SetEcs {
    resolver: Arc<EcsResolver>,
    reload: Duration,
    debug: bool,
    scheduler: Mutex<Option<RefreshScheduler>>,
}

impl SetEcs {
    /// Handler name.
    pub const NAME: &'static str = "setecs";

    /// Build the resolver from `config` and load every source once.
    ///
    /// Source failures are logged; the affected table or binding starts empty.
    pub fn from_config(config: &SetEcsConfig, fetcher: Arc<dyn ContentFetcher>) -> Self {
        let resolver = Arc::new(EcsResolver::with_log_target(fetcher, Self::NAME));
        for binding in &config.bindings {
            resolver.register_binding_items(binding.ecs_ip, &binding.clients);
        }
        for items in &config.tables {
            resolver.register_table_items(items);
        }

        let setecs = Self {
            resolver,
            reload: config.reload,
            debug: config.debug,
            scheduler: Mutex::new(None),
        };
        if setecs.debug {
            setecs.dump();
        }
        setecs
    }

    /// Parse configuration text and build the handler.
    pub fn from_text(text: &str, fetcher: Arc<dyn ContentFetcher>) -> Result<Self> {
        let config = SetEcsConfig::parse(text)?;
        Ok(Self::from_config(&config, fetcher))
    }

    /// The underlying resolver.
    pub fn resolver(&self) -> &Arc<EcsResolver> {
        &self.resolver
    }

    /// Refresh interval; zero means refreshing is disabled.
    pub fn reload(&self) -> Duration {
        self.reload
    }

    /// Check if the debug dump is enabled.
    pub fn debug(&self) -> bool {
        self.debug
    }

    /// Rewrite `request` for `client_ip` and wrap the response writer.
    ///
    /// When a substitute applies the request carries the synthesized ECS
    /// option. The returned writer removes ECS from the response if the
    /// request had none of its own. Otherwise both pass through unchanged.
    pub fn handle<W: ResponseWriter>(
        &self,
        client_ip: &str,
        request: &mut Message,
        writer: W,
    ) -> EcsStrippingWriter<W> {
        let rewrite = rewrite_query(request, self.resolver.resolve(client_ip));
        if let Some(ecs_ip) = rewrite.ecs_ip {
            log::trace!(target: Self::NAME, "client {} -> ecs {}", client_ip, ecs_ip);
        }
        EcsStrippingWriter::new(writer, rewrite.strip_response_ecs)
    }

    /// Start periodic refreshing if an interval is configured.
    ///
    /// Calling this while refreshing is already running is a no-op.
    pub fn on_startup(&self) -> Result<()> {
        let mut scheduler = self.scheduler.lock();
        if scheduler.is_none() {
            *scheduler = RefreshScheduler::start(self.resolver.clone(), self.reload)?;
        }
        Ok(())
    }

    /// Stop periodic refreshing.
    pub fn on_shutdown(&self) {
        let scheduler = self.scheduler.lock().take();
        if let Some(mut scheduler) = scheduler {
            scheduler.stop();
        }
    }

    /// Check if periodic refreshing is running.
    pub fn is_refreshing(&self) -> bool {
        self.scheduler.lock().is_some()
    }

    /// Log every binding and table, then the refresh interval.
    pub fn dump(&self) {
        self.resolver.dump();
        log::info!(target: Self::NAME, "reload {:?}", self.reload);
    }
}

impl std::fmt::Debug for SetEcs {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("SetEcs")
            .field("bindings", &self.resolver.bindings().len())
            .field("tables", &self.resolver.tables().len())
            .field("reload", &self.reload)
            .field("debug", &self.debug)
            .finish()
    }
}
