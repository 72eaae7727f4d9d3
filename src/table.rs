//! ECS tables: exact client address to substitute address.

use ahash::AHashMap;
use parking_lot::RwLock;
use std::fmt;
use std::net::IpAddr;
use std::sync::Arc;

use crate::error::{LineError, Result};
use crate::source::{self, ContentFetcher, ContentMeta, LineParser, Source};

/// Entries shown in the debug dump.
const PREVIEW_LIMIT: usize = 5;

/// Parses `client:substitute` lines into a dictionary.
///
/// The client key is kept exactly as written, so a field padded with
/// whitespace is rejected. Later lines overwrite earlier ones.
pub struct TableLines;

impl LineParser for TableLines {
    type Output = AHashMap<String, IpAddr>;

    fn parse_line(
        out: &mut AHashMap<String, IpAddr>,
        line: &str,
    ) -> std::result::Result<(), LineError> {
        let fields: Vec<&str> = line.split(':').collect();
        if fields.len() != 2 {
            return Err(LineError::FieldCount(fields.len()));
        }
        let key = fields[0];
        if key.parse::<IpAddr>().is_err() {
            return Err(LineError::InvalidKey(key.to_string()));
        }
        let value = fields[1];
        let ecs_ip = value
            .parse::<IpAddr>()
            .map_err(|_| LineError::InvalidSubstitute(value.to_string()))?;
        out.insert(key.to_string(), ecs_ip);
        Ok(())
    }

    fn entries(out: &AHashMap<String, IpAddr>) -> usize {
        out.len()
    }
}

#[derive(Default)]
struct TableState {
    dict: AHashMap<String, IpAddr>,
    meta: ContentMeta,
}

/// Exact-match dictionary refreshed from a file or URL.
pub struct EcsTable {
    source: Source,
    state: RwLock<TableState>,
    log_target: Arc<str>,
}

impl EcsTable {
    /// Create a table refreshed from `source`. Nothing is loaded yet.
    pub fn new(source: Source, log_target: Arc<str>) -> Self {
        Self {
            source,
            state: RwLock::new(TableState::default()),
            log_target,
        }
    }

    /// Source this table is refreshed from.
    pub fn source(&self) -> &Source {
        &self.source
    }

    /// Look up the substitute for the exact client string.
    pub fn lookup(&self, client: &str) -> Option<IpAddr> {
        self.state.read().dict.get(client).copied()
    }

    /// Number of entries.
    pub fn len(&self) -> usize {
        self.state.read().dict.len()
    }

    /// Check if the table holds no entries.
    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Change-detection state of the last load.
    pub fn meta(&self) -> ContentMeta {
        self.state.read().meta
    }

    /// Reload the dictionary from the source.
    ///
    /// Returns `Ok(true)` if the dictionary was replaced. On error the
    /// previous dictionary is kept.
    pub fn reload(&self, fetcher: &dyn ContentFetcher) -> Result<bool> {
        let previous = self.state.read().meta;
        let Some(loaded) =
            source::load::<TableLines>(&self.source, previous, fetcher, &*self.log_target)?
        else {
            return Ok(false);
        };

        let mut state = self.state.write();
        state.dict = loaded.data;
        state.meta = loaded.meta;
        Ok(true)
    }
}

impl fmt::Display for EcsTable {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let state = self.state.read();
        write!(f, "ecsTable:{{")?;
        for (i, (client, ecs_ip)) in state.dict.iter().enumerate() {
            if i >= PREVIEW_LIMIT {
                write!(f, "......")?;
                break;
            }
            write!(f, "{}:{},", client, ecs_ip)?;
        }
        write!(f, "}}")
    }
}

impl fmt::Debug for EcsTable {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("EcsTable")
            .field("source", &self.source)
            .field("entries", &self.len())
            .finish()
    }
}
