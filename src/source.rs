//! Content sources for client lists and ECS tables.
//!
//! A source is either a local file or a remote URL. Both share one loading
//! protocol:
//! - skip the reparse when the source is unchanged since the last load
//!   (same mtime and size for files, same content hash for URLs)
//! - strip `#` comments, parse line by line, log and skip bad lines
//! - hand back a complete replacement for the caller to swap in
//!
//! Transport failures (unreadable file, failed fetch) abort the load and leave
//! the caller's previous data untouched.

use once_cell::sync::Lazy;
use regex::Regex;
use std::fmt;
use std::fs::File;
use std::hash::Hasher;
use std::io::{BufRead, BufReader};
use std::path::{Path, PathBuf};
use std::time::{Duration, Instant, SystemTime};

use crate::error::{Error, LineError, Result};

/// Timeout for a single remote fetch.
pub const FETCH_TIMEOUT: Duration = Duration::from_secs(5);

static URL_PATTERN: Lazy<Regex> = Lazy::new(|| {
    Regex::new(r"^(?i)(https?|ftp)://([0-9a-z]+(:[^@/\s]*)?@)?[0-9a-z\[\]:._-]+(:\d{1,5})?(/[^\s]*)?$")
        .expect("static URL pattern")
});

/// Check if a string looks like a URL we can fetch.
pub fn is_url(s: &str) -> bool {
    URL_PATTERN.is_match(s)
}

/// Check if a path names an existing regular file.
pub fn file_exists(path: impl AsRef<Path>) -> bool {
    path.as_ref().metadata().map(|m| !m.is_dir()).unwrap_or(false)
}

/// Where a list is loaded from.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Source {
    /// Local file
    File(PathBuf),
    /// Remote URL
    Url(String),
}

impl Source {
    /// Classify an operator-supplied item.
    ///
    /// Existing files win over URLs. Returns `None` for anything else.
    pub fn classify(item: &str) -> Option<Self> {
        if file_exists(item) {
            Some(Source::File(PathBuf::from(item)))
        } else if is_url(item) {
            Some(Source::Url(item.to_string()))
        } else {
            None
        }
    }

    /// Human readable locator (path or URL).
    pub fn locator(&self) -> String {
        match self {
            Source::File(path) => path.display().to_string(),
            Source::Url(url) => url.clone(),
        }
    }
}

impl fmt::Display for Source {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Source::File(path) => write!(f, "file:{}", path.display()),
            Source::Url(url) => write!(f, "{}", url),
        }
    }
}

/// Change-detection state recorded by the last successful load.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum ContentMeta {
    /// Never loaded, or the last stat failed
    #[default]
    Unloaded,
    /// File modification time and size
    File { modified: SystemTime, size: u64 },
    /// Hash of the fetched body
    Url { hash: u64 },
}

/// Fetches the full body of a remote source.
pub trait ContentFetcher: Send + Sync {
    /// Return the body, or an error for transport failures and non-success statuses.
    fn fetch(&self, url: &str) -> Result<Vec<u8>>;
}

/// Blocking HTTP(S) fetcher.
///
/// GET with a 5 second timeout, no proxy and certificate validation
/// disabled. Only 200 and 201 count as success.
pub struct HttpFetcher {
    client: reqwest::blocking::Client,
}

impl HttpFetcher {
    /// Create a fetcher with the default timeout.
    pub fn new() -> Result<Self> {
        Self::with_timeout(FETCH_TIMEOUT)
    }

    /// Create a fetcher with a custom timeout.
    pub fn with_timeout(timeout: Duration) -> Result<Self> {
        let client = reqwest::blocking::Client::builder()
            .timeout(timeout)
            .no_proxy()
            .danger_accept_invalid_certs(true)
            .build()?;
        Ok(Self { client })
    }
}

impl ContentFetcher for HttpFetcher {
    fn fetch(&self, url: &str) -> Result<Vec<u8>> {
        let response = self.client.get(url).send()?;
        let status = response.status();
        let body = response.bytes()?;
        if status != reqwest::StatusCode::OK && status != reqwest::StatusCode::CREATED {
            return Err(Error::HttpStatus {
                status: status.as_u16(),
                url: url.to_string(),
            });
        }
        Ok(body.to_vec())
    }
}

/// Per-line parser producing one kind of loaded structure.
pub trait LineParser {
    /// Structure built from a whole source.
    type Output: Default;

    /// Parse one comment-stripped, trimmed, non-empty line into `out`.
    fn parse_line(out: &mut Self::Output, line: &str) -> std::result::Result<(), LineError>;

    /// Number of entries held by `out`.
    fn entries(out: &Self::Output) -> usize;
}

/// Result of a load that actually reparsed its source.
#[derive(Debug)]
pub struct Loaded<T> {
    /// Freshly built structure
    pub data: T,
    /// Change-detection state to store alongside `data`
    pub meta: ContentMeta,
    /// Lines seen, including blank and rejected ones
    pub total_lines: u64,
    /// Lines rejected by the parser
    pub rejected: u64,
}

/// Remove everything from the first `#` onward.
pub fn strip_comment(line: &str) -> &str {
    match line.find('#') {
        Some(idx) => &line[..idx],
        None => line,
    }
}

/// Accumulates parsed lines for one pass.
struct LineSink<'a, P: LineParser> {
    out: P::Output,
    total_lines: u64,
    rejected: u64,
    target: &'a str,
}

impl<'a, P: LineParser> LineSink<'a, P> {
    fn new(target: &'a str) -> Self {
        Self {
            out: P::Output::default(),
            total_lines: 0,
            rejected: 0,
            target,
        }
    }

    fn push(&mut self, raw: &str) {
        self.total_lines += 1;
        let line = strip_comment(raw).trim();
        if line.is_empty() {
            return;
        }
        if let Err(e) = P::parse_line(&mut self.out, line) {
            self.rejected += 1;
            match e {
                LineError::Overlap { .. } => log::warn!(target: self.target, "{}", e),
                _ => log::error!(target: self.target, "skipping line {:?}: {}", line, e),
            }
        }
    }

    fn finish(self, meta: ContentMeta) -> Loaded<P::Output> {
        Loaded {
            data: self.out,
            meta,
            total_lines: self.total_lines,
            rejected: self.rejected,
        }
    }
}

/// Load `source` unless it is unchanged relative to `previous`.
///
/// Returns `Ok(None)` when the source was skipped as unchanged.
pub fn load<P: LineParser>(
    source: &Source,
    previous: ContentMeta,
    fetcher: &dyn ContentFetcher,
    target: &str,
) -> Result<Option<Loaded<P::Output>>> {
    match source {
        Source::File(path) => load_file::<P>(path, previous, target),
        Source::Url(url) => load_url::<P>(url, previous, fetcher, target),
    }
}

/// Load a local file, skipping the parse when mtime and size are unchanged.
pub fn load_file<P: LineParser>(
    path: &Path,
    previous: ContentMeta,
    target: &str,
) -> Result<Option<Loaded<P::Output>>> {
    let file = File::open(path)?;

    let meta = match file.metadata().and_then(|m| Ok((m.modified()?, m.len()))) {
        Ok((modified, size)) => ContentMeta::File { modified, size },
        Err(e) => {
            // Parse anyway; an unknown stat never matches next time.
            log::warn!(target: target, "stat {} failed: {}", path.display(), e);
            ContentMeta::Unloaded
        }
    };
    if meta != ContentMeta::Unloaded && meta == previous {
        return Ok(None);
    }

    let started = Instant::now();
    let mut sink = LineSink::<P>::new(target);
    let mut reader = BufReader::new(file);
    let mut buf = Vec::new();
    loop {
        buf.clear();
        if reader.read_until(b'\n', &mut buf)? == 0 {
            break;
        }
        sink.push(&String::from_utf8_lossy(&buf));
    }

    let loaded = sink.finish(meta);
    log::debug!(
        target: target,
        "Parsed {} time spent: {:?} added: {} / {}",
        path.display(),
        started.elapsed(),
        P::entries(&loaded.data),
        loaded.total_lines
    );
    Ok(Some(loaded))
}

/// Fetch a remote source, skipping the parse when the body hash is unchanged.
pub fn load_url<P: LineParser>(
    url: &str,
    previous: ContentMeta,
    fetcher: &dyn ContentFetcher,
    target: &str,
) -> Result<Option<Loaded<P::Output>>> {
    let started = Instant::now();
    let body = fetcher.fetch(url)?;
    let fetch_time = started.elapsed();

    let hash = content_hash(&body);
    let meta = ContentMeta::Url { hash };
    if meta == previous {
        return Ok(None);
    }

    let started = Instant::now();
    let mut sink = LineSink::<P>::new(target);
    for line in String::from_utf8_lossy(&body).split('\n') {
        sink.push(line);
    }

    let loaded = sink.finish(meta);
    log::debug!(
        target: target,
        "Fetched {}, time spent: {:?} {:?}, added: {} / {}, hash: {:#x}",
        url,
        fetch_time,
        started.elapsed(),
        P::entries(&loaded.data),
        loaded.total_lines,
        hash
    );
    Ok(Some(loaded))
}

/// 64-bit hash of a fetched body.
pub fn content_hash(body: &[u8]) -> u64 {
    let mut hasher = ahash::AHasher::default();
    hasher.write(body);
    hasher.finish()
}
