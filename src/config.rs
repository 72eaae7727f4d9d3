//! Parsing of the `setecs` configuration block.
//!
//! ```text
//! setecs {
//!     ecs-binding 1.1.1.1 clients 127.0.0.1 172.21.66.0/24 /etc/clients.txt
//!     ecs-table /etc/ecs-tables.txt https://example.com/tables.txt
//!     reload 10s
//!     debug
//! }
//! ```
//!
//! The surrounding `setecs { }` is optional. Unknown directives are ignored.

use once_cell::sync::Lazy;
use regex::Regex;
use std::net::IpAddr;
use std::time::Duration;

use crate::error::{Error, Result};
use crate::source::strip_comment;

/// Name of the configuration block.
pub const BLOCK_NAME: &str = "setecs";

static DURATION_PATTERN: Lazy<Regex> = Lazy::new(|| {
    Regex::new(r"^(?:(?:[0-9]+(?:\.[0-9]*)?|\.[0-9]+)(?:ns|us|µs|μs|ms|s|m|h))+$")
        .expect("static duration pattern")
});

static DURATION_COMPONENT: Lazy<Regex> = Lazy::new(|| {
    Regex::new(r"([0-9]+(?:\.[0-9]*)?|\.[0-9]+)(ns|us|µs|μs|ms|s|m|h)")
        .expect("static duration component pattern")
});

/// One `ecs-binding` directive.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct BindingDirective {
    /// Substitute address for every client item
    pub ecs_ip: IpAddr,
    /// Client items: addresses, ranges, files or URLs
    pub clients: Vec<String>,
}

/// Parsed `setecs` configuration.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct SetEcsConfig {
    /// `ecs-binding` directives, in order
    pub bindings: Vec<BindingDirective>,
    /// Items of each `ecs-table` directive, in order
    pub tables: Vec<Vec<String>>,
    /// Refresh interval; zero disables refreshing
    pub reload: Duration,
    /// Dump the loaded state after setup
    pub debug: bool,
}

impl SetEcsConfig {
    /// Parse configuration text.
    pub fn parse(text: &str) -> Result<Self> {
        let mut config = SetEcsConfig::default();
        let mut blocks = 0;
        let mut in_block = false;

        for (idx, raw) in text.lines().enumerate() {
            let line_no = idx + 1;
            let tokens: Vec<&str> = strip_comment(raw).split_whitespace().collect();
            let Some((&head, args)) = tokens.split_first() else {
                continue;
            };

            match head {
                BLOCK_NAME => {
                    if blocks > 0 {
                        return Err(config_error(line_no, "setecs can only be used once"));
                    }
                    blocks += 1;
                    match args {
                        [] => {}
                        ["{"] => in_block = true,
                        _ => return Err(config_error(line_no, "setecs takes no arguments")),
                    }
                }
                "}" if in_block && args.is_empty() => in_block = false,
                "}" => return Err(config_error(line_no, "unexpected '}'")),
                _ => config.apply_directive(line_no, head, args)?,
            }
        }

        if in_block {
            return Err(Error::Config("unterminated setecs block".to_string()));
        }
        Ok(config)
    }

    fn apply_directive(&mut self, line_no: usize, name: &str, args: &[&str]) -> Result<()> {
        match name {
            "ecs-binding" => {
                if args.len() < 3 || args[1] != "clients" {
                    return Err(config_error(
                        line_no,
                        "format is `ecs-binding <ip> clients [ip(cidr) | filepath | url ...]`",
                    ));
                }
                let ecs_ip = args[0]
                    .parse::<IpAddr>()
                    .map_err(|_| Error::InvalidIpAddress(args[0].to_string()))?;
                self.bindings.push(BindingDirective {
                    ecs_ip,
                    clients: args[2..].iter().map(|s| s.to_string()).collect(),
                });
            }
            "ecs-table" => {
                if args.is_empty() {
                    return Err(config_error(line_no, "format is `ecs-table [filepath | url ...]`"));
                }
                self.tables.push(args.iter().map(|s| s.to_string()).collect());
            }
            "reload" => {
                let [value] = args else {
                    return Err(config_error(
                        line_no,
                        "reload needs a duration (zero seconds to disable)",
                    ));
                };
                self.reload = parse_duration(value)?;
            }
            "debug" => self.debug = true,
            other => log::debug!(target: BLOCK_NAME, "ignoring unknown setecs directive {:?}", other),
        }
        Ok(())
    }
}

impl std::str::FromStr for SetEcsConfig {
    type Err = Error;

    fn from_str(s: &str) -> Result<Self> {
        Self::parse(s)
    }
}

fn config_error(line_no: usize, msg: &str) -> Error {
    Error::Config(format!("line {}: {}", line_no, msg))
}

fn unit_nanos(unit: &str) -> f64 {
    match unit {
        "ns" => 1.0,
        "us" | "µs" | "μs" => 1e3,
        "ms" => 1e6,
        "s" => 1e9,
        "m" => 60e9,
        _ => 3600e9,
    }
}

/// Parse a duration such as `300ms`, `10s`, `1m30s` or `2h`.
///
/// A bare `0` is accepted. Negative durations are rejected with
/// [`Error::NegativeDuration`].
pub fn parse_duration(s: &str) -> Result<Duration> {
    let (negative, body) = match s.as_bytes().first() {
        Some(b'-') => (true, &s[1..]),
        Some(b'+') => (false, &s[1..]),
        _ => (false, s),
    };

    let nanos = if body == "0" {
        0.0
    } else if DURATION_PATTERN.is_match(body) {
        DURATION_COMPONENT
            .captures_iter(body)
            .map(|caps| {
                let value: f64 = caps[1].parse().unwrap_or(0.0);
                value * unit_nanos(&caps[2])
            })
            .sum()
    } else {
        return Err(Error::InvalidDuration(s.to_string()));
    };

    if !nanos.is_finite() || nanos > u64::MAX as f64 {
        return Err(Error::InvalidDuration(s.to_string()));
    }
    if negative && nanos > 0.0 {
        return Err(Error::NegativeDuration(s.to_string()));
    }
    Ok(Duration::from_nanos(nanos.round() as u64))
}
