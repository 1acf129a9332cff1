//! Discovered node addresses and membership diffing.

use std::collections::{BTreeSet, HashSet};
use std::fmt;
use std::str::FromStr;

use crate::error::{DiscoveryError, DiscoveryResult};

/// One reachable node address.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct Entry {
    pub host: String,
    pub port: String,
}

impl Entry {
    pub fn new(host: impl Into<String>, port: impl Into<String>) -> Self {
        Self {
            host: host.into(),
            port: port.into(),
        }
    }

    /// Parse `host:port` (or `[v6]:port`). The port is mandatory.
    pub fn parse(addr: &str) -> DiscoveryResult<Self> {
        let addr = addr.trim();
        let invalid = |reason: &str| DiscoveryError::InvalidEntry(addr.to_string(), reason.to_string());

        let (host, port) = if let Some(rest) = addr.strip_prefix('[') {
            let (host, port) = rest
                .split_once("]:")
                .ok_or_else(|| invalid("expected [host]:port"))?;
            (host, port)
        } else {
            let (host, port) = addr.rsplit_once(':').ok_or_else(|| invalid("missing port"))?;
            if host.contains(':') {
                return Err(invalid("IPv6 hosts must be bracketed"));
            }
            (host, port)
        };

        if host.is_empty() {
            return Err(invalid("missing host"));
        }
        if port.parse::<u16>().is_err() {
            return Err(invalid("port must be a number between 0 and 65535"));
        }

        Ok(Self::new(host, port))
    }
}

impl fmt::Display for Entry {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        if self.host.contains(':') {
            write!(f, "[{}]:{}", self.host, self.port)
        } else {
            write!(f, "{}:{}", self.host, self.port)
        }
    }
}

impl FromStr for Entry {
    type Err = DiscoveryError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Entry::parse(s)
    }
}

/// Parse a list of addresses, expanding ranges like `10.0.0.[1:3]:2375`.
///
/// Blank items are skipped.
pub fn parse_entries<S: AsRef<str>>(addrs: &[S]) -> DiscoveryResult<Vec<Entry>> {
    let mut entries = Vec::with_capacity(addrs.len());
    for addr in addrs {
        let addr = addr.as_ref().trim();
        if addr.is_empty() {
            continue;
        }
        for expanded in expand_range(addr)? {
            entries.push(Entry::parse(&expanded)?);
        }
    }
    Ok(entries)
}

/// Largest number of addresses a single range may expand to.
pub const MAX_RANGE_LEN: u32 = 65_536;

/// Expand a single `[start:end]` numeric range in an address.
///
/// A leading `[` is an IPv6 bracket, not a range.
fn expand_range(addr: &str) -> DiscoveryResult<Vec<String>> {
    let Some((open, _)) = addr.char_indices().skip(1).find(|&(_, c)| c == '[') else {
        return Ok(vec![addr.to_string()]);
    };
    let invalid = |reason: &str| DiscoveryError::InvalidEntry(addr.to_string(), reason.to_string());

    let close = addr[open..]
        .find(']')
        .map(|i| i + open)
        .ok_or_else(|| invalid("unterminated range"))?;
    let (start, end) = addr[open + 1..close]
        .split_once(':')
        .ok_or_else(|| invalid("range must be [start:end]"))?;
    let start: u32 = start.parse().map_err(|_| invalid("range start is not a number"))?;
    let end: u32 = end.parse().map_err(|_| invalid("range end is not a number"))?;
    if start > end {
        return Err(invalid("range start is greater than range end"));
    }
    if end - start >= MAX_RANGE_LEN {
        return Err(invalid(&format!("range expands to more than {MAX_RANGE_LEN} addresses")));
    }

    let (prefix, suffix) = (&addr[..open], &addr[close + 1..]);
    Ok((start..=end).map(|n| format!("{prefix}{n}{suffix}")).collect())
}

/// Result of comparing a new membership snapshot with the previous one.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct MembershipDiff {
    /// Present in the new snapshot, absent from the previous one.
    pub added: BTreeSet<String>,
    /// Present in the previous snapshot, absent from the new one.
    pub removed: BTreeSet<String>,
    /// The new snapshot's addresses; the next call's `previous`.
    pub current: HashSet<String>,
}

impl MembershipDiff {
    /// True when membership did not change.
    pub fn is_empty(&self) -> bool {
        self.added.is_empty() && self.removed.is_empty()
    }
}

/// Diff a new snapshot against the previous address set.
///
/// Each address of `new` is consumed from `previous`; whatever is left
/// over was removed.
pub fn diff(new: &[Entry], previous: &HashSet<String>) -> MembershipDiff {
    let mut remaining = previous.clone();
    let mut added = BTreeSet::new();
    let mut current = HashSet::with_capacity(new.len());

    for entry in new {
        let addr = entry.to_string();
        if !remaining.remove(&addr) && !current.contains(&addr) {
            added.insert(addr.clone());
        }
        current.insert(addr);
    }

    MembershipDiff {
        added,
        removed: remaining.into_iter().collect(),
        current,
    }
}
