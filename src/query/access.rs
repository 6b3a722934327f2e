//! Access control for queries and mirror exports.

use std::net::IpAddr;

use serde::{Deserialize, Serialize};

use crate::rpsl::Prefix;

//------------ AccessRule ----------------------------------------------------

/// A configured rule for requesters in a prefix.
#[derive(Clone, Debug, Deserialize, Eq, PartialEq, Serialize)]
pub struct AccessRule {
    pub prefix: Prefix,

    #[serde(default = "AccessRule::dflt_query")]
    pub query: bool,

    #[serde(default)]
    pub bulk_queries: bool,

    #[serde(default)]
    pub mirror_export: bool,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub max_results: Option<usize>,
}

impl AccessRule {
    fn dflt_query() -> bool {
        true
    }

    fn entry(&self) -> AccessEntry {
        AccessEntry {
            query: self.query,
            bulk_queries: self.bulk_queries,
            mirror_export: self.mirror_export,
            max_results: self.max_results,
        }
    }
}

//------------ AccessEntry ---------------------------------------------------

/// What a single requester may do.
#[derive(Clone, Copy, Debug, Eq, PartialEq)]
pub struct AccessEntry {
    pub query: bool,
    pub bulk_queries: bool,
    pub mirror_export: bool,

    /// Overrides the configured result limit.
    pub max_results: Option<usize>,
}

impl AccessEntry {
    /// Requesters not covered by any rule may query, but not use bulk
    /// queries or mirror sources.
    pub fn unlisted() -> Self {
        AccessEntry {
            query: true,
            bulk_queries: false,
            mirror_export: false,
            max_results: None,
        }
    }

    /// Unrestricted access, used for authenticated admin requests.
    pub fn unrestricted() -> Self {
        AccessEntry {
            query: true,
            bulk_queries: true,
            mirror_export: true,
            max_results: None,
        }
    }
}

//------------ AccessList ----------------------------------------------------

/// The access rules, matched on the most specific prefix.
#[derive(Clone, Debug, Default)]
pub struct AccessList {
    rules: Vec<AccessRule>,
}

impl AccessList {
    pub fn new(mut rules: Vec<AccessRule>) -> Self {
        rules.sort_by(|a, b| b.prefix.len().cmp(&a.prefix.len()));
        AccessList { rules }
    }

    pub fn entry_for(&self, addr: IpAddr) -> AccessEntry {
        let addr = match addr {
            IpAddr::V6(v6) => v6.to_ipv4_mapped().map(IpAddr::V4).unwrap_or(addr),
            IpAddr::V4(_) => addr,
        };
        self.rules
            .iter()
            .find(|rule| rule.prefix.contains_addr(addr))
            .map(AccessRule::entry)
            .unwrap_or_else(AccessEntry::unlisted)
    }
}

//------------ Tests ---------------------------------------------------------

#[cfg(test)]
mod tests {
    use std::str::FromStr;

    use super::*;

    fn rule(prefix: &str, bulk: bool, mirror: bool) -> AccessRule {
        AccessRule {
            prefix: Prefix::from_str(prefix).unwrap(),
            query: true,
            bulk_queries: bulk,
            mirror_export: mirror,
            max_results: None,
        }
    }

    #[test]
    fn most_specific_rule_wins() {
        let mut blocked = rule("192.0.2.128/25", false, false);
        blocked.query = false;
        let list = AccessList::new(vec![rule("192.0.2.0/24", true, true), blocked]);

        let entry = list.entry_for("192.0.2.1".parse().unwrap());
        assert!(entry.query && entry.bulk_queries && entry.mirror_export);

        assert!(!list.entry_for("192.0.2.200".parse().unwrap()).query);
        assert_eq!(list.entry_for("198.51.100.1".parse().unwrap()), AccessEntry::unlisted());
    }

    #[test]
    fn mapped_ipv4_addresses() {
        let list = AccessList::new(vec![rule("127.0.0.0/8", true, true)]);
        assert!(list.entry_for("::ffff:127.0.0.1".parse().unwrap()).mirror_export);
        assert!(!list.entry_for("::1".parse().unwrap()).mirror_export);
    }

    #[test]
    fn rule_defaults() {
        let rule: AccessRule = toml::from_str("prefix = \"2001:db8::/32\"").unwrap();
        assert!(rule.query);
        assert!(!rule.bulk_queries);
        assert!(!rule.mirror_export);
    }
}
