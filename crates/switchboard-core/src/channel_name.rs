//! Channel naming convention and the hub's admission check.
//!
//! Current scheme: `{namespace}:{connection_id}`. Legacy scheme:
//! `{namespace}-{category}` (positional, no correlation id). Anything else,
//! or a foreign namespace, is rejected before the handshake starts.

use crate::address::Category;
use crate::error::NameError;
use crate::types::ConnectionId;

/// A channel name accepted by the hub's admission check.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ChannelName {
    /// Current scheme: carries the caller-chosen correlation id.
    Connection(ConnectionId),
    /// Legacy scheme: carries a category tag instead of an id.
    LegacyCategory(Category),
}

impl ChannelName {
    /// Format the current-scheme name for a connection id.
    #[must_use]
    pub fn format(namespace: &str, connection_id: ConnectionId) -> String {
        format!("{namespace}:{connection_id}")
    }

    /// Parse and validate a channel name against the hub's namespace.
    ///
    /// The namespace must not contain `:`; the legacy separator `-` may
    /// appear inside category tags, so legacy parsing is prefix-based.
    pub fn parse(name: &str, namespace: &str) -> Result<Self, NameError> {
        if name.is_empty() {
            return Err(NameError::Malformed("empty channel name".to_string()));
        }

        if let Some((ns, rest)) = name.split_once(':') {
            if ns != namespace {
                return Err(NameError::NamespaceMismatch {
                    expected: namespace.to_string(),
                    actual: ns.to_string(),
                });
            }
            let connection_id = ConnectionId::parse(rest)
                .map_err(|e| NameError::Malformed(format!("bad connection id: {e}")))?;
            return Ok(Self::Connection(connection_id));
        }

        if let Some(rest) = name.strip_prefix(namespace)
            && let Some(category) = rest.strip_prefix('-')
        {
            if category.is_empty() {
                return Err(NameError::Malformed("empty legacy category".to_string()));
            }
            return Ok(Self::LegacyCategory(Category::new(category)));
        }

        Err(NameError::NamespaceMismatch {
            expected: namespace.to_string(),
            actual: name.to_string(),
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn current_scheme_roundtrip() {
        let cid = ConnectionId::random();
        let name = ChannelName::format("app", cid);
        assert_eq!(
            ChannelName::parse(&name, "app").unwrap(),
            ChannelName::Connection(cid)
        );
    }

    #[test]
    fn legacy_scheme_parses_category() {
        let parsed = ChannelName::parse("app-devtools", "app").unwrap();
        assert_eq!(parsed, ChannelName::LegacyCategory(Category::new("devtools")));
    }

    #[test]
    fn legacy_category_may_contain_separator() {
        let parsed = ChannelName::parse("app-side-panel", "app").unwrap();
        assert_eq!(
            parsed,
            ChannelName::LegacyCategory(Category::new("side-panel"))
        );
    }

    #[test]
    fn rejects_foreign_namespace() {
        let err = ChannelName::parse("other:0011223344556677", "app").unwrap_err();
        assert!(matches!(err, NameError::NamespaceMismatch { .. }));

        let err = ChannelName::parse("other-devtools", "app").unwrap_err();
        assert!(matches!(err, NameError::NamespaceMismatch { .. }));
    }

    #[test]
    fn rejects_garbled_connection_id() {
        let err = ChannelName::parse("app:not-hex", "app").unwrap_err();
        assert!(matches!(err, NameError::Malformed(_)));
    }

    #[test]
    fn rejects_empty_name_and_empty_category() {
        assert!(matches!(
            ChannelName::parse("", "app").unwrap_err(),
            NameError::Malformed(_)
        ));
        assert!(matches!(
            ChannelName::parse("app-", "app").unwrap_err(),
            NameError::Malformed(_)
        ));
    }
}
