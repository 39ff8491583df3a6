//! Key layout of the Redis substrate.

use relay_core::CorrelationId;

/// Builds the keys gateways and workers agree on.
///
/// Without a namespace the layout is:
///
/// | Key                     | Type    | Purpose                          |
/// |-------------------------|---------|----------------------------------|
/// | `request_counter`       | integer | correlation id source            |
/// | `agent_requests`        | list    | pending requests, FIFO           |
/// | `agent_pending:<id>`    | string  | waiter registration, with TTL    |
/// | `agent_responses:<id>`  | list    | single-use response slot         |
///
/// With a namespace every key is prefixed by `<namespace>:`.
#[derive(Debug, Clone, PartialEq, Eq, Default)]
pub struct Keys {
    prefix: String,
}

impl Keys {
    /// Key layout under an optional namespace. Blank namespaces are ignored.
    #[must_use]
    pub fn new(namespace: Option<&str>) -> Self {
        let prefix = match namespace.map(str::trim) {
            Some(ns) if !ns.is_empty() => format!("{ns}:"),
            _ => String::new(),
        };
        Self { prefix }
    }

    /// Id counter.
    #[must_use]
    pub fn counter(&self) -> String {
        format!("{}request_counter", self.prefix)
    }

    /// Request queue.
    #[must_use]
    pub fn queue(&self) -> String {
        format!("{}agent_requests", self.prefix)
    }

    /// Response slot for `id`.
    #[must_use]
    pub fn slot(&self, id: CorrelationId) -> String {
        format!("{}agent_responses:{id}", self.prefix)
    }

    /// Waiter registration for `id`.
    #[must_use]
    pub fn pending(&self, id: CorrelationId) -> String {
        format!("{}agent_pending:{id}", self.prefix)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn default_layout_matches_legacy_keys() {
        let keys = Keys::new(None);
        let id = CorrelationId::new(42);
        assert_eq!(keys.counter(), "request_counter");
        assert_eq!(keys.queue(), "agent_requests");
        assert_eq!(keys.slot(id), "agent_responses:42");
        assert_eq!(keys.pending(id), "agent_pending:42");
    }

    #[test]
    fn namespace_prefixes_every_key() {
        let keys = Keys::new(Some("staging"));
        let id = CorrelationId::new(7);
        assert_eq!(keys.counter(), "staging:request_counter");
        assert_eq!(keys.queue(), "staging:agent_requests");
        assert_eq!(keys.slot(id), "staging:agent_responses:7");
        assert_eq!(keys.pending(id), "staging:agent_pending:7");
    }

    #[test]
    fn blank_namespace_is_ignored() {
        assert_eq!(Keys::new(Some("  ")), Keys::new(None));
    }
}
