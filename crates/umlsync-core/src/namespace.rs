//! Logical endpoints exposing the relay protocol.

use std::fmt;

/// An endpoint through which a client reached the relay.
///
/// Both namespaces share one router; the namespace only labels logs and
/// metrics.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Namespace {
    /// The general-purpose endpoint.
    Default,
    /// The dedicated diagram sync endpoint.
    Sync,
}

impl Namespace {
    /// Every namespace, in binding order.
    pub const ALL: [Namespace; 2] = [Namespace::Default, Namespace::Sync];

    /// Get the namespace label.
    #[must_use]
    pub fn as_str(&self) -> &'static str {
        match self {
            Namespace::Default => "default",
            Namespace::Sync => "sync",
        }
    }
}

impl fmt::Display for Namespace {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}
