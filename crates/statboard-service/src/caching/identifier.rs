use std::fmt;

use uuid::Uuid;

/// All known snapshot data kinds.
///
/// Each kind corresponds to one logical JSON artifact served to the dashboard, optionally
/// scoped to a single game server via a discriminator.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DataKind {
    Players,
    Sessions,
    Servers,
    Kills,
    PingTable,
    GraphOnline,
    GraphPerformance,
    GraphPlayerbase,
    ServerOverview,
    OnlineOverview,
    SessionsOverview,
    PlayerbaseOverview,
    PerformanceOverview,
    PvpPve,
    ExtensionNav,
    ExtensionTabs,
    Query,
}

impl AsRef<str> for DataKind {
    fn as_ref(&self) -> &str {
        match self {
            Self::Players => "players",
            Self::Sessions => "sessions",
            Self::Servers => "servers",
            Self::Kills => "kills",
            Self::PingTable => "ping_table",
            Self::GraphOnline => "graph_online",
            Self::GraphPerformance => "graph_performance",
            Self::GraphPlayerbase => "graph_playerbase",
            Self::ServerOverview => "server_overview",
            Self::OnlineOverview => "online_overview",
            Self::SessionsOverview => "sessions_overview",
            Self::PlayerbaseOverview => "playerbase_overview",
            Self::PerformanceOverview => "performance_overview",
            Self::PvpPve => "pvp_pve",
            Self::ExtensionNav => "extension_nav",
            Self::ExtensionTabs => "extension_tabs",
            Self::Query => "query",
        }
    }
}

impl fmt::Display for DataKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.as_ref())
    }
}

impl DataKind {
    /// Creates the identifier for the unscoped variant of this kind.
    pub fn global(self) -> Identifier {
        Identifier(self.as_ref().to_owned())
    }

    /// Creates the identifier for this kind scoped to a single game server.
    pub fn for_server(self, server: Uuid) -> Identifier {
        Identifier(format!("{}-{}", self.as_ref(), server))
    }

    /// Creates the identifier for this kind with an arbitrary discriminator, e.g. a query
    /// hash or an extension tab name.
    ///
    /// The discriminator must not consist of digits only: the final all-digit segment of a
    /// store filename is the generation timestamp, so an all-digit discriminator could not
    /// be parsed back out unambiguously.
    pub fn with_discriminator(self, discriminator: &str) -> Identifier {
        debug_assert!(
            !discriminator.bytes().all(|b| b.is_ascii_digit()),
            "all-digit discriminators are ambiguous with timestamps"
        );
        Identifier(format!("{}-{}", self.as_ref(), discriminator))
    }
}

/// An opaque string naming one logical cached artifact.
///
/// The string is either a bare [`DataKind`] tag, or `tag-discriminator`. Kind tags use
/// underscores internally, so the first `-` always separates the tag from its
/// discriminator.
#[derive(Debug, Clone, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct Identifier(String);

impl Identifier {
    pub fn as_str(&self) -> &str {
        &self.0
    }

    /// Whether this identifier belongs to the given data kind, either unscoped or with any
    /// discriminator.
    pub fn has_kind(&self, kind: DataKind) -> bool {
        identifier_has_kind(&self.0, kind)
    }
}

impl fmt::Display for Identifier {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

/// Kind check on a raw identifier string, used when the identifier comes out of a store
/// filename rather than an [`Identifier`] value.
pub(super) fn identifier_has_kind(identifier: &str, kind: DataKind) -> bool {
    let tag = kind.as_ref();
    identifier == tag
        || (identifier.starts_with(tag) && identifier.as_bytes().get(tag.len()) == Some(&b'-'))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_identifier_kinds() {
        let server = Uuid::new_v4();

        assert!(DataKind::Sessions.global().has_kind(DataKind::Sessions));
        assert!(DataKind::Sessions.for_server(server).has_kind(DataKind::Sessions));
        assert!(!DataKind::Sessions.for_server(server).has_kind(DataKind::Players));

        // `sessions_overview` must not be mistaken for the `sessions` kind
        assert!(!DataKind::SessionsOverview.global().has_kind(DataKind::Sessions));
        assert!(
            !DataKind::SessionsOverview
                .for_server(server)
                .has_kind(DataKind::Sessions)
        );
    }

    #[test]
    fn test_discriminators_do_not_collide() {
        let a = DataKind::Query.with_discriminator("a1b2");
        let b = DataKind::Query.with_discriminator("a1b2c3");
        assert_ne!(a, b);
        assert!(a.has_kind(DataKind::Query));
        assert!(b.has_kind(DataKind::Query));
    }
}
