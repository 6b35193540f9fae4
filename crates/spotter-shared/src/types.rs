use serde::{Deserialize, Serialize};

use crate::constants::PROVISIONAL_PREFIX;

/// Server-assigned conversation ("room") identifier.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq, Hash, PartialOrd, Ord)]
#[serde(transparent)]
pub struct ConversationId(pub String);

impl ConversationId {
    pub fn new(id: impl Into<String>) -> Self {
        Self(id.into())
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl std::fmt::Display for ConversationId {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(&self.0)
    }
}

/// Server-assigned message identifier.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq, Hash, PartialOrd, Ord)]
#[serde(transparent)]
pub struct CanonicalId(pub String);

impl CanonicalId {
    pub fn new(id: impl Into<String>) -> Self {
        Self(id.into())
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl std::fmt::Display for CanonicalId {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(&self.0)
    }
}

/// Client-generated temporary identifier, unique for the session.
///
/// Text form is `tmp-<unix millis>-<sequence>-<random hex>`.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq, Hash, PartialOrd, Ord)]
#[serde(transparent)]
pub struct ProvisionalId(String);

impl ProvisionalId {
    pub fn generate(unix_millis: i64, sequence: u64, suffix: u32) -> Self {
        Self(format!("{PROVISIONAL_PREFIX}{unix_millis}-{sequence}-{suffix:08x}"))
    }

    /// Accepts only strings carrying the provisional prefix.
    pub fn parse(s: &str) -> Option<Self> {
        s.starts_with(PROVISIONAL_PREFIX).then(|| Self(s.to_string()))
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl std::fmt::Display for ProvisionalId {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(&self.0)
    }
}

/// A message has exactly one of these at any time.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq, Hash, PartialOrd, Ord)]
#[serde(tag = "kind", content = "value", rename_all = "lowercase")]
pub enum MessageId {
    Provisional(ProvisionalId),
    Canonical(CanonicalId),
}

impl MessageId {
    pub fn canonical(id: impl Into<String>) -> Self {
        Self::Canonical(CanonicalId::new(id))
    }

    pub fn is_provisional(&self) -> bool {
        matches!(self, Self::Provisional(_))
    }

    pub fn as_canonical(&self) -> Option<&CanonicalId> {
        match self {
            Self::Canonical(id) => Some(id),
            Self::Provisional(_) => None,
        }
    }

    pub fn as_str(&self) -> &str {
        match self {
            Self::Provisional(id) => id.as_str(),
            Self::Canonical(id) => id.as_str(),
        }
    }

    /// Classify a raw id string coming back from the UI layer.
    pub fn from_raw(s: &str) -> Self {
        match ProvisionalId::parse(s) {
            Some(p) => Self::Provisional(p),
            None => Self::canonical(s),
        }
    }
}

impl From<ProvisionalId> for MessageId {
    fn from(id: ProvisionalId) -> Self {
        Self::Provisional(id)
    }
}

impl From<CanonicalId> for MessageId {
    fn from(id: CanonicalId) -> Self {
        Self::Canonical(id)
    }
}

impl std::fmt::Display for MessageId {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, Hash)]
#[serde(rename_all = "lowercase")]
pub enum SenderRole {
    #[serde(rename = "self")]
    Own,
    Counterpart,
}

#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, Hash, Default)]
#[serde(rename_all = "lowercase")]
pub enum MessageType {
    #[default]
    Text,
    Image,
    Video,
    File,
    Voice,
}

impl MessageType {
    /// Types that require an attached payload.
    pub fn is_media(&self) -> bool {
        !matches!(self, Self::Text)
    }
}

/// Delivery state of a single message.
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, Hash)]
#[serde(rename_all = "lowercase")]
pub enum MessageStatus {
    Sending,
    Sent,
    Delivered,
    Read,
    Error,
}

impl MessageStatus {
    /// Position on the forward chain; `Error` sits off the chain.
    pub fn rank(&self) -> Option<u8> {
        match self {
            Self::Sending => Some(0),
            Self::Sent => Some(1),
            Self::Delivered => Some(2),
            Self::Read => Some(3),
            Self::Error => None,
        }
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Sending => "sending",
            Self::Sent => "sent",
            Self::Delivered => "delivered",
            Self::Read => "read",
            Self::Error => "error",
        }
    }
}

impl std::fmt::Display for MessageStatus {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, Hash)]
#[serde(rename_all = "lowercase")]
pub enum ConnectivityState {
    Connected,
    Disconnected,
}

impl ConnectivityState {
    pub fn is_connected(&self) -> bool {
        matches!(self, Self::Connected)
    }
}

#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, Hash)]
#[serde(rename_all = "lowercase")]
pub enum NotificationKind {
    Success,
    Error,
    Warning,
    Info,
}
