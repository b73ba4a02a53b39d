/*!
 * Messaging Pattern
 * The communication style a service is created with
 */

use serde::{Deserialize, Serialize};

/// Identifies how the participants of a service communicate.
///
/// A service is keyed by (prefix, name, pattern); the same name may exist
/// once per pattern.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[repr(u32)]
pub enum MessagingPattern {
    /// Notifiers wake listeners with integer event ids; no payload
    Event = 0,
    /// Publishers stream samples to subscribers (data plane external)
    PublishSubscribe,
    /// Clients exchange request/response streams with servers (external)
    RequestResponse,
}

impl std::fmt::Display for MessagingPattern {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Event => f.write_str("Event"),
            Self::PublishSubscribe => f.write_str("PublishSubscribe"),
            Self::RequestResponse => f.write_str("RequestResponse"),
        }
    }
}
