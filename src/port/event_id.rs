/*!
 * Event Id
 * The integer payload carried by a notification
 */

use serde::{Deserialize, Serialize};

/// Identifies the kind of event a notifier emits.
///
/// Must not exceed the `event_id_max_value` of the service it is emitted
/// on; violations surface as `EventIdOutOfBounds` at notification time.
#[derive(
    Debug, Default, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize,
)]
pub struct EventId(usize);

impl EventId {
    pub const fn new(value: usize) -> Self {
        Self(value)
    }

    pub const fn as_value(&self) -> usize {
        self.0
    }
}

impl std::fmt::Display for EventId {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "EventId({})", self.0)
    }
}

impl From<usize> for EventId {
    fn from(value: usize) -> Self {
        Self(value)
    }
}
