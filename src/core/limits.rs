/*!
 * Capacity Limits
 * Hard caps enforced by the core, independent of configuration
 */

/// Maximum length of a service name in bytes
pub const MAX_SERVICE_NAME_LENGTH: usize = 255;

/// Maximum length of a node name in bytes
pub const MAX_NODE_NAME_LENGTH: usize = 128;

/// Maximum number of attributes a service descriptor can carry
pub const MAX_ATTRIBUTES: usize = 64;

/// Maximum supported value for `event_id_max_value`.
///
/// Bounds the per-listener bitmap in the event channel; one bit per
/// representable event id.
pub const MAX_EVENT_ID_MAX_VALUE: usize = 65_535;

/// Upper bound for any single port or node capacity of a service
pub const MAX_PORTS_PER_SERVICE: usize = 4_096;

/// Binary schema version of all persisted and shared structures
pub const SCHEMA_VERSION: u32 = 1;
