/*!
 * Platform Module
 * Primitives the engine needs from the OS or the process
 *
 * Three trait families (durable blob storage, shared byte regions, monitor
 * tokens) plus a free-function wake primitive. The file-backed bindings
 * realize the inter-process variant, the heap-backed bindings the
 * process-local variant.
 */

pub mod file;
pub mod heap;
pub mod traits;
pub mod wake;

pub use traits::{
    MonitorToken, RegionError, SharedRegion, Storage, StorageError, TokenError, TokenState,
};
pub use wake::{wake_all, wait_on, WaitOutcome};
