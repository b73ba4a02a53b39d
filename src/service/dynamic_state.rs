/*!
 * Dynamic Service State
 * Lock-free roster of attached nodes and ports inside a shared region
 *
 * Fixed-capacity slot tables sized at service creation. Slot reservation
 * is a FREE → CLAIMED → ACTIVE transition; release publishes FREE with
 * release ordering so an index is only reused once its retirement is
 * globally visible.
 */

use crate::core::limits::{MAX_PORTS_PER_SERVICE, SCHEMA_VERSION};
use crate::platform::{RegionError, SharedRegion};
use std::path::Path;
use std::sync::atomic::{AtomicU32, AtomicU64, Ordering};
use thiserror::Error;

const ROSTER_MAGIC: u32 = 0x5A42_0D11;

const SLOT_FREE: u32 = 0;
const SLOT_CLAIMED: u32 = 1;
const SLOT_ACTIVE: u32 = 2;

/// The three slot tables of the roster
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub(crate) enum Table {
    Nodes,
    Notifiers,
    Listeners,
}

#[repr(C)]
struct RosterHeader {
    /// Set last during initialization; openers require it
    magic: AtomicU32,
    version: u32,
    max_nodes: u32,
    max_notifiers: u32,
    max_listeners: u32,
    _reserved: u32,
    /// Source of unique port ids, shared by all tables
    next_port_id: AtomicU64,
}

#[repr(C)]
struct SlotRecord {
    state: AtomicU32,
    _reserved: u32,
    id: AtomicU64,
    owner_hi: AtomicU64,
    owner_lo: AtomicU64,
}

const HEADER_SIZE: usize = std::mem::size_of::<RosterHeader>();
const SLOT_SIZE: usize = std::mem::size_of::<SlotRecord>();

/// Failures while creating or attaching to a roster
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub(crate) enum RosterError {
    #[error(transparent)]
    Region(#[from] RegionError),

    #[error("the shared roster region is corrupted or incompatible")]
    Incompatible,
}

/// Capacities of a roster, fixed at creation
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub(crate) struct RosterCapacities {
    pub(crate) max_nodes: usize,
    pub(crate) max_notifiers: usize,
    pub(crate) max_listeners: usize,
}

impl RosterCapacities {
    fn region_size(&self) -> usize {
        let slots = self.max_nodes + self.max_notifiers + self.max_listeners;
        HEADER_SIZE + slots * SLOT_SIZE
    }

    fn is_sane(&self) -> bool {
        self.max_nodes > 0
            && self.max_nodes <= MAX_PORTS_PER_SERVICE
            && self.max_notifiers <= MAX_PORTS_PER_SERVICE
            && self.max_listeners <= MAX_PORTS_PER_SERVICE
    }
}

/// Typed view onto the roster region.
///
/// All mutation goes through the atomics inside the region; the view
/// itself is freely shareable.
pub(crate) struct Roster<R: SharedRegion> {
    region: R,
    capacities: RosterCapacities,
}

impl<R: SharedRegion> Roster<R> {
    pub(crate) fn create(path: &Path, capacities: RosterCapacities) -> Result<Self, RosterError> {
        if !capacities.is_sane() {
            return Err(RosterError::Incompatible);
        }
        let region = R::create(path, capacities.region_size())?;
        let roster = Self { region, capacities };

        // Exclusive creator of a zeroed region; plain stores are fine
        // until the magic is published.
        let raw = roster.region.base() as *mut RosterHeader;
        unsafe {
            std::ptr::addr_of_mut!((*raw).version).write(SCHEMA_VERSION);
            std::ptr::addr_of_mut!((*raw).max_nodes).write(capacities.max_nodes as u32);
            std::ptr::addr_of_mut!((*raw).max_notifiers).write(capacities.max_notifiers as u32);
            std::ptr::addr_of_mut!((*raw).max_listeners).write(capacities.max_listeners as u32);
        }
        let header = roster.header();
        header.next_port_id.store(1, Ordering::Relaxed);
        header.magic.store(ROSTER_MAGIC, Ordering::Release);
        Ok(roster)
    }

    pub(crate) fn open(path: &Path) -> Result<Self, RosterError> {
        let region = R::open(path)?;
        if region.len() < HEADER_SIZE {
            return Err(RosterError::Incompatible);
        }
        let header = unsafe { &*(region.base() as *const RosterHeader) };
        if header.magic.load(Ordering::Acquire) != ROSTER_MAGIC
            || header.version != SCHEMA_VERSION
        {
            return Err(RosterError::Incompatible);
        }
        let capacities = RosterCapacities {
            max_nodes: header.max_nodes as usize,
            max_notifiers: header.max_notifiers as usize,
            max_listeners: header.max_listeners as usize,
        };
        if !capacities.is_sane() || region.len() < capacities.region_size() {
            return Err(RosterError::Incompatible);
        }
        Ok(Self { region, capacities })
    }

    pub(crate) fn capacities(&self) -> RosterCapacities {
        self.capacities
    }

    fn header(&self) -> &RosterHeader {
        unsafe { &*(self.region.base() as *const RosterHeader) }
    }

    fn table_len(&self, table: Table) -> usize {
        match table {
            Table::Nodes => self.capacities.max_nodes,
            Table::Notifiers => self.capacities.max_notifiers,
            Table::Listeners => self.capacities.max_listeners,
        }
    }

    fn table_offset(&self, table: Table) -> usize {
        match table {
            Table::Nodes => HEADER_SIZE,
            Table::Notifiers => HEADER_SIZE + self.capacities.max_nodes * SLOT_SIZE,
            Table::Listeners => {
                HEADER_SIZE
                    + (self.capacities.max_nodes + self.capacities.max_notifiers) * SLOT_SIZE
            }
        }
    }

    fn slot(&self, table: Table, index: usize) -> &SlotRecord {
        debug_assert!(index < self.table_len(table));
        let offset = self.table_offset(table) + index * SLOT_SIZE;
        unsafe { &*(self.region.base().add(offset) as *const SlotRecord) }
    }

    /// Reserve a slot for `owner`; returns the slot index and a unique
    /// port id, or `None` when the table is full
    pub(crate) fn claim(&self, table: Table, owner: u128) -> Option<(usize, u64)> {
        for index in 0..self.table_len(table) {
            let slot = self.slot(table, index);
            if slot
                .state
                .compare_exchange(SLOT_FREE, SLOT_CLAIMED, Ordering::AcqRel, Ordering::Relaxed)
                .is_ok()
            {
                let id = self.header().next_port_id.fetch_add(1, Ordering::Relaxed);
                slot.owner_hi.store((owner >> 64) as u64, Ordering::Relaxed);
                slot.owner_lo.store(owner as u64, Ordering::Relaxed);
                slot.id.store(id, Ordering::Relaxed);
                slot.state.store(SLOT_ACTIVE, Ordering::Release);
                return Some((index, id));
            }
        }
        None
    }

    /// Retire a slot; the index becomes reusable once the store is visible
    pub(crate) fn release(&self, table: Table, index: usize) {
        self.slot(table, index).state.store(SLOT_FREE, Ordering::Release);
    }

    pub(crate) fn release_node(&self, index: usize) {
        self.release(Table::Nodes, index);
    }

    /// Release every slot of `table` owned by `owner`; returns the indices
    /// that were reclaimed
    pub(crate) fn release_owned(&self, table: Table, owner: u128) -> Vec<usize> {
        let mut reclaimed = Vec::new();
        for index in 0..self.table_len(table) {
            let slot = self.slot(table, index);
            if slot.state.load(Ordering::Acquire) != SLOT_ACTIVE {
                continue;
            }
            let hi = slot.owner_hi.load(Ordering::Relaxed);
            let lo = slot.owner_lo.load(Ordering::Relaxed);
            if (u128::from(hi) << 64 | u128::from(lo)) != owner {
                continue;
            }
            // CLAIMED guards against racing a concurrent reaper.
            if slot
                .state
                .compare_exchange(SLOT_ACTIVE, SLOT_CLAIMED, Ordering::AcqRel, Ordering::Relaxed)
                .is_ok()
            {
                slot.state.store(SLOT_FREE, Ordering::Release);
                reclaimed.push(index);
            }
        }
        reclaimed
    }

    pub(crate) fn active_count(&self, table: Table) -> usize {
        (0..self.table_len(table))
            .filter(|index| self.slot(table, *index).state.load(Ordering::Acquire) == SLOT_ACTIVE)
            .count()
    }

    pub(crate) fn active_nodes(&self) -> usize {
        self.active_count(Table::Nodes)
    }

    pub(crate) fn for_each_active(&self, table: Table, mut f: impl FnMut(usize, u64, u128)) {
        for index in 0..self.table_len(table) {
            let slot = self.slot(table, index);
            if slot.state.load(Ordering::Acquire) != SLOT_ACTIVE {
                continue;
            }
            let hi = slot.owner_hi.load(Ordering::Relaxed);
            let lo = slot.owner_lo.load(Ordering::Relaxed);
            let id = slot.id.load(Ordering::Relaxed);
            f(index, id, u128::from(hi) << 64 | u128::from(lo));
        }
    }

    pub(crate) fn for_each_active_node(&self, mut f: impl FnMut(usize, u128)) {
        self.for_each_active(Table::Nodes, |index, _, owner| f(index, owner));
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::platform::heap::HeapRegion;
    use std::path::PathBuf;

    fn unique_path() -> PathBuf {
        PathBuf::from(format!("/roster-test/{}", uuid::Uuid::new_v4().simple()))
    }

    fn capacities() -> RosterCapacities {
        RosterCapacities {
            max_nodes: 4,
            max_notifiers: 2,
            max_listeners: 3,
        }
    }

    #[test]
    fn claim_until_full_then_release() {
        let roster = Roster::<HeapRegion>::create(&unique_path(), capacities()).unwrap();

        let (a, id_a) = roster.claim(Table::Notifiers, 1).unwrap();
        let (b, id_b) = roster.claim(Table::Notifiers, 2).unwrap();
        assert_ne!(a, b);
        assert_ne!(id_a, id_b);
        assert!(roster.claim(Table::Notifiers, 3).is_none());
        assert_eq!(roster.active_count(Table::Notifiers), 2);

        roster.release(Table::Notifiers, a);
        assert_eq!(roster.active_count(Table::Notifiers), 1);
        assert!(roster.claim(Table::Notifiers, 3).is_some());
    }

    #[test]
    fn open_sees_creator_state() {
        let path = unique_path();
        let creator = Roster::<HeapRegion>::create(&path, capacities()).unwrap();
        creator.claim(Table::Nodes, 42).unwrap();

        let opener = Roster::<HeapRegion>::open(&path).unwrap();
        assert_eq!(opener.capacities(), capacities());
        assert_eq!(opener.active_nodes(), 1);

        let mut owners = Vec::new();
        opener.for_each_active_node(|_, owner| owners.push(owner));
        assert_eq!(owners, vec![42]);
    }

    #[test]
    fn release_owned_only_touches_the_owner() {
        let roster = Roster::<HeapRegion>::create(&unique_path(), capacities()).unwrap();
        roster.claim(Table::Listeners, 7).unwrap();
        roster.claim(Table::Listeners, 9).unwrap();
        roster.claim(Table::Listeners, 7).unwrap();

        let reclaimed = roster.release_owned(Table::Listeners, 7);
        assert_eq!(reclaimed.len(), 2);
        assert_eq!(roster.active_count(Table::Listeners), 1);
    }

    #[test]
    fn open_rejects_garbage() {
        let path = unique_path();
        let _region = HeapRegion::create(&path, 64).unwrap();
        assert!(matches!(
            Roster::<HeapRegion>::open(&path),
            Err(RosterError::Incompatible)
        ));
    }
}
