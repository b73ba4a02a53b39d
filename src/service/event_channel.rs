/*!
 * Event Channel
 * Per-listener pending-id bitmaps with futex-backed wake-up
 *
 * One lane per listener slot. Emitting an id sets its bit in every open
 * lane, so notifications coalesce per id until observed. It then bumps
 * the lane's signal word and wakes its waiters. Draining is a swap of the
 * bitmap words, which delivers each distinct pending id exactly once.
 */

use crate::core::limits::{MAX_EVENT_ID_MAX_VALUE, SCHEMA_VERSION};
use crate::platform::wake::{self, WaitOutcome};
use crate::platform::{RegionError, SharedRegion};
use std::path::Path;
use std::sync::atomic::{AtomicU32, AtomicU64, Ordering};
use std::time::Duration;
use thiserror::Error;

const CHANNEL_MAGIC: u32 = 0x5A42_0E77;

#[repr(C)]
struct ChannelHeader {
    /// Set last during initialization; openers require it
    magic: AtomicU32,
    version: u32,
    lanes: u32,
    words_per_lane: u32,
}

const HEADER_SIZE: usize = std::mem::size_of::<ChannelHeader>();
/// signal word + open flag preceding the bitmap of each lane
const LANE_PREAMBLE: usize = 8;

/// Failures while creating or attaching to an event channel
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub(crate) enum ChannelError {
    #[error(transparent)]
    Region(#[from] RegionError),

    #[error("the shared event channel is corrupted or incompatible")]
    Incompatible,
}

fn words_for(event_id_max_value: usize) -> usize {
    event_id_max_value / 64 + 1
}

/// Typed view onto the event channel region
pub(crate) struct EventChannel<R: SharedRegion> {
    region: R,
    lanes: usize,
    words: usize,
}

impl<R: SharedRegion> EventChannel<R> {
    fn region_size(lanes: usize, words: usize) -> usize {
        HEADER_SIZE + lanes * (LANE_PREAMBLE + words * 8)
    }

    pub(crate) fn create(
        path: &Path,
        lanes: usize,
        event_id_max_value: usize,
    ) -> Result<Self, ChannelError> {
        if event_id_max_value > MAX_EVENT_ID_MAX_VALUE {
            return Err(ChannelError::Incompatible);
        }
        let words = words_for(event_id_max_value);
        let region = R::create(path, Self::region_size(lanes, words))?;
        let channel = Self {
            region,
            lanes,
            words,
        };

        // Exclusive creator of a zeroed region; plain stores are fine
        // until the magic is published.
        let raw = channel.region.base() as *mut ChannelHeader;
        unsafe {
            std::ptr::addr_of_mut!((*raw).version).write(SCHEMA_VERSION);
            std::ptr::addr_of_mut!((*raw).lanes).write(lanes as u32);
            std::ptr::addr_of_mut!((*raw).words_per_lane).write(words as u32);
        }
        channel.header().magic.store(CHANNEL_MAGIC, Ordering::Release);
        Ok(channel)
    }

    pub(crate) fn open(
        path: &Path,
        expected_lanes: usize,
        event_id_max_value: usize,
    ) -> Result<Self, ChannelError> {
        let region = R::open(path)?;
        if region.len() < HEADER_SIZE {
            return Err(ChannelError::Incompatible);
        }
        let header = unsafe { &*(region.base() as *const ChannelHeader) };
        if header.magic.load(Ordering::Acquire) != CHANNEL_MAGIC
            || header.version != SCHEMA_VERSION
        {
            return Err(ChannelError::Incompatible);
        }
        let lanes = header.lanes as usize;
        let words = header.words_per_lane as usize;
        if lanes != expected_lanes
            || words != words_for(event_id_max_value)
            || region.len() < Self::region_size(lanes, words)
        {
            return Err(ChannelError::Incompatible);
        }
        Ok(Self {
            region,
            lanes,
            words,
        })
    }

    fn header(&self) -> &ChannelHeader {
        unsafe { &*(self.region.base() as *const ChannelHeader) }
    }

    /// Cheap consistency probe on the hot path
    pub(crate) fn is_intact(&self) -> bool {
        self.header().magic.load(Ordering::Acquire) == CHANNEL_MAGIC
    }

    fn lane_offset(&self, lane: usize) -> usize {
        debug_assert!(lane < self.lanes);
        HEADER_SIZE + lane * (LANE_PREAMBLE + self.words * 8)
    }

    fn signal(&self, lane: usize) -> &AtomicU32 {
        unsafe { &*(self.region.base().add(self.lane_offset(lane)) as *const AtomicU32) }
    }

    fn open_flag(&self, lane: usize) -> &AtomicU32 {
        unsafe { &*(self.region.base().add(self.lane_offset(lane) + 4) as *const AtomicU32) }
    }

    fn word(&self, lane: usize, index: usize) -> &AtomicU64 {
        debug_assert!(index < self.words);
        let offset = self.lane_offset(lane) + LANE_PREAMBLE + index * 8;
        unsafe { &*(self.region.base().add(offset) as *const AtomicU64) }
    }

    /// Claim lane `lane` for a freshly attached listener.
    ///
    /// Zeroes the bitmap first so events from a previous occupant never
    /// leak into the new listener.
    pub(crate) fn open_lane(&self, lane: usize) {
        for index in 0..self.words {
            self.word(lane, index).store(0, Ordering::Relaxed);
        }
        self.open_flag(lane).store(1, Ordering::Release);
    }

    pub(crate) fn close_lane(&self, lane: usize) {
        self.open_flag(lane).store(0, Ordering::Release);
    }

    fn lane_is_open(&self, lane: usize) -> bool {
        self.open_flag(lane).load(Ordering::Acquire) == 1
    }

    /// Emit `id` into every open lane; returns how many lanes saw it
    pub(crate) fn post(&self, id: usize) -> usize {
        let word_index = id / 64;
        let mask = 1u64 << (id % 64);
        let mut delivered = 0;
        for lane in 0..self.lanes {
            if !self.lane_is_open(lane) {
                continue;
            }
            self.word(lane, word_index).fetch_or(mask, Ordering::AcqRel);
            self.signal(lane).fetch_add(1, Ordering::AcqRel);
            wake::wake_all(self.signal(lane));
            delivered += 1;
        }
        delivered
    }

    /// Snapshot the signal word before probing for pending ids; passing
    /// the snapshot to [`EventChannel::wait`] closes the lost-wakeup
    /// window between probe and sleep
    pub(crate) fn signal_snapshot(&self, lane: usize) -> u32 {
        self.signal(lane).load(Ordering::Acquire)
    }

    pub(crate) fn wait(
        &self,
        lane: usize,
        snapshot: u32,
        timeout: Option<Duration>,
    ) -> WaitOutcome {
        wake::wait_on(self.signal(lane), snapshot, timeout)
    }

    /// Take the lowest pending id of the lane, if any
    pub(crate) fn take_lowest(&self, lane: usize) -> Option<usize> {
        for index in 0..self.words {
            let word = self.word(lane, index);
            let mut current = word.load(Ordering::Acquire);
            while current != 0 {
                let bit = current.trailing_zeros() as usize;
                let mask = 1u64 << bit;
                let previous = word.fetch_and(!mask, Ordering::AcqRel);
                if previous & mask != 0 {
                    return Some(index * 64 + bit);
                }
                current = previous & !mask;
            }
        }
        None
    }

    /// Single draining pass: deliver each distinct pending id exactly
    /// once, lowest first; returns the number of delivered ids
    pub(crate) fn drain(&self, lane: usize, mut f: impl FnMut(usize)) -> usize {
        let mut delivered = 0;
        for index in 0..self.words {
            let mut pending = self.word(lane, index).swap(0, Ordering::AcqRel);
            while pending != 0 {
                let bit = pending.trailing_zeros() as usize;
                pending &= !(1u64 << bit);
                f(index * 64 + bit);
                delivered += 1;
            }
        }
        delivered
    }
}
