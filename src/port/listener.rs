/*!
 * Listener Port
 * Receives event ids with try / timed / blocking semantics
 *
 * Single-event waits deliver the lowest pending id first; drain waits
 * deliver every distinct pending id exactly once per pass. Notifications
 * coalesce per id until observed.
 */

use crate::core::types::UniqueListenerId;
use crate::platform::wake::WaitOutcome;
use crate::port::event_id::EventId;
use crate::service::dynamic_state::Table;
use crate::service::{Service, ServiceState};
use crate::signal;
use log::debug;
use std::marker::PhantomData;
use std::sync::Arc;
use std::time::{Duration, Instant};
use thiserror::Error;

/// Failures while creating a listener
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum ListenerCreateError {
    #[error("the maximum number of listeners supported by the service is already attached")]
    ExceedsMaxSupportedListeners,

    #[error("failed to set up the wake-up resources of the listener")]
    ResourceCreationFailed,
}

/// Failures while waiting for events
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum ListenerWaitError {
    #[error("the shared event channel violated its contract")]
    ContractViolation,

    #[error("an OS signal interrupted the wait")]
    InterruptSignal,

    #[error("internal failure while waiting for events")]
    InternalFailure,
}

/// Receives event ids emitted on the service.
///
/// Not a thread-safe handle; the shared state it reads from is.
pub struct Listener<S: Service> {
    state: Arc<ServiceState<S>>,
    lane: usize,
    id: UniqueListenerId,
    // Single-consumer port by the ownership model.
    _not_sync: PhantomData<std::cell::Cell<()>>,
}

impl<S: Service> Listener<S> {
    pub(crate) fn create(state: Arc<ServiceState<S>>) -> Result<Self, ListenerCreateError> {
        if !state.channel.is_intact() {
            return Err(ListenerCreateError::ResourceCreationFailed);
        }
        let Some((lane, id)) = state
            .roster
            .claim(Table::Listeners, state.node.id().value())
        else {
            return Err(ListenerCreateError::ExceedsMaxSupportedListeners);
        };
        // Listener slot index and channel lane index are the same by
        // construction.
        state.channel.open_lane(lane);

        let listener = Self {
            state,
            lane,
            id: UniqueListenerId(id),
            _not_sync: PhantomData,
        };
        debug!(
            "created listener {} on service {}",
            listener.id.value(),
            listener.state.static_config.name()
        );
        Ok(listener)
    }

    pub fn id(&self) -> UniqueListenerId {
        self.id
    }

    fn check_intact(&self) -> Result<(), ListenerWaitError> {
        if self.state.channel.is_intact() {
            Ok(())
        } else {
            Err(ListenerWaitError::ContractViolation)
        }
    }

    /// The next pending event id, lowest first; `None` when nothing is
    /// pending. Never blocks.
    pub fn try_wait_one(&self) -> Result<Option<EventId>, ListenerWaitError> {
        self.check_intact()?;
        Ok(self.state.channel.take_lowest(self.lane).map(EventId::new))
    }

    /// As [`Listener::try_wait_one`], blocking up to `timeout` for an
    /// event to arrive
    pub fn timed_wait_one(&self, timeout: Duration) -> Result<Option<EventId>, ListenerWaitError> {
        self.wait_one(Some(Instant::now() + timeout))
    }

    /// As [`Listener::try_wait_one`], blocking until an event arrives or
    /// a signal interrupts the wait
    pub fn blocking_wait_one(&self) -> Result<Option<EventId>, ListenerWaitError> {
        self.wait_one(None)
    }

    /// Drain the pending set, invoking `callback` exactly once per
    /// distinct pending id, lowest first; returns the number of delivered
    /// ids. Never blocks.
    pub fn try_wait_all(
        &self,
        mut callback: impl FnMut(EventId),
    ) -> Result<usize, ListenerWaitError> {
        self.check_intact()?;
        Ok(self
            .state
            .channel
            .drain(self.lane, |id| callback(EventId::new(id))))
    }

    /// As [`Listener::try_wait_all`], blocking up to `timeout` until at
    /// least one id is pending
    pub fn timed_wait_all(
        &self,
        callback: impl FnMut(EventId),
        timeout: Duration,
    ) -> Result<usize, ListenerWaitError> {
        self.wait_all(callback, Some(Instant::now() + timeout))
    }

    /// As [`Listener::try_wait_all`], blocking until at least one id is
    /// pending or a signal interrupts the wait
    pub fn blocking_wait_all(
        &self,
        callback: impl FnMut(EventId),
    ) -> Result<usize, ListenerWaitError> {
        self.wait_all(callback, None)
    }

    fn wait_one(&self, deadline: Option<Instant>) -> Result<Option<EventId>, ListenerWaitError> {
        loop {
            let snapshot = self.state.channel.signal_snapshot(self.lane);
            if let Some(id) = self.try_wait_one()? {
                return Ok(Some(id));
            }
            match self.park(snapshot, deadline)? {
                Parked::Woken => continue,
                Parked::Expired => return self.try_wait_one(),
            }
        }
    }

    fn wait_all(
        &self,
        mut callback: impl FnMut(EventId),
        deadline: Option<Instant>,
    ) -> Result<usize, ListenerWaitError> {
        loop {
            let snapshot = self.state.channel.signal_snapshot(self.lane);
            let delivered = self.try_wait_all(&mut callback)?;
            if delivered > 0 {
                return Ok(delivered);
            }
            match self.park(snapshot, deadline)? {
                Parked::Woken => continue,
                Parked::Expired => return self.try_wait_all(&mut callback),
            }
        }
    }

    /// Park on the lane's signal word. The snapshot taken before the
    /// empty-check closes the lost-wakeup window; spurious wakeups loop
    /// back into the predicate.
    fn park(
        &self,
        snapshot: u32,
        deadline: Option<Instant>,
    ) -> Result<Parked, ListenerWaitError> {
        if signal::fetch().is_some() {
            return Err(ListenerWaitError::InterruptSignal);
        }
        let remaining = match deadline {
            Some(deadline) => match deadline.checked_duration_since(Instant::now()) {
                Some(remaining) if !remaining.is_zero() => Some(remaining),
                _ => return Ok(Parked::Expired),
            },
            None => None,
        };
        match self.state.channel.wait(self.lane, snapshot, remaining) {
            WaitOutcome::Woken => Ok(Parked::Woken),
            WaitOutcome::TimedOut => Ok(Parked::Expired),
            WaitOutcome::Interrupted => {
                if signal::fetch().is_some() {
                    Err(ListenerWaitError::InterruptSignal)
                } else {
                    // EINTR without one of our signals; treat as spurious.
                    Ok(Parked::Woken)
                }
            }
        }
    }
}

enum Parked {
    Woken,
    Expired,
}

impl<S: Service> Drop for Listener<S> {
    fn drop(&mut self) {
        self.state.channel.close_lane(self.lane);
        self.state.roster.release(Table::Listeners, self.lane);
        debug!(
            "dropped listener {} of service {}",
            self.id.value(),
            self.state.static_config.name()
        );
    }
}

impl<S: Service> std::fmt::Debug for Listener<S> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Listener")
            .field("id", &self.id)
            .finish_non_exhaustive()
    }
}
