//! Timers and side effects.
//!
//! The protocol core never performs I/O or sleeps. Each entry point records
//! what should happen in an [`Effects`] buffer, and a driver carries it out:
//! sending messages, arming timers, and feeding expired timers back in.

use std::cmp::Reverse;
use std::collections::{BinaryHeap, HashMap};
use std::fmt;

use vectorsync_core::NodeId;

use crate::messages::Message;

/// Handle of a scheduled timer, unique per node.
#[derive(Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct TimerId(pub u64);

impl fmt::Debug for TimerId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "TimerId({})", self.0)
    }
}

/// What a timer does when it fires.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Timer {
    /// Start the next probe round.
    ProbeCycle,
    /// Stop collecting probe replies and decide.
    ProbeWindowClose { round: u64 },
    /// Answer a probe after the reply jitter.
    ProbeReply { prober: NodeId },
    /// Next tick of the final-sync barrier.
    FinalSync,
    /// End of a dormant period.
    WakeUp,
    /// End of the catch-up period after waking.
    WakeSettle,
    /// A fetch for this producer went unanswered.
    FetchTimeout { producer: NodeId },
    /// Send the jittered SyncACK for this sender's round.
    SendAck { target: NodeId },
    /// Periodic sync.
    PeriodicSync,
    /// Periodic snapshot.
    Snapshot,
}

/// One side effect requested by the node.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Action {
    /// Send to every member of the group.
    Broadcast(Message),
    /// Send to a single peer.
    SendTo { peer: NodeId, message: Message },
    /// Fire `timer` after `delay_ms`.
    Schedule {
        id: TimerId,
        delay_ms: u64,
        timer: Timer,
    },
    /// Disarm a previously scheduled timer.
    Cancel(TimerId),
}

/// Ordered side effects of one node entry point.
#[derive(Debug, Default, Clone, PartialEq, Eq)]
pub struct Effects {
    actions: Vec<Action>,
}

impl Effects {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn broadcast(&mut self, message: Message) {
        self.actions.push(Action::Broadcast(message));
    }

    pub fn send_to(&mut self, peer: NodeId, message: Message) {
        self.actions.push(Action::SendTo { peer, message });
    }

    pub fn schedule(&mut self, id: TimerId, delay_ms: u64, timer: Timer) {
        self.actions.push(Action::Schedule {
            id,
            delay_ms,
            timer,
        });
    }

    pub fn cancel(&mut self, id: TimerId) {
        self.actions.push(Action::Cancel(id));
    }

    pub fn is_empty(&self) -> bool {
        self.actions.is_empty()
    }

    pub fn len(&self) -> usize {
        self.actions.len()
    }

    pub fn iter(&self) -> impl Iterator<Item = &Action> {
        self.actions.iter()
    }

    /// Append another buffer's actions after these.
    pub fn extend(&mut self, other: Effects) {
        self.actions.extend(other.actions);
    }

    /// Messages to be sent, with `None` as the destination of broadcasts.
    pub fn messages(&self) -> impl Iterator<Item = (Option<NodeId>, &Message)> {
        self.actions.iter().filter_map(|action| match action {
            Action::Broadcast(m) => Some((None, m)),
            Action::SendTo { peer, message } => Some((Some(*peer), message)),
            _ => None,
        })
    }

    /// Timers armed by these effects.
    pub fn timers(&self) -> impl Iterator<Item = (TimerId, u64, &Timer)> {
        self.actions.iter().filter_map(|action| match action {
            Action::Schedule {
                id,
                delay_ms,
                timer,
            } => Some((*id, *delay_ms, timer)),
            _ => None,
        })
    }
}

impl IntoIterator for Effects {
    type Item = Action;
    type IntoIter = std::vec::IntoIter<Action>;

    fn into_iter(self) -> Self::IntoIter {
        self.actions.into_iter()
    }
}

/// Deadline-ordered pending timers of one node.
///
/// Cancellation is lazy: cancelled entries stay in the heap and are skipped
/// when they reach the front.
#[derive(Debug, Default)]
pub struct TimerQueue {
    heap: BinaryHeap<Reverse<(i64, TimerId)>>,
    live: HashMap<TimerId, Timer>,
}

impl TimerQueue {
    pub fn new() -> Self {
        Self::default()
    }

    /// Arm `timer` to fire at `deadline` (ms). Ids must not be reused.
    pub fn schedule(&mut self, id: TimerId, deadline: i64, timer: Timer) {
        self.live.insert(id, timer);
        self.heap.push(Reverse((deadline, id)));
    }

    /// Disarm a timer. Returns whether it was pending.
    pub fn cancel(&mut self, id: TimerId) -> bool {
        self.live.remove(&id).is_some()
    }

    /// Deadline of the earliest pending timer.
    pub fn next_deadline(&mut self) -> Option<i64> {
        self.skip_cancelled();
        self.heap.peek().map(|Reverse((deadline, _))| *deadline)
    }

    /// Remove and return the earliest timer due at or before `now`.
    pub fn pop_due(&mut self, now: i64) -> Option<(TimerId, Timer)> {
        self.skip_cancelled();
        match self.heap.peek() {
            Some(Reverse((deadline, _))) if *deadline <= now => {
                let Reverse((_, id)) = self.heap.pop()?;
                self.live.remove(&id).map(|timer| (id, timer))
            }
            _ => None,
        }
    }

    /// Number of pending timers.
    pub fn len(&self) -> usize {
        self.live.len()
    }

    pub fn is_empty(&self) -> bool {
        self.live.is_empty()
    }

    fn skip_cancelled(&mut self) {
        while let Some(Reverse((_, id))) = self.heap.peek() {
            if self.live.contains_key(id) {
                break;
            }
            self.heap.pop();
        }
    }
}
