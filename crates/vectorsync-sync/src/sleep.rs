//! Duty-cycling: probe rounds, sleep designation, the final-sync barrier and
//! the wake path.
//!
//! A node that is `Active` periodically probes the group. If at least
//! `quorum_threshold` distinct members answer, the member with the least
//! cumulative sleep (lowest id on ties) is designated. A designated node runs
//! `final_sync_rounds` sync rounds so its data spreads before it goes dormant,
//! then sleeps for `sleep_duration_ms`.
//!
//! Dormant time is credited on the node's next probe event (its own round,
//! answering a probe, or being weighed as a candidate), so the figure it
//! advertises always includes its last sleep.

use std::collections::{BTreeMap, HashMap};

use tracing::{debug, error, info, trace};

use vectorsync_core::NodeId;

use crate::error::Result;
use crate::messages::Message;
use crate::node::Node;
use crate::state::NodeState;
use crate::timer::{Effects, Timer, TimerId};

/// Cumulative sleep time reported by each replier in one probe round.
#[derive(Debug, Default, Clone, PartialEq, Eq)]
pub struct ReplyTally {
    replies: BTreeMap<NodeId, u64>,
}

impl ReplyTally {
    pub fn new() -> Self {
        Self::default()
    }

    /// Record a reply. A repeated reply from the same node overwrites.
    pub fn insert(&mut self, node: NodeId, cumulative_sleep_ms: u64) {
        self.replies.insert(node, cumulative_sleep_ms);
    }

    /// Distinct repliers.
    pub fn len(&self) -> usize {
        self.replies.len()
    }

    pub fn is_empty(&self) -> bool {
        self.replies.is_empty()
    }

    pub fn clear(&mut self) {
        self.replies.clear();
    }

    pub fn iter(&self) -> impl Iterator<Item = (NodeId, u64)> + '_ {
        self.replies.iter().map(|(n, c)| (*n, *c))
    }
}

/// Pick the candidate with the least cumulative sleep, lowest id on ties.
pub fn select_designee(candidates: impl IntoIterator<Item = (NodeId, u64)>) -> Option<NodeId> {
    candidates
        .into_iter()
        .min_by_key(|(node, cumulative)| (*cumulative, *node))
        .map(|(node, _)| node)
}

/// Progress of a final-sync barrier.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Barrier {
    /// Sync rounds already broadcast.
    pub rounds_done: u32,
    /// Next tick.
    pub timer: TimerId,
}

/// Duty-cycling state of one node.
#[derive(Debug, Default, Clone)]
pub struct SleepScheduler {
    /// Number of probe rounds this node has started.
    pub round: u64,
    pub tally: ReplyTally,
    /// Open reply window of the current round.
    pub window: Option<TimerId>,
    pub barrier: Option<Barrier>,
    /// Probe replies waiting out their jitter, by prober.
    pub probe_replies: HashMap<NodeId, TimerId>,
    pub wake_timer: Option<TimerId>,
    pub settle_timer: Option<TimerId>,
    pub cumulative_sleep_ms: u64,
    pub sleep_start: Option<i64>,
    pub woke_at: Option<i64>,
    pub times_designated: u64,
}

impl Node {
    // ────────────────────────────────────────────────────────────────────────
    // Probing
    // ────────────────────────────────────────────────────────────────────────

    pub(crate) fn on_probe_cycle(&mut self) -> Result<()> {
        let interval = self.protocol().probe_interval_ms;
        self.schedule(interval, Timer::ProbeCycle);

        if !self.state.is(NodeState::Active) {
            debug!(node = %self.id(), state = %self.state(), "probe round skipped");
            return Ok(());
        }
        self.accrue_dormant_time();
        self.transition(NodeState::Intermediate)?;

        self.sleep.round += 1;
        self.sleep.tally.clear();
        self.effects.broadcast(Message::ProbeRequest {
            group_id: self.group_id().clone(),
            prober_id: self.id(),
        });
        self.stats.probes_sent += 1;

        let round = self.sleep.round;
        let window = self.protocol().reply_window_ms;
        self.sleep.window = Some(self.schedule(window, Timer::ProbeWindowClose { round }));
        debug!(node = %self.id(), round, "probe round started");
        Ok(())
    }

    pub(crate) fn on_probe(&mut self, prober: NodeId) {
        if !self.state.is(NodeState::Active) || self.sleep.probe_replies.contains_key(&prober) {
            return;
        }
        self.accrue_dormant_time();
        let delay = self.jitter(self.protocol().probe_reply_jitter_ms);
        let id = self.schedule(delay, Timer::ProbeReply { prober });
        self.sleep.probe_replies.insert(prober, id);
    }

    pub(crate) fn on_probe_reply_due(&mut self, id: TimerId, prober: NodeId) {
        if self.sleep.probe_replies.get(&prober) != Some(&id) {
            return;
        }
        self.sleep.probe_replies.remove(&prober);
        if !self.state.is(NodeState::Active) {
            trace!(node = %self.id(), prober = %prober, "probe reply skipped");
            return;
        }
        self.effects.send_to(
            prober,
            Message::ProbeReply {
                group_id: self.group_id().clone(),
                node_id: self.id(),
                cumulative_sleep_ms: self.sleep.cumulative_sleep_ms,
            },
        );
        self.stats.probe_replies_sent += 1;
    }

    pub(crate) fn on_probe_reply(&mut self, node: NodeId, cumulative_sleep_ms: u64) {
        if self.sleep.window.is_none() || !self.state.is(NodeState::Intermediate) {
            trace!(node = %self.id(), replier = %node, "late probe reply");
            return;
        }
        self.sleep.tally.insert(node, cumulative_sleep_ms);
    }

    pub(crate) fn on_probe_window_close(&mut self, id: TimerId, round: u64) -> Result<()> {
        if self.sleep.window != Some(id) || self.sleep.round != round {
            return Ok(());
        }
        self.sleep.window = None;
        if !self.state.is(NodeState::Intermediate) {
            return Ok(());
        }

        let active_count = self.sleep.tally.len();
        if active_count < self.protocol().quorum_threshold {
            debug!(node = %self.id(), round, active_count, "below quorum");
            return self.transition(NodeState::Active);
        }

        self.accrue_dormant_time();
        let me = self.id();
        let candidates: Vec<(NodeId, u64)> = self
            .sleep
            .tally
            .iter()
            .chain(std::iter::once((me, self.sleep.cumulative_sleep_ms)))
            .collect();
        let designee = match select_designee(candidates) {
            Some(node) => node,
            None => return self.transition(NodeState::Active),
        };
        debug!(node = %me, round, active_count, designee = %designee, "designated");

        if designee == me {
            self.sleep.times_designated += 1;
            self.start_barrier();
            Ok(())
        } else {
            self.effects.send_to(
                designee,
                Message::SleepCommand {
                    group_id: self.group_id().clone(),
                    target_node_id: designee,
                },
            );
            self.stats.sleep_commands_sent += 1;
            self.transition(NodeState::Active)
        }
    }

    pub(crate) fn on_sleep_command(&mut self, target: NodeId) -> Result<()> {
        if target != self.id() {
            return Ok(());
        }
        if !self.protocol().duty_cycling || !self.state.is(NodeState::Active) {
            debug!(node = %self.id(), state = %self.state(), "sleep command ignored");
            return Ok(());
        }
        self.transition(NodeState::Intermediate)?;
        self.sleep.times_designated += 1;
        self.start_barrier();
        Ok(())
    }

    // ────────────────────────────────────────────────────────────────────────
    // Final-sync barrier
    // ────────────────────────────────────────────────────────────────────────

    /// Run the first sync round now and arm the next tick.
    fn start_barrier(&mut self) {
        self.broadcast_sync();
        let interval = self.protocol().final_sync_interval_ms;
        let timer = self.schedule(interval, Timer::FinalSync);
        self.sleep.barrier = Some(Barrier {
            rounds_done: 1,
            timer,
        });
        debug!(node = %self.id(), "final-sync barrier started");
    }

    pub(crate) fn on_final_sync_tick(&mut self, id: TimerId) -> Result<()> {
        let barrier = match self.sleep.barrier {
            Some(barrier) if barrier.timer == id => barrier,
            _ => return Ok(()),
        };
        if barrier.rounds_done >= self.protocol().final_sync_rounds {
            self.sleep.barrier = None;
            return self.enter_sleep();
        }
        self.broadcast_sync();
        let interval = self.protocol().final_sync_interval_ms;
        let timer = self.schedule(interval, Timer::FinalSync);
        self.sleep.barrier = Some(Barrier {
            rounds_done: barrier.rounds_done + 1,
            timer,
        });
        Ok(())
    }

    fn cancel_barrier(&mut self) -> bool {
        match self.sleep.barrier.take() {
            Some(barrier) => {
                self.cancel(barrier.timer);
                true
            }
            None => false,
        }
    }

    /// A barrier only exists while `Intermediate`, so an ack naming this
    /// node while one runs means a peer has caught up with it.
    pub(crate) fn on_sync_ack(&mut self, target: NodeId) -> Result<()> {
        self.suppress_ack(target);

        if target == self.id() && self.cancel_barrier() {
            debug!(node = %self.id(), "peer caught up, sleeping early");
            return self.enter_sleep();
        }
        Ok(())
    }

    fn enter_sleep(&mut self) -> Result<()> {
        self.accrue_dormant_time();
        self.transition(NodeState::Sleeping)?;
        self.cancel_barrier();
        if let Some(window) = self.sleep.window.take() {
            self.cancel(window);
        }
        let replies: Vec<TimerId> = self.sleep.probe_replies.drain().map(|(_, id)| id).collect();
        for id in replies {
            self.cancel(id);
        }
        self.cancel_pending_acks();
        self.abandon_fetches();

        self.sleep.sleep_start = Some(self.now);
        self.sleep.woke_at = None;
        self.stats.sleeps += 1;
        let duration = self.protocol().sleep_duration_ms;
        self.sleep.wake_timer = Some(self.schedule(duration, Timer::WakeUp));
        info!(node = %self.id(), at = self.now, duration_ms = duration, "sleeping");
        Ok(())
    }

    // ────────────────────────────────────────────────────────────────────────
    // Waking
    // ────────────────────────────────────────────────────────────────────────

    /// Wake a sleeping node early. Has no effect in any other state.
    pub fn wake(&mut self, now: i64) -> Effects {
        self.enter(now);
        if self.state.is(NodeState::Sleeping) {
            if let Some(id) = self.sleep.wake_timer.take() {
                self.cancel(id);
            }
            if let Err(err) = self.wake_up() {
                error!(node = %self.id(), kind = err.kind(), error = %err, "wake failed");
            }
        }
        self.take_effects()
    }

    pub(crate) fn on_wake_timer(&mut self, id: TimerId) -> Result<()> {
        if self.sleep.wake_timer != Some(id) {
            return Ok(());
        }
        self.sleep.wake_timer = None;
        self.wake_up()
    }

    fn wake_up(&mut self) -> Result<()> {
        self.transition(NodeState::Intermediate)?;
        self.sleep.woke_at = Some(self.now);
        self.stats.wakes += 1;
        info!(node = %self.id(), at = self.now, "woke");

        self.broadcast_sync();
        let settle = self.protocol().final_sync_interval_ms;
        self.sleep.settle_timer = Some(self.schedule(settle, Timer::WakeSettle));
        Ok(())
    }

    pub(crate) fn on_wake_settle(&mut self, id: TimerId) -> Result<()> {
        if self.sleep.settle_timer != Some(id) {
            return Ok(());
        }
        self.sleep.settle_timer = None;
        if self.state.is(NodeState::Intermediate) {
            self.transition(NodeState::Active)?;
        }
        Ok(())
    }

    /// Credit a finished dormant period to the cumulative sleep time.
    fn accrue_dormant_time(&mut self) {
        if let (Some(start), Some(woke)) = (self.sleep.sleep_start, self.sleep.woke_at) {
            let slept = u64::try_from(woke - start).unwrap_or(0);
            self.sleep.cumulative_sleep_ms += slept;
            self.sleep.sleep_start = None;
            self.sleep.woke_at = None;
            trace!(node = %self.id(), slept, total = self.sleep.cumulative_sleep_ms, "dormant time credited");
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::{NodeConfig, ProtocolConfig};
    use vectorsync_core::Keypair;

    fn node_with(id: u64, group_size: usize, protocol: ProtocolConfig) -> Node {
        Node::new(
            NodeConfig::new("g", NodeId(id), group_size).with_protocol(protocol),
            Keypair::from_seed(&[id as u8 + 1; 32]),
        )
        .unwrap()
    }

    fn node(id: u64, group_size: usize) -> Node {
        node_with(id, group_size, ProtocolConfig::default())
    }

    fn find_timer(fx: &Effects, pred: impl Fn(&Timer) -> bool) -> (TimerId, u64, Timer) {
        fx.timers()
            .find(|(_, _, t)| pred(t))
            .map(|(id, delay, t)| (id, delay, t.clone()))
            .expect("timer not scheduled")
    }

    fn reply(from: u64, cumulative: u64) -> Message {
        Message::ProbeReply {
            group_id: "g".into(),
            node_id: NodeId(from),
            cumulative_sleep_ms: cumulative,
        }
    }

    /// Start a probe round on `n` and return the window-close timer.
    fn open_round(n: &mut Node, now: i64) -> (TimerId, Timer) {
        let fx = n.handle_timer(TimerId(10_000), Timer::ProbeCycle, now);
        assert!(fx
            .messages()
            .any(|(_, m)| matches!(m, Message::ProbeRequest { .. })));
        let (id, _, timer) = find_timer(&fx, |t| matches!(t, Timer::ProbeWindowClose { .. }));
        (id, timer)
    }

    #[test]
    fn test_select_designee_min_then_lowest_id() {
        let pick = select_designee(vec![(NodeId(3), 10), (NodeId(1), 5), (NodeId(2), 5)]);
        assert_eq!(pick, Some(NodeId(1)));
        assert_eq!(select_designee(Vec::new()), None);
    }

    #[test]
    fn test_start_arms_first_probe_within_interval() {
        let mut a = node(0, 3);
        let fx = a.start(0);
        let (_, delay, _) = find_timer(&fx, |t| *t == Timer::ProbeCycle);
        assert!((1..=30_000).contains(&delay));
        assert!(a.start(5).is_empty());
    }

    #[test]
    fn test_no_probe_cycle_without_duty_cycling() {
        let mut protocol = ProtocolConfig::default();
        protocol.duty_cycling = false;
        let mut a = node_with(0, 3, protocol);
        assert!(a.start(0).is_empty());

        let cmd = Message::SleepCommand {
            group_id: "g".into(),
            target_node_id: NodeId(0),
        };
        a.handle_message(NodeId(1), cmd, 0).unwrap();
        assert_eq!(a.state(), NodeState::Active);
    }

    #[test]
    fn test_below_quorum_reverts_to_active() {
        let mut a = node(0, 3);
        let (id, timer) = open_round(&mut a, 0);
        assert_eq!(a.state(), NodeState::Intermediate);
        a.handle_message(NodeId(1), reply(1, 0), 100).unwrap();

        let fx = a.handle_timer(id, timer, 2_000);
        assert_eq!(a.state(), NodeState::Active);
        assert_eq!(fx.messages().count(), 0);
    }

    #[test]
    fn test_self_designated_runs_exact_final_sync_rounds() {
        let mut a = node(0, 4);
        let (id, timer) = open_round(&mut a, 0);
        for (peer, cumulative) in [(1, 500), (2, 300), (3, 900)] {
            a.handle_message(NodeId(peer), reply(peer, cumulative), 100).unwrap();
        }

        let mut fx = a.handle_timer(id, timer, 2_000);
        assert_eq!(a.times_designated(), 1);
        let mut syncs = 0;
        let mut now = 2_000;
        while a.state() != NodeState::Sleeping {
            syncs += fx
                .messages()
                .filter(|(_, m)| matches!(m, Message::SyncRequest { .. }))
                .count();
            let (tick, delay, t) = find_timer(&fx, |t| *t == Timer::FinalSync);
            now += delay as i64;
            fx = a.handle_timer(tick, t, now);
        }
        assert_eq!(syncs, 3);
        assert_eq!(now, 5_000);
        assert_eq!(a.sleep_start(), Some(5_000));
        let (_, delay, _) = find_timer(&fx, |t| *t == Timer::WakeUp);
        assert_eq!(delay, 60_000);
    }

    #[test]
    fn test_peer_designated_gets_sleep_command() {
        let mut a = node(0, 4);
        a.sleep.cumulative_sleep_ms = 1_000;
        let (id, timer) = open_round(&mut a, 0);
        for (peer, cumulative) in [(1, 500), (2, 300), (3, 300)] {
            a.handle_message(NodeId(peer), reply(peer, cumulative), 100).unwrap();
        }
        let fx = a.handle_timer(id, timer, 2_000);
        let sent: Vec<_> = fx.messages().collect();
        assert_eq!(sent.len(), 1);
        assert!(matches!(
            sent[0],
            (Some(NodeId(2)), Message::SleepCommand { target_node_id: NodeId(2), .. })
        ));
        assert_eq!(a.state(), NodeState::Active);
        assert_eq!(a.stats().sleep_commands_sent, 1);
    }

    #[test]
    fn test_sleep_command_runs_barrier() {
        let mut b = node(1, 3);
        let cmd = Message::SleepCommand {
            group_id: "g".into(),
            target_node_id: NodeId(1),
        };
        let fx = b.handle_message(NodeId(0), cmd.clone(), 0).unwrap();
        assert_eq!(b.state(), NodeState::Intermediate);
        assert_eq!(b.times_designated(), 1);
        assert!(fx
            .messages()
            .any(|(_, m)| matches!(m, Message::SyncRequest { .. })));

        // Not for us: ignored.
        let mut c = node(2, 3);
        c.handle_message(NodeId(0), cmd, 0).unwrap();
        assert_eq!(c.state(), NodeState::Active);
    }

    #[test]
    fn test_ack_to_self_ends_barrier_early() {
        let mut b = node(1, 3);
        let cmd = Message::SleepCommand {
            group_id: "g".into(),
            target_node_id: NodeId(1),
        };
        let fx = b.handle_message(NodeId(0), cmd, 0).unwrap();
        let (tick, _, _) = find_timer(&fx, |t| *t == Timer::FinalSync);

        let ack = Message::SyncAck {
            group_id: "g".into(),
            target_node_id: NodeId(1),
        };
        let fx = b.handle_message(NodeId(2), ack, 300).unwrap();
        assert_eq!(b.state(), NodeState::Sleeping);
        assert_eq!(b.sleep_start(), Some(300));
        assert!(fx.iter().any(|a| *a == crate::timer::Action::Cancel(tick)));
    }

    #[test]
    fn test_barrier_only_while_intermediate() {
        let ack = |target| Message::SyncAck {
            group_id: "g".into(),
            target_node_id: NodeId(target),
        };
        let cmd = Message::SleepCommand {
            group_id: "g".into(),
            target_node_id: NodeId(1),
        };

        // Acks change nothing for an active node.
        let mut b = node(1, 3);
        b.handle_message(NodeId(0), ack(1), 0).unwrap();
        b.handle_message(NodeId(0), ack(2), 0).unwrap();
        assert_eq!(b.state(), NodeState::Active);
        assert!(b.sleep.barrier.is_none());

        let fx = b.handle_message(NodeId(0), cmd, 10).unwrap();
        assert_eq!(b.state(), NodeState::Intermediate);
        assert!(b.sleep.barrier.is_some());

        // An ack meant for someone else leaves the barrier running.
        b.handle_message(NodeId(0), ack(2), 20).unwrap();
        assert_eq!(b.state(), NodeState::Intermediate);
        assert!(b.sleep.barrier.is_some());

        let mut now = 10;
        let mut fx = fx;
        while b.state() != NodeState::Sleeping {
            assert!(b.sleep.barrier.is_some());
            let (tick, delay, t) = find_timer(&fx, |t| *t == Timer::FinalSync);
            now += delay as i64;
            fx = b.handle_timer(tick, t, now);
        }
        assert!(b.sleep.barrier.is_none());

        let fx = b.wake(now + 100);
        assert!(b.sleep.barrier.is_none());
        let (settle, _, t) = find_timer(&fx, |t| *t == Timer::WakeSettle);
        b.handle_timer(settle, t, now + 1_100);
        assert_eq!(b.state(), NodeState::Active);
        assert!(b.sleep.barrier.is_none());
    }

    #[test]
    fn test_sleeping_node_ignores_group() {
        let mut b = node(1, 3);
        b.transition(NodeState::Intermediate).unwrap();
        b.enter_sleep().unwrap();
        b.take_effects();
        let probe = Message::ProbeRequest {
            group_id: "g".into(),
            prober_id: NodeId(0),
        };
        let fx = b.handle_message(NodeId(0), probe, 10).unwrap();
        assert!(fx.is_empty());
        assert_eq!(b.stats().ignored_while_sleeping, 1);
        assert!(b.initiate_sync(10).is_empty());
    }

    #[test]
    fn test_wake_settles_then_credits_on_next_probe() {
        let mut b = node(1, 3);
        b.transition(NodeState::Intermediate).unwrap();
        let fx = {
            b.enter(1_000);
            b.enter_sleep().unwrap();
            b.take_effects()
        };
        let (wake, delay, t) = find_timer(&fx, |t| *t == Timer::WakeUp);
        assert_eq!(delay, 60_000);

        let fx = b.handle_timer(wake, t, 61_000);
        assert_eq!(b.state(), NodeState::Intermediate);
        assert_eq!(b.woke_at(), Some(61_000));
        assert!(fx
            .messages()
            .any(|(_, m)| matches!(m, Message::SyncRequest { .. })));
        let (settle, _, t) = find_timer(&fx, |t| *t == Timer::WakeSettle);
        b.handle_timer(settle, t, 62_000);
        assert_eq!(b.state(), NodeState::Active);
        assert_eq!(b.cumulative_sleep_ms(), 0);

        // Answering a probe credits the dormant period first.
        let probe = Message::ProbeRequest {
            group_id: "g".into(),
            prober_id: NodeId(0),
        };
        let fx = b.handle_message(NodeId(0), probe, 63_000).unwrap();
        assert_eq!(b.cumulative_sleep_ms(), 60_000);
        let (id, _, t) = find_timer(&fx, |t| matches!(t, Timer::ProbeReply { .. }));
        let fx = b.handle_timer(id, t, 63_100);
        assert!(matches!(
            fx.messages().next(),
            Some((Some(NodeId(0)), Message::ProbeReply { cumulative_sleep_ms: 60_000, .. }))
        ));
    }

    #[test]
    fn test_host_wake_cancels_wake_timer() {
        let mut b = node(1, 3);
        b.transition(NodeState::Intermediate).unwrap();
        b.enter_sleep().unwrap();
        let fx = b.take_effects();
        let (wake, _, _) = find_timer(&fx, |t| *t == Timer::WakeUp);

        let fx = b.wake(5_000);
        assert_eq!(b.state(), NodeState::Intermediate);
        assert!(fx.iter().any(|a| *a == crate::timer::Action::Cancel(wake)));
        assert_eq!(b.stats().wakes, 1);

        // Waking an awake node does nothing.
        assert!(node(0, 3).wake(0).is_empty());
    }

    #[test]
    fn test_intermediate_node_skips_probe_round_and_reply() {
        let mut a = node(0, 3);
        a.transition(NodeState::Intermediate).unwrap();
        let fx = a.handle_timer(TimerId(1), Timer::ProbeCycle, 0);
        assert_eq!(fx.messages().count(), 0);
        assert!(fx.timers().any(|(_, _, t)| *t == Timer::ProbeCycle));

        let probe = Message::ProbeRequest {
            group_id: "g".into(),
            prober_id: NodeId(1),
        };
        let fx = a.handle_message(NodeId(1), probe, 0).unwrap();
        assert!(fx.is_empty());
    }
}
