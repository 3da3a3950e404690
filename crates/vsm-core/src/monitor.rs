use crate::tree::{NodeId, RuleTree};

// ---------------------------------------------------------------------------
// MonitorEffect — side effects requested by a transition
// ---------------------------------------------------------------------------

/// Side effects produced by monitor transitions.
///
/// The state machine itself is pure: it mutates condition runtime fields and
/// returns the timer/log work for the runtime to carry out. This keeps every
/// transition testable without a scheduler.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum MonitorEffect {
    /// Spawn start/stop timers for `node`. `epoch` must be echoed back by
    /// the timer callbacks so stale fires can be discarded.
    Arm {
        node: NodeId,
        epoch: u64,
        start_ms: u64,
        stop_ms: u64,
    },
    /// Abort any outstanding timers for `node`. Silent: already-fired
    /// timers are no-ops to cancel.
    CancelTimers { node: NodeId },
    /// A monitor failed; the message goes to the signal log as an error.
    Failure { node: NodeId, message: String },
}

// ---------------------------------------------------------------------------
// Monitor transitions
// ---------------------------------------------------------------------------

impl RuleTree {
    /// The condition's own expression changed truth value.
    ///
    /// A monitored condition may only latch `met = true` before its start
    /// deadline (or while no monitor is running); dropping to false inside
    /// the start/stop window fails the monitor. The new truth value then
    /// propagates to every subcondition, and the enclosing sequence, if
    /// any, advances past this node.
    pub fn notify_condition(
        &mut self,
        id: NodeId,
        result: bool,
        now_ms: u64,
        effects: &mut Vec<MonitorEffect>,
    ) {
        let Some(cond) = self.condition(id) else {
            return;
        };
        let window = cond.monitor;
        let init = cond.monitor_init_ms;
        let armed = cond.timers_armed;

        if result {
            let before_start = matches!(
                (window, init),
                (Some(w), Some(i)) if now_ms < i + w.start_ms
            );
            if before_start || !armed {
                if let Some(c) = self.condition_mut(id) {
                    c.met = true;
                }
            }
        } else {
            if let Some(c) = self.condition_mut(id) {
                c.met = false;
            }
            if let (Some(w), Some(i)) = (window, init)
                && armed
                && now_ms >= i + w.start_ms
                && now_ms < i + w.stop_ms
            {
                let message = format!(
                    "subcondition not maintained between 'start' time of {}ms and 'stop' time of {}ms",
                    w.start_ms, w.stop_ms
                );
                self.monitor_completed(id, false, Some(message), effects);
            }
        }

        let met = self.condition(id).map(|c| c.met).unwrap_or(false);
        for sub in self.subconditions(id) {
            self.notify_ancestor(sub, met, now_ms, effects);
        }
        self.sequence_advance(id);
    }

    /// A governing condition's truth value was pushed down to this node.
    ///
    /// Parent-true arms the monitor (when one is declared and idle);
    /// parent-false cancels any running monitor without logging.
    pub fn notify_ancestor(
        &mut self,
        id: NodeId,
        parent_met: bool,
        now_ms: u64,
        effects: &mut Vec<MonitorEffect>,
    ) {
        let Some(cond) = self.condition_mut(id) else {
            return;
        };
        if parent_met {
            if !cond.timers_armed
                && let Some(w) = cond.monitor
            {
                cond.monitor_init_ms = Some(now_ms);
                cond.timers_armed = true;
                cond.monitor_epoch += 1;
                effects.push(MonitorEffect::Arm {
                    node: id,
                    epoch: cond.monitor_epoch,
                    start_ms: w.start_ms,
                    stop_ms: w.stop_ms,
                });
            }
        } else if cond.timers_armed {
            cond.met = false;
            cond.timers_armed = false;
            effects.push(MonitorEffect::CancelTimers { node: id });
        }
    }

    /// The start timer fired: the inner condition had to be met by now.
    pub fn start_deadline(&mut self, id: NodeId, epoch: u64, effects: &mut Vec<MonitorEffect>) {
        let Some(cond) = self.condition(id) else {
            return;
        };
        if !cond.timers_armed || cond.monitor_epoch != epoch {
            return; // stale fire from a cancelled or re-armed monitor
        }
        if !cond.met {
            let start_ms = cond.monitor.map(|w| w.start_ms).unwrap_or(0);
            let message = format!("condition not met by 'start' time of {start_ms}ms");
            self.monitor_completed(id, false, Some(message), effects);
        }
    }

    /// The stop timer fired: the window closed with the condition held.
    pub fn stop_deadline(&mut self, id: NodeId, epoch: u64, effects: &mut Vec<MonitorEffect>) {
        let Some(cond) = self.condition(id) else {
            return;
        };
        if !cond.timers_armed || cond.monitor_epoch != epoch {
            return;
        }
        self.monitor_completed(id, true, None, effects);
        if let Some(c) = self.condition_mut(id) {
            c.met = true;
        }
    }

    fn monitor_completed(
        &mut self,
        id: NodeId,
        succeeded: bool,
        failure: Option<String>,
        effects: &mut Vec<MonitorEffect>,
    ) {
        let Some(cond) = self.condition_mut(id) else {
            return;
        };
        if cond.timers_armed {
            cond.timers_armed = false;
            effects.push(MonitorEffect::CancelTimers { node: id });
        }
        if !succeeded {
            cond.met = false;
            if let Some(message) = failure {
                effects.push(MonitorEffect::Failure { node: id, message });
            }
        }
    }
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------
