use std::collections::HashMap;
use std::sync::{Arc, Weak};
use std::time::Duration;

use parking_lot::Mutex;
use tokio::task::JoinHandle;

use vsm_core::ruleset::{RuleId, RuleSet};
use vsm_core::tree::EmitSpec;
use vsm_core::{MonitorEffect, NodeId, SignalMap, StateStore, Value, eval_expr};

use crate::clock::Clock;
use crate::ipc::IpcSink;
use crate::logger::{Direction, LogSink};

// ---------------------------------------------------------------------------
// Engine — dispatch, emission, and monitor timers
// ---------------------------------------------------------------------------

/// The reactive core bundled into one value: rule tree, state store,
/// dependency index, and outstanding monitor timers, all behind a single
/// mutex. Timer tasks and delayed emits re-enter through the same lock, so
/// monitor transitions never interleave with dispatch.
pub struct Engine {
    core: Mutex<Core>,
    log: LogSink,
    ipc: IpcSink,
    clock: Clock,
    map: Arc<SignalMap>,
    log_condition_checks: bool,
    /// Handed to timer and delayed-emit tasks so they never keep the
    /// engine alive past shutdown.
    weak: Weak<Engine>,
}

struct Core {
    tree: vsm_core::RuleTree,
    rules: Vec<vsm_core::CompiledRule>,
    deps: HashMap<String, Vec<RuleId>>,
    state: StateStore,
    timers: HashMap<NodeId, TimerPair>,
}

struct TimerPair {
    start: JoinHandle<()>,
    stop: JoinHandle<()>,
}

impl TimerPair {
    fn abort(&self) {
        self.start.abort();
        self.stop.abort();
    }
}

impl Engine {
    pub fn new(
        ruleset: RuleSet,
        state: StateStore,
        map: Arc<SignalMap>,
        log: LogSink,
        ipc: IpcSink,
        clock: Clock,
        log_condition_checks: bool,
    ) -> Arc<Engine> {
        for warning in &ruleset.warnings {
            log.error(warning.clone());
        }
        Arc::new_cyclic(|weak| Engine {
            core: Mutex::new(Core {
                tree: ruleset.tree,
                rules: ruleset.rules,
                deps: ruleset.deps,
                state,
                timers: HashMap::new(),
            }),
            log,
            ipc,
            clock,
            map,
            log_condition_checks,
            weak: weak.clone(),
        })
    }

    // -- Ingestion -----------------------------------------------------------

    /// Type a raw inbound value and dispatch it; untypable values are
    /// logged and dropped.
    pub fn ingest(&self, signal: &str, raw: &str) {
        match Value::type_incoming(raw) {
            Some(value) => self.dispatch(signal, value),
            None => self.log.error(format!("incorrect value: {raw}")),
        }
    }

    /// Record a received signal and evaluate every rule that references it.
    pub fn dispatch(&self, signal: &str, value: Value) {
        let mut core = self.core.lock();
        self.record_received(&mut core, signal, value);

        let Some(rule_ids) = core.deps.get(signal).cloned() else {
            return;
        };
        'rules: for rid in rule_ids {
            for cond in core.tree.conditions_by_rule(rid) {
                if core.tree.is_sequence_blocked(cond) {
                    self.log.error(format!(
                        "changed value for signal '{signal}' ignored because prior \
                         conditions in its sequence block have not been met"
                    ));
                    continue 'rules;
                }
            }
            self.execute_rule(&mut core, rid);
        }
    }

    /// Replay path: record a received signal into state without re-firing
    /// rules, after `delay_ms`.
    pub fn delayed_receive_record(&self, signal: String, value: Value, delay_ms: u64) {
        let weak = self.weak.clone();
        tokio::spawn(async move {
            tokio::time::sleep(Duration::from_millis(delay_ms)).await;
            let Some(engine) = weak.upgrade() else {
                return;
            };
            let mut core = engine.core.lock();
            engine.record_received(&mut core, &signal, value);
        });
    }

    fn record_received(&self, core: &mut Core, signal: &str, value: Value) {
        self.log.signal(
            Direction::Incoming,
            self.clock.runtime_ms(),
            signal,
            self.map.get(signal),
            &value,
        );
        core.state.set(signal, value);
        self.log.lines(core.state.dump_lines());
    }

    // -- Rule execution ------------------------------------------------------

    fn execute_rule(&self, core: &mut Core, rid: RuleId) {
        let rule = &core.rules[rid.index()];
        // signals never observed make the expression unevaluable; the rule
        // is skipped without error
        let Some(result) = eval_expr(&rule.expr, &core.state) else {
            return;
        };
        self.condition_changed(core, rid, result.is_truthy());
    }

    /// Drive the condition state machine, log the ancestor context, perform
    /// the inline emission, and log the check itself.
    fn condition_changed(&self, core: &mut Core, rid: RuleId, truth: bool) {
        let (node, source, emit) = {
            let rule = &core.rules[rid.index()];
            (rule.node, rule.source.clone(), rule.emit.clone())
        };

        let now = self.clock.runtime_ms();
        let mut effects = Vec::new();
        core.tree.notify_condition(node, truth, now, &mut effects);
        self.apply_effects(core, effects);

        // ancestor state is read as-is; it is never re-evaluated here
        let mut all_ancestors_met = true;
        for ancestor in core.tree.ancestor_conditions(node) {
            let Some(cond) = core.tree.condition(ancestor) else {
                continue;
            };
            if !cond.met {
                all_ancestors_met = false;
            }
            for signal in cond.signals.clone() {
                let value = core
                    .state
                    .get(&signal)
                    .map(|v| v.to_string())
                    .unwrap_or_else(|| "(unset)".to_string());
                self.log.info(format!("parent condition: {signal} == {value}"));
            }
        }

        if truth
            && all_ancestors_met
            && let Some(emit) = emit
        {
            self.emit_locked(core, &emit.signal, Value::Str(emit.value));
        }

        if self.log_condition_checks {
            let rendered = if truth { "True" } else { "False" };
            self.log.info(format!("condition: ({source}) => {rendered}"));
        }
    }

    // -- Emission ------------------------------------------------------------

    /// Emit a signal now: log, forward through IPC, and update state.
    ///
    /// The state update does not re-fire rules — the emission is
    /// self-caused.
    pub fn emit(&self, signal: &str, value: Value) {
        let mut core = self.core.lock();
        self.emit_locked(&mut core, signal, value);
    }

    fn emit_locked(&self, core: &mut Core, signal: &str, value: Value) {
        self.log.signal(
            Direction::Outgoing,
            self.clock.runtime_ms(),
            signal,
            self.map.get(signal),
            &value,
        );
        self.ipc.send(signal, &value.to_string());
        core.state.set(signal, value);
        self.log.lines(core.state.dump_lines());
    }

    /// Emit after `delay_ms` on an independent task, leaving the dispatch
    /// loop free.
    pub fn delayed_emit(&self, signal: String, value: Value, delay_ms: u64) {
        let weak = self.weak.clone();
        tokio::spawn(async move {
            tokio::time::sleep(Duration::from_millis(delay_ms)).await;
            if let Some(engine) = weak.upgrade() {
                engine.emit(&signal, value);
            }
        });
    }

    /// Run the unconditional emit queue collected at parse time.
    pub fn run_startup_emits(&self, emits: Vec<EmitSpec>) {
        for spec in emits {
            match spec.delay_ms {
                Some(delay_ms) => self.delayed_emit(spec.signal, Value::Str(spec.value), delay_ms),
                None => self.emit(&spec.signal, Value::Str(spec.value)),
            }
        }
    }

    // -- Monitor timers ------------------------------------------------------

    fn apply_effects(&self, core: &mut Core, effects: Vec<MonitorEffect>) {
        for effect in effects {
            match effect {
                MonitorEffect::Arm {
                    node,
                    epoch,
                    start_ms,
                    stop_ms,
                } => {
                    let start = self.spawn_deadline(node, epoch, start_ms, DeadlineKind::Start);
                    let stop = self.spawn_deadline(node, epoch, stop_ms, DeadlineKind::Stop);
                    if let Some(old) = core.timers.insert(node, TimerPair { start, stop }) {
                        old.abort();
                    }
                }
                MonitorEffect::CancelTimers { node } => {
                    if let Some(pair) = core.timers.remove(&node) {
                        pair.abort();
                    }
                }
                MonitorEffect::Failure { message, .. } => self.log.error(message),
            }
        }
    }

    fn spawn_deadline(
        &self,
        node: NodeId,
        epoch: u64,
        deadline_ms: u64,
        kind: DeadlineKind,
    ) -> JoinHandle<()> {
        let weak = self.weak.clone();
        tokio::spawn(async move {
            tokio::time::sleep(Duration::from_millis(deadline_ms)).await;
            let Some(engine) = weak.upgrade() else {
                return;
            };
            let mut core = engine.core.lock();
            let mut effects = Vec::new();
            match kind {
                DeadlineKind::Start => core.tree.start_deadline(node, epoch, &mut effects),
                DeadlineKind::Stop => core.tree.stop_deadline(node, epoch, &mut effects),
            }
            engine.apply_effects(&mut core, effects);
        })
    }

    // -- Shutdown ------------------------------------------------------------

    /// Abort outstanding timers and close the IPC sink.
    pub fn shutdown(&self) {
        let mut core = self.core.lock();
        for (_, pair) in core.timers.drain() {
            pair.abort();
        }
        self.ipc.close();
    }

    /// Current value of a signal, for tests and diagnostics.
    pub fn state_value(&self, signal: &str) -> Option<Value> {
        self.core.lock().state.get(signal).cloned()
    }
}

#[derive(Clone, Copy)]
enum DeadlineKind {
    Start,
    Stop,
}
