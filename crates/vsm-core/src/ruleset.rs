use std::collections::HashMap;

use orion_error::StructError;
use serde_yaml::Value as Yaml;

use crate::error::{CoreReason, CoreResult};
use crate::signum::SignalMap;
use crate::tree::{ConditionNode, EmitSpec, MonitorWindow, NodeId, NodeKind, RuleTree};
use crate::value::Value;

// ---------------------------------------------------------------------------
// Compiled ruleset
// ---------------------------------------------------------------------------

/// Index into [`RuleSet::rules`].
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct RuleId(pub(crate) usize);

impl RuleId {
    /// Position of the rule in [`RuleSet::rules`].
    pub fn index(self) -> usize {
        self.0
    }
}

/// Inline emission attached to a condition rule.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct InlineEmit {
    pub signal: String,
    pub value: String,
}

/// One compiled condition rule: the expression to evaluate plus the
/// emission to perform when it holds and all ancestors are met.
#[derive(Debug)]
pub struct CompiledRule {
    pub id: RuleId,
    /// The condition node this rule was compiled from.
    pub node: NodeId,
    /// Verbatim condition text, used in `condition: (…) => …` log lines.
    pub source: String,
    pub expr: vsm_lang::ast::Expr,
    pub emit: Option<InlineEmit>,
}

/// Output of ruleset parsing: the tree, the compiled rules, the dependency
/// index, the queue of unconditional emits to run after startup, and any
/// non-fatal diagnostics to log.
#[derive(Debug)]
pub struct RuleSet {
    pub tree: RuleTree,
    pub rules: Vec<CompiledRule>,
    /// signal name → rules whose condition references it
    pub deps: HashMap<String, Vec<RuleId>>,
    pub startup_emits: Vec<EmitSpec>,
    pub warnings: Vec<String>,
}

#[derive(Debug, Clone, Copy, Default)]
pub struct ParseOptions {
    /// Log-replay mode: unconditional emits are suppressed because their
    /// effects are already present in the replayed log.
    pub replaying: bool,
}

/// Parse a YAML ruleset document into a [`RuleSet`].
///
/// Fatal errors (unknown signals, malformed structure) abort parsing; a
/// lone `start`/`stop` key or a non-list wrapper body only produce
/// [`RuleSet::warnings`] entries, matching the source's lenient paths.
pub fn parse_ruleset(text: &str, map: &SignalMap, opts: ParseOptions) -> CoreResult<RuleSet> {
    let doc: Yaml = serde_yaml::from_str(text)
        .map_err(|e| ruleset_err(format!("invalid ruleset YAML: {e}")))?;

    let Yaml::Sequence(items) = doc else {
        return Err(ruleset_err("ruleset must be a list at the top level"));
    };

    let mut parser = Parser {
        tree: RuleTree::new(),
        rules: Vec::new(),
        deps: HashMap::new(),
        startup_emits: Vec::new(),
        warnings: Vec::new(),
        map,
        replaying: opts.replaying,
    };

    let root = parser.tree.root();
    for item in &items {
        // an empty block groups the item's children the way the YAML list
        // item groups them
        let block = parser.tree.add_child(root, NodeKind::Block);
        parser.parse_item(item, block)?;
    }

    Ok(RuleSet {
        tree: parser.tree,
        rules: parser.rules,
        deps: parser.deps,
        startup_emits: parser.startup_emits,
        warnings: parser.warnings,
    })
}

fn ruleset_err(detail: impl Into<String>) -> crate::error::CoreError {
    StructError::from(CoreReason::Ruleset).with_detail(detail.into())
}

// ---------------------------------------------------------------------------
// Parser
// ---------------------------------------------------------------------------

struct Parser<'a> {
    tree: RuleTree,
    rules: Vec<CompiledRule>,
    deps: HashMap<String, Vec<RuleId>>,
    startup_emits: Vec<EmitSpec>,
    warnings: Vec<String>,
    map: &'a SignalMap,
    replaying: bool,
}

impl Parser<'_> {
    fn parse_item(&mut self, item: &Yaml, parent: NodeId) -> CoreResult<()> {
        if item.as_mapping().is_none() {
            return Err(ruleset_err(format!("ruleset entry is not a mapping: {item:?}")));
        }

        // wrappers first, so a condition's sibling wrapper is in place
        // before the condition node itself is appended
        if let Some(body) = item.get("parallel") {
            self.parse_wrapper("parallel", body, parent)?;
        }
        if let Some(body) = item.get("sequence") {
            self.parse_wrapper("sequence", body, parent)?;
        }

        if item.get("condition").is_some() {
            self.parse_condition_item(item, parent)?;
        } else if let Some(emit) = item.get("emit") {
            self.parse_emit_item(emit, parent)?;
        }
        Ok(())
    }

    fn parse_wrapper(&mut self, keyword: &str, body: &Yaml, parent: NodeId) -> CoreResult<()> {
        let Yaml::Sequence(entries) = body else {
            self.warnings.push(format!(
                "{keyword} block contains non-list item as direct child"
            ));
            return Ok(());
        };
        let kind = match keyword {
            "sequence" => NodeKind::Sequence { next_block: 0 },
            _ => NodeKind::Parallel,
        };
        let wrapper = self.tree.add_child(parent, kind);
        for entry in entries {
            let block = self.tree.add_child(wrapper, NodeKind::Block);
            self.parse_item(entry, block)?;
        }
        Ok(())
    }

    fn parse_condition_item(&mut self, item: &Yaml, parent: NodeId) -> CoreResult<()> {
        let source = item
            .get("condition")
            .and_then(Yaml::as_str)
            .ok_or_else(|| ruleset_err("condition value must be a string"))?
            .to_string();

        let expr = vsm_lang::parse_condition(&source)
            .map_err(|e| ruleset_err(e.to_string()))?;

        let signals = expr.signals();
        for signal in &signals {
            self.require_mapped(signal)?;
        }

        let monitor = self.parse_monitor(item)?;

        let node = self.tree.add_child(
            parent,
            NodeKind::Condition(Box::new(ConditionNode {
                source: source.clone(),
                expr: expr.clone(),
                signals: signals.clone(),
                rule: None,
                monitor,
                met: false,
                monitor_init_ms: None,
                timers_armed: false,
                monitor_epoch: 0,
            })),
        );

        let emit = match item.get("emit") {
            Some(spec) => Some(self.parse_inline_emit(spec)?),
            None => None,
        };

        let id = RuleId(self.rules.len());
        self.rules.push(CompiledRule {
            id,
            node,
            source,
            expr,
            emit,
        });
        if let Some(cond) = self.tree.condition_mut(node) {
            cond.rule = Some(id);
        }
        for signal in signals {
            self.deps.entry(signal).or_default().push(id);
        }
        Ok(())
    }

    /// `start`/`stop` must come as a pair; a lone key logs an error and the
    /// condition proceeds unmonitored.
    fn parse_monitor(&mut self, item: &Yaml) -> CoreResult<Option<MonitorWindow>> {
        let start = item.get("start");
        let stop = item.get("stop");
        match (start, stop) {
            (Some(start), Some(stop)) => {
                let start_ms = yaml_millis(start)
                    .ok_or_else(|| ruleset_err("'start' must be a non-negative integer (ms)"))?;
                let stop_ms = yaml_millis(stop)
                    .ok_or_else(|| ruleset_err("'stop' must be a non-negative integer (ms)"))?;
                Ok(Some(MonitorWindow { start_ms, stop_ms }))
            }
            (Some(_), None) => {
                self.warnings
                    .push("'start' keyword has no corresponding 'stop' keyword".to_string());
                Ok(None)
            }
            (None, Some(_)) => {
                self.warnings
                    .push("'stop' keyword has no corresponding 'start' keyword".to_string());
                Ok(None)
            }
            (None, None) => Ok(None),
        }
    }

    fn parse_inline_emit(&mut self, spec: &Yaml) -> CoreResult<InlineEmit> {
        let (signal, value, delay) = self.parse_emit_fields(spec)?;
        if delay.is_some() {
            self.warnings
                .push("'delay' is ignored on an emit attached to a condition".to_string());
        }
        Ok(InlineEmit { signal, value })
    }

    fn parse_emit_item(&mut self, spec: &Yaml, parent: NodeId) -> CoreResult<()> {
        // avoid emitting duplicates when replaying a log that already
        // contains this emission
        if self.replaying {
            return Ok(());
        }
        let (signal, value, delay_ms) = self.parse_emit_fields(spec)?;
        let emit = EmitSpec {
            signal,
            value,
            delay_ms,
        };
        self.tree.add_child(parent, NodeKind::Emit(emit.clone()));
        self.startup_emits.push(emit);
        Ok(())
    }

    fn parse_emit_fields(&mut self, spec: &Yaml) -> CoreResult<(String, String, Option<u64>)> {
        let signal = spec
            .get("signal")
            .and_then(Yaml::as_str)
            .ok_or_else(|| ruleset_err("emit needs a 'signal' string"))?
            .to_string();
        self.require_mapped(&signal)?;

        let value = spec
            .get("value")
            .and_then(yaml_scalar_to_string)
            .ok_or_else(|| ruleset_err(format!("emit '{signal}' needs a scalar 'value'")))?;

        let delay_ms = match spec.get("delay") {
            Some(delay) => Some(
                yaml_millis(delay)
                    .ok_or_else(|| ruleset_err("'delay' must be a non-negative integer (ms)"))?,
            ),
            None => None,
        };
        Ok((signal, value, delay_ms))
    }

    fn require_mapped(&self, signal: &str) -> CoreResult<()> {
        if self.map.contains(signal) {
            Ok(())
        } else {
            Err(StructError::from(CoreReason::SignalMap).with_detail(format!(
                "signal '{signal}' not in signal number mapping file"
            )))
        }
    }
}

fn yaml_millis(v: &Yaml) -> Option<u64> {
    v.as_u64()
}

/// Render an emit value scalar the way the engine transmits it: emitted
/// values travel as text, so booleans become `True`/`False` and numbers
/// their printed form.
fn yaml_scalar_to_string(v: &Yaml) -> Option<String> {
    match v {
        Yaml::String(s) => Some(s.clone()),
        Yaml::Bool(true) => Some("True".to_string()),
        Yaml::Bool(false) => Some("False".to_string()),
        Yaml::Number(n) => {
            if let Some(i) = n.as_i64() {
                Some(i.to_string())
            } else {
                n.as_f64().map(|f| Value::Float(f).to_string())
            }
        }
        _ => None,
    }
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------
