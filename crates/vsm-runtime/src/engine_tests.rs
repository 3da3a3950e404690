use std::sync::Arc;
use std::time::Duration;

use tokio::io::AsyncReadExt;
use tokio::task::JoinHandle;

use vsm_core::ruleset::ParseOptions;
use vsm_core::{SignalMap, StateStore, Value, parse_ruleset};

use crate::clock::Clock;
use crate::engine::Engine;
use crate::ipc::IpcSink;
use crate::logger::{Direction, LogFormat, LogSink};
use crate::replay::{ReplayEntry, parse_replay_log, schedule_replay};

// ---------------------------------------------------------------------------
// Test rig
// ---------------------------------------------------------------------------

struct Rig {
    engine: Arc<Engine>,
    sink: LogSink,
    reader: tokio::io::DuplexStream,
    log_task: JoinHandle<()>,
}

fn test_map() -> SignalMap {
    SignalMap::parse(
        "1.0\n\
         transmission.gear 1\n\
         car.backup 2\n\
         phone.call 3\n\
         speed.value 4\n\
         car.stop 5\n\
         camera.backup.active 6\n\
         lights.external.backup 7\n\
         gear 8\n\
         ignition 9\n\
         parked 10\n\
         ignited 11\n\
         wipers.front.on 12\n\
         moving 13\n\
         damage 14\n",
    )
    .unwrap()
}

fn rig(yaml: &str, log_condition_checks: bool) -> Rig {
    rig_with_options(yaml, log_condition_checks, ParseOptions::default(), StateStore::new())
}

fn rig_with_options(
    yaml: &str,
    log_condition_checks: bool,
    opts: ParseOptions,
    state: StateStore,
) -> Rig {
    let map = Arc::new(test_map());
    let ruleset = parse_ruleset(yaml, &map, opts).unwrap();
    let (writer, reader) = tokio::io::duplex(256 * 1024);
    let (sink, log_task) = LogSink::spawn(LogFormat::Text, writer);
    let engine = Engine::new(
        ruleset,
        state,
        map,
        sink.clone(),
        IpcSink::disconnected(),
        Clock::start_now(),
        log_condition_checks,
    );
    Rig {
        engine,
        sink,
        reader,
        log_task,
    }
}

impl Rig {
    async fn finish(self) -> Vec<String> {
        self.engine.shutdown();
        self.sink.shutdown();
        self.log_task.await.unwrap();
        drop(self.sink);
        let mut reader = self.reader;
        let mut out = String::new();
        reader.read_to_string(&mut out).await.unwrap();
        normalized(&out)
    }
}

/// Strip the runtime timestamp from signal lines so assertions are
/// time-independent: `> 12,a.b,1,'x'` becomes `> a.b,1,'x'`.
fn normalized(out: &str) -> Vec<String> {
    out.lines()
        .map(|line| {
            let stripped = line
                .strip_prefix("> ")
                .map(|rest| ('>', rest))
                .or_else(|| line.strip_prefix("< ").map(|rest| ('<', rest)));
            match stripped {
                Some((ind, rest)) => match rest.split_once(',') {
                    Some((_t, fields)) => format!("{ind} {fields}"),
                    None => line.to_string(),
                },
                None => line.to_string(),
            }
        })
        .collect()
}

const SIMPLE_RULES: &str = r#"
- condition: transmission.gear == 'reverse'
  emit:
    signal: car.backup
    value: true
"#;

const PHONE_RULES: &str = r#"
- condition: phone.call == 'active'
  emit:
    signal: car.stop
    value: true
"#;

const XOR_RULES: &str = r#"
- condition: phone.call == 'active' ^^ speed.value > 50.90
  emit:
    signal: car.stop
    value: true
"#;

const MONITORED_RULES: &str = r#"
- condition: transmission.gear == 'reverse'
  emit:
    signal: car.backup
    value: true
  parallel:
    - condition: camera.backup.active == True
      start: 200
      stop: 400
      emit:
        signal: lights.external.backup
        value: true
"#;

const SEQUENCE_RULES: &str = r#"
- sequence:
    - condition: gear == 'park'
      emit: {signal: parked, value: true}
    - condition: ignition == True
      emit: {signal: ignited, value: true}
"#;

// ---------------------------------------------------------------------------
// Simple reactive rule
// ---------------------------------------------------------------------------

#[tokio::test]
async fn simple_rule_emits_on_match() {
    let rig = rig(SIMPLE_RULES, true);
    rig.engine.ingest("transmission.gear", "\"reverse\"");
    let lines = rig.finish().await;
    assert_eq!(
        lines,
        vec![
            "> transmission.gear,1,'reverse'",
            "State = {",
            "transmission.gear = reverse",
            "}",
            "< car.backup,2,'True'",
            "State = {",
            "car.backup = True",
            "transmission.gear = reverse",
            "}",
            "condition: (transmission.gear == 'reverse') => True",
        ]
    );
}

#[tokio::test]
async fn unmatched_condition_logs_false_and_does_not_emit() {
    let rig = rig(PHONE_RULES, true);
    rig.engine.ingest("phone.call", "\"inactive\"");
    let lines = rig.finish().await;
    assert_eq!(
        lines,
        vec![
            "> phone.call,3,'inactive'",
            "State = {",
            "phone.call = inactive",
            "}",
            "condition: (phone.call == 'active') => False",
        ]
    );
}

#[tokio::test]
async fn signal_without_rules_only_updates_state() {
    let rig = rig(SIMPLE_RULES, true);
    rig.engine.ingest("speed.value", "5.0");
    let lines = rig.finish().await;
    assert_eq!(
        lines,
        vec!["> speed.value,4,'5.0'", "State = {", "speed.value = 5.0", "}"]
    );
}

#[tokio::test]
async fn untypable_value_is_dropped_with_error() {
    let rig = rig(SIMPLE_RULES, true);
    rig.engine.ingest("transmission.gear", "reverse");
    let lines = rig.finish().await;
    assert_eq!(lines, vec!["incorrect value: reverse"]);
}

#[tokio::test]
async fn condition_checks_can_be_suppressed_without_losing_emission() {
    let rig = rig(SIMPLE_RULES, false);
    rig.engine.ingest("transmission.gear", "\"reverse\"");
    let lines = rig.finish().await;
    assert!(lines.iter().any(|l| l.starts_with("< car.backup")));
    assert!(!lines.iter().any(|l| l.starts_with("condition:")));
}

// ---------------------------------------------------------------------------
// XOR condition
// ---------------------------------------------------------------------------

#[tokio::test]
async fn xor_condition_fires_when_one_side_holds() {
    let rig = rig(XOR_RULES, true);
    rig.engine.ingest("phone.call", "\"active\"");
    rig.engine.ingest("speed.value", "5.0");
    let lines = rig.finish().await;
    // first dispatch can't evaluate yet: speed.value has never been seen
    assert!(
        lines
            .iter()
            .any(|l| l == "condition: (phone.call == 'active' ^^ speed.value > 50.90) => True")
    );
    assert!(lines.iter().any(|l| l.starts_with("< car.stop,5,'True'")));
}

// ---------------------------------------------------------------------------
// Monitored condition
// ---------------------------------------------------------------------------

#[tokio::test(start_paused = true)]
async fn monitored_condition_succeeds_inside_window() {
    let rig = rig(MONITORED_RULES, true);
    rig.engine.ingest("transmission.gear", "\"forward\"");
    rig.engine.ingest("transmission.gear", "\"reverse\"");

    tokio::time::sleep(Duration::from_millis(100)).await;
    rig.engine.ingest("camera.backup.active", "true");

    // run past the stop deadline
    tokio::time::sleep(Duration::from_millis(500)).await;
    let lines = rig.finish().await;

    assert!(lines.iter().any(|l| l.starts_with("< car.backup")));
    assert!(lines.iter().any(|l| l.starts_with("< lights.external.backup")));
    assert!(
        lines
            .iter()
            .any(|l| l == "parent condition: transmission.gear == reverse")
    );
    assert!(
        lines
            .iter()
            .any(|l| l == "condition: (camera.backup.active == True) => True")
    );
    assert!(!lines.iter().any(|l| l.contains("not met by 'start' time")));
    assert!(!lines.iter().any(|l| l.contains("not maintained")));
}

#[tokio::test(start_paused = true)]
async fn monitored_condition_fails_when_child_never_arrives() {
    let rig = rig(MONITORED_RULES, true);
    rig.engine.ingest("transmission.gear", "\"reverse\"");

    tokio::time::sleep(Duration::from_millis(500)).await;
    let lines = rig.finish().await;

    assert!(
        lines
            .iter()
            .any(|l| l == "condition not met by 'start' time of 200ms")
    );
    assert!(!lines.iter().any(|l| l.starts_with("< lights.external.backup")));
}

#[tokio::test(start_paused = true)]
async fn monitored_condition_fails_when_truth_drops_inside_window() {
    let rig = rig(MONITORED_RULES, true);
    rig.engine.ingest("transmission.gear", "\"reverse\"");

    tokio::time::sleep(Duration::from_millis(100)).await;
    rig.engine.ingest("camera.backup.active", "true");

    tokio::time::sleep(Duration::from_millis(200)).await;
    rig.engine.ingest("camera.backup.active", "false");

    tokio::time::sleep(Duration::from_millis(300)).await;
    let lines = rig.finish().await;

    assert!(lines.iter().any(|l| l
        == "subcondition not maintained between 'start' time of 200ms and 'stop' time of 400ms"));
}

#[tokio::test(start_paused = true)]
async fn parent_dropping_cancels_monitor_silently() {
    let rig = rig(MONITORED_RULES, true);
    rig.engine.ingest("transmission.gear", "\"reverse\"");
    tokio::time::sleep(Duration::from_millis(50)).await;
    rig.engine.ingest("transmission.gear", "\"forward\"");

    tokio::time::sleep(Duration::from_millis(600)).await;
    let lines = rig.finish().await;

    assert!(!lines.iter().any(|l| l.contains("not met by 'start' time")));
    assert!(!lines.iter().any(|l| l.contains("not maintained")));
}

// ---------------------------------------------------------------------------
// Sequence gating
// ---------------------------------------------------------------------------

#[tokio::test]
async fn sequence_blocks_out_of_order_and_then_runs_in_order() {
    let rig = rig(SEQUENCE_RULES, true);

    rig.engine.ingest("ignition", "true");
    assert_eq!(rig.engine.state_value("ignition"), Some(Value::Bool(true)));

    rig.engine.ingest("gear", "\"park\"");
    rig.engine.ingest("ignition", "true");

    let lines = rig.finish().await;
    assert!(lines.iter().any(|l| l
        == "changed value for signal 'ignition' ignored because prior conditions in its \
            sequence block have not been met"));

    let parked = lines.iter().position(|l| l.starts_with("< parked"));
    let ignited = lines.iter().position(|l| l.starts_with("< ignited"));
    assert!(parked.is_some(), "parked was not emitted: {lines:?}");
    assert!(ignited.is_some(), "ignited was not emitted: {lines:?}");
    assert!(parked < ignited);
}

#[tokio::test]
async fn sequence_wraps_around_after_completion() {
    let rig = rig(SEQUENCE_RULES, true);
    rig.engine.ingest("gear", "\"park\"");
    rig.engine.ingest("ignition", "true");
    // the sequence wrapped: gear is next again and ignition is blocked
    rig.engine.ingest("ignition", "true");
    rig.engine.ingest("gear", "\"park\"");

    let lines = rig.finish().await;
    let blocked = lines
        .iter()
        .filter(|l| l.contains("ignored because prior conditions"))
        .count();
    assert_eq!(blocked, 1);
    let parked = lines
        .iter()
        .filter(|l| l.starts_with("< parked"))
        .count();
    assert_eq!(parked, 2);
}

// ---------------------------------------------------------------------------
// Delayed emission
// ---------------------------------------------------------------------------

#[tokio::test(start_paused = true)]
async fn startup_emit_with_delay_fires_later() {
    let rig = rig("- emit: {signal: wipers.front.on, value: true, delay: 100}\n", true);
    let ruleset = parse_ruleset(
        "- emit: {signal: wipers.front.on, value: true, delay: 100}\n",
        &test_map(),
        ParseOptions::default(),
    )
    .unwrap();
    rig.engine.run_startup_emits(ruleset.startup_emits);

    tokio::time::sleep(Duration::from_millis(50)).await;
    assert_eq!(rig.engine.state_value("wipers.front.on"), None);

    tokio::time::sleep(Duration::from_millis(100)).await;
    assert_eq!(
        rig.engine.state_value("wipers.front.on"),
        Some(Value::Str("True".into()))
    );

    let lines = rig.finish().await;
    assert!(lines.iter().any(|l| l.starts_with("< wipers.front.on,12,'True'")));
}

// ---------------------------------------------------------------------------
// Initial state
// ---------------------------------------------------------------------------

#[tokio::test]
async fn initial_state_strings_participate_in_conditions() {
    let mut state = StateStore::new();
    state.seed_initial("- moving = false\n").unwrap();
    let rig = rig_with_options(
        r#"
- condition: moving != True and damage == True
  emit:
    signal: car.stop
    value: true
"#,
        true,
        ParseOptions::default(),
        state,
    );
    // `damage` and `moving` both live in the map used by this rig
    rig.engine.dispatch("damage", Value::Bool(true));
    let lines = rig.finish().await;
    assert!(lines.iter().any(|l| l.starts_with("< car.stop")));
    assert!(lines.iter().any(|l| l == "moving = false"));
}

// ---------------------------------------------------------------------------
// Replay
// ---------------------------------------------------------------------------

#[tokio::test(start_paused = true)]
async fn replay_reinjects_without_refiring_rules() {
    let rig = rig_with_options(
        SIMPLE_RULES,
        true,
        ParseOptions { replaying: true },
        StateStore::new(),
    );
    let log = "> 10,transmission.gear,1,'reverse'\n\
               < 12,car.backup,2,'True'\n";
    let (entries, errors) = parse_replay_log(log);
    assert!(errors.is_empty());
    schedule_replay(&rig.engine, entries, 100.0, 0);

    tokio::time::sleep(Duration::from_millis(50)).await;
    let lines = rig.finish().await;

    // the reception is recorded but its rule does not re-fire: exactly one
    // car.backup line, the replayed one
    let backups = lines
        .iter()
        .filter(|l| l.starts_with("< car.backup"))
        .count();
    assert_eq!(backups, 1);
    assert!(!lines.iter().any(|l| l.starts_with("condition:")));
    assert!(lines.iter().any(|l| l.starts_with("> transmission.gear")));
}

#[tokio::test(start_paused = true)]
async fn replay_rate_stretches_the_schedule() {
    let rig = rig_with_options(
        SIMPLE_RULES,
        true,
        ParseOptions { replaying: true },
        StateStore::new(),
    );
    let entries = vec![ReplayEntry {
        direction: Direction::Incoming,
        time_ms: 100,
        name: "speed.value".to_string(),
        value: Value::Float(5.0),
    }];
    // 50% rate: the 100ms entry lands at 200ms
    schedule_replay(&rig.engine, entries, 50.0, 0);

    tokio::time::sleep(Duration::from_millis(150)).await;
    assert_eq!(rig.engine.state_value("speed.value"), None);
    tokio::time::sleep(Duration::from_millis(100)).await;
    assert_eq!(rig.engine.state_value("speed.value"), Some(Value::Float(5.0)));

    rig.finish().await;
}
