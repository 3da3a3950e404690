use vsm_core::Value;

use crate::engine::Engine;
use crate::logger::Direction;

// ---------------------------------------------------------------------------
// Log replay — re-inject a recorded signal stream at scaled timing
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, PartialEq)]
pub struct ReplayEntry {
    pub direction: Direction,
    pub time_ms: u64,
    pub name: String,
    pub value: Value,
}

/// Parse a prior signal log.
///
/// Only `> `/`< ` signal lines are replayed; state dumps and condition
/// lines pass through unparsed. Returns the entries plus an error line per
/// unparseable signal record.
pub fn parse_replay_log(text: &str) -> (Vec<ReplayEntry>, Vec<String>) {
    let mut entries = Vec::new();
    let mut errors = Vec::new();

    for line in text.lines() {
        let Some((prefix, remainder)) = line.split_once(' ') else {
            continue;
        };
        let direction = match prefix {
            ">" => Direction::Incoming,
            "<" => Direction::Outgoing,
            _ => continue,
        };

        let fields: Vec<&str> = remainder.split(',').collect();
        let parsed = match fields.as_slice() {
            [time_ms, name, _num, value] => match (time_ms.parse::<u64>(), Value::parse_repr(value))
            {
                (Ok(time_ms), Some(value)) => Some(ReplayEntry {
                    direction,
                    time_ms,
                    name: name.to_string(),
                    value,
                }),
                _ => None,
            },
            _ => None,
        };
        match parsed {
            Some(entry) => entries.push(entry),
            None => errors.push(format!(
                "failed to parse line (invalid number of elements): {line}"
            )),
        }
    }
    (entries, errors)
}

/// Scale a recorded timestamp by the replay rate (percent of original
/// speed; 100 = real time, 50 = half speed).
pub fn scaled_delay_ms(time_ms: u64, rate: f64) -> u64 {
    (time_ms as f64 / (rate / 100.0)).round() as u64
}

/// Schedule every entry against the engine.
///
/// Incoming entries only record state (their downstream effects are
/// already in the log); outgoing entries re-emit without re-checking
/// ancestors. Entries whose scaled time has already passed fire
/// immediately.
pub fn schedule_replay(engine: &Engine, entries: Vec<ReplayEntry>, rate: f64, runtime_ms: u64) {
    for entry in entries {
        let scaled = scaled_delay_ms(entry.time_ms, rate);
        let remaining = scaled.saturating_sub(runtime_ms);
        match entry.direction {
            Direction::Incoming => {
                engine.delayed_receive_record(entry.name, entry.value, remaining)
            }
            Direction::Outgoing => engine.delayed_emit(entry.name, entry.value, remaining),
        }
    }
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn parses_signal_lines_and_skips_plain_lines() {
        let log = "> 12,transmission.gear,1,'reverse'\n\
                   State = {\n\
                   transmission.gear = reverse\n\
                   }\n\
                   condition: (transmission.gear == 'reverse') => True\n\
                   < 15,car.backup,2,'True'\n";
        let (entries, errors) = parse_replay_log(log);
        assert!(errors.is_empty());
        assert_eq!(
            entries,
            vec![
                ReplayEntry {
                    direction: Direction::Incoming,
                    time_ms: 12,
                    name: "transmission.gear".to_string(),
                    value: Value::Str("reverse".into()),
                },
                ReplayEntry {
                    direction: Direction::Outgoing,
                    time_ms: 15,
                    name: "car.backup".to_string(),
                    value: Value::Str("True".into()),
                },
            ]
        );
    }

    #[test]
    fn typed_reprs_round_trip() {
        let log = "> 1,a.b,1,True\n> 2,c.d,2,42\n> 3,e.f,3,50.9\n";
        let (entries, errors) = parse_replay_log(log);
        assert!(errors.is_empty());
        let values: Vec<&Value> = entries.iter().map(|e| &e.value).collect();
        assert_eq!(
            values,
            vec![&Value::Bool(true), &Value::Int(42), &Value::Float(50.9)]
        );
    }

    #[test]
    fn wrong_field_count_is_logged_and_skipped() {
        let (entries, errors) = parse_replay_log("> 12,only,three\n> 1,a.b,1,True\n");
        assert_eq!(entries.len(), 1);
        assert_eq!(
            errors,
            vec!["failed to parse line (invalid number of elements): > 12,only,three".to_string()]
        );
    }

    #[test]
    fn rate_scales_delays() {
        assert_eq!(scaled_delay_ms(1000, 100.0), 1000);
        // 50% speed: everything takes twice as long
        assert_eq!(scaled_delay_ms(1000, 50.0), 2000);
        assert_eq!(scaled_delay_ms(1000, 10000.0), 10);
    }
}
