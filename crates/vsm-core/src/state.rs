use std::collections::HashMap;

use orion_error::StructError;

use crate::error::{CoreReason, CoreResult};
use crate::value::Value;

// ---------------------------------------------------------------------------
// StateStore — last-seen value per signal
// ---------------------------------------------------------------------------

/// Shared mapping from signal name to its most recent value.
///
/// Mutated only on receive (dispatcher) and on emit (emitter); entries are
/// never removed.
#[derive(Debug, Default)]
pub struct StateStore {
    values: HashMap<String, Value>,
}

impl StateStore {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn get(&self, signal: &str) -> Option<&Value> {
        self.values.get(signal)
    }

    pub fn set(&mut self, signal: &str, value: Value) {
        self.values.insert(signal.to_string(), value);
    }

    pub fn len(&self) -> usize {
        self.values.len()
    }

    pub fn is_empty(&self) -> bool {
        self.values.is_empty()
    }

    /// Render the full state as dump lines, sorted by signal name:
    ///
    /// ```text
    /// State = {
    /// <name> = <value>
    /// }
    /// ```
    pub fn dump_lines(&self) -> Vec<String> {
        let mut entries: Vec<(&String, &Value)> = self.values.iter().collect();
        entries.sort_by(|a, b| a.0.cmp(b.0));

        let mut lines = Vec::with_capacity(entries.len() + 2);
        lines.push("State = {".to_string());
        for (name, value) in entries {
            lines.push(format!("{name} = {value}"));
        }
        lines.push("}".to_string());
        lines
    }

    /// Seed the store from an initial-state document: a YAML list of
    /// `name = value` strings.
    ///
    /// Values are stored as the raw text after whitespace removal, without
    /// ingest typing — dumps show them exactly as authored.
    pub fn seed_initial(&mut self, text: &str) -> CoreResult<()> {
        let items: Vec<String> = serde_yaml::from_str(text).map_err(|e| {
            StructError::from(CoreReason::InitialState)
                .with_detail(format!("initial state is not a list of strings: {e}"))
        })?;

        for item in items {
            let compact: String = item.chars().filter(|c| *c != ' ').collect();
            let Some((name, raw)) = compact.split_once('=') else {
                return Err(StructError::from(CoreReason::InitialState)
                    .with_detail(format!("initial state entry '{item}' has no '='")));
            };
            self.values
                .insert(name.to_string(), Value::Str(raw.to_string()));
        }
        Ok(())
    }
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn dump_is_sorted_by_name() {
        let mut store = StateStore::new();
        store.set("transmission.gear", Value::Str("reverse".into()));
        store.set("car.backup", Value::Str("True".into()));
        assert_eq!(
            store.dump_lines(),
            vec![
                "State = {",
                "car.backup = True",
                "transmission.gear = reverse",
                "}"
            ]
        );
    }

    #[test]
    fn seed_keeps_raw_strings() {
        let mut store = StateStore::new();
        store.seed_initial("- moving = false\n- speed.value = 5.0\n").unwrap();
        assert_eq!(store.get("moving"), Some(&Value::Str("false".into())));
        assert_eq!(store.get("speed.value"), Some(&Value::Str("5.0".into())));
    }

    #[test]
    fn seed_rejects_entry_without_equals() {
        let mut store = StateStore::new();
        assert!(store.seed_initial("- moving false\n").is_err());
    }

    #[test]
    fn set_overwrites_previous_value() {
        let mut store = StateStore::new();
        store.set("gear", Value::Str("park".into()));
        store.set("gear", Value::Str("reverse".into()));
        assert_eq!(store.get("gear"), Some(&Value::Str("reverse".into())));
        assert_eq!(store.len(), 1);
    }
}
