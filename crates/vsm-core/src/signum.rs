use std::collections::HashMap;
use std::path::Path;

use orion_error::StructError;

use crate::error::{CoreReason, CoreResult};

// ---------------------------------------------------------------------------
// SignalMap — .vsi signal-number mapping
// ---------------------------------------------------------------------------

/// Static mapping from signal name to its wire number, loaded once at
/// startup from a `.vsi` file.
///
/// Format: the first line is a floating-point version number, every
/// following line is `<signal-name> <integer-id>`. Any malformed line is a
/// fatal configuration error.
#[derive(Debug, Clone)]
pub struct SignalMap {
    map: HashMap<String, u32>,
    version: f64,
}

impl SignalMap {
    pub fn load(path: &Path) -> CoreResult<SignalMap> {
        let text = std::fs::read_to_string(path).map_err(|e| {
            StructError::from(CoreReason::SignalMap)
                .with_detail(format!("failed to open signal number file: {e}"))
        })?;
        Self::parse(&text)
    }

    pub fn parse(text: &str) -> CoreResult<SignalMap> {
        let mut map = HashMap::new();
        let mut version: Option<f64> = None;

        for line in text.lines() {
            let line = line.trim();
            if line.is_empty() {
                continue;
            }
            if version.is_none() {
                let v: f64 = line.parse().map_err(|e| {
                    StructError::from(CoreReason::SignalMap).with_detail(format!(
                        "failed to parse VSI file version number from line: {line}: {e}"
                    ))
                })?;
                version = Some(v);
                continue;
            }
            let mut fields = line.split_whitespace();
            let entry = match (fields.next(), fields.next(), fields.next()) {
                (Some(signal), Some(num), None) => num.parse::<u32>().map(|n| (signal, n)),
                _ => {
                    return Err(StructError::from(CoreReason::SignalMap)
                        .with_detail(format!("malformed signal number file line: {line}")));
                }
            };
            match entry {
                Ok((signal, num)) => {
                    map.insert(signal.to_string(), num);
                }
                Err(e) => {
                    return Err(StructError::from(CoreReason::SignalMap)
                        .with_detail(format!("malformed signal number file line: {line}: {e}")));
                }
            }
        }

        let version = version.ok_or_else(|| {
            StructError::from(CoreReason::SignalMap).with_detail("signal number file is empty")
        })?;
        Ok(SignalMap { map, version })
    }

    pub fn get(&self, signal: &str) -> Option<u32> {
        self.map.get(signal).copied()
    }

    pub fn contains(&self, signal: &str) -> bool {
        self.map.contains_key(signal)
    }

    pub fn version(&self) -> f64 {
        self.version
    }

    pub fn len(&self) -> usize {
        self.map.len()
    }

    pub fn is_empty(&self) -> bool {
        self.map.is_empty()
    }
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------
