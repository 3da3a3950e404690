use tokio::io::{AsyncWrite, AsyncWriteExt};
use tokio::sync::mpsc;
use tokio::task::JoinHandle;

use vsm_core::Value;

// ---------------------------------------------------------------------------
// Signal log — the product artifact
// ---------------------------------------------------------------------------
//
// Distinct from `tracing` diagnostics: this is the log file consumers parse
// and the replayer reads back, so every line format is part of the external
// contract. A dedicated writer task keeps a slow log sink from blocking the
// dispatch loop.

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Direction {
    Incoming,
    Outgoing,
}

impl Direction {
    pub fn indicator(self) -> char {
        match self {
            Direction::Incoming => '>',
            Direction::Outgoing => '<',
        }
    }

    fn category(self) -> &'static str {
        match self {
            Direction::Incoming => "incoming",
            Direction::Outgoing => "outgoing",
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum LogFormat {
    #[default]
    Text,
    Catapult,
}

#[derive(Debug)]
enum Record {
    Line(String),
    Signal {
        t_ms: u64,
        name: String,
        num: Option<u32>,
        value: Value,
        direction: Direction,
    },
    Shutdown,
}

/// Format a signal event as a log line, e.g.
/// `> 12,transmission.gear,1,'reverse'`.
///
/// Signals missing from the number map render the literal `[SIGNUM]`.
pub fn format_signal_line(
    direction: Direction,
    t_ms: u64,
    name: &str,
    num: Option<u32>,
    value: &Value,
) -> String {
    let num_text = match num {
        Some(n) => n.to_string(),
        None => "[SIGNUM]".to_string(),
    };
    format!(
        "{} {},{},{},{}",
        direction.indicator(),
        t_ms,
        name,
        num_text,
        value.repr()
    )
}

// ---------------------------------------------------------------------------
// LogSink — cloneable handle to the writer task
// ---------------------------------------------------------------------------

#[derive(Clone)]
pub struct LogSink {
    tx: mpsc::UnboundedSender<Record>,
}

impl LogSink {
    /// Spawn the writer task over `writer` and return the sink handle.
    ///
    /// The task ends when [`shutdown`](Self::shutdown) is called or every
    /// handle is dropped; pending records are flushed first.
    pub fn spawn<W>(format: LogFormat, writer: W) -> (LogSink, JoinHandle<()>)
    where
        W: AsyncWrite + Send + Unpin + 'static,
    {
        let (tx, rx) = mpsc::unbounded_channel();
        let handle = tokio::spawn(write_loop(format, writer, rx));
        (LogSink { tx }, handle)
    }

    /// Log a plain informative line.
    pub fn info(&self, msg: impl Into<String>) {
        let _ = self.tx.send(Record::Line(msg.into()));
    }

    /// Log an error line. Errors share the stream with info lines.
    pub fn error(&self, msg: impl Into<String>) {
        let _ = self.tx.send(Record::Line(msg.into()));
    }

    /// Log several lines in order (state dumps).
    pub fn lines(&self, lines: Vec<String>) {
        for line in lines {
            self.info(line);
        }
    }

    /// Log a signal reception or emission.
    pub fn signal(
        &self,
        direction: Direction,
        t_ms: u64,
        name: &str,
        num: Option<u32>,
        value: &Value,
    ) {
        let _ = self.tx.send(Record::Signal {
            t_ms,
            name: name.to_string(),
            num,
            value: value.clone(),
            direction,
        });
    }

    /// Ask the writer task to flush and stop.
    pub fn shutdown(&self) {
        let _ = self.tx.send(Record::Shutdown);
    }
}

async fn write_loop<W>(format: LogFormat, mut writer: W, mut rx: mpsc::UnboundedReceiver<Record>)
where
    W: AsyncWrite + Send + Unpin + 'static,
{
    if format == LogFormat::Catapult {
        // Catapult traces are one JSON array, opened at startup and left
        // unterminated like any crash-tolerant trace stream.
        if writer.write_all(b"[\n").await.is_err() {
            return;
        }
    }

    while let Some(record) = rx.recv().await {
        let rendered = match record {
            Record::Shutdown => break,
            Record::Line(line) => match format {
                LogFormat::Text => Some(format!("{line}\n")),
                LogFormat::Catapult => None,
            },
            Record::Signal {
                t_ms,
                name,
                num,
                value,
                direction,
            } => match format {
                LogFormat::Text => Some(format!(
                    "{}\n",
                    format_signal_line(direction, t_ms, &name, num, &value)
                )),
                LogFormat::Catapult => Some(catapult_event(t_ms, &name, &value, direction)),
            },
        };
        if let Some(text) = rendered {
            if writer.write_all(text.as_bytes()).await.is_err() {
                vsm_warn!(sys, "signal log writer failed, dropping records");
                return;
            }
            let _ = writer.flush().await;
        }
    }
    let _ = writer.flush().await;
}

fn catapult_event(t_ms: u64, name: &str, value: &Value, direction: Direction) -> String {
    let json_value = match value {
        Value::Str(s) => serde_json::Value::String(s.clone()),
        Value::Bool(b) => serde_json::Value::Bool(*b),
        Value::Int(i) => serde_json::Value::from(*i),
        Value::Float(f) => serde_json::Number::from_f64(*f)
            .map(serde_json::Value::Number)
            .unwrap_or(serde_json::Value::Null),
    };
    let event = serde_json::json!({
        "name": name,
        "pid": std::process::id(),
        "ts": t_ms * 1000,
        "cat": format!("signal,{}", direction.category()),
        "ph": "i",
        "args": { "value": json_value },
    });
    format!("{event},\n")
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------

#[cfg(test)]
mod tests {
    use super::*;
    use tokio::io::AsyncReadExt;

    async fn collect(format: LogFormat, fill: impl FnOnce(&LogSink)) -> String {
        let (writer, mut reader) = tokio::io::duplex(64 * 1024);
        let (sink, handle) = LogSink::spawn(format, writer);
        fill(&sink);
        sink.shutdown();
        handle.await.unwrap();
        drop(sink);
        let mut out = String::new();
        reader.read_to_string(&mut out).await.unwrap();
        out
    }

    #[tokio::test]
    async fn text_format_signal_lines() {
        let out = collect(LogFormat::Text, |sink| {
            sink.signal(
                Direction::Incoming,
                12,
                "transmission.gear",
                Some(1),
                &Value::Str("reverse".into()),
            );
            sink.signal(
                Direction::Outgoing,
                15,
                "car.backup",
                None,
                &Value::Str("True".into()),
            );
            sink.info("condition: (transmission.gear == 'reverse') => True");
        })
        .await;
        assert_eq!(
            out,
            "> 12,transmission.gear,1,'reverse'\n\
             < 15,car.backup,[SIGNUM],'True'\n\
             condition: (transmission.gear == 'reverse') => True\n"
        );
    }

    #[tokio::test]
    async fn catapult_format_emits_json_array_events() {
        let out = collect(LogFormat::Catapult, |sink| {
            sink.info("this line is dropped in catapult format");
            sink.signal(
                Direction::Incoming,
                3,
                "phone.call",
                Some(7),
                &Value::Bool(true),
            );
        })
        .await;
        assert!(out.starts_with("[\n"));
        let event_line = out.lines().nth(1).unwrap();
        let event: serde_json::Value =
            serde_json::from_str(event_line.trim_end_matches(',')).unwrap();
        assert_eq!(event["name"], "phone.call");
        assert_eq!(event["ts"], 3000);
        assert_eq!(event["cat"], "signal,incoming");
        assert_eq!(event["ph"], "i");
        assert_eq!(event["args"]["value"], true);
        assert!(!out.contains("dropped"));
    }

    #[tokio::test]
    async fn state_dump_lines_stay_in_order() {
        let out = collect(LogFormat::Text, |sink| {
            sink.lines(vec![
                "State = {".to_string(),
                "a = 1".to_string(),
                "}".to_string(),
            ]);
        })
        .await;
        assert_eq!(out, "State = {\na = 1\n}\n");
    }
}
