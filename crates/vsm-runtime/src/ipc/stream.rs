use std::io;
use std::sync::Arc;

use async_trait::async_trait;
use tokio::io::{AsyncBufReadExt, AsyncRead, AsyncWrite, AsyncWriteExt, BufReader, Lines};
use tokio::net::TcpStream;
use tokio::net::tcp::{OwnedReadHalf, OwnedWriteHalf};

use vsm_core::{SignalMap, Value};

use crate::clock::Clock;
use crate::logger::{Direction, format_signal_line};

use super::{Received, SignalRx, SignalTx, TransportPair};

// ---------------------------------------------------------------------------
// Line protocol: `signal=value\n`
// ---------------------------------------------------------------------------

/// Parse one wire line. Blank lines are skipped by the callers; a line
/// without `=` carries no message.
pub fn parse_line(line: &str) -> Received {
    match line.trim().split_once('=') {
        Some((signal, value)) => {
            Received::Message(signal.trim().to_string(), value.trim().to_string())
        }
        None => Received::Invalid,
    }
}

/// Stdio variant of [`parse_line`]: a bare `quit` line is the quit signal
/// with an empty value. Only the debug transport grants `quit` this
/// shorthand; on other transports it is an invalid line like any other.
fn parse_stdio_line(line: &str) -> Received {
    if line.trim() == "quit" {
        return Received::Message("quit".to_string(), String::new());
    }
    parse_line(line)
}

async fn next_message<R>(
    lines: &mut Lines<BufReader<R>>,
    parse: fn(&str) -> Received,
) -> io::Result<Received>
where
    R: AsyncRead + Unpin,
{
    loop {
        match lines.next_line().await? {
            None => return Ok(Received::Eof),
            Some(line) if line.trim().is_empty() => continue,
            Some(line) => return Ok(parse(&line)),
        }
    }
}

// ---------------------------------------------------------------------------
// SignalEcho — debug-transport rendering of signal traffic
// ---------------------------------------------------------------------------

/// Formats signal traffic for the stdio debug transport, which mirrors
/// every message on stdout in the standard log-line format.
#[derive(Clone)]
pub struct SignalEcho {
    clock: Clock,
    map: Arc<SignalMap>,
}

impl SignalEcho {
    pub fn new(clock: Clock, map: Arc<SignalMap>) -> Self {
        Self { clock, map }
    }

    fn line(&self, direction: Direction, signal: &str, raw_value: &str) -> String {
        format_signal_line(
            direction,
            self.clock.runtime_ms(),
            signal,
            self.map.get(signal),
            &Value::Str(raw_value.to_string()),
        )
    }
}

// ---------------------------------------------------------------------------
// Stdio debug transport
// ---------------------------------------------------------------------------

/// Debug transport over stdin/stdout: reads `signal=value` lines and shows
/// all traffic on stdout instead of re-serialising outbound messages.
pub fn stdio_debug(echo: SignalEcho) -> TransportPair {
    TransportPair {
        name: "stdio".to_string(),
        tx: Box::new(DebugStdioTx { echo: echo.clone() }),
        rx: Some(Box::new(DebugStdioRx {
            lines: BufReader::new(tokio::io::stdin()).lines(),
            echo,
        })),
    }
}

pub struct DebugStdioTx {
    echo: SignalEcho,
}

#[async_trait]
impl SignalTx for DebugStdioTx {
    async fn send(&mut self, signal: &str, value: &str) -> io::Result<()> {
        let line = self.echo.line(Direction::Outgoing, signal, value);
        let mut out = tokio::io::stdout();
        out.write_all(line.as_bytes()).await?;
        out.write_all(b"\n").await?;
        out.flush().await
    }
}

pub struct DebugStdioRx {
    lines: Lines<BufReader<tokio::io::Stdin>>,
    echo: SignalEcho,
}

#[async_trait]
impl SignalRx for DebugStdioRx {
    async fn receive(&mut self) -> io::Result<Received> {
        let received = next_message(&mut self.lines, parse_stdio_line).await?;
        if let Received::Message(signal, value) = &received {
            let line = self.echo.line(Direction::Incoming, signal, value);
            let mut out = tokio::io::stdout();
            out.write_all(line.as_bytes()).await?;
            out.write_all(b"\n").await?;
            out.flush().await?;
        }
        Ok(received)
    }
}

// ---------------------------------------------------------------------------
// TCP client transport
// ---------------------------------------------------------------------------

/// TCP client transport carrying the `signal=value` line protocol over a
/// connection to a remote endpoint.
pub struct TcpTransport;

impl TcpTransport {
    pub async fn connect(addr: &str) -> io::Result<TransportPair> {
        let stream = TcpStream::connect(addr).await?;
        let (read_half, write_half) = stream.into_split();
        Ok(TransportPair {
            name: format!("tcp://{addr}"),
            tx: Box::new(TcpTx { out: write_half }),
            rx: Some(Box::new(TcpRx {
                lines: BufReader::new(read_half).lines(),
            })),
        })
    }
}

struct TcpTx {
    out: OwnedWriteHalf,
}

#[async_trait]
impl SignalTx for TcpTx {
    async fn send(&mut self, signal: &str, value: &str) -> io::Result<()> {
        let line = format!("{signal}={value}\n");
        self.out.write_all(line.as_bytes()).await?;
        self.out.flush().await
    }

    async fn close(&mut self) -> io::Result<()> {
        self.out.shutdown().await
    }
}

struct TcpRx {
    lines: Lines<BufReader<OwnedReadHalf>>,
}

#[async_trait]
impl SignalRx for TcpRx {
    async fn receive(&mut self) -> io::Result<Received> {
        next_message(&mut self.lines, parse_line).await
    }
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn parses_signal_value_lines() {
        assert_eq!(
            parse_line("transmission.gear = \"reverse\""),
            Received::Message("transmission.gear".to_string(), "\"reverse\"".to_string())
        );
        assert_eq!(
            parse_line("speed.value=5.0"),
            Received::Message("speed.value".to_string(), "5.0".to_string())
        );
    }

    #[test]
    fn bare_quit_is_the_quit_signal_on_stdio_only() {
        assert_eq!(
            parse_stdio_line("quit"),
            Received::Message("quit".to_string(), String::new())
        );
        // other transports treat it as any other `=`-less line
        assert_eq!(parse_line("quit"), Received::Invalid);
    }

    #[test]
    fn line_without_equals_is_invalid() {
        assert_eq!(parse_line("garbage"), Received::Invalid);
        assert_eq!(parse_stdio_line("garbage"), Received::Invalid);
    }

    #[tokio::test]
    async fn tcp_round_trip() {
        let listener = tokio::net::TcpListener::bind("127.0.0.1:0").await.unwrap();
        let addr = listener.local_addr().unwrap();

        let server = tokio::spawn(async move {
            let (stream, _) = listener.accept().await.unwrap();
            let (read_half, mut write_half) = stream.into_split();
            write_half
                .write_all(b"phone.call = \"active\"\n\ngarbage\n")
                .await
                .unwrap();
            // read one outbound line back
            let mut lines = BufReader::new(read_half).lines();
            lines.next_line().await.unwrap()
        });

        let pair = TcpTransport::connect(&addr.to_string()).await.unwrap();
        let mut rx = pair.rx.unwrap();
        let mut tx = pair.tx;

        assert_eq!(
            rx.receive().await.unwrap(),
            Received::Message("phone.call".to_string(), "\"active\"".to_string())
        );
        // blank line was skipped, garbage is invalid
        assert_eq!(rx.receive().await.unwrap(), Received::Invalid);

        tx.send("car.stop", "True").await.unwrap();
        assert_eq!(server.await.unwrap(), Some("car.stop=True".to_string()));

        tx.close().await.unwrap();
        assert_eq!(rx.receive().await.unwrap(), Received::Eof);
    }
}
