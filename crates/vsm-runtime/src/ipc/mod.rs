mod stream;

pub use stream::{DebugStdioRx, DebugStdioTx, SignalEcho, TcpTransport, parse_line};

use std::io;
use std::sync::Arc;

use async_trait::async_trait;
use orion_error::StructError;
use parking_lot::Mutex;
use tokio::sync::mpsc;
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;

use crate::error::{RuntimeReason, RuntimeResult};
use crate::logger::LogSink;

// ---------------------------------------------------------------------------
// Transport contract
// ---------------------------------------------------------------------------

pub type Message = (String, String);

/// One `receive` round on a transport.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Received {
    Message(String, String),
    /// A frame arrived but carried no usable message; the loop continues.
    Invalid,
    /// The transport's input is exhausted (non-fatal).
    Eof,
}

/// Outbound half of a transport.
#[async_trait]
pub trait SignalTx: Send {
    async fn send(&mut self, signal: &str, value: &str) -> io::Result<()>;
    async fn close(&mut self) -> io::Result<()> {
        Ok(())
    }
}

/// Inbound half of a transport. Send-only transports simply have none.
#[async_trait]
pub trait SignalRx: Send {
    async fn receive(&mut self) -> io::Result<Received>;
}

pub struct TransportPair {
    pub name: String,
    pub tx: Box<dyn SignalTx>,
    pub rx: Option<Box<dyn SignalRx>>,
}

/// Instantiate transports from their CLI identifiers.
///
/// No identifiers selects the stdio debug transport. Supported: `stdio`,
/// `tcp://host:port`.
pub async fn load_transports(
    names: &[String],
    echo: &SignalEcho,
) -> RuntimeResult<Vec<TransportPair>> {
    if names.is_empty() {
        return Ok(vec![stream::stdio_debug(echo.clone())]);
    }
    let mut pairs = Vec::with_capacity(names.len());
    for name in names {
        if name == "stdio" {
            pairs.push(stream::stdio_debug(echo.clone()));
        } else if let Some(addr) = name.strip_prefix("tcp://") {
            pairs.push(TcpTransport::connect(addr).await.map_err(|e| {
                StructError::from(RuntimeReason::Ipc)
                    .with_detail(format!("failed to connect '{name}': {e}"))
            })?);
        } else {
            return Err(StructError::from(RuntimeReason::Ipc)
                .with_detail(format!("unknown ipc module '{name}'")));
        }
    }
    Ok(pairs)
}

// ---------------------------------------------------------------------------
// IpcSink — broadcast handle for the emitter
// ---------------------------------------------------------------------------

/// Cloneable outbound handle: every emission is broadcast to all
/// transports. `close` detaches the writer tasks, which then close their
/// transports.
#[derive(Clone)]
pub struct IpcSink {
    outs: Arc<Mutex<Vec<mpsc::UnboundedSender<Message>>>>,
}

impl IpcSink {
    /// A sink with no transports; emissions go nowhere. Used in tests.
    pub fn disconnected() -> Self {
        Self {
            outs: Arc::new(Mutex::new(Vec::new())),
        }
    }

    pub fn send(&self, signal: &str, value: &str) {
        for out in self.outs.lock().iter() {
            let _ = out.send((signal.to_string(), value.to_string()));
        }
    }

    pub fn close(&self) {
        self.outs.lock().clear();
    }
}

// ---------------------------------------------------------------------------
// Fanout — reader/writer tasks around the transport set
// ---------------------------------------------------------------------------

pub struct Fanout {
    pub sink: IpcSink,
    /// Multiplexed inbound messages from every receiving transport.
    pub inbound: mpsc::Receiver<Message>,
    pub tasks: Vec<JoinHandle<()>>,
}

/// Spawn one writer task per transport and one reader task per receiving
/// transport. Readers multiplex into a single inbound channel, which keeps
/// delivery fair-ish across transports without any polling.
pub fn start_fanout(pairs: Vec<TransportPair>, log: LogSink, cancel: CancellationToken) -> Fanout {
    let (inbound_tx, inbound) = mpsc::channel::<Message>(64);
    let mut outs = Vec::with_capacity(pairs.len());
    let mut tasks = Vec::new();

    for pair in pairs {
        let TransportPair { name, tx, rx } = pair;

        let (out_tx, out_rx) = mpsc::unbounded_channel::<Message>();
        outs.push(out_tx);
        tasks.push(tokio::spawn(write_loop(name.clone(), tx, out_rx)));

        if let Some(rx) = rx {
            tasks.push(tokio::spawn(read_loop(
                name,
                rx,
                inbound_tx.clone(),
                log.clone(),
                cancel.clone(),
            )));
        }
    }

    Fanout {
        sink: IpcSink {
            outs: Arc::new(Mutex::new(outs)),
        },
        inbound,
        tasks,
    }
}

async fn write_loop(
    name: String,
    mut tx: Box<dyn SignalTx>,
    mut out_rx: mpsc::UnboundedReceiver<Message>,
) {
    while let Some((signal, value)) = out_rx.recv().await {
        if let Err(e) = tx.send(&signal, &value).await {
            vsm_warn!(conn, transport = %name, error = %e, "transport send error");
            break;
        }
    }
    if let Err(e) = tx.close().await {
        vsm_debug!(conn, transport = %name, error = %e, "transport close error");
    }
}

async fn read_loop(
    name: String,
    mut rx: Box<dyn SignalRx>,
    inbound: mpsc::Sender<Message>,
    log: LogSink,
    cancel: CancellationToken,
) {
    loop {
        tokio::select! {
            result = rx.receive() => match result {
                Ok(Received::Message(signal, value)) => {
                    if inbound.send((signal, value)).await.is_err() {
                        break;
                    }
                }
                Ok(Received::Invalid) => log.info("skipping invalid message"),
                Ok(Received::Eof) => {
                    vsm_debug!(conn, transport = %name, "end of input");
                    break;
                }
                Err(e) => {
                    vsm_warn!(conn, transport = %name, error = %e, "transport read error");
                    break;
                }
            },
            _ = cancel.cancelled() => break,
        }
    }
}
