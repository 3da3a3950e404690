use std::sync::Arc;

use orion_error::op_context;
use orion_error::prelude::*;
use tokio::io::AsyncWrite;
use tokio::sync::mpsc;
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;

use vsm_core::{SignalMap, StateStore, parse_ruleset};
use vsm_core::ruleset::ParseOptions;

use crate::clock::Clock;
use crate::config::{Config, LOG_FILE_DEFAULT};
use crate::engine::Engine;
use crate::error::{RuntimeReason, RuntimeResult};
use crate::ipc::{Message, SignalEcho, load_transports, start_fanout};
use crate::logger::LogSink;
use crate::replay::{parse_replay_log, schedule_replay};

// ---------------------------------------------------------------------------
// Vsm — the top-level lifecycle handle
// ---------------------------------------------------------------------------

/// Bootstraps the engine and owns the receive loop.
///
/// Construction order: signal map → signal log → ruleset → initial state →
/// transports → engine → startup emits → replay. Shutdown reverses it:
/// the receive loop stops first, then timers are aborted and the IPC sink
/// closed, and the log writer drains last.
pub struct Vsm {
    engine: Arc<Engine>,
    inbound: mpsc::Receiver<Message>,
    cancel: CancellationToken,
    log: LogSink,
    log_task: JoinHandle<()>,
    ipc_tasks: Vec<JoinHandle<()>>,
}

impl Vsm {
    #[tracing::instrument(name = "vsm.bootstrap", skip_all, fields(rules = %config.rules.display()))]
    pub async fn bootstrap(config: &Config) -> RuntimeResult<Vsm> {
        let mut op = op_context!("vsm-bootstrap").with_auto_log();
        op.record("rules", config.rules.display().to_string().as_str());
        config.validate()?;

        let clock = Clock::start_now();

        let map = Arc::new(SignalMap::load(&config.signal_number_file).err_conv()?);
        vsm_debug!(conf, signals = map.len(), version = map.version(), "signal number map loaded");

        let writer = open_log_writer(config).await?;
        let (log, log_task) = LogSink::spawn(config.log_format, writer);

        let replaying = config.replay_log_file.is_some();
        let rules_text = std::fs::read_to_string(&config.rules).map_err(|e| {
            StructError::from(RuntimeReason::Bootstrap)
                .with_detail(format!("failed to read ruleset '{}': {e}", config.rules.display()))
        })?;
        let mut ruleset =
            parse_ruleset(&rules_text, &map, ParseOptions { replaying }).err_conv()?;
        let startup_emits = std::mem::take(&mut ruleset.startup_emits);
        vsm_info!(
            sys,
            rules = ruleset.rules.len(),
            startup_emits = startup_emits.len(),
            "ruleset compiled"
        );

        let mut state = StateStore::new();
        if let Some(path) = &config.initial_state {
            let text = std::fs::read_to_string(path).map_err(|e| {
                StructError::from(RuntimeReason::Bootstrap)
                    .with_detail(format!("failed to read initial state '{}': {e}", path.display()))
            })?;
            state.seed_initial(&text).err_conv()?;
        }

        let cancel = CancellationToken::new();
        let echo = SignalEcho::new(clock, Arc::clone(&map));
        let transports = load_transports(&config.ipc_modules, &echo).await?;
        let fanout = start_fanout(transports, log.clone(), cancel.clone());

        let engine = Engine::new(
            ruleset,
            state,
            map,
            log.clone(),
            fanout.sink.clone(),
            clock,
            config.log_condition_checks,
        );

        // unconditional emits run once the state seed is in place
        engine.run_startup_emits(startup_emits);

        if let Some(path) = &config.replay_log_file {
            let text = std::fs::read_to_string(path).map_err(|e| {
                StructError::from(RuntimeReason::Bootstrap)
                    .with_detail(format!("failed to read replay log '{}': {e}", path.display()))
            })?;
            let (entries, errors) = parse_replay_log(&text);
            for error in errors {
                log.error(error);
            }
            vsm_info!(sys, entries = entries.len(), rate = config.replay_rate, "replay scheduled");
            schedule_replay(&engine, entries, config.replay_rate, clock.runtime_ms());
        }

        op.mark_suc();
        Ok(Vsm {
            engine,
            inbound: fanout.inbound,
            cancel,
            log,
            log_task,
            ipc_tasks: fanout.tasks,
        })
    }

    /// Root cancellation token, for signal integration.
    pub fn cancel_token(&self) -> CancellationToken {
        self.cancel.clone()
    }

    /// Receive loop: runs until the `quit` signal or cancellation.
    ///
    /// A transport hitting end-of-input is non-fatal; the engine keeps
    /// running on its timers until told to stop.
    pub async fn run(mut self) -> RuntimeResult<()> {
        loop {
            tokio::select! {
                _ = self.cancel.cancelled() => break,
                message = self.inbound.recv() => match message {
                    Some((signal, value)) => {
                        if signal == "quit" && value.is_empty() {
                            vsm_info!(sys, "quit signal received");
                            break;
                        }
                        self.engine.ingest(&signal, &value);
                    }
                    // every inbound transport is done; wait for a shutdown
                    // signal while delayed work keeps running
                    None => {
                        self.cancel.cancelled().await;
                        break;
                    }
                },
            }
        }
        self.shutdown().await
    }

    async fn shutdown(self) -> RuntimeResult<()> {
        vsm_info!(sys, "initiating shutdown");
        self.engine.shutdown();
        self.cancel.cancel();
        for task in self.ipc_tasks {
            task.await.map_err(|e| {
                StructError::from(RuntimeReason::Shutdown)
                    .with_detail(format!("ipc task join error: {e}"))
            })?;
        }
        self.log.shutdown();
        self.log_task.await.map_err(|e| {
            StructError::from(RuntimeReason::Shutdown)
                .with_detail(format!("log task join error: {e}"))
        })?;
        Ok(())
    }
}

async fn open_log_writer(config: &Config) -> RuntimeResult<Box<dyn AsyncWrite + Send + Unpin>> {
    let path = match config.log_file.as_deref() {
        Some("-") => return Ok(Box::new(tokio::io::stdout())),
        Some("") | None => LOG_FILE_DEFAULT,
        Some(path) => path,
    };
    let file = tokio::fs::File::create(path).await.map_err(|e| {
        StructError::from(RuntimeReason::Bootstrap)
            .with_detail(format!("failed to open log file '{path}': {e}"))
    })?;
    Ok(Box::new(file))
}

// ---------------------------------------------------------------------------
// Signal handling
// ---------------------------------------------------------------------------

/// Cancel the engine on the first SIGINT/SIGTERM, for a clean exit.
pub async fn wait_for_signal(cancel: CancellationToken) {
    #[cfg(unix)]
    {
        use tokio::signal::unix::{SignalKind, signal};
        let Ok(mut sigterm) = signal(SignalKind::terminate()) else {
            let _ = tokio::signal::ctrl_c().await;
            cancel.cancel();
            return;
        };
        tokio::select! {
            _ = tokio::signal::ctrl_c() => {
                vsm_info!(sys, signal = "SIGINT", "received signal, shutting down");
            }
            _ = sigterm.recv() => {
                vsm_info!(sys, signal = "SIGTERM", "received signal, shutting down");
            }
        }
    }
    #[cfg(not(unix))]
    {
        let _ = tokio::signal::ctrl_c().await;
        vsm_info!(sys, "received shutdown signal, shutting down");
    }
    cancel.cancel();
}
