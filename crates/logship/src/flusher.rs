// Copyright 2025-Present Datadog, Inc. https://www.datadoghq.com/
// SPDX-License-Identifier: Apache-2.0

//! Flush scheduling and batch shipping.
//!
//! [`FlushTrigger`] decides *when* the buffer is drained. On every tick it
//! flushes if the buffer is non-empty and either the line threshold is reached
//! or the maximum time since the last flush has passed. An empty buffer never
//! resets the timer.
//!
//! Lines drained while no session is available are discarded and a new
//! authentication attempt is started.
//!
//! [`Shipper`] decides *how*: formatting, compression and disk persistence run
//! on the blocking pool, then the batch goes to the delivery engine. With
//! `ordered_delivery` a shipment's place in line is fixed when it is flushed,
//! so a slow batch is never overtaken by a faster one flushed after it.
//!
//! The scheduler never waits on a shipment while running. At shutdown it waits
//! for the final flush and every shipment still in flight, bounded by the
//! shutdown grace period.

use crate::buffer::LogBuffer;
use crate::config::Config;
use crate::delivery::DeliveryEngine;
use crate::formatter::{format_text, Batch};
use crate::log_line::LogLine;
use crate::persist;
use crate::session::SessionClient;
use std::sync::{Arc, Mutex};
use std::time::Duration;
use tokio::runtime::Handle;
use tokio::sync::oneshot;
use tokio::task::JoinHandle;
use tokio::time::{Instant, MissedTickBehavior};
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, warn};

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum FlushReason {
    Interval,
    LineCount,
    Explicit,
    Shutdown,
}

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum FlushOutcome {
    /// Buffer was empty.
    Idle,
    /// Buffer has lines but no threshold is reached yet.
    Waiting,
    Shipped { lines: usize, reason: FlushReason },
    /// Lines were drained without a session and discarded.
    Dropped { lines: usize, reason: FlushReason },
}

/// Where flushed lines go.
pub trait FlushSink: Send + Sync {
    /// Whether a shipment would currently be accepted.
    fn is_ready(&self) -> bool;
    fn reauthenticate(&self);
    fn ship(&self, lines: Vec<LogLine>) -> JoinHandle<()>;
}

pub struct FlushTrigger {
    buffer: Arc<LogBuffer>,
    sink: Arc<dyn FlushSink>,
    max_interval: Duration,
    max_lines: usize,
    tick_period: Option<Duration>,
    shutdown_grace: Duration,
    last_flush: Mutex<Instant>,
    in_flight: Mutex<Vec<JoinHandle<()>>>,
}

impl FlushTrigger {
    #[must_use]
    pub fn new(buffer: Arc<LogBuffer>, sink: Arc<dyn FlushSink>, config: &Config) -> Self {
        Self {
            buffer,
            sink,
            max_interval: config.max_flush_interval(),
            max_lines: config.max_lines_between_flushes,
            tick_period: config.tick_interval(),
            shutdown_grace: config.shutdown_grace(),
            last_flush: Mutex::new(Instant::now()),
            in_flight: Mutex::new(Vec::new()),
        }
    }

    #[must_use]
    pub fn last_flush(&self) -> Instant {
        #[allow(clippy::expect_used)]
        let last_flush = self.last_flush.lock().expect("lock poisoned");
        *last_flush
    }

    fn set_last_flush(&self, now: Instant) {
        #[allow(clippy::expect_used)]
        let mut last_flush = self.last_flush.lock().expect("lock poisoned");
        *last_flush = now;
    }

    fn track(&self, handle: JoinHandle<()>) {
        #[allow(clippy::expect_used)]
        let mut in_flight = self.in_flight.lock().expect("lock poisoned");
        in_flight.retain(|handle| !handle.is_finished());
        in_flight.push(handle);
    }

    /// Shipments started by earlier flushes that have not finished yet.
    #[must_use]
    pub fn in_flight(&self) -> usize {
        #[allow(clippy::expect_used)]
        let in_flight = self.in_flight.lock().expect("lock poisoned");
        in_flight.iter().filter(|handle| !handle.is_finished()).count()
    }

    /// Which threshold, if any, a buffer of `pending` lines has crossed at `now`.
    #[must_use]
    pub fn evaluate(&self, pending: usize, now: Instant) -> Option<FlushReason> {
        if pending == 0 {
            return None;
        }
        if pending >= self.max_lines {
            return Some(FlushReason::LineCount);
        }
        if now.saturating_duration_since(self.last_flush()) >= self.max_interval {
            return Some(FlushReason::Interval);
        }
        None
    }

    /// One scheduler tick.
    pub fn tick(&self, now: Instant) -> FlushOutcome {
        let pending = self.buffer.len();
        if pending == 0 {
            return FlushOutcome::Idle;
        }
        match self.evaluate(pending, now) {
            Some(reason) => self.flush(reason, now),
            None => FlushOutcome::Waiting,
        }
    }

    /// Flushes immediately, ignoring thresholds.
    pub fn flush_now(&self) -> FlushOutcome {
        self.flush(FlushReason::Explicit, Instant::now())
    }

    fn flush(&self, reason: FlushReason, now: Instant) -> FlushOutcome {
        let lines = self.buffer.drain_all();
        if lines.is_empty() {
            return FlushOutcome::Idle;
        }
        self.set_last_flush(now);
        let count = lines.len();

        if !self.sink.is_ready() {
            warn!("LOGSHIP | Not authenticated, discarding {count} log lines");
            self.sink.reauthenticate();
            return FlushOutcome::Dropped { lines: count, reason };
        }

        debug!("LOGSHIP | Flushing {count} log lines ({reason:?})");
        self.track(self.sink.ship(lines));
        FlushOutcome::Shipped { lines: count, reason }
    }

    /// Final flush, then waits for every outstanding shipment for at most the
    /// shutdown grace period.
    ///
    /// Without a session the remaining lines are left behind.
    pub async fn shutdown(&self) -> FlushOutcome {
        let pending = self.buffer.len();
        let outcome = if pending == 0 {
            FlushOutcome::Idle
        } else if self.sink.is_ready() {
            self.flush(FlushReason::Shutdown, Instant::now())
        } else {
            warn!("LOGSHIP | Shutting down without a session, {pending} log lines not sent");
            FlushOutcome::Waiting
        };

        self.wait_in_flight().await;
        outcome
    }

    async fn wait_in_flight(&self) {
        let handles = {
            #[allow(clippy::expect_used)]
            let mut in_flight = self.in_flight.lock().expect("lock poisoned");
            std::mem::take(&mut *in_flight)
        };
        if handles.is_empty() {
            return;
        }

        let count = handles.len();
        let all_done = async {
            for handle in handles {
                if let Err(e) = handle.await {
                    error!("LOGSHIP | Shipment task failed: {e}");
                }
            }
        };
        match tokio::time::timeout(self.shutdown_grace, all_done).await {
            Ok(()) => debug!("LOGSHIP | {count} outstanding shipments complete"),
            Err(_) => warn!(
                "LOGSHIP | Outstanding shipments did not finish within {:?}",
                self.shutdown_grace
            ),
        }
    }

    /// Runs the periodic loop until `cancel` fires, then performs the final flush.
    pub async fn run(self: Arc<Self>, cancel: CancellationToken) {
        match self.tick_period {
            Some(period) => {
                let mut interval = tokio::time::interval(period);
                interval.set_missed_tick_behavior(MissedTickBehavior::Delay);
                loop {
                    tokio::select! {
                        () = cancel.cancelled() => break,
                        _ = interval.tick() => {
                            self.tick(Instant::now());
                        }
                    }
                }
            }
            None => {
                debug!("LOGSHIP | Periodic flush disabled");
                cancel.cancelled().await;
            }
        }

        self.shutdown().await;
    }
}

/// Ships drained lines through the delivery engine.
pub struct Shipper {
    config: Arc<Config>,
    session: Arc<SessionClient>,
    delivery: Arc<DeliveryEngine>,
    runtime: Handle,
    /// Completion signal of the most recent ordered shipment.
    last_turn: Mutex<Option<oneshot::Receiver<()>>>,
}

impl Shipper {
    #[must_use]
    pub fn new(
        config: Arc<Config>,
        session: Arc<SessionClient>,
        delivery: Arc<DeliveryEngine>,
        runtime: Handle,
    ) -> Self {
        Self {
            config,
            session,
            delivery,
            runtime,
            last_turn: Mutex::new(None),
        }
    }

    /// Places a shipment at the end of the delivery line.
    ///
    /// Returns the signal to wait for before sending and the signal to release
    /// once done; dropping the sender releases the next shipment too.
    fn take_turn(&self) -> (Option<oneshot::Receiver<()>>, oneshot::Sender<()>) {
        let (done, next) = oneshot::channel();
        #[allow(clippy::expect_used)]
        let mut last_turn = self.last_turn.lock().expect("lock poisoned");
        (last_turn.replace(next), done)
    }
}

/// Formats, persists and compresses one batch. Blocking.
fn prepare_batch(config: &Config, session_id: &str, lines: &[LogLine]) -> Batch {
    let text = format_text(lines);

    if config.write_to_disk {
        if let Err(e) = persist::append_text(&config.log_dir, session_id, &text) {
            warn!("LOGSHIP | Failed to write log text to disk: {e}");
        }
    }

    let compression = config
        .use_compression
        .then_some((config.compression_codec, config.compression_level));
    let batch = Batch::from_text(text, compression);

    if config.write_to_disk {
        if let Batch::Compressed { codec, bytes } = &batch {
            if let Err(e) =
                persist::write_compressed_chunk(&config.log_dir, session_id, *codec, bytes)
            {
                warn!("LOGSHIP | Failed to write compressed chunk to disk: {e}");
            }
        }
    }

    batch
}

impl FlushSink for Shipper {
    fn is_ready(&self) -> bool {
        self.session.is_authenticated()
    }

    fn reauthenticate(&self) {
        let _runtime = self.runtime.enter();
        self.session.spawn_authenticate();
    }

    fn ship(&self, lines: Vec<LogLine>) -> JoinHandle<()> {
        let config = Arc::clone(&self.config);
        let delivery = Arc::clone(&self.delivery);
        let session_id = self.session.session_id();
        let turn = self.config.ordered_delivery.then(|| self.take_turn());

        self.runtime.spawn(async move {
            let count = lines.len();
            let prepared =
                tokio::task::spawn_blocking(move || prepare_batch(&config, &session_id, &lines))
                    .await;

            let _done = match turn {
                Some((previous, done)) => {
                    if let Some(previous) = previous {
                        // Resolves once the previous shipment drops its sender.
                        let _ = previous.await;
                    }
                    Some(done)
                }
                None => None,
            };

            let batch = match prepared {
                Ok(batch) => batch,
                Err(e) => {
                    error!("LOGSHIP | Batch preparation failed, {count} lines lost: {e}");
                    return;
                }
            };

            match delivery.send_log_batch(batch).await {
                Ok(_) => debug!("LOGSHIP | Delivered {count} log lines"),
                Err(e) => error!("LOGSHIP | Failed to deliver {count} log lines: {e}"),
            }
        })
    }
}
