//! Shared state between the cycle engine and its client thread.
//!
//! The hot input path is a mutex-guarded byte buffer; everything else moves
//! through channels. Bounded queues drop on full and log the drop; no
//! producer ever blocks the cycle engine.

use parking_lot::Mutex;
use ringbuf::traits::Split;
use ringbuf::{HeapCons, HeapProd, HeapRb};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::{Duration, SystemTime, UNIX_EPOCH};
use tokio::sync::mpsc;
use tokio::sync::Notify;

use crate::config::{LOG_LEVEL_ERROR, LOG_LEVEL_INFO, LOG_LEVEL_WARNING};

/// One oscilloscope capture: the full-bus raw input image of a single cycle.
#[derive(Debug, Clone, PartialEq)]
pub struct ScopeSample {
    pub timestamp: SystemTime,
    pub raw: Box<[u8]>,
}

/// One cycle-latency measurement.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct LatencySample {
    pub timestamp: SystemTime,
    /// Time spent inside the cycle loop before the deadline sleep.
    pub seconds: f64,
}

/// Wall-clock time as fractional seconds since the Unix epoch.
pub(crate) fn unix_seconds(timestamp: SystemTime) -> f64 {
    timestamp
        .duration_since(UNIX_EPOCH)
        .unwrap_or(Duration::ZERO)
        .as_secs_f64()
}

/// One-shot stop flag observable from both sides, with a wakeup for the
/// engine's deadline sleep.
#[derive(Debug, Default)]
pub struct StopSignal {
    flag: AtomicBool,
    notify: Notify,
}

impl StopSignal {
    pub fn set(&self) {
        self.flag.store(true, Ordering::SeqCst);
        self.notify.notify_waiters();
    }

    pub fn is_set(&self) -> bool {
        self.flag.load(Ordering::SeqCst)
    }

    /// Sleeps for `duration` unless the stop flag is raised first.
    pub async fn sleep(&self, duration: Duration) {
        if self.is_set() {
            return;
        }
        tokio::select! {
            _ = tokio::time::sleep(duration) => {}
            _ = self.notify.notified() => {}
        }
    }
}

/// Recording flags toggled by the client, polled by the engine every cycle.
#[derive(Debug, Default)]
pub struct RecordFlags {
    scope: AtomicBool,
    latency: AtomicBool,
}

impl RecordFlags {
    pub fn set_scope(&self, on: bool) {
        self.scope.store(on, Ordering::Relaxed);
    }

    pub fn scope(&self) -> bool {
        self.scope.load(Ordering::Relaxed)
    }

    pub fn set_latency(&self, on: bool) {
        self.latency.store(on, Ordering::Relaxed);
    }

    pub fn latency(&self) -> bool {
        self.latency.load(Ordering::Relaxed)
    }
}

/// Level-gated message queues towards the client, mirrored to the log
/// facade. Info passes at level 20, queue-drop warnings at 30, errors at
/// 40. Messages carry a wall-clock timestamp prefix.
pub(crate) struct Telemetry {
    level: u8,
    log_key: String,
    info_tx: mpsc::UnboundedSender<String>,
    error_tx: mpsc::UnboundedSender<String>,
}

impl Telemetry {
    fn stamp(message: &str) -> String {
        format!("{:.6} - {}", unix_seconds(SystemTime::now()), message)
    }

    pub fn info(&self, message: impl AsRef<str>) {
        let message = message.as_ref();
        log::info!(target: &self.log_key, "{message}");
        if self.level >= LOG_LEVEL_INFO {
            let _ = self.info_tx.send(Self::stamp(message));
        }
    }

    pub fn warn(&self, message: impl AsRef<str>) {
        let message = message.as_ref();
        log::warn!(target: &self.log_key, "{message}");
        if self.level >= LOG_LEVEL_WARNING {
            let _ = self.error_tx.send(Self::stamp(message));
        }
    }

    pub fn error(&self, message: impl AsRef<str>) {
        let message = message.as_ref();
        log::error!(target: &self.log_key, "{message}");
        if self.level >= LOG_LEVEL_ERROR {
            let _ = self.error_tx.send(Self::stamp(message));
        }
    }
}

/// Engine half of the bridge. Owned exclusively by the cycle thread.
pub(crate) struct EngineEndpoint {
    pub snapshot: Arc<Mutex<Box<[u8]>>>,
    pub update_rx: mpsc::UnboundedReceiver<Vec<Vec<u8>>>,
    pub scope_tx: HeapProd<ScopeSample>,
    pub latency_tx: HeapProd<LatencySample>,
    pub telemetry: Telemetry,
    pub stop: Arc<StopSignal>,
    pub flags: Arc<RecordFlags>,
}

/// Client half of the bridge, embedded in the cycle handle.
pub(crate) struct ClientEndpoint {
    pub snapshot: Arc<Mutex<Box<[u8]>>>,
    pub update_tx: mpsc::UnboundedSender<Vec<Vec<u8>>>,
    pub scope_rx: HeapCons<ScopeSample>,
    pub latency_rx: HeapCons<LatencySample>,
    pub info_rx: mpsc::UnboundedReceiver<String>,
    pub error_rx: mpsc::UnboundedReceiver<String>,
    pub stop: Arc<StopSignal>,
    pub flags: Arc<RecordFlags>,
}

pub(crate) struct BridgeConfig {
    pub snapshot_len: usize,
    pub scope_capacity: usize,
    pub latency_capacity: usize,
    pub log_level: u8,
    pub log_key: String,
}

/// Builds both halves of the bridge.
pub(crate) fn bridge(config: BridgeConfig) -> (EngineEndpoint, ClientEndpoint) {
    let snapshot: Arc<Mutex<Box<[u8]>>> =
        Arc::new(Mutex::new(vec![0u8; config.snapshot_len].into_boxed_slice()));
    let (update_tx, update_rx) = mpsc::unbounded_channel();
    let (info_tx, info_rx) = mpsc::unbounded_channel();
    let (error_tx, error_rx) = mpsc::unbounded_channel();
    let (scope_tx, scope_rx) = HeapRb::new(config.scope_capacity.max(1)).split();
    let (latency_tx, latency_rx) = HeapRb::new(config.latency_capacity.max(1)).split();
    let stop = Arc::new(StopSignal::default());
    let flags = Arc::new(RecordFlags::default());

    let engine = EngineEndpoint {
        snapshot: Arc::clone(&snapshot),
        update_rx,
        scope_tx,
        latency_tx,
        telemetry: Telemetry {
            level: config.log_level,
            log_key: config.log_key,
            info_tx,
            error_tx,
        },
        stop: Arc::clone(&stop),
        flags: Arc::clone(&flags),
    };
    let client = ClientEndpoint {
        snapshot,
        update_tx,
        scope_rx,
        latency_rx,
        info_rx,
        error_rx,
        stop,
        flags,
    };
    (engine, client)
}

#[cfg(test)]
mod tests {
    use super::*;
    use ringbuf::traits::{Consumer, Producer};

    fn test_bridge(level: u8) -> (EngineEndpoint, ClientEndpoint) {
        bridge(BridgeConfig {
            snapshot_len: 8,
            scope_capacity: 4,
            latency_capacity: 4,
            log_level: level,
            log_key: "test".to_string(),
        })
    }

    #[test]
    fn scope_queue_is_bounded_and_drops_on_full() {
        let (mut engine, mut client) = test_bridge(LOG_LEVEL_ERROR);
        let mut dropped = 0;
        for i in 0..10u8 {
            let sample = ScopeSample {
                timestamp: SystemTime::now(),
                raw: vec![i].into_boxed_slice(),
            };
            if engine.scope_tx.try_push(sample).is_err() {
                dropped += 1;
            }
        }
        assert_eq!(dropped, 6);

        let mut kept = Vec::new();
        while let Some(sample) = client.scope_rx.try_pop() {
            kept.push(sample.raw[0]);
        }
        assert_eq!(kept, vec![0, 1, 2, 3]);
    }

    #[test]
    fn telemetry_respects_level_gates() {
        let (engine, mut client) = test_bridge(LOG_LEVEL_INFO);
        engine.telemetry.info("hello");
        engine.telemetry.warn("queue full");
        engine.telemetry.error("boom");

        assert!(client.info_rx.try_recv().unwrap().ends_with("hello"));
        assert!(client.error_rx.try_recv().is_err());

        let (engine, mut client) = test_bridge(LOG_LEVEL_ERROR);
        engine.telemetry.warn("queue full");
        engine.telemetry.error("boom");
        assert!(client.error_rx.try_recv().unwrap().ends_with("queue full"));
        assert!(client.error_rx.try_recv().unwrap().ends_with("boom"));
    }

    #[test]
    fn stop_signal_is_idempotent_and_interrupts_sleep() {
        let runtime = tokio::runtime::Builder::new_current_thread()
            .enable_time()
            .build()
            .unwrap();
        runtime.block_on(async {
            let stop = StopSignal::default();
            assert!(!stop.is_set());
            stop.set();
            stop.set();
            assert!(stop.is_set());

            // Returns immediately instead of sleeping for an hour.
            let started = std::time::Instant::now();
            stop.sleep(Duration::from_secs(3600)).await;
            assert!(started.elapsed() < Duration::from_secs(1));
        });
    }

    #[test]
    fn update_mailbox_keeps_only_latest_on_drain() {
        let (mut engine, client) = test_bridge(LOG_LEVEL_INFO);
        for i in 0..5u8 {
            client.update_tx.send(vec![vec![i]]).unwrap();
        }
        let mut latest = None;
        while let Ok(update) = engine.update_rx.try_recv() {
            latest = Some(update);
        }
        assert_eq!(latest, Some(vec![vec![4u8]]));
    }
}
