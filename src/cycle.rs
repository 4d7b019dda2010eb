//! The bounded-jitter cycle loop and its client handle.
//!
//! The engine runs on its own named OS thread with elevated priority where
//! the system permits it. Per tick it probes every subdevice's operational
//! state, performs one send-then-receive exchange, publishes the gathered
//! inputs to the shared snapshot, applies the freshest output images from
//! the update mailbox and sleeps the rest of the cycle away. Fatal
//! conditions never cross the thread boundary as panics or return values
//! alone; they are published to the error queue and raise the stop signal.

use std::thread::JoinHandle;
use std::time::{Duration, Instant, SystemTime};

use ringbuf::traits::{Consumer, Producer};
use thread_priority::{ThreadPriority, ThreadPriorityValue};

use crate::bus::ProcessBus;
use crate::config::BusConfig;
use crate::error::EngineError;
use crate::shared::{
    bridge, BridgeConfig, ClientEndpoint, EngineEndpoint, LatencySample, ScopeSample,
};

/// Slack subtracted from every deadline sleep to absorb wake-up jitter.
pub const SLEEP_SLACK: Duration = Duration::from_micros(400);

/// Cross-platform priority asked for the engine thread; ignored where the
/// OS refuses it.
const ENGINE_THREAD_PRIORITY: u8 = 48;

/// Runtime parameters of the cycle engine.
#[derive(Debug, Clone)]
pub struct CycleConfig {
    pub cycle_time: Duration,
    /// Consecutive missed deadlines before the engine terminates.
    pub max_cycle_overrun: u32,
    /// Consecutive failed operational probes per subdevice before the
    /// engine terminates.
    pub max_subdevice_comm_attempts: u32,
    /// Bounded wait for the snapshot lock.
    pub lock_timeout: Duration,
    /// Minimum spacing of two-edge command sequences.
    pub edge_delay: Duration,
    /// Telemetry gate, see [`crate::config`].
    pub log_level: u8,
    pub scope_capacity: usize,
    pub latency_capacity: usize,
}

impl CycleConfig {
    pub fn from_bus_config(config: &BusConfig) -> Self {
        Self {
            cycle_time: config.cycle_duration(),
            max_cycle_overrun: config.max_cycle_overrun,
            max_subdevice_comm_attempts: config.max_subdevice_comm_attempts,
            lock_timeout: config.lock_timeout(),
            edge_delay: config.edge_delay(),
            log_level: config.log_level,
            scope_capacity: config.scope_capacity,
            latency_capacity: config.latency_capacity,
        }
    }
}

/// Spawns the cycle engine over `bus`. The returned handle is the only
/// supported interface to the running engine.
pub fn spawn<B: ProcessBus>(bus: B, config: CycleConfig) -> std::io::Result<CycleHandle> {
    let snapshot_len = bus.input_frame_len() * bus.subdevice_count();
    let (engine, client) = bridge(BridgeConfig {
        snapshot_len,
        scope_capacity: config.scope_capacity,
        latency_capacity: config.latency_capacity,
        log_level: config.log_level,
        log_key: "linmot-cycle".to_string(),
    });

    let thread = std::thread::Builder::new()
        .name("linmot-cycle".to_string())
        .spawn(move || {
            if let Err(e) = thread_priority::set_current_thread_priority(
                ThreadPriority::Crossplatform(
                    ThreadPriorityValue::try_from(ENGINE_THREAD_PRIORITY).unwrap(),
                ),
            ) {
                log::warn!(target: "linmot-cycle", "could not raise cycle thread priority: {e:?}");
            }
            let runtime = tokio::runtime::Builder::new_current_thread()
                .enable_all()
                .build()
                .expect("build cycle runtime");
            runtime.block_on(run(bus, config, engine))
        })?;

    Ok(CycleHandle {
        client,
        thread: Some(thread),
    })
}

async fn run<B: ProcessBus>(
    mut bus: B,
    config: CycleConfig,
    mut shared: EngineEndpoint,
) -> Result<(), EngineError> {
    let subdevices = bus.subdevice_count();
    let frame_len = bus.input_frame_len();
    let cycle_time = config.cycle_time.as_secs_f64();
    let mut gathered = vec![0u8; frame_len * subdevices];
    let mut probe_failures = vec![0u32; subdevices];
    let mut overrun_count: u32 = 0;

    shared.telemetry.info("cyclic communication started");

    let result = 'cycle: loop {
        if shared.stop.is_set() {
            break Ok(());
        }
        let start = Instant::now();

        // Per-tick health check: a subdevice that stops answering the
        // operational probe is tolerated until the attempt budget runs out.
        for index in 0..subdevices {
            if bus.subdevice_operational(index).await {
                probe_failures[index] = 0;
            } else {
                probe_failures[index] += 1;
                shared.telemetry.info(format!(
                    "connection to subdevice {} lost {} times in a row",
                    index, probe_failures[index]
                ));
                if probe_failures[index] >= config.max_subdevice_comm_attempts {
                    break 'cycle Err(EngineError::SubDeviceOffline(index));
                }
            }
        }

        // One send-then-receive exchange. A lost frame shows up as a failed
        // probe next tick, so it is logged but not fatal here.
        if let Err(e) = bus.exchange().await {
            shared
                .telemetry
                .error(format!("process data exchange failed: {e}"));
        }

        for index in 0..subdevices {
            bus.read_inputs(index, &mut gathered[index * frame_len..(index + 1) * frame_len]);
        }

        // Publish under a bounded lock; contention skips this cycle's
        // publication, never the rest of the tick.
        if let Some(mut snapshot) = shared.snapshot.try_lock_for(config.lock_timeout) {
            snapshot.copy_from_slice(&gathered);
        }

        if shared.flags.scope() {
            let sample = ScopeSample {
                timestamp: SystemTime::now(),
                raw: gathered.clone().into_boxed_slice(),
            };
            if shared.scope_tx.try_push(sample).is_err() {
                shared
                    .telemetry
                    .warn("scope queue is full, skipping this cycle");
            }
        }

        // Drain the update mailbox down to its latest entry.
        let mut latest = None;
        while let Ok(update) = shared.update_rx.try_recv() {
            latest = Some(update);
        }
        if let Some(frames) = latest {
            if frames.len() == subdevices {
                for (index, frame) in frames.iter().enumerate() {
                    bus.write_outputs(index, frame);
                }
            } else {
                shared.telemetry.error(format!(
                    "output update carries {} frames for {} subdevices, ignoring it",
                    frames.len(),
                    subdevices
                ));
            }
        }

        if shared.flags.latency() {
            let sample = LatencySample {
                timestamp: SystemTime::now(),
                seconds: start.elapsed().as_secs_f64(),
            };
            if shared.latency_tx.try_push(sample).is_err() {
                shared
                    .telemetry
                    .warn("latency queue is full, skipping this cycle");
            }
        }

        let sleep_time = cycle_time - start.elapsed().as_secs_f64() - SLEEP_SLACK.as_secs_f64();
        if sleep_time > 0.0 {
            overrun_count = 0;
            shared
                .stop
                .sleep(Duration::from_secs_f64(sleep_time))
                .await;
        } else {
            overrun_count += 1;
            shared.telemetry.error(format!(
                "cycle time overrun: no. {overrun_count} with {sleep_time}s"
            ));
            if overrun_count > config.max_cycle_overrun {
                break Err(EngineError::CycleOverrun);
            }
        }
    };

    shared
        .telemetry
        .info("setting bus to SAFE-OP and releasing the adapter");
    bus.shutdown().await;
    shared.stop.set();
    if let Err(e) = &result {
        shared.telemetry.error(format!("cycle engine failed: {e}"));
    }
    shared.telemetry.info("cycle engine stopped");
    result
}

/// Client-side handle to a running cycle engine.
pub struct CycleHandle {
    client: ClientEndpoint,
    thread: Option<JoinHandle<Result<(), EngineError>>>,
}

impl CycleHandle {
    /// Copies the latest full-bus input image out under the snapshot lock.
    /// Decode outside the lock.
    pub fn snapshot(&self) -> Vec<u8> {
        self.client.snapshot.lock().to_vec()
    }

    /// Queues per-subdevice output images for the next cycle. Only the
    /// newest queued list is applied; the engine discards intermediates.
    /// Never blocks.
    pub fn send_outputs(&self, frames: Vec<Vec<u8>>) {
        let _ = self.client.update_tx.send(frames);
    }

    pub fn set_scope_recording(&self, on: bool) {
        self.client.flags.set_scope(on);
    }

    pub fn scope_recording(&self) -> bool {
        self.client.flags.scope()
    }

    pub fn set_latency_recording(&self, on: bool) {
        self.client.flags.set_latency(on);
    }

    /// True once the engine has exited or been asked to exit.
    pub fn is_stopped(&self) -> bool {
        self.client.stop.is_set()
    }

    /// Raises the stop signal without waiting. Idempotent.
    pub fn request_stop(&self) {
        self.client.stop.set();
    }

    pub fn drain_scope(&mut self) -> Vec<ScopeSample> {
        let mut samples = Vec::new();
        while let Some(sample) = self.client.scope_rx.try_pop() {
            samples.push(sample);
        }
        samples
    }

    pub fn drain_latency(&mut self) -> Vec<LatencySample> {
        let mut samples = Vec::new();
        while let Some(sample) = self.client.latency_rx.try_pop() {
            samples.push(sample);
        }
        samples
    }

    pub fn drain_info(&mut self) -> Vec<String> {
        let mut messages = Vec::new();
        while let Ok(message) = self.client.info_rx.try_recv() {
            messages.push(message);
        }
        messages
    }

    pub fn drain_errors(&mut self) -> Vec<String> {
        let mut messages = Vec::new();
        while let Ok(message) = self.client.error_rx.try_recv() {
            messages.push(message);
        }
        messages
    }

    /// Stops the engine and waits for it to exit.
    ///
    /// Raises the stop signal, waits up to `grace`, then drains every
    /// telemetry queue and waits once more. Returns the engine's exit
    /// result, or `None` if the thread still has not finished; the handle
    /// to it is surrendered in that case and the OS reclaims it at process
    /// exit.
    pub fn stop(&mut self, grace: Duration) -> Option<Result<(), EngineError>> {
        self.request_stop();

        if !self.wait_finished(grace) {
            log::warn!(
                target: "linmot-cycle",
                "engine did not exit within the grace period, draining queues"
            );
            self.drain_scope();
            self.drain_latency();
            self.drain_info();
            self.drain_errors();
            if !self.wait_finished(grace) {
                log::error!(target: "linmot-cycle", "engine thread still running, giving up on it");
                self.thread = None;
                return None;
            }
        }

        let thread = self.thread.take()?;
        match thread.join() {
            Ok(result) => Some(result),
            Err(_) => {
                log::error!(target: "linmot-cycle", "engine thread panicked");
                Some(Err(EngineError::Interrupted))
            }
        }
    }

    fn wait_finished(&self, grace: Duration) -> bool {
        let Some(thread) = self.thread.as_ref() else {
            return true;
        };
        let deadline = Instant::now() + grace;
        while Instant::now() < deadline {
            if thread.is_finished() {
                return true;
            }
            std::thread::sleep(Duration::from_millis(5));
        }
        thread.is_finished()
    }
}
