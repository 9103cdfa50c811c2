//! Inference Loop - Cycle Orchestrator
//!
//! acquire → predict → publish → sleep, one cycle at a time on the calling
//! thread. Only a shutdown signal ends the loop, and it is observed at the
//! sleep boundary.

use std::panic::{self, AssertUnwindSafe};
use std::sync::Arc;
use std::time::Duration;

use parking_lot::{Condvar, Mutex};
use thiserror::Error;

use crate::logic::communication::{Dispatcher, Payload, PublishError, PublishReport};
use crate::logic::config::Settings;
use crate::logic::model::{InferenceEngine, InferenceError};
use crate::logic::sensors::{FrameSource, SensorError};

// ============================================================================
// SHUTDOWN SIGNAL
// ============================================================================

/// Cloneable stop flag whose wait can be interrupted.
#[derive(Clone, Default)]
pub struct ShutdownSignal {
    inner: Arc<(Mutex<bool>, Condvar)>,
}

impl ShutdownSignal {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn trigger(&self) {
        let (lock, cvar) = &*self.inner;
        *lock.lock() = true;
        cvar.notify_all();
    }

    pub fn is_triggered(&self) -> bool {
        *self.inner.0.lock()
    }

    /// Sleep up to `timeout`. Returns `true` if shutdown was requested.
    pub fn wait(&self, timeout: Duration) -> bool {
        let (lock, cvar) = &*self.inner;
        let mut triggered = lock.lock();
        if !*triggered {
            cvar.wait_while_for(&mut triggered, |t| !*t, timeout);
        }
        *triggered
    }
}

// ============================================================================
// STATE
// ============================================================================

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum LoopState {
    Running,
    Stopped,
}

/// What happened in one cycle
#[derive(Debug)]
pub enum CycleOutcome {
    Published(PublishReport),
    InferenceFailed(InferenceError),
    SerializationFailed(PublishError),
}

#[derive(Debug, Error)]
pub enum StartupError {
    #[error(transparent)]
    Sensor(#[from] SensorError),
    #[error(transparent)]
    Model(#[from] InferenceError),
}

// ============================================================================
// LOOP
// ============================================================================

pub struct InferenceLoop {
    frames: FrameSource,
    engine: InferenceEngine,
    dispatcher: Dispatcher,
    interval: Duration,
    shutdown: ShutdownSignal,
    state: LoopState,
    cycles: u64,
}

impl InferenceLoop {
    /// Build every component from settings. Model and sensor configuration
    /// errors are fatal here; an unreachable broker only disables its channel.
    pub fn from_settings(settings: &Settings, shutdown: ShutdownSignal) -> Result<Self, StartupError> {
        let engine = InferenceEngine::load(&settings.model)?;
        let frames = FrameSource::new(settings)?;
        let dispatcher = Dispatcher::new(&settings.communication);

        Ok(Self::new(frames, engine, dispatcher, settings.sensors.interval(), shutdown))
    }

    pub fn new(
        frames: FrameSource,
        engine: InferenceEngine,
        dispatcher: Dispatcher,
        interval: Duration,
        shutdown: ShutdownSignal,
    ) -> Self {
        if frames.input_shape() != engine.input_shape() {
            log::warn!(
                "Frame shape {:?} differs from model input shape {:?}",
                frames.input_shape(),
                engine.input_shape()
            );
        }

        Self {
            frames,
            engine,
            dispatcher,
            interval,
            shutdown,
            state: LoopState::Running,
            cycles: 0,
        }
    }

    pub fn state(&self) -> LoopState {
        self.state
    }

    pub fn cycles(&self) -> u64 {
        self.cycles
    }

    pub fn engine(&self) -> &InferenceEngine {
        &self.engine
    }

    /// Run until shutdown is signalled, then release resources.
    pub fn run(&mut self) -> u64 {
        log::info!("Starting inference loop every {} seconds...", self.interval.as_secs_f32());

        while self.state == LoopState::Running {
            if self.shutdown.is_triggered() {
                break;
            }

            self.run_cycle();

            if self.shutdown.wait(self.interval) {
                break;
            }
        }

        log::info!("Shutdown requested after {} cycle(s)", self.cycles);
        self.shutdown();
        self.cycles
    }

    /// One acquire → predict → publish pass. Never fails.
    pub fn run_cycle(&mut self) -> CycleOutcome {
        self.cycles += 1;

        let frame = self.frames.acquire();

        let result = match self.engine.predict(&frame.image) {
            Ok(result) => result,
            Err(e) => {
                log::error!("Inference failed, skipping publish for this cycle: {}", e);
                return CycleOutcome::InferenceFailed(e);
            }
        };
        log::info!("Inference result: {}", result.output);

        if let Some(temperature) = frame.aux_reading {
            log::info!("Temperature reading: {} °C", temperature);
        }

        let payload = Payload::new(&result, frame.aux_reading);

        match self.dispatcher.publish(&payload) {
            Ok(report) => {
                if report.failed() > 0 {
                    log::warn!(
                        "Cycle {}: delivered to {}/{} channel(s)",
                        self.cycles,
                        report.delivered(),
                        report.outcomes.len()
                    );
                }
                CycleOutcome::Published(report)
            }
            Err(e) => CycleOutcome::SerializationFailed(e),
        }
    }

    /// Release the camera, then stop channels. Each step runs even if the
    /// other panics. Idempotent.
    pub fn shutdown(&mut self) {
        if self.state == LoopState::Stopped {
            return;
        }
        self.state = LoopState::Stopped;

        let frames = &mut self.frames;
        if panic::catch_unwind(AssertUnwindSafe(|| frames.release())).is_err() {
            log::error!("Frame source release panicked");
        }

        let dispatcher = &mut self.dispatcher;
        if panic::catch_unwind(AssertUnwindSafe(|| dispatcher.stop())).is_err() {
            log::error!("Channel shutdown panicked");
        }

        let status = self.engine.status();
        log::info!(
            "Inference loop stopped: {} inference(s), {} failure(s), avg {:.2} ms",
            status.inference_count,
            status.failure_count,
            status.avg_latency_ms
        );
    }
}

impl Drop for InferenceLoop {
    fn drop(&mut self) {
        self.shutdown();
    }
}
