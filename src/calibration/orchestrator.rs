//! Job lifecycle: one calibration at a time on a worker thread, with progress
//! and the final result delivered over a channel.

use super::modes::{
    pixel_space, reprojection_space, select_mode, sensor_size, target_space, CalibrationMode,
};
use super::{
    CalibrationConfig, CalibrationError, CalibrationInputs, EstimationResult, EstimationStatus,
    LockMap, ParameterMap,
};
use crate::camera::CameraIntrinsics;
use crate::features::match_features;
use crate::frame::{resize, FloatFrame, Frame, Interpolation};
use crate::optimization::target::estimate_distortion;
use crate::optimization::{
    CalibrationTargetLoss, Estimate, EstimatorConfig, OptimizationError, ParameterEstimator,
    PixelDifferenceLoss, ProgressFn, ReprojectionLoss,
};
use log::{info, warn};
use std::any::Any;
use std::borrow::Cow;
use std::panic::{self, AssertUnwindSafe};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::mpsc::{self, Receiver};
use std::sync::{Arc, Mutex, MutexGuard, PoisonError, RwLock};
use std::thread::{self, JoinHandle};

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub enum JobState {
    #[default]
    Idle,
    Running,
    Succeeded,
    Failed,
}

/// Events of one job, in order: non-decreasing `Progress`, `Progress(100)`, then `Completed`.
#[derive(Debug, Clone, PartialEq)]
pub enum CalibrationEvent {
    Progress(u8),
    Completed(EstimationResult),
}

/// Runs calibration jobs and keeps the best parameters found so far.
#[derive(Debug, Default)]
pub struct CalibrationOrchestrator {
    config: CalibrationConfig,
    state: Arc<Mutex<JobState>>,
    best: Arc<RwLock<ParameterMap>>,
}

fn lock_state(state: &Mutex<JobState>) -> MutexGuard<'_, JobState> {
    state.lock().unwrap_or_else(PoisonError::into_inner)
}

impl CalibrationOrchestrator {
    pub fn new(config: CalibrationConfig) -> Self {
        Self {
            config,
            ..Default::default()
        }
    }

    pub fn config(&self) -> &CalibrationConfig {
        &self.config
    }

    pub fn state(&self) -> JobState {
        *lock_state(&self.state)
    }

    /// Snapshot of the parameters of the last successful job.
    pub fn best_parameters(&self) -> ParameterMap {
        self.best
            .read()
            .unwrap_or_else(PoisonError::into_inner)
            .clone()
    }

    /// Starts a job on a worker thread.
    ///
    /// Returns `None` without side effects while another job is running.
    pub fn start(
        &self,
        inputs: CalibrationInputs,
        locks: LockMap,
        defaults: ParameterMap,
    ) -> Option<JobHandle> {
        let config = self.config.clone();
        let fallback = defaults.clone();
        self.launch(fallback, move |on_progress, cancel| {
            run_calibration(
                &inputs,
                &locks,
                &defaults,
                &config,
                Some(on_progress),
                Some(cancel),
            )
        })
    }

    /// Runs `job` on the worker thread and publishes its outcome.
    ///
    /// A panicking job completes as failed with `defaults`, so the state never
    /// stays `Running` and the event stream always ends with `Completed`.
    fn launch<F>(&self, defaults: ParameterMap, job: F) -> Option<JobHandle>
    where
        F: FnOnce(ProgressFn, Arc<AtomicBool>) -> EstimationResult + Send + 'static,
    {
        {
            let mut state = lock_state(&self.state);
            if *state == JobState::Running {
                info!("Calibration already running, ignoring start request");
                return None;
            }
            *state = JobState::Running;
        }

        let (sender, events) = mpsc::channel();
        let cancel = Arc::new(AtomicBool::new(false));
        let worker_cancel = Arc::clone(&cancel);
        let state = Arc::clone(&self.state);
        let best = Arc::clone(&self.best);

        let spawned = thread::Builder::new()
            .name("calibration".to_string())
            .spawn(move || {
                let progress = sender.clone();
                let on_progress: ProgressFn = Box::new(move |percent| {
                    // the receiver may already be gone
                    let _ = progress.send(CalibrationEvent::Progress(percent));
                });
                let result = panic::catch_unwind(AssertUnwindSafe(|| {
                    job(on_progress, worker_cancel)
                }))
                .unwrap_or_else(|payload| {
                    let message = panic_message(payload.as_ref());
                    warn!("Calibration worker panicked: {message}, keeping defaults");
                    EstimationResult::failed(
                        &defaults,
                        CalibrationError::Worker(message).to_string(),
                    )
                });

                if result.is_success() {
                    *best.write().unwrap_or_else(PoisonError::into_inner) =
                        result.parameters.clone();
                    *lock_state(&state) = JobState::Succeeded;
                } else {
                    *lock_state(&state) = JobState::Failed;
                }
                let _ = sender.send(CalibrationEvent::Progress(100));
                let _ = sender.send(CalibrationEvent::Completed(result.clone()));
                result
            });

        match spawned {
            Ok(worker) => Some(JobHandle {
                events,
                cancel,
                worker,
            }),
            Err(err) => {
                warn!("Failed to spawn calibration worker: {err}");
                *lock_state(&self.state) = JobState::Failed;
                None
            }
        }
    }
}

fn panic_message(payload: &(dyn Any + Send)) -> String {
    payload
        .downcast_ref::<&str>()
        .map(|s| s.to_string())
        .or_else(|| payload.downcast_ref::<String>().cloned())
        .unwrap_or_else(|| "unknown panic".to_string())
}

/// A running (or finished) calibration job.
#[derive(Debug)]
pub struct JobHandle {
    events: Receiver<CalibrationEvent>,
    cancel: Arc<AtomicBool>,
    worker: JoinHandle<EstimationResult>,
}

impl JobHandle {
    /// Progress and completion events. Iteration ends once the job has finished.
    pub fn events(&self) -> &Receiver<CalibrationEvent> {
        &self.events
    }

    /// Asks the job to stop at the next stage boundary or optimizer iteration.
    /// A cancelled job completes as failed with the defaults.
    pub fn cancel(&self) {
        self.cancel.store(true, Ordering::SeqCst);
    }

    pub fn is_finished(&self) -> bool {
        self.worker.is_finished()
    }

    /// Waits for the worker and returns its result.
    pub fn join(self) -> Result<EstimationResult, CalibrationError> {
        self.worker
            .join()
            .map_err(|_| CalibrationError::Worker("calibration worker panicked".to_string()))
    }
}

fn check_cancelled(cancel: Option<&Arc<AtomicBool>>) -> Result<(), CalibrationError> {
    match cancel {
        Some(flag) if flag.load(Ordering::SeqCst) => Err(CalibrationError::Cancelled),
        _ => Ok(()),
    }
}

fn estimation_error(err: OptimizationError) -> CalibrationError {
    match err {
        OptimizationError::Cancelled => CalibrationError::Cancelled,
        other => CalibrationError::Optimization(other),
    }
}

/// Runs one calibration synchronously.
///
/// The mode follows from `inputs` (image pair, then target, then references).
/// Locked parameters are pinned at their default. Any failure, including
/// non-convergence and cancellation, yields `defaults` unchanged; a successful
/// estimate is merged over `defaults`.
pub fn run_calibration(
    inputs: &CalibrationInputs,
    locks: &LockMap,
    defaults: &ParameterMap,
    config: &CalibrationConfig,
    on_progress: Option<ProgressFn>,
    cancel: Option<Arc<AtomicBool>>,
) -> EstimationResult {
    let Some(mode) = select_mode(inputs) else {
        warn!("No calibration inputs, keeping defaults");
        return EstimationResult::failed(defaults, CalibrationError::MissingInputs.to_string());
    };
    info!("Starting {mode} calibration");

    let outcome = check_cancelled(cancel.as_ref()).and_then(|_| match mode {
        CalibrationMode::Reprojection => {
            calibrate_reprojection(inputs, locks, defaults, config, on_progress, cancel)
        }
        CalibrationMode::CalibrationTarget => {
            calibrate_target(inputs, locks, defaults, config, on_progress, cancel)
        }
        CalibrationMode::PixelDifference => {
            calibrate_pixels(inputs, locks, defaults, config, on_progress, cancel)
        }
    });

    match outcome {
        Ok((estimated, estimate)) if estimate.converged => {
            info!(
                "{mode} calibration converged after {} iterations (loss {:.6})",
                estimate.iterations, estimate.loss
            );
            let mut parameters = defaults.clone();
            parameters.extend(estimated);
            EstimationResult {
                parameters,
                status: EstimationStatus::Converged,
                final_loss: Some(estimate.loss),
                iterations: estimate.iterations,
            }
        }
        Ok((_, estimate)) => {
            warn!(
                "{mode} calibration did not converge ({}), keeping defaults",
                estimate.termination
            );
            EstimationResult {
                parameters: defaults.clone(),
                status: EstimationStatus::Failed(
                    OptimizationError::NonConvergence(estimate.termination).to_string(),
                ),
                final_loss: Some(estimate.loss),
                iterations: estimate.iterations,
            }
        }
        Err(err) => {
            warn!("{mode} calibration failed: {err}, keeping defaults");
            EstimationResult::failed(defaults, err.to_string())
        }
    }
}

fn with_max_iterations(config: &EstimatorConfig, max_iterations: u64) -> EstimatorConfig {
    EstimatorConfig {
        max_iterations,
        ..config.clone()
    }
}

fn calibrate_reprojection(
    inputs: &CalibrationInputs,
    locks: &LockMap,
    defaults: &ParameterMap,
    config: &CalibrationConfig,
    on_progress: Option<ProgressFn>,
    cancel: Option<Arc<AtomicBool>>,
) -> Result<(ParameterMap, Estimate), CalibrationError> {
    let (base, target) = inputs
        .image_pair
        .as_ref()
        .ok_or(CalibrationError::MissingInputs)?;

    let target: Cow<'_, Frame> =
        if (target.width(), target.height()) != (base.width(), base.height()) && !target.is_empty()
        {
            info!(
                "Resizing target from {}x{} to {}x{}",
                target.width(),
                target.height(),
                base.width(),
                base.height()
            );
            let resized = resize(
                &FloatFrame::from_frame(target),
                base.width() as usize,
                base.height() as usize,
                Interpolation::Bilinear,
            );
            Cow::Owned(resized.to_frame())
        } else {
            Cow::Borrowed(target)
        };

    let correspondences = match_features(base, &target, &config.features)?;
    info!("Using {} feature correspondences", correspondences.len());
    check_cancelled(cancel.as_ref())?;

    let space = reprojection_space(&base.resolution(), defaults, locks);
    let loss =
        ReprojectionLoss::new(correspondences).with_smoothing(config.reprojection_smoothing);
    let estimator = ParameterEstimator::new(with_max_iterations(
        &config.estimator,
        config.reprojection_max_iterations,
    ));
    let estimate = estimator
        .estimate(&space.initial, &space.bounds, &loss, on_progress, cancel)
        .map_err(estimation_error)?;
    Ok((space.named(&estimate.params), estimate))
}

fn calibrate_target(
    inputs: &CalibrationInputs,
    locks: &LockMap,
    defaults: &ParameterMap,
    config: &CalibrationConfig,
    on_progress: Option<ProgressFn>,
    cancel: Option<Arc<AtomicBool>>,
) -> Result<(ParameterMap, Estimate), CalibrationError> {
    let (generator, observed) = inputs.target.as_ref().ok_or(CalibrationError::MissingInputs)?;
    let (sensor_width, sensor_height) = sensor_size(defaults);

    let start = target_space(defaults, locks, None);
    let lens = CameraIntrinsics::centered(
        &generator.resolution(),
        start.initial[0],
        sensor_width,
        sensor_height,
        Vec::new(),
    );
    let linear = match estimate_distortion(generator, &lens, observed) {
        Ok(k) => {
            info!("Linear distortion estimate: k1 = {:.5}, k2 = {:.5}", k.0, k.1);
            Some(k)
        }
        Err(err @ OptimizationError::InvalidBounds(_)) => return Err(err.into()),
        Err(err) => {
            warn!("Linear distortion estimate failed: {err}");
            None
        }
    };
    let space = target_space(defaults, locks, linear);

    let loss = CalibrationTargetLoss::new(
        generator.clone(),
        observed.clone(),
        sensor_width,
        sensor_height,
    );
    let estimator = ParameterEstimator::new(with_max_iterations(
        &config.estimator,
        config.target_max_iterations,
    ));
    let estimate = estimator
        .estimate(&space.initial, &space.bounds, &loss, on_progress, cancel)
        .map_err(estimation_error)?;

    let mut parameters = space.named(&estimate.params);
    parameters.insert("sensor_width".to_string(), sensor_width);
    parameters.insert("sensor_height".to_string(), sensor_height);
    Ok((parameters, estimate))
}

fn calibrate_pixels(
    inputs: &CalibrationInputs,
    locks: &LockMap,
    defaults: &ParameterMap,
    config: &CalibrationConfig,
    on_progress: Option<ProgressFn>,
    cancel: Option<Arc<AtomicBool>>,
) -> Result<(ParameterMap, Estimate), CalibrationError> {
    let (input, references, base) = inputs
        .references
        .as_ref()
        .ok_or(CalibrationError::MissingInputs)?;
    if references.is_empty() {
        return Err(CalibrationError::MissingInputs);
    }
    info!("Comparing renders against {} reference(s)", references.len());

    let space = pixel_space(base, defaults, locks);
    let loss = PixelDifferenceLoss::new(
        input.clone(),
        references.clone(),
        base.clone(),
        inputs.pipeline.clone(),
        config.pixel_noise_seed,
    );
    let estimator = ParameterEstimator::new(EstimatorConfig {
        finite_difference_step: config.pixel_finite_difference_step,
        ..with_max_iterations(&config.estimator, config.pixel_max_iterations)
    });
    let estimate = estimator
        .estimate(&space.initial, &space.bounds, &loss, on_progress, cancel)
        .map_err(estimation_error)?;
    Ok((space.named(&estimate.params), estimate))
}
