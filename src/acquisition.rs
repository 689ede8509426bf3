//! Block capture lifecycle: `Idle -> Armed -> {Ready | Error} -> Idle`.
//!
//! A session is armed either for polling ([`ArmMode::Blocking`]) or for a
//! one-shot device notification ([`ArmMode::Notify`]). In notify mode the
//! driver receives a [`BlockNotifier`]; consuming it is the only way to complete
//! the cycle, so a cycle can be completed at most once. The notifier carries
//! its own session handle, so handlers never reach for shared globals.

use std::fmt;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};
use std::thread;
use std::time::{Duration, Instant};

use crossbeam_channel::{bounded, Receiver, RecvTimeoutError, Sender};

use crate::buffers::BufferBinder;
use crate::driver::{BlockReport, OverflowFlags, RunBlockRequest, ScopeDriver, ValuesReadout, ValuesRequest};
use crate::error::{DeviceFault, DriverStatus, FaultKind, ScopeError};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SessionState {
    Idle,
    Armed,
    Ready,
    Error,
    Reading,
}

impl SessionState {
    pub fn as_str(&self) -> &'static str {
        match self {
            SessionState::Idle => "idle",
            SessionState::Armed => "armed",
            SessionState::Ready => "ready",
            SessionState::Error => "error",
            SessionState::Reading => "reading",
        }
    }
}

impl fmt::Display for SessionState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Delivered once per notify-mode cycle, to the handler and to the
/// [`CompletionReceiver`].
#[derive(Debug, Clone)]
pub struct BlockCompletion {
    pub session: AcquisitionSession,
    pub cycle: u64,
    pub status: DriverStatus,
    pub samples_captured: u64,
    pub overflow: OverflowFlags,
}

impl BlockCompletion {
    pub fn is_ok(&self) -> bool {
        self.status.is_ok()
    }
}

/// Runs on the driver's notification thread. Keep it short; hand heavy work
/// off to another thread.
pub type CompletionHandler = Box<dyn FnOnce(BlockCompletion) + Send + 'static>;

pub type CompletionReceiver = Receiver<BlockCompletion>;

pub enum ArmMode {
    Blocking,
    Notify(Option<CompletionHandler>),
}

impl ArmMode {
    fn as_str(&self) -> &'static str {
        match self {
            ArmMode::Blocking => "blocking",
            ArmMode::Notify(_) => "notify",
        }
    }
}

impl fmt::Debug for ArmMode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// External abort signal for blocking waits.
#[derive(Debug, Clone, Default)]
pub struct CancelToken {
    cancelled: Arc<AtomicBool>,
}

impl CancelToken {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn cancel(&self) {
        self.cancelled.store(true, Ordering::Release);
    }

    pub fn is_cancelled(&self) -> bool {
        self.cancelled.load(Ordering::Acquire)
    }

    pub fn reset(&self) {
        self.cancelled.store(false, Ordering::Release);
    }
}

#[derive(Debug)]
struct SessionShared {
    state: SessionState,
    cycle: u64,
    fault: Option<DeviceFault>,
    report: Option<BlockReport>,
}

impl SessionShared {
    fn transition(&mut self, to: SessionState) {
        log::debug!("Session cycle {}: {} -> {}", self.cycle, self.state, to);
        self.state = to;
    }

    fn fail(&mut self, fault: DeviceFault) {
        log::warn!("Session cycle {} failed: {fault}", self.cycle);
        self.fault = Some(fault);
        self.transition(SessionState::Error);
    }
}

/// Cloneable handle to the state of one device session.
#[derive(Debug, Clone)]
pub struct AcquisitionSession {
    shared: Arc<Mutex<SessionShared>>,
}

impl AcquisitionSession {
    fn new() -> Self {
        Self {
            shared: Arc::new(Mutex::new(SessionShared {
                state: SessionState::Idle,
                cycle: 0,
                fault: None,
                report: None,
            })),
        }
    }

    fn lock(&self) -> MutexGuard<'_, SessionShared> {
        // State stays consistent across a panicking handler; it is never
        // held while user code runs.
        self.shared.lock().unwrap_or_else(PoisonError::into_inner)
    }

    pub fn state(&self) -> SessionState {
        self.lock().state
    }

    pub fn cycle(&self) -> u64 {
        self.lock().cycle
    }

    /// Fault that moved the current cycle into `Error`.
    pub fn fault(&self) -> Option<DeviceFault> {
        self.lock().fault.clone()
    }

    /// Device report of the current cycle, once it has completed.
    pub fn report(&self) -> Option<BlockReport> {
        self.lock().report
    }
}

/// One-shot completion hook handed to the driver by [`ArmMode::Notify`].
pub struct BlockNotifier {
    session: AcquisitionSession,
    cycle: u64,
    handler: Option<CompletionHandler>,
    sender: Sender<BlockCompletion>,
}

impl fmt::Debug for BlockNotifier {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("BlockNotifier")
            .field("cycle", &self.cycle)
            .field("handler", &self.handler.is_some())
            .finish_non_exhaustive()
    }
}

impl BlockNotifier {
    pub fn cycle(&self) -> u64 {
        self.cycle
    }

    /// Complete the armed cycle. Reports for a cycle that was stopped or
    /// superseded are dropped.
    pub fn notify(self, report: BlockReport) {
        {
            let mut shared = self.session.lock();
            if shared.cycle != self.cycle || shared.state != SessionState::Armed {
                log::warn!(
                    "Ignoring notification for cycle {} (session at cycle {}, {})",
                    self.cycle,
                    shared.cycle,
                    shared.state
                );
                return;
            }
            shared.report = Some(report);
            match report.status.check(FaultKind::Driver, "block notification") {
                Ok(()) => shared.transition(SessionState::Ready),
                Err(fault) => shared.fail(fault),
            }
        }

        let completion = BlockCompletion {
            session: self.session.clone(),
            cycle: self.cycle,
            status: report.status,
            samples_captured: report.samples_captured,
            overflow: report.overflow,
        };
        if let Some(handler) = self.handler {
            handler(completion.clone());
        }
        if self.sender.try_send(completion).is_err() {
            log::trace!("Nobody is waiting on cycle {} completion", self.cycle);
        }
    }
}

#[derive(Debug)]
enum ActiveMode {
    Blocking,
    Notify(CompletionReceiver),
}

/// Drives one session of block captures against a [`ScopeDriver`].
#[derive(Debug)]
pub struct AcquisitionController {
    session: AcquisitionSession,
    mode: Option<ActiveMode>,
    poll_interval: Duration,
}

impl AcquisitionController {
    pub fn new(poll_interval: Duration) -> Self {
        Self {
            session: AcquisitionSession::new(),
            mode: None,
            poll_interval,
        }
    }

    pub fn session(&self) -> &AcquisitionSession {
        &self.session
    }

    pub fn state(&self) -> SessionState {
        self.session.state()
    }

    fn invalid_state(operation: &'static str, state: SessionState) -> ScopeError {
        ScopeError::InvalidState {
            operation,
            state: state.as_str(),
        }
    }

    /// Configuration may only change while no capture owns the device.
    pub fn ensure_configurable(&self, operation: &'static str) -> Result<(), ScopeError> {
        match self.state() {
            state @ (SessionState::Armed | SessionState::Reading) => Err(Self::invalid_state(operation, state)),
            _ => Ok(()),
        }
    }

    /// Start a new cycle. A `Ready` session holding unread data must be
    /// released with [`Self::discard`] first.
    pub fn arm<D: ScopeDriver + ?Sized>(
        &mut self,
        driver: &mut D,
        request: &RunBlockRequest,
        mode: ArmMode,
    ) -> Result<Option<CompletionReceiver>, ScopeError> {
        let cycle = {
            let mut shared = self.session.lock();
            match shared.state {
                SessionState::Idle | SessionState::Error => {}
                state => return Err(Self::invalid_state("arm", state)),
            }
            shared.cycle += 1;
            shared.fault = None;
            shared.report = None;
            shared.transition(SessionState::Armed);
            shared.cycle
        };

        log::debug!("Arming cycle {cycle} ({mode:?}): {request:?}");
        let (notifier, receiver) = match mode {
            ArmMode::Blocking => (None, None),
            ArmMode::Notify(handler) => {
                let (sender, receiver) = bounded(1);
                let notifier = BlockNotifier {
                    session: self.session.clone(),
                    cycle,
                    handler,
                    sender,
                };
                (Some(notifier), Some(receiver))
            }
        };
        self.mode = Some(match &receiver {
            Some(receiver) => ActiveMode::Notify(receiver.clone()),
            None => ActiveMode::Blocking,
        });

        // The lock is released here: a driver may notify before returning.
        if let Err(status) = driver.run_block(request, notifier) {
            let mut shared = self.session.lock();
            if shared.cycle == cycle && shared.state == SessionState::Armed {
                shared.fail(DeviceFault::new(FaultKind::Driver, status, "run_block"));
            }
            return Err(DeviceFault::new(FaultKind::Driver, status, "run_block").into());
        }
        Ok(receiver)
    }

    /// Receiver for the current notify-mode cycle.
    pub fn completion_receiver(&self) -> Option<CompletionReceiver> {
        match &self.mode {
            Some(ActiveMode::Notify(receiver)) => Some(receiver.clone()),
            _ => None,
        }
    }

    fn outcome(&self, operation: &'static str) -> Option<Result<(), ScopeError>> {
        let shared = self.session.lock();
        match shared.state {
            SessionState::Armed => None,
            SessionState::Ready => Some(Ok(())),
            SessionState::Error => Some(Err(match &shared.fault {
                Some(fault) => fault.clone().into(),
                None => Self::invalid_state(operation, SessionState::Error),
            })),
            state => Some(Err(Self::invalid_state(operation, state))),
        }
    }

    /// Stop the device and fail the cycle with `kind`. A cycle that completes
    /// before or during the stop keeps its own outcome.
    fn abort<D: ScopeDriver + ?Sized>(
        &self,
        driver: &mut D,
        kind: FaultKind,
        context: &'static str,
    ) -> Result<(), ScopeError> {
        if let Some(outcome) = self.outcome(context) {
            return outcome;
        }
        if let Err(status) = driver.stop() {
            log::warn!("stop() failed while aborting: {status}");
        }
        let mut shared = self.session.lock();
        if shared.state == SessionState::Armed {
            shared.fail(DeviceFault::new(kind, DriverStatus::CANCELLED, context));
        }
        match (&shared.state, &shared.fault) {
            (SessionState::Ready, _) => {
                log::debug!("Cycle {} completed while aborting", shared.cycle);
                Ok(())
            }
            (SessionState::Error, Some(fault)) => Err(fault.clone().into()),
            (state, _) => Err(Self::invalid_state(context, *state)),
        }
    }

    /// Block until the armed cycle completes, fails, times out or `cancel`
    /// fires. Returns immediately if the cycle already completed.
    pub fn wait_ready<D: ScopeDriver + ?Sized>(
        &mut self,
        driver: &mut D,
        cancel: &CancelToken,
        timeout: Option<Duration>,
    ) -> Result<(), ScopeError> {
        let deadline = timeout.map(|timeout| Instant::now() + timeout);
        let receiver = match &self.mode {
            Some(ActiveMode::Notify(receiver)) => Some(receiver.clone()),
            _ => None,
        };

        loop {
            if let Some(outcome) = self.outcome("wait_ready") {
                return outcome;
            }
            if cancel.is_cancelled() {
                return self.abort(driver, FaultKind::Cancelled, "wait_ready");
            }
            if deadline.is_some_and(|deadline| Instant::now() >= deadline) {
                return self.abort(driver, FaultKind::Timeout, "wait_ready");
            }

            match &receiver {
                None => match driver.is_ready() {
                    Ok(true) => {
                        let mut shared = self.session.lock();
                        if shared.state == SessionState::Armed {
                            shared.transition(SessionState::Ready);
                        }
                    }
                    Ok(false) => thread::sleep(self.poll_interval),
                    Err(status) => {
                        let mut shared = self.session.lock();
                        if shared.state == SessionState::Armed {
                            shared.fail(DeviceFault::new(FaultKind::Driver, status, "is_ready"));
                        }
                    }
                },
                Some(receiver) => match receiver.recv_timeout(self.poll_interval) {
                    Ok(_) | Err(RecvTimeoutError::Timeout) => {}
                    Err(RecvTimeoutError::Disconnected) => {
                        // The driver dropped the notifier without reporting.
                        let mut shared = self.session.lock();
                        if shared.state == SessionState::Armed {
                            shared.fail(DeviceFault::new(
                                FaultKind::Aborted,
                                DriverStatus::CANCELLED,
                                "block notification",
                            ));
                        }
                    }
                },
            }
        }
    }

    /// Abort an armed capture. No-op in any other state.
    pub fn stop<D: ScopeDriver + ?Sized>(&mut self, driver: &mut D) -> Result<(), ScopeError> {
        if self.state() != SessionState::Armed {
            return Ok(());
        }
        let status = driver.stop();
        let mut shared = self.session.lock();
        if shared.state == SessionState::Armed {
            shared.fail(DeviceFault::new(
                FaultKind::Aborted,
                status.err().unwrap_or(DriverStatus::CANCELLED),
                "stop",
            ));
        }
        Ok(())
    }

    /// Drop a completed capture without reading it.
    pub fn discard(&mut self) -> Result<(), ScopeError> {
        let mut shared = self.session.lock();
        match shared.state {
            SessionState::Ready => {
                log::warn!("Discarding unread data of cycle {}", shared.cycle);
                shared.transition(SessionState::Idle);
                Ok(())
            }
            SessionState::Idle | SessionState::Error => Ok(()),
            state => Err(Self::invalid_state("discard", state)),
        }
    }

    /// Transfer the completed capture into the bound buffers. Valid once per
    /// cycle, from `Ready`.
    pub fn get_data<D: ScopeDriver + ?Sized>(
        &mut self,
        driver: &mut D,
        binder: &mut BufferBinder<'_>,
        request: &ValuesRequest,
    ) -> Result<ValuesReadout, ScopeError> {
        {
            let mut shared = self.session.lock();
            if shared.state != SessionState::Ready {
                return Err(Self::invalid_state("get_data", shared.state));
            }
            shared.transition(SessionState::Reading);
        }

        let mut targets = binder.targets();
        let result = driver.get_values(request, &mut targets);
        drop(targets);

        let mut shared = self.session.lock();
        match result {
            Ok(readout) => {
                log::debug!(
                    "Cycle {}: {} samples per buffer transferred",
                    shared.cycle,
                    readout.samples_transferred
                );
                shared.transition(SessionState::Idle);
                Ok(readout)
            }
            Err(status) => {
                let fault = DeviceFault::new(FaultKind::Driver, status, "get_values");
                shared.fail(fault.clone());
                Err(fault.into())
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::buffers::{BufferGeometry, DownsampleMode};
    use crate::channel::{ChannelId, ChannelSettings, Coupling, VoltageRange};
    use crate::sim::SimulatedDriver;
    use std::sync::atomic::AtomicUsize;

    fn request() -> RunBlockRequest {
        RunBlockRequest {
            pre_trigger_samples: 0,
            post_trigger_samples: 64,
            timebase: 5,
            segment_index: 0,
        }
    }

    fn values() -> ValuesRequest {
        ValuesRequest {
            start_index: 0,
            num_samples: 64,
            downsample_ratio: 1,
            from_segment: 0,
            to_segment: 0,
        }
    }

    fn geometry() -> BufferGeometry {
        BufferGeometry {
            num_samples: 64,
            segments: 1,
            resolution_generation: 0,
        }
    }

    #[test]
    fn test_get_data_requires_ready() {
        let mut driver = SimulatedDriver::new().with_ready_after_polls(3);
        driver
            .set_channel(ChannelId::A, &ChannelSettings::enabled(Coupling::DC, VoltageRange::Volts1))
            .unwrap();
        let mut controller = AcquisitionController::new(Duration::from_millis(1));
        let mut storage = vec![0i16; 64];
        let mut binder = BufferBinder::new(geometry());
        binder.bind(ChannelId::A, &mut storage, DownsampleMode::RAW, 0).unwrap();

        assert!(matches!(
            controller.get_data(&mut driver, &mut binder, &values()),
            Err(ScopeError::InvalidState { state: "idle", .. })
        ));

        controller.arm(&mut driver, &request(), ArmMode::Blocking).unwrap();
        assert!(matches!(
            controller.get_data(&mut driver, &mut binder, &values()),
            Err(ScopeError::InvalidState { state: "armed", .. })
        ));

        controller.wait_ready(&mut driver, &CancelToken::new(), None).unwrap();
        assert_eq!(controller.state(), SessionState::Ready);
        controller.get_data(&mut driver, &mut binder, &values()).unwrap();
        assert_eq!(controller.state(), SessionState::Idle);
        assert!(controller.get_data(&mut driver, &mut binder, &values()).is_err());
    }

    #[test]
    fn test_double_arm_rejected() {
        let mut driver = SimulatedDriver::new().with_ready_after_polls(100);
        let mut controller = AcquisitionController::new(Duration::from_millis(1));
        controller.arm(&mut driver, &request(), ArmMode::Blocking).unwrap();
        assert!(matches!(
            controller.arm(&mut driver, &request(), ArmMode::Blocking),
            Err(ScopeError::InvalidState { operation: "arm", .. })
        ));
        assert!(controller.ensure_configurable("set_channel").is_err());
    }

    #[test]
    fn test_rearm_over_unread_data_needs_discard() {
        let mut driver = SimulatedDriver::new();
        let mut controller = AcquisitionController::new(Duration::from_millis(1));
        controller.arm(&mut driver, &request(), ArmMode::Blocking).unwrap();
        controller.wait_ready(&mut driver, &CancelToken::new(), None).unwrap();

        assert!(controller.arm(&mut driver, &request(), ArmMode::Blocking).is_err());
        controller.discard().unwrap();
        controller.arm(&mut driver, &request(), ArmMode::Blocking).unwrap();
        assert_eq!(controller.session().cycle(), 2);
    }

    #[test]
    fn test_cancel_moves_to_error() {
        let mut driver = SimulatedDriver::new().with_ready_after_polls(u32::MAX);
        let mut controller = AcquisitionController::new(Duration::from_millis(1));
        controller.arm(&mut driver, &request(), ArmMode::Blocking).unwrap();

        let cancel = CancelToken::new();
        cancel.cancel();
        let err = controller.wait_ready(&mut driver, &cancel, None).unwrap_err();
        assert!(matches!(
            err,
            ScopeError::Device(DeviceFault { kind: FaultKind::Cancelled, .. })
        ));
        assert_eq!(controller.state(), SessionState::Error);
        assert!(driver.stop_count() >= 1);

        // Error is not sticky: the caller may re-arm.
        controller.arm(&mut driver, &request(), ArmMode::Blocking).unwrap();
    }

    #[test]
    fn test_wait_timeout() {
        let mut driver = SimulatedDriver::new().with_ready_after_polls(u32::MAX);
        let mut controller = AcquisitionController::new(Duration::from_millis(1));
        controller.arm(&mut driver, &request(), ArmMode::Blocking).unwrap();
        let err = controller
            .wait_ready(&mut driver, &CancelToken::new(), Some(Duration::from_millis(20)))
            .unwrap_err();
        assert!(matches!(
            err,
            ScopeError::Device(DeviceFault { kind: FaultKind::Timeout, .. })
        ));
    }

    #[test]
    fn test_device_fault_during_poll() {
        let mut driver = SimulatedDriver::new().with_block_status(DriverStatus::TRIGGER_TIMEOUT);
        let mut controller = AcquisitionController::new(Duration::from_millis(1));
        controller.arm(&mut driver, &request(), ArmMode::Blocking).unwrap();
        let err = controller.wait_ready(&mut driver, &CancelToken::new(), None).unwrap_err();
        assert!(matches!(
            err,
            ScopeError::Device(DeviceFault {
                kind: FaultKind::Driver,
                status: DriverStatus::TRIGGER_TIMEOUT,
                ..
            })
        ));
        assert_eq!(controller.state(), SessionState::Error);
    }

    #[test]
    fn test_notifier_delivers_once() {
        let mut driver = SimulatedDriver::new().with_notify_delay(Duration::from_millis(5));
        let mut controller = AcquisitionController::new(Duration::from_millis(1));
        let calls = Arc::new(AtomicUsize::new(0));
        let seen = Arc::clone(&calls);
        let handler: CompletionHandler = Box::new(move |completion| {
            assert!(completion.is_ok());
            assert_eq!(completion.session.state(), SessionState::Ready);
            seen.fetch_add(1, Ordering::SeqCst);
        });

        let receiver = controller
            .arm(&mut driver, &request(), ArmMode::Notify(Some(handler)))
            .unwrap()
            .unwrap();
        let completion = receiver.recv_timeout(Duration::from_secs(5)).unwrap();
        assert_eq!(completion.cycle, 1);
        assert_eq!(completion.samples_captured, 64);
        controller.wait_ready(&mut driver, &CancelToken::new(), None).unwrap();
        driver.join_notifications();
        assert_eq!(calls.load(Ordering::SeqCst), 1);
    }

    #[test]
    fn test_stale_notification_ignored() {
        let mut driver = SimulatedDriver::new().with_manual_notify();
        let mut controller = AcquisitionController::new(Duration::from_millis(1));
        controller
            .arm(&mut driver, &request(), ArmMode::Notify(None))
            .unwrap();
        controller.stop(&mut driver).unwrap();
        assert_eq!(controller.state(), SessionState::Error);

        let notifier = driver.take_notifier().unwrap();
        notifier.notify(BlockReport {
            status: DriverStatus::OK,
            samples_captured: 64,
            overflow: OverflowFlags::empty(),
        });
        assert_eq!(controller.state(), SessionState::Error);
        assert_eq!(
            controller.session().fault().map(|fault| fault.kind),
            Some(FaultKind::Aborted)
        );
    }

    #[test]
    fn test_dropped_notifier_fails_wait() {
        let mut driver = SimulatedDriver::new().with_manual_notify();
        let mut controller = AcquisitionController::new(Duration::from_millis(1));
        controller
            .arm(&mut driver, &request(), ArmMode::Notify(None))
            .unwrap();
        drop(driver.take_notifier());
        let err = controller.wait_ready(&mut driver, &CancelToken::new(), None).unwrap_err();
        assert!(matches!(
            err,
            ScopeError::Device(DeviceFault { kind: FaultKind::Aborted, .. })
        ));
    }

    #[test]
    fn test_completion_during_cancel_keeps_ready() {
        let mut driver = SimulatedDriver::new().with_completion_on_stop();
        let mut controller = AcquisitionController::new(Duration::from_millis(1));
        controller
            .arm(&mut driver, &request(), ArmMode::Notify(None))
            .unwrap();

        let cancel = CancelToken::new();
        cancel.cancel();
        controller.wait_ready(&mut driver, &cancel, None).unwrap();
        assert_eq!(driver.stop_count(), 1);
        assert_eq!(controller.state(), SessionState::Ready);
        assert!(controller.session().fault().is_none());
    }

    #[test]
    fn test_cancel_after_completion_skips_stop() {
        let mut driver = SimulatedDriver::new().with_manual_notify();
        let mut controller = AcquisitionController::new(Duration::from_millis(1));
        controller
            .arm(&mut driver, &request(), ArmMode::Notify(None))
            .unwrap();
        driver.take_notifier().unwrap().notify(BlockReport {
            status: DriverStatus::OK,
            samples_captured: 64,
            overflow: OverflowFlags::empty(),
        });

        let cancel = CancelToken::new();
        cancel.cancel();
        controller.wait_ready(&mut driver, &cancel, None).unwrap();
        assert_eq!(driver.stop_count(), 0);
        assert_eq!(controller.state(), SessionState::Ready);
    }
}
