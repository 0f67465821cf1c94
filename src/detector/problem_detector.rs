use crate::detector::NodeStatusHandle;
use crate::error::{DetectorError, ExportError};
use crate::exporters::Exporter;
use crate::monitor::Monitor;
use crate::types::{Condition, Status};
use log::{debug, error, info, warn};
use std::panic::{self, AssertUnwindSafe};
use std::sync::mpsc::{self, Receiver, Sender};
use std::thread;

/// Messages consumed by the merge loop
enum DetectorMessage {
    /// A status forwarded from the monitor at this index
    Status(usize, Status),
    /// The monitor's status channel was closed
    MonitorClosed(usize),
    /// Stop every monitor and return from `run`
    Shutdown,
}

/// Cloneable trigger that makes [`ProblemDetector::run`] return
#[derive(Clone)]
pub struct ShutdownHandle {
    sender: Sender<DetectorMessage>,
}

impl ShutdownHandle {
    pub fn trigger(&self) {
        if self.sender.send(DetectorMessage::Shutdown).is_err() {
            debug!("Problem detector already finished");
        }
    }
}

/// Fan-in aggregator over every monitor's status channel
///
/// One forwarding thread per started monitor feeds a single merge channel,
/// so statuses from independent monitors are handled first come first
/// served and no monitor can block another.
pub struct ProblemDetector {
    monitors: Vec<Box<dyn Monitor>>,
    exporters: Vec<Box<dyn Exporter>>,
    state: NodeStatusHandle,
    sender: Sender<DetectorMessage>,
    receiver: Receiver<DetectorMessage>,
}

impl ProblemDetector {
    pub fn new(monitors: Vec<Box<dyn Monitor>>, exporters: Vec<Box<dyn Exporter>>) -> Self {
        let (sender, receiver) = mpsc::channel();
        Self {
            monitors,
            exporters,
            state: NodeStatusHandle::new(),
            sender,
            receiver,
        }
    }

    pub fn shutdown_handle(&self) -> ShutdownHandle {
        ShutdownHandle {
            sender: self.sender.clone(),
        }
    }

    pub fn status_handle(&self) -> NodeStatusHandle {
        self.state.clone()
    }

    /// Start every monitor and merge their output until shutdown
    ///
    /// Monitors that fail to start are logged and left out. Returns an error
    /// when nothing can be monitored or exported, or when every started
    /// monitor has exited.
    pub fn run(&mut self) -> Result<(), DetectorError> {
        if self.exporters.is_empty() {
            return Err(DetectorError::NoExporters);
        }

        let mut started = Vec::new();
        for (index, monitor) in self.monitors.iter().enumerate() {
            match monitor.start() {
                Ok(statuses) => {
                    self.spawn_forwarder(index, monitor.name(), statuses)?;
                    started.push(index);
                }
                Err(e) => error!("Failed to start problem daemon {}: {}", monitor.name(), e),
            }
        }

        if started.is_empty() {
            return Err(DetectorError::NoMonitors);
        }
        info!(
            "Problem detector running with {} of {} monitor(s) and {} exporter(s)",
            started.len(),
            self.monitors.len(),
            self.exporters.len()
        );

        let mut active = started.len();
        // The detector keeps its own sender, so recv only fails if that is gone.
        while let Ok(message) = self.receiver.recv() {
            match message {
                DetectorMessage::Status(index, status) => self.handle_status(index, status),
                DetectorMessage::MonitorClosed(index) => {
                    warn!(
                        "Monitor {} closed its status channel",
                        self.monitors[index].name()
                    );
                    active -= 1;
                    if active == 0 {
                        self.stop_monitors(&started);
                        return Err(DetectorError::AllMonitorsExited(started.len()));
                    }
                }
                DetectorMessage::Shutdown => {
                    info!("Problem detector shutting down");
                    self.stop_monitors(&started);
                    return Ok(());
                }
            }
        }

        self.stop_monitors(&started);
        Ok(())
    }

    fn spawn_forwarder(
        &self,
        index: usize,
        name: &str,
        statuses: Receiver<Status>,
    ) -> Result<(), DetectorError> {
        let merge = self.sender.clone();
        thread::Builder::new()
            .name(format!("forward-{}", name))
            .spawn(move || {
                for status in statuses.iter() {
                    if merge.send(DetectorMessage::Status(index, status)).is_err() {
                        return;
                    }
                }
                let _ = merge.send(DetectorMessage::MonitorClosed(index));
            })?;
        Ok(())
    }

    fn stop_monitors(&self, started: &[usize]) {
        for &index in started {
            self.monitors[index].stop();
        }
    }

    /// Merge one status, then forward its events and any changed snapshot
    fn handle_status(&self, index: usize, status: Status) {
        debug!(
            "Status from {}: {} condition(s), {} event(s)",
            status.source,
            status.conditions.len(),
            status.events.len()
        );

        let snapshot = self.state.apply(index, &status.source, &status.conditions);

        for event in &status.events {
            self.export_all("event", |exporter| {
                exporter.export_event(&status.source, event)
            });
        }

        if let Some(conditions) = snapshot {
            self.export_conditions(&conditions);
        }
    }

    fn export_conditions(&self, conditions: &[Condition]) {
        self.export_all("conditions", |exporter| {
            exporter.export_conditions(conditions)
        });
    }

    /// Call every exporter, isolating errors and panics
    fn export_all(&self, what: &str, call: impl Fn(&dyn Exporter) -> Result<(), ExportError>) {
        for exporter in &self.exporters {
            let exporter = exporter.as_ref();
            match panic::catch_unwind(AssertUnwindSafe(|| call(exporter))) {
                Ok(Ok(())) => {}
                Ok(Err(e)) => warn!("Exporter {} failed to export {}: {}", exporter.name(), what, e),
                Err(_) => error!("Exporter {} panicked while exporting {}", exporter.name(), what),
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::error::MonitorError;
    use crate::exporters::MockExporter;
    use crate::types::{ConditionStatus, Event, Severity};
    use chrono::{TimeZone, Utc};
    use std::sync::{Arc, Mutex};
    use std::thread::JoinHandle;
    use std::time::{Duration, Instant};

    /// Monitor whose status channel is fed by the test
    struct FakeMonitor {
        name: String,
        statuses: Mutex<Option<Receiver<Status>>>,
        stopped: Arc<Mutex<bool>>,
    }

    impl FakeMonitor {
        fn new(name: &str) -> (Self, Sender<Status>) {
            let (tx, rx) = mpsc::channel();
            (
                Self {
                    name: name.to_string(),
                    statuses: Mutex::new(Some(rx)),
                    stopped: Arc::new(Mutex::new(false)),
                },
                tx,
            )
        }

        fn failing(name: &str) -> Self {
            Self {
                name: name.to_string(),
                statuses: Mutex::new(None),
                stopped: Arc::new(Mutex::new(false)),
            }
        }
    }

    impl Monitor for FakeMonitor {
        fn name(&self) -> &str {
            &self.name
        }

        fn start(&self) -> Result<Receiver<Status>, MonitorError> {
            self.statuses
                .lock()
                .unwrap()
                .take()
                .ok_or_else(|| MonitorError::AlreadyStarted(self.name.clone()))
        }

        fn stop(&self) {
            *self.stopped.lock().unwrap() = true;
        }
    }

    /// What an exporter was asked to do
    #[derive(Debug, Clone, PartialEq)]
    enum Call {
        Conditions(Vec<Condition>),
        Event(String, Event),
    }

    fn recording_exporter(calls: Arc<Mutex<Vec<Call>>>) -> MockExporter {
        let mut exporter = MockExporter::new();
        exporter.expect_name().return_const("recording");
        let conditions_calls = Arc::clone(&calls);
        exporter.expect_export_conditions().returning(move |c| {
            conditions_calls.lock().unwrap().push(Call::Conditions(c.to_vec()));
            Ok(())
        });
        exporter.expect_export_event().returning(move |s, e| {
            calls.lock().unwrap().push(Call::Event(s.to_string(), e.clone()));
            Ok(())
        });
        exporter
    }

    struct PanickingExporter;

    impl Exporter for PanickingExporter {
        fn name(&self) -> &'static str {
            "panicking"
        }

        fn export_conditions(&self, _conditions: &[Condition]) -> Result<(), ExportError> {
            panic!("exporter bug")
        }

        fn export_event(&self, _source: &str, _event: &Event) -> Result<(), ExportError> {
            panic!("exporter bug")
        }
    }

    fn condition(condition_type: &str, status: ConditionStatus, reason: &str) -> Condition {
        Condition {
            condition_type: condition_type.to_string(),
            status,
            transition: Utc.timestamp_opt(100, 0).unwrap(),
            reason: reason.to_string(),
            message: String::new(),
        }
    }

    fn event(reason: &str) -> Event {
        Event {
            severity: Severity::Warn,
            timestamp: Utc.timestamp_opt(200, 0).unwrap(),
            reason: reason.to_string(),
            message: "msg".to_string(),
        }
    }

    fn status(source: &str, conditions: Vec<Condition>, events: Vec<Event>) -> Status {
        Status {
            source: source.to_string(),
            conditions,
            events,
        }
    }

    fn wait_for_calls(calls: &Arc<Mutex<Vec<Call>>>, count: usize) {
        let deadline = Instant::now() + Duration::from_secs(5);
        while calls.lock().unwrap().len() < count && Instant::now() < deadline {
            thread::sleep(Duration::from_millis(5));
        }
    }

    fn spawn(
        mut detector: ProblemDetector,
    ) -> (ShutdownHandle, JoinHandle<Result<(), DetectorError>>) {
        let shutdown = detector.shutdown_handle();
        let handle = thread::spawn(move || detector.run());
        (shutdown, handle)
    }

    #[test]
    fn test_no_exporters_is_fatal() {
        let (monitor, _tx) = FakeMonitor::new("m");
        let mut detector = ProblemDetector::new(vec![Box::new(monitor)], Vec::new());
        assert!(matches!(detector.run(), Err(DetectorError::NoExporters)));
    }

    #[test]
    fn test_no_startable_monitor_is_fatal() {
        let calls = Arc::new(Mutex::new(Vec::new()));
        let mut detector = ProblemDetector::new(
            vec![Box::new(FakeMonitor::failing("broken"))],
            vec![Box::new(recording_exporter(calls))],
        );
        assert!(matches!(detector.run(), Err(DetectorError::NoMonitors)));

        let calls = Arc::new(Mutex::new(Vec::new()));
        let mut empty = ProblemDetector::new(Vec::new(), vec![Box::new(recording_exporter(calls))]);
        assert!(matches!(empty.run(), Err(DetectorError::NoMonitors)));
    }

    #[test]
    fn test_identical_snapshot_suppressed_but_events_forwarded() {
        let calls = Arc::new(Mutex::new(Vec::new()));
        let (monitor, tx) = FakeMonitor::new("kernel");
        let detector = ProblemDetector::new(
            vec![Box::new(monitor)],
            vec![Box::new(recording_exporter(Arc::clone(&calls)))],
        );
        let (shutdown, handle) = spawn(detector);

        let conditions = vec![condition("KernelDeadlock", ConditionStatus::False, "init")];
        tx.send(status("kernel", conditions.clone(), Vec::new())).unwrap();
        tx.send(status("kernel", conditions.clone(), Vec::new())).unwrap();
        tx.send(status("kernel", conditions.clone(), vec![event("OOMKilling")]))
            .unwrap();
        wait_for_calls(&calls, 2);

        shutdown.trigger();
        assert!(handle.join().unwrap().is_ok());

        assert_eq!(
            *calls.lock().unwrap(),
            vec![
                Call::Conditions(conditions),
                Call::Event("kernel".to_string(), event("OOMKilling")),
            ]
        );
    }

    #[test]
    fn test_message_only_refresh_is_exported_with_original_transition() {
        let calls = Arc::new(Mutex::new(Vec::new()));
        let (monitor, tx) = FakeMonitor::new("kernel");
        let detector = ProblemDetector::new(
            vec![Box::new(monitor)],
            vec![Box::new(recording_exporter(Arc::clone(&calls)))],
        );
        let status_handle = detector.status_handle();
        let (shutdown, handle) = spawn(detector);

        let first = Condition {
            message: "task docker:1 blocked".to_string(),
            ..condition("KernelDeadlock", ConditionStatus::True, "DockerHung")
        };
        let refreshed = Condition {
            message: "task docker:7 blocked".to_string(),
            ..first.clone()
        };
        tx.send(status("kernel", vec![first.clone()], Vec::new())).unwrap();
        tx.send(status("kernel", vec![refreshed.clone()], Vec::new()))
            .unwrap();
        wait_for_calls(&calls, 2);

        shutdown.trigger();
        assert!(handle.join().unwrap().is_ok());

        let calls = calls.lock().unwrap();
        assert_eq!(
            *calls,
            vec![
                Call::Conditions(vec![first.clone()]),
                Call::Conditions(vec![refreshed.clone()]),
            ]
        );
        let Call::Conditions(latest) = &calls[1] else {
            panic!("expected a condition snapshot");
        };
        assert_eq!(latest[0].transition, first.transition);
        assert_eq!(
            status_handle.condition("KernelDeadlock").unwrap().message,
            "task docker:7 blocked"
        );
    }

    #[test]
    fn test_events_before_snapshot_and_full_view_forwarded() {
        let calls = Arc::new(Mutex::new(Vec::new()));
        let (kernel, kernel_tx) = FakeMonitor::new("kernel");
        let (disk, disk_tx) = FakeMonitor::new("disk");
        let detector = ProblemDetector::new(
            vec![Box::new(kernel), Box::new(disk)],
            vec![Box::new(recording_exporter(Arc::clone(&calls)))],
        );
        let status_handle = detector.status_handle();
        let (shutdown, handle) = spawn(detector);

        let deadlock = condition("KernelDeadlock", ConditionStatus::False, "init");
        kernel_tx
            .send(status("kernel", vec![deadlock.clone()], Vec::new()))
            .unwrap();
        wait_for_calls(&calls, 1);

        let slow_disk = condition("SlowDisk", ConditionStatus::True, "QueueTooLong");
        disk_tx
            .send(status("disk", vec![slow_disk.clone()], vec![event("QueueTooLong")]))
            .unwrap();
        wait_for_calls(&calls, 3);

        assert_eq!(status_handle.conditions(), vec![deadlock.clone(), slow_disk.clone()]);
        assert_eq!(
            status_handle.condition("SlowDisk").unwrap().reason,
            "QueueTooLong"
        );

        shutdown.trigger();
        assert!(handle.join().unwrap().is_ok());

        let calls = calls.lock().unwrap();
        assert_eq!(calls.len(), 3);
        assert_eq!(calls[1], Call::Event("disk".to_string(), event("QueueTooLong")));
        assert_eq!(calls[2], Call::Conditions(vec![deadlock, slow_disk]));
    }

    #[test]
    fn test_failing_exporters_are_isolated() {
        let calls = Arc::new(Mutex::new(Vec::new()));

        let mut failing = MockExporter::new();
        failing.expect_name().return_const("failing");
        failing.expect_export_conditions().returning(|_| {
            Err(ExportError::DeliveryFailed("test".to_string(), "boom".to_string()))
        });
        failing.expect_export_event().returning(|_, _| {
            Err(ExportError::Closed("failing".to_string()))
        });

        let (monitor, tx) = FakeMonitor::new("kernel");
        let detector = ProblemDetector::new(
            vec![Box::new(monitor)],
            vec![
                Box::new(failing),
                Box::new(PanickingExporter),
                Box::new(recording_exporter(Arc::clone(&calls))),
            ],
        );
        let (shutdown, handle) = spawn(detector);

        tx.send(status(
            "kernel",
            vec![condition("KernelDeadlock", ConditionStatus::False, "init")],
            vec![event("OOMKilling")],
        ))
        .unwrap();
        wait_for_calls(&calls, 2);

        shutdown.trigger();
        assert!(handle.join().unwrap().is_ok());
        assert_eq!(calls.lock().unwrap().len(), 2);
    }

    #[test]
    fn test_start_failure_does_not_abort_run() {
        let calls = Arc::new(Mutex::new(Vec::new()));
        let (healthy, tx) = FakeMonitor::new("healthy");
        let healthy_stopped = Arc::clone(&healthy.stopped);
        let broken = FakeMonitor::failing("broken");
        let broken_stopped = Arc::clone(&broken.stopped);

        let detector = ProblemDetector::new(
            vec![Box::new(broken), Box::new(healthy)],
            vec![Box::new(recording_exporter(Arc::clone(&calls)))],
        );
        let (shutdown, handle) = spawn(detector);

        tx.send(status(
            "healthy",
            vec![condition("Ok", ConditionStatus::False, "init")],
            Vec::new(),
        ))
        .unwrap();
        wait_for_calls(&calls, 1);

        shutdown.trigger();
        assert!(handle.join().unwrap().is_ok());
        assert!(*healthy_stopped.lock().unwrap());
        // A monitor that never started is never stopped.
        assert!(!*broken_stopped.lock().unwrap());
    }

    #[test]
    fn test_all_monitors_exiting_is_fatal() {
        let calls = Arc::new(Mutex::new(Vec::new()));
        let (first, first_tx) = FakeMonitor::new("first");
        let (second, second_tx) = FakeMonitor::new("second");
        let detector = ProblemDetector::new(
            vec![Box::new(first), Box::new(second)],
            vec![Box::new(recording_exporter(calls))],
        );
        let (_shutdown, handle) = spawn(detector);

        drop(first_tx);
        drop(second_tx);
        assert!(matches!(
            handle.join().unwrap(),
            Err(DetectorError::AllMonitorsExited(2))
        ));
    }
}
