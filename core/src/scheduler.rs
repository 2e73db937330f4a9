//! Admission control for the radio.
//!
//! [`RadioScheduler`] owns the transport and lets exactly one operation use
//! it at a time. It is a plain state machine: callers feed it submissions,
//! cancellations, routed events and the current time, and it starts
//! operations on the transport as the radio frees up. [`crate::radio::Radio`]
//! drives one from a worker thread; tests drive it directly with synthetic
//! instants.
//!
//! Every terminal transition goes through [`RadioScheduler::release`], which
//! gives the transport back and admits the next operation, whatever ended the
//! previous one.
//!
//! A stream without a deadline whose [`ResultSink`] was dropped is cancelled
//! the next time the scheduler is fed an event, a submission or a poll.

use std::collections::VecDeque;
use std::sync::Arc;
use std::time::Instant;

use log::{debug, warn};

use crate::config::RadioConfig;
use crate::error::{RadioError, Result};
use crate::metrics::{MetricsSnapshot, RadioMetrics};
use crate::models::{OperationId, OperationState, Priority};
use crate::operation::{Deadline, Job, Operation, Step, Submission};
use crate::router::{self, Routed};
use crate::sink::ResultSink;
use crate::timeout::TimeoutGuard;
use crate::transport::{TransportAdapter, TransportEvent};

/// Proof that an operation holds the transport. Only the admission loop
/// creates one, and only while the running slot is empty.
#[derive(Debug)]
struct TransportLease {
    holder: OperationId,
}

struct Running {
    job: Box<dyn Job>,
    guard: TimeoutGuard,
    lease: TransportLease,
}

pub struct RadioScheduler<T: TransportAdapter> {
    transport: T,
    config: RadioConfig,
    urgent: VecDeque<Box<dyn Job>>,
    normal: VecDeque<Box<dyn Job>>,
    running: Option<Running>,
    metrics: Arc<RadioMetrics>,
}

impl<T: TransportAdapter> RadioScheduler<T> {
    pub fn new(transport: T, config: RadioConfig) -> Self {
        Self::with_metrics(transport, config, Arc::new(RadioMetrics::new()))
    }

    pub fn with_metrics(transport: T, config: RadioConfig, metrics: Arc<RadioMetrics>) -> Self {
        Self {
            transport,
            config,
            urgent: VecDeque::new(),
            normal: VecDeque::new(),
            running: None,
            metrics,
        }
    }

    /// Queue an operation and admit it right away if the radio is idle.
    ///
    /// Fails with [`RadioError::AlreadySubmitted`] while an operation with the
    /// same identity is queued or running.
    pub fn submit<O: Operation>(&mut self, op: O, now: Instant) -> Result<ResultSink<O::Output>> {
        let (job, sink) = Submission::new(op);
        self.enqueue(Box::new(job), now)?;
        Ok(sink)
    }

    pub(crate) fn enqueue(&mut self, mut job: Box<dyn Job>, now: Instant) -> Result<()> {
        let id = job.id();
        if self.contains(id) {
            let error = RadioError::AlreadySubmitted(id);
            job.fail(error.clone());
            return Err(error);
        }

        self.reap_abandoned(now);
        RadioMetrics::bump(&self.metrics.submitted);
        job.mark(OperationState::Queued);
        debug!("[RADIO] queued {} ({}, {:?})", id, job.kind(), job.priority());
        match job.priority() {
            Priority::Urgent => self.urgent.push_back(job),
            Priority::Normal => self.normal.push_back(job),
        }
        self.admit(now);
        Ok(())
    }

    /// Cancel a queued or running operation. Returns false if the identity is
    /// unknown, e.g. because the operation already finished.
    ///
    /// A queued operation is removed and resolved as cancelled without ever
    /// touching the transport. A running one is only asked to stop; the
    /// transport is released when the operation itself reaches a terminal
    /// state.
    pub fn cancel(&mut self, id: OperationId, now: Instant) -> bool {
        if let Some(mut job) = self.remove_queued(id) {
            debug!("[RADIO] cancelled queued {}", id);
            if let Step::Terminal(state) = job.fail(RadioError::Cancelled) {
                self.metrics.record_terminal(state);
            }
            return true;
        }

        let step = match self.running.as_mut() {
            Some(running) if running.job.id() == id => running.job.on_cancel(&mut self.transport),
            _ => return false,
        };
        debug!("[RADIO] cancel requested for running {}", id);
        if let Step::Terminal(state) = step {
            self.release(state, now);
        }
        true
    }

    /// Offer a transport event to the running operation.
    pub fn route(&mut self, event: TransportEvent, now: Instant) {
        self.reap_abandoned(now);
        match router::route(self.running.as_mut().map(|r| &mut r.job), event) {
            Routed::Dropped => RadioMetrics::bump(&self.metrics.events_dropped),
            Routed::Delivered(step) => {
                RadioMetrics::bump(&self.metrics.events_routed);
                if let Step::Terminal(state) = step {
                    self.release(state, now);
                }
            }
        }
    }

    /// Fire the running operation's timeout if its deadline has passed.
    pub fn poll_timeout(&mut self, now: Instant) {
        self.reap_abandoned(now);
        let step = match self.running.as_mut() {
            Some(running) if running.guard.is_expired(now) => {
                let after = running.guard.duration();
                warn!(
                    "[RADIO] {} ({}) timed out after {:?}",
                    running.job.id(),
                    running.job.kind(),
                    after
                );
                running.job.on_timeout(after)
            }
            _ => return,
        };
        if let Step::Terminal(state) = step {
            self.release(state, now);
        }
    }

    /// When [`RadioScheduler::poll_timeout`] next needs to run.
    pub fn next_deadline(&self) -> Option<Instant> {
        self.running.as_ref().and_then(|r| r.guard.deadline())
    }

    pub fn running(&self) -> Option<OperationId> {
        self.running.as_ref().map(|r| r.lease.holder)
    }

    pub fn is_idle(&self) -> bool {
        self.running.is_none()
    }

    pub fn queued_len(&self) -> usize {
        self.urgent.len() + self.normal.len()
    }

    /// Queued identities in admission order.
    pub fn queued(&self) -> Vec<OperationId> {
        self.urgent
            .iter()
            .chain(self.normal.iter())
            .map(|job| job.id())
            .collect()
    }

    pub fn contains(&self, id: OperationId) -> bool {
        self.running() == Some(id)
            || self
                .urgent
                .iter()
                .chain(self.normal.iter())
                .any(|job| job.id() == id)
    }

    pub fn transport(&self) -> &T {
        &self.transport
    }

    pub fn transport_mut(&mut self) -> &mut T {
        &mut self.transport
    }

    pub fn config(&self) -> &RadioConfig {
        &self.config
    }

    pub fn metrics(&self) -> MetricsSnapshot {
        self.metrics.snapshot()
    }

    /// Resolve every queued operation and the running one as cancelled.
    /// A running scan is stopped on the hardware first.
    pub fn shutdown(&mut self) {
        let queued: Vec<_> = self.urgent.drain(..).chain(self.normal.drain(..)).collect();
        for mut job in queued {
            if let Step::Terminal(state) = job.fail(RadioError::Cancelled) {
                self.metrics.record_terminal(state);
            }
        }
        if let Some(mut running) = self.running.take() {
            let state = match running.job.on_cancel(&mut self.transport) {
                Step::Terminal(state) => state,
                Step::Running => match running.job.fail(RadioError::Cancelled) {
                    Step::Terminal(state) => state,
                    Step::Running => OperationState::Cancelled,
                },
            };
            running.guard.disarm();
            running.job.on_release(&mut self.transport);
            self.metrics.record_terminal(state);
            RadioMetrics::bump(&self.metrics.released);
            debug!("[RADIO] released {} on shutdown", running.lease.holder);
        }
    }

    fn remove_queued(&mut self, id: OperationId) -> Option<Box<dyn Job>> {
        for queue in [&mut self.urgent, &mut self.normal] {
            if let Some(index) = queue.iter().position(|job| job.id() == id) {
                return queue.remove(index);
            }
        }
        None
    }

    fn pop_next(&mut self) -> Option<Box<dyn Job>> {
        self.urgent.pop_front().or_else(|| self.normal.pop_front())
    }

    /// A stream that never times out would hold the radio forever once its
    /// caller is gone, so it is cancelled here.
    fn reap_abandoned(&mut self, now: Instant) {
        let step = match self.running.as_mut() {
            Some(running)
                if running.job.deadline() == Deadline::Never && running.job.is_abandoned() =>
            {
                debug!("[RADIO] {} abandoned by its caller", running.job.id());
                match running.job.on_cancel(&mut self.transport) {
                    Step::Running => running.job.fail(RadioError::Cancelled),
                    terminal => terminal,
                }
            }
            _ => return,
        };
        let state = match step {
            Step::Terminal(state) => state,
            Step::Running => OperationState::Cancelled,
        };
        self.release(state, now);
    }

    /// Start queued operations until one is accepted by the transport or the
    /// queue is empty.
    fn admit(&mut self, now: Instant) {
        while self.running.is_none() {
            let Some(mut job) = self.pop_next() else {
                return;
            };
            let id = job.id();
            if job.deadline() == Deadline::Never && job.is_abandoned() {
                debug!("[RADIO] dropped abandoned {} before admission", id);
                if let Step::Terminal(state) = job.fail(RadioError::Cancelled) {
                    self.metrics.record_terminal(state);
                }
                continue;
            }
            let lease = TransportLease { holder: id };
            let after = job.deadline().resolve(self.config.gatt_timeout);
            let mut guard = TimeoutGuard::arm(after, now);

            job.mark(OperationState::Running);
            RadioMetrics::bump(&self.metrics.admitted);
            debug!("[RADIO] admitted {} ({})", id, job.kind());

            job.configure(&self.config);
            match job.start(&mut self.transport) {
                Ok(()) => {
                    self.running = Some(Running { job, guard, lease });
                }
                Err(error) => {
                    warn!("[RADIO] {} failed to start: {}", id, error);
                    guard.disarm();
                    job.on_release(&mut self.transport);
                    if let Step::Terminal(state) = job.fail(error) {
                        self.metrics.record_terminal(state);
                    }
                    RadioMetrics::bump(&self.metrics.released);
                    debug!("[RADIO] released {}", lease.holder);
                }
            }
        }
    }

    /// Give the transport back after the running operation reached a
    /// terminal state, then admit the next one.
    fn release(&mut self, state: OperationState, now: Instant) {
        let Some(mut running) = self.running.take() else {
            return;
        };
        running.guard.disarm();
        running.job.on_release(&mut self.transport);
        self.metrics.record_terminal(state);
        RadioMetrics::bump(&self.metrics.released);
        debug!("[RADIO] released {} ({:?})", running.lease.holder, state);
        drop(running);
        self.admit(now);
    }
}
