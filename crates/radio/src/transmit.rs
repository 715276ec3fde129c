//! Continuous best-effort transmit loop with one send in flight

use std::sync::Arc;
use std::time::Duration;
use bytes::Bytes;
use linkprobe_core::HardwareAddress;
use log::{debug, error, info, trace, warn};
use tokio::sync::Notify;
use tokio::time::{sleep, timeout};

use crate::stats::{SendOutcome, Statistics};
use crate::transport::{SendCallback, SendStatus, Transport};
use crate::{LinkError, RadioError};

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RetryPolicy {
    /// Pause after every accepted send so the transport's buffer can drain.
    pub send_delay: Duration,
    /// Pause after the transport refuses a send outright.
    pub rejection_backoff: Duration,
    /// How long to wait for a completion before warning about it.
    pub completion_timeout: Duration,
    /// Treat a refused send as fatal instead of retrying.
    pub abort_on_rejection: bool,
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self {
            send_delay: Duration::from_millis(10),
            rejection_backoff: Duration::from_millis(10),
            completion_timeout: Duration::from_secs(1),
            abort_on_rejection: false,
        }
    }
}

/// Result of one pass over the send state machine.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Step {
    /// A send is still in flight.
    Waiting,
    /// A new send was accepted by the transport.
    Issued,
}

pub struct TransmitController<T: Transport> {
    transport: Arc<T>,
    peer: HardwareAddress,
    payload: Bytes,
    stats: Arc<Statistics>,
    policy: RetryPolicy,
    completion: Arc<Notify>,
}

impl<T: Transport> TransmitController<T> {
    pub fn new(
        transport: Arc<T>,
        peer: HardwareAddress,
        payload: Bytes,
        stats: Arc<Statistics>,
        policy: RetryPolicy,
    ) -> Self {
        Self {
            transport,
            peer,
            payload,
            stats,
            policy,
            completion: Arc::new(Notify::new()),
        }
    }

    /// Callback to register with the transport. It is the only writer of the
    /// terminal outcomes.
    pub fn completion_handler(&self) -> SendCallback {
        let stats = Arc::clone(&self.stats);
        let completion = Arc::clone(&self.completion);
        let peer = self.peer;
        Arc::new(move |to: &HardwareAddress, status: SendStatus| {
            if *to != peer {
                trace!("ignoring completion for {}", to);
                return;
            }
            let next = match status {
                SendStatus::Success => SendOutcome::Succeeded,
                SendStatus::Fail => SendOutcome::Failed,
            };
            if stats.transition(SendOutcome::Busy, next) {
                completion.notify_one();
            } else {
                warn!("send completion {:?} arrived with no send in flight", status);
            }
        })
    }

    /// Consumes a terminal outcome and issues the next send.
    ///
    /// A refused send returns the outcome to `Idle`, since no completion will
    /// follow it, and is counted as a rejection rather than a failure.
    pub fn step(&self) -> Result<Step, RadioError> {
        let observed = self.stats.outcome();
        if observed == SendOutcome::Busy {
            return Ok(Step::Waiting);
        }
        if !self.stats.transition(observed, SendOutcome::Busy) {
            return Ok(Step::Waiting);
        }
        match observed {
            SendOutcome::Failed => self.stats.record_failure(),
            SendOutcome::Succeeded => self.stats.record_success(self.payload.len() as u64),
            SendOutcome::Idle | SendOutcome::Busy => {}
        }

        match self.transport.send(&self.peer, &self.payload) {
            Ok(()) => {
                trace!("sent {} bytes to {}", self.payload.len(), self.peer);
                Ok(Step::Issued)
            }
            Err(e) => {
                self.stats.transition(SendOutcome::Busy, SendOutcome::Idle);
                self.stats.record_rejection();
                Err(e)
            }
        }
    }

    /// Runs for the lifetime of the process unless a refused send is fatal.
    pub async fn run(self) -> Result<(), LinkError> {
        info!(
            "Transmit loop started: {} byte payload to {} every {:?}",
            self.payload.len(),
            self.peer,
            self.policy.send_delay
        );

        loop {
            match self.step() {
                Ok(Step::Issued) => sleep(self.policy.send_delay).await,
                Ok(Step::Waiting) => self.wait_for_completion().await,
                Err(e) if self.policy.abort_on_rejection => {
                    error!("Transport refused send to {}: {}", self.peer, e);
                    return Err(LinkError::SendRejected(e));
                }
                Err(e) => {
                    debug!("Transport refused send ({}), retrying in {:?}", e, self.policy.rejection_backoff);
                    sleep(self.policy.rejection_backoff).await;
                }
            }
        }
    }

    async fn wait_for_completion(&self) {
        let notified = self.completion.notified();
        if timeout(self.policy.completion_timeout, notified).await.is_err()
            && self.stats.outcome() == SendOutcome::Busy
        {
            warn!(
                "No send completion from transport after {:?}, still waiting",
                self.policy.completion_timeout
            );
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
    use std::sync::Mutex;
    use linkprobe_core::{PeerInfo, LEFT_BOARD, RIGHT_BOARD};
    use rand::rngs::StdRng;
    use rand::{Rng, SeedableRng};
    use tokio_test::{assert_err, assert_ok};

    use crate::transport::{FrameCallback, ReceiveCallback};

    /// Records sends and checks that none overlaps a previous one.
    #[derive(Default)]
    struct MockTransport {
        stats: Mutex<Option<Arc<Statistics>>>,
        sends: AtomicUsize,
        in_flight: AtomicUsize,
        refuse: AtomicBool,
        callback: Mutex<Option<SendCallback>>,
    }

    impl MockTransport {
        fn complete(&self, status: SendStatus) {
            let cb = self.callback.lock().unwrap().clone().unwrap();
            self.in_flight.fetch_sub(1, Ordering::SeqCst);
            cb(&RIGHT_BOARD, status);
        }
    }

    impl Transport for MockTransport {
        fn local_address(&self) -> HardwareAddress {
            LEFT_BOARD
        }

        fn enable_passive_capture(&self, _on_frame: FrameCallback) -> Result<(), RadioError> {
            Ok(())
        }

        fn register_peer(&self, _peer: &PeerInfo) -> Result<(), RadioError> {
            Ok(())
        }

        fn on_send_complete(&self, callback: SendCallback) -> Result<(), RadioError> {
            *self.callback.lock().unwrap() = Some(callback);
            Ok(())
        }

        fn on_receive(&self, _callback: ReceiveCallback) -> Result<(), RadioError> {
            Ok(())
        }

        fn send(&self, _peer: &HardwareAddress, _payload: &[u8]) -> Result<(), RadioError> {
            if self.refuse.load(Ordering::SeqCst) {
                return Err(RadioError::BufferFull);
            }
            if let Some(stats) = self.stats.lock().unwrap().as_ref() {
                assert_eq!(stats.outcome(), SendOutcome::Busy);
            }
            let previous = self.in_flight.fetch_add(1, Ordering::SeqCst);
            assert_eq!(previous, 0, "second send issued while one is in flight");
            self.sends.fetch_add(1, Ordering::SeqCst);
            Ok(())
        }
    }

    fn controller(policy: RetryPolicy) -> (TransmitController<MockTransport>, Arc<MockTransport>, Arc<Statistics>) {
        let transport = Arc::new(MockTransport::default());
        let stats = Arc::new(Statistics::new());
        *transport.stats.lock().unwrap() = Some(stats.clone());
        let tc = TransmitController::new(
            transport.clone(),
            RIGHT_BOARD,
            Bytes::from_static(b"Hello World!\r\n"),
            stats.clone(),
            policy,
        );
        transport.on_send_complete(tc.completion_handler()).unwrap();
        (tc, transport, stats)
    }

    #[test]
    fn test_first_step_issues_from_idle() {
        let (tc, transport, stats) = controller(RetryPolicy::default());
        assert_eq!(assert_ok!(tc.step()), Step::Issued);
        assert_eq!(stats.outcome(), SendOutcome::Busy);
        assert_eq!(transport.sends.load(Ordering::SeqCst), 1);

        assert_eq!(assert_ok!(tc.step()), Step::Waiting);
        assert_eq!(transport.sends.load(Ordering::SeqCst), 1);
    }

    #[test]
    fn test_success_counts_bytes_on_next_step() {
        let (tc, transport, stats) = controller(RetryPolicy::default());
        tc.step().unwrap();
        transport.complete(SendStatus::Success);
        assert_eq!(stats.outcome(), SendOutcome::Succeeded);
        assert_eq!(stats.successes(), 0);

        tc.step().unwrap();
        assert_eq!(stats.successes(), 1);
        assert_eq!(stats.window_bytes(), 14);
        assert_eq!(stats.outcome(), SendOutcome::Busy);
    }

    #[test]
    fn test_failure_is_counted_and_retried() {
        let (tc, transport, stats) = controller(RetryPolicy::default());
        tc.step().unwrap();
        transport.complete(SendStatus::Fail);
        assert_eq!(assert_ok!(tc.step()), Step::Issued);
        assert_eq!(stats.failures(), 1);
        assert_eq!(stats.window_bytes(), 0);
        assert_eq!(transport.sends.load(Ordering::SeqCst), 2);
    }

    #[test]
    fn test_any_completion_order_keeps_one_send_in_flight() {
        let (tc, transport, stats) = controller(RetryPolicy::default());
        let mut rng = StdRng::seed_from_u64(0x5eed);
        let mut completions = 0u64;

        for _ in 0..2_000 {
            if rng.random_bool(0.5) {
                tc.step().unwrap();
            } else if stats.outcome() == SendOutcome::Busy {
                let status = if rng.random_bool(0.7) { SendStatus::Success } else { SendStatus::Fail };
                transport.complete(status);
                completions += 1;
            }
        }
        // consume a trailing terminal outcome
        if stats.outcome() != SendOutcome::Busy {
            tc.step().unwrap();
        }
        assert_eq!(stats.successes() + stats.failures(), completions);
        assert_eq!(transport.sends.load(Ordering::SeqCst) as u64, completions + 1);
        assert_eq!(stats.window_bytes(), stats.successes() * 14);
    }

    #[test]
    fn test_stray_completion_is_ignored() {
        let (tc, transport, stats) = controller(RetryPolicy::default());
        let cb = transport.callback.lock().unwrap().clone().unwrap();
        cb(&RIGHT_BOARD, SendStatus::Success);
        assert_eq!(stats.outcome(), SendOutcome::Idle);

        tc.step().unwrap();
        cb(&LEFT_BOARD, SendStatus::Success);
        assert_eq!(stats.outcome(), SendOutcome::Busy);
    }

    #[test]
    fn test_refused_send_returns_to_idle() {
        let (tc, transport, stats) = controller(RetryPolicy::default());
        tc.step().unwrap();
        transport.complete(SendStatus::Success);

        transport.refuse.store(true, Ordering::SeqCst);
        assert_eq!(assert_err!(tc.step()), RadioError::BufferFull);
        assert_eq!(stats.outcome(), SendOutcome::Idle);
        assert_eq!(stats.snapshot().rejected, 1);
        // the success before the refusal still counts, once
        assert_eq!(stats.successes(), 1);
        assert_eq!(stats.failures(), 0);

        transport.refuse.store(false, Ordering::SeqCst);
        assert_eq!(assert_ok!(tc.step()), Step::Issued);
        assert_eq!(stats.successes(), 1);
    }

    #[tokio::test(start_paused = true)]
    async fn test_run_aborts_on_refusal_when_configured() {
        let policy = RetryPolicy { abort_on_rejection: true, ..Default::default() };
        let (tc, transport, _stats) = controller(policy);
        transport.refuse.store(true, Ordering::SeqCst);
        let result = tc.run().await;
        assert!(matches!(result, Err(LinkError::SendRejected(RadioError::BufferFull))));
    }

    #[tokio::test(start_paused = true)]
    async fn test_run_keeps_sending_as_completions_arrive() {
        let (tc, transport, stats) = controller(RetryPolicy::default());
        let task = tokio::spawn(tc.run());

        for _ in 0..5 {
            tokio::time::sleep(Duration::from_millis(15)).await;
            assert_eq!(stats.outcome(), SendOutcome::Busy);
            transport.complete(SendStatus::Success);
        }
        tokio::time::sleep(Duration::from_millis(15)).await;
        assert_eq!(stats.successes(), 5);
        assert_eq!(transport.sends.load(Ordering::SeqCst), 6);

        transport.refuse.store(true, Ordering::SeqCst);
        transport.complete(SendStatus::Fail);
        tokio::time::sleep(Duration::from_millis(50)).await;
        assert_eq!(stats.failures(), 1);
        assert!(stats.snapshot().rejected >= 1);
        assert!(!task.is_finished());
        task.abort();
    }
}
