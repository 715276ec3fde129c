//! Startup sequence wiring the engine onto a transport

use std::sync::Arc;
use linkprobe_core::HardwareAddress;
use log::{debug, info};
use tokio::task::JoinHandle;
use tokio::time::Instant;

use crate::sampler::SignalSampler;
use crate::stats::{Statistics, StatsAggregator, StatsReport, StatsSnapshot};
use crate::transmit::TransmitController;
use crate::transport::{ReceiveCallback, Transport};
use crate::{LinkConfig, LinkError};

/// Whether this side runs the transmit loop.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Role {
    Transmitter,
    Receiver,
}

pub struct LinkNode<T: Transport> {
    transport: Arc<T>,
    config: LinkConfig,
    stats: Arc<Statistics>,
}

impl<T: Transport> LinkNode<T> {
    pub fn new(transport: Arc<T>, config: LinkConfig) -> Result<Self, LinkError> {
        config.validate()?;
        Ok(Self {
            transport,
            config,
            stats: Arc::new(Statistics::new()),
        })
    }

    pub fn stats(&self) -> &Arc<Statistics> {
        &self.stats
    }

    pub fn resolve_peer(&self) -> Result<HardwareAddress, LinkError> {
        let local = self.transport.local_address();
        let peer = if self.config.require_membership {
            self.config.allowlist.resolve_strict(&local)?
        } else {
            self.config.allowlist.resolve(&local)?
        };
        Ok(peer)
    }

    /// Registers the peer, installs callbacks and spawns the report task and,
    /// for a transmitter, the send loop. Must be called within a Tokio runtime.
    ///
    /// Fails before anything is spawned if the peer cannot be resolved.
    pub fn start<F>(self, role: Role, on_report: F) -> Result<LinkHandle, LinkError>
    where
        F: FnMut(&StatsReport) + Send + 'static,
    {
        let local = self.transport.local_address();
        info!("MAC ADDRESS: {}", local);
        let peer = self.resolve_peer()?;
        info!("PEER MAC: {}", peer);

        // a refused registration leaves the transport without our callbacks
        self.transport.register_peer(&self.config.peer_info(peer))?;

        let sampler = Arc::new(SignalSampler::new(
            self.config.frame_filter(),
            self.config.signal_window,
            Arc::clone(&self.stats),
        ));
        self.transport.enable_passive_capture(sampler.callback())?;
        self.transport.on_receive(receive_handler(Arc::clone(&self.stats)))?;

        let controller = TransmitController::new(
            Arc::clone(&self.transport),
            peer,
            self.config.payload_bytes(),
            Arc::clone(&self.stats),
            self.config.retry_policy(),
        );
        self.transport.on_send_complete(controller.completion_handler())?;

        let aggregator = StatsAggregator::new(
            Arc::clone(&self.stats),
            self.config.report_interval,
            self.config.throughput_window,
            Instant::now(),
        );
        let reporter = tokio::spawn(aggregator.run(on_report));

        let transmit = match role {
            Role::Transmitter => Some(tokio::spawn(controller.run())),
            Role::Receiver => None,
        };
        info!("Link node {} started as {:?}", local, role);

        Ok(LinkHandle {
            local,
            peer,
            stats: self.stats,
            transmit,
            reporter,
        })
    }
}

/// Counts payloads addressed to us and echoes them to the log.
fn receive_handler(stats: Arc<Statistics>) -> ReceiveCallback {
    Arc::new(move |from: &HardwareAddress, payload: &[u8]| {
        stats.record_received(payload.len());
        debug!(
            "received {} bytes from {}: {}",
            payload.len(),
            from,
            String::from_utf8_lossy(payload).trim_end()
        );
    })
}

pub struct LinkHandle {
    pub local: HardwareAddress,
    pub peer: HardwareAddress,
    stats: Arc<Statistics>,
    transmit: Option<JoinHandle<Result<(), LinkError>>>,
    reporter: JoinHandle<()>,
}

impl LinkHandle {
    pub fn stats(&self) -> &Arc<Statistics> {
        &self.stats
    }

    /// Resolves only if the transmit loop stops, which happens on a fatal
    /// send refusal. A receiver never resolves.
    pub async fn wait(&mut self) -> Result<(), LinkError> {
        match self.transmit.as_mut() {
            Some(task) => match task.await {
                Ok(result) => result,
                Err(e) => Err(LinkError::Task(e.to_string())),
            },
            None => std::future::pending().await,
        }
    }

    /// Stops both tasks and returns the final counters.
    pub fn shutdown(self) -> StatsSnapshot {
        if let Some(task) = &self.transmit {
            task.abort();
        }
        self.reporter.abort();
        self.stats.snapshot()
    }
}
