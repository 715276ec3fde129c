//! Simulated radio medium for running the engine without hardware

use std::collections::HashMap;
use std::sync::atomic::{AtomicU64, AtomicUsize, Ordering};
use std::sync::{Arc, RwLock as StdRwLock};
use std::time::Duration;
use bytes::Bytes;
use linkprobe_core::{HardwareAddress, PeerInfo};
use log::{debug, info, trace, warn};
use rand::Rng;
use rand_distr::{Distribution, Normal};
use serde::{Deserialize, Serialize};
use tokio::sync::{mpsc, RwLock};

use crate::framing::RawFrame;
use crate::transport::{FrameCallback, ReceiveCallback, SendCallback, SendStatus, Transport};
use crate::{serde_millis, RadioError, MAX_PAYLOAD};

const QUEUE_CAPACITY: usize = 10_000;

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct MediumConfig {
    pub mtu: usize,
    pub bandwidth_bps: u32,
    pub packet_loss: f32,
    #[serde(rename = "latency_ms", with = "serde_millis")]
    pub latency: Duration,
    #[serde(rename = "latency_jitter_ms", with = "serde_millis")]
    pub latency_jitter: Duration,
    /// Frames a radio may have queued before `send` is refused.
    pub tx_buffer: usize,
    pub rssi_mean: f32,
    pub rssi_std_dev: f32,
}

impl Default for MediumConfig {
    fn default() -> Self {
        Self {
            mtu: MAX_PAYLOAD,
            bandwidth_bps: 1_000_000,
            packet_loss: 0.05,
            latency: Duration::from_millis(1),
            latency_jitter: Duration::from_millis(1),
            tx_buffer: 8,
            rssi_mean: -55.0,
            rssi_std_dev: 3.0,
        }
    }
}

struct AirPacket {
    from: HardwareAddress,
    to: HardwareAddress,
    payload: Bytes,
}

#[derive(Default)]
struct RadioState {
    peers: StdRwLock<HashMap<HardwareAddress, PeerInfo>>,
    on_frame: StdRwLock<Option<FrameCallback>>,
    on_send: StdRwLock<Option<SendCallback>>,
    on_receive: StdRwLock<Option<ReceiveCallback>>,
    queued: AtomicUsize,
}

impl RadioState {
    fn frame_callback(&self) -> Option<FrameCallback> {
        self.on_frame.read().ok().and_then(|cb| cb.clone())
    }

    fn send_callback(&self) -> Option<SendCallback> {
        self.on_send.read().ok().and_then(|cb| cb.clone())
    }

    fn receive_callback(&self) -> Option<ReceiveCallback> {
        self.on_receive.read().ok().and_then(|cb| cb.clone())
    }
}

#[derive(Debug, Default)]
struct Counters {
    frames_sent: AtomicU64,
    frames_dropped: AtomicU64,
    frames_delivered: AtomicU64,
    bytes_delivered: AtomicU64,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub struct AirStats {
    pub frames_sent: u64,
    pub frames_dropped: u64,
    pub frames_delivered: u64,
    pub bytes_delivered: u64,
    pub queue_depth: u64,
}

/// Shared medium: one queue, drained serially so airtime adds up like on a
/// single channel.
pub struct SimulatedAir {
    radios: Arc<RwLock<HashMap<HardwareAddress, Arc<RadioState>>>>,
    config: MediumConfig,
    packet_queue: mpsc::Sender<AirPacket>,
    counters: Arc<Counters>,
    queue_depth: Arc<AtomicU64>,
}

impl SimulatedAir {
    /// Spawns the delivery task; must be called within a Tokio runtime.
    pub fn new(config: MediumConfig) -> Arc<Self> {
        let radios = Arc::new(RwLock::new(HashMap::<HardwareAddress, Arc<RadioState>>::new()));
        let counters = Arc::new(Counters::default());
        let queue_depth = Arc::new(AtomicU64::new(0));
        let (packet_queue, packet_rx) = mpsc::channel(QUEUE_CAPACITY);

        info!("SimulatedAir initialized with config: {:?}", config);

        tokio::spawn(deliver_packets(
            packet_rx,
            radios.clone(),
            config.clone(),
            counters.clone(),
            queue_depth.clone(),
        ));

        Arc::new(Self {
            radios,
            config,
            packet_queue,
            counters,
            queue_depth,
        })
    }

    /// Attaches a radio with the given factory address to the medium.
    pub async fn join(self: &Arc<Self>, address: HardwareAddress) -> SimulatedRadio {
        let state = Arc::new(RadioState::default());
        if self.radios.write().await.insert(address, state.clone()).is_some() {
            warn!("Radio {} joined twice, replacing the previous one", address);
        }
        SimulatedRadio {
            address,
            state,
            mtu: self.config.mtu,
            tx_buffer: self.config.tx_buffer,
            packet_queue: self.packet_queue.clone(),
            counters: self.counters.clone(),
            queue_depth: self.queue_depth.clone(),
        }
    }

    pub fn get_stats(&self) -> AirStats {
        AirStats {
            frames_sent: self.counters.frames_sent.load(Ordering::Relaxed),
            frames_dropped: self.counters.frames_dropped.load(Ordering::Relaxed),
            frames_delivered: self.counters.frames_delivered.load(Ordering::Relaxed),
            bytes_delivered: self.counters.bytes_delivered.load(Ordering::Relaxed),
            queue_depth: self.queue_depth.load(Ordering::Relaxed),
        }
    }
}

async fn deliver_packets(
    mut packet_rx: mpsc::Receiver<AirPacket>,
    radios: Arc<RwLock<HashMap<HardwareAddress, Arc<RadioState>>>>,
    config: MediumConfig,
    counters: Arc<Counters>,
    queue_depth: Arc<AtomicU64>,
) {
    let rssi = Normal::new(config.rssi_mean, config.rssi_std_dev.max(0.0)).ok();
    let mut sequence: u16 = 0;

    while let Some(packet) = packet_rx.recv().await {
        queue_depth.fetch_sub(1, Ordering::Relaxed);
        let delay = airtime(&config, packet.payload.len()) + config.latency + jitter(config.latency_jitter);
        trace!("{} -> {}: {} bytes on air for {:?}", packet.from, packet.to, packet.payload.len(), delay);
        tokio::time::sleep(delay).await;

        let lost = {
            let base_loss = config.packet_loss as f64;
            let mut rng = rand::rng();
            // a base rate of 1.0 is a dead channel
            let loss_prob = if base_loss >= 1.0 { 1.0 } else { base_loss * burst_factor(rng.random()) };
            loss_prob > 0.0 && rng.random::<f64>() < loss_prob
        };
        let reading = {
            let mut rng = rand::rng();
            let value = rssi.as_ref().map_or(config.rssi_mean, |dist| dist.sample(&mut rng));
            value.round().clamp(i8::MIN as f32, i8::MAX as f32) as i8
        };
        sequence = sequence.wrapping_add(1) & 0x0FFF;

        let guard = radios.read().await;
        let Some(sender) = guard.get(&packet.from).cloned() else {
            continue;
        };
        sender.queued.fetch_sub(1, Ordering::Relaxed);

        let status = if lost {
            counters.frames_dropped.fetch_add(1, Ordering::Relaxed);
            debug!("Frame from {} to {} lost", packet.from, packet.to);
            SendStatus::Fail
        } else {
            let frame = RawFrame::vendor_action(packet.from, packet.to, sequence, reading, &packet.payload);
            for (address, radio) in guard.iter() {
                if *address == packet.from {
                    continue;
                }
                if let Some(on_frame) = radio.frame_callback() {
                    on_frame(&frame);
                }
            }
            match guard.get(&packet.to) {
                Some(target) => {
                    if let Some(on_receive) = target.receive_callback() {
                        on_receive(&packet.from, &packet.payload);
                    }
                    counters.frames_delivered.fetch_add(1, Ordering::Relaxed);
                    counters.bytes_delivered.fetch_add(packet.payload.len() as u64, Ordering::Relaxed);
                    if let Some(on_frame) = sender.frame_callback() {
                        on_frame(&RawFrame::ack(packet.from, reading));
                    }
                    SendStatus::Success
                }
                None => {
                    debug!("No radio at {}, frame unacknowledged", packet.to);
                    SendStatus::Fail
                }
            }
        };
        drop(guard);

        if let Some(on_send) = sender.send_callback() {
            on_send(&packet.to, status);
        }
    }
}

fn airtime(config: &MediumConfig, len: usize) -> Duration {
    if config.bandwidth_bps == 0 {
        return Duration::ZERO;
    }
    Duration::from_secs_f64((len * 8) as f64 / config.bandwidth_bps as f64)
}

fn jitter(max: Duration) -> Duration {
    if max.is_zero() {
        return Duration::ZERO;
    }
    let mut rng = rand::rng();
    Duration::from_secs_f64(rng.random_range(0.0..max.as_secs_f64()))
}

// "bursty" loss: most frames see roughly the base rate, a few see two to three times it
fn burst_factor(r: f64) -> f64 {
    if r < 0.7 {
        0.8 + (r / 0.7) * 0.4
    } else if r < 0.95 {
        1.2 + ((r - 0.7) / 0.25) * 0.6
    } else {
        2.0 + ((r - 0.95) / 0.05) * 1.0
    }
}

/// One radio attached to a [`SimulatedAir`].
pub struct SimulatedRadio {
    address: HardwareAddress,
    state: Arc<RadioState>,
    mtu: usize,
    tx_buffer: usize,
    packet_queue: mpsc::Sender<AirPacket>,
    counters: Arc<Counters>,
    queue_depth: Arc<AtomicU64>,
}

impl SimulatedRadio {
    fn reserve_slot(&self) -> Result<(), RadioError> {
        self.state
            .queued
            .fetch_update(Ordering::AcqRel, Ordering::Acquire, |queued| {
                (queued < self.tx_buffer).then_some(queued + 1)
            })
            .map(|_| ())
            .map_err(|_| RadioError::BufferFull)
    }
}

impl Transport for SimulatedRadio {
    fn local_address(&self) -> HardwareAddress {
        self.address
    }

    fn enable_passive_capture(&self, on_frame: FrameCallback) -> Result<(), RadioError> {
        let mut slot = self.state.on_frame.write().map_err(|_| RadioError::CaptureUnavailable)?;
        *slot = Some(on_frame);
        Ok(())
    }

    fn register_peer(&self, peer: &PeerInfo) -> Result<(), RadioError> {
        let mut peers = self.state.peers.write().map_err(|_| RadioError::Closed)?;
        if peers.contains_key(&peer.address) {
            return Err(RadioError::PeerExists(peer.address));
        }
        debug!(
            "{} registered peer {} on channel {} (encrypt: {})",
            self.address, peer.address, peer.channel, peer.encrypt
        );
        peers.insert(peer.address, peer.clone());
        Ok(())
    }

    fn on_send_complete(&self, callback: SendCallback) -> Result<(), RadioError> {
        let mut slot = self.state.on_send.write().map_err(|_| RadioError::Closed)?;
        *slot = Some(callback);
        Ok(())
    }

    fn on_receive(&self, callback: ReceiveCallback) -> Result<(), RadioError> {
        let mut slot = self.state.on_receive.write().map_err(|_| RadioError::Closed)?;
        *slot = Some(callback);
        Ok(())
    }

    fn send(&self, peer: &HardwareAddress, payload: &[u8]) -> Result<(), RadioError> {
        if payload.len() > self.mtu {
            return Err(RadioError::PayloadTooLarge(payload.len()));
        }
        let registered = self
            .state
            .peers
            .read()
            .map_err(|_| RadioError::Closed)?
            .contains_key(peer);
        if !registered {
            return Err(RadioError::PeerNotFound(*peer));
        }
        self.reserve_slot()?;
        self.queue_depth.fetch_add(1, Ordering::Relaxed);

        let packet = AirPacket {
            from: self.address,
            to: *peer,
            payload: Bytes::copy_from_slice(payload),
        };
        match self.packet_queue.try_send(packet) {
            Ok(()) => {
                self.counters.frames_sent.fetch_add(1, Ordering::Relaxed);
                Ok(())
            }
            Err(e) => {
                self.state.queued.fetch_sub(1, Ordering::Relaxed);
                self.queue_depth.fetch_sub(1, Ordering::Relaxed);
                match e {
                    mpsc::error::TrySendError::Full(_) => Err(RadioError::BufferFull),
                    mpsc::error::TrySendError::Closed(_) => Err(RadioError::Closed),
                }
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::Mutex;
    use linkprobe_core::{LEFT_BOARD, RIGHT_BOARD};

    use crate::framing::{FrameKind, ACTION_SUBTYPE};

    fn quiet() -> MediumConfig {
        MediumConfig {
            packet_loss: 0.0,
            latency_jitter: Duration::ZERO,
            rssi_mean: -60.0,
            rssi_std_dev: 0.0,
            ..Default::default()
        }
    }

    #[tokio::test]
    async fn test_send_checks_mtu_and_peer() {
        let air = SimulatedAir::new(quiet());
        let radio = air.join(LEFT_BOARD).await;

        let large = vec![0u8; MAX_PAYLOAD + 1];
        assert_eq!(radio.send(&RIGHT_BOARD, &large), Err(RadioError::PayloadTooLarge(MAX_PAYLOAD + 1)));
        assert_eq!(radio.send(&RIGHT_BOARD, b"hi"), Err(RadioError::PeerNotFound(RIGHT_BOARD)));

        radio.register_peer(&PeerInfo::new(RIGHT_BOARD)).unwrap();
        assert_eq!(
            radio.register_peer(&PeerInfo::new(RIGHT_BOARD)),
            Err(RadioError::PeerExists(RIGHT_BOARD))
        );
        assert!(radio.send(&RIGHT_BOARD, b"hi").is_ok());
    }

    #[tokio::test]
    async fn test_full_buffer_refuses_send() {
        let air = SimulatedAir::new(MediumConfig { tx_buffer: 2, ..quiet() });
        let radio = air.join(LEFT_BOARD).await;
        radio.register_peer(&PeerInfo::new(RIGHT_BOARD)).unwrap();

        assert!(radio.send(&RIGHT_BOARD, b"one").is_ok());
        assert!(radio.send(&RIGHT_BOARD, b"two").is_ok());
        assert_eq!(radio.send(&RIGHT_BOARD, b"three"), Err(RadioError::BufferFull));
        assert_eq!(air.get_stats().frames_sent, 2);
    }

    #[tokio::test(start_paused = true)]
    async fn test_delivery_runs_every_callback() {
        let air = SimulatedAir::new(quiet());
        let left = air.join(LEFT_BOARD).await;
        let right = air.join(RIGHT_BOARD).await;
        left.register_peer(&PeerInfo::new(RIGHT_BOARD)).unwrap();

        let completions = Arc::new(Mutex::new(Vec::new()));
        let received = Arc::new(Mutex::new(Vec::new()));
        let heard_right = Arc::new(Mutex::new(Vec::new()));
        let heard_left = Arc::new(Mutex::new(Vec::new()));

        let c = completions.clone();
        left.on_send_complete(Arc::new(move |to: &HardwareAddress, status: SendStatus| c.lock().unwrap().push((*to, status)))).unwrap();
        let r = received.clone();
        right.on_receive(Arc::new(move |from: &HardwareAddress, data: &[u8]| r.lock().unwrap().push((*from, data.to_vec())))).unwrap();
        let h = heard_right.clone();
        right.enable_passive_capture(Arc::new(move |f: &RawFrame| h.lock().unwrap().push(f.clone()))).unwrap();
        let h = heard_left.clone();
        left.enable_passive_capture(Arc::new(move |f: &RawFrame| h.lock().unwrap().push(f.clone()))).unwrap();

        left.send(&RIGHT_BOARD, b"Hello World!\r\n").unwrap();
        tokio::time::sleep(Duration::from_millis(50)).await;

        assert_eq!(*completions.lock().unwrap(), vec![(RIGHT_BOARD, SendStatus::Success)]);
        assert_eq!(*received.lock().unwrap(), vec![(LEFT_BOARD, b"Hello World!\r\n".to_vec())]);

        let frames = heard_right.lock().unwrap();
        assert_eq!(frames.len(), 1);
        let header = frames[0].header().unwrap();
        assert_eq!(frames[0].kind, FrameKind::Management);
        assert_eq!(frames[0].rssi, -60);
        assert_eq!(header.subtype(), ACTION_SUBTYPE);
        assert_eq!(header.sender, LEFT_BOARD);

        let acks = heard_left.lock().unwrap();
        assert_eq!(acks.len(), 1);
        assert_eq!(acks[0].kind, FrameKind::Control);

        let stats = air.get_stats();
        assert_eq!(stats.frames_delivered, 1);
        assert_eq!(stats.bytes_delivered, 14);
        assert_eq!(stats.queue_depth, 0);
    }

    #[tokio::test(start_paused = true)]
    async fn test_missing_peer_radio_fails_send() {
        let air = SimulatedAir::new(quiet());
        let left = air.join(LEFT_BOARD).await;
        left.register_peer(&PeerInfo::new(RIGHT_BOARD)).unwrap();
        let completions = Arc::new(Mutex::new(Vec::new()));
        let c = completions.clone();
        left.on_send_complete(Arc::new(move |_: &HardwareAddress, status: SendStatus| c.lock().unwrap().push(status))).unwrap();

        left.send(&RIGHT_BOARD, b"anyone?").unwrap();
        tokio::time::sleep(Duration::from_millis(50)).await;
        assert_eq!(*completions.lock().unwrap(), vec![SendStatus::Fail]);
    }

    #[tokio::test(start_paused = true)]
    async fn test_total_loss_fails_every_send() {
        let air = SimulatedAir::new(MediumConfig { packet_loss: 1.0, ..quiet() });
        let left = air.join(LEFT_BOARD).await;
        let _right = air.join(RIGHT_BOARD).await;
        left.register_peer(&PeerInfo::new(RIGHT_BOARD)).unwrap();
        let completions = Arc::new(Mutex::new(Vec::new()));
        let c = completions.clone();
        left.on_send_complete(Arc::new(move |_: &HardwareAddress, status: SendStatus| c.lock().unwrap().push(status))).unwrap();

        for _ in 0..3 {
            left.send(&RIGHT_BOARD, b"x").unwrap();
        }
        tokio::time::sleep(Duration::from_millis(100)).await;
        assert_eq!(*completions.lock().unwrap(), vec![SendStatus::Fail; 3]);
        assert_eq!(air.get_stats().frames_dropped, 3);
    }

    #[test]
    fn test_burst_factor_range() {
        assert!((burst_factor(0.0) - 0.8).abs() < 1e-9);
        assert!((burst_factor(0.5) - 1.0857).abs() < 1e-3);
        assert!(burst_factor(0.99) > 2.0);
    }
}
