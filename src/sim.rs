//! Software device backend.
//!
//! Each modality has a bounded channel of frame records. With a frame rate
//! configured, a capture thread per started stream fills the channel with a
//! moving test pattern; without one, frames only arrive through
//! [`FrameInjector`]s, which makes reads fully deterministic. The
//! multi-stream wait is a `crossbeam_channel::Select` over the receivers of
//! the requested handles.
//!
//! Color and infrared records are wrapped in [`SimFrame`]; depth records are
//! plain [`ImageRecord`]s, so both retrieval layouts are exercised.

use crate::backend::{DeviceBackend, FrameRecord, StreamBackend};
use crate::host::{Plugin, PluginService};
use crate::image::{ImageRecord, PARAM_HFOV, PARAM_VFOV};
use crate::types::{
    ImageMetadata, ParameterId, PixelFormat, Sensors, StreamDescription, StreamHandle,
    StreamSetHandle, StreamType, WaitTimeout,
};
use crate::{FramehubError, Result};
use crossbeam_channel::{Receiver, Select, Sender, TryRecvError, TrySendError};
use std::any::Any;
use std::collections::HashMap;
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::Arc;
use std::time::{Duration, Instant};

/// Field of view reported by the simulated color sensor, radians.
const COLOR_HFOV: f32 = 1.0226;
const COLOR_VFOV: f32 = 0.7959;

type RecordSender = Sender<Box<dyn FrameRecord>>;
type RecordReceiver = Receiver<Box<dyn FrameRecord>>;

#[derive(Debug, Clone)]
pub struct SimConfig {
    pub sensors: Sensors,
    pub width: u32,
    pub height: u32,
    /// Capture rate of started streams. `None` delivers injected frames only.
    pub fps: Option<u32>,
    /// Frames buffered per stream before the producer drops new ones.
    pub queue_depth: usize,
    /// Make `open()` on the device fail.
    pub fail_open: bool,
    /// Streams whose `open()` fails.
    pub failing_streams: Sensors,
}

impl Default for SimConfig {
    fn default() -> Self {
        Self {
            sensors: Sensors::all(),
            width: 320,
            height: 240,
            fps: Some(30),
            queue_depth: 4,
            fail_open: false,
            failing_streams: Sensors::empty(),
        }
    }
}

impl SimConfig {
    /// Small frames, no capture threads.
    pub fn manual(sensors: Sensors) -> Self {
        Self {
            sensors,
            width: 4,
            height: 3,
            fps: None,
            ..Self::default()
        }
    }

    pub fn streaming(sensors: Sensors, fps: u32) -> Self {
        Self {
            sensors,
            fps: Some(fps),
            ..Self::default()
        }
    }
}

/// Backend-private wrapper around a simulated image.
#[derive(Debug)]
pub struct SimFrame {
    pub sequence: u64,
    pub captured_at: Instant,
    pub frame: ImageRecord,
}

impl FrameRecord for SimFrame {
    fn as_any(&self) -> &dyn Any {
        self
    }

    fn embedded(&self) -> Option<&dyn Any> {
        Some(&self.frame)
    }
}

#[derive(Clone)]
struct Channel {
    stream_type: StreamType,
    handle: StreamHandle,
    metadata: ImageMetadata,
    sender: RecordSender,
    receiver: RecordReceiver,
    sequence: Arc<AtomicU64>,
}

impl Channel {
    fn new(stream_type: StreamType, config: &SimConfig) -> Self {
        let format = match stream_type {
            StreamType::Color => PixelFormat::Rgb888,
            StreamType::Depth => PixelFormat::Depth16,
            StreamType::Infrared => PixelFormat::Gray16,
        };
        let (sender, receiver) = crossbeam_channel::bounded(config.queue_depth.max(1));
        Self {
            stream_type,
            handle: StreamHandle::new(0x51D0 + stream_type as u64),
            metadata: ImageMetadata::new(config.width, config.height, format),
            sender,
            receiver,
            sequence: Arc::new(AtomicU64::new(0)),
        }
    }

    fn drain(&self) {
        while self.receiver.try_recv().is_ok() {}
    }
}

struct SimShared {
    config: SimConfig,
    channels: HashMap<StreamType, Channel>,
    opened: AtomicBool,
}

/// A simulated depth camera. Clones share the same device.
#[derive(Clone)]
pub struct SimDevice {
    shared: Arc<SimShared>,
}

impl SimDevice {
    pub fn new(config: SimConfig) -> Self {
        let channels = StreamType::ALL
            .into_iter()
            .filter(|t| config.sensors.contains(t.sensor()))
            .map(|t| (t, Channel::new(t, &config)))
            .collect();

        Self {
            shared: Arc::new(SimShared {
                config,
                channels,
                opened: AtomicBool::new(false),
            }),
        }
    }

    pub fn config(&self) -> &SimConfig {
        &self.shared.config
    }

    /// Producer handle for pushing frames by hand.
    pub fn injector(&self, stream_type: StreamType) -> Option<FrameInjector> {
        self.shared
            .channels
            .get(&stream_type)
            .map(|channel| FrameInjector {
                channel: channel.clone(),
            })
    }

    fn channel_for(&self, handle: StreamHandle) -> Result<&Channel> {
        self.shared
            .channels
            .values()
            .find(|c| c.handle == handle)
            .ok_or_else(|| FramehubError::Backend(format!("unknown stream handle {:?}", handle)))
    }
}

impl DeviceBackend for SimDevice {
    fn open(&mut self, uri: &str) -> Result<()> {
        if self.shared.config.fail_open {
            return Err(FramehubError::Device(format!("no simulated device at {}", uri)));
        }
        self.shared.opened.store(true, Ordering::Release);
        log::info!(
            "simulated device {} up: {:?} {}x{}",
            uri,
            self.shared.config.sensors,
            self.shared.config.width,
            self.shared.config.height
        );
        Ok(())
    }

    fn close(&mut self) {
        self.shared.opened.store(false, Ordering::Release);
        for channel in self.shared.channels.values() {
            channel.drain();
        }
    }

    fn sensors(&self) -> Sensors {
        self.shared.config.sensors
    }

    fn create_stream(&mut self, stream_type: StreamType) -> Result<Box<dyn StreamBackend>> {
        if !self.shared.opened.load(Ordering::Acquire) {
            return Err(FramehubError::Device("simulated device is not open".into()));
        }
        let channel = self
            .shared
            .channels
            .get(&stream_type)
            .ok_or(FramehubError::StreamNotFound(StreamDescription::of(stream_type)))?
            .clone();
        let config = &self.shared.config;

        Ok(Box::new(SimStream {
            channel,
            fps: config.fps.filter(|fps| *fps > 0),
            fail_open: config.failing_streams.contains(stream_type.sensor()),
            is_open: false,
            capture: None,
        }))
    }

    fn wait_for_any(&self, handles: &[StreamHandle], timeout: WaitTimeout) -> Result<Option<usize>> {
        let receivers = handles
            .iter()
            .map(|h| self.channel_for(*h).map(|c| &c.receiver))
            .collect::<Result<Vec<_>>>()?;

        let mut select = Select::new();
        for rx in receivers.iter().copied() {
            select.recv(rx);
        }

        let ready = match timeout {
            WaitTimeout::Immediate => select.try_ready().ok(),
            WaitTimeout::Bounded(d) => select.ready_timeout(d).ok(),
            WaitTimeout::Forever => Some(select.ready()),
        };
        Ok(ready)
    }
}

struct SimStream {
    channel: Channel,
    fps: Option<u32>,
    fail_open: bool,
    is_open: bool,
    capture: Option<CaptureThread>,
}

impl StreamBackend for SimStream {
    fn description(&self) -> StreamDescription {
        StreamDescription::of(self.channel.stream_type)
    }

    fn handle(&self) -> StreamHandle {
        self.channel.handle
    }

    fn open(&mut self) -> Result<()> {
        if self.fail_open {
            return Err(FramehubError::Backend(format!(
                "simulated {} sensor did not respond",
                self.channel.stream_type
            )));
        }
        self.is_open = true;
        Ok(())
    }

    fn close(&mut self) {
        self.stop();
        if self.is_open {
            self.channel.drain();
            self.is_open = false;
        }
    }

    fn start(&mut self) -> Result<()> {
        if self.capture.is_some() {
            return Ok(());
        }
        if let Some(fps) = self.fps {
            self.capture = Some(CaptureThread::spawn(self.channel.clone(), fps)?);
        }
        Ok(())
    }

    fn stop(&mut self) {
        if let Some(mut capture) = self.capture.take() {
            capture.shutdown();
        }
    }

    fn read_frame(&mut self) -> Result<Option<Box<dyn FrameRecord>>> {
        match self.channel.receiver.try_recv() {
            Ok(record) => Ok(Some(record)),
            Err(TryRecvError::Empty) => Ok(None),
            Err(TryRecvError::Disconnected) => Err(FramehubError::ChannelDisconnected),
        }
    }

    fn parameter(&mut self, id: ParameterId) -> Result<Vec<u8>> {
        match (self.channel.stream_type, id) {
            (StreamType::Color, PARAM_HFOV) => Ok(COLOR_HFOV.to_le_bytes().to_vec()),
            (StreamType::Color, PARAM_VFOV) => Ok(COLOR_VFOV.to_le_bytes().to_vec()),
            _ => Err(FramehubError::ParameterUnavailable(id)),
        }
    }
}

/// Pushes frames into one simulated stream.
#[derive(Clone)]
pub struct FrameInjector {
    channel: Channel,
}

impl FrameInjector {
    pub fn metadata(&self) -> ImageMetadata {
        self.channel.metadata
    }

    /// Queue the next test-pattern frame.
    pub fn push_pattern(&self) -> Result<()> {
        let sequence = self.channel.sequence.fetch_add(1, Ordering::Relaxed);
        let data = pattern(self.channel.stream_type, self.channel.metadata, sequence);
        self.send(build_record(&self.channel, sequence, data))
    }

    /// Queue a frame with the given payload.
    pub fn push(&self, data: Vec<u8>) -> Result<()> {
        let expected = self.channel.metadata.byte_len();
        if data.len() != expected {
            return Err(FramehubError::Backend(format!(
                "{} payload is {} bytes, expected {}",
                self.channel.stream_type,
                data.len(),
                expected
            )));
        }
        let sequence = self.channel.sequence.fetch_add(1, Ordering::Relaxed);
        self.send(build_record(&self.channel, sequence, data))
    }

    fn send(&self, record: Box<dyn FrameRecord>) -> Result<()> {
        self.channel.sender.try_send(record).map_err(|e| match e {
            TrySendError::Full(_) => {
                FramehubError::Backend(format!("{} queue full", self.channel.stream_type))
            }
            TrySendError::Disconnected(_) => FramehubError::ChannelDisconnected,
        })
    }
}

fn build_record(channel: &Channel, sequence: u64, data: Vec<u8>) -> Box<dyn FrameRecord> {
    let frame = ImageRecord {
        metadata: channel.metadata,
        data,
    };
    match channel.stream_type {
        StreamType::Depth => Box::new(frame),
        StreamType::Color | StreamType::Infrared => Box::new(SimFrame {
            sequence,
            captured_at: Instant::now(),
            frame,
        }),
    }
}

fn pattern(stream_type: StreamType, md: ImageMetadata, sequence: u64) -> Vec<u8> {
    let mut data = Vec::with_capacity(md.byte_len());
    let shift = sequence as u32;
    for y in 0..md.height {
        for x in 0..md.width {
            match stream_type {
                StreamType::Color => {
                    data.push(x.wrapping_add(shift) as u8);
                    data.push(y as u8);
                    data.push(shift as u8);
                }
                StreamType::Depth => {
                    let mm = 500 + x.wrapping_add(y).wrapping_add(shift) % 4000;
                    data.extend_from_slice(&(mm as u16).to_le_bytes());
                }
                StreamType::Infrared => {
                    let level = x.wrapping_mul(y).wrapping_add(shift) % 1024;
                    data.extend_from_slice(&(level as u16).to_le_bytes());
                }
            }
        }
    }
    data
}

/// Background producer for one started stream.
struct CaptureThread {
    stop_flag: Arc<AtomicBool>,
    thread: Option<std::thread::JoinHandle<()>>,
}

impl CaptureThread {
    fn spawn(channel: Channel, fps: u32) -> Result<Self> {
        let stop_flag = Arc::new(AtomicBool::new(false));
        let stop_clone = stop_flag.clone();
        let name = format!("framehub-sim-{}", channel.stream_type);

        let thread = std::thread::Builder::new()
            .name(name)
            .spawn(move || capture_loop(channel, fps, stop_clone))
            .map_err(|e| FramehubError::Backend(format!("Failed to spawn capture thread: {}", e)))?;

        Ok(Self {
            stop_flag,
            thread: Some(thread),
        })
    }

    fn shutdown(&mut self) {
        self.stop_flag.store(true, Ordering::Relaxed);
        if let Some(thread) = self.thread.take() {
            let _ = thread.join();
        }
    }
}

impl Drop for CaptureThread {
    fn drop(&mut self) {
        self.shutdown();
    }
}

fn capture_loop(channel: Channel, fps: u32, stop_flag: Arc<AtomicBool>) {
    let interval = Duration::from_secs(1) / fps;
    let mut deadline = Instant::now();

    log::info!("{} capture started at {} fps", channel.stream_type, fps);

    loop {
        if stop_flag.load(Ordering::Relaxed) {
            log::info!("{} capture stopping", channel.stream_type);
            break;
        }

        deadline += interval;
        let now = Instant::now();
        if deadline > now {
            std::thread::sleep(deadline - now);
        } else {
            deadline = now;
        }

        let sequence = channel.sequence.fetch_add(1, Ordering::Relaxed);
        let data = pattern(channel.stream_type, channel.metadata, sequence);
        if let Err(e) = channel.sender.try_send(build_record(&channel, sequence, data)) {
            match e {
                TrySendError::Full(_) => {
                    log::trace!("{} queue full, dropping frame {}", channel.stream_type, sequence);
                }
                TrySendError::Disconnected(_) => {
                    log::info!("{} channel disconnected, stopping capture", channel.stream_type);
                    break;
                }
            }
        }
    }
}

/// Registers one simulated device with the host.
pub struct SimPlugin {
    name: String,
    uri: String,
    device: SimDevice,
    handle: Option<StreamSetHandle>,
}

impl SimPlugin {
    pub fn new(name: impl Into<String>, config: SimConfig) -> Self {
        let name = name.into();
        Self {
            uri: format!("sim://{}", name),
            name,
            device: SimDevice::new(config),
            handle: None,
        }
    }

    pub fn device(&self) -> &SimDevice {
        &self.device
    }

    pub fn handle(&self) -> Option<StreamSetHandle> {
        self.handle
    }
}

impl Plugin for SimPlugin {
    fn name(&self) -> &str {
        "sim"
    }

    fn initialize(&mut self, service: &mut dyn PluginService) -> Result<()> {
        let handle =
            service.create_stream_set(&self.name, &self.uri, Box::new(self.device.clone()))?;
        self.handle = Some(handle);
        Ok(())
    }

    fn cleanup(&mut self, service: &mut dyn PluginService) {
        if let Some(handle) = self.handle.take() {
            if let Err(e) = service.destroy_stream_set(handle) {
                log::warn!("sim plugin: {}", e);
            }
        }
    }
}
