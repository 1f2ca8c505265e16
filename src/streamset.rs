use crate::backend::DeviceBackend;
use crate::config::StreamSetConfig;
use crate::error::Status;
use crate::frame::ReaderFrame;
use crate::stream::{Activation, Stream};
use crate::types::{FrameIndex, StreamDescription, StreamHandle, StreamType, WaitTimeout};
use crate::{FramehubError, Result};

/// Result of one [`StreamSet::read`] call.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ReadOutcome {
    /// The set is closed or no stream is subscribed.
    Idle,
    /// Streams serviced in this call, first-ready first.
    Frames {
        streams: Vec<StreamDescription>,
        frame_index: FrameIndex,
    },
    /// Nothing became ready within the wait bound. Retry.
    TimedOut,
}

impl ReadOutcome {
    pub fn status(&self) -> Status {
        match self {
            ReadOutcome::Idle | ReadOutcome::Frames { .. } => Status::Success,
            ReadOutcome::TimedOut => Status::Timeout,
        }
    }
}

/// The streams of one physical device and their synchronized reads.
///
/// Owns its [`Stream`]s exclusively. `active_handles` and `active_streams`
/// are index-aligned: position `i` of both describes the same subscribed
/// stream, and position 0 is the primary stream that drives the shared
/// frame index.
pub struct StreamSet {
    name: String,
    uri: String,
    config: StreamSetConfig,
    device: Box<dyn DeviceBackend>,
    is_open: bool,
    streams: Vec<Stream>,
    active_handles: Vec<StreamHandle>,
    /// Positions into `streams`.
    active_streams: Vec<usize>,
    frame_index: FrameIndex,
    generation: u64,
}

impl StreamSet {
    pub fn new(name: impl Into<String>, uri: impl Into<String>, device: Box<dyn DeviceBackend>) -> Self {
        Self::with_config(name, uri, device, StreamSetConfig::default())
    }

    pub fn with_config(
        name: impl Into<String>,
        uri: impl Into<String>,
        device: Box<dyn DeviceBackend>,
        config: StreamSetConfig,
    ) -> Self {
        Self {
            name: name.into(),
            uri: uri.into(),
            config,
            device,
            is_open: false,
            streams: Vec::new(),
            active_handles: Vec::new(),
            active_streams: Vec::new(),
            frame_index: 0,
            generation: 0,
        }
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn uri(&self) -> &str {
        &self.uri
    }

    pub fn is_open(&self) -> bool {
        self.is_open
    }

    /// Shared frame index, advanced by reads that service the primary stream.
    pub fn frame_index(&self) -> FrameIndex {
        self.frame_index
    }

    /// Read cycle counter; bumped by every read that found a ready stream.
    pub fn generation(&self) -> u64 {
        self.generation
    }

    pub fn streams(&self) -> &[Stream] {
        &self.streams
    }

    pub fn stream(&self, description: StreamDescription) -> Option<&Stream> {
        self.streams.iter().find(|s| s.description() == description)
    }

    pub fn stream_mut(&mut self, description: StreamDescription) -> Option<&mut Stream> {
        self.streams
            .iter_mut()
            .find(|s| s.description() == description)
    }

    pub fn active_handles(&self) -> &[StreamHandle] {
        &self.active_handles
    }

    /// Subscribed streams in activation order; the first is the primary.
    pub fn active_streams(&self) -> impl Iterator<Item = &Stream> + '_ {
        self.active_streams.iter().map(move |&pos| &self.streams[pos])
    }

    pub fn open(&mut self) -> Result<()> {
        if self.is_open {
            return Ok(());
        }

        log::info!("opening device: {}", self.uri);
        if let Err(e) = self.device.open(&self.uri) {
            log::warn!("failed to open device {}: {}", self.uri, e);
            return Err(match e {
                FramehubError::Device(_) => e,
                other => FramehubError::Device(other.to_string()),
            });
        }
        log::info!("opened device: {}", self.uri);

        self.open_sensor_streams();
        self.is_open = true;
        Ok(())
    }

    fn open_sensor_streams(&mut self) {
        for stream_type in StreamType::ALL {
            if !self.config.is_enabled(stream_type) || !self.device.has_sensor(stream_type) {
                continue;
            }

            let backend = match self.device.create_stream(stream_type) {
                Ok(backend) => backend,
                Err(e) => {
                    log::warn!("unable to create {} stream on {}: {}", stream_type, self.uri, e);
                    continue;
                }
            };

            let mut stream = Stream::new(backend);
            if let Err(e) = stream.open() {
                log::warn!("unable to open {} stream on {}: {}", stream_type, self.uri, e);
            }
            self.streams.push(stream);
        }
    }

    pub fn close(&mut self) {
        if !self.is_open {
            return;
        }

        self.close_sensor_streams();

        log::info!("closing device: {}", self.uri);
        self.device.close();
        self.is_open = false;
    }

    fn close_sensor_streams(&mut self) {
        // Descriptors from earlier reads point into slots freed below.
        self.generation += 1;
        self.active_handles.clear();
        self.active_streams.clear();
        for stream in &mut self.streams {
            stream.close();
        }
        self.streams.clear();
    }

    /// Add a subscriber to a stream. The first subscriber activates it.
    pub fn start_stream(&mut self, description: StreamDescription) -> Result<()> {
        let pos = self.position_of(description)?;
        if let Some(Activation::Started) = self.streams[pos].add_subscriber()? {
            self.on_started(pos);
        }
        Ok(())
    }

    /// Remove a subscriber from a stream. The last one deactivates it.
    pub fn stop_stream(&mut self, description: StreamDescription) -> Result<()> {
        let pos = self.position_of(description)?;
        if let Some(Activation::Stopped) = self.streams[pos].remove_subscriber() {
            self.on_stopped(pos);
        }
        Ok(())
    }

    fn position_of(&self, description: StreamDescription) -> Result<usize> {
        self.streams
            .iter()
            .position(|s| s.description() == description)
            .ok_or(FramehubError::StreamNotFound(description))
    }

    pub(crate) fn on_started(&mut self, pos: usize) {
        let stream = &self.streams[pos];
        let handle = stream.get_stream();

        log::info!("adding {} to active streams", stream.description());

        if !self.active_handles.contains(&handle) {
            self.active_handles.push(handle);
            self.active_streams.push(pos);
        }
    }

    pub(crate) fn on_stopped(&mut self, pos: usize) {
        let stream = &self.streams[pos];
        let handle = stream.get_stream();

        log::info!("removing {} from active streams", stream.description());

        if let Some(i) = self.active_handles.iter().position(|h| *h == handle) {
            debug_assert_eq!(self.active_streams[i], pos);
            self.active_handles.remove(i);
            self.active_streams.remove(i);
        }
    }

    /// Wait for frames on the active streams and pull them into their slots.
    ///
    /// The primary stream (first active) is tagged with the incremented
    /// frame index; every other stream serviced in the same call is tagged
    /// with the index the set had before the call.
    pub fn read(&mut self, timeout: WaitTimeout) -> Result<ReadOutcome> {
        if !self.is_open || self.active_handles.is_empty() {
            return Ok(ReadOutcome::Idle);
        }

        let first = match self.device.wait_for_any(&self.active_handles, timeout)? {
            Some(pos) if pos < self.active_handles.len() => pos,
            Some(pos) => {
                return Err(FramehubError::Backend(format!(
                    "wait reported stream {} of {}",
                    pos,
                    self.active_handles.len()
                )))
            }
            None => {
                log::trace!("{}: no stream ready before timeout", self.name);
                return Ok(ReadOutcome::TimedOut);
            }
        };

        let mut ready = vec![first];
        for (pos, handle) in self.active_handles.iter().enumerate() {
            if pos == first {
                continue;
            }
            if self
                .device
                .wait_for_any(std::slice::from_ref(handle), WaitTimeout::Immediate)?
                .is_some()
            {
                ready.push(pos);
            }
        }

        let previous = self.frame_index;
        if ready.contains(&0) {
            self.frame_index += 1;
        }
        self.generation += 1;

        let mut serviced = Vec::with_capacity(ready.len());
        for pos in ready {
            let index = if pos == 0 { self.frame_index } else { previous };
            let stream = &mut self.streams[self.active_streams[pos]];
            match stream.read(index, self.generation) {
                Ok(true) => serviced.push(stream.description()),
                Ok(false) => log::trace!("{} signalled ready without a frame", stream.description()),
                Err(e) => log::warn!("{} read failed: {}", stream.description(), e),
            }
        }

        Ok(ReadOutcome::Frames {
            streams: serviced,
            frame_index: self.frame_index,
        })
    }

    /// Frames serviced by the most recent read cycle.
    pub fn reader_frame(&self) -> ReaderFrame<'_> {
        let frames = self
            .active_streams()
            .filter_map(|s| s.sub_frame())
            .filter(|f| f.header().generation == self.generation)
            .collect();
        ReaderFrame::new(self.generation, frames)
    }
}

impl Drop for StreamSet {
    fn drop(&mut self) {
        self.close();
    }
}
