use std::fmt;
use std::time::Duration;

/// Logical frame counter shared by all streams of one stream set.
pub type FrameIndex = u64;

/// Sensor modality of a stream.
#[repr(C)]
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum StreamType {
    Color = 0,
    Depth = 1,
    Infrared = 2,
}

impl StreamType {
    /// Probe order used when a device is opened.
    pub const ALL: [StreamType; 3] = [StreamType::Color, StreamType::Depth, StreamType::Infrared];

    pub fn from_raw(raw: u32) -> Option<StreamType> {
        match raw {
            0 => Some(StreamType::Color),
            1 => Some(StreamType::Depth),
            2 => Some(StreamType::Infrared),
            _ => None,
        }
    }

    /// The sensor bit a device must report for this stream type to exist.
    pub fn sensor(self) -> Sensors {
        match self {
            StreamType::Color => Sensors::COLOR,
            StreamType::Depth => Sensors::DEPTH,
            StreamType::Infrared => Sensors::INFRARED,
        }
    }
}

impl fmt::Display for StreamType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            StreamType::Color => "color",
            StreamType::Depth => "depth",
            StreamType::Infrared => "infrared",
        };
        f.write_str(name)
    }
}

/// Backend-defined variant within a stream type. `0` is the default subtype.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default)]
pub struct StreamSubtype(pub u32);

impl StreamSubtype {
    pub const DEFAULT: StreamSubtype = StreamSubtype(0);
}

/// The (type, subtype) tag identifying a stream and the frames it produces.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct StreamDescription {
    pub stream_type: StreamType,
    pub subtype: StreamSubtype,
}

impl StreamDescription {
    pub fn new(stream_type: StreamType, subtype: StreamSubtype) -> Self {
        Self {
            stream_type,
            subtype,
        }
    }

    pub fn of(stream_type: StreamType) -> Self {
        Self::new(stream_type, StreamSubtype::DEFAULT)
    }
}

impl fmt::Display for StreamDescription {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}/{}", self.stream_type, self.subtype.0)
    }
}

/// Identity of a backend-native stream.
///
/// Only compared and passed back to the backend's wait call; never owns anything.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct StreamHandle(u64);

impl StreamHandle {
    pub const fn new(raw: u64) -> Self {
        Self(raw)
    }

    pub fn raw(self) -> u64 {
        self.0
    }
}

/// Host-assigned key of a registered stream set. Zero is never issued.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct StreamSetHandle(pub u64);

impl fmt::Display for StreamSetHandle {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "set#{}", self.0)
    }
}

bitflags::bitflags! {
    /// Sensors reported present by a device backend.
    #[derive(Debug, Clone, Copy, PartialEq, Eq)]
    #[repr(C)]
    pub struct Sensors: u32 {
        const COLOR    = 1 << 0;
        const DEPTH    = 1 << 1;
        const INFRARED = 1 << 2;
    }
}

/// Pixel layout of an image payload.
#[repr(C)]
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PixelFormat {
    Rgb888 = 0,
    Gray8 = 1,
    /// Little-endian 16-bit depth in millimeters.
    Depth16 = 2,
    /// Little-endian 16-bit intensity.
    Gray16 = 3,
}

impl PixelFormat {
    pub fn bytes_per_pixel(self) -> u32 {
        match self {
            PixelFormat::Rgb888 => 3,
            PixelFormat::Gray8 => 1,
            PixelFormat::Depth16 | PixelFormat::Gray16 => 2,
        }
    }
}

/// Resolution and layout of an image frame.
#[repr(C)]
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ImageMetadata {
    pub width: u32,
    pub height: u32,
    pub bytes_per_pixel: u32,
    pub pixel_format: PixelFormat,
}

impl ImageMetadata {
    pub fn new(width: u32, height: u32, pixel_format: PixelFormat) -> Self {
        Self {
            width,
            height,
            bytes_per_pixel: pixel_format.bytes_per_pixel(),
            pixel_format,
        }
    }

    /// Payload size implied by the metadata.
    pub fn byte_len(&self) -> usize {
        self.width as usize * self.height as usize * self.bytes_per_pixel as usize
    }
}

/// Stream-scoped parameter identifier.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct ParameterId(pub u32);

impl fmt::Display for ParameterId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "#{}", self.0)
    }
}

/// Opaque token exchanged for the bytes of a previously sized parameter query.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct ResultToken(pub u64);

impl fmt::Display for ResultToken {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{:#x}", self.0)
    }
}

/// Bound on the multi-stream wait.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum WaitTimeout {
    /// Poll once without blocking.
    Immediate,
    Bounded(Duration),
    Forever,
}

impl WaitTimeout {
    /// C convention: `0` polls, a negative value blocks forever.
    pub fn from_millis(ms: i64) -> Self {
        match ms {
            0 => WaitTimeout::Immediate,
            ms if ms < 0 => WaitTimeout::Forever,
            ms => WaitTimeout::Bounded(Duration::from_millis(ms as u64)),
        }
    }
}
