//! # framehub - pluggable sensor stream host
//!
//! Backend plugins publish color, depth and infrared frames through a
//! type-erased interface; clients read them back as typed frames without
//! copying. Provides:
//! - Device stream sets that own a device's streams and multiplex their reads
//! - Per-stream open/close lifecycle with subscriber-driven activation
//! - Generic frame and parameter retrieval keyed by (type, subtype)
//! - A simulated device backend and a C FFI
//!
//! ## Quick Start
//! ```no_run
//! use framehub::sim::{SimConfig, SimDevice};
//! use framehub::{DepthFrame, Sensors, StreamDescription, StreamSet, StreamType, WaitTimeout};
//! use std::time::Duration;
//!
//! let device = SimDevice::new(SimConfig::streaming(Sensors::DEPTH, 30));
//! let mut set = StreamSet::new("cam0", "sim://cam0", Box::new(device));
//! set.open().unwrap();
//! set.start_stream(StreamDescription::of(StreamType::Depth)).unwrap();
//!
//! for _ in 0..100 {
//!     set.read(WaitTimeout::Bounded(Duration::from_secs(1))).unwrap();
//!     let reader = set.reader_frame();
//!     let depth = DepthFrame::new(Some(&reader));
//!     if depth.is_valid() {
//!         println!("index {} center {}", depth.frame_index().unwrap(), depth.sample(160, 120).unwrap());
//!     }
//! }
//! ```

pub mod error;
pub mod types;
pub mod config;
pub mod backend;
pub mod frame;
pub mod image;
pub mod stream;
pub mod streamset;
pub mod host;
pub mod sim;
pub mod ffi;

pub use backend::{DeviceBackend, FrameRecord, StreamBackend};
pub use config::{HostConfig, StreamSetConfig};
pub use error::{FramehubError, Status};
pub use frame::{FrameRef, ReaderFrame};
pub use host::{Host, Plugin, PluginService};
pub use image::{ColorFrame, ColorStream, DepthFrame, ImageFrame, ImageRecord, InfraredFrame};
pub use stream::Stream;
pub use streamset::{ReadOutcome, StreamSet};
pub use types::*;

/// Result type alias for framehub operations.
pub type Result<T> = std::result::Result<T, FramehubError>;
