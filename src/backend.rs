//! Capability interfaces implemented by device plugins.
//!
//! The host never looks inside a backend: it opens and closes devices and
//! streams, waits for readiness on opaque [`StreamHandle`]s and receives
//! frame records as boxed [`FrameRecord`] trait objects.

use crate::types::{ParameterId, Sensors, StreamDescription, StreamHandle, StreamType, WaitTimeout};
use crate::{FramehubError, Result};
use std::any::Any;

/// A backend-produced frame record.
///
/// A record is either the typed frame itself (direct layout) or a
/// backend-private wrapper that embeds the typed frame (wrapped layout).
/// Wrappers expose the embedded frame through [`FrameRecord::embedded`];
/// that is the only layout assumption the host makes.
pub trait FrameRecord: Any + Send {
    fn as_any(&self) -> &dyn Any;

    /// The typed frame embedded in a wrapper record, `None` for direct records.
    fn embedded(&self) -> Option<&dyn Any> {
        None
    }
}

/// One backend-native stream.
pub trait StreamBackend: Send {
    fn description(&self) -> StreamDescription;

    /// Native identity, stable for the lifetime of the stream.
    fn handle(&self) -> StreamHandle;

    fn open(&mut self) -> Result<()>;

    /// Must be safe on a closed stream.
    fn close(&mut self);

    /// Begin producing frames. Called when the first subscriber arrives.
    fn start(&mut self) -> Result<()>;

    /// Stop producing frames. Called when the last subscriber leaves.
    fn stop(&mut self);

    /// Take the next pending frame, `None` if nothing is queued.
    fn read_frame(&mut self) -> Result<Option<Box<dyn FrameRecord>>>;

    /// Raw bytes of a stream parameter.
    fn parameter(&mut self, id: ParameterId) -> Result<Vec<u8>> {
        Err(FramehubError::ParameterUnavailable(id))
    }
}

/// One physical device exposing a group of streams.
pub trait DeviceBackend: Send {
    fn open(&mut self, uri: &str) -> Result<()>;

    fn close(&mut self);

    fn sensors(&self) -> Sensors;

    fn has_sensor(&self, stream_type: StreamType) -> bool {
        self.sensors().contains(stream_type.sensor())
    }

    fn create_stream(&mut self, stream_type: StreamType) -> Result<Box<dyn StreamBackend>>;

    /// Block until any of `handles` has a frame ready.
    ///
    /// Returns the position in `handles` of a ready stream, or `None` when
    /// the timeout elapsed with nothing ready.
    fn wait_for_any(&self, handles: &[StreamHandle], timeout: WaitTimeout) -> Result<Option<usize>>;
}
