//! Type-erased frame and parameter retrieval.
//!
//! Every frame a stream stores carries a [`FrameHeader`] next to its opaque
//! record. Client-facing frame types are recovered from the record with a
//! checked downcast keyed by the (type, subtype) tag, either through a
//! wrapper's embedded frame ([`get_wrapped`]) or from the record itself
//! ([`get_direct`]).

use crate::backend::FrameRecord;
use crate::types::{FrameIndex, ParameterId, ResultToken, StreamDescription};
use crate::{FramehubError, Result};
use std::any::Any;
use std::ops::Deref;

/// Generic header attached by the host to every stored frame.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct FrameHeader {
    pub index: FrameIndex,
    pub description: StreamDescription,
    /// Read cycle of the owning stream set that produced this frame.
    pub generation: u64,
}

/// One stream's frame inside a reader frame.
#[derive(Clone, Copy)]
pub struct SubFrame<'a> {
    header: &'a FrameHeader,
    record: &'a dyn FrameRecord,
}

impl<'a> SubFrame<'a> {
    pub(crate) fn new(header: &'a FrameHeader, record: &'a dyn FrameRecord) -> Self {
        Self { header, record }
    }

    pub fn header(&self) -> &'a FrameHeader {
        self.header
    }

    pub fn record(&self) -> &'a dyn FrameRecord {
        self.record
    }
}

/// The frames produced by one read cycle of a stream set.
///
/// Borrows the stream set, so it cannot outlive the next `read()`.
pub struct ReaderFrame<'a> {
    generation: u64,
    frames: Vec<SubFrame<'a>>,
}

impl<'a> ReaderFrame<'a> {
    pub(crate) fn new(generation: u64, frames: Vec<SubFrame<'a>>) -> Self {
        Self { generation, frames }
    }

    pub fn generation(&self) -> u64 {
        self.generation
    }

    pub fn get(&self, description: StreamDescription) -> Option<SubFrame<'a>> {
        self.frames
            .iter()
            .find(|f| f.header.description == description)
            .copied()
    }

    pub fn descriptions(&self) -> impl Iterator<Item = StreamDescription> + '_ {
        self.frames.iter().map(|f| f.header.description)
    }

    pub fn len(&self) -> usize {
        self.frames.len()
    }

    pub fn is_empty(&self) -> bool {
        self.frames.is_empty()
    }
}

/// A typed frame view with the generic header attached.
pub struct FrameRef<'a, T> {
    header: &'a FrameHeader,
    frame: &'a T,
}

impl<'a, T> FrameRef<'a, T> {
    pub fn header(&self) -> &'a FrameHeader {
        self.header
    }

    pub fn frame(&self) -> &'a T {
        self.frame
    }
}

impl<T> Clone for FrameRef<'_, T> {
    fn clone(&self) -> Self {
        *self
    }
}

impl<T> Copy for FrameRef<'_, T> {}

impl<T> Deref for FrameRef<'_, T> {
    type Target = T;

    fn deref(&self) -> &T {
        self.frame
    }
}

fn locate<'a>(reader: &ReaderFrame<'a>, description: StreamDescription) -> Result<SubFrame<'a>> {
    reader
        .get(description)
        .ok_or(FramehubError::FrameNotFound(description))
}

/// Retrieve a typed frame embedded in a backend wrapper record.
pub fn get_wrapped<'a, T: Any>(
    reader: &ReaderFrame<'a>,
    description: StreamDescription,
) -> Result<FrameRef<'a, T>> {
    let sub = locate(reader, description)?;
    let frame = sub
        .record
        .embedded()
        .and_then(|inner| inner.downcast_ref::<T>())
        .ok_or(FramehubError::RecordMismatch(description))?;

    Ok(FrameRef {
        header: sub.header,
        frame,
    })
}

/// Retrieve a typed frame whose record is the frame itself.
pub fn get_direct<'a, T: Any>(
    reader: &ReaderFrame<'a>,
    description: StreamDescription,
) -> Result<FrameRef<'a, T>> {
    let sub = locate(reader, description)?;
    let frame = sub
        .record
        .as_any()
        .downcast_ref::<T>()
        .ok_or(FramehubError::RecordMismatch(description))?;

    Ok(FrameRef {
        header: sub.header,
        frame,
    })
}

/// Frame index of any retrieved frame, read from its header.
pub fn frame_index<T>(frame: &FrameRef<'_, T>) -> FrameIndex {
    frame.header.index
}

/// A stream connection that answers sized parameter queries.
pub trait ParameterSource {
    /// Size the parameter and park its bytes behind a token.
    fn request_parameter(&mut self, id: ParameterId) -> Result<(ResultToken, usize)>;

    /// Exchange a token for its bytes. `out.len()` must equal the reported size.
    fn take_result(&mut self, token: ResultToken, out: &mut [u8]) -> Result<()>;

    /// Drop a parked result without reading it.
    fn discard_result(&mut self, token: ResultToken);
}

/// Fetch a parameter whose size the caller knows in advance.
///
/// An unavailable parameter zero-fills `out` and returns the failure. A size
/// other than `out.len()` is a caller contract violation and fails with
/// [`FramehubError::ParameterSizeMismatch`].
pub fn get_parameter_fixed<S>(source: &mut S, id: ParameterId, out: &mut [u8]) -> Result<()>
where
    S: ParameterSource + ?Sized,
{
    let (token, size) = match source.request_parameter(id) {
        Ok(sized) => sized,
        Err(e) => {
            out.fill(0);
            return Err(e);
        }
    };

    if size != out.len() {
        source.discard_result(token);
        log::error!(
            "parameter {} is {} bytes but caller expected {}",
            id,
            size,
            out.len()
        );
        return Err(FramehubError::ParameterSizeMismatch {
            expected: out.len(),
            reported: size,
        });
    }

    source.take_result(token, out)
}
