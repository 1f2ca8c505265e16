use crate::backend::{FrameRecord, StreamBackend};
use crate::frame::{FrameHeader, ParameterSource, SubFrame};
use crate::types::{FrameIndex, ParameterId, ResultToken, StreamDescription, StreamHandle};
use crate::{FramehubError, Result};
use std::collections::HashMap;

/// Subscriber-count transition reported to the owning stream set.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Activation {
    Started,
    Stopped,
}

struct FrameSlot {
    header: FrameHeader,
    record: Box<dyn FrameRecord>,
}

/// One modality of a device: the backend stream, its lifecycle and its latest frame.
pub struct Stream {
    backend: Box<dyn StreamBackend>,
    description: StreamDescription,
    handle: StreamHandle,
    is_open: bool,
    subscribers: usize,
    slot: Option<FrameSlot>,
    results: HashMap<ResultToken, Vec<u8>>,
    next_token: u64,
}

impl Stream {
    pub(crate) fn new(backend: Box<dyn StreamBackend>) -> Self {
        let description = backend.description();
        let handle = backend.handle();
        Self {
            backend,
            description,
            handle,
            is_open: false,
            subscribers: 0,
            slot: None,
            results: HashMap::new(),
            next_token: 0,
        }
    }

    pub fn description(&self) -> StreamDescription {
        self.description
    }

    /// Native handle, for identity comparison and the multi-stream wait.
    pub fn get_stream(&self) -> StreamHandle {
        self.handle
    }

    pub fn is_open(&self) -> bool {
        self.is_open
    }

    pub fn subscriber_count(&self) -> usize {
        self.subscribers
    }

    pub fn is_active(&self) -> bool {
        self.subscribers > 0
    }

    pub fn open(&mut self) -> Result<()> {
        if self.is_open {
            return Ok(());
        }
        self.backend.open()?;
        self.is_open = true;
        log::info!("opened {} stream", self.description);
        Ok(())
    }

    pub fn close(&mut self) {
        if !self.is_open {
            return;
        }
        if self.subscribers > 0 {
            self.backend.stop();
            self.subscribers = 0;
        }
        self.backend.close();
        self.slot = None;
        self.results.clear();
        self.is_open = false;
        log::info!("closed {} stream", self.description);
    }

    /// Returns `Started` when this is the first subscriber.
    pub(crate) fn add_subscriber(&mut self) -> Result<Option<Activation>> {
        if !self.is_open {
            return Err(FramehubError::StreamNotOpen(self.description));
        }
        if self.subscribers == 0 {
            self.backend.start()?;
            self.subscribers = 1;
            return Ok(Some(Activation::Started));
        }
        self.subscribers += 1;
        Ok(None)
    }

    /// Returns `Stopped` when the last subscriber left.
    pub(crate) fn remove_subscriber(&mut self) -> Option<Activation> {
        match self.subscribers {
            0 => None,
            1 => {
                self.backend.stop();
                self.subscribers = 0;
                Some(Activation::Stopped)
            }
            _ => {
                self.subscribers -= 1;
                None
            }
        }
    }

    /// Pull the next pending backend frame into the slot, tagged with `index`.
    ///
    /// Returns `false` when the backend had nothing queued; the previous
    /// frame then stays in place with its old generation.
    pub fn read(&mut self, index: FrameIndex, generation: u64) -> Result<bool> {
        let record = match self.backend.read_frame()? {
            Some(record) => record,
            None => return Ok(false),
        };

        if let Some(previous) = &self.slot {
            debug_assert!(
                index >= previous.header.index,
                "frame index went backwards on {}",
                self.description
            );
        }

        self.slot = Some(FrameSlot {
            header: FrameHeader {
                index,
                description: self.description,
                generation,
            },
            record,
        });
        Ok(true)
    }

    /// Header of the latest frame, if any was read since the stream opened.
    pub fn last_frame(&self) -> Option<&FrameHeader> {
        self.slot.as_ref().map(|s| &s.header)
    }

    pub(crate) fn sub_frame(&self) -> Option<SubFrame<'_>> {
        self.slot
            .as_ref()
            .map(|s| SubFrame::new(&s.header, s.record.as_ref()))
    }
}

impl ParameterSource for Stream {
    fn request_parameter(&mut self, id: ParameterId) -> Result<(ResultToken, usize)> {
        if !self.is_open {
            return Err(FramehubError::StreamNotOpen(self.description));
        }
        let bytes = self.backend.parameter(id)?;
        self.next_token += 1;
        let token = ResultToken(self.next_token);
        let size = bytes.len();
        self.results.insert(token, bytes);
        Ok((token, size))
    }

    fn take_result(&mut self, token: ResultToken, out: &mut [u8]) -> Result<()> {
        let bytes = self
            .results
            .remove(&token)
            .ok_or(FramehubError::UnknownToken(token))?;
        if bytes.len() != out.len() {
            return Err(FramehubError::ParameterSizeMismatch {
                expected: out.len(),
                reported: bytes.len(),
            });
        }
        out.copy_from_slice(&bytes);
        Ok(())
    }

    fn discard_result(&mut self, token: ResultToken) {
        self.results.remove(&token);
    }
}

impl Drop for Stream {
    fn drop(&mut self) {
        self.close();
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::frame;
    use crate::image::{ColorStream, ImageRecord, PARAM_HFOV, PARAM_VFOV};
    use crate::types::{ImageMetadata, PixelFormat, StreamType};
    use std::collections::VecDeque;
    use std::sync::{Arc, Mutex};

    #[derive(Default)]
    struct Calls {
        log: Vec<&'static str>,
    }

    struct ScriptedStream {
        calls: Arc<Mutex<Calls>>,
        queue: VecDeque<ImageRecord>,
    }

    impl ScriptedStream {
        fn record(&self, call: &'static str) {
            self.calls.lock().unwrap().log.push(call);
        }
    }

    impl StreamBackend for ScriptedStream {
        fn description(&self) -> StreamDescription {
            StreamDescription::of(StreamType::Color)
        }

        fn handle(&self) -> StreamHandle {
            StreamHandle::new(42)
        }

        fn open(&mut self) -> Result<()> {
            self.record("open");
            Ok(())
        }

        fn close(&mut self) {
            self.record("close");
        }

        fn start(&mut self) -> Result<()> {
            self.record("start");
            Ok(())
        }

        fn stop(&mut self) {
            self.record("stop");
        }

        fn read_frame(&mut self) -> Result<Option<Box<dyn FrameRecord>>> {
            Ok(self
                .queue
                .pop_front()
                .map(|r| Box::new(r) as Box<dyn FrameRecord>))
        }

        fn parameter(&mut self, id: ParameterId) -> Result<Vec<u8>> {
            match id {
                PARAM_HFOV => Ok(1.0f32.to_le_bytes().to_vec()),
                _ => Err(FramehubError::ParameterUnavailable(id)),
            }
        }
    }

    fn scripted(frames: usize) -> (Stream, Arc<Mutex<Calls>>) {
        let calls = Arc::new(Mutex::new(Calls::default()));
        let queue = (0..frames)
            .map(|i| ImageRecord {
                metadata: ImageMetadata::new(1, 1, PixelFormat::Gray8),
                data: vec![i as u8],
            })
            .collect();
        let backend = ScriptedStream {
            calls: calls.clone(),
            queue,
        };
        (Stream::new(Box::new(backend)), calls)
    }

    #[test]
    fn test_close_is_idempotent() {
        let (mut stream, calls) = scripted(0);
        stream.close();
        stream.open().unwrap();
        stream.open().unwrap();
        stream.close();
        stream.close();
        assert_eq!(calls.lock().unwrap().log, vec!["open", "close"]);
    }

    #[test]
    fn test_subscriber_transitions() {
        let (mut stream, calls) = scripted(0);
        assert!(matches!(
            stream.add_subscriber(),
            Err(FramehubError::StreamNotOpen(_))
        ));

        stream.open().unwrap();
        assert_eq!(stream.add_subscriber().unwrap(), Some(Activation::Started));
        assert_eq!(stream.add_subscriber().unwrap(), None);
        assert_eq!(stream.subscriber_count(), 2);
        assert_eq!(stream.remove_subscriber(), None);
        assert_eq!(stream.remove_subscriber(), Some(Activation::Stopped));
        assert_eq!(stream.remove_subscriber(), None);
        assert!(!stream.is_active());

        assert_eq!(calls.lock().unwrap().log, vec!["open", "start", "stop"]);
    }

    #[test]
    fn test_read_tags_slot() {
        let (mut stream, _calls) = scripted(1);
        stream.open().unwrap();

        assert!(stream.read(5, 1).unwrap());
        let header = *stream.last_frame().unwrap();
        assert_eq!(header.index, 5);
        assert_eq!(header.generation, 1);

        // Nothing queued: the previous frame is kept.
        assert!(!stream.read(6, 2).unwrap());
        assert_eq!(stream.last_frame().unwrap().generation, 1);
    }

    #[test]
    fn test_parameter_token_exchange() {
        let (mut stream, _calls) = scripted(0);
        stream.open().unwrap();

        let (token, size) = stream.request_parameter(PARAM_HFOV).unwrap();
        assert_eq!(size, 4);
        let mut out = [0u8; 4];
        stream.take_result(token, &mut out).unwrap();
        assert!(matches!(
            stream.take_result(token, &mut out),
            Err(FramehubError::UnknownToken(_))
        ));

        let mut color = ColorStream::new(&mut stream);
        assert_eq!(color.horizontal_fov().unwrap(), 1.0);
        assert!(color.vertical_fov().is_err());

        let mut wide = [0xAAu8; 8];
        assert!(frame::get_parameter_fixed(&mut stream, PARAM_HFOV, &mut wide).is_err());
        let mut missing = [0xAAu8; 4];
        assert!(frame::get_parameter_fixed(&mut stream, PARAM_VFOV, &mut missing).is_err());
        assert_eq!(missing, [0u8; 4]);
    }
}
