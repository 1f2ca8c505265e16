//! Image frames for the color, depth and infrared streams.

use crate::backend::FrameRecord;
use crate::frame::{self, get_direct, get_wrapped, ParameterSource, ReaderFrame};
use crate::types::{
    FrameIndex, ImageMetadata, ParameterId, StreamDescription, StreamSubtype, StreamType,
};
use crate::{FramehubError, Result};
use std::any::Any;
use std::marker::PhantomData;

/// Horizontal field of view of a color stream, `f32` radians.
pub const PARAM_HFOV: ParameterId = ParameterId(0);
/// Vertical field of view of a color stream, `f32` radians.
pub const PARAM_VFOV: ParameterId = ParameterId(1);

/// The typed image record shared by every image stream.
#[derive(Debug, Clone, PartialEq)]
pub struct ImageRecord {
    pub metadata: ImageMetadata,
    pub data: Vec<u8>,
}

impl FrameRecord for ImageRecord {
    fn as_any(&self) -> &dyn Any {
        self
    }
}

/// Compile-time stream type of an [`ImageFrame`].
pub trait StreamKind {
    const STREAM_TYPE: StreamType;
}

pub enum Color {}
pub enum Depth {}
pub enum Infrared {}

impl StreamKind for Color {
    const STREAM_TYPE: StreamType = StreamType::Color;
}

impl StreamKind for Depth {
    const STREAM_TYPE: StreamType = StreamType::Depth;
}

impl StreamKind for Infrared {
    const STREAM_TYPE: StreamType = StreamType::Infrared;
}

pub type ColorFrame<'a> = ImageFrame<'a, Color>;
pub type DepthFrame<'a> = ImageFrame<'a, Depth>;
pub type InfraredFrame<'a> = ImageFrame<'a, Infrared>;

#[derive(Clone, Copy)]
struct Bound<'a> {
    metadata: ImageMetadata,
    index: FrameIndex,
    data: &'a [u8],
}

/// Client view of one image frame from a reader frame.
///
/// The lookup happens once at construction. A frame that could not be bound
/// (no reader, no frame of this type in the read cycle, foreign record type)
/// is invalid and every accessor returns [`FramehubError::InvalidFrame`].
pub struct ImageFrame<'a, K> {
    bound: Option<Bound<'a>>,
    _kind: PhantomData<K>,
}

impl<'a, K: StreamKind> ImageFrame<'a, K> {
    pub fn new(reader: Option<&ReaderFrame<'a>>) -> Self {
        Self::with_subtype(reader, StreamSubtype::DEFAULT)
    }

    pub fn with_subtype(reader: Option<&ReaderFrame<'a>>, subtype: StreamSubtype) -> Self {
        let description = StreamDescription::new(K::STREAM_TYPE, subtype);
        let bound = reader.and_then(|reader| {
            // Backends may wrap the image record or hand it over as-is.
            let image = get_wrapped::<ImageRecord>(reader, description)
                .or_else(|_| get_direct::<ImageRecord>(reader, description))
                .ok()?;
            let record = image.frame();
            Some(Bound {
                metadata: record.metadata,
                index: frame::frame_index(&image),
                data: record.data.as_slice(),
            })
        });

        Self {
            bound,
            _kind: PhantomData,
        }
    }

    pub fn is_valid(&self) -> bool {
        self.bound.is_some()
    }

    fn bound(&self) -> Result<&Bound<'a>> {
        self.bound.as_ref().ok_or(FramehubError::InvalidFrame)
    }

    pub fn metadata(&self) -> Result<ImageMetadata> {
        Ok(self.bound()?.metadata)
    }

    pub fn width(&self) -> Result<u32> {
        Ok(self.bound()?.metadata.width)
    }

    pub fn height(&self) -> Result<u32> {
        Ok(self.bound()?.metadata.height)
    }

    pub fn bytes_per_pixel(&self) -> Result<u32> {
        Ok(self.bound()?.metadata.bytes_per_pixel)
    }

    pub fn frame_index(&self) -> Result<FrameIndex> {
        Ok(self.bound()?.index)
    }

    pub fn data(&self) -> Result<&'a [u8]> {
        Ok(self.bound()?.data)
    }

    pub fn length(&self) -> Result<usize> {
        Ok(self.bound()?.data.len())
    }

    /// Copy the payload into caller storage. Returns the number of bytes copied.
    pub fn copy_to(&self, buffer: &mut [u8]) -> Result<usize> {
        let data = self.bound()?.data;
        let available = buffer.len();
        let dst = buffer
            .get_mut(..data.len())
            .ok_or(FramehubError::BufferTooSmall {
                needed: data.len(),
                available,
            })?;
        dst.copy_from_slice(data);
        Ok(data.len())
    }
}

impl ImageFrame<'_, Depth> {
    /// Depth at pixel (x, y) in millimeters.
    pub fn sample(&self, x: u32, y: u32) -> Result<u16> {
        let bound = self.bound()?;
        let md = bound.metadata;
        if x >= md.width || y >= md.height || md.bytes_per_pixel != 2 {
            return Err(FramehubError::InvalidFrame);
        }
        let offset = (y as usize * md.width as usize + x as usize) * 2;
        bound
            .data
            .get(offset..offset + 2)
            .map(|b| u16::from_le_bytes([b[0], b[1]]))
            .ok_or(FramehubError::InvalidFrame)
    }
}

/// Color-specific parameters over a stream connection.
pub struct ColorStream<'s, S: ParameterSource + ?Sized> {
    connection: &'s mut S,
}

impl<'s, S: ParameterSource + ?Sized> ColorStream<'s, S> {
    pub fn new(connection: &'s mut S) -> Self {
        Self { connection }
    }

    pub fn horizontal_fov(&mut self) -> Result<f32> {
        self.read_f32(PARAM_HFOV)
    }

    pub fn vertical_fov(&mut self) -> Result<f32> {
        self.read_f32(PARAM_VFOV)
    }

    fn read_f32(&mut self, id: ParameterId) -> Result<f32> {
        let mut buf = [0u8; 4];
        frame::get_parameter_fixed(&mut *self.connection, id, &mut buf)?;
        Ok(f32::from_le_bytes(buf))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::frame::{FrameHeader, SubFrame};
    use crate::types::PixelFormat;

    struct Wrapped {
        frame: ImageRecord,
    }

    impl FrameRecord for Wrapped {
        fn as_any(&self) -> &dyn Any {
            self
        }

        fn embedded(&self) -> Option<&dyn Any> {
            Some(&self.frame)
        }
    }

    fn depth_record() -> ImageRecord {
        let metadata = ImageMetadata::new(2, 2, PixelFormat::Depth16);
        let data = [100u16, 200, 300, 400]
            .iter()
            .flat_map(|v| v.to_le_bytes())
            .collect();
        ImageRecord { metadata, data }
    }

    fn header(stream_type: StreamType, index: FrameIndex) -> FrameHeader {
        FrameHeader {
            index,
            description: StreamDescription::of(stream_type),
            generation: 1,
        }
    }

    #[test]
    fn test_invalid_frame_accessors_fail() {
        let frame = ColorFrame::new(None);
        assert!(!frame.is_valid());
        assert!(matches!(frame.width(), Err(FramehubError::InvalidFrame)));
        assert!(matches!(frame.height(), Err(FramehubError::InvalidFrame)));
        assert!(matches!(frame.bytes_per_pixel(), Err(FramehubError::InvalidFrame)));
        assert!(matches!(frame.frame_index(), Err(FramehubError::InvalidFrame)));
        assert!(matches!(frame.data(), Err(FramehubError::InvalidFrame)));
        assert!(matches!(frame.length(), Err(FramehubError::InvalidFrame)));
        assert!(matches!(
            frame.copy_to(&mut [0u8; 16]),
            Err(FramehubError::InvalidFrame)
        ));
    }

    #[test]
    fn test_non_matching_type_is_invalid() {
        let h = header(StreamType::Depth, 3);
        let record = depth_record();
        let reader = ReaderFrame::new(1, vec![SubFrame::new(&h, &record)]);

        assert!(DepthFrame::new(Some(&reader)).is_valid());
        let color = ColorFrame::new(Some(&reader));
        assert!(!color.is_valid());
        assert!(color.data().is_err());
    }

    #[test]
    fn test_binds_wrapped_and_direct_records() {
        let color_header = header(StreamType::Color, 8);
        let depth_header = header(StreamType::Depth, 7);
        let wrapped = Wrapped {
            frame: ImageRecord {
                metadata: ImageMetadata::new(1, 1, PixelFormat::Rgb888),
                data: vec![1, 2, 3],
            },
        };
        let direct = depth_record();
        let reader = ReaderFrame::new(
            1,
            vec![
                SubFrame::new(&color_header, &wrapped),
                SubFrame::new(&depth_header, &direct),
            ],
        );

        let color = ColorFrame::new(Some(&reader));
        assert_eq!(color.frame_index().unwrap(), 8);
        assert_eq!(color.bytes_per_pixel().unwrap(), 3);
        assert_eq!(color.data().unwrap(), &[1, 2, 3]);

        let depth = DepthFrame::new(Some(&reader));
        assert_eq!(depth.frame_index().unwrap(), 7);
        assert_eq!(depth.width().unwrap(), 2);
        assert_eq!(depth.sample(1, 1).unwrap(), 400);
        assert!(depth.sample(2, 0).is_err());
    }

    #[test]
    fn test_copy_to_copies_exactly_length() {
        let h = header(StreamType::Depth, 1);
        let record = depth_record();
        let reader = ReaderFrame::new(1, vec![SubFrame::new(&h, &record)]);
        let frame = DepthFrame::new(Some(&reader));

        let mut buffer = vec![0xFFu8; 12];
        let copied = frame.copy_to(&mut buffer).unwrap();
        assert_eq!(copied, frame.length().unwrap());
        assert_eq!(&buffer[..copied], frame.data().unwrap());
        assert_eq!(&buffer[copied..], &[0xFF; 4]);

        let mut short = [0u8; 3];
        assert!(matches!(
            frame.copy_to(&mut short),
            Err(FramehubError::BufferTooSmall {
                needed: 8,
                available: 3
            })
        ));
    }
}
