//! C FFI layer for framehub.
//!
//! Provides an opaque host handle; stream sets are addressed by their `u64`
//! handle. The generated C header is written to `include/framehub.h` by
//! cbindgen.
//!
//! Frame descriptors handed to C point into host-owned storage and carry the
//! read generation they were taken from. Calls that dereference a descriptor
//! fail with `FAILURE` once the stream set has read again.

use crate::error::{LastError, Status};
use crate::frame::{self, ParameterSource};
use crate::host::{Host, PluginService};
use crate::image::ImageRecord;
use crate::sim::{SimConfig, SimDevice};
use crate::stream::Stream;
use crate::streamset::StreamSet;
use crate::types::{
    FrameIndex, ParameterId, ResultToken, Sensors, StreamDescription, StreamSetHandle,
    StreamSubtype, StreamType, WaitTimeout,
};
use crate::{FramehubError, Result};
use std::ffi::{c_char, c_int, CStr};

thread_local! {
    /// Per-thread last error message for C consumers.
    static LAST_ERROR: LastError = const { LastError::new() };
}

fn set_last_error(err: &FramehubError) {
    LAST_ERROR.with(|last| last.set(err));
}

fn clear_last_error() {
    LAST_ERROR.with(|last| last.clear());
}

/// Opaque host handle for C consumers.
pub struct FhHost(Host);

/// An image frame descriptor in C-compatible layout.
///
/// `data` stays valid until the next `fh_stream_set_read` on the same set.
#[repr(C)]
pub struct FhImageFrame {
    pub stream_set: u64,
    pub stream_type: u32,
    pub subtype: u32,
    pub frame_index: u64,
    /// Read generation the descriptor was taken from.
    pub generation: u64,
    pub width: u32,
    pub height: u32,
    pub bytes_per_pixel: u32,
    pub data: *const u8,
    pub length: usize,
}

fn report<T>(result: Result<T>) -> Status {
    match result {
        Ok(_) => {
            clear_last_error();
            Status::Success
        }
        Err(e) => {
            set_last_error(&e);
            Status::from(&e)
        }
    }
}

fn description(stream_type: u32, subtype: u32) -> Result<StreamDescription> {
    let stream_type = StreamType::from_raw(stream_type).ok_or_else(|| {
        FramehubError::Backend(format!("unknown stream type {}", stream_type))
    })?;
    Ok(StreamDescription::new(stream_type, StreamSubtype(subtype)))
}

unsafe fn host_mut<'a>(host: *mut FhHost) -> Result<&'a mut Host> {
    host.as_mut()
        .map(|h| &mut h.0)
        .ok_or_else(|| FramehubError::Backend("null host".into()))
}

unsafe fn set_mut<'a>(host: *mut FhHost, set: u64) -> Result<&'a mut StreamSet> {
    host_mut(host)?.stream_set_mut(StreamSetHandle(set))
}

unsafe fn stream_mut<'a>(
    host: *mut FhHost,
    set: u64,
    stream_type: u32,
    subtype: u32,
) -> Result<&'a mut Stream> {
    let desc = description(stream_type, subtype)?;
    set_mut(host, set)?
        .stream_mut(desc)
        .ok_or(FramehubError::StreamNotFound(desc))
}

/// Create a host configured from the environment.
#[no_mangle]
pub extern "C" fn fh_host_new() -> *mut FhHost {
    Box::into_raw(Box::new(FhHost(Host::new())))
}

/// Shut down a host, closing every stream set.
///
/// # Safety
/// `host` must be a pointer returned by `fh_host_new`, or null.
#[no_mangle]
pub unsafe extern "C" fn fh_host_free(host: *mut FhHost) {
    if !host.is_null() {
        drop(Box::from_raw(host));
    }
}

/// Register a simulated device. `sensors` is a bitmap: 1 color, 2 depth, 4 infrared.
/// `fps` of 0 disables capture threads. Returns the stream set handle, or 0 on error.
///
/// # Safety
/// `host` must be a valid host pointer; `name` and `uri` must be null-terminated strings.
#[no_mangle]
pub unsafe extern "C" fn fh_host_add_sim_device(
    host: *mut FhHost,
    name: *const c_char,
    uri: *const c_char,
    sensors: u32,
    fps: u32,
) -> u64 {
    let result = (|| -> Result<StreamSetHandle> {
        if name.is_null() || uri.is_null() {
            return Err(FramehubError::Backend("null name or uri".into()));
        }
        let name = CStr::from_ptr(name).to_string_lossy();
        let uri = CStr::from_ptr(uri).to_string_lossy();
        let config = SimConfig {
            sensors: Sensors::from_bits_truncate(sensors),
            fps: Some(fps).filter(|f| *f > 0),
            ..SimConfig::default()
        };
        let device = SimDevice::new(config);
        host_mut(host)?.create_stream_set(&name, &uri, Box::new(device))
    })();

    match result {
        Ok(handle) => handle.0,
        Err(e) => {
            set_last_error(&e);
            0
        }
    }
}

/// Close and remove a stream set.
///
/// # Safety
/// `host` must be a valid host pointer, or null.
#[no_mangle]
pub unsafe extern "C" fn fh_host_destroy_stream_set(host: *mut FhHost, set: u64) -> Status {
    report(host_mut(host).and_then(|h| h.destroy_stream_set(StreamSetHandle(set))))
}

/// Open the device behind a stream set. No-op when already open.
///
/// # Safety
/// `host` must be a valid host pointer, or null.
#[no_mangle]
pub unsafe extern "C" fn fh_stream_set_open(host: *mut FhHost, set: u64) -> Status {
    report(set_mut(host, set).and_then(|s| s.open()))
}

/// Close a stream set. No-op when already closed.
///
/// # Safety
/// `host` must be a valid host pointer, or null.
#[no_mangle]
pub unsafe extern "C" fn fh_stream_set_close(host: *mut FhHost, set: u64) -> Status {
    report(set_mut(host, set).map(|s| s.close()))
}

/// Wait for and read the next frames.
/// `timeout_ms`: 0 = poll without blocking, -1 = block forever.
/// Returns `TIMEOUT` when nothing became ready in time.
///
/// # Safety
/// `host` must be a valid host pointer, or null.
#[no_mangle]
pub unsafe extern "C" fn fh_stream_set_read(host: *mut FhHost, set: u64, timeout_ms: c_int) -> Status {
    let timeout = WaitTimeout::from_millis(timeout_ms as i64);
    match set_mut(host, set).and_then(|s| s.read(timeout)) {
        Ok(outcome) => {
            clear_last_error();
            outcome.status()
        }
        Err(e) => {
            set_last_error(&e);
            Status::from(&e)
        }
    }
}

/// Current shared frame index of a stream set.
///
/// # Safety
/// `host` must be a valid host pointer; `index` must be valid for writes or null.
#[no_mangle]
pub unsafe extern "C" fn fh_stream_set_frame_index(
    host: *mut FhHost,
    set: u64,
    index: *mut FrameIndex,
) -> Status {
    if index.is_null() {
        return Status::Failure;
    }
    report(set_mut(host, set).map(|s| index.write(s.frame_index())))
}

/// Subscribe to a stream.
///
/// # Safety
/// `host` must be a valid host pointer, or null.
#[no_mangle]
pub unsafe extern "C" fn fh_stream_start(
    host: *mut FhHost,
    set: u64,
    stream_type: u32,
    subtype: u32,
) -> Status {
    report(
        description(stream_type, subtype)
            .and_then(|desc| set_mut(host, set).and_then(|s| s.start_stream(desc))),
    )
}

/// Unsubscribe from a stream.
///
/// # Safety
/// `host` must be a valid host pointer, or null.
#[no_mangle]
pub unsafe extern "C" fn fh_stream_stop(
    host: *mut FhHost,
    set: u64,
    stream_type: u32,
    subtype: u32,
) -> Status {
    report(
        description(stream_type, subtype)
            .and_then(|desc| set_mut(host, set).and_then(|s| s.stop_stream(desc))),
    )
}

/// Fill `out` with the image frame of the given stream from the last read.
/// Fails when that stream produced no frame in the last read.
///
/// # Safety
/// `host` must be a valid host pointer; `out` must be valid for writes or null.
#[no_mangle]
pub unsafe extern "C" fn fh_frame_get(
    host: *mut FhHost,
    set: u64,
    stream_type: u32,
    subtype: u32,
    out: *mut FhImageFrame,
) -> Status {
    if out.is_null() {
        return Status::Failure;
    }
    let result = (|| -> Result<FhImageFrame> {
        let desc = description(stream_type, subtype)?;
        let stream_set = set_mut(host, set)?;
        let reader = stream_set.reader_frame();
        let image = frame::get_wrapped::<ImageRecord>(&reader, desc)
            .or_else(|_| frame::get_direct::<ImageRecord>(&reader, desc))?;
        let record = image.frame();
        Ok(FhImageFrame {
            stream_set: set,
            stream_type,
            subtype,
            frame_index: frame::frame_index(&image),
            generation: reader.generation(),
            width: record.metadata.width,
            height: record.metadata.height,
            bytes_per_pixel: record.metadata.bytes_per_pixel,
            data: record.data.as_ptr(),
            length: record.data.len(),
        })
    })();

    match result {
        Ok(frame) => {
            out.write(frame);
            clear_last_error();
            Status::Success
        }
        Err(e) => {
            set_last_error(&e);
            Status::from(&e)
        }
    }
}

/// Frame index of a frame descriptor.
///
/// # Safety
/// `frame` must point to a descriptor filled by `fh_frame_get`; `index` must be valid for writes.
#[no_mangle]
pub unsafe extern "C" fn fh_frame_get_frameindex(
    frame: *const FhImageFrame,
    index: *mut FrameIndex,
) -> Status {
    if frame.is_null() || index.is_null() || (*frame).data.is_null() {
        return Status::Failure;
    }
    index.write((*frame).frame_index);
    Status::Success
}

/// Copy a frame's payload into `buffer` (`length` bytes at least).
/// Fails if the stream set has read or closed since the descriptor was taken,
/// or if the descriptor was released.
///
/// # Safety
/// `host` must be a valid host pointer; `frame` must point to a descriptor
/// filled by `fh_frame_get`; `buffer` must be valid for `buffer_len` bytes.
#[no_mangle]
pub unsafe extern "C" fn fh_frame_copy_data(
    host: *mut FhHost,
    frame: *const FhImageFrame,
    buffer: *mut u8,
    buffer_len: usize,
) -> Status {
    if frame.is_null() || buffer.is_null() {
        return Status::Failure;
    }
    let frame = &*frame;
    let result = (|| -> Result<()> {
        if frame.data.is_null() {
            return Err(FramehubError::InvalidFrame);
        }
        let current = set_mut(host, frame.stream_set)?.generation();
        if current != frame.generation {
            return Err(FramehubError::StaleFrame {
                held: frame.generation,
                current,
            });
        }
        if buffer_len < frame.length {
            return Err(FramehubError::BufferTooSmall {
                needed: frame.length,
                available: buffer_len,
            });
        }
        std::ptr::copy_nonoverlapping(frame.data, buffer, frame.length);
        Ok(())
    })();
    report(result)
}

/// Release a frame descriptor. Later calls on it fail.
///
/// # Safety
/// `frame` must point to a descriptor filled by `fh_frame_get`, or be null.
#[no_mangle]
pub unsafe extern "C" fn fh_frame_release(frame: *mut FhImageFrame) -> Status {
    if frame.is_null() {
        return Status::Failure;
    }
    let frame = &mut *frame;
    frame.data = std::ptr::null();
    frame.length = 0;
    Status::Success
}

/// Size a stream parameter. On success `size` receives the byte length and
/// `token` the handle to pass to `fh_stream_get_result`.
///
/// # Safety
/// `host` must be a valid host pointer; `size` and `token` must be valid for writes.
#[no_mangle]
pub unsafe extern "C" fn fh_stream_get_parameter(
    host: *mut FhHost,
    set: u64,
    stream_type: u32,
    subtype: u32,
    parameter: u32,
    size: *mut usize,
    token: *mut u64,
) -> Status {
    if size.is_null() || token.is_null() {
        return Status::Failure;
    }
    let result = stream_mut(host, set, stream_type, subtype)
        .and_then(|s| s.request_parameter(ParameterId(parameter)));
    if let Ok((t, n)) = &result {
        size.write(*n);
        token.write(t.0);
    }
    report(result)
}

/// Exchange a parameter token for its bytes. `length` must equal the reported size.
///
/// # Safety
/// `host` must be a valid host pointer; `data` must be valid for `length` bytes.
#[no_mangle]
pub unsafe extern "C" fn fh_stream_get_result(
    host: *mut FhHost,
    set: u64,
    stream_type: u32,
    subtype: u32,
    token: u64,
    length: usize,
    data: *mut u8,
) -> Status {
    if data.is_null() {
        return Status::Failure;
    }
    let out = std::slice::from_raw_parts_mut(data, length);
    report(
        stream_mut(host, set, stream_type, subtype)
            .and_then(|s| s.take_result(ResultToken(token), out)),
    )
}

/// Fetch a parameter of known size in one call. Zero-fills `data` when the
/// parameter is unavailable; fails when its size differs from `length`.
///
/// # Safety
/// `host` must be a valid host pointer; `data` must be valid for `length` bytes.
#[no_mangle]
pub unsafe extern "C" fn fh_stream_get_parameter_fixed(
    host: *mut FhHost,
    set: u64,
    stream_type: u32,
    subtype: u32,
    parameter: u32,
    length: usize,
    data: *mut u8,
) -> Status {
    if data.is_null() {
        return Status::Failure;
    }
    let out = std::slice::from_raw_parts_mut(data, length);
    let result = match stream_mut(host, set, stream_type, subtype) {
        Ok(stream) => frame::get_parameter_fixed(stream, ParameterId(parameter), out),
        Err(e) => {
            out.fill(0);
            Err(e)
        }
    };
    report(result)
}

/// Get the last error message. Returns NULL if the last call succeeded.
/// The returned pointer is valid until the next framehub API call.
#[no_mangle]
pub extern "C" fn fh_last_error() -> *const c_char {
    LAST_ERROR.with(|last| last.as_ptr())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::image::{PARAM_HFOV, PARAM_VFOV};
    use crate::sim::SimPlugin;
    use crate::config::HostConfig;
    use std::ffi::CString;

    const COLOR: u32 = StreamType::Color as u32;
    const DEPTH: u32 = StreamType::Depth as u32;

    fn host_with_sim() -> (*mut FhHost, u64, SimDevice) {
        let mut host = Host::with_config(HostConfig::default());
        let plugin = SimPlugin::new("ffi", SimConfig::manual(Sensors::COLOR | Sensors::DEPTH));
        let device = plugin.device().clone();
        host.register_plugin(Box::new(plugin)).unwrap();
        let set = host.find_stream_set("ffi").unwrap().0;
        (Box::into_raw(Box::new(FhHost(host))), set, device)
    }

    #[test]
    fn test_read_and_copy_frame() {
        let (host, set, device) = host_with_sim();
        unsafe {
            assert_eq!(fh_stream_set_open(host, set), Status::Success);
            assert_eq!(fh_stream_start(host, set, DEPTH, 0), Status::Success);
            assert_eq!(fh_stream_set_read(host, set, 0), Status::Timeout);

            device.injector(StreamType::Depth).unwrap().push_pattern().unwrap();
            assert_eq!(fh_stream_set_read(host, set, 100), Status::Success);

            let mut frame = std::mem::zeroed::<FhImageFrame>();
            assert_eq!(fh_frame_get(host, set, DEPTH, 0, &mut frame), Status::Success);
            assert_eq!(frame.length, 4 * 3 * 2);
            let mut index = 0;
            assert_eq!(fh_frame_get_frameindex(&frame, &mut index), Status::Success);
            assert_eq!(index, 1);

            let mut buffer = vec![0u8; frame.length];
            assert_eq!(
                fh_frame_copy_data(host, &frame, buffer.as_mut_ptr(), buffer.len()),
                Status::Success
            );
            assert_eq!(&buffer[..2], &500u16.to_le_bytes());

            // No color in this read.
            let mut color = std::mem::zeroed::<FhImageFrame>();
            assert_eq!(fh_frame_get(host, set, COLOR, 0, &mut color), Status::Failure);
            assert!(!fh_last_error().is_null());

            fh_host_free(host);
        }
    }

    #[test]
    fn test_stale_descriptor_fails_closed() {
        let (host, set, device) = host_with_sim();
        let depth_in = device.injector(StreamType::Depth).unwrap();
        unsafe {
            fh_stream_set_open(host, set);
            fh_stream_start(host, set, DEPTH, 0);
            depth_in.push_pattern().unwrap();
            assert_eq!(fh_stream_set_read(host, set, 100), Status::Success);

            let mut frame = std::mem::zeroed::<FhImageFrame>();
            assert_eq!(fh_frame_get(host, set, DEPTH, 0, &mut frame), Status::Success);

            depth_in.push_pattern().unwrap();
            assert_eq!(fh_stream_set_read(host, set, 100), Status::Success);

            let mut buffer = vec![0u8; frame.length];
            assert_eq!(
                fh_frame_copy_data(host, &frame, buffer.as_mut_ptr(), buffer.len()),
                Status::Failure
            );
            fh_host_free(host);
        }
    }

    #[test]
    fn test_descriptor_invalid_after_close() {
        let (host, set, device) = host_with_sim();
        let depth_in = device.injector(StreamType::Depth).unwrap();
        unsafe {
            fh_stream_set_open(host, set);
            fh_stream_start(host, set, DEPTH, 0);
            depth_in.push_pattern().unwrap();
            assert_eq!(fh_stream_set_read(host, set, 100), Status::Success);

            let mut frame = std::mem::zeroed::<FhImageFrame>();
            assert_eq!(fh_frame_get(host, set, DEPTH, 0, &mut frame), Status::Success);
            assert_eq!(fh_stream_set_close(host, set), Status::Success);

            let mut buffer = vec![0u8; frame.length];
            assert_eq!(
                fh_frame_copy_data(host, &frame, buffer.as_mut_ptr(), buffer.len()),
                Status::Failure
            );

            // Reopening does not revive the old descriptor.
            assert_eq!(fh_stream_set_open(host, set), Status::Success);
            assert_eq!(
                fh_frame_copy_data(host, &frame, buffer.as_mut_ptr(), buffer.len()),
                Status::Failure
            );
            assert_eq!(buffer, vec![0u8; buffer.len()]);
            fh_host_free(host);
        }
    }

    #[test]
    fn test_released_descriptor_fails_closed() {
        let (host, set, device) = host_with_sim();
        unsafe {
            fh_stream_set_open(host, set);
            fh_stream_start(host, set, DEPTH, 0);
            device.injector(StreamType::Depth).unwrap().push_pattern().unwrap();
            assert_eq!(fh_stream_set_read(host, set, 100), Status::Success);

            let mut frame = std::mem::zeroed::<FhImageFrame>();
            assert_eq!(fh_frame_get(host, set, DEPTH, 0, &mut frame), Status::Success);
            assert_eq!(fh_frame_release(&mut frame), Status::Success);
            assert!(frame.data.is_null());
            assert_eq!(frame.length, 0);

            let mut buffer = vec![0u8; 24];
            assert_eq!(
                fh_frame_copy_data(host, &frame, buffer.as_mut_ptr(), buffer.len()),
                Status::Failure
            );
            let mut index = 0;
            assert_eq!(fh_frame_get_frameindex(&frame, &mut index), Status::Failure);
            assert_eq!(fh_frame_release(std::ptr::null_mut()), Status::Failure);
            fh_host_free(host);
        }
    }

    #[test]
    fn test_parameters_over_ffi() {
        let (host, set, _device) = host_with_sim();
        unsafe {
            fh_stream_set_open(host, set);

            let mut size = 0usize;
            let mut token = 0u64;
            assert_eq!(
                fh_stream_get_parameter(host, set, COLOR, 0, PARAM_HFOV.0, &mut size, &mut token),
                Status::Success
            );
            assert_eq!(size, 4);
            let mut bytes = [0u8; 4];
            assert_eq!(
                fh_stream_get_result(host, set, COLOR, 0, token, 4, bytes.as_mut_ptr()),
                Status::Success
            );
            assert!(f32::from_le_bytes(bytes) > 0.0);

            let mut vfov = [0u8; 4];
            assert_eq!(
                fh_stream_get_parameter_fixed(host, set, COLOR, 0, PARAM_VFOV.0, 4, vfov.as_mut_ptr()),
                Status::Success
            );

            let mut wrong = [0u8; 8];
            assert_eq!(
                fh_stream_get_parameter_fixed(host, set, COLOR, 0, PARAM_VFOV.0, 8, wrong.as_mut_ptr()),
                Status::Failure
            );

            let mut missing = [0xAAu8; 4];
            assert_eq!(
                fh_stream_get_parameter_fixed(host, set, DEPTH, 0, PARAM_HFOV.0, 4, missing.as_mut_ptr()),
                Status::Failure
            );
            assert_eq!(missing, [0u8; 4]);

            fh_host_free(host);
        }
    }

    #[test]
    fn test_add_sim_device_and_open_failure_paths() {
        let host = Box::into_raw(Box::new(FhHost(Host::with_config(HostConfig::default()))));
        let name = CString::new("cam").unwrap();
        let uri = CString::new("sim://cam").unwrap();
        unsafe {
            let set = fh_host_add_sim_device(host, name.as_ptr(), uri.as_ptr(), 0b011, 0);
            assert_ne!(set, 0);
            assert_eq!(
                fh_host_add_sim_device(host, name.as_ptr(), uri.as_ptr(), 0b011, 0),
                0
            );
            assert_eq!(fh_stream_set_open(host, set), Status::Success);
            assert_eq!(fh_stream_set_open(host, set), Status::Success);
            assert_eq!(fh_stream_start(host, set, 9, 0), Status::Failure);
            assert_eq!(fh_stream_set_close(host, set), Status::Success);
            assert_eq!(fh_stream_set_close(host, set), Status::Success);
            assert_eq!(fh_host_destroy_stream_set(host, set), Status::Success);
            assert_eq!(fh_stream_set_open(host, set), Status::Failure);
            assert_eq!(fh_stream_set_open(std::ptr::null_mut(), set), Status::Failure);
            fh_host_free(host);
        }
    }
}
