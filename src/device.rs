use nokhwa::pixel_format::RgbFormat;
use nokhwa::utils::{
    CameraFormat, CameraIndex, ControlValueSetter, FrameFormat, KnownCameraControl,
    RequestedFormat, RequestedFormatType, Resolution,
};
use nokhwa::Camera;
use tracing::debug;

use crate::capture::{CaptureBackend, DeviceControl, Frame, VideoDevice};
use crate::discovery::visible_video_indices;
use crate::errors::{CameraServerError, Result};

fn known_control(control: DeviceControl) -> KnownCameraControl {
    match control {
        DeviceControl::Brightness => KnownCameraControl::Brightness,
        DeviceControl::Exposure => KnownCameraControl::Exposure,
        DeviceControl::WhiteBalance => KnownCameraControl::WhiteBalance,
    }
}

pub struct NokhwaDevice {
    camera: Camera,
}

impl VideoDevice for NokhwaDevice {
    fn read_frame(&mut self) -> Result<Frame> {
        let buffer = self
            .camera
            .frame()
            .map_err(|e| CameraServerError::read_failure(e.to_string()))?;
        let decoded = buffer
            .decode_image::<RgbFormat>()
            .map_err(|e| CameraServerError::read_failure(e.to_string()))?;
        Ok(Frame {
            width: decoded.width(),
            height: decoded.height(),
            data: decoded.into_raw(),
        })
    }

    fn resolution(&self) -> (u32, u32) {
        let resolution = self.camera.resolution();
        (resolution.width(), resolution.height())
    }

    fn control(&self, control: DeviceControl) -> Option<f64> {
        let value = self.camera.camera_control(known_control(control)).ok()?;
        match value.value() {
            ControlValueSetter::Integer(v) => Some(v as f64),
            ControlValueSetter::Float(v) => Some(v),
            _ => None,
        }
    }

    fn set_control(&mut self, control: DeviceControl, value: f64) -> Result<()> {
        self.camera
            .set_camera_control(known_control(control), ControlValueSetter::Integer(value as i64))
            .map_err(|e| CameraServerError::read_failure(e.to_string()))
    }
}

/// Production backend: opens devices by index through nokhwa and lists
/// visible `/dev/video*` nodes.
pub struct NokhwaBackend;

impl CaptureBackend for NokhwaBackend {
    fn open(&self, index: u32, resolution: Option<(u32, u32)>) -> Result<Box<dyn VideoDevice>> {
        let requested = match resolution {
            Some((width, height)) => RequestedFormat::new::<RgbFormat>(RequestedFormatType::Closest(
                CameraFormat::new(Resolution::new(width, height), FrameFormat::MJPEG, 30),
            )),
            None => RequestedFormat::new::<RgbFormat>(RequestedFormatType::AbsoluteHighestFrameRate),
        };

        let mut camera = Camera::new(CameraIndex::Index(index), requested)
            .map_err(|e| CameraServerError::device_unavailable(index, e.to_string()))?;
        camera
            .open_stream()
            .map_err(|e| CameraServerError::device_unavailable(index, e.to_string()))?;

        debug!("Opened device index {} at {}", index, camera.resolution());
        Ok(Box::new(NokhwaDevice { camera }))
    }

    fn visible_indices(&self) -> Vec<u32> {
        visible_video_indices()
    }
}
