//! Camera Capture
//!
//! `Camera` is the hardware seam: it yields raw BGR8 frames at whatever
//! resolution the device produces. `reformat` turns a raw frame into a
//! tensor of the configured shape.

use image::imageops::{self, FilterType};
use image::RgbImage;
use ndarray::{ArrayD, IxDyn};

use super::SensorError;

/// Raw interleaved BGR8 frame, as delivered by the device.
#[derive(Debug, Clone)]
pub struct RawFrame {
    pub data: Vec<u8>,
    pub width: u32,
    pub height: u32,
}

/// Image sensor hardware handle
pub trait Camera: Send {
    /// Read one frame. Errors are transient from the caller's view.
    fn read(&mut self) -> Result<RawFrame, SensorError>;

    /// Release the device. Must tolerate repeated calls.
    fn release(&mut self);
}

/// Open the camera at `index`.
#[cfg(feature = "camera")]
pub fn open_camera(index: i32) -> Result<Box<dyn Camera>, SensorError> {
    opencv_camera::OpenCvCamera::open(index).map(|cam| Box::new(cam) as Box<dyn Camera>)
}

/// Open the camera at `index`.
#[cfg(not(feature = "camera"))]
pub fn open_camera(index: i32) -> Result<Box<dyn Camera>, SensorError> {
    Err(SensorError::CameraOpen {
        index,
        reason: "built without the `camera` feature".to_string(),
    })
}

/// Resize to the configured (height, width), swap BGR→RGB and reshape.
///
/// `shape` must be [1, height, width, 3].
pub fn reformat(raw: &RawFrame, shape: &[usize]) -> Result<ArrayD<u8>, SensorError> {
    let (height, width) = match shape {
        [1, h, w, 3] => (*h, *w),
        _ => {
            return Err(SensorError::Reformat(format!(
                "camera frames need a [1, H, W, 3] input shape, got {:?}",
                shape
            )))
        }
    };

    let expected = raw.width as usize * raw.height as usize * 3;
    if raw.data.len() != expected {
        return Err(SensorError::Reformat(format!(
            "frame buffer has {} bytes, expected {} for {}x{} BGR",
            raw.data.len(),
            expected,
            raw.width,
            raw.height
        )));
    }

    // Pixels stay in BGR order inside the container until the swap below.
    let source = RgbImage::from_raw(raw.width, raw.height, raw.data.clone())
        .ok_or_else(|| SensorError::Reformat("frame buffer too small".to_string()))?;

    let target_w = u32::try_from(width).map_err(|e| SensorError::Reformat(e.to_string()))?;
    let target_h = u32::try_from(height).map_err(|e| SensorError::Reformat(e.to_string()))?;

    let resized = if source.dimensions() == (target_w, target_h) {
        source
    } else {
        imageops::resize(&source, target_w, target_h, FilterType::Triangle)
    };

    let mut pixels = resized.into_raw();
    for px in pixels.chunks_exact_mut(3) {
        px.swap(0, 2);
    }

    ArrayD::from_shape_vec(IxDyn(shape), pixels).map_err(|e| SensorError::Reformat(e.to_string()))
}

// ============================================================================
// OPENCV IMPLEMENTATION
// ============================================================================

#[cfg(feature = "camera")]
mod opencv_camera {
    use opencv::{
        core::{Mat, MatTraitConst, MatTraitConstManual},
        videoio::{self, VideoCapture, VideoCaptureTrait, VideoCaptureTraitConst},
    };

    use super::{Camera, RawFrame, SensorError};

    pub struct OpenCvCamera {
        index: i32,
        capture: Option<VideoCapture>,
        frame: Mat,
    }

    impl OpenCvCamera {
        pub fn open(index: i32) -> Result<Self, SensorError> {
            let open_err = |reason: String| SensorError::CameraOpen { index, reason };

            let capture = VideoCapture::new(index, videoio::CAP_ANY).map_err(|e| open_err(e.to_string()))?;
            let opened = capture.is_opened().map_err(|e| open_err(e.to_string()))?;
            if !opened {
                return Err(open_err("device did not open".to_string()));
            }

            log::info!("Camera {} opened", index);
            Ok(Self {
                index,
                capture: Some(capture),
                frame: Mat::default(),
            })
        }
    }

    impl Camera for OpenCvCamera {
        fn read(&mut self) -> Result<RawFrame, SensorError> {
            let capture = self
                .capture
                .as_mut()
                .ok_or_else(|| SensorError::CameraRead("camera released".to_string()))?;

            let grabbed = capture
                .read(&mut self.frame)
                .map_err(|e| SensorError::CameraRead(e.to_string()))?;

            let size = self.frame.size().map_err(|e| SensorError::CameraRead(e.to_string()))?;
            if !grabbed || size.width <= 0 || size.height <= 0 {
                return Err(SensorError::CameraRead("empty frame".to_string()));
            }

            let data = self
                .frame
                .data_bytes()
                .map_err(|e| SensorError::CameraRead(e.to_string()))?
                .to_vec();

            Ok(RawFrame {
                data,
                width: size.width as u32,
                height: size.height as u32,
            })
        }

        fn release(&mut self) {
            if let Some(mut capture) = self.capture.take() {
                if let Err(e) = capture.release() {
                    log::warn!("Camera {} release failed: {}", self.index, e);
                } else {
                    log::info!("Camera {} released", self.index);
                }
            }
        }
    }
}
