mod camera;
mod gpu_backend;

pub use camera::{camera_position, camera_view_proj, CameraState};
pub use gpu_backend::{WgpuBackend, WgpuBackendStats, WgpuInitError};
