use geoflow_scene::SceneBounds;
use glam::{Mat4, Vec3};

const FOV_Y_DEGREES: f32 = 45.0;

#[derive(Debug, Clone, Copy, PartialEq)]
pub struct CameraState {
    pub target: [f32; 3],
    pub distance: f32,
    pub yaw: f32,
    pub pitch: f32,
}

impl Default for CameraState {
    fn default() -> Self {
        Self {
            target: [0.0, 0.0, 0.0],
            distance: 5.0,
            yaw: 0.8,
            pitch: 0.45,
        }
    }
}

impl CameraState {
    /// Orbit camera that keeps the whole bounding sphere in view.
    pub fn framing(bounds: &SceneBounds) -> Self {
        let half_fov = (FOV_Y_DEGREES * 0.5).to_radians();
        let radius = bounds.radius().max(0.01);
        Self {
            target: bounds.center().to_array(),
            distance: radius / half_fov.sin() * 1.1,
            ..Self::default()
        }
    }
}

pub fn camera_position(camera: CameraState) -> Vec3 {
    let direction = camera_direction(camera);
    let target = Vec3::from(camera.target);
    target + direction * camera.distance.max(0.1)
}

pub fn camera_view_proj(camera: CameraState, aspect: f32) -> Mat4 {
    let target = Vec3::from(camera.target);
    let position = camera_position(camera);
    let far = (camera.distance * 4.0).max(1000.0);

    let view = Mat4::look_at_rh(position, target, Vec3::Y);
    let projection =
        Mat4::perspective_rh(FOV_Y_DEGREES.to_radians(), aspect.max(1e-3), 0.01, far);
    projection * view
}

fn camera_direction(camera: CameraState) -> Vec3 {
    let pitch = camera.pitch.clamp(-1.54, 1.54);
    let yaw = camera.yaw;

    let cos_pitch = pitch.cos();
    let sin_pitch = pitch.sin();
    let cos_yaw = yaw.cos();
    let sin_yaw = yaw.sin();

    Vec3::new(cos_pitch * cos_yaw, sin_pitch, cos_pitch * sin_yaw)
}
