use crate::sim::SceneParameters;
use crate::MainCamera;
use bevy::input::mouse::{MouseMotion, MouseWheel};
use bevy::prelude::*;
use bevy_egui::EguiContexts;
use std::f32::consts::FRAC_PI_2;

const ROTATE_SPEED: f32 = 0.005;
const ZOOM_SPEED: f32 = 0.1;
const MIN_RADIUS: f32 = 1.0;
const MAX_RADIUS: f32 = 50.0;
// keep clear of the poles so looking_at never flips
const MAX_PITCH: f32 = FRAC_PI_2 - 0.05;

pub struct InputPlugin;
impl Plugin for InputPlugin {
    fn build(&self, app: &mut App) {
        app.add_systems(Update, (panel_toggle, orbit_camera));
    }
}

/// Orbit controller with damping. Input moves the targets; `update` eases
/// the current angles and distance toward them.
#[derive(Component, Clone, Debug)]
pub struct OrbitCamera {
    pub focus: Vec3,
    pub damping: f32,
    radius: f32,
    yaw: f32,
    pitch: f32,
    target_radius: f32,
    target_yaw: f32,
    target_pitch: f32,
}

impl OrbitCamera {
    pub fn looking_from(eye: Vec3, focus: Vec3) -> Self {
        let offset = eye - focus;
        let radius = offset.length().max(MIN_RADIUS);
        let yaw = offset.x.atan2(offset.z);
        let pitch = (offset.y / radius).clamp(-1.0, 1.0).asin();
        Self {
            focus,
            damping: 10.0,
            radius,
            yaw,
            pitch,
            target_radius: radius,
            target_yaw: yaw,
            target_pitch: pitch,
        }
    }

    pub fn rotate(&mut self, drag: Vec2) {
        self.target_yaw -= drag.x * ROTATE_SPEED;
        self.target_pitch = (self.target_pitch + drag.y * ROTATE_SPEED).clamp(-MAX_PITCH, MAX_PITCH);
    }

    pub fn zoom(&mut self, wheel: f32) {
        self.target_radius = (self.target_radius * (1.0 - wheel * ZOOM_SPEED)).clamp(MIN_RADIUS, MAX_RADIUS);
    }

    pub fn update(&mut self, dt: f32) {
        let t = (1.0 - (-self.damping * dt).exp()).clamp(0.0, 1.0);
        self.yaw += (self.target_yaw - self.yaw) * t;
        self.pitch += (self.target_pitch - self.pitch) * t;
        self.radius += (self.target_radius - self.radius) * t;
    }

    pub fn eye(&self) -> Vec3 {
        let (sin_yaw, cos_yaw) = self.yaw.sin_cos();
        let (sin_pitch, cos_pitch) = self.pitch.sin_cos();
        self.focus + self.radius * Vec3::new(cos_pitch * sin_yaw, sin_pitch, cos_pitch * cos_yaw)
    }

    pub fn transform(&self) -> Transform {
        Transform::from_translation(self.eye()).looking_at(self.focus, Vec3::Y)
    }
}

fn panel_toggle(mut scene: ResMut<SceneParameters>, keys: Res<ButtonInput<KeyCode>>) {
    if keys.just_pressed(KeyCode::KeyH) {
        scene.show_panel = !scene.show_panel;
    }
}

fn orbit_camera(
    mut contexts: EguiContexts,
    buttons: Res<ButtonInput<MouseButton>>,
    mut motion: EventReader<MouseMotion>,
    mut scroll_evr: EventReader<MouseWheel>,
    time: Res<Time>,
    mut q_cam: Query<(&mut OrbitCamera, &mut Transform), With<MainCamera>>,
) {
    let drag: Vec2 = motion.read().map(|m| m.delta).sum();
    let wheel: f32 = scroll_evr.read().map(|ev| ev.y).sum();
    let Ok((mut orbit, mut t)) = q_cam.get_single_mut() else {
        return;
    };

    let ctx = contexts.ctx_mut();
    let over_panel = ctx.wants_pointer_input() || ctx.is_pointer_over_area();
    if !over_panel {
        if buttons.pressed(MouseButton::Left) {
            orbit.rotate(drag);
        }
        orbit.zoom(wheel);
    }

    orbit.update(time.delta_seconds());
    *t = orbit.transform();
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn orbit_reproduces_its_starting_eye() {
        let eye = Vec3::new(-4.0, 5.0, 8.0);
        let orbit = OrbitCamera::looking_from(eye, Vec3::ZERO);
        assert!(orbit.eye().distance(eye) < 1e-4);
    }

    #[test]
    fn damping_eases_toward_the_target() {
        let mut orbit = OrbitCamera::looking_from(Vec3::new(0.0, 0.0, 10.0), Vec3::ZERO);
        orbit.zoom(5.0);
        assert_eq!(orbit.eye().z, 10.0);

        orbit.update(1.0 / 60.0);
        let halfway = orbit.eye().z;
        assert!(halfway < 10.0 && halfway > 5.0);

        for _ in 0..600 {
            orbit.update(1.0 / 60.0);
        }
        assert!((orbit.eye().z - 5.0).abs() < 1e-3);
    }

    #[test]
    fn pitch_is_clamped_short_of_the_pole() {
        let mut orbit = OrbitCamera::looking_from(Vec3::new(0.0, 2.0, 10.0), Vec3::ZERO);
        orbit.rotate(Vec2::new(0.0, 1.0e6));
        for _ in 0..600 {
            orbit.update(1.0 / 60.0);
        }
        let eye = orbit.eye();
        assert!(eye.y < orbit.radius);
        assert!(orbit.transform().translation.is_finite());
    }
}
