mod input;
mod physics;
mod scene;
mod sim;
mod sound;
mod ui;

use bevy::core_pipeline::tonemapping::Tonemapping;
use bevy::diagnostic::{EntityCountDiagnosticsPlugin, FrameTimeDiagnosticsPlugin};
use bevy::prelude::*;
use input::{InputPlugin, OrbitCamera};
use scene::ScenePlugin;
use sim::{SceneParameters, SimPlugin};
use sound::SoundPlugin;
use ui::UiPlugin;

const CAMERA_EYE: Vec3 = Vec3::new(-4.0, 5.0, 8.0);

fn main() {
    App::new()
        .insert_resource(ClearColor(SceneParameters::default().background))
        .insert_resource(Msaa::Sample4)
        .add_plugins(FrameTimeDiagnosticsPlugin)
        .add_plugins(EntityCountDiagnosticsPlugin)
        .add_plugins(DefaultPlugins.set(WindowPlugin {
            primary_window: Some(Window {
                title: "physics playground".into(),
                resolution: (1400., 900.).into(),
                ..default()
            }),
            ..default()
        }))
        .add_plugins((SimPlugin, ScenePlugin, SoundPlugin, UiPlugin, InputPlugin))
        .add_systems(Startup, setup_camera)
        .run();
}

fn setup_camera(mut commands: Commands) {
    commands.spawn((
        Camera3dBundle {
            projection: PerspectiveProjection {
                fov: 45.0_f32.to_radians(),
                near: 0.1,
                far: 1000.0,
                ..default()
            }
            .into(),
            tonemapping: Tonemapping::TonyMcMapface,
            transform: Transform::from_translation(CAMERA_EYE).looking_at(Vec3::ZERO, Vec3::Y),
            ..default()
        },
        OrbitCamera::looking_from(CAMERA_EYE, Vec3::ZERO),
        MainCamera,
    ));
}

#[derive(Component)]
pub struct MainCamera;
