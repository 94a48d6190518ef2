use bevy::math::Affine2;
use bevy::pbr::CascadeShadowConfigBuilder;
use bevy::prelude::*;
use bevy::render::texture::{
    ImageAddressMode, ImageFilterMode, ImageLoaderSettings, ImageSampler, ImageSamplerDescriptor,
};

use crate::physics::{PhysicsWorld, GRASS};
use crate::sim::{floor_body, ObjectParameters, SceneParameters, SpawnShape, SPAWN_HEIGHT};

const FLOOR_TEXTURE: &str = "textures/grass/color.jpg";
const FLOOR_TILING: f32 = 5.0;

// Panel intensities are on a 0..6 scale; Bevy wants cd/m² and lux.
const AMBIENT_BRIGHTNESS_PER_UNIT: f32 = 100.0;
const DIRECTIONAL_LUX_PER_UNIT: f32 = 2_500.0;

#[derive(Clone, Debug)]
pub struct AmbientParameters {
    pub color: Color,
    pub intensity: f32,
}

#[derive(Clone, Debug)]
pub struct DirectionalParameters {
    pub color: Color,
    pub intensity: f32,
    pub position: Vec3,
    pub show_controls: bool,
}

#[derive(Resource, Clone, Debug)]
pub struct LightParameters {
    pub ambient: AmbientParameters,
    pub directional: DirectionalParameters,
}

impl Default for LightParameters {
    fn default() -> Self {
        Self {
            ambient: AmbientParameters {
                color: Color::WHITE,
                intensity: 2.0,
            },
            directional: DirectionalParameters {
                color: Color::WHITE,
                intensity: 2.7,
                position: Vec3::new(2.0, 4.0, 3.0),
                show_controls: false,
            },
        }
    }
}

#[derive(Component)]
pub struct Floor;

#[derive(Component)]
pub struct KeyLight;

pub struct ScenePlugin;
impl Plugin for ScenePlugin {
    fn build(&self, app: &mut App) {
        app.init_resource::<LightParameters>()
            .add_systems(Startup, (setup_lights, spawn_floor, spawn_first_sphere))
            .add_systems(
                Update,
                (
                    apply_background.run_if(resource_changed::<SceneParameters>),
                    apply_light_parameters.run_if(resource_changed::<LightParameters>),
                    draw_light_controls,
                ),
            );
    }
}

fn setup_lights(mut commands: Commands, params: Res<LightParameters>) {
    commands.insert_resource(AmbientLight {
        color: params.ambient.color,
        brightness: params.ambient.intensity * AMBIENT_BRIGHTNESS_PER_UNIT,
    });
    commands.spawn((
        DirectionalLightBundle {
            directional_light: DirectionalLight {
                color: params.directional.color,
                illuminance: params.directional.intensity * DIRECTIONAL_LUX_PER_UNIT,
                shadows_enabled: true,
                ..default()
            },
            transform: Transform::from_translation(params.directional.position)
                .looking_at(Vec3::ZERO, Vec3::Y),
            cascade_shadow_config: CascadeShadowConfigBuilder {
                maximum_distance: 9.0,
                first_cascade_far_bound: 4.0,
                ..default()
            }
            .build(),
            ..default()
        },
        KeyLight,
    ));
}

fn spawn_floor(
    mut commands: Commands,
    mut physics: ResMut<PhysicsWorld>,
    params: Res<ObjectParameters>,
    asset_server: Res<AssetServer>,
    mut meshes: ResMut<Assets<Mesh>>,
    mut materials: ResMut<Assets<StandardMaterial>>,
) {
    let floor = &params.floor;
    let grass = physics.material(GRASS);
    let (body, collider) = floor_body(floor);
    physics.insert_body(body, collider, grass);

    let texture = asset_server.load_with_settings(FLOOR_TEXTURE, |s: &mut ImageLoaderSettings| {
        s.sampler = ImageSampler::Descriptor(ImageSamplerDescriptor {
            address_mode_u: ImageAddressMode::Repeat,
            address_mode_v: ImageAddressMode::Repeat,
            mag_filter: ImageFilterMode::Nearest,
            min_filter: ImageFilterMode::Nearest,
            ..default()
        });
    });

    commands.spawn((
        PbrBundle {
            mesh: meshes.add(Cuboid::new(floor.width, floor.height, floor.depth)),
            material: materials.add(StandardMaterial {
                base_color_texture: Some(texture),
                uv_transform: Affine2::from_scale(Vec2::splat(FLOOR_TILING)),
                perceptual_roughness: 1.0,
                ..default()
            }),
            transform: Transform::from_xyz(0.0, -floor.height * 0.5, 0.0),
            ..default()
        },
        Floor,
    ));
    info!(
        "floor ready ({} x {} x {})",
        floor.width, floor.height, floor.depth
    );
}

fn spawn_first_sphere(params: Res<ObjectParameters>, mut ev_spawn: EventWriter<SpawnShape>) {
    ev_spawn.send(SpawnShape::sphere(
        &params.sphere,
        Vec3::new(0.0, SPAWN_HEIGHT, 0.0),
    ));
}

fn apply_background(params: Res<SceneParameters>, mut clear_color: ResMut<ClearColor>) {
    clear_color.0 = params.background;
}

fn apply_light_parameters(
    params: Res<LightParameters>,
    mut ambient: ResMut<AmbientLight>,
    mut lights: Query<(&mut DirectionalLight, &mut Transform), With<KeyLight>>,
) {
    ambient.color = params.ambient.color;
    ambient.brightness = params.ambient.intensity * AMBIENT_BRIGHTNESS_PER_UNIT;

    let directional = &params.directional;
    for (mut light, mut transform) in &mut lights {
        light.color = directional.color;
        light.illuminance = directional.intensity * DIRECTIONAL_LUX_PER_UNIT;
        *transform = Transform::from_translation(directional.position).looking_at(Vec3::ZERO, Vec3::Y);
    }
}

fn draw_light_controls(params: Res<LightParameters>, mut gizmos: Gizmos) {
    let directional = &params.directional;
    if !directional.show_controls {
        return;
    }
    gizmos.sphere(directional.position, Quat::IDENTITY, 0.15, directional.color);
    gizmos.arrow(directional.position, Vec3::ZERO, Color::srgb(1.0, 0.85, 0.2));
}
