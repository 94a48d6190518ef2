use bevy::prelude::*;
use rand::Rng;
use rapier3d::prelude::{
    ColliderBuilder, ColliderHandle, RigidBodyBuilder, RigidBodyHandle, Vector,
};

use crate::physics::{PhysicsSettings, PhysicsWorld, RUBBER};
use crate::sound::{CollisionImpact, SoundCategory};

/// Height at which new shapes are dropped.
pub const SPAWN_HEIGHT: f32 = 3.0;
/// Lower bound the panel enforces on every shape dimension.
pub const MIN_DIMENSION: f32 = 0.01;

pub struct SimPlugin;
impl Plugin for SimPlugin {
    fn build(&self, app: &mut App) {
        app.init_resource::<PhysicsSettings>()
            .init_resource::<PhysicsWorld>()
            .init_resource::<ObjectParameters>()
            .init_resource::<SceneParameters>()
            .init_resource::<EntityRegistry>()
            .init_resource::<ShapeAssets>()
            .add_event::<SpawnShape>()
            .add_event::<ResetEvent>()
            .add_event::<CollisionImpact>()
            .add_systems(
                Update,
                (handle_reset, spawn_shapes, advance_physics, sync_transforms).chain(),
            );
    }
}

#[derive(Clone, Debug)]
pub struct FloorParameters {
    pub width: f32,
    pub height: f32,
    pub depth: f32,
}

#[derive(Clone, Debug)]
pub struct SphereParameters {
    pub radius: f32,
    pub color: Color,
}

#[derive(Clone, Debug)]
pub struct BoxParameters {
    pub width: f32,
    pub height: f32,
    pub depth: f32,
    pub color: Color,
}

#[derive(Resource, Clone, Debug)]
pub struct ObjectParameters {
    pub floor: FloorParameters,
    pub sphere: SphereParameters,
    pub cube: BoxParameters,
}

impl Default for ObjectParameters {
    fn default() -> Self {
        Self {
            floor: FloorParameters {
                width: 7.5,
                height: 0.05,
                depth: 7.5,
            },
            sphere: SphereParameters {
                radius: 0.5,
                color: Color::srgb_u8(0xfb, 0x2c, 0x36),
            },
            cube: BoxParameters {
                width: 1.0,
                height: 1.0,
                depth: 1.0,
                color: Color::srgb_u8(0x45, 0xfb, 0x2d),
            },
        }
    }
}

#[derive(Resource, Clone, Debug)]
pub struct SceneParameters {
    pub background: Color,
    pub show_panel: bool,
}

impl Default for SceneParameters {
    fn default() -> Self {
        Self {
            background: Color::srgb_u8(0xb5, 0xcf, 0xff),
            show_panel: true,
        }
    }
}

#[derive(Clone, Copy, Debug, PartialEq)]
pub enum ShapeKind {
    Sphere { radius: f32 },
    Cuboid { size: Vec3 },
}

impl ShapeKind {
    pub fn sound_category(self) -> SoundCategory {
        match self {
            ShapeKind::Sphere { .. } => SoundCategory::SphereHit,
            ShapeKind::Cuboid { .. } => SoundCategory::BoxHit,
        }
    }

    /// Scale applied to the shared unit mesh.
    pub fn scale(self) -> Vec3 {
        match self {
            ShapeKind::Sphere { radius } => Vec3::splat(radius),
            ShapeKind::Cuboid { size } => size,
        }
    }

    fn collider(self) -> ColliderBuilder {
        match self {
            ShapeKind::Sphere { radius } => ColliderBuilder::ball(radius),
            ShapeKind::Cuboid { size } => {
                ColliderBuilder::cuboid(size.x * 0.5, size.y * 0.5, size.z * 0.5)
            }
        }
    }
}

/// Request for one dynamic shape; every field is a snapshot taken when the
/// request is made.
#[derive(Event, Clone, Copy, Debug)]
pub struct SpawnShape {
    pub shape: ShapeKind,
    pub color: Color,
    pub position: Vec3,
}

impl SpawnShape {
    pub fn sphere(params: &SphereParameters, position: Vec3) -> Self {
        Self {
            shape: ShapeKind::Sphere {
                radius: params.radius,
            },
            color: params.color,
            position,
        }
    }

    pub fn cuboid(params: &BoxParameters, position: Vec3) -> Self {
        Self {
            shape: ShapeKind::Cuboid {
                size: Vec3::new(params.width, params.height, params.depth),
            },
            color: params.color,
            position,
        }
    }

    pub fn random_sphere(floor: &FloorParameters, rng: &mut impl Rng) -> Self {
        Self {
            shape: ShapeKind::Sphere {
                radius: rng.gen_range(MIN_DIMENSION..1.5),
            },
            color: random_color(rng),
            position: random_spawn_position(floor, rng),
        }
    }

    pub fn random_cuboid(floor: &FloorParameters, rng: &mut impl Rng) -> Self {
        let mut side = || (0.25 + rng.gen::<f32>()) * 2.0;
        let size = Vec3::new(side(), side(), side());
        Self {
            shape: ShapeKind::Cuboid { size },
            color: random_color(rng),
            position: random_spawn_position(floor, rng),
        }
    }
}

pub fn random_spawn_position(floor: &FloorParameters, rng: &mut impl Rng) -> Vec3 {
    Vec3::new(
        (rng.gen::<f32>() - 0.5) * floor.width,
        SPAWN_HEIGHT,
        (rng.gen::<f32>() - 0.5) * floor.depth,
    )
}

fn random_color(rng: &mut impl Rng) -> Color {
    Color::srgb(rng.gen(), rng.gen(), rng.gen())
}

/// Static slab whose top face sits at y = 0.
pub fn floor_body(floor: &FloorParameters) -> (RigidBodyBuilder, ColliderBuilder) {
    (
        RigidBodyBuilder::fixed().translation(Vector::new(0.0, -floor.height * 0.5, 0.0)),
        ColliderBuilder::cuboid(floor.width * 0.5, floor.height * 0.5, floor.depth * 0.5),
    )
}

#[derive(Event, Default)]
pub struct ResetEvent;

/// Marks a mesh driven by a rigid body.
#[derive(Component, Clone, Copy, Debug)]
pub struct PhysicsBody(pub RigidBodyHandle);

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct SpawnedObject {
    pub entity: Entity,
    pub body: RigidBodyHandle,
    pub collider: ColliderHandle,
}

/// Spawned mesh/body pairs in creation order.
#[derive(Resource, Default, Debug)]
pub struct EntityRegistry {
    objects: Vec<SpawnedObject>,
}

impl EntityRegistry {
    pub fn len(&self) -> usize {
        self.objects.len()
    }

    pub fn is_empty(&self) -> bool {
        self.objects.is_empty()
    }

    pub fn iter(&self) -> impl Iterator<Item = &SpawnedObject> {
        self.objects.iter()
    }

    fn push(&mut self, object: SpawnedObject) {
        self.objects.push(object);
    }

    fn drain(&mut self) -> std::vec::Drain<'_, SpawnedObject> {
        self.objects.drain(..)
    }
}

/// Unit meshes shared by every spawned shape.
#[derive(Resource)]
pub struct ShapeAssets {
    unit_sphere: Handle<Mesh>,
    unit_cube: Handle<Mesh>,
}

impl FromWorld for ShapeAssets {
    fn from_world(world: &mut World) -> Self {
        let mut meshes = world.resource_mut::<Assets<Mesh>>();
        Self {
            unit_sphere: meshes.add(Sphere::new(1.0).mesh().uv(48, 48)),
            unit_cube: meshes.add(Cuboid::new(1.0, 1.0, 1.0)),
        }
    }
}

impl ShapeAssets {
    fn mesh(&self, shape: ShapeKind) -> Handle<Mesh> {
        match shape {
            ShapeKind::Sphere { .. } => self.unit_sphere.clone(),
            ShapeKind::Cuboid { .. } => self.unit_cube.clone(),
        }
    }
}

fn shape_material(request: &SpawnShape) -> StandardMaterial {
    match request.shape {
        ShapeKind::Sphere { .. } => StandardMaterial {
            base_color: request.color,
            perceptual_roughness: 0.4,
            ..default()
        },
        ShapeKind::Cuboid { .. } => StandardMaterial {
            base_color: request.color,
            ..default()
        },
    }
}

fn spawn_object(
    commands: &mut Commands,
    physics: &mut PhysicsWorld,
    shapes: &ShapeAssets,
    materials: &mut Assets<StandardMaterial>,
    request: &SpawnShape,
) -> SpawnedObject {
    let p = request.position;
    let rubber = physics.material(RUBBER);
    let (body, collider) = physics.insert_body(
        RigidBodyBuilder::dynamic().translation(Vector::new(p.x, p.y, p.z)),
        request.shape.collider().mass(1.0),
        rubber,
    );
    if let Err(err) = physics.attach_listener(collider, request.shape.sound_category()) {
        warn!("spawned body has no impact sound: {err}");
    }

    let entity = commands
        .spawn((
            PbrBundle {
                mesh: shapes.mesh(request.shape),
                material: materials.add(shape_material(request)),
                transform: Transform::from_translation(p).with_scale(request.shape.scale()),
                ..default()
            },
            PhysicsBody(body),
        ))
        .id();

    SpawnedObject {
        entity,
        body,
        collider,
    }
}

fn spawn_shapes(
    mut commands: Commands,
    mut requests: EventReader<SpawnShape>,
    mut physics: ResMut<PhysicsWorld>,
    mut registry: ResMut<EntityRegistry>,
    shapes: Res<ShapeAssets>,
    mut materials: ResMut<Assets<StandardMaterial>>,
) {
    for request in requests.read() {
        let object = spawn_object(
            &mut commands,
            &mut physics,
            &shapes,
            &mut materials,
            request,
        );
        debug!("spawned {:?} at {}", request.shape, request.position);
        registry.push(object);
    }
}

fn handle_reset(
    mut commands: Commands,
    mut ev_reset: EventReader<ResetEvent>,
    mut physics: ResMut<PhysicsWorld>,
    mut registry: ResMut<EntityRegistry>,
    mut scene: ResMut<SceneParameters>,
) {
    if ev_reset.is_empty() {
        return;
    }
    ev_reset.clear();

    let removed = registry.len();
    for object in registry.drain() {
        if let Some(mut entity) = commands.get_entity(object.entity) {
            entity.despawn_recursive();
        }
        physics.detach_listener(object.collider);
        if let Err(err) = physics.remove_body(object.body) {
            warn!("reset skipped a body: {err}");
        }
    }
    scene.background = SceneParameters::default().background;
    info!("scene reset, {removed} objects removed");
}

pub fn advance_physics(
    time: Res<Time>,
    mut physics: ResMut<PhysicsWorld>,
    mut impacts: EventWriter<CollisionImpact>,
) {
    let hits = physics.advance(time.delta_seconds());
    impacts.send_batch(hits);
}

// Exact copy, no interpolation between physics steps.
fn sync_transforms(
    physics: Res<PhysicsWorld>,
    registry: Res<EntityRegistry>,
    mut meshes: Query<&mut Transform, With<PhysicsBody>>,
) {
    for object in registry.iter() {
        let (Some(pose), Ok(mut transform)) = (physics.pose(object.body), meshes.get_mut(object.entity))
        else {
            continue;
        };
        transform.translation = pose.translation;
        transform.rotation = pose.rotation;
    }
}
