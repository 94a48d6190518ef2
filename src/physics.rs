//! Rigid-body world backed by rapier3d.
//!
//! [`PhysicsWorld`] owns every rapier set plus the bits of policy the
//! playground layers on top: a fixed-step clock, named materials with
//! pairwise contact rules, and the collision listeners that feed the
//! impact sounds.

use bevy::prelude::{FromWorld, Quat, Resource, Vec3, World};
use crossbeam_channel::{Receiver, Sender};
use rapier3d::prelude::{
    ActiveEvents, ActiveHooks, CCDSolver, ColliderBuilder, ColliderHandle, ColliderSet,
    CollisionEvent, ContactModificationContext, ContactPair, DefaultBroadPhase, EventHandler,
    ImpulseJointSet, IntegrationParameters, IslandManager, MultibodyJointSet, NarrowPhase,
    PhysicsHooks, PhysicsPipeline, Real, RigidBodyBuilder, RigidBodyHandle, RigidBodySet, Vector,
};
use std::collections::HashMap;
use thiserror::Error;

use crate::sound::{CollisionImpact, SoundCategory};

pub const GRASS: &str = "grass";
pub const RUBBER: &str = "rubber";

#[derive(Error, Debug, Clone, Copy, PartialEq, Eq)]
pub enum PhysicsError {
    #[error("unknown rigid body {0:?}")]
    UnknownBody(RigidBodyHandle),
    #[error("unknown collider {0:?}")]
    UnknownCollider(ColliderHandle),
}

#[derive(Resource, Clone, Debug)]
pub struct PhysicsSettings {
    pub gravity: Vec3,
    /// Size of one internal integration step, in seconds.
    pub fixed_step: f32,
    pub max_substeps: u32,
    pub allow_sleep: bool,
}

impl Default for PhysicsSettings {
    fn default() -> Self {
        Self {
            gravity: Vec3::new(0.0, -9.82, 0.0),
            fixed_step: 1.0 / 60.0,
            max_substeps: 3,
            allow_sleep: true,
        }
    }
}

/// Converts variable frame deltas into a whole number of fixed steps.
///
/// The clock always advances by the full delta; when more steps are due
/// than `max_substeps`, the surplus is dropped rather than carried into
/// the next frame. A zero delta (the first frame) takes exactly one step.
#[derive(Clone, Debug)]
pub struct FixedStepper {
    step: f32,
    max_substeps: u32,
    time: f64,
}

impl FixedStepper {
    pub fn new(step: f32, max_substeps: u32) -> Self {
        Self {
            step,
            max_substeps,
            time: 0.0,
        }
    }

    pub fn step(&self) -> f32 {
        self.step
    }

    pub fn substeps_for(&mut self, delta: f32) -> u32 {
        if delta < 0.0 || self.step <= 0.0 {
            return 0;
        }
        let h = self.step as f64;
        if delta == 0.0 {
            self.time += h;
            return 1;
        }
        let before = (self.time / h).floor();
        self.time += delta as f64;
        let after = (self.time / h).floor();
        ((after - before) as u32).min(self.max_substeps)
    }
}

#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct MaterialId(u32);

impl MaterialId {
    // 0 is reserved for colliders created without a material.
    fn to_user_data(self) -> u128 {
        self.0 as u128 + 1
    }

    fn from_user_data(data: u128) -> Option<Self> {
        (data != 0).then(|| MaterialId((data - 1) as u32))
    }
}

#[derive(Clone, Copy, Debug, PartialEq)]
pub struct ContactMaterial {
    pub friction: f32,
    pub restitution: f32,
}

impl Default for ContactMaterial {
    fn default() -> Self {
        Self {
            friction: 0.3,
            restitution: 0.0,
        }
    }
}

/// Named materials and the friction/restitution rule for each pair.
#[derive(Default, Debug)]
pub struct MaterialTable {
    names: Vec<String>,
    rules: HashMap<(MaterialId, MaterialId), ContactMaterial>,
    fallback: ContactMaterial,
}

impl MaterialTable {
    pub fn register(&mut self, name: &str) -> MaterialId {
        if let Some(id) = self.id(name) {
            return id;
        }
        self.names.push(name.to_owned());
        MaterialId(self.names.len() as u32 - 1)
    }

    pub fn id(&self, name: &str) -> Option<MaterialId> {
        self.names
            .iter()
            .position(|n| n == name)
            .map(|i| MaterialId(i as u32))
    }

    pub fn name(&self, id: MaterialId) -> Option<&str> {
        self.names.get(id.0 as usize).map(String::as_str)
    }

    pub fn set_contact(&mut self, a: MaterialId, b: MaterialId, rule: ContactMaterial) {
        self.rules.insert(Self::key(a, b), rule);
    }

    pub fn contact(&self, a: Option<MaterialId>, b: Option<MaterialId>) -> ContactMaterial {
        match (a, b) {
            (Some(a), Some(b)) => self
                .rules
                .get(&Self::key(a, b))
                .copied()
                .unwrap_or(self.fallback),
            _ => self.fallback,
        }
    }

    fn key(a: MaterialId, b: MaterialId) -> (MaterialId, MaterialId) {
        if a <= b {
            (a, b)
        } else {
            (b, a)
        }
    }
}

impl PhysicsHooks for MaterialTable {
    fn modify_solver_contacts(&self, context: &mut ContactModificationContext) {
        let material_of = |handle: ColliderHandle| {
            context
                .colliders
                .get(handle)
                .and_then(|co| MaterialId::from_user_data(co.user_data))
        };
        let rule = self.contact(material_of(context.collider1), material_of(context.collider2));
        for contact in context.solver_contacts.iter_mut() {
            contact.friction = rule.friction;
            contact.restitution = rule.restitution;
        }
    }
}

#[derive(Clone, Copy, Debug)]
struct RawImpact {
    collider1: ColliderHandle,
    collider2: ColliderHandle,
    strength: Real,
}

/// Receives rapier's collision callbacks during a step and queues one
/// [`RawImpact`] per contact start.
struct ImpactCollector {
    sender: Sender<RawImpact>,
    receiver: Receiver<RawImpact>,
}

impl Default for ImpactCollector {
    fn default() -> Self {
        let (sender, receiver) = crossbeam_channel::unbounded();
        Self { sender, receiver }
    }
}

impl EventHandler for ImpactCollector {
    fn handle_collision_event(
        &self,
        bodies: &RigidBodySet,
        colliders: &ColliderSet,
        event: CollisionEvent,
        contact_pair: Option<&ContactPair>,
    ) {
        if !event.started() {
            return;
        }
        let Some(pair) = contact_pair else {
            return;
        };
        let strength = impact_velocity_along_normal(bodies, colliders, pair).unwrap_or(0.0);
        let _ = self.sender.send(RawImpact {
            collider1: pair.collider1,
            collider2: pair.collider2,
            strength,
        });
    }

    fn handle_contact_force_event(
        &self,
        _dt: Real,
        _bodies: &RigidBodySet,
        _colliders: &ColliderSet,
        _contact_pair: &ContactPair,
        _total_force_magnitude: Real,
    ) {
    }
}

/// Relative velocity of the two bodies at the deepest contact point,
/// projected on the contact normal. Positive when they approach.
fn impact_velocity_along_normal(
    bodies: &RigidBodySet,
    colliders: &ColliderSet,
    pair: &ContactPair,
) -> Option<Real> {
    let (manifold, contact) = pair.find_deepest_contact()?;
    let collider1 = colliders.get(pair.collider1)?;
    let point = collider1.position() * contact.local_p1;
    let velocity_of = |handle: Option<RigidBodyHandle>| {
        handle
            .and_then(|h| bodies.get(h))
            .map(|rb| rb.velocity_at_point(&point))
            .unwrap_or_else(Vector::zeros)
    };
    let relative = velocity_of(manifold.data.rigid_body1) - velocity_of(manifold.data.rigid_body2);
    Some(relative.dot(&manifold.data.normal))
}

#[derive(Clone, Copy, Debug, PartialEq)]
pub struct Pose {
    pub translation: Vec3,
    pub rotation: Quat,
}

#[derive(Resource)]
pub struct PhysicsWorld {
    gravity: Vector<Real>,
    allow_sleep: bool,
    stepper: FixedStepper,
    materials: MaterialTable,
    listeners: HashMap<ColliderHandle, SoundCategory>,
    collector: ImpactCollector,
    integration_parameters: IntegrationParameters,
    pipeline: PhysicsPipeline,
    islands: IslandManager,
    broad_phase: DefaultBroadPhase,
    narrow_phase: NarrowPhase,
    bodies: RigidBodySet,
    colliders: ColliderSet,
    impulse_joints: ImpulseJointSet,
    multibody_joints: MultibodyJointSet,
    ccd_solver: CCDSolver,
}

impl FromWorld for PhysicsWorld {
    fn from_world(world: &mut World) -> Self {
        let settings = world
            .get_resource_or_insert_with(PhysicsSettings::default)
            .clone();
        Self::new(&settings)
    }
}

impl PhysicsWorld {
    pub fn new(settings: &PhysicsSettings) -> Self {
        let mut materials = MaterialTable::default();
        let grass = materials.register(GRASS);
        let rubber = materials.register(RUBBER);
        materials.set_contact(
            grass,
            rubber,
            ContactMaterial {
                friction: 0.6,
                restitution: 0.7,
            },
        );

        let mut integration_parameters = IntegrationParameters::default();
        integration_parameters.dt = settings.fixed_step;

        Self {
            gravity: Vector::new(settings.gravity.x, settings.gravity.y, settings.gravity.z),
            allow_sleep: settings.allow_sleep,
            stepper: FixedStepper::new(settings.fixed_step, settings.max_substeps),
            materials,
            listeners: HashMap::new(),
            collector: ImpactCollector::default(),
            integration_parameters,
            pipeline: PhysicsPipeline::new(),
            islands: IslandManager::new(),
            broad_phase: DefaultBroadPhase::new(),
            narrow_phase: NarrowPhase::new(),
            bodies: RigidBodySet::new(),
            colliders: ColliderSet::new(),
            impulse_joints: ImpulseJointSet::new(),
            multibody_joints: MultibodyJointSet::new(),
            ccd_solver: CCDSolver::new(),
        }
    }

    pub fn material(&self, name: &str) -> Option<MaterialId> {
        self.materials.id(name)
    }

    pub fn materials(&self) -> &MaterialTable {
        &self.materials
    }

    pub fn materials_mut(&mut self) -> &mut MaterialTable {
        &mut self.materials
    }

    pub fn insert_body(
        &mut self,
        body: RigidBodyBuilder,
        collider: ColliderBuilder,
        material: Option<MaterialId>,
    ) -> (RigidBodyHandle, ColliderHandle) {
        let body = self.bodies.insert(body.can_sleep(self.allow_sleep).build());
        let collider = collider
            .user_data(material.map_or(0, MaterialId::to_user_data))
            .active_hooks(ActiveHooks::MODIFY_SOLVER_CONTACTS)
            .build();
        let collider = self
            .colliders
            .insert_with_parent(collider, body, &mut self.bodies);
        (body, collider)
    }

    /// Removes the body together with its colliders and their listeners.
    pub fn remove_body(&mut self, handle: RigidBodyHandle) -> Result<(), PhysicsError> {
        self.bodies
            .remove(
                handle,
                &mut self.islands,
                &mut self.colliders,
                &mut self.impulse_joints,
                &mut self.multibody_joints,
                true,
            )
            .ok_or(PhysicsError::UnknownBody(handle))?;
        let colliders = &self.colliders;
        self.listeners.retain(|h, _| colliders.contains(*h));
        Ok(())
    }

    pub fn contains(&self, handle: RigidBodyHandle) -> bool {
        self.bodies.contains(handle)
    }

    pub fn body_count(&self) -> usize {
        self.bodies.len()
    }

    pub fn pose(&self, handle: RigidBodyHandle) -> Option<Pose> {
        let body = self.bodies.get(handle)?;
        let t = body.translation();
        let r = body.rotation();
        Some(Pose {
            translation: Vec3::new(t.x, t.y, t.z),
            rotation: Quat::from_xyzw(r.i, r.j, r.k, r.w),
        })
    }

    pub fn attach_listener(
        &mut self,
        collider: ColliderHandle,
        category: SoundCategory,
    ) -> Result<(), PhysicsError> {
        let co = self
            .colliders
            .get_mut(collider)
            .ok_or(PhysicsError::UnknownCollider(collider))?;
        co.set_active_events(ActiveEvents::COLLISION_EVENTS);
        self.listeners.insert(collider, category);
        Ok(())
    }

    pub fn detach_listener(&mut self, collider: ColliderHandle) -> Option<SoundCategory> {
        if let Some(co) = self.colliders.get_mut(collider) {
            co.set_active_events(ActiveEvents::empty());
        }
        self.listeners.remove(&collider)
    }

    pub fn listener(&self, collider: ColliderHandle) -> Option<SoundCategory> {
        self.listeners.get(&collider).copied()
    }

    /// Advances the simulation by `delta` seconds of wall-clock time and
    /// returns one impact per listening collider that started a contact.
    pub fn advance(&mut self, delta: f32) -> Vec<CollisionImpact> {
        let substeps = self.stepper.substeps_for(delta);
        self.integration_parameters.dt = self.stepper.step();
        for _ in 0..substeps {
            self.pipeline.step(
                &self.gravity,
                &self.integration_parameters,
                &mut self.islands,
                &mut self.broad_phase,
                &mut self.narrow_phase,
                &mut self.bodies,
                &mut self.colliders,
                &mut self.impulse_joints,
                &mut self.multibody_joints,
                &mut self.ccd_solver,
                None,
                &self.materials,
                &self.collector,
            );
        }

        let mut impacts = Vec::new();
        for raw in self.collector.receiver.try_iter() {
            for collider in [raw.collider1, raw.collider2] {
                if let Some(&category) = self.listeners.get(&collider) {
                    impacts.push(CollisionImpact {
                        category,
                        strength: raw.strength,
                    });
                }
            }
        }
        impacts
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn world_with_floor() -> PhysicsWorld {
        let mut world = PhysicsWorld::new(&PhysicsSettings::default());
        let grass = world.material(GRASS);
        world.insert_body(
            RigidBodyBuilder::fixed().translation(Vector::new(0.0, -0.025, 0.0)),
            ColliderBuilder::cuboid(3.75, 0.025, 3.75),
            grass,
        );
        world
    }

    fn drop_sphere(world: &mut PhysicsWorld, height: f32) -> (RigidBodyHandle, ColliderHandle) {
        let rubber = world.material(RUBBER);
        world.insert_body(
            RigidBodyBuilder::dynamic().translation(Vector::new(0.0, height, 0.0)),
            ColliderBuilder::ball(0.5).mass(1.0),
            rubber,
        )
    }

    #[test]
    fn stepper_counts_whole_steps_and_caps_them() {
        let mut stepper = FixedStepper::new(0.25, 3);
        assert_eq!(stepper.substeps_for(0.125), 0);
        assert_eq!(stepper.substeps_for(0.125), 1);
        assert_eq!(stepper.substeps_for(0.25), 1);
        assert_eq!(stepper.substeps_for(2.0), 3);
        // the surplus from the long frame is not replayed
        assert_eq!(stepper.substeps_for(0.25), 1);
    }

    #[test]
    fn zero_delta_takes_a_single_step() {
        let mut stepper = FixedStepper::new(0.25, 3);
        assert_eq!(stepper.substeps_for(0.0), 1);
        assert_eq!(stepper.substeps_for(0.0), 1);
        // the clock moved by two whole steps
        assert_eq!(stepper.substeps_for(0.25), 1);
        assert_eq!(stepper.substeps_for(-1.0), 0);

        let mut world = world_with_floor();
        let (body, _) = drop_sphere(&mut world, 3.0);
        world.advance(0.0);
        assert!(world.pose(body).unwrap().translation.y < 3.0);
    }

    #[test]
    fn contact_rules_are_symmetric_with_fallback() {
        let world = PhysicsWorld::new(&PhysicsSettings::default());
        let table = world.materials();
        let grass = table.id(GRASS);
        let rubber = table.id(RUBBER);

        let rule = table.contact(grass, rubber);
        assert_eq!(rule, table.contact(rubber, grass));
        assert_eq!(rule.friction, 0.6);
        assert_eq!(rule.restitution, 0.7);

        assert_eq!(table.contact(rubber, rubber), ContactMaterial::default());
        assert_eq!(table.contact(None, grass), ContactMaterial::default());
        assert_eq!(table.name(rubber.unwrap()), Some(RUBBER));
    }

    #[test]
    fn registering_a_known_material_returns_its_id() {
        let mut world = PhysicsWorld::new(&PhysicsSettings::default());
        let grass = world.material(GRASS).unwrap();
        assert_eq!(world.materials_mut().register(GRASS), grass);
    }

    #[test]
    fn falling_sphere_reports_an_impact_to_its_listener() {
        let mut world = world_with_floor();
        let (_, collider) = drop_sphere(&mut world, 3.0);
        world.attach_listener(collider, SoundCategory::SphereHit).unwrap();

        let mut impacts = Vec::new();
        for _ in 0..120 {
            impacts.extend(world.advance(1.0 / 60.0));
            if !impacts.is_empty() {
                break;
            }
        }

        let first = impacts.first().expect("sphere never hit the floor");
        assert_eq!(first.category, SoundCategory::SphereHit);
        // a 2.5 m drop lands at roughly 7 m/s
        assert!(first.strength > 1.5 && first.strength < 10.0, "{}", first.strength);
    }

    #[test]
    fn detached_colliders_stay_silent() {
        let mut world = world_with_floor();
        let (_, collider) = drop_sphere(&mut world, 3.0);
        world.attach_listener(collider, SoundCategory::SphereHit).unwrap();
        assert_eq!(world.detach_listener(collider), Some(SoundCategory::SphereHit));

        for _ in 0..120 {
            assert!(world.advance(1.0 / 60.0).is_empty());
        }
    }

    #[test]
    fn removing_a_body_twice_is_an_error() {
        let mut world = world_with_floor();
        let (body, collider) = drop_sphere(&mut world, 3.0);
        world.attach_listener(collider, SoundCategory::BoxHit).unwrap();

        assert!(world.remove_body(body).is_ok());
        assert!(!world.contains(body));
        assert_eq!(world.listener(collider), None);
        assert_eq!(world.remove_body(body), Err(PhysicsError::UnknownBody(body)));
        assert_eq!(
            world.attach_listener(collider, SoundCategory::BoxHit),
            Err(PhysicsError::UnknownCollider(collider))
        );
    }

    #[test]
    fn pose_follows_gravity() {
        let mut world = world_with_floor();
        let (body, _) = drop_sphere(&mut world, 3.0);
        world.advance(0.05);
        let pose = world.pose(body).unwrap();
        assert!(pose.translation.y < 3.0);
        assert_eq!(pose.translation.x, 0.0);
    }

    fn impacts_and_peak_after_first(world: &mut PhysicsWorld, body: RigidBodyHandle) -> (Vec<f32>, f32) {
        let mut strengths = Vec::new();
        let mut peak = f32::MIN;
        for _ in 0..300 {
            let landed = !strengths.is_empty();
            strengths.extend(world.advance(1.0 / 60.0).iter().map(|i| i.strength));
            if landed {
                peak = peak.max(world.pose(body).unwrap().translation.y);
            }
        }
        (strengths, peak)
    }

    #[test]
    fn rubber_bounces_on_grass() {
        let mut world = world_with_floor();
        let (body, collider) = drop_sphere(&mut world, 3.0);
        world.attach_listener(collider, SoundCategory::SphereHit).unwrap();

        let (strengths, peak) = impacts_and_peak_after_first(&mut world, body);
        assert!(strengths.len() >= 2, "{strengths:?}");
        let ratio = strengths[1] / strengths[0];
        assert!(ratio > 0.55 && ratio < 0.85, "{strengths:?}");
        // 0.7² of the 2.5 m drop, measured from the sphere's centre
        assert!(peak > 1.2, "{peak}");
    }

    #[test]
    fn colliders_without_material_do_not_bounce() {
        let mut world = world_with_floor();
        let (body, collider) = world.insert_body(
            RigidBodyBuilder::dynamic().translation(Vector::new(0.0, 3.0, 0.0)),
            ColliderBuilder::ball(0.5).mass(1.0),
            None,
        );
        world.attach_listener(collider, SoundCategory::SphereHit).unwrap();

        let (strengths, peak) = impacts_and_peak_after_first(&mut world, body);
        assert!(!strengths.is_empty());
        assert!(strengths[1..].iter().all(|s| *s <= 1.5), "{strengths:?}");
        assert!(peak < 0.6, "{peak}");
    }
}
