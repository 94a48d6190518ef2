use bevy::audio::{PlaybackSettings, Volume};
use bevy::prelude::*;
use std::time::Duration;

use crate::sim::advance_physics;

/// Impacts at or below this strength are silent.
pub const IMPACT_THRESHOLD: f32 = 1.5;
/// Strength at which the volume saturates.
pub const IMPACT_SATURATION: f32 = 10.0;
pub const COOLDOWN: Duration = Duration::from_millis(15);

#[derive(Clone, Copy, PartialEq, Eq, Hash, Debug)]
pub enum SoundCategory {
    SphereHit,
    BoxHit,
}

impl SoundCategory {
    pub const ALL: [SoundCategory; 2] = [SoundCategory::SphereHit, SoundCategory::BoxHit];

    fn index(self) -> usize {
        match self {
            SoundCategory::SphereHit => 0,
            SoundCategory::BoxHit => 1,
        }
    }

    pub fn asset_path(self) -> &'static str {
        match self {
            SoundCategory::SphereHit => "sounds/ball-hit.mp3",
            SoundCategory::BoxHit => "sounds/block-hit.mp3",
        }
    }
}

#[derive(Event, Clone, Copy, Debug, PartialEq)]
pub struct CollisionImpact {
    pub category: SoundCategory,
    pub strength: f32,
}

pub fn impact_volume(strength: f32) -> f32 {
    ((strength - IMPACT_THRESHOLD) / (IMPACT_SATURATION - IMPACT_THRESHOLD)).clamp(0.0, 1.0)
}

#[derive(Clone, Debug)]
enum GateState {
    Armed,
    Cooling(Timer),
}

/// Lets one impact through, then stays shut until the cooldown elapses.
#[derive(Clone, Debug)]
pub struct SoundGate {
    state: GateState,
    cooldown: Duration,
}

impl SoundGate {
    pub fn new(cooldown: Duration) -> Self {
        Self {
            state: GateState::Armed,
            cooldown,
        }
    }

    pub fn is_armed(&self) -> bool {
        matches!(self.state, GateState::Armed)
    }

    pub fn tick(&mut self, delta: Duration) {
        if let GateState::Cooling(timer) = &mut self.state {
            if timer.tick(delta).finished() {
                self.state = GateState::Armed;
            }
        }
    }

    /// Returns the playback volume when the impact gets through.
    pub fn trigger(&mut self, strength: f32) -> Option<f32> {
        if strength <= IMPACT_THRESHOLD || !self.is_armed() {
            return None;
        }
        self.state = GateState::Cooling(Timer::new(self.cooldown, TimerMode::Once));
        Some(impact_volume(strength))
    }
}

#[derive(Resource, Clone, Debug)]
pub struct SoundGates([SoundGate; 2]);

impl Default for SoundGates {
    fn default() -> Self {
        Self([SoundGate::new(COOLDOWN), SoundGate::new(COOLDOWN)])
    }
}

impl SoundGates {
    pub fn get(&self, category: SoundCategory) -> &SoundGate {
        &self.0[category.index()]
    }

    pub fn trigger(&mut self, category: SoundCategory, strength: f32) -> Option<f32> {
        self.0[category.index()].trigger(strength)
    }

    pub fn tick(&mut self, delta: Duration) {
        for gate in &mut self.0 {
            gate.tick(delta);
        }
    }
}

#[derive(Resource)]
pub struct ImpactSounds {
    clips: [Handle<AudioSource>; 2],
    playing: [Option<Entity>; 2],
}

impl ImpactSounds {
    pub fn new(clips: [Handle<AudioSource>; 2]) -> Self {
        Self {
            clips,
            playing: [None, None],
        }
    }
}

impl FromWorld for ImpactSounds {
    fn from_world(world: &mut World) -> Self {
        let server = world.resource::<AssetServer>();
        Self::new(SoundCategory::ALL.map(|category| server.load(category.asset_path())))
    }
}

pub struct SoundPlugin;
impl Plugin for SoundPlugin {
    fn build(&self, app: &mut App) {
        app.init_resource::<SoundGates>()
            .init_resource::<ImpactSounds>()
            .add_systems(
                Update,
                (tick_sound_gates, play_impact_sounds)
                    .chain()
                    .after(advance_physics),
            );
    }
}

fn tick_sound_gates(time: Res<Time>, mut gates: ResMut<SoundGates>) {
    gates.tick(time.delta());
}

fn play_impact_sounds(
    mut commands: Commands,
    mut impacts: EventReader<CollisionImpact>,
    mut gates: ResMut<SoundGates>,
    mut sounds: ResMut<ImpactSounds>,
) {
    for impact in impacts.read() {
        let Some(volume) = gates.trigger(impact.category, impact.strength) else {
            continue;
        };
        let slot = impact.category.index();

        // restart from zero: cut the clip still playing for this category
        if let Some(previous) = sounds.playing[slot].take() {
            if let Some(mut entity) = commands.get_entity(previous) {
                entity.despawn();
            }
        }
        let entity = commands
            .spawn(AudioBundle {
                source: sounds.clips[slot].clone(),
                settings: PlaybackSettings::DESPAWN.with_volume(Volume::new(volume)),
            })
            .id();
        sounds.playing[slot] = Some(entity);
        debug!(
            "{:?} impact {:.2} -> volume {:.2}",
            impact.category, impact.strength, volume
        );
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use bevy::time::TimeUpdateStrategy;

    #[test]
    fn weak_impacts_never_play() {
        for category in SoundCategory::ALL {
            let mut gates = SoundGates::default();
            for strength in [-3.0, 0.0, 1.0, 1.5] {
                assert_eq!(gates.trigger(category, strength), None);
            }
            assert!(gates.get(category).is_armed());
        }
    }

    #[test]
    fn volume_maps_threshold_to_saturation() {
        assert_eq!(impact_volume(10.0), 1.0);
        assert_eq!(impact_volume(25.0), 1.0);
        assert!(impact_volume(1.5 + 1e-4) < 1e-3);
        assert!((impact_volume(5.75) - 0.5).abs() < 1e-6);

        let mut gate = SoundGate::new(COOLDOWN);
        let volume = gate.trigger(3.2).unwrap();
        assert!((volume - (3.2 - 1.5) / 8.5).abs() < 1e-6);
    }

    #[test]
    fn gate_rearms_after_cooldown() {
        let mut gate = SoundGate::new(COOLDOWN);
        assert!(gate.trigger(4.0).is_some());
        assert!(gate.trigger(4.0).is_none());

        gate.tick(Duration::from_millis(10));
        assert!(gate.trigger(4.0).is_none());

        gate.tick(Duration::from_millis(5));
        assert!(gate.is_armed());
        assert!(gate.trigger(4.0).is_some());
    }

    #[test]
    fn categories_cool_down_independently() {
        let mut gates = SoundGates::default();
        assert!(gates.trigger(SoundCategory::SphereHit, 6.0).is_some());
        assert!(gates.trigger(SoundCategory::BoxHit, 6.0).is_some());
        assert!(gates.trigger(SoundCategory::SphereHit, 6.0).is_none());
    }

    fn audio_app() -> App {
        let mut app = App::new();
        app.add_plugins(MinimalPlugins)
            .insert_resource(TimeUpdateStrategy::ManualDuration(Duration::from_millis(5)))
            .add_event::<CollisionImpact>()
            .init_resource::<SoundGates>()
            .insert_resource(ImpactSounds::new([Handle::default(), Handle::default()]))
            .add_systems(Update, (tick_sound_gates, play_impact_sounds).chain());
        app
    }

    fn playing(app: &mut App) -> usize {
        app.world_mut()
            .query::<&PlaybackSettings>()
            .iter(app.world())
            .count()
    }

    #[test]
    fn impacts_within_cooldown_play_once() {
        let mut app = audio_app();
        app.update();

        let impact = CollisionImpact {
            category: SoundCategory::BoxHit,
            strength: 8.0,
        };
        app.world_mut().send_event(impact);
        app.world_mut().send_event(impact);
        app.update();
        assert_eq!(playing(&mut app), 1);

        // 5 ms later the gate is still cooling
        app.world_mut().send_event(impact);
        app.update();
        assert_eq!(playing(&mut app), 1);
    }

    #[test]
    fn a_new_impact_restarts_the_clip() {
        let mut app = audio_app();
        app.update();

        let impact = CollisionImpact {
            category: SoundCategory::SphereHit,
            strength: 3.0,
        };
        app.world_mut().send_event(impact);
        app.update();
        let first = app.world().resource::<ImpactSounds>().playing[0];

        for _ in 0..4 {
            app.update();
        }
        app.world_mut().send_event(impact);
        app.update();

        let second = app.world().resource::<ImpactSounds>().playing[0];
        assert_ne!(first, second);
        assert_eq!(playing(&mut app), 1);
    }
}
