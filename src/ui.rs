use bevy::diagnostic::{DiagnosticsStore, FrameTimeDiagnosticsPlugin};
use bevy::prelude::*;
use bevy_egui::{egui, EguiContexts, EguiPlugin};

use crate::scene::LightParameters;
use crate::sim::{
    random_spawn_position, EntityRegistry, ObjectParameters, ResetEvent, SceneParameters,
    SpawnShape, MIN_DIMENSION,
};

const PANEL_WIDTH: f32 = 400.0;

pub struct UiPlugin;
impl Plugin for UiPlugin {
    fn build(&self, app: &mut App) {
        app.add_plugins(EguiPlugin)
            .add_systems(Update, control_panel.run_if(panel_visible));
    }
}

fn panel_visible(scene: Res<SceneParameters>) -> bool {
    scene.show_panel
}

#[allow(clippy::too_many_arguments)]
fn control_panel(
    mut contexts: EguiContexts,
    mut scene: ResMut<SceneParameters>,
    mut objects: ResMut<ObjectParameters>,
    mut lights: ResMut<LightParameters>,
    registry: Res<EntityRegistry>,
    diagnostics: Res<DiagnosticsStore>,
    mut ev_spawn: EventWriter<SpawnShape>,
    mut ev_reset: EventWriter<ResetEvent>,
) {
    let mut rng = rand::thread_rng();
    // widgets hold &mut every frame; only flag a change when one was edited
    let mut scene_changed = false;
    let mut lights_changed = false;
    let scene_params = scene.bypass_change_detection();
    let light_params = lights.bypass_change_detection();
    let objects = objects.as_mut();

    egui::Window::new("Controls")
        .default_width(PANEL_WIDTH)
        .show(contexts.ctx_mut(), |ui| {
            egui::CollapsingHeader::new("Scene")
                .default_open(true)
                .show(ui, |ui| {
                    ui.label(format!("Bodies: {}", registry.len()));
                    if let Some(fps) = diagnostics.get(&FrameTimeDiagnosticsPlugin::FPS) {
                        if let Some(value) = fps.smoothed() {
                            ui.label(format!("FPS: {:.1}", value));
                        }
                    }
                    scene_changed |= color_edit(ui, "background", &mut scene_params.background);
                    if ui.button("Reset Scene").clicked() {
                        ev_reset.send(ResetEvent);
                    }
                });

            egui::CollapsingHeader::new("Sphere").show(ui, |ui| {
                ui.add(
                    egui::Slider::new(&mut objects.sphere.radius, MIN_DIMENSION..=2.0)
                        .step_by(0.01)
                        .text("radius"),
                );
                color_edit(ui, "color", &mut objects.sphere.color);
                if ui.button("create Sphere").clicked() {
                    let at = random_spawn_position(&objects.floor, &mut rng);
                    ev_spawn.send(SpawnShape::sphere(&objects.sphere, at));
                }
                if ui.button("random Sphere").clicked() {
                    ev_spawn.send(SpawnShape::random_sphere(&objects.floor, &mut rng));
                }
            });

            egui::CollapsingHeader::new("Box").show(ui, |ui| {
                let cube = &mut objects.cube;
                for (value, label) in [
                    (&mut cube.width, "width"),
                    (&mut cube.height, "height"),
                    (&mut cube.depth, "depth"),
                ] {
                    ui.add(
                        egui::Slider::new(value, MIN_DIMENSION..=2.0)
                            .step_by(0.01)
                            .text(label),
                    );
                }
                color_edit(ui, "color", &mut cube.color);
                if ui.button("create box").clicked() {
                    let at = random_spawn_position(&objects.floor, &mut rng);
                    ev_spawn.send(SpawnShape::cuboid(&objects.cube, at));
                }
                if ui.button("random box").clicked() {
                    ev_spawn.send(SpawnShape::random_cuboid(&objects.floor, &mut rng));
                }
            });

            egui::CollapsingHeader::new("Lights").show(ui, |ui| {
                egui::CollapsingHeader::new("Ambient Light").show(ui, |ui| {
                    let ambient = &mut light_params.ambient;
                    lights_changed |= color_edit(ui, "color", &mut ambient.color);
                    lights_changed |= ui
                        .add(
                            egui::Slider::new(&mut ambient.intensity, 0.0..=3.0)
                                .step_by(0.001)
                                .text("intensity"),
                        )
                        .changed();
                });
                egui::CollapsingHeader::new("Directional Light").show(ui, |ui| {
                    let directional = &mut light_params.directional;
                    lights_changed |= color_edit(ui, "color", &mut directional.color);
                    lights_changed |= ui
                        .add(
                            egui::Slider::new(&mut directional.intensity, 0.0..=6.0)
                                .step_by(0.001)
                                .text("intensity"),
                        )
                        .changed();
                    lights_changed |= ui
                        .checkbox(&mut directional.show_controls, "show controls")
                        .changed();
                    if directional.show_controls {
                        ui.horizontal(|ui| {
                            ui.label("position");
                            let p = &mut directional.position;
                            for axis in [&mut p.x, &mut p.y, &mut p.z] {
                                lights_changed |=
                                    ui.add(egui::DragValue::new(axis).speed(0.05)).changed();
                            }
                        });
                    }
                });
            });
        });

    if scene_changed {
        scene.set_changed();
    }
    if lights_changed {
        lights.set_changed();
    }
}

fn color_edit(ui: &mut egui::Ui, label: &str, color: &mut Color) -> bool {
    let linear = color.to_linear();
    let mut rgb = [linear.red, linear.green, linear.blue];
    let changed = ui
        .horizontal(|ui| {
            ui.label(label);
            ui.color_edit_button_rgb(&mut rgb).changed()
        })
        .inner;
    if changed {
        *color = Color::linear_rgb(rgb[0], rgb[1], rgb[2]);
    }
    changed
}
