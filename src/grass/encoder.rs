//! Scene encoder.
//!
//! An orthographic camera looking straight down from above the cull anchor,
//! plus a recorded command list that rasterizes obstacles and surfaces into
//! three targets:
//!
//! 1. obstacle distortion (with the pass's depth attachment)
//! 2. depth + normals
//! 3. biome color
//!
//! Surfaces are drawn in two stages. The first stage writes normals and
//! biome data and does not need the LUT. `_GrassState` and the LUT are then
//! bound globally, and grass-bearing surfaces are drawn again with the
//! LUT-aware pass. The split is an ordering dependency and must not be merged.

use std::collections::HashMap;

use glam::{Mat4, Vec3, Vec4};

use crate::core::{Result, Transform};
use crate::grass::params::{
    self, GLOBAL_STATE, GLOBAL_SURFACE_LUT, OBSTACLE_SHADER, OBSTACLE_TEXTURE_SLOT, SURFACE_MATERIAL_INDEX,
};
use crate::grass::registry::{ObstacleId, SceneRegistry, SurfaceId};
use crate::grass::settings::PipelineSettings;
use crate::grass::surface::PASS_SURFACE_LUT;
use crate::render::backend::{
    DepthConvention, EncodeCommand, EncodeView, GpuBackend, MaterialHandle, MeshHandle, TextureHandle,
};

/// Clear color of every encoder target
pub const ENCODE_CLEAR_COLOR: Vec4 = Vec4::new(0.0, 0.0, 0.0, 1.0);

/// The three encoder targets, in attachment order
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct EncoderTargets {
    /// Obstacle distortion; also owns the depth attachment
    pub obstacles: TextureHandle,
    pub depth_normals: TextureHandle,
    pub biome: TextureHandle,
}

impl EncoderTargets {
    pub fn colors(&self) -> [TextureHandle; 3] {
        [self.obstacles, self.depth_normals, self.biome]
    }
}

/// Values bound between the two surface draw stages
#[derive(Clone, Copy, Debug, PartialEq)]
pub struct EncodeState {
    pub material_count: usize,
    pub gradient_resolution: u32,
    pub instance_count: i32,
    pub lut: TextureHandle,
}

#[derive(Debug)]
struct SurfaceMaterialBinding {
    shader: String,
    material: MaterialHandle,
}

/// Top-down auxiliary camera and its command list.
#[derive(Debug)]
pub struct Encoder {
    anchor: Vec3,
    view: EncodeView,
    commands: Vec<EncodeCommand>,
    /// Current command list already queued on the backend
    queued: bool,
    obstacle_materials: HashMap<ObstacleId, MaterialHandle>,
    surface_materials: HashMap<SurfaceId, SurfaceMaterialBinding>,
}

impl Encoder {
    pub fn new() -> Self {
        Self {
            anchor: Vec3::ZERO,
            view: camera_view(Vec3::ZERO, 1.0, 0.01, 100.0, DepthConvention::Standard),
            commands: Vec::new(),
            queued: false,
            obstacle_materials: HashMap::new(),
            surface_materials: HashMap::new(),
        }
    }

    /// Move the camera to `(0, height, 0)` plus the horizontal part of the
    /// cull anchor's offset point.
    pub fn position_anchor(&mut self, settings: &PipelineSettings, cull_anchor: Option<&Transform>) {
        let mut anchor = Vec3::Y * settings.encoder_height;
        if let Some(cull) = cull_anchor {
            let offset = cull.transform_point(settings.cull_encoder_offset);
            anchor += Vec3::new(offset.x, 0.0, offset.z);
        }
        self.anchor = anchor;
    }

    pub fn anchor(&self) -> Vec3 {
        self.anchor
    }

    pub fn view(&self) -> &EncodeView {
        &self.view
    }

    pub fn commands(&self) -> &[EncodeCommand] {
        &self.commands
    }

    /// Refresh the camera from the current anchor and cull distance
    pub fn update_camera(&mut self, cull_distance: f32, settings: &PipelineSettings, depth: DepthConvention) {
        self.view = camera_view(self.anchor, cull_distance, settings.encoder_near, settings.encoder_far, depth);
    }

    /// Re-record the command list from the registries.
    ///
    /// Encode materials are re-derived first: entities that left their
    /// registry lose their material, new entities get one.
    pub fn rebuild_commands(
        &mut self,
        backend: &mut dyn GpuBackend,
        scene: &SceneRegistry,
        quad: MeshHandle,
        targets: &EncoderTargets,
        state: &EncodeState,
    ) -> Result<()> {
        self.sync_materials(backend, scene)?;

        self.commands.clear();
        self.queued = false;

        self.commands.push(EncodeCommand::SetTargets {
            colors: targets.colors(),
            depth: targets.obstacles,
        });
        self.commands.push(EncodeCommand::Clear {
            color: ENCODE_CLEAR_COLOR,
            depth: backend.depth_convention().far_value(),
        });

        for (id, obstacle) in scene.obstacles.iter() {
            if obstacle.displacement_texture.is_none() {
                continue;
            }
            let Some(&material) = self.obstacle_materials.get(&id) else { continue };
            self.commands.push(EncodeCommand::DrawMesh {
                mesh: quad,
                transform: obstacle.model_matrix(),
                material,
                submesh: 0,
                pass: 0,
            });
        }

        for (id, surface) in scene.surfaces.iter() {
            let (Some(renderer), Some(binding)) = (surface.renderer, self.surface_materials.get(&id)) else {
                continue;
            };
            self.commands.push(EncodeCommand::DrawRenderer {
                renderer,
                material: binding.material,
                submesh: 0,
                pass: surface.pre_lut_pass(),
            });
        }

        self.commands.push(EncodeCommand::SetGlobalVector {
            name: GLOBAL_STATE,
            value: params::state_vector(false, state.material_count, state.gradient_resolution, state.instance_count),
        });
        self.commands.push(EncodeCommand::SetGlobalTexture {
            name: GLOBAL_SURFACE_LUT,
            texture: state.lut,
        });

        for (id, surface) in scene.surfaces.iter() {
            if surface.is_blocker() {
                continue;
            }
            let (Some(renderer), Some(binding)) = (surface.renderer, self.surface_materials.get(&id)) else {
                continue;
            };
            self.commands.push(EncodeCommand::DrawRenderer {
                renderer,
                material: binding.material,
                submesh: 0,
                pass: PASS_SURFACE_LUT,
            });
        }

        Ok(())
    }

    /// Queue the encode pass. `force` also submits it and waits, so a
    /// following dispatch reads finished targets.
    ///
    /// The command list is queued at most once per rebuild.
    pub fn render(&mut self, backend: &mut dyn GpuBackend, force: bool) -> Result<()> {
        if !self.queued {
            backend.execute_encode(&self.view, &self.commands)?;
            self.queued = true;
        }
        if force {
            backend.flush();
        }
        Ok(())
    }

    /// Release every encode material
    pub fn release(&mut self, backend: &mut dyn GpuBackend) {
        for (_, material) in self.obstacle_materials.drain() {
            backend.release_material(material);
        }
        for (_, binding) in self.surface_materials.drain() {
            backend.release_material(binding.material);
        }
        self.commands.clear();
        self.queued = false;
    }

    fn sync_materials(&mut self, backend: &mut dyn GpuBackend, scene: &SceneRegistry) -> Result<()> {
        let stale: Vec<_> = self
            .obstacle_materials
            .keys()
            .filter(|id| !scene.obstacles.contains(**id))
            .copied()
            .collect();
        for id in stale {
            if let Some(material) = self.obstacle_materials.remove(&id) {
                backend.release_material(material);
            }
        }

        for (id, obstacle) in scene.obstacles.iter() {
            let material = match self.obstacle_materials.get(&id) {
                Some(&material) => material,
                None => {
                    let material = backend.create_material(OBSTACLE_SHADER)?;
                    self.obstacle_materials.insert(id, material);
                    material
                }
            };
            backend.set_material_texture(material, OBSTACLE_TEXTURE_SLOT, obstacle.displacement_texture)?;
        }

        let stale: Vec<_> = self
            .surface_materials
            .keys()
            .filter(|id| !scene.surfaces.contains(**id))
            .copied()
            .collect();
        for id in stale {
            if let Some(binding) = self.surface_materials.remove(&id) {
                backend.release_material(binding.material);
            }
        }

        for (id, surface) in scene.surfaces.iter() {
            let shader = surface.encode_shader();
            let material = match self.surface_materials.get(&id) {
                Some(binding) if binding.shader == shader => binding.material,
                _ => {
                    let material = backend.create_material(shader)?;
                    let binding = SurfaceMaterialBinding { shader: shader.to_string(), material };
                    if let Some(old) = self.surface_materials.insert(id, binding) {
                        backend.release_material(old.material);
                    }
                    material
                }
            };
            let index = Vec4::new(surface.material_index as f32, 0.0, 0.0, 0.0);
            backend.set_material_vector(material, SURFACE_MATERIAL_INDEX, index)?;
        }

        Ok(())
    }
}

impl Default for Encoder {
    fn default() -> Self {
        Self::new()
    }
}

/// Orthographic view straight down from `anchor`, `half_size` on each side
pub fn camera_view(anchor: Vec3, half_size: f32, near: f32, far: f32, depth: DepthConvention) -> EncodeView {
    // Reversed depth maps near to 1 and far to 0
    let (z_near, z_far) = match depth {
        DepthConvention::Standard => (near, far),
        DepthConvention::Reversed => (far, near),
    };
    EncodeView {
        view: Mat4::look_to_rh(anchor, Vec3::NEG_Y, Vec3::Z),
        projection: Mat4::orthographic_rh(-half_size, half_size, -half_size, half_size, z_near, z_far),
        position: anchor,
        near,
        far,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::grass::obstacle::Obstacle;
    use crate::grass::surface::{Surface, PASS_BLOCKER, PASS_SURFACE};
    use crate::render::backend::{DepthConvention, RendererHandle};
    use crate::render::recording::{Event, RecordingBackend};

    fn targets() -> EncoderTargets {
        EncoderTargets {
            obstacles: TextureHandle(101),
            depth_normals: TextureHandle(102),
            biome: TextureHandle(103),
        }
    }

    fn state() -> EncodeState {
        EncodeState {
            material_count: 1,
            gradient_resolution: 8,
            instance_count: 1000,
            lut: TextureHandle(200),
        }
    }

    fn surface_draws(commands: &[EncodeCommand]) -> Vec<(RendererHandle, u32)> {
        commands
            .iter()
            .filter_map(|c| match c {
                EncodeCommand::DrawRenderer { renderer, pass, .. } => Some((*renderer, *pass)),
                _ => None,
            })
            .collect()
    }

    fn rebuild(encoder: &mut Encoder, backend: &mut RecordingBackend, scene: &SceneRegistry) {
        encoder
            .rebuild_commands(backend, scene, MeshHandle(300), &targets(), &state())
            .unwrap();
    }

    #[test]
    fn test_single_surface_two_stages() {
        let mut backend = RecordingBackend::new();
        let mut scene = SceneRegistry::new();
        scene.surfaces.add(Surface::new(RendererHandle(1), 0));
        let mut encoder = Encoder::new();
        rebuild(&mut encoder, &mut backend, &scene);

        let commands = encoder.commands();
        assert!(matches!(commands[0], EncodeCommand::SetTargets { .. }));
        assert!(matches!(commands[1], EncodeCommand::Clear { .. }));
        assert_eq!(
            surface_draws(commands),
            vec![(RendererHandle(1), PASS_SURFACE), (RendererHandle(1), PASS_SURFACE_LUT)]
        );

        // State and LUT sit between the two stages
        let state_at = commands
            .iter()
            .position(|c| matches!(c, EncodeCommand::SetGlobalVector { name, .. } if *name == GLOBAL_STATE))
            .unwrap();
        let lut_at = commands
            .iter()
            .position(|c| matches!(c, EncodeCommand::SetGlobalTexture { texture, .. } if *texture == TextureHandle(200)))
            .unwrap();
        assert_eq!(state_at, 3);
        assert_eq!(lut_at, 4);
        assert!(matches!(
            commands[state_at],
            EncodeCommand::SetGlobalVector { value, .. } if value == Vec4::new(0.0, 0.0, 7.0, 1000.0)
        ));
    }

    #[test]
    fn test_blocker_only_in_first_stage() {
        let mut backend = RecordingBackend::new();
        let mut scene = SceneRegistry::new();
        scene.surfaces.add(Surface::blocker(RendererHandle(7)));
        let mut encoder = Encoder::new();
        rebuild(&mut encoder, &mut backend, &scene);

        assert_eq!(surface_draws(encoder.commands()), vec![(RendererHandle(7), PASS_BLOCKER)]);
    }

    #[test]
    fn test_obstacles_without_texture_skipped() {
        let mut backend = RecordingBackend::new();
        let mut scene = SceneRegistry::new();
        scene.obstacles.add(Obstacle::new(Transform::IDENTITY));
        scene
            .obstacles
            .add(Obstacle::new(Transform::from_position(Vec3::X)).with_texture(TextureHandle(50)));
        let mut encoder = Encoder::new();
        rebuild(&mut encoder, &mut backend, &scene);

        let quads: Vec<_> = encoder
            .commands()
            .iter()
            .filter_map(|c| match c {
                EncodeCommand::DrawMesh { mesh, transform, .. } => Some((*mesh, *transform)),
                _ => None,
            })
            .collect();
        assert_eq!(quads.len(), 1);
        assert_eq!(quads[0].0, MeshHandle(300));
        assert_eq!(quads[0].1.w_axis.truncate(), Vec3::X);

        // Obstacle materials sample the displacement texture
        assert!(backend.events.iter().any(|e| matches!(
            e,
            Event::SetMaterialTexture { name, texture: Some(TextureHandle(50)), .. } if name == OBSTACLE_TEXTURE_SLOT
        )));
    }

    #[test]
    fn test_removed_entities_not_encoded() {
        let mut backend = RecordingBackend::new();
        let mut scene = SceneRegistry::new();
        let gone = scene.surfaces.add(Surface::new(RendererHandle(1), 0));
        scene.surfaces.add(Surface::new(RendererHandle(2), 0));
        let obstacle = scene
            .obstacles
            .add(Obstacle::new(Transform::IDENTITY).with_texture(TextureHandle(50)));
        let mut encoder = Encoder::new();
        rebuild(&mut encoder, &mut backend, &scene);

        scene.surfaces.remove(gone);
        scene.obstacles.remove(obstacle);
        rebuild(&mut encoder, &mut backend, &scene);

        let draws = surface_draws(encoder.commands());
        assert!(draws.iter().all(|(r, _)| *r == RendererHandle(2)));
        assert!(!encoder.commands().iter().any(|c| matches!(c, EncodeCommand::DrawMesh { .. })));
        assert_eq!(backend.count(|e| matches!(e, Event::ReleaseMaterial(_))), 2);
    }

    #[test]
    fn test_materials_reused_across_rebuilds() {
        let mut backend = RecordingBackend::new();
        let mut scene = SceneRegistry::new();
        let id = scene.surfaces.add(Surface::new(RendererHandle(1), 0));
        let mut encoder = Encoder::new();
        rebuild(&mut encoder, &mut backend, &scene);
        rebuild(&mut encoder, &mut backend, &scene);
        assert_eq!(backend.count(|e| matches!(e, Event::CreateMaterial { .. })), 1);

        // Switching shader swaps the material
        scene.surfaces.get_mut(id).unwrap().alternative_shader = Some("custom/encode".into());
        rebuild(&mut encoder, &mut backend, &scene);
        assert_eq!(backend.count(|e| matches!(e, Event::CreateMaterial { shader, .. } if shader == "custom/encode")), 1);
        assert_eq!(backend.count(|e| matches!(e, Event::ReleaseMaterial(_))), 1);
    }

    #[test]
    fn test_surface_material_index_bound() {
        let mut backend = RecordingBackend::new();
        let mut scene = SceneRegistry::new();
        scene.surfaces.add(Surface::new(RendererHandle(1), 3));
        let mut encoder = Encoder::new();
        rebuild(&mut encoder, &mut backend, &scene);
        assert!(backend.events.iter().any(|e| matches!(
            e,
            Event::SetMaterialVector { name, value, .. } if name == SURFACE_MATERIAL_INDEX && value.x == 3.0
        )));
    }

    #[test]
    fn test_clear_uses_far_depth() {
        let mut backend = RecordingBackend::new();
        backend.depth = DepthConvention::Reversed;
        let mut encoder = Encoder::new();
        rebuild(&mut encoder, &mut backend, &SceneRegistry::new());
        assert_eq!(
            encoder.commands()[1],
            EncodeCommand::Clear { color: ENCODE_CLEAR_COLOR, depth: 0.0 }
        );
    }

    #[test]
    fn test_anchor_follows_cull_offset() {
        let mut settings = PipelineSettings::default();
        settings.cull_encoder_offset = Vec3::new(0.0, 0.0, 2.0);
        let cull = Transform::from_position(Vec3::new(5.0, 3.0, -1.0));
        let mut encoder = Encoder::new();

        encoder.position_anchor(&settings, Some(&cull));
        assert_eq!(encoder.anchor(), Vec3::new(5.0, 10.0, 1.0));

        encoder.position_anchor(&settings, None);
        assert_eq!(encoder.anchor(), Vec3::new(0.0, 10.0, 0.0));
    }

    #[test]
    fn test_camera_looks_down() {
        let view = camera_view(Vec3::new(1.0, 10.0, 2.0), 5.0, 0.01, 100.0, DepthConvention::Standard);
        // A point 3 units below the camera is in front of it at the center
        let clip = view.view_projection().project_point3(Vec3::new(1.0, 7.0, 2.0));
        assert!(clip.x.abs() < 1e-5 && clip.y.abs() < 1e-5);
        assert!(clip.z > 0.0 && clip.z < 1.0);
        // The cull distance maps to the edge of the target
        let edge = view.view_projection().project_point3(Vec3::new(6.0, 7.0, 2.0));
        assert!((edge.x.abs() - 1.0).abs() < 1e-5);
    }

    /// Height recovered from an encoded depth the way the placer kernel does it
    fn decode_height(view: &EncodeView, depth: f32, convention: DepthConvention) -> f32 {
        let linear = match convention {
            DepthConvention::Standard => depth,
            DepthConvention::Reversed => 1.0 - depth,
        };
        view.position.y - (view.near + linear * (view.far - view.near))
    }

    #[test]
    fn test_encoded_depth_decodes_to_height() {
        for convention in [DepthConvention::Standard, DepthConvention::Reversed] {
            let view = camera_view(Vec3::new(1.0, 10.0, 2.0), 5.0, 0.01, 100.0, convention);
            let clip = view.view_projection().project_point3(Vec3::new(1.0, 7.0, 2.0));
            let height = decode_height(&view, clip.z, convention);
            assert!((height - 7.0).abs() < 1e-3, "{convention:?} decoded {height}");
        }
    }

    #[test]
    fn test_reversed_depth_keeps_topmost_surface() {
        let view = camera_view(Vec3::new(0.0, 10.0, 0.0), 5.0, 0.01, 100.0, DepthConvention::Reversed);
        let top = view.view_projection().project_point3(Vec3::new(0.0, 7.0, 0.0)).z;
        let bottom = view.view_projection().project_point3(Vec3::new(0.0, 2.0, 0.0)).z;
        let clear = DepthConvention::Reversed.far_value();
        // GreaterEqual passes both over the clear value and keeps the nearer one
        assert!(top > bottom && bottom >= clear);
        assert!(top <= 1.0);
    }

    #[test]
    fn test_render_queues_once_per_rebuild() {
        let mut backend = RecordingBackend::new();
        let mut encoder = Encoder::new();
        rebuild(&mut encoder, &mut backend, &SceneRegistry::new());
        encoder.render(&mut backend, false).unwrap();
        encoder.render(&mut backend, true).unwrap();
        assert_eq!(backend.encodes().len(), 1);
        assert_eq!(backend.count(|e| matches!(e, Event::Flush)), 1);
    }
}
