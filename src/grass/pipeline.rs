//! Grass pipeline controller.
//!
//! Owns every GPU resource the pipeline draws with (encoder targets, the
//! instance buffer, the indirect-argument buffer, the obstacle quad) and
//! drives the per-frame tick:
//!
//! ```text
//! anchor -> guards -> encoder rebuild -> args drift -> validate
//!        -> encode -> place -> globals -> indirect draw
//! ```
//!
//! The tick never fails. Missing dependencies skip the frame and are retried
//! on the next one; backend errors are logged and skip the frame.

use std::sync::atomic::{AtomicU64, Ordering};

use glam::Vec3;

use crate::core::time::FrameTime;
use crate::core::{Error, Result, Transform};
use crate::grass::config::Configuration;
use crate::grass::encoder::{EncodeState, Encoder, EncoderTargets};
use crate::grass::indirect::IndirectDrawAssembler;
use crate::grass::instance::GrassInstance;
use crate::grass::lifecycle::{HookId, Lifecycle, PipelineId, ReloadHooks, SingletonSlot};
use crate::grass::params::{
    self, GLOBAL_CULL_REF, GLOBAL_ENCODE_REF, GLOBAL_INSTANCES, GLOBAL_INSTANCE_BOUNDS,
    GLOBAL_OBSTACLE_MAP, GLOBAL_STATE, GLOBAL_SURFACE_LUT,
};
use crate::grass::placer::{Placement, PlacementInputs, Placer, TimeSample};
use crate::grass::registry::{SceneRegistry, SurfaceId};
use crate::grass::settings::PipelineSettings;
use crate::math::Aabb;
use crate::render::backend::{
    BufferDesc, BufferHandle, BufferKind, BufferWriteMode, GpuBackend, IndirectDraw, MaterialHandle,
    RenderTargetDesc, ShadowCasting, TargetFormat, TextureHandle,
};
use crate::render::mesh::{Mesh, MeshData, SubMesh};

static NEXT_PIPELINE_ID: AtomicU64 = AtomicU64::new(1);

/// Why a tick skipped its frame
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum SkipReason {
    MissingConfiguration,
    /// Active profile's instance count is zero or negative
    NoInstances,
    /// Instance or indirect-argument buffer not allocated
    MissingBuffers,
    MissingPatchMesh,
    MissingPatchMaterial,
    MissingCullAnchor,
    /// The backend rejected a resource or command
    Backend,
}

/// What one tick did
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum TickOutcome {
    /// Pipeline is not enabled
    Inactive,
    /// A reload hook fired and the pipeline disabled itself
    Reloaded,
    Skipped(SkipReason),
    /// The grass draw was issued
    Drawn(Placement),
}

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
struct InstanceBuffer {
    handle: BufferHandle,
    count: u32,
}

/// Profile and catalog values for one frame
#[derive(Clone, Copy, Debug)]
struct FrameConfig {
    cull_distance: f32,
    instance_count: u32,
    material_count: usize,
    gradient_resolution: u32,
    lut: TextureHandle,
    shadow_casting: ShadowCasting,
    receive_shadows: bool,
}

/// The grass pipeline controller.
pub struct GrassPipeline {
    id: PipelineId,
    state: Lifecycle,
    settings: PipelineSettings,
    config: Option<Configuration>,
    scene: SceneRegistry,

    // Host-supplied, not owned
    patch_mesh: Option<Mesh>,
    patch_material: Option<MaterialHandle>,
    cull_anchor: Option<Transform>,

    slot: SingletonSlot,
    holds_slot: bool,
    hooks: ReloadHooks,
    hook: Option<HookId>,

    encoder: Encoder,
    placer: Placer,
    indirect: IndirectDrawAssembler,
    quad: Option<Mesh>,
    targets: Option<EncoderTargets>,
    instances: Option<InstanceBuffer>,

    first_frame: bool,
    last_skip: Option<SkipReason>,
}

impl GrassPipeline {
    pub fn new(settings: PipelineSettings, scene: SceneRegistry, slot: SingletonSlot, hooks: ReloadHooks) -> Self {
        Self {
            id: PipelineId(NEXT_PIPELINE_ID.fetch_add(1, Ordering::Relaxed)),
            state: Lifecycle::Disabled,
            settings,
            config: None,
            scene,
            patch_mesh: None,
            patch_material: None,
            cull_anchor: None,
            slot,
            holds_slot: false,
            hooks,
            hook: None,
            encoder: Encoder::new(),
            placer: Placer::new(),
            indirect: IndirectDrawAssembler::new(),
            quad: None,
            targets: None,
            instances: None,
            first_frame: true,
            last_skip: None,
        }
    }

    /// Use a fixed placement time seed
    pub fn with_seed(mut self, seed: f32) -> Self {
        self.placer = Placer::with_seed(seed);
        self
    }

    // -- Accessors ---------------------------------------------------------

    pub fn id(&self) -> PipelineId {
        self.id
    }

    pub fn state(&self) -> Lifecycle {
        self.state
    }

    pub fn settings(&self) -> &PipelineSettings {
        &self.settings
    }

    /// Settings that don't affect resource allocation can be edited in place
    pub fn settings_mut(&mut self) -> &mut PipelineSettings {
        &mut self.settings
    }

    pub fn configuration(&self) -> Option<&Configuration> {
        self.config.as_ref()
    }

    /// Edit the configuration. Call [`Configuration::validate`] after
    /// changing profiles; the next tick picks up the change.
    pub fn configuration_mut(&mut self) -> Option<&mut Configuration> {
        self.config.as_mut()
    }

    pub fn scene(&self) -> &SceneRegistry {
        &self.scene
    }

    /// Add and remove obstacles and surfaces as they enable and disable
    pub fn scene_mut(&mut self) -> &mut SceneRegistry {
        &mut self.scene
    }

    pub fn encoder(&self) -> &Encoder {
        &self.encoder
    }

    pub fn targets(&self) -> Option<&EncoderTargets> {
        self.targets.as_ref()
    }

    pub fn instance_buffer(&self) -> Option<BufferHandle> {
        self.instances.map(|b| b.handle)
    }

    pub fn indirect(&self) -> &IndirectDrawAssembler {
        &self.indirect
    }

    pub fn holds_singleton(&self) -> bool {
        self.holds_slot
    }

    pub fn is_first_frame(&self) -> bool {
        self.first_frame
    }

    /// CPU timing samples of the current frame's placement
    pub fn timings(&self) -> &[TimeSample] {
        self.placer.timings()
    }

    pub fn set_patch_mesh(&mut self, mesh: Option<Mesh>) {
        self.patch_mesh = mesh;
    }

    pub fn set_patch_material(&mut self, material: Option<MaterialHandle>) {
        self.patch_material = material;
    }

    pub fn set_cull_anchor(&mut self, anchor: Option<Transform>) {
        self.cull_anchor = anchor;
    }

    /// Swap the configuration, releasing the old one's GPU resources. An
    /// active pipeline revalidates and repopulates from scratch.
    pub fn set_configuration(&mut self, backend: &mut dyn GpuBackend, config: Option<Configuration>) {
        if let Some(mut old) = self.config.take() {
            old.release_gpu_resources(backend);
        }
        self.config = config;
        if self.state == Lifecycle::Active {
            if let Err(e) = self.reinitialize(backend) {
                log::warn!("Grass reinitialize after configuration change failed: {e}");
            }
        }
    }

    /// Replace the settings. Encoder targets are recreated on the next
    /// validation so resolution and precision changes take effect.
    pub fn set_settings(&mut self, backend: &mut dyn GpuBackend, settings: PipelineSettings) {
        self.settings = settings;
        self.release_targets(backend);
        if self.state == Lifecycle::Active {
            if let Err(e) = self.validate_resources(backend) {
                log::warn!("Grass resource validation failed: {e}");
            }
        }
    }

    // -- Lifecycle ---------------------------------------------------------

    /// Disabled -> Active. Claims the singleton slot (a conflict is only
    /// logged), allocates resources, subscribes to reload hooks and runs an
    /// initial placement.
    pub fn enable(&mut self, backend: &mut dyn GpuBackend) {
        if self.state != Lifecycle::Disabled {
            return;
        }
        self.state = Lifecycle::Enabling;

        self.holds_slot = self.slot.claim(self.id);
        if !self.holds_slot {
            log::warn!(
                "Only one grass pipeline should be active at once ({:?} is already active), expect weird behavior",
                self.slot.holder()
            );
        }

        self.first_frame = true;
        self.last_skip = None;
        self.hook = Some(self.hooks.subscribe());

        if let Err(e) = self.validate_resources(backend).and_then(|()| self.rebuild_args(backend)) {
            log::warn!("Grass resources not ready on enable: {e}");
        }

        self.state = Lifecycle::Active;

        if let Err(e) = self.initial_placement(backend) {
            log::debug!("Initial grass placement deferred: {e}");
        }
        log::debug!("Grass pipeline {:?} enabled", self.id);
    }

    /// Active -> Disabled. Releases the slot, every owned resource and the
    /// reload hook.
    pub fn disable(&mut self, backend: &mut dyn GpuBackend) {
        if self.state == Lifecycle::Disabled {
            return;
        }
        self.state = Lifecycle::Disabling;

        if self.holds_slot {
            self.slot.release(self.id);
            self.holds_slot = false;
        }

        self.release_resources(backend);
        self.placer.reset();

        if let Some(hook) = self.hook.take() {
            self.hooks.unsubscribe(hook);
        }

        self.state = Lifecycle::Disabled;
        log::debug!("Grass pipeline {:?} disabled", self.id);
    }

    /// Disable if a reload was announced. Returns whether it did.
    pub fn handle_reload(&mut self, backend: &mut dyn GpuBackend) -> bool {
        let pending = self.hook.is_some_and(|hook| self.hooks.take_pending(hook));
        if pending {
            log::debug!("Reload announced, tearing down grass pipeline {:?}", self.id);
            self.disable(backend);
        }
        pending
    }

    /// Whether this pipeline is subscribed to reload hooks
    pub fn is_subscribed(&self) -> bool {
        self.hook.is_some()
    }

    /// Rebuild indirect args and repopulate every instance without rendering
    pub fn reinitialize(&mut self, backend: &mut dyn GpuBackend) -> Result<Placement> {
        self.validate_resources(backend)?;
        self.rebuild_args(backend)?;
        let frame = self.frame_config(backend)?;
        self.place(backend, &frame, FrameTime::default(), true, false)
    }

    /// Move a surface to another material (or make it a blocker).
    ///
    /// The surface is re-registered under a new id, and an active pipeline
    /// re-encodes and repopulates immediately.
    pub fn retarget_surface(
        &mut self,
        backend: &mut dyn GpuBackend,
        id: SurfaceId,
        material_index: i32,
    ) -> Option<SurfaceId> {
        let mut surface = self.scene.surfaces.remove(id)?;
        surface.material_index = material_index;
        let id = self.scene.surfaces.add(surface);

        if self.state == Lifecycle::Active {
            if let Err(e) = self.initial_placement(backend) {
                log::warn!("Grass repopulation after surface change failed: {e}");
            }
        }
        Some(id)
    }

    // -- Resources ---------------------------------------------------------

    /// Allocate whatever is missing or stale. Calling it again with nothing
    /// changed allocates nothing.
    pub fn validate_resources(&mut self, backend: &mut dyn GpuBackend) -> Result<()> {
        let count = self
            .config
            .as_mut()
            .ok_or(Error::MissingResource("configuration"))?
            .current_profile()
            .positive_instance_count();

        if self.quad.is_none() {
            self.quad = Some(Mesh::upload(backend, &MeshData::unit_quad())?);
            log::debug!("Created obstacle quad");
        }

        if let (Some(buffer), Some(count)) = (self.instances, count) {
            if buffer.count != count {
                log::debug!("Instance count changed {} -> {count}, reallocating", buffer.count);
                self.release_instances(backend);
            }
        }

        if self.targets.is_none() {
            self.targets = Some(self.create_targets(backend)?);
        }

        self.indirect.ensure_buffer(backend)?;

        if let (None, Some(count)) = (self.instances, count) {
            let handle = backend.create_buffer(&BufferDesc {
                label: "grass_instances",
                kind: BufferKind::Structured,
                count,
                stride: GrassInstance::SIZE,
                write_mode: BufferWriteMode::Replace,
            })?;
            log::debug!("Allocated grass instance buffer {} ({count} instances)", handle.id());
            self.instances = Some(InstanceBuffer { handle, count });
        }

        Ok(())
    }

    fn create_targets(&self, backend: &mut dyn GpuBackend) -> Result<EncoderTargets> {
        let format = self.settings.encoder_precision.format();
        let obstacles = backend.create_render_target(&RenderTargetDesc {
            label: "grass_obstacle_map",
            resolution: self.settings.obstacles_resolution,
            format,
            depth: true,
        })?;
        let depth_normals = backend.create_render_target(&RenderTargetDesc {
            label: "grass_depth_normals",
            resolution: self.settings.depth_normals_resolution,
            format,
            depth: false,
        })?;
        let biome = backend.create_render_target(&RenderTargetDesc {
            label: "grass_biome_map",
            resolution: self.settings.biome_colors_resolution,
            format: TargetFormat::Rgba8Unorm,
            depth: false,
        })?;
        log::debug!("Created grass encoder targets");
        Ok(EncoderTargets { obstacles, depth_normals, biome })
    }

    fn rebuild_args(&mut self, backend: &mut dyn GpuBackend) -> Result<()> {
        let submesh = self.patch_submesh()?;
        let count = self
            .config
            .as_mut()
            .ok_or(Error::MissingResource("configuration"))?
            .current_profile()
            .positive_instance_count()
            .unwrap_or(0);
        log::debug!("Updating indirect args ({count} instances)");
        self.indirect.rebuild_args(backend, &submesh, count)
    }

    fn patch_submesh(&self) -> Result<SubMesh> {
        self.patch_mesh
            .as_ref()
            .ok_or(Error::MissingResource("patch mesh"))?
            .submesh(0)
            .copied()
            .ok_or(Error::MissingResource("patch sub-mesh 0"))
    }

    fn release_targets(&mut self, backend: &mut dyn GpuBackend) {
        if let Some(targets) = self.targets.take() {
            for texture in targets.colors() {
                backend.globals_mut().forget_texture(texture);
                backend.release_texture(texture);
            }
        }
    }

    fn release_instances(&mut self, backend: &mut dyn GpuBackend) {
        if let Some(buffer) = self.instances.take() {
            backend.globals_mut().forget_buffer(buffer.handle);
            backend.release_buffer(buffer.handle);
        }
    }

    fn release_resources(&mut self, backend: &mut dyn GpuBackend) {
        self.encoder.release(backend);
        if let Some(quad) = self.quad.take() {
            quad.release(backend);
        }
        self.release_targets(backend);
        self.release_instances(backend);
        self.indirect.release(backend);
        if let Some(config) = self.config.as_mut() {
            config.release_gpu_resources(backend);
        }
    }

    // -- Frame -------------------------------------------------------------

    /// Run one frame. Never fails; see [`TickOutcome`].
    pub fn tick(&mut self, backend: &mut dyn GpuBackend, time: FrameTime) -> TickOutcome {
        if self.handle_reload(backend) {
            return TickOutcome::Reloaded;
        }
        if self.state != Lifecycle::Active {
            return TickOutcome::Inactive;
        }

        if self.settings.measure_execution_time {
            self.placer.clear_timings();
        }

        self.encoder.position_anchor(&self.settings, self.cull_anchor.as_ref());

        if let Some(reason) = self.missing_dependency() {
            if self.last_skip != Some(reason) {
                log::warn!("Grass frame skipped: {reason:?}");
                self.last_skip = Some(reason);
            }
            return TickOutcome::Skipped(reason);
        }

        match self.run_frame(backend, time) {
            Ok(placement) => {
                self.first_frame = false;
                self.last_skip = None;
                TickOutcome::Drawn(placement)
            }
            Err(e) => {
                log::warn!("Grass frame skipped: {e}");
                self.last_skip = Some(SkipReason::Backend);
                TickOutcome::Skipped(SkipReason::Backend)
            }
        }
    }

    fn missing_dependency(&mut self) -> Option<SkipReason> {
        let Some(config) = self.config.as_mut() else {
            return Some(SkipReason::MissingConfiguration);
        };
        if config.instance_count() <= 0 {
            return Some(SkipReason::NoInstances);
        }
        if self.indirect.buffer().is_none() || self.instances.is_none() {
            return Some(SkipReason::MissingBuffers);
        }
        if self.patch_mesh.is_none() {
            return Some(SkipReason::MissingPatchMesh);
        }
        if self.patch_material.is_none() {
            return Some(SkipReason::MissingPatchMaterial);
        }
        if self.cull_anchor.is_none() {
            return Some(SkipReason::MissingCullAnchor);
        }
        None
    }

    fn run_frame(&mut self, backend: &mut dyn GpuBackend, time: FrameTime) -> Result<Placement> {
        let cull = self.cull_anchor.ok_or(Error::MissingResource("cull anchor"))?;
        let material = self.patch_material.ok_or(Error::MissingResource("patch material"))?;
        let mesh = self
            .patch_mesh
            .as_ref()
            .map(Mesh::handle)
            .ok_or(Error::MissingResource("patch mesh"))?;

        let frame = self.frame_config(backend)?;
        self.rebuild_encoder(backend, &frame)?;

        if self.indirect.args().instance_count != frame.instance_count {
            self.rebuild_args(backend)?;
        }

        self.validate_resources(backend)?;

        self.encoder.render(backend, false)?;
        let placement = self.place(backend, &frame, time, self.first_frame, true)?;

        let instances = self.instances.ok_or(Error::MissingResource("instance buffer"))?;
        let targets = self.targets.ok_or(Error::MissingResource("encoder targets"))?;
        let args = self.indirect.buffer().ok_or(Error::MissingResource("indirect args buffer"))?;

        let cull_ref = cull.transform_point(self.settings.cull_shader_offset);
        let globals = backend.globals_mut();
        globals.set_vector(GLOBAL_CULL_REF, cull_ref.extend(frame.cull_distance));
        globals.set_vector(GLOBAL_ENCODE_REF, self.encoder.anchor().extend(0.0));
        globals.set_vector(GLOBAL_INSTANCE_BOUNDS, Vec3::new(instances.count as f32, 0.0, 0.0).extend(0.0));
        globals.set_buffer(GLOBAL_INSTANCES, instances.handle);
        globals.set_texture(GLOBAL_OBSTACLE_MAP, targets.obstacles);
        globals.set_vector(
            GLOBAL_STATE,
            params::state_vector(false, frame.material_count, frame.gradient_resolution, frame.instance_count as i32),
        );
        globals.set_texture(GLOBAL_SURFACE_LUT, frame.lut);

        backend.draw_mesh_instanced_indirect(&IndirectDraw {
            mesh,
            submesh: 0,
            material,
            bounds: Aabb::from_center_size(cull.position, Vec3::splat(frame.cull_distance * 2.0)),
            args,
            args_offset: 0,
            shadow_casting: frame.shadow_casting,
            receive_shadows: frame.receive_shadows,
        })?;

        Ok(placement)
    }

    fn frame_config(&mut self, backend: &mut dyn GpuBackend) -> Result<FrameConfig> {
        let config = self.config.as_mut().ok_or(Error::MissingResource("configuration"))?;
        let profile = config.current_profile();
        let cull_distance = profile.cull_distance;
        let shadow_casting = profile.shadow_casting;
        let receive_shadows = profile.receive_shadows;
        let instance_count = profile
            .positive_instance_count()
            .ok_or(Error::MissingResource("positive instance count"))?;
        let lut = config.surface_material_lut(backend)?;
        Ok(FrameConfig {
            cull_distance,
            instance_count,
            material_count: config.material_count(),
            gradient_resolution: config.lut_gradient_resolution,
            lut,
            shadow_casting,
            receive_shadows,
        })
    }

    fn rebuild_encoder(&mut self, backend: &mut dyn GpuBackend, frame: &FrameConfig) -> Result<()> {
        let quad = self.quad.as_ref().map(Mesh::handle).ok_or(Error::MissingResource("obstacle quad"))?;
        let targets = self.targets.ok_or(Error::MissingResource("encoder targets"))?;
        self.encoder.update_camera(frame.cull_distance, &self.settings, backend.depth_convention());
        let state = EncodeState {
            material_count: frame.material_count,
            gradient_resolution: frame.gradient_resolution,
            instance_count: frame.instance_count as i32,
            lut: frame.lut,
        };
        self.encoder.rebuild_commands(backend, &self.scene, quad, &targets, &state)
    }

    /// Re-encode and repopulate every instance, rendering the encoder first
    fn initial_placement(&mut self, backend: &mut dyn GpuBackend) -> Result<Placement> {
        self.encoder.position_anchor(&self.settings, self.cull_anchor.as_ref());
        let frame = self.frame_config(backend)?;
        self.rebuild_encoder(backend, &frame)?;
        self.place(backend, &frame, FrameTime::default(), true, true)
    }

    fn place(
        &mut self,
        backend: &mut dyn GpuBackend,
        frame: &FrameConfig,
        time: FrameTime,
        initial: bool,
        can_render: bool,
    ) -> Result<Placement> {
        let cull = self.cull_anchor.ok_or(Error::MissingResource("cull anchor"))?;
        let instances = self.instances.ok_or(Error::MissingResource("instance buffer"))?;
        let targets = self.targets.ok_or(Error::MissingResource("encoder targets"))?;
        let inputs = PlacementInputs {
            settings: &self.settings,
            instances: instances.handle,
            depth_normals: targets.depth_normals,
            biome: targets.biome,
            lut: frame.lut,
            cull_point: cull.transform_point(self.settings.cull_encoder_offset),
            cull_distance: frame.cull_distance,
            instance_count: frame.instance_count,
            material_count: frame.material_count,
            gradient_resolution: frame.gradient_resolution,
            time,
        };
        self.placer.place(backend, &mut self.encoder, &inputs, initial, can_render)
    }
}

/// Announce an imminent reload and tear down every subscribed pipeline now.
///
/// Resources are released before this returns, so the host can reload
/// without ticking first. Returns how many pipelines were disabled.
pub fn prepare_reload(
    hooks: &ReloadHooks,
    backend: &mut dyn GpuBackend,
    pipelines: &mut [&mut GrassPipeline],
) -> usize {
    hooks.fire();
    let mut disabled = 0;
    for pipeline in pipelines.iter_mut() {
        if pipeline.handle_reload(backend) {
            disabled += 1;
        }
    }
    if disabled > 0 {
        log::info!("Tore down {disabled} grass pipeline(s) ahead of reload");
    }
    disabled
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::grass::material::SurfaceMaterial;
    use crate::grass::params::{GLOBAL_BAKED_LUT, PATCH_SHADER};
    use crate::grass::surface::{Surface, PASS_SURFACE_LUT};
    use crate::render::backend::{EncodeCommand, RendererHandle};
    use crate::render::recording::{Event, RecordingBackend};
    use glam::Vec4;

    fn frame(elapsed: f32) -> FrameTime {
        FrameTime::new(elapsed, 1.0 / 60.0)
    }

    fn config() -> Configuration {
        let mut config = Configuration::new();
        config.surface_materials.push(Some(SurfaceMaterial::new("grass")));
        config.lut_gradient_resolution = 8;
        config.validate();
        config
    }

    fn pipeline(backend: &mut RecordingBackend, slot: SingletonSlot, hooks: ReloadHooks) -> GrassPipeline {
        crate::core::logging::try_init();
        let mut scene = SceneRegistry::new();
        scene.surfaces.add(Surface::new(RendererHandle(900), 0));
        let mut p = GrassPipeline::new(PipelineSettings::default(), scene, slot, hooks).with_seed(2.0);
        p.set_configuration(backend, Some(config()));
        p.set_patch_mesh(Some(Mesh::upload(backend, &MeshData::unit_quad()).unwrap()));
        p.set_patch_material(Some(backend.create_material(PATCH_SHADER).unwrap()));
        p.set_cull_anchor(Some(Transform::from_position(Vec3::new(1.0, 0.0, 2.0))));
        p
    }

    fn ready(backend: &mut RecordingBackend) -> GrassPipeline {
        pipeline(backend, SingletonSlot::new(), ReloadHooks::new())
    }

    #[test]
    fn test_enable_then_tick_draws() {
        let mut backend = RecordingBackend::new();
        let mut p = ready(&mut backend);
        p.enable(&mut backend);
        assert_eq!(p.state(), Lifecycle::Active);
        assert!(p.holds_singleton());

        let outcome = p.tick(&mut backend, frame(0.0));
        assert_eq!(outcome, TickOutcome::Drawn(Placement::Dispatched { initial: true, groups: 16 }));
        assert_eq!(backend.draws().len(), 1);
        assert!(!p.is_first_frame());

        let outcome = p.tick(&mut backend, frame(0.1));
        assert_eq!(outcome, TickOutcome::Drawn(Placement::Dispatched { initial: false, groups: 16 }));
    }

    #[test]
    fn test_single_surface_scenario() {
        let mut backend = RecordingBackend::new();
        let mut p = ready(&mut backend);
        p.enable(&mut backend);
        backend.clear_events();
        p.tick(&mut backend, frame(0.0));

        let lut = p.configuration().unwrap().cached_lut().unwrap().image();
        assert_eq!((lut.width(), lut.height()), (1, 10));

        let surface_draws: Vec<u32> = p
            .encoder()
            .commands()
            .iter()
            .filter_map(|c| match c {
                EncodeCommand::DrawRenderer { pass, .. } => Some(*pass),
                _ => None,
            })
            .collect();
        assert_eq!(surface_draws, vec![0, PASS_SURFACE_LUT]);

        assert_eq!(backend.dispatches(), vec![(0, [16, 1, 1])]);
        assert_eq!(backend.last_vector(GLOBAL_STATE).unwrap().w, 1000.0);
    }

    #[test]
    fn test_validate_is_idempotent() {
        let mut backend = RecordingBackend::new();
        let mut p = ready(&mut backend);
        p.enable(&mut backend);
        backend.clear_events();

        p.validate_resources(&mut backend).unwrap();
        p.validate_resources(&mut backend).unwrap();
        assert_eq!(backend.allocation_count(), 0);
    }

    #[test]
    fn test_steady_state_tick_allocates_nothing() {
        let mut backend = RecordingBackend::new();
        let mut p = ready(&mut backend);
        p.enable(&mut backend);
        p.tick(&mut backend, frame(0.0));
        backend.clear_events();

        p.tick(&mut backend, frame(0.1));
        assert_eq!(backend.allocation_count(), 0);
    }

    #[test]
    fn test_instance_count_change_reallocates() {
        let mut backend = RecordingBackend::new();
        let mut p = ready(&mut backend);
        p.enable(&mut backend);
        p.tick(&mut backend, frame(0.0));
        let old = p.instance_buffer().unwrap();

        let config = p.configuration_mut().unwrap();
        config.default_profile.instance_count = 2000;
        config.validate();
        backend.clear_events();

        p.tick(&mut backend, frame(0.1));
        let new = p.instance_buffer().unwrap();
        assert_ne!(old, new);
        assert!(backend.events.contains(&Event::ReleaseBuffer(old)));
        assert_eq!(backend.buffer_desc(new).unwrap().count, 2000);
        assert_eq!(p.indirect().args().instance_count, 2000);

        let args_at = backend
            .events
            .iter()
            .position(|e| matches!(e, Event::ReplaceData { buffer, .. } if Some(*buffer) == p.indirect().buffer()))
            .unwrap();
        let draw_at = backend.events.iter().position(|e| matches!(e, Event::Draw(_))).unwrap();
        assert!(args_at < draw_at);
    }

    #[test]
    fn test_missing_cull_anchor_skips_then_recovers() {
        let mut backend = RecordingBackend::new();
        let mut p = ready(&mut backend);
        p.set_cull_anchor(None);
        p.enable(&mut backend);

        assert_eq!(p.tick(&mut backend, frame(0.0)), TickOutcome::Skipped(SkipReason::MissingCullAnchor));
        assert!(backend.draws().is_empty());
        assert!(p.is_first_frame());

        p.set_cull_anchor(Some(Transform::IDENTITY));
        assert!(matches!(p.tick(&mut backend, frame(0.1)), TickOutcome::Drawn(_)));
    }

    #[test]
    fn test_zero_instances_skips() {
        let mut backend = RecordingBackend::new();
        let mut p = ready(&mut backend);
        let config = p.configuration_mut().unwrap();
        config.default_profile.instance_count = 0;
        config.validate();
        p.enable(&mut backend);
        assert_eq!(p.tick(&mut backend, frame(0.0)), TickOutcome::Skipped(SkipReason::NoInstances));
    }

    #[test]
    fn test_missing_configuration_skips() {
        let mut backend = RecordingBackend::new();
        let mut p = ready(&mut backend);
        p.set_configuration(&mut backend, None);
        p.enable(&mut backend);
        assert_eq!(p.tick(&mut backend, frame(0.0)), TickOutcome::Skipped(SkipReason::MissingConfiguration));
    }

    #[test]
    fn test_draw_bounds_and_globals() {
        let mut backend = RecordingBackend::new();
        let mut p = ready(&mut backend);
        p.configuration_mut().unwrap().default_profile.receive_shadows = true;
        p.configuration_mut().unwrap().validate();
        p.enable(&mut backend);
        p.tick(&mut backend, frame(0.0));

        let draw = backend.draws()[0];
        assert_eq!(draw.bounds.center(), Vec3::new(1.0, 0.0, 2.0));
        assert_eq!(draw.bounds.size(), Vec3::splat(10.0));
        assert_eq!(draw.shadow_casting, ShadowCasting::On);
        assert!(draw.receive_shadows);
        assert_eq!(Some(draw.args), p.indirect().buffer());

        let globals = backend.globals();
        assert_eq!(globals.vector(GLOBAL_CULL_REF), Some(Vec4::new(1.0, 0.0, 2.0, 5.0)));
        assert_eq!(globals.vector(GLOBAL_ENCODE_REF), Some(Vec4::new(1.0, 10.0, 2.0, 0.0)));
        assert_eq!(globals.vector(GLOBAL_INSTANCE_BOUNDS), Some(Vec4::new(1000.0, 0.0, 0.0, 0.0)));
        assert_eq!(globals.buffer(GLOBAL_INSTANCES), p.instance_buffer());
        assert_eq!(globals.texture(GLOBAL_OBSTACLE_MAP), p.targets().map(|t| t.obstacles));
        assert_eq!(globals.vector(GLOBAL_STATE), Some(Vec4::new(0.0, 0.0, 7.0, 1000.0)));

        let lut = p.configuration().unwrap().cached_lut().unwrap().texture();
        assert_eq!(globals.texture(GLOBAL_BAKED_LUT), Some(lut));
        assert_eq!(globals.texture(GLOBAL_SURFACE_LUT), Some(lut));
    }

    #[test]
    fn test_disable_releases_everything() {
        let mut backend = RecordingBackend::new();
        let slot = SingletonSlot::new();
        let hooks = ReloadHooks::new();
        let mut p = pipeline(&mut backend, slot.clone(), hooks.clone());
        p.enable(&mut backend);
        p.tick(&mut backend, frame(0.0));

        p.disable(&mut backend);
        assert_eq!(p.state(), Lifecycle::Disabled);
        assert_eq!(backend.live_buffer_count(), 0);
        assert_eq!(backend.live_texture_count(), 0);
        assert_eq!(slot.holder(), None);
        assert_eq!(hooks.subscriber_count(), 0);
        assert_eq!(p.tick(&mut backend, frame(0.1)), TickOutcome::Inactive);
    }

    #[test]
    fn test_second_pipeline_tolerated() {
        let mut backend = RecordingBackend::new();
        let slot = SingletonSlot::new();
        let mut a = pipeline(&mut backend, slot.clone(), ReloadHooks::new());
        let mut b = pipeline(&mut backend, slot.clone(), ReloadHooks::new());
        a.enable(&mut backend);
        b.enable(&mut backend);

        assert!(a.holds_singleton());
        assert!(!b.holds_singleton());
        assert!(matches!(a.tick(&mut backend, frame(0.0)), TickOutcome::Drawn(_)));
        assert!(matches!(b.tick(&mut backend, frame(0.0)), TickOutcome::Drawn(_)));

        // Disabling the non-holder leaves the slot alone
        b.disable(&mut backend);
        assert_eq!(slot.holder(), Some(a.id()));
    }

    #[test]
    fn test_reload_hook_disables() {
        let mut backend = RecordingBackend::new();
        let hooks = ReloadHooks::new();
        let mut p = pipeline(&mut backend, SingletonSlot::new(), hooks.clone());
        p.enable(&mut backend);
        hooks.fire();
        assert_eq!(p.tick(&mut backend, frame(0.0)), TickOutcome::Reloaded);
        assert_eq!(p.state(), Lifecycle::Disabled);
    }

    #[test]
    fn test_prepare_reload_releases_without_tick() {
        let mut backend = RecordingBackend::new();
        let hooks = ReloadHooks::new();
        let slot = SingletonSlot::new();
        let mut a = pipeline(&mut backend, slot.clone(), hooks.clone());
        let mut b = pipeline(&mut backend, slot.clone(), hooks.clone());
        a.enable(&mut backend);
        b.enable(&mut backend);
        a.tick(&mut backend, frame(0.0));
        assert!(backend.live_buffer_count() > 0);

        let disabled = prepare_reload(&hooks, &mut backend, &mut [&mut a, &mut b]);
        assert_eq!(disabled, 2);
        assert_eq!(backend.live_buffer_count(), 0);
        assert_eq!(backend.live_texture_count(), 0);
        assert_eq!(a.state(), Lifecycle::Disabled);
        assert!(!b.is_subscribed());
        assert_eq!(slot.holder(), None);
        assert_eq!(hooks.subscriber_count(), 0);
    }

    #[test]
    fn test_reenable_after_disable() {
        let mut backend = RecordingBackend::new();
        let mut p = ready(&mut backend);
        p.enable(&mut backend);
        p.tick(&mut backend, frame(0.0));
        p.disable(&mut backend);
        p.enable(&mut backend);
        assert!(p.is_first_frame());
        assert_eq!(
            p.tick(&mut backend, frame(1.0)),
            TickOutcome::Drawn(Placement::Dispatched { initial: true, groups: 16 })
        );
    }

    #[test]
    fn test_retarget_to_blocker() {
        let mut backend = RecordingBackend::new();
        let mut p = ready(&mut backend);
        p.enable(&mut backend);
        let (id, _) = p.scene().surfaces.iter().next().unwrap();
        backend.clear_events();

        let new_id = p.retarget_surface(&mut backend, id, -1).unwrap();
        assert_ne!(id, new_id);
        assert!(p.scene().surfaces.get(new_id).unwrap().is_blocker());
        assert!(!p.encoder().commands().iter().any(|c| matches!(
            c,
            EncodeCommand::DrawRenderer { pass, .. } if *pass == PASS_SURFACE_LUT
        )));
        // Forced render and initial placement
        assert_eq!(backend.count(|e| matches!(e, Event::Flush)), 1);
        assert_eq!(backend.dispatches().len(), 1);
        let state = backend.last_vector(GLOBAL_STATE).unwrap();
        assert_eq!(state.x, 1.0);
        assert_eq!(state.y, 0.0, "material count term ignores blockers");
    }

    #[test]
    fn test_blockers_leave_material_count_term() {
        let mut backend = RecordingBackend::new();
        let mut p = ready(&mut backend);
        let config = p.configuration_mut().unwrap();
        config.surface_materials.push(Some(SurfaceMaterial::new("clover")));
        config.validate();
        let expected = (p.configuration().unwrap().material_count() - 1) as f32;

        p.enable(&mut backend);
        p.tick(&mut backend, frame(0.0));
        assert_eq!(backend.last_vector(GLOBAL_STATE).unwrap().y, expected);

        p.scene_mut().surfaces.add(Surface::new(RendererHandle(901), -1));
        p.tick(&mut backend, frame(0.1));
        assert_eq!(backend.last_vector(GLOBAL_STATE).unwrap().y, expected);

        let (id, _) = p.scene().surfaces.iter().next().unwrap();
        p.retarget_surface(&mut backend, id, -1).unwrap();
        assert_eq!(backend.last_vector(GLOBAL_STATE).unwrap().y, expected);
        p.tick(&mut backend, frame(0.2));
        assert_eq!(backend.globals().vector(GLOBAL_STATE).unwrap().y, expected);
    }

    #[test]
    fn test_reinitialize_places_without_render() {
        let mut backend = RecordingBackend::new();
        let mut p = ready(&mut backend);
        p.enable(&mut backend);
        backend.clear_events();

        let placement = p.reinitialize(&mut backend).unwrap();
        assert_eq!(placement, Placement::Dispatched { initial: true, groups: 16 });
        assert!(backend.encodes().is_empty());
        assert_eq!(backend.count(|e| matches!(e, Event::ReplaceData { .. })), 1);
    }

    #[test]
    fn test_missing_kernel_still_draws() {
        let mut backend = RecordingBackend::without_kernels();
        let mut p = ready(&mut backend);
        p.enable(&mut backend);
        assert_eq!(p.tick(&mut backend, frame(0.0)), TickOutcome::Drawn(Placement::KernelMissing));
        assert_eq!(backend.draws().len(), 1);
        assert!(backend.dispatches().is_empty());
    }

    #[test]
    fn test_timings_cleared_each_tick() {
        let mut backend = RecordingBackend::new();
        let mut p = ready(&mut backend);
        p.settings_mut().measure_execution_time = true;
        p.enable(&mut backend);
        p.tick(&mut backend, frame(0.0));
        assert_eq!(p.timings().len(), 2);
        p.tick(&mut backend, frame(0.1));
        assert_eq!(p.timings().len(), 2);
    }
}
