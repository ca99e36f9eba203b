//! GPU placer: the compute dispatch that fills the instance buffer.
//!
//! Reads the depth-normal and biome targets plus the LUT. A placement is
//! "initial" when requested or when the LUT changed since the last one; an
//! initial placement repopulates every instance from scratch, otherwise the
//! kernel moves instances incrementally and dithers them by the lag jitter.

use std::time::{Duration, Instant};

use glam::Vec3;
use rand::Rng;

use crate::core::time::FrameTime;
use crate::core::{Error, Result};
use crate::grass::encoder::Encoder;
use crate::grass::params::{
    self, PerfInfo, PlacerParams, GLOBAL_INSTANCES, GLOBAL_SURFACE_LUT, KEYWORD_ENCODED_COLOR,
    KEYWORD_RANDOM_HSV, KEYWORD_REVERSED_Z, PLACER_BIOME_MAP, PLACER_ENCODED_MAP, PLACER_KERNEL,
    PLACER_PROGRAM,
};
use crate::grass::settings::{ColorMode, PipelineSettings};
use crate::render::backend::{BufferHandle, DepthConvention, GpuBackend, KernelInfo, TextureHandle};

/// Upper bound of the per-pipeline time seed
pub const SEED_RANGE: f32 = 100.0;

/// Named CPU timing sample
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct TimeSample {
    pub name: &'static str,
    pub elapsed: Duration,
}

/// Kernel lookup state
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
enum KernelState {
    #[default]
    Unresolved,
    Resolved(KernelInfo),
    /// Lookup failed; dispatch stays disabled until [`Placer::reset`]
    Missing,
}

/// Result of one placement call
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum Placement {
    /// Placement is paused; the instance buffer is left as is
    Paused,
    /// The kernel could not be resolved; nothing was dispatched
    KernelMissing,
    Dispatched { initial: bool, groups: u32 },
}

/// Everything a placement reads besides the placer's own state
#[derive(Clone, Copy, Debug)]
pub struct PlacementInputs<'a> {
    pub settings: &'a PipelineSettings,
    pub instances: BufferHandle,
    pub depth_normals: TextureHandle,
    pub biome: TextureHandle,
    pub lut: TextureHandle,
    /// Cull anchor's transformed encoder offset
    pub cull_point: Vec3,
    pub cull_distance: f32,
    pub instance_count: u32,
    pub material_count: usize,
    pub gradient_resolution: u32,
    pub time: FrameTime,
}

#[derive(Debug, Default)]
pub struct Placer {
    seed: Option<f32>,
    last_lut: Option<TextureHandle>,
    kernel: KernelState,
    timings: Vec<TimeSample>,
}

impl Placer {
    pub fn new() -> Self {
        Self::default()
    }

    /// Placer with a fixed time seed
    pub fn with_seed(seed: f32) -> Self {
        Self { seed: Some(seed), ..Self::default() }
    }

    /// Time seed, drawn once on first use
    pub fn seed(&mut self) -> f32 {
        *self
            .seed
            .get_or_insert_with(|| rand::thread_rng().gen_range(0.0..SEED_RANGE))
    }

    /// LUT bound by the last placement
    pub fn last_lut(&self) -> Option<TextureHandle> {
        self.last_lut
    }

    /// Whether a placement with `initial` would repopulate from scratch
    pub fn is_effective_initial(&self, initial: bool, lut: TextureHandle) -> bool {
        initial || self.last_lut != Some(lut)
    }

    pub fn timings(&self) -> &[TimeSample] {
        &self.timings
    }

    pub fn clear_timings(&mut self) {
        self.timings.clear();
    }

    /// Forget the kernel lookup and last LUT, re-enabling dispatch
    pub fn reset(&mut self) {
        self.kernel = KernelState::Unresolved;
        self.last_lut = None;
        self.timings.clear();
    }

    /// Run one placement.
    ///
    /// With `can_render` set, an initial placement first renders and flushes
    /// the encoder so the kernel never reads stale targets.
    pub fn place(
        &mut self,
        backend: &mut dyn GpuBackend,
        encoder: &mut Encoder,
        inputs: &PlacementInputs<'_>,
        initial: bool,
        can_render: bool,
    ) -> Result<Placement> {
        let settings = inputs.settings;
        if settings.pause_encoder {
            return Ok(Placement::Paused);
        }

        let setup_start = Instant::now();

        let initial = self.is_effective_initial(initial, inputs.lut);

        // Initial placements hold the seed so repeated repopulation doesn't pop
        let mut time = self.seed();
        if !initial {
            time += inputs.time.elapsed;
        }

        if initial && can_render {
            encoder.render(backend, true)?;
        }

        let params = PlacerParams {
            cull_ref: PlacerParams::cull_ref(inputs.cull_point, inputs.cull_distance),
            encode_info: PlacerParams::encode_info(
                settings.encoder_near,
                settings.encoder_far,
                encoder.anchor().y,
                time,
            ),
            state: params::state_vector(
                initial,
                inputs.material_count,
                inputs.gradient_resolution,
                inputs.instance_count as i32,
            ),
            perf: PerfInfo::new(
                inputs.time.delta,
                settings.lag_min_fps,
                settings.lag_comp_min,
                settings.lag_comp_max,
            ),
        };

        let reversed = backend.depth_convention() == DepthConvention::Reversed;
        backend.set_keyword(PLACER_PROGRAM, KEYWORD_REVERSED_Z, reversed);
        let encoded = settings.color_mode == ColorMode::EncodedColor;
        backend.set_keyword(PLACER_PROGRAM, KEYWORD_ENCODED_COLOR, encoded);
        backend.set_keyword(PLACER_PROGRAM, KEYWORD_RANDOM_HSV, !encoded);

        let Some(kernel) = self.resolve_kernel(backend) else {
            return Ok(Placement::KernelMissing);
        };

        for (name, value) in params.vectors() {
            backend.set_compute_vector(PLACER_PROGRAM, name, value);
        }
        backend.set_compute_buffer(PLACER_PROGRAM, kernel.index, GLOBAL_INSTANCES, inputs.instances);
        backend.set_compute_texture(PLACER_PROGRAM, kernel.index, PLACER_ENCODED_MAP, inputs.depth_normals);
        backend.set_compute_texture(PLACER_PROGRAM, kernel.index, PLACER_BIOME_MAP, inputs.biome);
        backend.set_compute_texture(PLACER_PROGRAM, kernel.index, GLOBAL_SURFACE_LUT, inputs.lut);

        self.last_lut = Some(inputs.lut);
        self.record(settings, "placement setup", setup_start);

        let dispatch_start = Instant::now();
        let groups = inputs.instance_count.div_ceil(kernel.thread_group_width.max(1));
        backend.dispatch(PLACER_PROGRAM, kernel.index, [groups, 1, 1])?;
        self.record(settings, "placement dispatch", dispatch_start);

        Ok(Placement::Dispatched { initial, groups })
    }

    fn resolve_kernel(&mut self, backend: &mut dyn GpuBackend) -> Option<KernelInfo> {
        match self.kernel {
            KernelState::Resolved(info) => Some(info),
            KernelState::Missing => None,
            KernelState::Unresolved => match backend.find_kernel(PLACER_PROGRAM, PLACER_KERNEL) {
                Some(info) => {
                    self.kernel = KernelState::Resolved(info);
                    Some(info)
                }
                None => {
                    let err = Error::KernelNotFound(format!("{PLACER_PROGRAM}::{PLACER_KERNEL}"));
                    log::error!("{err}; grass placement disabled until the pipeline is rebuilt");
                    self.kernel = KernelState::Missing;
                    None
                }
            },
        }
    }

    fn record(&mut self, settings: &PipelineSettings, name: &'static str, start: Instant) {
        if settings.measure_execution_time {
            self.timings.push(TimeSample { name, elapsed: start.elapsed() });
        }
    }
}
