//! GPU grass placement.
//!
//! A top-down auxiliary camera encodes walkable surfaces, blockers and
//! obstacle displacement into three render targets around a cull anchor.
//! A compute kernel scatters grass instances over the encoded area, and a
//! single indirect instanced draw renders them. [`GrassPipeline`] drives
//! the whole loop once per frame.

pub mod config;
pub mod encoder;
pub mod gradient;
pub mod indirect;
pub mod instance;
pub mod lifecycle;
pub mod lut;
pub mod material;
pub mod obstacle;
pub mod params;
pub mod pipeline;
pub mod placer;
pub mod platform;
pub mod registry;
pub mod settings;
pub mod surface;

pub use config::Configuration;
pub use encoder::{Encoder, EncoderTargets};
pub use gradient::{Gradient, GradientMode};
pub use indirect::{DrawArgs, IndirectDrawAssembler};
pub use instance::GrassInstance;
pub use lifecycle::{Lifecycle, PipelineId, ReloadHooks, SingletonSlot};
pub use lut::{LutImage, SurfaceMaterialLut};
pub use material::SurfaceMaterial;
pub use obstacle::{AlignMode, Obstacle};
pub use pipeline::{prepare_reload, GrassPipeline, SkipReason, TickOutcome};
pub use placer::{Placement, Placer};
pub use platform::{Platform, PlatformProfile};
pub use registry::{EntityId, ObstacleId, Registry, SceneRegistry, SurfaceId};
pub use settings::{ColorMode, EncoderPrecision, PipelineSettings};
pub use surface::Surface;
