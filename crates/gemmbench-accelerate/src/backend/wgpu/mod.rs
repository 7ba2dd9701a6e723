pub mod bindings;
pub mod compiler;
pub mod config;
pub mod context;
pub mod dispatch;
pub mod fence;
pub mod kernel;
pub mod layout;
pub mod metrics;
pub mod params;
pub mod pipelines;
pub mod readback;
pub mod shaders;
