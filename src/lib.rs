//! # tilesplat: GPU-resident 3D Gaussian Splatting training
//!
//! This crate trains a population of anisotropic 3D Gaussians (position,
//! rotation, scale, opacity, spherical-harmonic color) against reference
//! photographs with known camera poses. The entire hot path runs on the GPU
//! as wgpu compute dispatches:
//!
//! - `core`: host-side data model (Gaussians, cameras, f16 packing, math)
//! - `gpu`: the compute subsystems — tiled forward/backward rasterization,
//!   prefix scan, radix sort, Adam, and the densify/prune compactor
//! - `trainer`: the orchestrator that schedules one iteration's passes and
//!   the densification cycle
//!
//! File loading (PLY/COLMAP/images), interactive cameras, and display
//! compositing are external collaborators: the engine consumes decoded
//! point clouds, camera matrices, and rgba8 target textures, and hands back
//! packed Gaussian buffers plus an optional rendered view.
//!
//! ## Pipeline shape
//!
//! Per training iteration, for one reference view:
//! preprocess → key sort → tile ranges → rasterize → loss → backward
//! rasterize → backward geometry → Adam + repack. On the densification
//! schedule, an error metric is accumulated over several random views and
//! the Gaussian array is rebuilt in place on the GPU (keep/clone/split/
//! prune) with all optimizer state carried along.

// Host-side data model and math
pub mod core;

// Typed error taxonomy
pub mod error;

// Training configuration
pub mod config;

// GPU subsystems
pub mod gpu;

// Orchestrator
pub mod trainer;

// Re-export commonly used types at crate root for convenience
pub use crate::core::{Camera, Gaussian, SceneInit};
pub use config::TrainerConfig;
pub use error::TrainError;
pub use trainer::{TrainStatus, TrainView, Trainer};

/// Library version
pub const VERSION: &str = env!("CARGO_PKG_VERSION");
