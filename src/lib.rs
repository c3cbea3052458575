// #![deny(missing_docs)]

//! Content-aware width reduction for RGB8 images.
//!
//! The engine scores every pixel (luma + Sobel), finds the cheapest
//! top-to-bottom seam, cuts it out, and repeats until the image is as
//! narrow as asked.

pub mod errors;
pub use errors::CarveError;

pub mod twodmap;
pub use twodmap::{EnergyMap, TwoDimensionalMap};

pub mod energy;
pub use energy::{calculate_energy, CpuEnergy, EnergyBackend, CHANNELS};

#[cfg(feature = "gpu")]
pub mod gpu;
#[cfg(feature = "gpu")]
pub use gpu::GpuEnergy;

pub mod seamfinder;
pub use seamfinder::{find_seam, seam_cost, Algorithm, Dynamic, Greedy, Seam, SeamFinder};

pub mod progress;
pub use progress::Progress;

pub mod seamcarver;
pub use seamcarver::{carve_image, reduce_width, remove_seam, Carved, SeamCarver};

pub mod config;
pub use config::{BackendKind, CarveConfig, ShaderPaths};

pub mod dump;
pub use dump::energy_to_image;
