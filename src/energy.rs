// This Source Code Form is subject to the terms of the Mozilla Public
// License, v. 2.0. If a copy of the MPL was not distributed with this
// file, You can obtain one at http://mozilla.org/MPL/2.0/.

//! Calculate the energy of an image
//!
//! Given an RGB8 buffer, calculate the energy map: the luminance of
//! every pixel run through the 3x3 Sobel operator, with the gradient
//! magnitude as the score.  Pixels on the border of the image have no
//! full 3x3 neighbourhood and are scored zero.  That skews removal
//! toward the image edges over time.
//!
//! Two backends implement the same contract: [`CpuEnergy`] here, the
//! reference, and `GpuEnergy` (feature `gpu`), which must agree with it
//! within floating point tolerance.

use crate::errors::{check_buffer, CarveError};
use crate::twodmap::EnergyMap;
use itertools::iproduct;
use log::debug;
use std::ops::Range;
use std::time::Instant;

/// The only channel count the engine accepts: interleaved R, G, B.
pub const CHANNELS: u8 = 3;

/// Something that can turn a pixel buffer into an energy map.
///
/// Calls take `&mut self` because an accelerated backend owns device
/// state that each call rewrites; a backend is used by one owner at a
/// time.  Wrap it in a `Mutex` if it must be shared.
pub trait EnergyBackend {
    /// Score every pixel of a `width` x `height` buffer.  Fails with
    /// `UnsupportedFormat` for anything but 3 channels, and with
    /// `BackendNotReady` if the backend needs a setup step that hasn't
    /// succeeded.
    fn compute_energy(
        &mut self,
        pixels: &[u8],
        width: u32,
        height: u32,
        channels: u8,
    ) -> Result<EnergyMap, CarveError>;

    /// Short name, for logs.
    fn name(&self) -> &'static str;
}

impl<B: EnergyBackend + ?Sized> EnergyBackend for Box<B> {
    fn compute_energy(
        &mut self,
        pixels: &[u8],
        width: u32,
        height: u32,
        channels: u8,
    ) -> Result<EnergyMap, CarveError> {
        (**self).compute_energy(pixels, width, height, channels)
    }

    fn name(&self) -> &'static str {
        (**self).name()
    }
}

/// Rec. 601 luma of one RGB pixel, on the 0..=255 scale.
#[inline]
pub fn luminance(rgb: &[u8]) -> f32 {
    0.299 * f32::from(rgb[0]) + 0.587 * f32::from(rgb[1]) + 0.114 * f32::from(rgb[2])
}

// Sobel at (x, y) over the luma field.  Everything on the outermost
// ring of the image is zero.
//
//      Gx = [-1 0 1]     Gy = [-1 -2 -1]
//           [-2 0 2]          [ 0  0  0]
//           [-1 0 1]          [ 1  2  1]
#[inline]
fn sobel_at(luma: &[f32], width: usize, height: usize, x: usize, y: usize) -> f32 {
    if x == 0 || y == 0 || x + 1 >= width || y + 1 >= height {
        return 0.0;
    }
    let up = &luma[(y - 1) * width..y * width];
    let mid = &luma[y * width..(y + 1) * width];
    let down = &luma[(y + 1) * width..(y + 2) * width];

    let gx = (up[x + 1] + 2.0 * mid[x + 1] + down[x + 1]) - (up[x - 1] + 2.0 * mid[x - 1] + down[x - 1]);
    let gy = (down[x - 1] + 2.0 * down[x] + down[x + 1]) - (up[x - 1] + 2.0 * up[x] + up[x + 1]);
    (gx * gx + gy * gy).sqrt()
}

// Fill `out`, which holds exactly the rows in `rows`, with energies.
fn sobel_band(luma: &[f32], width: usize, height: usize, rows: Range<usize>, out: &mut [f32]) {
    let first = rows.start;
    for (y, x) in iproduct!(rows, 0..width) {
        out[(y - first) * width + x] = sobel_at(luma, width, height, x, y);
    }
}

#[cfg(not(feature = "threaded"))]
fn sobel(luma: &[f32], width: usize, height: usize, out: &mut [f32]) {
    sobel_band(luma, width, height, 0..height, out);
}

// Every pixel depends only on the (read-only) luma field, so the
// output can be broken into row bands with chunks_mut and each band
// handed to its own thread.  The per-pixel arithmetic is the same as
// the sequential pass, so the results are bit-identical.
#[cfg(feature = "threaded")]
fn sobel(luma: &[f32], width: usize, height: usize, out: &mut [f32]) {
    if width == 0 || height == 0 {
        return;
    }
    let threads = num_cpus::get().max(1);
    let band = (height + threads - 1) / threads;
    let scoped = crossbeam::scope(|s| {
        for (i, chunk) in out.chunks_mut(band * width).enumerate() {
            let start = i * band;
            let rows = start..start + chunk.len() / width;
            s.spawn(move |_| sobel_band(luma, width, height, rows, chunk));
        }
    });
    if let Err(panic) = scoped {
        std::panic::resume_unwind(panic);
    }
}

/// Compute the energy of every pixel of an RGB8 buffer on the CPU.
/// This is the reference every other backend is measured against.
pub fn calculate_energy(
    pixels: &[u8],
    width: u32,
    height: u32,
    channels: u8,
) -> Result<EnergyMap, CarveError> {
    if channels != CHANNELS {
        return Err(CarveError::UnsupportedFormat { channels });
    }
    check_buffer(pixels, width, height, channels)?;

    let luma: Vec<f32> = pixels.chunks_exact(CHANNELS as usize).map(luminance).collect();
    let mut emap = EnergyMap::new(width, height);
    sobel(&luma, width as usize, height as usize, emap.as_mut_slice());
    Ok(emap)
}

/// The synchronous CPU backend.  It holds no state, so it is safe to
/// use from as many places at once as you like.
#[derive(Debug, Default, Clone, Copy)]
pub struct CpuEnergy;

impl CpuEnergy {
    pub fn new() -> Self {
        CpuEnergy
    }
}

impl EnergyBackend for CpuEnergy {
    fn compute_energy(
        &mut self,
        pixels: &[u8],
        width: u32,
        height: u32,
        channels: u8,
    ) -> Result<EnergyMap, CarveError> {
        let start = Instant::now();
        let emap = calculate_energy(pixels, width, height, channels)?;
        debug!(
            "cpu energy {}x{} in {:.2}ms",
            width,
            height,
            start.elapsed().as_secs_f64() * 1000.0
        );
        Ok(emap)
    }

    fn name(&self) -> &'static str {
        "cpu"
    }
}
