// This Source Code Form is subject to the terms of the Mozilla Public
// License, v. 2.0. If a copy of the MPL was not distributed with this
// file, You can obtain one at http://mozilla.org/MPL/2.0/.

//! Seamcarve - The main loop
//!
//! The seam remover, and the driver that repeatedly scores the image,
//! finds the cheapest seam and cuts it out until the image is as
//! narrow as asked.

use crate::energy::{CpuEnergy, EnergyBackend, CHANNELS};
use crate::errors::{check_buffer, CarveError};
use crate::progress::{Progress, ProgressTracker};
use crate::seamfinder::{find_seam, Algorithm};
use image::RgbImage;
use log::{debug, info};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::{Duration, Instant};

// Iterations slower than this get a debug line of their own.
const SLOW_ITERATION: Duration = Duration::from_millis(50);

/// Cut one vertical seam out of an interleaved buffer, returning a
/// buffer one pixel narrower.  Every row keeps its pixels in their
/// original order, minus the one at `seam[y]`.
///
/// The seam must have exactly `height` entries, each less than
/// `width`; anything else is an `OutOfBounds` error and nothing is
/// copied.
pub fn remove_seam(
    pixels: &[u8],
    width: u32,
    height: u32,
    channels: u8,
    seam: &[u32],
) -> Result<Vec<u8>, CarveError> {
    if channels == 0 {
        return Err(CarveError::UnsupportedFormat { channels });
    }
    check_buffer(pixels, width, height, channels)?;
    let out_of_bounds = |reason: String| CarveError::OutOfBounds {
        reason,
        width,
        height,
    };
    if seam.len() != height as usize {
        return Err(out_of_bounds(format!(
            "seam has {} entries, expected {}",
            seam.len(),
            height
        )));
    }
    if let Some((y, x)) = seam.iter().enumerate().find(|(_, x)| **x >= width) {
        return Err(out_of_bounds(format!("column {} in row {}", x, y)));
    }

    let stride = width as usize * channels as usize;
    let pixel = channels as usize;
    let mut carved = Vec::with_capacity(stride.saturating_sub(pixel) * height as usize);
    if stride == 0 {
        return Ok(carved);
    }
    for (row, cut) in pixels.chunks_exact(stride).zip(seam) {
        let cut = *cut as usize * pixel;
        carved.extend_from_slice(&row[..cut]);
        carved.extend_from_slice(&row[cut + pixel..]);
    }
    Ok(carved)
}

/// The output of a reduction: the narrowed pixels and their width.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Carved {
    pub pixels: Vec<u8>,
    pub width: u32,
}

/// Drives a width reduction: one energy backend, one seam algorithm,
/// and optionally a flag another thread can raise to stop the run
/// between seams.
pub struct SeamCarver<B: EnergyBackend> {
    backend: B,
    algorithm: Algorithm,
    cancel: Option<Arc<AtomicBool>>,
}

impl SeamCarver<CpuEnergy> {
    /// A carver on the CPU reference backend.
    pub fn cpu(algorithm: Algorithm) -> Self {
        SeamCarver::new(CpuEnergy).with_algorithm(algorithm)
    }
}

impl<B: EnergyBackend> SeamCarver<B> {
    /// Creates a greedy carver around an energy backend.
    pub fn new(backend: B) -> Self {
        SeamCarver {
            backend,
            algorithm: Algorithm::default(),
            cancel: None,
        }
    }

    pub fn with_algorithm(mut self, algorithm: Algorithm) -> Self {
        self.algorithm = algorithm;
        self
    }

    /// The run stops with `Cancelled` at the next seam boundary after
    /// this flag goes true.  A seam is never left half removed.
    pub fn with_cancel_flag(mut self, flag: Arc<AtomicBool>) -> Self {
        self.cancel = Some(flag);
        self
    }

    pub fn algorithm(&self) -> Algorithm {
        self.algorithm
    }

    pub fn backend(&self) -> &B {
        &self.backend
    }

    /// Narrow the image to `target_width` columns.
    pub fn reduce_width(
        &mut self,
        pixels: &[u8],
        width: u32,
        height: u32,
        channels: u8,
        target_width: u32,
    ) -> Result<Carved, CarveError> {
        self.reduce_width_with_progress(pixels, width, height, channels, target_width, |_| {})
    }

    /// As `reduce_width`, also handing `observer` a snapshot every
    /// tenth of the way through and after the final seam.
    pub fn reduce_width_with_progress<F>(
        &mut self,
        pixels: &[u8],
        width: u32,
        height: u32,
        channels: u8,
        target_width: u32,
        mut observer: F,
    ) -> Result<Carved, CarveError>
    where
        F: FnMut(&Progress),
    {
        if channels != CHANNELS {
            return Err(CarveError::UnsupportedFormat { channels });
        }
        check_buffer(pixels, width, height, channels)?;

        if target_width >= width {
            return Ok(Carved {
                pixels: pixels.to_vec(),
                width,
            });
        }
        if target_width == 0 {
            return Err(CarveError::InvalidTarget {
                target: target_width,
            });
        }

        let total = width - target_width;
        let tracker = ProgressTracker::new(total);
        info!(
            "Starting seam carving: removing {} seams from {}x{} image ({}, {} energy)",
            total,
            width,
            height,
            self.algorithm,
            self.backend.name()
        );

        let mut current = pixels.to_vec();
        let mut current_width = width;
        let mut removed = 0;
        while current_width > target_width {
            if let Some(flag) = &self.cancel {
                if flag.load(Ordering::Relaxed) {
                    info!("Seam carving cancelled after {} of {} seams", removed, total);
                    return Err(CarveError::Cancelled { removed });
                }
            }

            let started = Instant::now();
            let energy = self
                .backend
                .compute_energy(&current, current_width, height, channels)?;
            let seam = find_seam(&energy, self.algorithm)?;
            current = remove_seam(&current, current_width, height, channels, &seam)?;
            current_width -= 1;
            removed += 1;

            let took = started.elapsed();
            if took > SLOW_ITERATION {
                debug!(
                    "Slow iteration {} took {}ms (width: {})",
                    removed,
                    took.as_millis(),
                    current_width + 1
                );
            }

            if tracker.should_report(removed) {
                let progress = tracker.snapshot(removed);
                info!(
                    "Progress: {}/{} seams removed ({}% complete) - Avg: {:.1}ms/seam, ETA: {}s",
                    progress.removed,
                    progress.total,
                    progress.percent(),
                    progress.average_per_seam().as_secs_f64() * 1000.0,
                    progress.remaining().as_secs()
                );
                observer(&progress);
            }
        }

        info!(
            "Seam carving completed: final image size {}x{}",
            current_width, height
        );
        Ok(Carved {
            pixels: current,
            width: current_width,
        })
    }
}

/// Narrow an RGB8 buffer on the CPU backend.  Returns the new pixels
/// and the width they have.
pub fn reduce_width(
    pixels: &[u8],
    width: u32,
    height: u32,
    channels: u8,
    target_width: u32,
    algorithm: Algorithm,
) -> Result<(Vec<u8>, u32), CarveError> {
    let carved = SeamCarver::cpu(algorithm).reduce_width(pixels, width, height, channels, target_width)?;
    Ok((carved.pixels, carved.width))
}

/// A convenience wrapper for `image` users: carve an `RgbImage` down to
/// `target_width` on the CPU backend.
pub fn carve_image(
    image: &RgbImage,
    target_width: u32,
    algorithm: Algorithm,
) -> Result<RgbImage, CarveError> {
    let (width, height) = image.dimensions();
    let (pixels, new_width) = reduce_width(image.as_raw(), width, height, CHANNELS, target_width, algorithm)?;
    let expected = new_width as usize * height as usize * CHANNELS as usize;
    let actual = pixels.len();
    RgbImage::from_raw(new_width, height, pixels).ok_or(CarveError::BufferSize { expected, actual })
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::twodmap::EnergyMap;

    // Three rows of four RGB pixels; the pixel value encodes (x, y).
    fn numbered(width: u32, height: u32) -> Vec<u8> {
        (0..height)
            .flat_map(|y| (0..width).flat_map(move |x| [x as u8, y as u8, 100 + x as u8]))
            .collect()
    }

    #[test]
    fn removes_exactly_the_seam_pixels() {
        let pixels = numbered(4, 3);
        let out = remove_seam(&pixels, 4, 3, 3, &[1, 2, 3]).unwrap();
        assert_eq!(out.len(), 3 * 3 * 3);
        #[rustfmt::skip]
        let expected: Vec<u8> = vec![
            0, 0, 100,  2, 0, 102,  3, 0, 103,
            0, 1, 100,  1, 1, 101,  3, 1, 103,
            0, 2, 100,  1, 2, 101,  2, 2, 102,
        ];
        assert_eq!(out, expected);
    }

    #[test]
    fn works_for_any_channel_count() {
        let pixels: Vec<u8> = (0..8).collect();
        let out = remove_seam(&pixels, 2, 2, 2, &[0, 1]).unwrap();
        assert_eq!(out, vec![2, 3, 4, 5]);
    }

    #[test]
    fn malformed_seams_fail_fast() {
        let pixels = numbered(4, 3);
        assert!(matches!(
            remove_seam(&pixels, 4, 3, 3, &[1, 2]),
            Err(CarveError::OutOfBounds { .. })
        ));
        assert!(matches!(
            remove_seam(&pixels, 4, 3, 3, &[1, 4, 0]),
            Err(CarveError::OutOfBounds { .. })
        ));
    }

    #[test]
    fn no_op_returns_a_copy() {
        let pixels = numbered(5, 2);
        let carved = SeamCarver::cpu(Algorithm::Dynamic)
            .reduce_width(&pixels, 5, 2, 3, 9)
            .unwrap();
        assert_eq!(carved.width, 5);
        assert_eq!(carved.pixels, pixels);
    }

    #[test]
    fn zero_target_is_invalid() {
        let pixels = numbered(10, 5);
        assert_eq!(
            reduce_width(&pixels, 10, 5, 3, 0, Algorithm::Greedy),
            Err(CarveError::InvalidTarget { target: 0 })
        );
    }

    #[test]
    fn four_channels_are_rejected() {
        let pixels = vec![0u8; 4 * 4 * 4];
        assert_eq!(
            reduce_width(&pixels, 4, 4, 4, 2, Algorithm::Greedy),
            Err(CarveError::UnsupportedFormat { channels: 4 })
        );
    }

    #[test]
    fn narrows_one_column_per_seam() {
        let pixels = numbered(8, 6);
        let (out, width) = reduce_width(&pixels, 8, 6, 3, 3, Algorithm::Greedy).unwrap();
        assert_eq!(width, 3);
        assert_eq!(out.len(), 3 * 6 * 3);

        let (out, width) = reduce_width(&pixels, 8, 6, 3, 1, Algorithm::Dynamic).unwrap();
        assert_eq!(width, 1);
        assert_eq!(out.len(), 6 * 3);
    }

    // Records how often it was asked for energy, and serves up flat
    // maps so every seam is column zero.
    struct CountingBackend {
        calls: u32,
        widths: Vec<u32>,
    }

    impl EnergyBackend for CountingBackend {
        fn compute_energy(
            &mut self,
            _pixels: &[u8],
            width: u32,
            height: u32,
            _channels: u8,
        ) -> Result<EnergyMap, CarveError> {
            self.calls += 1;
            self.widths.push(width);
            Ok(EnergyMap::new(width, height))
        }

        fn name(&self) -> &'static str {
            "counting"
        }
    }

    #[test]
    fn energy_is_recomputed_for_every_seam() {
        let pixels = numbered(6, 2);
        let mut carver = SeamCarver::new(CountingBackend {
            calls: 0,
            widths: vec![],
        });
        let carved = carver.reduce_width(&pixels, 6, 2, 3, 3).unwrap();
        assert_eq!(carver.backend().calls, 3);
        assert_eq!(carver.backend().widths, vec![6, 5, 4]);
        // Flat energy always cuts the first column.
        assert_eq!(carved.pixels, {
            let mut expected = numbered(6, 2);
            for _ in 0..3 {
                let w = (expected.len() / 6) as u32;
                expected = remove_seam(&expected, w, 2, 3, &[0, 0]).unwrap();
            }
            expected
        });
    }

    struct Broken;

    impl EnergyBackend for Broken {
        fn compute_energy(&mut self, _: &[u8], _: u32, _: u32, _: u8) -> Result<EnergyMap, CarveError> {
            Err(CarveError::BackendNotReady)
        }

        fn name(&self) -> &'static str {
            "broken"
        }
    }

    #[test]
    fn backend_failures_abort_the_run() {
        let pixels = numbered(4, 4);
        let result = SeamCarver::new(Broken).reduce_width(&pixels, 4, 4, 3, 2);
        assert_eq!(result, Err(CarveError::BackendNotReady));
    }

    #[test]
    fn cancellation_is_checked_between_seams() {
        let pixels = numbered(6, 3);
        let flag = Arc::new(AtomicBool::new(false));
        let mut carver = SeamCarver::cpu(Algorithm::Greedy).with_cancel_flag(flag.clone());
        let raised = flag.clone();
        let result = carver.reduce_width_with_progress(&pixels, 6, 3, 3, 1, |p| {
            if p.removed == 2 {
                raised.store(true, Ordering::Relaxed);
            }
        });
        assert_eq!(result, Err(CarveError::Cancelled { removed: 2 }));
    }

    #[test]
    fn progress_reaches_the_end() {
        let pixels = numbered(30, 3);
        let mut seen = vec![];
        SeamCarver::cpu(Algorithm::Dynamic)
            .reduce_width_with_progress(&pixels, 30, 3, 3, 10, |p| seen.push(p.removed))
            .unwrap();
        assert_eq!(seen, vec![2, 4, 6, 8, 10, 12, 14, 16, 18, 20]);
    }

    #[test]
    fn carve_image_keeps_the_height() {
        let img = RgbImage::from_raw(6, 4, numbered(6, 4)).unwrap();
        let carved = carve_image(&img, 4, Algorithm::Dynamic).unwrap();
        assert_eq!(carved.dimensions(), (4, 4));
    }
}
