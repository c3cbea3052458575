//! Render an energy map as a grayscale picture, mostly for looking at
//! what the carver sees.

use crate::twodmap::EnergyMap;
use image::{GrayImage, Luma};
use num_traits::{clamp, NumCast};

/// Scale the map so its hottest pixel is white.  A map with no energy
/// at all comes out black.
pub fn energy_to_image(energy: &EnergyMap) -> GrayImage {
    let factor = energy.as_slice().iter().cloned().fold(0.0f32, f32::max);
    GrayImage::from_fn(energy.width, energy.height, |x, y| {
        let e = energy[(x, y)];
        let scaled = if factor > 0.0 { e * 255.0 / factor } else { 0.0 };
        let level: u8 = NumCast::from(clamp(scaled.round(), 0.0, 255.0)).unwrap_or(0);
        Luma([level])
    })
}
