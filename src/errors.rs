// This Source Code Form is subject to the terms of the Mozilla Public
// License, v. 2.0. If a copy of the MPL was not distributed with this
// file, You can obtain one at http://mozilla.org/MPL/2.0/.

//! The failures the carving engine can report.
//!
//! Every one of these is terminal for the operation that raised it.
//! Nothing in the engine retries; the computations are deterministic,
//! so a retry would only reproduce the failure.

use failure::Fail;

/// Everything that can go wrong while computing energy, finding a
/// seam, removing one, or driving a whole reduction.
#[derive(Debug, Fail, Clone, PartialEq)]
pub enum CarveError {
    /// The engine only understands interleaved RGB8.
    #[fail(display = "unsupported pixel format: expected 3 channels, got {}", channels)]
    UnsupportedFormat { channels: u8 },

    /// The accelerated backend was used before `initialize` succeeded,
    /// or after `cleanup`.
    #[fail(display = "energy backend is not initialized")]
    BackendNotReady,

    /// Shader compile/link, pipeline, render target or readback failure.
    #[fail(display = "device resource failure: {}", _0)]
    DeviceResourceFailure(String),

    #[fail(display = "invalid target width {}: must be at least 1", target)]
    InvalidTarget { target: u32 },

    /// A seam of the wrong length, or with a column outside the image,
    /// reached the seam remover.
    #[fail(
        display = "seam out of bounds: {} (image is {}x{})",
        reason, width, height
    )]
    OutOfBounds {
        reason: String,
        width: u32,
        height: u32,
    },

    #[fail(
        display = "pixel buffer holds {} bytes, dimensions require {}",
        actual, expected
    )]
    BufferSize { expected: usize, actual: usize },

    #[fail(display = "cannot find a seam in a {}x{} image", width, height)]
    DegenerateImage { width: u32, height: u32 },

    #[fail(display = "reduction cancelled after {} seams", removed)]
    Cancelled { removed: u32 },
}

/// Checks that a buffer really is `width * height * channels` bytes.
pub(crate) fn check_buffer(
    pixels: &[u8],
    width: u32,
    height: u32,
    channels: u8,
) -> Result<(), CarveError> {
    let expected = width as usize * height as usize * channels as usize;
    if pixels.len() != expected {
        return Err(CarveError::BufferSize {
            expected,
            actual: pixels.len(),
        });
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn messages_name_the_problem() {
        let err = CarveError::UnsupportedFormat { channels: 4 };
        assert_eq!(
            err.to_string(),
            "unsupported pixel format: expected 3 channels, got 4"
        );
        let err = CarveError::InvalidTarget { target: 0 };
        assert!(err.to_string().contains("target width 0"));
    }

    #[test]
    fn buffer_check() {
        assert!(check_buffer(&[0; 12], 2, 2, 3).is_ok());
        assert_eq!(
            check_buffer(&[0; 11], 2, 2, 3),
            Err(CarveError::BufferSize {
                expected: 12,
                actual: 11
            })
        );
    }
}
