// This Source Code Form is subject to the terms of the Mozilla Public
// License, v. 2.0. If a copy of the MPL was not distributed with this
// file, You can obtain one at http://mozilla.org/MPL/2.0/.

//! Find a vertical seam in an energy map.
//!
//! A seam is one x-coordinate per row, top to bottom, with neighbouring
//! rows never more than one column apart.  Two finders are provided:
//! a greedy walk that only ever looks at the three pixels below it,
//! and the dynamic program that finds the globally cheapest seam.
//!
//! Both resolve ties the same way: the straight path wins, then the
//! left neighbour, then the right.  A candidate only displaces the
//! current choice if it is strictly cheaper, so the output is fully
//! determined by the energy map.

use crate::errors::CarveError;
use crate::twodmap::{EnergyMap, TwoDimensionalMap};
use std::fmt;
use std::str::FromStr;

/// One column index per row of the image the seam was found in.
pub type Seam = Vec<u32>;

/// Which seam finder a reduction uses.  Chosen once per run.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum Algorithm {
    /// Locally optimal, O(height) extra space.
    #[default]
    Greedy,
    /// Globally optimal, O(width * height) extra space.
    Dynamic,
}

impl Algorithm {
    /// The finder that implements this choice.
    pub fn finder(self) -> &'static dyn SeamFinder {
        match self {
            Algorithm::Greedy => &Greedy,
            Algorithm::Dynamic => &Dynamic,
        }
    }
}

impl fmt::Display for Algorithm {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Algorithm::Greedy => write!(f, "greedy"),
            Algorithm::Dynamic => write!(f, "dynamic"),
        }
    }
}

impl FromStr for Algorithm {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_ascii_lowercase().as_str() {
            "greedy" => Ok(Algorithm::Greedy),
            "dynamic" | "dp" => Ok(Algorithm::Dynamic),
            other => Err(format!("unknown seam algorithm '{}'", other)),
        }
    }
}

/// This trait defines how we get seams out of an energy map.  It's a
/// primitive interface, just enough to make room for multiple seam
/// finders.
pub trait SeamFinder {
    /// Return the top-to-bottom seam this finder prefers.  Fails only
    /// on an empty map.
    fn find_vertical_seam(&self, energy: &EnergyMap) -> Result<Seam, CarveError>;
}

/// Find a seam with the chosen algorithm.
pub fn find_seam(energy: &EnergyMap, algorithm: Algorithm) -> Result<Seam, CarveError> {
    algorithm.finder().find_vertical_seam(energy)
}

/// The total energy along a seam.
pub fn seam_cost(energy: &EnergyMap, seam: &[u32]) -> f32 {
    seam.iter()
        .enumerate()
        .map(|(y, x)| energy[(*x, y as u32)])
        .sum()
}

fn check_dimensions(energy: &EnergyMap) -> Result<(), CarveError> {
    if energy.width < 1 || energy.height < 1 {
        return Err(CarveError::DegenerateImage {
            width: energy.width,
            height: energy.height,
        });
    }
    Ok(())
}

// Index of the smallest value; the first one wins a tie.
fn first_minimum(row: &[f32]) -> u32 {
    let mut best = 0;
    for (x, e) in row.iter().enumerate().skip(1) {
        if *e < row[best] {
            best = x;
        }
    }
    best as u32
}

// Of x and its two neighbours in `row`, the cheapest: straight first,
// then left, then right, each replacing only if strictly smaller.
fn cheapest_neighbour(row: &[f32], x: u32) -> u32 {
    let x = x as usize;
    let mut best = x;
    if x > 0 && row[x - 1] < row[best] {
        best = x - 1;
    }
    if x + 1 < row.len() && row[x + 1] < row[best] {
        best = x + 1;
    }
    best as u32
}

/// Start at the cheapest pixel of the top row and walk down, always
/// stepping to the cheapest of the three pixels below.
#[derive(Debug, Default, Clone, Copy)]
pub struct Greedy;

impl SeamFinder for Greedy {
    fn find_vertical_seam(&self, energy: &EnergyMap) -> Result<Seam, CarveError> {
        check_dimensions(energy)?;
        let mut seam = Vec::with_capacity(energy.height as usize);
        let mut x = first_minimum(energy.row(0));
        seam.push(x);
        for y in 1..energy.height {
            x = cheapest_neighbour(energy.row(y), x);
            seam.push(x);
        }
        Ok(seam)
    }
}

/// The classic cumulative-cost program.  Only two rows of costs are
/// kept; the choice made for every pixel goes into a backtrack table
/// that is walked from the cheapest bottom pixel back up.
#[derive(Debug, Default, Clone, Copy)]
pub struct Dynamic;

impl SeamFinder for Dynamic {
    fn find_vertical_seam(&self, energy: &EnergyMap) -> Result<Seam, CarveError> {
        check_dimensions(energy)?;
        let (width, height) = (energy.width, energy.height);

        let mut parents: TwoDimensionalMap<u32> = TwoDimensionalMap::new(width, height);
        let mut previous: Vec<f32> = energy.row(0).to_vec();
        let mut current: Vec<f32> = vec![0.0; width as usize];

        // For every subsequent row, the cost of a pixel is its own
        // energy plus the cheapest of the (up to) three costs above it.
        for y in 1..height {
            for (x, erg) in energy.row(y).iter().enumerate() {
                let parent = cheapest_neighbour(&previous, x as u32);
                current[x] = erg + previous[parent as usize];
                parents[(x as u32, y)] = parent;
            }
            std::mem::swap(&mut previous, &mut current);
        }

        // `previous` now holds the bottom row's totals.  Working
        // backwards from its cheapest pixel, follow the parents up and
        // reverse.
        let mut seam_col = first_minimum(&previous);
        let mut seam: Seam = (1..height)
            .rev()
            .fold(Vec::with_capacity(height as usize), |mut acc, y| {
                acc.push(seam_col);
                seam_col = parents[(seam_col, y)];
                acc
            });
        seam.push(seam_col);
        seam.reverse();
        Ok(seam)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    const ENERGY_ROWS: [[f32; 4]; 3] = [[9.0, 1.0, 9.0, 9.0], [9.0, 9.0, 1.0, 9.0], [9.0, 1.0, 9.0, 9.0]];

    // Five wide, four tall.  The greedy walk gets trapped by the cheap
    // pixel at the top left; the full program finds the cheap column
    // on the right.
    const TRAP: [f32; 20] = [
        0.0, 5.0, 5.0, 5.0, 5.0, //
        9.0, 9.0, 5.0, 1.0, 9.0, //
        9.0, 9.0, 9.0, 1.0, 9.0, //
        9.0, 9.0, 9.0, 0.0, 9.0, //
    ];

    fn map(rows: &[[f32; 4]]) -> EnergyMap {
        EnergyMap::from_rows(rows).unwrap()
    }

    fn is_connected(seam: &[u32], width: u32) -> bool {
        seam.iter().all(|x| *x < width) && seam.windows(2).all(|w| (w[0] as i64 - w[1] as i64).abs() <= 1)
    }

    #[test]
    fn greedy_follows_the_cheap_zigzag() {
        let energy = map(&ENERGY_ROWS);
        assert_eq!(Greedy.find_vertical_seam(&energy).unwrap(), vec![1, 2, 1]);
    }

    #[test]
    fn dynamic_finds_the_global_minimum() {
        let energy = map(&ENERGY_ROWS);
        let seam = Dynamic.find_vertical_seam(&energy).unwrap();
        assert_eq!(seam, vec![1, 2, 1]);
        assert_eq!(seam_cost(&energy, &seam), 3.0);
    }

    #[test]
    fn dynamic_escapes_the_greedy_trap() {
        let energy = EnergyMap::from_raw(5, 4, TRAP.to_vec()).unwrap();
        let greedy = find_seam(&energy, Algorithm::Greedy).unwrap();
        let dynamic = find_seam(&energy, Algorithm::Dynamic).unwrap();
        assert_eq!(greedy, vec![0, 0, 0, 0]);
        assert_eq!(seam_cost(&energy, &greedy), 27.0);
        assert_eq!(dynamic, vec![3, 3, 3, 3]);
        assert_eq!(seam_cost(&energy, &dynamic), 7.0);
    }

    #[test]
    fn ties_prefer_straight_then_left() {
        // Everything costs the same: both finders go straight down the
        // first column.
        let flat = EnergyMap::from_raw(4, 3, vec![2.0; 12]).unwrap();
        assert_eq!(Greedy.find_vertical_seam(&flat).unwrap(), vec![0, 0, 0]);
        assert_eq!(Dynamic.find_vertical_seam(&flat).unwrap(), vec![0, 0, 0]);

        // Equal left and right neighbours below a dearer straight path:
        // left wins.
        let energy = map(&[[5.0, 5.0, 0.0, 5.0], [5.0, 1.0, 9.0, 1.0], [0.0, 0.0, 0.0, 0.0]]);
        assert_eq!(Greedy.find_vertical_seam(&energy).unwrap(), vec![2, 1, 1]);
    }

    #[test]
    fn single_column_and_single_row() {
        let column = EnergyMap::from_raw(1, 4, vec![3.0, 1.0, 4.0, 1.0]).unwrap();
        assert_eq!(Greedy.find_vertical_seam(&column).unwrap(), vec![0; 4]);
        assert_eq!(Dynamic.find_vertical_seam(&column).unwrap(), vec![0; 4]);

        let row = EnergyMap::from_raw(4, 1, vec![3.0, 1.0, 4.0, 1.0]).unwrap();
        assert_eq!(Greedy.find_vertical_seam(&row).unwrap(), vec![1]);
        assert_eq!(Dynamic.find_vertical_seam(&row).unwrap(), vec![1]);
    }

    #[test]
    fn empty_maps_are_rejected() {
        let empty = EnergyMap::new(0, 3);
        assert_eq!(
            find_seam(&empty, Algorithm::Greedy),
            Err(CarveError::DegenerateImage { width: 0, height: 3 })
        );
        let empty = EnergyMap::new(3, 0);
        assert!(find_seam(&empty, Algorithm::Dynamic).is_err());
    }

    #[test]
    fn seams_are_valid_and_dynamic_is_never_worse() {
        // A deterministic pseudo-random field.
        let (width, height) = (17u32, 11u32);
        let mut state = 0x2545_f491u32;
        let data: Vec<f32> = (0..width * height)
            .map(|_| {
                state ^= state << 13;
                state ^= state >> 17;
                state ^= state << 5;
                (state % 1000) as f32
            })
            .collect();
        let energy = EnergyMap::from_raw(width, height, data).unwrap();

        let greedy = find_seam(&energy, Algorithm::Greedy).unwrap();
        let dynamic = find_seam(&energy, Algorithm::Dynamic).unwrap();
        for seam in &[&greedy, &dynamic] {
            assert_eq!(seam.len(), height as usize);
            assert!(is_connected(seam, width));
        }
        assert!(seam_cost(&energy, &dynamic) <= seam_cost(&energy, &greedy));
    }

    #[test]
    fn algorithm_names_round_trip() {
        assert_eq!("greedy".parse::<Algorithm>(), Ok(Algorithm::Greedy));
        assert_eq!("Dynamic".parse::<Algorithm>(), Ok(Algorithm::Dynamic));
        assert!("astar".parse::<Algorithm>().is_err());
        assert_eq!(Algorithm::Dynamic.to_string(), "dynamic");
        assert_eq!(Algorithm::default(), Algorithm::Greedy);
    }
}
