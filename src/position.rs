//! 2-D Euclidean position and the station-placement helper.
//!
//! The donor crate carries a much larger geometry module (obstacles,
//! segment intersection) for its map rendering; this domain has no
//! obstacles, so only distance and disc sampling survive, in the donor's
//! plain free-function style (`geometry.rs`).

use crate::rng::Mt19937;

#[derive(Debug, Clone, Copy, PartialEq, Default)]
pub struct Position {
    pub x: f64,
    pub y: f64,
}

impl Position {
    pub fn new(x: f64, y: f64) -> Self {
        Position { x, y }
    }

    pub fn distance(&self, other: &Position) -> f64 {
        ((self.x - other.x).powi(2) + (self.y - other.y).powi(2)).sqrt()
    }
}

/// Uniformly samples a point within a disc of the given radius centered at
/// the origin, used to place mobile stations around an access point.
pub fn sample_in_disc(radius: f64, rng: &mut Mt19937) -> Position {
    let r = radius * rng.uniform01().sqrt();
    let theta = rng.uniform(0.0, 2.0 * std::f64::consts::PI);
    Position::new(r * theta.cos(), r * theta.sin())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn distance_between_identical_points_is_zero() {
        let p = Position::new(3.0, 4.0);
        assert_eq!(p.distance(&p), 0.0);
    }

    #[test]
    fn distance_matches_pythagoras() {
        let a = Position::new(0.0, 0.0);
        let b = Position::new(3.0, 4.0);
        assert!((a.distance(&b) - 5.0).abs() < 1e-12);
    }

    #[test]
    fn sampled_points_stay_within_radius() {
        let mut rng = Mt19937::new(11);
        let origin = Position::new(0.0, 0.0);
        for _ in 0..500 {
            let p = sample_in_disc(10.0, &mut rng);
            assert!(origin.distance(&p) <= 10.0 + 1e-9);
        }
    }
}
