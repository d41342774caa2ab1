//! Quantized unit directions sent as a single byte.
//!
//! The table holds the 162 vertices of a frequency-4 geodesic icosahedron.
//! Both ends build it the same way, so an index always maps to the same
//! vector.

use std::sync::OnceLock;

use glam::Vec3;

pub const NUM_VERTEX_NORMALS: usize = 162;

const FREQUENCY: usize = 4;

static TABLE: OnceLock<Vec<Vec3>> = OnceLock::new();

pub fn table() -> &'static [Vec3] {
    TABLE.get_or_init(build_table)
}

pub fn direction(index: u8) -> Option<Vec3> {
    table().get(index as usize).copied()
}

/// Index of the table entry with the largest dot product against `dir`.
/// A zero vector maps to index 0.
pub fn closest_index(dir: Vec3) -> u8 {
    let mut best = 0;
    let mut best_dot = f32::NEG_INFINITY;
    for (i, n) in table().iter().enumerate() {
        let d = dir.dot(*n);
        if d > best_dot {
            best_dot = d;
            best = i;
        }
    }
    best as u8
}

fn build_table() -> Vec<Vec3> {
    let phi = (1.0 + 5f32.sqrt()) / 2.0;
    let mut corners = Vec::with_capacity(12);
    for a in [-1.0, 1.0] {
        for b in [-phi, phi] {
            corners.push(Vec3::new(0.0, a, b));
            corners.push(Vec3::new(a, b, 0.0));
            corners.push(Vec3::new(b, 0.0, a));
        }
    }

    // Icosahedron edges are exactly 2 long with these corners.
    let adjacent = |a: Vec3, b: Vec3| (a.distance(b) - 2.0).abs() < 1e-3;

    let mut out: Vec<Vec3> = Vec::with_capacity(NUM_VERTEX_NORMALS);
    for i in 0..corners.len() {
        for j in i + 1..corners.len() {
            for k in j + 1..corners.len() {
                let (a, b, c) = (corners[i], corners[j], corners[k]);
                if !(adjacent(a, b) && adjacent(b, c) && adjacent(a, c)) {
                    continue;
                }
                subdivide(a, b, c, &mut out);
            }
        }
    }
    out
}

fn subdivide(a: Vec3, b: Vec3, c: Vec3, out: &mut Vec<Vec3>) {
    let f = FREQUENCY as f32;
    for i in 0..=FREQUENCY {
        for j in 0..=FREQUENCY - i {
            let k = FREQUENCY - i - j;
            let p = ((a * i as f32 + b * j as f32 + c * k as f32) / f).normalize();
            if !out.iter().any(|q| q.distance_squared(p) < 1e-6) {
                out.push(p);
            }
        }
    }
}
