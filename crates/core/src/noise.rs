use glam::Vec3;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum NoiseKind {
    Value,
    Perlin,
}

impl NoiseKind {
    pub fn from_int(value: i32) -> Self {
        match value {
            1 => NoiseKind::Perlin,
            _ => NoiseKind::Value,
        }
    }

    pub fn sample(self, p: Vec3, seed: u32) -> f32 {
        match self {
            NoiseKind::Value => value_noise(p, seed),
            NoiseKind::Perlin => perlin_noise(p, seed),
        }
    }
}

/// Summed octaves; each octave reseeds so layers stay decorrelated.
pub fn fbm(p: Vec3, seed: u32, kind: NoiseKind, octaves: u32, lacunarity: f32, gain: f32) -> f32 {
    let mut value = 0.0;
    let mut amp = 1.0;
    let mut freq = 1.0;
    for octave in 0..octaves.max(1) {
        value += kind.sample(p * freq, seed.wrapping_add(octave * 1013)) * amp;
        amp *= gain.clamp(0.0, 1.0);
        freq *= lacunarity.max(0.0);
    }
    value
}

/// Smoothly interpolated lattice values in [-1, 1].
pub fn value_noise(p: Vec3, seed: u32) -> f32 {
    let cell = p.floor();
    let t = p - cell;
    let s = t * t * (Vec3::splat(3.0) - 2.0 * t);
    let [x, y, z] = [cell.x as i32, cell.y as i32, cell.z as i32];

    trilinear(s, |dx, dy, dz| lattice_value(x + dx, y + dy, z + dz, seed)) * 2.0 - 1.0
}

pub fn perlin_noise(p: Vec3, seed: u32) -> f32 {
    let cell = p.floor();
    let t = p - cell;
    let s = Vec3::new(quintic(t.x), quintic(t.y), quintic(t.z));
    let [x, y, z] = [cell.x as i32, cell.y as i32, cell.z as i32];

    trilinear(s, |dx, dy, dz| {
        let corner = Vec3::new(dx as f32, dy as f32, dz as f32);
        lattice_gradient(x + dx, y + dy, z + dz, seed).dot(t - corner)
    })
}

fn trilinear(s: Vec3, corner: impl Fn(i32, i32, i32) -> f32) -> f32 {
    let lerp = |a: f32, b: f32, t: f32| a + (b - a) * t;
    let x00 = lerp(corner(0, 0, 0), corner(1, 0, 0), s.x);
    let x10 = lerp(corner(0, 1, 0), corner(1, 1, 0), s.x);
    let x01 = lerp(corner(0, 0, 1), corner(1, 0, 1), s.x);
    let x11 = lerp(corner(0, 1, 1), corner(1, 1, 1), s.x);
    lerp(lerp(x00, x10, s.y), lerp(x01, x11, s.y), s.z)
}

fn quintic(t: f32) -> f32 {
    t * t * t * (t * (t * 6.0 - 15.0) + 10.0)
}

fn lattice_gradient(x: i32, y: i32, z: i32, seed: u32) -> Vec3 {
    let h = lattice_hash(x, y, z, seed);
    let component = |bits: u32| (bits & 0x3ff) as f32 / 511.5 - 1.0;
    let v = Vec3::new(component(h), component(h >> 10), component(h >> 20));
    if v.length_squared() > 0.0 {
        v.normalize()
    } else {
        Vec3::Y
    }
}

fn lattice_value(x: i32, y: i32, z: i32, seed: u32) -> f32 {
    lattice_hash(x, y, z, seed) as f32 / u32::MAX as f32
}

fn lattice_hash(x: i32, y: i32, z: i32, seed: u32) -> u32 {
    let mut h = x as u32;
    h ^= (y as u32).wrapping_mul(374761393);
    h = h.rotate_left(13);
    h ^= (z as u32).wrapping_mul(668265263);
    h = h.rotate_left(17);
    h ^= seed.wrapping_mul(2246822519);
    h = h.wrapping_mul(3266489917);
    h ^ (h >> 16)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn noise_is_deterministic() {
        let p = Vec3::new(0.3, 1.7, -2.2);
        assert_eq!(perlin_noise(p, 7), perlin_noise(p, 7));
        assert_eq!(value_noise(p, 7), value_noise(p, 7));
    }

    #[test]
    fn perlin_vanishes_on_lattice() {
        assert!(perlin_noise(Vec3::new(2.0, -1.0, 3.0), 1).abs() < 1.0e-6);
    }

    #[test]
    fn value_noise_stays_in_range() {
        for i in 0..64 {
            let p = Vec3::new(i as f32 * 0.37, i as f32 * 0.11, -(i as f32) * 0.53);
            let v = value_noise(p, 3);
            assert!((-1.0..=1.0).contains(&v));
        }
    }
}
