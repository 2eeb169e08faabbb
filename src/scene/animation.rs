// Instance animation
//
// Each instance eases back and forth between two camera setups over a fixed
// period. Instances are phase-shifted by index so the grid never moves in
// lockstep. Everything here runs on the driver thread before recording.

use glam::{Mat4, Vec3};

use super::uniforms::{UniformArray, UniformBufferObject};

pub fn ramp(x: f32, edge0: f32, edge1: f32) -> f32 {
    (x - edge0) / (edge1 - edge0)
}

pub fn smoothstep(x: f32) -> f32 {
    x * x * (3.0 - 2.0 * x)
}

pub fn smootherstep(x: f32) -> f32 {
    x * x * x * (x * (x * 6.0 - 15.0) + 10.0)
}

/// Triangle wave over `period`, eased at both ends. Returns a value in [0, 1].
pub fn ease(t: f32, period: f32) -> f32 {
    let t = t.rem_euclid(period);
    let half = 0.5 * period;
    let x = if t < half { t } else { period - t };
    // Nested polynomials can round just past 1.0
    smootherstep(smoothstep(ramp(x, 0.0, half).clamp(0.0, 1.0))).clamp(0.0, 1.0)
}

fn lerp_mat4(a: &Mat4, b: &Mat4, s: f32) -> Mat4 {
    Mat4::from_cols(
        a.x_axis.lerp(b.x_axis, s),
        a.y_axis.lerp(b.y_axis, s),
        a.z_axis.lerp(b.z_axis, s),
        a.w_axis.lerp(b.w_axis, s),
    )
}

#[derive(Debug, Clone)]
pub struct Animation {
    pub period: f32,
    /// Seconds of phase offset between consecutive instances.
    pub phase_step: f32,
    /// Revolutions of the logo per period.
    pub spin: f32,
    flat: (Mat4, Mat4),
    perspective: (Mat4, Mat4),
}

impl Default for Animation {
    fn default() -> Self {
        Self::new(5.0, 0.15)
    }
}

impl Animation {
    pub fn new(period: f32, phase_step: f32) -> Self {
        let view = Mat4::look_at_rh(Vec3::new(0.0, -1.5, 2.0), Vec3::ZERO, Vec3::Z);
        let mut proj = Mat4::perspective_rh(45f32.to_radians(), 1.0, 0.1, 10.0);
        // Vulkan clip space has Y pointing down.
        proj.y_axis.y *= -1.0;

        Self {
            period,
            phase_step,
            spin: 1.0,
            flat: (Mat4::IDENTITY, Mat4::IDENTITY),
            perspective: (view, proj),
        }
    }

    /// Uniforms for instance `n` at `time` seconds.
    pub fn instance(&self, time: f32, n: usize) -> UniformBufferObject {
        let t = time + n as f32 * self.phase_step;
        let s = ease(t, self.period);
        let angle = std::f32::consts::TAU * self.spin * (t.rem_euclid(self.period) / self.period);

        let scale = 0.5 + 0.5 * s;
        UniformBufferObject {
            model: Mat4::from_rotation_z(angle) * Mat4::from_scale(Vec3::splat(scale)),
            view: lerp_mat4(&self.flat.0, &self.perspective.0, s),
            proj: lerp_mat4(&self.flat.1, &self.perspective.1, s),
        }
    }

    /// Fill every record of `uniforms` for `time`.
    pub fn update(&self, time: f32, uniforms: &mut UniformArray) {
        for n in 0..uniforms.len() {
            uniforms.write(n, &self.instance(time, n));
        }
    }
}
