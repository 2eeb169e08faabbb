// Per-instance uniform records
//
// One record per drawable instance, packed into a single host buffer and
// addressed with a dynamic uniform buffer offset. Records are padded to the
// device's minUniformBufferOffsetAlignment.

use bytemuck::{Pod, Zeroable};
use glam::Mat4;

#[repr(C)]
#[derive(Debug, Clone, Copy, PartialEq, Pod, Zeroable)]
pub struct UniformBufferObject {
    pub model: Mat4,
    pub view: Mat4,
    pub proj: Mat4,
}

impl Default for UniformBufferObject {
    fn default() -> Self {
        Self {
            model: Mat4::IDENTITY,
            view: Mat4::IDENTITY,
            proj: Mat4::IDENTITY,
        }
    }
}

/// Round `size` up to a multiple of `alignment`.
pub fn aligned_stride(size: usize, alignment: usize) -> usize {
    let alignment = alignment.max(1);
    size.div_ceil(alignment) * alignment
}

/// Byte offset of record `n` in a buffer of `stride`-sized records.
#[inline]
pub fn record_offset(n: usize, stride: usize) -> u32 {
    (n * stride) as u32
}

/// Host-side staging of every instance's record, laid out exactly as the GPU
/// buffer expects.
#[derive(Debug, Clone)]
pub struct UniformArray {
    count: usize,
    stride: usize,
    bytes: Vec<u8>,
}

impl UniformArray {
    pub fn new(count: usize, alignment: usize) -> Self {
        let stride = aligned_stride(std::mem::size_of::<UniformBufferObject>(), alignment);
        Self {
            count,
            stride,
            bytes: vec![0; count * stride],
        }
    }

    #[inline]
    pub fn len(&self) -> usize {
        self.count
    }

    #[inline]
    pub fn is_empty(&self) -> bool {
        self.count == 0
    }

    /// Size of one padded record.
    #[inline]
    pub fn stride(&self) -> usize {
        self.stride
    }

    /// Total buffer size in bytes.
    #[inline]
    pub fn size(&self) -> usize {
        self.bytes.len()
    }

    /// Dynamic offset that binds instance `n`'s record.
    pub fn dynamic_offset(&self, n: usize) -> u32 {
        assert!(n < self.count, "instance {} out of range ({} instances)", n, self.count);
        record_offset(n, self.stride)
    }

    pub fn write(&mut self, n: usize, ubo: &UniformBufferObject) {
        let offset = self.dynamic_offset(n) as usize;
        let record = bytemuck::bytes_of(ubo);
        self.bytes[offset..offset + record.len()].copy_from_slice(record);
    }

    pub fn read(&self, n: usize) -> UniformBufferObject {
        let offset = self.dynamic_offset(n) as usize;
        let size = std::mem::size_of::<UniformBufferObject>();
        bytemuck::pod_read_unaligned(&self.bytes[offset..offset + size])
    }

    pub fn as_bytes(&self) -> &[u8] {
        &self.bytes
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn record_is_three_matrices() {
        assert_eq!(std::mem::size_of::<UniformBufferObject>(), 192);
    }

    #[test]
    fn stride_respects_alignment() {
        assert_eq!(aligned_stride(192, 256), 256);
        assert_eq!(aligned_stride(192, 64), 192);
        assert_eq!(aligned_stride(192, 0), 192);
        assert_eq!(aligned_stride(200, 16), 208);
    }

    #[test]
    fn dynamic_offsets_step_by_stride() {
        let uniforms = UniformArray::new(9, 256);
        for n in 0..9 {
            assert_eq!(uniforms.dynamic_offset(n), (n * uniforms.stride()) as u32);
        }
        assert_eq!(uniforms.size(), 9 * 256);
    }

    #[test]
    #[should_panic(expected = "out of range")]
    fn offset_past_instance_count_panics() {
        UniformArray::new(4, 64).dynamic_offset(4);
    }

    #[test]
    fn writes_land_in_their_own_record() {
        let mut uniforms = UniformArray::new(3, 256);
        let ubo = UniformBufferObject {
            model: Mat4::from_scale(glam::Vec3::splat(2.0)),
            ..Default::default()
        };
        uniforms.write(1, &ubo);

        assert_eq!(uniforms.read(1), ubo);
        assert_eq!(uniforms.read(0).model, Mat4::ZERO);
        assert_eq!(uniforms.read(2).model, Mat4::ZERO);
        // Padding between records stays untouched.
        assert!(uniforms.as_bytes()[192..256].iter().all(|&b| b == 0));
    }
}
