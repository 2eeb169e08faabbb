// Command recording
//
// Secondary buffers hold the instance draws and are filled in parallel by the
// fan-out. The primary buffer only begins the scene pass, executes them, and
// then draws the GUI inline in its own pass.

use anyhow::Result;
use ash::vk;
use std::ops::Range;

use super::gui::{OverlayDraw, OverlayTextures};
use crate::frame::{Extent, SegmentRecorder};
use crate::scene::uniforms::record_offset;
use crate::scene::{CellRect, InstanceGrid};

/// One instance draw within a segment.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct InstanceDraw {
    pub n: usize,
    pub cell: CellRect,
    /// Offset of the instance's record in the dynamic uniform buffer.
    pub dynamic_offset: u32,
}

/// Draws for instances `range`, skipping cells too small to cover a pixel.
pub fn instance_draws(
    grid: InstanceGrid,
    extent: Extent,
    uniform_stride: usize,
    range: Range<usize>,
) -> impl Iterator<Item = InstanceDraw> {
    range.filter_map(move |n| {
        let cell = grid.cell_rect(n, extent);
        (cell.width > 0 && cell.height > 0).then(|| InstanceDraw {
            n,
            cell,
            dynamic_offset: record_offset(n, uniform_stride),
        })
    })
}

/// Read-only binding state shared by every segment of a frame.
pub struct DrawSegments<'a> {
    pub device: &'a ash::Device,
    pub render_pass: vk::RenderPass,
    pub framebuffer: vk::Framebuffer,
    pub pipeline: vk::Pipeline,
    pub pipeline_layout: vk::PipelineLayout,
    pub descriptor_set: vk::DescriptorSet,
    pub vertex_buffer: vk::Buffer,
    pub index_buffer: vk::Buffer,
    pub index_count: u32,
    pub uniform_stride: usize,
    pub grid: InstanceGrid,
    pub extent: Extent,
}

impl SegmentRecorder for DrawSegments<'_> {
    type Buffer = vk::CommandBuffer;

    fn record_segment(&self, cmd: vk::CommandBuffer, _segment: usize, range: Range<usize>) -> Result<()> {
        let inheritance = vk::CommandBufferInheritanceInfo::default()
            .render_pass(self.render_pass)
            .subpass(0)
            .framebuffer(self.framebuffer);
        let begin_info = vk::CommandBufferBeginInfo::default()
            .flags(
                vk::CommandBufferUsageFlags::RENDER_PASS_CONTINUE
                    | vk::CommandBufferUsageFlags::ONE_TIME_SUBMIT,
            )
            .inheritance_info(&inheritance);

        let device = self.device;
        unsafe {
            device.begin_command_buffer(cmd, &begin_info)?;
            device.cmd_bind_pipeline(cmd, vk::PipelineBindPoint::GRAPHICS, self.pipeline);
            device.cmd_bind_vertex_buffers(cmd, 0, &[self.vertex_buffer], &[0]);
            device.cmd_bind_index_buffer(cmd, self.index_buffer, 0, vk::IndexType::UINT32);

            for draw in instance_draws(self.grid, self.extent, self.uniform_stride, range) {
                device.cmd_set_viewport(cmd, 0, &[viewport(draw.cell)]);
                device.cmd_set_scissor(cmd, 0, &[scissor(draw.cell)]);
                device.cmd_bind_descriptor_sets(
                    cmd,
                    vk::PipelineBindPoint::GRAPHICS,
                    self.pipeline_layout,
                    0,
                    &[self.descriptor_set],
                    &[draw.dynamic_offset],
                );
                device.cmd_draw_indexed(cmd, self.index_count, 1, 0, 0, 0);
            }

            device.end_command_buffer(cmd)?;
        }
        Ok(())
    }
}

pub fn viewport(cell: CellRect) -> vk::Viewport {
    vk::Viewport {
        x: cell.x as f32,
        y: cell.y as f32,
        width: cell.width as f32,
        height: cell.height as f32,
        min_depth: 0.0,
        max_depth: 1.0,
    }
}

pub fn scissor(cell: CellRect) -> vk::Rect2D {
    vk::Rect2D {
        offset: vk::Offset2D {
            x: cell.x as i32,
            y: cell.y as i32,
        },
        extent: vk::Extent2D {
            width: cell.width,
            height: cell.height,
        },
    }
}

/// GUI geometry already uploaded to the slot's mesh buffers.
pub struct GuiDraws<'a> {
    pub pipeline: vk::Pipeline,
    pub layout: vk::PipelineLayout,
    pub vertex_buffer: vk::Buffer,
    pub index_buffer: vk::Buffer,
    pub draws: &'a [OverlayDraw],
    pub textures: &'a OverlayTextures,
    /// Screen size in points, for the vertex shader.
    pub screen_size: [f32; 2],
}

/// Everything the primary buffer needs for one frame.
pub struct PrimaryPass<'a> {
    /// The clearing or the loading scene pass, picked per frame.
    pub render_pass: vk::RenderPass,
    pub overlay_pass: vk::RenderPass,
    pub framebuffer: vk::Framebuffer,
    pub extent: vk::Extent2D,
    /// Ignored by a scene pass that loads color.
    pub clear_color: [f32; 4],
    pub secondaries: &'a [vk::CommandBuffer],
    pub gui: Option<GuiDraws<'a>>,
}

pub fn record_primary(device: &ash::Device, cmd: vk::CommandBuffer, pass: &PrimaryPass) -> Result<()> {
    let render_area = vk::Rect2D {
        offset: vk::Offset2D { x: 0, y: 0 },
        extent: pass.extent,
    };
    let clear_values = [
        vk::ClearValue {
            color: vk::ClearColorValue {
                float32: pass.clear_color,
            },
        },
        vk::ClearValue {
            depth_stencil: vk::ClearDepthStencilValue {
                depth: 1.0,
                stencil: 0,
            },
        },
    ];

    unsafe {
        let begin_info = vk::CommandBufferBeginInfo::default()
            .flags(vk::CommandBufferUsageFlags::ONE_TIME_SUBMIT);
        device.begin_command_buffer(cmd, &begin_info)?;

        let scene_pass = vk::RenderPassBeginInfo::default()
            .render_pass(pass.render_pass)
            .framebuffer(pass.framebuffer)
            .render_area(render_area)
            .clear_values(&clear_values);
        device.cmd_begin_render_pass(cmd, &scene_pass, vk::SubpassContents::SECONDARY_COMMAND_BUFFERS);
        if !pass.secondaries.is_empty() {
            device.cmd_execute_commands(cmd, pass.secondaries);
        }
        device.cmd_end_render_pass(cmd);

        if let Some(gui) = pass.gui.as_ref().filter(|gui| !gui.draws.is_empty()) {
            let overlay_pass = vk::RenderPassBeginInfo::default()
                .render_pass(pass.overlay_pass)
                .framebuffer(pass.framebuffer)
                .render_area(render_area);
            device.cmd_begin_render_pass(cmd, &overlay_pass, vk::SubpassContents::INLINE);
            record_gui(device, cmd, pass.extent, gui);
            device.cmd_end_render_pass(cmd);
        }

        device.end_command_buffer(cmd)?;
    }
    Ok(())
}

unsafe fn record_gui(device: &ash::Device, cmd: vk::CommandBuffer, extent: vk::Extent2D, gui: &GuiDraws) {
    device.cmd_bind_pipeline(cmd, vk::PipelineBindPoint::GRAPHICS, gui.pipeline);
    device.cmd_bind_vertex_buffers(cmd, 0, &[gui.vertex_buffer], &[0]);
    device.cmd_bind_index_buffer(cmd, gui.index_buffer, 0, vk::IndexType::UINT32);
    device.cmd_set_viewport(
        cmd,
        0,
        &[vk::Viewport {
            x: 0.0,
            y: 0.0,
            width: extent.width as f32,
            height: extent.height as f32,
            min_depth: 0.0,
            max_depth: 1.0,
        }],
    );
    device.cmd_push_constants(
        cmd,
        gui.layout,
        vk::ShaderStageFlags::VERTEX,
        0,
        bytemuck::bytes_of(&gui.screen_size),
    );

    let mut bound = None;
    for draw in gui.draws {
        let Some(set) = gui.textures.set(draw.texture) else {
            log::debug!("Overlay texture {:?} not uploaded, skipping draw", draw.texture);
            continue;
        };
        if bound != Some(set) {
            device.cmd_bind_descriptor_sets(cmd, vk::PipelineBindPoint::GRAPHICS, gui.layout, 0, &[set], &[]);
            bound = Some(set);
        }
        device.cmd_set_scissor(cmd, 0, &[draw.scissor]);
        device.cmd_draw_indexed(cmd, draw.index_count, 1, draw.first_index, draw.vertex_offset, 0);
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::scene::UniformArray;

    #[test]
    fn viewport_and_scissor_cover_the_cell() {
        let grid = InstanceGrid::new(2, 2);
        let cell = grid.cell_rect(3, Extent::new(800, 600));

        let vp = viewport(cell);
        assert_eq!((vp.x, vp.y, vp.width, vp.height), (400.0, 300.0, 400.0, 300.0));
        assert_eq!((vp.min_depth, vp.max_depth), (0.0, 1.0));

        let sc = scissor(cell);
        assert_eq!((sc.offset.x, sc.offset.y), (400, 300));
        assert_eq!((sc.extent.width, sc.extent.height), (400, 300));
    }

    #[test]
    fn draw_offsets_match_the_uniform_records() {
        let grid = InstanceGrid::new(3, 3);
        let uniforms = UniformArray::new(grid.count(), 256);

        let draws: Vec<_> = instance_draws(grid, Extent::new(900, 900), uniforms.stride(), 0..grid.count()).collect();
        assert_eq!(draws.len(), 9);
        for (n, draw) in draws.iter().enumerate() {
            assert_eq!(draw.n, n);
            assert_eq!(draw.dynamic_offset, uniforms.dynamic_offset(n));
            assert_eq!(draw.dynamic_offset as usize, n * uniforms.stride());
        }
    }

    #[test]
    fn segments_draw_only_their_own_range() {
        let grid = InstanceGrid::new(3, 3);
        let ns: Vec<_> = instance_draws(grid, Extent::new(900, 900), 256, 3..6)
            .map(|draw| draw.n)
            .collect();
        assert_eq!(ns, vec![3, 4, 5]);
    }

    #[test]
    fn cells_narrower_than_a_pixel_are_skipped() {
        let grid = InstanceGrid::new(4, 1);
        // Three pixels across four columns leaves one cell empty.
        let draws: Vec<_> = instance_draws(grid, Extent::new(3, 10), 256, 0..4).collect();
        assert!(draws.len() < 4);
        assert!(draws.iter().all(|d| d.cell.width > 0 && d.cell.height > 0));
    }
}
