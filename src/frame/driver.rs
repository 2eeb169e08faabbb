// =============================================================================
// FRAME DRIVER - One logical frame per tick
// =============================================================================
//
// Sequence per tick, all on the calling thread except segment recording:
//   1. poll backend-side triggers (shader reload)
//   2. drain a pending rebuild: device idle, full teardown, full recreate
//   3. run the GUI; a changed thread count becomes a trigger for the next tick
//   4. write and upload every instance's uniforms
//   5. acquire -> fence wait/reset -> GUI textures -> record -> submit
//   6. present, feeding "out of date" back into the lifecycle
//
// Only an out-of-date surface is handled here. Every other error is returned
// to the caller, which treats it as fatal.

use anyhow::{anyhow, Context, Result};
use egui::TexturesDelta;
use std::time::{Duration, Instant};

use super::fanout::segment_count;
use super::lifecycle::{Extent, FrameParams, RebuildTrigger, SwapchainLifecycle};
use super::ring::{Acquired, FrameRing, SlotSync};
use crate::config::clamp_thread_count;
use crate::error::{FrameError, FrameResult};
use crate::overlay::{FrameTimeHistory, Overlay, OverlayControls, OverlayFrame, OverlayStats};
use crate::scene::{Animation, InstanceGrid, UniformArray};

/// The swapchain-dependent resource set. Built and destroyed as one unit.
pub trait SwapchainResources: SlotSync {
    /// Parameters the set was actually built with.
    fn params(&self) -> FrameParams;
}

/// Per-frame choices the backend records with.
#[derive(Debug, Clone, Copy)]
pub struct FrameView<'a> {
    /// `None` keeps the previous color contents instead of clearing.
    pub clear_color: Option<[f32; 4]>,
    pub overlay: Option<&'a OverlayFrame>,
}

/// Device-level collaborator that owns every GPU object.
pub trait FrameBackend {
    type Resources: SwapchainResources;

    /// Build the complete swapchain-dependent set for `params`.
    fn create_resources(&mut self, params: &FrameParams) -> Result<Self::Resources>;

    /// Tear the set down. Only called after `wait_idle`.
    fn destroy_resources(&mut self, resources: Self::Resources);

    fn wait_idle(&self) -> Result<()>;

    /// Instances drawn every frame.
    fn instance_grid(&self) -> InstanceGrid;

    /// Required alignment of dynamic uniform offsets.
    fn uniform_alignment(&self) -> usize;

    /// Copy this frame's uniform records into the device-visible buffer.
    fn upload_uniforms(&mut self, uniforms: &UniformArray) -> Result<()>;

    /// Apply GUI texture changes before the next `record`.
    fn update_overlay_textures(&mut self, delta: &TexturesDelta) -> Result<()> {
        let _ = delta;
        Ok(())
    }

    /// Record `frame.slot`'s command buffers. The slot's fence has been waited on.
    fn record(&self, resources: &mut Self::Resources, frame: &Acquired, view: &FrameView) -> Result<()>;

    /// Submit the slot's primary buffer, signalling its fence.
    fn submit(&self, resources: &Self::Resources, frame: &Acquired) -> FrameResult<()>;

    /// Queue the image for presentation. `Ok(true)` means suboptimal.
    fn present(&self, resources: &Self::Resources, frame: &Acquired) -> FrameResult<bool>;

    /// True once when shader binaries changed since the last poll.
    fn poll_shader_reload(&mut self) -> bool {
        false
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TickOutcome {
    Presented,
    /// The pending framebuffer size is zero; nothing was drawn.
    Held,
    /// The surface went stale; a rebuild runs at the start of the next tick.
    OutOfDate,
}

#[derive(Debug, Clone)]
pub struct DriverSettings {
    /// Upper bound on fence and image-acquire waits.
    pub timeout: Duration,
    pub overlay_visible: bool,
    pub clear_enabled: bool,
    pub clear_color: [f32; 3],
}

impl Default for DriverSettings {
    fn default() -> Self {
        Self {
            timeout: Duration::from_secs(5),
            overlay_visible: true,
            clear_enabled: true,
            clear_color: [0.4, 0.4, 0.5],
        }
    }
}

pub struct FrameDriver<B: FrameBackend> {
    backend: B,
    resources: Option<B::Resources>,
    ring: FrameRing,
    lifecycle: SwapchainLifecycle,
    animation: Animation,
    uniforms: UniformArray,
    frame_times: FrameTimeHistory,
    overlay: Overlay,
    overlay_visible: bool,
    timeout: Duration,
    clock: Instant,
    last_present: Option<Instant>,
    frames: u64,
}

impl<B: FrameBackend> FrameDriver<B> {
    /// Build the initial resource set and go live.
    pub fn new(mut backend: B, params: FrameParams, settings: DriverSettings) -> Result<Self> {
        let resources = backend
            .create_resources(&params)
            .context("Failed to create frame resources")?;
        let built = resources.params();
        let ring = FrameRing::new(resources.slot_count(), settings.timeout);

        let grid = backend.instance_grid();
        let uniforms = UniformArray::new(grid.count(), backend.uniform_alignment());

        log::info!(
            "Frame driver live: {} slots, {} threads, {} instances, extent {}",
            ring.slot_count(),
            built.thread_count,
            grid.count(),
            built.extent
        );

        Ok(Self {
            backend,
            resources: Some(resources),
            ring,
            lifecycle: SwapchainLifecycle::new(built),
            animation: Animation::default(),
            uniforms,
            frame_times: FrameTimeHistory::default(),
            overlay: Overlay::new(OverlayControls {
                clear_enabled: settings.clear_enabled,
                clear_color: settings.clear_color,
                thread_count: built.thread_count,
            }),
            overlay_visible: settings.overlay_visible,
            timeout: settings.timeout,
            clock: Instant::now(),
            last_present: None,
            frames: 0,
        })
    }

    pub fn backend(&self) -> &B {
        &self.backend
    }

    pub fn lifecycle(&self) -> &SwapchainLifecycle {
        &self.lifecycle
    }

    pub fn frame_times(&self) -> &FrameTimeHistory {
        &self.frame_times
    }

    pub fn overlay(&self) -> &Overlay {
        &self.overlay
    }

    pub fn overlay_mut(&mut self) -> &mut Overlay {
        &mut self.overlay
    }

    /// Frames presented so far.
    pub fn frames(&self) -> u64 {
        self.frames
    }

    pub fn is_live(&self) -> bool {
        self.resources.is_some()
    }

    /// Parameters of the resource set `draw` would currently record into.
    pub fn params(&self) -> Option<FrameParams> {
        self.resources.as_ref().map(SwapchainResources::params)
    }

    /// Defer a rebuild to the given framebuffer size.
    pub fn resize(&mut self, width: u32, height: u32) {
        self.lifecycle
            .trigger(RebuildTrigger::Resize(Extent::new(width, height)));
    }

    /// Defer a change of the recording thread count. Clamped to the supported range.
    pub fn request_thread_count(&mut self, count: usize) -> usize {
        let count = clamp_thread_count(count);
        self.overlay.controls.thread_count = count;
        if count != self.lifecycle.target().thread_count {
            log::info!("Recording threads: {} -> {}", self.lifecycle.target().thread_count, count);
            self.lifecycle.trigger(RebuildTrigger::ThreadCount(count));
        }
        count
    }

    /// Thread count that will be in effect after any pending rebuild.
    pub fn target_thread_count(&self) -> usize {
        self.lifecycle.target().thread_count
    }

    pub fn set_overlay_visible(&mut self, visible: bool) {
        self.overlay_visible = visible;
    }

    pub fn overlay_visible(&self) -> bool {
        self.overlay_visible
    }

    /// Advance one tick using wall-clock animation time.
    pub fn draw(&mut self) -> Result<TickOutcome> {
        let time = self.clock.elapsed().as_secs_f32();
        self.draw_at(time)
    }

    /// Advance one tick with the animation evaluated at `time` seconds.
    pub fn draw_at(&mut self, time: f32) -> Result<TickOutcome> {
        // ─── 1. Input-derived triggers ──────────────────────────────────────
        if self.backend.poll_shader_reload() {
            self.lifecycle.trigger(RebuildTrigger::ShaderReload);
        }

        // ─── 2. Pending rebuild ─────────────────────────────────────────────
        if self.lifecycle.is_pending() {
            if self.lifecycle.target().extent.is_empty() {
                return Ok(TickOutcome::Held);
            }
            self.rebuild()?;
        }

        let params = self
            .params()
            .ok_or_else(|| anyhow!("draw called after the frame driver was destroyed"))?;

        // ─── 3. Overlay ─────────────────────────────────────────────────────
        let overlay = if self.overlay_visible {
            let stats = OverlayStats {
                extent: params.extent,
                instances: self.uniforms.len(),
                segments: segment_count(params.thread_count),
                frames: self.frames,
                rebuilds: self.lifecycle.rebuilds(),
            };
            Some(self.overlay.run(params.extent, &self.frame_times, &stats))
        } else {
            None
        };
        let requested = self.overlay.controls.thread_count;
        if requested != self.lifecycle.target().thread_count {
            self.request_thread_count(requested);
        }
        let view = FrameView {
            clear_color: self.overlay.controls.clear_value(),
            overlay: overlay.as_ref(),
        };

        // ─── 4. Uniforms ────────────────────────────────────────────────────
        self.animation.update(time, &mut self.uniforms);
        self.backend.upload_uniforms(&self.uniforms)?;

        // ─── 5. Acquire, wait, record, submit ───────────────────────────────
        let resources = self
            .resources
            .as_mut()
            .ok_or_else(|| anyhow!("draw called after the frame driver was destroyed"))?;
        let frame = match self.ring.acquire(&*resources) {
            Ok(frame) => frame,
            Err(FrameError::OutOfDate) => {
                self.lifecycle.trigger(RebuildTrigger::SurfaceOutOfDate);
                return Ok(TickOutcome::OutOfDate);
            }
            Err(e) => return Err(e.into()),
        };

        self.ring.wait_and_reset(&*resources, frame.slot)?;
        if self.overlay.has_texture_updates() {
            let delta = self.overlay.take_texture_updates();
            self.backend
                .update_overlay_textures(&delta)
                .context("Failed to update overlay textures")?;
        }
        self.backend
            .record(resources, &frame, &view)
            .with_context(|| format!("Failed to record frame slot {}", frame.slot))?;
        self.backend.submit(resources, &frame)?;

        // ─── 6. Present ─────────────────────────────────────────────────────
        let outcome = match self.backend.present(resources, &frame) {
            Ok(_suboptimal) => TickOutcome::Presented,
            Err(FrameError::OutOfDate) => {
                self.lifecycle.trigger(RebuildTrigger::SurfaceOutOfDate);
                TickOutcome::OutOfDate
            }
            Err(e) => return Err(e.into()),
        };
        self.ring.advance();

        let now = Instant::now();
        if let Some(last) = self.last_present.replace(now) {
            self.frame_times.push(now - last);
        }
        self.frames += 1;

        Ok(outcome)
    }

    fn rebuild(&mut self) -> Result<()> {
        let Some(target) = self.lifecycle.begin_rebuild() else {
            return Ok(());
        };
        log::info!(
            "Rebuilding frame resources: extent {}, {} threads",
            target.extent,
            target.thread_count
        );

        self.backend.wait_idle()?;
        if let Some(old) = self.resources.take() {
            self.backend.destroy_resources(old);
        }

        let resources = self
            .backend
            .create_resources(&target)
            .context("Failed to rebuild frame resources")?;
        let built = resources.params();
        self.ring = FrameRing::new(resources.slot_count(), self.timeout);
        self.resources = Some(resources);
        self.lifecycle.finish_rebuild(built);
        // Frame time across a rebuild is a stall, not a frame.
        self.last_present = None;

        log::debug!("Rebuild #{} complete", self.lifecycle.rebuilds());
        Ok(())
    }

    /// Drain the GPU and release the resource set. Idempotent.
    pub fn destroy(&mut self) -> Result<()> {
        if let Some(resources) = self.resources.take() {
            self.backend.wait_idle()?;
            self.backend.destroy_resources(resources);
            log::info!("Frame driver destroyed after {} frames", self.frames);
        }
        Ok(())
    }
}

impl<B: FrameBackend> Drop for FrameDriver<B> {
    fn drop(&mut self) {
        if let Err(e) = self.destroy() {
            log::error!("Failed to destroy frame resources: {:#}", e);
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::frame::ring::tests::FakeSync;
    use crate::frame::ring::AcquiredImage;
    use std::cell::{Cell, RefCell};
    use std::collections::VecDeque;

    struct MockResources {
        id: usize,
        params: FrameParams,
        sync: FakeSync,
    }

    impl SlotSync for MockResources {
        fn slot_count(&self) -> usize {
            self.sync.slot_count()
        }

        fn acquire_image(&self, semaphore_slot: usize, timeout: Duration) -> FrameResult<AcquiredImage> {
            self.sync.acquire_image(semaphore_slot, timeout)
        }

        fn wait_fence(&self, slot: usize, timeout: Duration) -> FrameResult<()> {
            self.sync.wait_fence(slot, timeout)
        }

        fn reset_fence(&self, slot: usize) -> FrameResult<()> {
            self.sync.reset_fence(slot)
        }
    }

    impl SwapchainResources for MockResources {
        fn params(&self) -> FrameParams {
            self.params
        }
    }

    #[derive(Default)]
    struct MockBackend {
        slots: usize,
        created: Vec<FrameParams>,
        destroyed: Vec<usize>,
        idle_waits: Cell<usize>,
        uploads: usize,
        /// (resource set id, params, slot) per recorded frame.
        recorded: RefCell<Vec<(usize, FrameParams, usize)>>,
        /// (clear color, GUI primitive count) per recorded frame.
        views: RefCell<Vec<(Option<[f32; 4]>, Option<usize>)>>,
        texture_updates: usize,
        submitted: Cell<u64>,
        present_script: RefCell<VecDeque<FrameResult<bool>>>,
        acquire_script: Vec<FrameResult<AcquiredImage>>,
        stuck_fence: Option<usize>,
        shader_changed: bool,
    }

    impl MockBackend {
        fn new(slots: usize) -> Self {
            Self {
                slots,
                ..Default::default()
            }
        }
    }

    impl FrameBackend for MockBackend {
        type Resources = MockResources;

        fn create_resources(&mut self, params: &FrameParams) -> Result<MockResources> {
            self.created.push(*params);
            let sync = FakeSync::new(self.slots);
            for outcome in self.acquire_script.drain(..) {
                sync.scripted.borrow_mut().push_back(outcome);
            }
            if let Some(slot) = self.stuck_fence.take() {
                sync.reset_fence(slot).unwrap();
            }
            Ok(MockResources {
                id: self.created.len() - 1,
                params: *params,
                sync,
            })
        }

        fn destroy_resources(&mut self, resources: MockResources) {
            self.destroyed.push(resources.id);
        }

        fn wait_idle(&self) -> Result<()> {
            self.idle_waits.set(self.idle_waits.get() + 1);
            Ok(())
        }

        fn instance_grid(&self) -> InstanceGrid {
            InstanceGrid::new(3, 3)
        }

        fn uniform_alignment(&self) -> usize {
            256
        }

        fn upload_uniforms(&mut self, uniforms: &UniformArray) -> Result<()> {
            assert_eq!(uniforms.len(), 9);
            self.uploads += 1;
            Ok(())
        }

        fn update_overlay_textures(&mut self, delta: &TexturesDelta) -> Result<()> {
            assert!(!delta.is_empty());
            self.texture_updates += 1;
            Ok(())
        }

        fn record(&self, resources: &mut MockResources, frame: &Acquired, view: &FrameView) -> Result<()> {
            self.recorded
                .borrow_mut()
                .push((resources.id, resources.params, frame.slot));
            self.views.borrow_mut().push((
                view.clear_color,
                view.overlay.map(|overlay| overlay.primitives.len()),
            ));
            Ok(())
        }

        fn submit(&self, resources: &MockResources, frame: &Acquired) -> FrameResult<()> {
            let id = self.submitted.get();
            self.submitted.set(id + 1);
            resources.sync.submit(frame.slot, id);
            Ok(())
        }

        fn present(&self, _: &MockResources, _: &Acquired) -> FrameResult<bool> {
            self.present_script.borrow_mut().pop_front().unwrap_or(Ok(false))
        }

        fn poll_shader_reload(&mut self) -> bool {
            std::mem::take(&mut self.shader_changed)
        }
    }

    fn params(w: u32, h: u32, threads: usize) -> FrameParams {
        FrameParams {
            extent: Extent::new(w, h),
            thread_count: threads,
        }
    }

    fn driver(backend: MockBackend) -> FrameDriver<MockBackend> {
        let settings = DriverSettings {
            timeout: Duration::from_millis(20),
            overlay_visible: true,
            clear_enabled: true,
            clear_color: [0.4, 0.4, 0.5],
        };
        FrameDriver::new(backend, params(1280, 720, 4), settings).unwrap()
    }

    #[test]
    fn steady_state_presents_without_rebuilding() {
        let mut driver = driver(MockBackend::new(3));
        for i in 0..10 {
            assert_eq!(driver.draw_at(i as f32 * 0.016).unwrap(), TickOutcome::Presented);
        }
        assert_eq!(driver.backend().created.len(), 1);
        assert_eq!(driver.backend().uploads, 10);
        assert_eq!(driver.frames(), 10);
        assert_eq!(driver.backend().idle_waits.get(), 0);
    }

    #[test]
    fn double_resize_then_draw_rebuilds_exactly_once() {
        let mut driver = driver(MockBackend::new(2));
        driver.draw_at(0.0).unwrap();

        driver.resize(800, 600);
        driver.resize(800, 600);
        driver.draw_at(0.1).unwrap();
        driver.draw_at(0.2).unwrap();

        let backend = driver.backend();
        assert_eq!(backend.created, vec![params(1280, 720, 4), params(800, 600, 4)]);
        assert_eq!(backend.destroyed, vec![0]);
        assert_eq!(backend.idle_waits.get(), 1);
        assert_eq!(driver.params(), Some(params(800, 600, 4)));
    }

    #[test]
    fn draws_see_either_old_or_new_parameters_never_a_mix() {
        let mut driver = driver(MockBackend::new(3));
        driver.draw_at(0.0).unwrap();

        driver.resize(640, 480);
        driver.request_thread_count(8);
        // Nothing changes until the next draw.
        assert_eq!(driver.params(), Some(params(1280, 720, 4)));
        driver.draw_at(0.1).unwrap();

        let recorded = driver.backend().recorded.borrow().clone();
        assert_eq!(recorded[0].0, 0);
        assert_eq!(recorded[0].1, params(1280, 720, 4));
        assert_eq!(recorded[1].0, 1);
        assert_eq!(recorded[1].1, params(640, 480, 8));
    }

    #[test]
    fn thread_count_change_is_deferred_and_clamped() {
        let mut driver = driver(MockBackend::new(2));
        assert_eq!(driver.request_thread_count(100), 32);
        assert_eq!(driver.target_thread_count(), 32);
        assert_eq!(driver.params().unwrap().thread_count, 4);

        driver.draw_at(0.0).unwrap();
        assert_eq!(driver.params().unwrap().thread_count, 32);

        // Requesting the current count is not a rebuild.
        driver.request_thread_count(32);
        driver.draw_at(0.1).unwrap();
        assert_eq!(driver.backend().created.len(), 2);
    }

    #[test]
    fn out_of_date_on_acquire_rebuilds_on_next_tick() {
        let mut backend = MockBackend::new(2);
        backend.acquire_script = vec![Err(FrameError::OutOfDate)];
        let mut driver = driver(backend);

        assert_eq!(driver.draw_at(0.0).unwrap(), TickOutcome::OutOfDate);
        assert!(driver.lifecycle().is_pending());
        assert!(driver.backend().recorded.borrow().is_empty());

        assert_eq!(driver.draw_at(0.1).unwrap(), TickOutcome::Presented);
        assert_eq!(driver.backend().created, vec![params(1280, 720, 4); 2]);
    }

    #[test]
    fn out_of_date_on_present_rebuilds_on_next_tick() {
        let backend = MockBackend::new(2);
        backend
            .present_script
            .borrow_mut()
            .push_back(Err(FrameError::OutOfDate));
        let mut driver = driver(backend);

        assert_eq!(driver.draw_at(0.0).unwrap(), TickOutcome::OutOfDate);
        assert_eq!(driver.draw_at(0.1).unwrap(), TickOutcome::Presented);
        assert_eq!(driver.lifecycle().rebuilds(), 1);
    }

    #[test]
    fn suboptimal_present_is_tolerated() {
        let backend = MockBackend::new(2);
        backend.present_script.borrow_mut().push_back(Ok(true));
        let mut driver = driver(backend);

        assert_eq!(driver.draw_at(0.0).unwrap(), TickOutcome::Presented);
        assert!(!driver.lifecycle().is_pending());
    }

    #[test]
    fn zero_sized_framebuffer_holds_until_resized() {
        let mut driver = driver(MockBackend::new(2));
        driver.resize(0, 0);

        assert_eq!(driver.draw_at(0.0).unwrap(), TickOutcome::Held);
        assert_eq!(driver.draw_at(0.1).unwrap(), TickOutcome::Held);
        assert_eq!(driver.backend().created.len(), 1);

        driver.resize(300, 200);
        assert_eq!(driver.draw_at(0.2).unwrap(), TickOutcome::Presented);
        assert_eq!(driver.params(), Some(params(300, 200, 4)));
    }

    #[test]
    fn fence_that_never_signals_fails_the_frame() {
        let mut backend = MockBackend::new(2);
        backend.stuck_fence = Some(0);
        let mut driver = driver(backend);

        let err = driver.draw_at(0.0).unwrap_err();
        match err.downcast_ref::<FrameError>() {
            Some(FrameError::FenceTimeout { slot, timeout }) => {
                assert_eq!(*slot, 0);
                assert_eq!(*timeout, Duration::from_millis(20));
            }
            other => panic!("expected fence timeout, got {:?}", other),
        }
    }

    #[test]
    fn device_lost_on_present_is_fatal() {
        let backend = MockBackend::new(2);
        backend
            .present_script
            .borrow_mut()
            .push_back(Err(FrameError::DeviceLost));
        let mut driver = driver(backend);

        let err = driver.draw_at(0.0).unwrap_err();
        assert!(matches!(err.downcast_ref::<FrameError>(), Some(FrameError::DeviceLost)));
    }

    #[test]
    fn shader_change_triggers_a_rebuild() {
        let mut driver = driver(MockBackend::new(2));
        driver.backend.shader_changed = true;
        driver.draw_at(0.0).unwrap();
        assert_eq!(driver.backend().created.len(), 2);
        assert!(!driver.lifecycle().is_pending());
    }

    #[test]
    fn destroy_waits_idle_and_is_idempotent() {
        let mut driver = driver(MockBackend::new(2));
        driver.draw_at(0.0).unwrap();
        driver.destroy().unwrap();
        driver.destroy().unwrap();

        assert_eq!(driver.backend().destroyed, vec![0]);
        assert_eq!(driver.backend().idle_waits.get(), 1);
        assert!(!driver.is_live());
        assert!(driver.draw_at(0.1).is_err());
    }

    #[test]
    fn every_slot_is_reused_only_after_its_fence() {
        let mut driver = driver(MockBackend::new(3));
        for i in 0..30 {
            driver.draw_at(i as f32).unwrap();
        }
        let slots: Vec<usize> = driver
            .backend()
            .recorded
            .borrow()
            .iter()
            .map(|(_, _, slot)| *slot)
            .collect();
        assert_eq!(slots.len(), 30);
        assert!(slots.iter().all(|&s| s < 3));
    }

    #[test]
    fn visible_overlay_reaches_the_backend_with_its_font_atlas() {
        let mut driver = driver(MockBackend::new(2));
        driver.draw_at(0.0).unwrap();
        driver.draw_at(0.1).unwrap();

        let backend = driver.backend();
        assert!(backend.texture_updates >= 1);
        let views = backend.views.borrow();
        assert_eq!(views.len(), 2);
        assert!(views.iter().all(|(_, gui)| gui.is_some()));
        assert!(views[1].1.is_some_and(|primitives| primitives > 0));
        assert!(views.iter().all(|(clear, _)| *clear == Some([0.4, 0.4, 0.5, 1.0])));
    }

    #[test]
    fn hidden_overlay_records_no_gui() {
        let mut driver = driver(MockBackend::new(2));
        driver.set_overlay_visible(false);
        driver.draw_at(0.0).unwrap();

        assert_eq!(driver.backend().texture_updates, 0);
        assert_eq!(driver.backend().views.borrow()[0].1, None);
    }

    #[test]
    fn disabling_clear_in_the_gui_loads_the_previous_frame() {
        let mut driver = driver(MockBackend::new(2));
        driver.overlay_mut().controls.clear_enabled = false;
        driver.draw_at(0.0).unwrap();

        driver.overlay_mut().controls.clear_enabled = true;
        driver.overlay_mut().controls.clear_color = [1.0, 0.0, 0.0];
        driver.draw_at(0.1).unwrap();

        let views = driver.backend().views.borrow().clone();
        assert_eq!(views[0].0, None);
        assert_eq!(views[1].0, Some([1.0, 0.0, 0.0, 1.0]));
    }

    #[test]
    fn thread_slider_change_rebuilds_on_the_next_tick() {
        let mut driver = driver(MockBackend::new(2));
        driver.overlay_mut().controls.thread_count = 8;

        driver.draw_at(0.0).unwrap();
        assert_eq!(driver.params().unwrap().thread_count, 4);
        assert_eq!(driver.target_thread_count(), 8);

        driver.draw_at(0.1).unwrap();
        assert_eq!(driver.backend().created, vec![params(1280, 720, 4), params(1280, 720, 8)]);
        assert_eq!(driver.overlay().controls.thread_count, 8);
    }

    #[test]
    fn keyboard_thread_change_moves_the_slider() {
        let mut driver = driver(MockBackend::new(2));
        driver.request_thread_count(100);
        assert_eq!(driver.overlay().controls.thread_count, 32);
    }

    #[test]
    fn texture_updates_survive_a_stale_surface() {
        let mut backend = MockBackend::new(2);
        backend.acquire_script = vec![Err(FrameError::OutOfDate)];
        let mut driver = driver(backend);

        assert_eq!(driver.draw_at(0.0).unwrap(), TickOutcome::OutOfDate);
        assert_eq!(driver.backend().texture_updates, 0);
        assert!(driver.overlay().has_texture_updates());

        assert_eq!(driver.draw_at(0.1).unwrap(), TickOutcome::Presented);
        assert_eq!(driver.backend().texture_updates, 1);
    }
}
