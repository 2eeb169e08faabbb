//! Swapchain lifecycle state machine.
//!
//! Every condition that invalidates the swapchain-dependent resource set
//! funnels into one pending flag. The frame driver drains it at the start of
//! its next tick with a full teardown and rebuild; nothing is patched in place.

use std::fmt;

/// Framebuffer dimensions in pixels.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct Extent {
    pub width: u32,
    pub height: u32,
}

impl Extent {
    pub const fn new(width: u32, height: u32) -> Self {
        Self { width, height }
    }

    /// A minimised window reports a zero-sized framebuffer.
    pub fn is_empty(&self) -> bool {
        self.width == 0 || self.height == 0
    }
}

impl fmt::Display for Extent {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}x{}", self.width, self.height)
    }
}

/// Inputs that size the swapchain-dependent resource set.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct FrameParams {
    pub extent: Extent,
    pub thread_count: usize,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum LifecycleState {
    Live,
    PendingRebuild,
    Rebuilding,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RebuildTrigger {
    /// Acquire or present reported the surface as out of date.
    SurfaceOutOfDate,
    /// The windowing layer reported a new framebuffer size.
    Resize(Extent),
    /// The recording thread count was changed at runtime.
    ThreadCount(usize),
    /// Shader binaries changed on disk.
    ShaderReload,
}

#[derive(Debug)]
pub struct SwapchainLifecycle {
    state: LifecycleState,
    /// Parameters the live resource set was built with.
    current: FrameParams,
    /// Parameters the next rebuild will use.
    target: FrameParams,
    rebuilds: u64,
}

impl SwapchainLifecycle {
    /// Start live with resources built from `params`.
    pub fn new(params: FrameParams) -> Self {
        Self {
            state: LifecycleState::Live,
            current: params,
            target: params,
            rebuilds: 0,
        }
    }

    #[inline]
    pub fn state(&self) -> LifecycleState {
        self.state
    }

    #[inline]
    pub fn is_pending(&self) -> bool {
        self.state == LifecycleState::PendingRebuild
    }

    #[inline]
    pub fn current(&self) -> FrameParams {
        self.current
    }

    /// Parameters the next rebuild would use.
    #[inline]
    pub fn target(&self) -> FrameParams {
        self.target
    }

    /// Completed rebuilds since creation.
    #[inline]
    pub fn rebuilds(&self) -> u64 {
        self.rebuilds
    }

    /// Record a rebuild condition. Repeated triggers before the next rebuild
    /// coalesce; the latest value of each parameter wins.
    pub fn trigger(&mut self, trigger: RebuildTrigger) {
        match trigger {
            RebuildTrigger::Resize(extent) => self.target.extent = extent,
            RebuildTrigger::ThreadCount(count) => self.target.thread_count = count,
            RebuildTrigger::SurfaceOutOfDate | RebuildTrigger::ShaderReload => {}
        }

        if self.state == LifecycleState::Live {
            log::debug!("rebuild requested: {:?}", trigger);
        }
        // A trigger raised while rebuilding still needs a later pass.
        self.state = LifecycleState::PendingRebuild;
    }

    /// Enter `Rebuilding` and hand out the target parameters.
    ///
    /// Returns `None` when nothing is pending.
    pub fn begin_rebuild(&mut self) -> Option<FrameParams> {
        if self.state != LifecycleState::PendingRebuild {
            return None;
        }
        self.state = LifecycleState::Rebuilding;
        Some(self.target)
    }

    /// The resource set now reflects `params`.
    pub fn finish_rebuild(&mut self, params: FrameParams) {
        self.current = params;
        self.rebuilds += 1;
        if self.state == LifecycleState::Rebuilding {
            self.state = LifecycleState::Live;
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn params(w: u32, h: u32, threads: usize) -> FrameParams {
        FrameParams {
            extent: Extent::new(w, h),
            thread_count: threads,
        }
    }

    #[test]
    fn starts_live_with_nothing_pending() {
        let mut lifecycle = SwapchainLifecycle::new(params(1280, 720, 4));
        assert_eq!(lifecycle.state(), LifecycleState::Live);
        assert_eq!(lifecycle.begin_rebuild(), None);
    }

    #[test]
    fn repeated_resizes_coalesce_into_one_rebuild() {
        let mut lifecycle = SwapchainLifecycle::new(params(1280, 720, 4));
        lifecycle.trigger(RebuildTrigger::Resize(Extent::new(800, 600)));
        lifecycle.trigger(RebuildTrigger::Resize(Extent::new(800, 600)));
        assert!(lifecycle.is_pending());

        let target = lifecycle.begin_rebuild().unwrap();
        assert_eq!(target, params(800, 600, 4));
        assert_eq!(lifecycle.state(), LifecycleState::Rebuilding);
        lifecycle.finish_rebuild(target);

        assert_eq!(lifecycle.state(), LifecycleState::Live);
        assert_eq!(lifecycle.begin_rebuild(), None);
        assert_eq!(lifecycle.rebuilds(), 1);
    }

    #[test]
    fn last_resize_wins() {
        let mut lifecycle = SwapchainLifecycle::new(params(1280, 720, 4));
        lifecycle.trigger(RebuildTrigger::Resize(Extent::new(640, 480)));
        lifecycle.trigger(RebuildTrigger::Resize(Extent::new(1024, 768)));
        assert_eq!(lifecycle.begin_rebuild().unwrap().extent, Extent::new(1024, 768));
    }

    #[test]
    fn thread_count_and_resize_batch_together() {
        let mut lifecycle = SwapchainLifecycle::new(params(1280, 720, 4));
        lifecycle.trigger(RebuildTrigger::ThreadCount(8));
        lifecycle.trigger(RebuildTrigger::Resize(Extent::new(800, 600)));
        let target = lifecycle.begin_rebuild().unwrap();
        assert_eq!(target, params(800, 600, 8));
        // Current stays on the old set until the rebuild completes.
        assert_eq!(lifecycle.current(), params(1280, 720, 4));
        lifecycle.finish_rebuild(target);
        assert_eq!(lifecycle.current(), target);
    }

    #[test]
    fn out_of_date_rebuilds_with_unchanged_parameters() {
        let mut lifecycle = SwapchainLifecycle::new(params(1280, 720, 4));
        lifecycle.trigger(RebuildTrigger::SurfaceOutOfDate);
        assert_eq!(lifecycle.begin_rebuild(), Some(params(1280, 720, 4)));
    }

    #[test]
    fn trigger_during_rebuild_keeps_it_pending() {
        let mut lifecycle = SwapchainLifecycle::new(params(1280, 720, 4));
        lifecycle.trigger(RebuildTrigger::ShaderReload);
        let target = lifecycle.begin_rebuild().unwrap();
        lifecycle.trigger(RebuildTrigger::Resize(Extent::new(300, 200)));
        lifecycle.finish_rebuild(target);
        assert!(lifecycle.is_pending());
    }

    #[test]
    fn empty_extent_detection() {
        assert!(Extent::new(0, 600).is_empty());
        assert!(Extent::new(800, 0).is_empty());
        assert!(!Extent::new(1, 1).is_empty());
        assert_eq!(Extent::new(800, 600).to_string(), "800x600");
    }
}
