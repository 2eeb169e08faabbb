//! The frame core: slot ring, recording fan-out, swapchain lifecycle and the
//! driver that sequences them every tick. Nothing in here talks to Vulkan
//! directly; the backend plugs in through [`FrameBackend`].

pub mod driver;
pub mod fanout;
pub mod grid;
pub mod lifecycle;
pub mod ring;

pub use driver::{DriverSettings, FrameBackend, FrameDriver, FrameView, SwapchainResources, TickOutcome};
pub use fanout::{record_segments, segment_count, segment_ranges, SegmentRecorder};
pub use grid::SlotGrid;
pub use lifecycle::{Extent, FrameParams, LifecycleState, RebuildTrigger, SwapchainLifecycle};
pub use ring::{Acquired, AcquiredImage, FrameRing, SlotSync};
