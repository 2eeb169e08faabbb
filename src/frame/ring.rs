//! The frame ring: a bounded set of in-flight frame slots.
//!
//! A slot is bound to the swapchain image returned by each acquire, and its
//! fence is the only thing guarding reuse of that slot's command buffers and
//! targets. The render-complete semaphore belongs to the slot as well, so it is
//! only signalled again once the same image has come back from presentation.
//! Image-acquired semaphores alone rotate independently, since the image index
//! is not known until the acquire that needs a semaphore has been issued.

use std::time::Duration;

use crate::error::{FrameError, FrameResult};

/// Result of a successful image acquire.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct AcquiredImage {
    pub index: usize,
    pub suboptimal: bool,
}

/// Per-slot synchronization primitives, as exposed by the presentation layer.
pub trait SlotSync {
    /// Number of frame slots (equals the swapchain image count).
    fn slot_count(&self) -> usize;

    /// Acquire the next presentable image, signalling the image-acquired
    /// semaphore belonging to `semaphore_slot`.
    fn acquire_image(&self, semaphore_slot: usize, timeout: Duration) -> FrameResult<AcquiredImage>;

    /// Block until the fence of `slot` is signaled.
    fn wait_fence(&self, slot: usize, timeout: Duration) -> FrameResult<()>;

    /// Return the fence of `slot` to the unsignaled state.
    fn reset_fence(&self, slot: usize) -> FrameResult<()>;
}

/// A slot handed out for the current cycle.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Acquired {
    /// Frame slot (swapchain image) to record into and present. Owns the
    /// fence and the render-complete semaphore used by this frame.
    pub slot: usize,
    /// Slot whose image-acquired semaphore the acquire signalled.
    pub acquire_semaphore: usize,
}

#[derive(Debug)]
pub struct FrameRing {
    slot_count: usize,
    semaphore_index: usize,
    current: Option<usize>,
    timeout: Duration,
}

impl FrameRing {
    pub fn new(slot_count: usize, timeout: Duration) -> Self {
        assert!(slot_count > 0, "frame ring needs at least one slot");
        Self {
            slot_count,
            semaphore_index: 0,
            current: None,
            timeout,
        }
    }

    #[inline]
    pub fn slot_count(&self) -> usize {
        self.slot_count
    }

    /// Slot acquired by the most recent successful `acquire`.
    #[inline]
    pub fn current(&self) -> Option<usize> {
        self.current
    }

    #[inline]
    pub fn timeout(&self) -> Duration {
        self.timeout
    }

    /// Block until a presentable image is ready and return its slot.
    ///
    /// `FrameError::OutOfDate` is passed through for the lifecycle to handle;
    /// suboptimal images are used as-is.
    pub fn acquire<S: SlotSync + ?Sized>(&mut self, sync: &S) -> FrameResult<Acquired> {
        let semaphore = self.semaphore_index;
        let image = sync.acquire_image(semaphore, self.timeout)?;

        if image.index >= self.slot_count {
            return Err(FrameError::SlotOutOfRange {
                index: image.index,
                count: self.slot_count,
            });
        }
        if image.suboptimal {
            log::trace!("acquired suboptimal image {}", image.index);
        }

        self.current = Some(image.index);
        Ok(Acquired {
            slot: image.index,
            acquire_semaphore: semaphore,
        })
    }

    /// Wait for the previous use of `slot` to finish on the GPU, then reset its fence.
    pub fn wait_and_reset<S: SlotSync + ?Sized>(&self, sync: &S, slot: usize) -> FrameResult<()> {
        sync.wait_fence(slot, self.timeout)?;
        sync.reset_fence(slot)
    }

    /// Move to the next image-acquired semaphore once a frame has been presented.
    pub fn advance(&mut self) {
        self.semaphore_index = (self.semaphore_index + 1) % self.slot_count;
    }
}

#[cfg(test)]
pub(crate) mod tests {
    use super::*;
    use std::cell::RefCell;
    use std::collections::VecDeque;

    #[derive(Debug, Clone, Copy, PartialEq, Eq)]
    pub enum FenceState {
        Signaled,
        Unsignaled,
        /// Submitted; will signal when the simulated GPU gets to it.
        Pending(u64),
    }

    /// In-memory presentation layer. Images are handed out round-robin unless
    /// a scripted outcome is queued; waiting on a pending fence "completes"
    /// that submission.
    pub struct FakeSync {
        pub fences: RefCell<Vec<FenceState>>,
        pub next_image: RefCell<usize>,
        pub scripted: RefCell<VecDeque<FrameResult<AcquiredImage>>>,
        pub observed: RefCell<Vec<(usize, u64)>>,
        pub acquire_semaphores: RefCell<Vec<usize>>,
    }

    impl FakeSync {
        pub fn new(slots: usize) -> Self {
            Self {
                fences: RefCell::new(vec![FenceState::Signaled; slots]),
                next_image: RefCell::new(0),
                scripted: RefCell::new(VecDeque::new()),
                observed: RefCell::new(Vec::new()),
                acquire_semaphores: RefCell::new(Vec::new()),
            }
        }

        pub fn submit(&self, slot: usize, id: u64) {
            let mut fences = self.fences.borrow_mut();
            assert_eq!(fences[slot], FenceState::Unsignaled, "submitted with a fence not reset");
            fences[slot] = FenceState::Pending(id);
        }
    }

    impl SlotSync for FakeSync {
        fn slot_count(&self) -> usize {
            self.fences.borrow().len()
        }

        fn acquire_image(&self, semaphore_slot: usize, _: Duration) -> FrameResult<AcquiredImage> {
            self.acquire_semaphores.borrow_mut().push(semaphore_slot);
            if let Some(outcome) = self.scripted.borrow_mut().pop_front() {
                return outcome;
            }
            let mut next = self.next_image.borrow_mut();
            let index = *next;
            *next = (index + 1) % self.slot_count();
            Ok(AcquiredImage {
                index,
                suboptimal: false,
            })
        }

        fn wait_fence(&self, slot: usize, timeout: Duration) -> FrameResult<()> {
            let mut fences = self.fences.borrow_mut();
            match fences[slot] {
                FenceState::Signaled => Ok(()),
                FenceState::Pending(id) => {
                    self.observed.borrow_mut().push((slot, id));
                    fences[slot] = FenceState::Signaled;
                    Ok(())
                }
                FenceState::Unsignaled => Err(FrameError::FenceTimeout { slot, timeout }),
            }
        }

        fn reset_fence(&self, slot: usize) -> FrameResult<()> {
            self.fences.borrow_mut()[slot] = FenceState::Unsignaled;
            Ok(())
        }
    }

    const TIMEOUT: Duration = Duration::from_millis(10);

    #[test]
    fn acquire_reports_slot_and_rotating_semaphore() {
        let sync = FakeSync::new(3);
        let mut ring = FrameRing::new(3, TIMEOUT);

        let first = ring.acquire(&sync).unwrap();
        assert_eq!(first, Acquired { slot: 0, acquire_semaphore: 0 });
        assert_eq!(ring.current(), Some(0));
        ring.advance();

        let second = ring.acquire(&sync).unwrap();
        assert_eq!(second, Acquired { slot: 1, acquire_semaphore: 1 });
    }

    #[test]
    fn fence_wait_observes_the_previous_use_of_the_slot() {
        let sync = FakeSync::new(3);
        let mut ring = FrameRing::new(3, TIMEOUT);
        let mut last_submit = [None::<u64>; 3];

        for frame in 0..40u64 {
            let acquired = ring.acquire(&sync).unwrap();
            ring.wait_and_reset(&sync, acquired.slot).unwrap();

            if let Some(&(slot, id)) = sync.observed.borrow().last() {
                if slot == acquired.slot && last_submit[slot].is_some() {
                    assert_eq!(Some(id), last_submit[slot], "stale fence observed");
                }
            }

            sync.submit(acquired.slot, frame);
            last_submit[acquired.slot] = Some(frame);
            ring.advance();
        }

        // Every slot was waited on once per reuse, each time for its latest submission.
        let observed = sync.observed.borrow();
        assert_eq!(observed.len(), 37);
        for window in observed.windows(2) {
            assert!(window[0].1 < window[1].1);
        }
    }

    #[test]
    fn out_of_date_is_forwarded_without_touching_the_ring() {
        let sync = FakeSync::new(2);
        sync.scripted.borrow_mut().push_back(Err(FrameError::OutOfDate));
        let mut ring = FrameRing::new(2, TIMEOUT);

        assert!(matches!(ring.acquire(&sync), Err(FrameError::OutOfDate)));
        assert_eq!(ring.current(), None);
    }

    #[test]
    fn suboptimal_images_are_used() {
        let sync = FakeSync::new(2);
        sync.scripted.borrow_mut().push_back(Ok(AcquiredImage {
            index: 1,
            suboptimal: true,
        }));
        let mut ring = FrameRing::new(2, TIMEOUT);
        assert_eq!(ring.acquire(&sync).unwrap().slot, 1);
    }

    #[test]
    fn image_index_beyond_slot_count_is_rejected() {
        let sync = FakeSync::new(2);
        sync.scripted.borrow_mut().push_back(Ok(AcquiredImage {
            index: 5,
            suboptimal: false,
        }));
        let mut ring = FrameRing::new(2, TIMEOUT);
        assert!(matches!(
            ring.acquire(&sync),
            Err(FrameError::SlotOutOfRange { index: 5, count: 2 })
        ));
    }

    #[test]
    fn fence_that_never_signals_is_a_distinct_timeout() {
        let sync = FakeSync::new(2);
        let ring = FrameRing::new(2, TIMEOUT);
        // Reset without a matching submission: nothing will ever signal it.
        sync.reset_fence(1).unwrap();

        match ring.wait_and_reset(&sync, 1) {
            Err(FrameError::FenceTimeout { slot, timeout }) => {
                assert_eq!(slot, 1);
                assert_eq!(timeout, TIMEOUT);
            }
            other => panic!("expected fence timeout, got {:?}", other),
        }
    }

    #[test]
    fn out_of_order_images_keep_render_complete_on_their_own_slot() {
        let sync = FakeSync::new(2);
        for index in [0, 1, 1] {
            sync.scripted.borrow_mut().push_back(Ok(AcquiredImage {
                index,
                suboptimal: false,
            }));
        }
        let mut ring = FrameRing::new(2, TIMEOUT);

        let mut frames = Vec::new();
        for _ in 0..3 {
            frames.push(ring.acquire(&sync).unwrap());
            ring.advance();
        }

        // Render-complete follows the image: image 0 was never re-acquired,
        // so its semaphore is not signalled a second time.
        let render_complete: Vec<usize> = frames.iter().map(|f| f.slot).collect();
        assert_eq!(render_complete, vec![0, 1, 1]);
        let acquire: Vec<usize> = frames.iter().map(|f| f.acquire_semaphore).collect();
        assert_eq!(acquire, vec![0, 1, 0]);
    }

    #[test]
    fn semaphore_index_wraps() {
        let mut ring = FrameRing::new(2, TIMEOUT);
        let sync = FakeSync::new(2);
        for _ in 0..5 {
            ring.acquire(&sync).unwrap();
            ring.advance();
        }
        assert_eq!(*sync.acquire_semaphores.borrow(), vec![0, 1, 0, 1, 0]);
    }
}
