//! Frames in flight and the per-frame control flow.
//!
//! [`FrameRing`] holds one value per frame-in-flight slot and cycles through
//! them. [`run_frame`] is the frame loop itself, written against the
//! [`FrameDriver`] trait so the ordering of waits, acquisition, submission,
//! presentation and swapchain recreation can be checked without a GPU.
//!
//! # Synchronization Flow
//!
//! ```text
//! 1. Wait on the slot's in-flight fence
//! 2. Acquire a swapchain image (signals the slot's image-available semaphore)
//! 3. Reset the fence, record every pass into the slot's command buffer
//! 4. Submit:
//!    - wait image-available at COLOR_ATTACHMENT_OUTPUT
//!    - signal the image's render-finished semaphore
//!    - signal the slot's fence
//! 5. Present (waits on render-finished)
//! 6. Advance to the next slot
//! ```

use tracing::{debug, info};

use deferred_rhi::RhiResult;
use deferred_rhi::sync::FRAMES_IN_FLIGHT;

/// One `T` per frame-in-flight slot plus the index of the current slot.
#[derive(Debug)]
pub struct FrameRing<T> {
    slots: Vec<T>,
    current: usize,
}

impl<T> FrameRing<T> {
    pub fn try_from_fn<E>(f: impl FnMut(usize) -> Result<T, E>) -> Result<Self, E> {
        let slots = (0..FRAMES_IN_FLIGHT).map(f).collect::<Result<Vec<_>, E>>()?;
        debug!("Frame ring created with {} slots", slots.len());
        Ok(Self { slots, current: 0 })
    }

    pub fn from_fn(mut f: impl FnMut(usize) -> T) -> Self {
        match Self::try_from_fn(|i| Ok::<_, std::convert::Infallible>(f(i))) {
            Ok(ring) => ring,
            Err(never) => match never {},
        }
    }

    #[inline]
    pub fn current_index(&self) -> usize {
        self.current
    }

    #[inline]
    pub fn current(&self) -> &T {
        &self.slots[self.current]
    }

    #[inline]
    pub fn current_mut(&mut self) -> &mut T {
        &mut self.slots[self.current]
    }

    pub fn advance(&mut self) {
        self.current = (self.current + 1) % self.slots.len();
    }

    pub fn iter_mut(&mut self) -> impl Iterator<Item = &mut T> {
        self.slots.iter_mut()
    }

    #[inline]
    pub fn len(&self) -> usize {
        self.slots.len()
    }

    #[inline]
    pub fn is_empty(&self) -> bool {
        self.slots.is_empty()
    }
}

/// Result of asking the swapchain for an image.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum AcquireOutcome {
    Ready { image_index: u32, suboptimal: bool },
    OutOfDate,
}

/// Result of queueing an image for presentation.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum PresentOutcome {
    Presented,
    Suboptimal,
    OutOfDate,
}

/// What happened to one call of [`run_frame`].
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum FrameOutcome {
    /// Submitted and presented; the swapchain is still good.
    Presented,
    /// Submitted and presented, then the swapchain was recreated.
    PresentedAndRecreated,
    /// Acquisition failed with an out-of-date swapchain. The swapchain was
    /// recreated and nothing was submitted.
    Dropped,
}

/// The GPU-facing steps of one frame.
pub trait FrameDriver {
    /// Whether the window changed size since the last recreation.
    fn resize_pending(&self) -> bool;

    /// Blocks until the current slot's previous submission has finished.
    fn wait_for_slot(&mut self) -> RhiResult<()>;

    /// Acquires the next swapchain image for the current slot.
    fn acquire(&mut self) -> RhiResult<AcquireOutcome>;

    /// Resets the slot's fence, records every pass targeting `image_index`
    /// and submits.
    fn record_and_submit(&mut self, image_index: u32) -> RhiResult<()>;

    fn present(&mut self, image_index: u32) -> RhiResult<PresentOutcome>;

    /// Moves to the next frame-in-flight slot.
    fn advance(&mut self);

    /// Rebuilds the swapchain and everything sized by it.
    fn recreate(&mut self) -> RhiResult<()>;

    /// Fails when validation reported errors since the last check.
    fn check_validation(&self) -> RhiResult<()>;
}

/// Runs one frame through `driver`.
pub fn run_frame<D: FrameDriver + ?Sized>(driver: &mut D) -> RhiResult<FrameOutcome> {
    if driver.resize_pending() {
        info!("Window resized, recreating swapchain");
        driver.recreate()?;
    }

    driver.wait_for_slot()?;

    let (image_index, acquire_suboptimal) = match driver.acquire()? {
        AcquireOutcome::Ready {
            image_index,
            suboptimal,
        } => (image_index, suboptimal),
        AcquireOutcome::OutOfDate => {
            debug!("Swapchain out of date during acquire, dropping frame");
            driver.recreate()?;
            return Ok(FrameOutcome::Dropped);
        }
    };

    driver.record_and_submit(image_index)?;
    let presented = driver.present(image_index)?;
    driver.advance();

    let outcome = if acquire_suboptimal || presented != PresentOutcome::Presented {
        debug!(
            "Swapchain needs recreation (acquire suboptimal: {}, present: {:?})",
            acquire_suboptimal, presented
        );
        driver.recreate()?;
        FrameOutcome::PresentedAndRecreated
    } else {
        FrameOutcome::Presented
    };

    driver.check_validation()?;
    Ok(outcome)
}

#[cfg(test)]
mod tests {
    use std::collections::VecDeque;

    use deferred_rhi::RhiError;

    use super::*;

    #[derive(Debug, Clone, PartialEq, Eq)]
    enum Call {
        Wait { fence: usize },
        Acquire,
        Submit { command_buffer: usize, fence: usize, image: u32 },
        Present { image: u32 },
        Advance,
        Recreate,
        CheckValidation,
    }

    /// Records every step. Slot `i` owns command buffer `100 + i` and fence
    /// `200 + i`.
    struct MockDriver {
        calls: Vec<Call>,
        slots: FrameRing<(usize, usize)>,
        acquires: VecDeque<AcquireOutcome>,
        presents: VecDeque<PresentOutcome>,
        resize_pending: bool,
        validation_errors: u32,
    }

    impl MockDriver {
        fn new() -> Self {
            Self {
                calls: Vec::new(),
                slots: FrameRing::from_fn(|i| (100 + i, 200 + i)),
                acquires: VecDeque::new(),
                presents: VecDeque::new(),
                resize_pending: false,
                validation_errors: 0,
            }
        }

        fn count(&self, pred: impl Fn(&Call) -> bool) -> usize {
            self.calls.iter().filter(|c| pred(c)).count()
        }
    }

    impl FrameDriver for MockDriver {
        fn resize_pending(&self) -> bool {
            self.resize_pending
        }

        fn wait_for_slot(&mut self) -> RhiResult<()> {
            let fence = self.slots.current().1;
            self.calls.push(Call::Wait { fence });
            Ok(())
        }

        fn acquire(&mut self) -> RhiResult<AcquireOutcome> {
            self.calls.push(Call::Acquire);
            Ok(self.acquires.pop_front().unwrap_or(AcquireOutcome::Ready {
                image_index: 0,
                suboptimal: false,
            }))
        }

        fn record_and_submit(&mut self, image_index: u32) -> RhiResult<()> {
            let (command_buffer, fence) = *self.slots.current();
            self.calls.push(Call::Submit {
                command_buffer,
                fence,
                image: image_index,
            });
            Ok(())
        }

        fn present(&mut self, image_index: u32) -> RhiResult<PresentOutcome> {
            self.calls.push(Call::Present { image: image_index });
            Ok(self.presents.pop_front().unwrap_or(PresentOutcome::Presented))
        }

        fn advance(&mut self) {
            self.calls.push(Call::Advance);
            self.slots.advance();
        }

        fn recreate(&mut self) -> RhiResult<()> {
            self.calls.push(Call::Recreate);
            self.resize_pending = false;
            Ok(())
        }

        fn check_validation(&self) -> RhiResult<()> {
            if self.validation_errors > 0 {
                return Err(RhiError::ValidationFailed {
                    count: self.validation_errors,
                    last: "mock".to_string(),
                });
            }
            Ok(())
        }
    }

    // check_validation takes &self; the call is logged here instead.
    fn frame(driver: &mut MockDriver) -> RhiResult<FrameOutcome> {
        let result = run_frame(driver);
        if result.is_ok() {
            driver.calls.push(Call::CheckValidation);
        }
        result
    }

    #[test]
    fn test_out_of_date_acquire_recreates_once_without_submit() {
        let mut driver = MockDriver::new();
        driver.acquires.push_back(AcquireOutcome::OutOfDate);

        assert_eq!(frame(&mut driver).unwrap(), FrameOutcome::Dropped);

        assert_eq!(driver.count(|c| *c == Call::Recreate), 1);
        assert_eq!(driver.count(|c| matches!(c, Call::Submit { .. })), 0);
        assert_eq!(driver.count(|c| matches!(c, Call::Present { .. })), 0);
        assert_eq!(driver.count(|c| *c == Call::Advance), 0);
        assert_eq!(driver.slots.current_index(), 0);
    }

    #[test]
    fn test_consecutive_frames_use_disjoint_slots() {
        let mut driver = MockDriver::new();
        driver.acquires.push_back(AcquireOutcome::Ready {
            image_index: 0,
            suboptimal: false,
        });
        driver.acquires.push_back(AcquireOutcome::Ready {
            image_index: 1,
            suboptimal: false,
        });

        frame(&mut driver).unwrap();
        frame(&mut driver).unwrap();

        let submits: Vec<(usize, usize)> = driver
            .calls
            .iter()
            .filter_map(|c| match c {
                Call::Submit {
                    command_buffer,
                    fence,
                    ..
                } => Some((*command_buffer, *fence)),
                _ => None,
            })
            .collect();
        assert_eq!(submits.len(), 2);
        assert_ne!(submits[0].0, submits[1].0);
        assert_ne!(submits[0].1, submits[1].1);
    }

    #[test]
    fn test_frame_waits_on_the_fence_it_submits_with() {
        let mut driver = MockDriver::new();
        for _ in 0..3 {
            frame(&mut driver).unwrap();
        }

        let waits: Vec<usize> = driver
            .calls
            .iter()
            .filter_map(|c| match c {
                Call::Wait { fence } => Some(*fence),
                _ => None,
            })
            .collect();
        let submitted: Vec<usize> = driver
            .calls
            .iter()
            .filter_map(|c| match c {
                Call::Submit { fence, .. } => Some(*fence),
                _ => None,
            })
            .collect();
        assert_eq!(waits, submitted);
        // Slot 0 comes back on the third frame.
        assert_eq!(waits, vec![200, 201, 200]);
    }

    #[test]
    fn test_step_order_of_a_clean_frame() {
        let mut driver = MockDriver::new();
        driver.acquires.push_back(AcquireOutcome::Ready {
            image_index: 2,
            suboptimal: false,
        });

        assert_eq!(frame(&mut driver).unwrap(), FrameOutcome::Presented);
        assert_eq!(
            driver.calls,
            vec![
                Call::Wait { fence: 200 },
                Call::Acquire,
                Call::Submit {
                    command_buffer: 100,
                    fence: 200,
                    image: 2
                },
                Call::Present { image: 2 },
                Call::Advance,
                Call::CheckValidation,
            ]
        );
    }

    #[test]
    fn test_suboptimal_present_recreates_after_advancing() {
        let mut driver = MockDriver::new();
        driver.presents.push_back(PresentOutcome::Suboptimal);

        assert_eq!(
            frame(&mut driver).unwrap(),
            FrameOutcome::PresentedAndRecreated
        );
        let advance = driver.calls.iter().position(|c| *c == Call::Advance);
        let recreate = driver.calls.iter().position(|c| *c == Call::Recreate);
        assert!(advance.unwrap() < recreate.unwrap());
    }

    #[test]
    fn test_suboptimal_acquire_still_presents() {
        let mut driver = MockDriver::new();
        driver.acquires.push_back(AcquireOutcome::Ready {
            image_index: 1,
            suboptimal: true,
        });

        assert_eq!(
            frame(&mut driver).unwrap(),
            FrameOutcome::PresentedAndRecreated
        );
        assert_eq!(driver.count(|c| matches!(c, Call::Present { image: 1 })), 1);
        assert_eq!(driver.count(|c| *c == Call::Recreate), 1);
    }

    #[test]
    fn test_pending_resize_recreates_before_waiting() {
        let mut driver = MockDriver::new();
        driver.resize_pending = true;

        frame(&mut driver).unwrap();

        assert_eq!(driver.calls[0], Call::Recreate);
        assert!(matches!(driver.calls[1], Call::Wait { .. }));
        assert!(!driver.resize_pending);
    }

    #[test]
    fn test_validation_errors_fail_the_frame_after_presenting() {
        let mut driver = MockDriver::new();
        driver.validation_errors = 2;

        let result = frame(&mut driver);

        assert!(matches!(
            result,
            Err(RhiError::ValidationFailed { count: 2, .. })
        ));
        assert_eq!(driver.count(|c| matches!(c, Call::Present { .. })), 1);
    }

    #[test]
    fn test_ring_wraps_after_frames_in_flight() {
        let mut ring = FrameRing::from_fn(|i| i * 10);
        assert_eq!(ring.len(), FRAMES_IN_FLIGHT);
        for expected in [0, 10, 0, 10] {
            assert_eq!(*ring.current(), expected);
            ring.advance();
        }
    }
}
