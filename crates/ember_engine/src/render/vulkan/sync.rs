//! Frame synchronization primitives and pacing
//!
//! `FramePacer` holds the frames-in-flight bookkeeping as a pure state
//! machine over a [`FrameDriver`], so the ordering invariant (a slot's fence
//! is waited on before any of its resources are reused) is testable without a
//! GPU. The renderer implements `FrameDriver` against real Vulkan objects.

use ash::vk;
use std::rc::Rc;

use crate::render::vulkan::{LogicalDevice, VulkanError, VulkanResult};

/// Binary semaphore with RAII cleanup
pub struct Semaphore {
    device: Rc<LogicalDevice>,
    semaphore: vk::Semaphore,
}

impl Semaphore {
    /// Create an unsignaled semaphore
    pub fn new(device: Rc<LogicalDevice>) -> VulkanResult<Self> {
        let semaphore = unsafe {
            device
                .device
                .create_semaphore(&vk::SemaphoreCreateInfo::default(), None)
                .map_err(VulkanError::Api)?
        };
        Ok(Self { device, semaphore })
    }

    /// Get the semaphore handle
    pub fn handle(&self) -> vk::Semaphore {
        self.semaphore
    }
}

impl Drop for Semaphore {
    fn drop(&mut self) {
        unsafe {
            self.device.device.destroy_semaphore(self.semaphore, None);
        }
    }
}

/// Fence with RAII cleanup
pub struct Fence {
    device: Rc<LogicalDevice>,
    fence: vk::Fence,
}

impl Fence {
    /// Create a fence, optionally already signaled
    ///
    /// Frame fences start signaled so the first wait on each slot returns
    /// immediately.
    pub fn new(device: Rc<LogicalDevice>, signaled: bool) -> VulkanResult<Self> {
        let flags = if signaled {
            vk::FenceCreateFlags::SIGNALED
        } else {
            vk::FenceCreateFlags::empty()
        };
        let create_info = vk::FenceCreateInfo::builder().flags(flags);
        let fence = unsafe {
            device
                .device
                .create_fence(&create_info, None)
                .map_err(VulkanError::Api)?
        };
        Ok(Self { device, fence })
    }

    /// Block until the fence signals
    pub fn wait(&self) -> VulkanResult<()> {
        unsafe {
            self.device
                .device
                .wait_for_fences(&[self.fence], true, u64::MAX)
                .map_err(VulkanError::Api)
        }
    }

    /// Return the fence to the unsignaled state
    pub fn reset(&self) -> VulkanResult<()> {
        unsafe {
            self.device
                .device
                .reset_fences(&[self.fence])
                .map_err(VulkanError::Api)
        }
    }

    /// Get the fence handle
    pub fn handle(&self) -> vk::Fence {
        self.fence
    }
}

impl Drop for Fence {
    fn drop(&mut self) {
        unsafe {
            self.device.device.destroy_fence(self.fence, None);
        }
    }
}

/// Synchronization objects for one frame slot
pub struct FrameSync {
    /// Signaled when the swapchain image is ready to be written
    pub image_available: Semaphore,
    /// Signaled when rendering to the image has finished
    pub render_finished: Semaphore,
    /// Signaled when the slot's command buffer has fully executed
    pub in_flight: Fence,
}

impl FrameSync {
    /// Create one slot's sync objects (fence starts signaled)
    pub fn new(device: Rc<LogicalDevice>) -> VulkanResult<Self> {
        Ok(Self {
            image_available: Semaphore::new(device.clone())?,
            render_finished: Semaphore::new(device.clone())?,
            in_flight: Fence::new(device, true)?,
        })
    }
}

/// Outcome of one frame-loop iteration
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FrameStatus {
    /// The frame was submitted and queued for presentation
    Rendered,
    /// The swapchain no longer matches the surface; recreate and retry.
    /// Not an error: expected on resize and some window-system events.
    SwapchainStale,
}

/// The per-frame operations the pacer sequences
///
/// Every method takes the frame slot the pacer is working through; slot
/// indices stay below the slot count the pacer was built with.
pub trait FrameDriver {
    /// Block until the slot's previous submission has finished
    fn wait_for_fence(&mut self, slot: usize) -> VulkanResult<()>;
    /// Acquire a swapchain image; `None` means the swapchain is stale
    fn acquire_image(&mut self, slot: usize) -> VulkanResult<Option<u32>>;
    /// Unsignal the slot's fence ahead of resubmission
    fn reset_fence(&mut self, slot: usize) -> VulkanResult<()>;
    /// Record the slot's command buffer and submit it, fencing the slot
    fn record_and_submit(&mut self, slot: usize, image_index: u32) -> VulkanResult<()>;
    /// Present the image; `true` means the swapchain went stale
    fn present(&mut self, slot: usize, image_index: u32) -> VulkanResult<bool>;
}

/// Frames-in-flight sequencer
///
/// Orders one frame as wait-fence, acquire, reset-fence, submit, present.
/// The fence is reset only after a successful acquire; an abandoned frame
/// leaves it signaled so the next attempt on the slot cannot deadlock.
#[derive(Debug, Clone, Copy)]
pub struct FramePacer {
    current_slot: usize,
    slot_count: usize,
}

impl FramePacer {
    /// Create a pacer cycling through `slot_count` frame slots
    pub fn new(slot_count: usize) -> Self {
        Self {
            current_slot: 0,
            slot_count,
        }
    }

    /// Slot the next frame will use
    pub fn current_slot(&self) -> usize {
        self.current_slot
    }

    /// Drive one frame through the driver
    pub fn run_frame<D: FrameDriver>(&mut self, driver: &mut D) -> VulkanResult<FrameStatus> {
        let slot = self.current_slot;

        driver.wait_for_fence(slot)?;

        let image_index = match driver.acquire_image(slot)? {
            Some(index) => index,
            // Abandon without touching the fence or advancing; the slot is
            // retried after recreation.
            None => return Ok(FrameStatus::SwapchainStale),
        };

        driver.reset_fence(slot)?;
        driver.record_and_submit(slot, image_index)?;
        let stale = driver.present(slot, image_index)?;

        self.current_slot = (self.current_slot + 1) % self.slot_count;

        if stale {
            Ok(FrameStatus::SwapchainStale)
        } else {
            Ok(FrameStatus::Rendered)
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[derive(Debug, Clone, Copy, PartialEq, Eq)]
    enum Op {
        Wait(usize),
        Acquire(usize),
        Reset(usize),
        Submit(usize, u32),
        Present(usize, u32),
    }

    #[derive(Default)]
    struct MockDriver {
        ops: Vec<Op>,
        stale_on_acquire: bool,
        stale_on_present: bool,
        next_image: u32,
    }

    impl FrameDriver for MockDriver {
        fn wait_for_fence(&mut self, slot: usize) -> VulkanResult<()> {
            self.ops.push(Op::Wait(slot));
            Ok(())
        }

        fn acquire_image(&mut self, slot: usize) -> VulkanResult<Option<u32>> {
            self.ops.push(Op::Acquire(slot));
            if self.stale_on_acquire {
                Ok(None)
            } else {
                Ok(Some(self.next_image))
            }
        }

        fn reset_fence(&mut self, slot: usize) -> VulkanResult<()> {
            self.ops.push(Op::Reset(slot));
            Ok(())
        }

        fn record_and_submit(&mut self, slot: usize, image_index: u32) -> VulkanResult<()> {
            self.ops.push(Op::Submit(slot, image_index));
            Ok(())
        }

        fn present(&mut self, slot: usize, image_index: u32) -> VulkanResult<bool> {
            self.ops.push(Op::Present(slot, image_index));
            Ok(self.stale_on_present)
        }
    }

    #[test]
    fn frame_runs_in_wait_acquire_reset_submit_present_order() {
        let mut pacer = FramePacer::new(2);
        let mut driver = MockDriver {
            next_image: 1,
            ..Default::default()
        };

        let status = pacer.run_frame(&mut driver).unwrap();

        assert_eq!(status, FrameStatus::Rendered);
        assert_eq!(
            driver.ops,
            vec![
                Op::Wait(0),
                Op::Acquire(0),
                Op::Reset(0),
                Op::Submit(0, 1),
                Op::Present(0, 1),
            ]
        );
    }

    #[test]
    fn slots_cycle_modulo_slot_count() {
        let mut pacer = FramePacer::new(2);
        let mut driver = MockDriver::default();

        for expected_slot in [0, 1, 0, 1] {
            assert_eq!(pacer.current_slot(), expected_slot);
            pacer.run_frame(&mut driver).unwrap();
        }
    }

    #[test]
    fn slot_fence_is_waited_before_any_reuse() {
        let mut pacer = FramePacer::new(2);
        let mut driver = MockDriver::default();

        for _ in 0..6 {
            pacer.run_frame(&mut driver).unwrap();
        }

        // For every slot, each submit must be preceded by a wait on that
        // slot that comes after the previous submit.
        for slot in 0..2 {
            let mut last_submit: Option<usize> = None;
            for (i, op) in driver.ops.iter().enumerate() {
                match *op {
                    Op::Submit(s, _) if s == slot => {
                        if let Some(prev) = last_submit {
                            let waited = driver.ops[prev + 1..i]
                                .iter()
                                .any(|op| *op == Op::Wait(slot));
                            assert!(waited, "slot {slot} reused without fence wait");
                        }
                        last_submit = Some(i);
                    }
                    _ => {}
                }
            }
        }
    }

    #[test]
    fn stale_acquire_abandons_without_reset_or_advance() {
        let mut pacer = FramePacer::new(2);
        let mut driver = MockDriver {
            stale_on_acquire: true,
            ..Default::default()
        };

        let status = pacer.run_frame(&mut driver).unwrap();

        assert_eq!(status, FrameStatus::SwapchainStale);
        assert_eq!(driver.ops, vec![Op::Wait(0), Op::Acquire(0)]);
        // The fence stays signaled and the slot is retried.
        assert_eq!(pacer.current_slot(), 0);
    }

    #[test]
    fn stale_present_still_advances_the_slot() {
        let mut pacer = FramePacer::new(3);
        let mut driver = MockDriver {
            stale_on_present: true,
            ..Default::default()
        };

        let status = pacer.run_frame(&mut driver).unwrap();

        assert_eq!(status, FrameStatus::SwapchainStale);
        // The frame was submitted, so its slot is consumed.
        assert_eq!(pacer.current_slot(), 1);
    }
}
