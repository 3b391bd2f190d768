// Frame pacing - frames in flight
//
// Each slot owns a fence, an image-available semaphore, a render-finished
// semaphore and a command buffer. A slot is reused only after its fence
// reports the previous submission done. The fence is reset after a
// successful acquire, never before. A frame that fails after the reset is
// handed back through `restore_slot` so its fence is signaled again and the
// next wait on that slot returns.

use ash::prelude::VkResult;
use ash::vk;

use crate::error::EngineResult;

/// Per-frame operations the scheduler drives. Implemented by the context's
/// presenter; tests drive the scheduler with a recording mock.
pub trait FrameTarget {
    /// Current framebuffer size. Zero area means nothing can be drawn.
    fn extent(&self) -> vk::Extent2D;
    fn wait_for_slot(&mut self, slot: usize) -> EngineResult<()>;
    fn acquire_image(&mut self, slot: usize) -> VkResult<(u32, bool)>;
    fn reset_slot(&mut self, slot: usize) -> EngineResult<()>;
    fn begin_commands(&mut self, slot: usize) -> EngineResult<()>;
    fn end_commands(&mut self, slot: usize) -> EngineResult<()>;
    fn submit(&mut self, slot: usize) -> EngineResult<()>;
    fn present(&mut self, slot: usize) -> VkResult<bool>;
    fn recreate_swapchain(&mut self) -> EngineResult<()>;
    /// Undo a frame abandoned between `reset_slot` and a successful
    /// `submit`: the fence must end up signaled and the image-available
    /// semaphore consumed.
    fn restore_slot(&mut self, slot: usize) -> EngineResult<()>;
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FrameStatus {
    /// Command buffer is recording; draw, then call `end`
    Ready,
    /// Skip this frame
    NotReady,
}

#[derive(Debug)]
pub struct FrameCycle {
    frames_in_flight: usize,
    current_frame: usize,
    in_frame: bool,
    recreate_pending: bool,
    frame_count: u64,
}

impl FrameCycle {
    pub fn new(frames_in_flight: usize) -> Self {
        Self {
            frames_in_flight: frames_in_flight.max(1),
            current_frame: 0,
            in_frame: false,
            recreate_pending: false,
            frame_count: 0,
        }
    }

    pub fn frames_in_flight(&self) -> usize {
        self.frames_in_flight
    }

    /// Slot used by the frame being (or about to be) recorded.
    pub fn current_frame(&self) -> usize {
        self.current_frame
    }

    /// Frames presented so far.
    pub fn frame_count(&self) -> u64 {
        self.frame_count
    }

    pub fn in_frame(&self) -> bool {
        self.in_frame
    }

    pub fn recreate_pending(&self) -> bool {
        self.recreate_pending
    }

    /// Window changed size; the swapchain is rebuilt at the next frame boundary.
    pub fn mark_resized(&mut self) {
        self.recreate_pending = true;
    }

    pub fn begin<T: FrameTarget>(&mut self, target: &mut T) -> EngineResult<FrameStatus> {
        if self.in_frame {
            log::warn!("begin called while a frame is already recording");
            return Ok(FrameStatus::Ready);
        }

        let extent = target.extent();
        if extent.width == 0 || extent.height == 0 {
            return Ok(FrameStatus::NotReady);
        }

        if self.recreate_pending {
            self.recreate(target)?;
        }

        let slot = self.current_frame;
        target.wait_for_slot(slot)?;

        match target.acquire_image(slot) {
            Ok((_, suboptimal)) => {
                if suboptimal {
                    // Still presentable; rebuild once this frame is out
                    self.recreate_pending = true;
                }
            }
            Err(vk::Result::ERROR_OUT_OF_DATE_KHR) => {
                log::debug!("Swapchain out of date on acquire");
                self.recreate(target)?;
                return Ok(FrameStatus::NotReady);
            }
            Err(e) => {
                log::error!("Failed to acquire swapchain image: {:?}", e);
                return Ok(FrameStatus::NotReady);
            }
        }

        target.reset_slot(slot)?;
        if let Err(e) = target.begin_commands(slot) {
            self.abandon(target, slot);
            return Err(e);
        }

        self.in_frame = true;
        Ok(FrameStatus::Ready)
    }

    pub fn end<T: FrameTarget>(&mut self, target: &mut T) -> EngineResult<()> {
        if !self.in_frame {
            return Ok(());
        }
        self.in_frame = false;

        let slot = self.current_frame;
        if let Err(e) = target.end_commands(slot).and_then(|_| target.submit(slot)) {
            self.abandon(target, slot);
            return Err(e);
        }

        match target.present(slot) {
            Ok(true) | Err(vk::Result::ERROR_OUT_OF_DATE_KHR) => {
                self.recreate_pending = true;
            }
            Ok(false) => {}
            Err(e) => {
                log::error!("Failed to present swapchain image: {:?}", e);
            }
        }

        if self.recreate_pending {
            self.recreate(target)?;
        }

        self.current_frame = (self.current_frame + 1) % self.frames_in_flight;
        self.frame_count += 1;
        Ok(())
    }

    /// Nothing was submitted for `slot`; make its fence waitable again. The
    /// acquired image is never presented, so the swapchain is rebuilt too.
    fn abandon<T: FrameTarget>(&mut self, target: &mut T, slot: usize) {
        log::warn!("Abandoning frame in slot {}", slot);
        if let Err(e) = target.restore_slot(slot) {
            log::error!("Failed to restore frame slot {}: {}", slot, e);
        }
        self.recreate_pending = true;
    }

    fn recreate<T: FrameTarget>(&mut self, target: &mut T) -> EngineResult<()> {
        self.recreate_pending = false;
        target.recreate_swapchain().inspect_err(|e| {
            log::error!("Failed to recreate swapchain: {}", e);
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::VecDeque;

    #[derive(Debug, Clone, Copy, PartialEq, Eq)]
    enum Event {
        Wait(usize),
        Acquire(usize),
        Reset(usize),
        Begin(usize),
        End(usize),
        Submit(usize),
        Present(usize),
        Recreate,
        Restore(usize),
    }

    const SLOTS: usize = 3;

    /// Records calls and models each slot's fence and image-available
    /// semaphore the way the driver would. Submitted work completes at once.
    struct MockTarget {
        extent: vk::Extent2D,
        acquire_results: VecDeque<VkResult<(u32, bool)>>,
        present_results: VecDeque<VkResult<bool>>,
        begin_results: VecDeque<EngineResult<()>>,
        submit_results: VecDeque<EngineResult<()>>,
        fence_signaled: [bool; SLOTS],
        image_semaphore_signaled: [bool; SLOTS],
        events: Vec<Event>,
    }

    impl MockTarget {
        fn new() -> Self {
            Self {
                extent: vk::Extent2D {
                    width: 800,
                    height: 600,
                },
                acquire_results: VecDeque::new(),
                present_results: VecDeque::new(),
                begin_results: VecDeque::new(),
                submit_results: VecDeque::new(),
                fence_signaled: [true; SLOTS],
                image_semaphore_signaled: [false; SLOTS],
                events: Vec::new(),
            }
        }

        fn recreations(&self) -> usize {
            self.events.iter().filter(|e| **e == Event::Recreate).count()
        }
    }

    impl FrameTarget for MockTarget {
        fn extent(&self) -> vk::Extent2D {
            self.extent
        }

        fn wait_for_slot(&mut self, slot: usize) -> EngineResult<()> {
            self.events.push(Event::Wait(slot));
            assert!(
                self.fence_signaled[slot],
                "wait on slot {slot} would never return: its fence is unsignaled with nothing pending"
            );
            Ok(())
        }

        fn acquire_image(&mut self, slot: usize) -> VkResult<(u32, bool)> {
            self.events.push(Event::Acquire(slot));
            let result = self.acquire_results.pop_front().unwrap_or(Ok((0, false)));
            if result.is_ok() {
                assert!(
                    !self.image_semaphore_signaled[slot],
                    "acquire into slot {slot} while its semaphore is still signaled"
                );
                self.image_semaphore_signaled[slot] = true;
            }
            result
        }

        fn reset_slot(&mut self, slot: usize) -> EngineResult<()> {
            self.events.push(Event::Reset(slot));
            self.fence_signaled[slot] = false;
            Ok(())
        }

        fn begin_commands(&mut self, slot: usize) -> EngineResult<()> {
            self.events.push(Event::Begin(slot));
            self.begin_results.pop_front().unwrap_or(Ok(()))
        }

        fn end_commands(&mut self, slot: usize) -> EngineResult<()> {
            self.events.push(Event::End(slot));
            Ok(())
        }

        fn submit(&mut self, slot: usize) -> EngineResult<()> {
            self.events.push(Event::Submit(slot));
            let result = self.submit_results.pop_front().unwrap_or(Ok(()));
            if result.is_ok() {
                self.image_semaphore_signaled[slot] = false;
                self.fence_signaled[slot] = true;
            }
            result
        }

        fn present(&mut self, slot: usize) -> VkResult<bool> {
            self.events.push(Event::Present(slot));
            self.present_results.pop_front().unwrap_or(Ok(false))
        }

        fn recreate_swapchain(&mut self) -> EngineResult<()> {
            self.events.push(Event::Recreate);
            Ok(())
        }

        fn restore_slot(&mut self, slot: usize) -> EngineResult<()> {
            self.events.push(Event::Restore(slot));
            self.image_semaphore_signaled[slot] = false;
            self.fence_signaled[slot] = true;
            Ok(())
        }
    }

    fn full_frame(slot: usize) -> Vec<Event> {
        vec![
            Event::Wait(slot),
            Event::Acquire(slot),
            Event::Reset(slot),
            Event::Begin(slot),
            Event::End(slot),
            Event::Submit(slot),
            Event::Present(slot),
        ]
    }

    #[test]
    fn test_slots_rotate_and_fence_is_waited_before_reuse() {
        let mut target = MockTarget::new();
        let mut cycle = FrameCycle::new(2);

        for _ in 0..5 {
            assert_eq!(cycle.begin(&mut target).unwrap(), FrameStatus::Ready);
            cycle.end(&mut target).unwrap();
        }

        let expected: Vec<Event> = [0, 1, 0, 1, 0].into_iter().flat_map(full_frame).collect();
        assert_eq!(target.events, expected);
        assert_eq!(cycle.frame_count(), 5);
        assert_eq!(cycle.current_frame(), 1);
    }

    #[test]
    fn test_zero_extent_skips_frame_without_touching_sync() {
        let mut target = MockTarget::new();
        target.extent = vk::Extent2D::default();
        let mut cycle = FrameCycle::new(2);

        assert_eq!(cycle.begin(&mut target).unwrap(), FrameStatus::NotReady);
        cycle.end(&mut target).unwrap();

        assert!(target.events.is_empty());
        assert_eq!(cycle.current_frame(), 0);
        assert_eq!(cycle.frame_count(), 0);
    }

    #[test]
    fn test_out_of_date_acquire_recreates_and_keeps_fence_signaled() {
        let mut target = MockTarget::new();
        target
            .acquire_results
            .push_back(Err(vk::Result::ERROR_OUT_OF_DATE_KHR));
        let mut cycle = FrameCycle::new(2);

        assert_eq!(cycle.begin(&mut target).unwrap(), FrameStatus::NotReady);
        assert_eq!(
            target.events,
            vec![Event::Wait(0), Event::Acquire(0), Event::Recreate]
        );

        // Same slot is retried and its fence was never reset
        target.events.clear();
        assert_eq!(cycle.begin(&mut target).unwrap(), FrameStatus::Ready);
        assert_eq!(target.events[0], Event::Wait(0));
        assert_eq!(target.events[2], Event::Reset(0));
    }

    #[test]
    fn test_other_acquire_error_skips_frame() {
        let mut target = MockTarget::new();
        target
            .acquire_results
            .push_back(Err(vk::Result::ERROR_SURFACE_LOST_KHR));
        let mut cycle = FrameCycle::new(2);

        assert_eq!(cycle.begin(&mut target).unwrap(), FrameStatus::NotReady);
        assert!(!cycle.in_frame());
        assert_eq!(target.recreations(), 0);
    }

    #[test]
    fn test_resize_during_out_of_date_present_recreates_once() {
        let mut target = MockTarget::new();
        target
            .present_results
            .push_back(Err(vk::Result::ERROR_OUT_OF_DATE_KHR));
        let mut cycle = FrameCycle::new(2);

        assert_eq!(cycle.begin(&mut target).unwrap(), FrameStatus::Ready);
        cycle.mark_resized();
        cycle.end(&mut target).unwrap();

        assert_eq!(target.recreations(), 1);
        assert_eq!(cycle.frame_count(), 1);
        assert_eq!(cycle.current_frame(), 1);
        assert!(!cycle.recreate_pending());

        cycle.begin(&mut target).unwrap();
        assert_eq!(target.recreations(), 1);
    }

    #[test]
    fn test_suboptimal_acquire_finishes_frame_then_recreates() {
        let mut target = MockTarget::new();
        target.acquire_results.push_back(Ok((0, true)));
        let mut cycle = FrameCycle::new(3);

        assert_eq!(cycle.begin(&mut target).unwrap(), FrameStatus::Ready);
        cycle.end(&mut target).unwrap();

        let mut expected = full_frame(0);
        expected.push(Event::Recreate);
        assert_eq!(target.events, expected);
    }

    #[test]
    fn test_pending_resize_recreated_before_waiting() {
        let mut target = MockTarget::new();
        let mut cycle = FrameCycle::new(2);

        cycle.mark_resized();
        cycle.mark_resized();
        cycle.begin(&mut target).unwrap();

        assert_eq!(target.events[0], Event::Recreate);
        assert_eq!(target.events[1], Event::Wait(0));
        assert_eq!(target.recreations(), 1);
    }

    #[test]
    fn test_end_without_begin_is_noop() {
        let mut target = MockTarget::new();
        let mut cycle = FrameCycle::new(2);

        cycle.end(&mut target).unwrap();

        assert!(target.events.is_empty());
        assert_eq!(cycle.frame_count(), 0);
    }

    #[test]
    fn test_failed_begin_commands_restores_slot_for_next_frame() {
        let mut target = MockTarget::new();
        target
            .begin_results
            .push_back(Err(vk::Result::ERROR_OUT_OF_HOST_MEMORY.into()));
        let mut cycle = FrameCycle::new(2);

        assert!(cycle.begin(&mut target).is_err());
        assert!(!cycle.in_frame());
        assert_eq!(
            target.events,
            vec![
                Event::Wait(0),
                Event::Acquire(0),
                Event::Reset(0),
                Event::Begin(0),
                Event::Restore(0),
            ]
        );

        // Slot 0 is waitable again; the swapchain is rebuilt first
        target.events.clear();
        assert_eq!(cycle.begin(&mut target).unwrap(), FrameStatus::Ready);
        assert_eq!(target.events[0], Event::Recreate);
        assert_eq!(target.events[1], Event::Wait(0));
        cycle.end(&mut target).unwrap();
        assert_eq!(cycle.frame_count(), 1);
    }

    #[test]
    fn test_failed_submit_restores_slot_for_next_frame() {
        let mut target = MockTarget::new();
        target
            .submit_results
            .push_back(Err(vk::Result::ERROR_OUT_OF_DEVICE_MEMORY.into()));
        let mut cycle = FrameCycle::new(2);

        assert_eq!(cycle.begin(&mut target).unwrap(), FrameStatus::Ready);
        assert!(cycle.end(&mut target).is_err());
        assert!(!cycle.in_frame());
        assert_eq!(target.events.last(), Some(&Event::Restore(0)));
        assert!(!target.events.contains(&Event::Present(0)));

        // Nothing was presented, so the slot does not advance
        assert_eq!(cycle.current_frame(), 0);
        assert_eq!(cycle.frame_count(), 0);

        for _ in 0..3 {
            assert_eq!(cycle.begin(&mut target).unwrap(), FrameStatus::Ready);
            cycle.end(&mut target).unwrap();
        }
        assert_eq!(cycle.frame_count(), 3);
        assert_eq!(target.recreations(), 1);
    }

    #[test]
    fn test_frames_in_flight_at_least_one() {
        let cycle = FrameCycle::new(0);
        assert_eq!(cycle.frames_in_flight(), 1);
    }
}
