//! Command list the layer records its own work into.
//!
//! Uploads and initial transitions are recorded into one command list that
//! cycles through a ring of command allocators, each guarded by a fence.
//! Flushing submits the recorded commands and moves on to the next
//! allocator, waiting for the GPU only when that allocator is still in use.

use super::driver::{D3D12Driver, D3D12_COMMAND_LIST_TYPE_DIRECT};
use crate::backend::com::{failed, ComPtr, HResult};

#[derive(Debug, Clone, Copy)]
struct CommandFrame {
    allocator: ComPtr,
    fence: ComPtr,
    /// Value the fence reaches once the frame's last submission completes.
    fence_value: u64,
}

#[derive(Debug)]
pub struct ImmediateCommandList {
    list: ComPtr,
    frames: Vec<CommandFrame>,
    index: usize,
    has_commands: bool,
}

impl ImmediateCommandList {
    /// Create `frame_count` allocators and fences plus the command list.
    ///
    /// Objects created before a failure are released again.
    pub fn new(driver: &dyn D3D12Driver, frame_count: u32) -> Result<Self, HResult> {
        let mut frames: Vec<CommandFrame> = Vec::with_capacity(frame_count.max(1) as usize);
        let release_frames = |frames: &[CommandFrame]| {
            for frame in frames {
                driver.release(frame.fence);
                driver.release(frame.allocator);
            }
        };
        for _ in 0..frame_count.max(1) {
            let allocator = match driver.create_command_allocator(D3D12_COMMAND_LIST_TYPE_DIRECT) {
                Ok(allocator) => allocator,
                Err(hr) => {
                    release_frames(&frames);
                    return Err(hr);
                }
            };
            let fence = match driver.create_fence(0) {
                Ok(fence) => fence,
                Err(hr) => {
                    driver.release(allocator);
                    release_frames(&frames);
                    return Err(hr);
                }
            };
            frames.push(CommandFrame {
                allocator,
                fence,
                fence_value: 0,
            });
        }

        let list = match driver.create_command_list(
            D3D12_COMMAND_LIST_TYPE_DIRECT,
            frames[0].allocator,
            ComPtr::NULL,
        ) {
            Ok(list) => list,
            Err(hr) => {
                release_frames(&frames);
                return Err(hr);
            }
        };
        log::debug!(
            "ImmediateCommandList: created {:#x} with {} frames",
            list.raw(),
            frames.len()
        );
        Ok(Self {
            list,
            frames,
            index: 0,
            has_commands: false,
        })
    }

    pub fn handle(&self) -> ComPtr {
        self.list
    }

    pub fn frame_count(&self) -> usize {
        self.frames.len()
    }

    pub fn has_commands(&self) -> bool {
        self.has_commands
    }

    /// The command list to record into.
    pub fn begin_commands(&mut self) -> ComPtr {
        self.has_commands = true;
        self.list
    }

    /// Submit the recorded commands to `queue` and reopen the list on the
    /// next allocator. Does nothing when no commands were recorded.
    pub fn flush(&mut self, driver: &dyn D3D12Driver, queue: ComPtr) -> Result<(), HResult> {
        if !self.has_commands {
            return Ok(());
        }
        self.has_commands = false;

        let hr = driver.close_command_list(self.list);
        if failed(hr) {
            log::error!("Failed to close immediate command list: {:#010x}", hr as u32);
            // The list is still open; throw away what was recorded.
            self.reopen(driver, self.index)?;
            return Err(hr);
        }
        driver.execute_command_lists(queue, &[self.list]);

        let frame = &mut self.frames[self.index];
        frame.fence_value += 1;
        let hr = driver.signal(queue, frame.fence, frame.fence_value);
        if failed(hr) {
            log::error!("Failed to signal immediate command list fence: {:#010x}", hr as u32);
            return Err(hr);
        }

        let next = (self.index + 1) % self.frames.len();
        let upcoming = self.frames[next];
        if driver.fence_completed_value(upcoming.fence) < upcoming.fence_value {
            let hr = driver.wait_for_fence(upcoming.fence, upcoming.fence_value);
            if failed(hr) {
                return Err(hr);
            }
        }
        self.index = next;
        self.reopen(driver, next)
    }

    /// Like [`flush`](Self::flush), then block until the GPU has executed
    /// the submitted commands.
    pub fn flush_and_wait(&mut self, driver: &dyn D3D12Driver, queue: ComPtr) -> Result<(), HResult> {
        if !self.has_commands {
            return Ok(());
        }
        let submitted = self.index;
        self.flush(driver, queue)?;
        let frame = self.frames[submitted];
        let hr = driver.wait_for_fence(frame.fence, frame.fence_value);
        if failed(hr) {
            log::error!("Failed to wait for immediate command list: {:#010x}", hr as u32);
            return Err(hr);
        }
        Ok(())
    }

    fn reopen(&self, driver: &dyn D3D12Driver, index: usize) -> Result<(), HResult> {
        let allocator = self.frames[index].allocator;
        let hr = driver.reset_command_allocator(allocator);
        if failed(hr) {
            return Err(hr);
        }
        let hr = driver.reset_command_list(self.list, allocator, ComPtr::NULL);
        if failed(hr) {
            return Err(hr);
        }
        Ok(())
    }

    /// Release the command list, allocators and fences.
    pub fn destroy(self, driver: &dyn D3D12Driver) {
        driver.release(self.list);
        for frame in &self.frames {
            driver.release(frame.fence);
            driver.release(frame.allocator);
        }
    }
}

#[cfg(all(test, feature = "dummy"))]
mod tests {
    use super::*;
    use crate::backend::com::ComDriver;
    use crate::backend::d3d12::dummy::DummyD3D12;

    #[test]
    fn test_flush_without_commands_does_nothing() {
        let driver = DummyD3D12::new(64, 64);
        let queue = driver.create_command_queue(D3D12_COMMAND_LIST_TYPE_DIRECT).unwrap();
        let mut list = ImmediateCommandList::new(&driver, 4).unwrap();
        list.flush(&driver, queue).unwrap();
        assert!(driver.executed(queue).is_empty());
        list.destroy(&driver);
        driver.release(queue);
    }

    #[test]
    fn test_flush_cycles_allocators() {
        let driver = DummyD3D12::new(64, 64);
        let queue = driver.create_command_queue(D3D12_COMMAND_LIST_TYPE_DIRECT).unwrap();
        let mut list = ImmediateCommandList::new(&driver, 2).unwrap();
        for _ in 0..3 {
            list.begin_commands();
            list.flush_and_wait(&driver, queue).unwrap();
        }
        assert_eq!(driver.executed(queue), vec![list.handle(); 3]);
        assert_eq!(list.index, 1);
        assert_eq!(driver.allocator_resets(), 3);
        list.destroy(&driver);
        driver.release(queue);
    }

    #[test]
    fn test_partial_creation_releases_objects() {
        for successes in 0..5 {
            let driver = DummyD3D12::new(64, 64);
            let baseline = driver.objects().live_count();
            driver.objects().fail_after(successes);
            assert!(ImmediateCommandList::new(&driver, 2).is_err());
            assert_eq!(driver.objects().live_count(), baseline, "after {successes} objects");
        }
    }

    #[test]
    fn test_destroy_releases_everything() {
        let driver = DummyD3D12::new(64, 64);
        let baseline = driver.objects().live_count();
        let list = ImmediateCommandList::new(&driver, 4).unwrap();
        assert_eq!(list.frame_count(), 4);
        assert_eq!(driver.objects().live_count(), baseline + 9);
        list.destroy(&driver);
        assert_eq!(driver.objects().live_count(), baseline);
    }
}
