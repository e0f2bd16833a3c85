// Logical device - queue ownership and submission tracking
//
// Responsibilities:
// - Logical device + single queue creation on the negotiated family
// - Queue submission (externally synchronized through `submissions`)
// - Tracking which submissions the host has seen complete, so that
//   teardown and host reads can refuse to run while work is in flight

use ash::vk;
use parking_lot::Mutex;
use std::sync::Arc;

use super::command::{CommandBuffer, CommandBufferState};
use super::driver::{AcceleratorDescriptor, DeviceDesc, DeviceDriver, SubmitDesc};
use super::instance::Instance;
use super::sync::{Fence, Semaphore};
use crate::error::{GpuError, GpuResult};

/// Device extensions the swapchain path cannot work without.
pub const REQUIRED_DEVICE_EXTENSIONS: &[&str] = &["VK_KHR_swapchain"];

/// The one queue this design submits to. Destroyed with the device.
#[derive(Debug, Clone, Copy)]
pub struct Queue {
    pub handle: vk::Queue,
    pub family_index: u32,
}

/// Semaphores and fence attached to one submission.
#[derive(Default)]
pub struct SubmitSync<'a> {
    pub wait: &'a [(&'a Semaphore, vk::PipelineStageFlags)],
    pub signal: &'a [&'a Semaphore],
    pub fence: Option<&'a Fence>,
}

// Tickets are 1-based submission counters; `completed` is the highest
// ticket the host has confirmed finished.
#[derive(Debug, Default)]
struct Submissions {
    submitted: u64,
    completed: u64,
}

pub struct Device {
    driver: Arc<dyn DeviceDriver>,
    pub accelerator: AcceleratorDescriptor,
    queue: Queue,
    submissions: Mutex<Submissions>,
    // Keeps the instance alive for as long as the device exists
    _instance: Arc<Instance>,
}

impl Device {
    /// Create the logical device with one queue (priority 1.0) from
    /// `queue_family_index`. Every name in `required_extensions` must be in
    /// `available_extensions`.
    pub fn new(
        instance: &Arc<Instance>,
        accelerator: AcceleratorDescriptor,
        queue_family_index: u32,
        available_extensions: &[String],
        required_extensions: &[&str],
    ) -> GpuResult<Arc<Self>> {
        log::info!(
            "Creating logical device on {} (queue family {})",
            accelerator.name,
            queue_family_index
        );

        if queue_family_index as usize >= accelerator.queue_families.len() {
            return Err(GpuError::DeviceCreationFailed(format!(
                "queue family {} does not exist on {}",
                queue_family_index, accelerator.name
            )));
        }

        let missing: Vec<&str> = required_extensions
            .iter()
            .copied()
            .filter(|name| !available_extensions.iter().any(|e| e == name))
            .collect();
        if !missing.is_empty() {
            return Err(GpuError::DeviceCreationFailed(format!(
                "missing device extensions: {}",
                missing.join(", ")
            )));
        }

        let desc = DeviceDesc {
            queue_family_index,
            queue_priorities: vec![1.0],
            extensions: required_extensions.iter().map(|s| s.to_string()).collect(),
        };

        let driver = instance
            .driver()
            .create_device(accelerator.handle, &desc)
            .map_err(|e| GpuError::DeviceCreationFailed(e.to_string()))?;

        let queue = Queue {
            handle: driver.get_device_queue(queue_family_index, 0),
            family_index: queue_family_index,
        };

        Ok(Arc::new(Self {
            driver,
            accelerator,
            queue,
            submissions: Mutex::new(Submissions::default()),
            _instance: instance.clone(),
        }))
    }

    pub fn driver(&self) -> &dyn DeviceDriver {
        self.driver.as_ref()
    }

    pub fn queue(&self) -> Queue {
        self.queue
    }

    pub fn queue_family_index(&self) -> u32 {
        self.queue.family_index
    }

    /// Submit one executable command buffer to the device queue.
    pub fn submit(&self, buffer: &mut CommandBuffer, sync: &SubmitSync<'_>) -> GpuResult<()> {
        if buffer.queue_family_index() != self.queue.family_index {
            return Err(GpuError::InvalidUsage(format!(
                "command buffer from queue family {} submitted to queue family {}",
                buffer.queue_family_index(),
                self.queue.family_index
            )));
        }
        if buffer.state() != CommandBufferState::Executable {
            return Err(GpuError::InvalidUsage(format!(
                "cannot submit a command buffer in the {:?} state",
                buffer.state()
            )));
        }

        if let Some(fence) = sync.fence {
            fence.ensure_unsignaled()?;
        }

        let wait_semaphores: Vec<vk::Semaphore> = sync.wait.iter().map(|(s, _)| s.handle).collect();
        let wait_stages: Vec<vk::PipelineStageFlags> = sync.wait.iter().map(|(_, stage)| *stage).collect();
        let signal_semaphores: Vec<vk::Semaphore> = sync.signal.iter().map(|s| s.handle).collect();
        let command_buffers = [buffer.handle];

        let submit = SubmitDesc {
            wait_semaphores: &wait_semaphores,
            wait_stages: &wait_stages,
            command_buffers: &command_buffers,
            signal_semaphores: &signal_semaphores,
        };
        let fence = sync.fence.map_or(vk::Fence::null(), |f| f.handle);

        // Holding the lock across the call also serializes queue access
        let mut submissions = self.submissions.lock();
        self.driver
            .queue_submit(self.queue.handle, &[submit], fence)
            .map_err(GpuError::submission("vkQueueSubmit"))?;
        submissions.submitted += 1;
        let ticket = submissions.submitted;
        drop(submissions);

        buffer.mark_submitted(ticket);
        if let Some(fence) = sync.fence {
            fence.track(ticket);
        }
        Ok(())
    }

    /// Block until every queued submission has finished.
    ///
    /// Only submissions made before the call are confirmed; anything queued
    /// by another thread during the wait stays pending.
    pub fn wait_idle(&self) -> GpuResult<()> {
        let target = self.submissions.lock().submitted;
        self.driver
            .device_wait_idle()
            .map_err(GpuError::vulkan("vkDeviceWaitIdle"))?;
        self.mark_completed(target);
        Ok(())
    }

    /// Submissions the host has not yet confirmed complete.
    pub fn pending_submissions(&self) -> u64 {
        let submissions = self.submissions.lock();
        submissions.submitted - submissions.completed
    }

    pub fn is_idle(&self) -> bool {
        self.pending_submissions() == 0
    }

    /// Precondition for teardown and host reads.
    pub fn ensure_idle(&self, action: &str) -> GpuResult<()> {
        match self.pending_submissions() {
            0 => Ok(()),
            pending => Err(GpuError::InvalidUsage(format!(
                "{} while {} submission(s) may still be executing; wait for the device first",
                action, pending
            ))),
        }
    }

    pub(crate) fn is_complete(&self, ticket: u64) -> bool {
        self.submissions.lock().completed >= ticket
    }

    /// A fence for `ticket` signalled. Queue order means everything
    /// submitted before it has finished too.
    pub(crate) fn mark_completed(&self, ticket: u64) {
        let mut submissions = self.submissions.lock();
        submissions.completed = submissions.completed.max(ticket);
    }
}

impl Drop for Device {
    fn drop(&mut self) {
        log::info!("Destroying logical device...");

        let pending = self.pending_submissions();
        if pending > 0 {
            log::warn!("Device dropped with {} unconfirmed submission(s), waiting", pending);
        }
        if let Err(e) = self.wait_idle() {
            log::error!("Wait before device destruction failed: {}", e);
        }

        self.driver.destroy_device();
    }
}
