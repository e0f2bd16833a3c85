// Synchronization primitives
//
// Fences for GPU-CPU sync, semaphores for GPU-GPU sync.
// A fence wait is the fine-grained alternative to a device-idle wait.

use ash::vk;
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::Arc;

use super::device::Device;
use crate::error::{GpuError, GpuResult};

pub struct Fence {
    pub handle: vk::Fence,
    // Ticket of the last submission that signals this fence, 0 if none
    ticket: AtomicU64,
    // Host-side view: set by creation as signaled or a successful wait
    signaled: AtomicBool,
    device: Arc<Device>,
}

impl Fence {
    pub fn new(device: &Arc<Device>, signaled: bool) -> GpuResult<Self> {
        let handle = device
            .driver()
            .create_fence(signaled)
            .map_err(GpuError::vulkan("vkCreateFence"))?;

        Ok(Self {
            handle,
            ticket: AtomicU64::new(0),
            signaled: AtomicBool::new(signaled),
            device: device.clone(),
        })
    }

    /// Block until the fence signals or `timeout_ns` elapses.
    pub fn wait(&self, timeout_ns: u64) -> GpuResult<()> {
        self.device
            .driver()
            .wait_for_fence(self.handle, timeout_ns)
            .map_err(GpuError::vulkan("vkWaitForFences"))?;

        self.signaled.store(true, Ordering::Release);
        let ticket = self.ticket.load(Ordering::Acquire);
        if ticket != 0 {
            self.device.mark_completed(ticket);
        }
        Ok(())
    }

    pub fn reset(&self) -> GpuResult<()> {
        if self.is_pending() {
            return Err(GpuError::InvalidUsage(
                "cannot reset a fence whose submission has not been waited on".into(),
            ));
        }

        self.device
            .driver()
            .reset_fence(self.handle)
            .map_err(GpuError::vulkan("vkResetFences"))?;
        self.ticket.store(0, Ordering::Release);
        self.signaled.store(false, Ordering::Release);
        Ok(())
    }

    fn is_pending(&self) -> bool {
        let ticket = self.ticket.load(Ordering::Acquire);
        ticket != 0 && !self.device.is_complete(ticket)
    }

    /// A fence handed to a submission must be unsignaled and unused.
    pub(crate) fn ensure_unsignaled(&self) -> GpuResult<()> {
        if self.is_pending() {
            return Err(GpuError::InvalidUsage(
                "fence is already in use by a pending submission".into(),
            ));
        }
        // A completed tracked submission left the fence signaled as well
        if self.signaled.load(Ordering::Acquire) || self.ticket.load(Ordering::Acquire) != 0 {
            return Err(GpuError::InvalidUsage(
                "fence is signaled; reset it before submitting".into(),
            ));
        }
        Ok(())
    }

    pub(crate) fn track(&self, ticket: u64) {
        self.ticket.store(ticket, Ordering::Release);
    }
}

impl Drop for Fence {
    fn drop(&mut self) {
        let ticket = *self.ticket.get_mut();
        if ticket != 0 && !self.device.is_complete(ticket) {
            log::warn!("Fence dropped while its submission is pending, waiting for device");
            if let Err(e) = self.device.wait_idle() {
                log::error!("Wait before fence destruction failed: {}", e);
            }
        }
        self.device.driver().destroy_fence(self.handle);
    }
}

pub struct Semaphore {
    pub handle: vk::Semaphore,
    device: Arc<Device>,
}

impl Semaphore {
    pub fn new(device: &Arc<Device>) -> GpuResult<Self> {
        let handle = device
            .driver()
            .create_semaphore()
            .map_err(GpuError::vulkan("vkCreateSemaphore"))?;

        Ok(Self {
            handle,
            device: device.clone(),
        })
    }
}

impl Drop for Semaphore {
    fn drop(&mut self) {
        self.device.driver().destroy_semaphore(self.handle);
    }
}
