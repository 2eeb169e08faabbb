// Error taxonomy for the per-frame path
//
// Setup code reports through anyhow. The frame path needs to tell the
// recoverable outcome (surface out of date) apart from the fatal ones, so it
// uses a typed error instead.

use ash::vk;
use std::time::Duration;
use thiserror::Error;

#[derive(Debug, Error)]
pub enum FrameError {
    /// The swapchain no longer matches the surface; recovered by a full rebuild.
    #[error("swapchain is out of date")]
    OutOfDate,

    #[error("frame slot {slot} fence did not signal within {timeout:?}")]
    FenceTimeout { slot: usize, timeout: Duration },

    #[error("no presentable image became available within {timeout:?}")]
    AcquireTimeout { timeout: Duration },

    #[error("device lost")]
    DeviceLost,

    #[error("presentation returned image {index}, but only {count} frame slots exist")]
    SlotOutOfRange { index: usize, count: usize },

    #[error("vulkan call failed: {0}")]
    Vulkan(vk::Result),
}

impl FrameError {
    /// Classify a raw Vulkan result code.
    pub fn from_vk(result: vk::Result) -> Self {
        match result {
            vk::Result::ERROR_OUT_OF_DATE_KHR => Self::OutOfDate,
            vk::Result::ERROR_DEVICE_LOST => Self::DeviceLost,
            other => Self::Vulkan(other),
        }
    }

    /// Only an out-of-date surface is recoverable; everything else ends the process.
    pub fn is_recoverable(&self) -> bool {
        matches!(self, Self::OutOfDate)
    }
}

pub type FrameResult<T> = std::result::Result<T, FrameError>;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn out_of_date_is_the_only_recoverable_code() {
        assert!(FrameError::from_vk(vk::Result::ERROR_OUT_OF_DATE_KHR).is_recoverable());
        assert!(matches!(
            FrameError::from_vk(vk::Result::ERROR_DEVICE_LOST),
            FrameError::DeviceLost
        ));
        let other = FrameError::from_vk(vk::Result::ERROR_OUT_OF_HOST_MEMORY);
        assert!(!other.is_recoverable());
        assert!(matches!(other, FrameError::Vulkan(vk::Result::ERROR_OUT_OF_HOST_MEMORY)));
    }

    #[test]
    fn fence_timeout_names_the_slot() {
        let err = FrameError::FenceTimeout {
            slot: 2,
            timeout: Duration::from_millis(50),
        };
        assert!(err.to_string().contains("slot 2"));
        assert!(!err.is_recoverable());
    }
}
