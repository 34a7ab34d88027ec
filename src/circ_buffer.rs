//! Circular buffer handed to the driver for continuous acquisition.
//!
//! The region is allocated once, after continuous setup has reported the frame size,
//! and must stay valid and unmoved until acquisition has been aborted. It is
//! 4096-byte aligned, matching what PyVCAM and the PVCAM SDK examples use for DMA
//! targets. Only the driver writes into it; the probe inspects frame metadata, never
//! pixels.

use crate::error::AllocationError;
use std::alloc::{alloc_zeroed, dealloc, Layout};
use std::ptr::NonNull;

/// Alignment of the allocation, in bytes.
pub const ALIGNMENT_BOUNDARY: usize = 4096;

/// Owned, page-aligned byte region sized for a fixed number of frames.
#[derive(Debug)]
pub struct CircularBuffer {
    ptr: NonNull<u8>,
    layout: Layout,
    frame_bytes: usize,
    frames: usize,
}

// SAFETY: the buffer is plain bytes owned exclusively by this value. The pointer is
// handed to the driver for writing, but ownership (and freeing) stays here.
#[allow(unsafe_code)]
unsafe impl Send for CircularBuffer {}

impl CircularBuffer {
    /// Allocate room for `frames` frames of `frame_bytes` each.
    ///
    /// `limit` caps the total size; `None` leaves the decision to the allocator.
    /// Failure is returned, never turned into an abort.
    pub fn allocate(
        frame_bytes: usize,
        frames: usize,
        limit: Option<usize>,
    ) -> Result<Self, AllocationError> {
        let total = frame_bytes
            .checked_mul(frames)
            .ok_or(AllocationError::SizeOverflow {
                frame_bytes,
                frames,
            })?;
        if total == 0 {
            return Err(AllocationError::ZeroSize);
        }
        if let Some(limit) = limit {
            if total > limit {
                return Err(AllocationError::ExceedsLimit {
                    requested: total,
                    limit,
                });
            }
        }

        let layout = Layout::from_size_align(total, ALIGNMENT_BOUNDARY).map_err(|_| {
            AllocationError::InvalidLayout {
                requested: total,
                alignment: ALIGNMENT_BOUNDARY,
            }
        })?;

        // SAFETY: layout has a non-zero size (checked above).
        #[allow(unsafe_code)]
        let raw = unsafe { alloc_zeroed(layout) };
        let ptr = NonNull::new(raw).ok_or(AllocationError::OutOfMemory { requested: total })?;

        tracing::debug!(
            bytes = total,
            frames,
            frame_bytes,
            address = format_args!("{:#x}", ptr.as_ptr() as usize),
            "Circular buffer allocated"
        );

        Ok(Self {
            ptr,
            layout,
            frame_bytes,
            frames,
        })
    }

    /// Base pointer, for handing to the driver.
    pub fn as_mut_ptr(&mut self) -> *mut u8 {
        self.ptr.as_ptr()
    }

    /// Base address, for mapping driver-returned frame addresses to offsets.
    pub fn base_address(&self) -> usize {
        self.ptr.as_ptr() as usize
    }

    /// Total size in bytes.
    pub fn len(&self) -> usize {
        self.layout.size()
    }

    /// Always false; zero-sized buffers are rejected at allocation.
    pub fn is_empty(&self) -> bool {
        self.layout.size() == 0
    }

    /// Size of one frame in bytes.
    pub fn frame_bytes(&self) -> usize {
        self.frame_bytes
    }

    /// Number of frames the region holds.
    pub fn frame_capacity(&self) -> usize {
        self.frames
    }

    /// Byte offset of `address` inside the region, if it falls inside it.
    pub fn offset_of(&self, address: usize) -> Option<usize> {
        offset_in(self.base_address(), self.len(), address)
    }

    /// Free the region. Must only be called once acquisition has been aborted.
    pub fn release(self) {
        tracing::debug!(bytes = self.len(), "Circular buffer released");
        drop(self);
    }

    /// Give up ownership without freeing. For when the driver may still be writing
    /// because acquisition could not be aborted; the region stays valid for the rest
    /// of the process.
    pub fn leak(self) {
        tracing::error!(
            bytes = self.len(),
            address = self.base_address(),
            "Circular buffer leaked: acquisition may still be writing to it"
        );
        std::mem::forget(self);
    }
}

impl Drop for CircularBuffer {
    fn drop(&mut self) {
        // SAFETY: ptr was allocated in `allocate` with exactly this layout and is
        // freed only here.
        #[allow(unsafe_code)]
        unsafe {
            dealloc(self.ptr.as_ptr(), self.layout)
        };
    }
}

/// Offset of `address` within `[base, base + len)`.
pub(crate) fn offset_in(base: usize, len: usize, address: usize) -> Option<usize> {
    address
        .checked_sub(base)
        .filter(|offset| *offset < len)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn allocation_is_page_aligned_and_zeroed() {
        let mut buffer = CircularBuffer::allocate(512 * 512 * 2, 4, None).unwrap();
        assert_eq!(buffer.len(), 512 * 512 * 2 * 4);
        assert_eq!(buffer.base_address() % ALIGNMENT_BOUNDARY, 0);
        assert_eq!(buffer.frame_capacity(), 4);
        assert!(!buffer.is_empty());

        let ptr = buffer.as_mut_ptr();
        // SAFETY: test-only read of the freshly allocated region.
        let bytes = unsafe { std::slice::from_raw_parts(ptr, buffer.len()) };
        assert!(bytes.iter().all(|b| *b == 0));
        buffer.release();
    }

    #[test]
    fn zero_sized_request_is_rejected() {
        assert_eq!(
            CircularBuffer::allocate(0, 20, None).unwrap_err(),
            AllocationError::ZeroSize
        );
        assert_eq!(
            CircularBuffer::allocate(1024, 0, None).unwrap_err(),
            AllocationError::ZeroSize
        );
    }

    #[test]
    fn request_over_limit_fails_without_allocating() {
        let err = CircularBuffer::allocate(1 << 20, 20, Some(1 << 20)).unwrap_err();
        assert_eq!(
            err,
            AllocationError::ExceedsLimit {
                requested: 20 << 20,
                limit: 1 << 20
            }
        );
    }

    #[test]
    fn overflowing_request_is_reported() {
        let err = CircularBuffer::allocate(usize::MAX, 2, None).unwrap_err();
        assert!(matches!(err, AllocationError::SizeOverflow { .. }));
    }

    #[test]
    fn unsatisfiable_layout_is_reported() {
        let err = CircularBuffer::allocate(usize::MAX - 16, 1, None).unwrap_err();
        assert!(matches!(err, AllocationError::InvalidLayout { .. }));
    }

    #[test]
    fn offsets_are_bounded_by_region() {
        let buffer = CircularBuffer::allocate(4096, 2, None).unwrap();
        let base = buffer.base_address();
        assert_eq!(buffer.offset_of(base), Some(0));
        assert_eq!(buffer.offset_of(base + 4096), Some(4096));
        assert_eq!(buffer.offset_of(base + 8192), None);
        assert_eq!(buffer.offset_of(base.wrapping_sub(1)), None);
    }
}
