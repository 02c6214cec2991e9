//! RGBA32F pixel buffers.
//!
//! [`PixelBuffer`] is the unit of data every pipeline stage consumes and
//! produces. [`SharedImage`] wraps one in a mutex so a running engine can
//! publish progress snapshots while a reader (display layer, CLI poll loop)
//! observes either the previous snapshot or the new one, never a partial
//! write.

use std::sync::{Mutex, MutexGuard, PoisonError};

/// Owned RGBA32F raster. Row-major, top-to-bottom, RGBA interleaved.
///
/// Invariant: `data.len() == width * height * 4` at all times. Dimensions
/// are clamped to at least 1x1, so a buffer is never empty.
#[derive(Debug, Clone, PartialEq)]
pub struct PixelBuffer {
    width: u32,
    height: u32,
    data: Vec<f32>,
}

impl PixelBuffer {
    /// Creates a buffer filled with opaque black (`[0, 0, 0, 1]`).
    ///
    /// Zero dimensions are clamped to 1.
    pub fn new(width: u32, height: u32) -> Self {
        let width = width.max(1);
        let height = height.max(1);
        let mut buf = Self {
            width,
            height,
            data: vec![0.0; width as usize * height as usize * 4],
        };
        buf.fill([0.0, 0.0, 0.0, 1.0]);
        buf
    }

    /// Builds a buffer from an existing flat RGBA vector.
    ///
    /// Returns `None` if `data.len() != width * height * 4` or a dimension
    /// is zero.
    pub fn from_vec(width: u32, height: u32, data: Vec<f32>) -> Option<Self> {
        if width == 0 || height == 0 {
            return None;
        }
        if data.len() != width as usize * height as usize * 4 {
            return None;
        }
        Some(Self {
            width,
            height,
            data,
        })
    }

    /// Buffer width in pixels.
    #[inline]
    pub fn width(&self) -> u32 {
        self.width
    }

    /// Buffer height in pixels.
    #[inline]
    pub fn height(&self) -> u32 {
        self.height
    }

    /// `(width, height)` pair.
    #[inline]
    pub fn dimensions(&self) -> (u32, u32) {
        (self.width, self.height)
    }

    /// Number of pixels.
    #[inline]
    pub fn pixel_count(&self) -> usize {
        self.width as usize * self.height as usize
    }

    /// Flat RGBA data, `width * height * 4` floats.
    #[inline]
    pub fn data(&self) -> &[f32] {
        &self.data
    }

    /// Mutable flat RGBA data.
    #[inline]
    pub fn data_mut(&mut self) -> &mut [f32] {
        &mut self.data
    }

    /// Consumes the buffer, returning the flat data.
    #[inline]
    pub fn into_vec(self) -> Vec<f32> {
        self.data
    }

    /// Index of the red component of pixel `(x, y)`.
    #[inline]
    pub fn offset(&self, x: u32, y: u32) -> usize {
        (y as usize * self.width as usize + x as usize) * 4
    }

    /// Resizes the buffer, discarding the old content.
    ///
    /// Resizing to the current dimensions is a no-op and preserves content.
    /// Zero dimensions are clamped to 1.
    pub fn resize(&mut self, width: u32, height: u32) {
        let width = width.max(1);
        let height = height.max(1);
        if width == self.width && height == self.height {
            return;
        }
        self.width = width;
        self.height = height;
        self.data.clear();
        self.data
            .resize(width as usize * height as usize * 4, 0.0);
        self.fill([0.0, 0.0, 0.0, 1.0]);
    }

    /// Fills every pixel with `rgba`.
    pub fn fill(&mut self, rgba: [f32; 4]) {
        for px in self.data.chunks_exact_mut(4) {
            px.copy_from_slice(&rgba);
        }
    }

    /// Replaces this buffer's dimensions and content with a copy of `src`.
    pub fn copy_from(&mut self, src: &PixelBuffer) {
        self.width = src.width;
        self.height = src.height;
        self.data.clear();
        self.data.extend_from_slice(&src.data);
    }
}

impl Default for PixelBuffer {
    fn default() -> Self {
        Self::new(1, 1)
    }
}

/// A mutex-guarded [`PixelBuffer`] shared between a running engine and its
/// caller.
///
/// Lock granularity is per-buffer. Engines copy the input into private
/// memory before a run starts, so only output/preview buffers are locked
/// repeatedly, and only briefly per snapshot.
#[derive(Debug, Default)]
pub struct SharedImage {
    inner: Mutex<PixelBuffer>,
}

impl SharedImage {
    /// Wraps a buffer.
    pub fn new(buffer: PixelBuffer) -> Self {
        Self {
            inner: Mutex::new(buffer),
        }
    }

    /// Creates a shared buffer of the given size.
    pub fn with_size(width: u32, height: u32) -> Self {
        Self::new(PixelBuffer::new(width, height))
    }

    /// Locks the buffer for the duration of the returned guard.
    ///
    /// A poisoned lock is recovered rather than propagated: the raster
    /// itself is always structurally valid (the length invariant cannot be
    /// broken by a panicking writer mid-pixel in any way that matters to
    /// readers, who will simply see stale values).
    pub fn lock(&self) -> MutexGuard<'_, PixelBuffer> {
        self.inner.lock().unwrap_or_else(PoisonError::into_inner)
    }

    /// Takes the buffer out, resetting the source to a 1x1 buffer.
    ///
    /// This is the move-and-reset handoff: after a move the source holds a
    /// trivial buffer so stale reads cannot observe the old content.
    pub fn take(&self) -> PixelBuffer {
        std::mem::replace(&mut *self.lock(), PixelBuffer::new(1, 1))
    }

    /// Replaces the buffer, returning the previous one.
    pub fn replace(&self, buffer: PixelBuffer) -> PixelBuffer {
        std::mem::replace(&mut *self.lock(), buffer)
    }

    /// Copies `src` into the shared buffer under its lock.
    pub fn store(&self, src: &PixelBuffer) {
        self.lock().copy_from(src);
    }

    /// Returns a clone of the current buffer.
    pub fn snapshot(&self) -> PixelBuffer {
        self.lock().clone()
    }
}
