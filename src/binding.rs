//! Data bindings: producer-side objects exposing a live image as readable
//! memory plus synchronisation.
//!
//! A binding owns externally-produced pixel memory and answers four
//! questions for whoever is consuming it: "something changed", "are you
//! mid-write", "wait for the write to finish", "wait for an abort".
//! `DataBinding` is a trait rather than a concrete struct so more binding
//! kinds can be added later even though only the raw image case is
//! implemented here; `async-trait` is what makes the two wait methods
//! object-safe.

use async_trait::async_trait;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Mutex;
use tokio::sync::Notify;

use crate::error::{Result, RivError};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ColorType {
    Rgb,
    Bgr,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ElementType {
    Byte,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RowOrientation {
    TopDown,
    BottomUp,
}

/// Capabilities every data binding exposes to the encoder pipeline that
/// reads from it.
#[async_trait]
pub trait DataBinding: Send + Sync {
    /// Wakes anyone waiting in `wait_for_data`; called by the producer
    /// after it finishes mutating the backing memory.
    fn notify_data_available(&self);

    /// True while the producer is mid-write and a snapshot would tear.
    fn is_async_running(&self) -> bool;

    /// Resolves once the current in-flight write (if any) completes.
    async fn wait_async_completed(&self);

    /// Resolves once this binding is aborted (removed from its provider).
    async fn wait_async_aborted(&self);

    /// Wakes anyone waiting in `wait_async_aborted`; called when the
    /// binding is detached from its provider.
    fn abort(&self);

    /// Resolves when the producer calls `notify_data_available`.
    async fn wait_for_data(&self);

    /// Copies the current frame into a tightly packed top-down RGB
    /// buffer, honouring stride, orientation, and colour type.
    fn snapshot_rgb(&self) -> Result<Vec<u8>>;

    fn width(&self) -> u32;
    fn height(&self) -> u32;
}

/// The only concrete binding kind: a live view over externally owned
/// pixel memory, refreshed in place by the producer between frames.
pub struct RawImageBinding {
    pixels: Mutex<Vec<u8>>,
    width: u32,
    height: u32,
    color_type: ColorType,
    element_type: ElementType,
    orientation: RowOrientation,
    stride: usize,
    async_running: AtomicBool,
    data_available: Notify,
    aborted: Notify,
}

impl RawImageBinding {
    /// `stride` is clamped to at least `width * channels` per the scan-
    /// line invariant; a caller-supplied stride narrower than that would
    /// make row N+1 overlap row N.
    pub fn new(
        width: u32,
        height: u32,
        color_type: ColorType,
        element_type: ElementType,
        orientation: RowOrientation,
        stride: usize,
    ) -> Self {
        let channels = 3usize;
        let min_stride = width as usize * channels;
        let stride = stride.max(min_stride);
        RawImageBinding {
            pixels: Mutex::new(vec![0u8; stride * height as usize]),
            width,
            height,
            color_type,
            element_type,
            orientation,
            stride,
            async_running: AtomicBool::new(false),
            data_available: Notify::new(),
            aborted: Notify::new(),
        }
    }

    /// Replaces the backing pixel memory wholesale. Producers that mutate
    /// in place instead can take the lock directly via `lock_pixels`.
    pub fn write_frame(&self, bytes: &[u8]) {
        self.async_running.store(true, Ordering::SeqCst);
        {
            let mut guard = self.pixels.lock().unwrap();
            guard.copy_from_slice(bytes);
        }
        self.async_running.store(false, Ordering::SeqCst);
        self.notify_data_available();
    }

    pub fn stride(&self) -> usize {
        self.stride
    }

    pub fn signal_aborted(&self) {
        self.aborted.notify_waiters();
    }
}

#[async_trait]
impl DataBinding for RawImageBinding {
    fn notify_data_available(&self) {
        self.data_available.notify_waiters();
    }

    fn is_async_running(&self) -> bool {
        self.async_running.load(Ordering::SeqCst)
    }

    async fn wait_async_completed(&self) {
        while self.is_async_running() {
            // A write may finish between the check and the wait; the
            // loop re-checks after each wake rather than trusting a
            // single notification to land after the flag flips.
            self.data_available.notified().await;
        }
    }

    async fn wait_async_aborted(&self) {
        self.aborted.notified().await;
    }

    fn abort(&self) {
        self.signal_aborted();
    }

    async fn wait_for_data(&self) {
        self.data_available.notified().await;
    }

    fn snapshot_rgb(&self) -> Result<Vec<u8>> {
        let guard = self.pixels.lock().unwrap();
        let channels = 3usize;
        let mut out = vec![0u8; self.width as usize * self.height as usize * channels];
        for row in 0..self.height as usize {
            let src_row = match self.orientation {
                RowOrientation::TopDown => row,
                RowOrientation::BottomUp => self.height as usize - 1 - row,
            };
            let src_start = src_row * self.stride;
            let src_end = src_start + self.width as usize * channels;
            if src_end > guard.len() {
                return Err(RivError::InternalError(
                    "binding stride/height exceed backing buffer".into(),
                ));
            }
            let dst_start = row * self.width as usize * channels;
            let dst_end = dst_start + self.width as usize * channels;
            match self.color_type {
                ColorType::Rgb => {
                    out[dst_start..dst_end].copy_from_slice(&guard[src_start..src_end]);
                }
                ColorType::Bgr => {
                    for px in 0..self.width as usize {
                        let s = src_start + px * channels;
                        let d = dst_start + px * channels;
                        out[d] = guard[s + 2];
                        out[d + 1] = guard[s + 1];
                        out[d + 2] = guard[s];
                    }
                }
            }
        }
        let _ = self.element_type;
        Ok(out)
    }

    fn width(&self) -> u32 {
        self.width
    }

    fn height(&self) -> u32 {
        self.height
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn stride_is_clamped_to_width_times_channels() {
        let binding = RawImageBinding::new(
            4,
            2,
            ColorType::Rgb,
            ElementType::Byte,
            RowOrientation::TopDown,
            0,
        );
        assert_eq!(binding.stride(), 12);
    }

    #[test]
    fn snapshot_is_top_down_regardless_of_source_orientation() {
        let binding = RawImageBinding::new(
            1,
            2,
            ColorType::Rgb,
            ElementType::Byte,
            RowOrientation::BottomUp,
            0,
        );
        binding.write_frame(&[1, 2, 3, 4, 5, 6]);
        let snap = binding.snapshot_rgb().unwrap();
        // row 0 on the wire (bottom-up) is the *last* row in the source
        // buffer, so a top-down snapshot must swap the two rows.
        assert_eq!(snap, vec![4, 5, 6, 1, 2, 3]);
    }

    #[test]
    fn bgr_source_is_converted_to_rgb() {
        let binding = RawImageBinding::new(
            1,
            1,
            ColorType::Bgr,
            ElementType::Byte,
            RowOrientation::TopDown,
            0,
        );
        binding.write_frame(&[10, 20, 30]);
        let snap = binding.snapshot_rgb().unwrap();
        assert_eq!(snap, vec![30, 20, 10]);
    }

    #[tokio::test]
    async fn notify_data_available_wakes_waiter() {
        use std::sync::Arc;
        let binding = Arc::new(RawImageBinding::new(
            1,
            1,
            ColorType::Rgb,
            ElementType::Byte,
            RowOrientation::TopDown,
            0,
        ));
        let waiter = binding.clone();
        let handle = tokio::spawn(async move {
            waiter.wait_for_data().await;
        });
        tokio::time::sleep(std::time::Duration::from_millis(10)).await;
        binding.notify_data_available();
        tokio::time::timeout(std::time::Duration::from_secs(1), handle)
            .await
            .unwrap()
            .unwrap();
    }
}
