use crate::buffer::Buffer;
use crate::device::CaptureDevice;
use crate::error::{FramepipeError, Result};
use crate::format::{VideoInput, VideoStandard};
use std::collections::VecDeque;
use std::thread;
use std::time::{Duration, Instant};

/// Capture device that renders colour bars with a moving line.
///
/// The first eight bytes of every frame carry the frame number
/// (little-endian), so consumers can check ordering.
#[derive(Debug)]
pub struct SyntheticCapture {
    standard: VideoStandard,
    input: VideoInput,
    queue: VecDeque<Buffer>,
    started: bool,
    produced: u64,
    frame_limit: Option<u64>,
    frame_interval: Option<Duration>,
    next_frame_at: Option<Instant>,
    fail_detect: bool,
    fail_at: Option<u64>,
}

impl SyntheticCapture {
    pub fn new(standard: VideoStandard) -> Self {
        Self {
            standard,
            input: standard.default_input(),
            queue: VecDeque::new(),
            started: false,
            produced: 0,
            frame_limit: None,
            frame_interval: None,
            next_frame_at: None,
            fail_detect: false,
            fail_at: None,
        }
    }

    pub fn with_input(mut self, input: VideoInput) -> Self {
        self.input = input;
        self
    }

    /// Stop after `frames` frames, as if the source ran dry.
    pub fn with_frame_limit(mut self, frames: u64) -> Self {
        self.frame_limit = Some(frames);
        self
    }

    /// Deliver at most one frame per `interval`.
    pub fn with_frame_interval(mut self, interval: Duration) -> Self {
        self.frame_interval = Some(interval);
        self
    }

    /// Deliver frames at the standard's nominal rate.
    pub fn paced(self) -> Self {
        let millis = u64::from(self.standard.frame_rate_milli());
        self.with_frame_interval(Duration::from_micros(1_000_000_000 / millis))
    }

    /// Make `detect_format` fail.
    pub fn with_detect_failure(mut self) -> Self {
        self.fail_detect = true;
        self
    }

    /// Make the `n`-th frame (1-based) fail to capture.
    pub fn with_failure_at(mut self, n: u64) -> Self {
        self.fail_at = Some(n);
        self
    }

    pub fn frames_produced(&self) -> u64 {
        self.produced
    }

    fn wait_for_frame_slot(&mut self) {
        let Some(interval) = self.frame_interval else {
            return;
        };
        let now = Instant::now();
        let due = self.next_frame_at.unwrap_or(now);
        if due > now {
            thread::sleep(due - now);
        }
        self.next_frame_at = Some(due.max(now) + interval);
    }

    fn render(&self, frame: &mut Buffer) {
        let width = self.standard.resolution().0 as usize;
        let capacity = frame.capacity();
        let luma_len = capacity * 2 / 3;
        let moving_row = (self.produced as usize * 4) % (luma_len / width).max(1);

        let data = frame.as_mut_slice();
        for (row, line) in data[..luma_len].chunks_mut(width).enumerate() {
            if row == moving_row {
                line.fill(235);
                continue;
            }
            for (x, px) in line.iter_mut().enumerate() {
                let bar = x * 8 / width;
                *px = 16 + (bar as u8) * 30;
            }
        }
        data[luma_len..].fill(128);

        let stamp = self.produced.to_le_bytes();
        let n = stamp.len().min(capacity);
        data[..n].copy_from_slice(&stamp[..n]);
        frame.set_bytes_used(capacity);
    }
}

/// Reads the frame number stamped by [`SyntheticCapture`].
pub fn stamped_frame_number(frame: &[u8]) -> Option<u64> {
    let bytes: [u8; 8] = frame.get(..8)?.try_into().ok()?;
    Some(u64::from_le_bytes(bytes))
}

impl CaptureDevice for SyntheticCapture {
    fn detect_format(&mut self) -> Result<VideoStandard> {
        if self.fail_detect {
            return Err(FramepipeError::device("no video signal detected"));
        }
        tracing::debug!(standard = %self.standard, input = ?self.input, "synthetic input detected");
        Ok(self.standard)
    }

    fn start(&mut self, buffers: Vec<Buffer>) -> Result<()> {
        if buffers.is_empty() {
            return Err(FramepipeError::device("capture started without buffers"));
        }
        self.queue.extend(buffers);
        self.started = true;
        Ok(())
    }

    fn acquire_frame(&mut self) -> Result<Option<Buffer>> {
        if !self.started {
            return Err(FramepipeError::device("acquire before start"));
        }
        if self.frame_limit.is_some_and(|limit| self.produced >= limit) {
            return Ok(None);
        }
        if self.fail_at == Some(self.produced + 1) {
            return Err(FramepipeError::device(format!(
                "capture failed on frame {}",
                self.produced + 1
            )));
        }

        self.wait_for_frame_slot();
        let mut frame = self
            .queue
            .pop_front()
            .ok_or_else(|| FramepipeError::device("every capture buffer is held downstream"))?;
        self.render(&mut frame);
        self.produced += 1;
        Ok(Some(frame))
    }

    fn release_frame(&mut self, frame: Buffer) -> Result<()> {
        self.queue.push_back(frame);
        Ok(())
    }

    fn stop(&mut self) {
        self.queue.clear();
        self.started = false;
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::buffer::BufferPool;
    use crate::format::VideoFormat;

    fn started(device: &mut SyntheticCapture, count: usize) -> BufferPool {
        let format = VideoFormat::negotiate(device.standard, None).unwrap();
        let pool = BufferPool::create("capture", count, format.frame_size()).unwrap();
        let buffers = (0..count).filter_map(|_| pool.get_free()).collect();
        device.start(buffers).unwrap();
        pool
    }

    #[test]
    fn frames_are_stamped_in_order() {
        let mut device = SyntheticCapture::new(VideoStandard::D1Ntsc);
        let _pool = started(&mut device, 2);
        for expected in 0..5 {
            let frame = device.acquire_frame().unwrap().unwrap();
            assert_eq!(stamped_frame_number(frame.filled()), Some(expected));
            assert_eq!(frame.bytes_used(), frame.capacity());
            device.release_frame(frame).unwrap();
        }
    }

    #[test]
    fn frame_limit_ends_stream() {
        let mut device = SyntheticCapture::new(VideoStandard::D1Pal).with_frame_limit(1);
        let _pool = started(&mut device, 1);
        let frame = device.acquire_frame().unwrap().unwrap();
        device.release_frame(frame).unwrap();
        assert!(device.acquire_frame().unwrap().is_none());
    }

    #[test]
    fn empty_queue_is_device_error() {
        let mut device = SyntheticCapture::new(VideoStandard::D1Ntsc);
        let _pool = started(&mut device, 1);
        let _held = device.acquire_frame().unwrap().unwrap();
        assert!(device.acquire_frame().is_err());
    }

    #[test]
    fn scripted_failures() {
        let mut device = SyntheticCapture::new(VideoStandard::D1Ntsc).with_detect_failure();
        assert!(device.detect_format().is_err());

        let mut device = SyntheticCapture::new(VideoStandard::D1Ntsc).with_failure_at(2);
        let _pool = started(&mut device, 2);
        assert!(device.acquire_frame().is_ok());
        assert!(device.acquire_frame().is_err());
    }

    #[test]
    fn acquire_before_start_fails() {
        let mut device = SyntheticCapture::new(VideoStandard::D1Ntsc);
        assert!(device.acquire_frame().is_err());
    }

    #[test]
    fn pacing_spaces_frames() {
        let mut device = SyntheticCapture::new(VideoStandard::D1Ntsc)
            .with_frame_interval(Duration::from_millis(20));
        let _pool = started(&mut device, 1);
        let start = Instant::now();
        for _ in 0..3 {
            let frame = device.acquire_frame().unwrap().unwrap();
            device.release_frame(frame).unwrap();
        }
        assert!(start.elapsed() >= Duration::from_millis(40));
    }

    #[test]
    fn stamp_needs_eight_bytes() {
        assert_eq!(stamped_frame_number(&[1, 2, 3]), None);
    }
}
