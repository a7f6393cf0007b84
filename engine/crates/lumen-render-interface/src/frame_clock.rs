use std::fmt::Display;
use std::ops::Deref;

use lumen_gfx::backend::GfxBackend;

use crate::error::{OrFatal, ReclaimError};

/// frame ring 中的位置：`frame_index % frames_in_flight`
#[derive(Copy, Clone, Debug, PartialEq, Eq, Hash)]
pub struct FrameLabel(usize);
impl FrameLabel {
    #[inline]
    pub fn from_frame(frame_index: u64, frames_in_flight: u32) -> Self {
        Self((frame_index % frames_in_flight as u64) as usize)
    }
}
impl Deref for FrameLabel {
    type Target = usize;
    fn deref(&self) -> &Self::Target {
        &self.0
    }
}
impl Display for FrameLabel {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match u8::try_from(self.0) {
            Ok(i) if i < 26 => write!(f, "{}", (b'A' + i) as char),
            _ => write!(f, "#{}", self.0),
        }
    }
}

/// 帧号与 GPU 完成进度
///
/// - `current_frame` 从 1 开始，是 CPU 正在构建的帧
/// - `fence_last_signaled` 是 GPU 已经完成的最大帧号，从 0 开始
/// - 每一帧结束时，fence 上 signal 的值就是这一帧的帧号；`fence_submitted` 记录已经提交的最大 signal 值
///
/// 第 F 帧退休的资源，在 `fence_last_signaled >= F + frames_in_flight + safety_margin` 之后才可以释放。
pub struct FrameClock<B: GfxBackend> {
    current_frame: u64,
    fence_last_signaled: u64,
    /// 等于 `current_frame - 1`，或者当前帧已经 signal 但还没有推进时等于 `current_frame`
    fence_submitted: u64,
    frames_in_flight: u64,
    safety_margin: u64,

    fence: Option<B::Fence>,
}
// new & init
impl<B: GfxBackend> FrameClock<B> {
    pub const FIRST_FRAME: u64 = 1;

    pub fn new(backend: &B, frames_in_flight: u32, safety_margin: u32) -> Self {
        Self::try_new(backend, frames_in_flight, safety_margin).or_fatal()
    }

    pub fn try_new(backend: &B, frames_in_flight: u32, safety_margin: u32) -> Result<Self, ReclaimError> {
        if frames_in_flight == 0 {
            return Err(ReclaimError::InvalidConfig("frames_in_flight must be at least 1".to_string()));
        }
        let fence = backend.create_fence(0, "frame-clock")?;
        log::info!(
            "frame clock created: {} frames in flight, safety margin {}",
            frames_in_flight,
            safety_margin
        );
        Ok(Self {
            current_frame: Self::FIRST_FRAME,
            fence_last_signaled: 0,
            fence_submitted: 0,
            frames_in_flight: frames_in_flight as u64,
            safety_margin: safety_margin as u64,
            fence: Some(fence),
        })
    }
}
// destroy
impl<B: GfxBackend> FrameClock<B> {
    /// 调用前需要先 [`FrameClock::wait_idle`]
    pub fn destroy(mut self, backend: &B) {
        self.destroy_mut(backend);
    }

    pub fn destroy_mut(&mut self, backend: &B) {
        if let Some(fence) = self.fence.take() {
            backend.destroy_fence(fence);
        }
    }
}
impl<B: GfxBackend> Drop for FrameClock<B> {
    fn drop(&mut self) {
        if !std::thread::panicking() {
            debug_assert!(self.fence.is_none(), "FrameClock dropped without destroy()");
        }
    }
}
// getters
impl<B: GfxBackend> FrameClock<B> {
    #[inline]
    pub fn current_frame(&self) -> u64 {
        self.current_frame
    }
    #[inline]
    pub fn fence_last_signaled(&self) -> u64 {
        self.fence_last_signaled
    }
    #[inline]
    pub fn fence_submitted(&self) -> u64 {
        self.fence_submitted
    }
    #[inline]
    pub fn frames_in_flight(&self) -> u32 {
        self.frames_in_flight as u32
    }
    #[inline]
    pub fn safety_margin(&self) -> u32 {
        self.safety_margin as u32
    }
    #[inline]
    pub fn frame_label(&self) -> FrameLabel {
        FrameLabel::from_frame(self.current_frame, self.frames_in_flight as u32)
    }
    #[inline]
    pub fn frame_name(&self) -> String {
        format!("[F{}{}]", self.current_frame, self.frame_label())
    }
    #[inline]
    pub fn fence(&self) -> &B::Fence {
        self.fence.as_ref().expect("FrameClock used after destroy()")
    }
    /// 最早可以释放 `retired_at` 帧退休的资源的 fence 值
    #[inline]
    pub fn safe_frame(&self, retired_at: u64) -> u64 {
        retired_at + self.frames_in_flight + self.safety_margin
    }
    /// GPU 是否已经完成了第 `frame` 帧
    #[inline]
    pub fn is_frame_complete(&self, frame: u64) -> bool {
        self.fence_last_signaled >= frame
    }
}
// tools
impl<B: GfxBackend> FrameClock<B> {
    /// `retired_at` 帧退休的资源现在能否释放
    #[inline]
    pub fn safe_to_free(&self, retired_at: u64) -> bool {
        self.fence_last_signaled >= self.safe_frame(retired_at)
    }

    /// 结束当前帧：在 queue 上 signal 当前帧号，帧号加一，然后刷新 GPU 进度
    ///
    /// 每一帧调用一次，在这一帧的命令提交之后。返回新的帧号。
    pub fn advance(&mut self, backend: &B) -> u64 {
        self.try_advance(backend).or_fatal()
    }

    pub fn try_advance(&mut self, backend: &B) -> Result<u64, ReclaimError> {
        self.try_signal_current(backend)?;
        self.current_frame += 1;
        Ok(self.current_frame)
    }

    /// 在 queue 上 signal 当前帧号并刷新 GPU 进度，但不推进帧号
    ///
    /// 同一帧只会 signal 一次，重复调用只刷新进度。之后的 [`FrameClock::advance`] 不会再次 signal。
    pub fn try_signal_current(&mut self, backend: &B) -> Result<u64, ReclaimError> {
        if self.fence_submitted < self.current_frame {
            backend.signal_fence(self.fence(), self.current_frame)?;
            self.fence_submitted = self.current_frame;
        }
        self.try_poll(backend)
    }

    /// 非阻塞地读取 fence 的完成值
    pub fn poll(&mut self, backend: &B) -> u64 {
        self.try_poll(backend).or_fatal()
    }

    pub fn try_poll(&mut self, backend: &B) -> Result<u64, ReclaimError> {
        let completed = backend.fence_completed_value(self.fence())?;
        self.fence_last_signaled = self.fence_last_signaled.max(completed);
        debug_assert!(self.fence_last_signaled <= self.current_frame);
        Ok(self.fence_last_signaled)
    }

    /// 阻塞直到 GPU 完成第 `frame` 帧
    ///
    /// 没有超时。只能在 shutdown 和 resize 时调用；设备丢失是致命错误。
    pub fn wait_for_frame(&mut self, backend: &B, frame: u64) {
        self.try_wait_for_frame(backend, frame).or_fatal()
    }

    pub fn try_wait_for_frame(&mut self, backend: &B, frame: u64) -> Result<(), ReclaimError> {
        if self.is_frame_complete(frame) {
            return Ok(());
        }
        if frame > self.fence_submitted {
            return Err(ReclaimError::FrameNotSubmitted {
                frame,
                current: self.current_frame,
            });
        }
        log::debug!("waiting for frame {} (gpu at {})", frame, self.fence_last_signaled);
        backend.wait_fence(self.fence(), frame)?;
        self.fence_last_signaled = self.fence_last_signaled.max(frame);
        Ok(())
    }

    /// 等待所有已经 signal 的帧完成
    pub fn wait_idle(&mut self, backend: &B) {
        self.try_wait_idle(backend).or_fatal()
    }

    #[inline]
    pub fn try_wait_idle(&mut self, backend: &B) -> Result<(), ReclaimError> {
        self.try_wait_for_frame(backend, self.fence_submitted)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use lumen_gfx::headless::{HeadlessBackend, HeadlessTimelineMode};

    fn manual_backend() -> HeadlessBackend {
        HeadlessBackend::with_timeline_mode(HeadlessTimelineMode::Manual)
    }

    #[test]
    fn test_frame_name() {
        let backend = HeadlessBackend::new();
        let mut clock = FrameClock::new(&backend, 3, 1);
        assert_eq!(clock.frame_name(), "[F1B]");
        clock.advance(&backend);
        assert_eq!(clock.frame_name(), "[F2C]");
        clock.advance(&backend);
        assert_eq!(clock.frame_name(), "[F3A]");
        clock.destroy(&backend);
    }

    #[test]
    fn test_advance_signals_pre_increment_value() {
        let backend = manual_backend();
        let mut clock = FrameClock::new(&backend, 2, 1);
        assert_eq!(clock.current_frame(), 1);
        assert_eq!(clock.advance(&backend), 2);
        assert_eq!(clock.fence().last_signaled(), 1);
        // manual 模式下 GPU 还没有完成
        assert_eq!(clock.fence_last_signaled(), 0);

        backend.complete_fence(clock.fence(), 1);
        assert_eq!(clock.poll(&backend), 1);
        clock.destroy(&backend);
    }

    #[test]
    fn test_signal_current_is_idempotent() {
        let backend = manual_backend();
        let mut clock = FrameClock::new(&backend, 2, 1);
        clock.try_signal_current(&backend).unwrap();
        clock.try_signal_current(&backend).unwrap();
        assert_eq!(clock.current_frame(), 1);
        assert_eq!(clock.fence_submitted(), 1);
        assert_eq!(clock.fence().last_signaled(), 1);

        // 已经 signal 的帧可以等待，advance 不会再次 signal
        clock.wait_for_frame(&backend, 1);
        assert_eq!(clock.advance(&backend), 2);
        assert_eq!(clock.fence().last_signaled(), 1);
        assert_eq!(clock.fence_submitted(), 1);
        clock.destroy(&backend);
    }

    #[test]
    fn test_safe_to_free_formula() {
        let backend = manual_backend();
        let mut clock = FrameClock::new(&backend, 2, 1);
        while clock.current_frame() < 20 {
            clock.advance(&backend);
        }
        for completed in 0..=12 {
            backend.complete_fence(clock.fence(), completed);
            clock.poll(&backend);
            assert!(!clock.safe_to_free(10), "fence at {completed}");
        }
        backend.complete_fence(clock.fence(), 13);
        clock.poll(&backend);
        assert!(clock.safe_to_free(10));
        clock.destroy(&backend);
    }

    #[test]
    fn test_safety_margin_is_configurable() {
        let backend = HeadlessBackend::new();
        let strict = FrameClock::new(&backend, 2, 3);
        let relaxed = FrameClock::new(&backend, 2, 0);
        assert_eq!(strict.safe_frame(10), 15);
        assert_eq!(relaxed.safe_frame(10), 12);
        strict.destroy(&backend);
        relaxed.destroy(&backend);
    }

    #[test]
    fn test_wait_idle_blocks_until_last_signaled() {
        let backend = manual_backend();
        let mut clock = FrameClock::new(&backend, 2, 1);
        for _ in 0..4 {
            clock.advance(&backend);
        }
        assert_eq!(clock.fence_last_signaled(), 0);
        clock.wait_idle(&backend);
        assert_eq!(clock.fence_last_signaled(), 4);
        assert!(clock.is_frame_complete(4));
        clock.destroy(&backend);
    }

    #[test]
    fn test_wait_for_unsubmitted_frame_is_rejected() {
        let backend = HeadlessBackend::new();
        let mut clock = FrameClock::new(&backend, 2, 1);
        assert_eq!(
            clock.try_wait_for_frame(&backend, 1),
            Err(ReclaimError::FrameNotSubmitted { frame: 1, current: 1 })
        );
        // 还没有任何帧的时候 wait_idle 什么都不做
        clock.wait_idle(&backend);
        clock.destroy(&backend);
    }

    #[test]
    fn test_device_lost_while_waiting() {
        let backend = manual_backend();
        let mut clock = FrameClock::new(&backend, 2, 1);
        clock.advance(&backend);
        backend.lose_device();
        assert_eq!(clock.try_wait_for_frame(&backend, 1), Err(ReclaimError::DeviceLost));
        clock.destroy(&backend);
    }

    #[test]
    #[should_panic(expected = "device lost")]
    fn test_device_lost_is_fatal() {
        let backend = manual_backend();
        let mut clock = FrameClock::new(&backend, 2, 1);
        clock.advance(&backend);
        backend.lose_device();
        clock.wait_for_frame(&backend, 1);
    }
}
