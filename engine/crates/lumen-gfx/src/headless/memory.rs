use std::ptr::NonNull;

/// 一块裸的 host 内存，地址在整个生命周期内保持不变
///
/// 不实现 Drop，需要手动 [`HostMemory::free`]。
pub(crate) struct HostMemory {
    span: HostSpan,
}

/// 指向 [`HostMemory`] 的非拥有视图
#[derive(Copy, Clone)]
pub(crate) struct HostSpan {
    pub ptr: NonNull<u8>,
    pub len: usize,
}

impl HostMemory {
    pub fn zeroed(len: usize) -> Self {
        let boxed: Box<[u8]> = vec![0u8; len].into_boxed_slice();
        let raw = Box::into_raw(boxed);
        // Box 的指针一定非空
        let ptr = NonNull::new(raw as *mut u8).unwrap_or(NonNull::dangling());
        Self {
            span: HostSpan { ptr, len },
        }
    }

    #[inline]
    pub fn span(&self) -> HostSpan {
        self.span
    }

    #[inline]
    pub fn as_slice(&self) -> &[u8] {
        // SAFETY: ptr/len 来自 zeroed 中的 Box<[u8]>，在 free 之前一直有效
        unsafe { std::slice::from_raw_parts(self.span.ptr.as_ptr(), self.span.len) }
    }

    pub fn free(self) {
        let HostSpan { ptr, len } = self.span;
        // SAFETY: 和 zeroed 中的 Box::into_raw 一一对应
        unsafe {
            drop(Box::from_raw(std::ptr::slice_from_raw_parts_mut(ptr.as_ptr(), len)));
        }
    }
}

impl HostSpan {
    /// 两块内存之间的 copy，越界时返回 false
    pub fn copy_to(self, src_offset: u64, dst: HostSpan, dst_offset: u64, size: u64) -> bool {
        let in_range = |offset: u64, len: usize| offset.checked_add(size).is_some_and(|end| end <= len as u64);
        if !in_range(src_offset, self.len) || !in_range(dst_offset, dst.len) {
            return false;
        }
        // SAFETY: 范围已经检查过；src 和 dst 可能是同一块内存，使用 copy 而不是 copy_nonoverlapping
        unsafe {
            std::ptr::copy(
                self.ptr.as_ptr().add(src_offset as usize),
                dst.ptr.as_ptr().add(dst_offset as usize),
                size as usize,
            );
        }
        true
    }
}
