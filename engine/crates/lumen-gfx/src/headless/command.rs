use std::cell::{Cell, RefCell};

use crate::resources::state::ResourceState;

/// 录制在 [`HeadlessCommandBuffer`] 中的命令，资源以 id 表示
#[derive(Clone, Debug, PartialEq, Eq)]
pub enum HeadlessCommand {
    BufferTransition {
        buffer: u64,
        from: ResourceState,
        to: ResourceState,
    },
    ImageTransition {
        image: u64,
        from: ResourceState,
        to: ResourceState,
    },
    CopyBuffer {
        src: u64,
        src_offset: u64,
        dst: u64,
        dst_offset: u64,
        size: u64,
    },
    /// 只写入 mip 0，`size` 是 mip 0 的字节数
    CopyBufferToImage {
        src: u64,
        src_offset: u64,
        image: u64,
        size: u64,
    },
}

pub struct HeadlessCommandBuffer {
    pub(crate) id: u64,
    pub(crate) name: String,
    pub(crate) recording: Cell<bool>,
    pub(crate) commands: RefCell<Vec<HeadlessCommand>>,
    pub(crate) submit_count: Cell<u32>,
}
// new & init
impl HeadlessCommandBuffer {
    pub(crate) fn new(id: u64, name: &str) -> Self {
        Self {
            id,
            name: name.to_string(),
            recording: Cell::new(false),
            commands: RefCell::new(Vec::new()),
            submit_count: Cell::new(0),
        }
    }
}
// getters
impl HeadlessCommandBuffer {
    #[inline]
    pub fn id(&self) -> u64 {
        self.id
    }
    #[inline]
    pub fn name(&self) -> &str {
        &self.name
    }
    #[inline]
    pub fn is_recording(&self) -> bool {
        self.recording.get()
    }
    #[inline]
    pub fn submit_count(&self) -> u32 {
        self.submit_count.get()
    }
    /// 当前录制的命令的快照
    #[inline]
    pub fn commands(&self) -> Vec<HeadlessCommand> {
        self.commands.borrow().clone()
    }
}
// tools
impl HeadlessCommandBuffer {
    #[inline]
    pub(crate) fn record(&self, command: HeadlessCommand) {
        self.commands.borrow_mut().push(command);
    }
}
