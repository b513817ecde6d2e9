//! 会话监管：协作式暂停
//!
//! 嵌入方持有 SessionSupervisor 的克隆，随时 pause()；主循环只在轮次边界（开始前、结束后）采样，
//! 进行中的能力调用总会执行完毕。暂停被采纳时标志随之清除，resume 后不会立即再次暂停；
//! 会话在采纳前结束（完成、失败或停放待澄清）时，未采纳的请求随主循环退出一并丢弃。

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;

/// 会话级暂停标志（可克隆，跨任务共享）
#[derive(Debug, Clone, Default)]
pub struct SessionSupervisor {
    pause_requested: Arc<AtomicBool>,
}

impl SessionSupervisor {
    pub fn new() -> Self {
        Self::default()
    }

    /// 请求在下一个轮次边界暂停
    pub fn pause(&self) {
        self.pause_requested.store(true, Ordering::SeqCst);
    }

    /// 撤销尚未被采纳的暂停请求
    pub fn cancel_pause(&self) {
        self.pause_requested.store(false, Ordering::SeqCst);
    }

    pub fn is_pause_requested(&self) -> bool {
        self.pause_requested.load(Ordering::SeqCst)
    }

    /// 采样并消费暂停请求
    pub fn take_pause(&self) -> bool {
        self.pause_requested.swap(false, Ordering::SeqCst)
    }
}
