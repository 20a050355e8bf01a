//! 会话监管：取消令牌的层级管理
//!
//! 根令牌代表整个会话；每一"代"请求共享一个代令牌（根的子令牌），每个请求再拿代令牌的子令牌。
//! Cancel 只取消当前代并换上新代，之后提交的请求不受影响；shutdown 取消根令牌，全部请求随之结束。

use std::sync::{Mutex, MutexGuard};

use tokio_util::sync::CancellationToken;

#[derive(Debug)]
pub struct SessionSupervisor {
    root: CancellationToken,
    generation: Mutex<CancellationToken>,
}

impl SessionSupervisor {
    pub fn new() -> Self {
        let root = CancellationToken::new();
        let generation = Mutex::new(root.child_token());
        Self { root, generation }
    }

    /// 为单个请求创建令牌
    pub fn request_token(&self) -> CancellationToken {
        self.lock_generation().child_token()
    }

    /// 取消所有进行中的请求（用户 Stop），会话继续
    pub fn cancel_in_flight(&self) {
        let mut generation = self.lock_generation();
        generation.cancel();
        *generation = self.root.child_token();
    }

    /// 结束会话：取消根令牌
    pub fn shutdown(&self) {
        self.root.cancel();
    }

    pub fn is_shut_down(&self) -> bool {
        self.root.is_cancelled()
    }

    fn lock_generation(&self) -> MutexGuard<'_, CancellationToken> {
        self.generation.lock().unwrap_or_else(|e| e.into_inner())
    }
}

impl Default for SessionSupervisor {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_cancel_in_flight_spares_later_requests() {
        let supervisor = SessionSupervisor::new();
        let first = supervisor.request_token();
        supervisor.cancel_in_flight();
        let second = supervisor.request_token();

        assert!(first.is_cancelled());
        assert!(!second.is_cancelled());
        assert!(!supervisor.is_shut_down());
    }

    #[test]
    fn test_shutdown_cancels_everything() {
        let supervisor = SessionSupervisor::new();
        let token = supervisor.request_token();
        supervisor.shutdown();

        assert!(token.is_cancelled());
        assert!(supervisor.request_token().is_cancelled());
        assert!(supervisor.is_shut_down());
    }
}
