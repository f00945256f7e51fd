//! 视图路由
//!
//! 网络切换、SIWX 签名等流程把对应视图压栈，UI 根据栈顶渲染。

use serde::{Deserialize, Serialize};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum RouterView {
    Connect,
    Account,
    Networks,
    /// 切换网络（等待钱包确认）
    SwitchNetwork,
    /// 切换到另一个命名空间，需要用户确认并重新连接
    SwitchActiveChain,
    SiwxSignMessage,
    ApproveTransaction,
    UnsupportedChain,
}

#[derive(Debug, Clone)]
pub struct RouterController {
    history: Vec<RouterView>,
}

impl Default for RouterController {
    fn default() -> Self {
        Self::new(RouterView::Connect)
    }
}

impl RouterController {
    pub fn new(initial: RouterView) -> Self {
        Self {
            history: vec![initial],
        }
    }

    pub fn current(&self) -> RouterView {
        self.history.last().copied().unwrap_or(RouterView::Connect)
    }

    pub fn history(&self) -> &[RouterView] {
        &self.history
    }

    /// 栈顶已是该视图时不重复压栈
    pub fn push(&mut self, view: RouterView) {
        if self.current() != view {
            tracing::debug!(?view, "Router push");
            self.history.push(view);
        }
    }

    pub fn replace(&mut self, view: RouterView) {
        if self.history.len() > 1 {
            self.history.pop();
            self.push(view);
        } else {
            self.reset(view);
        }
    }

    /// 至少保留一个视图
    pub fn go_back(&mut self) -> RouterView {
        if self.history.len() > 1 {
            self.history.pop();
        }
        self.current()
    }

    /// 返回到最近一次出现的该视图之前
    pub fn go_back_from(&mut self, view: RouterView) {
        if let Some(index) = self.history.iter().rposition(|v| *v == view) {
            self.history.truncate(index.max(1));
        }
    }

    pub fn reset(&mut self, view: RouterView) {
        self.history.clear();
        self.history.push(view);
    }
}
