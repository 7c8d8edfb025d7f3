use std::fmt;

use serde::{Deserialize, Serialize};

/// 下载任务状态
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum TaskState {
    Stopped,
    Started,
    Completed,
    Failed,
}

/// 驱动状态机的信号
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Signal {
    Start,
    Stop,
    Complete,
    Fail,
}

/// 状态转换附带的动作
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Effect {
    /// 探测（首次）并启动工作者
    Launch,
    /// 取消正在进行的工作
    Cancel,
    None,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Transition {
    pub from: TaskState,
    pub to: TaskState,
    pub effect: Effect,
}

impl TaskState {
    /// 查转换表；`None` 表示该信号在当前状态下被忽略
    pub fn on(self, signal: Signal) -> Option<Transition> {
        use Signal::*;
        use TaskState::*;

        let (to, effect) = match (self, signal) {
            (Stopped | Failed, Start) => (Started, Effect::Launch),
            (Started, Stop) => (Stopped, Effect::Cancel),
            (Stopped | Started, Complete) => (Completed, Effect::None),
            (Stopped | Started, Fail) => (Failed, Effect::None),
            _ => return None,
        };
        Some(Transition {
            from: self,
            to,
            effect,
        })
    }
}

impl fmt::Display for TaskState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            TaskState::Stopped => "已停止",
            TaskState::Started => "下载中",
            TaskState::Completed => "已完成",
            TaskState::Failed => "失败",
        };
        f.write_str(name)
    }
}
