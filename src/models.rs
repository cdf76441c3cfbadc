use serde::{Deserialize, Serialize};
use serde_json::Value;

use crate::payload::DEFAULT_DURATION;

const ERROR_RECORD_NAME: &str = "错误";

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct ImportSettings {
    pub duration: u64,
    pub max_latency: u64,
    pub min_latency: u64,
}

impl Default for ImportSettings {
    fn default() -> Self {
        Self {
            duration: DEFAULT_DURATION,
            max_latency: 0,
            min_latency: 0,
        }
    }
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub enum RunPhase {
    #[default]
    Idle,
    Validating,
    Running,
    Done,
    Aborted,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TaskResult {
    pub name: String,
    pub target: String,
    pub success: bool,
    pub response: Value,
}

impl TaskResult {
    pub fn aborted(reason: impl Into<String>) -> Self {
        Self {
            name: ERROR_RECORD_NAME.to_string(),
            target: String::new(),
            success: false,
            response: Value::String(reason.into()),
        }
    }
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct RunProgress {
    pub total: usize,
    pub completed: usize,
    pub succeeded: usize,
    pub failed: usize,
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct RunState {
    pub phase: RunPhase,
    pub progress: RunProgress,
    pub results: Vec<TaskResult>,
    pub message: String,
}

impl RunState {
    pub fn reset(&mut self, total: usize) {
        self.progress = RunProgress { total, ..Default::default() };
        self.results.clear();
        self.message = format!("进度: 0/{}", total);
    }

    pub fn abort(&mut self, reason: String) {
        self.phase = RunPhase::Aborted;
        self.progress = RunProgress::default();
        self.results = vec![TaskResult::aborted(reason.clone())];
        self.message = reason;
    }

    pub fn record(&mut self, result: TaskResult) {
        self.progress.completed += 1;
        if result.success {
            self.progress.succeeded += 1;
        } else {
            self.progress.failed += 1;
        }
        self.message = format!("进度: {}/{}", self.progress.completed, self.progress.total);
        self.results.push(result);
    }

    pub fn finish(&mut self) {
        self.phase = RunPhase::Done;
        self.message = format!(
            "完成! 共添加 {} 个任务，成功 {} 个，失败 {} 个",
            self.progress.completed, self.progress.succeeded, self.progress.failed
        );
    }
}
