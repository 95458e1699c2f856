//! 按脚本回放的推理服务，用于离线回放与测试

use async_trait::async_trait;
use std::collections::VecDeque;
use std::sync::Mutex;

use super::ReasoningService;
use super::types::{ModelReply, ReasoningRequest};
use crate::error::ReasoningError;

/// 依次返回预置回复，并记录收到的每一个请求
pub struct ScriptedReasoner {
    script: Mutex<VecDeque<Result<ModelReply, ReasoningError>>>,
    /// 脚本耗尽后重复返回的回复
    fallback: Option<ModelReply>,
    requests: Mutex<Vec<ReasoningRequest>>,
}

impl ScriptedReasoner {
    pub fn new(replies: Vec<ModelReply>) -> Self {
        Self::from_outcomes(replies.into_iter().map(Ok).collect())
    }

    /// 脚本中可以混入错误，用于模拟服务故障
    pub fn from_outcomes(outcomes: Vec<Result<ModelReply, ReasoningError>>) -> Self {
        Self {
            script: Mutex::new(outcomes.into()),
            fallback: None,
            requests: Mutex::new(Vec::new()),
        }
    }

    /// 每次都返回同一个回复
    pub fn repeating(reply: ModelReply) -> Self {
        Self {
            script: Mutex::new(VecDeque::new()),
            fallback: Some(reply),
            requests: Mutex::new(Vec::new()),
        }
    }

    pub fn call_count(&self) -> usize {
        self.requests.lock().map(|r| r.len()).unwrap_or_default()
    }

    pub fn requests(&self) -> Vec<ReasoningRequest> {
        self.requests
            .lock()
            .map(|r| r.clone())
            .unwrap_or_default()
    }

    pub fn remaining(&self) -> usize {
        self.script.lock().map(|s| s.len()).unwrap_or_default()
    }
}

#[async_trait]
impl ReasoningService for ScriptedReasoner {
    async fn respond(&self, request: &ReasoningRequest) -> Result<ModelReply, ReasoningError> {
        if let Ok(mut requests) = self.requests.lock() {
            requests.push(request.clone());
        }

        let next = self
            .script
            .lock()
            .map_err(|e| ReasoningError::Provider(e.to_string()))?
            .pop_front();

        match (next, &self.fallback) {
            (Some(outcome), _) => outcome,
            (None, Some(reply)) => Ok(reply.clone()),
            (None, None) => Err(ReasoningError::InvalidRequest(
                "scripted reasoner has no reply left".to_string(),
            )),
        }
    }
}
