use crate::error::ResourceError;
use crate::resource::{ResourceHandle, ResourceProvider};
use crate::types::ResourceConfig;
use async_trait::async_trait;
use std::sync::{Arc, Mutex};
use std::time::Duration;

#[derive(Default)]
struct FakeState {
    log: Vec<String>,
    failures: Vec<(String, String)>,
    delays: Vec<(String, Duration)>,
    open_handles: usize,
    acquire_error: Option<String>,
}

/// Resource double that records statements and fails those matching a prefix.
#[derive(Clone, Default)]
pub(crate) struct FakeResource {
    state: Arc<Mutex<FakeState>>,
}

impl FakeResource {
    pub(crate) fn fail_when(&self, prefix: &str, message: &str) {
        self.state
            .lock()
            .unwrap()
            .failures
            .push((prefix.to_string(), message.to_string()));
    }

    /// Stall statements matching `prefix` for `delay` before answering.
    pub(crate) fn delay_when(&self, prefix: &str, delay: Duration) {
        self.state
            .lock()
            .unwrap()
            .delays
            .push((prefix.to_string(), delay));
    }

    pub(crate) fn refuse_connections(&self, message: &str) {
        self.state.lock().unwrap().acquire_error = Some(message.to_string());
    }

    pub(crate) fn log(&self) -> Vec<String> {
        self.state.lock().unwrap().log.clone()
    }

    pub(crate) fn open_handles(&self) -> usize {
        self.state.lock().unwrap().open_handles
    }
}

pub(crate) struct FakeHandle {
    state: Arc<Mutex<FakeState>>,
}

impl Drop for FakeHandle {
    fn drop(&mut self) {
        if let Ok(mut state) = self.state.lock() {
            state.open_handles -= 1;
        }
    }
}

#[async_trait]
impl ResourceHandle for FakeHandle {
    async fn execute_raw(&mut self, statement: &str) -> Result<u64, ResourceError> {
        let (failure, delay) = {
            let mut state = self.state.lock().unwrap();
            state.log.push(statement.to_string());
            let failure = state
                .failures
                .iter()
                .find(|(prefix, _)| statement.starts_with(prefix.as_str()))
                .map(|(_, message)| message.clone());
            let delay = state
                .delays
                .iter()
                .find(|(prefix, _)| statement.starts_with(prefix.as_str()))
                .map(|(_, delay)| *delay);
            (failure, delay)
        };
        if let Some(delay) = delay {
            tokio::time::sleep(delay).await;
        }
        match failure {
            Some(message) => Err(ResourceError::statement(statement, message)),
            None => Ok(1),
        }
    }
}

#[async_trait]
impl ResourceProvider for FakeResource {
    type Handle = FakeHandle;

    async fn acquire(&self, config: &ResourceConfig) -> Result<FakeHandle, ResourceError> {
        let mut state = self.state.lock().unwrap();
        if let Some(message) = &state.acquire_error {
            return Err(ResourceError::Connect {
                target: config.host.clone(),
                message: message.clone(),
            });
        }
        state.open_handles += 1;
        Ok(FakeHandle {
            state: self.state.clone(),
        })
    }
}
