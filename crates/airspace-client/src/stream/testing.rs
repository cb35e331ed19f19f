// Copyright 2025 Chris Custine
//
// Licensed under the Apache License, Version 2.0 (the "License");
// you may not use this file except in compliance with the License.
// You may obtain a copy of the License at
//
//     http://www.apache.org/licenses/LICENSE-2.0
//
// Unless required by applicable law or agreed to in writing, software
// distributed under the License is distributed on an "AS IS" BASIS,
// WITHOUT WARRANTIES OR CONDITIONS OF ANY KIND, either express or implied.
// See the License for the specific language governing permissions and
// limitations under the License.

//! In-memory transport for connection tests.

use std::collections::VecDeque;
use std::sync::{Arc, Mutex};

use async_trait::async_trait;

use super::{FrameChannel, Transport, TransportError};

/// What the next connect attempt does.
#[derive(Debug, Clone)]
pub(crate) enum Script {
    /// Connect fails.
    Fail,
    /// Connect succeeds, yields `frames`, then closes (or hangs open).
    Open { frames: Vec<String>, hang: bool },
}

impl Script {
    pub(crate) fn open_forever(frames: Vec<String>) -> Self {
        Self::Open { frames, hang: true }
    }
}

#[derive(Debug, Default)]
struct Recorded {
    attempts: usize,
    urls: Vec<String>,
    sent: Vec<String>,
}

/// Scripted transport; connect attempts past the end of the script fail.
#[derive(Debug)]
pub(crate) struct FakeTransport {
    script: Mutex<VecDeque<Script>>,
    recorded: Arc<Mutex<Recorded>>,
}

impl FakeTransport {
    pub(crate) fn new(script: Vec<Script>) -> Arc<Self> {
        Arc::new(Self {
            script: Mutex::new(script.into()),
            recorded: Arc::new(Mutex::new(Recorded::default())),
        })
    }

    pub(crate) fn attempts(&self) -> usize {
        self.recorded.lock().unwrap().attempts
    }

    pub(crate) fn urls(&self) -> Vec<String> {
        self.recorded.lock().unwrap().urls.clone()
    }

    pub(crate) fn sent(&self) -> Vec<String> {
        self.recorded.lock().unwrap().sent.clone()
    }
}

#[async_trait]
impl Transport for FakeTransport {
    async fn connect(&self, url: &str) -> Result<Box<dyn FrameChannel>, TransportError> {
        {
            let mut recorded = self.recorded.lock().unwrap();
            recorded.attempts += 1;
            recorded.urls.push(url.to_string());
        }

        let next = self.script.lock().unwrap().pop_front();
        match next {
            Some(Script::Open { frames, hang }) => Ok(Box::new(FakeChannel {
                frames: frames.into(),
                hang,
                recorded: Arc::clone(&self.recorded),
            })),
            Some(Script::Fail) | None => Err(TransportError::Connect("connection refused".to_string())),
        }
    }
}

struct FakeChannel {
    frames: VecDeque<String>,
    hang: bool,
    recorded: Arc<Mutex<Recorded>>,
}

#[async_trait]
impl FrameChannel for FakeChannel {
    async fn send_text(&mut self, text: String) -> Result<(), TransportError> {
        self.recorded.lock().unwrap().sent.push(text);
        Ok(())
    }

    async fn next_frame(&mut self) -> Option<Result<String, TransportError>> {
        if let Some(frame) = self.frames.pop_front() {
            return Some(Ok(frame));
        }
        if self.hang {
            std::future::pending::<()>().await;
        }
        None
    }
}
