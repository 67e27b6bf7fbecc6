//! Wires a [`PipelineMeta`] onto a [`Queue`].
//!
//! Each stage becomes one handler on `<id>/<subscribe>`. The handler runs the
//! stage command with the message on stdin and publishes the output to
//! `<id>/<publish>`, either as one message or fanned out per JSON array
//! element. Any failure is returned to the queue, which parks the message.

use std::path::PathBuf;
use std::sync::Arc;

use bytes::Bytes;
use conduit_queue::{preview, Publisher, Queue, QueueError};
use serde_json::Value;
use tracing::{error, info};

use crate::error::PipelineError;
use crate::exec::CommandRunner;
use crate::loader::LoadedPipeline;
use crate::meta::{PipeMode, PipelineMeta, Stage};

/// Pipeline metadata bound to a queue and a command runner.
pub struct Pipeline {
    meta: Arc<PipelineMeta>,
    dir: PathBuf,
    queue: Arc<Queue>,
    runner: Arc<dyn CommandRunner>,
}

impl Pipeline {
    /// Create a pipeline whose commands run in `dir`.
    pub fn new(
        dir: impl Into<PathBuf>,
        meta: PipelineMeta,
        queue: Arc<Queue>,
        runner: Arc<dyn CommandRunner>,
    ) -> Self {
        Self {
            meta: Arc::new(meta),
            dir: dir.into(),
            queue,
            runner,
        }
    }

    /// Create a pipeline from a loaded definition, running in its directory.
    pub fn from_loaded(
        loaded: LoadedPipeline,
        queue: Arc<Queue>,
        runner: Arc<dyn CommandRunner>,
    ) -> Self {
        Self::new(loaded.dir, loaded.meta, queue, runner)
    }

    pub fn meta(&self) -> &PipelineMeta {
        &self.meta
    }

    pub fn dir(&self) -> &std::path::Path {
        &self.dir
    }

    /// Subscribe one handler per stage.
    pub async fn run(&self) {
        for stage in &self.meta.stages {
            let handler = Arc::new(StageHandler {
                pipeline_id: self.meta.id.clone(),
                subscribe_event: self.meta.event(&stage.subscribe),
                publish_event: self.meta.event(&stage.publish),
                stage: stage.clone(),
                dir: self.dir.clone(),
                publisher: self.queue.publisher(),
                runner: self.runner.clone(),
            });

            info!(
                pipeline = %self.meta.id,
                event = %handler.subscribe_event,
                next = %handler.publish_event,
                pipe = %stage.pipe,
                "subscribing to event"
            );

            let event = handler.subscribe_event.clone();
            self.queue
                .subscribe(event, move |message| {
                    let handler = handler.clone();
                    async move {
                        handler
                            .handle(message)
                            .await
                            .map(|_| ())
                            .map_err(QueueError::from)
                    }
                })
                .await;
        }
    }
}

/// Everything one stage's handler needs, resolved at subscribe time.
struct StageHandler {
    pipeline_id: String,
    subscribe_event: String,
    publish_event: String,
    stage: Stage,
    dir: PathBuf,
    publisher: Publisher,
    runner: Arc<dyn CommandRunner>,
}

impl StageHandler {
    /// Run the stage command and pipe its output; returns the number of
    /// messages published downstream.
    async fn handle(&self, message: Bytes) -> Result<usize, PipelineError> {
        let out = match self.runner.run(&self.stage.process, &self.dir, &message).await {
            Ok(out) => out,
            Err(e) => {
                error!(
                    event = %self.subscribe_event,
                    error = %e,
                    message = %preview(&message),
                    "failed processing message"
                );
                return Err(e.into());
            }
        };

        let count = match self.pipe(out).await {
            Ok(count) => count,
            Err(e) => {
                error!(
                    event = %self.subscribe_event,
                    next = %self.publish_event,
                    error = %e,
                    message = %preview(&message),
                    "failed piping message"
                );
                return Err(e);
            }
        };

        info!(
            pipeline = %self.pipeline_id,
            sub = %self.stage.subscribe,
            publish = %self.stage.publish,
            piped = count,
            "stage completed"
        );
        Ok(count)
    }

    async fn pipe(&self, out: Vec<u8>) -> Result<usize, PipelineError> {
        match self.stage.pipe {
            PipeMode::Single => {
                self.publish(Bytes::from(out), 1, 1).await?;
                Ok(1)
            }
            PipeMode::Each => self.pipe_each(&out).await,
        }
    }

    /// Publish every element of a JSON array output, in array order.
    ///
    /// Stops at the first failed publish; earlier elements stay published.
    async fn pipe_each(&self, out: &[u8]) -> Result<usize, PipelineError> {
        let elements: Vec<Value> = serde_json::from_slice(out)?;
        let total = elements.len();

        for (i, element) in elements.iter().enumerate() {
            let encoded = serde_json::to_vec(element)?;
            self.publish(Bytes::from(encoded), i + 1, total).await?;
        }

        Ok(total)
    }

    async fn publish(&self, message: Bytes, index: usize, total: usize) -> Result<(), PipelineError> {
        self.publisher
            .publish(&self.publish_event, message)
            .await
            .map_err(|e| PipelineError::Publish {
                event: self.publish_event.clone(),
                index,
                total,
                source: e,
            })
    }
}
