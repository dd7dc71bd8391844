//! Ordered request-processing stages
//!
//! A [`Pipeline`] runs its stages in registration order ahead of routing. Each
//! stage either lets the request continue (possibly after attaching data to its
//! extensions) or answers it directly, in which case no later stage and no
//! handler runs.

use std::sync::Arc;

use async_trait::async_trait;
use axum::extract::{Request, State};
use axum::middleware::Next;
use axum::response::Response;

/// Outcome of a single stage
#[derive(Debug)]
pub enum Flow {
    Continue,
    Respond(Response),
}

/// One request-processing step
#[async_trait]
pub trait Stage: Send + Sync + std::fmt::Debug {
    fn name(&self) -> &'static str;

    async fn process(&self, request: &mut Request) -> Flow;
}

/// Stages composed at startup
#[derive(Debug, Clone, Default)]
pub struct Pipeline {
    stages: Vec<Arc<dyn Stage>>,
}

impl Pipeline {
    #[must_use]
    pub fn builder() -> PipelineBuilder {
        PipelineBuilder::default()
    }

    #[must_use]
    pub fn stage_names(&self) -> Vec<&'static str> {
        self.stages.iter().map(|s| s.name()).collect()
    }

    /// Run every stage; `Some` means the request was answered early.
    pub async fn run(&self, request: &mut Request) -> Option<Response> {
        for stage in &self.stages {
            match stage.process(request).await {
                Flow::Continue => {}
                Flow::Respond(response) => {
                    tracing::debug!(
                        stage = stage.name(),
                        status = response.status().as_u16(),
                        "Pipeline short-circuited"
                    );
                    return Some(response);
                }
            }
        }
        None
    }
}

#[derive(Debug, Default)]
pub struct PipelineBuilder {
    stages: Vec<Arc<dyn Stage>>,
}

impl PipelineBuilder {
    #[must_use]
    pub fn stage(mut self, stage: impl Stage + 'static) -> Self {
        self.stages.push(Arc::new(stage));
        self
    }

    #[must_use]
    pub fn build(self) -> Pipeline {
        Pipeline {
            stages: self.stages,
        }
    }
}

/// axum middleware running the pipeline before the inner service
pub async fn run_pipeline(
    State(pipeline): State<Arc<Pipeline>>,
    mut request: Request,
    next: Next,
) -> Response {
    if let Some(response) = pipeline.run(&mut request).await {
        return response;
    }
    next.run(request).await
}
