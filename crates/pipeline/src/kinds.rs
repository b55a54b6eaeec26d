//! Per-kind strategies: which graph a job renders and where its result
//! is recorded.
//!
//! The executor never matches on `job_type` itself; it looks the kind up
//! in a [`KindRegistry`]. Kinds without an entry fail as unsupported.

use std::collections::HashMap;
use std::sync::Arc;

use async_trait::async_trait;
use looks_core::render::RenderGraph;
use looks_core::types::DbId;
use looks_db::models::tryon_result::CreateTryOnResult;
use serde_json::{json, Value};

use crate::error::JobError;
use crate::input::RenderInput;
use crate::store::JobStore;

/// Names under which the job's inputs were staged on the backend.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct StagedAssets {
    pub avatar: Option<String>,
    pub garments: Vec<String>,
}

/// Everything a builder may read.
#[derive(Debug, Clone, Copy)]
pub struct BuildContext<'a> {
    pub job_id: DbId,
    pub input: &'a RenderInput,
    pub staged: &'a StagedAssets,
    pub seed: u64,
}

/// Turns a job into a backend graph.
pub trait WorkflowBuilder: Send + Sync {
    fn build(&self, ctx: &BuildContext<'_>) -> Result<RenderGraph, JobError>;
}

/// Records a published result somewhere other than the job row.
#[async_trait]
pub trait ResultSink: Send + Sync {
    async fn persist(
        &self,
        store: &dyn JobStore,
        user_id: DbId,
        job_id: DbId,
        input: &RenderInput,
        result_url: &str,
    ) -> Result<(), JobError>;
}

/// Strategy pair for one job kind.
#[derive(Clone)]
pub struct KindStrategy {
    pub builder: Arc<dyn WorkflowBuilder>,
    pub sink: Arc<dyn ResultSink>,
    /// Fail before any download when `avatar_url` is absent.
    pub requires_avatar: bool,
}

#[derive(Clone, Default)]
pub struct KindRegistry {
    kinds: HashMap<String, KindStrategy>,
}

impl KindRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// `generate` and `tryon` render the FLUX text-to-image graph and
    /// write a `tryon_results` row.
    pub fn with_defaults() -> Self {
        let builder: Arc<dyn WorkflowBuilder> = Arc::new(FluxTextToImage::default());
        let sink: Arc<dyn ResultSink> = Arc::new(TryOnResultSink);
        let mut registry = Self::new();
        registry.register(
            "tryon",
            KindStrategy {
                builder: builder.clone(),
                sink: sink.clone(),
                requires_avatar: true,
            },
        );
        registry.register(
            "generate",
            KindStrategy {
                builder,
                sink,
                requires_avatar: false,
            },
        );
        registry
    }

    pub fn register(&mut self, kind: impl Into<String>, strategy: KindStrategy) {
        self.kinds.insert(kind.into(), strategy);
    }

    pub fn get(&self, kind: &str) -> Result<&KindStrategy, JobError> {
        self.kinds
            .get(kind)
            .ok_or_else(|| JobError::UnsupportedKind(kind.to_string()))
    }

    pub fn kinds(&self) -> impl Iterator<Item = &str> {
        self.kinds.keys().map(String::as_str)
    }
}

// ---------------------------------------------------------------------------
// Sinks
// ---------------------------------------------------------------------------

/// Inserts a `tryon_results` row with the products used.
pub struct TryOnResultSink;

#[async_trait]
impl ResultSink for TryOnResultSink {
    async fn persist(
        &self,
        store: &dyn JobStore,
        user_id: DbId,
        job_id: DbId,
        input: &RenderInput,
        result_url: &str,
    ) -> Result<(), JobError> {
        let row = CreateTryOnResult {
            user_id,
            job_id,
            result_url: result_url.to_string(),
            products_used: input.products_used(),
        };
        store
            .record_tryon_result(&row)
            .await
            .map_err(JobError::publish)
    }
}

/// The job row's `result_url` is the only record.
pub struct JobRowOnly;

#[async_trait]
impl ResultSink for JobRowOnly {
    async fn persist(
        &self,
        _store: &dyn JobStore,
        _user_id: DbId,
        _job_id: DbId,
        _input: &RenderInput,
        _result_url: &str,
    ) -> Result<(), JobError> {
        Ok(())
    }
}

// ---------------------------------------------------------------------------
// FLUX text-to-image
// ---------------------------------------------------------------------------

/// Output node of [`FluxTextToImage`] (its `SaveImage`).
pub const FLUX_OUTPUT_NODE: &str = "9";

/// Minimal checkpoint → encode → sample → decode → save graph.
#[derive(Debug, Clone)]
pub struct FluxTextToImage {
    pub checkpoint: String,
    pub width: u32,
    pub height: u32,
    pub steps: u32,
    pub cfg: f64,
}

impl Default for FluxTextToImage {
    fn default() -> Self {
        Self {
            checkpoint: "flux2_dev_fp8.safetensors".to_string(),
            width: 1152,
            height: 2016,
            steps: 28,
            cfg: 3.5,
        }
    }
}

impl FluxTextToImage {
    fn prompt(input: &RenderInput) -> String {
        if let Some(prompt) = input.prompt.as_deref().filter(|p| !p.trim().is_empty()) {
            return prompt.to_string();
        }
        let names: Vec<&str> = input
            .products()
            .iter()
            .filter_map(|p| p.get("name").and_then(Value::as_str))
            .collect();
        if names.is_empty() {
            "Full-body studio photo of the person from @image 1, soft lighting, \
             seamless pure white background, photorealistic."
                .to_string()
        } else {
            format!(
                "The person from @image 1 wearing {}. Preserve face, skin tone and body. \
                 Soft studio lighting, seamless pure white background, photorealistic.",
                names.join(", ")
            )
        }
    }
}

impl WorkflowBuilder for FluxTextToImage {
    fn build(&self, ctx: &BuildContext<'_>) -> Result<RenderGraph, JobError> {
        let nodes = json!({
            "3": {
                "class_type": "CheckpointLoaderSimple",
                "inputs": { "ckpt_name": self.checkpoint }
            },
            "6": {
                "class_type": "CLIPTextEncode",
                "inputs": { "text": Self::prompt(ctx.input), "clip": ["3", 1] }
            },
            "5": {
                "class_type": "EmptyLatentImage",
                "inputs": { "width": self.width, "height": self.height, "batch_size": 1 }
            },
            "10": {
                "class_type": "KSampler",
                "inputs": {
                    "seed": ctx.seed,
                    "steps": self.steps,
                    "cfg": self.cfg,
                    "sampler_name": "euler",
                    "scheduler": "simple",
                    "denoise": 1.0,
                    "model": ["3", 0],
                    "positive": ["6", 0],
                    "negative": ["6", 0],
                    "latent_image": ["5", 0]
                }
            },
            "8": {
                "class_type": "VAEDecode",
                "inputs": { "samples": ["10", 0], "vae": ["3", 2] }
            },
            FLUX_OUTPUT_NODE: {
                "class_type": "SaveImage",
                "inputs": {
                    "filename_prefix": format!("tryon_{}", ctx.job_id),
                    "images": ["8", 0]
                }
            }
        });

        Ok(RenderGraph {
            nodes,
            output_selector: FLUX_OUTPUT_NODE.to_string(),
        })
    }
}
