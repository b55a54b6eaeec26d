//! Typed view of a job's `input_data` payload.

use serde::Deserialize;
use serde_json::Value;

use crate::error::JobError;

/// At most this many garments (and product entries) are used per job.
pub const MAX_GARMENTS: usize = 3;

#[derive(Debug, Clone, Deserialize)]
pub struct GarmentImage {
    pub url: String,
}

/// Fields the worker reads. Unknown fields are ignored; the payload itself
/// is never written back.
#[derive(Debug, Clone, Default, Deserialize)]
pub struct RenderInput {
    #[serde(default)]
    pub avatar_url: Option<String>,
    #[serde(default)]
    pub garment_images: Vec<GarmentImage>,
    #[serde(default)]
    pub products_metadata: Vec<Value>,
    /// Free-form prompt override.
    #[serde(default)]
    pub prompt: Option<String>,
}

impl RenderInput {
    pub fn parse(input_data: &Value) -> Result<Self, JobError> {
        if input_data.is_null() {
            return Ok(Self::default());
        }
        serde_json::from_value(input_data.clone())
            .map_err(|e| JobError::InvalidInput(e.to_string()))
    }

    /// Garments actually used, in payload order.
    pub fn garments(&self) -> &[GarmentImage] {
        let n = self.garment_images.len().min(MAX_GARMENTS);
        &self.garment_images[..n]
    }

    /// Product entries actually used, in payload order.
    pub fn products(&self) -> &[Value] {
        let n = self.products_metadata.len().min(MAX_GARMENTS);
        &self.products_metadata[..n]
    }

    /// Products as a JSON array, for `tryon_results.products_used`.
    pub fn products_used(&self) -> Value {
        Value::Array(self.products().to_vec())
    }
}
