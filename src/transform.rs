use async_trait::async_trait;
use serde::{Deserialize, Serialize};

use crate::error::{CoreError, CoreResult};
use crate::key::TransformParams;

/// The structured subset of an original's metadata a `Transform`
/// implementation can report without committing to a particular decoder's
/// full metadata model.
#[derive(Clone, Debug, Serialize, Deserialize, PartialEq)]
pub struct ImageMetadata {
    pub width: u32,
    pub height: u32,
    pub format: String,
    pub color_space: Option<String>,
    pub orientation: Option<u8>,
}

/// Produces derivative bytes from source bytes and strips/reads metadata.
/// Deterministic: the same `(bytes, params)` pair always yields the same
/// output bytes, since a derivative is addressed only by its
/// `DerivativeKey`. A real decoder-backed implementation is an external
/// collaborator; this crate only depends on the trait.
#[async_trait]
pub trait Transform: Send + Sync {
    async fn transform(&self, bytes: &[u8], params: &TransformParams) -> CoreResult<Vec<u8>>;
    async fn read_metadata(&self, bytes: &[u8]) -> CoreResult<ImageMetadata>;
}

/// A `Transform` fake for tests: "derives" by appending a short, stable
/// marker describing the requested params, and reports fixed metadata. Not
/// used in production.
pub struct NullTransform;

#[async_trait]
impl Transform for NullTransform {
    async fn transform(&self, bytes: &[u8], params: &TransformParams) -> CoreResult<Vec<u8>> {
        if bytes.is_empty() {
            return Err(CoreError::TransformError("empty source bytes".to_string()));
        }
        let mut out = bytes.to_vec();
        match params {
            TransformParams::None => {}
            TransformParams::Some { format, .. } => {
                out.extend_from_slice(format!("|{format}").as_bytes());
            }
        }
        Ok(out)
    }

    async fn read_metadata(&self, bytes: &[u8]) -> CoreResult<ImageMetadata> {
        if bytes.is_empty() {
            return Err(CoreError::TransformError("empty source bytes".to_string()));
        }
        Ok(ImageMetadata { width: 1, height: 1, format: "raw".to_string(), color_space: None, orientation: None })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::key::{Enhance, Format};

    #[tokio::test]
    async fn transform_is_deterministic() {
        let t = NullTransform;
        let params = TransformParams::Some {
            max_width: Some(10),
            max_height: None,
            format: Format::Png,
            thumbnail: true,
            enhance: Enhance::default(),
            strip_metadata: true,
        };
        let a = t.transform(b"hello", &params).await.unwrap();
        let b = t.transform(b"hello", &params).await.unwrap();
        assert_eq!(a, b);
    }

    #[tokio::test]
    async fn empty_source_is_a_transform_error() {
        let t = NullTransform;
        let err = t.transform(b"", &TransformParams::None).await.unwrap_err();
        assert!(matches!(err, CoreError::TransformError(_)));
    }
}
