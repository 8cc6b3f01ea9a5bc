use std::fmt;

use crate::identity::ImageIdentity;

/// Output image format. `Other` carries through formats the core doesn't
/// need to special-case but the `Transform` façade still understands.
#[derive(Clone, Copy, Debug, Eq, PartialEq, Hash)]
pub enum Format {
    Jpg,
    Png,
    Tiff,
    Miff,
}

impl Format {
    fn as_str(&self) -> &'static str {
        match self {
            Format::Jpg => "jpg",
            Format::Png => "png",
            Format::Tiff => "tiff",
            Format::Miff => "miff",
        }
    }
}

impl fmt::Display for Format {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl std::str::FromStr for Format {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "jpg" | "jpeg" => Ok(Format::Jpg),
            "png" => Ok(Format::Png),
            "tiff" => Ok(Format::Tiff),
            "miff" => Ok(Format::Miff),
            other => Err(format!("unsupported format: {other}")),
        }
    }
}

/// Liquid-rescale ("content aware resize") configuration: only applied when
/// the source/target aspect ratio mismatch exceeds `cutin_ratio`.
#[derive(Clone, Copy, Debug, PartialEq)]
pub struct LiquidRescale {
    pub enabled: bool,
    pub cutin_ratio: f64,
}

impl Default for LiquidRescale {
    fn default() -> Self {
        Self { enabled: false, cutin_ratio: 0.5 }
    }
}

/// Enhancement toggles applied to thumbnails.
#[derive(Clone, Copy, Debug, Default, PartialEq)]
pub struct Enhance {
    pub equalise: bool,
    pub sharpen: bool,
    pub liquid_rescale: LiquidRescale,
}

/// A transform request. The distinguished value `TransformParams::None`
/// means "no transform, deliver as uploaded".
#[derive(Clone, Debug, PartialEq)]
pub enum TransformParams {
    /// Deliver the original as uploaded.
    None,
    /// Produce a derivative.
    Some {
        max_width: Option<u32>,
        max_height: Option<u32>,
        format: Format,
        thumbnail: bool,
        enhance: Enhance,
        strip_metadata: bool,
    },
}

impl TransformParams {
    pub fn format(&self) -> Option<Format> {
        match self {
            TransformParams::None => None,
            TransformParams::Some { format, .. } => Some(*format),
        }
    }

    pub fn is_thumbnail(&self) -> bool {
        matches!(self, TransformParams::Some { thumbnail: true, .. })
    }

    pub fn strips_metadata(&self) -> bool {
        match self {
            TransformParams::None => false,
            TransformParams::Some { strip_metadata, .. } => *strip_metadata,
        }
    }

    /// Canonical, sorted `key=value` pairs. Sorting by key name is what makes
    /// [`DerivativeKey::new`] deterministic regardless of construction order.
    fn canonical_pairs(&self) -> Vec<(&'static str, String)> {
        let TransformParams::Some { max_width, max_height, format: _, thumbnail, enhance, strip_metadata } = self else {
            return Vec::new();
        };
        let mut pairs = Vec::new();
        if let Some(w) = max_width {
            pairs.push(("max_width", w.to_string()));
        }
        if let Some(h) = max_height {
            pairs.push(("max_height", h.to_string()));
        }
        if *thumbnail {
            pairs.push(("thumbnail", "true".to_string()));
        }
        if enhance.equalise {
            pairs.push(("equalise", "true".to_string()));
        }
        if enhance.sharpen {
            pairs.push(("sharpen", "true".to_string()));
        }
        if enhance.liquid_rescale.enabled {
            pairs.push(("liquid_rescale", "true".to_string()));
            pairs.push(("cutin_ratio", format!("{:.4}", enhance.liquid_rescale.cutin_ratio)));
        }
        if !strip_metadata {
            pairs.push(("strip_metadata", "false".to_string()));
        }
        pairs.sort_by(|a, b| a.0.cmp(b.0));
        pairs
    }
}

/// Canonical, injective, deterministic encoding of `(identity, params)`.
///
/// Two requests that would produce pixel-equal artifacts MUST produce equal
/// keys; two differing in any parameter MUST produce distinct keys. Encoding
/// is total, using the spelling
/// `<identity>#<sorted-kv-of-params>.<format>`; `TransformParams::None`
/// collapses to the bare identity, since it is the key under which the
/// original itself is addressed in [`crate::object_store::ObjectStore`].
#[derive(Clone, Debug, Eq, PartialEq, Hash, PartialOrd, Ord, serde::Serialize, serde::Deserialize)]
pub struct DerivativeKey(String);

impl DerivativeKey {
    pub fn new(identity: &ImageIdentity, params: &TransformParams) -> Self {
        match params {
            TransformParams::None => Self(identity.as_str().to_string()),
            TransformParams::Some { format, .. } => {
                let pairs = params.canonical_pairs();
                let kv = pairs
                    .iter()
                    .map(|(k, v)| format!("{k}={v}"))
                    .collect::<Vec<_>>()
                    .join("&");
                Self(format!("{}#{}.{}", identity.as_str(), kv, format))
            }
        }
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }

    /// The identity portion of the key, used by identity-prefix invalidation
    /// on upload.
    pub fn identity_prefix(&self) -> &str {
        self.0.split('#').next().unwrap_or(&self.0)
    }
}

impl fmt::Display for DerivativeKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}
