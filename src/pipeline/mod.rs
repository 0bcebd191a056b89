pub mod vision;
pub mod validation;
pub mod enhance;
pub mod summary;
pub mod serialize;
pub mod annotate;
pub mod batch;

pub use annotate::*;
pub use batch::*;

/// Prompt used when the caller supplies none.
pub const DEFAULT_VISION_PROMPT: &str = "\
Analyze this medical image and provide:
1. Type of medical imaging (X-ray, CT, MRI, etc.)
2. Anatomical region visible
3. Key findings and observations
4. Any abnormalities or areas of concern
5. Confidence level in your assessment";
