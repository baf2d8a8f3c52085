//! Project catalog and the natural-language project creation pipeline.

pub mod builder;
pub mod registry;

pub use builder::{BuildResult, ComplexityMode, FeatureComplexity, FeatureDraft, PrdParser, ProjectBuilder};
pub use registry::ProjectRegistry;
