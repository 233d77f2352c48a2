//! Pipeline configuration, interchange formats and run settings.

pub mod native;
mod pipeline;
mod settings;

pub use native::NativeDocument;
pub use pipeline::{
    BuiltPipelines, ComposeSpec, PipelineConfig, PipelineMetadata, TransformSpec,
};
pub use settings::{
    InputSettings, LoggingSettings, OutputSettings, RunOptions, RunSettings, SettingsOverrides,
};
