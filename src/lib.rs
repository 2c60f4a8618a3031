use std::path::Path;

use crate::api::settings_dto::PipelineSettingsDto;
use crate::domain::pipeline::Pipeline;
use crate::error::Result;
use crate::loader::parser::parse_json_file;

pub mod api;
pub mod domain;
pub mod error;
pub mod loader;
pub mod logger;

pub fn load_settings(file_path: impl AsRef<Path>) -> Result<PipelineSettingsDto> {
    let settings = parse_json_file::<PipelineSettingsDto>(file_path.as_ref())?;
    log::info!("Settings '{}' parsed successfully.", file_path.as_ref().display());
    Ok(settings)
}

/// Parses a settings file and assembles the pipeline it describes.
pub fn load_pipeline(file_path: impl AsRef<Path>) -> Result<Pipeline> {
    let settings = load_settings(file_path)?;
    let pipeline = Pipeline::from_settings(settings)?;
    log::info!("Pipeline constructed successfully.");
    Ok(pipeline)
}
