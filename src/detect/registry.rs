use crate::config::ModelSettings;
use crate::detect::backend::InferenceModel;
use crate::detect::backends::StubModel;
use crate::error::ModelLoadError;

/// Backends this build knows how to load.
pub fn available_backends() -> Vec<&'static str> {
    let mut names = vec!["stub"];
    if cfg!(feature = "backend-tract") {
        names.push("tract");
    }
    names
}

/// Load the configured detection model.
///
/// Called once at start-up. A failure here is reported to the caller, which
/// keeps the pipeline running with detection permanently disabled.
pub fn load_model(settings: &ModelSettings) -> Result<Box<dyn InferenceModel>, ModelLoadError> {
    let backend = settings.backend.trim().to_ascii_lowercase();
    let mut model: Box<dyn InferenceModel> = match backend.as_str() {
        "stub" => Box::new(StubModel::new()),
        "tract" => load_tract(settings)?,
        other => return Err(ModelLoadError::UnknownBackend(other.to_string())),
    };
    model.warm_up().map_err(ModelLoadError::Load)?;
    log::info!("detection model '{}' loaded", model.name());
    Ok(model)
}

#[cfg(feature = "backend-tract")]
fn load_tract(settings: &ModelSettings) -> Result<Box<dyn InferenceModel>, ModelLoadError> {
    use crate::detect::backends::TractModel;

    let model_path = settings
        .model_path
        .as_ref()
        .ok_or_else(|| anyhow::anyhow!("tract backend requires a model path"))?;
    let model = TractModel::new(
        model_path,
        settings.labels_path.as_ref(),
        settings.input_width,
        settings.input_height,
    )?
    .with_iou_threshold(settings.iou_threshold);
    Ok(Box::new(model))
}

#[cfg(not(feature = "backend-tract"))]
fn load_tract(_settings: &ModelSettings) -> Result<Box<dyn InferenceModel>, ModelLoadError> {
    Err(ModelLoadError::FeatureDisabled(
        "tract".to_string(),
        "backend-tract",
    ))
}
