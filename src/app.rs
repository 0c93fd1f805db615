use crate::{
    config::Config, inference_service::InferenceService, ort_service::OrtModelService,
    server::HttpServer,
};
use std::error::Error;

/// Loads the model before the listener binds. A model that cannot be loaded
/// or whose signature cannot be read means the process never starts serving.
pub async fn start_app(config: Config) -> Result<(), Box<dyn Error>> {
    let model_service = match OrtModelService::new(&config.model) {
        Ok(service) => service,
        Err(e) => {
            tracing::error!("Failed to load model: {}", e);
            return Err(Box::new(e));
        }
    };

    let inference_service = InferenceService::new(model_service);

    let server = HttpServer::new(inference_service, &config.server).await?;
    server.run().await?;

    Ok(())
}
