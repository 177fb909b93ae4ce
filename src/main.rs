use actix_cors::Cors;
use actix_web::{middleware, web, App, HttpServer};
use anyhow::{Context, Result};
use std::sync::Arc;
use tracing::info;

use plant_classifier::classifier::check_label_count;
use plant_classifier::{
    handlers, telemetry, AppConfig, AppState, Classifier, LabelSet, OnnxClassifier, Predictor,
    Preprocessor,
};

#[actix_web::main]
async fn main() -> Result<()> {
    let config = AppConfig::load()?;
    telemetry::init(&config.logging)?;

    let labels = match &config.model.labels_path {
        Some(path) => LabelSet::from_file(path)?,
        None => LabelSet::plants(),
    };
    info!(labels = labels.len(), "Label set loaded");

    let classifier: Arc<dyn Classifier> =
        Arc::new(OnnxClassifier::load(&config.model).with_context(|| {
            format!("Could not load classifier from {}", config.model.path.display())
        })?);
    check_label_count(classifier.as_ref(), labels.len())?;

    let predictor = Predictor::new(
        classifier,
        Arc::new(labels),
        Preprocessor::from_config(&config.model),
    );
    let state = web::Data::new(AppState::new(predictor, &config));

    std::fs::create_dir_all(&state.upload_dir)
        .with_context(|| format!("Could not create upload dir {}", state.upload_dir.display()))?;

    let bind = (config.server.host.clone(), config.server.port);
    info!(host = %bind.0, port = bind.1, "Server running");

    let mut server = HttpServer::new(move || {
        let cors = Cors::default()
            .allow_any_origin()
            .allow_any_method()
            .allow_any_header();

        App::new()
            .wrap(cors)
            .wrap(middleware::Logger::default())
            .app_data(state.clone())
            .configure(handlers::configure)
    });
    if let Some(workers) = config.server.workers {
        server = server.workers(workers);
    }

    server.bind(bind)?.run().await?;
    Ok(())
}
