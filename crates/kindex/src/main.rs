//! Daemon entrypoint

use std::sync::Arc;

use actix_web::{
    App, HttpRequest, HttpResponse, HttpServer, Responder, get, middleware, web::Data,
};
use k8s_openapi::api::core::v1::Namespace;
use k8s_openapi::apiextensions_apiserver::pkg::apis::apiextensions::v1::CustomResourceDefinition;
use kindex::config::Settings;
use kindex::registry::KindRegistry;
use kindex::watch::{ClientSource, cache_watch};
use kindex::{State, telemetry};
use tracing::{info, instrument, warn};

#[get("/health")]
async fn health(_: HttpRequest) -> impl Responder {
    HttpResponse::Ok().json("healthy")
}

#[get("/")]
async fn index(c: Data<State>, _: HttpRequest) -> impl Responder {
    let d = c.diagnostics().await;
    HttpResponse::Ok().json(&d)
}

#[tokio::main]
#[instrument(level = "info", target = "kindex::main", name = "main")]
async fn main() -> anyhow::Result<()> {
    let settings = Settings::from_env()?;
    telemetry::init(&settings.telemetry)?;

    let config = kube::Config::infer().await?;
    let client = kube::Client::try_from(config.clone())?;
    let source: Arc<dyn ClientSource> = Arc::new(config);

    let registry = Arc::new(KindRegistry::new(client));
    match registry.refresh().await {
        Ok(()) => info!(kinds = registry.kind_count(), "kind registry ready"),
        Err(e) => warn!(error = %e, "initial discovery failed, serving built-in kinds only"),
    }

    let (namespaces, namespace_cache) = cache_watch::<Namespace>("namespaces", source.clone());
    let (crds, crd_cache) = cache_watch::<CustomResourceDefinition>("crds", source);

    let state = State::new(registry, settings.status.clone())
        .with_watch(namespaces.spawn())
        .with_watch(crds.spawn())
        .with_cache(namespace_cache.probe("namespaces"))
        .with_cache(crd_cache.probe("crds"));

    info!(listen_addr = %settings.listen_addr, "serving health and diagnostics");
    HttpServer::new(move || {
        App::new()
            .app_data(Data::new(state.clone()))
            .wrap(middleware::Logger::default().exclude("/health"))
            .service(health)
            .service(index)
    })
    .bind(&settings.listen_addr)?
    .shutdown_timeout(5)
    .run()
    .await?;

    Ok(())
}
