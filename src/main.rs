// src/main.rs
use actix_web::{App, HttpResponse, HttpServer, middleware, web};
use log::info;
use std::sync::Arc;

mod engine;
mod errors;
mod handlers;
mod models;
mod services;

use crate::engine::StudioEngine;
use crate::handlers::{
    animate_asset, bulk_remove_background, dismiss_error, download_archive, download_asset,
    edit_asset, generate_asset, library, load_more, remove_background, studio_snapshot,
    submit_brief, toggle_bookmark, upload_brief,
};
use crate::services::{Bundler, GeminiGateway};

#[derive(Clone)]
pub struct AppState {
    engine: Arc<StudioEngine>,
    bundler: Arc<Bundler>,
}

#[actix_web::main]
async fn main() -> std::io::Result<()> {
    env_logger::init_from_env(env_logger::Env::new().default_filter_or("info"));

    info!("Starting Artifex studio service...");

    let gateway = Arc::new(GeminiGateway::new(
        std::env::var("GEMINI_API_KEY").expect("GEMINI_API_KEY must be set"),
    ));
    let app_state = AppState {
        engine: Arc::new(StudioEngine::new(gateway)),
        bundler: Arc::new(Bundler::new()),
    };

    let bind_addr = std::env::var("BIND_ADDR").unwrap_or_else(|_| "0.0.0.0:8080".to_string());
    info!("Starting HTTP server on {}", bind_addr);

    HttpServer::new(move || {
        App::new()
            .app_data(web::Data::new(app_state.clone()))
            .wrap(middleware::Logger::default())
            .service(
                web::scope("/api/v1")
                    .route("/brief", web::post().to(submit_brief))
                    .route("/brief/upload", web::post().to(upload_brief))
                    .route("/ideas/more", web::post().to(load_more))
                    .route("/studio", web::get().to(studio_snapshot))
                    .route("/error", web::delete().to(dismiss_error))
                    .route("/assets/{id}/generate", web::post().to(generate_asset))
                    .route("/assets/{id}/bookmark", web::post().to(toggle_bookmark))
                    .route("/assets/{id}/edit", web::post().to(edit_asset))
                    .route("/assets/{id}/animate", web::post().to(animate_asset))
                    .route("/assets/{id}/background", web::post().to(remove_background))
                    .route(
                        "/assets/background/bulk",
                        web::post().to(bulk_remove_background),
                    )
                    .route("/assets/{id}/download", web::get().to(download_asset))
                    .route("/library", web::get().to(library))
                    .route("/library/archive", web::get().to(download_archive)),
            )
            .route("/health", web::get().to(health_check))
    })
    .bind(bind_addr)?
    .run()
    .await
}

async fn health_check() -> HttpResponse {
    HttpResponse::Ok().json(serde_json::json!({
        "status": "healthy",
        "service": "artifex",
        "version": "0.1.0"
    }))
}
