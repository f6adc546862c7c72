// src/handlers.rs
use crate::services::bundler::{ARCHIVE_NAME, Bundler};
use crate::services::image_codec;
use crate::{AppState, errors::StudioError, models::*};
use actix_multipart::Multipart;
use actix_web::{Error, HttpResponse, web};
use futures_util::TryStreamExt;
use serde::Deserialize;
use uuid::Uuid;

#[derive(Debug, Deserialize)]
pub struct EditRequest {
    pub instruction: String,
    pub reference: Option<ImagePayload>,
}

#[derive(Debug, Deserialize)]
pub struct AnimateRequest {
    pub instruction: Option<String>,
}

#[derive(Debug, Deserialize)]
pub struct LibraryQuery {
    #[serde(default)]
    pub kind: LibraryKind,
    #[serde(default)]
    pub q: String,
}

pub async fn submit_brief(
    body: web::Json<GenerateInput>,
    data: web::Data<AppState>,
) -> Result<HttpResponse, StudioError> {
    data.engine.submit_brief(body.into_inner()).await?;
    Ok(HttpResponse::Ok().json(data.engine.snapshot().await))
}

/// Screenshot briefs arrive as multipart: one image file plus an optional
/// `tips` text field.
pub async fn upload_brief(
    mut payload: Multipart,
    data: web::Data<AppState>,
) -> Result<HttpResponse, Error> {
    let mut image: Option<ImagePayload> = None;
    let mut tips: Option<String> = None;

    while let Some(mut field) = payload.try_next().await? {
        let mut bytes = Vec::new();
        while let Some(chunk) = field.try_next().await? {
            bytes.extend_from_slice(&chunk);
        }
        match field.name() {
            "tips" => {
                tips = Some(String::from_utf8_lossy(&bytes).into_owned());
            }
            _ => {
                image = Some(image_codec::file_to_payload(&bytes)?);
            }
        }
    }

    let image = image
        .ok_or_else(|| StudioError::Validation("no screenshot provided".to_string()))?;
    data.engine
        .submit_brief(GenerateInput::File { image, tips })
        .await?;
    Ok(HttpResponse::Ok().json(data.engine.snapshot().await))
}

pub async fn load_more(data: web::Data<AppState>) -> Result<HttpResponse, StudioError> {
    data.engine.load_more().await?;
    Ok(HttpResponse::Ok().json(data.engine.snapshot().await))
}

pub async fn studio_snapshot(data: web::Data<AppState>) -> HttpResponse {
    HttpResponse::Ok().json(data.engine.snapshot().await)
}

pub async fn generate_asset(
    path: web::Path<Uuid>,
    data: web::Data<AppState>,
) -> Result<HttpResponse, StudioError> {
    let asset_id = path.into_inner();
    data.engine.generate(asset_id).await?;
    let asset = data
        .engine
        .asset(asset_id)
        .await
        .ok_or_else(|| StudioError::NotFound("asset no longer exists".to_string()))?;
    Ok(HttpResponse::Ok().json(asset))
}

pub async fn toggle_bookmark(path: web::Path<Uuid>, data: web::Data<AppState>) -> HttpResponse {
    let asset_id = path.into_inner();
    data.engine.toggle_bookmark(asset_id).await;
    match data.engine.asset(asset_id).await {
        Some(asset) => HttpResponse::Ok().json(asset),
        // A click on an ungenerated tile is harmless, not an error.
        None => HttpResponse::Ok().json(serde_json::json!({ "ignored": true })),
    }
}

pub async fn edit_asset(
    path: web::Path<Uuid>,
    body: web::Json<EditRequest>,
    data: web::Data<AppState>,
) -> Result<HttpResponse, StudioError> {
    let request = body.into_inner();
    let image_url = data
        .engine
        .edit(path.into_inner(), &request.instruction, request.reference)
        .await?;
    Ok(HttpResponse::Ok().json(serde_json::json!({ "image_url": image_url })))
}

pub async fn animate_asset(
    path: web::Path<Uuid>,
    body: web::Json<AnimateRequest>,
    data: web::Data<AppState>,
) -> Result<HttpResponse, StudioError> {
    let video_url = data
        .engine
        .animate(path.into_inner(), body.into_inner().instruction)
        .await?;
    Ok(HttpResponse::Ok().json(serde_json::json!({ "video_url": video_url })))
}

pub async fn remove_background(
    path: web::Path<Uuid>,
    data: web::Data<AppState>,
) -> Result<HttpResponse, StudioError> {
    let asset_id = path.into_inner();
    data.engine.remove_background(asset_id).await?;
    let asset = data
        .engine
        .asset(asset_id)
        .await
        .ok_or_else(|| StudioError::NotFound("asset no longer exists".to_string()))?;
    Ok(HttpResponse::Ok().json(asset))
}

pub async fn bulk_remove_background(
    data: web::Data<AppState>,
) -> Result<HttpResponse, StudioError> {
    let outcome = data.engine.bulk_remove_background().await?;
    Ok(HttpResponse::Ok().json(serde_json::json!({
        "processed": outcome.processed,
        "failed": outcome.failed
    })))
}

pub async fn library(query: web::Query<LibraryQuery>, data: web::Data<AppState>) -> HttpResponse {
    let bookmarked = data.engine.bookmarked_assets().await;
    let filtered = filter_library(&bookmarked, query.kind, &query.q);
    HttpResponse::Ok().json(filtered)
}

pub async fn download_asset(
    path: web::Path<Uuid>,
    data: web::Data<AppState>,
) -> Result<HttpResponse, StudioError> {
    let asset_id = path.into_inner();
    let asset = data
        .engine
        .asset(asset_id)
        .await
        .ok_or_else(|| StudioError::NotFound(format!("no asset with id {}", asset_id)))?;
    if asset.status != AssetStatus::Completed {
        return Err(StudioError::Precondition(
            "asset has not completed generation".to_string(),
        ));
    }

    let (bytes, content_type) = data.bundler.resolve_bytes(&asset).await?;
    let filename = Bundler::asset_filename(&asset);
    Ok(HttpResponse::Ok()
        .content_type(content_type)
        .insert_header((
            "Content-Disposition",
            format!("attachment; filename=\"{}\"", filename),
        ))
        .body(bytes))
}

pub async fn download_archive(data: web::Data<AppState>) -> Result<HttpResponse, StudioError> {
    let bookmarked = data.engine.bookmarked_assets().await;
    if bookmarked.is_empty() {
        return Err(StudioError::Precondition(
            "no bookmarked assets to download".to_string(),
        ));
    }

    let archive = data.bundler.package_assets(&bookmarked).await?;
    Ok(HttpResponse::Ok()
        .content_type("application/zip")
        .insert_header((
            "Content-Disposition",
            format!("attachment; filename=\"{}\"", ARCHIVE_NAME),
        ))
        .body(archive))
}

pub async fn dismiss_error(data: web::Data<AppState>) -> HttpResponse {
    data.engine.dismiss_error().await;
    HttpResponse::Ok().json(data.engine.snapshot().await)
}
