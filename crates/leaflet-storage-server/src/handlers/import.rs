//! Data import handler

use crate::app::AppState;
use crate::error::{ApiError, ApiResult};
use crate::extractors::Viewer;
use crate::services::datalayers::{ImportOutcome, ImportRequest, ImportSource};
use axum::{
    extract::{multipart::MultipartError, Multipart, Path, State},
    Json,
};
use leaflet_storage_core::{DataLayerId, MapId};
use tracing::debug;

fn multipart_error(e: MultipartError) -> ApiError {
    ApiError::BadRequest(format!("Invalid upload: {}", e))
}

/// Fields of the import form
#[derive(Default)]
struct ImportForm {
    sources: Vec<ImportSource>,
    format: Option<String>,
    datalayer: Option<DataLayerId>,
}

impl ImportForm {
    async fn read(mut multipart: Multipart) -> ApiResult<Self> {
        let mut form = ImportForm::default();
        while let Some(field) = multipart.next_field().await.map_err(multipart_error)? {
            let name = field.name().unwrap_or_default().to_string();
            match name.as_str() {
                "data_file" => {
                    let file_name = field.file_name().map(String::from);
                    let content_type = field.content_type().map(String::from);
                    let content = field.bytes().await.map_err(multipart_error)?;
                    // Browsers post an empty part when no file was picked
                    if !content.is_empty() || file_name.as_deref().is_some_and(|n| !n.is_empty()) {
                        form.sources.push(ImportSource::File {
                            content: content.to_vec(),
                            file_name,
                            content_type,
                        });
                    }
                }
                "data_url" => {
                    let url = field.text().await.map_err(multipart_error)?;
                    if !url.trim().is_empty() {
                        form.sources.push(ImportSource::Url(url.trim().to_string()));
                    }
                }
                "data_raw" => {
                    let raw = field.text().await.map_err(multipart_error)?;
                    if !raw.trim().is_empty() {
                        form.sources.push(ImportSource::Raw(raw));
                    }
                }
                "format" => {
                    let format = field.text().await.map_err(multipart_error)?;
                    form.format = Some(format).filter(|f| !f.trim().is_empty());
                }
                "datalayer" => {
                    let value = field.text().await.map_err(multipart_error)?;
                    let value = value.trim();
                    if !value.is_empty() {
                        form.datalayer = Some(value.parse().map_err(|_| {
                            ApiError::BadRequest(format!("Invalid datalayer: {}", value))
                        })?);
                    }
                }
                other => debug!("Ignoring import form field {:?}", other),
            }
        }
        Ok(form)
    }

    fn into_request(self) -> ApiResult<ImportRequest> {
        let mut sources = self.sources;
        if sources.len() != 1 {
            return Err(ApiError::BadRequest(
                "Provide exactly one of data_file, data_url or data_raw.".to_string(),
            ));
        }
        Ok(ImportRequest {
            source: sources.remove(0),
            format: self.format,
            datalayer: self.datalayer,
        })
    }
}

pub async fn upload(
    State(state): State<AppState>,
    viewer: Viewer,
    Path(map_id): Path<MapId>,
    multipart: Multipart,
) -> ApiResult<Json<ImportOutcome>> {
    let map = state
        .maps
        .editable(map_id, viewer.access(&state.signer, map_id))
        .await?;
    let request = ImportForm::read(multipart).await?.into_request()?;
    Ok(Json(state.datalayers.import(&map, request).await?))
}
