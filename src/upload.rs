//! Multipart intake: find the `file` field and stream it to a temp file.

use actix_multipart::{Field, Multipart, MultipartError};
use actix_web::web;
use futures_util::StreamExt;
use std::io::Write;
use std::path::Path;
use tempfile::{Builder, NamedTempFile};
use uuid::Uuid;

use crate::error::ApiError;

/// Name of the multipart field carrying the image.
pub const FILE_FIELD: &str = "file";

/// An upload persisted to disk. The file is removed when this is dropped.
#[derive(Debug)]
pub struct StoredUpload {
    pub file: NamedTempFile,
    pub filename: String,
    pub size: usize,
}

/// Consume the multipart stream and persist the `file` field.
///
/// Validation happens before anything touches the disk, so a missing field
/// or empty filename never creates a file. Other fields are drained. A body
/// that is not a multipart form at all counts as a missing file. `limit`
/// caps the bytes read across every part.
pub async fn receive(
    mut payload: Multipart,
    dir: &Path,
    request_id: Uuid,
    limit: usize,
) -> Result<StoredUpload, ApiError> {
    let mut stored = None;
    let mut budget = Budget { limit, used: 0 };
    let mut seen_field = false;

    while let Some(item) = payload.next().await {
        let mut field = match item {
            Ok(field) => field,
            Err(e) if !seen_field && is_not_a_form(&e) => return Err(ApiError::NoFile),
            Err(e) => return Err(ApiError::Multipart(e.to_string())),
        };
        seen_field = true;

        let disposition = field.content_disposition();
        // a part without a filename is a plain form value, not a file
        let filename = match (disposition.get_name(), disposition.get_filename()) {
            (Some(FILE_FIELD), Some(name)) if stored.is_none() => Some(name.to_string()),
            _ => None,
        };

        match filename {
            Some(name) if name.is_empty() => return Err(ApiError::NoSelectedFile),
            Some(name) => {
                let (file, size) =
                    persist(&mut field, dir, request_id, &name, &mut budget).await?;
                stored = Some(StoredUpload {
                    file,
                    filename: name,
                    size,
                });
            }
            None => drain(&mut field, &mut budget).await?,
        }
    }

    let upload = stored.ok_or(ApiError::NoFile)?;
    if upload.size == 0 {
        return Err(ApiError::EmptyUpload);
    }
    Ok(upload)
}

/// Missing or non-multipart content type, or a form with no parts.
fn is_not_a_form(err: &MultipartError) -> bool {
    matches!(
        err,
        MultipartError::NoContentType
            | MultipartError::ParseContentType
            | MultipartError::Boundary
            | MultipartError::Incomplete
    )
}

/// Bytes read so far across all parts of one request.
struct Budget {
    limit: usize,
    used: usize,
}

impl Budget {
    fn take(&mut self, n: usize) -> Result<(), ApiError> {
        self.used += n;
        if self.used > self.limit {
            return Err(ApiError::UploadTooLarge { limit: self.limit });
        }
        Ok(())
    }
}

async fn persist(
    field: &mut Field,
    dir: &Path,
    request_id: Uuid,
    filename: &str,
    budget: &mut Budget,
) -> Result<(NamedTempFile, usize), ApiError> {
    let suffix = Path::new(filename)
        .extension()
        .and_then(|e| e.to_str())
        .filter(|e| e.len() <= 8 && e.chars().all(|c| c.is_ascii_alphanumeric()))
        .map(|e| format!(".{}", e))
        .unwrap_or_default();
    let prefix = format!("upload-{}-", request_id);

    let dir = dir.to_path_buf();
    let mut file = web::block(move || {
        Builder::new()
            .prefix(&prefix)
            .suffix(&suffix)
            .tempfile_in(&dir)
    })
    .await
    .map_err(|_| ApiError::Blocking)??;

    let mut size = 0usize;
    while let Some(chunk) = field.next().await {
        let data = chunk.map_err(|e| ApiError::Multipart(e.to_string()))?;
        size += data.len();
        // on error, dropping `file` removes the partial upload
        budget.take(data.len())?;
        file = web::block(move || file.write_all(&data).map(|_| file))
            .await
            .map_err(|_| ApiError::Blocking)??;
    }

    file = web::block(move || file.flush().map(|_| file))
        .await
        .map_err(|_| ApiError::Blocking)??;

    Ok((file, size))
}

async fn drain(field: &mut Field, budget: &mut Budget) -> Result<(), ApiError> {
    while let Some(chunk) = field.next().await {
        let data = chunk.map_err(|e| ApiError::Multipart(e.to_string()))?;
        budget.take(data.len())?;
    }
    Ok(())
}
