use std::{
    io::ErrorKind,
    path::{Path, PathBuf},
};

use axum::{
    Json,
    extract::{
        Multipart, State,
        multipart::{MultipartError, MultipartRejection},
    },
    http::StatusCode,
};
use chrono::Utc;
use serde::Serialize;
use thiserror::Error;
use tokio::{fs, io::AsyncWriteExt};
use tracing::{info, warn};
use uuid::Uuid;

use crate::web::{ApiRejection, AppState, json_error};

pub const UPLOAD_FIELD: &str = "file";
pub const USER_ID_FIELD: &str = "userId";
/// Public path prefix under which stored files are served.
pub const UPLOAD_ROUTE: &str = "/uploads";

const ANONYMOUS_UPLOADER: &str = "anonymous";
const FALLBACK_BASENAME: &str = "certificate";
const MAX_COMPONENT_CHARS: usize = 64;
const MAX_NAME_ATTEMPTS: usize = 8;

/// Result type used by the upload helpers.
pub type UploadResult<T> = Result<T, UploadError>;

/// Error returned when validating or persisting an uploaded certificate.
#[derive(Debug, Error)]
pub enum UploadError {
    #[error("Only PDF files are accepted (received `{0}`).")]
    UnsupportedType(String),

    #[error("File exceeds the upload limit of {limit} bytes.")]
    TooLarge { limit: u64 },

    #[error("No file was provided in the `file` field.")]
    MissingFile,

    #[error("Only one file may be uploaded per request.")]
    TooManyFiles,

    #[error("Malformed upload form: {0}")]
    Malformed(String),

    #[error("Failed to store upload: {0}")]
    Io(#[from] std::io::Error),
}

/// Where uploads land and how large they may be.
#[derive(Debug, Clone)]
pub struct UploadSettings {
    pub dir: PathBuf,
    pub max_bytes: u64,
}

/// Metadata describing a stored upload, returned to the client.
#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct SavedFile {
    pub path: String,
    pub filename: String,
    pub size: u64,
    pub original_name: String,
    #[serde(skip)]
    pub stored_path: PathBuf,
}

#[derive(Debug)]
struct StagedFile {
    tmp_path: PathBuf,
    original_name: String,
    size: u64,
}

#[derive(Debug, Default)]
struct StagedForm {
    user_id: Option<String>,
    file: Option<StagedFile>,
}

impl StagedForm {
    async fn discard(&mut self) {
        if let Some(staged) = self.file.take() {
            remove_quietly(&staged.tmp_path).await;
        }
    }
}

pub async fn upload_certificate(
    State(state): State<AppState>,
    multipart: Result<Multipart, MultipartRejection>,
) -> Result<Json<SavedFile>, ApiRejection> {
    let multipart = multipart
        .map_err(|rejection| json_error(StatusCode::BAD_REQUEST, rejection.body_text()))?;
    let saved = process_pdf_upload(multipart, state.upload_settings()).await?;
    info!(
        filename = %saved.filename,
        stored = %saved.stored_path.display(),
        size = saved.size,
        "stored certificate upload"
    );
    Ok(Json(saved))
}

/// Ensures the destination directory exists.
pub async fn ensure_directory(path: &Path) -> UploadResult<()> {
    fs::create_dir_all(path).await.map_err(UploadError::from)
}

/// Reads a single-PDF multipart form and persists the file under a
/// collision-free generated name.
///
/// The bytes are streamed into a hidden `.part` file first, because the
/// `userId` field that names the file may arrive after the file itself.
pub async fn process_pdf_upload(
    mut multipart: Multipart,
    settings: &UploadSettings,
) -> UploadResult<SavedFile> {
    ensure_directory(&settings.dir).await?;

    let mut form = StagedForm::default();
    if let Err(err) = read_form(&mut multipart, settings, &mut form).await {
        form.discard().await;
        return Err(err);
    }

    let Some(staged) = form.file.take() else {
        return Err(UploadError::MissingFile);
    };
    let user_id = form.user_id.unwrap_or_default();

    let (filename, stored_path) = match persist_unique(&staged, &settings.dir, &user_id).await {
        Ok(stored) => stored,
        Err(err) => {
            remove_quietly(&staged.tmp_path).await;
            return Err(err);
        }
    };

    Ok(SavedFile {
        path: format!("{UPLOAD_ROUTE}/{filename}"),
        filename,
        size: staged.size,
        original_name: staged.original_name,
        stored_path,
    })
}

async fn read_form(
    multipart: &mut Multipart,
    settings: &UploadSettings,
    form: &mut StagedForm,
) -> UploadResult<()> {
    let limit = settings.max_bytes;

    while let Some(mut field) = multipart
        .next_field()
        .await
        .map_err(|err| multipart_error(err, limit))?
    {
        let field_name = field.name().unwrap_or("").to_string();

        // The `file` part is the upload even when the client sent no filename.
        if field_name != UPLOAD_FIELD && field.file_name().is_none() {
            let value = field
                .text()
                .await
                .map_err(|err| multipart_error(err, limit))?;
            if field_name == USER_ID_FIELD {
                form.user_id = Some(value.trim().to_string());
            }
            continue;
        }

        if form.file.is_some() {
            return Err(UploadError::TooManyFiles);
        }
        if field_name != UPLOAD_FIELD {
            return Err(UploadError::Malformed(format!(
                "unexpected file field `{field_name}`; send the PDF in the `{UPLOAD_FIELD}` field"
            )));
        }

        let content_type = field.content_type().unwrap_or("").to_string();
        if !is_pdf(&content_type) {
            let received = if content_type.is_empty() {
                "unknown".to_string()
            } else {
                content_type
            };
            return Err(UploadError::UnsupportedType(received));
        }

        let original_name = field.file_name().unwrap_or("").to_string();
        let tmp_path = settings
            .dir
            .join(format!(".upload-{}.part", Uuid::new_v4().simple()));
        form.file = Some(StagedFile {
            tmp_path: tmp_path.clone(),
            original_name,
            size: 0,
        });

        let mut file = fs::File::create(&tmp_path).await?;
        let mut total_bytes: u64 = 0;
        while let Some(chunk) = field
            .chunk()
            .await
            .map_err(|err| multipart_error(err, limit))?
        {
            total_bytes += chunk.len() as u64;
            if total_bytes > limit {
                return Err(UploadError::TooLarge { limit });
            }
            file.write_all(&chunk).await?;
        }
        file.flush().await?;

        if let Some(staged) = form.file.as_mut() {
            staged.size = total_bytes;
        }
    }

    Ok(())
}

/// Link the staged file to a fresh name; hard links never clobber an
/// existing file, so a taken name simply draws a new token.
async fn persist_unique(
    staged: &StagedFile,
    dir: &Path,
    user_id: &str,
) -> UploadResult<(String, PathBuf)> {
    for _ in 0..MAX_NAME_ATTEMPTS {
        let name = build_stored_name(
            user_id,
            Utc::now().timestamp_millis(),
            &random_token(),
            &staged.original_name,
        );
        let target = dir.join(&name);

        match fs::hard_link(&staged.tmp_path, &target).await {
            Ok(()) => {
                remove_quietly(&staged.tmp_path).await;
                return Ok((name, target));
            }
            Err(err) if err.kind() == ErrorKind::AlreadyExists => continue,
            Err(err) => return Err(err.into()),
        }
    }

    Err(UploadError::Io(std::io::Error::new(
        ErrorKind::AlreadyExists,
        "could not allocate a unique upload name",
    )))
}

/// `<userId>_<millis>_<token>_<basename>.pdf`
pub fn build_stored_name(user_id: &str, millis: i64, token: &str, original_name: &str) -> String {
    let mut uploader = sanitize_component(user_id);
    if uploader.is_empty() {
        uploader = ANONYMOUS_UPLOADER.to_string();
    }

    let cleaned = sanitize_filename::sanitize(original_name);
    let stem = Path::new(&cleaned)
        .file_stem()
        .and_then(|stem| stem.to_str())
        .unwrap_or("");
    let mut base = sanitize_component(stem);
    if base.is_empty() {
        base = FALLBACK_BASENAME.to_string();
    }

    format!("{uploader}_{millis}_{token}_{base}.pdf")
}

fn sanitize_component(value: &str) -> String {
    sanitize_filename::sanitize(value)
        .chars()
        .take(MAX_COMPONENT_CHARS)
        .map(|ch| if ch.is_ascii_alphanumeric() { ch } else { '_' })
        .collect()
}

fn random_token() -> String {
    Uuid::new_v4().simple().to_string()[..8].to_string()
}

fn is_pdf(content_type: &str) -> bool {
    content_type
        .parse::<mime::Mime>()
        .map(|parsed| parsed.essence_str() == mime::APPLICATION_PDF.essence_str())
        .unwrap_or(false)
}

fn multipart_error(err: MultipartError, limit: u64) -> UploadError {
    if err.status() == StatusCode::PAYLOAD_TOO_LARGE {
        UploadError::TooLarge { limit }
    } else {
        UploadError::Malformed(err.body_text())
    }
}

async fn remove_quietly(path: &Path) {
    if let Err(err) = fs::remove_file(path).await {
        if err.kind() != ErrorKind::NotFound {
            warn!(?err, path = %path.display(), "failed to remove staged upload");
        }
    }
}
