use axum::extract::{Json, Multipart, Path, Query, State};
use axum::http::{header, HeaderValue, StatusCode};
use axum::response::{IntoResponse, Response};
use chrono::{DateTime, Utc};
use diesel::prelude::*;
use serde::{Deserialize, Serialize};
use serde_json::{json, Value};
use tracing::{error, info, warn};
use uuid::Uuid;

use super::projects::find_company_project;
use crate::auth::AuthenticatedUser;
use crate::error::{AppError, AppResult};
use crate::models::{Document, NewDocument};
use crate::notifications::{notify_best_effort, project_member_ids, NotificationMessage};
use crate::schema::documents;
use crate::signing::{self, SignatureError};
use crate::state::AppState;
use crate::utils::json::JsonBody;
use crate::storage::document_key;
use crate::types::{DocumentType, Role};

pub const UPLOADER_ROLES: &[Role] = &[Role::Admin, Role::Collaborateur];
pub const ONLY_PDF: &str = "Only PDF files are allowed.";
const DOCUMENT_NOT_FOUND: &str = "Document not found.";
const PDF_MAGIC: &[u8] = b"%PDF-";
/// Width of the `title` and `original_name` columns.
const MAX_TEXT_LEN: usize = 255;

/// Accepts only a declared `application/pdf` part whose bytes also start with `%PDF-`.
pub fn is_pdf(content_type: Option<&str>, bytes: &[u8]) -> bool {
    let declared_pdf = content_type
        .and_then(|value| value.split(';').next())
        .map(|essence| essence.trim().eq_ignore_ascii_case("application/pdf"))
        .unwrap_or(false);
    declared_pdf && bytes.starts_with(PDF_MAGIC)
}

/// ASCII fallback in `filename`, the exact name percent-encoded in `filename*`.
/// Client file name (or `<title>.pdf`), cut to the column width with its extension kept.
fn bounded_original_name(name: Option<String>, title: &str) -> String {
    let name = name
        .map(|n| n.trim().to_owned())
        .filter(|n| !n.is_empty())
        .unwrap_or_else(|| format!("{title}.pdf"));
    if name.chars().count() <= MAX_TEXT_LEN {
        return name;
    }
    let (stem, ext) = match name.rsplit_once('.') {
        Some((stem, ext)) if !stem.is_empty() && ext.chars().count() <= 16 => (stem, Some(ext)),
        _ => (name.as_str(), None),
    };
    match ext {
        Some(ext) => {
            let keep = MAX_TEXT_LEN - ext.chars().count() - 1;
            format!("{}.{ext}", stem.chars().take(keep).collect::<String>())
        }
        None => stem.chars().take(MAX_TEXT_LEN).collect(),
    }
}

fn inline_content_disposition(filename: &str) -> String {
    let sanitized: String = filename
        .chars()
        .map(|ch| match ch {
            '"' | '\\' | '\r' | '\n' => '_',
            _ => ch,
        })
        .collect();
    let fallback: String = sanitized
        .chars()
        .map(|ch| if ch.is_ascii() && !ch.is_ascii_control() { ch } else { '_' })
        .collect();

    let encoded =
        percent_encoding::utf8_percent_encode(&sanitized, percent_encoding::NON_ALPHANUMERIC);
    format!(
        "inline; filename=\"{}\"; filename*=UTF-8''{}",
        fallback, encoded
    )
}

#[derive(Serialize)]
#[serde(rename_all = "camelCase")]
pub struct DocumentResponse {
    pub id: Uuid,
    pub title: String,
    #[serde(rename = "type")]
    pub doc_type: DocumentType,
    pub project_id: Uuid,
    pub company_id: Uuid,
    pub original_name: String,
    pub size_bytes: i64,
    pub uploaded_by: Option<Uuid>,
    pub uploaded_at: DateTime<Utc>,
    pub signed_by: Vec<Uuid>,
    pub signed_by_me: bool,
}

fn to_document_response(document: Document, caller: Uuid) -> DocumentResponse {
    DocumentResponse {
        doc_type: document.document_type(),
        signed_by_me: document.signed_by.contains(&caller),
        id: document.id,
        title: document.title,
        project_id: document.project_id,
        company_id: document.company_id,
        original_name: document.original_name,
        size_bytes: document.size_bytes,
        uploaded_by: document.uploaded_by,
        uploaded_at: document.uploaded_at,
        signed_by: document.signed_by,
    }
}

fn find_company_document(
    conn: &mut PgConnection,
    company_id: Uuid,
    document_id: Uuid,
) -> AppResult<Document> {
    documents::table
        .find(document_id)
        .filter(documents::company_id.eq(company_id))
        .first::<Document>(conn)
        .optional()?
        .ok_or_else(|| AppError::not_found_with(DOCUMENT_NOT_FOUND))
}

#[derive(Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct DocumentListQuery {
    pub project_id: Option<Uuid>,
}

pub async fn list_documents(
    State(state): State<AppState>,
    caller: AuthenticatedUser,
    Query(query): Query<DocumentListQuery>,
) -> AppResult<Json<Vec<DocumentResponse>>> {
    let mut conn = state.db()?;

    let mut statement = documents::table
        .filter(documents::company_id.eq(caller.company_id))
        .order(documents::uploaded_at.desc())
        .into_boxed();
    if let Some(project_id) = query.project_id {
        find_company_project(&mut conn, caller.company_id, project_id)?;
        statement = statement.filter(documents::project_id.eq(project_id));
    }

    let docs: Vec<Document> = statement.load(&mut conn)?;
    Ok(Json(
        docs.into_iter()
            .map(|doc| to_document_response(doc, caller.user_id))
            .collect(),
    ))
}

pub async fn get_document(
    State(state): State<AppState>,
    caller: AuthenticatedUser,
    Path(document_id): Path<Uuid>,
) -> AppResult<Json<DocumentResponse>> {
    let mut conn = state.db()?;
    let document = find_company_document(&mut conn, caller.company_id, document_id)?;
    Ok(Json(to_document_response(document, caller.user_id)))
}

pub async fn download_document(
    State(state): State<AppState>,
    caller: AuthenticatedUser,
    Path(document_id): Path<Uuid>,
) -> AppResult<Response> {
    let document = {
        let mut conn = state.db()?;
        find_company_document(&mut conn, caller.company_id, document_id)?
    };

    let bytes = state.storage.get_object(&document.file_path).await.map_err(|err| {
        error!(document_id = %document_id, error = %err, "stored file missing");
        AppError::internal(format!("failed to read document file: {err}"))
    })?;

    let disposition = HeaderValue::from_str(&inline_content_disposition(&document.original_name))
        .unwrap_or_else(|_| HeaderValue::from_static("inline"));

    Ok((
        [
            (header::CONTENT_TYPE, HeaderValue::from_static("application/pdf")),
            (header::CONTENT_DISPOSITION, disposition),
        ],
        bytes,
    )
        .into_response())
}

struct UploadForm {
    bytes: Option<Vec<u8>>,
    content_type: Option<String>,
    original_name: Option<String>,
    title: Option<String>,
    project_id: Option<String>,
    doc_type: Option<String>,
}

async fn read_upload_form(multipart: &mut Multipart) -> AppResult<UploadForm> {
    let mut form = UploadForm {
        bytes: None,
        content_type: None,
        original_name: None,
        title: None,
        project_id: None,
        doc_type: None,
    };

    while let Some(field) = multipart.next_field().await.map_err(|err| {
        warn!(error = %err, "invalid multipart data");
        AppError::bad_request(format!("Invalid multipart data: {err}"))
    })? {
        let name = field.name().map(str::to_owned);
        match name.as_deref() {
            Some("file") => {
                if form.bytes.is_some() {
                    return Err(AppError::bad_request("Only one file can be uploaded at a time."));
                }
                form.original_name = field.file_name().map(str::to_owned);
                form.content_type = field.content_type().map(str::to_owned);
                let data = field.bytes().await.map_err(|err| {
                    warn!(error = %err, "failed to read uploaded file");
                    AppError::bad_request("File upload failed.")
                })?;
                form.bytes = Some(data.to_vec());
            }
            Some(text_field @ ("title" | "projectId" | "type")) => {
                let text_field = text_field.to_owned();
                let value = field
                    .text()
                    .await
                    .map_err(|_| AppError::bad_request(format!("Invalid {text_field} field.")))?;
                let value = Some(value.trim().to_owned()).filter(|v| !v.is_empty());
                match text_field.as_str() {
                    "title" => form.title = value,
                    "projectId" => form.project_id = value,
                    _ => form.doc_type = value,
                }
            }
            _ => {}
        }
    }
    Ok(form)
}

pub async fn upload_document(
    State(state): State<AppState>,
    caller: AuthenticatedUser,
    mut multipart: Multipart,
) -> AppResult<(StatusCode, Json<Value>)> {
    caller.require_role(UPLOADER_ROLES)?;

    let form = read_upload_form(&mut multipart).await?;
    let bytes = form.bytes.unwrap_or_default();

    if !bytes.is_empty() && !is_pdf(form.content_type.as_deref(), &bytes) {
        warn!(
            user_id = %caller.user_id,
            content_type = ?form.content_type,
            "upload rejected: not a PDF"
        );
        return Err(AppError::bad_request(ONLY_PDF));
    }
    let (Some(title), Some(raw_project_id)) = (form.title, form.project_id) else {
        return Err(AppError::bad_request("Title, projectId, and file are required."));
    };
    if bytes.is_empty() {
        return Err(AppError::bad_request("Title, projectId, and file are required."));
    }
    if title.chars().count() > MAX_TEXT_LEN {
        return Err(AppError::bad_request(format!(
            "Title must be at most {MAX_TEXT_LEN} characters."
        )));
    }
    if bytes.len() > state.config.max_upload_bytes {
        return Err(AppError::new(
            StatusCode::PAYLOAD_TOO_LARGE,
            "File is too large.",
        ));
    }
    let project_id = Uuid::parse_str(&raw_project_id)
        .map_err(|_| AppError::bad_request("projectId must be a valid UUID."))?;
    let doc_type = match form.doc_type.as_deref() {
        Some(raw) => raw
            .parse::<DocumentType>()
            .map_err(|_| AppError::bad_request("Invalid document type."))?,
        None => DocumentType::default(),
    };

    let project = {
        let mut conn = state.db()?;
        find_company_project(&mut conn, caller.company_id, project_id)?
    };

    let document_id = Uuid::new_v4();
    let key = document_key(caller.company_id, document_id);
    let size_bytes = bytes.len() as i64;
    let original_name = bounded_original_name(form.original_name, &title);

    state.storage.put_object(&key, bytes).await.map_err(|err| {
        error!(error = %err, key = %key, "failed to store document");
        AppError::internal(format!("failed to store document: {err}"))
    })?;

    let inserted = state.db().and_then(|mut conn| {
        conn.transaction(|conn| {
            diesel::insert_into(documents::table)
                .values(&NewDocument {
                    id: document_id,
                    title: title.clone(),
                    doc_type: doc_type.as_str().to_owned(),
                    project_id,
                    company_id: caller.company_id,
                    file_path: key.clone(),
                    original_name: original_name.clone(),
                    size_bytes,
                    uploaded_by: Some(caller.user_id),
                })
                .get_result::<Document>(conn)
        })
        .map_err(AppError::from)
    });

    let document = match inserted {
        Ok(document) => document,
        Err(err) => {
            if let Err(cleanup) = state.storage.delete_object(&key).await {
                warn!(key = %key, error = %cleanup, "failed to remove orphaned upload");
            }
            return Err(err);
        }
    };

    info!(
        document_id = %document.id,
        project_id = %project_id,
        size_bytes,
        "document upload succeeded"
    );

    let recipients = match state.db() {
        Ok(mut conn) => project_member_ids(&mut conn, project_id).unwrap_or_else(|err| {
            warn!(document_id = %document.id, error = %err, "failed to load project members");
            Vec::new()
        }),
        Err(err) => {
            warn!(document_id = %document.id, error = %err, "failed to load project members");
            Vec::new()
        }
    };
    let recipients = recipients
        .into_iter()
        .filter(|id| *id != caller.user_id)
        .collect();
    notify_best_effort(
        &state,
        NotificationMessage::new(
            "New document",
            format!(
                "A new document \"{}\" is available for project {}.",
                document.title, project.name
            ),
        )
        .with_document(document.id),
        recipients,
    )
    .await;

    Ok((
        StatusCode::CREATED,
        Json(json!({
            "message": "Document uploaded successfully.",
            "documentId": document.id,
        })),
    ))
}

pub async fn delete_document(
    State(state): State<AppState>,
    caller: AuthenticatedUser,
    Path(document_id): Path<Uuid>,
) -> AppResult<Json<Value>> {
    caller.require_role(&[Role::Admin])?;

    let document = {
        let mut conn = state.db()?;
        let document = find_company_document(&mut conn, caller.company_id, document_id)?;
        diesel::delete(documents::table.find(document_id)).execute(&mut conn)?;
        document
    };

    if let Err(err) = state.storage.delete_object(&document.file_path).await {
        warn!(document_id = %document_id, error = %err, "failed to delete stored file");
    }

    info!(document_id = %document_id, deleted_by = %caller.user_id, "document deleted");
    Ok(Json(json!({ "message": "Document deleted successfully." })))
}

#[derive(Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct SignRequest {
    #[serde(default)]
    pub signature_data: String,
}

impl From<SignatureError> for AppError {
    fn from(value: SignatureError) -> Self {
        match value {
            SignatureError::MissingSignatureData => {
                AppError::bad_request("Signature data is required.")
            }
            SignatureError::UserNotFound => AppError::not_found_with("User not found."),
            SignatureError::DocumentNotFound => AppError::not_found_with(DOCUMENT_NOT_FOUND),
            SignatureError::NotProjectMember => {
                AppError::forbidden_with("You are not associated with this project.")
            }
            SignatureError::AlreadySigned => {
                AppError::conflict("Document already signed by this user.")
            }
            SignatureError::Database(err) => AppError::internal(err),
        }
    }
}

pub async fn sign_document(
    State(state): State<AppState>,
    caller: AuthenticatedUser,
    Path(document_id): Path<Uuid>,
    JsonBody(payload): JsonBody<SignRequest>,
) -> AppResult<Json<Value>> {
    let mut conn = state.db()?;
    let signature = signing::submit_signature(
        &mut conn,
        caller.user_id,
        document_id,
        &payload.signature_data,
    )?;

    Ok(Json(json!({
        "message": "Document signed successfully.",
        "signatureId": signature.id,
        "signedAt": signature.signed_at,
    })))
}

#[derive(Serialize)]
#[serde(rename_all = "camelCase")]
pub struct SignatureResponse {
    pub id: Uuid,
    pub user_id: Uuid,
    pub first_name: String,
    pub last_name: String,
    pub signature_data: String,
    pub signed_at: DateTime<Utc>,
}

pub async fn list_document_signatures(
    State(state): State<AppState>,
    caller: AuthenticatedUser,
    Path(document_id): Path<Uuid>,
) -> AppResult<Json<Vec<SignatureResponse>>> {
    let mut conn = state.db()?;
    find_company_document(&mut conn, caller.company_id, document_id)?;

    let entries = signing::list_signatures(&mut conn, document_id)?;
    Ok(Json(
        entries
            .into_iter()
            .map(|entry| SignatureResponse {
                id: entry.signature.id,
                user_id: entry.signature.user_id,
                first_name: entry.first_name,
                last_name: entry.last_name,
                signature_data: entry.signature.signature_data,
                signed_at: entry.signature.signed_at,
            })
            .collect(),
    ))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn pdf_needs_both_header_and_magic_bytes() {
        let pdf = b"%PDF-1.7\n...";
        assert!(is_pdf(Some("application/pdf"), pdf));
        assert!(is_pdf(Some("Application/PDF; charset=binary"), pdf));
        assert!(!is_pdf(Some("text/plain"), pdf));
        assert!(!is_pdf(None, pdf));
        assert!(!is_pdf(Some("application/pdf"), b"MZ\x90\x00"));
        assert!(!is_pdf(Some("application/pdf"), b""));
    }

    #[test]
    fn content_disposition_escapes_quotes_and_encodes_utf8() {
        let value = inline_content_disposition("plan \"final\" é.pdf");
        assert!(value.starts_with("inline; filename=\"plan _final_ _.pdf\""));
        assert!(HeaderValue::from_str(&value).is_ok());
        assert!(value.contains("filename*=UTF-8''plan%20%5Ffinal%5F%20%C3%A9%2Epdf"));
    }

    #[test]
    fn original_name_fits_the_column() {
        assert_eq!(bounded_original_name(Some(" plan.pdf ".into()), "Plan"), "plan.pdf");
        assert_eq!(bounded_original_name(None, "Plan"), "Plan.pdf");
        assert_eq!(bounded_original_name(Some("  ".into()), "Plan"), "Plan.pdf");

        let long = bounded_original_name(Some(format!("{}.pdf", "é".repeat(400))), "Plan");
        assert_eq!(long.chars().count(), MAX_TEXT_LEN);
        assert!(long.ends_with(".pdf"));

        let no_ext = bounded_original_name(Some("x".repeat(300)), "Plan");
        assert_eq!(no_ext.chars().count(), MAX_TEXT_LEN);

        let from_title = bounded_original_name(None, &"t".repeat(MAX_TEXT_LEN));
        assert_eq!(from_title.chars().count(), MAX_TEXT_LEN);
        assert!(from_title.ends_with(".pdf"));
    }

    #[test]
    fn signing_errors_map_to_http_statuses() {
        let cases = [
            (SignatureError::MissingSignatureData, StatusCode::BAD_REQUEST),
            (SignatureError::UserNotFound, StatusCode::NOT_FOUND),
            (SignatureError::DocumentNotFound, StatusCode::NOT_FOUND),
            (SignatureError::NotProjectMember, StatusCode::FORBIDDEN),
            (SignatureError::AlreadySigned, StatusCode::CONFLICT),
        ];
        for (err, status) in cases {
            assert_eq!(AppError::from(err).status(), status);
        }
    }
}
