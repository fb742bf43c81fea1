use chrono::Utc;
use diesel::dsl::exists;
use diesel::pg::PgConnection;
use diesel::prelude::*;
use diesel::result::{DatabaseErrorKind, Error as DieselError};
use thiserror::Error;
use tracing::info;
use uuid::Uuid;

use crate::models::{Document, NewSignature, Signature, User};
use crate::schema::{documents, project_members, signatures, users};

#[derive(Debug, Error)]
pub enum SignatureError {
    #[error("signature data is required")]
    MissingSignatureData,
    #[error("user not found")]
    UserNotFound,
    #[error("document not found")]
    DocumentNotFound,
    #[error("user is not a member of the document's project")]
    NotProjectMember,
    #[error("document already signed by this user")]
    AlreadySigned,
    #[error("database error: {0}")]
    Database(#[from] DieselError),
}

/// Adds `user_id` to the signer set unless it is already there. Returns whether it changed.
pub fn append_signer(signed_by: &mut Vec<Uuid>, user_id: Uuid) -> bool {
    if signed_by.contains(&user_id) {
        return false;
    }
    signed_by.push(user_id);
    true
}

/// Records a signature and extends the document's signer set in one transaction.
///
/// The document row is locked first so concurrent signers serialize on it. The
/// `(user_id, document_id)` unique index catches anything that slips past the
/// explicit duplicate check.
pub fn submit_signature(
    conn: &mut PgConnection,
    user_id: Uuid,
    document_id: Uuid,
    signature_data: &str,
) -> Result<Signature, SignatureError> {
    if signature_data.trim().is_empty() {
        return Err(SignatureError::MissingSignatureData);
    }

    conn.transaction(|conn| {
        let user: User = users::table
            .find(user_id)
            .first(conn)
            .optional()?
            .ok_or(SignatureError::UserNotFound)?;

        let document: Document = documents::table
            .find(document_id)
            .for_update()
            .first(conn)
            .optional()?
            .filter(|doc: &Document| doc.company_id == user.company_id)
            .ok_or(SignatureError::DocumentNotFound)?;

        let is_member: bool = diesel::select(exists(
            project_members::table
                .filter(project_members::project_id.eq(document.project_id))
                .filter(project_members::user_id.eq(user_id)),
        ))
        .get_result(conn)?;
        if !is_member {
            return Err(SignatureError::NotProjectMember);
        }

        let already_signed: bool = diesel::select(exists(
            signatures::table
                .filter(signatures::user_id.eq(user_id))
                .filter(signatures::document_id.eq(document_id)),
        ))
        .get_result(conn)?;
        if already_signed {
            return Err(SignatureError::AlreadySigned);
        }

        let now = Utc::now();
        let signature = diesel::insert_into(signatures::table)
            .values(&NewSignature {
                id: Uuid::new_v4(),
                user_id,
                document_id,
                signature_data: signature_data.to_owned(),
                signed_at: now,
            })
            .get_result::<Signature>(conn)
            .map_err(|err| match err {
                DieselError::DatabaseError(DatabaseErrorKind::UniqueViolation, _) => {
                    SignatureError::AlreadySigned
                }
                other => SignatureError::Database(other),
            })?;

        let mut signed_by = document.signed_by;
        if append_signer(&mut signed_by, user_id) {
            diesel::update(documents::table.find(document_id))
                .set((
                    documents::signed_by.eq(&signed_by),
                    documents::updated_at.eq(now),
                ))
                .execute(conn)?;
        }

        info!(document_id = %document_id, user_id = %user_id, "document signed");
        Ok(signature)
    })
}

/// Drops `user_id` from every signer set. Runs before the user row is deleted,
/// since that delete cascades away the matching signature rows.
pub fn remove_signer(conn: &mut PgConnection, user_id: Uuid) -> QueryResult<usize> {
    diesel::sql_query(
        "UPDATE documents SET signed_by = array_remove(signed_by, $1), updated_at = now() \
         WHERE $1 = ANY(signed_by)",
    )
    .bind::<diesel::sql_types::Uuid, _>(user_id)
    .execute(conn)
}

#[derive(Debug, Clone)]
pub struct SignatureEntry {
    pub signature: Signature,
    pub first_name: String,
    pub last_name: String,
}

/// Signature ledger of one document, oldest first.
pub fn list_signatures(
    conn: &mut PgConnection,
    document_id: Uuid,
) -> Result<Vec<SignatureEntry>, SignatureError> {
    let rows = signatures::table
        .inner_join(users::table)
        .filter(signatures::document_id.eq(document_id))
        .order(signatures::signed_at.asc())
        .select((signatures::all_columns, users::first_name, users::last_name))
        .load::<(Signature, String, String)>(conn)?;

    Ok(rows
        .into_iter()
        .map(|(signature, first_name, last_name)| SignatureEntry {
            signature,
            first_name,
            last_name,
        })
        .collect())
}
