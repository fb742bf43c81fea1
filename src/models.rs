use chrono::{DateTime, NaiveDate, Utc};
use diesel::prelude::*;
use uuid::Uuid;

use crate::schema::*;
use crate::types::{DocumentType, LeaveStatus, Role};

#[derive(Debug, Clone, Queryable, Identifiable)]
#[diesel(table_name = companies)]
pub struct Company {
    pub id: Uuid,
    pub name: String,
    pub address: String,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

#[derive(Debug, Insertable)]
#[diesel(table_name = companies)]
pub struct NewCompany {
    pub id: Uuid,
    pub name: String,
    pub address: String,
}

#[derive(Debug, Clone, Queryable, Identifiable, Associations)]
#[diesel(table_name = users)]
#[diesel(belongs_to(Company))]
pub struct User {
    pub id: Uuid,
    pub first_name: String,
    pub last_name: String,
    pub email: String,
    pub password_hash: String,
    pub role: String,
    pub company_id: Uuid,
    pub push_token: Option<String>,
    pub password_reset_token_hash: Option<String>,
    pub password_reset_expires_at: Option<DateTime<Utc>>,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

impl User {
    /// Falls back to the least privileged role if the column holds something unexpected.
    pub fn role(&self) -> Role {
        self.role.parse().unwrap_or(Role::User)
    }

    pub fn full_name(&self) -> String {
        format!("{} {}", self.first_name, self.last_name)
    }
}

#[derive(Debug, Insertable)]
#[diesel(table_name = users)]
pub struct NewUser {
    pub id: Uuid,
    pub first_name: String,
    pub last_name: String,
    pub email: String,
    pub password_hash: String,
    pub role: String,
    pub company_id: Uuid,
}

#[derive(Debug, Clone, Queryable, Identifiable, Associations)]
#[diesel(table_name = projects)]
#[diesel(belongs_to(Company))]
pub struct Project {
    pub id: Uuid,
    pub name: String,
    pub location: String,
    pub company_id: Uuid,
    pub start_date: NaiveDate,
    pub end_date: Option<NaiveDate>,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

#[derive(Debug, Insertable)]
#[diesel(table_name = projects)]
pub struct NewProject {
    pub id: Uuid,
    pub name: String,
    pub location: String,
    pub company_id: Uuid,
    pub start_date: NaiveDate,
    pub end_date: Option<NaiveDate>,
}

#[derive(Debug, Clone, Queryable, Associations)]
#[diesel(table_name = project_members)]
#[diesel(belongs_to(Project))]
#[diesel(belongs_to(User))]
#[diesel(primary_key(project_id, user_id))]
pub struct ProjectMember {
    pub project_id: Uuid,
    pub user_id: Uuid,
    pub added_at: DateTime<Utc>,
}

#[derive(Debug, Insertable)]
#[diesel(table_name = project_members)]
pub struct NewProjectMember {
    pub project_id: Uuid,
    pub user_id: Uuid,
}

#[derive(Debug, Clone, Queryable, Identifiable, Associations)]
#[diesel(table_name = documents)]
#[diesel(belongs_to(Project))]
pub struct Document {
    pub id: Uuid,
    pub title: String,
    pub doc_type: String,
    pub project_id: Uuid,
    pub company_id: Uuid,
    pub file_path: String,
    pub original_name: String,
    pub size_bytes: i64,
    pub uploaded_by: Option<Uuid>,
    pub uploaded_at: DateTime<Utc>,
    pub signed_by: Vec<Uuid>,
    pub updated_at: DateTime<Utc>,
}

impl Document {
    pub fn document_type(&self) -> DocumentType {
        self.doc_type.parse().unwrap_or_default()
    }
}

#[derive(Debug, Insertable)]
#[diesel(table_name = documents)]
pub struct NewDocument {
    pub id: Uuid,
    pub title: String,
    pub doc_type: String,
    pub project_id: Uuid,
    pub company_id: Uuid,
    pub file_path: String,
    pub original_name: String,
    pub size_bytes: i64,
    pub uploaded_by: Option<Uuid>,
}

#[derive(Debug, Clone, Queryable, Identifiable, Associations)]
#[diesel(table_name = signatures)]
#[diesel(belongs_to(Document))]
#[diesel(belongs_to(User))]
pub struct Signature {
    pub id: Uuid,
    pub user_id: Uuid,
    pub document_id: Uuid,
    pub signature_data: String,
    pub signed_at: DateTime<Utc>,
}

#[derive(Debug, Insertable)]
#[diesel(table_name = signatures)]
pub struct NewSignature {
    pub id: Uuid,
    pub user_id: Uuid,
    pub document_id: Uuid,
    pub signature_data: String,
    pub signed_at: DateTime<Utc>,
}

#[derive(Debug, Clone, Queryable, Identifiable, Associations)]
#[diesel(table_name = leave_requests)]
#[diesel(belongs_to(User))]
pub struct LeaveRequest {
    pub id: Uuid,
    pub user_id: Uuid,
    pub leave_type: String,
    pub start_date: NaiveDate,
    pub end_date: NaiveDate,
    pub description: Option<String>,
    pub status: String,
    pub submitted_at: DateTime<Utc>,
    pub decided_at: Option<DateTime<Utc>>,
    pub decided_by: Option<Uuid>,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

impl LeaveRequest {
    /// Unknown values are treated as pending so they can still be decided.
    pub fn status(&self) -> LeaveStatus {
        self.status.parse().unwrap_or(LeaveStatus::Pending)
    }
}

#[derive(Debug, Insertable)]
#[diesel(table_name = leave_requests)]
pub struct NewLeaveRequest {
    pub id: Uuid,
    pub user_id: Uuid,
    pub leave_type: String,
    pub start_date: NaiveDate,
    pub end_date: NaiveDate,
    pub description: Option<String>,
    pub status: String,
    pub submitted_at: DateTime<Utc>,
}

#[derive(Debug, Clone, Queryable, Identifiable, Associations)]
#[diesel(table_name = notifications)]
#[diesel(belongs_to(User))]
pub struct Notification {
    pub id: Uuid,
    pub title: String,
    pub content: String,
    pub related_document_id: Option<Uuid>,
    pub user_id: Uuid,
    pub is_read: bool,
    pub read_at: Option<DateTime<Utc>>,
    pub created_at: DateTime<Utc>,
}

#[derive(Debug, Insertable)]
#[diesel(table_name = notifications)]
pub struct NewNotification {
    pub id: Uuid,
    pub title: String,
    pub content: String,
    pub related_document_id: Option<Uuid>,
    pub user_id: Uuid,
}

#[derive(Debug, Clone, Queryable, Identifiable, Associations)]
#[diesel(table_name = blog_posts)]
#[diesel(belongs_to(User, foreign_key = author_id))]
pub struct BlogPost {
    pub id: Uuid,
    pub title: String,
    pub content: String,
    pub author_id: Uuid,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

#[derive(Debug, Insertable)]
#[diesel(table_name = blog_posts)]
pub struct NewBlogPost {
    pub id: Uuid,
    pub title: String,
    pub content: String,
    pub author_id: Uuid,
}

#[derive(Debug, Clone, Queryable, Identifiable)]
#[diesel(table_name = jobs)]
pub struct Job {
    pub id: Uuid,
    pub job_type: String,
    pub payload: serde_json::Value,
    pub status: String,
    pub attempts: i32,
    pub run_after: DateTime<Utc>,
    pub last_error: Option<String>,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

#[derive(Debug, Insertable)]
#[diesel(table_name = jobs)]
pub struct NewJob {
    pub id: Uuid,
    pub job_type: String,
    pub payload: serde_json::Value,
    pub status: String,
    pub run_after: DateTime<Utc>,
}
