use axum::{
    extract::{Path, State},
    http::StatusCode,
    Json,
};
use chrono::{DateTime, Utc};
use diesel::prelude::*;
use serde::{Deserialize, Serialize};
use serde_json::{json, Value};
use tracing::info;
use uuid::Uuid;

use crate::auth::AuthenticatedUser;
use crate::error::{AppError, AppResult};
use crate::models::{BlogPost, NewBlogPost, User};
use crate::schema::{blog_posts, users};
use crate::state::AppState;
use crate::utils::json::JsonBody;
use crate::types::Role;

const POST_NOT_FOUND: &str = "Blog post not found.";

#[derive(Serialize)]
#[serde(rename_all = "camelCase")]
pub struct BlogPostResponse {
    pub id: Uuid,
    pub title: String,
    pub content: String,
    pub author_id: Uuid,
    pub author_name: String,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

fn to_response(post: BlogPost, author: &User) -> BlogPostResponse {
    BlogPostResponse {
        id: post.id,
        title: post.title,
        content: post.content,
        author_id: post.author_id,
        author_name: author.full_name(),
        created_at: post.created_at,
        updated_at: post.updated_at,
    }
}

/// Posts are visible within the author's company only.
fn find_company_post(
    conn: &mut PgConnection,
    company_id: Uuid,
    post_id: Uuid,
) -> AppResult<(BlogPost, User)> {
    blog_posts::table
        .inner_join(users::table)
        .filter(blog_posts::id.eq(post_id))
        .filter(users::company_id.eq(company_id))
        .select((blog_posts::all_columns, users::all_columns))
        .first::<(BlogPost, User)>(conn)
        .optional()?
        .ok_or_else(|| AppError::not_found_with(POST_NOT_FOUND))
}

pub async fn list_posts(
    State(state): State<AppState>,
    caller: AuthenticatedUser,
) -> AppResult<Json<Vec<BlogPostResponse>>> {
    let mut conn = state.db()?;
    let posts: Vec<(BlogPost, User)> = blog_posts::table
        .inner_join(users::table)
        .filter(users::company_id.eq(caller.company_id))
        .order(blog_posts::created_at.desc())
        .select((blog_posts::all_columns, users::all_columns))
        .load(&mut conn)?;

    Ok(Json(
        posts
            .into_iter()
            .map(|(post, author)| to_response(post, &author))
            .collect(),
    ))
}

pub async fn get_post(
    State(state): State<AppState>,
    caller: AuthenticatedUser,
    Path(post_id): Path<Uuid>,
) -> AppResult<Json<BlogPostResponse>> {
    let mut conn = state.db()?;
    let (post, author) = find_company_post(&mut conn, caller.company_id, post_id)?;
    Ok(Json(to_response(post, &author)))
}

#[derive(Deserialize)]
pub struct CreatePostRequest {
    pub title: String,
    pub content: String,
}

pub async fn create_post(
    State(state): State<AppState>,
    caller: AuthenticatedUser,
    JsonBody(payload): JsonBody<CreatePostRequest>,
) -> AppResult<(StatusCode, Json<BlogPostResponse>)> {
    caller.require_role(&[Role::Admin])?;
    let title = payload.title.trim();
    if title.is_empty() || payload.content.trim().is_empty() {
        return Err(AppError::bad_request("Title and content are required."));
    }

    let mut conn = state.db()?;
    let author: User = users::table.find(caller.user_id).first(&mut conn)?;
    let post = diesel::insert_into(blog_posts::table)
        .values(&NewBlogPost {
            id: Uuid::new_v4(),
            title: title.to_owned(),
            content: payload.content,
            author_id: caller.user_id,
        })
        .get_result::<BlogPost>(&mut conn)?;
    info!(post_id = %post.id, author_id = %caller.user_id, "blog post created");

    Ok((StatusCode::CREATED, Json(to_response(post, &author))))
}

#[derive(Deserialize)]
pub struct UpdatePostRequest {
    pub title: Option<String>,
    pub content: Option<String>,
}

#[derive(AsChangeset)]
#[diesel(table_name = blog_posts)]
struct PostChangeset {
    title: Option<String>,
    content: Option<String>,
    updated_at: DateTime<Utc>,
}

/// Blank fields keep their current value.
pub async fn update_post(
    State(state): State<AppState>,
    caller: AuthenticatedUser,
    Path(post_id): Path<Uuid>,
    JsonBody(payload): JsonBody<UpdatePostRequest>,
) -> AppResult<Json<BlogPostResponse>> {
    caller.require_role(&[Role::Admin])?;
    let mut conn = state.db()?;
    let (_, author) = find_company_post(&mut conn, caller.company_id, post_id)?;

    let changes = PostChangeset {
        title: payload
            .title
            .map(|t| t.trim().to_owned())
            .filter(|t| !t.is_empty()),
        content: payload.content.filter(|c| !c.trim().is_empty()),
        updated_at: Utc::now(),
    };
    let post = diesel::update(blog_posts::table.find(post_id))
        .set(&changes)
        .get_result::<BlogPost>(&mut conn)?;
    Ok(Json(to_response(post, &author)))
}

pub async fn delete_post(
    State(state): State<AppState>,
    caller: AuthenticatedUser,
    Path(post_id): Path<Uuid>,
) -> AppResult<Json<Value>> {
    caller.require_role(&[Role::Admin])?;
    let mut conn = state.db()?;
    find_company_post(&mut conn, caller.company_id, post_id)?;

    diesel::delete(blog_posts::table.find(post_id)).execute(&mut conn)?;
    info!(post_id = %post_id, deleted_by = %caller.user_id, "blog post deleted");
    Ok(Json(json!({ "message": "Blog post deleted successfully." })))
}
