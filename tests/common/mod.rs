use std::collections::HashMap;
use std::env;
use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;

use anyhow::{anyhow, bail, ensure, Context, Result};
use async_trait::async_trait;
use axum::body::Body;
use axum::http::{Method, Request, StatusCode};
use axum::Router;
use chrono::NaiveDate;
use diesel::connection::SimpleConnection;
use diesel::prelude::*;
use diesel::PgConnection;
use diesel_migrations::MigrationHarness;
use http_body_util::BodyExt;
use once_cell::sync::Lazy;
use serde::Serialize;
use serde_json::{json, Value};
use tokio::sync::Mutex;
use tower::util::ServiceExt;
use uuid::Uuid;

use workplace_backend::auth::jwt::JwtService;
use workplace_backend::auth::password::hash_password;
use workplace_backend::config::AppConfig;
use workplace_backend::db::{self, PgPool, MIGRATIONS};
use workplace_backend::mailer::{Mailer, OutgoingEmail};
use workplace_backend::models::{Job, NewCompany, NewProject, NewProjectMember, NewUser};
use workplace_backend::push::{PushMessage, PushSender};
use workplace_backend::routes;
use workplace_backend::schema::{companies, jobs, project_members, projects, users};
use workplace_backend::state::AppState;
use workplace_backend::storage::FileStorage;
use workplace_backend::types::Role;
use workplace_backend::{default_handlers, Worker};

static DB_LOCK: Lazy<Mutex<()>> = Lazy::new(|| Mutex::new(()));

pub const MAX_UPLOAD_BYTES: usize = 64 * 1024;
pub const FAILING_PUSH_TOKEN: &str = "unreachable-device";

#[derive(Default)]
pub struct FakeStorage {
    objects: Mutex<HashMap<String, Vec<u8>>>,
}

#[async_trait]
impl FileStorage for FakeStorage {
    async fn put_object(&self, key: &str, bytes: Vec<u8>) -> Result<()> {
        self.objects.lock().await.insert(key.to_string(), bytes);
        Ok(())
    }

    async fn get_object(&self, key: &str) -> Result<Vec<u8>> {
        self.objects
            .lock()
            .await
            .get(key)
            .cloned()
            .ok_or_else(|| anyhow!("object {key} missing"))
    }

    async fn delete_object(&self, key: &str) -> Result<()> {
        self.objects.lock().await.remove(key);
        Ok(())
    }

    async fn list_keys(&self) -> Result<Vec<String>> {
        let mut keys: Vec<String> = self.objects.lock().await.keys().cloned().collect();
        keys.sort();
        Ok(keys)
    }
}

impl FakeStorage {
    #[allow(dead_code)]
    pub async fn object_count(&self) -> usize {
        self.objects.lock().await.len()
    }
}

#[derive(Default)]
pub struct FakeMailer {
    sent: Mutex<Vec<OutgoingEmail>>,
}

#[async_trait]
impl Mailer for FakeMailer {
    async fn send(&self, email: OutgoingEmail) -> Result<()> {
        self.sent.lock().await.push(email);
        Ok(())
    }
}

impl FakeMailer {
    #[allow(dead_code)]
    pub async fn sent_to(&self, address: &str) -> Vec<OutgoingEmail> {
        self.sent
            .lock()
            .await
            .iter()
            .filter(|email| email.to == address)
            .cloned()
            .collect()
    }
}

/// Records every delivery. `FAILING_PUSH_TOKEN` always errors.
#[derive(Default)]
pub struct RecordingPush {
    sent: Mutex<Vec<(String, PushMessage)>>,
}

#[async_trait]
impl PushSender for RecordingPush {
    async fn send(&self, token: &str, message: &PushMessage) -> Result<()> {
        if token == FAILING_PUSH_TOKEN {
            bail!("device unreachable");
        }
        self.sent
            .lock()
            .await
            .push((token.to_string(), message.clone()));
        Ok(())
    }
}

impl RecordingPush {
    #[allow(dead_code)]
    pub async fn sent(&self) -> Vec<(String, PushMessage)> {
        self.sent.lock().await.clone()
    }
}

/// A company with one Admin already logged in.
#[allow(dead_code)]
pub struct Tenant {
    pub company_id: Uuid,
    pub admin_id: Uuid,
    pub admin_email: String,
    pub admin_token: String,
}

pub struct TestApp {
    pub state: AppState,
    router: Router,
    storage: Arc<FakeStorage>,
    mailer: Arc<FakeMailer>,
    push: Arc<RecordingPush>,
}

impl TestApp {
    /// `None` when `TEST_DATABASE_URL` is unset; the calling test then returns early.
    pub async fn try_new() -> Result<Option<Self>> {
        let Ok(database_url) = env::var("TEST_DATABASE_URL") else {
            eprintln!("TEST_DATABASE_URL not set; skipping integration test");
            return Ok(None);
        };

        let config = AppConfig {
            database_url,
            database_max_pool_size: db::DEFAULT_MAX_POOL_SIZE,
            server_host: "127.0.0.1".to_string(),
            server_port: 0,
            app_env: "test".to_string(),
            jwt_secret: "test-secret".to_string(),
            jwt_issuer: "test-issuer".to_string(),
            jwt_audience: "test-audience".to_string(),
            jwt_expiry_minutes: 60,
            password_reset_expiry_hours: 24,
            cors_allowed_origin: None,
            upload_dir: PathBuf::from("unused"),
            max_upload_bytes: MAX_UPLOAD_BYTES,
            frontend_url: "http://frontend.test".to_string(),
            fcm_server_key: None,
            fcm_endpoint: "http://push.test".to_string(),
            mail_api_url: None,
            mail_api_key: None,
            mail_from: "noreply@test".to_string(),
            worker_poll_seconds: 1,
        };

        let pool = db::init_pool_with_size(&config.database_url, config.database_max_pool_size)?;
        prepare_database(&pool).await?;

        let storage = Arc::new(FakeStorage::default());
        let mailer = Arc::new(FakeMailer::default());
        let push = Arc::new(RecordingPush::default());
        let jwt = JwtService::from_config(&config)?;
        let state = AppState::new(
            pool,
            config,
            storage.clone(),
            jwt,
            mailer.clone(),
            push.clone(),
        );
        let router = routes::create_router(state.clone());

        Ok(Some(Self {
            state,
            router,
            storage,
            mailer,
            push,
        }))
    }

    pub async fn cleanup(&self) -> Result<()> {
        self.with_conn(truncate_all).await
    }

    #[allow(dead_code)]
    pub fn storage(&self) -> Arc<FakeStorage> {
        self.storage.clone()
    }

    #[allow(dead_code)]
    pub fn mailer(&self) -> Arc<FakeMailer> {
        self.mailer.clone()
    }

    #[allow(dead_code)]
    pub fn push(&self) -> Arc<RecordingPush> {
        self.push.clone()
    }

    pub async fn insert_company(&self, name: &str) -> Result<Uuid> {
        let company = NewCompany {
            id: Uuid::new_v4(),
            name: name.to_string(),
            address: format!("1 {name} Street"),
        };
        self.with_conn(move |conn| {
            diesel::insert_into(companies::table)
                .values(&company)
                .execute(conn)
                .context("failed to insert company")?;
            Ok(company.id)
        })
        .await
    }

    pub async fn insert_user(
        &self,
        company_id: Uuid,
        email: &str,
        password: &str,
        role: Role,
    ) -> Result<Uuid> {
        let email = email.to_string();
        let password = password.to_string();
        self.with_conn(move |conn| {
            let local = email.split('@').next().unwrap_or("user").to_string();
            let user = NewUser {
                id: Uuid::new_v4(),
                first_name: local.clone(),
                last_name: "Tester".to_string(),
                email,
                password_hash: hash_password(&password)?,
                role: role.as_str().to_string(),
                company_id,
            };
            diesel::insert_into(users::table)
                .values(&user)
                .execute(conn)
                .context("failed to insert user")?;
            Ok(user.id)
        })
        .await
    }

    #[allow(dead_code)]
    pub async fn set_push_token(&self, user_id: Uuid, token: &str) -> Result<()> {
        let token = token.to_string();
        self.with_conn(move |conn| {
            diesel::update(users::table.find(user_id))
                .set(users::push_token.eq(Some(token)))
                .execute(conn)?;
            Ok(())
        })
        .await
    }

    #[allow(dead_code)]
    pub async fn insert_project(&self, company_id: Uuid, name: &str) -> Result<Uuid> {
        let project = NewProject {
            id: Uuid::new_v4(),
            name: name.to_string(),
            location: "Site A".to_string(),
            company_id,
            start_date: NaiveDate::from_ymd_opt(2024, 1, 1).context("bad date")?,
            end_date: None,
        };
        self.with_conn(move |conn| {
            diesel::insert_into(projects::table)
                .values(&project)
                .execute(conn)
                .context("failed to insert project")?;
            Ok(project.id)
        })
        .await
    }

    #[allow(dead_code)]
    pub async fn add_member(&self, project_id: Uuid, user_id: Uuid) -> Result<()> {
        self.with_conn(move |conn| {
            diesel::insert_into(project_members::table)
                .values(&NewProjectMember {
                    project_id,
                    user_id,
                })
                .execute(conn)
                .context("failed to insert project member")?;
            Ok(())
        })
        .await
    }

    pub async fn login_token(&self, email: &str, password: &str) -> Result<String> {
        let response = self
            .post_json(
                "/auth/login",
                &json!({ "email": email, "password": password }),
                None,
            )
            .await?;
        ensure!(
            response.status() == StatusCode::OK,
            "login failed with status {}",
            response.status()
        );
        let body = body_json(response).await?;
        body["token"]
            .as_str()
            .map(str::to_owned)
            .ok_or_else(|| anyhow!("login response without token: {body}"))
    }

    pub async fn seed_tenant(&self, name: &str) -> Result<Tenant> {
        let company_id = self.insert_company(name).await?;
        let admin_email = format!("admin@{}.test", name.to_lowercase());
        let admin_id = self
            .insert_user(company_id, &admin_email, "admin-pass", Role::Admin)
            .await?;
        let admin_token = self.login_token(&admin_email, "admin-pass").await?;
        Ok(Tenant {
            company_id,
            admin_id,
            admin_email,
            admin_token,
        })
    }

    /// Inserts a user in the company and returns its id with a fresh token.
    #[allow(dead_code)]
    pub async fn member(&self, company_id: Uuid, email: &str, role: Role) -> Result<(Uuid, String)> {
        let id = self.insert_user(company_id, email, "member-pass", role).await?;
        let token = self.login_token(email, "member-pass").await?;
        Ok((id, token))
    }

    #[allow(dead_code)]
    pub async fn jobs_by_type(&self, ty: &str) -> Result<Vec<Job>> {
        let ty = ty.to_string();
        self.with_conn(move |conn| {
            let rows = jobs::table
                .filter(jobs::job_type.eq(&ty))
                .load::<Job>(conn)
                .context("failed to load jobs")?;
            Ok(rows)
        })
        .await
    }

    /// Makes every queued job due now.
    #[allow(dead_code)]
    pub async fn make_jobs_due(&self) -> Result<()> {
        self.with_conn(|conn| {
            diesel::update(jobs::table)
                .set(jobs::run_after.eq(chrono::Utc::now() - chrono::Duration::seconds(1)))
                .execute(conn)?;
            Ok(())
        })
        .await
    }

    /// Processes queued jobs until none is due.
    #[allow(dead_code)]
    pub async fn drain_jobs(&self) -> Result<usize> {
        let worker = Worker::new(
            Arc::new(self.state.clone()),
            default_handlers(),
            Duration::from_millis(10),
        );
        let mut processed = 0;
        while worker.tick().await? {
            processed += 1;
        }
        Ok(processed)
    }

    pub async fn post_json<T: Serialize + ?Sized>(
        &self,
        path: &str,
        payload: &T,
        token: Option<&str>,
    ) -> Result<hyper::Response<Body>> {
        self.send_json(Method::POST, path, payload, token).await
    }

    #[allow(dead_code)]
    pub async fn put_json<T: Serialize + ?Sized>(
        &self,
        path: &str,
        payload: &T,
        token: Option<&str>,
    ) -> Result<hyper::Response<Body>> {
        self.send_json(Method::PUT, path, payload, token).await
    }

    async fn send_json<T: Serialize + ?Sized>(
        &self,
        method: Method,
        path: &str,
        payload: &T,
        token: Option<&str>,
    ) -> Result<hyper::Response<Body>> {
        let body = serde_json::to_vec(payload)?;
        let mut builder = Request::builder()
            .method(method)
            .uri(path)
            .header("content-type", "application/json");
        if let Some(token) = token {
            builder = builder.header("authorization", format!("Bearer {token}"));
        }
        self.dispatch(builder.body(Body::from(body))?).await
    }

    pub async fn get(&self, path: &str, token: Option<&str>) -> Result<hyper::Response<Body>> {
        self.send_empty(Method::GET, path, token).await
    }

    #[allow(dead_code)]
    pub async fn put(&self, path: &str, token: Option<&str>) -> Result<hyper::Response<Body>> {
        self.send_empty(Method::PUT, path, token).await
    }

    #[allow(dead_code)]
    pub async fn delete(&self, path: &str, token: Option<&str>) -> Result<hyper::Response<Body>> {
        self.send_empty(Method::DELETE, path, token).await
    }

    async fn send_empty(
        &self,
        method: Method,
        path: &str,
        token: Option<&str>,
    ) -> Result<hyper::Response<Body>> {
        let mut builder = Request::builder().method(method).uri(path);
        if let Some(token) = token {
            builder = builder.header("authorization", format!("Bearer {token}"));
        }
        self.dispatch(builder.body(Body::empty())?).await
    }

    /// Multipart upload with a `file` part plus plain text fields.
    #[allow(dead_code)]
    pub async fn upload_document(
        &self,
        filename: &str,
        content_type: &str,
        data: &[u8],
        fields: &[(&str, String)],
        token: &str,
    ) -> Result<hyper::Response<Body>> {
        let boundary = format!("boundary-{}", Uuid::new_v4());
        let mut body = Vec::new();
        for (name, value) in fields {
            body.extend(format!("--{boundary}\r\n").as_bytes());
            body.extend(
                format!("Content-Disposition: form-data; name=\"{name}\"\r\n\r\n").as_bytes(),
            );
            body.extend(value.as_bytes());
            body.extend(b"\r\n");
        }

        body.extend(format!("--{boundary}\r\n").as_bytes());
        body.extend(
            format!(
                "Content-Disposition: form-data; name=\"file\"; filename=\"{filename}\"\r\n"
            )
            .as_bytes(),
        );
        body.extend(format!("Content-Type: {content_type}\r\n\r\n").as_bytes());
        body.extend(data);
        body.extend(b"\r\n");
        body.extend(format!("--{boundary}--\r\n").as_bytes());

        let request = Request::builder()
            .method(Method::POST)
            .uri("/documents")
            .header(
                "content-type",
                format!("multipart/form-data; boundary={boundary}"),
            )
            .header("authorization", format!("Bearer {token}"))
            .body(Body::from(body))?;
        self.dispatch(request).await
    }

    async fn dispatch(&self, request: Request<Body>) -> Result<hyper::Response<Body>> {
        self.router
            .clone()
            .oneshot(request)
            .await
            .map_err(|err| anyhow!("router error: {err}"))
    }

    pub async fn with_conn<F, T>(&self, f: F) -> Result<T>
    where
        F: FnOnce(&mut PgConnection) -> Result<T> + Send + 'static,
        T: Send + 'static,
    {
        let pool = self.state.pool.clone();
        tokio::task::spawn_blocking(move || {
            let mut conn = pool
                .get()
                .map_err(|err| anyhow!("failed to get database connection: {err}"))?;
            f(&mut conn)
        })
        .await
        .context("connection task panicked")?
    }
}

pub async fn acquire_db_lock() -> tokio::sync::MutexGuard<'static, ()> {
    DB_LOCK.lock().await
}

pub async fn body_to_vec(body: Body) -> Result<Vec<u8>> {
    let collected = body
        .collect()
        .await
        .map_err(|err| anyhow!("failed to read response body: {err}"))?;
    Ok(collected.to_bytes().to_vec())
}

pub async fn body_json(response: hyper::Response<Body>) -> Result<Value> {
    let bytes = body_to_vec(response.into_body()).await?;
    serde_json::from_slice(&bytes).context("response body is not JSON")
}

async fn prepare_database(pool: &PgPool) -> Result<()> {
    let pool = pool.clone();
    tokio::task::spawn_blocking(move || -> Result<()> {
        let mut conn = pool
            .get()
            .map_err(|err| anyhow!("failed to acquire connection: {err}"))?;
        conn.run_pending_migrations(MIGRATIONS)
            .map_err(|err| anyhow!("failed to run migrations: {err}"))?;
        truncate_all(&mut conn)?;
        Ok(())
    })
    .await
    .context("migration task panicked")?
}

fn truncate_all(conn: &mut PgConnection) -> Result<()> {
    conn.batch_execute(
        "TRUNCATE TABLE jobs, notifications, blog_posts, leave_requests, signatures, documents, \
         project_members, projects, users, companies RESTART IDENTITY CASCADE;",
    )
    .context("failed to truncate tables")?;
    Ok(())
}
