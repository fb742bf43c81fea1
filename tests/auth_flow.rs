mod common;

use anyhow::{Context, Result};
use axum::http::StatusCode;
use common::{acquire_db_lock, body_json, TestApp};
use serde_json::json;
use workplace_backend::types::Role;

#[tokio::test]
async fn login_and_me_roundtrip() -> Result<()> {
    let _lock = acquire_db_lock().await;
    let Some(app) = TestApp::try_new().await? else {
        return Ok(());
    };

    let tenant = app.seed_tenant("Acme").await?;

    let response = app.get("/auth/me", Some(&tenant.admin_token)).await?;
    assert_eq!(response.status(), StatusCode::OK);
    let me = body_json(response).await?;
    assert_eq!(me["email"], tenant.admin_email);
    assert_eq!(me["role"], "Admin");
    assert_eq!(me["companyId"], json!(tenant.company_id));

    let response = app.get("/auth/me", None).await?;
    assert_eq!(response.status(), StatusCode::UNAUTHORIZED);

    let response = app.get("/auth/me", Some("not-a-token")).await?;
    assert_eq!(response.status(), StatusCode::UNAUTHORIZED);

    app.cleanup().await?;
    Ok(())
}

#[tokio::test]
async fn login_failures_look_the_same() -> Result<()> {
    let _lock = acquire_db_lock().await;
    let Some(app) = TestApp::try_new().await? else {
        return Ok(());
    };
    let tenant = app.seed_tenant("Acme").await?;

    let wrong_password = app
        .post_json(
            "/auth/login",
            &json!({ "email": tenant.admin_email, "password": "nope" }),
            None,
        )
        .await?;
    assert_eq!(wrong_password.status(), StatusCode::UNAUTHORIZED);
    let wrong_password = body_json(wrong_password).await?;

    let unknown = app
        .post_json(
            "/auth/login",
            &json!({ "email": "ghost@acme.test", "password": "nope" }),
            None,
        )
        .await?;
    assert_eq!(unknown.status(), StatusCode::UNAUTHORIZED);
    assert_eq!(body_json(unknown).await?, wrong_password);
    assert_eq!(wrong_password["message"], "Invalid email or password.");

    let missing = app
        .post_json("/auth/login", &json!({ "email": tenant.admin_email }), None)
        .await?;
    assert_eq!(missing.status(), StatusCode::BAD_REQUEST);

    app.cleanup().await?;
    Ok(())
}

#[tokio::test]
async fn password_reset_flow() -> Result<()> {
    let _lock = acquire_db_lock().await;
    let Some(app) = TestApp::try_new().await? else {
        return Ok(());
    };
    let tenant = app.seed_tenant("Acme").await?;

    for email in [tenant.admin_email.as_str(), "ghost@acme.test"] {
        let response = app
            .post_json("/auth/reset-password-request", &json!({ "email": email }), None)
            .await?;
        assert_eq!(response.status(), StatusCode::OK);
        assert_eq!(body_json(response).await?["message"], "Password reset link sent.");
    }
    assert!(app.mailer().sent_to("ghost@acme.test").await.is_empty());

    let emails = app.mailer().sent_to(&tenant.admin_email).await;
    assert_eq!(emails.len(), 1);
    let token = emails[0]
        .text
        .split("token=")
        .nth(1)
        .and_then(|rest| rest.split_whitespace().next())
        .context("reset email without token")?
        .to_string();

    let bad = app
        .post_json(
            "/auth/reset-password",
            &json!({ "token": "deadbeef", "newPassword": "brand-new-pass" }),
            None,
        )
        .await?;
    assert_eq!(bad.status(), StatusCode::BAD_REQUEST);
    assert_eq!(
        body_json(bad).await?["message"],
        "Invalid or expired password reset token."
    );

    let ok = app
        .post_json(
            "/auth/reset-password",
            &json!({ "token": token, "newPassword": "brand-new-pass" }),
            None,
        )
        .await?;
    assert_eq!(ok.status(), StatusCode::OK);

    let reused = app
        .post_json(
            "/auth/reset-password",
            &json!({ "token": token, "newPassword": "another-pass" }),
            None,
        )
        .await?;
    assert_eq!(reused.status(), StatusCode::BAD_REQUEST);

    app.login_token(&tenant.admin_email, "brand-new-pass").await?;

    app.cleanup().await?;
    Ok(())
}

#[tokio::test]
async fn register_is_admin_only_and_mails_credentials() -> Result<()> {
    let _lock = acquire_db_lock().await;
    let Some(app) = TestApp::try_new().await? else {
        return Ok(());
    };
    let tenant = app.seed_tenant("Acme").await?;
    let (_, manager_token) = app
        .member(tenant.company_id, "manager@acme.test", Role::Manager)
        .await?;

    let payload = json!({
        "firstName": "Nina",
        "lastName": "Field",
        "email": "Nina@Acme.test",
        "role": "Collaborateur",
    });
    let denied = app
        .post_json("/auth/register", &payload, Some(&manager_token))
        .await?;
    assert_eq!(denied.status(), StatusCode::FORBIDDEN);

    let created = app
        .post_json("/auth/register", &payload, Some(&tenant.admin_token))
        .await?;
    assert_eq!(created.status(), StatusCode::CREATED);
    let body = body_json(created).await?;
    assert_eq!(body["message"], "User registered successfully.");
    assert!(body["userId"].is_string());

    let emails = app.mailer().sent_to("nina@acme.test").await;
    assert_eq!(emails.len(), 1);
    assert!(emails[0].text.contains("Temporary password"));

    let duplicate = app
        .post_json("/auth/register", &payload, Some(&tenant.admin_token))
        .await?;
    assert_eq!(duplicate.status(), StatusCode::CONFLICT);

    app.cleanup().await?;
    Ok(())
}

#[tokio::test]
async fn health_reports_database() -> Result<()> {
    let _lock = acquire_db_lock().await;
    let Some(app) = TestApp::try_new().await? else {
        return Ok(());
    };

    let response = app.get("/health", None).await?;
    assert_eq!(response.status(), StatusCode::OK);
    let body = body_json(response).await?;
    assert_eq!(body["status"], "ok");
    assert_eq!(body["database"], true);

    Ok(())
}

#[tokio::test]
async fn mistyped_bodies_get_json_errors() -> Result<()> {
    let _lock = acquire_db_lock().await;
    let Some(app) = TestApp::try_new().await? else {
        return Ok(());
    };
    let tenant = app.seed_tenant("Acme").await?;

    let mistyped = app
        .post_json("/auth/login", &json!({ "email": 5, "password": "x" }), None)
        .await?;
    assert_eq!(mistyped.status(), StatusCode::BAD_REQUEST);
    let message = body_json(mistyped).await?["message"]
        .as_str()
        .context("missing message")?
        .to_string();
    assert!(message.starts_with("Invalid request body:"));

    let missing_field = app
        .post_json("/leaves", &json!({ "reason": "Trip" }), Some(&tenant.admin_token))
        .await?;
    assert_eq!(missing_field.status(), StatusCode::BAD_REQUEST);
    assert!(body_json(missing_field).await?["message"].is_string());

    app.cleanup().await?;
    Ok(())
}
