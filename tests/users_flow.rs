mod common;

use anyhow::{Context, Result};
use axum::http::StatusCode;
use common::{acquire_db_lock, body_json, TestApp};
use serde_json::json;
use workplace_backend::types::Role;

#[tokio::test]
async fn admin_manages_company_users() -> Result<()> {
    let _lock = acquire_db_lock().await;
    let Some(app) = TestApp::try_new().await? else {
        return Ok(());
    };
    let tenant = app.seed_tenant("Acme").await?;
    let other = app.seed_tenant("Globex").await?;

    let created = app
        .post_json(
            "/users",
            &json!({
                "firstName": "Lea",
                "lastName": "Stone",
                "email": "lea@acme.test",
                "role": "Manager",
                "password": "chosen-pass",
            }),
            Some(&tenant.admin_token),
        )
        .await?;
    assert_eq!(created.status(), StatusCode::CREATED);
    let created = body_json(created).await?;
    assert_eq!(created["role"], "Manager");
    assert_eq!(created["hasPushToken"], false);
    let lea_id = created["id"].as_str().context("missing id")?.to_string();
    assert!(app.mailer().sent_to("lea@acme.test").await.is_empty());

    let generated = app
        .post_json(
            "/users",
            &json!({
                "firstName": "Tom",
                "lastName": "Brook",
                "email": "tom@acme.test",
                "role": "User",
            }),
            Some(&tenant.admin_token),
        )
        .await?;
    assert_eq!(generated.status(), StatusCode::CREATED);
    assert_eq!(app.mailer().sent_to("tom@acme.test").await.len(), 1);

    let bad_role = app
        .post_json(
            "/users",
            &json!({ "firstName": "X", "lastName": "Y", "email": "x@acme.test", "role": "Boss" }),
            Some(&tenant.admin_token),
        )
        .await?;
    assert_eq!(bad_role.status(), StatusCode::BAD_REQUEST);

    let lea_token = app.login_token("lea@acme.test", "chosen-pass").await?;
    let listing_denied = app.get("/users", Some(&lea_token)).await?;
    assert_eq!(listing_denied.status(), StatusCode::FORBIDDEN);
    let own = app.get(&format!("/users/{lea_id}"), Some(&lea_token)).await?;
    assert_eq!(own.status(), StatusCode::OK);

    let listed = body_json(app.get("/users", Some(&tenant.admin_token)).await?).await?;
    assert_eq!(listed.as_array().map(Vec::len), Some(3));

    let hidden = app
        .get(&format!("/users/{lea_id}"), Some(&other.admin_token))
        .await?;
    assert_eq!(hidden.status(), StatusCode::NOT_FOUND);

    let updated = app
        .put_json(
            &format!("/users/{lea_id}"),
            &json!({ "role": "Collaborateur", "lastName": "Rivers" }),
            Some(&tenant.admin_token),
        )
        .await?;
    assert_eq!(updated.status(), StatusCode::OK);
    let updated = body_json(updated).await?;
    assert_eq!(updated["role"], "Collaborateur");
    assert_eq!(updated["lastName"], "Rivers");

    let taken = app
        .put_json(
            &format!("/users/{lea_id}"),
            &json!({ "email": "tom@acme.test" }),
            Some(&tenant.admin_token),
        )
        .await?;
    assert_eq!(taken.status(), StatusCode::CONFLICT);

    let demote_self = app
        .put_json(
            &format!("/users/{}", tenant.admin_id),
            &json!({ "role": "User" }),
            Some(&tenant.admin_token),
        )
        .await?;
    assert_eq!(demote_self.status(), StatusCode::BAD_REQUEST);

    let self_delete = app
        .delete(&format!("/users/{}", tenant.admin_id), Some(&tenant.admin_token))
        .await?;
    assert_eq!(self_delete.status(), StatusCode::BAD_REQUEST);

    let deleted = app
        .delete(&format!("/users/{lea_id}"), Some(&tenant.admin_token))
        .await?;
    assert_eq!(deleted.status(), StatusCode::OK);

    app.cleanup().await?;
    Ok(())
}

#[tokio::test]
async fn push_token_registration() -> Result<()> {
    let _lock = acquire_db_lock().await;
    let Some(app) = TestApp::try_new().await? else {
        return Ok(());
    };
    let tenant = app.seed_tenant("Acme").await?;
    let (_, token) = app
        .member(tenant.company_id, "phone@acme.test", Role::User)
        .await?;

    let registered = app
        .put_json("/users/me/push-token", &json!({ "pushToken": "device-1" }), Some(&token))
        .await?;
    assert_eq!(registered.status(), StatusCode::OK);
    let me = body_json(app.get("/auth/me", Some(&token)).await?).await?;
    assert_eq!(me["hasPushToken"], true);

    app.put_json("/users/me/push-token", &json!({ "pushToken": null }), Some(&token))
        .await?;
    let me = body_json(app.get("/auth/me", Some(&token)).await?).await?;
    assert_eq!(me["hasPushToken"], false);

    app.cleanup().await?;
    Ok(())
}

#[tokio::test]
async fn companies_are_tenant_scoped() -> Result<()> {
    let _lock = acquire_db_lock().await;
    let Some(app) = TestApp::try_new().await? else {
        return Ok(());
    };
    let tenant = app.seed_tenant("Acme").await?;
    let (_, user_token) = app
        .member(tenant.company_id, "user@acme.test", Role::User)
        .await?;

    let current = body_json(app.get("/companies/current", Some(&user_token)).await?).await?;
    assert_eq!(current["id"], json!(tenant.company_id));
    assert_eq!(current["name"], "Acme");

    let denied = app
        .put_json(
            "/companies/current",
            &json!({ "name": "Acme Corp", "address": "2 Main St" }),
            Some(&user_token),
        )
        .await?;
    assert_eq!(denied.status(), StatusCode::FORBIDDEN);

    let renamed = app
        .put_json(
            "/companies/current",
            &json!({ "name": "Acme Corp", "address": "2 Main St" }),
            Some(&tenant.admin_token),
        )
        .await?;
    assert_eq!(renamed.status(), StatusCode::OK);
    assert_eq!(body_json(renamed).await?["name"], "Acme Corp");

    let created = app
        .post_json(
            "/companies",
            &json!({ "name": "Initech", "address": "" }),
            Some(&tenant.admin_token),
        )
        .await?;
    assert_eq!(created.status(), StatusCode::BAD_REQUEST);

    let created = app
        .post_json(
            "/companies",
            &json!({ "name": "Initech", "address": "3 Side St" }),
            Some(&tenant.admin_token),
        )
        .await?;
    assert_eq!(created.status(), StatusCode::CREATED);

    app.cleanup().await?;
    Ok(())
}

#[tokio::test]
async fn tokens_follow_the_current_account() -> Result<()> {
    let _lock = acquire_db_lock().await;
    let Some(app) = TestApp::try_new().await? else {
        return Ok(());
    };
    let tenant = app.seed_tenant("Acme").await?;
    let (deputy_id, deputy_token) = app
        .member(tenant.company_id, "deputy@acme.test", Role::Admin)
        .await?;
    let (leaver_id, leaver_token) = app
        .member(tenant.company_id, "leaver@acme.test", Role::User)
        .await?;

    let listed = app.get("/users", Some(&deputy_token)).await?;
    assert_eq!(listed.status(), StatusCode::OK);

    let demoted = app
        .put_json(
            &format!("/users/{deputy_id}"),
            &json!({ "role": "User" }),
            Some(&tenant.admin_token),
        )
        .await?;
    assert_eq!(demoted.status(), StatusCode::OK);
    let denied = app.get("/users", Some(&deputy_token)).await?;
    assert_eq!(denied.status(), StatusCode::FORBIDDEN);

    let deleted = app
        .delete(&format!("/users/{leaver_id}"), Some(&tenant.admin_token))
        .await?;
    assert_eq!(deleted.status(), StatusCode::OK);
    let leave = json!({
        "type": "vacation",
        "startDate": "2030-01-10",
        "endDate": "2030-01-12",
    });
    let orphaned = app.post_json("/leaves", &leave, Some(&leaver_token)).await?;
    assert_eq!(orphaned.status(), StatusCode::UNAUTHORIZED);
    assert_eq!(body_json(orphaned).await?["message"], "Invalid or expired token.");

    app.cleanup().await?;
    Ok(())
}
