mod support;

use axum::http::{Method, StatusCode};
use domain::EmployeeStatus;
use serde_json::json;

use support::{setup, setup_with, test_config, ADMIN_EMAIL};

#[tokio::test]
async fn health_is_public() {
    let app = setup();
    let response = app.get("/health", None).await;
    assert_eq!(response.status, StatusCode::OK);
    assert_eq!(response.body, json!({ "ok": true }));
}

#[tokio::test]
async fn protected_route_without_session_redirects_to_login_with_next() {
    let app = setup();

    let response = app.get("/channels", None).await;
    assert_eq!(response.status, StatusCode::TEMPORARY_REDIRECT);
    assert_eq!(response.location(), Some("/login?next=%2Fchannels"));

    let response = app.get("/employees", Some("not-a-token")).await;
    assert_eq!(response.status, StatusCode::TEMPORARY_REDIRECT);
    assert_eq!(response.location(), Some("/login?next=%2Femployees"));
}

#[tokio::test]
async fn login_page_never_redirects() {
    let app = setup();

    let response = app.get("/login?next=%2Fchannels", None).await;
    assert_eq!(response.status, StatusCode::OK);
    assert_eq!(response.body["data"]["next"], "/channels");

    let response = app.get("/login?next=%2F%2Fevil.example", Some("garbage")).await;
    assert_eq!(response.status, StatusCode::OK);
    assert_eq!(response.body["data"]["next"], "/");
}

#[tokio::test]
async fn non_admin_gets_admin_only() {
    let app = setup();
    let token = app.onboard("intern@office.com").await;

    let response = app.get("/employees", Some(&token)).await;
    assert_eq!(response.status, StatusCode::FORBIDDEN);
    assert_eq!(response.body, json!({ "ok": false, "message": "ADMIN_ONLY" }));

    // 同一会话重复请求得到同样的结果
    let again = app.get("/employees", Some(&token)).await;
    assert_eq!(again.status, StatusCode::FORBIDDEN);
}

#[tokio::test]
async fn admin_manages_employee_records() {
    let app = setup();
    let token = app.onboard(ADMIN_EMAIL).await;

    let created = app
        .post(
            "/employees",
            Some(&token),
            json!({ "email": " New.Hire@Office.com ", "full_name": "New Hire" }),
        )
        .await;
    assert_eq!(created.status, StatusCode::CREATED);
    assert_eq!(created.body["data"]["email"], "new.hire@office.com");
    assert_eq!(created.body["data"]["status"], "pending");
    let id = created.body["data"]["id"].as_str().unwrap().to_owned();

    let duplicate = app
        .post(
            "/employees",
            Some(&token),
            json!({ "email": "new.hire@office.com", "full_name": "Again" }),
        )
        .await;
    assert_eq!(duplicate.status, StatusCode::CONFLICT);

    let missing = app
        .post("/employees", Some(&token), json!({ "email": "x@office.com" }))
        .await;
    assert_eq!(missing.status, StatusCode::BAD_REQUEST);
    assert_eq!(missing.body["message"], "MISSING_FIELDS");

    let updated = app
        .request(
            Method::PATCH,
            &format!("/employees/{id}"),
            Some(&token),
            Some(json!({ "status": "disabled" })),
        )
        .await;
    assert_eq!(updated.status, StatusCode::OK);
    assert_eq!(updated.body["data"]["status"], "disabled");

    let empty_update = app
        .request(
            Method::PATCH,
            &format!("/employees/{id}"),
            Some(&token),
            Some(json!({})),
        )
        .await;
    assert_eq!(empty_update.status, StatusCode::BAD_REQUEST);

    let listed = app.get("/employees", Some(&token)).await;
    let emails: Vec<&str> = listed.body["data"]
        .as_array()
        .unwrap()
        .iter()
        .map(|record| record["email"].as_str().unwrap())
        .collect();
    assert_eq!(emails, vec!["new.hire@office.com", ADMIN_EMAIL]);

    let deleted = app
        .request(Method::DELETE, &format!("/employees/{id}"), Some(&token), None)
        .await;
    assert_eq!(deleted.status, StatusCode::OK);

    let deleted_again = app
        .request(Method::DELETE, &format!("/employees/{id}"), Some(&token), None)
        .await;
    assert_eq!(deleted_again.status, StatusCode::NOT_FOUND);
}

#[tokio::test]
async fn refreshed_token_is_written_back_even_when_denied() {
    let mut config = test_config();
    // 令牌一签发就落在刷新窗口内
    config.session.ttl_minutes = 10;
    config.session.refresh_window_minutes = 15;
    let app = setup_with(config);
    app.seed_employee("intern@office.com", EmployeeStatus::Pending)
        .await;
    assert_eq!(app.signup("intern@office.com").await.status, StatusCode::CREATED);
    let token = app.login("intern@office.com").await;

    let allowed = app.get("/channels", Some(&token)).await;
    assert_eq!(allowed.status, StatusCode::OK);
    assert!(allowed
        .set_cookies()
        .iter()
        .any(|cookie| cookie.starts_with("messenger_session=") && cookie.contains("HttpOnly")));

    let denied = app.get("/employees", Some(&token)).await;
    assert_eq!(denied.status, StatusCode::FORBIDDEN);
    assert!(!denied.set_cookies().is_empty());
}
