#![allow(dead_code)]

use axum::{
    body::{to_bytes, Body},
    http::{header, HeaderMap, Method, Request, StatusCode},
    Router,
};
use chrono::Utc;
use config::AppConfig;
use domain::{Email, EmployeeId, EmployeeRecord, EmployeeRepository, EmployeeStatus};
use infrastructure::{Infrastructure, Storage};
use serde_json::Value;
use tower::ServiceExt;
use uuid::Uuid;
use web_api::{router, AppState};

pub const ADMIN_EMAIL: &str = "boss@office.com";
pub const PASSWORD: &str = "secret123";

pub struct TestApp {
    pub router: Router,
    pub state: AppState,
    pub storage: Storage,
    pub config: AppConfig,
}

pub struct TestResponse {
    pub status: StatusCode,
    pub headers: HeaderMap,
    pub body: Value,
}

impl TestResponse {
    pub fn location(&self) -> Option<&str> {
        self.headers
            .get(header::LOCATION)
            .and_then(|value| value.to_str().ok())
    }

    pub fn set_cookies(&self) -> Vec<String> {
        self.headers
            .get_all(header::SET_COOKIE)
            .iter()
            .filter_map(|value| value.to_str().ok())
            .map(str::to_owned)
            .collect()
    }
}

pub fn test_config() -> AppConfig {
    let mut config = AppConfig::default();
    config.bcrypt_cost = Some(4);
    config.access.admin_emails = vec![ADMIN_EMAIL.to_string()];
    config.messaging.heartbeat_interval_secs = 1;
    config.messaging.idle_timeout_secs = 5;
    config
}

pub fn setup() -> TestApp {
    setup_with(test_config())
}

pub fn setup_with(config: AppConfig) -> TestApp {
    let storage = Storage::in_memory();
    let infrastructure = Infrastructure::with_storage(storage.clone(), &config);
    let state = AppState::new(&config, &infrastructure);

    TestApp {
        router: router(state.clone()),
        state,
        storage,
        config,
    }
}

impl TestApp {
    /// 直接写入员工记录，绕过管理接口
    pub async fn seed_employee(&self, email: &str, status: EmployeeStatus) -> EmployeeRecord {
        let record = EmployeeRecord::pre_register(
            EmployeeId::from(Uuid::new_v4()),
            Email::parse(email).expect("email"),
            "Seeded Employee",
            None,
            status,
            Utc::now(),
        )
        .expect("record");
        self.storage
            .employees
            .create(record)
            .await
            .expect("seed employee")
    }

    pub async fn request(
        &self,
        method: Method,
        uri: &str,
        token: Option<&str>,
        body: Option<Value>,
    ) -> TestResponse {
        let mut builder = Request::builder().method(method).uri(uri);
        if let Some(token) = token {
            builder = builder.header(
                header::COOKIE,
                format!("{}={}", self.config.session.cookie_name, token),
            );
        }
        let request = match body {
            Some(body) => builder
                .header(header::CONTENT_TYPE, "application/json")
                .body(Body::from(body.to_string())),
            None => builder.body(Body::empty()),
        }
        .expect("request");

        let response = self
            .router
            .clone()
            .oneshot(request)
            .await
            .expect("router response");

        let status = response.status();
        let headers = response.headers().clone();
        let bytes = to_bytes(response.into_body(), usize::MAX)
            .await
            .expect("body bytes");
        let body = if bytes.is_empty() {
            Value::Null
        } else {
            serde_json::from_slice(&bytes).unwrap_or(Value::Null)
        };

        TestResponse {
            status,
            headers,
            body,
        }
    }

    pub async fn get(&self, uri: &str, token: Option<&str>) -> TestResponse {
        self.request(Method::GET, uri, token, None).await
    }

    pub async fn post(&self, uri: &str, token: Option<&str>, body: Value) -> TestResponse {
        self.request(Method::POST, uri, token, Some(body)).await
    }

    pub async fn signup(&self, email: &str) -> TestResponse {
        self.post(
            "/auth/signup",
            None,
            serde_json::json!({ "email": email, "password": PASSWORD }),
        )
        .await
    }

    pub async fn login(&self, email: &str) -> String {
        let response = self
            .post(
                "/auth/login",
                None,
                serde_json::json!({ "email": email, "password": PASSWORD }),
            )
            .await;
        assert_eq!(response.status, StatusCode::OK, "login failed: {}", response.body);
        response.body["data"]["token"]["value"]
            .as_str()
            .expect("token")
            .to_owned()
    }

    /// 预登记、注册并登录，返回会话令牌
    pub async fn onboard(&self, email: &str) -> String {
        self.seed_employee(email, EmployeeStatus::Pending).await;
        let response = self.signup(email).await;
        assert_eq!(response.status, StatusCode::CREATED, "signup failed: {}", response.body);
        self.login(email).await
    }

    pub async fn create_channel(&self, token: &str, name: &str) -> String {
        let response = self
            .post(
                "/channels",
                Some(token),
                serde_json::json!({ "name": name }),
            )
            .await;
        assert_eq!(response.status, StatusCode::CREATED, "create channel failed: {}", response.body);
        response.body["data"]["id"]
            .as_str()
            .expect("channel id")
            .to_owned()
    }
}
