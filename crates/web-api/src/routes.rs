use axum::{
    extract::{rejection::JsonRejection, Path, Query, State},
    http::{HeaderMap, StatusCode},
    middleware,
    routing::{get, patch, post},
    Json, Router,
};
use axum_extra::extract::cookie::CookieJar;
use serde::{Deserialize, Serialize};
use tower_http::trace::TraceLayer;
use uuid::Uuid;
use validator::Validate;

use application::{
    gateway::sanitize_next, CreateChannelRequest, PreRegisterEmployeeRequest, RegisteredEmployee,
    SignupRequest,
};
use domain::{
    Channel, ChannelId, EmployeeId, EmployeeRecord, EmployeeStatus, EmployeeUpdate, Membership,
    Message, Principal, PrincipalId, SessionToken, SignupProfile,
};

use crate::{
    error::{ok, ok_empty, ApiError, Envelope},
    gateway::session_gateway,
    session::{CurrentPrincipal, MaybePrincipal},
    state::AppState,
    websocket::subscribe_channel,
};

type ApiResult<T> = Result<Json<Envelope<T>>, ApiError>;
type Created<T> = Result<(StatusCode, Json<Envelope<T>>), ApiError>;

fn validated<T: Validate>(payload: Result<Json<T>, JsonRejection>) -> Result<T, ApiError> {
    let Json(payload) = payload?;
    payload.validate()?;
    Ok(payload)
}

#[derive(Debug, Deserialize, Validate)]
struct SignupPayload {
    #[serde(default)]
    #[validate(length(min = 1))]
    email: String,
    #[serde(default)]
    #[validate(length(min = 1))]
    password: String,
    full_name: Option<String>,
    phone: Option<String>,
}

#[derive(Debug, Deserialize, Validate)]
struct LoginPayload {
    #[serde(default)]
    #[validate(length(min = 1))]
    email: String,
    #[serde(default)]
    #[validate(length(min = 1))]
    password: String,
}

#[derive(Debug, Deserialize, Validate)]
struct PreRegisterPayload {
    #[serde(default)]
    #[validate(length(min = 1))]
    email: String,
    #[serde(default)]
    #[validate(length(min = 1))]
    full_name: String,
    phone: Option<String>,
    status: Option<EmployeeStatus>,
}

#[derive(Debug, Deserialize, Validate)]
struct UpdateEmployeePayload {
    status: Option<EmployeeStatus>,
    full_name: Option<String>,
    phone: Option<String>,
}

#[derive(Debug, Deserialize, Validate)]
struct CreateChannelPayload {
    #[serde(default)]
    #[validate(length(min = 1))]
    name: String,
    #[serde(default)]
    is_private: bool,
}

#[derive(Debug, Deserialize, Validate)]
struct AddMemberPayload {
    #[serde(default)]
    #[validate(length(min = 1))]
    email: String,
}

#[derive(Debug, Deserialize, Validate)]
struct PostMessagePayload {
    #[serde(default)]
    #[validate(length(min = 1))]
    body: String,
}

#[derive(Debug, Deserialize)]
struct HistoryQuery {
    limit: Option<u32>,
    /// 只取该序列号之后的消息
    after: Option<u64>,
}

#[derive(Debug, Deserialize)]
struct LoginPageQuery {
    next: Option<String>,
}

#[derive(Debug, Serialize)]
struct LoginPage {
    next: String,
}

#[derive(Debug, Serialize)]
struct SignedUp {
    principal_id: PrincipalId,
    employee: EmployeeRecord,
}

impl From<RegisteredEmployee> for SignedUp {
    fn from(value: RegisteredEmployee) -> Self {
        Self {
            principal_id: value.principal_id,
            employee: value.employee,
        }
    }
}

#[derive(Debug, Serialize)]
struct SessionView {
    principal: Principal,
    token: SessionToken,
}

pub fn router(state: AppState) -> Router {
    Router::new()
        .route("/health", get(health))
        .route("/login", get(login_page))
        .route("/auth/signup", post(signup))
        .route("/auth/login", post(login))
        .route("/auth/logout", post(logout))
        .route("/auth/session", get(current_session))
        .route("/employees", get(list_employees).post(pre_register_employee))
        .route(
            "/employees/{employee_id}",
            patch(update_employee).delete(delete_employee),
        )
        .route("/channels", get(list_channels).post(create_channel))
        .route("/channels/{channel_id}", get(get_channel))
        .route("/channels/{channel_id}/members", post(add_channel_member))
        .route(
            "/channels/{channel_id}/messages",
            get(channel_history).post(post_message),
        )
        .route("/channels/{channel_id}/subscribe", get(subscribe_channel))
        .layer(middleware::from_fn_with_state(
            state.clone(),
            session_gateway,
        ))
        .layer(TraceLayer::new_for_http())
        .with_state(state)
}

async fn health() -> Json<Envelope<()>> {
    ok_empty()
}

async fn login_page(Query(query): Query<LoginPageQuery>) -> Json<Envelope<LoginPage>> {
    let next = query.next.as_deref().map_or("/", sanitize_next).to_owned();
    ok(LoginPage { next })
}

async fn signup(
    State(state): State<AppState>,
    payload: Result<Json<SignupPayload>, JsonRejection>,
) -> Created<SignedUp> {
    let payload = validated(payload)?;
    let registered = state
        .registration
        .register(SignupRequest {
            email: payload.email,
            password: payload.password,
            profile: SignupProfile {
                full_name: payload.full_name,
                phone: payload.phone,
            },
        })
        .await?;

    Ok((StatusCode::CREATED, ok(SignedUp::from(registered))))
}

async fn login(
    State(state): State<AppState>,
    jar: CookieJar,
    payload: Result<Json<LoginPayload>, JsonRejection>,
) -> Result<(CookieJar, Json<Envelope<SessionView>>), ApiError> {
    let payload = validated(payload)?;
    let signed_in = state
        .sessions
        .login(&payload.email, &payload.password)
        .await?;

    let jar = jar.add(state.session_cookie.issue(&signed_in.token));
    Ok((
        jar,
        ok(SessionView {
            principal: signed_in.principal,
            token: signed_in.token,
        }),
    ))
}

async fn logout(
    State(state): State<AppState>,
    headers: HeaderMap,
    jar: CookieJar,
) -> Result<(CookieJar, Json<Envelope<()>>), ApiError> {
    let credentials = state.session_cookie.credentials(&headers);
    state.sessions.logout(&credentials).await?;

    Ok((jar.remove(state.session_cookie.clear()), ok_empty()))
}

async fn current_session(MaybePrincipal(principal): MaybePrincipal) -> Json<Envelope<Principal>> {
    Json(Envelope {
        ok: principal.is_some(),
        data: principal,
    })
}

async fn list_employees(
    State(state): State<AppState>,
    CurrentPrincipal(actor): CurrentPrincipal,
) -> ApiResult<Vec<EmployeeRecord>> {
    let records = state.employees.list(&actor).await?;
    Ok(ok(records))
}

async fn pre_register_employee(
    State(state): State<AppState>,
    CurrentPrincipal(actor): CurrentPrincipal,
    payload: Result<Json<PreRegisterPayload>, JsonRejection>,
) -> Created<EmployeeRecord> {
    let payload = validated(payload)?;
    let record = state
        .employees
        .pre_register(
            &actor,
            PreRegisterEmployeeRequest {
                email: payload.email,
                full_name: payload.full_name,
                phone: payload.phone,
                status: payload.status,
            },
        )
        .await?;

    Ok((StatusCode::CREATED, ok(record)))
}

async fn update_employee(
    State(state): State<AppState>,
    CurrentPrincipal(actor): CurrentPrincipal,
    Path(employee_id): Path<Uuid>,
    payload: Result<Json<UpdateEmployeePayload>, JsonRejection>,
) -> ApiResult<EmployeeRecord> {
    let payload = validated(payload)?;
    let record = state
        .employees
        .update(
            &actor,
            EmployeeId::from(employee_id),
            EmployeeUpdate {
                status: payload.status,
                full_name: payload.full_name,
                phone: payload.phone,
            },
        )
        .await?;

    Ok(ok(record))
}

async fn delete_employee(
    State(state): State<AppState>,
    CurrentPrincipal(actor): CurrentPrincipal,
    Path(employee_id): Path<Uuid>,
) -> Result<Json<Envelope<()>>, ApiError> {
    state
        .employees
        .delete(&actor, EmployeeId::from(employee_id))
        .await?;
    Ok(ok_empty())
}

async fn list_channels(
    State(state): State<AppState>,
    CurrentPrincipal(principal): CurrentPrincipal,
) -> ApiResult<Vec<Channel>> {
    let channels = state.channels.list_channels(&principal).await?;
    Ok(ok(channels))
}

async fn create_channel(
    State(state): State<AppState>,
    CurrentPrincipal(principal): CurrentPrincipal,
    payload: Result<Json<CreateChannelPayload>, JsonRejection>,
) -> Created<Channel> {
    let payload = validated(payload)?;
    let channel = state
        .channels
        .create_channel(
            &principal,
            CreateChannelRequest {
                name: payload.name,
                is_private: payload.is_private,
            },
        )
        .await?;

    Ok((StatusCode::CREATED, ok(channel)))
}

async fn get_channel(
    State(state): State<AppState>,
    CurrentPrincipal(principal): CurrentPrincipal,
    Path(channel_id): Path<Uuid>,
) -> ApiResult<Channel> {
    let channel = state
        .channels
        .get_channel(&principal, ChannelId::from(channel_id))
        .await?;
    Ok(ok(channel))
}

async fn add_channel_member(
    State(state): State<AppState>,
    CurrentPrincipal(principal): CurrentPrincipal,
    Path(channel_id): Path<Uuid>,
    payload: Result<Json<AddMemberPayload>, JsonRejection>,
) -> Created<Membership> {
    let payload = validated(payload)?;
    let membership = state
        .channels
        .add_member(&principal, ChannelId::from(channel_id), &payload.email)
        .await?;

    Ok((StatusCode::CREATED, ok(membership)))
}

async fn channel_history(
    State(state): State<AppState>,
    CurrentPrincipal(principal): CurrentPrincipal,
    Path(channel_id): Path<Uuid>,
    Query(query): Query<HistoryQuery>,
) -> ApiResult<Vec<Message>> {
    let channel_id = ChannelId::from(channel_id);
    let messages = match query.after {
        Some(after) => {
            state
                .messages
                .history_after(&principal, channel_id, after, query.limit)
                .await?
        }
        None => {
            state
                .messages
                .history(&principal, channel_id, query.limit)
                .await?
        }
    };
    Ok(ok(messages))
}

async fn post_message(
    State(state): State<AppState>,
    CurrentPrincipal(principal): CurrentPrincipal,
    Path(channel_id): Path<Uuid>,
    payload: Result<Json<PostMessagePayload>, JsonRejection>,
) -> Created<Message> {
    let payload = validated(payload)?;
    let message = state
        .messages
        .append(&principal, ChannelId::from(channel_id), &payload.body)
        .await?;

    Ok((StatusCode::CREATED, ok(message)))
}
