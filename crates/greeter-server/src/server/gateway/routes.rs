//! REST routes fronting the gRPC services.
//!
//! | Method | Path                               | RPC                        |
//! |--------|------------------------------------|----------------------------|
//! | POST   | `/v1/greeter/hello`                | `GreeterService/SayHello`  |
//! | GET    | `/v1/greeter/hello/{name}`         | `GreeterService/SayHello`  |
//! | GET    | `/v1/users/{user_id}`              | `UserService/GetUser`      |
//! | POST   | `/v1/users/validate-email`         | `UserService/ValidateEmail`|
//! | GET    | `/v1/users/{user_id}/permission`   | `UserService/CheckPermission` |
//! | GET    | `/v1/users/{user_id}/rate-limit`   | `UserService/RateLimitCheck`  |
//!
//! Bodies and replies use the proto3 JSON mapping (camelCase field names,
//! absent fields take their defaults). An empty body decodes as the default
//! message.
//!
//! Every reply outside the success path is a [`GatewayError`]: a known path
//! called with the wrong method is `NotFound`, like an unknown path, and an
//! undecodable path segment or body is `InvalidArgument`.

use super::{metadata::outbound, response::GatewayError};
use crate::server::telemetry::record_gateway_response;
use axum::{
    Json, Router,
    body::Bytes,
    extract::{
        FromRequestParts, MatchedPath, Path, Request, State,
        rejection::{BytesRejection, PathRejection},
    },
    http::{HeaderMap, Uri, request::Parts},
    middleware::{self, Next},
    response::Response,
    routing::{get, post},
};
use core::time::Duration;
use greeter_core::{
    Condition, classify,
    proto::{
        hello::{
            SayHelloRequest, SayHelloResponse, greeter_service_client::GreeterServiceClient,
        },
        user::{
            CheckPermissionRequest, CheckPermissionResponse, GetUserRequest,
            RateLimitCheckRequest, RateLimitCheckResponse, User, ValidateEmailRequest,
            ValidateEmailResponse, user_service_client::UserServiceClient,
        },
    },
};
use serde::de::DeserializeOwned;
use tonic::transport::Channel;
use tower_http::trace::TraceLayer;

type Reply<T> = Result<Json<T>, GatewayError>;

#[derive(Clone)]
struct GatewayState {
    greeter: GreeterServiceClient<Channel>,
    users: UserServiceClient<Channel>,
    call_timeout: Option<Duration>,
}

impl GatewayState {
    fn request<T>(&self, message: T, headers: &HeaderMap) -> Result<tonic::Request<T>, GatewayError> {
        Ok(outbound(message, headers, self.call_timeout)?)
    }
}

/// Builds the gateway router over a channel to the RPC transport.
///
/// Both clients share `channel`; cloning a tonic client is cheap.
pub fn router(channel: Channel, call_timeout: Option<Duration>) -> Router {
    let state = GatewayState {
        greeter: GreeterServiceClient::new(channel.clone()),
        users: UserServiceClient::new(channel),
        call_timeout,
    };

    Router::new()
        .route("/v1/greeter/hello", post(say_hello))
        .route("/v1/greeter/hello/{name}", get(say_hello_by_name))
        .route("/v1/users/validate-email", post(validate_email))
        .route("/v1/users/{user_id}", get(get_user))
        .route("/v1/users/{user_id}/permission", get(check_permission))
        .route("/v1/users/{user_id}/rate-limit", get(rate_limit_check))
        .method_not_allowed_fallback(unknown_method)
        .fallback(unknown_method)
        .layer(middleware::from_fn(record_response))
        .layer(TraceLayer::new_for_http())
        .with_state(state)
}

async fn say_hello(
    State(state): State<GatewayState>,
    headers: HeaderMap,
    body: Result<Bytes, BytesRejection>,
) -> Reply<SayHelloResponse> {
    let message: SayHelloRequest = decode(body)?;
    let reply = state
        .greeter
        .clone()
        .say_hello(state.request(message, &headers)?)
        .await?;
    Ok(Json(reply.into_inner()))
}

async fn say_hello_by_name(
    State(state): State<GatewayState>,
    PathSegment(name): PathSegment,
    headers: HeaderMap,
) -> Reply<SayHelloResponse> {
    let reply = state
        .greeter
        .clone()
        .say_hello(state.request(SayHelloRequest { name }, &headers)?)
        .await?;
    Ok(Json(reply.into_inner()))
}

async fn get_user(
    State(state): State<GatewayState>,
    PathSegment(user_id): PathSegment,
    headers: HeaderMap,
) -> Reply<User> {
    let reply = state
        .users
        .clone()
        .get_user(state.request(GetUserRequest { user_id }, &headers)?)
        .await?;
    Ok(Json(reply.into_inner()))
}

async fn validate_email(
    State(state): State<GatewayState>,
    headers: HeaderMap,
    body: Result<Bytes, BytesRejection>,
) -> Reply<ValidateEmailResponse> {
    let message: ValidateEmailRequest = decode(body)?;
    let reply = state
        .users
        .clone()
        .validate_email(state.request(message, &headers)?)
        .await?;
    Ok(Json(reply.into_inner()))
}

async fn check_permission(
    State(state): State<GatewayState>,
    PathSegment(user_id): PathSegment,
    headers: HeaderMap,
) -> Reply<CheckPermissionResponse> {
    let reply = state
        .users
        .clone()
        .check_permission(state.request(CheckPermissionRequest { user_id }, &headers)?)
        .await?;
    Ok(Json(reply.into_inner()))
}

async fn rate_limit_check(
    State(state): State<GatewayState>,
    PathSegment(user_id): PathSegment,
    headers: HeaderMap,
) -> Reply<RateLimitCheckResponse> {
    let reply = state
        .users
        .clone()
        .rate_limit_check(state.request(RateLimitCheckRequest { user_id }, &headers)?)
        .await?;
    Ok(Json(reply.into_inner()))
}

async fn unknown_method(uri: Uri) -> GatewayError {
    classify(Condition::UnknownMethod {
        path: uri.path().to_owned(),
    })
    .into()
}

async fn record_response(request: Request, next: Next) -> Response {
    let route = request
        .extensions()
        .get::<MatchedPath>()
        .map_or("unmatched", MatchedPath::as_str)
        .to_owned();
    let response = next.run(request).await;
    record_gateway_response(&route, response.status().as_u16());
    response
}

/// The single path parameter of a route, rejected as a [`GatewayError`].
struct PathSegment(String);

impl<S> FromRequestParts<S> for PathSegment
where
    S: Send + Sync,
{
    type Rejection = GatewayError;

    async fn from_request_parts(parts: &mut Parts, state: &S) -> Result<Self, Self::Rejection> {
        Path::<String>::from_request_parts(parts, state)
            .await
            .map(|Path(segment)| Self(segment))
            .map_err(malformed_path)
    }
}

fn malformed_path(rejection: PathRejection) -> GatewayError {
    tracing::debug!(%rejection, "path parameter rejected");
    classify(Condition::MalformedField { field: "path" }).into()
}

fn decode<T>(body: Result<Bytes, BytesRejection>) -> Result<T, GatewayError>
where
    T: DeserializeOwned + Default,
{
    let body = body.map_err(|err| classify(Condition::MalformedPayload(err.into())))?;
    if body.is_empty() {
        return Ok(T::default());
    }
    serde_json::from_slice(&body)
        .map_err(|err| classify(Condition::MalformedPayload(err.into())).into())
}
