//! gRPC service implementation for greetings and user lookups.
//!
//! [`ServiceHandler`] implements both [`GreeterService`] and [`UserService`].
//! The inherent methods hold the business rules and return
//! [`ClassifiedError`]s; the trait impls are thin adapters that unwrap the
//! request, log, record metrics, and convert the classification into a
//! [`Status`].
//!
//! ## Decision order for lookups
//!
//! 1. Ask the collaborator.
//! 2. `LookupError::NotFound` becomes `NotFound`. This is matched before the
//!    generic failure arm so absence is never reported as `Internal`.
//! 3. Any other collaborator failure becomes an opaque `Internal`.
//! 4. A record that fails its structural checks becomes `InvalidArgument`.
//! 5. Otherwise the call succeeds.
//!
//! The handler keeps no mutable state of its own. Cancellation is by drop:
//! when the transport abandons a call, the in-flight collaborator future is
//! dropped with it.

use crate::server::{
    domain::{LookupError, PermissionOracle, RateLimiter, UserStore},
    telemetry::record_rpc,
};
use core::time::Duration;
use greeter_core::{
    ClassifiedError, Condition, ErrorCategory, classify,
    proto::{
        hello::{SayHelloRequest, SayHelloResponse, greeter_service_server::GreeterService},
        user::{
            self, CheckPermissionRequest, CheckPermissionResponse, GetUserRequest,
            RateLimitCheckRequest, RateLimitCheckResponse, ValidateEmailRequest,
            ValidateEmailResponse, user_service_server::UserService,
        },
    },
    types::User,
};
use std::sync::Arc;
use tokio::time::Instant;
use tonic::{Request, Response, Status};

const USER: &str = "user";

/// Implements the greeter and user services on top of injected collaborators.
///
/// Cloning is cheap; all clones share the same collaborators.
#[derive(Clone)]
pub struct ServiceHandler {
    users: Arc<dyn UserStore>,
    permissions: Arc<dyn PermissionOracle>,
    rate_limiter: Arc<dyn RateLimiter>,
}

impl ServiceHandler {
    pub fn new(
        users: Arc<dyn UserStore>,
        permissions: Arc<dyn PermissionOracle>,
        rate_limiter: Arc<dyn RateLimiter>,
    ) -> Self {
        Self {
            users,
            permissions,
            rate_limiter,
        }
    }

    pub fn say_hello(&self, name: &str) -> String {
        format!("Hello, {name}!")
    }

    /// Looks up a user by ID.
    ///
    /// # Errors
    ///
    /// - `InvalidArgument` if `id` is empty or the stored record is malformed.
    /// - `NotFound` if no user has this ID.
    /// - `Internal` if the store fails.
    pub async fn get_user(&self, id: &str) -> Result<User, ClassifiedError> {
        require(id, "user_id")?;

        let user = self
            .users
            .find_user(id)
            .await
            .map_err(|e| lookup_failure(id, e))?;

        if !user.is_well_formed_for(id) {
            return Err(classify(Condition::MalformedRecord { resource: USER }));
        }

        Ok(user)
    }

    /// Checks that `email` is present and shaped like `local@domain`.
    ///
    /// # Errors
    ///
    /// `InvalidArgument` with `email is required` or `email is malformed`.
    pub fn validate_email(&self, email: &str) -> Result<(), ClassifiedError> {
        require(email, "email")?;

        let mut parts = email.split('@');
        match (parts.next(), parts.next(), parts.next()) {
            (Some(local), Some(domain), None) if !local.is_empty() && !domain.is_empty() => Ok(()),
            _ => Err(classify(Condition::MalformedField { field: "email" })),
        }
    }

    /// # Errors
    ///
    /// `PermissionDenied` when the oracle refuses, otherwise the lookup
    /// classifications of [`ServiceHandler::get_user`].
    pub async fn check_permission(&self, user_id: &str) -> Result<(), ClassifiedError> {
        require(user_id, "user_id")?;

        let granted = self
            .permissions
            .has_permission(user_id)
            .await
            .map_err(|e| lookup_failure(user_id, e))?;

        if granted {
            Ok(())
        } else {
            Err(classify(Condition::PermissionDenied))
        }
    }

    /// Records one call against the user's quota.
    ///
    /// # Errors
    ///
    /// `ResourceExhausted` once the quota is used up, otherwise the lookup
    /// classifications of [`ServiceHandler::get_user`].
    pub async fn rate_limit_check(&self, user_id: &str) -> Result<(), ClassifiedError> {
        require(user_id, "user_id")?;

        let exceeded = self
            .rate_limiter
            .check(user_id)
            .await
            .map_err(|e| lookup_failure(user_id, e))?;

        if exceeded {
            Err(classify(Condition::QuotaExceeded))
        } else {
            Ok(())
        }
    }
}

fn require(value: &str, field: &'static str) -> Result<(), ClassifiedError> {
    if value.is_empty() {
        Err(classify(Condition::MissingField { field }))
    } else {
        Ok(())
    }
}

fn lookup_failure(id: &str, err: LookupError) -> ClassifiedError {
    match err {
        LookupError::NotFound => classify(Condition::RecordAbsent {
            resource: USER,
            id: id.to_string(),
        }),
        LookupError::Backend(cause) => classify(Condition::Fault(cause)),
    }
}

/// Logs and records the outcome of one RPC, then encodes it for the wire.
fn finish<T>(
    method: &'static str,
    started: Instant,
    outcome: Result<T, ClassifiedError>,
) -> Result<Response<T>, Status> {
    let elapsed = started.elapsed();
    match outcome {
        Ok(body) => {
            record_rpc(method, ErrorCategory::Success, elapsed);
            Ok(Response::new(body))
        }
        Err(err) => {
            log_failure(method, &err, elapsed);
            record_rpc(method, err.category(), elapsed);
            Err(err.into())
        }
    }
}

fn log_failure(method: &'static str, err: &ClassifiedError, elapsed: Duration) {
    let category = err.category();
    match (category, err.cause()) {
        (ErrorCategory::Internal, Some(cause)) => {
            tracing::error!(method, %category, ?elapsed, error = %cause, "call failed");
        }
        (ErrorCategory::Internal, None) => {
            tracing::error!(method, %category, ?elapsed, "call failed");
        }
        _ => {
            tracing::debug!(method, %category, ?elapsed, reason = err.message(), "call rejected");
        }
    }
}

#[tonic::async_trait]
impl GreeterService for ServiceHandler {
    #[tracing::instrument(skip_all, fields(name = %req.get_ref().name))]
    async fn say_hello(
        &self,
        req: Request<SayHelloRequest>,
    ) -> Result<Response<SayHelloResponse>, Status> {
        let started = Instant::now();
        let message = ServiceHandler::say_hello(self, &req.get_ref().name);
        finish("SayHello", started, Ok(SayHelloResponse { message }))
    }
}

#[tonic::async_trait]
impl UserService for ServiceHandler {
    #[tracing::instrument(skip_all, fields(user_id = %req.get_ref().user_id))]
    async fn get_user(&self, req: Request<GetUserRequest>) -> Result<Response<user::User>, Status> {
        let started = Instant::now();
        let outcome = ServiceHandler::get_user(self, &req.get_ref().user_id)
            .await
            .map(user::User::from);
        finish("GetUser", started, outcome)
    }

    #[tracing::instrument(skip_all)]
    async fn validate_email(
        &self,
        req: Request<ValidateEmailRequest>,
    ) -> Result<Response<ValidateEmailResponse>, Status> {
        let started = Instant::now();
        let outcome = ServiceHandler::validate_email(self, &req.get_ref().email)
            .map(|()| ValidateEmailResponse {});
        finish("ValidateEmail", started, outcome)
    }

    #[tracing::instrument(skip_all, fields(user_id = %req.get_ref().user_id))]
    async fn check_permission(
        &self,
        req: Request<CheckPermissionRequest>,
    ) -> Result<Response<CheckPermissionResponse>, Status> {
        let started = Instant::now();
        let outcome = ServiceHandler::check_permission(self, &req.get_ref().user_id)
            .await
            .map(|()| CheckPermissionResponse {});
        finish("CheckPermission", started, outcome)
    }

    #[tracing::instrument(skip_all, fields(user_id = %req.get_ref().user_id))]
    async fn rate_limit_check(
        &self,
        req: Request<RateLimitCheckRequest>,
    ) -> Result<Response<RateLimitCheckResponse>, Status> {
        let started = Instant::now();
        let outcome = ServiceHandler::rate_limit_check(self, &req.get_ref().user_id)
            .await
            .map(|()| RateLimitCheckResponse {});
        finish("RateLimitCheck", started, outcome)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::server::domain::{FixedWindowRateLimiter, InMemoryUserStore, StaticPermissions};
    use greeter_core::INTERNAL_MESSAGE;
    use std::io;

    /// A collaborator that always answers with the same outcome.
    #[derive(Clone, Copy)]
    enum Canned {
        Yes,
        No,
        Missing,
        Broken,
    }

    impl Canned {
        fn answer(self) -> Result<bool, LookupError> {
            match self {
                Canned::Yes => Ok(true),
                Canned::No => Ok(false),
                Canned::Missing => Err(LookupError::NotFound),
                Canned::Broken => Err(LookupError::backend(io::Error::new(
                    io::ErrorKind::ConnectionRefused,
                    "dial tcp 10.1.2.3:5432: connection refused",
                ))),
            }
        }
    }

    #[tonic::async_trait]
    impl PermissionOracle for Canned {
        async fn has_permission(&self, _: &str) -> Result<bool, LookupError> {
            self.answer()
        }
    }

    #[tonic::async_trait]
    impl RateLimiter for Canned {
        async fn check(&self, _: &str) -> Result<bool, LookupError> {
            self.answer()
        }
    }

    struct BrokenStore;

    #[tonic::async_trait]
    impl UserStore for BrokenStore {
        async fn find_user(&self, _: &str) -> Result<User, LookupError> {
            Err(LookupError::backend("connection reset by peer"))
        }
    }

    fn user(id: &str, email: &str) -> User {
        User {
            id: id.to_string(),
            name: "Ada".to_string(),
            email: email.to_string(),
            created_at: "2024-01-01T00:00:00Z".to_string(),
        }
    }

    fn handler_with(
        users: impl UserStore,
        permissions: impl PermissionOracle,
        limiter: impl RateLimiter,
    ) -> ServiceHandler {
        ServiceHandler::new(Arc::new(users), Arc::new(permissions), Arc::new(limiter))
    }

    fn default_handler() -> ServiceHandler {
        handler_with(InMemoryUserStore::seeded(), Canned::No, Canned::No)
    }

    #[test]
    fn greets_by_name() {
        assert_eq!(default_handler().say_hello("World"), "Hello, World!");
    }

    #[tokio::test]
    async fn get_user_returns_stored_record() {
        let found = default_handler().get_user("1").await.unwrap();
        assert_eq!(found.email, "ada@example.com");
    }

    #[tokio::test]
    async fn get_user_missing_is_not_found() {
        let err = default_handler().get_user("missing").await.unwrap_err();
        assert_eq!(err.category(), ErrorCategory::NotFound);
        assert!(err.message().contains("missing"));
    }

    #[tokio::test]
    async fn get_user_backend_fault_is_opaque_internal() {
        let handler = handler_with(BrokenStore, Canned::No, Canned::No);
        let err = handler.get_user("1").await.unwrap_err();
        assert_eq!(err.category(), ErrorCategory::Internal);
        assert_eq!(err.message(), INTERNAL_MESSAGE);
        assert!(err.cause().is_some());
    }

    #[tokio::test]
    async fn get_user_rejects_malformed_records() {
        // Answers every lookup with the same record, whatever id was asked for.
        struct FixedStore(User);

        #[tonic::async_trait]
        impl UserStore for FixedStore {
            async fn find_user(&self, _: &str) -> Result<User, LookupError> {
                Ok(self.0.clone())
            }
        }

        let cases = [
            (FixedStore(user("2", "ada@example.com")), "3"),
            (FixedStore(user("1", "")), "1"),
        ];
        for (store, id) in cases {
            let handler = handler_with(store, Canned::No, Canned::No);
            let err = handler.get_user(id).await.unwrap_err();
            assert_eq!(err.category(), ErrorCategory::InvalidArgument, "{id}");
            assert_eq!(err.message(), "invalid user data");
        }
    }

    #[tokio::test]
    async fn get_user_requires_an_id() {
        let err = default_handler().get_user("").await.unwrap_err();
        assert_eq!(err.category(), ErrorCategory::InvalidArgument);
        assert_eq!(err.message(), "user_id is required");
    }

    #[test]
    fn validate_email_rules() {
        let handler = default_handler();
        assert!(handler.validate_email("ada@example.com").is_ok());

        let err = handler.validate_email("").unwrap_err();
        assert_eq!(err.category(), ErrorCategory::InvalidArgument);
        assert_eq!(err.message(), "email is required");

        for bad in ["ada", "@example.com", "ada@", "a@b@c"] {
            let err = handler.validate_email(bad).unwrap_err();
            assert_eq!(err.category(), ErrorCategory::InvalidArgument, "{bad}");
            assert_eq!(err.message(), "email is malformed");
        }
    }

    #[tokio::test]
    async fn permission_outcomes() {
        let cases = [
            (Canned::Yes, None),
            (Canned::No, Some(ErrorCategory::PermissionDenied)),
            (Canned::Missing, Some(ErrorCategory::NotFound)),
            (Canned::Broken, Some(ErrorCategory::Internal)),
        ];
        for (oracle, expected) in cases {
            let handler = handler_with(InMemoryUserStore::default(), oracle, Canned::No);
            let got = handler.check_permission("1").await.err().map(|e| e.category());
            assert_eq!(got, expected);
        }
    }

    #[tokio::test]
    async fn rate_limit_outcomes() {
        let cases = [
            (Canned::No, None),
            (Canned::Yes, Some(ErrorCategory::ResourceExhausted)),
            (Canned::Missing, Some(ErrorCategory::NotFound)),
            (Canned::Broken, Some(ErrorCategory::Internal)),
        ];
        for (limiter, expected) in cases {
            let handler = handler_with(InMemoryUserStore::default(), Canned::No, limiter);
            let got = handler.rate_limit_check("1").await.err().map(|e| e.category());
            assert_eq!(got, expected);
        }
    }

    #[tokio::test]
    async fn bundled_collaborators_deny_and_throttle() {
        let handler = handler_with(
            InMemoryUserStore::seeded(),
            StaticPermissions::default(),
            FixedWindowRateLimiter::new(1, Duration::from_secs(60)),
        );

        let denied = handler.check_permission("1").await.unwrap_err();
        assert_eq!(denied.message(), "caller does not have permission");

        assert!(handler.rate_limit_check("1").await.is_ok());
        let throttled = handler.rate_limit_check("1").await.unwrap_err();
        assert_eq!(throttled.category(), ErrorCategory::ResourceExhausted);
    }

    #[tokio::test]
    async fn trait_methods_encode_status_codes() {
        let handler = default_handler();

        let reply = GreeterService::say_hello(
            &handler,
            Request::new(SayHelloRequest {
                name: "World".to_string(),
            }),
        )
        .await
        .unwrap();
        assert_eq!(reply.get_ref().message, "Hello, World!");

        let status = UserService::get_user(
            &handler,
            Request::new(GetUserRequest {
                user_id: "missing".to_string(),
            }),
        )
        .await
        .unwrap_err();
        assert_eq!(status.code(), tonic::Code::NotFound);
        assert_eq!(status.message(), "user missing not found");

        let status = UserService::validate_email(
            &handler,
            Request::new(ValidateEmailRequest {
                email: String::new(),
            }),
        )
        .await
        .unwrap_err();
        assert_eq!(status.code(), tonic::Code::InvalidArgument);
        assert_eq!(status.message(), "email is required");
    }
}
