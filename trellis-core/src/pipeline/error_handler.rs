// Per-route conversion of request-time errors into responses

use super::context::RequestContext;
use crate::config::ApplicationOptions;
use crate::di::{Dependency, Instance, Provider, Token};
use crate::error::Error;
use crate::http::HttpResponse;
use crate::logging::LogMediatorRef;
use async_trait::async_trait;
use serde_json::json;
use std::sync::Arc;

/// Turns an error raised by a guard, interceptor or handler into a response.
///
/// Swap it for a module by providing an [`ErrorHandlerRef`] in that module's
/// Module or Route scope.
#[async_trait]
pub trait HttpErrorHandler: Send + Sync + 'static {
    async fn handle(&self, error: &Error, ctx: &RequestContext) -> HttpResponse;
}

/// Injectable handle to the active error handler.
#[derive(Clone)]
pub struct ErrorHandlerRef(pub Arc<dyn HttpErrorHandler>);

impl ErrorHandlerRef {
    pub fn new(handler: impl HttpErrorHandler) -> Self {
        Self(Arc::new(handler))
    }

    /// Provider binding `Token::of::<ErrorHandlerRef>()` to `handler`.
    pub fn provider(handler: impl HttpErrorHandler) -> Provider {
        Provider::value_of(Self::new(handler))
    }
}

/// Logs the failure and answers with the error's status. Server errors keep
/// their message to the log unless `expose_error_details` is set.
pub struct DefaultErrorHandler {
    expose_details: bool,
    log: LogMediatorRef,
}

impl DefaultErrorHandler {
    pub fn new(expose_details: bool, log: LogMediatorRef) -> Self {
        Self { expose_details, log }
    }

    /// Provider of the default [`ErrorHandlerRef`], built from the
    /// application options and log mediator.
    pub fn provider() -> Provider {
        Provider::factory(
            Token::of::<ErrorHandlerRef>(),
            vec![
                Dependency::of::<ApplicationOptions>(),
                Dependency::of::<LogMediatorRef>(),
            ],
            |args| {
                let options = args.next::<ApplicationOptions>()?;
                let log = args.next::<LogMediatorRef>()?;
                let handler = DefaultErrorHandler::new(options.expose_error_details, (*log).clone());
                Ok(Arc::new(ErrorHandlerRef::new(handler)) as Instance)
            },
        )
    }
}

#[async_trait]
impl HttpErrorHandler for DefaultErrorHandler {
    async fn handle(&self, error: &Error, ctx: &RequestContext) -> HttpResponse {
        let status = error.status_code();
        self.log.request_failed(ctx, error, status);

        let message = if error.is_client_error() || self.expose_details {
            error.to_string()
        } else {
            "Internal server error".to_string()
        };
        let body = json!({
            "statusCode": status,
            "message": message,
            "requestId": ctx.request_id(),
        });
        HttpResponse::new(status)
            .with_json(&body)
            .unwrap_or_else(|_| HttpResponse::new(status))
    }
}
