// Interceptors wrapping the terminal handler

use super::context::RequestContext;
use crate::di::{short_type_name, Args, Injectable, Injector, Instance, Provider, Token};
use crate::error::{DiError, Error};
use crate::http::HttpResponse;
use async_trait::async_trait;
use futures_util::future::BoxFuture;
use std::marker::PhantomData;
use std::sync::Arc;
use std::time::Instant;
use tracing::debug;

/// Interceptor trait for request/response transformation
///
/// An interceptor runs code around the rest of the chain by calling
/// [`Next::run`], or short-circuits by returning without calling it.
#[async_trait]
pub trait Interceptor: Send + Sync + 'static {
    async fn intercept(&self, ctx: RequestContext, next: Next) -> Result<HttpResponse, Error>;
}

pub(crate) type Terminal =
    dyn Fn(RequestContext) -> BoxFuture<'static, Result<HttpResponse, Error>> + Send + Sync;

/// The remainder of the interceptor chain.
pub struct Next {
    chain: Arc<[Arc<dyn Interceptor>]>,
    index: usize,
    terminal: Arc<Terminal>,
}

impl Next {
    pub(crate) fn new(chain: Arc<[Arc<dyn Interceptor>]>, terminal: Arc<Terminal>) -> Self {
        Self {
            chain,
            index: 0,
            terminal,
        }
    }

    /// Run the next interceptor, or the handler once the chain is exhausted.
    pub fn run(self, ctx: RequestContext) -> BoxFuture<'static, Result<HttpResponse, Error>> {
        match self.chain.get(self.index).cloned() {
            Some(interceptor) => {
                let next = Next {
                    chain: self.chain,
                    index: self.index + 1,
                    terminal: self.terminal,
                };
                Box::pin(async move { interceptor.intercept(ctx, next).await })
            }
            None => (self.terminal)(ctx),
        }
    }
}

pub(crate) struct InterceptorInstance(pub(crate) Arc<dyn Interceptor>);

struct InterceptorSlot<I>(PhantomData<I>);

/// An interceptor declaration.
#[derive(Clone)]
pub struct InterceptorItem {
    provider: Provider,
    name: String,
}

impl InterceptorItem {
    pub fn of<I: Interceptor + Injectable>() -> Self {
        let token = Token::of::<InterceptorSlot<I>>();
        let provider = Provider::factory(token, I::dependencies(), |args| {
            let interceptor = I::construct(args)?;
            Ok(Arc::new(InterceptorInstance(Arc::new(interceptor))) as Instance)
        });
        Self {
            provider,
            name: short_type_name(std::any::type_name::<I>()),
        }
    }

    pub fn instance<I: Interceptor>(interceptor: I) -> Self {
        let name = short_type_name(std::any::type_name::<I>());
        let provider = Provider::value(
            Token::named(format!("interceptor {name}")),
            InterceptorInstance(Arc::new(interceptor)),
        );
        Self { provider, name }
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn token(&self) -> &Token {
        self.provider.token()
    }

    pub(crate) fn provider(&self) -> &Provider {
        &self.provider
    }

    pub(crate) fn resolve(&self, injector: &Injector) -> Result<Arc<dyn Interceptor>, Error> {
        Ok(injector.get_by::<InterceptorInstance>(self.token())?.0.clone())
    }
}

/// Logs method, path, status and latency of every request.
pub struct LoggingInterceptor;

impl Injectable for LoggingInterceptor {
    fn construct(_args: &mut Args) -> Result<Self, DiError> {
        Ok(LoggingInterceptor)
    }
}

#[async_trait]
impl Interceptor for LoggingInterceptor {
    async fn intercept(&self, ctx: RequestContext, next: Next) -> Result<HttpResponse, Error> {
        let start = Instant::now();
        let method = ctx.request().method.clone();
        let path = ctx.request().path.clone();
        let request_id = ctx.request_id().to_string();

        let result = next.run(ctx).await;

        let elapsed = start.elapsed();
        match &result {
            Ok(response) => debug!(
                %method, %path, %request_id, status = response.status, ?elapsed,
                "Request completed"
            ),
            Err(error) => debug!(
                %method, %path, %request_id, error = %error, ?elapsed,
                "Request failed"
            ),
        }
        result
    }
}

/// Transform interceptor for modifying responses
pub struct TransformInterceptor<F> {
    transform: F,
}

impl<F> TransformInterceptor<F>
where
    F: Fn(HttpResponse) -> HttpResponse + Send + Sync + 'static,
{
    pub fn new(transform: F) -> Self {
        Self { transform }
    }
}

#[async_trait]
impl<F> Interceptor for TransformInterceptor<F>
where
    F: Fn(HttpResponse) -> HttpResponse + Send + Sync + 'static,
{
    async fn intercept(&self, ctx: RequestContext, next: Next) -> Result<HttpResponse, Error> {
        let response = next.run(ctx).await?;
        Ok((self.transform)(response))
    }
}
