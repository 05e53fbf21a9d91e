// Unless explicitly stated otherwise all files in this repository are licensed
// under the Apache License Version 2.0.
// This product includes software developed at Datadog (https://www.datadoghq.com/).
// Copyright 2026-present Datadog, Inc.

//! Ready-made service implementations for tests that don't want to write
//! their own.

use crate::proto::hello::greeter_server::{Greeter, GreeterServer};
use crate::proto::hello::{HelloReply, HelloRequest};
use std::pin::Pin;
use tokio_stream::Stream;
use tonic::{Request, Response, Status, Streaming};

/// Reply stream produced by `SayHelloStream` handlers.
pub type HelloStream = Pin<Box<dyn Stream<Item = Result<HelloReply, Status>> + Send>>;

type SayHelloHandler = Box<dyn Fn(HelloRequest) -> Result<HelloReply, Status> + Send + Sync>;
type SayHelloStreamHandler =
    Box<dyn Fn(Streaming<HelloRequest>) -> Result<HelloStream, Status> + Send + Sync>;

/// A `Greeter` implementation with pluggable handlers.
///
/// With no handler set, `SayHello` replies `"Hello {name}"` and
/// `SayHelloStream` reads the first client message and replies
/// `"hello {name}, I'm sorry I'm busy......, bye"` before closing the
/// stream. Handy for exercising interceptors or transport settings without
/// boilerplate service code.
#[derive(Default)]
pub struct GreeterService {
    say_hello: Option<SayHelloHandler>,
    say_hello_stream: Option<SayHelloStreamHandler>,
}

impl GreeterService {
    /// A greeter with the default replies.
    pub fn new() -> Self {
        Self::default()
    }

    /// A greeter whose `SayHello` delegates to `handler`.
    pub fn with_say_hello(
        handler: impl Fn(HelloRequest) -> Result<HelloReply, Status> + Send + Sync + 'static,
    ) -> Self {
        Self {
            say_hello: Some(Box::new(handler)),
            say_hello_stream: None,
        }
    }

    /// A greeter whose `SayHelloStream` delegates to `handler`.
    ///
    /// The handler receives the inbound request stream and returns the
    /// reply stream (see [`HelloStream`]).
    pub fn with_say_hello_stream(
        handler: impl Fn(Streaming<HelloRequest>) -> Result<HelloStream, Status>
        + Send
        + Sync
        + 'static,
    ) -> Self {
        Self {
            say_hello: None,
            say_hello_stream: Some(Box::new(handler)),
        }
    }

    /// Wrap into the generated tonic service, ready for registration.
    pub fn into_server(self) -> GreeterServer<Self> {
        GreeterServer::new(self)
    }
}

#[tonic::async_trait]
impl Greeter for GreeterService {
    async fn say_hello(
        &self,
        request: Request<HelloRequest>,
    ) -> Result<Response<HelloReply>, Status> {
        let req = request.into_inner();
        match self.say_hello {
            Some(ref handler) => handler(req).map(Response::new),
            None => Ok(Response::new(HelloReply {
                message: format!("Hello {}", req.name),
            })),
        }
    }

    type SayHelloStreamStream = HelloStream;

    async fn say_hello_stream(
        &self,
        request: Request<Streaming<HelloRequest>>,
    ) -> Result<Response<Self::SayHelloStreamStream>, Status> {
        let mut stream = request.into_inner();
        if let Some(ref handler) = self.say_hello_stream {
            return handler(stream).map(Response::new);
        }
        let first = stream
            .message()
            .await?
            .ok_or_else(|| Status::invalid_argument("expected at least one message"))?;
        let reply = HelloReply {
            message: format!("hello {}, I'm sorry I'm busy......, bye", first.name),
        };
        let replies: HelloStream = Box::pin(tokio_stream::once(Ok(reply)));
        Ok(Response::new(replies))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn test_default_say_hello() {
        let svc = GreeterService::new();
        let reply = svc
            .say_hello(Request::new(HelloRequest {
                name: "World".into(),
            }))
            .await
            .unwrap()
            .into_inner();
        assert_eq!(reply.message, "Hello World");
    }

    #[tokio::test]
    async fn test_custom_say_hello_handler() {
        let svc = GreeterService::with_say_hello(|req| {
            Ok(HelloReply {
                message: format!("hi {}", req.name),
            })
        });
        let reply = svc
            .say_hello(Request::new(HelloRequest { name: "you".into() }))
            .await
            .unwrap()
            .into_inner();
        assert_eq!(reply.message, "hi you");
    }

    #[tokio::test]
    async fn test_handler_error_passthrough() {
        let svc =
            GreeterService::with_say_hello(|_| Err(Status::permission_denied("not today")));
        let err = svc
            .say_hello(Request::new(HelloRequest::default()))
            .await
            .unwrap_err();
        assert_eq!(err.code(), tonic::Code::PermissionDenied);
    }
}
