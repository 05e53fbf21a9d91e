// Unless explicitly stated otherwise all files in this repository are licensed
// under the Apache License Version 2.0.
// This product includes software developed at Datadog (https://www.datadoghq.com/).
// Copyright 2026-present Datadog, Inc.

//! Utilities for testing tonic gRPC services, in the spirit of the classic
//! HTTP test-server pattern: spin up a real server on an ephemeral local
//! port, exercise it end-to-end, tear it down when the test finishes.
//!
//! ```rust,ignore
//! let server = TestServer::new(|routes| {
//!     routes.add_service(GreeterService::new().into_server());
//! })
//! .await;
//!
//! let mut client = GreeterClient::new(server.client().await);
//! let reply = client
//!     .say_hello(HelloRequest { name: "World".into() })
//!     .await?;
//! server.close().await;
//! ```
//!
//! [`TestServer::new_tls`] does the same over TLS with a freshly issued
//! self-signed certificate; [`TestServer::client`] trusts it automatically.

pub mod helpers;
mod server;
mod tls;

pub use server::TestServer;
pub use tls::IssuedCertificate;

pub mod proto {
    pub mod hello {
        tonic::include_proto!("grpctest.hello");
    }
}
