// Unless explicitly stated otherwise all files in this repository are licensed
// under the Apache License Version 2.0.
// This product includes software developed at Datadog (https://www.datadoghq.com/).
// Copyright 2026-present Datadog, Inc.

use crate::tls::{self, IssuedCertificate};
use anyhow::{Context, Result};
use log::warn;
use std::net::SocketAddr;
use tokio::net::TcpListener;
use tokio::sync::Mutex;
use tokio::task::JoinHandle;
use tokio_stream::wrappers::TcpListenerStream;
use tonic::service::RoutesBuilder;
use tonic::transport::{Channel, ClientTlsConfig, Endpoint, Server, ServerTlsConfig};

type RegisterFn = Box<dyn FnOnce(&mut RoutesBuilder) + Send>;
type ServerOption = Box<dyn FnOnce(Server) -> Server + Send>;

/// An in-process gRPC server bound to an ephemeral local port, for tests.
///
/// A server is in exactly one of three states: unstarted, started, or closed
/// (terminal). [`TestServer::new`] and [`TestServer::new_tls`] hand back a
/// started server; [`TestServer::new_unstarted`] lets the test add server
/// options first. All state transitions and accessors serialize on one
/// internal mutex, so a `TestServer` can be shared across tasks.
///
/// Setup failures (bind, certificate issuance, dialing before start) panic
/// with a descriptive message: a test cannot proceed without its fixture.
/// Errors from registered handlers or from calls against a closed server are
/// returned to the caller as ordinary `tonic` errors.
pub struct TestServer {
    inner: Mutex<Inner>,
}

struct Inner {
    register: Option<RegisterFn>,
    options: Vec<ServerOption>,
    started: bool,
    closed: bool,
    use_tls: bool,
    addr: Option<SocketAddr>,
    tls: Option<ServerTlsConfig>,
    cert: Option<IssuedCertificate>,
    client: Option<Channel>,
    serve_task: Option<JoinHandle<()>>,
}

impl TestServer {
    /// Create and start a plaintext server on a random local port.
    ///
    /// `register` is invoked once, at start, to attach service
    /// implementations to the server.
    pub async fn new(register: impl FnOnce(&mut RoutesBuilder) + Send + 'static) -> Self {
        let server = Self::new_unstarted(register);
        server.start().await;
        server
    }

    /// Create a server without starting it. The caller must call
    /// [`TestServer::start`] or [`TestServer::start_tls`] before use.
    pub fn new_unstarted(register: impl FnOnce(&mut RoutesBuilder) + Send + 'static) -> Self {
        Self {
            inner: Mutex::new(Inner {
                register: Some(Box::new(register)),
                options: Vec::new(),
                started: false,
                closed: false,
                use_tls: false,
                addr: None,
                tls: None,
                cert: None,
                client: None,
                serve_task: None,
            }),
        }
    }

    /// Create and start a TLS server with a freshly issued self-signed
    /// certificate. Clients obtained through [`TestServer::client`] trust it
    /// automatically; others can fetch it via [`TestServer::certificate`].
    pub async fn new_tls(register: impl FnOnce(&mut RoutesBuilder) + Send + 'static) -> Self {
        let server = Self::new_unstarted(register);
        server.start_tls().await;
        server
    }

    /// Append a server construction option, applied in order at start time.
    ///
    /// Options added after the server has started are never applied.
    pub async fn add_server_option(
        &self,
        option: impl FnOnce(Server) -> Server + Send + 'static,
    ) {
        let mut inner = self.inner.lock().await;
        inner.options.push(Box::new(option));
    }

    /// Start the server in plaintext mode. No-op if already started.
    ///
    /// Panics if the server is closed or cannot be started.
    pub async fn start(&self) {
        let mut inner = self.inner.lock().await;
        if inner.started {
            return;
        }
        inner.use_tls = false;
        if let Err(e) = inner.start_locked().await {
            panic!("grpctest: failed to start server: {e:#}");
        }
    }

    /// Start the server with TLS enabled. No-op if already started.
    ///
    /// Panics if the server is closed, the certificate cannot be issued, or
    /// the server cannot be started.
    pub async fn start_tls(&self) {
        let mut inner = self.inner.lock().await;
        if inner.started {
            return;
        }
        inner.use_tls = true;
        match tls::issue_certificate() {
            Ok(issued) => {
                inner.tls = Some(ServerTlsConfig::new().identity(issued.identity().clone()));
                inner.cert = Some(issued);
            }
            Err(e) => panic!("grpctest: failed to set up TLS: {e:#}"),
        }
        if let Err(e) = inner.start_locked().await {
            panic!("grpctest: failed to start server: {e:#}");
        }
    }

    /// Shut the server down and release its resources. Idempotent; safe to
    /// call on an unstarted server.
    ///
    /// The cached client channel is dropped and the accept loop is torn down
    /// hard, so in-flight and subsequent calls fail. Once this returns, no
    /// new call can reach the server.
    pub async fn close(&self) {
        let mut inner = self.inner.lock().await;
        if inner.closed {
            return;
        }
        inner.closed = true;
        inner.client = None;

        if let Some(task) = inner.serve_task.take() {
            task.abort();
            // Wait for teardown so the listener is gone when we return.
            let _ = task.await;
        }
    }

    /// The bound socket address. `None` until the server has started.
    pub async fn addr(&self) -> Option<SocketAddr> {
        self.inner.lock().await.addr
    }

    /// The server's base URL, e.g. `http://127.0.0.1:54321` (or `https` in
    /// TLS mode). Empty until the server has started.
    pub async fn url(&self) -> String {
        let inner = self.inner.lock().await;
        match inner.addr {
            Some(addr) => format!("{}://{}", inner.scheme(), addr),
            None => String::new(),
        }
    }

    /// The server-side TLS configuration. `None` for plaintext servers.
    pub async fn tls_config(&self) -> Option<ServerTlsConfig> {
        self.inner.lock().await.tls.clone()
    }

    /// The issued self-signed certificate. `None` for plaintext servers.
    pub async fn certificate(&self) -> Option<IssuedCertificate> {
        self.inner.lock().await.cert.clone()
    }

    /// A client channel to the server, configured to trust the self-signed
    /// certificate in TLS mode.
    ///
    /// The channel is dialed on first use and cached; later calls return a
    /// clone sharing the same underlying connection, which is dropped when
    /// the server closes. Panics if the server has not started or has
    /// already been closed.
    pub async fn client(&self) -> Channel {
        let mut inner = self.inner.lock().await;
        if let Some(ref client) = inner.client {
            return client.clone();
        }
        if inner.closed {
            panic!("grpctest: server already closed");
        }
        if !inner.started {
            panic!("grpctest: server not started");
        }
        match inner.dial(None).await {
            Ok(channel) => {
                inner.client = Some(channel.clone());
                channel
            }
            Err(e) => panic!("grpctest: failed to dial server: {e:#}"),
        }
    }

    /// Dial a fresh client channel, bypassing the cache.
    ///
    /// `configure` receives the prepared endpoint (TLS trust already set up
    /// in TLS mode) and can add timeouts or other endpoint settings. The
    /// returned channel is the caller's to keep alive; it is not closed with
    /// the server. Panics if the server has not started or has already been
    /// closed.
    pub async fn client_with(
        &self,
        configure: impl FnOnce(Endpoint) -> Endpoint + Send,
    ) -> Channel {
        let inner = self.inner.lock().await;
        if inner.closed {
            panic!("grpctest: server already closed");
        }
        if !inner.started {
            panic!("grpctest: server not started");
        }
        match inner.dial(Some(Box::new(configure))).await {
            Ok(channel) => channel,
            Err(e) => panic!("grpctest: failed to dial server: {e:#}"),
        }
    }
}

impl Inner {
    fn scheme(&self) -> &'static str {
        if self.use_tls { "https" } else { "http" }
    }

    /// Bind, build the server, register services, and spawn the accept loop.
    /// Caller holds the state lock and has checked `started`.
    async fn start_locked(&mut self) -> Result<()> {
        if self.closed {
            anyhow::bail!("server already closed");
        }

        let listener = TcpListener::bind("127.0.0.1:0")
            .await
            .context("failed to bind listener")?;
        let addr = listener
            .local_addr()
            .context("failed to read bound address")?;

        let mut builder = Server::builder();
        if let Some(tls) = self.tls.clone() {
            builder = builder
                .tls_config(tls)
                .context("failed to apply TLS config")?;
        }
        for option in self.options.drain(..) {
            builder = option(builder);
        }

        let mut routes = RoutesBuilder::default();
        if let Some(register) = self.register.take() {
            register(&mut routes);
        }
        let router = builder.add_routes(routes.routes());

        let task = tokio::spawn(async move {
            let incoming = TcpListenerStream::new(listener);
            if let Err(e) = router.serve_with_incoming(incoming).await {
                // Background accept-loop failures are logged, not escalated.
                warn!("grpctest: server error: {e}");
            }
        });

        self.addr = Some(addr);
        self.serve_task = Some(task);
        self.started = true;
        Ok(())
    }

    /// Dial the bound address with credentials matching the server's mode.
    async fn dial(
        &self,
        configure: Option<Box<dyn FnOnce(Endpoint) -> Endpoint + Send + '_>>,
    ) -> Result<Channel> {
        let addr = self.addr.context("no bound address")?;
        let mut endpoint = Endpoint::from_shared(format!("{}://{}", self.scheme(), addr))
            .context("invalid endpoint")?;

        if self.use_tls {
            let cert = self
                .cert
                .as_ref()
                .context("TLS server has no issued certificate")?;
            let tls = ClientTlsConfig::new()
                .ca_certificate(cert.trust_anchor())
                .domain_name("localhost");
            endpoint = endpoint
                .tls_config(tls)
                .context("failed to apply client TLS config")?;
        }
        if let Some(configure) = configure {
            endpoint = configure(endpoint);
        }

        endpoint.connect().await.context("failed to dial server")
    }
}

impl Drop for TestServer {
    fn drop(&mut self) {
        // Best effort: don't leak the accept loop if the test never closed.
        if let Ok(mut inner) = self.inner.try_lock()
            && let Some(task) = inner.serve_task.take()
        {
            task.abort();
        }
    }
}
