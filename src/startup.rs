//! Application Startup
//!
//! Application building and server initialization.

use std::net::SocketAddr;
use std::sync::Arc;

use anyhow::Result;
use axum::Router;
use tokio::net::TcpListener;
use tower_http::trace::TraceLayer;

use crate::config::Settings;
use crate::domain::ChatService;
use crate::infrastructure::InMemoryChatService;
use crate::presentation::http::{handlers::health, routes};
use crate::presentation::websocket::{Hub, HubConfig, JwtVerifier, TokenVerifier};

/// Application state shared across handlers
#[derive(Clone)]
pub struct AppState {
    pub hub: Hub,
    pub chat: Arc<dyn ChatService>,
    pub verifier: Arc<dyn TokenVerifier>,
    pub settings: Arc<Settings>,
}

impl AppState {
    /// Start a hub and wire it to the given collaborators.
    pub fn new(
        settings: Settings,
        chat: Arc<dyn ChatService>,
        verifier: Arc<dyn TokenVerifier>,
    ) -> Self {
        let hub = Hub::spawn(HubConfig {
            announce_presence: settings.websocket.announce_presence,
        });
        Self {
            hub,
            chat,
            verifier,
            settings: Arc::new(settings),
        }
    }
}

/// Application instance
pub struct Application {
    listener: TcpListener,
    router: Router,
}

impl Application {
    /// Build the application from settings
    pub async fn build(settings: Settings) -> Result<Self> {
        let chat: Arc<dyn ChatService> = Arc::new(InMemoryChatService::new(true));
        let verifier: Arc<dyn TokenVerifier> = Arc::new(JwtVerifier::new(&settings.jwt.secret));
        Self::build_with(settings, chat, verifier).await
    }

    /// Build the application around a given chat service and token verifier
    pub async fn build_with(
        settings: Settings,
        chat: Arc<dyn ChatService>,
        verifier: Arc<dyn TokenVerifier>,
    ) -> Result<Self> {
        let addr: SocketAddr = settings.server_addr().parse()?;

        health::init_server_start();
        let state = AppState::new(settings, chat, verifier);
        tracing::info!("Hub started");

        let router = routes::create_router(state).layer(TraceLayer::new_for_http());

        let listener = TcpListener::bind(addr).await?;
        tracing::info!("Listening on {}", addr);

        Ok(Self { listener, router })
    }

    /// Run the server until stopped
    pub async fn run_until_stopped(self) -> Result<()> {
        axum::serve(self.listener, self.router).await?;
        Ok(())
    }

    /// Get the bound address
    pub fn local_addr(&self) -> std::io::Result<SocketAddr> {
        self.listener.local_addr()
    }
}
