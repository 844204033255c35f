use std::net::{Ipv4Addr, SocketAddr};
use std::sync::Arc;

use anyhow::Result;
use tokio::net::TcpListener;
use tokio::task::JoinHandle;

use cellproxy::{
    cli::RelayMode,
    proxy::{self, cache::CellCache},
    settings::Settings,
};

use super::dirs::TestDirs;
use super::proxy_client::ProxyClient;

fn default_test_settings(dirs: &TestDirs) -> Settings {
    Settings {
        listen: SocketAddr::from((Ipv4Addr::LOCALHOST, 0)),
        cache_dir: dirs.cache_dir.clone(),
        cache_capacity: 8,
        client_timeout: 5,
        upstream_connect_timeout: 2,
        upstream_timeout: 5,
        ..Settings::default()
    }
}

pub struct ProxyHarness {
    pub dirs: TestDirs,
    pub addr: SocketAddr,
    pub settings: Arc<Settings>,
    pub cache: Arc<CellCache>,
    handle: JoinHandle<()>,
}

impl ProxyHarness {
    pub async fn client(&self) -> Result<ProxyClient> {
        ProxyClient::connect(self.addr).await
    }

    pub async fn shutdown(self) {
        self.handle.abort();
        let _ = self.handle.await;
    }
}

pub struct ProxyHarnessBuilder {
    dirs: TestDirs,
    settings_override: Option<Box<dyn FnOnce(&mut Settings) + Send>>,
}

impl ProxyHarnessBuilder {
    pub fn new() -> Result<Self> {
        Ok(Self::with_dirs(TestDirs::new()?))
    }

    pub fn with_dirs(dirs: TestDirs) -> Self {
        Self {
            dirs,
            settings_override: None,
        }
    }

    pub fn with_settings<F>(mut self, func: F) -> Self
    where
        F: FnOnce(&mut Settings) + Send + 'static,
    {
        self.settings_override = Some(Box::new(func));
        self
    }

    pub fn persistent(self) -> Self {
        self.with_settings(|settings| settings.relay_mode = RelayMode::Persistent)
    }

    pub async fn spawn(mut self) -> Result<ProxyHarness> {
        let mut settings = default_test_settings(&self.dirs);
        if let Some(override_fn) = self.settings_override.take() {
            override_fn(&mut settings);
        }
        settings.validate()?;

        let listener = TcpListener::bind(settings.listen).await?;
        let addr = listener.local_addr()?;

        let app = cellproxy::build_app(settings).await?;
        let settings = app.settings.clone();
        let cache = app.cache.clone();

        let handle = tokio::spawn(async move {
            if let Err(err) = proxy::listener::serve(listener, app).await {
                tracing::error!(error = ?err, "proxy run failed");
            }
        });

        Ok(ProxyHarness {
            dirs: self.dirs,
            addr,
            settings,
            cache,
            handle,
        })
    }
}
