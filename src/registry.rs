use std::collections::HashMap;
use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;

use bytes::Bytes;
use tokio::sync::{watch, Mutex, RwLock};
use tokio::task::JoinHandle;
use tracing::{error, info, warn};

use crate::capture::{CameraSource, CameraState, CaptureBackend};
use crate::config::{self, CameraEntry, ServerConfig, DEFAULT_START_PORT};
use crate::discovery::{self, DiscoveredDevice};
use crate::errors::{CameraServerError, Result};
use crate::health::{self, HealthSummary};
use crate::stream;

/// How long shutdown waits for a per-camera listener to drain.
const LISTENER_SHUTDOWN_TIMEOUT: Duration = Duration::from_secs(5);

struct ListenerHandle {
    shutdown: watch::Sender<bool>,
    task: JoinHandle<()>,
}

/// The running set of cameras plus the configuration it was built from.
///
/// All mutations (applying a new configuration, restarting or removing a
/// camera, discovery) go through `ops_lock`, so the running set never
/// changes mid-operation and discovery never opens a device while cameras
/// are being torn down or brought up.
pub struct CameraRegistry {
    backend: Arc<dyn CaptureBackend>,
    config_path: PathBuf,
    config: RwLock<ServerConfig>,
    sources: RwLock<HashMap<String, Arc<CameraSource>>>,
    /// Cameras that are configured but whose device failed to open, with
    /// the open error. Surfaced through health instead of failing startup.
    failures: RwLock<HashMap<String, String>>,
    listeners: Mutex<HashMap<String, ListenerHandle>>,
    ops_lock: Mutex<()>,
    /// When false, no per-camera HTTP listeners are bound. Tests run with
    /// this off so they never contend for real ports.
    serve_camera_ports: bool,
}

impl CameraRegistry {
    pub fn new(
        backend: Arc<dyn CaptureBackend>,
        config_path: PathBuf,
        config: ServerConfig,
        serve_camera_ports: bool,
    ) -> Self {
        Self {
            backend,
            config_path,
            config: RwLock::new(config),
            sources: RwLock::new(HashMap::new()),
            failures: RwLock::new(HashMap::new()),
            listeners: Mutex::new(HashMap::new()),
            ops_lock: Mutex::new(()),
            serve_camera_ports,
        }
    }

    /// Bring up every camera in the loaded configuration. A document that
    /// fails validation (hand-edited duplicates, out-of-range controls)
    /// refuses startup the same way a rejected update would.
    pub async fn start(self: &Arc<Self>) -> Result<()> {
        let _ops = self.ops_lock.lock().await;
        let cameras = {
            let mut config = self.config.write().await;
            config::validate_entries(&config.cameras)?;
            config.cameras = config::assign_ports(&config.cameras, DEFAULT_START_PORT);
            config.cameras.clone()
        };
        for entry in cameras {
            self.start_camera(entry).await;
        }
        Ok(())
    }

    async fn start_camera(self: &Arc<Self>, entry: CameraEntry) {
        let backend = self.backend.clone();
        let open_entry = entry.clone();
        let opened =
            tokio::task::spawn_blocking(move || CameraSource::open(&open_entry, backend.as_ref()))
                .await;

        match opened {
            Ok(Ok(source)) => {
                self.failures.write().await.remove(&entry.id);
                self.sources
                    .write()
                    .await
                    .insert(entry.id.clone(), Arc::new(source));
                if self.serve_camera_ports {
                    self.spawn_listener(entry).await;
                }
            }
            Ok(Err(e)) => {
                error!("Failed to start camera '{}': {}", entry.id, e);
                self.failures
                    .write()
                    .await
                    .insert(entry.id.clone(), e.to_string());
            }
            Err(e) => {
                error!("Camera '{}' startup task panicked: {}", entry.id, e);
                self.failures
                    .write()
                    .await
                    .insert(entry.id.clone(), "startup failed".to_string());
            }
        }
    }

    /// Bind the camera's dedicated port and serve its video endpoints
    /// until the registry shuts it down.
    async fn spawn_listener(self: &Arc<Self>, entry: CameraEntry) {
        let host = self.config.read().await.host.clone();
        let port = entry.port.unwrap_or(DEFAULT_START_PORT);
        let addr = format!("{}:{}", host, port);
        let (shutdown_tx, mut shutdown_rx) = watch::channel(false);

        let registry = self.clone();
        let camera_id = entry.id.clone();
        let task = tokio::spawn(async move {
            let listener = match tokio::net::TcpListener::bind(&addr).await {
                Ok(listener) => listener,
                Err(e) => {
                    error!("Camera '{}': could not bind {}: {}", camera_id, addr, e);
                    return;
                }
            };
            info!("Camera '{}' serving on http://{}", camera_id, addr);
            let app = crate::handlers::camera_router(registry, camera_id.clone());
            let shutdown = async move {
                let _ = shutdown_rx.changed().await;
            };
            if let Err(e) = axum::serve(listener, app)
                .with_graceful_shutdown(shutdown)
                .await
            {
                error!("Camera '{}' listener failed: {}", camera_id, e);
            }
        });

        self.listeners.lock().await.insert(
            entry.id,
            ListenerHandle {
                shutdown: shutdown_tx,
                task,
            },
        );
    }

    async fn stop_listener(&self, handle: ListenerHandle) {
        let _ = handle.shutdown.send(true);
        let mut task = handle.task;
        if tokio::time::timeout(LISTENER_SHUTDOWN_TIMEOUT, &mut task)
            .await
            .is_err()
        {
            warn!("Camera listener did not drain in time, aborting");
            task.abort();
        }
    }

    async fn stop_camera(&self, id: &str) {
        if let Some(handle) = self.listeners.lock().await.remove(id) {
            self.stop_listener(handle).await;
        }
        let source = self.sources.write().await.remove(id);
        if let Some(source) = source {
            // stop() joins the capture thread; keep it off the async runtime.
            let _ = tokio::task::spawn_blocking(move || source.stop()).await;
        }
        self.failures.write().await.remove(id);
    }

    async fn stop_all(&self) {
        let ids: Vec<String> = {
            let sources = self.sources.read().await;
            let listeners = self.listeners.lock().await;
            sources.keys().chain(listeners.keys()).cloned().collect()
        };
        for id in ids {
            self.stop_camera(&id).await;
        }
        self.failures.write().await.clear();
    }

    /// Replace the configuration and the running set in one step.
    ///
    /// Validation and persistence both happen before anything is torn
    /// down, so a rejected update or a failed save leaves the previous
    /// cameras running and the previous document active.
    pub async fn apply_configuration(
        self: &Arc<Self>,
        mut new_config: ServerConfig,
    ) -> Result<ServerConfig> {
        let _ops = self.ops_lock.lock().await;

        config::validate_entries(&new_config.cameras)?;
        new_config.cameras = config::assign_ports(&new_config.cameras, DEFAULT_START_PORT);
        new_config.sanitize_auth();
        new_config.save(&self.config_path)?;

        self.stop_all().await;
        *self.config.write().await = new_config.clone();

        for entry in new_config.cameras.clone() {
            self.start_camera(entry).await;
        }
        info!("Applied configuration with {} cameras", new_config.cameras.len());
        Ok(new_config)
    }

    /// Stop and reopen one camera with its current configuration.
    pub async fn restart_camera(self: &Arc<Self>, id: &str) -> Result<()> {
        let _ops = self.ops_lock.lock().await;
        let entry = self
            .config
            .read()
            .await
            .cameras
            .iter()
            .find(|e| e.id == id)
            .cloned()
            .ok_or_else(|| CameraServerError::not_found(id))?;

        info!("Restarting camera '{}'", id);
        self.stop_camera(id).await;
        self.start_camera(entry).await;
        Ok(())
    }

    /// Remove one camera from the configuration and stop it. The updated
    /// document is persisted.
    pub async fn remove_camera(self: &Arc<Self>, id: &str) -> Result<ServerConfig> {
        let _ops = self.ops_lock.lock().await;
        let updated = {
            let mut config = self.config.write().await;
            let before = config.cameras.len();
            config.cameras.retain(|e| e.id != id);
            if config.cameras.len() == before {
                return Err(CameraServerError::not_found(id));
            }
            config.clone()
        };
        updated.save(&self.config_path)?;
        self.stop_camera(id).await;
        info!("Removed camera '{}'", id);
        Ok(updated)
    }

    pub async fn current_config(&self) -> ServerConfig {
        self.config.read().await.clone()
    }

    /// The configured entry and (if it started) the live source for `id`.
    pub async fn camera(&self, id: &str) -> Result<(CameraEntry, Option<Arc<CameraSource>>)> {
        let entry = self
            .config
            .read()
            .await
            .cameras
            .iter()
            .find(|e| e.id == id)
            .cloned()
            .ok_or_else(|| CameraServerError::not_found(id))?;
        let source = self.sources.read().await.get(id).cloned();
        Ok((entry, source))
    }

    /// One-shot JPEG for `id`; the placeholder stands in when the camera
    /// never started or has no frame yet.
    pub async fn snapshot(&self, id: &str) -> Result<Bytes> {
        let (entry, source) = self.camera(id).await?;
        stream::snapshot_bytes(source.as_deref(), &entry)
    }

    pub async fn status_map(&self) -> HashMap<String, (CameraState, String)> {
        let mut statuses: HashMap<String, (CameraState, String)> = self
            .sources
            .read()
            .await
            .iter()
            .map(|(id, source)| (id.clone(), source.state()))
            .collect();
        for (id, message) in self.failures.read().await.iter() {
            statuses
                .entry(id.clone())
                .or_insert_with(|| (CameraState::Error, message.clone()));
        }
        statuses
    }

    pub async fn health(&self) -> HealthSummary {
        let config = self.config.read().await;
        health::summarize(&config.cameras, &self.status_map().await)
    }

    pub async fn metrics(&self) -> String {
        health::metrics_text(&self.health().await)
    }

    /// Enumerate candidate devices. Serialized against configuration
    /// changes so probing never races a camera being opened.
    pub async fn list_devices(&self, max_devices: u32, probe_when_empty: bool) -> Vec<DiscoveredDevice> {
        let _ops = self.ops_lock.lock().await;
        let backend = self.backend.clone();
        tokio::task::spawn_blocking(move || {
            discovery::discover(backend.as_ref(), max_devices, probe_when_empty)
        })
        .await
        .unwrap_or_else(|e| {
            warn!("Device discovery task failed: {}", e);
            Vec::new()
        })
    }

    pub async fn shutdown(&self) {
        let _ops = self.ops_lock.lock().await;
        info!("Stopping all cameras");
        self.stop_all().await;
    }
}
