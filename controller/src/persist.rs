use std::{
    io::ErrorKind,
    path::{Path, PathBuf},
    sync::Arc,
};

use anyhow::Context;
use serde::{de::DeserializeOwned, Serialize};
use tokio::sync::Mutex;

use heater_common::{RuntimeConfig, Schedule};

#[derive(Clone)]
pub struct AppStore {
    runtime_path: Arc<PathBuf>,
    schedules_path: Arc<PathBuf>,
    lock: Arc<Mutex<()>>,
}

impl AppStore {
    pub fn from_env() -> Self {
        let data_dir = std::env::var("HEATER_DATA_DIR")
            .map(PathBuf::from)
            .unwrap_or_else(|_| PathBuf::from("./.heater"));
        Self::at(&data_dir)
    }

    pub fn at(data_dir: &Path) -> Self {
        Self {
            runtime_path: Arc::new(data_dir.join("runtime.json")),
            schedules_path: Arc::new(data_dir.join("schedules.json")),
            lock: Arc::new(Mutex::new(())),
        }
    }

    pub async fn load_runtime_config(&self) -> anyhow::Result<RuntimeConfig> {
        self.load(&self.runtime_path).await
    }

    pub async fn save_runtime_config(&self, runtime: &RuntimeConfig) -> anyhow::Result<()> {
        self.save(&self.runtime_path, runtime).await
    }

    pub async fn load_schedules(&self) -> anyhow::Result<Vec<Schedule>> {
        self.load(&self.schedules_path).await
    }

    pub async fn save_schedules(&self, schedules: &[Schedule]) -> anyhow::Result<()> {
        self.save(&self.schedules_path, schedules).await
    }

    async fn load<T: DeserializeOwned + Default>(&self, path: &Path) -> anyhow::Result<T> {
        let _guard = self.lock.lock().await;
        match tokio::fs::read(path).await {
            Ok(raw) => serde_json::from_slice(&raw)
                .with_context(|| format!("failed to parse {}", path.display())),
            Err(err) if err.kind() == ErrorKind::NotFound => Ok(T::default()),
            Err(err) => Err(err).with_context(|| format!("failed to read {}", path.display())),
        }
    }

    async fn save<T: Serialize + ?Sized>(&self, path: &Path, value: &T) -> anyhow::Result<()> {
        let _guard = self.lock.lock().await;
        if let Some(parent) = path.parent() {
            tokio::fs::create_dir_all(parent)
                .await
                .with_context(|| format!("failed to create {}", parent.display()))?;
        }
        let payload = serde_json::to_vec_pretty(value)?;
        tokio::fs::write(path, payload)
            .await
            .with_context(|| format!("failed to write {}", path.display()))
    }
}
