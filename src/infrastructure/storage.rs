//! 持久化存储
//!
//! 相当于浏览器 local storage：保存每个命名空间最后使用的连接器、连接状态、
//! 当前网络以及 SIWX 会话，启动时用于自动重连。

use std::collections::{BTreeMap, HashMap};
use std::path::{Path, PathBuf};
use std::sync::{Arc, Mutex};

use serde::de::DeserializeOwned;
use serde::Serialize;

use crate::domain::{AccountStatus, CaipNetworkId, ChainNamespace};
use crate::error::{AppKitError, Result};
use crate::service::siwx::SiwxSession;

pub mod keys {
    pub const CONNECTED_CONNECTOR_IDS: &str = "@appkit/connected_connector_ids";
    pub const CONNECTION_STATUS: &str = "@appkit/connection_status";
    pub const ACTIVE_CAIP_NETWORK_ID: &str = "@appkit/active_caip_network_id";
    pub const ACTIVE_NAMESPACE: &str = "@appkit/active_namespace";
    pub const SIWX_SESSIONS: &str = "@appkit/siwx_sessions";
}

/// 键值存储后端
pub trait StorageBackend: Send + Sync {
    fn get(&self, key: &str) -> Result<Option<String>>;
    fn set(&self, key: &str, value: &str) -> Result<()>;
    fn remove(&self, key: &str) -> Result<()>;
}

fn poisoned<T>(_: std::sync::PoisonError<T>) -> AppKitError {
    AppKitError::Storage("storage lock poisoned".to_string())
}

#[derive(Debug, Default)]
pub struct InMemoryStorage {
    entries: Mutex<HashMap<String, String>>,
}

impl InMemoryStorage {
    pub fn new() -> Self {
        Self::default()
    }
}

impl StorageBackend for InMemoryStorage {
    fn get(&self, key: &str) -> Result<Option<String>> {
        Ok(self.entries.lock().map_err(poisoned)?.get(key).cloned())
    }

    fn set(&self, key: &str, value: &str) -> Result<()> {
        self.entries
            .lock()
            .map_err(poisoned)?
            .insert(key.to_string(), value.to_string());
        Ok(())
    }

    fn remove(&self, key: &str) -> Result<()> {
        self.entries.lock().map_err(poisoned)?.remove(key);
        Ok(())
    }
}

/// 单个 JSON 文档存储全部键值
#[derive(Debug)]
pub struct FileStorage {
    path: PathBuf,
    lock: Mutex<()>,
}

impl FileStorage {
    pub fn new(path: impl AsRef<Path>) -> Self {
        Self {
            path: path.as_ref().to_path_buf(),
            lock: Mutex::new(()),
        }
    }

    fn load(&self) -> Result<BTreeMap<String, String>> {
        if !self.path.exists() {
            return Ok(BTreeMap::new());
        }
        let content = std::fs::read_to_string(&self.path)?;
        if content.trim().is_empty() {
            return Ok(BTreeMap::new());
        }
        Ok(serde_json::from_str(&content)?)
    }

    fn save(&self, entries: &BTreeMap<String, String>) -> Result<()> {
        if let Some(parent) = self.path.parent() {
            if !parent.as_os_str().is_empty() {
                std::fs::create_dir_all(parent)?;
            }
        }
        std::fs::write(&self.path, serde_json::to_string_pretty(entries)?)?;
        Ok(())
    }
}

impl StorageBackend for FileStorage {
    fn get(&self, key: &str) -> Result<Option<String>> {
        let _guard = self.lock.lock().map_err(poisoned)?;
        Ok(self.load()?.get(key).cloned())
    }

    fn set(&self, key: &str, value: &str) -> Result<()> {
        let _guard = self.lock.lock().map_err(poisoned)?;
        let mut entries = self.load()?;
        entries.insert(key.to_string(), value.to_string());
        self.save(&entries)
    }

    fn remove(&self, key: &str) -> Result<()> {
        let _guard = self.lock.lock().map_err(poisoned)?;
        let mut entries = self.load()?;
        if entries.remove(key).is_some() {
            self.save(&entries)?;
        }
        Ok(())
    }
}

/// 类型化的持久化状态访问
#[derive(Clone)]
pub struct PersistedState {
    backend: Arc<dyn StorageBackend>,
}

impl PersistedState {
    pub fn new(backend: Arc<dyn StorageBackend>) -> Self {
        Self { backend }
    }

    pub fn in_memory() -> Self {
        Self::new(Arc::new(InMemoryStorage::new()))
    }

    fn read<T: DeserializeOwned + Default>(&self, key: &str) -> Result<T> {
        match self.backend.get(key)? {
            Some(raw) => Ok(serde_json::from_str(&raw)?),
            None => Ok(T::default()),
        }
    }

    fn write<T: Serialize>(&self, key: &str, value: &T) -> Result<()> {
        self.backend.set(key, &serde_json::to_string(value)?)
    }

    pub fn connected_connector_ids(&self) -> Result<BTreeMap<ChainNamespace, String>> {
        self.read(keys::CONNECTED_CONNECTOR_IDS)
    }

    pub fn connector_id(&self, namespace: ChainNamespace) -> Result<Option<String>> {
        Ok(self.connected_connector_ids()?.remove(&namespace))
    }

    pub fn set_connector_id(&self, namespace: ChainNamespace, connector_id: &str) -> Result<()> {
        let mut ids = self.connected_connector_ids()?;
        ids.insert(namespace, connector_id.to_string());
        self.write(keys::CONNECTED_CONNECTOR_IDS, &ids)
    }

    pub fn remove_connector_id(&self, namespace: ChainNamespace) -> Result<()> {
        let mut ids = self.connected_connector_ids()?;
        if ids.remove(&namespace).is_some() {
            self.write(keys::CONNECTED_CONNECTOR_IDS, &ids)?;
        }
        Ok(())
    }

    pub fn connection_statuses(&self) -> Result<BTreeMap<ChainNamespace, AccountStatus>> {
        self.read(keys::CONNECTION_STATUS)
    }

    pub fn set_connection_status(
        &self,
        namespace: ChainNamespace,
        status: AccountStatus,
    ) -> Result<()> {
        let mut statuses = self.connection_statuses()?;
        statuses.insert(namespace, status);
        self.write(keys::CONNECTION_STATUS, &statuses)
    }

    pub fn active_caip_network_id(&self) -> Result<Option<CaipNetworkId>> {
        self.read(keys::ACTIVE_CAIP_NETWORK_ID)
    }

    pub fn set_active_caip_network_id(&self, id: &CaipNetworkId) -> Result<()> {
        self.write(keys::ACTIVE_CAIP_NETWORK_ID, id)
    }

    pub fn active_namespace(&self) -> Result<Option<ChainNamespace>> {
        self.read(keys::ACTIVE_NAMESPACE)
    }

    pub fn set_active_namespace(&self, namespace: Option<ChainNamespace>) -> Result<()> {
        match namespace {
            Some(ns) => self.write(keys::ACTIVE_NAMESPACE, &ns),
            None => self.backend.remove(keys::ACTIVE_NAMESPACE),
        }
    }

    pub fn siwx_sessions(&self) -> Result<Vec<SiwxSession>> {
        self.read(keys::SIWX_SESSIONS)
    }

    pub fn set_siwx_sessions(&self, sessions: &[SiwxSession]) -> Result<()> {
        if sessions.is_empty() {
            return self.backend.remove(keys::SIWX_SESSIONS);
        }
        self.write(keys::SIWX_SESSIONS, &sessions)
    }

    /// 断开连接时清除该命名空间的连接记录
    pub fn clear_namespace(&self, namespace: ChainNamespace) -> Result<()> {
        self.remove_connector_id(namespace)?;
        self.set_connection_status(namespace, AccountStatus::Disconnected)
    }
}
