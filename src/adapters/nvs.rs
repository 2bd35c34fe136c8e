//! Non-volatile storage adapter.
//!
//! Implements [`StoragePort`] and [`ConfigPort`].
//!
//! - **`target_os = "espidf"`**: blobs live in the default NVS partition,
//!   one NVS namespace per storage namespace.
//! - **host**: an in-memory map keyed `"namespace::key"`, so tests and the
//!   simulator exercise the same code paths.
//!
//! The system configuration is stored as a postcard blob and validated
//! before every write.

#[cfg(not(target_os = "espidf"))]
use std::collections::HashMap;
#[cfg(not(target_os = "espidf"))]
use std::sync::{Mutex, PoisonError};

use log::{info, warn};

use crate::app::ports::{ConfigError, ConfigPort, StorageError, StoragePort};
use crate::config::SystemConfig;

const CONFIG_NAMESPACE: &str = "eswcom";
const CONFIG_KEY: &str = "syscfg";

/// Largest blob written or read back.
const MAX_BLOB_SIZE: usize = 1024;

pub struct NvsStorage {
    #[cfg(target_os = "espidf")]
    partition: esp_idf_svc::nvs::EspDefaultNvsPartition,
    #[cfg(not(target_os = "espidf"))]
    store: Mutex<HashMap<String, Vec<u8>>>,
}

impl NvsStorage {
    #[cfg(target_os = "espidf")]
    pub fn new() -> Result<Self, StorageError> {
        let partition =
            esp_idf_svc::nvs::EspDefaultNvsPartition::take().map_err(|_| StorageError::IoError)?;
        info!("NVS: default partition mounted");
        Ok(Self { partition })
    }

    #[cfg(not(target_os = "espidf"))]
    pub fn new() -> Result<Self, StorageError> {
        info!("NVS: in-memory store (host)");
        Ok(Self {
            store: Mutex::new(HashMap::new()),
        })
    }

    #[cfg(not(target_os = "espidf"))]
    fn composite_key(namespace: &str, key: &str) -> String {
        format!("{}::{}", namespace, key)
    }

    #[cfg(not(target_os = "espidf"))]
    fn map(&self) -> std::sync::MutexGuard<'_, HashMap<String, Vec<u8>>> {
        self.store.lock().unwrap_or_else(PoisonError::into_inner)
    }

    #[cfg(target_os = "espidf")]
    fn open(
        &self,
        namespace: &str,
        read_write: bool,
    ) -> Result<esp_idf_svc::nvs::EspNvs<esp_idf_svc::nvs::NvsDefault>, StorageError> {
        esp_idf_svc::nvs::EspNvs::new(self.partition.clone(), namespace, read_write).map_err(|e| {
            warn!("NVS: open '{}' failed: {}", namespace, e);
            StorageError::IoError
        })
    }

    /// Read a whole blob into a fresh buffer.
    fn read_blob(&self, namespace: &str, key: &str) -> Result<Vec<u8>, StorageError> {
        let mut buf = vec![0u8; MAX_BLOB_SIZE];
        let len = self.read(namespace, key, &mut buf)?;
        buf.truncate(len);
        Ok(buf)
    }

    fn write_blob(&self, namespace: &str, key: &str, data: &[u8]) -> Result<(), StorageError> {
        if data.len() > MAX_BLOB_SIZE {
            warn!("NVS: {}::{} is {} bytes, limit {}", namespace, key, data.len(), MAX_BLOB_SIZE);
            return Err(StorageError::TooLarge);
        }

        #[cfg(not(target_os = "espidf"))]
        {
            self.map()
                .insert(Self::composite_key(namespace, key), data.to_vec());
            Ok(())
        }

        #[cfg(target_os = "espidf")]
        {
            let mut nvs = self.open(namespace, true)?;
            nvs.set_blob(key, data).map_err(|e| {
                warn!("NVS: write {}::{} failed: {}", namespace, key, e);
                StorageError::IoError
            })
        }
    }
}

impl ConfigPort for NvsStorage {
    fn load(&self) -> Result<SystemConfig, ConfigError> {
        match self.read_blob(CONFIG_NAMESPACE, CONFIG_KEY) {
            Ok(bytes) => {
                let cfg: SystemConfig =
                    postcard::from_bytes(&bytes).map_err(|_| ConfigError::Corrupted)?;
                cfg.validate()?;
                info!("NVS: loaded config ({} bytes)", bytes.len());
                Ok(cfg)
            }
            Err(StorageError::NotFound) => {
                info!("NVS: no stored config, using defaults");
                Ok(SystemConfig::default())
            }
            Err(e) => {
                warn!("NVS: config read error ({}), using defaults", e);
                Ok(SystemConfig::default())
            }
        }
    }

    fn save(&self, config: &SystemConfig) -> Result<(), ConfigError> {
        config.validate()?;
        let bytes = postcard::to_allocvec(config).map_err(|_| ConfigError::IoError)?;
        self.write_blob(CONFIG_NAMESPACE, CONFIG_KEY, &bytes)
            .map_err(|_| ConfigError::IoError)?;
        info!("NVS: config saved ({} bytes)", bytes.len());
        Ok(())
    }
}

impl StoragePort for NvsStorage {
    fn read(&self, namespace: &str, key: &str, buf: &mut [u8]) -> Result<usize, StorageError> {
        #[cfg(not(target_os = "espidf"))]
        {
            let map = self.map();
            let data = map
                .get(&Self::composite_key(namespace, key))
                .ok_or(StorageError::NotFound)?;
            let len = data.len().min(buf.len());
            buf[..len].copy_from_slice(&data[..len]);
            Ok(len)
        }

        #[cfg(target_os = "espidf")]
        {
            let nvs = self.open(namespace, false)?;
            match nvs.get_blob(key, buf) {
                Ok(Some(data)) => Ok(data.len()),
                Ok(None) => Err(StorageError::NotFound),
                Err(_) => Err(StorageError::IoError),
            }
        }
    }

    fn write(&mut self, namespace: &str, key: &str, data: &[u8]) -> Result<(), StorageError> {
        self.write_blob(namespace, key, data)
    }

    fn delete(&mut self, namespace: &str, key: &str) -> Result<(), StorageError> {
        #[cfg(not(target_os = "espidf"))]
        {
            self.map().remove(&Self::composite_key(namespace, key));
            Ok(())
        }

        #[cfg(target_os = "espidf")]
        {
            let mut nvs = self.open(namespace, true)?;
            nvs.remove(key).map(|_| ()).map_err(|_| StorageError::IoError)
        }
    }

    fn exists(&self, namespace: &str, key: &str) -> bool {
        #[cfg(not(target_os = "espidf"))]
        {
            self.map()
                .contains_key(&Self::composite_key(namespace, key))
        }

        #[cfg(target_os = "espidf")]
        {
            self.open(namespace, false)
                .and_then(|nvs| nvs.contains(key).map_err(|_| StorageError::IoError))
                .unwrap_or(false)
        }
    }
}
