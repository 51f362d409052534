use async_trait::async_trait;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serenity::model::id::UserId;
use std::collections::HashMap;
use std::path::PathBuf;
use tokio::{fs, sync::Mutex};
use tracing::{debug, info, warn};

use crate::error::StorageError;

/// Per-user ordered list of favourite source URIs.
#[async_trait]
pub trait FavouritesStore: Send + Sync {
    async fn favourites(&self, user_id: UserId) -> Result<Vec<String>, StorageError>;

    /// Appends `uri`. Returns its 1-based position.
    async fn add_favourite(&self, user_id: UserId, uri: &str) -> Result<usize, StorageError>;

    /// Removes the entry at 0-based `index`; later entries shift left.
    async fn remove_favourite(&self, user_id: UserId, index: usize)
        -> Result<String, StorageError>;
}

/// Favoritos de un usuario tal y como se guardan en disco
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct FavouritesRecord {
    pub user_id: u64,
    pub uris: Vec<String>,
    pub updated_at: DateTime<Utc>,
}

impl FavouritesRecord {
    fn empty(user_id: u64) -> Self {
        Self {
            user_id,
            uris: Vec::new(),
            updated_at: Utc::now(),
        }
    }
}

/// Almacenamiento de favoritos en archivos JSON, uno por usuario
pub struct JsonStorage {
    data_dir: PathBuf,
    max_favourites: usize,
    cache: Mutex<HashMap<u64, FavouritesRecord>>,
}

impl JsonStorage {
    pub async fn new(data_dir: PathBuf, max_favourites: usize) -> Result<Self, StorageError> {
        fs::create_dir_all(data_dir.join("favourites")).await?;

        info!("📁 Storage inicializado en: {}", data_dir.display());

        let storage = Self {
            data_dir,
            max_favourites,
            cache: Mutex::new(HashMap::new()),
        };

        storage.load_all().await?;
        Ok(storage)
    }

    pub async fn stats(&self) -> Result<StorageStats, StorageError> {
        let mut files = fs::read_dir(self.favourites_dir()).await?;
        let mut file_count = 0;
        let mut total_size = 0;

        while let Some(entry) = files.next_entry().await? {
            if entry.path().extension().is_some_and(|ext| ext == "json") {
                file_count += 1;
                if let Ok(metadata) = entry.metadata().await {
                    total_size += metadata.len();
                }
            }
        }

        Ok(StorageStats {
            users: file_count,
            cached_users: self.cache.lock().await.len(),
            total_size_bytes: total_size,
            data_dir: self.data_dir.clone(),
        })
    }

    // Métodos privados

    fn favourites_dir(&self) -> PathBuf {
        self.data_dir.join("favourites")
    }

    fn user_file_path(&self, user_id: u64) -> PathBuf {
        self.favourites_dir().join(format!("user_{}.json", user_id))
    }

    async fn load_record(&self, user_id: u64) -> Result<FavouritesRecord, StorageError> {
        let content = fs::read_to_string(self.user_file_path(user_id)).await?;
        Ok(serde_json::from_str(&content)?)
    }

    async fn save_record(&self, record: &FavouritesRecord) -> Result<(), StorageError> {
        let content = serde_json::to_string_pretty(record)?;
        fs::write(self.user_file_path(record.user_id), content).await?;
        Ok(())
    }

    async fn load_all(&self) -> Result<(), StorageError> {
        let mut files = fs::read_dir(self.favourites_dir()).await?;
        let mut cache = self.cache.lock().await;

        while let Some(entry) = files.next_entry().await? {
            let path = entry.path();
            let Some(user_id) = path
                .file_stem()
                .and_then(|n| n.to_str())
                .and_then(|n| n.strip_prefix("user_"))
                .and_then(|id| id.parse::<u64>().ok())
            else {
                continue;
            };

            match self.load_record(user_id).await {
                Ok(record) => {
                    cache.insert(user_id, record);
                }
                Err(e) => warn!("Error cargando favoritos del usuario {}: {}", user_id, e),
            }
        }

        if !cache.is_empty() {
            info!("📂 Cargados favoritos de {} usuarios", cache.len());
        }
        Ok(())
    }

    /// Applies `change` to the user's record and persists it. The cache lock is
    /// held across the write so two edits for one user never interleave.
    async fn modify<T>(
        &self,
        user_id: UserId,
        change: impl FnOnce(&mut FavouritesRecord) -> Result<T, StorageError>,
    ) -> Result<T, StorageError> {
        let mut cache = self.cache.lock().await;
        let record = cache
            .entry(user_id.get())
            .or_insert_with(|| FavouritesRecord::empty(user_id.get()));

        let mut updated = record.clone();
        let value = change(&mut updated)?;
        updated.updated_at = Utc::now();
        self.save_record(&updated).await?;
        *record = updated;

        Ok(value)
    }
}

#[async_trait]
impl FavouritesStore for JsonStorage {
    async fn favourites(&self, user_id: UserId) -> Result<Vec<String>, StorageError> {
        Ok(self
            .cache
            .lock()
            .await
            .get(&user_id.get())
            .map(|record| record.uris.clone())
            .unwrap_or_default())
    }

    async fn add_favourite(&self, user_id: UserId, uri: &str) -> Result<usize, StorageError> {
        let max = self.max_favourites;
        let position = self
            .modify(user_id, |record| {
                if record.uris.len() >= max {
                    return Err(StorageError::FavouritesFull(max));
                }
                record.uris.push(uri.to_string());
                Ok(record.uris.len())
            })
            .await?;

        debug!("⭐ Favorito {} guardado para {}", position, user_id);
        Ok(position)
    }

    async fn remove_favourite(
        &self,
        user_id: UserId,
        index: usize,
    ) -> Result<String, StorageError> {
        let removed = self
            .modify(user_id, |record| {
                if index >= record.uris.len() {
                    return Err(StorageError::NoSuchFavourite(index + 1));
                }
                Ok(record.uris.remove(index))
            })
            .await?;

        debug!("🗑️ Favorito {} eliminado para {}", index + 1, user_id);
        Ok(removed)
    }
}

/// Estadísticas de almacenamiento
#[derive(Debug)]
pub struct StorageStats {
    pub users: usize,
    pub cached_users: usize,
    pub total_size_bytes: u64,
    pub data_dir: PathBuf,
}

impl std::fmt::Display for StorageStats {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(
            f,
            "📊 Storage Stats:\n\
             📁 Data Directory: {}\n\
             ⭐ Favourites: {} users\n\
             💾 Cached: {} in memory\n\
             📦 Total Size: {} bytes ({:.2} KB)",
            self.data_dir.display(),
            self.users,
            self.cached_users,
            self.total_size_bytes,
            self.total_size_bytes as f64 / 1024.0
        )
    }
}
