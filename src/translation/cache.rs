//! 翻译缓存系统
//!
//! 双层结构：内存 LRU 作为热路径，redb 作为跨进程持久层。
//! 读路径先查内存再查持久层，过期条目在读取时删除并按未命中处理。
//! 写路径写透两层；持久层写入失败时先腾退最旧条目并重试一次，
//! 仍失败则降级为内存模式继续工作，存储错误不向调用方传播。
//! 每约 10 次写入触发一次过期清理，把清理成本摊到写入上。

use std::num::NonZeroUsize;
use std::path::PathBuf;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Mutex;

use lru::LruCache;
use redb::{Database, ReadableTable, ReadableTableMetadata, TableDefinition};
use serde::{Deserialize, Serialize};
use tracing::{debug, info, warn};

use crate::translation::config::{constants, CacheSettings};
use crate::translation::error::{TranslationError, TranslationResult};
use crate::translation::provider::Translation;

/// 翻译条目表：缓存键 -> JSON 序列化的条目
const TRANSLATIONS_TABLE: TableDefinition<&str, &[u8]> = TableDefinition::new("translations");

/// 设置表：持久化活动语言等少量键值
const SETTINGS_TABLE: TableDefinition<&str, &str> = TableDefinition::new("settings");

/// 缓存条目
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CacheEntry {
    /// 译文
    pub translated_text: String,
    /// 源语言
    pub source_lang: String,
    /// 目标语言
    pub target_lang: String,
    /// 写入时间（毫秒时间戳），腾退时按此排序
    pub created_at: i64,
    /// 过期时间（毫秒时间戳）
    pub expires_at: i64,
}

impl CacheEntry {
    fn from_translation(translation: &Translation, ttl_ms: i64) -> Self {
        let now = now_millis();
        Self {
            translated_text: translation.translated_text.clone(),
            source_lang: translation.source_lang.clone(),
            target_lang: translation.target_lang.clone(),
            created_at: now,
            expires_at: now + ttl_ms,
        }
    }

    fn is_expired(&self, now: i64) -> bool {
        now > self.expires_at
    }

    fn to_translation(&self) -> Translation {
        Translation {
            translated_text: self.translated_text.clone(),
            source_lang: self.source_lang.clone(),
            target_lang: self.target_lang.clone(),
        }
    }
}

/// 缓存统计
#[derive(Debug, Clone, Default, Serialize)]
pub struct CacheStats {
    pub hits: u64,
    pub misses: u64,
    pub writes: u64,
    pub evictions: u64,
    pub expired_purged: u64,
}

impl CacheStats {
    /// 命中率
    pub fn hit_rate(&self) -> f64 {
        let total = self.hits + self.misses;
        if total == 0 {
            0.0
        } else {
            self.hits as f64 / total as f64
        }
    }
}

/// 翻译缓存
pub struct TranslationCache {
    /// 持久层；打开失败时为 None，降级为内存模式
    db: Option<Database>,
    /// 内存热层
    memory: Mutex<LruCache<String, CacheEntry>>,
    /// 条目存活时间（毫秒）
    ttl_ms: i64,
    /// 持久层容量上限
    capacity: usize,
    /// 写入计数，用于摊销式过期清理
    write_counter: AtomicU64,
    /// 活动语言的进程内副本（降级模式下的唯一副本）
    active_language: Mutex<Option<String>>,
    /// 统计
    stats: Mutex<CacheStats>,
}

impl TranslationCache {
    /// 按配置打开缓存
    ///
    /// 持久层打开失败不报错，记录警告后以内存模式继续。
    pub fn open(settings: &CacheSettings) -> Self {
        let path = settings
            .store_path
            .clone()
            .unwrap_or_else(|| PathBuf::from(constants::DEFAULT_STORE_PATH));

        let db = match Database::create(&path) {
            Ok(db) => {
                // 建表放在构造期，让存储问题尽早暴露
                match Self::ensure_tables(&db) {
                    Ok(()) => {
                        info!("翻译缓存已打开: {}", path.display());
                        Some(db)
                    }
                    Err(e) => {
                        warn!("缓存建表失败，降级为内存模式: {}", e);
                        None
                    }
                }
            }
            Err(e) => {
                warn!("缓存存储打开失败，降级为内存模式: {}", e);
                None
            }
        };

        Self::with_database(db, settings)
    }

    /// 纯内存缓存（测试与禁用持久化时使用）
    pub fn in_memory(settings: &CacheSettings) -> Self {
        Self::with_database(None, settings)
    }

    fn with_database(db: Option<Database>, settings: &CacheSettings) -> Self {
        let capacity = settings.capacity.max(1);
        let memory_capacity =
            NonZeroUsize::new(capacity).unwrap_or(NonZeroUsize::MIN);

        Self {
            db,
            memory: Mutex::new(LruCache::new(memory_capacity)),
            ttl_ms: settings.ttl.as_millis() as i64,
            capacity,
            write_counter: AtomicU64::new(0),
            active_language: Mutex::new(None),
            stats: Mutex::new(CacheStats::default()),
        }
    }

    fn ensure_tables(db: &Database) -> TranslationResult<()> {
        let txn = db.begin_write().map_err(storage_err)?;
        txn.open_table(TRANSLATIONS_TABLE).map_err(storage_err)?;
        txn.open_table(SETTINGS_TABLE).map_err(storage_err)?;
        txn.commit().map_err(storage_err)?;
        Ok(())
    }

    /// 是否处于降级（内存）模式
    pub fn is_degraded(&self) -> bool {
        self.db.is_none()
    }

    /// 读取缓存；过期条目删除并按未命中处理
    pub fn get(&self, key: &str) -> Option<Translation> {
        let now = now_millis();

        // 先查内存层
        let memory_hit = {
            let mut memory = lock_ignore_poison(&self.memory);
            memory.get(key).cloned()
        };

        if let Some(entry) = memory_hit {
            if entry.is_expired(now) {
                self.remove_everywhere(key);
                self.bump(|s| {
                    s.misses += 1;
                    s.expired_purged += 1;
                });
                return None;
            }
            self.bump(|s| s.hits += 1);
            return Some(entry.to_translation());
        }

        // 再查持久层，命中时回填内存
        match self.db_get(key) {
            Ok(Some(entry)) => {
                if entry.is_expired(now) {
                    self.remove_everywhere(key);
                    self.bump(|s| {
                        s.misses += 1;
                        s.expired_purged += 1;
                    });
                    return None;
                }

                let mut memory = lock_ignore_poison(&self.memory);
                memory.put(key.to_string(), entry.clone());
                drop(memory);

                self.bump(|s| s.hits += 1);
                Some(entry.to_translation())
            }
            Ok(None) => {
                self.bump(|s| s.misses += 1);
                None
            }
            Err(e) => {
                warn!("缓存读取失败: {}", e);
                self.bump(|s| s.misses += 1);
                None
            }
        }
    }

    /// 写入缓存
    ///
    /// 持久层失败时腾退最旧条目后重试一次，再失败则仅保留内存副本。
    /// 写入永不向调用方返回错误。
    pub fn set(&self, key: &str, translation: &Translation) {
        let entry = CacheEntry::from_translation(translation, self.ttl_ms);

        {
            let mut memory = lock_ignore_poison(&self.memory);
            memory.put(key.to_string(), entry.clone());
        }

        if let Err(first) = self.db_put(key, &entry) {
            debug!("缓存写入失败，腾退后重试: {}", first);
            let evicted = self.evict_oldest(constants::CACHE_EVICTION_HEADROOM);
            self.bump(|s| s.evictions += evicted as u64);

            if let Err(second) = self.db_put(key, &entry) {
                warn!("缓存写入重试仍失败，本条仅保留内存副本: {}", second);
            }
        }

        self.bump(|s| s.writes += 1);

        // 摊销式维护：周期性过期清理 + 容量控制
        let count = self.write_counter.fetch_add(1, Ordering::Relaxed) + 1;
        if count % constants::CACHE_CLEANUP_INTERVAL == 0 {
            let purged = self.purge_expired();
            if purged > 0 {
                debug!("清理过期缓存条目: {}", purged);
                self.bump(|s| s.expired_purged += purged as u64);
            }
        }

        if let Ok(len) = self.db_len() {
            if len > self.capacity {
                let target = self.capacity.saturating_sub(constants::CACHE_EVICTION_HEADROOM);
                let evicted = self.evict_oldest(len - target);
                debug!("缓存超出容量，腾退最旧条目: {}", evicted);
                self.bump(|s| s.evictions += evicted as u64);
            }
        }
    }

    /// 删除指定条目；返回条目是否存在
    pub fn delete(&self, key: &str) -> bool {
        let in_memory = {
            let mut memory = lock_ignore_poison(&self.memory);
            memory.pop(key).is_some()
        };

        let in_db = self.db_remove(key).unwrap_or_else(|e| {
            warn!("缓存删除失败: {}", e);
            false
        });

        in_memory || in_db
    }

    /// 清空全部翻译条目（保留设置表）
    pub fn clear(&self) -> TranslationResult<()> {
        {
            let mut memory = lock_ignore_poison(&self.memory);
            memory.clear();
        }

        if let Some(ref db) = self.db {
            let txn = db.begin_write().map_err(storage_err)?;
            {
                let mut table = txn.open_table(TRANSLATIONS_TABLE).map_err(storage_err)?;
                let keys: Vec<String> = table
                    .iter()
                    .map_err(storage_err)?
                    .filter_map(|item| item.ok())
                    .map(|(k, _)| k.value().to_string())
                    .collect();
                for key in keys {
                    table.remove(key.as_str()).map_err(storage_err)?;
                }
            }
            txn.commit().map_err(storage_err)?;
        }

        Ok(())
    }

    /// 持久层条目数；降级模式下返回内存条目数
    pub fn len(&self) -> usize {
        match self.db_len() {
            Ok(len) => len,
            Err(_) => lock_ignore_poison(&self.memory).len(),
        }
    }

    /// 缓存是否为空
    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// 统计快照
    pub fn stats(&self) -> CacheStats {
        lock_ignore_poison(&self.stats).clone()
    }

    /// 读取持久化的活动 AI 语言
    pub fn active_language(&self) -> Option<String> {
        let Some(ref db) = self.db else {
            return lock_ignore_poison(&self.active_language).clone();
        };

        let txn = db.begin_read().ok()?;
        let table = txn.open_table(SETTINGS_TABLE).ok()?;
        table
            .get(constants::ACTIVE_LANGUAGE_KEY)
            .ok()
            .flatten()
            .map(|guard| guard.value().to_string())
    }

    /// 写入或清除持久化的活动 AI 语言
    pub fn set_active_language(&self, lang: Option<&str>) -> TranslationResult<()> {
        {
            let mut mirror = lock_ignore_poison(&self.active_language);
            *mirror = lang.map(|l| l.to_string());
        }

        let Some(ref db) = self.db else {
            // 降级模式下仅保留进程内副本
            return Ok(());
        };

        let txn = db.begin_write().map_err(storage_err)?;
        {
            let mut table = txn.open_table(SETTINGS_TABLE).map_err(storage_err)?;
            match lang {
                Some(lang) => {
                    table
                        .insert(constants::ACTIVE_LANGUAGE_KEY, lang)
                        .map_err(storage_err)?;
                }
                None => {
                    table
                        .remove(constants::ACTIVE_LANGUAGE_KEY)
                        .map_err(storage_err)?;
                }
            }
        }
        txn.commit().map_err(storage_err)?;
        Ok(())
    }

    /// 清理所有已过期条目，返回清理数量
    pub fn purge_expired(&self) -> usize {
        let now = now_millis();

        {
            let mut memory = lock_ignore_poison(&self.memory);
            let expired: Vec<String> = memory
                .iter()
                .filter(|(_, entry)| entry.is_expired(now))
                .map(|(key, _)| key.clone())
                .collect();
            for key in &expired {
                memory.pop(key);
            }
        }

        let Some(ref db) = self.db else {
            return 0;
        };

        let result: TranslationResult<usize> = (|| {
            let txn = db.begin_write().map_err(storage_err)?;
            let purged;
            {
                let mut table = txn.open_table(TRANSLATIONS_TABLE).map_err(storage_err)?;
                let expired: Vec<String> = table
                    .iter()
                    .map_err(storage_err)?
                    .filter_map(|item| item.ok())
                    .filter_map(|(key, value)| {
                        match serde_json::from_slice::<CacheEntry>(value.value()) {
                            Ok(entry) if entry.is_expired(now) => Some(key.value().to_string()),
                            // 无法解析的条目一并清理
                            Err(_) => Some(key.value().to_string()),
                            _ => None,
                        }
                    })
                    .collect();

                purged = expired.len();
                for key in expired {
                    table.remove(key.as_str()).map_err(storage_err)?;
                }
            }
            txn.commit().map_err(storage_err)?;
            Ok(purged)
        })();

        match result {
            Ok(purged) => purged,
            Err(e) => {
                warn!("过期清理失败: {}", e);
                0
            }
        }
    }

    /// 按写入时间腾退最旧的 `count` 条，返回实际腾退数量
    fn evict_oldest(&self, count: usize) -> usize {
        if count == 0 {
            return 0;
        }

        let Some(ref db) = self.db else {
            return 0;
        };

        let result: TranslationResult<usize> = (|| {
            let txn = db.begin_write().map_err(storage_err)?;
            let evicted;
            {
                let mut table = txn.open_table(TRANSLATIONS_TABLE).map_err(storage_err)?;
                let mut entries: Vec<(String, i64)> = table
                    .iter()
                    .map_err(storage_err)?
                    .filter_map(|item| item.ok())
                    .map(|(key, value)| {
                        let created_at = serde_json::from_slice::<CacheEntry>(value.value())
                            .map(|entry| entry.created_at)
                            .unwrap_or(0);
                        (key.value().to_string(), created_at)
                    })
                    .collect();

                entries.sort_by_key(|(_, created_at)| *created_at);
                entries.truncate(count);
                evicted = entries.len();

                for (key, _) in &entries {
                    table.remove(key.as_str()).map_err(storage_err)?;
                }
            }
            txn.commit().map_err(storage_err)?;
            Ok(evicted)
        })();

        match result {
            Ok(evicted) => {
                let mut memory = lock_ignore_poison(&self.memory);
                // 内存层同步收缩，避免读到已腾退的条目
                while memory.len() > self.capacity.saturating_sub(count) {
                    if memory.pop_lru().is_none() {
                        break;
                    }
                }
                evicted
            }
            Err(e) => {
                warn!("缓存腾退失败: {}", e);
                0
            }
        }
    }

    fn remove_everywhere(&self, key: &str) {
        {
            let mut memory = lock_ignore_poison(&self.memory);
            memory.pop(key);
        }
        if let Err(e) = self.db_remove(key) {
            warn!("过期条目删除失败: {}", e);
        }
    }

    fn db_get(&self, key: &str) -> TranslationResult<Option<CacheEntry>> {
        let Some(ref db) = self.db else {
            return Ok(None);
        };

        let txn = db.begin_read().map_err(storage_err)?;
        let table = txn.open_table(TRANSLATIONS_TABLE).map_err(storage_err)?;
        let Some(guard) = table.get(key).map_err(storage_err)? else {
            return Ok(None);
        };

        let entry = serde_json::from_slice::<CacheEntry>(guard.value())
            .map_err(|e| TranslationError::Storage(format!("缓存条目解析失败: {}", e)))?;
        Ok(Some(entry))
    }

    fn db_put(&self, key: &str, entry: &CacheEntry) -> TranslationResult<()> {
        let Some(ref db) = self.db else {
            return Ok(());
        };

        let bytes = serde_json::to_vec(entry)?;
        let txn = db.begin_write().map_err(storage_err)?;
        {
            let mut table = txn.open_table(TRANSLATIONS_TABLE).map_err(storage_err)?;
            table.insert(key, bytes.as_slice()).map_err(storage_err)?;
        }
        txn.commit().map_err(storage_err)?;
        Ok(())
    }

    fn db_remove(&self, key: &str) -> TranslationResult<bool> {
        let Some(ref db) = self.db else {
            return Ok(false);
        };

        let txn = db.begin_write().map_err(storage_err)?;
        let existed;
        {
            let mut table = txn.open_table(TRANSLATIONS_TABLE).map_err(storage_err)?;
            existed = table.remove(key).map_err(storage_err)?.is_some();
        }
        txn.commit().map_err(storage_err)?;
        Ok(existed)
    }

    fn db_len(&self) -> TranslationResult<usize> {
        let Some(ref db) = self.db else {
            return Err(TranslationError::Storage("持久层不可用".to_string()));
        };

        let txn = db.begin_read().map_err(storage_err)?;
        let table = txn.open_table(TRANSLATIONS_TABLE).map_err(storage_err)?;
        Ok(table.len().map_err(storage_err)? as usize)
    }

    fn bump(&self, update: impl FnOnce(&mut CacheStats)) {
        let mut stats = lock_ignore_poison(&self.stats);
        update(&mut stats);
    }
}

fn now_millis() -> i64 {
    chrono::Utc::now().timestamp_millis()
}

fn storage_err(error: impl std::fmt::Display) -> TranslationError {
    TranslationError::Storage(error.to_string())
}

fn lock_ignore_poison<'a, T>(mutex: &'a Mutex<T>) -> std::sync::MutexGuard<'a, T> {
    mutex.lock().unwrap_or_else(|poisoned| poisoned.into_inner())
}
