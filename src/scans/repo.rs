use std::collections::HashMap;
use std::sync::RwLock;

use anyhow::Context;
use async_trait::async_trait;
use sqlx::PgPool;

use super::repo_types::{ConfirmedScan, NutritionalInfo};

/// Durable storage for confirmed scans. Saves are upserts by id.
#[async_trait]
pub trait Repository: Send + Sync {
    async fn save_nutritional_info(&self, info: &NutritionalInfo) -> anyhow::Result<()>;
    async fn save_scan(&self, scan: &ConfirmedScan) -> anyhow::Result<()>;
    async fn nutritional_info(&self, id: &str) -> anyhow::Result<Option<NutritionalInfo>>;
    /// Newest first.
    async fn recent_nutritional_info(&self, limit: i64) -> anyhow::Result<Vec<NutritionalInfo>>;
}

pub struct PgRepository {
    db: PgPool,
}

impl PgRepository {
    pub fn new(db: PgPool) -> Self {
        Self { db }
    }
}

#[async_trait]
impl Repository for PgRepository {
    async fn save_nutritional_info(&self, info: &NutritionalInfo) -> anyhow::Result<()> {
        sqlx::query(
            r#"
            INSERT INTO nutritional_info (
                id, total_weight, calories, protein, carbs, fat, fiber, sugar,
                image_path, created_at, updated_at
            ) VALUES ($1, $2, $3, $4, $5, $6, $7, $8, $9, $10, $11)
            ON CONFLICT (id) DO UPDATE SET
                total_weight = EXCLUDED.total_weight,
                calories     = EXCLUDED.calories,
                protein      = EXCLUDED.protein,
                carbs        = EXCLUDED.carbs,
                fat          = EXCLUDED.fat,
                fiber        = EXCLUDED.fiber,
                sugar        = EXCLUDED.sugar,
                image_path   = EXCLUDED.image_path,
                updated_at   = EXCLUDED.updated_at
            "#,
        )
        .bind(&info.id)
        .bind(info.total_weight)
        .bind(info.calories)
        .bind(info.protein)
        .bind(info.carbs)
        .bind(info.fat)
        .bind(info.fiber)
        .bind(info.sugar)
        .bind(info.image_path.as_deref())
        .bind(info.created_at)
        .bind(info.updated_at)
        .execute(&self.db)
        .await
        .context("upsert nutritional_info")?;
        Ok(())
    }

    async fn save_scan(&self, scan: &ConfirmedScan) -> anyhow::Result<()> {
        sqlx::query(
            r#"
            INSERT INTO nutrition_scans (
                id, nutritional_info_id, image_data, status, error, created_at, updated_at
            ) VALUES ($1, $2, $3, $4, $5, $6, $7)
            ON CONFLICT (id) DO UPDATE SET
                image_data = EXCLUDED.image_data,
                status     = EXCLUDED.status,
                error      = EXCLUDED.error,
                updated_at = EXCLUDED.updated_at
            "#,
        )
        .bind(&scan.id)
        .bind(&scan.result.id)
        .bind(&scan.image_data)
        .bind(scan.status.as_str())
        .bind(scan.error.as_deref())
        .bind(scan.created_at)
        .bind(scan.updated_at)
        .execute(&self.db)
        .await
        .context("upsert nutrition_scans")?;
        Ok(())
    }

    async fn nutritional_info(&self, id: &str) -> anyhow::Result<Option<NutritionalInfo>> {
        let row = sqlx::query_as::<_, NutritionalInfo>(
            r#"
            SELECT id, total_weight, calories, protein, carbs, fat, fiber, sugar,
                   image_path, created_at, updated_at
              FROM nutritional_info
             WHERE id = $1
            "#,
        )
        .bind(id)
        .fetch_optional(&self.db)
        .await
        .context("get nutritional_info")?;
        Ok(row)
    }

    async fn recent_nutritional_info(&self, limit: i64) -> anyhow::Result<Vec<NutritionalInfo>> {
        let rows = sqlx::query_as::<_, NutritionalInfo>(
            r#"
            SELECT id, total_weight, calories, protein, carbs, fat, fiber, sugar,
                   image_path, created_at, updated_at
              FROM nutritional_info
             ORDER BY created_at DESC
             LIMIT $1
            "#,
        )
        .bind(limit)
        .fetch_all(&self.db)
        .await
        .context("list recent nutritional_info")?;
        Ok(rows)
    }
}

/// Process-local repository; contents are lost on restart.
#[derive(Default)]
pub struct MemoryRepository {
    infos: RwLock<HashMap<String, NutritionalInfo>>,
    scans: RwLock<HashMap<String, ConfirmedScan>>,
}

impl MemoryRepository {
    pub fn new() -> Self {
        Self::default()
    }

    #[cfg(test)]
    pub fn scan_count(&self) -> usize {
        self.scans.read().map(|s| s.len()).unwrap_or(0)
    }

    /// The confirmed scan recorded for a nutritional info id, if any.
    #[cfg(test)]
    pub fn scan_for(&self, info_id: &str) -> Option<ConfirmedScan> {
        let scans = self.scans.read().ok()?;
        scans.values().find(|s| s.result.id == info_id).cloned()
    }
}

fn poisoned<T>(_: T) -> anyhow::Error {
    anyhow::anyhow!("memory repository lock poisoned")
}

#[async_trait]
impl Repository for MemoryRepository {
    async fn save_nutritional_info(&self, info: &NutritionalInfo) -> anyhow::Result<()> {
        let mut infos = self.infos.write().map_err(poisoned)?;
        match infos.get_mut(&info.id) {
            // upsert keeps the original creation time
            Some(existing) => {
                let created_at = existing.created_at;
                *existing = info.clone();
                existing.created_at = created_at;
            }
            None => {
                infos.insert(info.id.clone(), info.clone());
            }
        }
        Ok(())
    }

    async fn save_scan(&self, scan: &ConfirmedScan) -> anyhow::Result<()> {
        self.scans
            .write()
            .map_err(poisoned)?
            .insert(scan.id.clone(), scan.clone());
        Ok(())
    }

    async fn nutritional_info(&self, id: &str) -> anyhow::Result<Option<NutritionalInfo>> {
        Ok(self.infos.read().map_err(poisoned)?.get(id).cloned())
    }

    async fn recent_nutritional_info(&self, limit: i64) -> anyhow::Result<Vec<NutritionalInfo>> {
        let mut rows: Vec<_> = self.infos.read().map_err(poisoned)?.values().cloned().collect();
        rows.sort_by(|a, b| b.created_at.cmp(&a.created_at));
        rows.truncate(usize::try_from(limit).unwrap_or(0));
        Ok(rows)
    }
}
