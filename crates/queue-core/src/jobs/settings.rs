use sqlx::PgPool;

/// The `queue_settings` singleton (§3).
#[derive(Debug, Clone, Copy, sqlx::FromRow)]
pub struct QueueSettings {
    pub paused: bool,
    pub concurrency: i32,
}

#[derive(Clone)]
pub struct SettingsRepo {
    pool: PgPool,
}

impl SettingsRepo {
    pub fn new(pool: PgPool) -> Self {
        Self { pool }
    }

    pub async fn get(&self) -> anyhow::Result<QueueSettings> {
        let row = sqlx::query_as::<_, QueueSettings>(
            "SELECT paused, concurrency FROM queue_settings WHERE id = true",
        )
        .fetch_one(&self.pool)
        .await?;
        Ok(row)
    }

    pub async fn set_paused(&self, paused: bool) -> anyhow::Result<()> {
        sqlx::query("UPDATE queue_settings SET paused = $1 WHERE id = true")
            .bind(paused)
            .execute(&self.pool)
            .await?;
        Ok(())
    }

    pub async fn set_concurrency(&self, concurrency: i32) -> anyhow::Result<()> {
        sqlx::query("UPDATE queue_settings SET concurrency = $1 WHERE id = true")
            .bind(concurrency.max(1))
            .execute(&self.pool)
            .await?;
        Ok(())
    }
}
