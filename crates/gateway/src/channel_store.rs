use {
    anyhow::Result,
    async_trait::async_trait,
    secrecy::{ExposeSecret, Secret},
    sqlx::SqlitePool,
};

use ladderbot_channels::{ChannelPatch, ChannelRegistration, ChannelStore, Error};

/// Internal row type for sqlx mapping.
#[derive(sqlx::FromRow)]
struct ChannelRow {
    username: String,
    player_id: Option<String>,
    auth_level: String,
    access_token: Option<String>,
    refresh_token: Option<String>,
    token_expires_at: Option<i64>,
    created_at: i64,
    updated_at: i64,
}

impl TryFrom<ChannelRow> for ChannelRegistration {
    type Error = anyhow::Error;

    fn try_from(r: ChannelRow) -> Result<Self> {
        Ok(Self {
            username: r.username,
            player_id: r.player_id,
            auth_level: r.auth_level.parse()?,
            access_token: r.access_token.map(Secret::new),
            refresh_token: r.refresh_token.map(Secret::new),
            token_expires_at: r.token_expires_at,
            created_at: r.created_at,
            updated_at: r.updated_at,
        })
    }
}

/// SQLite-backed channel store.
pub struct SqliteChannelStore {
    pool: SqlitePool,
}

impl SqliteChannelStore {
    pub fn new(pool: SqlitePool) -> Self {
        Self { pool }
    }
}

fn expose(secret: &Option<Secret<String>>) -> Option<&str> {
    secret.as_ref().map(|s| s.expose_secret().as_str())
}

#[async_trait]
impl ChannelStore for SqliteChannelStore {
    async fn get(&self, username: &str) -> Result<Option<ChannelRegistration>> {
        let row = sqlx::query_as::<_, ChannelRow>("SELECT * FROM channels WHERE username = ?")
            .bind(username)
            .fetch_optional(&self.pool)
            .await?;
        row.map(TryInto::try_into).transpose()
    }

    async fn list(&self) -> Result<Vec<ChannelRegistration>> {
        let rows = sqlx::query_as::<_, ChannelRow>(
            "SELECT * FROM channels ORDER BY updated_at DESC, username",
        )
        .fetch_all(&self.pool)
        .await?;
        rows.into_iter().map(TryInto::try_into).collect()
    }

    async fn upsert(&self, registration: ChannelRegistration) -> Result<()> {
        registration.validate()?;
        // The WHERE clause refuses oauth -> irc downgrades; a refused update
        // affects zero rows.
        let result = sqlx::query(
            r#"INSERT INTO channels (username, player_id, auth_level, access_token, refresh_token,
                                     token_expires_at, created_at, updated_at)
               VALUES (?, ?, ?, ?, ?, ?, ?, ?)
               ON CONFLICT(username) DO UPDATE SET
                 player_id = excluded.player_id,
                 auth_level = excluded.auth_level,
                 access_token = excluded.access_token,
                 refresh_token = excluded.refresh_token,
                 token_expires_at = excluded.token_expires_at,
                 updated_at = excluded.updated_at
               WHERE channels.auth_level != 'oauth' OR excluded.auth_level = 'oauth'"#,
        )
        .bind(&registration.username)
        .bind(&registration.player_id)
        .bind(registration.auth_level.as_str())
        .bind(expose(&registration.access_token))
        .bind(expose(&registration.refresh_token))
        .bind(registration.token_expires_at)
        .bind(registration.created_at)
        .bind(registration.updated_at)
        .execute(&self.pool)
        .await?;

        if result.rows_affected() == 0 {
            return Err(Error::invalid_transition(&registration.username).into());
        }
        Ok(())
    }

    async fn update(&self, username: &str, patch: ChannelPatch) -> Result<ChannelRegistration> {
        patch.validate()?;
        let mut tx = self.pool.begin().await?;
        let row = sqlx::query_as::<_, ChannelRow>("SELECT * FROM channels WHERE username = ?")
            .bind(username)
            .fetch_optional(&mut *tx)
            .await?
            .ok_or_else(|| Error::unknown_channel(username))?;
        let mut registration = ChannelRegistration::try_from(row)?;
        registration.apply_patch(patch);

        sqlx::query(
            r#"UPDATE channels SET
                 player_id = ?, auth_level = ?, access_token = ?, refresh_token = ?,
                 token_expires_at = ?, updated_at = ?
               WHERE username = ?"#,
        )
        .bind(&registration.player_id)
        .bind(registration.auth_level.as_str())
        .bind(expose(&registration.access_token))
        .bind(expose(&registration.refresh_token))
        .bind(registration.token_expires_at)
        .bind(registration.updated_at)
        .bind(username)
        .execute(&mut *tx)
        .await?;
        tx.commit().await?;
        Ok(registration)
    }

    async fn delete(&self, username: &str) -> Result<()> {
        sqlx::query("DELETE FROM channels WHERE username = ?")
            .bind(username)
            .execute(&self.pool)
            .await?;
        Ok(())
    }
}
