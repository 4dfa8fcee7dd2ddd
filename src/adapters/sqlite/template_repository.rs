//! SQLite persistence for plan templates.

use sqlx::SqlitePool;

use crate::domain::clock;
use crate::domain::errors::{CoreError, CoreResult};
use crate::domain::ids::TemplateId;
use crate::domain::models::Template;

#[derive(Clone)]
pub struct SqliteTemplateRepository {
    pool: SqlitePool,
}

impl SqliteTemplateRepository {
    pub fn new(pool: SqlitePool) -> Self {
        Self { pool }
    }

    pub async fn create(&self, template: &Template) -> CoreResult<()> {
        sqlx::query(
            "INSERT INTO templates (id, name, description, template, created_at, updated_at)
             VALUES (?, ?, ?, ?, ?, ?)",
        )
        .bind(template.id.as_str())
        .bind(&template.name)
        .bind(&template.description)
        .bind(serde_json::to_string(&template.template)?)
        .bind(super::to_ms(template.created_at))
        .bind(super::to_ms(template.updated_at))
        .execute(&self.pool)
        .await?;
        Ok(())
    }

    pub async fn get(&self, id: &TemplateId) -> CoreResult<Option<Template>> {
        let row: Option<TemplateRow> = sqlx::query_as("SELECT * FROM templates WHERE id = ?")
            .bind(id.as_str())
            .fetch_optional(&self.pool)
            .await?;
        row.map(Template::try_from).transpose()
    }

    pub async fn get_by_name(&self, name: &str) -> CoreResult<Option<Template>> {
        let row: Option<TemplateRow> = sqlx::query_as("SELECT * FROM templates WHERE name = ?")
            .bind(name)
            .fetch_optional(&self.pool)
            .await?;
        row.map(Template::try_from).transpose()
    }

    pub async fn list(&self) -> CoreResult<Vec<Template>> {
        let rows: Vec<TemplateRow> = sqlx::query_as("SELECT * FROM templates ORDER BY name")
            .fetch_all(&self.pool)
            .await?;
        rows.into_iter().map(Template::try_from).collect()
    }

    pub async fn update_template(
        &self,
        id: &TemplateId,
        template: &serde_json::Value,
    ) -> CoreResult<()> {
        let result = sqlx::query("UPDATE templates SET template = ?, updated_at = ? WHERE id = ?")
            .bind(serde_json::to_string(template)?)
            .bind(clock::now_ms())
            .bind(id.as_str())
            .execute(&self.pool)
            .await?;
        if result.rows_affected() == 0 {
            return Err(CoreError::not_found("template", id.as_str()));
        }
        Ok(())
    }
}

#[derive(sqlx::FromRow)]
struct TemplateRow {
    id: String,
    name: String,
    description: Option<String>,
    template: String,
    created_at: i64,
    updated_at: i64,
}

impl TryFrom<TemplateRow> for Template {
    type Error = CoreError;

    fn try_from(row: TemplateRow) -> Result<Self, Self::Error> {
        Ok(Template {
            id: super::parse_id(&row.id)?,
            name: row.name,
            description: row.description,
            template: super::parse_json(&row.template)?,
            created_at: super::from_ms(row.created_at),
            updated_at: super::from_ms(row.updated_at),
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::adapters::sqlite::create_migrated_test_pool;
    use serde_json::json;

    #[tokio::test]
    async fn test_create_get_by_name() {
        let pool = create_migrated_test_pool().await.unwrap();
        let repo = SqliteTemplateRepository::new(pool);

        let tmpl = Template::new("release", json!({"tasks": [{"name": "tag"}]}))
            .with_description("Cut a release");
        repo.create(&tmpl).await.unwrap();

        let fetched = repo.get_by_name("release").await.unwrap().unwrap();
        assert_eq!(fetched.id, tmpl.id);
        assert_eq!(fetched.template["tasks"][0]["name"], "tag");
    }

    #[tokio::test]
    async fn test_name_is_unique() {
        let pool = create_migrated_test_pool().await.unwrap();
        let repo = SqliteTemplateRepository::new(pool);
        repo.create(&Template::new("x", json!({}))).await.unwrap();
        assert!(repo.create(&Template::new("x", json!({}))).await.is_err());
    }
}
