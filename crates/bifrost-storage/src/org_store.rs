// Organization rows

use bifrost_core::Result;
use uuid::Uuid;

use crate::models::OrganizationRow;
use crate::repositories::Database;

impl Database {
    pub async fn get_organization(&self, id: Uuid) -> Result<Option<OrganizationRow>> {
        let row = sqlx::query_as::<_, OrganizationRow>(
            "SELECT id, name, created_at, updated_at FROM organizations WHERE id = $1",
        )
        .bind(id)
        .fetch_optional(self.pool())
        .await?;

        Ok(row)
    }

    pub async fn list_organizations(&self) -> Result<Vec<OrganizationRow>> {
        let rows = sqlx::query_as::<_, OrganizationRow>(
            "SELECT id, name, created_at, updated_at FROM organizations ORDER BY name",
        )
        .fetch_all(self.pool())
        .await?;

        Ok(rows)
    }
}
