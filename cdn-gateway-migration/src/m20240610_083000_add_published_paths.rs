use sea_orm_migration::prelude::*;

#[derive(DeriveMigrationName)]
pub struct Migration;

#[async_trait::async_trait]
impl MigrationTrait for Migration {
    async fn up(&self, manager: &SchemaManager) -> Result<(), DbErr> {
        let sql = r#"
            CREATE TABLE "published_paths" (
                "id" serial PRIMARY KEY,
                "env" varchar NOT NULL,
                "web_uri" varchar NOT NULL,
                "updated" timestamp NOT NULL,
                CONSTRAINT "published_paths_env_web_uri_key" UNIQUE ("env", "web_uri")
            );

            COMMENT ON TABLE "published_paths" IS 'Lightweight log of paths ever committed to the CDN, kept for cache flushing';
        "#;
        crate::from_sql(manager, sql).await
    }

    async fn down(&self, manager: &SchemaManager) -> Result<(), DbErr> {
        let sql = r#"
            DROP TABLE "published_paths";
        "#;
        crate::from_sql(manager, sql).await
    }
}
