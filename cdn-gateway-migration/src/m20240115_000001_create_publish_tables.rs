use sea_orm_migration::prelude::*;

#[derive(DeriveMigrationName)]
pub struct Migration;

#[async_trait::async_trait]
impl MigrationTrait for Migration {
    async fn up(&self, manager: &SchemaManager) -> Result<(), DbErr> {
        let sql = r#"
            CREATE TABLE "publishes" (
                "id" uuid PRIMARY KEY,
                "env" varchar NOT NULL,
                "state" varchar NOT NULL,
                "updated" timestamp
            );

            CREATE TABLE "items" (
                "id" uuid PRIMARY KEY,
                "publish_id" uuid NOT NULL REFERENCES "publishes"("id") ON DELETE CASCADE,
                "web_uri" varchar NOT NULL,
                "object_key" varchar,
                "link_to" varchar,
                "content_type" varchar,
                "updated" timestamp,
                CONSTRAINT "items_publish_id_web_uri_key" UNIQUE ("publish_id", "web_uri")
            );

            CREATE TABLE "tasks" (
                "id" uuid PRIMARY KEY,
                "state" varchar NOT NULL,
                "updated" timestamp
            );

            CREATE TABLE "commit_tasks" (
                "id" uuid PRIMARY KEY REFERENCES "tasks"("id") ON DELETE CASCADE,
                "publish_id" uuid NOT NULL,
                "commit_mode" varchar NOT NULL
            );

            CREATE INDEX "items_publish_id_idx" ON "items" ("publish_id");

            COMMENT ON TABLE "publishes" IS 'Staged sets of content updates applied atomically';

            COMMENT ON TABLE "tasks" IS 'Background work requested by clients or by commits';
        "#;
        crate::from_sql(manager, sql).await
    }

    async fn down(&self, manager: &SchemaManager) -> Result<(), DbErr> {
        let sql = r#"
            DROP TABLE "commit_tasks";
            DROP TABLE "tasks";
            DROP TABLE "items";
            DROP TABLE "publishes";
        "#;
        crate::from_sql(manager, sql).await
    }
}
