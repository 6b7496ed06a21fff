use sea_orm_migration::prelude::*;

#[derive(DeriveMigrationName)]
pub struct Migration;

#[async_trait::async_trait]
impl MigrationTrait for Migration {
    async fn up(&self, manager: &SchemaManager) -> Result<(), DbErr> {
        let sql = r#"
            CREATE TABLE "queue_messages" (
                "id" uuid PRIMARY KEY,
                "queue" varchar NOT NULL,
                "actor" varchar NOT NULL,
                "consumer_id" varchar,
                "body" jsonb NOT NULL
            );

            CREATE TABLE "queue_consumers" (
                "id" varchar PRIMARY KEY,
                "last_alive" timestamp NOT NULL
            );

            CREATE INDEX "queue_messages_queue_consumer_id_idx"
                ON "queue_messages" ("queue", "consumer_id");

            COMMENT ON TABLE "queue_messages" IS 'Durable queued messages; rows are deleted once processed';

            COMMENT ON TABLE "queue_consumers" IS 'One row per live consumer, used to detect and recover from dead consumers';
        "#;
        crate::from_sql(manager, sql).await
    }

    async fn down(&self, manager: &SchemaManager) -> Result<(), DbErr> {
        let sql = r#"
            DROP TABLE "queue_messages";
            DROP TABLE "queue_consumers";
        "#;
        crate::from_sql(manager, sql).await
    }
}
