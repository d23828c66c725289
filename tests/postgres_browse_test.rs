#[cfg(feature = "integration-tests")]
mod common;

#[cfg(feature = "integration-tests")]
mod tests {
    use crate::common::TestContext;
    use pgforge::core::{ConnectionSide, ForgeConfig};
    use pgforge::{backup, browse, drivers, ops};
    use serde_json::json;

    const SCHEMA: &[&str] = &[
        "CREATE TABLE items (id int PRIMARY KEY, name text NOT NULL, price numeric(8,2), tags text[], span interval)",
        "INSERT INTO items VALUES (1, 'Anvil', 99.50, '{iron}', '1 day'), (2, 'Hammer', 12.00, NULL, NULL), (3, 'Tongs', NULL, '{}', '2 hours')",
        "CREATE SEQUENCE item_seq",
    ];

    fn object(value: serde_json::Value) -> serde_json::Map<String, serde_json::Value> {
        value.as_object().unwrap().clone()
    }

    #[tokio::test]
    async fn test_browse_and_edit() {
        let ctx = TestContext::setup().await;
        ctx.seed_source(SCHEMA).await;
        let config = ForgeConfig::default();
        let db = drivers::create_driver(&ctx.source_descriptor(), ConnectionSide::Database, &config)
            .await
            .unwrap();

        let table = ops::describe_table(db.as_ref(), "items").await.unwrap();
        assert_eq!(table.primary_key, vec!["id".to_string()]);
        let tags = table.column("tags").unwrap();
        assert_eq!(tags.data_type, "_text");

        let page = browse::fetch_page(
            db.as_ref(),
            "items",
            &browse::PageRequest {
                search: Some("ham".to_string()),
                ..Default::default()
            },
            &config,
        )
        .await
        .unwrap();
        assert_eq!(page.total_rows, 1);
        assert_eq!(page.rows[0]["name"], json!("Hammer"));

        let inserted = browse::insert_row(
            db.as_ref(),
            "items",
            &object(json!({"id": 4, "name": "Bellows", "price": "5.25", "span": "3 days"})),
        )
        .await
        .unwrap();
        assert_eq!(inserted, 1);

        let updated = browse::update_rows(
            db.as_ref(),
            "items",
            &object(json!({"price": null})),
            &object(json!({"id": 4})),
        )
        .await
        .unwrap();
        assert_eq!(updated, 1);

        let deleted = browse::delete_rows(db.as_ref(), "items", &object(json!({"name": "Tongs"})))
            .await
            .unwrap();
        assert_eq!(deleted, 1);

        let rows = browse::run_query(db.as_ref(), "SELECT id FROM items ORDER BY id")
            .await
            .unwrap();
        assert_eq!(rows, vec![json!({"id": 1}), json!({"id": 2}), json!({"id": 4})]);

        db.close().await;
    }

    #[tokio::test]
    async fn test_backup_restores() {
        let ctx = TestContext::setup().await;
        ctx.seed_source(SCHEMA).await;
        let config = ForgeConfig::default();
        let db = drivers::create_driver(&ctx.source_descriptor(), ConnectionSide::Database, &config)
            .await
            .unwrap();

        let mut out = Vec::new();
        let summary = backup::write_backup(db.as_ref(), None, &mut out).await.unwrap();
        assert_eq!(summary.tables, 1);
        assert_eq!(summary.rows, 3);

        // replay the dump into the destination, statement by statement
        let dump = String::from_utf8(out).unwrap();
        for statement in dump.lines().filter(|l| !l.starts_with("--") && !l.trim().is_empty()) {
            sqlx::query(statement).execute(&ctx.dest_pool).await.unwrap();
        }

        let restored: Vec<(i32, String, Option<String>)> =
            sqlx::query_as("SELECT id, name, span::text FROM items ORDER BY id")
                .fetch_all(&ctx.dest_pool)
                .await
                .unwrap();
        assert_eq!(restored.len(), 3);
        assert_eq!(restored[0].2.as_deref(), Some("1 day"));
    }

    #[tokio::test]
    async fn test_query_decodes_wide_values() {
        let ctx = TestContext::setup().await;
        let config = ForgeConfig::default();
        let db = drivers::create_driver(&ctx.source_descriptor(), ConnectionSide::Database, &config)
            .await
            .unwrap();

        let rows = browse::run_query(
            db.as_ref(),
            "SELECT 123456789012345678901234567890.5::numeric AS big, 'NaN'::numeric AS nan, \
             1.50::numeric AS small, 'infinity'::timestamptz AS ts, '-infinity'::date AS day, \
             '2024-01-02'::date AS plain_day",
        )
        .await
        .unwrap();
        assert_eq!(rows[0]["big"], json!("123456789012345678901234567890.5"));
        assert_eq!(rows[0]["nan"], json!("NaN"));
        assert_eq!(rows[0]["ts"], json!("infinity"));
        assert_eq!(rows[0]["day"], json!("-infinity"));
        assert_eq!(rows[0]["plain_day"], json!("2024-01-02"));
        assert!(!rows[0]["small"].is_null());

        // no text decoding for interval: an error, not a placeholder
        let err = browse::run_query(db.as_ref(), "SELECT interval '1 day' AS span")
            .await
            .unwrap_err();
        assert_eq!(err.kind(), "database");
        assert!(err.to_string().contains("interval"));

        let rows = browse::run_query(db.as_ref(), "SELECT (interval '1 day')::text AS span")
            .await
            .unwrap();
        assert_eq!(rows[0]["span"], json!("1 day"));

        db.close().await;
    }

    #[tokio::test]
    async fn test_read_only_query_cannot_write() {
        let ctx = TestContext::setup().await;
        ctx.seed_source(SCHEMA).await;
        let config = ForgeConfig::default();
        let db = drivers::create_driver(&ctx.source_descriptor(), ConnectionSide::Database, &config)
            .await
            .unwrap();

        // passes the lexical guard, stopped by the READ ONLY transaction
        let err = browse::run_query(db.as_ref(), "SELECT nextval('item_seq')")
            .await
            .unwrap_err();
        assert_eq!(err.kind(), "database");
    }
}
