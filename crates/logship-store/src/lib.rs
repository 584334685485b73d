//! Columnar writer: ensures the per-(schema, module) table exists and
//! batch-inserts log records into it transactionally.
//!
//! Grounded on `mqk-db`'s `sqlx::PgPool`-based ingest path, retargeted at
//! the `clickhouse` crate since the store this service writes to is
//! ClickHouse-shaped (one database per schema, `MergeTree` tables).

use std::collections::HashSet;
use std::sync::Arc;

use clickhouse::{Client, Row};
use logship_ingest::Sink;
use logship_model::LogRecord;
use logship_registry::DatabaseCatalog;
use serde::{Deserialize, Serialize};
use tokio::sync::Mutex;

#[derive(Debug, thiserror::Error)]
pub enum StoreError {
    #[error("clickhouse error: {0}")]
    ClickHouse(#[from] clickhouse::error::Error),
}

/// One row as written to (and read back from) a `log_<schema>_<module>`
/// table, in DDL column order. Also the read-side DTO for the HTTP
/// control-plane's SELECT wrappers (spec §4.4.2).
#[derive(Debug, Clone, Row, Serialize, Deserialize)]
pub struct LogRow {
    pub output: String,
    pub detail: String,
    pub error_info: String,
    pub service: String,
    pub client_ip: String,
    pub client_addr: String,
    pub log_level: String,
    pub operator_id: String,
    pub operator: String,
    pub operator_ip: String,
    pub operator_equipment: String,
    pub operator_company: String,
    pub operator_project: String,
    pub operation_time: u32,
    pub push_type: String,
}

impl From<&LogRecord> for LogRow {
    fn from(r: &LogRecord) -> Self {
        Self {
            output: r.output.clone(),
            detail: r.detail.clone(),
            error_info: r.error_info.clone(),
            service: r.service.clone(),
            client_ip: r.client_ip.clone(),
            client_addr: r.client_addr.clone(),
            log_level: r.log_level.clone(),
            operator_id: r.operator_id.clone(),
            operator: r.operator.clone(),
            operator_ip: r.operator_ip.clone(),
            operator_equipment: r.operator_equipment.clone(),
            operator_company: r.operator_company.clone(),
            operator_project: r.operator_project.clone(),
            operation_time: r.timestamp.timestamp().max(0) as u32,
            push_type: r.push_type.to_string(),
        }
    }
}

const TABLE_DDL: &str = "\
output String, \
detail String, \
error_info String, \
service String, \
client_ip String, \
client_addr String, \
log_level String, \
operator_id String, \
operator String, \
operator_ip String, \
operator_equipment String, \
operator_company String, \
operator_project String, \
operation_time DateTime, \
push_type String";

/// Process-wide handle to the ClickHouse-style store. One instance is
/// constructed at daemon startup and shared (by `Arc`) with every receiver
/// and with the schema registry via [`DatabaseCatalog`].
pub struct ColumnarWriter {
    client: Client,
    /// Memoizes tables already created this process lifetime (spec
    /// invariant 4). Held across check-and-set *and* the `CREATE TABLE`
    /// call itself, matching the original's `tablesMu` critical section.
    known_tables: Mutex<HashSet<String>>,
}

impl ColumnarWriter {
    pub fn new(addr: &str, user: &str, password: &str, database: &str) -> Self {
        let url = if addr.starts_with("http://") || addr.starts_with("https://") {
            addr.to_string()
        } else {
            format!("http://{addr}")
        };

        let client = Client::default()
            .with_url(url)
            .with_user(user)
            .with_password(password)
            .with_database(database);

        Self {
            client,
            known_tables: Mutex::new(HashSet::new()),
        }
    }

    /// `CREATE TABLE IF NOT EXISTS <schema>.log_<schema>_<module>` with the
    /// column set from spec §6. Idempotent; safe under concurrent callers.
    pub async fn ensure_table(&self, schema: &str, module: &str) -> Result<(), StoreError> {
        let table = logship_model::table_name(schema, module);
        let mut known = self.known_tables.lock().await;
        if known.contains(&table) {
            return Ok(());
        }

        let ddl = format!(
            "CREATE TABLE IF NOT EXISTS {table} ({TABLE_DDL}) ENGINE = MergeTree() ORDER BY (operation_time)"
        );
        self.client.query(&ddl).execute().await?;
        known.insert(table);
        Ok(())
    }

    /// All records MUST share `(schema, module)` — the table is derived from
    /// `records[0]` (spec §4.2). One prepared insert per record, one commit
    /// for the whole batch; any failure aborts the entire batch.
    pub async fn insert_batch(&self, records: &[LogRecord]) -> Result<(), StoreError> {
        let Some(first) = records.first() else {
            return Ok(());
        };

        self.ensure_table(&first.schema, &first.module).await?;
        let table = first.table_name();

        let mut insert = self.client.insert(&table)?;
        for record in records {
            insert.write(&LogRow::from(record)).await?;
        }
        insert.end().await?;
        Ok(())
    }

    pub async fn insert_one(&self, record: &LogRecord) -> Result<(), StoreError> {
        self.insert_batch(std::slice::from_ref(record)).await
    }

    pub async fn ensure_database(&self, name: &str) -> Result<(), StoreError> {
        let ddl = format!("CREATE DATABASE IF NOT EXISTS {name}");
        self.client.query(&ddl).execute().await?;
        Ok(())
    }

    pub async fn list_databases(&self) -> Result<Vec<String>, StoreError> {
        let names = self
            .client
            .query("SELECT name FROM system.databases")
            .fetch_all::<String>()
            .await?;
        Ok(names)
    }

    /// Module names with a table in `schema` (`GET /modules/:schemaId`,
    /// spec §4.4.2 — out of core, thin SELECT wrapper).
    pub async fn list_modules(&self, schema: &str) -> Result<Vec<String>, StoreError> {
        let prefix = format!("log_{schema}_");
        let table_names = self
            .client
            .query("SELECT name FROM system.tables WHERE database = ?")
            .bind(schema)
            .fetch_all::<String>()
            .await?;
        Ok(table_names
            .into_iter()
            .filter_map(|table| table.strip_prefix(&prefix).map(str::to_string))
            .collect())
    }

    /// All rows for `(schema, module)`, oldest first (`GET /logs/:schema/:module`).
    pub async fn fetch_logs(&self, schema: &str, module: &str) -> Result<Vec<LogRow>, StoreError> {
        let table = logship_model::table_name(schema, module);
        let rows = self
            .client
            .query(&format!("SELECT * FROM {table} ORDER BY operation_time"))
            .fetch_all::<LogRow>()
            .await?;
        Ok(rows)
    }

    /// All rows across every module table of `schema` (`GET /logs/by-schema/:schemaId`).
    pub async fn fetch_logs_by_schema(&self, schema: &str) -> Result<Vec<LogRow>, StoreError> {
        let mut all = Vec::new();
        for module in self.list_modules(schema).await? {
            all.extend(self.fetch_logs(schema, &module).await?);
        }
        Ok(all)
    }
}

#[async_trait::async_trait]
impl DatabaseCatalog for ColumnarWriter {
    async fn ensure_database(&self, name: &str) -> anyhow::Result<()> {
        Ok(ColumnarWriter::ensure_database(self, name).await?)
    }

    async fn list_databases(&self) -> anyhow::Result<Vec<String>> {
        Ok(ColumnarWriter::list_databases(self).await?)
    }
}

#[async_trait::async_trait]
impl Sink<LogRecord> for ColumnarWriter {
    async fn insert_batch(&self, items: Vec<LogRecord>) -> anyhow::Result<()> {
        Ok(ColumnarWriter::insert_batch(self, &items).await?)
    }
}

#[async_trait::async_trait]
impl Sink<LogRecord> for Arc<ColumnarWriter> {
    async fn insert_batch(&self, items: Vec<LogRecord>) -> anyhow::Result<()> {
        Ok(ColumnarWriter::insert_batch(self, &items).await?)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn row_conversion_carries_defaulted_fields() {
        use chrono::DateTime;
        use logship_model::{PushType, RawFields};

        let raw = RawFields {
            output: "ok".into(),
            service: "auth".into(),
            ..Default::default()
        };
        let now = DateTime::from_timestamp(1_700_000_000, 0).unwrap();
        let record =
            LogRecord::from_fields(raw, "app1".into(), "login".into(), PushType::Http, now)
                .unwrap();
        let row = LogRow::from(&record);
        assert_eq!(row.service, "auth");
        assert_eq!(row.client_ip, "0.0.0.0");
        assert_eq!(row.push_type, "http");
        assert_eq!(row.operation_time, 1_700_000_000);
    }
}
