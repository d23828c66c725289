use crate::core::{
    ColumnRecord, ConnectionSide, DataRow, ForgeColumn, ForgeConfig, ForgeError, ForgeValue,
    TableStats,
};
use crate::connection::ConnectionDescriptor;
use crate::{DatabaseDriver, RowStream};
use async_trait::async_trait;
use chrono::{NaiveDate, NaiveDateTime, NaiveTime};
use futures::StreamExt;
use ipnetwork::IpNetwork;
use log::debug;
use rust_decimal::Decimal;
use sqlx::postgres::{PgArguments, PgPoolOptions, PgRow, PgValueFormat};
use sqlx::query::Query;
use sqlx::{Column, PgPool, Postgres, Row, TypeInfo, ValueRef};
use std::str::FromStr;
use std::time::Duration;
use uuid::Uuid;

const TABLE_STATS_SQL: &str = r"
SELECT
    t.table_name::text AS table_name,
    COALESCE(s.n_live_tup, 0)::int8 AS row_count,
    COALESCE(pg_total_relation_size(s.relid), 0)::int8 AS size_bytes
FROM information_schema.tables t
LEFT JOIN pg_stat_user_tables s
    ON s.schemaname::text = t.table_schema::text
   AND s.relname::text = t.table_name::text
WHERE t.table_schema = 'public'
  AND t.table_type = 'BASE TABLE'
ORDER BY t.table_name";

const COLUMNS_SQL: &str = r"
SELECT
    c.table_name::text AS table_name,
    c.column_name::text AS column_name,
    c.data_type::text AS data_type,
    c.udt_name::text AS udt_name,
    c.is_nullable::text AS is_nullable,
    c.column_default::text AS column_default,
    c.character_maximum_length::int4 AS max_length,
    c.ordinal_position::int4 AS ordinal_position,
    EXISTS (
        SELECT 1
        FROM information_schema.table_constraints tc
        JOIN information_schema.key_column_usage kcu
            ON kcu.constraint_schema = tc.constraint_schema
           AND kcu.constraint_name = tc.constraint_name
           AND kcu.table_name = tc.table_name
        WHERE tc.constraint_type = 'PRIMARY KEY'
          AND tc.table_schema = 'public'
          AND tc.table_name = c.table_name
          AND kcu.column_name = c.column_name
    ) AS is_primary_key
FROM information_schema.columns c
JOIN information_schema.tables t
    ON t.table_schema = c.table_schema
   AND t.table_name = c.table_name
WHERE c.table_schema = 'public'
  AND t.table_type = 'BASE TABLE'
  AND ($1::text IS NULL OR c.table_name::text = $1)
ORDER BY c.table_name, c.ordinal_position";

pub struct PostgresDriver {
    pub pool: PgPool,
    pub side: ConnectionSide,
    pub log_sql: bool,
}

impl PostgresDriver {
    /// Opens a request-scoped single-connection pool.
    pub async fn connect(
        descriptor: &ConnectionDescriptor,
        side: ConnectionSide,
        config: &ForgeConfig,
    ) -> Result<Self, ForgeError> {
        let options = descriptor.connect_options()?;
        debug!("connecting to {side} database {}", descriptor.redacted());

        let pool = PgPoolOptions::new()
            .max_connections(1)
            .acquire_timeout(Duration::from_secs(config.connect_timeout_secs()))
            .connect_with(options)
            .await
            .map_err(|e| ForgeError::connection(side, e))?;

        Ok(Self {
            pool,
            side,
            log_sql: config.log_sql(),
        })
    }

    fn trace_sql(&self, sql: &str) {
        if self.log_sql {
            debug!("[{}] {}", self.side, sql.trim());
        }
    }
}

/// Declared type for CREATE TABLE; arrays and user types only carry their
/// real name in `udt_name`.
fn declared_type(data_type: &str, udt_name: &str) -> String {
    match data_type {
        "ARRAY" | "USER-DEFINED" => udt_name.to_string(),
        _ => data_type.to_string(),
    }
}

fn column_record(row: &PgRow) -> Result<ColumnRecord, ForgeError> {
    let data_type: String = row.try_get("data_type")?;
    let udt_name: String = row.try_get("udt_name")?;
    let is_nullable: String = row.try_get("is_nullable")?;

    Ok(ColumnRecord {
        table_name: row.try_get("table_name")?,
        column: ForgeColumn {
            name: row.try_get("column_name")?,
            data_type: declared_type(&data_type, &udt_name),
            udt_name,
            is_nullable: is_nullable == "YES",
            default: row.try_get("column_default")?,
            max_length: row.try_get("max_length")?,
            ordinal_position: row.try_get("ordinal_position")?,
            is_primary_key: row.try_get("is_primary_key")?,
        },
    })
}

fn decode_error(idx: usize, message: String) -> ForgeError {
    ForgeError::Database(sqlx::Error::ColumnDecode {
        index: idx.to_string(),
        source: message.into(),
    })
}

fn be_word(buf: &[u8], at: usize) -> Option<u16> {
    Some(u16::from_be_bytes([*buf.get(at)?, *buf.get(at + 1)?]))
}

/// Renders a binary `numeric` value as its exact decimal text.
///
/// Layout: ndigits, weight, sign, dscale, then ndigits base-10000 digits.
/// `NaN` and the infinities come back as PostgreSQL spells them.
pub fn numeric_text(buf: &[u8]) -> Result<String, String> {
    let header = |at| be_word(buf, at).ok_or_else(|| "truncated numeric header".to_string());
    let ndigits = usize::from(header(0)?);
    let weight = i64::from(i16::from_be_bytes(header(2)?.to_be_bytes()));
    let sign = header(4)?;
    let dscale = usize::from(header(6)?);

    let negative = match sign {
        0x0000 => false,
        0x4000 => true,
        0xC000 => return Ok("NaN".to_string()),
        0xD000 => return Ok("Infinity".to_string()),
        0xF000 => return Ok("-Infinity".to_string()),
        other => return Err(format!("unknown numeric sign {other:#06x}")),
    };

    let digits = (0..ndigits)
        .map(|i| be_word(buf, 8 + 2 * i))
        .collect::<Option<Vec<u16>>>()
        .ok_or_else(|| "truncated numeric digits".to_string())?;
    let digit_at = |position: i64| {
        usize::try_from(position)
            .ok()
            .and_then(|p| digits.get(p).copied())
            .unwrap_or(0)
    };

    let mut text = String::new();
    if negative {
        text.push('-');
    }
    if weight < 0 {
        text.push('0');
    } else {
        text.push_str(&digit_at(0).to_string());
        for position in 1..=weight {
            text.push_str(&format!("{:04}", digit_at(position)));
        }
    }

    if dscale > 0 {
        let mut fraction = String::with_capacity(dscale + 4);
        let mut position = weight + 1;
        while fraction.len() < dscale {
            fraction.push_str(&format!("{:04}", digit_at(position)));
            position += 1;
        }
        fraction.truncate(dscale);
        text.push('.');
        text.push_str(&fraction);
    }
    Ok(text)
}

fn pg_epoch() -> Option<NaiveDateTime> {
    NaiveDate::from_ymd_opt(2000, 1, 1).map(|d| d.and_time(NaiveTime::MIN))
}

/// Binary timestamp: microseconds since 2000-01-01, `i64::MAX`/`MIN` for the infinities.
fn decode_timestamp(buf: &[u8], idx: usize, with_zone: bool) -> Result<ForgeValue, ForgeError> {
    let micros = <[u8; 8]>::try_from(buf)
        .map(i64::from_be_bytes)
        .map_err(|_| decode_error(idx, "timestamp must be 8 bytes".to_string()))?;
    let ts = match micros {
        i64::MAX => return Ok(ForgeValue::Raw("infinity".to_string())),
        i64::MIN => return Ok(ForgeValue::Raw("-infinity".to_string())),
        us => pg_epoch()
            .and_then(|epoch| epoch.checked_add_signed(chrono::Duration::microseconds(us)))
            .ok_or_else(|| decode_error(idx, format!("timestamp {us}us is out of range")))?,
    };
    Ok(if with_zone {
        ForgeValue::TimestampTz(ts.and_utc())
    } else {
        ForgeValue::Timestamp(ts)
    })
}

/// Binary date: days since 2000-01-01, `i32::MAX`/`MIN` for the infinities.
fn decode_date(buf: &[u8], idx: usize) -> Result<ForgeValue, ForgeError> {
    let days = <[u8; 4]>::try_from(buf)
        .map(i32::from_be_bytes)
        .map_err(|_| decode_error(idx, "date must be 4 bytes".to_string()))?;
    match days {
        i32::MAX => Ok(ForgeValue::Raw("infinity".to_string())),
        i32::MIN => Ok(ForgeValue::Raw("-infinity".to_string())),
        d => pg_epoch()
            .and_then(|epoch| epoch.date().checked_add_signed(chrono::Duration::days(i64::from(d))))
            .map(ForgeValue::Date)
            .ok_or_else(|| decode_error(idx, format!("date {d} days is out of range"))),
    }
}

/// `Decimal` when it holds the value exactly, the text otherwise.
fn numeric_value(text: String) -> ForgeValue {
    match Decimal::from_str(&text) {
        Ok(d) if d.to_string() == text => ForgeValue::Numeric(d),
        _ => ForgeValue::Raw(text),
    }
}

/// Decodes one cell by its PostgreSQL type name.
///
/// Types without a native decoding must arrive as text; anything else is
/// a decode error naming the type.
fn decode_value(row: &PgRow, idx: usize) -> Result<ForgeValue, ForgeError> {
    let raw = row.try_get_raw(idx)?;
    if raw.is_null() {
        return Ok(ForgeValue::Null);
    }
    if matches!(raw.format(), PgValueFormat::Text) {
        let text = raw.as_str().map_err(|e| decode_error(idx, e.to_string()))?;
        return Ok(ForgeValue::Raw(text.to_string()));
    }

    let type_name = row.columns()[idx].type_info().name().to_string();
    let value = match type_name.as_str() {
        "BOOL" => ForgeValue::Boolean(row.try_get::<bool, _>(idx)?),
        "INT2" => ForgeValue::Integer(i64::from(row.try_get::<i16, _>(idx)?)),
        "INT4" => ForgeValue::Integer(i64::from(row.try_get::<i32, _>(idx)?)),
        "INT8" => ForgeValue::Integer(row.try_get::<i64, _>(idx)?),
        "FLOAT4" => ForgeValue::Float(f64::from(row.try_get::<f32, _>(idx)?)),
        "FLOAT8" => ForgeValue::Float(row.try_get::<f64, _>(idx)?),
        "NUMERIC" | "TIMESTAMP" | "TIMESTAMPTZ" | "DATE" => {
            let buf = raw.as_bytes().map_err(|e| decode_error(idx, e.to_string()))?;
            match type_name.as_str() {
                "NUMERIC" => numeric_value(numeric_text(buf).map_err(|e| decode_error(idx, e))?),
                "DATE" => decode_date(buf, idx)?,
                zoned => decode_timestamp(buf, idx, zoned == "TIMESTAMPTZ")?,
            }
        }
        "TEXT" | "VARCHAR" | "BPCHAR" | "NAME" => ForgeValue::Text(row.try_get::<String, _>(idx)?),
        "TIME" => ForgeValue::Time(row.try_get::<NaiveTime, _>(idx)?),
        "JSON" | "JSONB" => ForgeValue::Json(row.try_get::<serde_json::Value, _>(idx)?),
        "UUID" => ForgeValue::Uuid(row.try_get::<Uuid, _>(idx)?),
        "INET" | "CIDR" => ForgeValue::Inet(row.try_get::<IpNetwork, _>(idx)?),
        "BYTEA" => ForgeValue::Bytes(row.try_get::<Vec<u8>, _>(idx)?),
        other => ForgeValue::Raw(row.try_get::<String, _>(idx).map_err(|_| {
            decode_error(
                idx,
                format!("type {} has no text decoding, cast it with ::text", other.to_lowercase()),
            )
        })?),
    };
    Ok(value)
}

/// Decodes a row in column order.
pub fn decode_row(row: &PgRow) -> Result<DataRow, ForgeError> {
    let mut data = DataRow::with_capacity(row.columns().len());
    for (idx, col) in row.columns().iter().enumerate() {
        data.insert(col.name().to_string(), decode_value(row, idx)?);
    }
    Ok(data)
}

fn bind_value<'q>(
    query: Query<'q, Postgres, PgArguments>,
    value: &ForgeValue,
) -> Query<'q, Postgres, PgArguments> {
    match value {
        ForgeValue::Null => query.bind(None::<String>),
        ForgeValue::Text(s) | ForgeValue::Raw(s) => query.bind(s.clone()),
        ForgeValue::Integer(i) => query.bind(*i),
        ForgeValue::Float(f) => query.bind(*f),
        ForgeValue::Numeric(d) => query.bind(*d),
        ForgeValue::Boolean(b) => query.bind(*b),
        ForgeValue::Timestamp(ts) => query.bind(*ts),
        ForgeValue::TimestampTz(ts) => query.bind(*ts),
        ForgeValue::Date(d) => query.bind(*d),
        ForgeValue::Time(t) => query.bind(*t),
        ForgeValue::Json(v) => query.bind(sqlx::types::Json(v.clone())),
        ForgeValue::Uuid(u) => query.bind(*u),
        ForgeValue::Inet(net) => query.bind(*net),
        ForgeValue::Bytes(b) => query.bind(b.clone()),
    }
}

fn build_query<'q>(sql: &'q str, params: &[ForgeValue]) -> Query<'q, Postgres, PgArguments> {
    params
        .iter()
        .fold(sqlx::query(sql), |query, value| bind_value(query, value))
}

#[async_trait]
impl DatabaseDriver for PostgresDriver {
    async fn ping(&self) -> Result<(), ForgeError> {
        sqlx::query("SELECT 1")
            .execute(&self.pool)
            .await
            .map_err(|e| ForgeError::connection(self.side, e))?;
        Ok(())
    }

    async fn fetch_table_stats(&self) -> Result<Vec<TableStats>, ForgeError> {
        self.trace_sql(TABLE_STATS_SQL);
        let rows = sqlx::query(TABLE_STATS_SQL).fetch_all(&self.pool).await?;

        rows.iter()
            .map(|row| -> Result<TableStats, ForgeError> {
                Ok(TableStats {
                    name: row.try_get("table_name")?,
                    row_count: row.try_get("row_count")?,
                    size_bytes: row.try_get("size_bytes")?,
                })
            })
            .collect()
    }

    async fn fetch_columns(
        &self,
        table_name: Option<&str>,
    ) -> Result<Vec<ColumnRecord>, ForgeError> {
        self.trace_sql(COLUMNS_SQL);
        let rows = sqlx::query(COLUMNS_SQL)
            .bind(table_name)
            .fetch_all(&self.pool)
            .await?;

        rows.iter().map(column_record).collect()
    }

    async fn execute(&self, sql: &str) -> Result<u64, ForgeError> {
        self.trace_sql(sql);
        let result = sqlx::query(sql).execute(&self.pool).await?;
        Ok(result.rows_affected())
    }

    async fn execute_with(&self, sql: &str, params: &[ForgeValue]) -> Result<u64, ForgeError> {
        self.trace_sql(sql);
        let result = build_query(sql, params).execute(&self.pool).await?;
        Ok(result.rows_affected())
    }

    async fn fetch_rows(
        &self,
        sql: &str,
        params: &[ForgeValue],
    ) -> Result<Vec<DataRow>, ForgeError> {
        self.trace_sql(sql);
        let rows = build_query(sql, params).fetch_all(&self.pool).await?;
        rows.iter().map(decode_row).collect()
    }

    async fn fetch_rows_read_only(&self, sql: &str) -> Result<Vec<DataRow>, ForgeError> {
        self.trace_sql(sql);
        let mut tx = self.pool.begin().await?;
        sqlx::query("SET TRANSACTION READ ONLY")
            .execute(&mut *tx)
            .await?;
        let rows = sqlx::query(sql).fetch_all(&mut *tx).await?;
        tx.rollback().await?;

        rows.iter().map(decode_row).collect()
    }

    async fn stream_rows<'a>(&'a self, sql: &'a str) -> Result<RowStream<'a>, ForgeError> {
        self.trace_sql(sql);
        let stream = sqlx::query(sql).fetch(&self.pool).map(|row_result| {
            row_result
                .map_err(ForgeError::from)
                .and_then(|row| decode_row(&row))
        });
        Ok(Box::pin(stream))
    }

    async fn close(&self) {
        self.pool.close().await;
    }
}
