//! Postgres snapshot backend.
//!
//! One row per `(ID, MType)` in `metrics.store`. A snapshot write updates
//! each row in place, inserting it when absent, inside one transaction so the
//! read-then-write span of a single call is serialized by the database.

use super::Backend;
use crate::error::Error;
use crate::metric::WireMetric;
use postgres::{Client, NoTls};
use std::time::Duration;

const SCHEMA: &str = r#"
CREATE SCHEMA IF NOT EXISTS metrics;
CREATE TABLE IF NOT EXISTS metrics.store (
    "ID" VARCHAR(256) NOT NULL,
    "MType" VARCHAR(32) NOT NULL,
    "Value" DOUBLE PRECISION,
    "Delta" BIGINT,
    "Hash" VARCHAR(256),
    PRIMARY KEY ("ID", "MType")
);
"#;

const UPDATE: &str = r#"UPDATE metrics.store SET "Value" = $3, "Delta" = $4, "Hash" = $5 WHERE "ID" = $1 AND "MType" = $2"#;

const INSERT: &str = r#"INSERT INTO metrics.store ("ID", "MType", "Value", "Delta", "Hash") VALUES ($1, $2, $3, $4, $5)"#;

const SELECT: &str = r#"SELECT "ID", "MType", "Value", "Delta", "Hash" FROM metrics.store"#;

const PROBE_TIMEOUT: Duration = Duration::from_secs(2);

/// Postgres-backed snapshot storage.
pub struct PostgresBackend {
    dsn: String,
    client: Option<Client>,
}

impl PostgresBackend {
    /// A backend for `dsn`. The connection is made on first use and remade
    /// after any failure.
    pub fn new(dsn: &str) -> PostgresBackend {
        PostgresBackend {
            dsn: dsn.to_string(),
            client: None,
        }
    }

    fn with_client<T, F>(&mut self, f: F) -> Result<T, Error>
    where
        F: FnOnce(&mut Client) -> Result<T, postgres::Error>,
    {
        let stale = self.client.as_ref().map(|c| c.is_closed()).unwrap_or(true);
        if stale {
            self.client = Some(Client::connect(&self.dsn, NoTls)?);
            debug!("connected to database");
        }
        let result = match self.client.as_mut() {
            Some(client) => f(client),
            None => return Err(Error::Internal("database not connected".to_string())),
        };
        result.map_err(|e| {
            if e.as_db_error().is_none() {
                // Transport trouble; reconnect next time.
                self.client = None;
            }
            Error::from(e)
        })
    }
}

/// The `Value` and `Delta` columns for a wire metric.
fn columns(metric: &WireMetric) -> (Option<f64>, Option<i64>) {
    (metric.value, metric.delta)
}

impl Backend for PostgresBackend {
    fn name(&self) -> &str {
        "postgres"
    }

    fn is_database(&self) -> bool {
        true
    }

    fn ensure_schema(&mut self) -> Result<(), Error> {
        self.with_client(|client| client.batch_execute(SCHEMA))
    }

    fn write_snapshot(&mut self, metrics: &[WireMetric]) -> Result<(), Error> {
        self.with_client(|client| {
            let mut tx = client.transaction()?;
            for metric in metrics {
                let (value, delta) = columns(metric);
                let updated = tx.execute(
                    UPDATE,
                    &[&metric.id, &metric.kind, &value, &delta, &metric.hash],
                )?;
                if updated == 0 {
                    tx.execute(
                        INSERT,
                        &[&metric.id, &metric.kind, &value, &delta, &metric.hash],
                    )?;
                }
            }
            tx.commit()
        })
    }

    fn read_snapshot(&mut self) -> Result<Vec<WireMetric>, Error> {
        self.with_client(|client| {
            let rows = client.query(SELECT, &[])?;
            let mut metrics = Vec::with_capacity(rows.len());
            for row in rows {
                let kind: String = row.try_get(1)?;
                let value: Option<f64> = row.try_get(2)?;
                let delta: Option<i64> = row.try_get(3)?;
                let hash: Option<String> = row.try_get(4)?;
                let (value, delta) = match kind.as_str() {
                    "gauge" => (value, None),
                    "counter" => (None, delta),
                    _ => (value, delta),
                };
                metrics.push(WireMetric {
                    id: row.try_get(0)?,
                    kind,
                    value,
                    delta,
                    hash: hash.unwrap_or_default(),
                });
            }
            Ok(metrics)
        })
    }

    fn probe(&mut self) -> Result<(), Error> {
        self.with_client(|client| client.is_valid(PROBE_TIMEOUT))
    }
}

#[cfg(test)]
mod test {
    use super::*;

    #[test]
    fn columns_follow_kind() {
        assert_eq!(columns(&WireMetric::gauge("a", 2.5)), (Some(2.5), None));
        assert_eq!(columns(&WireMetric::counter("b", 7)), (None, Some(7)));
    }

    #[test]
    fn unreachable_database_fails_probe() {
        let mut backend = PostgresBackend::new("host=127.0.0.1 port=1 user=nobody connect_timeout=1");
        assert!(backend.is_database());
        assert!(backend.probe().is_err());
        assert!(backend.client.is_none());
    }
}
