//! Resolves every address behind the proxy fleet's DNS name, fetches HAProxy CSV stats and the
//! reload pid list from each, and merges them into one quorum-checked snapshot.
//!
//! Grounded on the health checker's concurrent-fan-out-then-join shape: one future per target,
//! joined with [`futures::future::join_all`], no shared connection pool across targets (a stuck
//! or reloading instance must never be masked by a healthy one answering the same pooled
//! connection).

use async_trait::async_trait;
use reqwest::Client;
use std::collections::HashMap;
use std::time::Duration;
use url::Url;

use crate::error::CutoverError;

/// The seam the controller programs against; [`ProxyStatsAggregator`] is the only production
/// implementation, faked in tests the same way [`crate::scheduler::SchedulerApi`] is.
#[async_trait]
pub trait ProxyStats: Send + Sync {
    async fn fetch(&self, pxname: &str) -> Result<ProxySnapshot, CutoverError>;
}

/// One non-aggregate row from a `haproxy?stats;csv` response.
#[derive(Debug, Clone)]
pub struct BackendRow {
    pub pxname: String,
    pub svname: String,
    pub status: String,
    pub qcur: i64,
    pub scur: i64,
}

/// A merged, quorum-checked view across every proxy instance behind one DNS name.
#[derive(Debug, Clone)]
pub struct ProxySnapshot {
    pub instance_count: usize,
    pub rows: Vec<BackendRow>,
}

impl ProxySnapshot {
    /// Rows for `pxname` excluding the `FRONTEND`/`BACKEND` aggregate rows.
    pub fn rows_for(&self, pxname: &str) -> impl Iterator<Item = &BackendRow> {
        self.rows.iter().filter(move |r| {
            r.pxname == pxname && r.svname != "FRONTEND" && r.svname != "BACKEND"
        })
    }
}

pub struct ProxyStatsAggregator {
    client: Client,
    lb_url: Url,
}

impl ProxyStatsAggregator {
    pub fn new(lb_url: Url) -> Self {
        let client = Client::builder()
            .timeout(Duration::from_secs(10))
            .build()
            .expect("reqwest client builds with default TLS backend");
        Self { client, lb_url }
    }

    /// Resolves the fleet hostname to every backing address and fetches stats+pids from each,
    /// concurrently. Any fetch failure or any address reporting more than one pid is a soft
    /// failure (`ProxyTransient`): the caller retries after the step delay rather than treating
    /// it as fatal.
    async fn fetch_inner(&self, pxname: &str) -> Result<ProxySnapshot, CutoverError> {
        let host = self
            .lb_url
            .host_str()
            .ok_or_else(|| CutoverError::Validation("marathon-lb URL has no host".into()))?;
        let port = self.lb_url.port_or_known_default().unwrap_or(80);

        let addrs = tokio::net::lookup_host((host, port))
            .await
            .map_err(|err| CutoverError::ProxyTransient(format!("DNS resolution failed: {err}")))?
            .collect::<Vec<_>>();
        if addrs.is_empty() {
            return Err(CutoverError::ProxyTransient(format!(
                "no addresses resolved for {host}"
            )));
        }

        let scheme = self.lb_url.scheme();
        let fetches = addrs.iter().map(|addr| {
            let stats_url = format!("{scheme}://{addr}/haproxy?stats;csv");
            let pids_url = format!("{scheme}://{addr}/_haproxy_getpids");
            let client = self.client.clone();
            async move { fetch_one(&client, &stats_url, &pids_url).await }
        });

        let results = futures::future::join_all(fetches).await;

        let mut csv_buffer = String::new();
        for result in results {
            let (csv, pid_count) = result?;
            if pid_count > 1 {
                return Err(CutoverError::ProxyTransient(format!(
                    "instance reported {pid_count} pids, reload in progress"
                )));
            }
            csv_buffer.push_str(&csv);
            if !csv_buffer.ends_with('\n') {
                csv_buffer.push('\n');
            }
        }

        let (instance_count, rows) = parse_stats_csv(&csv_buffer, pxname);
        Ok(ProxySnapshot {
            instance_count,
            rows,
        })
    }
}

#[async_trait]
impl ProxyStats for ProxyStatsAggregator {
    async fn fetch(&self, pxname: &str) -> Result<ProxySnapshot, CutoverError> {
        self.fetch_inner(pxname).await
    }
}

async fn fetch_one(
    client: &Client,
    stats_url: &str,
    pids_url: &str,
) -> Result<(String, usize), CutoverError> {
    let csv = client
        .get(stats_url)
        .send()
        .await
        .and_then(reqwest::Response::error_for_status)
        .map_err(|err| CutoverError::ProxyTransient(format!("GET {stats_url} failed: {err}")))?
        .text()
        .await
        .map_err(|err| CutoverError::ProxyTransient(format!("reading stats body: {err}")))?;

    let pids = client
        .get(pids_url)
        .send()
        .await
        .and_then(reqwest::Response::error_for_status)
        .map_err(|err| CutoverError::ProxyTransient(format!("GET {pids_url} failed: {err}")))?
        .text()
        .await
        .map_err(|err| CutoverError::ProxyTransient(format!("reading pids body: {err}")))?;

    let pid_count = pids.split_whitespace().count();
    Ok((csv, pid_count))
}

/// Parses every `#`-prefixed header row (each one counts as one proxy instance) and the
/// non-header rows that match `pxname` and are not the `FRONTEND`/`BACKEND` aggregates.
fn parse_stats_csv(buffer: &str, pxname: &str) -> (usize, Vec<BackendRow>) {
    let mut instance_count = 0;
    let mut columns: HashMap<String, usize> = HashMap::new();
    let mut rows = Vec::new();

    for line in buffer.lines() {
        if line.trim().is_empty() {
            continue;
        }
        let fields = parse_csv_line(line);
        if fields.is_empty() {
            continue;
        }
        if fields[0].starts_with('#') {
            instance_count += 1;
            columns.clear();
            let first = fields[0].trim_start_matches('#').trim_start_matches(' ');
            columns.insert(first.to_string(), 0);
            for (idx, name) in fields.iter().enumerate().skip(1) {
                columns.insert(name.clone(), idx);
            }
            continue;
        }

        let row_pxname = fields.first().cloned().unwrap_or_default();
        if row_pxname != pxname {
            continue;
        }
        let svname = field_at(&fields, &columns, "svname");
        if svname == "FRONTEND" || svname == "BACKEND" {
            continue;
        }
        rows.push(BackendRow {
            pxname: row_pxname,
            svname,
            status: field_at(&fields, &columns, "status"),
            qcur: field_at(&fields, &columns, "qcur").parse().unwrap_or(0),
            scur: field_at(&fields, &columns, "scur").parse().unwrap_or(0),
        });
    }

    (instance_count, rows)
}

fn field_at(fields: &[String], columns: &HashMap<String, usize>, name: &str) -> String {
    columns
        .get(name)
        .and_then(|idx| fields.get(*idx))
        .cloned()
        .unwrap_or_default()
}

/// Tokenizes one CSV line on `,`, honoring `'`-quoted fields with doubled-`''` escaping, matching
/// Python's `csv` module with `quotechar="'"`.
fn parse_csv_line(line: &str) -> Vec<String> {
    let mut fields = Vec::new();
    let mut chars = line.chars().peekable();
    let mut current = String::new();
    let mut in_quotes = false;

    while let Some(c) = chars.next() {
        match c {
            '\'' if in_quotes => {
                if chars.peek() == Some(&'\'') {
                    current.push('\'');
                    chars.next();
                } else {
                    in_quotes = false;
                }
            }
            '\'' if current.is_empty() => in_quotes = true,
            ',' if !in_quotes => {
                fields.push(std::mem::take(&mut current));
            }
            other => current.push(other),
        }
    }
    fields.push(current);
    fields
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn parses_plain_header_and_row() {
        let buffer = "# pxname,svname,status,qcur,scur\nsvc_80,10.0.0.1_31001,UP,0,0\n";
        let (instances, rows) = parse_stats_csv(buffer, "svc_80");
        assert_eq!(instances, 1);
        assert_eq!(rows.len(), 1);
        assert_eq!(rows[0].status, "UP");
    }

    #[test]
    fn skips_frontend_and_backend_aggregate_rows() {
        let buffer = concat!(
            "# pxname,svname,status,qcur,scur\n",
            "svc_80,FRONTEND,OPEN,0,0\n",
            "svc_80,BACKEND,UP,0,0\n",
            "svc_80,10.0.0.1_31001,UP,0,0\n",
        );
        let (_, rows) = parse_stats_csv(buffer, "svc_80");
        assert_eq!(rows.len(), 1);
        assert_eq!(rows[0].svname, "10.0.0.1_31001");
    }

    #[test]
    fn counts_one_instance_per_header_row() {
        let buffer = concat!(
            "# pxname,svname,status,qcur,scur\n",
            "svc_80,10.0.0.1_31001,UP,0,0\n",
            "# pxname,svname,status,qcur,scur\n",
            "svc_80,10.0.0.1_31001,MAINT,0,0\n",
        );
        let (instances, rows) = parse_stats_csv(buffer, "svc_80");
        assert_eq!(instances, 2);
        assert_eq!(rows.len(), 2);
    }

    #[test]
    fn ignores_rows_for_a_different_backend() {
        let buffer = concat!(
            "# pxname,svname,status,qcur,scur\n",
            "other_80,10.0.0.1_31001,UP,0,0\n",
        );
        let (_, rows) = parse_stats_csv(buffer, "svc_80");
        assert!(rows.is_empty());
    }

    #[test]
    fn csv_line_honors_single_quote_escaping() {
        let fields = parse_csv_line("'a,b',plain,'it''s'");
        assert_eq!(fields, vec!["a,b".to_string(), "plain".to_string(), "it's".to_string()]);
    }
}
