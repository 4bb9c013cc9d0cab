//! Local relay node: the submission service over an in-memory ledger, driven
//! by JSON-lines job requests.

use std::sync::Arc;
use std::time::Duration;

use serde::Deserialize;
use serde_json::json;
use tokio::io::{AsyncBufRead, AsyncBufReadExt, AsyncWrite, AsyncWriteExt};
use tracing::{info, warn};

use txrelay_core::{Identity, JobId};
use txrelay_infra::config::RelayConfig;
use txrelay_infra::jobs::{ErrorClassifier, InMemoryJobStore, JobSnapshot, SubmissionService};
use txrelay_ledger::{GatewayRegistry, InMemoryLedger};

pub type NodeService = SubmissionService<Arc<InMemoryJobStore>>;

const STATUS_POLL: Duration = Duration::from_millis(20);

/// One input line.
#[derive(Debug, Deserialize)]
pub struct JobRequest {
    pub identity: String,
    pub operation: String,
    #[serde(default)]
    pub arguments: Vec<String>,
}

/// Service with one connection to `ledger` per configured identity.
pub fn build_service(config: &RelayConfig, ledger: &InMemoryLedger) -> NodeService {
    let mut gateways = GatewayRegistry::new();
    for identity in &config.identities {
        gateways.register(Identity::new(identity.clone()), Arc::new(ledger.clone()));
    }

    SubmissionService::new(
        InMemoryJobStore::arc(),
        gateways,
        ErrorClassifier::new(),
        config.submission(),
    )
}

/// Enqueue every request from `input`, then write one JSON line per job once
/// it is terminal. Rejected lines are reported immediately.
pub async fn run<R, W>(service: &NodeService, input: R, mut output: W) -> anyhow::Result<()>
where
    R: AsyncBufRead + Unpin,
    W: AsyncWrite + Unpin,
{
    let mut lines = input.lines();
    let mut accepted: Vec<(usize, JobId)> = Vec::new();
    let mut line_no = 0;

    while let Some(line) = lines.next_line().await? {
        line_no += 1;
        if line.trim().is_empty() {
            continue;
        }

        let outcome = serde_json::from_str::<JobRequest>(&line)
            .map_err(anyhow::Error::from)
            .and_then(|request| {
                service
                    .enqueue(&request.operation, request.identity.as_str(), request.arguments)
                    .map_err(anyhow::Error::from)
            });

        match outcome {
            Ok(job_id) => accepted.push((line_no, job_id)),
            Err(e) => {
                warn!(line = line_no, error = %e, "request rejected");
                let rejected = json!({ "line": line_no, "rejected": e.to_string() });
                write_line(&mut output, &rejected).await?;
            }
        }
    }

    info!(jobs = accepted.len(), "input drained, waiting for jobs");
    for (line, job_id) in accepted {
        let snapshot = service.wait_for_terminal(job_id, STATUS_POLL).await?;
        write_line(&mut output, &report(line, &snapshot)).await?;
    }

    output.flush().await?;
    Ok(())
}

fn report(line: usize, snapshot: &JobSnapshot) -> serde_json::Value {
    json!({
        "line": line,
        "job_id": snapshot.job_id,
        "identity": snapshot.identity,
        "operation": snapshot.operation,
        "state": snapshot.state,
        "attempt_count": snapshot.attempt_count,
        "transaction_ids": snapshot.transaction_ids,
        "result": snapshot.result_text(),
        "error": snapshot.error,
    })
}

async fn write_line<W: AsyncWrite + Unpin>(
    output: &mut W,
    value: &serde_json::Value,
) -> anyhow::Result<()> {
    let mut bytes = serde_json::to_vec(value)?;
    bytes.push(b'\n');
    output.write_all(&bytes).await?;
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    fn test_config() -> RelayConfig {
        RelayConfig {
            backoff_base_delay_ms: 1,
            backoff_max_delay_ms: 5,
            poll_interval_ms: 5,
            ..RelayConfig::default()
        }
    }

    #[tokio::test]
    async fn processes_json_lines() {
        let ledger = InMemoryLedger::new();
        let service = build_service(&test_config(), &ledger);
        let pool = service.spawn_workers();

        let input = concat!(
            r#"{"identity":"Org1MSP","operation":"CreateAsset","#,
            r#""arguments":["asset1","blue","5","Tomoko","300"]}"#,
            "\n",
            r#"{"identity":"Org1MSP","operation":"CreateAsset","#,
            r#""arguments":["asset1","red","5","Brad","400"]}"#,
            "\n\n",
            "not json\n",
            r#"{"identity":"Org9MSP","operation":"DeleteAsset","arguments":["asset1"]}"#,
            "\n",
        );
        let mut output = Vec::new();
        run(&service, input.as_bytes(), &mut output).await.unwrap();
        pool.shutdown().await;

        let lines: Vec<serde_json::Value> = String::from_utf8(output)
            .unwrap()
            .lines()
            .map(|l| serde_json::from_str(l).unwrap())
            .collect();
        assert_eq!(lines.len(), 4);

        assert_eq!(lines[0]["line"], 4);
        assert!(lines[0]["rejected"].is_string());
        assert_eq!(lines[1]["line"], 5);
        assert!(lines[1]["rejected"].as_str().unwrap().contains("Org9MSP"));

        let reports: Vec<_> = lines[2..].iter().collect();
        let succeeded = reports.iter().filter(|r| r["state"] == "succeeded").count();
        assert_eq!(succeeded, 1);
        let failed = reports.iter().find(|r| r["state"] == "failed").unwrap();
        assert_eq!(failed["error"]["kind"], "already_exists");
        assert_eq!(failed["attempt_count"], 1);
        assert!(ledger.asset("asset1").is_some());
    }
}
