//! Plain-text control protocol served on a loopback TCP socket. One
//! command per line, persistent connections.

use std::sync::Arc;

use log::{info, warn};
use serde_json::json;
use tokio::io::{AsyncBufReadExt, AsyncWriteExt, BufReader};
use tokio::net::TcpStream;

use crate::state::ServerState;

const TRENDLOG_DATA_DEFAULT: usize = 10;
const TRENDLOG_DATA_MAX: usize = 100;

/// Reply to a single command line, and whether the connection should
/// close afterwards.
pub struct Reply {
    pub text: String,
    pub close: bool,
}

impl Reply {
    fn line(text: impl Into<String>) -> Self {
        Self {
            text: text.into(),
            close: false,
        }
    }
}

pub async fn handle_line(state: &ServerState, line: &str) -> Reply {
    let line = line.trim();
    let (verb, rest) = match line.split_once(char::is_whitespace) {
        Some((verb, rest)) => (verb, rest.trim()),
        None => (line, ""),
    };

    match verb {
        "PING" => Reply::line("PONG"),
        "QUIT" => Reply {
            text: "BYE".to_string(),
            close: true,
        },
        "PIDFILE" => pidfile(rest),
        "CFGJSON" => cfgjson(state, rest).await,
        "STATUS" => status(state).await,
        "trendlogs" => {
            let list: Vec<_> = state
                .trendlogs
                .list()
                .await
                .iter()
                .map(summary_json)
                .collect();
            Reply::line(json!(list).to_string())
        }
        "trendlog" => match parse_instance(rest) {
            Some(instance) => match state.trendlogs.detail(instance).await {
                Some(summary) => Reply::line(summary_json(&summary).to_string()),
                None => Reply::line("ERR unknown trendlog"),
            },
            None => Reply::line("ERR usage: trendlog <instance>"),
        },
        "trendlog-data" => trendlog_data(state, rest).await,
        "trendlog-enable" => {
            let mut parts = rest.split_whitespace();
            let instance = parts.next().and_then(|v| v.parse::<u32>().ok());
            let enabled = match parts.next() {
                Some("true") => Some(true),
                Some("false") => Some(false),
                _ => None,
            };
            match (instance, enabled) {
                (Some(instance), Some(enabled)) => {
                    if state.trendlogs.set_enabled(instance, enabled).await {
                        Reply::line("OK")
                    } else {
                        Reply::line("ERR unknown trendlog")
                    }
                }
                _ => Reply::line("ERR usage: trendlog-enable <instance> <true|false>"),
            }
        }
        "trendlog-clear" => match parse_instance(rest) {
            Some(instance) => {
                if state.trendlogs.clear(instance).await {
                    Reply::line("OK")
                } else {
                    Reply::line("ERR unknown trendlog")
                }
            }
            None => Reply::line("ERR usage: trendlog-clear <instance>"),
        },
        _ => Reply::line("ERR unknown command"),
    }
}

fn pidfile(path: &str) -> Reply {
    if path.is_empty() {
        return Reply::line("ERR usage: PIDFILE <path>");
    }
    match std::fs::write(path, format!("{}\n", std::process::id())) {
        Ok(()) => Reply::line("OK"),
        Err(err) => Reply::line(format!("ERR {err}")),
    }
}

async fn cfgjson(state: &ServerState, json: &str) -> Reply {
    if json.is_empty() {
        return Reply::line("ERR usage: CFGJSON <json>");
    }
    let config = match crate::config::ServerConfig::parse(json) {
        Ok(config) => config,
        Err(err) => return Reply::line(format!("ERR {err}")),
    };
    match state.apply_config(&config).await {
        Ok(()) => {
            info!("object model replaced via CFGJSON ({} objects)", config.objects.len());
            Reply::line("OK")
        }
        Err(reason) => Reply::line(format!("ERR {reason}")),
    }
}

async fn status(state: &ServerState) -> Reply {
    let mut counts = serde_json::Map::new();
    for (object_type, count) in state.registry.counts().await {
        let key = object_type.name().map_or_else(
            || object_type.to_u16().to_string(),
            |name| name.to_string(),
        );
        counts.insert(key, json!(count));
    }
    let status = json!({
        "deviceId": state.registry.device_id().await,
        "deviceName": state.registry.device_name().await,
        "objects": counts,
        "trendlogs": state.trendlogs.list().await.len(),
    });
    Reply::line(status.to_string())
}

async fn trendlog_data(state: &ServerState, rest: &str) -> Reply {
    let mut parts = rest.split_whitespace();
    let Some(instance) = parts.next().and_then(|v| v.parse::<u32>().ok()) else {
        return Reply::line("ERR usage: trendlog-data <instance> [count]");
    };
    let count = match parts.next() {
        Some(raw) => match raw.parse::<usize>() {
            Ok(count) => count.min(TRENDLOG_DATA_MAX),
            Err(_) => return Reply::line("ERR usage: trendlog-data <instance> [count]"),
        },
        None => TRENDLOG_DATA_DEFAULT,
    };
    match state.trendlogs.data(instance, count).await {
        Some(records) => {
            let records: Vec<_> = records
                .iter()
                .map(|r| json!({"timestamp": r.timestamp, "value": r.value}))
                .collect();
            Reply::line(json!(records).to_string())
        }
        None => Reply::line("ERR unknown trendlog"),
    }
}

fn summary_json(summary: &crate::trendlog::TrendLogSummary) -> serde_json::Value {
    json!({
        "instance": summary.instance,
        "name": summary.name,
        "source": format!(
            "{}:{}",
            summary.source.object_type().name().unwrap_or("proprietary"),
            summary.source.instance()
        ),
        "interval": summary.interval_seconds,
        "enabled": summary.enabled,
        "records": summary.record_count,
    })
}

fn parse_instance(rest: &str) -> Option<u32> {
    let mut parts = rest.split_whitespace();
    let instance = parts.next()?.parse().ok()?;
    if parts.next().is_some() {
        return None;
    }
    Some(instance)
}

/// Serves one control connection until QUIT or EOF.
pub async fn serve_connection(state: Arc<ServerState>, stream: TcpStream) {
    let (read_half, mut write_half) = stream.into_split();
    let mut reader = BufReader::new(read_half);
    let mut line = String::new();
    loop {
        line.clear();
        match reader.read_line(&mut line).await {
            Ok(0) => break,
            Ok(_) => {
                let reply = handle_line(&state, &line).await;
                let mut out = reply.text;
                out.push('\n');
                if let Err(err) = write_half.write_all(out.as_bytes()).await {
                    warn!("control socket write failed: {err}");
                    break;
                }
                if reply.close {
                    break;
                }
            }
            Err(err) => {
                warn!("control socket read failed: {err}");
                break;
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::handle_line;
    use crate::state::ServerState;

    fn state() -> ServerState {
        ServerState::new(260001, "bacnetStackServer", None)
    }

    #[tokio::test]
    async fn ping_quit_and_unknown() {
        let state = state();
        let reply = handle_line(&state, "PING\n").await;
        assert_eq!(reply.text, "PONG");
        assert!(!reply.close);

        let reply = handle_line(&state, "QUIT").await;
        assert_eq!(reply.text, "BYE");
        assert!(reply.close);

        let reply = handle_line(&state, "FROBNICATE 1 2").await;
        assert_eq!(reply.text, "ERR unknown command");
    }

    #[tokio::test]
    async fn cfgjson_then_status_reports_counts() {
        let state = state();
        let reply = handle_line(
            &state,
            r#"CFGJSON {"deviceId": 99, "deviceName": "renamed", "objects": [
                {"type": "analog-input", "instance": 1},
                {"type": "analog-input", "instance": 2},
                {"type": "binary-value", "instance": 1},
                {"type": "trendlog", "instance": 1, "source": "analog-input:1"}
            ]}"#,
        )
        .await;
        assert_eq!(reply.text, "OK");

        let reply = handle_line(&state, "STATUS").await;
        let status: serde_json::Value = serde_json::from_str(&reply.text).unwrap();
        assert_eq!(status["deviceId"], 99);
        assert_eq!(status["deviceName"], "renamed");
        assert_eq!(status["objects"]["analog-input"], 2);
        assert_eq!(status["objects"]["binary-value"], 1);
        assert_eq!(status["trendlogs"], 1);
    }

    #[tokio::test]
    async fn cfgjson_rejects_bad_input() {
        let state = state();
        let reply = handle_line(&state, "CFGJSON {not json}").await;
        assert!(reply.text.starts_with("ERR "));

        let reply = handle_line(
            &state,
            r#"CFGJSON {"deviceId": 1, "deviceName": "x", "objects": [
                {"type": "warp-core", "instance": 1}
            ]}"#,
        )
        .await;
        assert!(reply.text.starts_with("ERR "));

        let reply = handle_line(&state, "CFGJSON").await;
        assert!(reply.text.starts_with("ERR "));
    }

    #[tokio::test]
    async fn trendlog_verbs() {
        let state = state();
        handle_line(
            &state,
            r#"CFGJSON {"deviceId": 1, "deviceName": "x", "objects": [
                {"type": "analog-input", "instance": 1, "presentValue": 5.0},
                {"type": "trendlog", "instance": 7, "source": "analog-input:1", "interval": 30}
            ]}"#,
        )
        .await;

        let reply = handle_line(&state, "trendlogs").await;
        let list: serde_json::Value = serde_json::from_str(&reply.text).unwrap();
        assert_eq!(list.as_array().unwrap().len(), 1);
        assert_eq!(list[0]["instance"], 7);
        assert_eq!(list[0]["source"], "analog-input:1");
        assert_eq!(list[0]["interval"], 30);

        let reply = handle_line(&state, "trendlog 7").await;
        let detail: serde_json::Value = serde_json::from_str(&reply.text).unwrap();
        assert_eq!(detail["records"], 0);

        assert_eq!(handle_line(&state, "trendlog 8").await.text, "ERR unknown trendlog");

        let reply = handle_line(&state, "trendlog-data 7").await;
        let records: serde_json::Value = serde_json::from_str(&reply.text).unwrap();
        assert!(records.as_array().unwrap().is_empty());

        assert_eq!(handle_line(&state, "trendlog-enable 7 false").await.text, "OK");
        assert_eq!(
            handle_line(&state, "trendlog-enable 7 maybe").await.text,
            "ERR usage: trendlog-enable <instance> <true|false>"
        );
        assert_eq!(handle_line(&state, "trendlog-clear 7").await.text, "OK");
        assert_eq!(
            handle_line(&state, "trendlog-clear 9").await.text,
            "ERR unknown trendlog"
        );
    }
}
