// CLI daemon commands: serve, status

use reqwest::Client;
use serde_json::Value;

use super::{base_url, handle_request_error, StoreArgs};

/// Install the stderr log subscriber used by long-running commands.
/// A no-op when `-v` already installed one.
pub(crate) fn init_tracing(default_filter: &str) {
    let _ = tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| default_filter.into()),
        )
        .with_writer(std::io::stderr)
        .try_init();
}

/// wsq serve
pub async fn cmd_serve(
    host: &str,
    store: &StoreArgs,
    port_override: Option<u16>,
) -> anyhow::Result<()> {
    init_tracing("info");

    // Only a non-default global --host overrides the config file.
    let host_override = if host != "127.0.0.1" {
        Some(host)
    } else {
        None
    };

    crate::daemon::start_daemon(
        store.config.as_deref(),
        store.data_dir.as_deref(),
        host_override,
        port_override,
    )
    .await
}

/// wsq status
pub async fn cmd_status(host: &str, port: u16, verbose: bool) -> anyhow::Result<()> {
    let client = Client::new();
    let url = format!("{}/health", base_url(host, port));

    let response = client
        .get(&url)
        .send()
        .await
        .map_err(|e| handle_request_error(e, host, port))?;

    let status = response.status();
    let body: Value = response
        .json()
        .await
        .map_err(|e| anyhow::anyhow!("Failed to parse response: {}", e))?;

    if !status.is_success() {
        let message = body["message"]
            .as_str()
            .unwrap_or("Daemon returned an error");
        eprintln!("Error: {}", message);
        std::process::exit(1);
    }

    let daemon_status = body["status"].as_str().unwrap_or("unknown");
    let version = body["version"].as_str().unwrap_or("unknown");
    let uptime = body["uptime_seconds"].as_u64().unwrap_or(0);
    let running = body["running_jobs"].as_u64().unwrap_or(0);
    let queued = body["queued_jobs"].as_u64().unwrap_or(0);
    let total = body["total_jobs"].as_u64().unwrap_or(0);
    let data_dir = body["data_dir"].as_str().unwrap_or("unknown");

    println!("Daemon Status: {}", daemon_status);
    println!("  Address:     http://{}:{}", host, port);
    println!("  Data Dir:    {}", data_dir);
    println!(
        "  Jobs:        {} running / {} queued / {} total",
        running, queued, total
    );
    println!("  Uptime:      {}", format_uptime(uptime));
    println!("  Version:     {}", version);

    if verbose {
        println!("\nRaw response:");
        println!("{}", serde_json::to_string_pretty(&body)?);
    }

    Ok(())
}

fn format_uptime(seconds: u64) -> String {
    let days = seconds / 86400;
    let hours = (seconds % 86400) / 3600;
    let mins = (seconds % 3600) / 60;
    let secs = seconds % 60;

    if days > 0 {
        format!("{}d {}h {}m {}s", days, hours, mins, secs)
    } else if hours > 0 {
        format!("{}h {}m {}s", hours, mins, secs)
    } else if mins > 0 {
        format!("{}m {}s", mins, secs)
    } else {
        format!("{}s", secs)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_format_uptime_units() {
        assert_eq!(format_uptime(0), "0s");
        assert_eq!(format_uptime(59), "59s");
        assert_eq!(format_uptime(61), "1m 1s");
        assert_eq!(format_uptime(3_661), "1h 1m 1s");
        assert_eq!(format_uptime(90_061), "1d 1h 1m 1s");
    }

    #[tokio::test]
    async fn test_status_reports_unreachable_daemon() {
        // Port 9 (discard) is essentially never listening on loopback.
        let err = cmd_status("127.0.0.1", 9, false)
            .await
            .expect_err("nothing is listening");
        assert!(err.to_string().contains("Could not connect to daemon"));
    }
}
