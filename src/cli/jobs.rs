// CLI job commands against a running daemon: list, submit, cancel

use reqwest::Client;
use serde_json::Value;

use super::{base_url, handle_request_error, DownloadArgs};

/// Read a JSON body, exiting with the daemon's message on a non-success status.
async fn read_body(response: reqwest::Response) -> anyhow::Result<Value> {
    let status = response.status();
    let body: Value = response
        .json()
        .await
        .map_err(|e| anyhow::anyhow!("Failed to parse response: {}", e))?;

    if !status.is_success() {
        let message = body["message"].as_str().unwrap_or("Unknown error");
        eprintln!("Error: {}", message);
        std::process::exit(1);
    }
    Ok(body)
}

/// Short form of a job id for tables.
fn short_id(id: &str) -> &str {
    id.get(..8).unwrap_or(id)
}

fn format_progress(job: &Value) -> String {
    match job["progress"].as_f64() {
        Some(p) => format!("{:.0}%", p),
        None => "-".to_string(),
    }
}

/// wsq jobs list
pub async fn cmd_list(host: &str, port: u16, json: bool) -> anyhow::Result<()> {
    let client = Client::new();
    let url = format!("{}/api/jobs", base_url(host, port));

    let response = client
        .get(&url)
        .send()
        .await
        .map_err(|e| handle_request_error(e, host, port))?;
    let body = read_body(response).await?;

    if json {
        println!("{}", serde_json::to_string_pretty(&body)?);
        return Ok(());
    }

    let empty_vec = vec![];
    let jobs = body.as_array().unwrap_or(&empty_vec);

    if jobs.is_empty() {
        println!("No jobs found.");
        return Ok(());
    }

    println!(
        "{:<10}{:<14}{:<12}{:<11}{:<10}{:<6}",
        "ID", "ITEM", "PROFILE", "STATUS", "PROGRESS", "EXIT"
    );

    for job in jobs {
        let id = job["id"].as_str().unwrap_or("?");
        let item = job["content_item_id"].as_str().unwrap_or("?");
        let profile = job["profile_id"].as_str().unwrap_or("?");
        let status = job["status"].as_str().unwrap_or("?");
        let exit = match job["exit_code"].as_i64() {
            Some(code) => code.to_string(),
            None => "-".to_string(),
        };

        println!(
            "{:<10}{:<14}{:<12}{:<11}{:<10}{:<6}",
            short_id(id),
            item,
            profile,
            status,
            format_progress(job),
            exit
        );

        if let Some(error) = job["error"].as_str() {
            println!("          error: {}", error);
        }
    }

    Ok(())
}

/// wsq jobs submit
pub async fn cmd_submit(host: &str, port: u16, target: &DownloadArgs) -> anyhow::Result<()> {
    // An empty tool path lets the daemon use its configured tool.
    let tool = target
        .tool
        .as_ref()
        .map(|t| t.display().to_string())
        .unwrap_or_default();
    let requests = target.requests(&tool, target.mode.unwrap_or_default());

    let client = Client::new();
    let url = format!("{}/api/jobs", base_url(host, port));

    for request in &requests {
        let response = client
            .post(&url)
            .json(request)
            .send()
            .await
            .map_err(|e| handle_request_error(e, host, port))?;
        let body = read_body(response).await?;

        println!(
            "Queued item {} as job {}",
            request.content_item_id,
            body["id"].as_str().unwrap_or("unknown")
        );
    }

    Ok(())
}

/// wsq jobs cancel
pub async fn cmd_cancel(host: &str, port: u16, id: &str) -> anyhow::Result<()> {
    let client = Client::new();
    let url = format!("{}/api/jobs/{}/cancel", base_url(host, port), id);

    let response = client
        .post(&url)
        .send()
        .await
        .map_err(|e| handle_request_error(e, host, port))?;
    let body = read_body(response).await?;

    let status = body["status"].as_str().unwrap_or("unknown");
    println!("Job {} is {}.", id, status);
    Ok(())
}
