// CLI record commands: records, uninstall, enable, disable
//
// These work on the local record store directly, so they run with or without
// a daemon.

use std::sync::Arc;

use super::{ItemArgs, StoreArgs};
use crate::daemon::sync::RecordSync;
use crate::daemon::{effective_data_dir, load_config, open_records};
use crate::models::Record;

async fn open_store(store: &StoreArgs) -> anyhow::Result<Arc<RecordSync>> {
    let loaded = load_config(store.config.as_deref())?;
    let data_dir = effective_data_dir(&loaded.config, store.data_dir.as_deref());
    open_records(&data_dir).await
}

fn display_title(record: &Record) -> String {
    let title = record.title.as_deref().unwrap_or("-");
    if title.chars().count() > 23 {
        let cut: String = title.chars().take(20).collect();
        format!("{}...", cut)
    } else {
        title.to_string()
    }
}

fn print_records(records: &[Record]) {
    println!(
        "{:<14}{:<12}{:<18}{:<25}{}",
        "ITEM", "PROFILE", "STATUS", "TITLE", "PATH"
    );
    for record in records {
        println!(
            "{:<14}{:<12}{:<18}{:<25}{}",
            record.content_item_id,
            record.profile_id,
            record.status.to_string(),
            display_title(record),
            record.installed_path.as_deref().unwrap_or("-")
        );
        if let Some(ref error) = record.error {
            println!("{:<14}error: {}", "", error);
        }
    }
}

/// wsq records
pub async fn cmd_records(
    store: &StoreArgs,
    profile: Option<&str>,
    json: bool,
) -> anyhow::Result<()> {
    let records = open_store(store).await?.list(profile).await?;

    if json {
        println!("{}", serde_json::to_string_pretty(&records)?);
        return Ok(());
    }

    if records.is_empty() {
        println!("No records found.");
        return Ok(());
    }

    print_records(&records);
    Ok(())
}

/// wsq uninstall
pub async fn cmd_uninstall(args: &ItemArgs) -> anyhow::Result<()> {
    let record = open_store(&args.store)
        .await?
        .uninstall(&args.item, &args.profile)
        .await?;
    println!(
        "Item {} uninstalled for profile {}.",
        record.content_item_id, record.profile_id
    );
    Ok(())
}

/// wsq enable / wsq disable
pub async fn cmd_set_enabled(args: &ItemArgs, enabled: bool) -> anyhow::Result<()> {
    let record = open_store(&args.store)
        .await?
        .set_enabled(&args.item, &args.profile, enabled)
        .await?;
    println!(
        "Item {} is now {} ({}).",
        record.content_item_id,
        record.status,
        record.installed_path.as_deref().unwrap_or("-")
    );
    Ok(())
}
