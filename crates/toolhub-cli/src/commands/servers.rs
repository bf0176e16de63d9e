//! List configured servers.

use serde_json::json;
use toolhub_core::Settings;
use toolhub_mcp::ServerEntry;

use super::with_manager;

fn target(entry: &ServerEntry) -> String {
    match (&entry.command, &entry.url) {
        (Some(command), _) if entry.args.is_empty() => command.clone(),
        (Some(command), _) => format!("{} {}", command, entry.args.join(" ")),
        (None, Some(url)) => url.clone(),
        (None, None) => "-".to_string(),
    }
}

pub async fn run(settings: &Settings, json: bool) -> anyhow::Result<()> {
    with_manager(settings, |manager| async move {
        let entries: Vec<(String, ServerEntry)> = manager
            .server_names()
            .into_iter()
            .filter_map(|name| manager.server_entry(&name).map(|entry| (name, entry)))
            .collect();

        if json {
            let listing: Vec<_> = entries
                .iter()
                .map(|(name, entry)| {
                    json!({ "name": name, "transport": entry.transport, "target": target(entry) })
                })
                .collect();
            println!("{}", serde_json::to_string_pretty(&listing)?);
            return Ok(());
        }

        if entries.is_empty() {
            println!("No servers configured in {}", settings.mcp.config_path.display());
            return Ok(());
        }

        println!("Configured servers:");
        for (name, entry) in &entries {
            println!("  {:<20} {:<16} {}", name, entry.transport, target(entry));
        }
        Ok(())
    })
    .await
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_target_formatting() {
        let entry = ServerEntry::stdio("npx", vec!["-y".into(), "server-files".into()]);
        assert_eq!(target(&entry), "npx -y server-files");

        let entry = ServerEntry::remote("sse", "http://localhost:8000/sse");
        assert_eq!(target(&entry), "http://localhost:8000/sse");
    }
}
