//! Capability manager (C7): collects required capabilities, reconciles
//! them against user grants, and produces the per-plugin grant map that
//! parameterizes the runtime's host functions (§4.7).

use std::collections::HashSet;
use std::path::PathBuf;

use futures::stream::{self, StreamExt, TryStreamExt};
use tokio_util::sync::CancellationToken;

use crate::capability::{Capability, CapabilityKind, GrantMap, GrantSet};
use crate::config;
use crate::error::RegletError;
use crate::profile::CompiledProfile;
use crate::runtime::{self, Runtime};

pub struct CapabilityManager<'a> {
    runtime: &'a Runtime,
    plugin_dir: PathBuf,
    config_path: PathBuf,
    trust_all: bool,
}

impl<'a> CapabilityManager<'a> {
    pub fn new(runtime: &'a Runtime, plugin_dir: PathBuf, config_path: PathBuf, trust_all: bool) -> Self {
        CapabilityManager { runtime, plugin_dir, config_path, trust_all }
    }

    /// Run the full §4.7 reconciliation and return the per-plugin grant
    /// map ready to parameterize the engine's runtime.
    pub async fn reconcile(&self, profile: &CompiledProfile) -> Result<GrantMap, RegletError> {
        let plugin_names = profile.referenced_plugin_names();
        let per_plugin = self.collect_declared_capabilities(&plugin_names).await?;

        let mut required: GrantSet = HashSet::new();
        for (_, caps) in &per_plugin {
            required.extend(caps.iter().cloned());
        }

        let effective_global = self.resolve_effective_grants(&required).await?;

        let mut grant_map = GrantMap::new();
        for (name, caps) in per_plugin {
            let declared: GrantSet = caps.into_iter().collect();
            let intersected: GrantSet = declared.intersection(&effective_global).cloned().collect();
            grant_map.insert(name, intersected);
        }
        Ok(grant_map)
    }

    /// Step 2-3: for every referenced plugin, load it and call `describe`
    /// to learn its declared capabilities, bounded by available CPUs.
    async fn collect_declared_capabilities(&self, names: &[String]) -> Result<Vec<(String, Vec<Capability>)>, RegletError> {
        let concurrency = std::thread::available_parallelism().map(|n| n.get()).unwrap_or(4);
        let plugin_dir = self.plugin_dir.clone();
        let runtime = self.runtime;

        stream::iter(names.iter().cloned())
            .map(move |name| {
                let plugin_dir = plugin_dir.clone();
                async move {
                    let path = runtime::plugin_wasm_path(&plugin_dir, &name);
                    let bytes = std::fs::read(&path)
                        .map_err(|e| RegletError::config(format!("failed to read plugin '{name}' at '{}': {e}", path.display())))?;
                    let plugin = runtime.load_plugin(&name, &bytes)?;
                    let info = plugin.describe(GrantSet::new(), CancellationToken::new()).await?;
                    Ok::<_, RegletError>((name, info.capabilities))
                }
            })
            .buffer_unordered(concurrency)
            .try_collect()
            .await
    }

    /// Steps 4-9: reconcile `required` against trust-all, persisted
    /// grants, and (if needed) an interactive prompt.
    async fn resolve_effective_grants(&self, required: &GrantSet) -> Result<GrantSet, RegletError> {
        if self.trust_all {
            return Ok(required.clone());
        }

        let persisted = config::load_grants(&self.config_path)?;
        let missing: GrantSet = required.difference(&persisted).cloned().collect();
        if missing.is_empty() {
            return Ok(persisted);
        }

        if !is_terminal::is_terminal(std::io::stdin()) {
            return Err(RegletError::capability(format_missing_message(&missing)));
        }

        let (granted, save) = prompt_for_missing(missing).await?;
        let mut effective = persisted;
        effective.extend(granted);
        if save {
            config::save_grants(&self.config_path, &effective)?;
        }
        Ok(effective)
    }
}

fn describe_capability(cap: &Capability) -> String {
    match cap.kind {
        CapabilityKind::Fs => match cap.pattern.split_once(':') {
            Some(("read", path)) => format!("Read files: {path}"),
            Some(("write", path)) => format!("Write files: {path}"),
            _ => format!("Filesystem access: {}", cap.pattern),
        },
        CapabilityKind::Network if cap.pattern == "outbound:private" => {
            "Network access to private/reserved IPs (localhost, 192.168.x.x, 10.x.x.x, 169.254.169.254, etc.)".to_string()
        }
        CapabilityKind::Network => match cap.pattern.split_once(':') {
            Some((direction, ports)) => format!("{direction} network access on port(s) {ports}"),
            None => format!("Network access: {}", cap.pattern),
        },
        CapabilityKind::Env => format!("Read environment variable(s) matching: {}", cap.pattern),
        CapabilityKind::Exec => format!("Execute: {}", cap.pattern),
    }
}

fn format_missing_message(missing: &GrantSet) -> String {
    let mut ordered: Vec<&Capability> = missing.iter().collect();
    ordered.sort_by(|a, b| a.to_string().cmp(&b.to_string()));
    let list = ordered.into_iter().map(|c| format!("  - {c}  ({})", describe_capability(c))).collect::<Vec<_>>().join("\n");
    format!(
        "missing required capabilities:\n{list}\n\ngrant them by: running `check` interactively and approving the prompt, passing --trust-plugins, or adding them to the config file's `capabilities:` list"
    )
}

async fn prompt_for_missing(missing: GrantSet) -> Result<(GrantSet, bool), RegletError> {
    let mut ordered: Vec<Capability> = missing.into_iter().collect();
    ordered.sort_by(|a, b| a.to_string().cmp(&b.to_string()));

    tokio::task::spawn_blocking(move || -> Result<(GrantSet, bool), RegletError> {
        use std::io::Write;

        let mut granted = GrantSet::new();
        let mut save = false;
        for cap in ordered {
            println!("{} {} -> {}", cap.kind, cap.pattern, describe_capability(&cap));
            print!("grant? [y/N/a(lways)] ");
            std::io::stdout().flush().ok();

            let mut line = String::new();
            std::io::stdin().read_line(&mut line).map_err(|e| RegletError::config(format!("failed to read stdin: {e}")))?;

            match line.trim().to_ascii_lowercase().as_str() {
                "y" | "yes" => {
                    granted.insert(cap);
                }
                "a" | "always" => {
                    granted.insert(cap);
                    save = true;
                }
                _ => return Err(RegletError::capability(format!("capability denied by user: {cap}"))),
            }
        }
        Ok((granted, save))
    })
    .await
    .map_err(|e| RegletError::internal(format!("capability prompt task panicked: {e}")))?
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn describes_private_sentinel_distinctly() {
        let cap = Capability::network("outbound:private");
        assert!(describe_capability(&cap).contains("private/reserved"));
    }

    #[test]
    fn describes_fs_read_and_write() {
        assert!(describe_capability(&Capability::fs("read:/etc/**")).starts_with("Read files"));
        assert!(describe_capability(&Capability::fs("write:/tmp/*")).starts_with("Write files"));
    }

    #[test]
    fn missing_message_lists_every_capability() {
        let mut missing = GrantSet::new();
        missing.insert(Capability::network("outbound:443"));
        missing.insert(Capability::exec("/usr/bin/curl"));
        let message = format_missing_message(&missing);
        assert!(message.contains("network:outbound:443"));
        assert!(message.contains("exec:/usr/bin/curl"));
        assert!(message.contains("--trust-plugins"));
    }
}
