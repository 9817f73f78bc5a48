mod command_definition;
mod queue_config;

pub use self::command_definition::CommandDefinition;
use self::command_definition::RawCommandDefinition;
pub use self::queue_config::QueueConfig;
use crate::cli::Overrides;
use anyhow::{bail, Context, Result};
use reqwest::Url;
use serde::Deserialize;
use std::collections::{BTreeMap, HashMap};
use std::path::{Path, PathBuf};
use tokio::fs::read_to_string;

#[derive(Debug, Deserialize)]
#[serde(deny_unknown_fields)]
struct RawConfig {
    domain: Option<String>,
    shell: Option<String>,
    database: Option<PathBuf>,

    #[serde(default)]
    queue: QueueConfig,

    #[serde(default)]
    commands: HashMap<String, RawCommandDefinition>,
}

#[derive(Debug)]
pub struct Config {
    /// Base URL that webhook URLs are built from
    pub domain: Url,
    pub shell: String,
    pub database: Option<PathBuf>,
    pub queue: QueueConfig,
    pub commands: BTreeMap<String, CommandDefinition>,
}

impl Config {
    fn from_raw(raw: RawConfig, overrides: &Overrides) -> Result<Self> {
        let commands = raw
            .commands
            .into_iter()
            .map(|(slug, definition)| {
                let definition = CommandDefinition::from_raw(&slug, definition)?;
                Ok((slug, definition))
            })
            .collect::<Result<BTreeMap<_, _>>>()?;
        check_slug_collisions(commands.keys())?;

        let mut queue = raw.queue;
        if let Some(enabled) = overrides.queue_commands {
            queue.enabled = enabled;
        }
        if let Some(address) = overrides.queue_address.as_ref() {
            queue.address = address.clone();
        }

        let domain = overrides
            .domain
            .as_deref()
            .or(raw.domain.as_deref())
            .unwrap_or("http://localhost:8000");

        Ok(Self {
            domain: parse_domain(domain)?,
            shell: raw.shell.unwrap_or_else(|| String::from("/bin/sh")),
            database: raw.database,
            queue,
            commands,
        })
    }

    /// Load a configuration file by its path, applying any overrides from the command line or environment
    pub async fn load(path: &Path, overrides: &Overrides) -> Result<Self> {
        let toml_str = read_to_string(path)
            .await
            .with_context(|| format!("Failed to read config file {}", path.display()))?;
        Self::parse(&toml_str, overrides)
            .with_context(|| format!("Failed to load config file {}", path.display()))
    }

    fn parse(toml_str: &str, overrides: &Overrides) -> Result<Self> {
        let raw: RawConfig =
            toml::from_str(toml_str).context("Failed to deserialize TOML config")?;
        Self::from_raw(raw, overrides)
    }
}

/// Fail if two slugs differ only by case
/// Slugs are looked up case-insensitively, so such commands would be indistinguishable.
fn check_slug_collisions<'a>(slugs: impl Iterator<Item = &'a String>) -> Result<()> {
    let mut seen: HashMap<String, &str> = HashMap::new();
    for slug in slugs {
        if let Some(existing) = seen.insert(slug.to_lowercase(), slug.as_str()) {
            bail!("Command slugs {existing} and {slug} differ only by case");
        }
    }
    Ok(())
}

/// Build the URL a worker posts the result of a run to
pub fn webhook_url(domain: &Url, slug: &str, run_id: i32) -> String {
    format!(
        "{}/commands/{slug}/{run_id}/hook/",
        domain.as_str().trim_end_matches('/')
    )
}

/// Validate the domain that webhook URLs are built from
fn parse_domain(domain: &str) -> Result<Url> {
    let url = Url::parse(domain).with_context(|| format!("Invalid domain {domain}"))?;
    if !matches!(url.scheme(), "http" | "https") {
        bail!("Domain {domain} must be an http or https URL");
    }
    if url.query().is_some() || url.fragment().is_some() {
        bail!("Domain {domain} cannot contain a query or fragment");
    }
    Ok(url)
}
