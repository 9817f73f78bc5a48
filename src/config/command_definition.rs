use anyhow::{bail, Result};
use serde::Deserialize;

#[derive(Debug, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct RawCommandDefinition {
    pub title: Option<String>,
    pub description: Option<String>,
    pub command: String,
}

#[derive(Clone, Debug, Eq, PartialEq)]
pub struct CommandDefinition {
    pub title: String,
    pub description: Option<String>,
    pub command: String,
}

impl CommandDefinition {
    pub(super) fn from_raw(slug: &str, raw: RawCommandDefinition) -> Result<Self> {
        validate_slug(slug)?;
        if raw.command.trim().is_empty() {
            bail!("Command {slug} has an empty command");
        }

        Ok(Self {
            // Fall back to the slug so that every command has a readable name
            title: raw.title.unwrap_or_else(|| slug.to_owned()),
            description: raw.description.filter(|description| !description.is_empty()),
            command: raw.command,
        })
    }
}

/// Validate a command slug
/// Slugs appear in URLs, so they are restricted to ASCII alphanumerics, underscores, and single hyphens.
pub fn validate_slug(slug: &str) -> Result<()> {
    if slug.is_empty()
        || slug.starts_with('-')
        || slug.ends_with('-')
        || slug.contains("--")
        || slug
            .chars()
            .any(|char| !char.is_ascii_alphanumeric() && char != '-' && char != '_')
    {
        bail!("Invalid command slug {slug}")
    }

    Ok(())
}
