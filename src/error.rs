use thiserror::Error;

/// Main error type for modelsync
#[derive(Error, Debug)]
pub enum SyncError {
    #[error("Registry unreachable at {registry}: {reason}\n\nTroubleshooting:\n- Check the registry URL in config\n- Verify the registry answers GET {registry}/model with a JSON listing\n- Run with RUST_LOG=debug for more details")]
    RegistryUnreachable { registry: String, reason: String },

    #[error("No artifact matches '{selector}'{}", suggestion_hint(.suggestion.as_deref()))]
    SelectorNotFound {
        selector: String,
        suggestion: Option<String>,
    },

    #[error("Partial download of {id}: missing {}\n\nStaging directory kept; re-run the download to resume", .missing.join(", "))]
    PartialDownload { id: String, missing: Vec<String> },

    #[error("Import of {archive} failed: {reason}\n\nArchive kept in place; re-run import to retry")]
    ImportFailure { archive: String, reason: String },

    #[error("Transport error: {0}\n\nTroubleshooting:\n- Check mirror host/user in config\n- Verify ssh access: ssh <user>@<host> true\n- Ensure scp and ssh are in PATH")]
    Transport(String),

    #[error("Config error: {0}\n\nTroubleshooting:\n- Check config file: ~/.config/modelsync/config.toml\n- Run with RUST_LOG=debug for more details")]
    Config(String),

    #[error("HTTP error: {0}")]
    Http(#[from] reqwest::Error),

    #[error("Archive error: {0}")]
    Archive(String),

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("{0}")]
    Other(String),
}

fn suggestion_hint(suggestion: Option<&str>) -> String {
    suggestion.map_or_else(String::new, |s| format!(" (did you mean '{s}'?)"))
}

impl SyncError {
    pub(crate) fn unreachable(registry: &str, reason: impl Into<String>) -> Self {
        Self::RegistryUnreachable {
            registry: registry.to_string(),
            reason: reason.into(),
        }
    }
}

pub type Result<T> = std::result::Result<T, SyncError>;
