//! Config file discovery, loading, table merging and environment overlay.

use crate::{ConfigError, ForgeConfig};
use std::path::{Path, PathBuf};

/// Information about where config values came from.
#[derive(Debug, Clone, Default)]
pub struct ConfigSources {
    /// Config files that were loaded (in order)
    pub files: Vec<PathBuf>,
    /// Environment variables that overrode config values
    pub env_overrides: Vec<String>,
}

/// Discover config files, optionally with a CLI override path.
///
/// If `cli_path` is provided and exists, it replaces the local override.
/// Returns paths in load order (system, user, local/cli).
pub fn discover_config_files_with_override(cli_path: Option<&Path>) -> Vec<PathBuf> {
    let mut files = Vec::new();

    let system = PathBuf::from("/etc/meshforge/config.toml");
    if system.exists() {
        files.push(system);
    }

    if let Some(config_dir) = directories::BaseDirs::new().map(|d| d.config_dir().to_path_buf()) {
        let user = config_dir.join("meshforge/config.toml");
        if user.exists() {
            files.push(user);
        }
    }

    if let Some(path) = cli_path {
        if path.exists() {
            files.push(path.to_path_buf());
            return files;
        }
    }

    let local = PathBuf::from("meshforge.toml");
    if local.exists() {
        files.push(local);
    }

    files
}

/// Read a TOML file into a raw table.
pub fn read_table(path: &Path) -> Result<toml::Table, ConfigError> {
    let contents = std::fs::read_to_string(path).map_err(|e| ConfigError::FileRead {
        path: path.to_path_buf(),
        source: e,
    })?;

    contents
        .parse::<toml::Table>()
        .map_err(|e| ConfigError::Parse {
            path: path.to_path_buf(),
            message: e.to_string(),
        })
}

/// Load config from a single TOML file.
pub fn load_from_file(path: &Path) -> Result<ForgeConfig, ConfigError> {
    let table = read_table(path)?;
    from_table(table, path)
}

/// Deserialize a (possibly merged) table, expanding `~` and `$VAR` in paths.
pub fn from_table(table: toml::Table, origin: &Path) -> Result<ForgeConfig, ConfigError> {
    let mut config: ForgeConfig =
        toml::Value::Table(table)
            .try_into()
            .map_err(|e: toml::de::Error| ConfigError::Parse {
                path: origin.to_path_buf(),
                message: e.to_string(),
            })?;

    let raw = config.infra.paths.asset_dir.to_string_lossy().into_owned();
    config.infra.paths.asset_dir = expand_path(&raw);
    Ok(config)
}

/// Deep-merge `overlay` into `base`. Nested tables merge key by key; every
/// other value in `overlay` replaces the one in `base`.
pub fn merge_tables(base: &mut toml::Table, overlay: toml::Table) {
    for (key, value) in overlay {
        match (base.get_mut(&key), value) {
            (Some(toml::Value::Table(existing)), toml::Value::Table(incoming)) => {
                merge_tables(existing, incoming);
            }
            (_, value) => {
                base.insert(key, value);
            }
        }
    }
}

fn parse_env<T: std::str::FromStr>(key: &str, value: &str) -> Result<T, ConfigError> {
    value
        .trim()
        .parse()
        .map_err(|_| ConfigError::invalid(key, format!("cannot parse {value:?}")))
}

fn parse_bool(key: &str, value: &str) -> Result<bool, ConfigError> {
    match value.trim().to_ascii_lowercase().as_str() {
        "1" | "true" | "yes" | "on" => Ok(true),
        "0" | "false" | "no" | "off" => Ok(false),
        other => Err(ConfigError::invalid(key, format!("cannot parse {other:?} as bool"))),
    }
}

/// Apply environment variable overrides to config.
///
/// `lookup` abstracts `std::env::var` so the overlay can be exercised with
/// a fixed set of variables.
pub fn apply_env_overrides<F>(
    config: &mut ForgeConfig,
    sources: &mut ConfigSources,
    lookup: F,
) -> Result<(), ConfigError>
where
    F: Fn(&str) -> Option<String>,
{
    let mut seen = |key: &str| sources.env_overrides.push(key.to_string());

    if let Some(v) = lookup("MESHFORGE_ASSET_DIR") {
        config.infra.paths.asset_dir = expand_path(&v);
        seen("MESHFORGE_ASSET_DIR");
    }
    if let Some(v) = lookup("MESHFORGE_BIND_HOST") {
        config.infra.bind.host = v;
        seen("MESHFORGE_BIND_HOST");
    }
    if let Some(v) = lookup("MESHFORGE_HTTP_PORT") {
        config.infra.bind.http_port = parse_env("MESHFORGE_HTTP_PORT", &v)?;
        seen("MESHFORGE_HTTP_PORT");
    }

    if let Some(v) = lookup("MESHFORGE_OTLP_ENDPOINT") {
        config.infra.telemetry.otlp_endpoint = Some(v);
        seen("MESHFORGE_OTLP_ENDPOINT");
    }
    if let Some(v) = lookup("MESHFORGE_LOG_LEVEL") {
        config.infra.telemetry.log_level = v;
        seen("MESHFORGE_LOG_LEVEL");
    }
    // RUST_LOG wins over everything else, matching EnvFilter conventions
    if let Some(v) = lookup("RUST_LOG") {
        config.infra.telemetry.log_level = v;
        seen("RUST_LOG");
    }

    if let Some(v) = lookup("MESHFORGE_ENDPOINT") {
        config.backend.endpoint = v;
        seen("MESHFORGE_ENDPOINT");
    }
    if let Some(v) = lookup("MESHFORGE_IMAGE_ENDPOINT") {
        config.backend.image_endpoint = v;
        seen("MESHFORGE_IMAGE_ENDPOINT");
    }
    if let Some(v) = lookup("HF_TOKEN") {
        if !v.trim().is_empty() {
            config.backend.hf_token = Some(v.trim().to_string());
            seen("HF_TOKEN");
        }
    }

    if let Some(v) = lookup("MESHFORGE_STEPS") {
        config.generation.steps = Some(parse_env("MESHFORGE_STEPS", &v)?);
        seen("MESHFORGE_STEPS");
    }
    if let Some(v) = lookup("MESHFORGE_GUIDANCE_SCALE") {
        config.generation.guidance_scale = Some(parse_env("MESHFORGE_GUIDANCE_SCALE", &v)?);
        seen("MESHFORGE_GUIDANCE_SCALE");
    }
    if let Some(v) = lookup("MESHFORGE_SEED") {
        config.generation.seed = parse_env("MESHFORGE_SEED", &v)?;
        seen("MESHFORGE_SEED");
    }
    if let Some(v) = lookup("MESHFORGE_OCTREE_RESOLUTION") {
        config.generation.octree_resolution =
            Some(parse_env("MESHFORGE_OCTREE_RESOLUTION", &v)?);
        seen("MESHFORGE_OCTREE_RESOLUTION");
    }
    if let Some(v) = lookup("MESHFORGE_REMOVE_BACKGROUND") {
        config.generation.remove_background = parse_bool("MESHFORGE_REMOVE_BACKGROUND", &v)?;
        seen("MESHFORGE_REMOVE_BACKGROUND");
    }

    Ok(())
}

/// Expand ~ and environment variables in a path.
pub fn expand_path(path: &str) -> PathBuf {
    if let Some(stripped) = path.strip_prefix("~/") {
        if let Some(home) = directories::BaseDirs::new().map(|d| d.home_dir().to_path_buf()) {
            return home.join(stripped);
        }
        PathBuf::from(path)
    } else if let Some(stripped) = path.strip_prefix('$') {
        let (var_name, rest) = match stripped.find('/') {
            Some(slash_pos) => (&stripped[..slash_pos], Some(&stripped[slash_pos + 1..])),
            None => (stripped, None),
        };
        match std::env::var(var_name) {
            Ok(value) => match rest {
                Some(rest) => PathBuf::from(value).join(rest),
                None => PathBuf::from(value),
            },
            Err(_) => PathBuf::from(path),
        }
    } else {
        PathBuf::from(path)
    }
}
