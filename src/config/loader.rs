//! Top-level config loading pipeline.

use std::path::{Path, PathBuf};

use tracing::debug;

use super::init::config_root_dir;
use super::Config;
use crate::error::ConfigError;

/// Local config file name, also used under the per-user directory.
pub(super) const CONFIG_FILE_NAME: &str = "turnwise.toml";

/// Values supplied on the command line; they beat every other source.
#[derive(Debug, Clone, Default)]
pub struct CliOverrides {
    pub model: Option<String>,
    pub base_url: Option<String>,
    pub no_color: bool,
}

/// Load configuration from disk and environment, then apply CLI overrides.
///
/// `path_override` is an explicit config file path (from `--config`).
pub fn load_config(path_override: Option<&str>, cli: &CliOverrides) -> Result<Config, ConfigError> {
    let mut config = load_config_from_sources(
        path_override,
        |path| std::fs::read_to_string(path),
        |name| std::env::var(name).ok(),
        config_root_dir,
    )?;
    apply_cli_overrides(&mut config, cli);
    Ok(config)
}

pub(super) fn load_config_from_sources<FRead, FEnv, FRoot>(
    path_override: Option<&str>,
    read_file: FRead,
    env_lookup: FEnv,
    config_root: FRoot,
) -> Result<Config, ConfigError>
where
    FRead: Fn(&Path) -> Result<String, std::io::Error>,
    FEnv: Fn(&str) -> Option<String>,
    FRoot: Fn() -> Option<PathBuf>,
{
    let (text, source) = read_config_text(path_override, &read_file, &config_root)?;
    debug!(source = %source, "loaded configuration source");
    let mut config: Config = toml::from_str(&text)?;
    apply_env_overrides(&mut config, &env_lookup);
    Ok(config)
}

/// Read config text from the highest-precedence available file.
fn read_config_text<FRead, FRoot>(
    path_override: Option<&str>,
    read_file: &FRead,
    config_root: &FRoot,
) -> Result<(String, String), ConfigError>
where
    FRead: Fn(&Path) -> Result<String, std::io::Error>,
    FRoot: Fn() -> Option<PathBuf>,
{
    // An explicit path must exist.
    if let Some(p) = path_override {
        let text = read_file(Path::new(p))?;
        return Ok((text, p.to_string()));
    }

    if let Ok(text) = read_file(Path::new(CONFIG_FILE_NAME)) {
        return Ok((text, format!("./{CONFIG_FILE_NAME}")));
    }

    if let Some(dir) = config_root() {
        let global = dir.join("turnwise").join(CONFIG_FILE_NAME);
        if let Ok(text) = read_file(&global) {
            return Ok((text, global.display().to_string()));
        }
    }

    Ok((String::new(), "built-in defaults".to_string()))
}

fn apply_env_overrides<FEnv>(config: &mut Config, env_lookup: &FEnv)
where
    FEnv: Fn(&str) -> Option<String>,
{
    let lookup = |name: &str| env_lookup(name).filter(|v| !v.trim().is_empty());

    if let Some(key) = lookup("TURNWISE_API_KEY").or_else(|| lookup("OPENAI_API_KEY")) {
        config.api.api_key = key;
    }
    if let Some(url) = lookup("TURNWISE_BASE_URL") {
        config.api.base_url = url;
    }
    if let Some(model) = lookup("TURNWISE_MODEL") {
        config.api.model = model;
    }
}

fn apply_cli_overrides(config: &mut Config, cli: &CliOverrides) {
    if let Some(model) = &cli.model {
        config.api.model = model.clone();
    }
    if let Some(url) = &cli.base_url {
        config.api.base_url = url.clone();
    }
    if cli.no_color {
        config.display.color = false;
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::HashMap;
    use std::io;

    fn files(entries: &[(&str, &str)]) -> impl Fn(&Path) -> Result<String, io::Error> {
        let map: HashMap<PathBuf, String> = entries
            .iter()
            .map(|(p, t)| (PathBuf::from(p), t.to_string()))
            .collect();
        move |path: &Path| {
            map.get(path)
                .cloned()
                .ok_or_else(|| io::Error::new(io::ErrorKind::NotFound, "missing"))
        }
    }

    fn env(entries: &[(&str, &str)]) -> impl Fn(&str) -> Option<String> {
        let map: HashMap<String, String> = entries
            .iter()
            .map(|(k, v)| (k.to_string(), v.to_string()))
            .collect();
        move |name: &str| map.get(name).cloned()
    }

    fn root() -> Option<PathBuf> {
        Some(PathBuf::from("/cfg"))
    }

    #[test]
    fn no_files_yields_defaults() {
        let c = load_config_from_sources(None, files(&[]), env(&[]), root).unwrap();
        assert_eq!(c, Config::default());
    }

    #[test]
    fn local_file_beats_global_file() {
        let c = load_config_from_sources(
            None,
            files(&[
                ("turnwise.toml", "[api]\nmodel = \"local\"\n"),
                ("/cfg/turnwise/turnwise.toml", "[api]\nmodel = \"global\"\n"),
            ]),
            env(&[]),
            root,
        )
        .unwrap();
        assert_eq!(c.api.model, "local");
    }

    #[test]
    fn global_file_used_when_no_local() {
        let c = load_config_from_sources(
            None,
            files(&[("/cfg/turnwise/turnwise.toml", "[api]\nmodel = \"global\"\n")]),
            env(&[]),
            root,
        )
        .unwrap();
        assert_eq!(c.api.model, "global");
    }

    #[test]
    fn explicit_path_must_exist() {
        let err = load_config_from_sources(Some("/nope.toml"), files(&[]), env(&[]), root)
            .unwrap_err();
        assert!(matches!(err, ConfigError::Io(_)));
    }

    #[test]
    fn env_beats_file_and_prefers_turnwise_key() {
        let c = load_config_from_sources(
            None,
            files(&[("turnwise.toml", "[api]\napi_key = \"file\"\nmodel = \"file\"\n")]),
            env(&[
                ("OPENAI_API_KEY", "openai"),
                ("TURNWISE_API_KEY", "turnwise"),
                ("TURNWISE_MODEL", "env-model"),
            ]),
            root,
        )
        .unwrap();
        assert_eq!(c.api.api_key, "turnwise");
        assert_eq!(c.api.model, "env-model");
    }

    #[test]
    fn openai_key_is_fallback_and_blank_env_ignored() {
        let c = load_config_from_sources(
            None,
            files(&[]),
            env(&[("TURNWISE_API_KEY", "  "), ("OPENAI_API_KEY", "openai")]),
            root,
        )
        .unwrap();
        assert_eq!(c.api.api_key, "openai");
    }

    #[test]
    fn malformed_file_is_toml_error() {
        let err = load_config_from_sources(
            None,
            files(&[("turnwise.toml", "[api\n")]),
            env(&[]),
            root,
        )
        .unwrap_err();
        assert!(matches!(err, ConfigError::Toml(_)));
    }

    #[test]
    fn cli_overrides_win() {
        let mut c = Config::default();
        apply_cli_overrides(
            &mut c,
            &CliOverrides {
                model: Some("cli-model".into()),
                base_url: Some("http://localhost:1234/v1".into()),
                no_color: true,
            },
        );
        assert_eq!(c.api.model, "cli-model");
        assert_eq!(c.api.base_url, "http://localhost:1234/v1");
        assert!(!c.display.color);
    }
}
