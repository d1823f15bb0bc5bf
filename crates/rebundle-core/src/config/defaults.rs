//! Default configuration values

/// Default configuration file name (YAML)
pub const DEFAULT_CONFIG_YAML: &str = "rebundle.yaml";

/// Default configuration file name (TOML)
pub const DEFAULT_CONFIG_TOML: &str = "rebundle.toml";

/// Alternative configuration file name
pub const ALT_CONFIG_FILE: &str = ".rebundle.yaml";

/// Default packaging tool timeout
pub const DEFAULT_TOOL_TIMEOUT_SECS: u64 = 600;

/// Get list of config file names to search for
pub fn config_file_names() -> Vec<&'static str> {
    vec![
        DEFAULT_CONFIG_YAML,
        DEFAULT_CONFIG_TOML,
        ALT_CONFIG_FILE,
        ".rebundle.toml",
    ]
}
