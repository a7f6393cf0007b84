//! TOML 配置加载
//!
//! 所有的配置结构体都通过 serde 反序列化；缺失的字段由各自的 `#[serde(default)]` 补齐。

use std::path::Path;

use serde::Serialize;
use serde::de::DeserializeOwned;

/// 配置读写过程中的错误
#[derive(thiserror::Error, Debug)]
pub enum ConfigError {
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("Parse error in {path}: {message}")]
    Parse { path: String, message: String },

    #[error("Serialization error: {0}")]
    Serialize(String),
}

/// 从文件中读取 TOML 配置
pub fn load_toml<T: DeserializeOwned>(path: impl AsRef<Path>) -> Result<T, ConfigError> {
    let path = path.as_ref();
    let contents = std::fs::read_to_string(path)?;
    let config = parse_toml_named(&contents, &path.display().to_string())?;
    log::info!("loaded config from {}", path.display());
    Ok(config)
}

/// 从字符串中解析 TOML 配置
#[inline]
pub fn parse_toml<T: DeserializeOwned>(contents: &str) -> Result<T, ConfigError> {
    parse_toml_named(contents, "<memory>")
}

/// 将配置写回 TOML 文件
pub fn save_toml<T: Serialize>(config: &T, path: impl AsRef<Path>) -> Result<(), ConfigError> {
    let contents = toml::to_string_pretty(config).map_err(|e| ConfigError::Serialize(e.to_string()))?;
    std::fs::write(path, contents)?;
    Ok(())
}

fn parse_toml_named<T: DeserializeOwned>(contents: &str, name: &str) -> Result<T, ConfigError> {
    toml::from_str(contents).map_err(|e| ConfigError::Parse {
        path: name.to_string(),
        message: e.to_string(),
    })
}
