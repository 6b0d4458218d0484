//! 配置管理系统模块
//!
//! 本模块负责加载和管理系统配置。

use serde::{Deserialize, Serialize};
use std::path::PathBuf;
use std::{env, fs};

/// 主配置结构
#[derive(Debug, Clone, Serialize, Deserialize, Default)]
pub struct Config {
    /// 回调服务配置
    #[serde(default)]
    pub server: ServerConfig,
    /// 网关配置
    #[serde(default)]
    pub vendor: VendorConfig,
    /// 媒体文件配置
    #[serde(default)]
    pub media: MediaConfig,
    /// 日志配置
    #[serde(default)]
    pub logging: LoggingSection,
}

/// 回调服务配置
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ServerConfig {
    /// 监听地址
    pub host: String,
    /// 监听端口
    pub port: u16,
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self {
            host: "0.0.0.0".to_string(),
            port: 9001,
        }
    }
}

/// 网关配置
///
/// 微信协议网关（wcf/gewe）的接入参数
#[derive(Debug, Clone, Serialize, Deserialize, Default)]
pub struct VendorConfig {
    /// 网关 API 基础 URL
    pub api_base_url: Option<String>,
    /// 应用标识（gewe 侧的 appId）
    pub app_id: Option<String>,
    /// 请求令牌（放入默认请求头）
    pub token: Option<String>,
    /// 机器人 wxid（留空时从回调载荷中取 Wxid 字段）
    pub bot_wxid: Option<String>,
}

/// 媒体文件配置
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct MediaConfig {
    /// 临时文件目录（下载的图片、解码的语音）
    pub temp_dir: PathBuf,
}

impl Default for MediaConfig {
    fn default() -> Self {
        Self {
            temp_dir: PathBuf::from("data/temp"),
        }
    }
}

/// 日志配置
#[derive(Debug, Clone, Serialize, Deserialize, Default)]
pub struct LoggingSection {
    /// 日志级别
    pub level: Option<String>,
}

/// 配置加载器
#[derive(Debug, Clone)]
pub struct ConfigLoader;

impl ConfigLoader {
    /// 创建新的配置加载器
    pub fn new() -> Self {
        Self
    }

    /// 加载配置
    pub async fn load(&self, path: &str) -> Result<Config, super::error::Error> {
        tracing::info!(path = path, "加载配置文件");

        // 检查文件是否存在
        if !PathBuf::from(path).exists() {
            tracing::warn!(path = path, "配置文件不存在，使用默认配置");
            return Ok(Config::default());
        }

        // 读取文件内容
        let content = fs::read_to_string(path)
            .map_err(|e| super::error::Error::Config(format!("读取配置文件失败: {}", e)))?;

        // 解析 TOML
        let mut config: Config = toml::from_str(&content)
            .map_err(|e| super::error::Error::Config(format!("解析配置文件失败: {}", e)))?;

        // 环境变量替换
        self.substitute_env_vars(&mut config);

        tracing::info!("配置加载成功");
        Ok(config)
    }

    /// 替换环境变量
    ///
    /// 将 `${VAR_NAME}` 格式的字符串替换为对应的环境变量值
    fn substitute_env_vars(&self, config: &mut Config) {
        if let Some(base_url) = &config.vendor.api_base_url {
            config.vendor.api_base_url = Some(self.replace_env_vars(base_url));
        }
        if let Some(app_id) = &config.vendor.app_id {
            config.vendor.app_id = Some(self.replace_env_vars(app_id));
        }
        if let Some(token) = &config.vendor.token {
            config.vendor.token = Some(self.replace_env_vars(token));
        }
        if let Some(bot_wxid) = &config.vendor.bot_wxid {
            config.vendor.bot_wxid = Some(self.replace_env_vars(bot_wxid));
        }
    }

    /// 替换字符串中的环境变量
    fn replace_env_vars(&self, input: &str) -> String {
        let pattern = r"\$\{([^}]+)\}";

        // 使用正则表达式替换环境变量
        let re = regex::Regex::new(pattern).unwrap();
        let result = re.replace_all(input, |caps: &regex::Captures| {
            let var_name = &caps[1];
            env::var(var_name).unwrap_or_else(|_| caps[0].to_string())
        });

        result.to_string()
    }
}

impl Default for ConfigLoader {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn test_load_missing_file_returns_default() {
        let loader = ConfigLoader::new();
        let config = loader.load("no-such-wxbridge.toml").await.unwrap();
        assert_eq!(config.server.port, 9001);
        assert!(config.vendor.api_base_url.is_none());
    }

    #[test]
    fn test_replace_env_vars() {
        std::env::set_var("WXBRIDGE_TEST_TOKEN", "tok-123");
        let loader = ConfigLoader::new();
        assert_eq!(loader.replace_env_vars("${WXBRIDGE_TEST_TOKEN}"), "tok-123");
        // 未定义的变量保持原样
        assert_eq!(
            loader.replace_env_vars("${WXBRIDGE_NOT_SET_VAR}"),
            "${WXBRIDGE_NOT_SET_VAR}"
        );
    }

    #[tokio::test]
    async fn test_parse_toml_sections() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("wxbridge.toml");
        std::fs::write(
            &path,
            r#"
[server]
host = "127.0.0.1"
port = 9100

[vendor]
api_base_url = "http://127.0.0.1:2531/v2/api/"
app_id = "wx_app"

[logging]
level = "debug"
"#,
        )
        .unwrap();

        let loader = ConfigLoader::new();
        let config = loader.load(path.to_str().unwrap()).await.unwrap();
        assert_eq!(config.server.host, "127.0.0.1");
        assert_eq!(config.server.port, 9100);
        assert_eq!(config.vendor.app_id.as_deref(), Some("wx_app"));
        assert_eq!(config.logging.level.as_deref(), Some("debug"));
    }
}
