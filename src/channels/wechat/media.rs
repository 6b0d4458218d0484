//! 微信媒体处理模块
//!
//! 提供消息媒体文件的落盘能力。
//!
//! # 功能
//! 1. 按消息 ID 下载远端图片到临时目录
//! 2. 解码内嵌语音载荷并持久化
//! 3. AMR → WAV 音频转换（委托外部 ffmpeg）
//!
//! 所有产物写入以消息 ID 为键的临时目录文件，随清理策略删除。

use base64::engine::general_purpose::STANDARD as BASE64;
use base64::Engine;
use std::path::{Path, PathBuf};
use tracing::{debug, error};

use crate::infra::error::{Error, Result};

/// 媒体下载器
///
/// # 使用注意
/// - 图片下载链接有有效期限制，拿到后应立即下载
/// - 语音载荷是 base64 内嵌数据，不走网络
#[derive(Clone)]
pub struct MediaDownloader {
    /// 下载用 HTTP 客户端
    http: reqwest::Client,
    /// 临时文件目录
    temp_dir: PathBuf,
}

impl MediaDownloader {
    /// 创建媒体下载器
    ///
    /// # 参数说明
    /// * `temp_dir` - 临时文件存储目录
    pub fn new(temp_dir: PathBuf) -> Self {
        // 确保目录存在
        if !temp_dir.exists() {
            std::fs::create_dir_all(&temp_dir).expect("创建临时目录失败");
        }

        let http = reqwest::Client::builder()
            .timeout(std::time::Duration::from_secs(30))
            .build()
            .expect("创建 HTTP 客户端失败");

        Self { http, temp_dir }
    }

    /// 临时目录路径
    pub fn temp_dir(&self) -> &Path {
        &self.temp_dir
    }

    /// 下载远端图片到本地临时文件
    ///
    /// # 参数说明
    /// * `message_id` - 消息 ID（用作文件名键）
    /// * `url` - 图片下载链接
    ///
    /// # 返回值
    /// 本地文件路径
    pub async fn download_image_by_url(&self, message_id: &str, url: &str) -> Result<PathBuf> {
        debug!(message_id = %message_id, url = %url, "开始下载图片");

        let response = self
            .http
            .get(url)
            .send()
            .await
            .map_err(|e| Error::Network(format!("下载图片失败: {}", e)))?;

        if !response.status().is_success() {
            return Err(Error::Network(format!(
                "下载图片失败: HTTP {}",
                response.status()
            )));
        }

        let content = response
            .bytes()
            .await
            .map_err(|e| Error::Network(format!("读取图片内容失败: {}", e)))?;

        let extension = image_extension(&content);
        let file_path = self
            .temp_dir
            .join(format!("gewe_image_{}.{}", message_id, extension));

        tokio::fs::write(&file_path, &content)
            .await
            .map_err(|e| Error::Io(format!("保存图片失败: {}", e)))?;

        debug!(path = %file_path.display(), size = content.len(), "图片下载成功");
        Ok(file_path)
    }

    /// 解码内嵌语音载荷并持久化为 silk 文件
    ///
    /// # 参数说明
    /// * `message_id` - 消息 ID（用作文件名键）
    /// * `base64_buffer` - base64 编码的语音数据
    pub async fn save_voice(&self, message_id: &str, base64_buffer: &str) -> Result<PathBuf> {
        let voice_data = BASE64
            .decode(base64_buffer)
            .map_err(|e| Error::Media(format!("解码语音载荷失败: {}", e)))?;

        let file_path = self
            .temp_dir
            .join(format!("gewe_voice_{}.silk", message_id));

        tokio::fs::write(&file_path, &voice_data)
            .await
            .map_err(|e| Error::Io(format!("保存语音失败: {}", e)))?;

        debug!(path = %file_path.display(), size = voice_data.len(), "语音已持久化");
        Ok(file_path)
    }

    /// AMR 音频转换为 WAV
    ///
    /// 转换委托外部 ffmpeg；ffmpeg 不可用或转换失败时返回错误，
    /// 调用方应丢弃该消息而不是转发损坏的文件。
    pub async fn transcode_to_wav(&self, input: &Path) -> Result<PathBuf> {
        let output = input.with_extension("wav");

        let status = tokio::process::Command::new("ffmpeg")
            .arg("-y")
            .arg("-i")
            .arg(input)
            .arg(&output)
            .output()
            .await
            .map_err(|e| {
                error!(error = %e, "转换音频失败。如果没有安装 ffmpeg 请先安装。");
                Error::Media(format!("转换音频失败: {}", e))
            })?;

        if !status.status.success() {
            let stderr = String::from_utf8_lossy(&status.stderr);
            return Err(Error::Media(format!("ffmpeg 转换失败: {}", stderr)));
        }

        debug!(path = %output.display(), "音频转换完成");
        Ok(output)
    }
}

/// 根据文件头字节判断图片扩展名
fn image_extension(content: &[u8]) -> &'static str {
    if content.len() < 4 {
        return "jpg";
    }

    match &content[..4] {
        [0x89, 0x50, 0x4E, 0x47] => "png",
        [0xFF, 0xD8, 0xFF, ..] => "jpg",
        [0x47, 0x49, 0x46, 0x38] => "gif",
        [0x52, 0x49, 0x46, 0x46] => "webp",
        _ => "jpg",
    }
}
