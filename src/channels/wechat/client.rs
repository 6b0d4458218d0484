//! 微信网关客户端模块
//!
//! 封装微信协议网关（wcf/gewe）出站 API 的 HTTP 客户端。
//!
//! # 功能
//! 1. 发送各类消息（文本/图片/表情/视频/语音/文件）
//! 2. 群与通讯录辅助操作（成员列表、加好友、同意进群）
//! 3. 媒体下载链接换取
//!
//! # 错误语义
//! 每个操作构造网关约定的固定 JSON 体，POST 到对应端点，解析 JSON
//! 响应并记录日志。调用失败通过 `Result` 返回给调用方；不做重试、
//! 不做熔断，超时沿用 HTTP 客户端默认值。

use serde_json::{json, Value};
use std::collections::HashMap;
use tracing::{debug, error, info};

use crate::infra::error::{Error, Result};

/// 微信网关客户端
///
/// # 字段说明
/// * `http` - HTTP 客户端（30 秒超时）
/// * `base_url` - 网关 API 基础 URL（尾部斜杠已裁剪）
/// * `app_id` - 应用标识，随每个请求体下发
/// * `token` - 请求令牌（可选，放入请求头）
#[derive(Clone)]
pub struct WechatClient {
    http: reqwest::Client,
    base_url: String,
    app_id: String,
    token: Option<String>,
}

impl std::fmt::Debug for WechatClient {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("WechatClient")
            .field("base_url", &self.base_url)
            .field("app_id", &self.app_id)
            .finish()
    }
}

impl WechatClient {
    /// 创建网关客户端
    ///
    /// # 参数说明
    /// * `base_url` - 网关 API 基础 URL
    /// * `app_id` - 应用标识
    /// * `token` - 请求令牌（可选）
    pub fn new(base_url: &str, app_id: &str, token: Option<String>) -> Self {
        let http = reqwest::Client::builder()
            .timeout(std::time::Duration::from_secs(30))
            .build()
            .expect("创建 HTTP 客户端失败");

        let base_url = base_url.trim_end_matches('/').to_string();
        info!(base_url = %base_url, "网关 API 客户端已创建");

        Self {
            http,
            base_url,
            app_id: app_id.to_string(),
            token,
        }
    }

    /// 网关 API 基础 URL
    pub fn base_url(&self) -> &str {
        &self.base_url
    }

    /// 原始 HTTP 客户端（媒体下载复用）
    pub fn http_client(&self) -> &reqwest::Client {
        &self.http
    }

    /// 发送 POST 请求并解析 JSON 响应
    async fn post_json(&self, path: &str, body: Value) -> Result<Value> {
        let url = format!("{}{}", self.base_url, path);

        let mut request = self.http.post(&url).json(&body);
        if let Some(token) = &self.token {
            request = request.header("X-GEWE-TOKEN", token);
        }

        let response = request
            .send()
            .await
            .map_err(|e| Error::Network(format!("请求网关失败 {}: {}", path, e)))?;

        let json_blob: Value = response
            .json()
            .await
            .map_err(|e| Error::Network(format!("解析网关响应失败 {}: {}", path, e)))?;

        debug!(path = path, response = %json_blob, "网关响应");
        Ok(json_blob)
    }

    // ==================== 消息发送 ====================

    /// 发送文本消息
    ///
    /// 请求体只携带目标 ID、原样的消息文本与 @ 列表，不做任何变换。
    ///
    /// # 参数说明
    /// * `to_wxid` - 接收方（好友 wxid 或群 ID）
    /// * `content` - 消息内容，支持 `\n` 换行
    /// * `ats` - 要 @ 的用户 wxid（逗号分隔，可为空）
    pub async fn post_text(&self, to_wxid: &str, content: &str, ats: &str) -> Result<Value> {
        let body = Self::text_body(to_wxid, content, ats);
        let result = self.post_json("/text", body).await?;
        debug!(to = %to_wxid, "发送文本消息完成");
        Ok(result)
    }

    /// 发送图片消息
    pub async fn post_image(&self, to_wxid: &str, image_url: &str) -> Result<Value> {
        let body = json!({
            "appId": self.app_id,
            "toWxid": to_wxid,
            "imgUrl": image_url,
        });
        let result = self.post_json("/message/postImage", body).await?;
        debug!(to = %to_wxid, "发送图片消息完成");
        Ok(result)
    }

    /// 发送表情包消息
    ///
    /// 优先按表情包发送；拿不到 md5/size 时降级为图片发送。
    pub async fn post_emoji(
        &self,
        to_wxid: &str,
        emoji_md5: &str,
        emoji_size: &str,
        cdn_url: &str,
    ) -> Result<Value> {
        if emoji_md5.is_empty() || emoji_size.is_empty() {
            return self.post_image(to_wxid, cdn_url).await;
        }

        let body = json!({
            "appId": self.app_id,
            "toWxid": to_wxid,
            "emojiMd5": emoji_md5,
            "emojiSize": emoji_size,
        });
        let result = self.post_json("/message/postEmoji", body).await?;
        info!(
            to = %to_wxid,
            msg = %result.get("msg").and_then(serde_json::Value::as_str).unwrap_or("操作失败"),
            "发送表情消息完成"
        );
        Ok(result)
    }

    /// 发送视频消息
    pub async fn post_video(
        &self,
        to_wxid: &str,
        video_url: &str,
        thumb_url: &str,
        video_duration: i64,
    ) -> Result<Value> {
        let body = json!({
            "appId": self.app_id,
            "toWxid": to_wxid,
            "videoUrl": video_url,
            "thumbUrl": thumb_url,
            "videoDuration": video_duration,
        });
        let result = self.post_json("/message/postVideo", body).await?;
        debug!(to = %to_wxid, "发送视频消息完成");
        Ok(result)
    }

    /// 转发视频
    ///
    /// # 参数说明
    /// * `to_wxid` - 接收方
    /// * `cdn_xml` - 视频消息的 CDN 信息
    pub async fn forward_video(&self, to_wxid: &str, cdn_xml: &str) -> Result<Value> {
        let body = json!({
            "appId": self.app_id,
            "toWxid": to_wxid,
            "xml": cdn_xml,
        });
        let result = self.post_json("/message/forwardVideo", body).await?;
        debug!(to = %to_wxid, "转发视频完成");
        Ok(result)
    }

    /// 发送语音消息
    ///
    /// # 参数说明
    /// * `voice_url` - 语音文件的网络链接
    /// * `voice_duration` - 语音时长，毫秒
    pub async fn post_voice(
        &self,
        to_wxid: &str,
        voice_url: &str,
        voice_duration: i64,
    ) -> Result<Value> {
        let body = json!({
            "appId": self.app_id,
            "toWxid": to_wxid,
            "voiceUrl": voice_url,
            "voiceDuration": voice_duration,
        });
        let result = self.post_json("/message/postVoice", body).await?;
        info!(
            to = %to_wxid,
            msg = %result.get("msg").and_then(serde_json::Value::as_str).unwrap_or("操作失败"),
            "发送语音消息完成"
        );
        Ok(result)
    }

    /// 发送文件
    pub async fn post_file(&self, to_wxid: &str, file_url: &str, file_name: &str) -> Result<Value> {
        let body = json!({
            "appId": self.app_id,
            "toWxid": to_wxid,
            "fileUrl": file_url,
            "fileName": file_name,
        });
        let result = self.post_json("/message/postFile", body).await?;
        debug!(to = %to_wxid, file = %file_name, "发送文件完成");
        Ok(result)
    }

    /// 换取图片下载链接
    ///
    /// 图片消息的内容是 CDN 信息 XML，需要先向网关换取可下载的 URL。
    pub async fn download_image(&self, content_xml: &str) -> Result<String> {
        let body = json!({
            "appId": self.app_id,
            "xml": content_xml,
            "type": 2,
        });
        let result = self.post_json("/message/downloadImage", body).await?;

        result
            .pointer("/data/fileUrl")
            .or_else(|| result.get("fileUrl"))
            .and_then(Value::as_str)
            .map(|s| s.to_string())
            .ok_or_else(|| Error::Channel("下载图片响应中未包含 fileUrl".to_string()))
    }

    // ==================== 群与通讯录 ====================

    /// 获取群信息
    pub async fn get_chatroom_info(&self, group_id: &str) -> Result<Value> {
        let body = json!({
            "appId": self.app_id,
            "chatroomId": group_id,
        });
        self.post_json("/group/getChatroomInfo", body).await
    }

    /// 获取群成员列表并解析为 wxid → 昵称 映射
    pub async fn get_chatroom_member_list(&self, group_id: &str) -> Result<HashMap<String, String>> {
        let body = json!({
            "appId": self.app_id,
            "chatroomId": group_id,
        });
        let result = self.post_json("/group/getChatroomMemberList", body).await?;

        // memberList 可能在顶层，也可能在 data 里
        let member_list = result
            .get("memberList")
            .or_else(|| result.pointer("/data/memberList"))
            .and_then(Value::as_array);

        let mut members = HashMap::new();
        if let Some(list) = member_list {
            for member in list {
                let wxid = member.get("wxid").and_then(Value::as_str);
                let nick_name = member.get("nickName").and_then(Value::as_str);
                if let (Some(wxid), Some(nick_name)) = (wxid, nick_name) {
                    members.insert(wxid.to_string(), nick_name.to_string());
                }
            }
        } else {
            error!(group_id = %group_id, "群成员列表响应中未包含 memberList");
        }

        debug!(group_id = %group_id, count = members.len(), "获取群成员列表完成");
        Ok(members)
    }

    /// 同意进群邀请
    pub async fn accept_group_invite(&self, url: &str) -> Result<Value> {
        let body = json!({
            "appId": self.app_id,
            "url": url,
        });
        self.post_json("/group/agreeJoinRoom", body).await
    }

    /// 添加群成员为好友
    pub async fn add_group_member_to_friend(
        &self,
        group_id: &str,
        to_wxid: &str,
        content: &str,
    ) -> Result<Value> {
        let body = json!({
            "appId": self.app_id,
            "chatroomId": group_id,
            "content": content,
            "memberWxid": to_wxid,
        });
        self.post_json("/group/addGroupMemberAsFriend", body).await
    }

    /// 申请添加好友
    pub async fn add_friend(&self, v3: &str, v4: &str, content: &str) -> Result<Value> {
        let body = json!({
            "appId": self.app_id,
            "scene": 3,
            "content": content,
            "v4": v4,
            "v3": v3,
            "option": 2,
        });
        self.post_json("/contacts/addContacts", body).await
    }

    /// 获取用户或群组详情
    pub async fn get_detail_info(&self, wxids: &[&str]) -> Result<Value> {
        let body = json!({
            "appId": self.app_id,
            "wxids": wxids,
        });
        self.post_json("/contacts/getDetailInfo", body).await
    }

    /// 获取通讯录列表
    pub async fn fetch_contacts_list(&self) -> Result<Value> {
        let body = json!({
            "appId": self.app_id,
        });
        self.post_json("/contacts/fetchContactsList", body).await
    }

    // ==================== 请求体构造 ====================

    /// 文本消息请求体
    fn text_body(to_wxid: &str, content: &str, ats: &str) -> Value {
        json!({
            "aters": ats,
            "msg": content,
            "receiver": to_wxid,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_base_url_trailing_slash_trimmed() {
        let client = WechatClient::new("http://127.0.0.1:2531/v2/api/", "app", None);
        assert_eq!(client.base_url(), "http://127.0.0.1:2531/v2/api");
    }

    #[test]
    fn test_text_body_is_verbatim() {
        // 请求体必须只含目标 ID 与原样文本，不做任何变换
        let body = WechatClient::text_body("wxid_target", "你好\n世界", "");
        assert_eq!(body["receiver"], "wxid_target");
        assert_eq!(body["msg"], "你好\n世界");
        assert_eq!(body["aters"], "");
        assert_eq!(body.as_object().unwrap().len(), 3);
    }

    #[test]
    fn test_text_body_carries_ats() {
        let body = WechatClient::text_body("g@chatroom", "通知", "wxid_a,wxid_b");
        assert_eq!(body["aters"], "wxid_a,wxid_b");
    }
}
