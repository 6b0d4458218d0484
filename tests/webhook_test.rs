//! 回调链路端到端测试
//!
//! 在本机回环地址上启动完整适配器（端口 0 由系统分配），
//! 用真实 HTTP 请求验证回调校验、应答字面量与事件投递。

use serde_json::json;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::mpsc;

use wxbridge::channels::traits::ChannelAdapter;
use wxbridge::channels::wechat::{WechatAdapter, WechatMessageEvent};
use wxbridge::core::message::types::MessageSegment;
use wxbridge::infra::config::Config;

/// 启动一个绑定回环端口的适配器，返回基础 URL 与事件接收端
async fn start_adapter() -> (
    Arc<WechatAdapter>,
    tokio::task::JoinHandle<wxbridge::infra::error::Result<()>>,
    String,
    mpsc::Receiver<WechatMessageEvent>,
    tempfile::TempDir,
) {
    // 出站地址不可达，这些测试不触发任何网关调用
    start_adapter_with_gateway("http://127.0.0.1:9").await
}

/// 指定出站网关地址的变体
async fn start_adapter_with_gateway(
    api_base_url: &str,
) -> (
    Arc<WechatAdapter>,
    tokio::task::JoinHandle<wxbridge::infra::error::Result<()>>,
    String,
    mpsc::Receiver<WechatMessageEvent>,
    tempfile::TempDir,
) {
    let dir = tempfile::tempdir().unwrap();
    let mut config = Config::default();
    config.server.host = "127.0.0.1".to_string();
    config.server.port = 0;
    config.media.temp_dir = dir.path().to_path_buf();
    config.vendor.api_base_url = Some(api_base_url.to_string());

    let (event_tx, event_rx) = mpsc::channel(8);
    let adapter = Arc::new(WechatAdapter::new(&config, event_tx));

    let runner = {
        let adapter = adapter.clone();
        tokio::spawn(async move { adapter.run().await })
    };

    // 等待绑定完成
    let mut addr = None;
    for _ in 0..50 {
        if let Some(bound) = adapter.local_addr() {
            addr = Some(bound);
            break;
        }
        tokio::time::sleep(Duration::from_millis(20)).await;
    }
    let addr = addr.expect("适配器应在启动后完成绑定");

    (adapter, runner, format!("http://{}", addr), event_rx, dir)
}

#[tokio::test]
async fn test_get_verify_echoes_query_params() {
    let (adapter, runner, base, _event_rx, _dir) = start_adapter().await;

    let response = reqwest::get(format!("{}/callback/command?echostr=abc123&id=7", base))
        .await
        .unwrap();
    assert!(response.status().is_success());

    let echoed: serde_json::Value = response.json().await.unwrap();
    assert_eq!(echoed["echostr"], "abc123");
    assert_eq!(echoed["id"], "7");

    adapter.terminate().await;
    let _ = tokio::time::timeout(Duration::from_secs(5), runner).await;
}

#[tokio::test]
async fn test_post_valid_payload_acks_success_and_delivers_event() {
    let (adapter, runner, base, mut event_rx, _dir) = start_adapter().await;

    let now = chrono::Utc::now().timestamp();
    let payload = json!({
        "TypeName": "AddMsg",
        "Wxid": "wxid_bot",
        "Data": {
            "MsgId": 2001,
            "FromUserName": {"string": "wxid_abc"},
            "ToUserName": {"string": "wxid_bot"},
            "Content": {"string": "hello"},
            "MsgType": 1,
            "CreateTime": now
        }
    });

    let http = reqwest::Client::new();
    let response = http
        .post(format!("{}/callback/command", base))
        .json(&payload)
        .send()
        .await
        .unwrap();
    // 应答必须是网关约定的字面量
    assert_eq!(response.text().await.unwrap(), "success");

    let event = tokio::time::timeout(Duration::from_secs(5), event_rx.recv())
        .await
        .expect("事件应在超时前送达")
        .expect("事件队列不应关闭");

    assert_eq!(event.message.sender.id, "wxid_abc");
    assert_eq!(event.message.plain_text, "hello");
    assert_eq!(event.message.segments, vec![MessageSegment::text("hello")]);
    assert!(!event.message.is_group());

    adapter.terminate().await;
    let _ = tokio::time::timeout(Duration::from_secs(5), runner).await;
}

#[tokio::test]
async fn test_post_invalid_json_acks_error() {
    let (adapter, runner, base, mut event_rx, _dir) = start_adapter().await;

    let http = reqwest::Client::new();
    let response = http
        .post(format!("{}/callback/command", base))
        .body("不是 JSON")
        .send()
        .await
        .unwrap();
    assert_eq!(response.text().await.unwrap(), "error");

    // 坏载荷不产生事件
    let nothing = tokio::time::timeout(Duration::from_millis(300), event_rx.recv()).await;
    assert!(nothing.is_err());

    adapter.terminate().await;
    let _ = tokio::time::timeout(Duration::from_secs(5), runner).await;
}

#[tokio::test]
async fn test_stalled_media_download_does_not_block_other_messages() {
    // 慢网关：接受连接后只读不答，模拟挂起的图片下载换链请求
    let gateway = tokio::net::TcpListener::bind("127.0.0.1:0").await.unwrap();
    let gateway_addr = gateway.local_addr().unwrap();
    tokio::spawn(async move {
        loop {
            let Ok((mut socket, _)) = gateway.accept().await else {
                break;
            };
            tokio::spawn(async move {
                use tokio::io::AsyncReadExt;
                let mut buf = [0u8; 4096];
                loop {
                    match socket.read(&mut buf).await {
                        Ok(0) | Err(_) => break,
                        Ok(_) => {}
                    }
                }
            });
        }
    });

    let (_adapter, runner, base, mut event_rx, _dir) =
        start_adapter_with_gateway(&format!("http://{}", gateway_addr)).await;

    let now = chrono::Utc::now().timestamp();
    let image_payload = json!({
        "TypeName": "AddMsg",
        "Wxid": "wxid_bot",
        "Data": {
            "MsgId": 3001,
            "FromUserName": {"string": "wxid_abc"},
            "Content": {"string": "<msg><img aeskey=\"k\" cdnmidimgurl=\"u\"/></msg>"},
            "MsgType": 3,
            "CreateTime": now
        }
    });
    let text_payload = json!({
        "TypeName": "AddMsg",
        "Wxid": "wxid_bot",
        "Data": {
            "MsgId": 3002,
            "FromUserName": {"string": "wxid_abc"},
            "Content": {"string": "快消息"},
            "MsgType": 1,
            "CreateTime": now
        }
    });

    let http = reqwest::Client::new();
    for payload in [&image_payload, &text_payload] {
        let response = http
            .post(format!("{}/callback/command", base))
            .json(payload)
            .send()
            .await
            .unwrap();
        assert_eq!(response.text().await.unwrap(), "success");
    }

    // 图片下载仍在挂起时，后到的文本消息必须及时送达
    let event = tokio::time::timeout(Duration::from_secs(3), event_rx.recv())
        .await
        .expect("文本事件不应被挂起的下载阻塞")
        .expect("事件队列不应关闭");
    assert_eq!(event.message.plain_text, "快消息");

    // 不等待挂起的下载任务，直接结束
    runner.abort();
}

#[tokio::test]
async fn test_post_dropped_payload_still_acks_success() {
    let (adapter, runner, base, mut event_rx, _dir) = start_adapter().await;

    // 合法 JSON 但属于丢弃类通知：应答与规范化结果解耦
    let payload = json!({"TypeName": "ModContacts", "Wxid": "wxid_bot", "Data": {}});

    let http = reqwest::Client::new();
    let response = http
        .post(format!("{}/callback/command", base))
        .json(&payload)
        .send()
        .await
        .unwrap();
    assert_eq!(response.text().await.unwrap(), "success");

    let nothing = tokio::time::timeout(Duration::from_millis(300), event_rx.recv()).await;
    assert!(nothing.is_err());

    adapter.terminate().await;
    let _ = tokio::time::timeout(Duration::from_secs(5), runner).await;
}
