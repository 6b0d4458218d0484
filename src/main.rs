//! wxbridge 主入口

use clap::{Parser, Subcommand};
use tracing::{error, info};

use wxbridge::infra::logging::{self, LogLevel};
use wxbridge::service::{BridgeService, ServiceConfig};

// 命令行参数解析结构体
#[derive(Parser, Debug)]
#[command(name = "wxbridge")]
#[command(version = "0.1.0")]
#[command(about = "微信回调协议桥接器", long_about = None)]
struct Args {
    /// 配置文件路径
    #[arg(short, long, default_value = "wxbridge.toml")]
    config: String,

    /// 是否启用 verbose 模式（显示 DEBUG 日志）
    #[arg(short, long)]
    verbose: bool,

    /// 监听端口（0 表示沿用配置文件）
    #[arg(short, long, default_value = "0")]
    port: u16,

    /// 子命令
    #[command(subcommand)]
    command: Option<Commands>,
}

// 子命令枚举
#[derive(Subcommand, Debug)]
enum Commands {
    /// 启动桥接服务
    Start,
    /// 检查配置文件是否有效
    Check,
    /// 显示版本信息
    Version,
}

// 主函数
#[tokio::main]
async fn main() {
    // 加载 .env 文件
    dotenv::dotenv().ok();

    let args = Args::parse();

    // 设置日志级别：-v 优先，其次环境变量 WXBRIDGE_LOG
    let log_level = if args.verbose {
        LogLevel::Debug
    } else {
        LogLevel::parse(&std::env::var("WXBRIDGE_LOG").unwrap_or_default())
    };
    logging::init(log_level);

    info!(version = "0.1.0", "wxbridge 启动");

    // 根据子命令执行不同操作
    match args.command {
        Some(Commands::Start) | None => {
            run_service(&args.config, args.verbose, args.port).await;
        }
        Some(Commands::Check) => {
            check_config(&args.config).await;
        }
        Some(Commands::Version) => {
            println!("wxbridge v0.1.0");
        }
    }
}

// 启动桥接服务
async fn run_service(config_path: &str, verbose: bool, port: u16) {
    info!(path = config_path, port = port, "开始启动桥接服务");

    let service_config = ServiceConfig {
        config_path: config_path.to_string(),
        verbose,
        port,
    };

    let mut service = BridgeService::new(service_config);

    if let Err(e) = service.initialize().await {
        error!(error = %e, "服务初始化失败");
        return;
    }

    if let Err(e) = service.start().await {
        error!(error = %e, "服务运行出错");
    }

    info!("服务退出");
}

// 检查配置文件是否有效
async fn check_config(config_path: &str) {
    println!("验证配置文件: {}", config_path);

    let loader = wxbridge::infra::config::ConfigLoader::new();

    match loader.load(config_path).await {
        Ok(config) => {
            println!("配置验证成功!");
            println!("- 监听地址: {}:{}", config.server.host, config.server.port);
            println!(
                "- 网关地址: {}",
                config.vendor.api_base_url.as_deref().unwrap_or("(默认)")
            );
            println!("- 临时目录: {}", config.media.temp_dir.display());
            println!(
                "- 日志级别: {:?}",
                LogLevel::parse(config.logging.level.as_deref().unwrap_or("info"))
            );
        }
        Err(e) => {
            println!("配置验证失败: {}", e);
        }
    }
}
