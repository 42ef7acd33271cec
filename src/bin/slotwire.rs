//! slotwire 命令行工具
//!
//! - `serve <addr>`: 运行服务全部插槽的参考插件
//! - `probe <config>`: 按配置绑定插槽并报告每个插槽的结果
//! - `init <path>`: 生成默认配置文件

use anyhow::{bail, Context};
use slotwire::{
    config::generate_default_config_file, init_logging, ConfigManager, InfillArgs, LoggingConfig, Point2,
    PluginServer, Polygon, Polygons, PostprocessArgs, ReferencePlugin, RpcRuntime, SimplifyArgs, SlotId,
    SlotRegistry,
};
use std::env;
use std::sync::Arc;

const DEFAULT_CONFIG_PATH: &str = "slotwire.yaml";

/// 程序入口点
fn main() {
    let args: Vec<String> = env::args().skip(1).collect();

    if let Err(e) = run_main(&args) {
        tracing::error!("slotwire failed: {:#}", e);
        eprintln!("error: {:#}", e);
        std::process::exit(1);
    }
}

fn run_main(args: &[String]) -> anyhow::Result<()> {
    match args.first().map(String::as_str) {
        Some("serve") => {
            let address = args.get(1).map(String::as_str).unwrap_or("127.0.0.1:33700");
            install_logging(&LoggingConfig::default());
            serve(address)
        }
        Some("probe") => {
            let path = args.get(1).map(String::as_str).unwrap_or(DEFAULT_CONFIG_PATH);
            probe(path)
        }
        Some("init") => {
            let path = args.get(1).map(String::as_str).unwrap_or(DEFAULT_CONFIG_PATH);
            install_logging(&LoggingConfig::default());
            init(path)
        }
        Some(other) => {
            print_usage();
            bail!("unknown command '{}'", other)
        }
        None => {
            print_usage();
            Ok(())
        }
    }
}

/// 安装日志订阅器；已有订阅器时沿用并记录警告
fn install_logging(config: &LoggingConfig) {
    if let Err(e) = init_logging(config) {
        tracing::warn!("Keeping the existing log subscriber: {}", e);
    }
}

/// 运行参考插件直到收到 Ctrl-C
fn serve(address: &str) -> anyhow::Result<()> {
    let runtime = tokio::runtime::Runtime::new().context("failed to start tokio runtime")?;
    runtime.block_on(async {
        let plugin = Arc::new(ReferencePlugin::new("slotwire-reference"));
        let server = PluginServer::bind(address, plugin)
            .await
            .with_context(|| format!("failed to listen on {}", address))?;
        let shutdown = server.shutdown_token();

        tokio::spawn(async move {
            if tokio::signal::ctrl_c().await.is_ok() {
                tracing::info!("Received Ctrl-C, stopping plugin server");
                shutdown.cancel();
            }
        });

        server.serve().await?;
        Ok(())
    })
}

/// 按配置绑定并用样例参数调用每个插槽
fn probe(path: &str) -> anyhow::Result<()> {
    let bootstrap = tokio::runtime::Builder::new_current_thread()
        .enable_all()
        .build()
        .context("failed to start tokio runtime")?;
    let config_manager = bootstrap
        .block_on(ConfigManager::load_from_file(path))
        .with_context(|| format!("failed to load {}", path))?;
    drop(bootstrap);

    install_logging(&config_manager.get_config().logging);
    config_manager.validate()?;
    let config = config_manager.get_config();
    tracing::info!("Probing {} v{} with config {}", config.engine.name, config.engine.version, path);

    let runtime = RpcRuntime::new(&config.rpc)?;
    let registry = SlotRegistry::new();
    let reports = registry.connect_from_config(config, &runtime);

    for report in &reports {
        println!("{}", report);
    }
    for slot in SlotId::ALL {
        println!("{}: {}", slot, sample_invoke(&registry, slot)?);
    }
    println!("{}", serde_json::to_string_pretty(&registry.describe())?);

    registry.unbind_all();
    Ok(())
}

/// 用固定样例调用插槽并概括结果
fn sample_invoke(registry: &SlotRegistry, slot: SlotId) -> anyhow::Result<String> {
    let square = Polygons::rectangle(Point2::new(0, 0), Point2::new(10_000, 10_000));
    let summary = match slot {
        SlotId::Simplify => {
            let mut points = square.paths[0].points.clone();
            points.insert(1, Point2::new(5_000, 0));
            let result = registry.simplify().invoke(SimplifyArgs {
                polygons: Polygons::new(vec![Polygon::new(points)]),
                max_resolution: 500,
                max_deviation: 25,
                max_area_deviation: 50_000,
            })?;
            format!("{} polygons, {} points", result.len(), result.point_count())
        }
        SlotId::Postprocess => {
            let result = registry.postprocess().invoke(PostprocessArgs {
                gcode: "G28\nG1 X10 Y10".to_string(),
            })?;
            format!("{} lines of g-code", result.lines().count())
        }
        SlotId::InfillGenerate => {
            let result = registry.infill().invoke(InfillArgs {
                outline: square,
                pattern: "lines".to_string(),
                settings: Default::default(),
            })?;
            format!("{} infill lines, {} polygons", result.lines.len(), result.polygons.len())
        }
    };
    let source = if registry.is_bound(slot) { "plugin" } else { "default" };
    Ok(format!("{} ({})", summary, source))
}

/// 生成默认配置文件
fn init(path: &str) -> anyhow::Result<()> {
    let runtime = tokio::runtime::Builder::new_current_thread()
        .enable_all()
        .build()
        .context("failed to start tokio runtime")?;
    runtime.block_on(generate_default_config_file(path))?;

    tracing::info!("Default configuration written to {}", path);
    tracing::info!("Enable plugin bindings, then run: slotwire probe {}", path);
    Ok(())
}

/// 打印使用说明
fn print_usage() {
    println!("slotwire {}", slotwire::VERSION);
    println!();
    println!("用法:");
    println!("  slotwire serve [addr]          # 运行参考插件（默认 127.0.0.1:33700）");
    println!("  slotwire probe [config]        # 按配置绑定插槽并报告结果");
    println!("  slotwire init [path]           # 生成默认配置文件");
    println!();
    println!("配置文件格式: YAML 或 TOML（按扩展名）");
    println!("环境变量 SLOTWIRE_LOG_LEVEL 覆盖配置中的日志级别");
}
