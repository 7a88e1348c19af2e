use anyhow::Context;
use arm_relay::domain::ports::Translator;
use arm_relay::utils::{logger, validation::Validate};
use arm_relay::{
    ChatTranslator, CliConfig, CommandDispatcher, CommandValidator, DeviceSession,
    NativeSerialBackend, RelayConfig, RelayEngine, TelemetryHub, TransportServer,
};
use clap::Parser;
use std::sync::Arc;

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let cli = CliConfig::parse();

    // 初始化日誌
    if cli.json_logs {
        logger::init_json_logger(cli.verbose);
    } else {
        logger::init_cli_logger(cli.verbose);
    }

    tracing::info!("🚀 Starting arm-relay");

    // 載入配置：檔案 → 環境變數 → 命令列
    let mut config = match &cli.config {
        Some(path) => {
            tracing::info!("📁 Loading configuration from: {}", path);
            RelayConfig::from_file(path)
                .with_context(|| format!("failed to load config file '{}'", path))?
        }
        None => RelayConfig::default(),
    };
    config.apply_env();
    cli.apply_to(&mut config);

    if cli.verbose {
        tracing::debug!("Resolved config: {:?}", config);
    }

    if let Err(e) = config.validate() {
        tracing::error!("❌ Configuration validation failed: {}", e);
        eprintln!("❌ {}", e.user_friendly_message());
        std::process::exit(1);
    }

    let session = DeviceSession::spawn(Arc::new(NativeSerialBackend), config.session_config());

    if cli.list_ports {
        for port in session.list_available().await {
            println!(
                "{}\t{}\t{}:{}",
                port.path,
                port.manufacturer.as_deref().unwrap_or("-"),
                port.vendor_id.as_deref().unwrap_or("-"),
                port.product_id.as_deref().unwrap_or("-"),
            );
        }
        return Ok(());
    }

    let translator: Option<Arc<dyn Translator>> = if config.translator_enabled() {
        let translator_config = config.translator_config();
        if translator_config.api_key.is_none() {
            tracing::warn!("⚠️ No API key configured, model requests will be unauthenticated");
        }
        tracing::info!("🤖 Translator model: {}", translator_config.model);
        Some(Arc::new(ChatTranslator::new(translator_config)?))
    } else {
        tracing::info!("Natural-language control disabled");
        None
    };

    let validator = CommandValidator::new(config.validation_policy());
    let dispatcher = CommandDispatcher::new(session.clone(), validator).with_pacing(config.pacing());
    let hub = TelemetryHub::new(config.telemetry_capacity());
    let relay = RelayEngine::new(session.clone(), dispatcher, hub, translator);

    let server = TransportServer::bind(&config.bind_addr(), relay)
        .await
        .with_context(|| format!("failed to listen on {}", config.bind_addr()))?;
    tracing::info!("✅ Server running on {}", server.local_addr()?);

    server
        .serve_until(async {
            let _ = tokio::signal::ctrl_c().await;
        })
        .await?;

    session.close().await?;
    tracing::info!("👋 Shut down cleanly");
    Ok(())
}
