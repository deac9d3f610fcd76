use pipeline_engine::{EngineConfig, PipelineEngine, init_logger_with_file};

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    // 1. Configuration and logging
    let config = EngineConfig::from_env();
    let log_dir = config.log_dir();
    init_logger_with_file(&config.log_level, config.log_json, log_dir.to_str())?;

    let pipeline_id: i64 = std::env::var("PIPELINE_ID")
        .ok()
        .and_then(|v| v.parse().ok())
        .unwrap_or(1);

    tracing::info!(
        pipeline_id,
        data_dir = %config.data_dir,
        environment = %config.environment,
        "Pipeline engine starting..."
    );

    // 2. Open the database and load the board
    let engine = PipelineEngine::open(config, pipeline_id).await?;
    for stage in engine.board() {
        tracing::info!(
            stage_id = stage.stage.id,
            name = %stage.stage.name,
            deals = stage.count,
            total_value = %stage.total_value,
            "Stage loaded"
        );
    }

    // 3. Serve until interrupted
    tokio::signal::ctrl_c().await?;
    engine.shutdown().await;
    Ok(())
}
