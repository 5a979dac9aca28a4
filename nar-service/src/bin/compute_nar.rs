use anyhow::Result;
use nar_service::{
    config::AppConfig,
    engine::{NarEngine, NarOutcome},
    metrics_server, observability,
    provider::QuestDbProvider,
};
use sqlx::postgres::PgPoolOptions;

#[tokio::main]
async fn main() -> Result<()> {
    observability::init_tracing();

    let cfg = AppConfig::load()?;

    if let Some(metrics_cfg) = &cfg.metrics {
        metrics_server::init(&metrics_cfg.bind_addr);
    }

    let pool = PgPoolOptions::new()
        .max_connections(cfg.questdb.max_connections)
        .connect(&cfg.questdb.uri)
        .await?;

    let engine = NarEngine::new(QuestDbProvider::new(pool));
    let request = cfg.nar.request();

    let report = engine.compute(&request).await?;

    match &report.outcome {
        NarOutcome::Ratio { ratio } => {
            tracing::info!(
                ratio = *ratio,
                dataset = %request.group.dataset,
                building = request.group.building,
                power_type = %request.power_type,
                good_sections_only = request.good_sections_only,
                diagnostics = report.diagnostics.len(),
                "noise-to-aggregate ratio computed"
            );
        }
        NarOutcome::PartialFailure(failure) => {
            tracing::warn!(
                failing_meter = %failure.failing_meter,
                power_type = %failure.power_type,
                good_sections_only = failure.good_sections_only,
                "ratio aborted: sub-meter energy unavailable"
            );
        }
    }

    println!("{}", serde_json::to_string_pretty(&report)?);

    Ok(())
}
