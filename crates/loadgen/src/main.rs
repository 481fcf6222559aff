//! Load generator entry point.

use loadgen::{LoadgenConfig, RunSummary};
use ordering::OrderingConfig;
use sqlx::postgres::PgPoolOptions;
use stock_store::{InMemoryStore, PostgresStore};
use tokio::signal;

fn record_summary(summary: &RunSummary) {
    metrics::gauge!("loadgen_orders_committed").set(summary.committed as f64);
    metrics::gauge!("loadgen_units_sold").set(summary.units as f64);
    for (category, count) in &summary.rejected {
        metrics::gauge!("loadgen_orders_rejected", "category" => category.clone())
            .set(*count as f64);
    }
}

#[tokio::main]
async fn main() {
    let load = LoadgenConfig::from_env();

    // 1. Initialize tracing
    ordering::telemetry::init_tracing(load.json_logs);

    // 2. Install Prometheus metrics recorder
    let metrics_handle = metrics_exporter_prometheus::PrometheusBuilder::new()
        .install_recorder()
        .expect("failed to install Prometheus recorder");

    // 3. Pick the store backend
    let config = OrderingConfig::from_env();
    tracing::info!(
        backend = load.backend(),
        orders = load.orders,
        concurrency = load.concurrency,
        strategy = %config.deduction_strategy,
        "starting load run"
    );

    let run = async {
        match &load.database_url {
            Some(url) => {
                let pool = PgPoolOptions::new()
                    .max_connections(load.pool_size())
                    .connect(url)
                    .await
                    .expect("failed to connect to database");
                let store = PostgresStore::new(pool).with_lock_timeout(config.lock_timeout);
                store.run_migrations().await.expect("migrations failed");
                loadgen::run(store, &config, &load).await
            }
            None => {
                let store = InMemoryStore::new().with_lock_timeout(config.lock_timeout);
                loadgen::run(store, &config, &load).await
            }
        }
    };

    // 4. Run until done or interrupted; dropping the run rolls back in-flight orders
    let result = tokio::select! {
        result = run => result,
        _ = signal::ctrl_c() => {
            tracing::warn!("received SIGINT, abandoning load run");
            std::process::exit(130);
        }
    };

    match result {
        Ok(summary) => {
            record_summary(&summary);
            tracing::info!(
                committed = summary.committed,
                units = summary.units,
                alerts = summary.alerts,
                consistent = summary.is_consistent(),
                "load run finished"
            );
            println!("{summary}");
            println!("{}", metrics_handle.render());
            if !summary.is_consistent() {
                std::process::exit(1);
            }
        }
        Err(e) => {
            tracing::error!(error = %e, "load run failed");
            std::process::exit(1);
        }
    }
}
