use std::sync::Arc;

use eventgate::{
    Dispatcher, DispatcherConfig,
    api::{AppState, router},
    demo,
    logging::init_env_logger,
};

// curl localhost:9001/invoke/api --json '{"resource": "/orders/{orderId}", "httpMethod": "GET", "pathParameters": {"orderId": "o-1"}}'
#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let config = DispatcherConfig::from_env();
    init_env_logger(config.is_lambda);

    let routes = demo::routes(&config.stage)?;
    let dispatcher = Arc::new(Dispatcher::from_config(&config, routes));
    let table = dispatcher.routes();
    log::info!("stage {:?} routes {}", table.stage(), table.describe());
    let app = router(AppState::new(dispatcher.clone()));

    let listener = tokio::net::TcpListener::bind(&config.listen_addr).await?;
    log::info!("listening on {}", config.listen_addr);
    axum::serve(listener, app).await?;
    Ok(())
}
