use presdesk::config::{Config, make_app};

#[tokio::main]
async fn main() {
    tracing_subscriber::fmt().init();

    let config = match Config::load() {
        Ok(config) => config,
        Err(e) => {
            tracing::error!("Could not load configuration: {e}");
            std::process::exit(1);
        }
    };

    let app = match make_app(&config) {
        Ok(app) => app,
        Err(e) => {
            tracing::error!("Could not start: {e}");
            std::process::exit(1);
        }
    };

    let listener = tokio::net::TcpListener::bind(config.bind_addr)
        .await
        .unwrap_or_else(|e| panic!("could not bind {}: {e}", config.bind_addr));

    tracing::info!("Listening on {}", config.bind_addr);

    axum::serve(listener, app).await.unwrap();
}
