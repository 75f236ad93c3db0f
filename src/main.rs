use graphkb::{api, config, llm::OpenAiClient, logging, service::KnowledgeBaseService};
use std::sync::Arc;
use tokio::net::TcpListener;

#[tokio::main]
async fn main() {
    logging::init_tracing();
    let config = Arc::new(config::load_config().expect("Failed to load configuration"));
    if let Ok(client) = OpenAiClient::from_config(&config)
        && client.health_check().await
    {
        tracing::info!(model = client.model(), "Generation endpoint reachable");
    }
    let service = Arc::new(KnowledgeBaseService::new(config.clone()));
    let app = api::create_router(service);

    let (listener, port) = bind_listener(config.server_port)
        .await
        .expect("Failed to bind listener");
    tracing::info!(
        data_dir = %config.graphrag_data_dir.display(),
        "Listening on http://0.0.0.0:{}",
        port
    );
    axum::serve(listener, app).await.expect("Server error");
}

async fn bind_listener(configured: Option<u16>) -> Result<(TcpListener, u16), std::io::Error> {
    use std::net::Ipv4Addr;

    if let Some(port) = configured {
        return TcpListener::bind((Ipv4Addr::UNSPECIFIED, port))
            .await
            .map(|listener| (listener, port));
    }

    const PORT_RANGE: std::ops::RangeInclusive<u16> = 4100..=4199;
    for port in PORT_RANGE {
        match TcpListener::bind((Ipv4Addr::UNSPECIFIED, port)).await {
            Ok(listener) => {
                tracing::debug!(port, "Bound server port");
                return Ok((listener, port));
            }
            Err(err) if err.kind() == std::io::ErrorKind::AddrInUse => {
                tracing::debug!(port, "Port already in use; trying next");
                continue;
            }
            Err(err) => return Err(err),
        }
    }

    Err(std::io::Error::new(
        std::io::ErrorKind::AddrNotAvailable,
        "No available port found in range 4100-4199",
    ))
}
