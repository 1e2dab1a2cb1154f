use super::ServerContext;
use warp::Filter;

pub fn routes(
    ctx: &ServerContext,
) -> impl Filter<Extract = impl warp::Reply, Error = warp::Rejection> + Clone {
    health(ctx.clone())
}

/// GET api/health
///
/// Broker and database reachability plus the number of push clients
fn health(
    ctx: ServerContext,
) -> impl Filter<Extract = impl warp::Reply, Error = warp::Rejection> + Clone {
    warp::any()
        .map(move || ctx.clone())
        .and(warp::get())
        .and(warp::path!("api" / "health"))
        .and_then(|ctx: ServerContext| async move {
            let reachable = match ctx.probe.ping().await {
                Ok(_) => true,
                Err(e) => {
                    tracing::warn!("Database probe failed: {}", e);
                    false
                }
            };
            let mqtt_connected = ctx.publisher.is_connected();
            let ret = dto::HealthyDto {
                healthy: reachable && mqtt_connected,
                mqtt_connected,
                database: dto::DatabaseDto {
                    backend: ctx.probe.backend().to_owned(),
                    reachable,
                },
                clients: ctx.clients.len(),
            };
            Ok::<_, warp::Rejection>(warp::reply::json(&ret))
        })
        .boxed()
}

mod dto {
    use serde::Serialize;

    #[derive(Debug, Serialize)]
    pub struct HealthyDto {
        pub healthy: bool,
        pub mqtt_connected: bool,
        pub database: DatabaseDto,
        pub clients: usize,
    }

    #[derive(Debug, Serialize)]
    pub struct DatabaseDto {
        pub backend: String,
        pub reachable: bool,
    }
}
