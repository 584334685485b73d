//! gRPC receiver (spec §4.4.1): `SendLog` carries schema by name, not ID.

use std::sync::Arc;

use tonic::transport::Server;
use tonic::{Request, Response, Status};

use logship_model::{LogRecord, PushType, RawFields, DEFAULT_CLIENT_IP};
use logship_registry::derive_id;
use tokio::sync::broadcast;

use crate::proto::log_service_server::{LogService, LogServiceServer};
use crate::proto::{LogRequest, LogResponse};
use crate::Services;

pub struct GrpcReceiver {
    services: Arc<Services>,
}

impl GrpcReceiver {
    fn new(services: Arc<Services>) -> LogServiceServer<Self> {
        LogServiceServer::new(Self { services })
    }
}

#[tonic::async_trait]
impl LogService for GrpcReceiver {
    async fn send_log(
        &self,
        request: Request<LogRequest>,
    ) -> Result<Response<LogResponse>, Status> {
        let peer_ip = request
            .remote_addr()
            .map(|addr| addr.ip().to_string())
            .unwrap_or_else(|| DEFAULT_CLIENT_IP.to_string());
        let peer_addr = request
            .remote_addr()
            .map(|addr| addr.to_string())
            .unwrap_or_else(|| "unknown".to_string());
        let req = request.into_inner();

        if req.service.trim().is_empty() {
            return Ok(Response::new(LogResponse { success: false }));
        }

        let schema_name = match resolve_schema(&self.services, &req.schema).await {
            Some(name) => name,
            None => {
                tracing::error!(schema = %req.schema, "grpc: schema resolution failed");
                return Ok(Response::new(LogResponse { success: false }));
            }
        };

        let raw = RawFields {
            output: req.output,
            detail: req.detail,
            error_info: req.error_info,
            service: req.service,
            client_ip: peer_ip,
            client_addr: peer_addr,
            log_level: req.log_level,
            operator_id: req.operator_id,
            operator: req.operator,
            operator_ip: req.operator_ip,
            operator_equipment: req.operator_equipment,
            operator_company: req.operator_company,
            operator_project: req.operator_project,
        };

        let record = match LogRecord::from_fields(
            raw,
            schema_name,
            req.module,
            PushType::Grpc,
            chrono::Utc::now(),
        ) {
            Ok(record) => record,
            Err(err) => {
                tracing::warn!(error = %err, "grpc: rejected record");
                return Ok(Response::new(LogResponse { success: false }));
            }
        };

        match self.services.store.insert_one(&record).await {
            Ok(()) => Ok(Response::new(LogResponse { success: true })),
            Err(err) => {
                tracing::error!(error = %err, "grpc: insert failed");
                Ok(Response::new(LogResponse { success: false }))
            }
        }
    }
}

/// Schema resolution for gRPC is rebuild-and-wait first (the schema may
/// already exist upstream with a desynced cache), falling back to lazy
/// auto-creation on a genuine miss (spec §3 lifecycle: "created... lazily on
/// first gRPC receive with an unknown ID").
async fn resolve_schema(services: &Services, schema_name: &str) -> Option<String> {
    if schema_name.trim().is_empty() {
        return None;
    }

    let id = derive_id(schema_name);
    if let Ok(Some(name)) = services.registry.rebuild_and_wait(&id).await {
        if name == schema_name {
            return Some(name);
        }
    }

    services
        .registry
        .get_or_create_schema(schema_name)
        .await
        .ok()
        .map(|_| schema_name.to_string())
}

/// Binds the listener (probing from `base_port`), publishes the chosen port
/// in `GRPC_PORT`, and serves until `shutdown` fires.
pub async fn run(
    services: Arc<Services>,
    base_port: u16,
    mut shutdown: broadcast::Receiver<()>,
) -> anyhow::Result<()> {
    let (std_listener, port) = crate::ports::probe_tcp(base_port)?;
    std_listener.set_nonblocking(true)?;
    let listener = tokio::net::TcpListener::from_std(std_listener)?;
    std::env::set_var("GRPC_PORT", port.to_string());
    tracing::info!(port, "grpc receiver listening");

    let incoming = tokio_stream::wrappers::TcpListenerStream::new(listener);
    Server::builder()
        .add_service(GrpcReceiver::new(services))
        .serve_with_incoming_shutdown(incoming, async move {
            let _ = shutdown.recv().await;
        })
        .await?;
    Ok(())
}
