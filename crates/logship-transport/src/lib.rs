//! Transport receivers: gRPC, HTTP, TCP, UDP decoders sharing one
//! schema-resolve -> validate -> enqueue/insert path (spec §4.4).

pub mod ack;
pub mod grpc;
pub mod http;
pub mod ports;
pub mod tcp;
pub mod udp;

pub mod proto {
    tonic::include_proto!("logship");
}

use std::sync::Arc;
use std::time::Duration;

use logship_ingest::Batcher;
use logship_model::{LogRecord, ModuleAllowList};
use logship_registry::SchemaRegistry;
use logship_store::ColumnarWriter;

/// Everything a receiver needs, constructed once in the daemon binary and
/// shared by `Arc` (spec §9, "globals -> injected state"). Each receiver's
/// shutdown `broadcast::Receiver` is handed to it directly by `main.rs` at
/// spawn time, not held here.
pub struct Services {
    pub registry: Arc<SchemaRegistry>,
    pub store: Arc<ColumnarWriter>,
    pub tcp_batcher: Batcher<LogRecord, Arc<ColumnarWriter>>,
    pub udp_batcher: Batcher<LogRecord, Arc<ColumnarWriter>>,
    pub module_allow_list: ModuleAllowList,
    pub read_timeout: Duration,
    pub buffer_capacity: usize,
    pub ack_port: u16,
}
