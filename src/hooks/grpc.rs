//! gRPC services for the host's hook sidecar protocol.

use std::future::Future;
use std::path::{Path, PathBuf};
use std::sync::Arc;

use tokio::net::{UnixListener, UnixStream};
use tokio_stream::wrappers::UnixListenerStream;
use tonic::transport::{Channel, Endpoint, Server, Uri};
use tonic::{Request, Response, Status};
use tracing::{debug, error, info, warn};

use crate::api::info::{
    info_server::{Info, InfoServer},
    HookPoint as ProtoHookPoint, InfoParams, InfoResult,
};
use crate::api::v1alpha2::{
    callbacks_server::{Callbacks, CallbacksServer},
    OnDefineDomainParams, OnDefineDomainResult, PreCloudInitIsoParams, PreCloudInitIsoResult,
};
use crate::error::Error;
use crate::hooks::{HookInfo, HookSidecar};

impl From<Error> for Status {
    fn from(err: Error) -> Self {
        match err {
            Error::Serialize(_) => Status::internal(err.to_string()),
            _ => Status::invalid_argument(err.to_string()),
        }
    }
}

impl From<HookInfo> for InfoResult {
    fn from(info: HookInfo) -> Self {
        InfoResult {
            name: info.name,
            versions: info.versions,
            hook_points: info
                .hook_points
                .into_iter()
                .map(|point| ProtoHookPoint {
                    name: point.name,
                    priority: point.priority,
                })
                .collect(),
        }
    }
}

#[derive(Debug)]
pub struct InfoService<S> {
    sidecar: Arc<S>,
}

impl<S> InfoService<S> {
    pub fn new(sidecar: Arc<S>) -> Self {
        Self { sidecar }
    }
}

#[tonic::async_trait]
impl<S: HookSidecar> Info for InfoService<S> {
    async fn info(&self, request: Request<InfoParams>) -> Result<Response<InfoResult>, Status> {
        let supported = request.into_inner().supported_hook_sidecar_versions;
        let info = self.sidecar.info();
        if !supported.is_empty() && !info.versions.iter().any(|v| supported.contains(v)) {
            warn!(?supported, versions = ?info.versions, "host supports none of our hook versions");
        }
        debug!(name = %info.name, "announcing hook points");
        Ok(Response::new(info.into()))
    }
}

#[derive(Debug)]
pub struct CallbacksService<S> {
    sidecar: Arc<S>,
}

impl<S> CallbacksService<S> {
    pub fn new(sidecar: Arc<S>) -> Self {
        Self { sidecar }
    }
}

#[tonic::async_trait]
impl<S: HookSidecar> Callbacks for CallbacksService<S> {
    async fn on_define_domain(
        &self,
        request: Request<OnDefineDomainParams>,
    ) -> Result<Response<OnDefineDomainResult>, Status> {
        let params = request.into_inner();
        match self.sidecar.on_define_domain(&params.domain_xml, &params.vmi) {
            Ok(domain_xml) => {
                info!(
                    input_bytes = params.domain_xml.len(),
                    output_bytes = domain_xml.len(),
                    "domain definition rewritten for passt"
                );
                Ok(Response::new(OnDefineDomainResult { domain_xml }))
            }
            Err(err) => {
                error!(%err, "on define domain hook failed");
                Err(err.into())
            }
        }
    }

    async fn pre_cloud_init_iso(
        &self,
        request: Request<PreCloudInitIsoParams>,
    ) -> Result<Response<PreCloudInitIsoResult>, Status> {
        let params = request.into_inner();
        let cloud_init_data = self
            .sidecar
            .pre_cloud_init_iso(params.cloud_init_data, &params.vmi);
        Ok(Response::new(PreCloudInitIsoResult { cloud_init_data }))
    }
}

/// Serves both hook services on `listener` until `shutdown` resolves.
pub async fn serve<S, F>(
    listener: UnixListener,
    sidecar: Arc<S>,
    shutdown: F,
) -> Result<(), tonic::transport::Error>
where
    S: HookSidecar,
    F: Future<Output = ()>,
{
    Server::builder()
        .add_service(InfoServer::new(InfoService::new(sidecar.clone())))
        .add_service(CallbacksServer::new(CallbacksService::new(sidecar)))
        .serve_with_incoming_shutdown(UnixListenerStream::new(listener), shutdown)
        .await
}

/// Opens a channel to a sidecar listening on a Unix socket.
pub async fn connect(socket: impl AsRef<Path>) -> Result<Channel, tonic::transport::Error> {
    let socket: PathBuf = socket.as_ref().to_path_buf();
    // The URI is required by the endpoint but never dialed.
    Endpoint::from_static("http://[::]:50051")
        .connect_with_connector(tower::service_fn(move |_: Uri| {
            UnixStream::connect(socket.clone())
        }))
        .await
}
