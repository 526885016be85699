use std::net::SocketAddr;

use tonic::{Request, Response, Status};
use tracing::{debug, info};

use crate::error::Error;
use crate::group::get_group;
use crate::proto::cache_server::{Cache, CacheServer};
use crate::proto::{
    Acknowledgement, DeleteRequest, GetRequest, InfoRequest, InfoResponse, KvResponse,
};

/// gRPC front for every group registered on this node.
#[derive(Clone)]
pub struct NodeServer {
    pub addr: SocketAddr,
}

impl NodeServer {
    pub fn new(addr: SocketAddr) -> Self {
        Self { addr }
    }

    pub async fn run(&self) -> anyhow::Result<()> {
        info!(
            "Listening on {}\nacorn-server version: {}",
            self.addr,
            env!("CARGO_PKG_VERSION"),
        );
        tonic::transport::Server::builder()
            .add_service(CacheServer::new(self.clone()))
            .serve(self.addr)
            .await?;
        Ok(())
    }
}

fn status_from(err: Error) -> Status {
    match err {
        Error::EmptyKey | Error::EmptyGroupName => Status::invalid_argument(err.to_string()),
        Error::GroupNotFound(_) | Error::KeyNotFound(_) => Status::not_found(err.to_string()),
        other => Status::internal(other.to_string()),
    }
}

#[tonic::async_trait]
impl Cache for NodeServer {
    async fn get(
        &self,
        req: Request<GetRequest>,
    ) -> tonic::Result<Response<KvResponse>, Status> {
        let req = req.into_inner();
        debug!(group = %req.group, key = %req.key, "serving get");
        let group = get_group(&req.group)
            .ok_or_else(|| status_from(Error::GroupNotFound(req.group.clone())))?;
        let value = group.get(&req.key).await.map_err(status_from)?;
        Ok(Response::new(KvResponse {
            value: value.to_vec(),
        }))
    }

    async fn delete(
        &self,
        req: Request<DeleteRequest>,
    ) -> tonic::Result<Response<Acknowledgement>, Status> {
        let req = req.into_inner();
        debug!(group = %req.group, key = %req.key, "serving delete");
        let group = get_group(&req.group)
            .ok_or_else(|| status_from(Error::GroupNotFound(req.group.clone())))?;
        group.delete(&req.key).map_err(status_from)?;
        Ok(Response::new(Acknowledgement { success: true }))
    }

    async fn info(
        &self,
        req: Request<InfoRequest>,
    ) -> tonic::Result<Response<InfoResponse>, Status> {
        let req = req.into_inner();
        let group = get_group(&req.group)
            .ok_or_else(|| status_from(Error::GroupNotFound(req.group.clone())))?;
        let info = group.cache_info();
        Ok(Response::new(InfoResponse {
            keys_num: info.keys_num as i64,
            current_used_bytes: info.current_used_bytes as i64,
            max_used_bytes: info.max_used_bytes as i64,
        }))
    }

    async fn backup(
        &self,
        req: Request<InfoRequest>,
    ) -> tonic::Result<Response<Acknowledgement>, Status> {
        let req = req.into_inner();
        let group = get_group(&req.group)
            .ok_or_else(|| status_from(Error::GroupNotFound(req.group.clone())))?;
        let path = group.backup().map_err(status_from)?;
        info!(group = %req.group, file = %path.display(), "backup complete");
        Ok(Response::new(Acknowledgement { success: true }))
    }
}
