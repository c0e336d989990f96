//! The registrar: an in-memory name to endpoint table.

use super::{RunningNode, base_router, spawn};
use parking_lot::RwLock;
use primefarm_core::{
    Error, numbered_ordinal,
    proto::{
        Binding, ListReply, ListRequest, RegisterReply, RegisterRequest, RegisterWorkerRequest,
        ResolveReply, ResolveRequest, UnregisterReply, UnregisterRequest,
        registry_server::{Registry, RegistryServer},
    },
};
use std::{collections::BTreeMap, sync::Arc};
use tokio::net::TcpListener;
use tonic::{Request, Response, Status};

#[derive(Clone, Debug, Default)]
pub struct RegistryService {
    bindings: Arc<RwLock<BTreeMap<String, String>>>,
}

impl RegistryService {
    /// Inserts a binding under the next free `<prefix><N>` name.
    ///
    /// `N` starts at one past the number of names already taken under the
    /// prefix and is bumped until it is free, so numbering survives gaps left
    /// by workers that unregistered.
    fn bind_numbered(&self, prefix: &str, endpoint: String) -> String {
        let mut bindings = self.bindings.write();
        let taken = bindings
            .keys()
            .filter(|name| numbered_ordinal(name, prefix).is_some())
            .count() as u64;

        let mut ordinal = taken + 1;
        let name = loop {
            let candidate = format!("{prefix}{ordinal}");
            if !bindings.contains_key(&candidate) {
                break candidate;
            }
            ordinal += 1;
        };

        bindings.insert(name.clone(), endpoint);
        name
    }
}

fn require(field: &str, value: &str) -> Result<(), Error> {
    if value.is_empty() {
        return Err(Error::InvalidRequest {
            reason: format!("`{field}` must not be empty"),
        });
    }
    Ok(())
}

#[tonic::async_trait]
impl Registry for RegistryService {
    async fn register(
        &self,
        request: Request<RegisterRequest>,
    ) -> Result<Response<RegisterReply>, Status> {
        let RegisterRequest {
            name,
            endpoint,
            rebind,
        } = request.into_inner();
        require("name", &name)?;
        require("endpoint", &endpoint)?;

        {
            let mut bindings = self.bindings.write();
            if !rebind && bindings.contains_key(&name) {
                return Err(Error::AlreadyBound { name }.into());
            }
            bindings.insert(name.clone(), endpoint.clone());
        }

        tracing::info!("Bound {name} to {endpoint}");
        Ok(Response::new(RegisterReply { name }))
    }

    async fn register_worker(
        &self,
        request: Request<RegisterWorkerRequest>,
    ) -> Result<Response<RegisterReply>, Status> {
        let RegisterWorkerRequest { prefix, endpoint } = request.into_inner();
        require("prefix", &prefix)?;
        require("endpoint", &endpoint)?;

        let name = self.bind_numbered(&prefix, endpoint.clone());
        tracing::info!("Bound {name} to {endpoint}");
        Ok(Response::new(RegisterReply { name }))
    }

    async fn resolve(
        &self,
        request: Request<ResolveRequest>,
    ) -> Result<Response<ResolveReply>, Status> {
        let name = request.into_inner().name;
        let endpoint = self
            .bindings
            .read()
            .get(&name)
            .cloned()
            .ok_or(Error::NotFound { name })?;
        Ok(Response::new(ResolveReply { endpoint }))
    }

    async fn list(&self, request: Request<ListRequest>) -> Result<Response<ListReply>, Status> {
        let prefix = request.into_inner().prefix;
        let bindings = self
            .bindings
            .read()
            .iter()
            .filter(|(name, _)| name.starts_with(&prefix))
            .map(|(name, endpoint)| Binding {
                name: name.clone(),
                endpoint: endpoint.clone(),
            })
            .collect();
        Ok(Response::new(ListReply { bindings }))
    }

    async fn unregister(
        &self,
        request: Request<UnregisterRequest>,
    ) -> Result<Response<UnregisterReply>, Status> {
        let name = request.into_inner().name;
        let removed = self.bindings.write().remove(&name).is_some();
        if removed {
            tracing::info!("Unbound {name}");
        }
        Ok(Response::new(UnregisterReply { removed }))
    }
}

/// Starts the registrar on `listener`.
pub async fn start(listener: TcpListener) -> anyhow::Result<RunningNode> {
    let local_addr = listener.local_addr()?;
    let (reporter, router) = base_router()?;
    reporter
        .set_serving::<RegistryServer<RegistryService>>()
        .await;
    let router = router.add_service(RegistryServer::new(RegistryService::default()));

    tracing::info!("Registrar listening on {local_addr}");
    spawn::<RegistryServer<RegistryService>>(
        "registrar".to_owned(),
        format!("http://{local_addr}"),
        listener,
        router,
        reporter,
        None,
    )
}
