use super::endpoint;
use core::time::Duration;
use primefarm_core::{
    Error, Result, ServiceDirectory,
    proto::{
        Binding, ListRequest, RegisterRequest, RegisterWorkerRequest, ResolveRequest,
        UnregisterRequest, registry_client::RegistryClient,
    },
};
use tonic::{Code, Status, transport::Channel};

/// Client side of the registrar.
#[derive(Clone, Debug)]
pub struct RegistryDirectory {
    client: RegistryClient<Channel>,
}

impl RegistryDirectory {
    /// Connects to the registrar at `uri`.
    ///
    /// # Errors
    ///
    /// Returns [`Error::Connection`] if the registrar cannot be reached.
    pub async fn connect(uri: &str, connect_timeout: Duration) -> Result<Self> {
        let channel = endpoint(uri, connect_timeout)?
            .connect()
            .await
            .map_err(|e| Error::Connection {
                target: uri.to_owned(),
                reason: e.to_string(),
            })?;
        Ok(Self {
            client: RegistryClient::new(channel),
        })
    }

    /// Binds `endpoint` under the next free `<prefix><N>` and returns the name.
    pub async fn register_worker(&self, prefix: &str, endpoint: &str) -> Result<String> {
        let reply = self
            .client
            .clone()
            .register_worker(RegisterWorkerRequest {
                prefix: prefix.to_owned(),
                endpoint: endpoint.to_owned(),
            })
            .await
            .map_err(|status| directory_error(&status, prefix))?;
        Ok(reply.into_inner().name)
    }

    /// Lists the bindings whose name starts with `prefix`.
    pub async fn list(&self, prefix: &str) -> Result<Vec<Binding>> {
        let reply = self
            .client
            .clone()
            .list(ListRequest {
                prefix: prefix.to_owned(),
            })
            .await
            .map_err(|status| directory_error(&status, prefix))?;
        Ok(reply.into_inner().bindings)
    }

    /// Removes the binding for `name`. Returns `false` if there was none.
    pub async fn unregister(&self, name: &str) -> Result<bool> {
        let reply = self
            .client
            .clone()
            .unregister(UnregisterRequest {
                name: name.to_owned(),
            })
            .await
            .map_err(|status| directory_error(&status, name))?;
        Ok(reply.into_inner().removed)
    }
}

#[tonic::async_trait]
impl ServiceDirectory for RegistryDirectory {
    async fn register(&self, name: &str, endpoint: &str) -> Result<()> {
        self.client
            .clone()
            .register(RegisterRequest {
                name: name.to_owned(),
                endpoint: endpoint.to_owned(),
                rebind: true,
            })
            .await
            .map_err(|status| directory_error(&status, name))?;
        Ok(())
    }

    async fn resolve(&self, name: &str) -> Result<String> {
        let reply = self
            .client
            .clone()
            .resolve(ResolveRequest {
                name: name.to_owned(),
            })
            .await
            .map_err(|status| directory_error(&status, name))?;
        Ok(reply.into_inner().endpoint)
    }
}

fn directory_error(status: &Status, name: &str) -> Error {
    match status.code() {
        Code::NotFound => Error::NotFound {
            name: name.to_owned(),
        },
        Code::AlreadyExists => Error::AlreadyBound {
            name: name.to_owned(),
        },
        code => Error::Directory {
            context: format!("registrar answered {code:?}: {}", status.message()),
        },
    }
}
