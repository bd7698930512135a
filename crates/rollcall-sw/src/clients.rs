//! Clients API: the pages a worker can control.

use hashbrown::HashMap;
use rollcall_core::ClientId;
use tracing::debug;
use url::Url;

use crate::{ServiceWorkerError, ServiceWorkerId};

/// An open page in scope.
#[derive(Debug, Clone)]
pub struct Client {
    pub id: ClientId,
    pub url: Url,
    pub client_type: ClientType,
    pub focused: bool,
    /// `None` until a worker claims the page.
    pub controller: Option<ServiceWorkerId>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum ClientType {
    #[default]
    Window,
    Worker,
    All,
}

/// Options for `Clients::match_all`.
#[derive(Debug, Clone, Default)]
pub struct ClientMatchOptions {
    pub include_uncontrolled: bool,
    pub client_type: ClientType,
}

/// Clients registry.
#[derive(Debug, Default)]
pub struct Clients {
    clients: HashMap<ClientId, Client>,
}

impl Clients {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn get(&self, id: ClientId) -> Option<&Client> {
        self.clients.get(&id)
    }

    /// Register an open page. New pages start uncontrolled unless a
    /// controller is given.
    pub fn add(&mut self, url: Url, controller: Option<ServiceWorkerId>) -> ClientId {
        let id = ClientId::new();
        self.clients.insert(
            id,
            Client {
                id,
                url,
                client_type: ClientType::Window,
                focused: false,
                controller,
            },
        );
        id
    }

    /// Remove a client (page closed).
    pub fn remove(&mut self, id: ClientId) -> Option<Client> {
        self.clients.remove(&id)
    }

    /// Controller of a client.
    pub fn controller_of(&self, id: ClientId) -> Option<ServiceWorkerId> {
        self.clients.get(&id).and_then(|c| c.controller)
    }

    /// Match clients, controlled by `worker` unless uncontrolled ones are
    /// requested too.
    pub fn match_all(&self, worker: ServiceWorkerId, options: &ClientMatchOptions) -> Vec<&Client> {
        let mut matched: Vec<&Client> = self
            .clients
            .values()
            .filter(|c| options.include_uncontrolled || c.controller == Some(worker))
            .filter(|c| match options.client_type {
                ClientType::All => true,
                t => c.client_type == t,
            })
            .collect();
        matched.sort_by_key(|c| c.id.0);
        matched
    }

    /// Open a new window client.
    pub fn open_window(
        &mut self,
        url: Url,
        controller: Option<ServiceWorkerId>,
    ) -> Result<Client, ServiceWorkerError> {
        match url.scheme() {
            "http" | "https" => {}
            other => {
                return Err(ServiceWorkerError::StateError(format!(
                    "cannot open window for {} URL",
                    other
                )))
            }
        }

        for client in self.clients.values_mut() {
            client.focused = false;
        }

        let id = self.add(url, controller);
        let client = self
            .clients
            .get_mut(&id)
            .ok_or_else(|| ServiceWorkerError::NotFound(id.to_string()))?;
        client.focused = true;
        debug!(client = %id, url = %client.url, "Opened window client");
        Ok(client.clone())
    }

    /// Focus a window client.
    pub fn focus(&mut self, id: ClientId) -> Result<Client, ServiceWorkerError> {
        let client_type = self
            .clients
            .get(&id)
            .map(|c| c.client_type)
            .ok_or_else(|| ServiceWorkerError::NotFound(id.to_string()))?;
        if client_type != ClientType::Window {
            return Err(ServiceWorkerError::StateError(
                "Can only focus window clients".to_string(),
            ));
        }

        for client in self.clients.values_mut() {
            client.focused = client.id == id;
        }
        self.clients
            .get(&id)
            .cloned()
            .ok_or_else(|| ServiceWorkerError::NotFound(id.to_string()))
    }

    /// Focus a window already showing `url`, or open one.
    pub fn open_or_focus(
        &mut self,
        url: Url,
        controller: Option<ServiceWorkerId>,
    ) -> Result<Client, ServiceWorkerError> {
        let existing = self
            .clients
            .values()
            .filter(|c| c.client_type == ClientType::Window && c.url == url)
            .map(|c| c.id)
            .min_by_key(|id| id.0);

        match existing {
            Some(id) => self.focus(id),
            None => self.open_window(url, controller),
        }
    }

    /// Make `worker` the controller of every client. Returns the clients
    /// whose controller changed.
    pub fn claim(&mut self, worker: ServiceWorkerId) -> Vec<ClientId> {
        let mut changed: Vec<ClientId> = self
            .clients
            .values_mut()
            .filter(|c| c.controller != Some(worker))
            .map(|c| {
                c.controller = Some(worker);
                c.id
            })
            .collect();
        changed.sort_by_key(|id| id.0);
        changed
    }

    pub fn len(&self) -> usize {
        self.clients.len()
    }

    pub fn is_empty(&self) -> bool {
        self.clients.is_empty()
    }
}
