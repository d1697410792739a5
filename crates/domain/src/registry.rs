//! Tool-server catalog types.
//!
//! Discovery (OpenAPI introspection) and registry CRUD live outside the
//! core; these types are the read model the core consumes: a snapshot of
//! which tool servers exist, which endpoints they expose, and whether a
//! given project may call them.

use crate::plan::HttpMethod;
use serde::{Deserialize, Serialize};
use std::collections::HashMap;

/// A single declared endpoint a tool server is willing to accept calls on.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ToolEndpoint {
    pub method: HttpMethod,
    pub path: String,
}

/// A registered external tool server.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ToolServer {
    pub id: String,
    pub name: String,
    pub base_url: String,
    #[serde(default = "d_true")]
    pub active: bool,
    pub endpoints: Vec<ToolEndpoint>,
    /// Projects allowed to call this tool. `None` means unrestricted.
    #[serde(default)]
    pub enabled_projects: Option<Vec<String>>,
}

fn d_true() -> bool {
    true
}

impl ToolServer {
    pub fn allows_endpoint(&self, method: HttpMethod, path: &str) -> bool {
        self.endpoints
            .iter()
            .any(|e| e.method == method && e.path == path)
    }

    pub fn enabled_for_project(&self, project_id: &str) -> bool {
        match &self.enabled_projects {
            None => true,
            Some(list) => list.iter().any(|p| p == project_id),
        }
    }

    pub fn exposes_command_endpoint(&self) -> bool {
        self.allows_endpoint(HttpMethod::Post, "/command")
    }
}

/// In-memory snapshot of registered tool servers, keyed by id.
///
/// The core reads this via [`ToolRegistry::get`] / [`ToolRegistry::all`];
/// population is the responsibility of whatever CRUD/discovery surface
/// exists outside the core (e.g. loaded from config at startup).
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct ToolRegistry {
    servers: HashMap<String, ToolServer>,
}

impl ToolRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn insert(&mut self, server: ToolServer) {
        self.servers.insert(server.id.clone(), server);
    }

    pub fn get(&self, id: &str) -> Option<&ToolServer> {
        self.servers.get(id)
    }

    pub fn all(&self) -> impl Iterator<Item = &ToolServer> {
        self.servers.values()
    }
}
