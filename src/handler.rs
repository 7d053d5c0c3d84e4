use crate::discovery::ServiceRegistry;
use crate::gateway::Gateway;
use std::sync::Arc;

/// Base handler implementation that holds common components
/// The HTTP front end wraps this
#[derive(Clone)]
pub struct BaseHandler {
    pub gateway: Arc<Gateway>,
    pub registry: Arc<ServiceRegistry>,
}

impl BaseHandler {
    pub fn new(gateway: Arc<Gateway>, registry: Arc<ServiceRegistry>) -> Self {
        Self { gateway, registry }
    }
}
