pub mod config;
pub mod discovery;
pub mod gateway;
pub mod handler;
pub mod object_http;
pub mod observability;
pub mod partition;
pub mod server;
pub mod storage;

pub use discovery::{DiscoverySource, Instance, ServiceRegistry};
pub use gateway::{Gateway, GatewayBuilder, GatewayError};
pub use handler::BaseHandler;
pub use object_http::ObjectHttpHandler;
pub use partition::Partitioner;
pub use storage::{NodeClient, NodeConnector, ObjectStream, RequestContext};
