/// HUMBL Girls Club - community platform core
///
/// Session and authorization state, the moderation and report state machine,
/// event lifecycle management and admin audit logging, all expressed against
/// a remote procedure gateway. The hosted backend is reached over HTTP; an
/// embedded SQLite backend serves local development and tests.

pub mod audit;
pub mod auth;
pub mod backend;
pub mod challenges;
pub mod config;
pub mod context;
pub mod error;
pub mod events;
pub mod gateway;
pub mod invites;
pub mod moderation;
pub mod notifications;
pub mod organization;
pub mod payments;
pub mod session;
pub mod telemetry;

pub use audit::{AdminAction, AuditLogger};
pub use backend::{LocalBackend, LocalClient, Role};
pub use config::ClubConfig;
pub use context::ClubContext;
pub use error::{ClubError, ClubResult, DomainCondition, ErrorKind, RemoteError};
pub use gateway::{GatewayExt, RpcGateway, TableQuery};
pub use session::{SessionContext, SessionPhase, SessionSnapshot};
