//! Remote platform access
//!
//! [`RemoteGateway`] is the contract the reconcilers use; [`HttpGateway`]
//! implements it over the console API. Sessions are shared through a
//! [`SessionRegistry`]. An in-memory gateway for tests is built with the
//! `mock` feature.

mod client;
mod gateway;
#[cfg(any(test, feature = "mock"))]
pub mod mock;
mod session;

pub use client::HttpGateway;
pub use gateway::{
    AppExport, ImportOutcome, ImportRequest, ImportStatus, RemoteApp, RemoteAppDetail,
    RemoteDataset, RemoteDocument, RemoteGateway, RemoteWorkspace,
};
#[cfg(any(test, feature = "mock"))]
pub use mock::{MockGateway, MockGatewayFactory};
pub use session::{GatewayFactory, HttpGatewayFactory, SessionRegistry};
