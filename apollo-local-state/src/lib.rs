//! Serve GraphQL selection sets from a normalized response cache merged with local
//! (`@client`) field resolvers.
//!
//! The entry point is [`LocalStateClient`]: it ingests server responses into an
//! [`EntityStore`], plans queries once with the [`Planner`] and executes them with the
//! hybrid [`Executor`], which interleaves cache reads with calls into the
//! [`LocalResolverRegistry`].

#![cfg_attr(feature = "failfast", allow(unreachable_code))]

macro_rules! failfast_debug {
    ($($tokens:tt)+) => {{
        tracing::debug!($($tokens)+);
        #[cfg(feature = "failfast")]
        panic!(
            "failfast triggered. \
            Please remove the feature failfast if you don't want to see these panics"
        );
    }};
}

macro_rules! failfast_error {
    ($($tokens:tt)+) => {{
        tracing::error!($($tokens)+);
        #[cfg(feature = "failfast")]
        panic!(
            "failfast triggered. \
            Please remove the feature failfast if you don't want to see these panics"
        );
    }};
}

mod client;
mod configuration;
mod context;
mod error;
pub mod execution;
pub mod graphql;
pub mod json_ext;
pub mod plan;
pub mod resolver;
pub mod spec;
pub mod store;

pub use crate::client::LocalStateClient;
pub use crate::configuration::Configuration;
pub use crate::configuration::ConfigurationError;
pub use crate::configuration::MissingEntityPolicy;
pub use crate::configuration::TypePolicy;
pub use crate::context::Context;
pub use crate::error::ExecutionError;
pub use crate::error::FieldError;
pub use crate::error::PlanningError;
pub use crate::error::StoreError;
pub use crate::execution::Executor;
pub use crate::execution::Root;
pub use crate::graphql::Request;
pub use crate::graphql::Response;
pub use crate::plan::Planner;
pub use crate::plan::QueryPlan;
pub use crate::resolver::LocalResolverRegistry;
pub use crate::resolver::RegistryBuilder;
pub use crate::spec::Query;
pub use crate::store::EntityStore;
pub use crate::store::IdentityKey;
