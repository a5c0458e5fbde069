pub mod common;
pub mod factory;
pub mod job;
pub mod prometheus;
pub mod secret;
pub mod static_factory;
pub mod templates;
pub mod thanos;
pub mod worker;

pub use common::{
    DEFAULT_LOTUS_IMAGE, FIELD_MANAGER, JobRole, owner_reference, standard_labels,
};
pub use factory::ResourceFactory;
pub use static_factory::{StaticResourceFactory, ensure_static_resources};
