//! Identity provider adapters.

mod fixed;
mod http;

pub use fixed::StaticIdentityProvider;
pub use http::HttpIdentityProvider;

use std::sync::Arc;

use crate::application::identity::IdentityProvider;
use crate::config::{IdentityMode, IdentitySettings};
use crate::infra::error::InfraError;

/// Build the provider selected by `identity.mode`.
pub fn build_provider(settings: &IdentitySettings) -> Result<Arc<dyn IdentityProvider>, InfraError> {
    match settings.mode {
        IdentityMode::Static => Ok(Arc::new(StaticIdentityProvider::from_settings(
            &settings.users,
        ))),
        IdentityMode::Http => {
            let base_url = settings.base_url.clone().ok_or_else(|| {
                InfraError::configuration("identity.base_url is required for http identity mode")
            })?;
            let secret_key = settings.secret_key.clone().ok_or_else(|| {
                InfraError::configuration("identity.secret_key is required for http identity mode")
            })?;
            Ok(Arc::new(HttpIdentityProvider::new(
                base_url,
                secret_key,
                settings.timeout,
            )?))
        }
    }
}
