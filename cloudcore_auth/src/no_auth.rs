use async_trait::async_trait;
use cloudcore_tokens::Error;
use http::HeaderMap;

use crate::{AuthType, Authenticator};

/// Leaves requests unauthenticated
#[derive(Clone, Copy, Debug, Default)]
pub struct NoAuthAuthenticator;

#[async_trait]
impl Authenticator for NoAuthAuthenticator {
    fn authentication_type(&self) -> AuthType {
        AuthType::NoAuth
    }

    async fn authenticate(&self, _headers: &mut HeaderMap) -> Result<(), Error> {
        Ok(())
    }
}
