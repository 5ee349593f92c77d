//! Authorization URL construction and callback parsing
//!
//! The authorization URL is deterministic given the app identity, redirect
//! target and PKCE challenge. The callback URL the provider redirects to
//! carries either a `code` or an `error` query parameter.

use tracing::debug;
use url::Url;

use crate::constants::{CODE_CHALLENGE_METHOD, DISABLE_SIGNUP, TOKEN_ACCESS_TYPE};
use crate::error::{Error, OAuthErrorCode, Result};

/// Build the authorization URL for `endpoint`.
///
/// Query parameters, in order: `response_type`, `code_challenge`,
/// `code_challenge_method`, `client_id`, `redirect_uri`,
/// `token_access_type`, `disable_signup`.
pub fn build_authorization_url(
    endpoint: &str,
    client_id: &str,
    redirect_uri: &str,
    challenge: &str,
) -> Result<Url> {
    let mut url = Url::parse(endpoint)
        .map_err(|e| Error::Config(format!("invalid authorize endpoint {endpoint}: {e}")))?;
    url.query_pairs_mut()
        .clear()
        .append_pair("response_type", "code")
        .append_pair("code_challenge", challenge)
        .append_pair("code_challenge_method", CODE_CHALLENGE_METHOD)
        .append_pair("client_id", client_id)
        .append_pair("redirect_uri", redirect_uri)
        .append_pair("token_access_type", TOKEN_ACCESS_TYPE)
        .append_pair("disable_signup", DISABLE_SIGNUP);
    Ok(url)
}

/// Extract the authorization code from a callback URL.
///
/// A `code` parameter wins. Otherwise an `error` parameter is mapped
/// through [`OAuthErrorCode`]; a URL with neither (or one that does not
/// parse) fails with [`OAuthErrorCode::Unknown`].
pub fn parse_callback(callback_url: &str) -> Result<String> {
    let url = match Url::parse(callback_url) {
        Ok(url) => url,
        Err(e) => {
            debug!(error = %e, "callback URL did not parse");
            return Err(Error::OAuth(OAuthErrorCode::Unknown));
        }
    };

    let mut error = None;
    for (key, value) in url.query_pairs() {
        match key.as_ref() {
            "code" => return Ok(value.into_owned()),
            "error" if error.is_none() => error = Some(value.into_owned()),
            _ => {}
        }
    }

    match error {
        Some(code) => {
            debug!(code = %code, "callback carried an error");
            Err(Error::oauth(&code))
        }
        None => Err(Error::OAuth(OAuthErrorCode::Unknown)),
    }
}
