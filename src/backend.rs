pub mod firestore;
pub mod memory;
pub mod postgrest;

use crate::api::error::StorageError;
use anyhow::Context;
use serde::{de::DeserializeOwned, Serialize};

/// A single REST call: the request type knows where it goes and what comes back.
trait Endpoint: Serialize {
    const METHOD: &'static str;
    /// Whether the request is sent as a JSON body; otherwise there is no body.
    const BODY: bool = true;

    type Response: DeserializeOwned;
    type Value;

    /// Path below the backend's base url.
    fn path(&self) -> String;

    /// Query parameters, serialized with `serde_qs`.
    fn query(&self) -> Result<Option<String>, StorageError> {
        Ok(None)
    }

    fn headers(&self) -> &'static [(&'static str, &'static str)] {
        &[]
    }

    fn extract(response: Self::Response) -> Self::Value;
}

/// An HTTP status and body the backend did not accept.
struct Rejected {
    status: u16,
    body: String,
}

/// Sends `request` to `base_url`, with `auth` applied to the ureq request.
///
/// Responses with an error status come back as `Ok(Err(_))` so the caller
/// can classify them; transport and decoding problems are `Err(_)`.
fn execute<Ep, Auth>(base_url: &str, request: &Ep, auth: Auth) -> Result<Result<Ep::Value, Rejected>, StorageError>
where
    Ep: Endpoint,
    Auth: FnOnce(&mut ureq::Request),
{
    let mut url = format!("{}/{}", base_url, request.path());
    if let Some(query) = request.query()? {
        url.push(if url.contains('?') { '&' } else { '?' });
        url.push_str(&query);
    }
    let mut http_request = ureq::request(Ep::METHOD, &url);
    auth(&mut http_request);
    for (header, value) in request.headers() {
        http_request.set(header, value);
    }
    let http_response = if Ep::BODY {
        let buffer = serde_json::to_string(request).context("serializing request failed")?;
        http_request.set("Content-Type", "application/json");
        http_request.send_string(&buffer)
    } else {
        http_request.call()
    };

    if let Some(error) = http_response.synthetic_error() {
        return Err(anyhow::anyhow!("{} {} failed: {}", Ep::METHOD, url, error));
    }
    if http_response.error() {
        let status = http_response.status();
        let body = http_response
            .into_string()
            .unwrap_or_else(|_| "Could not turn error body into String.".to_string());
        return Ok(Err(Rejected { status, body }));
    }
    let response_string = http_response.into_string().context("failed to turn response into string")?;
    let response = serde_json::from_str::<Ep::Response>(&response_string)
        .with_context(|| format!("deserializing response failed:\n{}", &response_string))?;
    Ok(Ok(Ep::extract(response)))
}
