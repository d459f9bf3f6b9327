use std::time::Duration;

use super::HttpError;

/// Build a client whose connection layer fails fast on dead peers.
pub fn transport_client(transport_timeout: Duration) -> Result<reqwest::Client, HttpError> {
    let client = reqwest::Client::builder()
        .connect_timeout(transport_timeout)
        .tcp_keepalive(transport_timeout)
        .build()?;
    Ok(client)
}
