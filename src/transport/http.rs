use super::Transport;
use crate::constants::UPDATES_PATH;
use crate::envelope::Sealed;
use crate::error::Error;
use reqwest::blocking::Client;
use std::time::Duration;

/// POSTs batches to the collector's `/updates` route.
pub struct HttpTransport {
    client: Client,
    url: String,
}

fn updates_url(address: &str) -> String {
    let base = address.trim_end_matches('/');
    if base.starts_with("http://") || base.starts_with("https://") {
        format!("{}{}", base, UPDATES_PATH)
    } else {
        format!("http://{}{}", base, UPDATES_PATH)
    }
}

impl HttpTransport {
    /// A transport for the collector at `address`.
    pub fn new(address: &str) -> Result<HttpTransport, Error> {
        let client = Client::builder()
            .timeout(Duration::from_secs(10))
            .user_agent(concat!("telemeter/", env!("CARGO_PKG_VERSION")))
            .build()
            .map_err(|e| Error::Internal(format!("unable to build http client: {}", e)))?;
        Ok(HttpTransport {
            client,
            url: updates_url(address),
        })
    }
}

impl Transport for HttpTransport {
    fn deliver(&mut self, sealed: &Sealed) -> Result<(), Error> {
        let mut request = self.client.post(&self.url).body(sealed.body.clone());
        for (key, value) in &sealed.headers {
            request = request.header(key.as_str(), value.as_str());
        }
        let response = request
            .send()
            .map_err(|e| Error::Delivery(format!("POST {}: {}", self.url, e)))?;
        let status = response.status();
        if status.is_success() {
            Ok(())
        } else {
            let text = response.text().unwrap_or_default();
            Err(Error::Delivery(format!(
                "POST {} returned {}: {}",
                self.url,
                status,
                text.trim()
            )))
        }
    }
}

#[cfg(test)]
mod test {
    use super::*;

    #[test]
    fn url_building() {
        assert_eq!(updates_url("localhost:8080"), "http://localhost:8080/updates");
        assert_eq!(
            updates_url("https://collector.example/"),
            "https://collector.example/updates"
        );
    }
}
