use std::env;
use std::time::Duration;

const METADATA_URL: &str = "http://metadata.google.internal/computeMetadata/v1/instance/zone";
const METADATA_TIMEOUT: Duration = Duration::from_secs(2);

/// Detects the region this process is running in.
///
/// Tries the GCP instance metadata server first (present only on GCE/GKE), then an
/// environment variable override, then falls back to a fixed literal. The metadata
/// body is a slash-separated resource path like `projects/123/zones/us-central1-a`; a
/// zone reduces to a region by dropping its trailing `-<letter>` suffix.
pub async fn detect() -> String {
    if let Some(region) = probe_metadata_server().await {
        return region;
    }

    if let Ok(region) = env::var("RBS_REGION") {
        if !region.is_empty() {
            return region;
        }
    }

    "default".to_owned()
}

async fn probe_metadata_server() -> Option<String> {
    let client = reqwest::Client::builder().timeout(METADATA_TIMEOUT).build().ok()?;

    let response = client
        .get(METADATA_URL)
        .header("Metadata-Flavor", "Google")
        .send()
        .await
        .ok()?;

    if !response.status().is_success() {
        return None;
    }

    let body = response.text().await.ok()?;
    let zone = body.rsplit('/').next().unwrap_or(&body);
    Some(match zone.rfind('-') {
        Some(last_dash) => zone[..last_dash].to_owned(),
        None => zone.to_owned(),
    })
}
