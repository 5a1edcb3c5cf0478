use crate::core::catalog::Catalog;
use crate::core::models::{App, AppId};
use crate::core::settings::SourceSettings;
use crate::source::{FetchError, SnapshotSource};
use async_trait::async_trait;
use std::collections::HashMap;

/// Snapshot source backed by the remote library's badge endpoint, which
/// returns the full app list as a JSON array.
pub struct HttpSource {
    client: reqwest::Client,
    endpoint: String,
    token: Option<String>,
}

impl HttpSource {
    pub fn new(settings: &SourceSettings) -> Self {
        Self {
            client: reqwest::Client::new(),
            endpoint: settings.endpoint.clone(),
            token: settings.token.clone(),
        }
    }

    fn request(&self) -> reqwest::RequestBuilder {
        let mut req = self.client.get(&self.endpoint);
        if let Some(token) = &self.token {
            req = req.header("Authorization", format!("Bearer {token}"));
        }
        req
    }
}

fn catalog_from_payload(apps: Vec<App>) -> Catalog {
    let map: HashMap<AppId, App> = apps.into_iter().map(|a| (a.id, a)).collect();
    Catalog::from_apps(map)
}

#[async_trait]
impl SnapshotSource for HttpSource {
    async fn fetch_snapshot(&self) -> Result<Catalog, FetchError> {
        let response = self.request().send().await?;

        let status = response.status();
        if !status.is_success() {
            return Err(FetchError::Status {
                status: status.as_u16(),
            });
        }

        let apps: Vec<App> = response.json().await?;
        tracing::debug!(apps = apps.len(), "Fetched library snapshot");
        Ok(catalog_from_payload(apps))
    }

    async fn is_reachable(&self) -> bool {
        match self.request().send().await {
            Ok(response) => response.status().is_success(),
            Err(e) => {
                tracing::debug!(error = %e, "Library service not reachable");
                false
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_payload_to_catalog() {
        let json = r#"[
            {"id": 70, "name": "Half-Life", "remaining_drops": 2, "play_time": 0.3},
            {"id": 220, "name": "Half-Life 2", "remaining_drops": 0, "play_time": 11.0},
            {"id": 400, "name": "Portal", "remaining_drops": 1, "play_time": 1.5,
             "icon": "icons/400.jpg", "header": "headers/400.jpg"}
        ]"#;

        let apps: Vec<App> = serde_json::from_str(json).unwrap();
        let catalog = catalog_from_payload(apps);

        assert_eq!(catalog.len(), 3);
        assert_eq!(catalog.get(70).map(|a| a.remaining_drops), Some(2));
        assert_eq!(catalog.get(400).and_then(|a| a.icon.as_deref()), Some("icons/400.jpg"));
        assert_eq!(catalog.games_to_idle(), 2);
        assert_eq!(catalog.games_in_refund(), 2);
    }

    #[test]
    fn test_duplicate_ids_keep_single_entry() {
        let json = r#"[
            {"id": 70, "name": "Half-Life", "remaining_drops": 2, "play_time": 0.3},
            {"id": 70, "name": "Half-Life", "remaining_drops": 1, "play_time": 0.4}
        ]"#;

        let apps: Vec<App> = serde_json::from_str(json).unwrap();
        let catalog = catalog_from_payload(apps);
        assert_eq!(catalog.len(), 1);
    }
}
