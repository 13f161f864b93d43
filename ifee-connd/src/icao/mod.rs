//! Resolution of the aircraft address this unit is installed in.
//!
//! Order: explicitly configured address, on disk cache, ground service.
use crate::state::Icao;
use chrono::Utc;
use color_eyre::{
    eyre::{eyre, WrapErr},
    Result,
};
use serde::{Deserialize, Serialize};
use std::{
    path::{Path, PathBuf},
    time::Duration,
};
use tokio::fs;
use tracing::{error, info, warn};

const GROUND_TIMEOUT: Duration = Duration::from_secs(10);

#[derive(Debug, Serialize, Deserialize)]
struct CacheEntry {
    /// Unix seconds of the last save.
    time: i64,
    icao: Icao,
}

#[derive(Debug, Clone)]
pub struct IcaoCache {
    path: PathBuf,
}

impl IcaoCache {
    pub fn new(path: impl AsRef<Path>) -> Self {
        Self {
            path: path.as_ref().to_path_buf(),
        }
    }

    /// `Ok(None)` if there is no cache file yet.
    pub async fn load(&self) -> Result<Option<Icao>> {
        if !fs::try_exists(&self.path).await? {
            return Ok(None);
        }

        let contents = fs::read_to_string(&self.path)
            .await
            .wrap_err_with(|| format!("failed to read {}", self.path.display()))?;
        let entry: CacheEntry = serde_json::from_str(&contents)
            .wrap_err_with(|| format!("malformed icao cache {}", self.path.display()))?;

        Ok(Some(entry.icao))
    }

    pub async fn save(&self, icao: &Icao) -> Result<()> {
        if let Some(parent) = self.path.parent() {
            fs::create_dir_all(parent).await?;
        }

        let entry = CacheEntry {
            time: Utc::now().timestamp(),
            icao: icao.clone(),
        };
        fs::write(&self.path, serde_json::to_vec(&entry)?)
            .await
            .wrap_err_with(|| format!("failed to write {}", self.path.display()))?;

        Ok(())
    }
}

#[derive(Debug, Serialize)]
struct Credentials<'a> {
    username: &'a str,
    password: &'a str,
}

#[derive(Debug, Deserialize)]
struct TokenResponse {
    token: String,
}

#[derive(Debug, Deserialize)]
struct BoxResponse {
    hex: String,
}

/// Client of the ground service mapping box serials to aircraft addresses.
#[derive(Debug, Clone, bon::Builder)]
pub struct GroundClient {
    #[builder(into)]
    url: String,
    #[builder(into)]
    username: String,
    #[builder(into)]
    password: String,
    #[builder(into)]
    box_id: String,
}

impl GroundClient {
    /// `Ok(None)` when the service answers with a non success status.
    pub async fn lookup(&self) -> Result<Option<Icao>> {
        let client = reqwest::Client::builder()
            .timeout(GROUND_TIMEOUT)
            .build()?;
        let base = self.url.trim_end_matches('/');

        let resp = client
            .post(format!("{base}/api/authenticate"))
            .json(&Credentials {
                username: &self.username,
                password: &self.password,
            })
            .send()
            .await
            .wrap_err("ground authentication request failed")?;

        if !resp.status().is_success() {
            warn!("ground authentication rejected: {}", resp.status());
            return Ok(None);
        }

        let TokenResponse { token } = resp.json().await?;

        let resp = client
            .get(format!("{base}/api/admin/box/serial/{}", self.box_id))
            .bearer_auth(token)
            .send()
            .await
            .wrap_err("ground box lookup request failed")?;

        if !resp.status().is_success() {
            warn!("ground box lookup for {} rejected: {}", self.box_id, resp.status());
            return Ok(None);
        }

        let BoxResponse { hex } = resp.json().await?;
        let icao = hex
            .parse()
            .map_err(|e| eyre!("ground service returned {e}"))?;

        Ok(Some(icao))
    }
}

/// Never fails: every source that errors is logged and skipped. `None` leaves
/// the surveillance processor idle.
pub async fn resolve(
    configured: Option<Icao>,
    cache: &IcaoCache,
    ground: Option<&GroundClient>,
) -> Option<Icao> {
    if let Some(icao) = configured {
        info!("using configured icao {icao}");
        return Some(icao);
    }

    match cache.load().await {
        Ok(Some(icao)) => {
            info!("using cached icao {icao}");
            return Some(icao);
        }
        Ok(None) => {}
        Err(e) => error!("failed to load icao cache: {e:?}"),
    }

    let ground = ground?;
    match ground.lookup().await {
        Ok(Some(icao)) => {
            info!("resolved icao {icao} from ground service");
            if let Err(e) = cache.save(&icao).await {
                error!("failed to save icao cache: {e:?}");
            }
            Some(icao)
        }
        Ok(None) => None,
        Err(e) => {
            error!("failed to look up icao: {e:?}");
            None
        }
    }
}
