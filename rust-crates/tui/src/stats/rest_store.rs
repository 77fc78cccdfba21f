use reqwest::{
    Method,
    RequestBuilder,
    Response,
};
use serde::{
    Deserialize,
    Serialize,
};

use super::{
    GameRecord,
    GameStats,
    NewGameRecord,
    StatsError,
    StatsStore,
};
use crate::session::CoinSide;

/// PostgREST front of the hosted stats database.
#[derive(Clone, Debug)]
pub struct RestStatsStore {
    base_url: String,
    api_key: String,
    http: reqwest::Client,
}

#[derive(Serialize)]
struct UpdateGlobalStatsArgs {
    p_won: bool,
    p_choice: CoinSide,
}

#[derive(Serialize)]
struct PlayerStatsArgs<'a> {
    p_wallet_address: &'a str,
}

#[derive(Deserialize)]
#[serde(untagged)]
enum OneOrMany {
    Many(Vec<GameStats>),
    One(GameStats),
}

impl RestStatsStore {
    pub fn new(
        base_url: impl Into<String>,
        api_key: impl Into<String>,
    ) -> Result<Self, StatsError> {
        let base_url = base_url.into().trim_end_matches('/').to_string();
        let http = reqwest::Client::builder().build()?;
        Ok(Self {
            base_url,
            api_key: api_key.into(),
            http,
        })
    }

    pub fn base_url(&self) -> &str {
        &self.base_url
    }

    fn request(&self, method: Method, path: &str) -> RequestBuilder {
        self.http
            .request(method, format!("{}/rest/v1/{}", self.base_url, path))
            .header("apikey", &self.api_key)
            .bearer_auth(&self.api_key)
    }

    async fn expect_success(res: Response) -> Result<Vec<u8>, StatsError> {
        let status = res.status();
        let bytes = res.bytes().await?;
        if !status.is_success() {
            return Err(StatsError::Status {
                status: status.as_u16(),
                body: String::from_utf8_lossy(&bytes).into_owned(),
            });
        }
        Ok(bytes.to_vec())
    }
}

impl StatsStore for RestStatsStore {
    async fn insert_game(&self, record: &NewGameRecord) -> Result<(), StatsError> {
        let res = self
            .request(Method::POST, "game_records")
            .header("Prefer", "return=minimal")
            .json(&[record])
            .send()
            .await?;
        Self::expect_success(res).await?;

        let res = self
            .request(Method::POST, "rpc/update_global_stats")
            .json(&UpdateGlobalStatsArgs {
                p_won: record.won,
                p_choice: record.choice,
            })
            .send()
            .await?;
        Self::expect_success(res).await?;
        Ok(())
    }

    async fn global_stats(&self) -> Result<GameStats, StatsError> {
        let res = self
            .request(Method::GET, "global_stats")
            .query(&[("select", "*"), ("limit", "1")])
            .send()
            .await?;
        let bytes = Self::expect_success(res).await?;
        let rows: Vec<GameStats> = serde_json::from_slice(&bytes)?;
        Ok(rows.into_iter().next().unwrap_or_default())
    }

    async fn player_stats(&self, wallet_address: &str) -> Result<GameStats, StatsError> {
        let res = self
            .request(Method::POST, "rpc/get_player_stats")
            .json(&PlayerStatsArgs {
                p_wallet_address: wallet_address,
            })
            .send()
            .await?;
        let bytes = Self::expect_success(res).await?;
        if bytes.iter().all(u8::is_ascii_whitespace) {
            return Ok(GameStats::default());
        }
        Ok(match serde_json::from_slice::<Option<OneOrMany>>(&bytes)? {
            Some(OneOrMany::Many(rows)) => rows.into_iter().next().unwrap_or_default(),
            Some(OneOrMany::One(stats)) => stats,
            None => GameStats::default(),
        })
    }

    async fn recent_games(
        &self,
        wallet_address: Option<&str>,
        limit: usize,
    ) -> Result<Vec<GameRecord>, StatsError> {
        let mut query = vec![
            ("select", "*".to_string()),
            ("order", "created_at.desc".to_string()),
            ("limit", limit.to_string()),
        ];
        if let Some(wallet) = wallet_address {
            query.push(("wallet_address", format!("eq.{wallet}")));
        }
        let res = self
            .request(Method::GET, "game_records")
            .query(&query)
            .send()
            .await?;
        let bytes = Self::expect_success(res).await?;
        Ok(serde_json::from_slice(&bytes)?)
    }
}
