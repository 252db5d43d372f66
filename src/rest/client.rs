//! reqwest implementation of [`ExchangeApi`] for MAX v2

use std::collections::HashMap;
use std::time::Duration;

use async_trait::async_trait;
use reqwest::Method;
use serde::de::DeserializeOwned;
use serde_json::{Map, Value};
use tracing::{debug, info};

use super::{
    balances_from_accounts, CancelFilter, CancelTarget, ExchangeApi, MarketInfo, OrderRequest,
    RestAccount, RestOrder,
};
use crate::account::{Balance, Order};
use crate::config::Credentials;
use crate::error::{MarketDataError, Result};
use crate::signing;

const REQUEST_TIMEOUT: Duration = Duration::from_secs(10);

#[derive(Debug, serde::Deserialize)]
struct MemberAccounts {
    accounts: Vec<RestAccount>,
}

/// Signed MAX REST client
#[derive(Debug, Clone)]
pub struct MaxRestClient {
    http: reqwest::Client,
    base_url: String,
    credentials: Credentials,
}

impl MaxRestClient {
    pub fn new(base_url: &str, credentials: Credentials) -> Result<Self> {
        let http = reqwest::Client::builder()
            .timeout(REQUEST_TIMEOUT)
            .build()?;
        Ok(Self {
            http,
            base_url: base_url.trim_end_matches('/').to_string(),
            credentials,
        })
    }

    /// Authenticated call: params plus `nonce` and `path` are base64'd into
    /// the payload header and signed.
    async fn signed<T: DeserializeOwned>(&self, method: Method, path: &str, params: Map<String, Value>) -> Result<T> {
        if self.credentials.is_empty() {
            return Err(MarketDataError::Config("REST call requires API credentials".to_string()));
        }

        let mut body = params;
        body.insert("nonce".to_string(), Value::from(signing::nonce_millis()));
        body.insert("path".to_string(), Value::from(path));
        let body = Value::Object(body);
        let signed = signing::sign_payload(&body, &self.credentials.api_secret)?;

        let url = format!("{}{}", self.base_url, path);
        let request = self
            .http
            .request(method.clone(), &url)
            .header("X-MAX-ACCESSKEY", &self.credentials.api_key)
            .header("X-MAX-PAYLOAD", &signed.payload)
            .header("X-MAX-SIGNATURE", &signed.signature);

        let request = if method == Method::GET {
            request.query(&query_pairs(&body))
        } else {
            request.json(&body)
        };

        debug!(method = %method, path, "Sending signed request");
        Self::decode(path, request.send().await?).await
    }

    async fn public_get<T: DeserializeOwned>(&self, path: &str) -> Result<T> {
        let url = format!("{}{}", self.base_url, path);
        Self::decode(path, self.http.get(&url).send().await?).await
    }

    async fn decode<T: DeserializeOwned>(path: &str, response: reqwest::Response) -> Result<T> {
        let status = response.status();
        if !status.is_success() {
            let body = response.text().await.unwrap_or_default();
            return Err(MarketDataError::RestApi(format!("{} {}: {}", status, path, body)));
        }
        Ok(response.json::<T>().await?)
    }
}

fn query_pairs(body: &Value) -> Vec<(String, String)> {
    match body {
        Value::Object(map) => map
            .iter()
            .map(|(k, v)| {
                let v = match v {
                    Value::String(s) => s.clone(),
                    other => other.to_string(),
                };
                (k.clone(), v)
            })
            .collect(),
        _ => Vec::new(),
    }
}

fn order_params(request: &OrderRequest) -> Map<String, Value> {
    let mut params = Map::new();
    params.insert("market".to_string(), Value::from(request.market.as_str()));
    params.insert("side".to_string(), Value::from(request.side.as_str()));
    params.insert("volume".to_string(), Value::from(request.volume.to_string()));
    params.insert(
        "ord_type".to_string(),
        serde_json::to_value(request.order_type).unwrap_or(Value::Null),
    );
    if let Some(price) = request.price {
        params.insert("price".to_string(), Value::from(price.to_string()));
    }
    if let Some(stop) = request.stop_price {
        params.insert("stop_price".to_string(), Value::from(stop.to_string()));
    }
    if let Some(client_id) = &request.client_id {
        params.insert("client_oid".to_string(), Value::from(client_id.as_str()));
    }
    params
}

#[async_trait]
impl ExchangeApi for MaxRestClient {
    async fn place_order(&self, request: OrderRequest) -> Result<Order> {
        let order: RestOrder = self
            .signed(Method::POST, "/api/v2/orders", order_params(&request))
            .await?;
        info!(market = %request.market, side = request.side.as_str(), "Order placed");
        Ok(order.into())
    }

    async fn cancel_order(&self, target: CancelTarget) -> Result<Order> {
        let mut params = Map::new();
        match &target {
            CancelTarget::Id(id) => params.insert("id".to_string(), Value::from(*id)),
            CancelTarget::ClientId(cid) => params.insert("client_oid".to_string(), Value::from(cid.as_str())),
        };
        let order: RestOrder = self.signed(Method::POST, "/api/v2/order/delete", params).await?;
        info!(target = ?target, "Order cancelled");
        Ok(order.into())
    }

    async fn cancel_orders(&self, filter: CancelFilter) -> Result<Vec<Order>> {
        let mut params = Map::new();
        if let Some(market) = &filter.market {
            params.insert("market".to_string(), Value::from(market.as_str()));
        }
        if let Some(side) = filter.side {
            params.insert("side".to_string(), Value::from(side.as_str()));
        }
        let orders: Vec<RestOrder> = self.signed(Method::POST, "/api/v2/orders/clear", params).await?;
        info!(count = orders.len(), "Orders cancelled");
        Ok(orders.into_iter().map(Order::from).collect())
    }

    async fn get_balances(&self) -> Result<HashMap<String, Balance>> {
        let member: MemberAccounts = self
            .signed(Method::GET, "/api/v2/members/accounts", Map::new())
            .await?;
        Ok(balances_from_accounts(member.accounts))
    }

    async fn get_markets(&self) -> Result<Vec<MarketInfo>> {
        self.public_get("/api/v2/markets").await
    }

    async fn get_open_orders(&self, market: Option<String>) -> Result<Vec<Order>> {
        let mut params = Map::new();
        params.insert(
            "market".to_string(),
            Value::from(market.unwrap_or_else(|| "all".to_string())),
        );
        params.insert("state[]".to_string(), Value::from("wait"));
        let orders: Vec<RestOrder> = self.signed(Method::GET, "/api/v2/orders", params).await?;
        Ok(orders.into_iter().map(Order::from).collect())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::account::Side;
    use rust_decimal_macros::dec;

    #[test]
    fn test_limit_order_params() {
        let params = order_params(&OrderRequest::limit("btctwd", Side::Buy, dec!(100.5), dec!(0.25)));
        assert_eq!(params["market"], "btctwd");
        assert_eq!(params["side"], "buy");
        assert_eq!(params["ord_type"], "limit");
        assert_eq!(params["price"], "100.5");
        assert_eq!(params["volume"], "0.25");
        assert!(params.get("stop_price").is_none());
    }

    #[test]
    fn test_query_pairs_stringify_values() {
        let body = serde_json::json!({"market": "all", "nonce": 123});
        let mut pairs = query_pairs(&body);
        pairs.sort();
        assert_eq!(
            pairs,
            vec![
                ("market".to_string(), "all".to_string()),
                ("nonce".to_string(), "123".to_string())
            ]
        );
    }

    #[tokio::test]
    async fn test_signed_call_requires_credentials() {
        let client = MaxRestClient::new("http://127.0.0.1:1", Credentials::default()).unwrap();
        let err = client.get_balances().await.unwrap_err();
        assert_eq!(err.kind(), "config");
    }
}
