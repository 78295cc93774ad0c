//! 内置数据源定义
//!
//! 配置中未声明 `[[tools.definitions]]` 时使用这里的默认目录。
//! 每个服务商的参数名、别名和鉴权方式只在此处声明，分发逻辑对所有服务商一致。

use crate::tools::definition::{AuthMode, ParameterSpec, RetryPolicy, ToolDefinition};
use crate::tools::transport::HttpMethod;

pub const WEATHER_TOOL: &str = "WeatherAPI";
pub const NEWS_TOOL: &str = "NewsAPI";
pub const MARKET_TOOL: &str = "MarketDataAPI";
pub const FRED_TOOL: &str = "FredAPI";
pub const GDELT_TOOL: &str = "GDELTAPI";

pub fn default_definitions() -> Vec<ToolDefinition> {
    vec![weather(), news(), market_quote(), economic_series(), gdelt()]
}

fn weather() -> ToolDefinition {
    ToolDefinition {
        name: WEATHER_TOOL.into(),
        description: "Get current weather conditions for any location. Use this for weather queries.".into(),
        method: HttpMethod::Get,
        endpoint: "https://api.weatherapi.com/v1/current.json".into(),
        parameters: vec![
            ParameterSpec::required("q", &["city", "location", "place", "query", "search"]),
            ParameterSpec::optional("aqi", &["air_quality"]),
        ],
        auth: AuthMode::QueryKey {
            param: "key".into(),
            key_env: "WEATHER_API_KEY".into(),
        },
        retry: RetryPolicy::default(),
    }
}

fn news() -> ToolDefinition {
    ToolDefinition {
        name: NEWS_TOOL.into(),
        description: "Fetch latest news articles on a topic. Use for news-related queries.".into(),
        method: HttpMethod::Get,
        endpoint: "https://newsapi.org/v2/everything".into(),
        parameters: vec![
            ParameterSpec::required("q", &["query", "search", "topic", "keywords"]),
            ParameterSpec::optional("pageSize", &["page_size", "limit", "count"]),
            ParameterSpec::optional("language", &["lang"]),
            ParameterSpec::optional("sortBy", &["sort", "sort_by"]),
        ],
        auth: AuthMode::Header {
            header: "X-Api-Key".into(),
            key_env: "NEWS_API_KEY".into(),
        },
        retry: RetryPolicy::default(),
    }
}

fn market_quote() -> ToolDefinition {
    ToolDefinition {
        name: MARKET_TOOL.into(),
        description: "Get real-time stock quotes and financial indicators for a ticker symbol.".into(),
        method: HttpMethod::Get,
        endpoint: "https://financialmodelingprep.com/api/v3/quote/{symbol}".into(),
        parameters: vec![ParameterSpec::required("symbol", &["ticker", "stock", "company"])],
        auth: AuthMode::QueryKey {
            param: "apikey".into(),
            key_env: "MARKET_DATA_KEY".into(),
        },
        retry: RetryPolicy::default(),
    }
}

fn economic_series() -> ToolDefinition {
    ToolDefinition {
        name: FRED_TOOL.into(),
        description: "Access Federal Reserve Economic Data series for U.S. macroeconomic indicators.".into(),
        method: HttpMethod::Get,
        endpoint: "https://api.stlouisfed.org/fred/series/observations".into(),
        parameters: vec![
            ParameterSpec::required("series_id", &["series", "indicator", "id"]),
            ParameterSpec::optional("file_type", &["format"]),
            ParameterSpec::optional("limit", &["count"]),
            ParameterSpec::optional("sort_order", &["order"]),
        ],
        auth: AuthMode::QueryKey {
            param: "api_key".into(),
            key_env: "FRED_KEY".into(),
        },
        retry: RetryPolicy::default(),
    }
}

fn gdelt() -> ToolDefinition {
    ToolDefinition {
        name: GDELT_TOOL.into(),
        description: "Global news and event monitoring for trends. Do not use for weather queries.".into(),
        method: HttpMethod::Get,
        endpoint: "https://api.gdeltproject.org/api/v2/doc/doc".into(),
        parameters: vec![
            ParameterSpec::required("query", &["q", "search", "topic"]),
            ParameterSpec::optional("mode", &[]),
            ParameterSpec::optional("format", &[]),
            ParameterSpec::optional("maxrecords", &["limit", "max_records"]),
        ],
        auth: AuthMode::None,
        retry: RetryPolicy::default(),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn test_catalogue_names_unique() {
        let defs = default_definitions();
        let mut names: Vec<_> = defs.iter().map(|d| d.name.to_lowercase()).collect();
        names.sort();
        names.dedup();
        assert_eq!(names.len(), defs.len());
    }

    #[test]
    fn test_weather_location_aliases() {
        let def = weather();
        for key in ["city", "location", "place", "q", "query", "search"] {
            let params = def
                .normalize(json!({ key: "Chicago" }).as_object().unwrap())
                .unwrap();
            assert_eq!(params.get("q"), Some(&json!("Chicago")), "alias {key}");
        }
    }

    #[test]
    fn test_query_keys_share_canonical_name_in_every_provider() {
        for def in default_definitions() {
            let resolved: Vec<Option<&str>> = ["q", "query", "search"]
                .iter()
                .map(|key| def.parameters.iter().find(|p| p.matches(key)).map(|p| p.name.as_str()))
                .collect();
            if resolved.iter().all(Option::is_none) {
                continue;
            }
            assert!(resolved.iter().all(Option::is_some), "{}: {:?}", def.name, resolved);
            assert!(resolved.windows(2).all(|w| w[0] == w[1]), "{}: {:?}", def.name, resolved);
        }
    }

    #[test]
    fn test_market_symbol_in_path() {
        let def = market_quote();
        let params = def.normalize(json!({ "ticker": "AAPL" }).as_object().unwrap()).unwrap();
        let req = def
            .build_request(&params, Some("market-key-0001"), std::time::Duration::from_secs(5))
            .unwrap();
        assert_eq!(req.url, "https://financialmodelingprep.com/api/v3/quote/AAPL");
        assert_eq!(req.query, vec![("apikey".to_string(), "market-key-0001".to_string())]);
    }

    #[test]
    fn test_gdelt_needs_no_credential() {
        let def = gdelt();
        let params = def.normalize(json!({ "topic": "elections" }).as_object().unwrap()).unwrap();
        assert!(def.build_request(&params, None, std::time::Duration::from_secs(5)).is_ok());
    }
}
