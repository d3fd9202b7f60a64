//! Angel One SmartAPI historical candle adapter implementing PricePort.
//!
//! One login per adapter: the JWT is obtained on the first fetch and reused.
//! Every HTTP request waits for `request_delay_ms` since the previous one.

use crate::domain::error::SignalError;
use crate::domain::price_bar::{normalize_series, PriceBar};
use crate::ports::config_port::ConfigPort;
use crate::ports::price_port::PricePort;
use chrono::{DateTime, FixedOffset, NaiveDate, NaiveDateTime};
use log::{debug, info, warn};
use reqwest::blocking::{Client, RequestBuilder};
use reqwest::StatusCode;
use serde::Serialize;
use serde_json::Value;
use std::cell::RefCell;
use std::collections::BTreeMap;
use std::thread;
use std::time::{Duration, Instant};

pub const DEFAULT_BASE_URL: &str = "https://apiconnect.angelone.in";
pub const DEFAULT_INTERVAL: &str = "ONE_MINUTE";
pub const DEFAULT_EXCHANGE: &str = "NSE";

const LOGIN_PATH: &str = "/rest/auth/angelbroking/user/v1/loginByPassword";
const CANDLE_PATH: &str = "/rest/secure/angelbroking/historical/v1/getCandleData";
const IST_OFFSET_SECS: i32 = 5 * 3600 + 30 * 60;

/// Built-in NSE instrument tokens. `[symbols]` entries extend or override these.
pub const NSE_TOKENS: [(&str, &str); 14] = [
    ("ASIANPAINT", "236"),
    ("AXISBANK", "5900"),
    ("BAJFINANCE", "317"),
    ("HDFCBANK", "1333"),
    ("ICICIBANK", "4963"),
    ("INFY", "1594"),
    ("ITC", "1660"),
    ("LT", "11483"),
    ("MARUTI", "10999"),
    ("RELIANCE", "2885"),
    ("SBIN", "3045"),
    ("TCS", "11536"),
    ("ULTRACEMCO", "11532"),
    ("WIPRO", "3787"),
];

/// Token map after applying the `[symbols]` section. Symbols are upper-cased.
pub fn token_map(config: &dyn ConfigPort) -> BTreeMap<String, String> {
    let mut tokens: BTreeMap<String, String> = NSE_TOKENS
        .iter()
        .map(|(symbol, token)| (symbol.to_string(), token.to_string()))
        .collect();
    for (symbol, token) in config.get_section("symbols") {
        let token = token.trim();
        if !token.is_empty() {
            tokens.insert(symbol.trim().to_uppercase(), token.to_string());
        }
    }
    tokens
}

#[derive(Debug, Clone)]
pub struct SmartApiSettings {
    pub api_key: String,
    pub client_id: String,
    pub password: String,
    pub totp: String,
    pub base_url: String,
    pub interval: String,
    pub exchange: String,
    pub request_delay: Duration,
    pub timeout: Duration,
}

impl SmartApiSettings {
    pub fn from_config(config: &dyn ConfigPort) -> Result<Self, SignalError> {
        let required = |key: &str| {
            config
                .get_string("smartapi", key)
                .map(|v| v.trim().to_string())
                .filter(|v| !v.is_empty())
                .ok_or_else(|| SignalError::ConfigMissing {
                    section: "smartapi".to_string(),
                    key: key.to_string(),
                })
        };
        let optional = |key: &str, default: &str| {
            config
                .get_string("smartapi", key)
                .map(|v| v.trim().to_string())
                .filter(|v| !v.is_empty())
                .unwrap_or_else(|| default.to_string())
        };

        Ok(Self {
            api_key: required("api_key")?,
            client_id: required("client_id")?,
            password: required("password")?,
            totp: required("totp")?,
            base_url: optional("base_url", DEFAULT_BASE_URL)
                .trim_end_matches('/')
                .to_string(),
            interval: optional("interval", DEFAULT_INTERVAL),
            exchange: optional("exchange", DEFAULT_EXCHANGE).to_uppercase(),
            request_delay: Duration::from_millis(
                config.get_int("smartapi", "request_delay_ms", 1000).max(0) as u64,
            ),
            timeout: Duration::from_secs(
                config.get_int("smartapi", "timeout_secs", 30).max(1) as u64,
            ),
        })
    }
}

#[derive(Serialize)]
struct LoginRequest<'a> {
    clientcode: &'a str,
    password: &'a str,
    totp: &'a str,
}

#[derive(Serialize)]
#[serde(rename_all = "camelCase")]
struct CandleRequest<'a> {
    mode: &'a str,
    exchange_tokens: BTreeMap<&'a str, Vec<&'a str>>,
    interval: &'a str,
    from_date: String,
    to_date: String,
}

pub struct SmartApiAdapter {
    client: Client,
    settings: SmartApiSettings,
    tokens: BTreeMap<String, String>,
    session: RefCell<Option<String>>,
    last_request: RefCell<Option<Instant>>,
}

impl SmartApiAdapter {
    pub fn new(
        settings: SmartApiSettings,
        tokens: BTreeMap<String, String>,
    ) -> Result<Self, SignalError> {
        let client = Client::builder()
            .timeout(settings.timeout)
            .build()
            .map_err(|e| SignalError::Provider {
                reason: format!("failed to build HTTP client: {}", e),
            })?;
        Ok(Self {
            client,
            settings,
            tokens,
            session: RefCell::new(None),
            last_request: RefCell::new(None),
        })
    }

    pub fn from_config(config: &dyn ConfigPort) -> Result<Self, SignalError> {
        Self::new(SmartApiSettings::from_config(config)?, token_map(config))
    }

    pub fn token_for(&self, symbol: &str) -> Option<&str> {
        self.tokens.get(&symbol.to_uppercase()).map(String::as_str)
    }

    fn throttle(&self) {
        let mut last = self.last_request.borrow_mut();
        if let Some(prev) = *last {
            let elapsed = prev.elapsed();
            if elapsed < self.settings.request_delay {
                thread::sleep(self.settings.request_delay - elapsed);
            }
        }
        *last = Some(Instant::now());
    }

    fn with_headers(&self, builder: RequestBuilder) -> RequestBuilder {
        builder
            .header("Content-Type", "application/json")
            .header("Accept", "application/json")
            .header("X-UserType", "USER")
            .header("X-SourceID", "WEB")
            .header("X-ClientLocalIP", "192.168.1.1")
            .header("X-ClientPublicIP", "106.193.147.98")
            .header("X-MACAddress", "00:00:00:00:00:00")
            .header("X-PrivateKey", self.settings.api_key.as_str())
    }

    fn login(&self) -> Result<String, SignalError> {
        self.throttle();
        let url = format!("{}{}", self.settings.base_url, LOGIN_PATH);
        let body = LoginRequest {
            clientcode: &self.settings.client_id,
            password: &self.settings.password,
            totp: &self.settings.totp,
        };

        let response = self
            .with_headers(self.client.post(&url))
            .json(&body)
            .send()
            .map_err(|e| SignalError::Auth {
                reason: format!("login request failed: {}", e),
            })?;

        let status = response.status();
        if status != StatusCode::OK {
            return Err(SignalError::Auth {
                reason: format!("login returned HTTP {}", status),
            });
        }
        let payload: Value = response.json().map_err(|e| SignalError::Auth {
            reason: format!("unreadable login response: {}", e),
        })?;

        let token = parse_login_response(&payload)?;
        info!("SmartAPI session established for {}", self.settings.client_id);
        Ok(token)
    }

    fn session_token(&self) -> Result<String, SignalError> {
        if let Some(token) = self.session.borrow().as_ref() {
            return Ok(token.clone());
        }
        let token = self.login()?;
        *self.session.borrow_mut() = Some(token.clone());
        Ok(token)
    }
}

/// JWT from a login response; anything else is an authentication failure.
pub fn parse_login_response(payload: &Value) -> Result<String, SignalError> {
    if payload.get("status").and_then(Value::as_bool) != Some(true) {
        let message = payload
            .get("message")
            .and_then(Value::as_str)
            .unwrap_or("login rejected");
        return Err(SignalError::Auth {
            reason: message.to_string(),
        });
    }
    payload
        .get("data")
        .and_then(|d| d.get("jwtToken"))
        .and_then(Value::as_str)
        .filter(|t| !t.is_empty())
        .map(str::to_string)
        .ok_or_else(|| SignalError::Auth {
            reason: "login response has no jwtToken".to_string(),
        })
}

fn number(value: &Value) -> Option<f64> {
    match value {
        Value::Number(n) => n.as_f64(),
        Value::String(s) => s.trim().parse::<f64>().ok(),
        _ => None,
    }
}

fn ist() -> Option<FixedOffset> {
    FixedOffset::east_opt(IST_OFFSET_SECS)
}

fn from_epoch_millis(ms: i64) -> Option<NaiveDateTime> {
    let offset = ist()?;
    DateTime::from_timestamp_millis(ms).map(|utc| utc.with_timezone(&offset).naive_local())
}

/// Candle timestamp: epoch milliseconds become IST wall time, RFC 3339
/// strings keep their own wall time.
pub fn parse_candle_timestamp(value: &Value) -> Option<NaiveDateTime> {
    match value {
        Value::Number(n) => n
            .as_i64()
            .or_else(|| n.as_f64().map(|f| f as i64))
            .and_then(from_epoch_millis),
        Value::String(s) => {
            let s = s.trim();
            DateTime::parse_from_rfc3339(s)
                .map(|dt| dt.naive_local())
                .ok()
                .or_else(|| s.parse::<i64>().ok().and_then(from_epoch_millis))
                .or_else(|| NaiveDateTime::parse_from_str(s, "%Y-%m-%d %H:%M:%S").ok())
        }
        _ => None,
    }
}

fn parse_candle(candle: &Value) -> Option<PriceBar> {
    let fields = candle.as_array()?;
    if fields.len() < 6 {
        return None;
    }
    Some(PriceBar {
        timestamp: parse_candle_timestamp(&fields[0])?,
        open: number(&fields[1])?,
        high: number(&fields[2])?,
        low: number(&fields[3])?,
        close: number(&fields[4])?,
        volume: number(&fields[5])? as i64,
    })
}

/// Bars from the `data` field of a candle response, which is either the
/// candle array itself or `{exchange: {token: [candles]}}`.
pub fn parse_candles(data: &Value, exchange: &str, token: &str) -> Vec<PriceBar> {
    let candles: &[Value] = match data {
        Value::Array(candles) => candles.as_slice(),
        Value::Object(_) => data
            .get(exchange)
            .and_then(|e| e.get(token))
            .and_then(Value::as_array)
            .map(Vec::as_slice)
            .unwrap_or(&[]),
        _ => &[],
    };

    let mut bars = Vec::with_capacity(candles.len());
    for (idx, candle) in candles.iter().enumerate() {
        match parse_candle(candle) {
            Some(bar) if bar.is_valid() => bars.push(bar),
            Some(_) => warn!("skipping candle {} for token {}: invalid prices", idx, token),
            None => warn!("skipping malformed candle {} for token {}", idx, token),
        }
    }
    normalize_series(bars)
}

impl PricePort for SmartApiAdapter {
    fn fetch_bars(
        &self,
        symbol: &str,
        from: NaiveDate,
        to: NaiveDate,
    ) -> Result<Vec<PriceBar>, SignalError> {
        let token = self
            .token_for(symbol)
            .ok_or_else(|| SignalError::UnknownSymbol {
                symbol: symbol.to_string(),
            })?;
        let jwt = self.session_token()?;

        let exchange = self.settings.exchange.as_str();
        let body = CandleRequest {
            mode: "FULL",
            exchange_tokens: BTreeMap::from([(exchange, vec![token])]),
            interval: &self.settings.interval,
            from_date: from.format("%Y-%m-%d").to_string(),
            to_date: to.format("%Y-%m-%d").to_string(),
        };

        self.throttle();
        debug!(
            "requesting {} candles for {} ({} to {})",
            self.settings.interval, symbol, from, to
        );
        let url = format!("{}{}", self.settings.base_url, CANDLE_PATH);
        let response = self
            .with_headers(self.client.post(&url))
            .bearer_auth(&jwt)
            .json(&body)
            .send()
            .map_err(|e| SignalError::Provider {
                reason: format!("candle request for {} failed: {}", symbol, e),
            })?;

        let status = response.status();
        if status == StatusCode::UNAUTHORIZED {
            *self.session.borrow_mut() = None;
        }
        if status != StatusCode::OK {
            return Err(SignalError::Provider {
                reason: format!("candle request for {} returned HTTP {}", symbol, status),
            });
        }

        let payload: Value = response.json().map_err(|e| SignalError::Provider {
            reason: format!("unreadable candle response for {}: {}", symbol, e),
        })?;
        if payload.get("status").and_then(Value::as_bool) == Some(false) {
            let message = payload
                .get("message")
                .and_then(Value::as_str)
                .unwrap_or("request rejected");
            return Err(SignalError::Provider {
                reason: format!("{}: {}", symbol, message),
            });
        }

        let bars = match payload.get("data") {
            Some(data) => parse_candles(data, exchange, token),
            None => Vec::new(),
        };
        debug!("{}: {} bars", symbol, bars.len());
        Ok(bars)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::adapters::file_config_adapter::FileConfigAdapter;
    use chrono::{TimeZone, Utc};
    use serde_json::json;

    const CREDENTIALS: &str = "[smartapi]\napi_key = key\nclient_id = C123\npassword = 1234\ntotp = 654321\n";

    fn ts(h: u32, m: u32) -> NaiveDateTime {
        NaiveDate::from_ymd_opt(2025, 8, 6)
            .unwrap()
            .and_hms_opt(h, m, 0)
            .unwrap()
    }

    #[test]
    fn settings_defaults() {
        let config = FileConfigAdapter::from_string(CREDENTIALS).unwrap();
        let settings = SmartApiSettings::from_config(&config).unwrap();
        assert_eq!(settings.client_id, "C123");
        assert_eq!(settings.base_url, DEFAULT_BASE_URL);
        assert_eq!(settings.interval, "ONE_MINUTE");
        assert_eq!(settings.exchange, "NSE");
        assert_eq!(settings.request_delay, Duration::from_millis(1000));
        assert_eq!(settings.timeout, Duration::from_secs(30));
    }

    #[test]
    fn settings_missing_credential() {
        let config = FileConfigAdapter::from_string("[smartapi]\napi_key = key\n").unwrap();
        let err = SmartApiSettings::from_config(&config).unwrap_err();
        assert!(matches!(err, SignalError::ConfigMissing { key, .. } if key == "client_id"));
    }

    #[test]
    fn token_map_applies_overrides() {
        let config =
            FileConfigAdapter::from_string("[symbols]\nYATHARTH = 3520\nTCS = 99\n").unwrap();
        let tokens = token_map(&config);
        assert_eq!(tokens.get("YATHARTH").map(String::as_str), Some("3520"));
        assert_eq!(tokens.get("TCS").map(String::as_str), Some("99"));
        assert_eq!(tokens.get("SBIN").map(String::as_str), Some("3045"));
    }

    #[test]
    fn builtin_tokens_are_unique() {
        let mut seen: Vec<&str> = NSE_TOKENS.iter().map(|(_, t)| *t).collect();
        seen.sort();
        seen.dedup();
        assert_eq!(seen.len(), NSE_TOKENS.len());
    }

    #[test]
    fn unknown_symbol_fails_before_login() {
        let config = FileConfigAdapter::from_string(CREDENTIALS).unwrap();
        let adapter = SmartApiAdapter::from_config(&config).unwrap();
        let day = NaiveDate::from_ymd_opt(2025, 8, 6).unwrap();
        let err = adapter.fetch_bars("NOSUCH", day, day).unwrap_err();
        assert!(matches!(err, SignalError::UnknownSymbol { ref symbol } if symbol == "NOSUCH"));
        assert!(!err.is_fatal());
    }

    #[test]
    fn token_lookup_is_case_insensitive() {
        let config = FileConfigAdapter::from_string(CREDENTIALS).unwrap();
        let adapter = SmartApiAdapter::from_config(&config).unwrap();
        assert_eq!(adapter.token_for("infy"), Some("1594"));
    }

    #[test]
    fn login_response_parsing() {
        let ok = json!({"status": true, "data": {"jwtToken": "abc"}});
        assert_eq!(parse_login_response(&ok).unwrap(), "abc");

        let rejected = json!({"status": false, "message": "Invalid totp"});
        let err = parse_login_response(&rejected).unwrap_err();
        assert!(err.is_fatal());
        assert!(matches!(err, SignalError::Auth { reason } if reason == "Invalid totp"));

        let no_token = json!({"status": true, "data": {}});
        assert!(parse_login_response(&no_token).is_err());
    }

    #[test]
    fn epoch_millis_are_ist() {
        let ms = Utc.with_ymd_and_hms(2025, 8, 6, 3, 45, 0).unwrap().timestamp_millis();
        assert_eq!(parse_candle_timestamp(&json!(ms)), Some(ts(9, 15)));
        assert_eq!(parse_candle_timestamp(&json!(ms.to_string())), Some(ts(9, 15)));
    }

    #[test]
    fn rfc3339_keeps_wall_time() {
        let value = json!("2025-08-06T09:15:00+05:30");
        assert_eq!(parse_candle_timestamp(&value), Some(ts(9, 15)));
        assert_eq!(parse_candle_timestamp(&json!(null)), None);
    }

    #[test]
    fn parse_flat_candles() {
        let data = json!([
            ["2025-08-06T09:16:00+05:30", 101.0, 102.0, 100.5, 101.5, 900],
            ["2025-08-06T09:15:00+05:30", "100", "101", "99.5", "100.5", "1200"],
            ["2025-08-06T09:17:00+05:30", 0, 0, 0, 0, 0],
            ["2025-08-06T09:18:00+05:30", 101.0],
            []
        ]);
        let bars = parse_candles(&data, "NSE", "3045");

        assert_eq!(bars.len(), 2);
        assert_eq!(bars[0].timestamp, ts(9, 15));
        assert_eq!(bars[0].close, 100.5);
        assert_eq!(bars[0].volume, 1200);
        assert_eq!(bars[1].timestamp, ts(9, 16));
    }

    #[test]
    fn parse_nested_candles() {
        let data = json!({"NSE": {"3045": [
            ["2025-08-06T09:15:00+05:30", 800.0, 801.0, 799.0, 800.5, 10]
        ]}});
        assert_eq!(parse_candles(&data, "NSE", "3045").len(), 1);
        assert!(parse_candles(&data, "NSE", "1594").is_empty());
        assert!(parse_candles(&json!(null), "NSE", "3045").is_empty());
    }

    mod http {
        use super::*;
        use std::io::{BufRead, BufReader, Read, Write};
        use std::net::TcpListener;
        use std::sync::{Arc, Mutex};

        const DELAY_MS: u64 = 60;

        #[derive(Debug, Clone)]
        struct Recorded {
            path: String,
            authorization: Option<String>,
        }

        /// Serves `responses` in order, one connection each, and records
        /// every request it reads.
        fn serve(responses: Vec<(u16, String)>) -> (String, Arc<Mutex<Vec<Recorded>>>) {
            let listener = TcpListener::bind("127.0.0.1:0").unwrap();
            let base_url = format!("http://{}", listener.local_addr().unwrap());
            let recorded = Arc::new(Mutex::new(Vec::new()));
            let log = Arc::clone(&recorded);

            thread::spawn(move || {
                for (code, body) in responses {
                    let (stream, _) = listener.accept().unwrap();
                    let mut reader = BufReader::new(stream.try_clone().unwrap());

                    let mut request_line = String::new();
                    reader.read_line(&mut request_line).unwrap();
                    let path = request_line
                        .split_whitespace()
                        .nth(1)
                        .unwrap_or_default()
                        .to_string();

                    let mut content_length = 0usize;
                    let mut authorization = None;
                    loop {
                        let mut line = String::new();
                        reader.read_line(&mut line).unwrap();
                        let line = line.trim_end();
                        if line.is_empty() {
                            break;
                        }
                        if let Some((name, value)) = line.split_once(':') {
                            let name = name.trim().to_lowercase();
                            if name == "content-length" {
                                content_length = value.trim().parse().unwrap();
                            } else if name == "authorization" {
                                authorization = Some(value.trim().to_string());
                            }
                        }
                    }
                    let mut request_body = vec![0u8; content_length];
                    reader.read_exact(&mut request_body).unwrap();

                    log.lock().unwrap().push(Recorded {
                        path,
                        authorization,
                    });

                    let reason = if code == 200 { "OK" } else { "Unauthorized" };
                    let mut stream = stream;
                    write!(
                        stream,
                        "HTTP/1.1 {} {}\r\nContent-Type: application/json\r\nContent-Length: {}\r\nConnection: close\r\n\r\n{}",
                        code,
                        reason,
                        body.len(),
                        body
                    )
                    .unwrap();
                    stream.flush().unwrap();
                }
            });

            (base_url, recorded)
        }

        fn login_ok(jwt: &str) -> (u16, String) {
            (
                200,
                json!({"status": true, "data": {"jwtToken": jwt}}).to_string(),
            )
        }

        fn candles_ok() -> (u16, String) {
            (
                200,
                json!({"status": true, "data": [
                    ["2025-08-06T10:15:00+05:30", 100.0, 101.0, 99.0, 100.5, 1000]
                ]})
                .to_string(),
            )
        }

        fn adapter(base_url: &str) -> SmartApiAdapter {
            let ini = format!(
                "{}base_url = {}\nrequest_delay_ms = {}\ntimeout_secs = 5\n",
                CREDENTIALS, base_url, DELAY_MS
            );
            let config = FileConfigAdapter::from_string(&ini).unwrap();
            SmartApiAdapter::from_config(&config).unwrap()
        }

        fn day() -> NaiveDate {
            NaiveDate::from_ymd_opt(2025, 8, 6).unwrap()
        }

        #[test]
        fn logs_in_once_and_spaces_requests() {
            let (base_url, recorded) =
                serve(vec![login_ok("jwt-1"), candles_ok(), candles_ok(), candles_ok()]);
            let adapter = adapter(&base_url);

            let started = Instant::now();
            for symbol in ["SBIN", "TCS", "sbin"] {
                let bars = adapter.fetch_bars(symbol, day(), day()).unwrap();
                assert_eq!(bars.len(), 1);
                assert_eq!(bars[0].timestamp, ts(10, 15));
            }
            let elapsed = started.elapsed();

            let recorded = recorded.lock().unwrap();
            let paths: Vec<&str> = recorded.iter().map(|r| r.path.as_str()).collect();
            assert_eq!(paths, vec![LOGIN_PATH, CANDLE_PATH, CANDLE_PATH, CANDLE_PATH]);
            for candle in &recorded[1..] {
                assert_eq!(candle.authorization.as_deref(), Some("Bearer jwt-1"));
            }
            // Four requests leave three enforced gaps.
            assert!(elapsed >= Duration::from_millis(3 * DELAY_MS), "{elapsed:?}");
        }

        #[test]
        fn unauthorized_candle_response_forces_new_login() {
            let (base_url, recorded) = serve(vec![
                login_ok("jwt-1"),
                (401, json!({"status": false, "message": "expired"}).to_string()),
                login_ok("jwt-2"),
                candles_ok(),
            ]);
            let adapter = adapter(&base_url);

            let err = adapter.fetch_bars("SBIN", day(), day()).unwrap_err();
            assert!(matches!(err, SignalError::Provider { .. }));
            assert!(!err.is_fatal());
            assert!(adapter.session.borrow().is_none());

            let bars = adapter.fetch_bars("SBIN", day(), day()).unwrap();
            assert_eq!(bars.len(), 1);
            assert_eq!(adapter.session.borrow().as_deref(), Some("jwt-2"));

            let recorded = recorded.lock().unwrap();
            let paths: Vec<&str> = recorded.iter().map(|r| r.path.as_str()).collect();
            assert_eq!(paths, vec![LOGIN_PATH, CANDLE_PATH, LOGIN_PATH, CANDLE_PATH]);
            assert_eq!(recorded[3].authorization.as_deref(), Some("Bearer jwt-2"));
        }
    }
}
