//! End-to-end tests: a real gateway on a loopback socket driven by an HTTP client.
//! These cover the wire contract: status codes, envelopes, cookies and compression.

use std::sync::Arc;

use anyhow::Result;
use argon2::Params;
use reqwest::header::{ACCEPT_ENCODING, CONTENT_ENCODING, CONTENT_TYPE, COOKIE, SET_COOKIE};
use reqwest::StatusCode;
use serde_json::{json, Value};

use jsongate::identity::{AuthLevel, CredentialVerifier};
use jsongate::rpc::{Export, Handler, RpcObject};
use jsongate::{Gateway, GatewayConfig};

const SECRET: &str = "letmein";

struct Faulty;

impl RpcObject for Faulty {
    fn exports(self: Arc<Self>) -> Vec<Export> {
        vec![Export::new("explode", Handler::sync(|_, _| panic!("faulty handler"))).level(AuthLevel::None)]
    }
}

// Cheap Argon2 cost so tests stay fast.
fn verifier() -> Result<CredentialVerifier> {
    let v = CredentialVerifier::with_params(Params::new(8, 1, 1, None).expect("argon2 params"));
    v.rotate(SECRET)?;
    Ok(v)
}

async fn start(config: GatewayConfig) -> Result<(Gateway, String)> {
    let gateway = Gateway::with_verifier(config, verifier()?)?;
    gateway.register_object(Arc::new(Faulty), None)?;
    let listener = tokio::net::TcpListener::bind("127.0.0.1:0").await?;
    let addr = listener.local_addr()?;
    let app = gateway.router();
    tokio::spawn(async move {
        let _ = axum::serve(listener, app).await;
    });
    let url = format!("http://{}{}", addr, gateway.config().rpc_path);
    Ok((gateway, url))
}

fn call(method: &str, params: Value, id: Value) -> Value {
    json!({"method": method, "params": params, "id": id})
}

/// `name=value` pair from a `Set-Cookie` header, ready to send back as `Cookie`.
fn cookie_pair(set_cookie: &str) -> String {
    set_cookie.split(';').next().unwrap_or_default().trim().to_string()
}

#[tokio::test]
async fn login_session_lifecycle_with_cookie_store() -> Result<()> {
    let (gateway, url) = start(GatewayConfig::default()).await?;
    let client = reqwest::Client::builder().cookie_store(true).build()?;

    let resp = client.post(&url).json(&call("auth.login", json!([SECRET]), json!(1))).send().await?;
    assert_eq!(resp.status(), StatusCode::OK);
    assert_eq!(resp.headers().get(CONTENT_TYPE).unwrap(), "application/x-json");
    let set_cookie = resp.headers().get(SET_COOKIE).expect("session cookie").to_str()?.to_string();
    assert!(set_cookie.starts_with("_session_id="));
    assert!(set_cookie.contains("Path=/json"));
    assert!(set_cookie.contains("HttpOnly"));
    assert_eq!(resp.json::<Value>().await?, json!({"id": 1, "result": true, "error": null}));
    assert_eq!(gateway.gate().sessions().len(), 1);

    let body: Value = client.post(&url).json(&call("auth.check_session", json!([]), json!(2))).send().await?.json().await?;
    assert_eq!(body["result"], json!(true));

    let body: Value = client.post(&url).json(&call("events.add_listener", json!(["ping"]), json!(3))).send().await?.json().await?;
    assert_eq!(body, json!({"id": 3, "result": null, "error": null}));
    assert_eq!(gateway.events().fire_event("ping", vec![json!(42)]), 1);
    let body: Value = client.post(&url).json(&call("events.get_events", json!([]), json!(4))).send().await?.json().await?;
    assert_eq!(body["result"], json!([["ping", [42]]]));

    let resp = client.post(&url).json(&call("auth.delete_session", json!([]), json!(5))).send().await?;
    assert!(resp.headers().get(SET_COOKIE).unwrap().to_str()?.contains("1970"));
    assert_eq!(resp.json::<Value>().await?["result"], json!(true));
    assert!(gateway.gate().sessions().is_empty());

    let body: Value = client.post(&url).json(&call("auth.check_session", json!([]), json!(6))).send().await?.json().await?;
    assert_eq!(body["result"], json!(false));
    Ok(())
}

#[tokio::test]
async fn wrong_password_gets_false_and_no_cookie() -> Result<()> {
    let (_gateway, url) = start(GatewayConfig::default()).await?;
    let resp = reqwest::Client::new().post(&url).json(&call("auth.login", json!(["guess"]), json!(1))).send().await?;
    assert!(resp.headers().get(SET_COOKIE).is_none());
    assert_eq!(resp.json::<Value>().await?["result"], json!(false));
    Ok(())
}

#[tokio::test]
async fn read_only_session_is_refused_admin_method() -> Result<()> {
    let (gateway, url) = start(GatewayConfig::default()).await?;
    let viewer = gateway.gate().sessions().create("viewer", AuthLevel::ReadOnly, std::time::Duration::from_secs(60))?;
    let cookie = format!("_session_id={}", jsongate::identity::cookie::encode_session_cookie(&viewer.id));

    let resp = reqwest::Client::new()
        .post(&url)
        .header(COOKIE, &cookie)
        .json(&call("auth.change_password", json!([SECRET, "other"]), json!(11)))
        .send()
        .await?;
    assert_eq!(resp.status(), StatusCode::OK);
    let refreshed = resp.headers().get(SET_COOKIE).expect("refreshed cookie").to_str()?.to_string();
    assert!(refreshed.starts_with(&cookie));
    assert_eq!(
        resp.json::<Value>().await?,
        json!({"id": 11, "result": null, "error": {"code": 1, "message": "Not authenticated"}})
    );
    Ok(())
}

#[tokio::test]
async fn manual_cookie_round_trip_refreshes_expiry() -> Result<()> {
    let (_gateway, url) = start(GatewayConfig::default()).await?;
    let client = reqwest::Client::new();
    let resp = client.post(&url).json(&call("auth.login", json!([SECRET]), json!(1))).send().await?;
    let pair = cookie_pair(resp.headers().get(SET_COOKIE).unwrap().to_str()?);

    let resp = client.post(&url).header(COOKIE, &pair).json(&call("auth.check_session", json!([]), json!(2))).send().await?;
    let refreshed = cookie_pair(resp.headers().get(SET_COOKIE).expect("refreshed cookie").to_str()?);
    assert_eq!(refreshed, pair);
    assert_eq!(resp.json::<Value>().await?["result"], json!(true));
    Ok(())
}

#[tokio::test]
async fn unknown_method_reports_code_two() -> Result<()> {
    let (_gateway, url) = start(GatewayConfig::default()).await?;
    let resp = reqwest::Client::new().post(&url).json(&call("nonexistent.op", json!([]), json!(7))).send().await?;
    assert_eq!(resp.status(), StatusCode::OK);
    assert_eq!(
        resp.json::<Value>().await?,
        json!({"id": 7, "result": null, "error": {"code": 2, "message": "Unknown method"}})
    );
    Ok(())
}

#[tokio::test]
async fn list_methods_is_public() -> Result<()> {
    let (_gateway, url) = start(GatewayConfig::default()).await?;
    let resp = reqwest::Client::new().post(&url).json(&call("system.listMethods", json!([]), json!("m"))).send().await?;
    assert!(resp.headers().get(SET_COOKIE).is_none());
    let body: Value = resp.json().await?;
    let names: Vec<String> = serde_json::from_value(body["result"].clone())?;
    assert!(names.contains(&"auth.login".to_string()));
    assert!(names.contains(&"faulty.explode".to_string()));
    assert!(names.contains(&"system.listMethods".to_string()));
    Ok(())
}

#[tokio::test]
async fn non_post_is_405_without_body() -> Result<()> {
    let (_gateway, url) = start(GatewayConfig::default()).await?;
    let client = reqwest::Client::new();
    let resp = client.get(&url).send().await?;
    assert_eq!(resp.status(), StatusCode::METHOD_NOT_ALLOWED);
    assert!(resp.bytes().await?.is_empty());
    let resp = client.put(&url).body("{}").send().await?;
    assert_eq!(resp.status(), StatusCode::METHOD_NOT_ALLOWED);
    Ok(())
}

#[tokio::test]
async fn malformed_body_is_400_without_envelope() -> Result<()> {
    let (_gateway, url) = start(GatewayConfig::default()).await?;
    let client = reqwest::Client::new();
    for body in ["{oops", r#"{"method":"auth.login","params":["x"]}"#, r#"{"method":"auth.login","params":"x","id":1}"#] {
        let resp = client.post(&url).body(body).send().await?;
        assert_eq!(resp.status(), StatusCode::BAD_REQUEST, "{}", body);
        assert!(resp.bytes().await?.is_empty());
    }
    Ok(())
}

#[tokio::test]
async fn handler_panic_is_500_and_server_survives() -> Result<()> {
    let (_gateway, url) = start(GatewayConfig::default()).await?;
    let client = reqwest::Client::new();
    let resp = client.post(&url).json(&call("faulty.explode", json!([]), json!(1))).send().await?;
    assert_eq!(resp.status(), StatusCode::INTERNAL_SERVER_ERROR);
    assert!(resp.bytes().await?.is_empty());

    let resp = client.post(&url).json(&call("auth.check_session", json!([]), json!(2))).send().await?;
    assert_eq!(resp.status(), StatusCode::OK);
    Ok(())
}

#[tokio::test]
async fn responses_are_gzipped_when_accepted() -> Result<()> {
    let (_gateway, url) = start(GatewayConfig::default()).await?;
    let resp = reqwest::Client::new()
        .post(&url)
        .header(ACCEPT_ENCODING, "gzip")
        .json(&call("system.listMethods", json!([]), json!(1)))
        .send()
        .await?;
    assert_eq!(resp.status(), StatusCode::OK);
    assert_eq!(resp.headers().get(CONTENT_ENCODING).map(|v| v.as_bytes()), Some(&b"gzip"[..]));
    Ok(())
}

#[tokio::test]
async fn custom_rpc_path_and_health_check() -> Result<()> {
    let config = GatewayConfig { rpc_path: "/rpc".into(), ..GatewayConfig::default() };
    let (_gateway, url) = start(config).await?;
    assert!(url.ends_with("/rpc"));
    let client = reqwest::Client::new();

    let health = client.get(url.trim_end_matches("/rpc")).send().await?;
    assert_eq!(health.status(), StatusCode::OK);
    assert_eq!(health.text().await?, "jsongate ok");

    let resp = client.post(&url).json(&call("auth.login", json!([SECRET]), json!(1))).send().await?;
    assert!(resp.headers().get(SET_COOKIE).unwrap().to_str()?.contains("Path=/rpc"));
    Ok(())
}
