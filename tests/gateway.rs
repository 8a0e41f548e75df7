//! End-to-end behavior of routing, middleware and the fixed endpoints.

use reqwest::StatusCode;
use serde_json::{json, Value};
use std::time::Duration;

use api_gateway::load_balancer::StrategyKind;
use api_gateway::security::RateLimitAlgorithm;

mod common;

#[tokio::test]
async fn test_forwarding_strips_prefix_and_sets_headers() {
    let users = common::start_mock_backend("users").await;

    let mut config = common::base_config();
    config.routes.push(common::route("users", "/api/users", vec![users.config()]));
    let gw = common::start_gateway(config).await;

    let res = gw
        .client
        .get(gw.url("/api/users/42?expand=true"))
        .send()
        .await
        .unwrap();
    assert_eq!(res.status(), StatusCode::OK);
    assert_eq!(res.headers()["x-gateway"], "api-gateway");
    assert_eq!(res.headers()["x-backend"], users.url().as_str());
    assert!(res.headers().contains_key("x-request-id"));
    assert_eq!(res.headers()["x-frame-options"], "DENY");
    assert_eq!(res.headers()["x-content-type-options"], "nosniff");

    let body: Value = res.json().await.unwrap();
    assert_eq!(body["backend"], "users");
    assert_eq!(body["path"], "/42");
    assert_eq!(body["query"], "expand=true");
    assert_eq!(body["host"], users.addr.to_string().as_str());
    assert_eq!(body["x_forwarded_for"], "127.0.0.1");
    assert_eq!(body["x_forwarded_proto"], "http");
    assert!(body["x_gateway_request_id"].is_string());
}

#[tokio::test]
async fn test_forwarded_for_is_appended() {
    let b1 = common::start_mock_backend("b1").await;

    let mut config = common::base_config();
    config.routes.push(common::route("api", "/api", vec![b1.config()]));
    let gw = common::start_gateway(config).await;

    let res = gw
        .client
        .get(gw.url("/api"))
        .header("x-forwarded-for", "203.0.113.7")
        .send()
        .await
        .unwrap();
    let body: Value = res.json().await.unwrap();
    assert_eq!(body["path"], "/");
    assert_eq!(body["x_forwarded_for"], "203.0.113.7, 127.0.0.1");
}

#[tokio::test]
async fn test_unknown_path_returns_404() {
    let b1 = common::start_mock_backend("b1").await;

    let mut config = common::base_config();
    config.routes.push(common::route("api", "/api", vec![b1.config()]));
    let gw = common::start_gateway(config).await;

    let res = gw.client.get(gw.url("/nowhere")).send().await.unwrap();
    assert_eq!(res.status(), StatusCode::NOT_FOUND);
    let body: Value = res.json().await.unwrap();
    assert_eq!(body["error"], "route_not_found");

    // Prefixes only match on segment boundaries.
    let res = gw.client.get(gw.url("/apis")).send().await.unwrap();
    assert_eq!(res.status(), StatusCode::NOT_FOUND);
    assert_eq!(b1.hits(), 0);
}

#[tokio::test]
async fn test_method_mismatch_returns_404() {
    let b1 = common::start_mock_backend("b1").await;

    let mut config = common::base_config();
    let mut route = common::route("reports", "/reports", vec![b1.config()]);
    route.method = "GET".to_string();
    config.routes.push(route);
    let gw = common::start_gateway(config).await;

    let res = gw.client.delete(gw.url("/reports/1")).send().await.unwrap();
    assert_eq!(res.status(), StatusCode::NOT_FOUND);
    let res = gw.client.get(gw.url("/reports/1")).send().await.unwrap();
    assert_eq!(res.status(), StatusCode::OK);
}

#[tokio::test]
async fn test_longest_prefix_wins() {
    let general = common::start_mock_backend("general").await;
    let special = common::start_mock_backend("special").await;

    let mut config = common::base_config();
    config.routes.push(common::route("api", "/api", vec![general.config()]));
    config.routes.push(common::route("orders", "/api/orders", vec![special.config()]));
    let gw = common::start_gateway(config).await;

    let body: Value = gw
        .client
        .get(gw.url("/api/orders/7"))
        .send()
        .await
        .unwrap()
        .json()
        .await
        .unwrap();
    assert_eq!(body["backend"], "special");
    assert_eq!(body["path"], "/7");

    let body: Value = gw
        .client
        .get(gw.url("/api/users"))
        .send()
        .await
        .unwrap()
        .json()
        .await
        .unwrap();
    assert_eq!(body["backend"], "general");
    assert_eq!(body["path"], "/users");
}

#[tokio::test]
async fn test_weighted_distribution() {
    let heavy = common::start_mock_backend("heavy").await;
    let light = common::start_mock_backend("light").await;

    let mut config = common::base_config();
    let mut route = common::route(
        "weighted",
        "/w",
        vec![heavy.config().with_weight(3), light.config().with_weight(1)],
    );
    route.load_balancer = StrategyKind::WeightedRoundRobin;
    config.routes.push(route);
    let gw = common::start_gateway(config).await;

    for _ in 0..8 {
        let res = gw.client.get(gw.url("/w")).send().await.unwrap();
        assert_eq!(res.status(), StatusCode::OK);
    }
    assert_eq!(heavy.hits(), 6);
    assert_eq!(light.hits(), 2);
}

#[tokio::test]
async fn test_ip_hash_is_sticky() {
    let b1 = common::start_mock_backend("b1").await;
    let b2 = common::start_mock_backend("b2").await;
    let b3 = common::start_mock_backend("b3").await;

    let mut config = common::base_config();
    let mut route = common::route("sticky", "/s", vec![b1.config(), b2.config(), b3.config()]);
    route.load_balancer = StrategyKind::IpHash;
    config.routes.push(route);
    let gw = common::start_gateway(config).await;

    let mut seen = Vec::new();
    for _ in 0..6 {
        let body: Value = gw
            .client
            .get(gw.url("/s"))
            .header("x-forwarded-for", "198.51.100.23")
            .send()
            .await
            .unwrap()
            .json()
            .await
            .unwrap();
        seen.push(body["backend"].as_str().unwrap().to_string());
    }
    assert!(seen.windows(2).all(|w| w[0] == w[1]), "got {seen:?}");
}

#[tokio::test]
async fn test_auth_required_route() {
    let secure = common::start_mock_backend("secure").await;

    let mut config = common::base_config();
    let mut route = common::route("secure", "/secure", vec![secure.config()]);
    route.auth_required = true;
    config.routes.push(route);
    let gw = common::start_gateway(config).await;

    let res = gw.client.get(gw.url("/secure/data")).send().await.unwrap();
    assert_eq!(res.status(), StatusCode::UNAUTHORIZED);
    assert_eq!(res.headers()["www-authenticate"], "Bearer");
    assert_eq!(secure.hits(), 0);

    let res = gw
        .client
        .get(gw.url("/secure/data"))
        .bearer_auth("not-a-real-token")
        .send()
        .await
        .unwrap();
    assert_eq!(res.status(), StatusCode::UNAUTHORIZED);

    let token = gw.login("user", "password123").await;
    let res = gw
        .client
        .get(gw.url("/secure/data"))
        .bearer_auth(&token)
        .send()
        .await
        .unwrap();
    assert_eq!(res.status(), StatusCode::OK);
    assert_eq!(secure.hits(), 1);

    let res = gw
        .client
        .post(gw.url("/auth/logout"))
        .bearer_auth(&token)
        .send()
        .await
        .unwrap();
    assert_eq!(res.status(), StatusCode::OK);

    let res = gw
        .client
        .get(gw.url("/secure/data"))
        .bearer_auth(&token)
        .send()
        .await
        .unwrap();
    assert_eq!(res.status(), StatusCode::UNAUTHORIZED);
}

#[tokio::test]
async fn test_login_and_refresh() {
    let gw = common::start_gateway(common::base_config()).await;

    let res = gw
        .client
        .post(gw.url("/auth/login"))
        .json(&json!({ "username": "admin", "password": "wrong" }))
        .send()
        .await
        .unwrap();
    assert_eq!(res.status(), StatusCode::UNAUTHORIZED);

    let res = gw
        .client
        .post(gw.url("/auth/login"))
        .body("not json")
        .send()
        .await
        .unwrap();
    assert_eq!(res.status(), StatusCode::BAD_REQUEST);

    let pair: Value = gw
        .client
        .post(gw.url("/auth/login"))
        .json(&json!({ "username": "admin", "password": "password123" }))
        .send()
        .await
        .unwrap()
        .json()
        .await
        .unwrap();
    assert_eq!(pair["token_type"], "Bearer");
    assert_eq!(pair["user"]["username"], "admin");

    let res = gw
        .client
        .post(gw.url("/auth/refresh"))
        .json(&json!({ "refresh_token": pair["refresh_token"].clone() }))
        .send()
        .await
        .unwrap();
    assert_eq!(res.status(), StatusCode::OK);
    let refreshed: Value = res.json().await.unwrap();
    assert_ne!(refreshed["access_token"], pair["access_token"]);
}

#[tokio::test]
async fn test_rate_limit_rejects_excess_requests() {
    let b1 = common::start_mock_backend("b1").await;

    let mut config = common::base_config();
    config.rate_limit.algorithm = RateLimitAlgorithm::FixedWindow;
    config.rate_limit.window_secs = 60;
    let mut route = common::route("limited", "/limited", vec![b1.config()]);
    route.rate_limit = 2;
    config.routes.push(route);
    let gw = common::start_gateway(config).await;

    for _ in 0..2 {
        let res = gw.client.get(gw.url("/limited")).send().await.unwrap();
        assert_eq!(res.status(), StatusCode::OK);
    }

    let res = gw.client.get(gw.url("/limited")).send().await.unwrap();
    assert_eq!(res.status(), StatusCode::TOO_MANY_REQUESTS);
    assert_eq!(res.headers()["x-ratelimit-limit"], "2");
    assert_eq!(res.headers()["x-ratelimit-remaining"], "0");
    assert!(res.headers().contains_key("retry-after"));
    let body: Value = res.json().await.unwrap();
    assert_eq!(body["error"], "rate_limit_exceeded");
    assert_eq!(b1.hits(), 2);
}

#[tokio::test]
async fn test_cache_serves_hits_until_ttl() {
    let b1 = common::start_mock_backend("b1").await;

    let mut config = common::base_config();
    let mut route = common::route("cached", "/cached", vec![b1.config()]);
    route.cache_enabled = true;
    route.cache_ttl_secs = 1;
    config.routes.push(route);
    let gw = common::start_gateway(config).await;

    let first = gw.client.get(gw.url("/cached/item")).send().await.unwrap();
    assert_eq!(first.headers()["x-cache"], "MISS");
    let first_body = first.text().await.unwrap();

    let second = gw.client.get(gw.url("/cached/item")).send().await.unwrap();
    assert_eq!(second.status(), StatusCode::OK);
    assert_eq!(second.headers()["x-cache"], "HIT");
    assert_eq!(second.headers()["content-type"], "application/json");
    assert_eq!(second.text().await.unwrap(), first_body);
    assert_eq!(b1.hits(), 1);

    // A different query is a different entry.
    let other = gw.client.get(gw.url("/cached/item?v=2")).send().await.unwrap();
    assert_eq!(other.headers()["x-cache"], "MISS");
    assert_eq!(b1.hits(), 2);

    // POST bypasses the cache.
    let post = gw.client.post(gw.url("/cached/item")).send().await.unwrap();
    assert!(post.headers().get("x-cache").is_none());
    assert_eq!(b1.hits(), 3);

    tokio::time::sleep(Duration::from_millis(1200)).await;
    let expired = gw.client.get(gw.url("/cached/item")).send().await.unwrap();
    assert_eq!(expired.headers()["x-cache"], "MISS");
    assert_eq!(b1.hits(), 4);
}

#[tokio::test]
async fn test_cache_with_compression_replays_plain_body() {
    let b1 = common::start_mock_backend("b1").await;

    let mut config = common::base_config();
    let mut route = common::route("packed", "/packed", vec![b1.config()]);
    route.cache_enabled = true;
    route.middleware = vec!["compression".to_string()];
    config.routes.push(route);
    let gw = common::start_gateway(config).await;

    let first = gw
        .client
        .get(gw.url("/packed/doc"))
        .header("accept-encoding", "gzip")
        .send()
        .await
        .unwrap();
    assert_eq!(first.status(), StatusCode::OK);
    assert_eq!(first.headers()["x-cache"], "MISS");
    assert_eq!(first.headers()["content-encoding"], "gzip");

    // A client that never asked for gzip gets readable JSON from the cache.
    let second = gw.client.get(gw.url("/packed/doc")).send().await.unwrap();
    assert_eq!(second.status(), StatusCode::OK);
    assert_eq!(second.headers()["x-cache"], "HIT");
    assert!(second.headers().get("content-encoding").is_none());
    let body: Value = second.json().await.unwrap();
    assert_eq!(body["backend"], "b1");
    assert_eq!(body["path"], "/doc");
    assert_eq!(b1.hits(), 1);

    // Hits are still compressed for clients that accept it.
    let third = gw
        .client
        .get(gw.url("/packed/doc"))
        .header("accept-encoding", "gzip")
        .send()
        .await
        .unwrap();
    assert_eq!(third.headers()["x-cache"], "HIT");
    assert_eq!(third.headers()["content-encoding"], "gzip");
    assert_eq!(b1.hits(), 1);
}

#[tokio::test]
async fn test_admin_flow() {
    let b1 = common::start_mock_backend("b1").await;
    let b2 = common::start_mock_backend("b2").await;

    let mut config = common::base_config();
    config.routes.push(common::route("web", "/web", vec![b1.config(), b2.config()]));
    let gw = common::start_gateway(config).await;

    let res = gw.client.get(gw.url("/admin/status")).send().await.unwrap();
    assert_eq!(res.status(), StatusCode::UNAUTHORIZED);

    let admin = gw.login("admin", "password123").await;
    let user = gw.login("user", "password123").await;

    let status: Value = gw
        .client
        .get(gw.url("/admin/status"))
        .bearer_auth(&admin)
        .send()
        .await
        .unwrap()
        .json()
        .await
        .unwrap();
    assert_eq!(status["status"], "operational");
    assert_eq!(status["load_balancers"]["web"]["strategy"], "round_robin");
    assert_eq!(status["load_balancers"]["web"]["healthy"], 2);

    let backends: Value = gw
        .client
        .get(gw.url("/admin/backends"))
        .bearer_auth(&user)
        .send()
        .await
        .unwrap()
        .json()
        .await
        .unwrap();
    assert_eq!(backends["web"].as_array().unwrap().len(), 2);
    assert_eq!(backends["web"][0]["url"], b1.url().as_str());

    let set_b2_down = json!({ "backend": b2.url(), "healthy": false });

    let res = gw
        .client
        .post(gw.url("/admin/backends/health"))
        .bearer_auth(&user)
        .json(&set_b2_down)
        .send()
        .await
        .unwrap();
    assert_eq!(res.status(), StatusCode::FORBIDDEN);

    let res = gw
        .client
        .post(gw.url("/admin/backends/health"))
        .bearer_auth(&admin)
        .json(&json!({ "backend": "http://10.255.255.1:1", "healthy": false }))
        .send()
        .await
        .unwrap();
    assert_eq!(res.status(), StatusCode::NOT_FOUND);

    let res = gw
        .client
        .post(gw.url("/admin/backends/health"))
        .bearer_auth(&admin)
        .json(&set_b2_down)
        .send()
        .await
        .unwrap();
    assert_eq!(res.status(), StatusCode::OK);
    let body: Value = res.json().await.unwrap();
    assert_eq!(body["updated_pools"], 1);

    for _ in 0..4 {
        gw.client.get(gw.url("/web")).send().await.unwrap();
    }
    assert_eq!(b1.hits(), 4);
    assert_eq!(b2.hits(), 0);
}

#[tokio::test]
async fn test_health_endpoints() {
    let gw = common::start_gateway(common::base_config()).await;

    let res = gw.client.get(gw.url("/health")).send().await.unwrap();
    assert_eq!(res.status(), StatusCode::OK);
    let body: Value = res.json().await.unwrap();
    assert_eq!(body["status"], "healthy");
    assert!(body["timestamp"].is_string());

    let res = gw.client.get(gw.url("/health/detailed")).send().await.unwrap();
    assert_eq!(res.status(), StatusCode::OK);
    let body: Value = res.json().await.unwrap();
    assert_eq!(body["system"]["status"], "healthy");
    assert_eq!(body["system"]["checks"]["store"]["status"], "healthy");
}

#[tokio::test]
async fn test_cors_preflight() {
    let b1 = common::start_mock_backend("b1").await;

    let mut config = common::base_config();
    config.routes.push(common::route("api", "/api", vec![b1.config()]));
    let gw = common::start_gateway(config).await;

    let res = gw
        .client
        .request(reqwest::Method::OPTIONS, gw.url("/api/items"))
        .header("origin", "https://app.example.com")
        .header("access-control-request-method", "POST")
        .send()
        .await
        .unwrap();
    assert_eq!(res.status(), StatusCode::NO_CONTENT);
    assert_eq!(res.headers()["access-control-allow-origin"], "*");
    assert!(res.headers().contains_key("access-control-allow-methods"));
    assert_eq!(b1.hits(), 0);
}
