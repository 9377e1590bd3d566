use std::str::FromStr;

use axum::{
    Router,
    body::{Body, to_bytes},
    http::{Request, StatusCode},
    response::Response,
};
use http_body_util::BodyExt;
use rust_decimal::Decimal;
use rust_decimal_macros::dec;
use uuid::Uuid;

use exchange_core::{api::router, state::AppState};
use serde_json::{Value, json};
use tempfile::tempdir;
use tower::ServiceExt;
use urlencoding::encode;

fn test_app() -> (Router, AppState, tempfile::TempDir) {
    let dir = tempdir().unwrap();
    let state = AppState::new(dir.path()).unwrap();
    (router(state.clone()), state, dir)
}

async fn body_json(res: Response) -> Value {
    let bytes = res.into_body().collect().await.unwrap().to_bytes();
    serde_json::from_slice(&bytes).unwrap()
}

async fn json<T: serde::de::DeserializeOwned>(res: Response) -> T {
    let bytes = to_bytes(res.into_body(), usize::MAX).await.unwrap();
    serde_json::from_slice(&bytes).unwrap()
}

fn post_json(uri: &str, body: &Value) -> Request<Body> {
    Request::builder()
        .method("POST")
        .uri(uri)
        .header("content-type", "application/json")
        .body(Body::from(body.to_string()))
        .unwrap()
}

fn post_empty(uri: &str) -> Request<Body> {
    Request::builder()
        .method("POST")
        .uri(uri)
        .body(Body::empty())
        .unwrap()
}

fn get(uri: &str) -> Request<Body> {
    Request::builder().uri(uri).body(Body::empty()).unwrap()
}

fn order_body(side: &str, price: Decimal, quantity: Decimal) -> Value {
    json!({
        "user_id": Uuid::new_v4(),
        "pair": "BTC-USDT",
        "side": side,
        "price": price,
        "quantity": quantity,
    })
}

fn decimal(v: &Value) -> Decimal {
    Decimal::from_str(v.as_str().unwrap()).unwrap()
}

#[tokio::test]
async fn test_effective_limit_on_get_trades() {
    let (app, _state, _tmp) = test_app();
    let res = app
        .oneshot(get("/trades/BTC-USDT?limit=5000"))
        .await
        .unwrap();

    assert_eq!(res.status(), StatusCode::OK);
    assert_eq!(res.headers().get("x-effective-limit").unwrap(), "1000");
}

#[tokio::test]
async fn pairguard_rejects_bad_pair_on_book() {
    let (app, _state, _tmp) = test_app();

    let res = app.oneshot(get("/book/BTC-EUR")).await.unwrap();

    assert_eq!(res.status(), StatusCode::BAD_REQUEST);
    let v = body_json(res).await;
    assert!(
        v["error"]
            .as_str()
            .unwrap()
            .to_lowercase()
            .contains("unsupported")
    );
}

#[tokio::test]
async fn pairguard_rejects_bad_pair_on_trades_and_match() {
    let (app, _state, _tmp) = test_app();

    let res = app.clone().oneshot(get("/trades/FOO-BAR")).await.unwrap();
    assert_eq!(res.status(), StatusCode::BAD_REQUEST);

    let res = app.oneshot(post_empty("/match/FOO-BAR")).await.unwrap();
    assert_eq!(res.status(), StatusCode::BAD_REQUEST);
}

#[tokio::test]
async fn create_order_rejects_zero_qty() {
    let (app, _state, _tmp) = test_app();

    let res = app
        .oneshot(post_json("/orders", &order_body("Buy", dec!(50), dec!(0))))
        .await
        .unwrap();

    assert_eq!(res.status(), StatusCode::BAD_REQUEST);
    let v = body_json(res).await;
    assert_eq!(v["error"], "quantity must be > 0");
}

#[tokio::test]
async fn create_order_rejects_negative_price() {
    let (app, _state, _tmp) = test_app();

    let res = app
        .oneshot(post_json("/orders", &order_body("Buy", dec!(-1), dec!(1))))
        .await
        .unwrap();

    assert_eq!(res.status(), StatusCode::BAD_REQUEST);
    let v = body_json(res).await;
    assert_eq!(v["error"], "price must be > 0");
}

#[tokio::test]
async fn create_order_rejects_too_precise_price() {
    let (app, _state, _tmp) = test_app();

    let res = app
        .oneshot(post_json(
            "/orders",
            &order_body("Buy", dec!(1.123456789), dec!(1)),
        ))
        .await
        .unwrap();

    assert_eq!(res.status(), StatusCode::BAD_REQUEST);
    let v = body_json(res).await;
    assert!(v["error"].as_str().unwrap().contains("decimal places"));
}

#[tokio::test]
async fn create_order_invalid_symbol_yields_422_from_loggedjson() {
    let (app, _state, _tmp) = test_app();

    let body = json!({
        "user_id": Uuid::new_v4(),
        "pair": "BTC-LOL",
        "side": "Buy",
        "price": 50,
        "quantity": 1,
    });

    let res = app.oneshot(post_json("/orders", &body)).await.unwrap();

    assert_eq!(res.status(), StatusCode::UNPROCESSABLE_ENTITY);
    let v = body_json(res).await;
    assert!(v["error"].as_str().unwrap().contains("unsupported symbol"));
}

#[tokio::test]
async fn create_order_rests_open_and_shows_in_book() {
    let (app, _state, _tmp) = test_app();

    let res = app
        .clone()
        .oneshot(post_json("/orders", &order_body("Buy", dec!(48), dec!(10))))
        .await
        .unwrap();

    assert_eq!(res.status(), StatusCode::CREATED);
    let order = body_json(res).await;
    assert_eq!(order["status"], "Open");
    assert_eq!(order["pair"], "BTC-USDT");
    assert!(Uuid::from_str(order["id"].as_str().unwrap()).is_ok());
    assert_eq!(decimal(&order["quantity"]), dec!(10));

    let res = app.oneshot(get("/book/BTC-USDT")).await.unwrap();
    assert_eq!(res.status(), StatusCode::OK);
    let snap = body_json(res).await;
    assert_eq!(decimal(&snap["bids"][0]["price"]), dec!(48));
    assert_eq!(decimal(&snap["bids"][0]["quantity"]), dec!(10));
    assert!(snap["asks"].as_array().unwrap().is_empty());
}

#[tokio::test]
async fn empty_book_returns_empty_ladders() {
    let (app, _state, _tmp) = test_app();

    let res = app.clone().oneshot(get("/book/ETH-USDT")).await.unwrap();
    assert_eq!(res.status(), StatusCode::OK);
    let snap = body_json(res).await;
    assert_eq!(snap["pair"], "ETH-USDT");
    assert!(snap["bids"].as_array().unwrap().is_empty());
    assert!(snap["asks"].as_array().unwrap().is_empty());

    let res = app.oneshot(post_empty("/match/ETH-USDT")).await.unwrap();
    assert_eq!(res.status(), StatusCode::OK);
    let outcome = body_json(res).await;
    assert_eq!(outcome["trades_executed"], 0);
    assert_eq!(decimal(&outcome["volume_matched"]), dec!(0));
}

#[tokio::test]
async fn match_executes_at_ask_price_and_depletes_book() {
    let (app, _state, _tmp) = test_app();

    for body in [
        order_body("Buy", dec!(101), dec!(2.0)),
        order_body("Sell", dec!(100), dec!(1.0)),
    ] {
        let res = app
            .clone()
            .oneshot(post_json("/orders", &body))
            .await
            .unwrap();
        assert_eq!(res.status(), StatusCode::CREATED);
    }

    let res = app
        .clone()
        .oneshot(post_empty("/match/BTC-USDT"))
        .await
        .unwrap();
    assert_eq!(res.status(), StatusCode::OK);
    let outcome = body_json(res).await;
    assert_eq!(outcome["trades_executed"], 1);
    assert_eq!(decimal(&outcome["volume_matched"]), dec!(100.0));

    // ask side is gone, bid remainder still resting
    let res = app.clone().oneshot(get("/book/BTC-USDT")).await.unwrap();
    let snap = body_json(res).await;
    assert!(snap["asks"].as_array().unwrap().is_empty());
    assert_eq!(decimal(&snap["bids"][0]["quantity"]), dec!(1.0));

    // the ledger saw it, priced at the resting ask
    let res = app.oneshot(get("/trades/BTC-USDT")).await.unwrap();
    let page = body_json(res).await;
    let items = page["items"].as_array().unwrap();
    assert_eq!(items.len(), 1);
    assert_eq!(decimal(&items[0]["price"]), dec!(100));
    assert_eq!(decimal(&items[0]["quantity"]), dec!(1.0));
}

#[tokio::test]
async fn non_crossing_match_is_a_zero_outcome() {
    let (app, _state, _tmp) = test_app();

    for body in [
        order_body("Buy", dec!(99), dec!(1.0)),
        order_body("Sell", dec!(100), dec!(1.0)),
    ] {
        app.clone()
            .oneshot(post_json("/orders", &body))
            .await
            .unwrap();
    }

    let res = app
        .clone()
        .oneshot(post_empty("/match/BTC-USDT"))
        .await
        .unwrap();
    let outcome = body_json(res).await;
    assert_eq!(outcome["trades_executed"], 0);

    // both orders still resting
    let res = app.oneshot(get("/book/BTC-USDT")).await.unwrap();
    let snap = body_json(res).await;
    assert_eq!(snap["bids"].as_array().unwrap().len(), 1);
    assert_eq!(snap["asks"].as_array().unwrap().len(), 1);
}

#[tokio::test]
async fn drain_endpoint_sweeps_the_whole_cross() {
    let (app, _state, _tmp) = test_app();

    for body in [
        order_body("Buy", dec!(100), dec!(3.0)),
        order_body("Sell", dec!(100), dec!(1.0)),
        order_body("Sell", dec!(100), dec!(1.0)),
        order_body("Sell", dec!(100), dec!(1.0)),
    ] {
        app.clone()
            .oneshot(post_json("/orders", &body))
            .await
            .unwrap();
    }

    let res = app
        .clone()
        .oneshot(post_empty("/match/BTC-USDT/drain"))
        .await
        .unwrap();
    let outcome = body_json(res).await;
    assert_eq!(outcome["trades_executed"], 3);
    assert_eq!(decimal(&outcome["volume_matched"]), dec!(300.0));

    let res = app.oneshot(get("/book/BTC-USDT")).await.unwrap();
    let snap = body_json(res).await;
    assert!(snap["bids"].as_array().unwrap().is_empty());
    assert!(snap["asks"].as_array().unwrap().is_empty());
}

#[tokio::test]
async fn balances_for_unknown_user_is_an_empty_map() {
    let (app, _state, _tmp) = test_app();

    let user = Uuid::new_v4();
    let res = app
        .oneshot(get(&format!("/balances/{}", user)))
        .await
        .unwrap();
    assert_eq!(res.status(), StatusCode::OK);
    let v = body_json(res).await;
    assert_eq!(v["user_id"], user.to_string());
    assert!(v["balances"].as_object().unwrap().is_empty());
}

#[tokio::test]
async fn balances_report_seeded_wallets_per_currency() {
    let (app, state, _tmp) = test_app();

    let user = Uuid::new_v4();
    state.store.credit(user, "USDT", dec!(1000)).unwrap();
    state.store.credit(user, "BTC", dec!(0.5)).unwrap();
    state.store.credit(Uuid::new_v4(), "USDT", dec!(7)).unwrap();

    let res = app
        .oneshot(get(&format!("/balances/{}", user)))
        .await
        .unwrap();
    let v: Value = json(res).await;
    let balances = v["balances"].as_object().unwrap();
    assert_eq!(balances.len(), 2);
    assert_eq!(decimal(&balances["USDT"]), dec!(1000));
    assert_eq!(decimal(&balances["BTC"]), dec!(0.5));
}

#[tokio::test]
async fn trades_endpoint_paginates_forward() {
    let (app, _state, _tmp) = test_app();

    // three separate crossings, one trade each
    for price in [dec!(50), dec!(51), dec!(52)] {
        for body in [
            order_body("Buy", price, dec!(1.0)),
            order_body("Sell", price, dec!(1.0)),
        ] {
            app.clone()
                .oneshot(post_json("/orders", &body))
                .await
                .unwrap();
        }
        app.clone()
            .oneshot(post_empty("/match/BTC-USDT"))
            .await
            .unwrap();
    }

    let res = app
        .clone()
        .oneshot(get("/trades/BTC-USDT?limit=2"))
        .await
        .unwrap();
    assert_eq!(res.status(), StatusCode::OK);
    let page1 = body_json(res).await;
    let items = page1["items"].as_array().unwrap();
    assert_eq!(items.len(), 2);
    assert_eq!(decimal(&items[0]["price"]), dec!(50));
    assert_eq!(decimal(&items[1]["price"]), dec!(51));
    let next = page1["next"].as_str().unwrap();

    let res = app
        .oneshot(get(&format!(
            "/trades/BTC-USDT?limit=2&after={}",
            encode(next)
        )))
        .await
        .unwrap();
    assert_eq!(res.status(), StatusCode::OK);
    let page2 = body_json(res).await;
    let items = page2["items"].as_array().unwrap();
    assert_eq!(items.len(), 1);
    assert_eq!(decimal(&items[0]["price"]), dec!(52));
}

#[tokio::test]
async fn stale_cursor_is_a_bad_request() {
    let (app, _state, _tmp) = test_app();

    let res = app
        .oneshot(get("/trades/BTC-USDT?after=!!!notbase64!!!"))
        .await
        .unwrap();
    assert_eq!(res.status(), StatusCode::BAD_REQUEST);
    let v = body_json(res).await;
    assert!(v["error"].as_str().unwrap().to_lowercase().contains("cursor"));
}
