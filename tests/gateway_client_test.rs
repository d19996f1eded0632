use std::time::Duration;

use assert_matches::assert_matches;
use rust_decimal_macros::dec;
use wiremock::matchers::{header, method, path, query_param};
use wiremock::{Mock, MockServer, ResponseTemplate};

use newsstand_api::config::GatewayConfig;
use newsstand_api::errors::ServiceError;
use newsstand_api::payments::{
    CreateSessionRequest, CustomerRef, HttpPaymentGateway, PaymentGateway, SessionLineItem,
    SessionPaymentStatus,
};

fn gateway_for(server: &MockServer) -> HttpPaymentGateway {
    let config = GatewayConfig {
        base_url: server.uri(),
        api_key: "sk_test_123".to_string(),
        timeout_secs: 2,
        max_retries: 3,
        ..GatewayConfig::default()
    };
    HttpPaymentGateway::new(&config).unwrap()
}

fn session_request() -> CreateSessionRequest {
    CreateSessionRequest {
        customer: CustomerRef {
            id: "cus_42".to_string(),
            email: "corner-shop@example.com".to_string(),
        },
        currency: "USD".to_string(),
        line_items: vec![SessionLineItem {
            name: "Gourmet Monthly".to_string(),
            description: None,
            unit_amount: 1250,
            quantity: 2,
        }],
        order_id: "ord_1".to_string(),
    }
}

#[tokio::test]
async fn existing_customer_is_reused_instead_of_created() {
    let server = MockServer::start().await;

    Mock::given(method("GET"))
        .and(path("/v1/customers"))
        .and(query_param("email", "corner-shop@example.com"))
        .and(header("authorization", "Bearer sk_test_123"))
        .respond_with(ResponseTemplate::new(200).set_body_json(serde_json::json!({
            "data": [{ "id": "cus_existing", "email": "corner-shop@example.com" }]
        })))
        .expect(1)
        .mount(&server)
        .await;
    Mock::given(method("POST"))
        .and(path("/v1/customers"))
        .respond_with(ResponseTemplate::new(200))
        .expect(0)
        .mount(&server)
        .await;

    let gateway = gateway_for(&server);
    let customer = gateway
        .create_customer("corner-shop@example.com", "Corner Shop")
        .await
        .unwrap();
    assert_eq!(customer.id, "cus_existing");
}

#[tokio::test]
async fn missing_customer_is_created() {
    let server = MockServer::start().await;

    Mock::given(method("GET"))
        .and(path("/v1/customers"))
        .respond_with(
            ResponseTemplate::new(200).set_body_json(serde_json::json!({ "data": [] })),
        )
        .mount(&server)
        .await;
    Mock::given(method("POST"))
        .and(path("/v1/customers"))
        .respond_with(ResponseTemplate::new(200).set_body_json(serde_json::json!({
            "id": "cus_new", "email": "corner-shop@example.com"
        })))
        .expect(1)
        .mount(&server)
        .await;

    let gateway = gateway_for(&server);
    let customer = gateway
        .create_customer("corner-shop@example.com", "Corner Shop")
        .await
        .unwrap();
    assert_eq!(customer.id, "cus_new");
}

#[tokio::test]
async fn transient_server_errors_are_retried() {
    let server = MockServer::start().await;

    Mock::given(method("GET"))
        .and(path("/v1/checkout/sessions/cs_1"))
        .respond_with(ResponseTemplate::new(500))
        .up_to_n_times(1)
        .mount(&server)
        .await;
    Mock::given(method("GET"))
        .and(path("/v1/checkout/sessions/cs_1"))
        .respond_with(ResponseTemplate::new(200).set_body_json(serde_json::json!({
            "id": "cs_1",
            "url": "https://gateway.example/pay/cs_1",
            "payment_intent": "pi_1",
            "payment_status": "paid"
        })))
        .mount(&server)
        .await;

    let gateway = gateway_for(&server);
    let session = gateway.retrieve_session("cs_1").await.unwrap();
    assert_eq!(session.payment_status, SessionPaymentStatus::Paid);
    assert_eq!(session.payment_intent_id.as_deref(), Some("pi_1"));
}

#[tokio::test]
async fn exhausted_retries_surface_as_unavailable() {
    let server = MockServer::start().await;

    Mock::given(method("GET"))
        .and(path("/v1/checkout/sessions/cs_down"))
        .respond_with(ResponseTemplate::new(503))
        .expect(3)
        .mount(&server)
        .await;

    let gateway = gateway_for(&server);
    let err = gateway.retrieve_session("cs_down").await.unwrap_err();
    assert_matches!(err, ServiceError::GatewayUnavailable(_));
}

#[tokio::test]
async fn client_errors_are_not_retried() {
    let server = MockServer::start().await;

    Mock::given(method("POST"))
        .and(path("/v1/checkout/sessions"))
        .respond_with(ResponseTemplate::new(400).set_body_json(serde_json::json!({
            "error": { "message": "currency not supported", "code": "currency_unsupported" }
        })))
        .expect(1)
        .mount(&server)
        .await;

    let gateway = gateway_for(&server);
    let err = gateway
        .create_checkout_session(session_request())
        .await
        .unwrap_err();
    assert_matches!(
        err,
        ServiceError::GatewayRejected(reason) if reason.contains("currency_unsupported")
    );
}

#[tokio::test]
async fn refused_refunds_map_to_refund_rejected() {
    let server = MockServer::start().await;

    Mock::given(method("POST"))
        .and(path("/v1/refunds"))
        .respond_with(ResponseTemplate::new(400).set_body_json(serde_json::json!({
            "error": { "message": "charge already refunded" }
        })))
        .expect(1)
        .mount(&server)
        .await;

    let gateway = gateway_for(&server);
    let err = gateway
        .create_refund("pi_1", Some(dec!(10.00)), "requested_by_retailer")
        .await
        .unwrap_err();
    assert_matches!(
        err,
        ServiceError::RefundRejected(reason) if reason.contains("already refunded")
    );
}

#[tokio::test]
async fn slow_responses_time_out() {
    let server = MockServer::start().await;

    Mock::given(method("GET"))
        .and(path("/v1/checkout/sessions/cs_slow"))
        .respond_with(
            ResponseTemplate::new(200)
                .set_body_json(serde_json::json!({
                    "id": "cs_slow",
                    "url": "https://gateway.example/pay/cs_slow",
                    "payment_intent": null,
                    "payment_status": "unpaid"
                }))
                .set_delay(Duration::from_secs(5)),
        )
        .mount(&server)
        .await;

    let config = GatewayConfig {
        base_url: server.uri(),
        api_key: "sk_test_123".to_string(),
        timeout_secs: 1,
        max_retries: 1,
        ..GatewayConfig::default()
    };
    let gateway = HttpPaymentGateway::new(&config).unwrap();

    let err = gateway.retrieve_session("cs_slow").await.unwrap_err();
    assert_matches!(err, ServiceError::GatewayTimeout(_));
}

#[tokio::test]
async fn session_without_redirect_url_is_rejected() {
    let server = MockServer::start().await;

    Mock::given(method("POST"))
        .and(path("/v1/checkout/sessions"))
        .respond_with(ResponseTemplate::new(200).set_body_json(serde_json::json!({
            "id": "cs_broken",
            "url": null,
            "payment_intent": null,
            "payment_status": "unpaid"
        })))
        .mount(&server)
        .await;

    let gateway = gateway_for(&server);
    let err = gateway
        .create_checkout_session(session_request())
        .await
        .unwrap_err();
    assert_matches!(err, ServiceError::GatewayUnavailable(reason) if reason.contains("redirect"));
}
