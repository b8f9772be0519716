mod common;

use std::{collections::HashMap, sync::Arc};

use assert_matches::assert_matches;
use async_trait::async_trait;
use common::TestApp;
use rust_decimal_macros::dec;
use storefront_api::{
    auth::CartOwner,
    entities::email_log::EmailStatus,
    errors::ServiceError,
    events::{Event, EventHandler},
    services::{
        notifications::{
            EmailService, EmailTransport, NotificationDispatcher, OutgoingEmail,
            UpsertTemplateInput, ORDER_CANCELLED, ORDER_CONFIRMATION,
        },
        shipping::CreateShipmentInput,
    },
};
use uuid::Uuid;

struct BouncingTransport;

#[async_trait]
impl EmailTransport for BouncingTransport {
    async fn deliver(&self, _email: &OutgoingEmail) -> Result<(), ServiceError> {
        Err(ServiceError::ExternalServiceError("mailbox unavailable".into()))
    }
}

fn vars(pairs: &[(&str, &str)]) -> HashMap<String, String> {
    pairs
        .iter()
        .map(|(k, v)| (k.to_string(), v.to_string()))
        .collect()
}

#[tokio::test]
async fn builtin_template_is_rendered_and_logged() {
    let app = TestApp::new().await;
    let email = &app.services().email;

    let log = email
        .send(
            " shopper@example.com ",
            ORDER_CONFIRMATION,
            &vars(&[("order_number", "ORD-42"), ("total", "48.99"), ("currency", "USD")]),
        )
        .await
        .unwrap();
    assert_eq!(log.status, EmailStatus::Sent);
    assert_eq!(log.recipient, "shopper@example.com");

    let sent = app.mailbox.sent();
    assert_eq!(sent.len(), 1);
    assert_eq!(sent[0].subject, "Order ORD-42 confirmed");
    assert!(sent[0].body_text.contains("Total: 48.99 USD"));

    let logs = email.recent_logs(10).await.unwrap();
    assert_eq!(logs.len(), 1);
    assert_eq!(logs[0].template_key, ORDER_CONFIRMATION);
}

#[tokio::test]
async fn stored_templates_override_the_defaults() {
    let app = TestApp::new().await;
    let email = &app.services().email;

    email
        .upsert_template(
            "Order_Confirmation",
            UpsertTemplateInput {
                subject: "Thanks, {{name}}!".into(),
                body_text: "Order {{order_number}} is in.".into(),
                body_html: Some("<p>Order <b>{{order_number}}</b></p>".into()),
                is_active: true,
            },
        )
        .await
        .unwrap();

    let preview = email
        .preview(ORDER_CONFIRMATION, &vars(&[("name", "Ada"), ("order_number", "ORD-7")]))
        .await
        .unwrap();
    assert_eq!(preview.subject, "Thanks, Ada!");
    assert_eq!(preview.body_html.as_deref(), Some("<p>Order <b>ORD-7</b></p>"));
    assert!(app.mailbox.sent().is_empty());

    let templates = email.list_templates().await.unwrap();
    let keys: Vec<&str> = templates.iter().map(|t| t.key.as_str()).collect();
    assert_eq!(
        keys,
        ["order_cancelled", "order_confirmation", "order_shipped", "return_update"]
    );
    let confirmation = templates.iter().find(|t| t.key == ORDER_CONFIRMATION).unwrap();
    assert_eq!(confirmation.subject, "Thanks, {{name}}!");
}

#[tokio::test]
async fn missing_variables_and_disabled_templates_are_refused() {
    let app = TestApp::new().await;
    let email = &app.services().email;

    let missing = email
        .send("a@example.com", ORDER_CONFIRMATION, &vars(&[("total", "1")]))
        .await;
    assert_matches!(missing, Err(ServiceError::ValidationError(_)));

    email
        .upsert_template(
            ORDER_CANCELLED,
            UpsertTemplateInput {
                subject: "Cancelled".into(),
                body_text: "Sorry.".into(),
                body_html: None,
                is_active: false,
            },
        )
        .await
        .unwrap();
    let disabled = email.send("a@example.com", ORDER_CANCELLED, &HashMap::new()).await;
    assert_matches!(disabled, Err(ServiceError::InvalidOperation(_)));

    let unknown = email.send("a@example.com", "newsletter", &HashMap::new()).await;
    assert_matches!(unknown, Err(ServiceError::NotFound(_)));
    assert!(app.mailbox.sent().is_empty());
}

#[tokio::test]
async fn failed_deliveries_are_logged_and_reported() {
    let app = TestApp::new().await;
    let email = EmailService::new(app.state.db.clone(), Arc::new(BouncingTransport));

    let result = email
        .send(
            "a@example.com",
            ORDER_CANCELLED,
            &vars(&[("order_number", "ORD-1"), ("reason", "fraud check")]),
        )
        .await;
    assert_matches!(result, Err(ServiceError::ExternalServiceError(_)));

    let logs = email.recent_logs(5).await.unwrap();
    assert_eq!(logs[0].status, EmailStatus::Failed);
    assert!(logs[0].error.as_deref().unwrap_or_default().contains("mailbox unavailable"));
}

#[tokio::test]
async fn dispatcher_emails_customers_about_their_orders() {
    let app = TestApp::new().await;
    app.shipping_rate("standard", dec!(5.00), None).await;
    let tee = app.product("Classic Tee", dec!(20.00), 10).await;
    let owner = CartOwner::User(Uuid::new_v4());
    app.add_to_cart(&owner, tee.id, 1).await;
    let placed = app.checkout(&owner, "standard").await;
    let shipment = app
        .services()
        .shipping
        .create_shipment(
            placed.order.id,
            CreateShipmentInput {
                carrier: "DHL".into(),
                tracking_number: "JD0146000".into(),
            },
        )
        .await
        .unwrap();

    let dispatcher = NotificationDispatcher::new(app.state.db.clone(), app.services().email.clone());
    dispatcher
        .handle_event(&Event::OrderCreated(placed.order.id))
        .await
        .unwrap();
    dispatcher
        .handle_event(&Event::OrderShipped {
            order_id: placed.order.id,
            shipment_id: shipment.id,
        })
        .await
        .unwrap();
    dispatcher
        .handle_event(&Event::CartUpdated(Uuid::new_v4()))
        .await
        .unwrap();

    let sent = app.mailbox.sent();
    assert_eq!(sent.len(), 2);
    assert!(sent.iter().all(|m| m.to == "shopper@example.com"));
    assert!(sent[0].subject.contains(&placed.order.order_number));
    assert!(sent[1].body_text.contains("JD0146000"));
    assert!(sent[1].body_text.contains("DHL"));

    let unknown_order = dispatcher.handle_event(&Event::OrderCreated(Uuid::new_v4())).await;
    assert!(unknown_order.is_err());
}
