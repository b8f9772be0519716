//! Transactional email.
//!
//! Templates live in `email_templates` and fall back to built-in defaults.
//! Placeholders are written `{{name}}`. Delivery goes through an
//! [`EmailTransport`]: SMTP in deployed environments, a logging transport
//! otherwise. Every delivery attempt is recorded in `email_logs`.

use crate::{
    config::EmailConfig,
    entities::{
        email_log::{self, EmailStatus},
        email_template, order, return_request, shipment,
    },
    errors::ServiceError,
    events::{Event, EventHandler},
};
use async_trait::async_trait;
use chrono::Utc;
use lettre::{
    message::{header::ContentType, Mailbox, MultiPart, SinglePart},
    transport::smtp::authentication::Credentials,
    AsyncSmtpTransport, AsyncTransport, Message, Tokio1Executor,
};
use once_cell::sync::Lazy;
use regex::{Captures, Regex};
use sea_orm::{
    ActiveModelTrait, ColumnTrait, DatabaseConnection, EntityTrait, QueryFilter, QueryOrder,
    QuerySelect, Set,
};
use serde::{Deserialize, Serialize};
use std::{
    collections::{BTreeSet, HashMap},
    sync::Arc,
};
use tracing::{debug, info, instrument, warn};
use utoipa::ToSchema;
use uuid::Uuid;
use validator::Validate;

pub const ORDER_CONFIRMATION: &str = "order_confirmation";
pub const ORDER_SHIPPED: &str = "order_shipped";
pub const ORDER_CANCELLED: &str = "order_cancelled";
pub const RETURN_UPDATE: &str = "return_update";

static PLACEHOLDER: Lazy<Regex> =
    Lazy::new(|| Regex::new(r"\{\{\s*([A-Za-z0-9_]+)\s*\}\}").unwrap());

/// Built-in subject and text body for the keys the event dispatcher uses.
fn builtin(key: &str) -> Option<(&'static str, &'static str)> {
    match key {
        ORDER_CONFIRMATION => Some((
            "Order {{order_number}} confirmed",
            "Thank you for your order.\n\nOrder {{order_number}}\nTotal: {{total}} {{currency}}\n\nWe will let you know when it ships.",
        )),
        ORDER_SHIPPED => Some((
            "Order {{order_number}} has shipped",
            "Your order {{order_number}} is on its way with {{carrier}}.\n\nTracking number: {{tracking_number}}",
        )),
        ORDER_CANCELLED => Some((
            "Order {{order_number}} cancelled",
            "Your order {{order_number}} has been cancelled.\n\nReason: {{reason}}",
        )),
        RETURN_UPDATE => Some((
            "Update on your return for order {{order_number}}",
            "Your return for order {{order_number}} is now {{status}}.\n\n{{note}}",
        )),
        _ => None,
    }
}

fn default_template(key: &str) -> Option<email_template::Model> {
    builtin(key).map(|(subject, body)| {
        let now = Utc::now();
        email_template::Model {
            id: Uuid::nil(),
            key: key.to_string(),
            subject: subject.to_string(),
            body_text: body.to_string(),
            body_html: None,
            is_active: true,
            created_at: now,
            updated_at: now,
        }
    })
}

/// Replaces every `{{key}}` in `template`. Any placeholder without a value
/// fails the whole render.
pub fn render(template: &str, vars: &HashMap<String, String>) -> Result<String, ServiceError> {
    let missing: BTreeSet<&str> = PLACEHOLDER
        .captures_iter(template)
        .filter_map(|c| c.get(1))
        .map(|m| m.as_str())
        .filter(|key| !vars.contains_key(*key))
        .collect();
    if !missing.is_empty() {
        return Err(ServiceError::ValidationError(format!(
            "Missing template variables: {}",
            missing.into_iter().collect::<Vec<_>>().join(", ")
        )));
    }

    Ok(PLACEHOLDER
        .replace_all(template, |caps: &Captures| {
            vars.get(&caps[1]).cloned().unwrap_or_default()
        })
        .into_owned())
}

/// A fully rendered message ready for a transport.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct OutgoingEmail {
    pub to: String,
    pub subject: String,
    pub body_text: String,
    pub body_html: Option<String>,
}

#[cfg_attr(test, mockall::automock)]
#[async_trait]
pub trait EmailTransport: Send + Sync {
    async fn deliver(&self, email: &OutgoingEmail) -> Result<(), ServiceError>;
}

pub struct SmtpTransport {
    mailer: AsyncSmtpTransport<Tokio1Executor>,
    from: Mailbox,
}

impl SmtpTransport {
    pub fn new(config: &EmailConfig, host: &str) -> Result<Self, ServiceError> {
        let mut builder = AsyncSmtpTransport::<Tokio1Executor>::starttls_relay(host)
            .map_err(|e| ServiceError::ExternalServiceError(format!("SMTP relay {}: {}", host, e)))?
            .port(config.smtp_port);
        if let (Some(user), Some(password)) = (&config.smtp_username, &config.smtp_password) {
            builder = builder.credentials(Credentials::new(user.clone(), password.clone()));
        }

        let from = format!("{} <{}>", config.from_name, config.from_address)
            .parse::<Mailbox>()
            .map_err(|e| ServiceError::InvalidInput(format!("Invalid sender address: {}", e)))?;

        Ok(Self {
            mailer: builder.build(),
            from,
        })
    }
}

#[async_trait]
impl EmailTransport for SmtpTransport {
    async fn deliver(&self, email: &OutgoingEmail) -> Result<(), ServiceError> {
        let to = email
            .to
            .parse::<Mailbox>()
            .map_err(|_| ServiceError::ValidationError(format!("Invalid recipient {}", email.to)))?;
        let builder = Message::builder()
            .from(self.from.clone())
            .to(to)
            .subject(email.subject.clone());

        let message = match &email.body_html {
            Some(html) => builder.multipart(
                MultiPart::alternative()
                    .singlepart(
                        SinglePart::builder()
                            .header(ContentType::TEXT_PLAIN)
                            .body(email.body_text.clone()),
                    )
                    .singlepart(
                        SinglePart::builder()
                            .header(ContentType::TEXT_HTML)
                            .body(html.clone()),
                    ),
            ),
            None => builder
                .header(ContentType::TEXT_PLAIN)
                .body(email.body_text.clone()),
        }
        .map_err(|e| ServiceError::InternalError(format!("Failed to build message: {}", e)))?;

        self.mailer
            .send(message)
            .await
            .map_err(|e| ServiceError::ExternalServiceError(format!("SMTP delivery failed: {}", e)))?;
        Ok(())
    }
}

/// Development transport: writes the message to the log instead of sending it.
pub struct LogTransport;

#[async_trait]
impl EmailTransport for LogTransport {
    async fn deliver(&self, email: &OutgoingEmail) -> Result<(), ServiceError> {
        info!(to = %email.to, subject = %email.subject, body = %email.body_text, "Email (log transport)");
        Ok(())
    }
}

/// SMTP when a host is configured, logging otherwise.
pub fn transport_from_config(config: &EmailConfig) -> Result<Arc<dyn EmailTransport>, ServiceError> {
    match config.smtp_host.as_deref() {
        Some(host) => Ok(Arc::new(SmtpTransport::new(config, host)?)),
        None => {
            warn!("No SMTP host configured; emails will only be logged");
            Ok(Arc::new(LogTransport))
        }
    }
}

#[derive(Debug, Clone, Deserialize, Validate, ToSchema)]
pub struct UpsertTemplateInput {
    #[validate(length(min = 1, max = 255))]
    pub subject: String,
    #[validate(length(min = 1))]
    pub body_text: String,
    pub body_html: Option<String>,
    #[serde(default = "default_true")]
    pub is_active: bool,
}

fn default_true() -> bool {
    true
}

#[derive(Debug, Clone, Serialize, ToSchema)]
pub struct RenderedPreview {
    pub subject: String,
    pub body_text: String,
    pub body_html: Option<String>,
}

#[derive(Clone)]
pub struct EmailService {
    db: Arc<DatabaseConnection>,
    transport: Arc<dyn EmailTransport>,
}

impl EmailService {
    pub fn new(db: Arc<DatabaseConnection>, transport: Arc<dyn EmailTransport>) -> Self {
        Self { db, transport }
    }

    #[instrument(skip(self, input))]
    pub async fn upsert_template(
        &self,
        key: &str,
        input: UpsertTemplateInput,
    ) -> Result<email_template::Model, ServiceError> {
        input.validate()?;
        let key = key.trim().to_lowercase();
        if key.is_empty() {
            return Err(ServiceError::ValidationError("Template key is required".to_string()));
        }

        let now = Utc::now();
        let saved = match self.stored_template(&key).await? {
            Some(existing) => {
                let mut active: email_template::ActiveModel = existing.into();
                active.subject = Set(input.subject);
                active.body_text = Set(input.body_text);
                active.body_html = Set(input.body_html);
                active.is_active = Set(input.is_active);
                active.updated_at = Set(now);
                active.update(&*self.db).await?
            }
            None => {
                email_template::ActiveModel {
                    id: Set(Uuid::new_v4()),
                    key: Set(key.clone()),
                    subject: Set(input.subject),
                    body_text: Set(input.body_text),
                    body_html: Set(input.body_html),
                    is_active: Set(input.is_active),
                    created_at: Set(now),
                    updated_at: Set(now),
                }
                .insert(&*self.db)
                .await?
            }
        };

        info!(%key, "Email template saved");
        Ok(saved)
    }

    /// Stored template, or the built-in default for well-known keys.
    pub async fn get_template(&self, key: &str) -> Result<email_template::Model, ServiceError> {
        let key = key.trim().to_lowercase();
        match self.stored_template(&key).await? {
            Some(template) => Ok(template),
            None => default_template(&key).ok_or_else(|| ServiceError::not_found("Email template", &key)),
        }
    }

    /// Stored templates plus the defaults that have not been overridden.
    pub async fn list_templates(&self) -> Result<Vec<email_template::Model>, ServiceError> {
        let mut templates = email_template::Entity::find()
            .order_by_asc(email_template::Column::Key)
            .all(&*self.db)
            .await?;
        for key in [ORDER_CONFIRMATION, ORDER_SHIPPED, ORDER_CANCELLED, RETURN_UPDATE] {
            if !templates.iter().any(|t| t.key == key) {
                templates.extend(default_template(key));
            }
        }
        templates.sort_by(|a, b| a.key.cmp(&b.key));
        Ok(templates)
    }

    /// Renders and delivers one message. Delivery failures are logged as
    /// failed attempts and returned to the caller.
    #[instrument(skip(self, vars))]
    pub async fn send(
        &self,
        to: &str,
        template_key: &str,
        vars: &HashMap<String, String>,
    ) -> Result<email_log::Model, ServiceError> {
        let template = self.get_template(template_key).await?;
        if !template.is_active {
            return Err(ServiceError::InvalidOperation(format!(
                "Email template {} is disabled",
                template.key
            )));
        }

        let email = OutgoingEmail {
            to: to.trim().to_string(),
            subject: render(&template.subject, vars)?,
            body_text: render(&template.body_text, vars)?,
            body_html: template
                .body_html
                .as_deref()
                .map(|html| render(html, vars))
                .transpose()?,
        };

        let outcome = self.transport.deliver(&email).await;
        let (status, error) = match &outcome {
            Ok(()) => (EmailStatus::Sent, None),
            Err(e) => (EmailStatus::Failed, Some(e.to_string())),
        };
        let log = email_log::ActiveModel {
            id: Set(Uuid::new_v4()),
            template_key: Set(template.key.clone()),
            recipient: Set(email.to.clone()),
            subject: Set(email.subject.clone()),
            status: Set(status),
            error: Set(error),
            created_at: Set(Utc::now()),
        }
        .insert(&*self.db)
        .await?;
        metrics::counter!("storefront.emails.sent", 1, "template" => template.key.clone(), "status" => status.to_string());

        outcome?;
        debug!(to = %email.to, template = %template.key, "Email delivered");
        Ok(log)
    }

    /// Renders a template without sending it.
    pub async fn preview(
        &self,
        template_key: &str,
        vars: &HashMap<String, String>,
    ) -> Result<RenderedPreview, ServiceError> {
        let template = self.get_template(template_key).await?;
        Ok(RenderedPreview {
            subject: render(&template.subject, vars)?,
            body_text: render(&template.body_text, vars)?,
            body_html: template
                .body_html
                .as_deref()
                .map(|html| render(html, vars))
                .transpose()?,
        })
    }

    pub async fn recent_logs(&self, limit: u64) -> Result<Vec<email_log::Model>, ServiceError> {
        Ok(email_log::Entity::find()
            .order_by_desc(email_log::Column::CreatedAt)
            .limit(limit)
            .all(&*self.db)
            .await?)
    }

    async fn stored_template(&self, key: &str) -> Result<Option<email_template::Model>, ServiceError> {
        Ok(email_template::Entity::find()
            .filter(email_template::Column::Key.eq(key))
            .one(&*self.db)
            .await?)
    }
}

/// Sends customer emails in response to order and return events.
pub struct NotificationDispatcher {
    db: Arc<DatabaseConnection>,
    email: Arc<EmailService>,
}

impl NotificationDispatcher {
    pub fn new(db: Arc<DatabaseConnection>, email: Arc<EmailService>) -> Self {
        Self { db, email }
    }

    async fn order(&self, order_id: Uuid) -> Result<order::Model, ServiceError> {
        order::Entity::find_by_id(order_id)
            .one(&*self.db)
            .await?
            .ok_or_else(|| ServiceError::not_found("Order", order_id))
    }

    async fn dispatch(&self, event: &Event) -> Result<(), ServiceError> {
        match event {
            Event::OrderCreated(order_id) => {
                let order = self.order(*order_id).await?;
                let vars = order_vars(&order);
                self.email.send(&order.email, ORDER_CONFIRMATION, &vars).await?;
            }
            Event::OrderShipped {
                order_id,
                shipment_id,
            } => {
                let order = self.order(*order_id).await?;
                let shipment = shipment::Entity::find_by_id(*shipment_id)
                    .one(&*self.db)
                    .await?
                    .ok_or_else(|| ServiceError::not_found("Shipment", shipment_id))?;
                let mut vars = order_vars(&order);
                vars.insert("carrier".into(), shipment.carrier);
                vars.insert("tracking_number".into(), shipment.tracking_number);
                self.email.send(&order.email, ORDER_SHIPPED, &vars).await?;
            }
            Event::OrderCancelled { order_id, reason } => {
                let order = self.order(*order_id).await?;
                let mut vars = order_vars(&order);
                vars.insert("reason".into(), reason.clone());
                self.email.send(&order.email, ORDER_CANCELLED, &vars).await?;
            }
            Event::ReturnStatusChanged { return_id, status } => {
                let request = return_request::Entity::find_by_id(*return_id)
                    .one(&*self.db)
                    .await?
                    .ok_or_else(|| ServiceError::not_found("Return", return_id))?;
                let order = self.order(request.order_id).await?;
                let mut vars = order_vars(&order);
                vars.insert("status".into(), status.clone());
                vars.insert("note".into(), request.admin_note.unwrap_or_default());
                self.email.send(&order.email, RETURN_UPDATE, &vars).await?;
            }
            _ => {}
        }
        Ok(())
    }
}

fn order_vars(order: &order::Model) -> HashMap<String, String> {
    HashMap::from([
        ("order_number".to_string(), order.order_number.clone()),
        ("total".to_string(), order.total.round_dp(2).to_string()),
        ("currency".to_string(), order.currency.clone()),
        ("email".to_string(), order.email.clone()),
    ])
}

#[async_trait]
impl EventHandler for NotificationDispatcher {
    async fn handle_event(&self, event: &Event) -> Result<(), String> {
        self.dispatch(event).await.map_err(|e| e.to_string())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn vars(pairs: &[(&str, &str)]) -> HashMap<String, String> {
        pairs
            .iter()
            .map(|(k, v)| (k.to_string(), v.to_string()))
            .collect()
    }

    #[test]
    fn renders_placeholders_with_optional_spacing() {
        let out = render("Hi {{name}}, order {{ number }}!", &vars(&[("name", "Ada"), ("number", "ORD-1")]))
            .unwrap();
        assert_eq!(out, "Hi Ada, order ORD-1!");
    }

    #[test]
    fn missing_variables_are_listed() {
        let err = render("{{a}} {{b}} {{c}}", &vars(&[("b", "x")])).unwrap_err();
        match err {
            ServiceError::ValidationError(msg) => assert!(msg.ends_with("a, c"), "{}", msg),
            other => panic!("unexpected error {:?}", other),
        }
    }

    #[test]
    fn builtin_templates_render_with_order_vars() {
        for key in [ORDER_CONFIRMATION, ORDER_CANCELLED] {
            let template = default_template(key).unwrap();
            let mut v = vars(&[("order_number", "ORD-1"), ("total", "10.00"), ("currency", "USD")]);
            v.insert("reason".into(), "out of stock".into());
            assert!(render(&template.body_text, &v).is_ok());
        }
        assert!(default_template("unknown").is_none());
    }

    #[tokio::test]
    async fn log_transport_always_succeeds() {
        let email = OutgoingEmail {
            to: "a@example.com".into(),
            subject: "s".into(),
            body_text: "b".into(),
            body_html: None,
        };
        assert!(LogTransport.deliver(&email).await.is_ok());
    }
}
