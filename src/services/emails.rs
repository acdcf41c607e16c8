use crate::{entities::order, errors::ServiceError};
use async_trait::async_trait;
use serde::Serialize;
use std::time::Duration;
use tracing::{info, instrument, warn};

/// Upper bound on a single send; the payment path is never held
/// hostage by a slow mail provider.
const SEND_TIMEOUT: Duration = Duration::from_secs(5);

/// Outbound transactional mail. Implementations must not block the
/// payment flow; failures are logged, never propagated to the caller.
#[cfg_attr(test, mockall::automock)]
#[async_trait]
pub trait EmailSender: Send + Sync {
    async fn send(&self, message: &EmailMessage) -> Result<(), ServiceError>;
}

#[derive(Debug, Clone, Serialize)]
pub struct EmailMessage {
    pub from: String,
    pub to: String,
    pub subject: String,
    pub body: String,
}

/// HTTP email collaborator (simple JSON POST API).
pub struct HttpEmailSender {
    http: reqwest::Client,
    api_url: String,
    api_key: String,
}

impl HttpEmailSender {
    pub fn new(api_url: String, api_key: String, timeout: Duration) -> Result<Self, ServiceError> {
        let http = reqwest::Client::builder()
            .timeout(timeout)
            .build()
            .map_err(|e| ServiceError::InternalError(format!("email client init: {e}")))?;
        Ok(Self {
            http,
            api_url,
            api_key,
        })
    }
}

#[async_trait]
impl EmailSender for HttpEmailSender {
    async fn send(&self, message: &EmailMessage) -> Result<(), ServiceError> {
        let resp = self
            .http
            .post(&self.api_url)
            .bearer_auth(&self.api_key)
            .json(message)
            .send()
            .await
            .map_err(|e| ServiceError::ExternalServiceError(format!("email: {e}")))?;

        if !resp.status().is_success() {
            return Err(ServiceError::ExternalServiceError(format!(
                "email provider returned {}",
                resp.status()
            )));
        }
        Ok(())
    }
}

/// Stand-in used when no email provider is configured. Logs the subject
/// line so development runs still show what would have gone out.
pub struct NoopEmailSender;

#[async_trait]
impl EmailSender for NoopEmailSender {
    async fn send(&self, message: &EmailMessage) -> Result<(), ServiceError> {
        info!(to = %message.to, subject = %message.subject, "Email sending disabled; dropping message");
        Ok(())
    }
}

/// Builds and dispatches order confirmation mail: one copy to the
/// customer, one to the fulfillment inbox.
#[derive(Clone)]
pub struct EmailService {
    sender: std::sync::Arc<dyn EmailSender>,
    from_address: String,
    staff_address: String,
}

impl EmailService {
    pub fn new(
        sender: std::sync::Arc<dyn EmailSender>,
        from_address: String,
        staff_address: String,
    ) -> Self {
        Self {
            sender,
            from_address,
            staff_address,
        }
    }

    async fn send_logged(&self, message: EmailMessage) {
        match tokio::time::timeout(SEND_TIMEOUT, self.sender.send(&message)).await {
            Ok(Ok(())) => {}
            Ok(Err(e)) => warn!(to = %message.to, error = %e, "Failed to send confirmation email"),
            Err(_) => warn!(to = %message.to, "Confirmation email timed out"),
        }
    }

    /// Sends both confirmation copies concurrently, each bounded by
    /// `SEND_TIMEOUT`. Best-effort: each failure is logged and swallowed
    /// so a mail outage never fails a paid order.
    #[instrument(skip(self, order), fields(order_number = %order.order_number))]
    pub async fn send_order_confirmation(&self, order: &order::Model) {
        let customer = EmailMessage {
            from: self.from_address.clone(),
            to: order.customer_email.clone(),
            subject: format!("Order {} confirmed", order.order_number),
            body: format!(
                "Thank you, {}!\n\nYour order {} is confirmed and paid.\n\
                 Total charged: {} {}\n\nWe will be in touch about delivery.",
                order.customer_name, order.order_number, order.total_amount, order.currency
            ),
        };
        let staff = EmailMessage {
            from: self.from_address.clone(),
            to: self.staff_address.clone(),
            subject: format!("New paid order {}", order.order_number),
            body: format!(
                "Order {} ({} {}) for {} <{}> is paid and ready for fulfillment.",
                order.order_number,
                order.total_amount,
                order.currency,
                order.customer_name,
                order.customer_email
            ),
        };

        tokio::join!(self.send_logged(customer), self.send_logged(staff));
    }
}
