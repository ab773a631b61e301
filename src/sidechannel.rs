//! Side-channel REST actions.
//!
//! Job completion and the escrow operations ride a REST surface that is
//! separate from the chat transport. Each action mints its own optimistic
//! message, fires the call, and emits the chat wire form once the call
//! succeeds. An outcome, good or bad, only ever touches the triggering
//! message.

use crate::client::ChatClient;
use crate::error::ClientError;
use log::warn;
use serde_json::json;
use stitchcore::net::HttpRequest;
use stitchcore::types::{ActionPayload, MessageKind, MessageStatus, Payload, PaymentPayload};

impl ChatClient {
    /// Marks the job completed: posts the completion, then announces it
    /// in the conversation.
    pub async fn complete_job(&self, job_id: &str) -> Result<String, ClientError> {
        let payload = Payload::Action(ActionPayload {
            label: Some("Job completed".to_string()),
            job_id: Some(job_id.to_string()),
            amount: None,
        });
        let url = format!(
            "{}/jobs/{}/complete",
            self.config.api_base_url,
            urlencoding::encode(job_id)
        );
        self.dispatch_side_action(
            MessageKind::ActionCompleted,
            payload,
            HttpRequest::post(url),
        )
        .await
    }

    /// Creates and funds the escrow for a job, announcing the payment in
    /// the conversation once the REST call went through.
    pub async fn create_escrow_payment(
        &self,
        job_id: &str,
        amount: &str,
        currency: &str,
    ) -> Result<String, ClientError> {
        let payload = Payload::Payment(PaymentPayload {
            amount: Some(amount.to_string()),
            currency: Some(currency.to_string()),
            payer: self.config.own_participant_id.clone(),
            reference: Some(job_id.to_string()),
        });
        let body = json!({
            "jobId": job_id,
            "amount": amount,
            "currency": currency,
        });
        let request = HttpRequest::post(format!("{}/escrow", self.config.api_base_url))
            .with_header("Content-Type", "application/json")
            .with_body(body.to_string().into_bytes());
        self.dispatch_side_action(MessageKind::EscrowPayment, payload, request)
            .await
    }

    /// Releases the escrowed funds to the maker.
    pub async fn release_escrow(&self, job_id: &str) -> Result<String, ClientError> {
        let payload = Payload::Payment(PaymentPayload {
            amount: None,
            currency: None,
            payer: self.config.own_participant_id.clone(),
            reference: Some(job_id.to_string()),
        });
        let url = format!(
            "{}/escrow/{}/release",
            self.config.api_base_url,
            urlencoding::encode(job_id)
        );
        self.dispatch_side_action(MessageKind::EscrowRelease, payload, HttpRequest::post(url))
            .await
    }

    /// Optimistic insert, REST call, then the chat emit. The REST call
    /// failing (or resolving after a conversation switch) never unwinds
    /// anything beyond this one message.
    async fn dispatch_side_action(
        &self,
        kind: MessageKind,
        data: Payload,
        request: HttpRequest,
    ) -> Result<String, ClientError> {
        let generation = self.current_generation();
        let entry = self
            .insert_optimistic(kind, data.clone(), MessageStatus::Pending)
            .await?;

        let outcome = match self.http.execute(request).await {
            Ok(response) if response.is_success() => Ok(()),
            Ok(response) => Err(anyhow::anyhow!(
                "side-channel call returned status {}",
                response.status_code
            )),
            Err(e) => Err(e),
        };

        if self.current_generation() != generation {
            return Ok(entry.client_message_id);
        }

        match outcome {
            Ok(()) => {
                if let Err(e) = self.emit_message(&entry, kind, &data).await {
                    warn!(
                        "chat emit after side-channel call failed for {}: {e:#}",
                        entry.client_message_id
                    );
                    self.fail_message(&entry.client_message_id).await;
                }
            }
            Err(e) => {
                warn!(
                    "side-channel call failed for {}: {e:#}",
                    entry.client_message_id
                );
                self.fail_message(&entry.client_message_id).await;
            }
        }
        Ok(entry.client_message_id)
    }
}
