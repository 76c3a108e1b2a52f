//! Alert dispatcher: store the clip, then fan out SMS and calls.
//!
//! ```text
//! dispatch(request)
//!   ├─ snapshot contacts           (only failure that aborts the batch)
//!   ├─ store audio → recording URL (failure logged, URL stays None)
//!   ├─ SMS to every contact        (concurrent, per-contact results)
//!   └─ call every contact          (concurrent, per-contact results)
//! ```
//!
//! Per-contact provider failures are reported in-band and never abort the
//! batch.

use futures::future::join_all;
use thiserror::Error;
use tracing::{info, warn};

use crate::contacts::{ContactError, SharedContactStore};
use crate::messenger::{ProviderError, ProviderReceipt, SharedMessenger};
use crate::recordings::{recording_url, SharedRecordingStore};
use crate::templates::{
    call_script_url, sms_body, template_tag, AlertContext, TemplateVariant,
};
use crate::types::{
    AttemptKind, Channel, Contact, Coordinates, DeliveryOutcome, DeliveryResult, DispatchResponse,
};

const SMS_QUEUED_STATUS: &str = "queued";
const CALL_QUEUED_STATUS: &str = "in-progress";

/// Uploaded voice clip.
#[derive(Debug, Clone)]
pub struct AudioUpload {
    pub bytes: Vec<u8>,
    pub content_type: String,
}

/// One alert to fan out.
#[derive(Debug, Clone)]
pub struct AlertRequest {
    pub kind: AttemptKind,
    pub coordinates: Coordinates,
    pub audio: Option<AudioUpload>,
    /// Recording from the first alert of the escalation, for follow-ups.
    pub prior_recording_url: Option<String>,
}

impl AlertRequest {
    pub fn immediate(coordinates: Coordinates) -> Self {
        Self {
            kind: AttemptKind::Immediate,
            coordinates,
            audio: None,
            prior_recording_url: None,
        }
    }

    pub fn delayed(coordinates: Coordinates, prior_recording_url: Option<String>) -> Self {
        Self {
            kind: AttemptKind::Delayed,
            coordinates,
            audio: None,
            prior_recording_url,
        }
    }

    pub fn with_audio(mut self, audio: AudioUpload) -> Self {
        self.audio = Some(audio);
        self
    }
}

#[derive(Debug, Error)]
pub enum DispatchError {
    #[error("Contacts unavailable: {0}")]
    Contacts(#[from] ContactError),
}

pub struct AlertDispatcher {
    contacts: SharedContactStore,
    recordings: SharedRecordingStore,
    messenger: Option<SharedMessenger>,
    public_base_url: Option<String>,
}

impl AlertDispatcher {
    pub fn new(contacts: SharedContactStore, recordings: SharedRecordingStore) -> Self {
        Self {
            contacts,
            recordings,
            messenger: None,
            public_base_url: None,
        }
    }

    pub fn with_messenger(mut self, messenger: SharedMessenger) -> Self {
        self.messenger = Some(messenger);
        self
    }

    /// Base URL used to build links recipients can open.
    pub fn with_public_base_url(mut self, base: impl Into<String>) -> Self {
        self.public_base_url = Some(base.into());
        self
    }

    pub fn messaging_enabled(&self) -> bool {
        self.messenger.is_some()
    }

    pub async fn dispatch(&self, request: AlertRequest) -> Result<DispatchResponse, DispatchError> {
        let contacts = self.contacts.list().await?;
        let recording_url = match request.audio {
            Some(audio) => self.store_audio(audio).await,
            None => None,
        };

        let ctx = AlertContext {
            kind: request.kind,
            coordinates: request.coordinates,
            recording_url: recording_url.as_deref(),
            prior_recording_url: request.prior_recording_url.as_deref(),
        };

        let (sms_results, call_results) = match &self.messenger {
            Some(messenger) if !contacts.is_empty() => {
                let sms = self.send_all_sms(messenger, &contacts, &ctx).await;
                let calls = self.place_all_calls(messenger, &contacts, &ctx).await;
                (sms, calls)
            }
            Some(_) => {
                warn!(kind = %request.kind, "No contacts saved; nothing to notify");
                (Vec::new(), Vec::new())
            }
            None => {
                warn!(kind = %request.kind, "Messaging disabled; SMS and calls skipped");
                (Vec::new(), Vec::new())
            }
        };

        let failed = sms_results
            .iter()
            .chain(call_results.iter())
            .filter(|r| !r.is_queued())
            .count();
        info!(
            kind = %request.kind,
            contacts = contacts.len(),
            failed,
            recording = recording_url.is_some(),
            "Alert dispatched"
        );

        let message = match request.kind {
            AttemptKind::Immediate => "SOS sent successfully!",
            AttemptKind::Delayed => "Delayed SOS sent successfully!",
        };
        Ok(DispatchResponse {
            success: true,
            message: message.to_string(),
            sms_results,
            call_results,
            recording_url,
        })
    }

    async fn store_audio(&self, audio: AudioUpload) -> Option<String> {
        let filename = match self.recordings.put(audio.bytes, &audio.content_type).await {
            Ok(name) => name,
            Err(e) => {
                warn!("Audio not stored: {e}");
                return None;
            }
        };
        match &self.public_base_url {
            Some(base) => Some(recording_url(base, &filename)),
            None => {
                warn!(filename = %filename, "No public base URL; recording link omitted");
                None
            }
        }
    }

    async fn send_all_sms(
        &self,
        messenger: &SharedMessenger,
        contacts: &[Contact],
        ctx: &AlertContext<'_>,
    ) -> Vec<DeliveryResult> {
        join_all(contacts.iter().map(|contact| async move {
            let variant = TemplateVariant::for_phone(&contact.phone);
            let body = sms_body(ctx, variant);
            let result = messenger.send_sms(&contact.phone, &body).await;
            to_delivery(
                contact,
                Channel::Sms,
                SMS_QUEUED_STATUS,
                Some(template_tag(ctx.kind, variant)),
                result,
            )
        }))
        .await
    }

    async fn place_all_calls(
        &self,
        messenger: &SharedMessenger,
        contacts: &[Contact],
        ctx: &AlertContext<'_>,
    ) -> Vec<DeliveryResult> {
        let script_url = call_script_url(ctx);
        let tag = match ctx.kind {
            AttemptKind::Immediate => None,
            AttemptKind::Delayed => Some("delayed"),
        };
        join_all(contacts.iter().map(|contact| {
            let script_url = script_url.as_str();
            async move {
                let result = messenger.place_call(&contact.phone, script_url).await;
                to_delivery(contact, Channel::Call, CALL_QUEUED_STATUS, tag, result)
            }
        }))
        .await
    }
}

fn to_delivery(
    contact: &Contact,
    channel: Channel,
    status: &str,
    template: Option<&str>,
    result: Result<ProviderReceipt, ProviderError>,
) -> DeliveryResult {
    let outcome = match result {
        Ok(receipt) => DeliveryOutcome::Queued {
            sid: receipt.sid,
            status: status.to_string(),
            template: template.map(String::from),
        },
        Err(e) => {
            warn!(contact = %contact.phone, %channel, "Delivery failed: {e}");
            DeliveryOutcome::Failed {
                error: e.message,
                code: e.code,
            }
        }
    };
    DeliveryResult {
        to: contact.phone.clone(),
        channel,
        outcome,
    }
}

#[cfg(test)]
mod tests {
    use std::sync::Arc;

    use super::*;
    use crate::contacts::{ContactStore, InMemoryContactStore};
    use crate::messenger::MockMessenger;
    use crate::recordings::InMemoryRecordingStore;

    async fn store_with(phones: &[&str]) -> SharedContactStore {
        let store = InMemoryContactStore::new();
        for (i, phone) in phones.iter().enumerate() {
            store.add(&format!("c{i}"), phone).await.unwrap();
        }
        store.shared()
    }

    fn clip() -> AudioUpload {
        AudioUpload {
            bytes: vec![0x52, 0x49, 0x46, 0x46],
            content_type: "audio/wav".into(),
        }
    }

    #[tokio::test]
    async fn test_fan_out_picks_template_per_contact() {
        let contacts = store_with(&["+919876543210", "+15551234567"]).await;
        let mut messenger = MockMessenger::new();
        messenger
            .expect_send_sms()
            .withf(|to, body| to == "+919876543210" && body.starts_with("SOS ALERT EMERGENCY!!"))
            .times(1)
            .returning(|_, _| Ok(ProviderReceipt { sid: "SM-in".into() }));
        messenger
            .expect_send_sms()
            .withf(|to, body| to == "+15551234567" && body.starts_with("🚨 EMERGENCY SOS!"))
            .times(1)
            .returning(|_, _| Ok(ProviderReceipt { sid: "SM-us".into() }));
        messenger
            .expect_place_call()
            .times(2)
            .returning(|to, _| Ok(ProviderReceipt { sid: format!("CA-{to}") }));

        let dispatcher = AlertDispatcher::new(contacts, InMemoryRecordingStore::new().shared())
            .with_messenger(Arc::new(messenger))
            .with_public_base_url("https://sos.example.com");

        let resp = dispatcher
            .dispatch(AlertRequest::immediate(Coordinates::new(1.0, 2.0)).with_audio(clip()))
            .await
            .unwrap();

        assert!(resp.success);
        assert_eq!(resp.sms_results.len(), 2);
        assert_eq!(resp.call_results.len(), 2);
        assert_eq!(resp.sms_results[0].provider_ref(), Some("SM-in"));
        assert_eq!(
            resp.sms_results[0].outcome,
            DeliveryOutcome::Queued {
                sid: "SM-in".into(),
                status: "queued".into(),
                template: Some("plain".into()),
            }
        );
        assert!(resp.call_results.iter().all(|r| r.channel == Channel::Call));
        let url = resp.recording_url.unwrap();
        assert!(url.starts_with("https://sos.example.com/api/audio/recording-"));
    }

    #[tokio::test]
    async fn test_per_contact_failure_does_not_abort_batch() {
        let contacts = store_with(&["+15550000001", "+15550000002"]).await;
        let mut messenger = MockMessenger::new();
        messenger
            .expect_send_sms()
            .withf(|to, _| to == "+15550000001")
            .returning(|_, _| Err(ProviderError::new("unverified number").with_code(21608)));
        messenger
            .expect_send_sms()
            .withf(|to, _| to == "+15550000002")
            .returning(|_, _| Ok(ProviderReceipt { sid: "SM2".into() }));
        messenger
            .expect_place_call()
            .returning(|_, _| Err(ProviderError::new("provider request failed")));

        let dispatcher = AlertDispatcher::new(contacts, InMemoryRecordingStore::new().shared())
            .with_messenger(Arc::new(messenger));
        let resp = dispatcher
            .dispatch(AlertRequest::delayed(Coordinates::new(0.0, 0.0), None))
            .await
            .unwrap();

        assert!(resp.success);
        assert_eq!(
            resp.sms_results[0].outcome,
            DeliveryOutcome::Failed {
                error: "unverified number".into(),
                code: Some(21608),
            }
        );
        assert!(resp.sms_results[1].is_queued());
        assert_eq!(resp.failures().count(), 3);
    }

    #[tokio::test]
    async fn test_delayed_sms_references_prior_recording() {
        let contacts = store_with(&["+15550000001"]).await;
        let mut messenger = MockMessenger::new();
        messenger
            .expect_send_sms()
            .withf(|_, body| body.contains("Original Recording: https://h/api/audio/first.wav"))
            .times(1)
            .returning(|_, _| Ok(ProviderReceipt { sid: "SM".into() }));
        messenger
            .expect_place_call()
            .times(1)
            .returning(|_, _| Ok(ProviderReceipt { sid: "CA".into() }));

        let dispatcher = AlertDispatcher::new(contacts, InMemoryRecordingStore::new().shared())
            .with_messenger(Arc::new(messenger));
        let resp = dispatcher
            .dispatch(AlertRequest::delayed(
                Coordinates::new(0.0, 0.0),
                Some("https://h/api/audio/first.wav".into()),
            ))
            .await
            .unwrap();
        assert_eq!(resp.message, "Delayed SOS sent successfully!");
        assert!(matches!(
            &resp.call_results[0].outcome,
            DeliveryOutcome::Queued { template: Some(t), .. } if t == "delayed"
        ));
    }

    #[tokio::test]
    async fn test_without_messenger_still_stores_audio() {
        let contacts = store_with(&["+15550000001"]).await;
        let recordings = Arc::new(InMemoryRecordingStore::new());
        let dispatcher = AlertDispatcher::new(contacts, recordings.clone())
            .with_public_base_url("https://sos.example.com/");

        let resp = dispatcher
            .dispatch(AlertRequest::immediate(Coordinates::new(0.0, 0.0)).with_audio(clip()))
            .await
            .unwrap();
        assert!(resp.sms_results.is_empty());
        assert!(resp.call_results.is_empty());
        assert!(resp.recording_url.is_some());
        assert_eq!(recordings.len().await, 1);
    }

    #[tokio::test]
    async fn test_no_public_base_means_no_link() {
        let dispatcher = AlertDispatcher::new(
            InMemoryContactStore::new().shared(),
            InMemoryRecordingStore::new().shared(),
        );
        let resp = dispatcher
            .dispatch(AlertRequest::immediate(Coordinates::new(0.0, 0.0)).with_audio(clip()))
            .await
            .unwrap();
        assert!(resp.recording_url.is_none());
    }
}
