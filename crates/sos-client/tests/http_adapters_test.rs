//! `HttpDispatcher` and `ContactsClient` against a live dispatch router on localhost.

use std::sync::{Arc, Mutex};
use std::time::Duration;

use async_trait::async_trait;
use dispatch::{
    router, AlertDispatcher, AppState, AttemptKind, Coordinates, InMemoryContactStore,
    InMemoryRecordingStore, Messenger, ProviderError, ProviderReceipt,
};
use sos_client::{AudioClip, ContactsClient, DispatchError, DispatchRequest, Dispatcher, HttpDispatcher};

#[derive(Default)]
struct RecordingMessenger {
    sms: Mutex<Vec<(String, String)>>,
}

#[async_trait]
impl Messenger for RecordingMessenger {
    async fn send_sms(&self, to: &str, body: &str) -> Result<ProviderReceipt, ProviderError> {
        self.sms.lock().unwrap().push((to.into(), body.into()));
        Ok(ProviderReceipt { sid: "SM1".into() })
    }

    async fn place_call(&self, _to: &str, _script_url: &str) -> Result<ProviderReceipt, ProviderError> {
        Ok(ProviderReceipt { sid: "CA1".into() })
    }
}

async fn spawn_service(messenger: Arc<RecordingMessenger>) -> String {
    let listener = tokio::net::TcpListener::bind("127.0.0.1:0").await.unwrap();
    let base = format!("http://{}", listener.local_addr().unwrap());

    let contacts = InMemoryContactStore::new().shared();
    let recordings = InMemoryRecordingStore::new().shared();
    let dispatcher = AlertDispatcher::new(contacts.clone(), recordings.clone())
        .with_messenger(messenger)
        .with_public_base_url(base.clone());
    let state = AppState::new(dispatcher, contacts, recordings, 1024 * 1024);

    tokio::spawn(async move {
        axum::serve(listener, router(state)).await.unwrap();
    });
    base
}

fn request(kind: AttemptKind, lat: f64, prior: Option<String>) -> DispatchRequest {
    DispatchRequest {
        kind,
        attempt: if kind == AttemptKind::Immediate { 1 } else { 2 },
        coordinates: Coordinates::new(lat, 77.209),
        audio: Some(AudioClip {
            bytes: b"RIFF test clip".to_vec(),
            content_type: "audio/wav".into(),
        }),
        prior_recording_url: prior,
    }
}

#[tokio::test]
async fn contacts_client_manages_contacts() {
    let base = spawn_service(Arc::default()).await;
    let client = ContactsClient::new(&base, Duration::from_secs(5)).unwrap();

    assert!(client.list().await.unwrap().is_empty());
    assert_eq!(
        client.add("Mom", "+91 98765 43210").await.unwrap(),
        "Contact added successfully!"
    );
    client.add("Dad", "+15550001111").await.unwrap();

    let contacts = client.list().await.unwrap();
    assert_eq!(contacts.len(), 2);
    assert_eq!(contacts[0].phone, "+919876543210");

    client.delete(&contacts[0].id).await.unwrap();
    let err = client.delete(&contacts[0].id).await.unwrap_err();
    assert!(err.to_string().contains("Contact not found"));

    let err = client.add("", "+15550001111").await.unwrap_err();
    assert!(err.to_string().contains("Name and phone required"));

    assert_eq!(client.clear().await.unwrap(), "Deleted 1 contact(s)");
    assert!(client.list().await.unwrap().is_empty());
}

#[tokio::test]
async fn http_dispatcher_uploads_and_forwards_prior_recording() {
    let messenger = Arc::new(RecordingMessenger::default());
    let base = spawn_service(messenger.clone()).await;
    ContactsClient::new(&base, Duration::from_secs(5))
        .unwrap()
        .add("Friend", "+4915112345678")
        .await
        .unwrap();
    let dispatcher = HttpDispatcher::new(&base, Duration::from_secs(5)).unwrap();

    let first = dispatcher
        .dispatch(request(AttemptKind::Immediate, 28.6139, None))
        .await
        .unwrap();
    assert_eq!(first.message, "SOS sent successfully!");
    assert_eq!(first.sms_results.len(), 1);
    let url = first.recording_url.clone().unwrap();
    assert!(url.starts_with(&format!("{base}/api/audio/recording-")));

    let audio = reqwest::get(&url).await.unwrap();
    assert_eq!(audio.headers()["content-type"], "audio/wav");
    assert_eq!(audio.bytes().await.unwrap().as_ref(), b"RIFF test clip");

    let follow_up = dispatcher
        .dispatch(request(AttemptKind::Delayed, 28.7, Some(url.clone())))
        .await
        .unwrap();
    assert_eq!(follow_up.message, "Delayed SOS sent successfully!");
    assert_ne!(follow_up.recording_url, Some(url.clone()));

    let sms = messenger.sms.lock().unwrap().clone();
    assert_eq!(sms.len(), 2);
    assert!(sms[0].1.contains("https://www.google.com/maps?q=28.6139,77.209"));
    assert!(sms[1].1.contains(&format!("Original Recording: {url}")));
}

#[tokio::test]
async fn http_dispatcher_reports_server_rejection() {
    let base = spawn_service(Arc::default()).await;
    let dispatcher = HttpDispatcher::new(&base, Duration::from_secs(5)).unwrap();

    let err = dispatcher
        .dispatch(request(AttemptKind::Immediate, 95.0, None))
        .await
        .unwrap_err();
    assert_eq!(
        err,
        DispatchError::Status {
            status: 400,
            message: "lat out of range: 95".into()
        }
    );
}

#[tokio::test]
async fn http_dispatcher_reports_unreachable_service() {
    let dispatcher = HttpDispatcher::new("http://127.0.0.1:9", Duration::from_secs(2)).unwrap();
    let err = dispatcher
        .dispatch(request(AttemptKind::Immediate, 1.0, None))
        .await
        .unwrap_err();
    assert!(matches!(err, DispatchError::Transport(_)));
}
