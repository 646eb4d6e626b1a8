//! Stub transport shared by unit tests.
use std::collections::{HashMap, VecDeque};
use std::sync::Mutex;

use async_trait::async_trait;
use reqwest::header::HeaderMap;
use reqwest::{StatusCode, Url};

use crate::event::decode_batch;
use crate::uploader::HttpTransport;
use crate::{Error, EventBatch, Result};

#[derive(Debug, Clone, Copy)]
pub(crate) enum StubResponse {
    Status(u16),
    NetworkFailure,
    /// Never respond.
    Hang,
}

pub(crate) struct RecordedRequest {
    pub url: Url,
    pub headers: HeaderMap,
    pub batch: EventBatch,
}

/// Responds with (in order of precedence) the response configured for the batch's client secret,
/// the next scripted response, or the default response.
pub(crate) struct StubTransport {
    default: StubResponse,
    by_client_secret: HashMap<String, StubResponse>,
    scripted: Mutex<VecDeque<StubResponse>>,
    requests: Mutex<Vec<RecordedRequest>>,
}

impl StubTransport {
    pub fn new(default: StubResponse) -> StubTransport {
        StubTransport {
            default,
            by_client_secret: HashMap::new(),
            scripted: Mutex::new(VecDeque::new()),
            requests: Mutex::new(Vec::new()),
        }
    }

    pub fn always(status: u16) -> StubTransport {
        StubTransport::new(StubResponse::Status(status))
    }

    pub fn by_client_secret(
        responses: impl IntoIterator<Item = (String, StubResponse)>,
    ) -> StubTransport {
        StubTransport {
            by_client_secret: responses.into_iter().collect(),
            ..StubTransport::always(200)
        }
    }

    pub fn scripted(
        responses: impl IntoIterator<Item = StubResponse>,
        default: StubResponse,
    ) -> StubTransport {
        StubTransport {
            scripted: Mutex::new(responses.into_iter().collect()),
            ..StubTransport::new(default)
        }
    }

    /// Batches received so far, in arrival order.
    pub fn batches(&self) -> Vec<EventBatch> {
        self.requests
            .lock()
            .unwrap()
            .iter()
            .map(|request| request.batch.clone())
            .collect()
    }

    pub fn requests(&self) -> Vec<RecordedRequest> {
        self.requests
            .lock()
            .unwrap()
            .iter()
            .map(|request| RecordedRequest {
                url: request.url.clone(),
                headers: request.headers.clone(),
                batch: request.batch.clone(),
            })
            .collect()
    }
}

/// A real `reqwest::Error`, produced without touching the network.
pub(crate) fn network_error() -> Error {
    Error::from(
        reqwest::Client::new()
            .get("not a url")
            .build()
            .unwrap_err(),
    )
}

#[async_trait]
impl HttpTransport for StubTransport {
    async fn post(&self, url: &Url, headers: &HeaderMap, body: Vec<u8>) -> Result<StatusCode> {
        let batch = decode_batch(&body).expect("uploader should send a valid batch");

        let response = match self.by_client_secret.get(batch.client_secret()) {
            Some(response) => *response,
            None => self
                .scripted
                .lock()
                .unwrap()
                .pop_front()
                .unwrap_or(self.default),
        };

        self.requests.lock().unwrap().push(RecordedRequest {
            url: url.clone(),
            headers: headers.clone(),
            batch,
        });

        match response {
            StubResponse::Status(status) => Ok(StatusCode::from_u16(status).unwrap()),
            StubResponse::NetworkFailure => Err(network_error()),
            StubResponse::Hang => std::future::pending().await,
        }
    }
}
